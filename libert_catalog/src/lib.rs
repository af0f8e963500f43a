//! # ert_catalog
//!
//! ert_catalog is the batch reconciliation pipeline for the ARTEK permafrost
//! monitoring stations. It ingests the SQLite project stores written by an
//! ABEM Terrameter LS alongside the station's semicolon-delimited
//! power-supply log, and derives three clean columnar snapshots for the
//! visualization layer:
//!
//! - a per-task acquisition catalog (timing, completion percentage against
//!   the protocol's nominal measurement count, instrument settings and
//!   mode-dependent duty-cycle durations), append-only across runs;
//! - the corrected supply-voltage series with daily aggregate statistics,
//!   rewritten wholesale each run;
//! - a merged temperature/power time series combining log telemetry with
//!   temperature datapoints, rewritten wholesale each run.
//!
//! The pipeline is a periodic batch job, not a streaming system: it is meant
//! to be run from cron (or by hand) after new project data lands on the
//! station share.
//!
//! ## Installation
//!
//! Install the CLI from source with `cargo install --path ./ert_catalog_cli`
//! from the top level repository. The binary lands in your cargo install
//! location (typically `~/.cargo/bin/`).
//!
//! ## Configuration
//!
//! The pipeline is driven by a YAML configuration file:
//!
//! ```yml
//! projects_path: /data/station/projects
//! protocols_path: /data/station/protocols
//! supply_log_path: /data/station/logs/supply_voltage.dat
//! output_path: /data/station/derived
//! protocol_map:
//!   2x32gradientXL_1: GradientXL_64_DISKO.xml
//!   2x32dipdip_1: DipoleDipole64_DISKO.xml
//! commissioning_date: 2021-06-26
//! voltage_fault_threshold_volt: -90.0
//! duplicate_nudge_ms: 1
//! ```
//!
//! `projects_path` is scanned recursively for `*.db` stores inside
//! date-coded project folders (`YYMMDD...`, digits and underscores only).
//! Projects dated before `commissioning_date` are bench tests and are
//! excluded. The protocol map ties task names to the protocol XML files
//! whose receiver-element counts define the nominal measurement count per
//! task; unmapped task names get a nominal count of 0.
//!
//! ## Output
//!
//! Four Arrow IPC files are written to `output_path`:
//!
//! ```text
//! task_info.arrow        - one row per (project, task), append-only
//! supply_voltage.arrow   - corrected power-supply series
//! battery_stats.arrow    - daily voltage min/max/mean/stddev
//! temperature_info.arrow - merged temperature/power series
//! ```
//!
//! A project already present in the task catalog (by name) is never
//! reprocessed, even if its store changed on disk; this is deliberate, since
//! the instrument never rewrites history and re-deriving rows would break
//! the append-only contract.
pub mod catalog;
pub mod config;
pub mod constants;
pub mod data_file;
pub mod error;
pub mod process;
pub mod project_store;
pub mod protocol;
pub mod snapshot;
pub mod task_info;
pub mod temperature;
pub mod voltage_log;
pub mod worker_status;
