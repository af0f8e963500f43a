//! Normalized per-task records and the rules that derive them.
//!
//! One `AcquisitionTask` is emitted per instrument task: project identity,
//! counts, completion percentage against the protocol's nominal count, the
//! reported acquisition settings, mode-dependent duty-cycle timing, and the
//! timestamps of the final start/done/quit log markers.

use std::collections::BTreeMap;

use time::macros::format_description;
use time::{Date, PrimitiveDateTime};

use super::constants::{MARKER_COMPLETED, MARKER_QUIT, MARKER_STARTED};
use super::error::TaskInfoError;
use super::project_store::{LogRow, ProjectStore, TaskRow};
use super::protocol::NominalCounts;

/// Electrode configuration, classified from the task name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Configuration {
    Ecr,
    Gradient,
    DipDip,
    Unknown,
}

impl Configuration {
    /// Ordered, case-insensitive substring rules; first match wins.
    pub fn classify(task_name: &str) -> Self {
        let lower = task_name.to_lowercase();
        if lower.contains("ecr") {
            Self::Ecr
        } else if lower.contains("gradient") {
            Self::Gradient
        } else if lower.contains("dipdip") {
            Self::DipDip
        } else {
            Self::Unknown
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ecr => "ecr",
            Self::Gradient => "gradient",
            Self::DipDip => "dipdip",
            Self::Unknown => "unknown",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "ecr" => Self::Ecr,
            "gradient" => Self::Gradient,
            "dipdip" => Self::DipDip,
            _ => Self::Unknown,
        }
    }
}

/// Measurement mode, resolved from the raw firmware code.
///
/// The code table is explicit on purpose: an unrecognized code is a
/// data-integrity error, not something to guess around, since both the
/// completion percentage and the duty-cycle figures depend on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasureMode {
    Resistivity,
    Ip,
    Sp,
}

impl MeasureMode {
    pub fn from_code(code: &str) -> Option<Self> {
        match code.trim() {
            "1" => Some(Self::Sp),
            "2" => Some(Self::Resistivity),
            "3" => Some(Self::Ip),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Resistivity => "Resistivity",
            Self::Ip => "IP",
            Self::Sp => "SP",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "Resistivity" => Some(Self::Resistivity),
            "IP" => Some(Self::Ip),
            "SP" => Some(Self::Sp),
            _ => None,
        }
    }
}

/// The fixed allow-list of acquisition settings reported per task, plus the
/// derived waveform timing.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionSettings {
    pub acq_delay_sec: f64,
    pub acq_time_sec: f64,
    pub current_limit_high_ampere: f64,
    pub current_limit_low_ampere: f64,
    pub electrode_resistance_bad_limit_high_ohm: f64,
    pub electrode_resistance_bad_limit_low_ohm: f64,
    pub electrode_test: String,
    pub electrode_test_current_ampere: f64,
    pub fullwaveform: String,
    pub ip_off_time_sec: f64,
    pub measure_mode: MeasureMode,
    pub on_time_sec: f64,
    pub off_time_sec: f64,
}

/// One normalized task record, created once per (project, task) and never
/// mutated afterwards.
#[derive(Debug, Clone, PartialEq)]
pub struct AcquisitionTask {
    pub project_name: String,
    pub project_date: Date,
    pub task_id: i64,
    pub task_name: String,
    pub protocol_file: String,
    pub configuration: Configuration,
    pub created_at: Option<PrimitiveDateTime>,
    pub datapoint_count: i64,
    pub dipole_count: i64,
    pub electrode_test_count: i64,
    pub nominal_count: i64,
    pub completed_pct: f64,
    pub started_at: Option<PrimitiveDateTime>,
    pub completed_at: Option<PrimitiveDateTime>,
    pub quit_at: Option<PrimitiveDateTime>,
    pub first_log_event: Option<PrimitiveDateTime>,
    pub last_log_event: Option<PrimitiveDateTime>,
    pub settings: AcquisitionSettings,
}

/// Parse a timestamp string as written by the instrument
/// (`YYYY-MM-DD hh:mm:ss`, occasionally with a fractional part).
pub fn parse_instrument_time(value: &str) -> Result<PrimitiveDateTime, TaskInfoError> {
    const PLAIN: &[time::format_description::BorrowedFormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");
    const FRACTIONAL: &[time::format_description::BorrowedFormatItem<'static>] =
        format_description!("[year]-[month]-[day] [hour]:[minute]:[second].[subsecond]");

    let trimmed = value.trim();
    PrimitiveDateTime::parse(trimmed, &PLAIN)
        .or_else(|_| PrimitiveDateTime::parse(trimmed, &FRACTIONAL))
        .map_err(|_| TaskInfoError::BadTimestamp {
            value: value.to_string(),
        })
}

/// When a task maps to several settings sessions, the lowest session id is
/// authoritative: the instrument assigns ids monotonically, so the lowest is
/// the first chronologically.
pub fn select_settings_session(
    task_id: i64,
    sessions: &BTreeMap<i64, BTreeMap<String, String>>,
) -> Result<(i64, &BTreeMap<String, String>), TaskInfoError> {
    sessions
        .iter()
        .next()
        .map(|(id, settings)| (*id, settings))
        .ok_or(TaskInfoError::NoSettingsSession { task_id })
}

fn get_setting<'a>(
    task_id: i64,
    settings: &'a BTreeMap<String, String>,
    name: &str,
) -> Result<&'a str, TaskInfoError> {
    settings
        .get(name)
        .map(String::as_str)
        .ok_or_else(|| TaskInfoError::MissingSetting {
            task_id,
            setting: name.to_string(),
        })
}

fn get_float_setting(
    task_id: i64,
    settings: &BTreeMap<String, String>,
    name: &str,
) -> Result<f64, TaskInfoError> {
    let raw = get_setting(task_id, settings, name)?;
    raw.trim()
        .parse::<f64>()
        .map_err(|_| TaskInfoError::SettingCoercion {
            setting: name.to_string(),
            value: raw.to_string(),
        })
}

/// Extract the reported settings for one task from one session's raw
/// name/value map, resolving the measurement mode and deriving the
/// mode-dependent waveform timing.
pub fn derive_settings(
    task_id: i64,
    task_name: &str,
    raw: &BTreeMap<String, String>,
) -> Result<AcquisitionSettings, TaskInfoError> {
    let mode_code = get_setting(task_id, raw, "MeasureMode")?;
    let measure_mode =
        MeasureMode::from_code(mode_code).ok_or_else(|| TaskInfoError::UnknownMode {
            task_id,
            task_name: task_name.to_string(),
            code: mode_code.to_string(),
        })?;

    let acq_delay_sec = get_float_setting(task_id, raw, "Acq_DelaySec")?;
    let acq_time_sec = get_float_setting(task_id, raw, "Acq_TimeSec")?;

    // The instrument reports IP_OffTimeSec in every mode; it only means
    // something when actually measuring IP.
    let ip_off_time_sec = if measure_mode == MeasureMode::Ip {
        get_float_setting(task_id, raw, "IP_OffTimeSec")?
    } else {
        0.0
    };

    let (on_time_sec, off_time_sec) = match measure_mode {
        MeasureMode::Resistivity | MeasureMode::Ip => {
            (acq_delay_sec + acq_time_sec, ip_off_time_sec)
        }
        MeasureMode::Sp => (0.0, get_float_setting(task_id, raw, "SP_TimeSec")?),
    };

    Ok(AcquisitionSettings {
        acq_delay_sec,
        acq_time_sec,
        current_limit_high_ampere: get_float_setting(task_id, raw, "CurrentLimitHighAmpere")?,
        current_limit_low_ampere: get_float_setting(task_id, raw, "CurrentLimitLowAmpere")?,
        electrode_resistance_bad_limit_high_ohm: get_float_setting(
            task_id,
            raw,
            "ElectrodeResistanceBadLimitHighOhm",
        )?,
        electrode_resistance_bad_limit_low_ohm: get_float_setting(
            task_id,
            raw,
            "ElectrodeResistanceBadLimitLowOhm",
        )?,
        electrode_test: get_setting(task_id, raw, "ElectrodeTest")?.to_string(),
        electrode_test_current_ampere: get_float_setting(
            task_id,
            raw,
            "ElectrodeTestCurrentAmpere",
        )?,
        fullwaveform: get_setting(task_id, raw, "Fullwaveform")?.to_string(),
        ip_off_time_sec,
        measure_mode,
        on_time_sec,
        off_time_sec,
    })
}

/// Join one task row with its settings and log events into the normalized
/// catalog record.
///
/// `log_rows` is the project's full log in timestamp order; marker scanning
/// keeps the timestamp of the *last* occurrence of each marker, since a task
/// may be started and stopped several times and only the final outcome
/// matters.
pub fn extract_task_info(
    project_name: &str,
    project_date: Date,
    task: &TaskRow,
    store: &ProjectStore,
    log_rows: &[LogRow],
    nominal_counts: &NominalCounts,
) -> Result<AcquisitionTask, TaskInfoError> {
    let configuration = Configuration::classify(&task.name);

    let sessions = store.get_acquisition_settings(Some(task.id), None)?;
    let (_, session_settings) = select_settings_session(task.id, &sessions)?;
    let settings = derive_settings(task.id, &task.name, session_settings)?;

    let protocol_file = task
        .protocol_file
        .as_deref()
        .map(protocol_basename)
        .unwrap_or_default();

    let nominal_count = nominal_counts.get(&task.name) as i64;
    let completed_pct = if nominal_count > 0 {
        task.n_data as f64 / nominal_count as f64 * 100.0
    } else {
        0.0
    };

    let created_at = match task.time.as_deref() {
        Some(raw) => Some(parse_instrument_time(raw)?),
        None => None,
    };

    let mut started_at = None;
    let mut completed_at = None;
    let mut quit_at = None;
    let mut first_log_event = None;
    let mut last_log_event = None;

    for row in log_rows.iter().filter(|r| r.task_id == Some(task.id)) {
        let Some(raw_time) = row.time.as_deref() else {
            continue;
        };
        let timestamp = parse_instrument_time(raw_time)?;
        if first_log_event.is_none() {
            first_log_event = Some(timestamp);
        }
        last_log_event = Some(timestamp);

        if let Some(what) = row.what.as_deref() {
            if what.contains(MARKER_STARTED) {
                started_at = Some(timestamp);
            }
            if what.contains(MARKER_COMPLETED) {
                completed_at = Some(timestamp);
            }
            if what.contains(MARKER_QUIT) {
                quit_at = Some(timestamp);
            }
        }
    }

    Ok(AcquisitionTask {
        project_name: project_name.to_string(),
        project_date,
        task_id: task.id,
        task_name: task.name.clone(),
        protocol_file,
        configuration,
        created_at,
        datapoint_count: task.n_data,
        dipole_count: task.n_dipoles,
        electrode_test_count: task.n_ecr_data,
        nominal_count,
        completed_pct,
        started_at,
        completed_at,
        quit_at,
        first_log_event,
        last_log_event,
        settings,
    })
}

/// The ProtocolFile setting stores an absolute instrument path; only the file
/// name is meaningful off the instrument.
fn protocol_basename(path: &str) -> String {
    path.rsplit(['/', '\\'])
        .next()
        .unwrap_or(path)
        .to_string()
}
