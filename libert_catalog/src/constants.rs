//! Constants shared across the pipeline.

/// Datatype codes used by the Terrameter LS in the DPV table.
///
/// These come straight from the instrument's Datatype table and are stable
/// across firmware versions we have seen in the field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Datatype {
    SelfPotential = 1,
    ApparentResistivity = 2,
    InducedPolarization = 3,
    SignalToNoiseRatio = 4,
    Resistance = 5,
    Current = 6,
    DeltaVoltage = 7,
    Chargeability = 8,
    IpDeltaVoltage = 9,
    Average = 10,
    Signal = 11,
    IpSpCompensation = 12,
    Temperature = 13,
}

impl Datatype {
    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            1 => Some(Self::SelfPotential),
            2 => Some(Self::ApparentResistivity),
            3 => Some(Self::InducedPolarization),
            4 => Some(Self::SignalToNoiseRatio),
            5 => Some(Self::Resistance),
            6 => Some(Self::Current),
            7 => Some(Self::DeltaVoltage),
            8 => Some(Self::Chargeability),
            9 => Some(Self::IpDeltaVoltage),
            10 => Some(Self::Average),
            11 => Some(Self::Signal),
            12 => Some(Self::IpSpCompensation),
            13 => Some(Self::Temperature),
            _ => None,
        }
    }
}

/// Channels 1..=12 carry measurement data. Channel 0 carries the transmitter
/// record and must not be counted as a datapoint.
pub const MIN_DATA_CHANNEL: i64 = 1;
pub const MAX_DATA_CHANNEL: i64 = 12;

/// Log markers scanned per task. The last occurrence of each wins, since a
/// task may be started and stopped multiple times.
pub const MARKER_STARTED: &str = "Measuring Started";
pub const MARKER_COMPLETED: &str = "Measuring done";
pub const MARKER_QUIT: &str = "Quit";

/// Supply-voltage readings below this are a sensor fault, not a real voltage.
/// Overridable through `Config::voltage_fault_threshold_volt`.
pub const VOLTAGE_FAULT_THRESHOLD_VOLT: f64 = -90.0;

/// Nudge applied to duplicated supply-log timestamps, in milliseconds.
/// Overridable through `Config::duplicate_nudge_ms`.
pub const DUPLICATE_NUDGE_MS: i64 = 1;

/// Bound on the duplicate-repair fixed-point loop. The loop terminates on any
/// real log long before this; hitting the bound means the input is malformed.
pub const MAX_REPAIR_PASSES: usize = 10_000;

/// Number of bytes sniffed for encoding detection.
pub const ENCODING_SNIFF_BYTES: usize = 300;

/// Snapshot file names, relative to the configured output directory.
pub const TASK_CATALOG_FILE: &str = "task_info.arrow";
pub const VOLTAGE_SERIES_FILE: &str = "supply_voltage.arrow";
pub const BATTERY_STATS_FILE: &str = "battery_stats.arrow";
pub const TEMPERATURE_SERIES_FILE: &str = "temperature_info.arrow";
