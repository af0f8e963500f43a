use std::path::PathBuf;
use thiserror::Error;

use super::worker_status::WorkerStatus;

#[derive(Debug, Error)]
pub enum DataFileError {
    #[error("File does not exist: {0:?}")]
    NotFound(PathBuf),
    #[error("DataFile failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("DataFile failed to read zip container: {0}")]
    ZipError(#[from] zip::result::ZipError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to load configuration as file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Config failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Config failed to parse YAML: {0}")]
    ParsingError(#[from] serde_yaml::Error),
}

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("Protocol file {0:?} does not exist")]
    BadFilePath(PathBuf),
    #[error("Protocol table failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Failed to parse protocol XML {path:?}: {source}")]
    ParsingError {
        path: PathBuf,
        source: quick_xml::Error,
    },
}

#[derive(Debug, Error)]
pub enum ProjectStoreError {
    #[error("Project store {path:?} is corrupt or unreadable: {source}")]
    CorruptStore {
        path: PathBuf,
        source: rusqlite::Error,
    },
    #[error("get_acquisition_settings takes either a task id or a session id, not both")]
    ConflictingFilter,
}

#[derive(Debug, Error)]
pub enum TaskInfoError {
    #[error("Task {task_id} ({task_name}) has unknown MeasureMode code {code:?}; refusing to guess")]
    UnknownMode {
        task_id: i64,
        task_name: String,
        code: String,
    },
    #[error("Task {task_id} has no acquisition settings session")]
    NoSettingsSession { task_id: i64 },
    #[error("Task {task_id} is missing acquisition setting {setting:?}")]
    MissingSetting { task_id: i64, setting: String },
    #[error("Acquisition setting {setting:?} has non-numeric value {value:?}")]
    SettingCoercion { setting: String, value: String },
    #[error("Failed to parse instrument timestamp {value:?}")]
    BadTimestamp { value: String },
    #[error("TaskInfo extraction failed due to store error: {0}")]
    StoreError(#[from] ProjectStoreError),
}

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("Snapshot failed due to Arrow error: {0}")]
    ArrowError(#[from] arrow::error::ArrowError),
    #[error("Snapshot failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
    #[error("Snapshot {path:?} has unexpected column layout at {column:?}")]
    SchemaMismatch { path: PathBuf, column: String },
}

#[derive(Debug, Error)]
pub enum VoltageLogError {
    #[error("Voltage log failed due to DataFile error: {0}")]
    FileError(#[from] DataFileError),
    #[error("Voltage log line {line} is malformed: {reason}")]
    ParsingError { line: usize, reason: String },
    #[error("Duplicate-timestamp repair did not converge within {0} passes")]
    TimestampRepair(usize),
    #[error("Voltage log failed due to snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),
}

#[derive(Debug, Error)]
pub enum TemperatureError {
    #[error("Temperature series failed due to store error: {0}")]
    StoreError(#[from] ProjectStoreError),
    #[error("Temperature series failed due to snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),
    #[error("Temperature series failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("Task catalog failed due to snapshot error: {0}")]
    SnapshotError(#[from] SnapshotError),
    #[error("Task catalog failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("Pipeline failed due to configuration error: {0}")]
    ConfigError(#[from] ConfigError),
    #[error("Pipeline failed due to protocol table error: {0}")]
    ProtocolError(#[from] ProtocolError),
    #[error("Pipeline failed due to catalog error: {0}")]
    CatalogError(#[from] CatalogError),
    #[error("Pipeline failed due to voltage log error: {0}")]
    VoltageError(#[from] VoltageLogError),
    #[error("Pipeline failed due to temperature series error: {0}")]
    TemperatureError(#[from] TemperatureError),
    #[error("Pipeline failed due to Send error: {0}")]
    SendError(#[from] std::sync::mpsc::SendError<WorkerStatus>),
    #[error("Pipeline failed due to IO error: {0}")]
    IOError(#[from] std::io::Error),
}
