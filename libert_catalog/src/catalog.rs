//! The growing catalog of processed tasks across all projects.
//!
//! The catalog is append-only and keyed by project name: a project already
//! present is never reprocessed, even if its store changed on disk. All rows
//! gathered during a run are appended in memory and written once at the end,
//! so an aborted run leaves the previous snapshot untouched.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use arrow::array::{
    Array, Date32Array, Date32Builder, Float64Array, Float64Builder, Int64Array, Int64Builder,
    RecordBatch, StringArray, StringBuilder, TimestampMicrosecondArray,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use fxhash::FxHashSet;

use super::error::{CatalogError, SnapshotError};
use super::snapshot::{
    date_to_days, datetime_to_micros, days_to_date, micros_to_datetime, read_snapshot,
    write_snapshot,
};
use super::task_info::{AcquisitionSettings, AcquisitionTask, Configuration, MeasureMode};

fn catalog_schema() -> Arc<Schema> {
    let ts = DataType::Timestamp(TimeUnit::Microsecond, None);
    Arc::new(Schema::new(vec![
        Field::new("project_name", DataType::Utf8, false),
        Field::new("project_date", DataType::Date32, false),
        Field::new("task_id", DataType::Int64, false),
        Field::new("task_name", DataType::Utf8, false),
        Field::new("protocol_file", DataType::Utf8, false),
        Field::new("configuration", DataType::Utf8, false),
        Field::new("created_at", ts.clone(), true),
        Field::new("datapoint_count", DataType::Int64, false),
        Field::new("dipole_count", DataType::Int64, false),
        Field::new("electrode_test_count", DataType::Int64, false),
        Field::new("nominal_count", DataType::Int64, false),
        Field::new("completed_pct", DataType::Float64, false),
        Field::new("started_at", ts.clone(), true),
        Field::new("completed_at", ts.clone(), true),
        Field::new("quit_at", ts.clone(), true),
        Field::new("first_log_event", ts.clone(), true),
        Field::new("last_log_event", ts, true),
        Field::new("acq_delay_sec", DataType::Float64, false),
        Field::new("acq_time_sec", DataType::Float64, false),
        Field::new("current_limit_high_ampere", DataType::Float64, false),
        Field::new("current_limit_low_ampere", DataType::Float64, false),
        Field::new(
            "electrode_resistance_bad_limit_high_ohm",
            DataType::Float64,
            false,
        ),
        Field::new(
            "electrode_resistance_bad_limit_low_ohm",
            DataType::Float64,
            false,
        ),
        Field::new("electrode_test", DataType::Utf8, false),
        Field::new("electrode_test_current_ampere", DataType::Float64, false),
        Field::new("fullwaveform", DataType::Utf8, false),
        Field::new("ip_off_time_sec", DataType::Float64, false),
        Field::new("measure_mode", DataType::Utf8, false),
        Field::new("on_time_sec", DataType::Float64, false),
        Field::new("off_time_sec", DataType::Float64, false),
    ]))
}

/// Encode tasks into a record batch with the catalog column layout.
pub fn to_record_batch(tasks: &[AcquisitionTask]) -> Result<RecordBatch, SnapshotError> {
    let mut project_name = StringBuilder::new();
    let mut project_date = Date32Builder::new();
    let mut task_id = Int64Builder::new();
    let mut task_name = StringBuilder::new();
    let mut protocol_file = StringBuilder::new();
    let mut configuration = StringBuilder::new();
    let mut created_at = TimestampMicrosecondBuilder::new();
    let mut datapoint_count = Int64Builder::new();
    let mut dipole_count = Int64Builder::new();
    let mut electrode_test_count = Int64Builder::new();
    let mut nominal_count = Int64Builder::new();
    let mut completed_pct = Float64Builder::new();
    let mut started_at = TimestampMicrosecondBuilder::new();
    let mut completed_at = TimestampMicrosecondBuilder::new();
    let mut quit_at = TimestampMicrosecondBuilder::new();
    let mut first_log_event = TimestampMicrosecondBuilder::new();
    let mut last_log_event = TimestampMicrosecondBuilder::new();
    let mut acq_delay_sec = Float64Builder::new();
    let mut acq_time_sec = Float64Builder::new();
    let mut current_limit_high = Float64Builder::new();
    let mut current_limit_low = Float64Builder::new();
    let mut resistance_limit_high = Float64Builder::new();
    let mut resistance_limit_low = Float64Builder::new();
    let mut electrode_test = StringBuilder::new();
    let mut electrode_test_current = Float64Builder::new();
    let mut fullwaveform = StringBuilder::new();
    let mut ip_off_time_sec = Float64Builder::new();
    let mut measure_mode = StringBuilder::new();
    let mut on_time_sec = Float64Builder::new();
    let mut off_time_sec = Float64Builder::new();

    for task in tasks {
        project_name.append_value(&task.project_name);
        project_date.append_value(date_to_days(task.project_date));
        task_id.append_value(task.task_id);
        task_name.append_value(&task.task_name);
        protocol_file.append_value(&task.protocol_file);
        configuration.append_value(task.configuration.as_str());
        created_at.append_option(task.created_at.map(datetime_to_micros));
        datapoint_count.append_value(task.datapoint_count);
        dipole_count.append_value(task.dipole_count);
        electrode_test_count.append_value(task.electrode_test_count);
        nominal_count.append_value(task.nominal_count);
        completed_pct.append_value(task.completed_pct);
        started_at.append_option(task.started_at.map(datetime_to_micros));
        completed_at.append_option(task.completed_at.map(datetime_to_micros));
        quit_at.append_option(task.quit_at.map(datetime_to_micros));
        first_log_event.append_option(task.first_log_event.map(datetime_to_micros));
        last_log_event.append_option(task.last_log_event.map(datetime_to_micros));
        acq_delay_sec.append_value(task.settings.acq_delay_sec);
        acq_time_sec.append_value(task.settings.acq_time_sec);
        current_limit_high.append_value(task.settings.current_limit_high_ampere);
        current_limit_low.append_value(task.settings.current_limit_low_ampere);
        resistance_limit_high.append_value(task.settings.electrode_resistance_bad_limit_high_ohm);
        resistance_limit_low.append_value(task.settings.electrode_resistance_bad_limit_low_ohm);
        electrode_test.append_value(&task.settings.electrode_test);
        electrode_test_current.append_value(task.settings.electrode_test_current_ampere);
        fullwaveform.append_value(&task.settings.fullwaveform);
        ip_off_time_sec.append_value(task.settings.ip_off_time_sec);
        measure_mode.append_value(task.settings.measure_mode.as_str());
        on_time_sec.append_value(task.settings.on_time_sec);
        off_time_sec.append_value(task.settings.off_time_sec);
    }

    Ok(RecordBatch::try_new(
        catalog_schema(),
        vec![
            Arc::new(project_name.finish()),
            Arc::new(project_date.finish()),
            Arc::new(task_id.finish()),
            Arc::new(task_name.finish()),
            Arc::new(protocol_file.finish()),
            Arc::new(configuration.finish()),
            Arc::new(created_at.finish()),
            Arc::new(datapoint_count.finish()),
            Arc::new(dipole_count.finish()),
            Arc::new(electrode_test_count.finish()),
            Arc::new(nominal_count.finish()),
            Arc::new(completed_pct.finish()),
            Arc::new(started_at.finish()),
            Arc::new(completed_at.finish()),
            Arc::new(quit_at.finish()),
            Arc::new(first_log_event.finish()),
            Arc::new(last_log_event.finish()),
            Arc::new(acq_delay_sec.finish()),
            Arc::new(acq_time_sec.finish()),
            Arc::new(current_limit_high.finish()),
            Arc::new(current_limit_low.finish()),
            Arc::new(resistance_limit_high.finish()),
            Arc::new(resistance_limit_low.finish()),
            Arc::new(electrode_test.finish()),
            Arc::new(electrode_test_current.finish()),
            Arc::new(fullwaveform.finish()),
            Arc::new(ip_off_time_sec.finish()),
            Arc::new(measure_mode.finish()),
            Arc::new(on_time_sec.finish()),
            Arc::new(off_time_sec.finish()),
        ],
    )?)
}

fn column<'a, T: 'static>(
    batch: &'a RecordBatch,
    path: &Path,
    name: &str,
) -> Result<&'a T, SnapshotError> {
    batch
        .column_by_name(name)
        .and_then(|col| col.as_any().downcast_ref::<T>())
        .ok_or_else(|| SnapshotError::SchemaMismatch {
            path: path.to_path_buf(),
            column: name.to_string(),
        })
}

fn optional_datetime(
    array: &TimestampMicrosecondArray,
    row: usize,
) -> Result<Option<time::PrimitiveDateTime>, SnapshotError> {
    if array.is_null(row) {
        Ok(None)
    } else {
        Ok(Some(micros_to_datetime(array.value(row))?))
    }
}

/// Decode a catalog record batch back into task records.
pub fn from_record_batch(
    path: &Path,
    batch: &RecordBatch,
) -> Result<Vec<AcquisitionTask>, SnapshotError> {
    let project_name: &StringArray = column(batch, path, "project_name")?;
    let project_date: &Date32Array = column(batch, path, "project_date")?;
    let task_id: &Int64Array = column(batch, path, "task_id")?;
    let task_name: &StringArray = column(batch, path, "task_name")?;
    let protocol_file: &StringArray = column(batch, path, "protocol_file")?;
    let configuration: &StringArray = column(batch, path, "configuration")?;
    let created_at: &TimestampMicrosecondArray = column(batch, path, "created_at")?;
    let datapoint_count: &Int64Array = column(batch, path, "datapoint_count")?;
    let dipole_count: &Int64Array = column(batch, path, "dipole_count")?;
    let electrode_test_count: &Int64Array = column(batch, path, "electrode_test_count")?;
    let nominal_count: &Int64Array = column(batch, path, "nominal_count")?;
    let completed_pct: &Float64Array = column(batch, path, "completed_pct")?;
    let started_at: &TimestampMicrosecondArray = column(batch, path, "started_at")?;
    let completed_at: &TimestampMicrosecondArray = column(batch, path, "completed_at")?;
    let quit_at: &TimestampMicrosecondArray = column(batch, path, "quit_at")?;
    let first_log_event: &TimestampMicrosecondArray = column(batch, path, "first_log_event")?;
    let last_log_event: &TimestampMicrosecondArray = column(batch, path, "last_log_event")?;
    let acq_delay_sec: &Float64Array = column(batch, path, "acq_delay_sec")?;
    let acq_time_sec: &Float64Array = column(batch, path, "acq_time_sec")?;
    let current_limit_high: &Float64Array = column(batch, path, "current_limit_high_ampere")?;
    let current_limit_low: &Float64Array = column(batch, path, "current_limit_low_ampere")?;
    let resistance_limit_high: &Float64Array =
        column(batch, path, "electrode_resistance_bad_limit_high_ohm")?;
    let resistance_limit_low: &Float64Array =
        column(batch, path, "electrode_resistance_bad_limit_low_ohm")?;
    let electrode_test: &StringArray = column(batch, path, "electrode_test")?;
    let electrode_test_current: &Float64Array =
        column(batch, path, "electrode_test_current_ampere")?;
    let fullwaveform: &StringArray = column(batch, path, "fullwaveform")?;
    let ip_off_time_sec: &Float64Array = column(batch, path, "ip_off_time_sec")?;
    let measure_mode: &StringArray = column(batch, path, "measure_mode")?;
    let on_time_sec: &Float64Array = column(batch, path, "on_time_sec")?;
    let off_time_sec: &Float64Array = column(batch, path, "off_time_sec")?;

    let mut tasks = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let mode = MeasureMode::from_str(measure_mode.value(row)).ok_or_else(|| {
            SnapshotError::SchemaMismatch {
                path: path.to_path_buf(),
                column: String::from("measure_mode"),
            }
        })?;
        tasks.push(AcquisitionTask {
            project_name: project_name.value(row).to_string(),
            project_date: days_to_date(project_date.value(row))?,
            task_id: task_id.value(row),
            task_name: task_name.value(row).to_string(),
            protocol_file: protocol_file.value(row).to_string(),
            configuration: Configuration::from_str(configuration.value(row)),
            created_at: optional_datetime(created_at, row)?,
            datapoint_count: datapoint_count.value(row),
            dipole_count: dipole_count.value(row),
            electrode_test_count: electrode_test_count.value(row),
            nominal_count: nominal_count.value(row),
            completed_pct: completed_pct.value(row),
            started_at: optional_datetime(started_at, row)?,
            completed_at: optional_datetime(completed_at, row)?,
            quit_at: optional_datetime(quit_at, row)?,
            first_log_event: optional_datetime(first_log_event, row)?,
            last_log_event: optional_datetime(last_log_event, row)?,
            settings: AcquisitionSettings {
                acq_delay_sec: acq_delay_sec.value(row),
                acq_time_sec: acq_time_sec.value(row),
                current_limit_high_ampere: current_limit_high.value(row),
                current_limit_low_ampere: current_limit_low.value(row),
                electrode_resistance_bad_limit_high_ohm: resistance_limit_high.value(row),
                electrode_resistance_bad_limit_low_ohm: resistance_limit_low.value(row),
                electrode_test: electrode_test.value(row).to_string(),
                electrode_test_current_ampere: electrode_test_current.value(row),
                fullwaveform: fullwaveform.value(row).to_string(),
                ip_off_time_sec: ip_off_time_sec.value(row),
                measure_mode: mode,
                on_time_sec: on_time_sec.value(row),
                off_time_sec: off_time_sec.value(row),
            },
        });
    }
    Ok(tasks)
}

/// The task catalog held in memory for the duration of one run.
#[derive(Debug)]
pub struct TaskCatalog {
    path: PathBuf,
    tasks: Vec<AcquisitionTask>,
    known_projects: FxHashSet<String>,
    appended: usize,
}

impl TaskCatalog {
    /// Load the existing snapshot at `path`, or start empty if none exists.
    pub fn load(path: &Path) -> Result<Self, CatalogError> {
        let tasks = match read_snapshot(path)? {
            Some(batch) => from_record_batch(path, &batch)?,
            None => Vec::new(),
        };
        let known_projects = tasks.iter().map(|t| t.project_name.clone()).collect();
        Ok(Self {
            path: path.to_path_buf(),
            tasks,
            known_projects,
            appended: 0,
        })
    }

    /// Whether any task from `project_name` has already been cataloged.
    pub fn contains(&self, project_name: &str) -> bool {
        self.known_projects.contains(project_name)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of rows appended since load.
    pub fn appended(&self) -> usize {
        self.appended
    }

    pub fn tasks(&self) -> &[AcquisitionTask] {
        &self.tasks
    }

    /// Append this run's rows for one project.
    pub fn append(&mut self, rows: Vec<AcquisitionTask>) {
        for row in &rows {
            self.known_projects.insert(row.project_name.clone());
        }
        self.appended += rows.len();
        self.tasks.extend(rows);
    }

    /// Write the full catalog back to disk. Skipped when nothing was
    /// appended, leaving the previous snapshot byte-identical.
    pub fn save(&self) -> Result<(), CatalogError> {
        if self.appended == 0 && self.path.exists() {
            return Ok(());
        }
        let batch = to_record_batch(&self.tasks)?;
        write_snapshot(&self.path, &batch)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};

    fn sample_task(project_name: &str, task_id: i64) -> AcquisitionTask {
        AcquisitionTask {
            project_name: project_name.to_string(),
            project_date: date!(2021 - 06 - 27),
            task_id,
            task_name: String::from("2x32gradientXL_1"),
            protocol_file: String::from("GradientXL_64_DISKO.xml"),
            configuration: Configuration::Gradient,
            created_at: Some(datetime!(2021-06-27 09:55:00)),
            datapoint_count: 500,
            dipole_count: 500,
            electrode_test_count: 64,
            nominal_count: 1000,
            completed_pct: 50.0,
            started_at: Some(datetime!(2021-06-27 10:00:00)),
            completed_at: Some(datetime!(2021-06-27 11:30:00)),
            quit_at: None,
            first_log_event: Some(datetime!(2021-06-27 09:55:00)),
            last_log_event: Some(datetime!(2021-06-27 11:30:00)),
            settings: AcquisitionSettings {
                acq_delay_sec: 0.3,
                acq_time_sec: 0.5,
                current_limit_high_ampere: 0.2,
                current_limit_low_ampere: 0.001,
                electrode_resistance_bad_limit_high_ohm: 10000.0,
                electrode_resistance_bad_limit_low_ohm: 0.0,
                electrode_test: String::from("On"),
                electrode_test_current_ampere: 0.02,
                fullwaveform: String::from("Off"),
                ip_off_time_sec: 0.0,
                measure_mode: MeasureMode::Resistivity,
                on_time_sec: 0.8,
                off_time_sec: 0.0,
            },
        }
    }

    #[test]
    fn test_record_batch_round_trip() {
        let tasks = vec![sample_task("210627_01", 1), sample_task("210627_01", 2)];
        let batch = to_record_batch(&tasks).unwrap();
        let decoded = from_record_batch(Path::new("mem"), &batch).unwrap();
        assert_eq!(decoded, tasks);
    }

    #[test]
    fn test_load_append_save_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_info.arrow");

        let mut catalog = TaskCatalog::load(&path).unwrap();
        assert!(catalog.is_empty());
        assert!(!catalog.contains("210627_01"));
        catalog.append(vec![sample_task("210627_01", 1)]);
        catalog.save().unwrap();

        let mut reloaded = TaskCatalog::load(&path).unwrap();
        assert_eq!(reloaded.len(), 1);
        assert!(reloaded.contains("210627_01"));
        assert!(!reloaded.contains("210628_01"));

        reloaded.append(vec![sample_task("210628_01", 1)]);
        reloaded.save().unwrap();
        let final_state = TaskCatalog::load(&path).unwrap();
        assert_eq!(final_state.len(), 2);
    }

    #[test]
    fn test_save_without_appends_keeps_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("task_info.arrow");

        let mut catalog = TaskCatalog::load(&path).unwrap();
        catalog.append(vec![sample_task("210627_01", 1)]);
        catalog.save().unwrap();
        let before = std::fs::metadata(&path).unwrap().modified().unwrap();

        let catalog = TaskCatalog::load(&path).unwrap();
        catalog.save().unwrap();
        let after = std::fs::metadata(&path).unwrap().modified().unwrap();
        assert_eq!(before, after);
    }
}
