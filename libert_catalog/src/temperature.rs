//! Temperature/power time series built from two provenances.
//!
//! Every project log row contributes (time, temperature, ext_power_volt)
//! unconditionally; additionally, every non-ECR task contributes its
//! temperature-datatype datapoints as (time, temperature) with no power
//! reading. The combined series is rebuilt from scratch each run by scanning
//! all projects, then globally sorted by timestamp.

use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, Float64Array, Float64Builder, RecordBatch, TimestampMicrosecondArray,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use time::PrimitiveDateTime;

use super::constants::Datatype;
use super::error::{SnapshotError, TemperatureError};
use super::project_store::ProjectStore;
use super::snapshot::{datetime_to_micros, micros_to_datetime, read_snapshot, write_snapshot};
use super::task_info::{parse_instrument_time, Configuration};

/// One reading in the merged series.
#[derive(Debug, Clone, PartialEq)]
pub struct TemperatureSample {
    pub timestamp: PrimitiveDateTime,
    pub temperature: Option<f64>,
    /// Absent for datapoint-sourced readings.
    pub ext_power_volt: Option<f64>,
}

/// Collect all temperature/power readings from one project store.
///
/// Rows whose timestamp does not parse are dropped with a warning rather
/// than failing the project; a single bad log line is not worth losing the
/// rest of the series over.
pub fn collect_project_samples(
    store: &ProjectStore,
) -> Result<Vec<TemperatureSample>, TemperatureError> {
    let mut samples = Vec::new();

    for row in store.get_log_rows()? {
        let Some(raw_time) = row.time.as_deref() else {
            continue;
        };
        match parse_instrument_time(raw_time) {
            Ok(timestamp) => samples.push(TemperatureSample {
                timestamp,
                temperature: row.temp,
                ext_power_volt: row.ext_power_volt,
            }),
            Err(_) => log::warn!(
                "Skipping log row with unparseable timestamp {:?} in {:?}",
                raw_time,
                store.path()
            ),
        }
    }

    for task in store.list_tasks(false)? {
        // ECR tasks are electrode contact tests; their datapoints carry no
        // usable temperature readings.
        if Configuration::classify(&task.name) == Configuration::Ecr {
            continue;
        }
        if !store.has_measurements(Some(task.id))? {
            continue;
        }
        for row in store.get_task_measurements(task.id)? {
            if Datatype::from_code(row.datatype_id) != Some(Datatype::Temperature) {
                continue;
            }
            let Some(raw_time) = row.time.as_deref() else {
                continue;
            };
            match parse_instrument_time(raw_time) {
                Ok(timestamp) => samples.push(TemperatureSample {
                    timestamp,
                    temperature: row.data_value,
                    ext_power_volt: None,
                }),
                Err(_) => log::warn!(
                    "Skipping datapoint with unparseable timestamp {:?} in {:?}",
                    raw_time,
                    store.path()
                ),
            }
        }
    }

    Ok(samples)
}

/// Sort the combined series ascending by timestamp. Stable, so readings
/// sharing a timestamp keep their collection order.
pub fn sort_series(samples: &mut [TemperatureSample]) {
    samples.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
}

fn series_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
        Field::new("temperature", DataType::Float64, true),
        Field::new("ext_power_volt", DataType::Float64, true),
    ]))
}

pub fn to_record_batch(samples: &[TemperatureSample]) -> Result<RecordBatch, SnapshotError> {
    let mut timestamp = TimestampMicrosecondBuilder::new();
    let mut temperature = Float64Builder::new();
    let mut ext_power_volt = Float64Builder::new();

    for sample in samples {
        timestamp.append_value(datetime_to_micros(sample.timestamp));
        temperature.append_option(sample.temperature);
        ext_power_volt.append_option(sample.ext_power_volt);
    }

    Ok(RecordBatch::try_new(
        series_schema(),
        vec![
            Arc::new(timestamp.finish()),
            Arc::new(temperature.finish()),
            Arc::new(ext_power_volt.finish()),
        ],
    )?)
}

pub fn from_record_batch(
    path: &Path,
    batch: &RecordBatch,
) -> Result<Vec<TemperatureSample>, SnapshotError> {
    let column = |name: &str| {
        batch
            .column_by_name(name)
            .ok_or_else(|| SnapshotError::SchemaMismatch {
                path: path.to_path_buf(),
                column: name.to_string(),
            })
    };
    let timestamp = column("timestamp")?
        .as_any()
        .downcast_ref::<TimestampMicrosecondArray>()
        .ok_or_else(|| SnapshotError::SchemaMismatch {
            path: path.to_path_buf(),
            column: String::from("timestamp"),
        })?;
    let temperature = column("temperature")?
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| SnapshotError::SchemaMismatch {
            path: path.to_path_buf(),
            column: String::from("temperature"),
        })?;
    let ext_power_volt = column("ext_power_volt")?
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| SnapshotError::SchemaMismatch {
            path: path.to_path_buf(),
            column: String::from("ext_power_volt"),
        })?;

    let mut samples = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        samples.push(TemperatureSample {
            timestamp: micros_to_datetime(timestamp.value(row))?,
            temperature: temperature.is_valid(row).then(|| temperature.value(row)),
            ext_power_volt: ext_power_volt
                .is_valid(row)
                .then(|| ext_power_volt.value(row)),
        });
    }
    Ok(samples)
}

/// Write the merged, sorted series, replacing any previous snapshot.
pub fn write_series(path: &Path, samples: &[TemperatureSample]) -> Result<(), TemperatureError> {
    write_snapshot(path, &to_record_batch(samples)?)?;
    Ok(())
}

pub fn read_series(path: &Path) -> Result<Vec<TemperatureSample>, SnapshotError> {
    match read_snapshot(path)? {
        Some(batch) => from_record_batch(path, &batch),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;
    use time::macros::datetime;

    fn fixture_store(dir: &Path) -> ProjectStore {
        let path = dir.join("Project.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Tasks (
                 ID INTEGER PRIMARY KEY, Name TEXT,
                 PosX REAL, PosY REAL, PosZ REAL,
                 SpacingX REAL, SpacingY REAL, SpacingZ REAL,
                 ArrayCode INTEGER, Time TEXT);
             CREATE TABLE TaskSettings (key1 INTEGER, Setting TEXT, Value TEXT);
             CREATE TABLE Sessions (ID INTEGER PRIMARY KEY, TaskID INTEGER);
             CREATE TABLE AcqSettings (key2 INTEGER, Setting TEXT, Value TEXT);
             CREATE TABLE ElectrodeTestData (ID INTEGER PRIMARY KEY, TaskID INTEGER);
             CREATE TABLE Log (
                 TaskID INTEGER, Time TEXT, What TEXT,
                 ExtPowerVolt REAL, Temp REAL,
                 PosLatitude REAL, PosLongitude REAL, PosQuality INTEGER);
             CREATE TABLE Measures (ID INTEGER PRIMARY KEY, Time TEXT, SessionID INTEGER);
             CREATE TABLE DP_ABMN (
                 ID INTEGER PRIMARY KEY,
                 APosX REAL, APosY REAL, APosZ REAL,
                 BPosX REAL, BPosY REAL, BPosZ REAL,
                 MPosX REAL, MPosY REAL, MPosZ REAL,
                 NPosX REAL, NPosY REAL, NPosZ REAL);
             CREATE TABLE DPV (
                 ID INTEGER PRIMARY KEY, TaskID INTEGER, MeasureID INTEGER,
                 DPID INTEGER, Channel INTEGER, SeqNum INTEGER,
                 DatatypeID INTEGER, DataValue REAL, DataSDev REAL,
                 MCycles INTEGER);

             INSERT INTO Tasks VALUES
                 (1, '2x32gradientXL_1', 0,0,0, 1,1,1, 0, '2021-06-27 09:00:00'),
                 (2, '2x32ECR_1', 0,0,0, 1,1,1, 0, '2021-06-27 08:00:00');
             INSERT INTO Log VALUES
                 (1, '2021-06-27 10:00:02', 'status', 12.1, 4.5, NULL, NULL, NULL),
                 (1, '2021-06-27 10:00:00', 'status', 12.2, 4.6, NULL, NULL, NULL),
                 (1, 'not a time', 'status', 12.3, 4.7, NULL, NULL, NULL);
             INSERT INTO Measures VALUES (1, '2021-06-27 10:00:01', 1), (2, '2021-06-27 10:00:03', 1);
             INSERT INTO DP_ABMN VALUES (1, 0,0,0, 0,0,0, 0,0,0, 0,0,0);
             -- temperature datapoint on the gradient task, resistivity datapoint ignored
             INSERT INTO DPV VALUES
                 (1, 1, 1, 1, 1, 1, 13, 3.9, NULL, 1),
                 (2, 1, 2, 1, 1, 2, 2, 100.0, 1.0, 1),
                 (3, 2, 1, 1, 1, 1, 13, 9.9, NULL, 1);",
        )
        .unwrap();
        drop(conn);
        ProjectStore::open(&path).unwrap()
    }

    #[test]
    fn test_collect_merges_both_provenances() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());
        let mut samples = collect_project_samples(&store).unwrap();
        sort_series(&mut samples);

        // Two parseable log rows plus one temperature datapoint from the
        // gradient task; the ECR task and the bad-timestamp row contribute
        // nothing.
        assert_eq!(samples.len(), 3);
        assert_eq!(samples[0].timestamp, datetime!(2021-06-27 10:00:00));
        assert_eq!(samples[0].ext_power_volt, Some(12.2));
        assert_eq!(samples[1].timestamp, datetime!(2021-06-27 10:00:01));
        assert_eq!(samples[1].temperature, Some(3.9));
        assert_eq!(samples[1].ext_power_volt, None);
        assert_eq!(samples[2].timestamp, datetime!(2021-06-27 10:00:02));
    }

    #[test]
    fn test_series_round_trip() {
        let samples = vec![
            TemperatureSample {
                timestamp: datetime!(2021-06-27 10:00:00),
                temperature: Some(4.5),
                ext_power_volt: Some(12.1),
            },
            TemperatureSample {
                timestamp: datetime!(2021-06-27 10:00:01),
                temperature: None,
                ext_power_volt: Some(12.0),
            },
        ];
        let batch = to_record_batch(&samples).unwrap();
        let decoded = from_record_batch(Path::new("mem"), &batch).unwrap();
        assert_eq!(decoded, samples);
    }

    #[test]
    fn test_write_and_read_series() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("temperature_info.arrow");
        let samples = vec![TemperatureSample {
            timestamp: datetime!(2021-06-27 10:00:00),
            temperature: Some(4.5),
            ext_power_volt: None,
        }];
        write_series(&path, &samples).unwrap();
        assert_eq!(read_series(&path).unwrap(), samples);
    }
}
