//! Read-only adapter over one acquisition project's SQLite store.
//!
//! The Terrameter LS writes a denormalized relational store per project
//! (Tasks, TaskSettings, Sessions, AcqSettings, DPV, DP_ABMN, Measures,
//! ElectrodeTestData, Log). This module is the single place that knows raw
//! column names; everything downstream works with the typed rows defined
//! here. Any ordering the pipeline depends on is an explicit ORDER BY, never
//! an assumption about engine iteration order.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use rusqlite::types::Value;
use rusqlite::{Connection, OpenFlags};

use super::constants::{MAX_DATA_CHANNEL, MIN_DATA_CHANNEL};
use super::error::ProjectStoreError;

/// One row of the task list, with joined settings-file references and,
/// optionally, aggregated datapoint/dipole/electrode-test counts.
#[derive(Debug, Clone)]
pub struct TaskRow {
    pub id: i64,
    pub name: String,
    pub pos_x: Option<f64>,
    pub pos_y: Option<f64>,
    pub pos_z: Option<f64>,
    pub spacing_x: Option<f64>,
    pub spacing_y: Option<f64>,
    pub spacing_z: Option<f64>,
    pub array_code: Option<i64>,
    pub time: Option<String>,
    pub protocol_file: Option<String>,
    pub spread_file: Option<String>,
    pub base_reference: Option<String>,
    pub pos_latitude: Option<f64>,
    pub pos_longitude: Option<f64>,
    pub pos_quality: Option<i64>,
    /// Distinct data-channel datapoints; 0 when counts were not requested.
    pub n_data: i64,
    /// Distinct dipoles; 0 when counts were not requested.
    pub n_dipoles: i64,
    pub n_ecr_data: i64,
}

/// Electrode positions of one quadrupole.
#[derive(Debug, Clone, Copy, Default)]
pub struct ElectrodePos {
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
}

/// One fully denormalized measurement value.
#[derive(Debug, Clone)]
pub struct MeasurementRow {
    pub time: Option<String>,
    pub task_id: i64,
    pub measure_id: i64,
    pub channel: i64,
    pub seq_num: Option<i64>,
    pub datatype_id: i64,
    pub a: ElectrodePos,
    pub b: ElectrodePos,
    pub m: ElectrodePos,
    pub n: ElectrodePos,
    pub data_value: Option<f64>,
    pub data_sdev: Option<f64>,
    pub m_cycles: Option<i64>,
    pub session_id: Option<i64>,
}

/// One electrode contact-resistance test record.
#[derive(Debug, Clone)]
pub struct ElectrodeTestRow {
    pub id: i64,
    pub task_id: i64,
    pub station_id: Option<i64>,
    pub switch_number: Option<i64>,
    pub switch_address: Option<i64>,
    pub pos_x: Option<f64>,
    pub pos_y: Option<f64>,
    pub pos_z: Option<f64>,
    pub resistance_value: Option<f64>,
    pub current_value: Option<f64>,
    pub test_status: Option<i64>,
    pub user_setting: Option<i64>,
    pub tx_status: Option<i64>,
    pub time: Option<String>,
}

/// One free-text log entry with its telemetry fields.
#[derive(Debug, Clone)]
pub struct LogRow {
    pub task_id: Option<i64>,
    pub time: Option<String>,
    pub what: Option<String>,
    pub ext_power_volt: Option<f64>,
    pub temp: Option<f64>,
    pub pos_latitude: Option<f64>,
    pub pos_longitude: Option<f64>,
    pub pos_quality: Option<i64>,
}

const LIST_TASKS_SQL: &str = "
    SELECT
        Tasks.ID,
        Tasks.Name,
        Tasks.PosX, Tasks.PosY, Tasks.PosZ,
        Tasks.SpacingX, Tasks.SpacingY, Tasks.SpacingZ,
        Tasks.ArrayCode, Tasks.Time,
        ts1.Value AS ProtocolFile,
        ts2.Value AS SpreadFile,
        ts3.Value AS BaseReference,
        Log2.PosLatitude, Log2.PosLongitude, Log2.PosQuality,
        COUNT(DISTINCT ndt.ID) AS nData,
        COUNT(DISTINCT ndt.DPID) AS nDipoles,
        COUNT(DISTINCT e.ID) AS nECRdata
    FROM Tasks
    LEFT JOIN ElectrodeTestData AS e ON Tasks.ID = e.TaskID
    LEFT JOIN (SELECT * FROM DPV WHERE Channel >= ?1 AND Channel <= ?2)
        AS ndt ON ndt.TaskID = Tasks.ID
    LEFT JOIN (SELECT * FROM TaskSettings WHERE Setting = 'ProtocolFile')
        AS ts1 ON ts1.key1 = Tasks.ID
    LEFT JOIN (SELECT * FROM TaskSettings WHERE Setting = 'SpreadFile')
        AS ts2 ON ts2.key1 = Tasks.ID
    LEFT JOIN (SELECT * FROM TaskSettings WHERE Setting = 'BaseReference')
        AS ts3 ON ts3.key1 = Tasks.ID
    LEFT JOIN (SELECT DISTINCT PosLatitude, PosLongitude, PosQuality, TaskID FROM Log)
        AS Log2 ON Log2.TaskID = Tasks.ID
    GROUP BY Tasks.ID
    ORDER BY Tasks.ID
";

const LIST_TASKS_NO_COUNT_SQL: &str = "
    SELECT
        Tasks.ID,
        Tasks.Name,
        Tasks.PosX, Tasks.PosY, Tasks.PosZ,
        Tasks.SpacingX, Tasks.SpacingY, Tasks.SpacingZ,
        Tasks.ArrayCode, Tasks.Time,
        ts1.Value AS ProtocolFile,
        ts2.Value AS SpreadFile,
        ts3.Value AS BaseReference,
        Log2.PosLatitude, Log2.PosLongitude, Log2.PosQuality,
        COUNT(DISTINCT e.ID) AS nECRdata
    FROM Tasks
    LEFT JOIN ElectrodeTestData AS e ON Tasks.ID = e.TaskID
    LEFT JOIN (SELECT * FROM TaskSettings WHERE Setting = 'ProtocolFile')
        AS ts1 ON ts1.key1 = Tasks.ID
    LEFT JOIN (SELECT * FROM TaskSettings WHERE Setting = 'SpreadFile')
        AS ts2 ON ts2.key1 = Tasks.ID
    LEFT JOIN (SELECT * FROM TaskSettings WHERE Setting = 'BaseReference')
        AS ts3 ON ts3.key1 = Tasks.ID
    LEFT JOIN (SELECT DISTINCT PosLatitude, PosLongitude, PosQuality, TaskID FROM Log)
        AS Log2 ON Log2.TaskID = Tasks.ID
    GROUP BY Tasks.ID
    ORDER BY Tasks.ID
";

const TASK_MEASUREMENTS_SQL: &str = "
    SELECT
        Measures.Time,
        DPV.TaskID,
        DPV.MeasureID,
        DPV.Channel,
        DPV.SeqNum,
        DPV.DatatypeID,
        DP_ABMN.APosX, DP_ABMN.APosY, DP_ABMN.APosZ,
        DP_ABMN.BPosX, DP_ABMN.BPosY, DP_ABMN.BPosZ,
        DP_ABMN.MPosX, DP_ABMN.MPosY, DP_ABMN.MPosZ,
        DP_ABMN.NPosX, DP_ABMN.NPosY, DP_ABMN.NPosZ,
        DPV.DataValue,
        DPV.DataSDev,
        DPV.MCycles,
        Measures.SessionID
    FROM DPV, DP_ABMN, Measures
    WHERE
        DPV.TaskID = ?1 AND
        DPV.MeasureID = Measures.ID AND
        DPV.DPID = DP_ABMN.ID
    ORDER BY Measures.Time, DPV.ID
";

const ELECTRODE_TESTS_SQL: &str = "
    SELECT
        ID, TaskID, StationID, SwitchNumber, SwitchAddress,
        PosX, PosY, PosZ,
        ResistanceValue, CurrentValue,
        TestStatus, UserSetting, TxStatus, Time
    FROM ElectrodeTestData
";

const LOG_ROWS_SQL: &str = "
    SELECT
        TaskID, Time, What, ExtPowerVolt, Temp,
        PosLatitude, PosLongitude, PosQuality
    FROM Log
    ORDER BY Time
";

/// Read-only handle on one project's relational store.
///
/// Opening validates that the file is a readable SQLite database with a Tasks
/// table; any later query failure is also surfaced as `CorruptStore` so the
/// caller can apply the skip-this-project policy.
#[derive(Debug)]
pub struct ProjectStore {
    path: PathBuf,
    conn: Connection,
}

impl ProjectStore {
    pub fn open(path: &Path) -> Result<Self, ProjectStoreError> {
        let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)
            .map_err(|source| ProjectStoreError::CorruptStore {
                path: path.to_path_buf(),
                source,
            })?;
        let store = Self {
            path: path.to_path_buf(),
            conn,
        };
        // A store without a Tasks table is not a project store at all.
        store
            .conn
            .query_row("SELECT COUNT(*) FROM Tasks", [], |row| row.get::<_, i64>(0))
            .map_err(|e| store.corrupt(e))?;
        Ok(store)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn corrupt(&self, source: rusqlite::Error) -> ProjectStoreError {
        ProjectStoreError::CorruptStore {
            path: self.path.clone(),
            source,
        }
    }

    /// List all tasks in the store. With `include_counts`, datapoint, dipole
    /// and electrode-test counts are aggregated via outer joins so tasks with
    /// zero matching rows still appear with count 0. Only channels in
    /// [`MIN_DATA_CHANNEL`, `MAX_DATA_CHANNEL`] are counted as datapoints.
    pub fn list_tasks(&self, include_counts: bool) -> Result<Vec<TaskRow>, ProjectStoreError> {
        let sql = if include_counts {
            LIST_TASKS_SQL
        } else {
            LIST_TASKS_NO_COUNT_SQL
        };
        let mut stmt = self.conn.prepare(sql).map_err(|e| self.corrupt(e))?;
        let map_row = |row: &rusqlite::Row<'_>, counted: bool| -> rusqlite::Result<TaskRow> {
            Ok(TaskRow {
                id: row.get(0)?,
                name: row.get(1)?,
                pos_x: value_to_f64(row.get(2)?),
                pos_y: value_to_f64(row.get(3)?),
                pos_z: value_to_f64(row.get(4)?),
                spacing_x: value_to_f64(row.get(5)?),
                spacing_y: value_to_f64(row.get(6)?),
                spacing_z: value_to_f64(row.get(7)?),
                array_code: row.get(8)?,
                time: value_to_string(row.get(9)?),
                protocol_file: value_to_string(row.get(10)?),
                spread_file: value_to_string(row.get(11)?),
                base_reference: value_to_string(row.get(12)?),
                pos_latitude: value_to_f64(row.get(13)?),
                pos_longitude: value_to_f64(row.get(14)?),
                pos_quality: row.get(15)?,
                n_data: if counted { row.get(16)? } else { 0 },
                n_dipoles: if counted { row.get(17)? } else { 0 },
                n_ecr_data: if counted { row.get(18)? } else { row.get(16)? },
            })
        };
        let rows = if include_counts {
            stmt.query_map(rusqlite::params![MIN_DATA_CHANNEL, MAX_DATA_CHANNEL], |r| {
                map_row(r, true)
            })
            .map_err(|e| self.corrupt(e))?
            .collect::<rusqlite::Result<Vec<_>>>()
        } else {
            stmt.query_map([], |r| map_row(r, false))
                .map_err(|e| self.corrupt(e))?
                .collect::<rusqlite::Result<Vec<_>>>()
        };
        rows.map_err(|e| self.corrupt(e))
    }

    /// Full denormalized measurement rows for one task, in timestamp order.
    /// Empty if the task has no data.
    pub fn get_task_measurements(
        &self,
        task_id: i64,
    ) -> Result<Vec<MeasurementRow>, ProjectStoreError> {
        let mut stmt = self
            .conn
            .prepare(TASK_MEASUREMENTS_SQL)
            .map_err(|e| self.corrupt(e))?;
        let rows = stmt
            .query_map([task_id], |row| {
                Ok(MeasurementRow {
                    time: value_to_string(row.get(0)?),
                    task_id: row.get(1)?,
                    measure_id: row.get(2)?,
                    channel: row.get(3)?,
                    seq_num: row.get(4)?,
                    datatype_id: row.get(5)?,
                    a: ElectrodePos {
                        x: value_to_f64(row.get(6)?),
                        y: value_to_f64(row.get(7)?),
                        z: value_to_f64(row.get(8)?),
                    },
                    b: ElectrodePos {
                        x: value_to_f64(row.get(9)?),
                        y: value_to_f64(row.get(10)?),
                        z: value_to_f64(row.get(11)?),
                    },
                    m: ElectrodePos {
                        x: value_to_f64(row.get(12)?),
                        y: value_to_f64(row.get(13)?),
                        z: value_to_f64(row.get(14)?),
                    },
                    n: ElectrodePos {
                        x: value_to_f64(row.get(15)?),
                        y: value_to_f64(row.get(16)?),
                        z: value_to_f64(row.get(17)?),
                    },
                    data_value: value_to_f64(row.get(18)?),
                    data_sdev: value_to_f64(row.get(19)?),
                    m_cycles: row.get(20)?,
                    session_id: row.get(21)?,
                })
            })
            .map_err(|e| self.corrupt(e))?
            .collect::<rusqlite::Result<Vec<_>>>();
        rows.map_err(|e| self.corrupt(e))
    }

    /// Cheap existence check for measurement data, optionally scoped to one
    /// task. Used to skip tasks before pulling their full rows.
    pub fn has_measurements(&self, task_id: Option<i64>) -> Result<bool, ProjectStoreError> {
        let result = match task_id {
            Some(id) => self.conn.query_row(
                "SELECT 1 FROM DPV WHERE TaskID = ?1 LIMIT 1",
                [id],
                |row| row.get::<_, i64>(0),
            ),
            None => self
                .conn
                .query_row("SELECT 1 FROM DPV LIMIT 1", [], |row| row.get::<_, i64>(0)),
        };
        match result {
            Ok(_) => Ok(true),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(false),
            Err(e) => Err(self.corrupt(e)),
        }
    }

    /// Electrode test data, filtered by task if given, else all.
    pub fn get_electrode_tests(
        &self,
        task_id: Option<i64>,
    ) -> Result<Vec<ElectrodeTestRow>, ProjectStoreError> {
        let sql = match task_id {
            Some(_) => format!("{ELECTRODE_TESTS_SQL} WHERE TaskID = ?1 ORDER BY ID"),
            None => format!("{ELECTRODE_TESTS_SQL} ORDER BY ID"),
        };
        let mut stmt = self.conn.prepare(&sql).map_err(|e| self.corrupt(e))?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<ElectrodeTestRow> {
            Ok(ElectrodeTestRow {
                id: row.get(0)?,
                task_id: row.get(1)?,
                station_id: row.get(2)?,
                switch_number: row.get(3)?,
                switch_address: row.get(4)?,
                pos_x: value_to_f64(row.get(5)?),
                pos_y: value_to_f64(row.get(6)?),
                pos_z: value_to_f64(row.get(7)?),
                resistance_value: value_to_f64(row.get(8)?),
                current_value: value_to_f64(row.get(9)?),
                test_status: row.get(10)?,
                user_setting: row.get(11)?,
                tx_status: row.get(12)?,
                time: value_to_string(row.get(13)?),
            })
        };
        let rows = match task_id {
            Some(id) => stmt
                .query_map([id], map_row)
                .map_err(|e| self.corrupt(e))?
                .collect::<rusqlite::Result<Vec<_>>>(),
            None => stmt
                .query_map([], map_row)
                .map_err(|e| self.corrupt(e))?
                .collect::<rusqlite::Result<Vec<_>>>(),
        };
        rows.map_err(|e| self.corrupt(e))
    }

    /// Acquisition settings grouped by session: session id -> setting name ->
    /// raw value. Exactly one of `task_id`/`session_id` may be given; neither
    /// means all sessions. A task may relate to several sessions if settings
    /// were changed during acquisition or electrode testing.
    pub fn get_acquisition_settings(
        &self,
        task_id: Option<i64>,
        session_id: Option<i64>,
    ) -> Result<BTreeMap<i64, BTreeMap<String, String>>, ProjectStoreError> {
        let (sql, arg) = match (task_id, session_id) {
            (Some(_), Some(_)) => return Err(ProjectStoreError::ConflictingFilter),
            (Some(task), None) => (
                "SELECT acqs.key2, acqs.Setting, acqs.Value
                 FROM AcqSettings AS acqs, Sessions
                 WHERE acqs.key2 = Sessions.ID AND Sessions.TaskID = ?1
                 ORDER BY acqs.key2, acqs.Setting",
                Some(task),
            ),
            (None, Some(session)) => (
                "SELECT acqs.key2, acqs.Setting, acqs.Value
                 FROM AcqSettings AS acqs
                 WHERE acqs.key2 = ?1
                 ORDER BY acqs.key2, acqs.Setting",
                Some(session),
            ),
            (None, None) => (
                "SELECT acqs.key2, acqs.Setting, acqs.Value
                 FROM AcqSettings AS acqs
                 ORDER BY acqs.key2, acqs.Setting",
                None,
            ),
        };

        let mut stmt = self.conn.prepare(sql).map_err(|e| self.corrupt(e))?;
        let map_row = |row: &rusqlite::Row<'_>| -> rusqlite::Result<(i64, String, Option<String>)> {
            Ok((row.get(0)?, row.get(1)?, value_to_string(row.get(2)?)))
        };
        let rows = match arg {
            Some(id) => stmt
                .query_map([id], map_row)
                .map_err(|e| self.corrupt(e))?
                .collect::<rusqlite::Result<Vec<_>>>(),
            None => stmt
                .query_map([], map_row)
                .map_err(|e| self.corrupt(e))?
                .collect::<rusqlite::Result<Vec<_>>>(),
        }
        .map_err(|e| self.corrupt(e))?;

        let mut settings: BTreeMap<i64, BTreeMap<String, String>> = BTreeMap::new();
        for (session, name, value) in rows {
            settings
                .entry(session)
                .or_default()
                .insert(name, value.unwrap_or_default());
        }
        Ok(settings)
    }

    /// All free-text log entries in timestamp order.
    pub fn get_log_rows(&self) -> Result<Vec<LogRow>, ProjectStoreError> {
        let mut stmt = self
            .conn
            .prepare(LOG_ROWS_SQL)
            .map_err(|e| self.corrupt(e))?;
        let rows = stmt
            .query_map([], |row| {
                Ok(LogRow {
                    task_id: row.get(0)?,
                    time: value_to_string(row.get(1)?),
                    what: value_to_string(row.get(2)?),
                    ext_power_volt: value_to_f64(row.get(3)?),
                    temp: value_to_f64(row.get(4)?),
                    pos_latitude: value_to_f64(row.get(5)?),
                    pos_longitude: value_to_f64(row.get(6)?),
                    pos_quality: row.get(7)?,
                })
            })
            .map_err(|e| self.corrupt(e))?
            .collect::<rusqlite::Result<Vec<_>>>();
        rows.map_err(|e| self.corrupt(e))
    }
}

/// The instrument stores values with inconsistent column affinity; coerce
/// whatever arrives to a float, yielding None for anything non-numeric.
fn value_to_f64(value: Value) -> Option<f64> {
    match value {
        Value::Real(v) => Some(v),
        Value::Integer(v) => Some(v as f64),
        Value::Text(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn value_to_string(value: Value) -> Option<String> {
    match value {
        Value::Text(s) => Some(s),
        Value::Integer(v) => Some(v.to_string()),
        Value::Real(v) => Some(v.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_coercion() {
        assert_eq!(value_to_f64(Value::Real(1.5)), Some(1.5));
        assert_eq!(value_to_f64(Value::Integer(3)), Some(3.0));
        assert_eq!(value_to_f64(Value::Text(String::from(" 2.25 "))), Some(2.25));
        assert_eq!(value_to_f64(Value::Text(String::from("n/a"))), None);
        assert_eq!(value_to_f64(Value::Null), None);
    }

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
             CREATE TABLE ElectrodeTestData (
                 ID INTEGER PRIMARY KEY, TaskID INTEGER, StationID INTEGER,
                 SwitchNumber INTEGER, SwitchAddress INTEGER,
                 PosX REAL, PosY REAL, PosZ REAL,
                 ResistanceValue REAL, CurrentValue REAL,
                 TestStatus INTEGER, UserSetting INTEGER, TxStatus INTEGER,
                 Time TEXT);
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
                 (2, 'empty_task', 0,0,0, 1,1,1, 0, NULL);
             INSERT INTO TaskSettings VALUES
                 (1, 'ProtocolFile', '/protocols/GradientXL_64_DISKO.xml');
             INSERT INTO Sessions VALUES (1, 1);
             INSERT INTO AcqSettings VALUES
                 (1, 'MeasureMode', '2'), (1, 'Acq_TimeSec', '0.5');
             INSERT INTO ElectrodeTestData VALUES
                 (1, 1, 1, 1, 1, 0,0,0, 1500.0, 0.02, 0, 0, 0, '2021-06-27 09:30:00'),
                 (2, 1, 1, 2, 2, 2,0,0, 1600.0, 0.02, 0, 0, 0, '2021-06-27 09:30:10');
             INSERT INTO Log VALUES
                 (1, '2021-06-27 10:00:00', 'Measuring Started', 12.1, 4.5, NULL, NULL, NULL);
             INSERT INTO Measures VALUES (1, '2021-06-27 10:05:00', 1);
             INSERT INTO DP_ABMN VALUES
                 (1, 0,0,0, 0,0,0, 0,0,0, 0,0,0),
                 (2, 2,0,0, 0,0,0, 0,0,0, 0,0,0);
             -- channel 0 carries the transmitter record: excluded from counts
             INSERT INTO DPV VALUES
                 (1, 1, 1, 1, 0, 1, 6, 0.1, NULL, 1),
                 (2, 1, 1, 1, 1, 1, 2, 100.0, 1.0, 1),
                 (3, 1, 1, 2, 2, 2, 2, 101.0, 1.0, 1);",
        )
        .unwrap();
        drop(conn);
        ProjectStore::open(&path).unwrap()
    }

    #[test]
    fn test_list_tasks_counts_exclude_channel_zero() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());
        let tasks = store.list_tasks(true).unwrap();
        assert_eq!(tasks.len(), 2);

        let task = &tasks[0];
        assert_eq!(task.id, 1);
        assert_eq!(task.name, "2x32gradientXL_1");
        assert_eq!(
            task.protocol_file.as_deref(),
            Some("/protocols/GradientXL_64_DISKO.xml")
        );
        assert_eq!(task.n_data, 2);
        assert_eq!(task.n_dipoles, 2);
        assert_eq!(task.n_ecr_data, 2);

        // Outer joins keep the empty task with zero counts.
        let empty = &tasks[1];
        assert_eq!(empty.n_data, 0);
        assert_eq!(empty.n_dipoles, 0);
        assert_eq!(empty.n_ecr_data, 0);
    }

    #[test]
    fn test_measurements_and_existence_check() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());

        let rows = store.get_task_measurements(1).unwrap();
        assert_eq!(rows.len(), 3);
        assert_eq!(rows[1].data_value, Some(100.0));
        assert_eq!(rows[1].session_id, Some(1));
        assert_eq!(rows[2].b.x, Some(0.0));

        assert!(store.has_measurements(Some(1)).unwrap());
        assert!(!store.has_measurements(Some(2)).unwrap());
        assert!(store.has_measurements(None).unwrap());
        assert!(store.get_task_measurements(2).unwrap().is_empty());
    }

    #[test]
    fn test_electrode_tests_filtered_by_task() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());

        let all = store.get_electrode_tests(None).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].resistance_value, Some(1500.0));

        let scoped = store.get_electrode_tests(Some(1)).unwrap();
        assert_eq!(scoped.len(), 2);
        assert!(store.get_electrode_tests(Some(2)).unwrap().is_empty());
    }

    #[test]
    fn test_settings_grouped_by_session() {
        let dir = tempfile::tempdir().unwrap();
        let store = fixture_store(dir.path());

        let by_task = store.get_acquisition_settings(Some(1), None).unwrap();
        assert_eq!(by_task.len(), 1);
        assert_eq!(by_task[&1]["MeasureMode"], "2");
        assert_eq!(by_task[&1]["Acq_TimeSec"], "0.5");

        let by_session = store.get_acquisition_settings(None, Some(1)).unwrap();
        assert_eq!(by_session, by_task);
        assert!(store
            .get_acquisition_settings(Some(2), None)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_conflicting_settings_filter() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("Project.db");
        let conn = Connection::open(&path).unwrap();
        conn.execute_batch(
            "CREATE TABLE Tasks (ID INTEGER PRIMARY KEY, Name TEXT);
             CREATE TABLE Sessions (ID INTEGER PRIMARY KEY, TaskID INTEGER);
             CREATE TABLE AcqSettings (key2 INTEGER, Setting TEXT, Value TEXT);",
        )
        .unwrap();
        drop(conn);

        let store = ProjectStore::open(&path).unwrap();
        let result = store.get_acquisition_settings(Some(1), Some(1));
        assert!(matches!(result, Err(ProjectStoreError::ConflictingFilter)));
    }

    #[test]
    fn test_open_rejects_non_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("garbage.db");
        std::fs::write(&path, b"not a database at all").unwrap();
        let result = ProjectStore::open(&path);
        assert!(matches!(
            result,
            Err(ProjectStoreError::CorruptStore { .. })
        ));
    }
}
