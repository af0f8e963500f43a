//! Arrow IPC snapshot persistence shared by the three catalogs.
//!
//! Every snapshot is a single record batch in Arrow IPC file format. Writes
//! go through a sibling temp file followed by a rename, so a crash mid-write
//! leaves the previous snapshot intact.

use std::fs::File;
use std::path::Path;

use arrow::array::RecordBatch;
use arrow::compute::concat_batches;
use arrow::ipc::reader::FileReader;
use arrow::ipc::writer::FileWriter;
use time::{Date, OffsetDateTime, PrimitiveDateTime};

use super::error::SnapshotError;

/// Write `batch` to `path`, replacing any existing snapshot atomically.
pub fn write_snapshot(path: &Path, batch: &RecordBatch) -> Result<(), SnapshotError> {
    let tmp_path = path.with_extension("arrow.tmp");
    {
        let file = File::create(&tmp_path)?;
        let mut writer = FileWriter::try_new(file, batch.schema_ref())?;
        writer.write(batch)?;
        writer.finish()?;
    }
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Read a snapshot back as a single record batch; `None` if the file does
/// not exist yet (first run).
pub fn read_snapshot(path: &Path) -> Result<Option<RecordBatch>, SnapshotError> {
    if !path.exists() {
        return Ok(None);
    }
    let file = File::open(path)?;
    let reader = FileReader::try_new(file, None)?;
    let schema = reader.schema();
    let batches: Vec<RecordBatch> = reader.collect::<Result<_, _>>()?;
    Ok(Some(concat_batches(&schema, &batches)?))
}

const UNIX_EPOCH_JULIAN_DAY: i32 = 2_440_588;

/// Days-since-epoch encoding used by the Date32 columns.
pub fn date_to_days(date: Date) -> i32 {
    date.to_julian_day() - UNIX_EPOCH_JULIAN_DAY
}

pub fn days_to_date(days: i32) -> Result<Date, SnapshotError> {
    Date::from_julian_day(days + UNIX_EPOCH_JULIAN_DAY).map_err(|_| {
        SnapshotError::ArrowError(arrow::error::ArrowError::CastError(format!(
            "date out of range: {days} days since epoch"
        )))
    })
}

/// Microseconds-since-epoch encoding used by the timestamp columns. All
/// instrument timestamps are stored as naive wall-clock instants.
pub fn datetime_to_micros(datetime: PrimitiveDateTime) -> i64 {
    (datetime.assume_utc().unix_timestamp_nanos() / 1_000) as i64
}

pub fn micros_to_datetime(micros: i64) -> Result<PrimitiveDateTime, SnapshotError> {
    let instant = OffsetDateTime::from_unix_timestamp_nanos(micros as i128 * 1_000)
        .map_err(|_| {
            SnapshotError::ArrowError(arrow::error::ArrowError::CastError(format!(
                "timestamp out of range: {micros} us since epoch"
            )))
        })?;
    Ok(PrimitiveDateTime::new(instant.date(), instant.time()))
}
