//! Power-supply log normalization.
//!
//! The supply log is a semicolon-delimited append-only file written by the
//! station power controller, one row per sample: timestamp (with UTC offset
//! suffix), voltage, unit, relay state, comment. The logger has one-second
//! resolution, so bursts of writes collide on the same timestamp; those are
//! repaired here so the series indexes cleanly downstream.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

use arrow::array::{
    Array, Date32Array, Date32Builder, Float64Array, Float64Builder, Int64Array, Int64Builder,
    RecordBatch, StringArray, StringBuilder, TimestampMicrosecondArray,
    TimestampMicrosecondBuilder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{Date, Duration, OffsetDateTime};

use super::constants::MAX_REPAIR_PASSES;
use super::data_file::DataFile;
use super::error::{SnapshotError, VoltageLogError};
use super::snapshot::{date_to_days, days_to_date, read_snapshot, write_snapshot};

const SUPPLY_TIME_FORMAT: &[BorrowedFormatItem<'static>] = format_description!(
    "[year]-[month]-[day] [hour]:[minute]:[second]([offset_hour sign:mandatory][offset_minute])"
);

/// One normalized supply-log sample.
#[derive(Debug, Clone, PartialEq)]
pub struct VoltageSample {
    pub timestamp: OffsetDateTime,
    pub voltage: Option<f64>,
    pub unit: String,
    pub relay_state: i64,
    pub power_on: Option<f64>,
    pub comment: Option<String>,
}

/// Daily voltage aggregates, fully recomputed each run.
#[derive(Debug, Clone, PartialEq)]
pub struct DailyVoltageStat {
    pub date: Date,
    pub voltage_min: Option<f64>,
    pub voltage_max: Option<f64>,
    pub voltage_mean: Option<f64>,
    pub voltage_std: Option<f64>,
}

/// Read and parse the whole supply log. The file may live inside a zip
/// container; NUL bytes injected by power loss mid-write are stripped by the
/// reader before parsing.
pub fn load_supply_log(path: &Path) -> Result<Vec<VoltageSample>, VoltageLogError> {
    let file = DataFile::new(path)?;
    let text = file.decode();
    parse_supply_log(&text)
}

/// Parse the raw semicolon-delimited text into samples. `power_on` is left
/// unset here; it is derived after timestamp repair.
pub fn parse_supply_log(text: &str) -> Result<Vec<VoltageSample>, VoltageLogError> {
    let mut samples = Vec::new();
    for (index, raw_line) in text.lines().enumerate() {
        let line_no = index + 1;
        let line = raw_line.trim_end_matches('\r');
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(';').collect();
        if fields.len() != 5 {
            return Err(VoltageLogError::ParsingError {
                line: line_no,
                reason: format!("expected 5 fields, found {}", fields.len()),
            });
        }

        let timestamp = OffsetDateTime::parse(fields[0].trim(), &SUPPLY_TIME_FORMAT).map_err(
            |e| VoltageLogError::ParsingError {
                line: line_no,
                reason: format!("bad timestamp {:?}: {e}", fields[0]),
            },
        )?;

        let voltage_field = fields[1].trim();
        let voltage = if voltage_field.is_empty() {
            None
        } else {
            Some(voltage_field.parse::<f64>().map_err(|_| {
                VoltageLogError::ParsingError {
                    line: line_no,
                    reason: format!("bad voltage {voltage_field:?}"),
                }
            })?)
        };

        let relay_state =
            fields[3]
                .trim()
                .parse::<i64>()
                .map_err(|_| VoltageLogError::ParsingError {
                    line: line_no,
                    reason: format!("bad relay state {:?}", fields[3]),
                })?;

        let comment = fields[4].trim();
        samples.push(VoltageSample {
            timestamp,
            voltage,
            unit: fields[2].trim().to_string(),
            relay_state,
            power_on: None,
            comment: (!comment.is_empty()).then(|| comment.to_string()),
        });
    }
    Ok(samples)
}

/// Make every timestamp unique while keeping the last occurrence of each
/// duplicate group in place. Earlier duplicates are nudged forward by
/// `nudge_ms` and the scan repeats until a fixed point.
///
/// Each pass strictly increases the nudged timestamps so the loop converges
/// on sane input, but the pass count is still bounded in case the log is
/// pathological. Returns the number of passes taken.
pub fn repair_duplicate_timestamps(
    samples: &mut [VoltageSample],
    nudge_ms: i64,
) -> Result<usize, VoltageLogError> {
    let nudge = Duration::milliseconds(nudge_ms);
    for pass in 0..MAX_REPAIR_PASSES {
        let mut seen = HashSet::with_capacity(samples.len());
        let mut duplicated = Vec::new();
        for (index, sample) in samples.iter().enumerate().rev() {
            if !seen.insert(sample.timestamp.unix_timestamp_nanos()) {
                duplicated.push(index);
            }
        }
        if duplicated.is_empty() {
            return Ok(pass);
        }
        for index in duplicated {
            samples[index].timestamp += nudge;
        }
    }
    Err(VoltageLogError::TimestampRepair(MAX_REPAIR_PASSES))
}

/// Null out readings below the sensor-fault threshold.
pub fn apply_fault_threshold(samples: &mut [VoltageSample], threshold_volt: f64) {
    for sample in samples.iter_mut() {
        if matches!(sample.voltage, Some(v) if v < threshold_volt) {
            sample.voltage = None;
        }
    }
}

/// Derive the sparse `power_on` marker series: relay state −1 (no relay
/// fitted) and 1 (steady on) contribute nothing; everything else keeps its
/// raw code, which marks a power transition.
pub fn derive_power_on(samples: &mut [VoltageSample]) {
    for sample in samples.iter_mut() {
        sample.power_on = match sample.relay_state {
            -1 | 1 => None,
            other => Some(other as f64),
        };
    }
}

/// Group by the sample's local calendar date and compute min/max/mean and
/// population standard deviation of the non-null voltages.
pub fn daily_stats(samples: &[VoltageSample]) -> Vec<DailyVoltageStat> {
    let mut by_date: std::collections::BTreeMap<Date, Vec<f64>> = std::collections::BTreeMap::new();
    for sample in samples {
        let values = by_date.entry(sample.timestamp.date()).or_default();
        if let Some(v) = sample.voltage {
            values.push(v);
        }
    }

    by_date
        .into_iter()
        .map(|(date, values)| {
            if values.is_empty() {
                return DailyVoltageStat {
                    date,
                    voltage_min: None,
                    voltage_max: None,
                    voltage_mean: None,
                    voltage_std: None,
                };
            }
            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            DailyVoltageStat {
                date,
                voltage_min: values.iter().copied().fold(f64::INFINITY, f64::min).into(),
                voltage_max: values
                    .iter()
                    .copied()
                    .fold(f64::NEG_INFINITY, f64::max)
                    .into(),
                voltage_mean: Some(mean),
                voltage_std: Some(variance.sqrt()),
            }
        })
        .collect()
}

fn series_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new(
            "timestamp",
            DataType::Timestamp(TimeUnit::Microsecond, None),
            false,
        ),
        Field::new("voltage", DataType::Float64, true),
        Field::new("unit", DataType::Utf8, false),
        Field::new("relay_state", DataType::Int64, false),
        Field::new("power_on", DataType::Float64, true),
        Field::new("comment", DataType::Utf8, true),
    ]))
}

fn stats_schema() -> Arc<Schema> {
    Arc::new(Schema::new(vec![
        Field::new("date", DataType::Date32, false),
        Field::new("voltage_min", DataType::Float64, true),
        Field::new("voltage_max", DataType::Float64, true),
        Field::new("voltage_mean", DataType::Float64, true),
        Field::new("voltage_std", DataType::Float64, true),
    ]))
}

fn timestamp_micros(timestamp: OffsetDateTime) -> i64 {
    (timestamp.unix_timestamp_nanos() / 1_000) as i64
}

/// Encode the corrected series for persistence. Timestamps are stored as
/// UTC instants.
pub fn series_to_record_batch(samples: &[VoltageSample]) -> Result<RecordBatch, SnapshotError> {
    let mut timestamp = TimestampMicrosecondBuilder::new();
    let mut voltage = Float64Builder::new();
    let mut unit = StringBuilder::new();
    let mut relay_state = Int64Builder::new();
    let mut power_on = Float64Builder::new();
    let mut comment = StringBuilder::new();

    for sample in samples {
        timestamp.append_value(timestamp_micros(sample.timestamp));
        voltage.append_option(sample.voltage);
        unit.append_value(&sample.unit);
        relay_state.append_value(sample.relay_state);
        power_on.append_option(sample.power_on);
        comment.append_option(sample.comment.as_deref());
    }

    Ok(RecordBatch::try_new(
        series_schema(),
        vec![
            Arc::new(timestamp.finish()),
            Arc::new(voltage.finish()),
            Arc::new(unit.finish()),
            Arc::new(relay_state.finish()),
            Arc::new(power_on.finish()),
            Arc::new(comment.finish()),
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

/// Decode a persisted series batch. Timestamps come back in UTC.
pub fn series_from_record_batch(
    path: &Path,
    batch: &RecordBatch,
) -> Result<Vec<VoltageSample>, SnapshotError> {
    let timestamp: &TimestampMicrosecondArray = column(batch, path, "timestamp")?;
    let voltage: &Float64Array = column(batch, path, "voltage")?;
    let unit: &StringArray = column(batch, path, "unit")?;
    let relay_state: &Int64Array = column(batch, path, "relay_state")?;
    let power_on: &Float64Array = column(batch, path, "power_on")?;
    let comment: &StringArray = column(batch, path, "comment")?;

    let mut samples = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        let instant =
            OffsetDateTime::from_unix_timestamp_nanos(timestamp.value(row) as i128 * 1_000)
                .map_err(|_| SnapshotError::SchemaMismatch {
                    path: path.to_path_buf(),
                    column: String::from("timestamp"),
                })?;
        samples.push(VoltageSample {
            timestamp: instant,
            voltage: voltage.is_valid(row).then(|| voltage.value(row)),
            unit: unit.value(row).to_string(),
            relay_state: relay_state.value(row),
            power_on: power_on.is_valid(row).then(|| power_on.value(row)),
            comment: comment.is_valid(row).then(|| comment.value(row).to_string()),
        });
    }
    Ok(samples)
}

pub fn stats_to_record_batch(stats: &[DailyVoltageStat]) -> Result<RecordBatch, SnapshotError> {
    let mut date = Date32Builder::new();
    let mut min = Float64Builder::new();
    let mut max = Float64Builder::new();
    let mut mean = Float64Builder::new();
    let mut std = Float64Builder::new();

    for stat in stats {
        date.append_value(date_to_days(stat.date));
        min.append_option(stat.voltage_min);
        max.append_option(stat.voltage_max);
        mean.append_option(stat.voltage_mean);
        std.append_option(stat.voltage_std);
    }

    Ok(RecordBatch::try_new(
        stats_schema(),
        vec![
            Arc::new(date.finish()),
            Arc::new(min.finish()),
            Arc::new(max.finish()),
            Arc::new(mean.finish()),
            Arc::new(std.finish()),
        ],
    )?)
}

pub fn stats_from_record_batch(
    path: &Path,
    batch: &RecordBatch,
) -> Result<Vec<DailyVoltageStat>, SnapshotError> {
    let date: &Date32Array = column(batch, path, "date")?;
    let min: &Float64Array = column(batch, path, "voltage_min")?;
    let max: &Float64Array = column(batch, path, "voltage_max")?;
    let mean: &Float64Array = column(batch, path, "voltage_mean")?;
    let std: &Float64Array = column(batch, path, "voltage_std")?;

    let mut stats = Vec::with_capacity(batch.num_rows());
    for row in 0..batch.num_rows() {
        stats.push(DailyVoltageStat {
            date: days_to_date(date.value(row))?,
            voltage_min: min.is_valid(row).then(|| min.value(row)),
            voltage_max: max.is_valid(row).then(|| max.value(row)),
            voltage_mean: mean.is_valid(row).then(|| mean.value(row)),
            voltage_std: std.is_valid(row).then(|| std.value(row)),
        });
    }
    Ok(stats)
}

/// Run the full normalization over the supply log at `supply_log_path` and
/// write both snapshots.
pub fn process_supply_log(
    supply_log_path: &Path,
    series_path: &Path,
    stats_path: &Path,
    fault_threshold_volt: f64,
    nudge_ms: i64,
) -> Result<(usize, usize), VoltageLogError> {
    let mut samples = load_supply_log(supply_log_path)?;
    let passes = repair_duplicate_timestamps(&mut samples, nudge_ms)?;
    if passes > 0 {
        log::info!("Repaired duplicate supply-log timestamps in {passes} passes");
    }
    apply_fault_threshold(&mut samples, fault_threshold_volt);
    derive_power_on(&mut samples);

    let stats = daily_stats(&samples);
    write_snapshot(series_path, &series_to_record_batch(&samples)?)?;
    write_snapshot(stats_path, &stats_to_record_batch(&stats)?)?;
    Ok((samples.len(), stats.len()))
}

/// Read the persisted series back, mainly for downstream consumers and
/// round-trip checks.
pub fn read_series(path: &Path) -> Result<Vec<VoltageSample>, SnapshotError> {
    match read_snapshot(path)? {
        Some(batch) => series_from_record_batch(path, &batch),
        None => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::datetime;

    const SAMPLE_LOG: &str = "\
2021-06-27 10:00:00(+0000);3.3;V;-1;\n\
2021-06-27 10:00:00(+0000);3.4;V;0;power up\n\
2021-06-27 10:00:01(+0000);3.5;V;1;\n\
2021-06-28 09:00:00(+0000);-99.9;V;1;sensor fault\n";

    #[test]
    fn test_parse_fixed_schema() {
        let samples = parse_supply_log(SAMPLE_LOG).unwrap();
        assert_eq!(samples.len(), 4);
        assert_eq!(samples[0].timestamp, datetime!(2021-06-27 10:00:00 UTC));
        assert_eq!(samples[0].voltage, Some(3.3));
        assert_eq!(samples[0].unit, "V");
        assert_eq!(samples[0].relay_state, -1);
        assert_eq!(samples[0].comment, None);
        assert_eq!(samples[1].comment.as_deref(), Some("power up"));
    }

    #[test]
    fn test_parse_offset_timestamp() {
        let samples = parse_supply_log("2021-06-27 12:00:00(+0200);3.3;V;-1;\n").unwrap();
        assert_eq!(samples[0].timestamp, datetime!(2021-06-27 10:00:00 UTC));
        assert_eq!(samples[0].timestamp.date(), time::macros::date!(2021 - 06 - 27));
    }

    #[test]
    fn test_parse_rejects_wrong_field_count() {
        let result = parse_supply_log("2021-06-27 10:00:00(+0000);3.3;V;-1\n");
        assert!(matches!(
            result,
            Err(VoltageLogError::ParsingError { line: 1, .. })
        ));
    }

    #[test]
    fn test_repair_keeps_last_occurrence() {
        let mut samples = parse_supply_log(SAMPLE_LOG).unwrap();
        let passes = repair_duplicate_timestamps(&mut samples, 1).unwrap();
        assert_eq!(passes, 1);
        // Earlier duplicate nudged forward, last one kept in place.
        assert_eq!(samples[0].timestamp, datetime!(2021-06-27 10:00:00.001 UTC));
        assert_eq!(samples[1].timestamp, datetime!(2021-06-27 10:00:00 UTC));
        assert_eq!(samples[0].voltage, Some(3.3));
        assert_eq!(samples[1].voltage, Some(3.4));
    }

    #[test]
    fn test_repair_cascading_duplicates() {
        let log = "\
2021-06-27 10:00:00(+0000);3.1;V;-1;\n\
2021-06-27 10:00:00(+0000);3.2;V;-1;\n\
2021-06-27 10:00:00(+0000);3.3;V;-1;\n";
        let mut samples = parse_supply_log(log).unwrap();
        repair_duplicate_timestamps(&mut samples, 1).unwrap();
        let mut instants: Vec<i128> = samples
            .iter()
            .map(|s| s.timestamp.unix_timestamp_nanos())
            .collect();
        let original = instants.clone();
        instants.sort_unstable();
        instants.dedup();
        assert_eq!(instants.len(), 3);
        // All at or after the shared second, last row untouched.
        assert!(original
            .iter()
            .all(|&ns| ns >= datetime!(2021-06-27 10:00:00 UTC).unix_timestamp_nanos()));
        assert_eq!(samples[2].timestamp, datetime!(2021-06-27 10:00:00 UTC));
    }

    #[test]
    fn test_fault_threshold_and_power_on() {
        let mut samples = parse_supply_log(SAMPLE_LOG).unwrap();
        repair_duplicate_timestamps(&mut samples, 1).unwrap();
        apply_fault_threshold(&mut samples, -90.0);
        derive_power_on(&mut samples);

        assert_eq!(samples[3].voltage, None);
        assert_eq!(samples[0].power_on, None); // relay -1, no relay fitted
        assert_eq!(samples[1].power_on, Some(0.0)); // transition marker
        assert_eq!(samples[2].power_on, None); // steady on
    }

    #[test]
    fn test_daily_stats() {
        let mut samples = parse_supply_log(SAMPLE_LOG).unwrap();
        repair_duplicate_timestamps(&mut samples, 1).unwrap();
        apply_fault_threshold(&mut samples, -90.0);

        let stats = daily_stats(&samples);
        assert_eq!(stats.len(), 2);
        let day_one = &stats[0];
        assert_eq!(day_one.date, time::macros::date!(2021 - 06 - 27));
        assert_eq!(day_one.voltage_min, Some(3.3));
        assert_eq!(day_one.voltage_max, Some(3.5));
        let mean = day_one.voltage_mean.unwrap();
        assert!((mean - 3.4).abs() < 1e-9);
        // population stddev of {3.3, 3.4, 3.5}
        let std = day_one.voltage_std.unwrap();
        assert!((std - (0.02f64 / 3.0).sqrt()).abs() < 1e-9);

        // All readings on day two were faulted out.
        let day_two = &stats[1];
        assert_eq!(day_two.voltage_min, None);
        assert_eq!(day_two.voltage_mean, None);
    }

    #[test]
    fn test_series_round_trip() {
        let mut samples = parse_supply_log(SAMPLE_LOG).unwrap();
        repair_duplicate_timestamps(&mut samples, 1).unwrap();
        apply_fault_threshold(&mut samples, -90.0);
        derive_power_on(&mut samples);

        let batch = series_to_record_batch(&samples).unwrap();
        let decoded = series_from_record_batch(Path::new("mem"), &batch).unwrap();
        assert_eq!(decoded, samples);

        let stats = daily_stats(&samples);
        let batch = stats_to_record_batch(&stats).unwrap();
        let decoded = stats_from_record_batch(Path::new("mem"), &batch).unwrap();
        assert_eq!(decoded, stats);
    }

    #[test]
    fn test_end_to_end_processing() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("supply_voltage.dat");
        std::fs::write(&log_path, SAMPLE_LOG).unwrap();
        let series_path = dir.path().join("supply_voltage.arrow");
        let stats_path = dir.path().join("battery_stats.arrow");

        let (n_samples, n_days) =
            process_supply_log(&log_path, &series_path, &stats_path, -90.0, 1).unwrap();
        assert_eq!(n_samples, 4);
        assert_eq!(n_days, 2);
        assert_eq!(read_series(&series_path).unwrap().len(), 4);
    }
}
