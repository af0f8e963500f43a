//! The batch pipeline: task catalog, supply-voltage log, temperature series.
//!
//! Projects live under the configured projects directory as date-coded
//! folders (`YYMMDD...`, digits and underscores only), each holding one
//! SQLite store. The catalog phase skips already-cataloged projects without
//! opening their stores; the temperature phase rescans every project each
//! run, since its snapshot is rebuilt from scratch.

use std::path::PathBuf;
use std::sync::mpsc::Sender;

use time::{Date, Month};
use walkdir::WalkDir;

use super::catalog::TaskCatalog;
use super::config::Config;
use super::error::PipelineError;
use super::project_store::ProjectStore;
use super::protocol::NominalCounts;
use super::task_info::{extract_task_info, AcquisitionTask};
use super::temperature;
use super::voltage_log;
use super::worker_status::{PipelinePhase, WorkerStatus};

/// One candidate project found on disk.
#[derive(Debug, Clone)]
pub struct DiscoveredProject {
    pub name: String,
    pub date: Date,
    pub store_path: PathBuf,
}

/// Totals reported after a successful run.
#[derive(Debug, Clone, Default)]
pub struct PipelineSummary {
    pub projects_found: usize,
    pub new_tasks: usize,
    pub voltage_samples: usize,
    pub stat_days: usize,
    pub temperature_samples: usize,
}

/// Project folders are date-coded and restricted to digits and underscores;
/// anything else in the projects directory is operator scratch space.
pub fn is_valid_project_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_digit() || c == '_')
}

/// Parse the project date from the first six characters of the folder name
/// (YYMMDD, third-millennium years).
pub fn project_date_from_name(name: &str) -> Option<Date> {
    if !is_valid_project_name(name) || name.len() < 6 {
        return None;
    }
    let year: i32 = name.get(0..2)?.parse().ok()?;
    let month: u8 = name.get(2..4)?.parse().ok()?;
    let day: u8 = name.get(4..6)?.parse().ok()?;
    Date::from_calendar_date(2000 + year, Month::try_from(month).ok()?, day).ok()
}

/// Walk the projects directory for `*.db` stores inside validly named
/// project folders, on or after the commissioning date. Misnamed folders and
/// bench-test data are excluded by design, not reported as errors.
pub fn discover_projects(config: &Config) -> Result<Vec<DiscoveredProject>, PipelineError> {
    let mut projects = Vec::new();
    for entry in WalkDir::new(&config.projects_path)
        .follow_links(true)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file()
            || entry.path().extension().map(|e| e != "db").unwrap_or(true)
        {
            continue;
        }
        let Some(folder) = entry
            .path()
            .parent()
            .and_then(|p| p.file_name())
            .and_then(|n| n.to_str())
        else {
            continue;
        };
        let Some(date) = project_date_from_name(folder) else {
            log::debug!("Ignoring non-project folder {folder:?}");
            continue;
        };
        if date < config.commissioning_date {
            log::debug!("Ignoring pre-commissioning project {folder:?}");
            continue;
        }
        projects.push(DiscoveredProject {
            name: folder.to_string(),
            date,
            store_path: entry.path().to_path_buf(),
        });
    }
    projects.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(projects)
}

/// Run the full pipeline. Progress is reported per phase over `tx` as a
/// fraction in [0, 1].
pub fn run_pipeline(
    config: &Config,
    tx: &Sender<WorkerStatus>,
) -> Result<PipelineSummary, PipelineError> {
    std::fs::create_dir_all(&config.output_path)?;

    let projects = discover_projects(config)?;
    log::info!(
        "Found {} project store(s) under {:?}",
        projects.len(),
        config.projects_path
    );
    let mut summary = PipelineSummary {
        projects_found: projects.len(),
        ..Default::default()
    };

    // Phase 1: append-only task catalog.
    let nominal_counts = NominalCounts::load(&config.protocols_path, &config.protocol_map)?;
    let mut catalog = TaskCatalog::load(&config.task_catalog_path())?;
    tx.send(WorkerStatus::new(0.0, PipelinePhase::TaskCatalog))?;
    for (index, project) in projects.iter().enumerate() {
        if catalog.contains(&project.name) {
            log::debug!("Project {} already cataloged, skipping", project.name);
        } else {
            match catalog_one_project(project, &nominal_counts) {
                Ok(rows) => {
                    log::info!("Cataloged {} task(s) from project {}", rows.len(), project.name);
                    catalog.append(rows);
                }
                Err(reason) => {
                    log::warn!("Skipping project {}: {reason}", project.name);
                }
            }
        }
        tx.send(WorkerStatus::new(
            (index + 1) as f32 / projects.len().max(1) as f32,
            PipelinePhase::TaskCatalog,
        ))?;
    }
    summary.new_tasks = catalog.appended();
    catalog.save()?;
    log::info!(
        "Task catalog holds {} row(s), {} new this run",
        catalog.len(),
        summary.new_tasks
    );

    // Phase 2: supply-voltage series and daily stats, rewritten wholesale.
    tx.send(WorkerStatus::new(0.0, PipelinePhase::VoltageLog))?;
    let (voltage_samples, stat_days) = voltage_log::process_supply_log(
        &config.supply_log_path,
        &config.voltage_series_path(),
        &config.battery_stats_path(),
        config.voltage_fault_threshold_volt,
        config.duplicate_nudge_ms,
    )?;
    summary.voltage_samples = voltage_samples;
    summary.stat_days = stat_days;
    tx.send(WorkerStatus::new(1.0, PipelinePhase::VoltageLog))?;
    log::info!("Voltage series: {voltage_samples} sample(s) over {stat_days} day(s)");

    // Phase 3: temperature series, rebuilt by rescanning every project.
    tx.send(WorkerStatus::new(0.0, PipelinePhase::Temperature))?;
    let mut temperature_samples = Vec::new();
    for (index, project) in projects.iter().enumerate() {
        match open_and_collect(project) {
            Ok(mut samples) => temperature_samples.append(&mut samples),
            Err(reason) => log::warn!(
                "Skipping project {} in temperature scan: {reason}",
                project.name
            ),
        }
        tx.send(WorkerStatus::new(
            (index + 1) as f32 / projects.len().max(1) as f32,
            PipelinePhase::Temperature,
        ))?;
    }
    temperature::sort_series(&mut temperature_samples);
    temperature::write_series(&config.temperature_series_path(), &temperature_samples)?;
    summary.temperature_samples = temperature_samples.len();
    log::info!(
        "Temperature series: {} reading(s)",
        summary.temperature_samples
    );

    Ok(summary)
}

/// Extract catalog rows for one not-yet-seen project. Every failure mode in
/// here is a skip for this project only, reported as a string reason so the
/// caller can log it uniformly.
fn catalog_one_project(
    project: &DiscoveredProject,
    nominal_counts: &NominalCounts,
) -> Result<Vec<AcquisitionTask>, String> {
    if let Ok(meta) = std::fs::metadata(&project.store_path) {
        log::info!(
            "Opening project {} ({})",
            project.name,
            human_bytes::human_bytes(meta.len() as f64)
        );
    }
    let store = ProjectStore::open(&project.store_path).map_err(|e| e.to_string())?;
    let tasks = store.list_tasks(true).map_err(|e| e.to_string())?;
    if tasks.is_empty() {
        return Err(String::from("store contains no tasks"));
    }
    let log_rows = store.get_log_rows().map_err(|e| e.to_string())?;

    let mut rows = Vec::with_capacity(tasks.len());
    for task in &tasks {
        let row = extract_task_info(
            &project.name,
            project.date,
            task,
            &store,
            &log_rows,
            nominal_counts,
        )
        .map_err(|e| e.to_string())?;
        rows.push(row);
    }
    Ok(rows)
}

fn open_and_collect(
    project: &DiscoveredProject,
) -> Result<Vec<temperature::TemperatureSample>, String> {
    let store = ProjectStore::open(&project.store_path).map_err(|e| e.to_string())?;
    temperature::collect_project_samples(&store).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::date;

    #[test]
    fn test_project_name_validation() {
        assert!(is_valid_project_name("210627_01"));
        assert!(is_valid_project_name("210627"));
        assert!(!is_valid_project_name("210627-01"));
        assert!(!is_valid_project_name("backup"));
        assert!(!is_valid_project_name(""));
    }

    #[test]
    fn test_project_date_parsing() {
        assert_eq!(
            project_date_from_name("210627_01"),
            Some(date!(2021 - 06 - 27))
        );
        assert_eq!(project_date_from_name("21062"), None);
        assert_eq!(project_date_from_name("211345_01"), None); // month 13
        assert_eq!(project_date_from_name("notaproject"), None);
    }

    #[test]
    fn test_discovery_applies_gates() {
        let dir = tempfile::tempdir().unwrap();
        for folder in ["210627_01", "210101_01", "scratch", "210630_02"] {
            let project_dir = dir.path().join(folder);
            std::fs::create_dir_all(&project_dir).unwrap();
            std::fs::write(project_dir.join("Project.db"), b"").unwrap();
        }

        let config = Config {
            projects_path: dir.path().to_path_buf(),
            commissioning_date: date!(2021 - 06 - 26),
            ..Config::default()
        };
        let projects = discover_projects(&config).unwrap();
        let names: Vec<&str> = projects.iter().map(|p| p.name.as_str()).collect();
        // scratch fails the name pattern, 210101_01 predates commissioning
        assert_eq!(names, vec!["210627_01", "210630_02"]);
        assert_eq!(projects[0].date, date!(2021 - 06 - 27));
    }
}
