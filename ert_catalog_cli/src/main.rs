use clap::{Arg, Command};
use indicatif::{MultiProgress, ProgressBar};
use indicatif_log_bridge::LogWrapper;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::mpsc;

use libert_catalog::config::Config;
use libert_catalog::process::run_pipeline;
use libert_catalog::worker_status::{PipelinePhase, WorkerStatus};

fn make_template_config(path: &Path) {
    let config = Config::default();
    let yaml_str = serde_yaml::to_string(&config).unwrap();
    let mut file = File::create(path).expect("Could create template config file!");
    file.write_all(yaml_str.as_bytes())
        .expect("Failed to write yaml data to file!");
}

fn phase_name(phase: PipelinePhase) -> &'static str {
    match phase {
        PipelinePhase::TaskCatalog => "Task catalog",
        PipelinePhase::VoltageLog => "Voltage log",
        PipelinePhase::Temperature => "Temperature",
    }
}

fn main() {
    // Create a cli
    let matches = Command::new("ert_catalog_cli")
        .arg_required_else_help(true)
        .subcommand(Command::new("new").about("Make a template configuration yaml file"))
        .arg(
            Arg::new("path")
                .short('p')
                .long("path")
                .help("Path to the configuration file"),
        )
        .get_matches();

    // Initialize feedback
    let logger = simplelog::TermLogger::new(
        simplelog::LevelFilter::Info,
        simplelog::Config::default(),
        simplelog::TerminalMode::Mixed,
        simplelog::ColorChoice::Auto,
    );

    let pb_manager = MultiProgress::new();

    LogWrapper::new(pb_manager.clone(), logger)
        .try_init()
        .expect("Could not create logging/progress!");

    // Parse the cli
    let config_path = PathBuf::from(matches.get_one::<String>("path").expect("We require args"));

    if matches.subcommand_matches("new").is_some() {
        log::info!(
            "Making a template config at {}...",
            config_path.to_string_lossy()
        );
        make_template_config(&config_path);
        log::info!("Done.");
        return;
    }

    // Load our config
    log::info!("Loading config from {}...", config_path.to_string_lossy());
    let config = match Config::read_config_file(&config_path) {
        Ok(c) => c,
        Err(e) => {
            log::error!("{e}");
            return;
        }
    };
    log::info!("Config successfully loaded.");
    log::info!("Projects Path: {}", config.projects_path.to_string_lossy());
    log::info!("Protocols Path: {}", config.protocols_path.to_string_lossy());
    log::info!(
        "Supply Log Path: {}",
        config.supply_log_path.to_string_lossy()
    );
    log::info!("Output Path: {}", config.output_path.to_string_lossy());
    log::info!("Commissioning Date: {}", config.commissioning_date);

    // Setup the progress bar
    let pb = pb_manager.add(ProgressBar::new(100));
    let (tx, rx) = mpsc::channel::<WorkerStatus>();
    // Spawn the task!
    let handle = std::thread::spawn(move || run_pipeline(&config, &tx));

    let mut current_phase = PipelinePhase::TaskCatalog;
    pb.set_message(phase_name(current_phase));
    loop {
        match rx.recv_timeout(std::time::Duration::from_millis(250)) {
            Ok(status) => {
                if status.phase != current_phase {
                    current_phase = status.phase;
                    log::info!("Phase: {}", phase_name(current_phase));
                }
                pb.set_position((status.progress * 100.0) as u64);
            }
            Err(mpsc::RecvTimeoutError::Timeout) => (),
            Err(mpsc::RecvTimeoutError::Disconnected) => break,
        }
    }

    match handle.join() {
        Ok(result) => match result {
            Ok(summary) => log::info!(
                "Pipeline finished: {} project(s) scanned, {} new catalog row(s), {} voltage sample(s) over {} day(s), {} temperature reading(s)",
                summary.projects_found,
                summary.new_tasks,
                summary.voltage_samples,
                summary.stat_days,
                summary.temperature_samples
            ),
            Err(e) => log::error!("Pipeline failed with error: {e}"),
        },
        Err(_) => log::error!("Failed to join pipeline task!"),
    }

    pb.finish();

    log::info!("Done.");
}
