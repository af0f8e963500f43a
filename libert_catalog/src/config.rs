use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use time::macros::date;
use time::Date;

use super::constants::{
    BATTERY_STATS_FILE, DUPLICATE_NUDGE_MS, TASK_CATALOG_FILE, TEMPERATURE_SERIES_FILE,
    VOLTAGE_FAULT_THRESHOLD_VOLT, VOLTAGE_SERIES_FILE,
};
use super::error::ConfigError;

/// Structure representing the station configuration. Contains pathing, the
/// protocol map and the tunable pipeline constants.
/// Configs are serializable and deserializable to YAML using serde and serde_yaml.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory scanned recursively for per-project `*.db` stores.
    pub projects_path: PathBuf,
    /// Directory holding the protocol XML definitions.
    pub protocols_path: PathBuf,
    /// The semicolon-delimited power-supply log.
    pub supply_log_path: PathBuf,
    /// Directory the columnar snapshots are written to.
    pub output_path: PathBuf,
    /// Protocol name -> XML file name (relative to `protocols_path`).
    /// Tasks whose name is absent from this map get a nominal count of 0.
    pub protocol_map: BTreeMap<String, String>,
    /// Projects dated before this are excluded from all catalogs.
    pub commissioning_date: Date,
    /// Supply-voltage readings below this are nulled as sensor faults.
    pub voltage_fault_threshold_volt: f64,
    /// Milliseconds added to duplicated supply-log timestamps per repair pass.
    pub duplicate_nudge_ms: i64,
}

impl Default for Config {
    /// Generate a new Config object. Paths will be empty/invalid.
    fn default() -> Self {
        let mut protocol_map = BTreeMap::new();
        protocol_map.insert(
            String::from("2x32gradientXL_1"),
            String::from("GradientXL_64_DISKO.xml"),
        );
        protocol_map.insert(
            String::from("2x32dipdip_1"),
            String::from("DipoleDipole64_DISKO.xml"),
        );
        Self {
            projects_path: PathBuf::from("None"),
            protocols_path: PathBuf::from("None"),
            supply_log_path: PathBuf::from("None"),
            output_path: PathBuf::from("None"),
            protocol_map,
            // The station went live on 2021-06-27; everything before is
            // bench testing.
            commissioning_date: date!(2021 - 06 - 26),
            voltage_fault_threshold_volt: VOLTAGE_FAULT_THRESHOLD_VOLT,
            duplicate_nudge_ms: DUPLICATE_NUDGE_MS,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Path of the append-only task catalog snapshot
    pub fn task_catalog_path(&self) -> PathBuf {
        self.output_path.join(TASK_CATALOG_FILE)
    }

    /// Path of the corrected supply-voltage series snapshot
    pub fn voltage_series_path(&self) -> PathBuf {
        self.output_path.join(VOLTAGE_SERIES_FILE)
    }

    /// Path of the daily battery statistics snapshot
    pub fn battery_stats_path(&self) -> PathBuf {
        self.output_path.join(BATTERY_STATS_FILE)
    }

    /// Path of the merged temperature series snapshot
    pub fn temperature_series_path(&self) -> PathBuf {
        self.output_path.join(TEMPERATURE_SERIES_FILE)
    }

    /// Full path of a mapped protocol XML file, if the protocol is mapped
    pub fn protocol_file_path(&self, protocol: &str) -> Option<PathBuf> {
        self.protocol_map
            .get(protocol)
            .map(|file| self.protocols_path.join(file))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_yaml_roundtrip() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let back: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(back.commissioning_date, config.commissioning_date);
        assert_eq!(back.protocol_map, config.protocol_map);
        assert_eq!(
            back.voltage_fault_threshold_volt,
            config.voltage_fault_threshold_volt
        );
    }

    #[test]
    fn test_missing_config_file() {
        let result = Config::read_config_file(Path::new("/no/such/config.yml"));
        assert!(matches!(result, Err(ConfigError::BadFilePath(_))));
    }
}
