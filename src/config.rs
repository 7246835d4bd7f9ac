//! Runner configuration loaded from `oswflow.toml`.
//!
//! [`RunnerConfig`] holds every tunable of the binary. Keys missing from the
//! file take their defaults. `ENERGYPLUS_EXE_PATH` takes precedence over the
//! file for the EnergyPlus executable.

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::Result;

pub const CONFIG_FILE: &str = "oswflow.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct RunnerConfig {
    /// Run directory name, relative to the workflow directory.
    #[serde(default = "default_run_directory")]
    pub run_directory: String,

    /// EnergyPlus executable.
    #[serde(default = "default_energyplus_exe")]
    pub energyplus_exe: String,

    /// Upper bound on the simulation, unlimited when absent.
    #[serde(default)]
    pub simulation_timeout_secs: Option<u64>,

    /// Argv prefix used to apply a measure.
    #[serde(default)]
    pub measure_command: Vec<String>,

    /// Argv prefix used to translate an OSM model to IDF.
    #[serde(default)]
    pub translator_command: Vec<String>,

    /// Keep intermediate files and log at debug level.
    #[serde(default)]
    pub debug: bool,

    /// Remove per-step scratch directories after the run.
    #[serde(default = "default_cleanup")]
    pub cleanup: bool,
}

fn default_run_directory() -> String {
    "run".to_string()
}

fn default_energyplus_exe() -> String {
    "energyplus".to_string()
}

fn default_cleanup() -> bool {
    true
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            run_directory: default_run_directory(),
            energyplus_exe: default_energyplus_exe(),
            simulation_timeout_secs: None,
            measure_command: Vec::new(),
            translator_command: Vec::new(),
            debug: false,
            cleanup: default_cleanup(),
        }
    }
}

impl RunnerConfig {
    /// Load `oswflow.toml` from the current directory, falling back to defaults.
    pub fn load() -> Result<Self> {
        Self::load_from(Path::new(CONFIG_FILE))
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(path)?;
            toml::from_str::<RunnerConfig>(&contents)?
        } else {
            Self::default()
        };

        if let Ok(exe) = std::env::var("ENERGYPLUS_EXE_PATH") {
            if !exe.is_empty() {
                config.energyplus_exe = exe;
            }
        }

        Ok(config)
    }

    pub fn simulation_timeout(&self) -> Option<Duration> {
        self.simulation_timeout_secs.map(Duration::from_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_values() {
        let config = RunnerConfig::default();
        assert_eq!(config.run_directory, "run");
        assert_eq!(config.energyplus_exe, "energyplus");
        assert!(config.cleanup);
        assert!(!config.debug);
        assert!(config.simulation_timeout().is_none());
    }

    #[test]
    fn deserialize_partial_toml() {
        let toml_str = r#"
            simulation_timeout_secs = 3600
            measure_command = ["openstudio", "measure", "--apply"]
            cleanup = false
        "#;
        let config: RunnerConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.simulation_timeout(), Some(Duration::from_secs(3600)));
        assert_eq!(config.measure_command, vec!["openstudio", "measure", "--apply"]);
        assert!(!config.cleanup);
        assert_eq!(config.run_directory, "run");
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = RunnerConfig::load_from(&dir.path().join(CONFIG_FILE)).unwrap();
        assert_eq!(config.run_directory, "run");
    }

    #[test]
    fn malformed_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "cleanup = \"sometimes\"").unwrap();
        assert!(RunnerConfig::load_from(&path).is_err());
    }
}
