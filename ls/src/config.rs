//! Configuration for loopstore

use eyre::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Directory holding state records
    #[serde(default = "default_state_dir", rename = "state-dir")]
    pub state_dir: PathBuf,

    /// Record file used when no path is given on the command line
    #[serde(default = "default_filename")]
    pub filename: String,
}

/// Shared default state directory (`<data dir>/supersugar/state`)
pub fn default_state_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("supersugar")
        .join("state")
}

fn default_filename() -> String {
    crate::DEFAULT_STATE_FILENAME.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_dir: default_state_dir(),
            filename: default_filename(),
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            let content = std::fs::read_to_string(config_path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            return Ok(config);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("supersugar").join("loopstore.yml")),
            Some(PathBuf::from("loopstore.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                let content = std::fs::read_to_string(path)?;
                let config: Config = serde_yaml::from_str(&content)?;
                return Ok(config);
            }
        }

        Ok(Config::default())
    }

    /// Record path: explicit `path`, else `state_dir/filename`
    pub fn resolve(&self, path: Option<&PathBuf>) -> PathBuf {
        match path {
            Some(p) => p.clone(),
            None => self.state_dir.join(&self.filename),
        }
    }
}
