//! SuperSugar configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use loopstore::{CONTROLLER_STATE_FILENAME, DEFAULT_STATE_FILENAME, JsonFileStore};

use crate::generator::DEFAULT_MAX_MATERIALIZE;

/// Main SuperSugar configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Where loop state lives
    pub state: StateConfig,

    /// Combinator defaults
    pub engine: EngineConfig,

    /// Where host events go
    pub notify: NotifyConfig,

    /// Generator limits
    pub generator: GeneratorConfig,

    /// Log level used when none is given on the command line
    #[serde(rename = "log-level")]
    pub log_level: Option<String>,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        // Project-local config: .supersugar.yml
        let local_config = PathBuf::from(".supersugar.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        // User config: ~/.config/supersugar/supersugar.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("supersugar").join("supersugar.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;

        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;

        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// State file locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding state files
    pub dir: PathBuf,

    /// Combinator state file name
    #[serde(rename = "engine-file")]
    pub engine_file: String,

    /// Loop controller state file name
    #[serde(rename = "controller-file")]
    pub controller_file: String,
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            dir: loopstore::config::default_state_dir(),
            engine_file: DEFAULT_STATE_FILENAME.to_string(),
            controller_file: CONTROLLER_STATE_FILENAME.to_string(),
        }
    }
}

impl StateConfig {
    /// Combinator store, or `explicit` when given
    pub fn engine_store(&self, explicit: Option<&PathBuf>) -> JsonFileStore {
        match explicit {
            Some(path) => JsonFileStore::new(path),
            None => JsonFileStore::in_dir(&self.dir, &self.engine_file),
        }
    }

    /// Controller store, or `explicit` when given
    pub fn controller_store(&self, explicit: Option<&PathBuf>) -> JsonFileStore {
        match explicit {
            Some(path) => JsonFileStore::new(path),
            None => JsonFileStore::in_dir(&self.dir, &self.controller_file),
        }
    }
}

/// Combinator defaults applied when the command line leaves them out
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Ceiling on processed combinations, 0 for none
    #[serde(rename = "max-combinations")]
    pub max_combinations: u64,

    /// Ask for the next run after each item
    #[serde(rename = "auto-queue")]
    pub auto_queue: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_combinations: 0,
            auto_queue: true,
        }
    }
}

/// Event sink selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SinkKind {
    #[default]
    Tracing,
    Jsonl,
    None,
}

/// Where host events go
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NotifyConfig {
    pub sink: SinkKind,

    /// JSON lines event log, used by the `jsonl` sink
    #[serde(rename = "events-path")]
    pub events_path: Option<PathBuf>,
}

impl NotifyConfig {
    /// Event log path, defaulting next to the log file
    pub fn events_path(&self) -> PathBuf {
        self.events_path.clone().unwrap_or_else(|| {
            dirs::data_local_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("supersugar")
                .join("events.jsonl")
        })
    }
}

/// Generator limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    /// Largest space the generator will materialize, 0 for no limit
    #[serde(rename = "max-materialize")]
    pub max_materialize: u64,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            max_materialize: DEFAULT_MAX_MATERIALIZE,
        }
    }
}
