use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),
    #[error("IO error reading config: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Could not determine the config directory")]
    NoConfigDir,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Capacity of the `newBlock` delivery queue (minimum 1)
    pub block_queue_capacity: usize,

    /// Capacity of the queue shared by all watched objects (minimum 1)
    pub object_queue_capacity: usize,

    /// How many diagnostics a slow subscriber may fall behind by
    pub diagnostics_capacity: usize,

    /// Scripts evaluated, in order, before the bridge starts dispatching
    pub prelude: Vec<PathBuf>,

    /// Name of the dispatch thread
    pub thread_name: String,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            block_queue_capacity: 1,
            object_queue_capacity: 1,
            diagnostics_capacity: 64,
            prelude: Vec::new(),
            thread_name: "ethscript-dispatch".to_string(),
        }
    }
}

/// Limits applied to the script engine. Zero means unlimited where rhai
/// allows it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub max_operations: u64,
    pub max_call_levels: usize,
    pub max_expr_depth: usize,
    pub max_string_size: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_operations: 1_000_000,
            max_call_levels: 64,
            max_expr_depth: 64,
            max_string_size: 1024 * 1024,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Also write logs to a file
    pub file: bool,

    /// Directory for log files (default: the platform data directory)
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EthscriptConfig {
    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub engine: EngineConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

impl EthscriptConfig {
    pub fn config_path() -> Result<PathBuf, ConfigLoadError> {
        use directories::ProjectDirs;

        let proj_dirs =
            ProjectDirs::from("", "", "ethscript").ok_or(ConfigLoadError::NoConfigDir)?;
        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Load from the default location.
    pub fn load() -> Result<Self, ConfigLoadError> {
        Self::load_from(Self::config_path()?)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self, ConfigLoadError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigLoadError::NotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&content)?;
        info!("Loaded config from {}", path.display());
        Ok(config.normalized())
    }

    pub fn save_to(&self, path: impl AsRef<Path>) -> Result<(), ConfigLoadError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(&self)?;
        fs::write(path, content)?;
        info!("Saved config to {}", path.display());
        Ok(())
    }

    /// Clamp values the bridge cannot run with.
    pub fn normalized(mut self) -> Self {
        self.bridge.block_queue_capacity = self.bridge.block_queue_capacity.max(1);
        self.bridge.object_queue_capacity = self.bridge.object_queue_capacity.max(1);
        self.bridge.diagnostics_capacity = self.bridge.diagnostics_capacity.max(1);
        self
    }
}
