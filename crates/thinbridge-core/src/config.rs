use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::status::DEFAULT_MAINTENANCE_PREFIX;

pub const CONFIG_FILE_NAME: &str = "thinbridge.toml";

#[derive(Debug, Deserialize)]
pub struct ThinbridgeConfig {
    pub container: ContainerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub log: LogConfig,
}

/// How to launch the runtime container.
#[derive(Debug, Deserialize)]
pub struct ContainerConfig {
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_maintenance_prefix")]
    pub maintenance_prefix: String,
    #[serde(default = "default_cancel_message")]
    pub cancel_message: String,
    /// Replay restartable subscriptions when the container becomes ready
    /// again after a reload.
    #[serde(default = "default_replay_on_ready")]
    pub replay_on_ready: bool,
    #[serde(default = "default_dapp_bus_capacity")]
    pub dapp_bus_capacity: usize,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            maintenance_prefix: default_maintenance_prefix(),
            cancel_message: default_cancel_message(),
            replay_on_ready: default_replay_on_ready(),
            dapp_bus_capacity: default_dapp_bus_capacity(),
        }
    }
}

fn default_maintenance_prefix() -> String {
    DEFAULT_MAINTENANCE_PREFIX.into()
}
fn default_cancel_message() -> String {
    "pri(subscription.cancel)".into()
}
fn default_replay_on_ready() -> bool {
    true
}
fn default_dapp_bus_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize)]
pub struct LogConfig {
    #[serde(default = "default_filter")]
    pub filter: String,
    #[serde(default)]
    pub json: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            filter: default_filter(),
            json: false,
        }
    }
}

fn default_filter() -> String {
    "info".into()
}

impl ThinbridgeConfig {
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => ConfigError::NotFound(path.display().to_string()),
            _ => ConfigError::IoError(e),
        })?;
        Self::from_toml(&content)
    }

    pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.container.command.trim().is_empty() {
            return Err(ConfigError::Invalid("container.command must not be empty".into()));
        }
        // An empty prefix would make every message a maintenance message
        if self.bridge.maintenance_prefix.is_empty() {
            return Err(ConfigError::Invalid("bridge.maintenance_prefix must not be empty".into()));
        }
        if self.bridge.cancel_message.trim().is_empty() {
            return Err(ConfigError::Invalid("bridge.cancel_message must not be empty".into()));
        }
        if self.bridge.dapp_bus_capacity == 0 {
            return Err(ConfigError::Invalid("bridge.dapp_bus_capacity must be at least 1".into()));
        }
        Ok(())
    }

    /// Locate the config file: `explicit` if given, else `./thinbridge.toml`,
    /// else `<config dir>/thinbridge/thinbridge.toml`.
    pub fn locate(explicit: Option<&Path>, user_config_dir: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        let local = PathBuf::from(CONFIG_FILE_NAME);
        if local.exists() {
            return Ok(local);
        }

        if let Some(dir) = user_config_dir {
            let candidate = dir.join("thinbridge").join(CONFIG_FILE_NAME);
            if candidate.exists() {
                return Ok(candidate);
            }
        }

        Err(ConfigError::NotFound(format!(
            "no {CONFIG_FILE_NAME} in the working directory or user config directory"
        )))
    }
}
