//! Configuration for hinj

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::ipc::{BarrierOptions, Endpoints, ExchangeClient, SyncBarrier};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Simulator message socket (default: `$HOME/.hardware_controller`)
    #[serde(default)]
    pub message_socket: Option<PathBuf>,

    /// Barrier socket (default: `$HOME/.drone_signal`)
    #[serde(default)]
    pub sync_socket: Option<PathBuf>,

    /// Per-I/O timeout for sensor exchanges in milliseconds; 0 blocks forever
    #[serde(default)]
    pub timeout_ms: u64,

    /// Reject replies whose header disagrees with the request layout
    #[serde(default)]
    pub strict_size: bool,

    /// Cap for the backoff between failed accepts in milliseconds
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default)]
    pub log_level: Option<String>,
}

fn default_max_backoff_ms() -> u64 {
    crate::ipc::barrier::DEFAULT_MAX_BACKOFF.as_millis() as u64
}

impl Default for Config {
    fn default() -> Self {
        Self {
            message_socket: None,
            sync_socket: None,
            timeout_ms: 0,
            strict_size: false,
            max_backoff_ms: default_max_backoff_ms(),
            log_level: None,
        }
    }
}

impl Config {
    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        if let Some(config_path) = path {
            return Self::load_from(config_path);
        }

        // Try default locations
        let default_paths = [
            dirs::config_dir().map(|p| p.join("hinj").join("hinj.yml")),
            Some(PathBuf::from("hinj.yml")),
        ];

        for path in default_paths.iter().flatten() {
            if path.exists() {
                return Self::load_from(path);
            }
        }

        debug!("Config::load: no config file found, using defaults");
        Ok(Config::default())
    }

    fn load_from(path: &Path) -> Result<Self> {
        debug!(?path, "Config::load_from: reading config");
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config: {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config: {}", path.display()))?;
        Ok(config)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Socket paths, with `$HOME` filling in whatever the file leaves out
    pub fn endpoints(&self) -> Result<Endpoints> {
        if let (Some(message), Some(sync)) = (&self.message_socket, &self.sync_socket) {
            return Ok(Endpoints {
                message: message.clone(),
                sync: sync.clone(),
            });
        }

        let from_env = Endpoints::from_env().context("No socket paths configured and $HOME is not set")?;
        Ok(Endpoints {
            message: self.message_socket.clone().unwrap_or(from_env.message),
            sync: self.sync_socket.clone().unwrap_or(from_env.sync),
        })
    }

    pub fn client(&self, endpoints: &Endpoints) -> ExchangeClient {
        ExchangeClient::from_endpoints(endpoints)
            .with_timeout(Duration::from_millis(self.timeout_ms))
            .with_strict_size(self.strict_size)
    }

    pub fn barrier(&self, endpoints: &Endpoints) -> SyncBarrier {
        SyncBarrier::from_endpoints(endpoints).with_options(self.barrier_options())
    }

    pub fn barrier_options(&self) -> BarrierOptions {
        BarrierOptions {
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            ..Default::default()
        }
    }
}
