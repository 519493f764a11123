//! Hub configuration
//!
//! Loaded from `hub.toml` (see [`sdsync_common::config`] for path resolution),
//! then overridden by command-line flags.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sdsync_common::config::{load_toml, LoggingConfig};
use sdsync_common::TrackRef;

use crate::error::{HubError, HubResult};

/// Default listening port
pub const DEFAULT_PORT: u16 = 5780;

/// Config file name under the platform config directory
pub const CONFIG_FILE_NAME: &str = "hub.toml";

/// One catalog program as written in `[[programs]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgramConfig {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub cover_image: Option<String>,
    #[serde(default)]
    pub tracks: Vec<TrackRef>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    pub bind: String,
    pub port: u16,
    /// Bounded outbound queue per connection; overflow disconnects the listener
    pub send_queue_capacity: usize,
    pub join_timeout_secs: u64,
    /// How long a session may go without an operator before it is reaped
    pub idle_timeout_secs: u64,
    pub reaper_interval_secs: u64,
    pub logging: LoggingConfig,
    pub programs: Vec<ProgramConfig>,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            send_queue_capacity: 64,
            join_timeout_secs: 10,
            idle_timeout_secs: 30 * 60,
            reaper_interval_secs: 30,
            logging: LoggingConfig::default(),
            programs: Vec::new(),
        }
    }
}

impl HubConfig {
    /// Load from a TOML file, or defaults when the file is absent
    pub fn load(path: Option<&Path>) -> HubResult<Self> {
        let config: HubConfig = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> HubResult<()> {
        if self.send_queue_capacity == 0 {
            return Err(HubError::Config(
                "send_queue_capacity must be at least 1".to_string(),
            ));
        }
        if self.join_timeout_secs == 0 {
            return Err(HubError::Config(
                "join_timeout_secs must be at least 1".to_string(),
            ));
        }
        if self.reaper_interval_secs == 0 {
            return Err(HubError::Config(
                "reaper_interval_secs must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Apply command-line overrides on top of file values
    pub fn apply_overrides(
        &mut self,
        port: Option<u16>,
        bind: Option<String>,
        log_level: Option<String>,
    ) {
        if let Some(port) = port {
            self.port = port;
        }
        if let Some(bind) = bind {
            self.bind = bind;
        }
        if let Some(level) = log_level {
            self.logging.level = level;
        }
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.bind, self.port)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_secs(self.join_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn reaper_interval(&self) -> Duration {
        Duration::from_secs(self.reaper_interval_secs)
    }
}
