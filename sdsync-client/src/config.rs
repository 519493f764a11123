//! Listener configuration
//!
//! Loaded from `listen.toml` (path resolution in [`sdsync_common::config`]).

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sdsync_common::config::{load_toml, LoggingConfig};

use crate::error::{ClientError, ClientResult};

/// Config file name under the platform config directory
pub const CONFIG_FILE_NAME: &str = "listen.toml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Hub base URL, e.g. `ws://127.0.0.1:5780`
    pub hub_url: String,
    pub reconnect_delay_ms: u64,
    pub play_retry_delay_ms: u64,
    pub load_deadline_ms: u64,
    pub keepalive_interval_ms: u64,
    /// Length of each keep-alive tone; must exceed the interval
    pub keepalive_unit_ms: u64,
    pub keepalive_gain: f64,
    pub unlock_tone_ms: u64,
    pub unlock_gain: f64,
    /// Run the audio unlock sequence before the first join
    pub mobile: bool,
    /// PINGs sent after each connect for the clock estimate
    pub ping_count: u32,
    pub logging: LoggingConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            hub_url: "ws://127.0.0.1:5780".to_string(),
            reconnect_delay_ms: 2000,
            play_retry_delay_ms: 200,
            load_deadline_ms: 5000,
            keepalive_interval_ms: 900,
            keepalive_unit_ms: 1000,
            keepalive_gain: 0.0001,
            unlock_tone_ms: 100,
            unlock_gain: 0.001,
            mobile: false,
            ping_count: 3,
            logging: LoggingConfig::default(),
        }
    }
}

impl ClientConfig {
    pub fn load(path: Option<&Path>) -> ClientResult<Self> {
        let config: ClientConfig = load_toml(path)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ClientResult<()> {
        if self.keepalive_interval_ms == 0 {
            return Err(ClientError::Config(
                "keepalive_interval_ms must be at least 1".to_string(),
            ));
        }
        if self.keepalive_unit_ms <= self.keepalive_interval_ms {
            return Err(ClientError::Config(format!(
                "keepalive_unit_ms ({}) must be longer than keepalive_interval_ms ({})",
                self.keepalive_unit_ms, self.keepalive_interval_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.keepalive_gain) || !(0.0..=1.0).contains(&self.unlock_gain) {
            return Err(ClientError::Config("gains must be within [0, 1]".to_string()));
        }
        Ok(())
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn play_retry_delay(&self) -> Duration {
        Duration::from_millis(self.play_retry_delay_ms)
    }

    pub fn load_deadline(&self) -> Duration {
        Duration::from_millis(self.load_deadline_ms)
    }

    pub fn keepalive_interval(&self) -> Duration {
        Duration::from_millis(self.keepalive_interval_ms)
    }

    pub fn keepalive_unit(&self) -> Duration {
        Duration::from_millis(self.keepalive_unit_ms)
    }

    pub fn unlock_tone(&self) -> Duration {
        Duration::from_millis(self.unlock_tone_ms)
    }
}
