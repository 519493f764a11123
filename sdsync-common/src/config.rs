//! Configuration file resolution and loading
//!
//! Config path priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. `<platform config dir>/sdsync/<file_name>`
//!
//! A missing file is not an error: the caller's defaults are used and a warning
//! is logged. A file that exists but cannot be parsed is fatal.

use std::path::{Path, PathBuf};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{Error, Result};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "SDSYNC_CONFIG";

/// Logging section shared by the hub and listener configs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default `EnvFilter` directive when `RUST_LOG` is unset
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolve which config file to read
///
/// Returns `None` only when no explicit path was given and the platform has no
/// config directory.
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    file_name: &str,
) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: Platform config directory
    default_config_path(file_name)
}

/// `~/.config/sdsync/<file_name>` on Linux, the platform equivalent elsewhere
pub fn default_config_path(file_name: &str) -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("sdsync").join(file_name))
}

/// Load a TOML config, falling back to `T::default()` when the file is absent
pub fn load_toml<T>(path: Option<&Path>) -> Result<T>
where
    T: DeserializeOwned + Default,
{
    let Some(path) = path else {
        warn!("No config directory available, using built-in defaults");
        return Ok(T::default());
    };

    if !path.exists() {
        warn!("Config file {} not found, using built-in defaults", path.display());
        return Ok(T::default());
    }

    let content = std::fs::read_to_string(path)?;
    let config = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::io::Write;

    #[derive(Debug, Default, PartialEq, Deserialize)]
    #[serde(default)]
    struct Sample {
        port: u16,
        logging: LoggingConfig,
    }

    #[test]
    #[serial]
    fn test_cli_argument_wins_over_env() {
        std::env::set_var("SDSYNC_TEST_CONFIG", "/from/env.toml");
        let resolved = resolve_config_path(
            Some(Path::new("/from/cli.toml")),
            "SDSYNC_TEST_CONFIG",
            "hub.toml",
        );
        std::env::remove_var("SDSYNC_TEST_CONFIG");
        assert_eq!(resolved, Some(PathBuf::from("/from/cli.toml")));
    }

    #[test]
    #[serial]
    fn test_env_wins_over_default_location() {
        std::env::set_var("SDSYNC_TEST_CONFIG", "/from/env.toml");
        let resolved = resolve_config_path(None, "SDSYNC_TEST_CONFIG", "hub.toml");
        std::env::remove_var("SDSYNC_TEST_CONFIG");
        assert_eq!(resolved, Some(PathBuf::from("/from/env.toml")));
    }

    #[test]
    #[serial]
    fn test_default_location_ends_with_file_name() {
        std::env::remove_var("SDSYNC_TEST_CONFIG");
        if let Some(path) = resolve_config_path(None, "SDSYNC_TEST_CONFIG", "hub.toml") {
            assert!(path.ends_with("sdsync/hub.toml"));
        }
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let sample: Sample = load_toml(Some(&dir.path().join("absent.toml"))).unwrap();
        assert_eq!(sample, Sample::default());
        assert_eq!(sample.logging.level, "info");
    }

    #[test]
    fn test_partial_file_keeps_remaining_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = 8123").unwrap();
        let sample: Sample = load_toml(Some(file.path())).unwrap();
        assert_eq!(sample.port, 8123);
        assert_eq!(sample.logging, LoggingConfig::default());
    }

    #[test]
    fn test_malformed_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "port = \"not a number").unwrap();
        let err = load_toml::<Sample>(Some(file.path())).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
