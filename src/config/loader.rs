//! Configuration loading
//!
//! This module handles loading configuration from files and environment variables.

use std::path::Path;

use tracing::{debug, info};

use super::types::Config;
use crate::error::ConfigError;

/// Environment variable overriding `listen.address`
pub const ENV_LISTEN_ADDR: &str = "NODE_FORWARDER_LISTEN_ADDR";
/// Environment variable overriding `upstream.address`
pub const ENV_UPSTREAM_ADDR: &str = "NODE_FORWARDER_UPSTREAM_ADDR";
/// Environment variable overriding `log.level`
pub const ENV_LOG_LEVEL: &str = "NODE_FORWARDER_LOG_LEVEL";

/// Load configuration from a JSON file
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be read, parsed, or validated.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();

    debug!("Loading configuration from {:?}", path);

    if !path.exists() {
        return Err(ConfigError::FileNotFound {
            path: path.display().to_string(),
        });
    }

    let contents = std::fs::read_to_string(path)?;

    let config: Config = serde_json::from_str(&contents).map_err(|e| {
        ConfigError::ParseError(format!("Failed to parse JSON: {e} at {path:?}"))
    })?;

    config.validate()?;

    info!(
        "Configuration loaded: listen={}, upstream={}",
        config.listen.address, config.upstream.address
    );

    Ok(config)
}

/// Load configuration from a JSON string
///
/// # Errors
///
/// Returns `ConfigError` if parsing or validation fails.
pub fn load_config_str(json: &str) -> Result<Config, ConfigError> {
    let config: Config =
        serde_json::from_str(json).map_err(|e| ConfigError::ParseError(e.to_string()))?;

    config.validate()?;

    Ok(config)
}

/// Load configuration with environment variable overrides
///
/// When `path` does not exist the built-in defaults are used, so the
/// forwarder runs without any configuration file.
///
/// Environment variables:
/// - `NODE_FORWARDER_LISTEN_ADDR`: Override listen address
/// - `NODE_FORWARDER_UPSTREAM_ADDR`: Override upstream address
/// - `NODE_FORWARDER_LOG_LEVEL`: Override log level
///
/// # Errors
///
/// Returns `ConfigError` if loading, parsing, or validation fails.
pub fn load_config_with_env(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let path = path.as_ref();
    let config = if path.exists() {
        load_config(path)?
    } else {
        debug!("No configuration at {:?}, using defaults", path);
        Config::default_config()
    };

    apply_env_overrides(config, |name| std::env::var(name).ok())
}

/// Apply overrides from `lookup` and re-validate
fn apply_env_overrides(
    mut config: Config,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<Config, ConfigError> {
    if let Some(addr) = lookup(ENV_LISTEN_ADDR) {
        config.listen.address = addr.parse().map_err(|_| ConfigError::EnvError {
            name: ENV_LISTEN_ADDR.into(),
            reason: format!("Invalid socket address: {addr}"),
        })?;
        debug!("Listen address overridden to {}", config.listen.address);
    }

    if let Some(addr) = lookup(ENV_UPSTREAM_ADDR) {
        config.upstream.address = addr;
        debug!("Upstream address overridden to {}", config.upstream.address);
    }

    if let Some(level) = lookup(ENV_LOG_LEVEL) {
        config.log.level = level;
        debug!("Log level overridden to {}", config.log.level);
    }

    config.validate()?;

    Ok(config)
}

/// Create a default configuration file at the given path
///
/// # Errors
///
/// Returns `ConfigError` if the file cannot be written.
pub fn create_default_config(path: impl AsRef<Path>) -> Result<(), ConfigError> {
    let config = Config::default_config();
    let json = serde_json::to_string_pretty(&config)
        .map_err(|e| ConfigError::ParseError(format!("Failed to serialize config: {e}")))?;

    std::fs::write(path, json)?;
    Ok(())
}
