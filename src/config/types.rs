//! Configuration types for node-forwarder
//!
//! Configuration is loaded once at startup and never mutated afterwards.
//! Every section has defaults matching the stock deployment, so an empty
//! JSON object is a valid configuration.

use std::net::SocketAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Listen configuration for the TPROXY inbound
    #[serde(default)]
    pub listen: ListenConfig,

    /// The single upstream every session is forwarded to
    #[serde(default)]
    pub upstream: UpstreamConfig,

    /// Request rewriting and stall protection
    #[serde(default)]
    pub forward: ForwardConfig,

    /// Logging configuration
    #[serde(default)]
    pub log: LogConfig,
}

impl Config {
    /// Validate the configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if validation fails.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen.validate()?;
        self.upstream.validate()?;
        self.forward.validate()?;
        Ok(())
    }

    /// Create the default configuration
    #[must_use]
    pub fn default_config() -> Self {
        Self::default()
    }
}

/// Listen configuration for the TPROXY inbound
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ListenConfig {
    /// Listen address (e.g., "0.0.0.0:15001")
    #[serde(default = "default_listen_addr")]
    pub address: SocketAddr,

    /// TCP accept backlog
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Enable SO_REUSEPORT in addition to SO_REUSEADDR
    #[serde(default)]
    pub reuse_port: bool,
}

impl ListenConfig {
    /// Validate listen configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the backlog is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.backlog == 0 {
            return Err(ConfigError::ValidationError(
                "listen.backlog must be greater than 0".into(),
            ));
        }

        Ok(())
    }
}

impl Default for ListenConfig {
    fn default() -> Self {
        Self {
            address: default_listen_addr(),
            backlog: default_backlog(),
            reuse_port: false,
        }
    }
}

/// Upstream configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Upstream `host:port`; the host may be a DNS name
    #[serde(default = "default_upstream_addr")]
    pub address: String,

    /// Connect timeout in milliseconds
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

impl UpstreamConfig {
    /// Validate upstream configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the address has no host or
    /// no valid port, or the connect timeout is zero.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some((host, port)) = self.address.rsplit_once(':') else {
            return Err(ConfigError::ValidationError(format!(
                "upstream.address '{}' must be host:port",
                self.address
            )));
        };

        if host.trim_matches(['[', ']']).is_empty() {
            return Err(ConfigError::ValidationError(format!(
                "upstream.address '{}' has an empty host",
                self.address
            )));
        }

        if port.parse::<u16>().map_or(true, |p| p == 0) {
            return Err(ConfigError::ValidationError(format!(
                "upstream.address '{}' has an invalid port",
                self.address
            )));
        }

        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::ValidationError(
                "upstream.connect_timeout_ms must be greater than 0".into(),
            ));
        }

        Ok(())
    }

    /// Get connect timeout as Duration
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            address: default_upstream_addr(),
            connect_timeout_ms: default_connect_timeout_ms(),
        }
    }
}

/// Request rewriting configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ForwardConfig {
    /// Name of the diagnostic header added to every forwarded request
    #[serde(default = "default_marker_header")]
    pub marker_header: String,

    /// Value of the diagnostic header
    #[serde(default = "default_marker_value")]
    pub marker_value: String,

    /// Maximum size of the request line plus headers
    #[serde(default = "default_max_head_bytes")]
    pub max_head_bytes: usize,

    /// Deadline for receiving the request head (disabled when absent)
    #[serde(default)]
    pub request_timeout_secs: Option<u64>,

    /// End the relay after this long without traffic (disabled when absent)
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
}

impl ForwardConfig {
    /// Validate forward configuration
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationError` if the marker header is not a
    /// valid HTTP token, collides with `Host`, has a value containing line
    /// breaks, or the head limit is unreasonably small.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.marker_header.is_empty() || !self.marker_header.bytes().all(is_token_byte) {
            return Err(ConfigError::ValidationError(format!(
                "forward.marker_header '{}' is not a valid header name",
                self.marker_header
            )));
        }

        if self.marker_header.eq_ignore_ascii_case("host") {
            return Err(ConfigError::ValidationError(
                "forward.marker_header must not be Host".into(),
            ));
        }

        if self.marker_value.contains(['\r', '\n']) {
            return Err(ConfigError::ValidationError(
                "forward.marker_value must not contain line breaks".into(),
            ));
        }

        if self.max_head_bytes < MIN_HEAD_BYTES {
            return Err(ConfigError::ValidationError(format!(
                "forward.max_head_bytes must be at least {MIN_HEAD_BYTES}"
            )));
        }

        if self.request_timeout_secs == Some(0) || self.idle_timeout_secs == Some(0) {
            return Err(ConfigError::ValidationError(
                "forward timeouts must be greater than 0 when set".into(),
            ));
        }

        Ok(())
    }

    /// Get the request head deadline as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.map(Duration::from_secs)
    }

    /// Get the relay idle timeout as Duration
    #[must_use]
    pub fn idle_timeout(&self) -> Option<Duration> {
        self.idle_timeout_secs.map(Duration::from_secs)
    }
}

impl Default for ForwardConfig {
    fn default() -> Self {
        Self {
            marker_header: default_marker_header(),
            marker_value: default_marker_value(),
            max_head_bytes: default_max_head_bytes(),
            request_timeout_secs: None,
            idle_timeout_secs: None,
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Include target (module path)
    #[serde(default)]
    pub target: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            target: false,
        }
    }
}

/// Smallest accepted `forward.max_head_bytes`
pub const MIN_HEAD_BYTES: usize = 1024;

/// RFC 9110 `tchar`
const fn is_token_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric()
        || matches!(
            b,
            b'!' | b'#' | b'$' | b'%' | b'&' | b'\'' | b'*' | b'+' | b'-' | b'.' | b'^' | b'_'
                | b'`' | b'|' | b'~'
        )
}

// Default value functions for serde
fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 15001))
}

const fn default_backlog() -> u32 {
    1024
}

fn default_upstream_addr() -> String {
    "shared-envoy.mesh-proxy.svc.cluster.local:18080".into()
}

const fn default_connect_timeout_ms() -> u64 {
    2000
}

fn default_marker_header() -> String {
    "x-node-forwarder".into()
}

fn default_marker_value() -> String {
    "tproxy".into()
}

const fn default_max_head_bytes() -> usize {
    1024 * 1024
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "text".into()
}
