//! Shared per-process forwarding settings

use std::time::Duration;

use super::upstream::UpstreamDialer;
use crate::config::Config;
use crate::http::MarkerHeader;

/// Immutable settings shared by every session.
///
/// Built once from the configuration and handed to sessions behind an `Arc`.
/// Sessions only read from it.
#[derive(Debug, Clone)]
pub struct ForwarderContext {
    /// Dialer for the fixed upstream
    pub dialer: UpstreamDialer,

    /// Header added to every forwarded request
    pub marker: MarkerHeader,

    /// Maximum request head size
    pub max_head_bytes: usize,

    /// Deadline for the request head, if any
    pub request_timeout: Option<Duration>,

    /// Relay idle timeout, if any
    pub idle_timeout: Option<Duration>,
}

impl ForwarderContext {
    /// Build the context from a validated configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            dialer: UpstreamDialer::new(&config.upstream),
            marker: MarkerHeader::from(&config.forward),
            max_head_bytes: config.forward.max_head_bytes,
            request_timeout: config.forward.request_timeout(),
            idle_timeout: config.forward.idle_timeout(),
        }
    }

    /// Context with default forwarding settings and the given dialer
    pub fn with_dialer(dialer: UpstreamDialer) -> Self {
        Self {
            dialer,
            ..Self::from_config(&Config::default())
        }
    }
}
