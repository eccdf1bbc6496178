//! Upstream dialing
//!
//! Every session opens its own connection to the one configured upstream.
//! There is no pooling, retry or failover: a failed dial ends the session.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, trace};

use crate::config::UpstreamConfig;
use crate::error::SessionError;

/// Connects sessions to the fixed upstream endpoint
#[derive(Debug, Clone)]
pub struct UpstreamDialer {
    /// Upstream `host:port`; the host may be a DNS name
    address: String,

    /// Upper bound for name resolution plus TCP handshake
    connect_timeout: Duration,
}

impl UpstreamDialer {
    /// Create a dialer from the upstream configuration
    pub fn new(config: &UpstreamConfig) -> Self {
        Self::with_timeout(config.address.clone(), config.connect_timeout())
    }

    /// Create a dialer for an explicit address and timeout
    pub fn with_timeout(address: impl Into<String>, connect_timeout: Duration) -> Self {
        Self {
            address: address.into(),
            connect_timeout,
        }
    }

    /// Get the upstream address
    #[must_use]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Get the connect timeout
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        self.connect_timeout
    }

    /// Open a new connection to the upstream.
    ///
    /// `TCP_NODELAY` is enabled on the returned stream.
    ///
    /// # Errors
    ///
    /// - `SessionError::UpstreamConnect` if resolution or the TCP connect fails
    /// - `SessionError::UpstreamTimeout` if the connect timeout elapses first
    pub async fn dial(&self) -> Result<TcpStream, SessionError> {
        trace!("Dialing upstream {}", self.address);

        let stream = match timeout(self.connect_timeout, TcpStream::connect(self.address.as_str()))
            .await
        {
            Ok(Ok(stream)) => stream,
            Ok(Err(source)) => {
                return Err(SessionError::UpstreamConnect {
                    addr: self.address.clone(),
                    source,
                });
            }
            Err(_) => {
                return Err(SessionError::UpstreamTimeout {
                    addr: self.address.clone(),
                    timeout_ms: u64::try_from(self.connect_timeout.as_millis())
                        .unwrap_or(u64::MAX),
                });
            }
        };

        if let Err(e) = stream.set_nodelay(true) {
            debug!("Failed to set TCP_NODELAY on upstream connection: {}", e);
        }

        Ok(stream)
    }
}
