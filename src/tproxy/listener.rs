//! TPROXY TCP Listener
//!
//! This module provides a listener for accepting TPROXY-redirected TCP
//! connections with best-effort original destination retrieval.

use std::net::SocketAddr;
use std::os::unix::io::{FromRawFd, IntoRawFd};

use tokio::net::TcpListener;
use tracing::{debug, info};

use super::connection::TproxyConnection;
use super::socket::create_tproxy_tcp_socket;
use crate::config::ListenConfig;
use crate::error::TproxyError;

/// A TPROXY TCP listener that accepts connections with original destination info
#[derive(Debug)]
pub struct TproxyListener {
    /// The underlying tokio TCP listener
    listener: TcpListener,

    /// Listen address
    listen_addr: SocketAddr,
}

impl TproxyListener {
    /// Create and bind a new TPROXY listener.
    ///
    /// `IP_TRANSPARENT` and `SO_REUSEADDR` are set before binding. Without
    /// `IP_TRANSPARENT` the listener cannot see redirected traffic, so any
    /// failure here is fatal for the process.
    ///
    /// # Errors
    ///
    /// Returns `TproxyError` if:
    /// - Socket creation fails
    /// - `CAP_NET_ADMIN` capability is missing
    /// - Binding or listening fails
    pub fn bind(config: &ListenConfig) -> Result<Self, TproxyError> {
        info!("Creating TPROXY TCP listener on {}", config.address);

        let socket = create_tproxy_tcp_socket(config.reuse_port)?;

        socket
            .bind(&config.address.into())
            .map_err(|e| TproxyError::bind(config.address, e.to_string()))?;

        socket
            .listen(i32::try_from(config.backlog).unwrap_or(i32::MAX))
            .map_err(|e| TproxyError::socket_option("listen", e.to_string()))?;

        // Safety: We own the socket and it's a valid listening socket
        let std_listener = unsafe { std::net::TcpListener::from_raw_fd(socket.into_raw_fd()) };

        let listener = TcpListener::from_std(std_listener)
            .map_err(|e| TproxyError::SocketCreation(e.to_string()))?;

        // Port 0 resolves to a real port only after bind
        let listen_addr = listener.local_addr().unwrap_or(config.address);

        info!(
            "TPROXY TCP listener ready on {} (backlog={})",
            listen_addr, config.backlog
        );

        Ok(Self {
            listener,
            listen_addr,
        })
    }

    /// Wrap an already-bound listener.
    ///
    /// The socket is used as-is; unless the caller set `IP_TRANSPARENT`
    /// itself, only connections addressed to a local address arrive and
    /// original destination recovery reports nothing.
    ///
    /// # Errors
    ///
    /// Returns `TproxyError::SocketCreation` if the local address cannot be read.
    pub fn from_listener(listener: TcpListener) -> Result<Self, TproxyError> {
        let listen_addr = listener
            .local_addr()
            .map_err(|e| TproxyError::SocketCreation(e.to_string()))?;

        Ok(Self {
            listener,
            listen_addr,
        })
    }

    /// Accept a new connection.
    ///
    /// The original destination is queried immediately after accept; its
    /// absence does not fail the accept.
    ///
    /// # Errors
    ///
    /// Returns `TproxyError::AcceptError` if the transport-level accept
    /// fails. The listener remains usable.
    pub async fn accept(&self) -> Result<TproxyConnection, TproxyError> {
        let (stream, client_addr) = self
            .listener
            .accept()
            .await
            .map_err(TproxyError::AcceptError)?;

        debug!("Accepted connection from {}", client_addr);

        Ok(TproxyConnection::new(stream, client_addr))
    }

    /// Get the listen address.
    #[must_use]
    pub const fn listen_addr(&self) -> SocketAddr {
        self.listen_addr
    }
}
