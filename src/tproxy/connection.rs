//! TPROXY connection representation
//!
//! This module provides the `TproxyConnection` type that wraps an accepted
//! TCP connection with its (optional) original destination.

use std::net::SocketAddr;

use tokio::net::TcpStream;
use tracing::debug;

use super::socket::recover_original_dst;

/// A TPROXY-redirected TCP connection
///
/// The original destination is recovered from the kernel via
/// `SO_ORIGINAL_DST` when the connection is created; it is `None` when the
/// connection was not redirected.
#[derive(Debug)]
pub struct TproxyConnection {
    /// The underlying TCP stream
    stream: TcpStream,

    /// Client's address (source)
    client_addr: SocketAddr,

    /// Original destination address (where the client wanted to connect)
    original_dst: Option<SocketAddr>,
}

impl TproxyConnection {
    /// Create a new TPROXY connection from an accepted stream.
    ///
    /// Original destination recovery happens here, before anything reads
    /// from the stream. A failed lookup is not an error.
    pub fn new(stream: TcpStream, client_addr: SocketAddr) -> Self {
        let original_dst = recover_original_dst(&stream);

        match original_dst {
            Some(dst) => debug!("TPROXY connection: {} -> {} (original)", client_addr, dst),
            None => debug!("Connection from {} has no original destination", client_addr),
        }

        Self {
            stream,
            client_addr,
            original_dst,
        }
    }

    /// Create a TPROXY connection with a pre-known destination.
    ///
    /// This is useful for testing or when the destination is known through
    /// other means.
    pub fn with_destination(
        stream: TcpStream,
        client_addr: SocketAddr,
        original_dst: Option<SocketAddr>,
    ) -> Self {
        Self {
            stream,
            client_addr,
            original_dst,
        }
    }

    /// Consume the connection and return the underlying stream
    #[must_use]
    pub fn into_stream(self) -> TcpStream {
        self.stream
    }

    /// Get the client's source address
    #[must_use]
    pub const fn client_addr(&self) -> SocketAddr {
        self.client_addr
    }

    /// Get the original destination address, if one was recovered
    #[must_use]
    pub const fn original_dst(&self) -> Option<SocketAddr> {
        self.original_dst
    }
}
