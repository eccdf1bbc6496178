//! Error types for node-forwarder
//!
//! Every failure belongs to exactly one [`FailureClass`]:
//!
//! | Class | Type | Policy |
//! |-------|------|--------|
//! | fatal at startup | [`ConfigError`], [`TproxyError`] (socket/bind) | abort the process |
//! | recoverable at the accept loop | [`TproxyError::AcceptError`] | log, keep accepting |
//! | terminal for one session | [`SessionError`] | log, close both connections |

use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// How a failure is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// The process cannot do its job and must not start serving
    FatalAtStartup,
    /// One accept failed; the listener keeps running
    RecoverableAtAcceptLoop,
    /// One forwarding session ends; nothing else is affected
    TerminalForSession,
}

impl std::fmt::Display for FailureClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FatalAtStartup => write!(f, "fatal"),
            Self::RecoverableAtAcceptLoop => write!(f, "recoverable"),
            Self::TerminalForSession => write!(f, "session"),
        }
    }
}

/// Top-level error type for node-forwarder
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// Configuration errors (file parsing, validation)
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// TPROXY socket and listener errors
    #[error("TPROXY error: {0}")]
    Tproxy(#[from] TproxyError),

    /// Per-connection forwarding errors
    #[error("Session error: {0}")]
    Session(#[from] SessionError),
}

impl ForwarderError {
    /// Classify this error
    #[must_use]
    pub fn class(&self) -> FailureClass {
        match self {
            Self::Config(e) => e.class(),
            Self::Tproxy(e) => e.class(),
            Self::Session(e) => e.class(),
        }
    }
}

/// Configuration-related errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// File not found or inaccessible
    #[error("Configuration file not found: {path}")]
    FileNotFound { path: String },

    /// JSON parsing error
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Validation error (invalid values, missing required fields)
    #[error("Configuration validation failed: {0}")]
    ValidationError(String),

    /// Environment variable error
    #[error("Environment variable error: {name}: {reason}")]
    EnvError { name: String, reason: String },

    /// I/O error while reading config
    #[error("I/O error reading configuration: {0}")]
    IoError(#[from] io::Error),
}

impl ConfigError {
    /// Config errors always stop startup
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        FailureClass::FatalAtStartup
    }
}

/// TPROXY-related errors
#[derive(Debug, Error)]
pub enum TproxyError {
    /// Failed to create socket
    #[error("Failed to create TPROXY socket: {0}")]
    SocketCreation(String),

    /// Failed to set socket option (IP_TRANSPARENT, etc.)
    #[error("Failed to set socket option {option}: {reason}")]
    SocketOption { option: String, reason: String },

    /// Failed to bind to address
    #[error("Failed to bind to {addr}: {reason}")]
    BindError { addr: SocketAddr, reason: String },

    /// Failed to accept connection
    #[error("Accept error: {0}")]
    AcceptError(#[source] io::Error),

    /// Failed to retrieve original destination
    #[error("Failed to get original destination: {0}")]
    OriginalDstError(String),

    /// Permission denied (CAP_NET_ADMIN required)
    #[error("Permission denied: TPROXY requires CAP_NET_ADMIN capability")]
    PermissionDenied,
}

impl TproxyError {
    /// Classify this error
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        match self {
            Self::AcceptError(_) => FailureClass::RecoverableAtAcceptLoop,
            // Only ever reported to the session, which carries on without it
            Self::OriginalDstError(_) => FailureClass::TerminalForSession,
            Self::SocketCreation(_)
            | Self::SocketOption { .. }
            | Self::BindError { .. }
            | Self::PermissionDenied => FailureClass::FatalAtStartup,
        }
    }

    /// Check if this accept error stems from file descriptor exhaustion
    #[must_use]
    pub fn is_fd_exhaustion(&self) -> bool {
        match self {
            Self::AcceptError(e) => matches!(e.raw_os_error(), Some(libc::EMFILE | libc::ENFILE)),
            _ => false,
        }
    }

    /// Create a socket option error
    pub fn socket_option(option: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::SocketOption {
            option: option.into(),
            reason: reason.into(),
        }
    }

    /// Create a bind error
    pub fn bind(addr: SocketAddr, reason: impl Into<String>) -> Self {
        Self::BindError {
            addr,
            reason: reason.into(),
        }
    }
}

/// Errors that end a single forwarding session
#[derive(Debug, Error)]
pub enum SessionError {
    /// The request line or a header line could not be parsed
    #[error("Malformed HTTP request: {0}")]
    MalformedRequest(String),

    /// The request head did not end within the configured limit
    #[error("Request head exceeds {limit} bytes")]
    HeadTooLarge { limit: usize },

    /// The client closed before a complete request head arrived
    #[error("Client closed the connection before the request head was complete")]
    ClientClosed,

    /// The request head did not arrive in time
    #[error("Timed out reading request head after {timeout_secs}s")]
    RequestTimeout { timeout_secs: u64 },

    /// Dialing the upstream failed
    #[error("Failed to connect to upstream {addr}: {source}")]
    UpstreamConnect {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Dialing the upstream took longer than the connect timeout
    #[error("Connection to upstream {addr} timed out after {timeout_ms}ms")]
    UpstreamTimeout { addr: String, timeout_ms: u64 },

    /// Writing the rewritten head or body to the upstream failed
    #[error("Failed to write request to upstream: {0}")]
    UpstreamWrite(#[source] io::Error),

    /// The client closed before sending the declared body
    #[error("Request body truncated: expected {expected} bytes, received {received}")]
    BodyTruncated { expected: u64, received: u64 },

    /// I/O error while relaying bytes after the request was forwarded
    #[error("Relay error: {0}")]
    Relay(#[source] io::Error),

    /// I/O error while reading from the client
    #[error("Client I/O error: {0}")]
    ClientIo(#[from] io::Error),
}

impl SessionError {
    /// Session errors never outlive their session
    #[must_use]
    pub const fn class(&self) -> FailureClass {
        FailureClass::TerminalForSession
    }

    /// Create a malformed request error
    pub fn malformed(reason: impl Into<String>) -> Self {
        Self::MalformedRequest(reason.into())
    }

    /// Check if this error happened before anything was sent upstream
    #[must_use]
    pub const fn is_parse_failure(&self) -> bool {
        matches!(
            self,
            Self::MalformedRequest(_)
                | Self::HeadTooLarge { .. }
                | Self::ClientClosed
                | Self::RequestTimeout { .. }
        )
    }
}
