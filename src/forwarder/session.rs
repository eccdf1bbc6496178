//! Forwarding session
//!
//! One session per accepted connection:
//!
//! ```text
//! Accepted -> DestinationRecovered -> RequestParsed -> Rewritten
//!          -> UpstreamConnected -> Relaying -> Closed
//! ```
//!
//! Destination recovery is optional; every other step must succeed. Any
//! failure closes both connections without sending anything to the client.

use std::fmt;
use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{info, warn};

use super::context::ForwarderContext;
use crate::error::{FailureClass, SessionError};
use crate::http::{build_forward_head, effective_host, read_request_head, BodyFraming};
use crate::io::{relay, RelayStats};
use crate::tproxy::TproxyConnection;

/// Client read buffer; also bounds the body chunk size
const CLIENT_BUFFER_SIZE: usize = 64 * 1024;

/// Last phase a session reached
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SessionPhase {
    /// Connection accepted
    Accepted,
    /// Original destination recovered from the kernel
    DestinationRecovered,
    /// Request head read and parsed
    RequestParsed,
    /// Upstream request head built
    Rewritten,
    /// Upstream connection established
    UpstreamConnected,
    /// Head and declared body sent; relaying opaque bytes
    Relaying,
    /// Upstream finished and both connections were released
    Closed,
}

impl SessionPhase {
    /// Phase name used in log records
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::DestinationRecovered => "destination_recovered",
            Self::RequestParsed => "request_parsed",
            Self::Rewritten => "rewritten",
            Self::UpstreamConnected => "upstream_connected",
            Self::Relaying => "relaying",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Everything known about a session once it ends
#[derive(Debug)]
pub struct SessionOutcome {
    /// Client address
    pub client_addr: SocketAddr,
    /// Recovered original destination
    pub original_dst: Option<SocketAddr>,
    /// Host sent upstream (empty before rewriting)
    pub host: String,
    /// Request method (empty before parsing)
    pub method: String,
    /// Request path without query (empty before parsing)
    pub path: String,
    /// Last phase reached; `Closed` on success
    pub phase: SessionPhase,
    /// Bytes written upstream (head and body included) and to the client
    pub bytes: RelayStats,
    /// Error that ended the session
    pub error: Option<SessionError>,
}

impl SessionOutcome {
    fn new(client_addr: SocketAddr, original_dst: Option<SocketAddr>) -> Self {
        Self {
            client_addr,
            original_dst,
            host: String::new(),
            method: String::new(),
            path: String::new(),
            phase: SessionPhase::Accepted,
            bytes: RelayStats::default(),
            error: None,
        }
    }

    /// Check if the session completed without error
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Failure class of the error that ended the session, if any
    #[must_use]
    pub fn failure_class(&self) -> Option<FailureClass> {
        self.error.as_ref().map(SessionError::class)
    }

    /// Emit the session's single log record
    pub fn log(&self) {
        let orig = self
            .original_dst
            .map_or_else(|| "-".to_string(), |dst| dst.to_string());

        match &self.error {
            None => info!(
                client = %self.client_addr,
                orig = %orig,
                host = %self.host,
                method = %self.method,
                path = %self.path,
                up = self.bytes.client_to_upstream,
                down = self.bytes.upstream_to_client,
                "forwarded"
            ),
            Some(e) => warn!(
                client = %self.client_addr,
                orig = %orig,
                host = %self.host,
                method = %self.method,
                path = %self.path,
                phase = %self.phase,
                up = self.bytes.client_to_upstream,
                down = self.bytes.upstream_to_client,
                class = %e.class(),
                error = %e,
                "session failed"
            ),
        }
    }
}

/// Run one forwarding session to completion.
///
/// The client connection is dropped when this returns, and so is the
/// upstream connection if one was opened. The outcome is returned rather
/// than logged.
pub async fn handle_session(conn: TproxyConnection, ctx: &ForwarderContext) -> SessionOutcome {
    let mut outcome = SessionOutcome::new(conn.client_addr(), conn.original_dst());
    let mut client = BufReader::with_capacity(CLIENT_BUFFER_SIZE, conn.into_stream());

    match forward(&mut client, ctx, &mut outcome).await {
        Ok(()) => outcome.phase = SessionPhase::Closed,
        Err(e) => outcome.error = Some(e),
    }

    outcome
}

async fn forward(
    client: &mut BufReader<TcpStream>,
    ctx: &ForwarderContext,
    outcome: &mut SessionOutcome,
) -> Result<(), SessionError> {
    if outcome.original_dst.is_some() {
        outcome.phase = SessionPhase::DestinationRecovered;
    }

    let head = match ctx.request_timeout {
        Some(limit) => timeout(limit, read_request_head(client, ctx.max_head_bytes))
            .await
            .map_err(|_| SessionError::RequestTimeout {
                timeout_secs: limit.as_secs(),
            })??,
        None => read_request_head(client, ctx.max_head_bytes).await?,
    };
    outcome.phase = SessionPhase::RequestParsed;
    outcome.method.clone_from(&head.method);
    outcome.path = head.path().to_string();

    let framing = head.body_framing()?;
    let host = effective_host(&head, outcome.original_dst);
    let forward_head = build_forward_head(&head, &host, &ctx.marker);
    outcome.host = host;
    outcome.phase = SessionPhase::Rewritten;

    let mut upstream = ctx.dialer.dial().await?;
    outcome.phase = SessionPhase::UpstreamConnected;

    upstream
        .write_all(&forward_head)
        .await
        .map_err(SessionError::UpstreamWrite)?;
    outcome.bytes.client_to_upstream += forward_head.len() as u64;

    if let BodyFraming::ContentLength(len) = framing {
        copy_body(client, &mut upstream, len).await?;
        outcome.bytes.client_to_upstream += len;
    }

    outcome.phase = SessionPhase::Relaying;
    let relayed = relay(client, &mut upstream, ctx.idle_timeout)
        .await
        .map_err(SessionError::Relay)?;
    outcome.bytes.client_to_upstream += relayed.client_to_upstream;
    outcome.bytes.upstream_to_client += relayed.upstream_to_client;

    Ok(())
}

/// Stream exactly `len` body bytes from the buffered client to the upstream
async fn copy_body<R, W>(client: &mut R, upstream: &mut W, len: u64) -> Result<(), SessionError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut remaining = len;

    while remaining > 0 {
        let chunk = client.fill_buf().await?;
        if chunk.is_empty() {
            return Err(SessionError::BodyTruncated {
                expected: len,
                received: len - remaining,
            });
        }

        let n = chunk
            .len()
            .min(usize::try_from(remaining).unwrap_or(usize::MAX));
        upstream
            .write_all(&chunk[..n])
            .await
            .map_err(SessionError::UpstreamWrite)?;
        client.consume(n);
        remaining -= n as u64;
    }

    Ok(())
}
