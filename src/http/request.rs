//! HTTP/1.x request head parsing
//!
//! Reads exactly one request head from a buffered client stream. Header lines
//! are pulled through the reader one at a time, so everything after the
//! blank line (body bytes, pipelined requests) stays in the reader's buffer
//! for the relay that follows.
//!
//! ## HTTP Request Format
//!
//! ```text
//! Method SP Request-Target SP HTTP-Version CRLF
//! Header-Field CRLF
//! ...
//! CRLF
//! [ Message-Body ]
//! ```

use std::net::SocketAddr;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use tracing::trace;

use crate::error::SessionError;

/// One header line, kept exactly as received
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderField {
    /// Header name with its original case
    pub name: String,
    /// Raw header value bytes
    pub value: Vec<u8>,
}

impl HeaderField {
    /// Check the header name, ignoring case
    #[must_use]
    pub fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

/// How the client declared its request body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    /// No body
    None,
    /// `Content-Length` body of this many bytes
    ContentLength(u64),
    /// `Transfer-Encoding` body; passed through by the opaque relay
    Opaque,
}

/// A parsed request line plus headers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    /// Request method (GET, POST, etc.)
    pub method: String,
    /// Request target exactly as received
    pub target: String,
    /// Minor HTTP version (1 for HTTP/1.1, 0 for HTTP/1.0)
    pub version: u8,
    /// Headers in their original order, repeated names kept
    pub headers: Vec<HeaderField>,
}

impl RequestHead {
    /// First value of the named header
    #[must_use]
    pub fn header(&self, name: &str) -> Option<&[u8]> {
        self.headers
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_slice())
    }

    /// The `Host` header value if present and non-blank
    #[must_use]
    pub fn host(&self) -> Option<&str> {
        self.header("host")
            .and_then(|v| std::str::from_utf8(v).ok())
            .map(str::trim)
            .filter(|h| !h.is_empty())
    }

    /// Authority of an absolute-form target (`http://authority/path`)
    #[must_use]
    pub fn target_authority(&self) -> Option<&str> {
        let rest = strip_scheme(&self.target)?;
        let end = rest.find(['/', '?', '#']).unwrap_or(rest.len());
        let authority = &rest[..end];
        // Drop userinfo
        let authority = authority.rsplit_once('@').map_or(authority, |(_, a)| a);
        (!authority.is_empty()).then_some(authority)
    }

    /// Path component of the target, without query or fragment
    #[must_use]
    pub fn path(&self) -> &str {
        let path = match strip_scheme(&self.target) {
            Some(rest) => rest.find('/').map_or("", |i| &rest[i..]),
            None => self.target.as_str(),
        };
        let end = path.find(['?', '#']).unwrap_or(path.len());
        &path[..end]
    }

    /// Body framing declared by the headers
    ///
    /// # Errors
    ///
    /// Returns `SessionError::MalformedRequest` for an unparsable or
    /// conflicting `Content-Length`.
    pub fn body_framing(&self) -> Result<BodyFraming, SessionError> {
        if self.headers.iter().any(|h| h.is("transfer-encoding")) {
            return Ok(BodyFraming::Opaque);
        }

        let mut length: Option<u64> = None;
        for header in self.headers.iter().filter(|h| h.is("content-length")) {
            let value = std::str::from_utf8(&header.value)
                .ok()
                .map(str::trim)
                .filter(|v| !v.is_empty() && v.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|v| v.parse::<u64>().ok())
                .ok_or_else(|| SessionError::malformed("invalid Content-Length"))?;

            match length {
                Some(previous) if previous != value => {
                    return Err(SessionError::malformed("conflicting Content-Length values"));
                }
                _ => length = Some(value),
            }
        }

        Ok(match length {
            None | Some(0) => BodyFraming::None,
            Some(n) => BodyFraming::ContentLength(n),
        })
    }
}

/// Host to put on the forwarded request.
///
/// Order of preference: the authority of an absolute-form target (which
/// overrides any `Host` header), the request's `Host` header, the recovered
/// original destination. Empty when none is available.
#[must_use]
pub fn effective_host(head: &RequestHead, original_dst: Option<SocketAddr>) -> String {
    if let Some(authority) = head.target_authority() {
        return authority.to_string();
    }

    if let Some(host) = head.host() {
        return host.to_string();
    }

    original_dst.map(|dst| dst.to_string()).unwrap_or_default()
}

/// Read one request head from `reader`.
///
/// Consumes the head up to and including the terminating blank line and
/// nothing more.
///
/// # Errors
///
/// - `SessionError::ClientClosed` if the stream ends before the blank line
/// - `SessionError::HeadTooLarge` if the head exceeds `max_head_bytes`
/// - `SessionError::MalformedRequest` if the head does not parse
/// - `SessionError::ClientIo` on a read error
pub async fn read_request_head<R>(
    reader: &mut R,
    max_head_bytes: usize,
) -> Result<RequestHead, SessionError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::with_capacity(1024);
    let mut lines = 0usize;

    loop {
        let remaining = max_head_bytes.saturating_sub(buf.len());
        if remaining == 0 {
            return Err(SessionError::HeadTooLarge {
                limit: max_head_bytes,
            });
        }

        let start = buf.len();
        let n = (&mut *reader)
            .take(remaining as u64)
            .read_until(b'\n', &mut buf)
            .await?;

        if n == 0 {
            return Err(SessionError::ClientClosed);
        }

        if !buf.ends_with(b"\n") {
            if buf.len() >= max_head_bytes {
                return Err(SessionError::HeadTooLarge {
                    limit: max_head_bytes,
                });
            }
            return Err(SessionError::ClientClosed);
        }

        let line = &buf[start..];
        if line == b"\r\n" || line == b"\n" {
            if lines == 0 {
                return Err(SessionError::malformed("empty request line"));
            }
            break;
        }
        lines += 1;
    }

    trace!("Read request head: {} bytes, {} lines", buf.len(), lines);
    parse_request_head(&buf, lines)
}

/// Parse a complete request head with `httparse`
///
/// `lines` counts the request line plus header lines and sizes the header
/// table, so no fixed header limit applies.
fn parse_request_head(buf: &[u8], lines: usize) -> Result<RequestHead, SessionError> {
    let mut headers = vec![httparse::EMPTY_HEADER; lines];
    let mut req = httparse::Request::new(&mut headers);

    match req.parse(buf) {
        Ok(httparse::Status::Complete(_)) => {}
        Ok(httparse::Status::Partial) => {
            return Err(SessionError::malformed("incomplete request head"));
        }
        Err(e) => return Err(SessionError::malformed(e.to_string())),
    }

    let (Some(method), Some(target), Some(version)) = (req.method, req.path, req.version) else {
        return Err(SessionError::malformed("incomplete request line"));
    };

    let headers: Vec<HeaderField> = req
        .headers
        .iter()
        .map(|h| HeaderField {
            name: h.name.to_string(),
            value: h.value.to_vec(),
        })
        .collect();

    let mut hosts = headers.iter().filter(|h| h.is("host"));
    if let Some(host) = hosts.next() {
        if hosts.next().is_some() {
            return Err(SessionError::malformed("too many Host headers"));
        }
        if std::str::from_utf8(&host.value).is_err() {
            return Err(SessionError::malformed("malformed Host header"));
        }
    }

    Ok(RequestHead {
        method: method.to_string(),
        target: target.to_string(),
        version,
        headers,
    })
}

/// Strip an `http://` or `https://` prefix, case-insensitively
fn strip_scheme(target: &str) -> Option<&str> {
    ["http://", "https://"].iter().find_map(|scheme| {
        target
            .get(..scheme.len())
            .filter(|prefix| prefix.eq_ignore_ascii_case(scheme))
            .map(|_| &target[scheme.len()..])
    })
}
