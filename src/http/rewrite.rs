//! Request head rewriting
//!
//! Produces the head sent upstream:
//!
//! ```text
//! <METHOD> <target as received> HTTP/1.1
//! Host: <effective host>
//! <marker name>: <marker value>
//! <every other original header, in order>
//!
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::RequestHead;
use crate::config::ForwardConfig;

/// Diagnostic header identifying requests that passed through the forwarder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MarkerHeader {
    /// Header name
    pub name: String,
    /// Header value
    pub value: String,
}

impl MarkerHeader {
    /// Create a marker header
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

impl From<&ForwardConfig> for MarkerHeader {
    fn from(config: &ForwardConfig) -> Self {
        Self::new(&config.marker_header, &config.marker_value)
    }
}

impl Default for MarkerHeader {
    fn default() -> Self {
        Self::from(&ForwardConfig::default())
    }
}

/// Build the rewritten request head.
///
/// Every original `Host` header is dropped in favour of a single line
/// carrying `host`. Other names and values are copied byte for byte.
#[must_use]
pub fn build_forward_head(head: &RequestHead, host: &str, marker: &MarkerHeader) -> Bytes {
    let estimated = head.method.len()
        + head.target.len()
        + host.len()
        + marker.name.len()
        + marker.value.len()
        + head
            .headers
            .iter()
            .map(|h| h.name.len() + h.value.len() + 4)
            .sum::<usize>()
        + 64;

    let mut out = BytesMut::with_capacity(estimated);

    out.put_slice(head.method.as_bytes());
    out.put_u8(b' ');
    out.put_slice(head.target.as_bytes());
    out.put_slice(b" HTTP/1.1\r\n");

    put_header(&mut out, b"Host", host.as_bytes());
    put_header(&mut out, marker.name.as_bytes(), marker.value.as_bytes());

    for header in head.headers.iter().filter(|h| !h.is("host")) {
        put_header(&mut out, header.name.as_bytes(), &header.value);
    }

    out.put_slice(b"\r\n");
    out.freeze()
}

fn put_header(out: &mut BytesMut, name: &[u8], value: &[u8]) {
    out.put_slice(name);
    out.put_slice(b": ");
    out.put_slice(value);
    out.put_slice(b"\r\n");
}
