//! HTTP/1.x request handling
//!
//! Only the request head is interpreted. The forwarder reads one head,
//! rewrites it for the upstream and hands everything else to the byte relay.
//!
//! # Rewritten Head
//!
//! - The request line keeps the method and target, with the protocol
//!   always written as `HTTP/1.1`
//! - `Host` carries the effective host (see [`effective_host`])
//! - A marker header follows `Host`
//! - All other headers keep their order, case and repeats

mod request;
mod rewrite;

pub use request::{effective_host, read_request_head, BodyFraming, HeaderField, RequestHead};
pub use rewrite::{build_forward_head, MarkerHeader};
