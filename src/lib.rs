//! node-forwarder: transparent HTTP/1.1 forwarder
//!
//! This crate accepts TPROXY-redirected TCP connections on Linux, reads one
//! HTTP/1.x request head from each, rewrites it and relays the connection to
//! a single fixed upstream.
//!
//! # Features
//!
//! - **TPROXY Support**: `IP_TRANSPARENT` listener with `SO_ORIGINAL_DST` recovery
//! - **Host Normalization**: Missing `Host` headers are filled from the
//!   original destination
//! - **Marker Header**: Every forwarded request carries a diagnostic header
//! - **Opaque Relay**: Bodies and responses pass through byte for byte
//!
//! # Architecture
//!
//! ```text
//! Client → iptables TPROXY → node-forwarder → upstream
//!                               ↓
//!                     SO_ORIGINAL_DST lookup
//!                               ↓
//!                    parse + rewrite one head
//! ```
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use node_forwarder::config::load_config;
//! use node_forwarder::forwarder::{run_accept_loop, ForwarderContext};
//! use node_forwarder::tproxy::TproxyListener;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = load_config("/etc/node-forwarder/config.json")?;
//!
//! let ctx = Arc::new(ForwarderContext::from_config(&config));
//! let listener = TproxyListener::bind(&config.listen)?;
//!
//! run_accept_loop(listener, ctx).await;
//! # Ok(())
//! # }
//! ```
//!
//! # Modules
//!
//! - [`config`]: Configuration types and loading
//! - [`error`]: Error types and failure classes
//! - [`forwarder`]: Sessions, upstream dialing and the accept loop
//! - [`http`]: Request head parsing and rewriting
//! - [`io`]: Client/upstream byte relay
//! - [`tproxy`]: TPROXY socket and listener

#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

pub mod config;
pub mod error;
pub mod forwarder;
pub mod http;
pub mod io;
pub mod tproxy;

// Re-export commonly used types at the crate root
pub use config::{Config, ForwardConfig, ListenConfig, UpstreamConfig};
pub use error::{ConfigError, FailureClass, ForwarderError, SessionError, TproxyError};
pub use forwarder::{
    handle_session, run_accept_loop, ForwarderContext, SessionOutcome, SessionPhase,
    UpstreamDialer,
};
pub use http::{build_forward_head, effective_host, read_request_head, MarkerHeader, RequestHead};
pub use io::{relay, RelayStats};
pub use tproxy::{TproxyConnection, TproxyListener};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
