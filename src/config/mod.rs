//! Configuration module for node-forwarder
//!
//! This module provides configuration types and loading utilities.
//!
//! # Example
//!
//! ```no_run
//! use node_forwarder::config::load_config;
//!
//! let config = load_config("/etc/node-forwarder/config.json").unwrap();
//! println!("Forwarding to {}", config.upstream.address);
//! ```

mod loader;
mod types;

pub use loader::{
    create_default_config, load_config, load_config_str, load_config_with_env, ENV_LISTEN_ADDR,
    ENV_LOG_LEVEL, ENV_UPSTREAM_ADDR,
};
pub use types::{Config, ForwardConfig, ListenConfig, LogConfig, UpstreamConfig, MIN_HEAD_BYTES};
