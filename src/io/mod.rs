//! I/O utilities for node-forwarder
//!
//! This module provides the byte relay that carries a forwarded connection
//! once its request head has been rewritten.

mod copy;

pub use copy::{relay, RelayStats, DEFAULT_BUFFER_SIZE};
