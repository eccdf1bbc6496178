//! TPROXY module for transparent proxying
//!
//! This module provides the inbound half of the forwarder: a listening socket
//! that accepts kernel-redirected connections, and recovery of each
//! connection's original destination.
//!
//! # IPv4 Only
//!
//! Original destination recovery handles IPv4 only. IPv6 connections are
//! accepted but report no original destination.
//!
//! # Requirements
//!
//! - Linux kernel with TPROXY support
//! - `CAP_NET_ADMIN` capability (or root) for `IP_TRANSPARENT`
//! - iptables/nftables rules steering traffic to the listen port
//!
//! ## Example iptables Setup
//!
//! ```bash
//! ip rule add fwmark 0x1 lookup 100
//! ip route add local 0.0.0.0/0 dev lo table 100
//!
//! iptables -t mangle -A PREROUTING -p tcp --dport 80 -j TPROXY \
//!     --on-port 15001 --tproxy-mark 0x1
//! ```
//!
//! # Usage
//!
//! ```no_run
//! use node_forwarder::tproxy::TproxyListener;
//! use node_forwarder::config::ListenConfig;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let listener = TproxyListener::bind(&ListenConfig::default())?;
//!
//! loop {
//!     let conn = listener.accept().await?;
//!     println!("TCP: {} -> {:?}", conn.client_addr(), conn.original_dst());
//! }
//! # }
//! ```
//!
//! # Troubleshooting
//!
//! ## Permission Denied Errors
//!
//! TPROXY requires `CAP_NET_ADMIN`. Run as root or with:
//! ```bash
//! setcap cap_net_admin+ep ./node-forwarder
//! ```

mod connection;
mod listener;
mod socket;

pub use connection::TproxyConnection;
pub use listener::TproxyListener;
pub use socket::{
    create_tproxy_tcp_socket, decode_original_dst, get_original_dst, has_net_admin_capability,
    is_root, recover_original_dst, IP_TRANSPARENT, SO_ORIGINAL_DST,
};
