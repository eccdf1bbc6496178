//! TPROXY socket utilities
//!
//! This module provides low-level socket operations for TPROXY transparent proxying.
//! Key capabilities:
//! - `IP_TRANSPARENT`: Allows the listener to accept connections addressed to
//!   foreign (non-local) destinations
//! - `SO_ORIGINAL_DST`: Retrieves the original destination of a redirected
//!   TCP connection
//!
//! All knowledge of the kernel's binary address layout is confined to
//! [`decode_original_dst`].

use std::io;
use std::mem;
use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::os::unix::io::{AsRawFd, RawFd};

use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::TcpStream;
use tracing::{debug, trace};

use crate::error::TproxyError;

/// Linux kernel constant: `IP_TRANSPARENT` socket option (`SOL_IP` level)
/// Allows the socket to:
/// 1. Bind to non-local addresses
/// 2. Accept TPROXY-redirected connections
pub const IP_TRANSPARENT: libc::c_int = 19;

/// Linux kernel constant: `SO_ORIGINAL_DST` (`SOL_IP` level)
/// Used with getsockopt to retrieve the original destination address
/// from a TPROXY-redirected TCP connection.
pub const SO_ORIGINAL_DST: libc::c_int = 80;

/// Size of the `sockaddr_in` the kernel writes for `SO_ORIGINAL_DST`
const SOCKADDR_IN_LEN: usize = mem::size_of::<libc::sockaddr_in>();

/// Create a TCP socket with `IP_TRANSPARENT` enabled for TPROXY.
///
/// # Arguments
///
/// * `reuse_port` - Also enable `SO_REUSEPORT`
///
/// # Errors
///
/// Returns `TproxyError::SocketCreation` if socket creation fails.
/// Returns `TproxyError::PermissionDenied` if `IP_TRANSPARENT` needs
/// `CAP_NET_ADMIN`, `TproxyError::SocketOption` for any other option failure.
pub fn create_tproxy_tcp_socket(reuse_port: bool) -> Result<Socket, TproxyError> {
    let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))
        .map_err(|e| TproxyError::SocketCreation(e.to_string()))?;

    set_ip_transparent(&socket)?;

    // Quick restart while old connections linger in TIME_WAIT
    socket
        .set_reuse_address(true)
        .map_err(|e| TproxyError::socket_option("SO_REUSEADDR", e.to_string()))?;

    if reuse_port {
        socket
            .set_reuse_port(true)
            .map_err(|e| TproxyError::socket_option("SO_REUSEPORT", e.to_string()))?;
    }

    // Set non-blocking for tokio compatibility
    socket
        .set_nonblocking(true)
        .map_err(|e| TproxyError::socket_option("O_NONBLOCK", e.to_string()))?;

    debug!("Created TPROXY TCP socket with IP_TRANSPARENT enabled");
    Ok(socket)
}

/// Set `IP_TRANSPARENT` socket option.
///
/// # Errors
///
/// Returns `TproxyError::SocketOption` if setsockopt fails.
/// Returns `TproxyError::PermissionDenied` if `CAP_NET_ADMIN` is required.
fn set_ip_transparent(socket: &Socket) -> Result<(), TproxyError> {
    let fd = socket.as_raw_fd();
    let one: libc::c_int = 1;

    // Safety: fd is owned by `socket` and `one` outlives the call
    let ret = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_IP,
            IP_TRANSPARENT,
            std::ptr::addr_of!(one).cast::<libc::c_void>(),
            mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EPERM) {
            return Err(TproxyError::PermissionDenied);
        }
        return Err(TproxyError::socket_option("IP_TRANSPARENT", err.to_string()));
    }

    Ok(())
}

/// Get the original destination address from a TPROXY TCP connection.
///
/// # Arguments
///
/// * `fd` - Raw file descriptor of the accepted TCP connection
///
/// # Errors
///
/// Returns `TproxyError::OriginalDstError` if:
/// - The socket is not a redirected connection (ENOPROTOOPT, ENOENT)
/// - getsockopt fails for any other reason
/// - The kernel returned something other than an IPv4 address
pub fn get_original_dst(fd: RawFd) -> Result<SocketAddr, TproxyError> {
    let mut raw = [0u8; SOCKADDR_IN_LEN];
    let mut len = SOCKADDR_IN_LEN as libc::socklen_t;

    // Safety: `raw` is writable for `len` bytes and the kernel never writes past `len`
    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_IP,
            SO_ORIGINAL_DST,
            raw.as_mut_ptr().cast::<libc::c_void>(),
            &raw mut len,
        )
    };

    if ret != 0 {
        let err = io::Error::last_os_error();
        if matches!(err.raw_os_error(), Some(libc::ENOPROTOOPT | libc::ENOENT)) {
            return Err(TproxyError::OriginalDstError(
                "SO_ORIGINAL_DST not available - not a redirected connection?".into(),
            ));
        }
        return Err(TproxyError::OriginalDstError(format!(
            "getsockopt SO_ORIGINAL_DST failed: {err}"
        )));
    }

    decode_original_dst(&raw[..len as usize])
        .map(SocketAddr::V4)
        .ok_or_else(|| {
            TproxyError::OriginalDstError("SO_ORIGINAL_DST returned a non-IPv4 address".into())
        })
}

/// Decode the `sockaddr_in` written by `SO_ORIGINAL_DST`.
///
/// Layout: 2-byte address family (host byte order), 2-byte port (network
/// byte order), 4-byte IPv4 address (network byte order), zero padding.
/// Returns `None` for a short buffer or a family other than `AF_INET`.
#[must_use]
pub fn decode_original_dst(raw: &[u8]) -> Option<SocketAddrV4> {
    let raw: &[u8; 8] = raw.get(..8)?.try_into().ok()?;

    let family = u16::from_ne_bytes([raw[0], raw[1]]);
    if libc::c_int::from(family) != libc::AF_INET {
        return None;
    }

    let port = u16::from_be_bytes([raw[2], raw[3]]);
    let ip = Ipv4Addr::new(raw[4], raw[5], raw[6], raw[7]);

    Some(SocketAddrV4::new(ip, port))
}

/// Recover the original destination of an accepted stream, if any.
///
/// This is best-effort: connections that were not redirected by the kernel
/// report `None` and the session proceeds without it. Must run before a
/// buffered reader is attached to the stream.
#[must_use]
pub fn recover_original_dst(stream: &TcpStream) -> Option<SocketAddr> {
    match get_original_dst(stream.as_raw_fd()) {
        Ok(addr) => Some(addr),
        Err(e) => {
            trace!("Original destination unavailable: {}", e);
            None
        }
    }
}

/// Check if the current process has `CAP_NET_ADMIN` capability.
///
/// TPROXY requires `CAP_NET_ADMIN` for setting `IP_TRANSPARENT`.
#[must_use]
pub fn has_net_admin_capability() -> bool {
    // Try to create a socket with IP_TRANSPARENT as a capability test
    match create_tproxy_tcp_socket(false) {
        Ok(_) => true,
        Err(TproxyError::PermissionDenied) => false,
        // Other errors don't indicate missing capability
        Err(_) => true,
    }
}

/// Check if running as root (effective UID = 0).
#[must_use]
pub fn is_root() -> bool {
    // Safety: geteuid has no preconditions and cannot fail
    unsafe { libc::geteuid() == 0 }
}
