//! Best-effort local IP address discovery, used only for the receiver's
//! startup hint (the command to paste into the sending host's shell).
//!
//! A UDP "connect" never actually sends a packet; it just asks the kernel to
//! pick the outbound interface and local address it would use to reach the
//! given remote address, which is a common way to guess a host's
//! LAN-facing IP without depending on any particular interface name.

use std::net::UdpSocket;

/// Returns `None` if the host has no route to any network (e.g. fully
/// offline), in which case the caller should fall back to a placeholder.
pub fn local_ip_address() -> Option<String> {
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect(("8.8.8.8", 1)).ok()?;
    socket.local_addr().ok().map(|addr| addr.ip().to_string())
}
