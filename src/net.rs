//! Local network helpers

use std::net::{Ipv4Addr, SocketAddr, UdpSocket};

use crate::types::{ShareError, ShareResult};

/// Outbound IPv4 address of this host
///
/// Connects an unbound UDP socket to a public address and reads back the
/// local end. No packet is sent.
pub fn local_ipv4() -> ShareResult<Ipv4Addr> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.connect((Ipv4Addr::new(8, 8, 8, 8), 80))?;
    match socket.local_addr()? {
        SocketAddr::V4(addr) => Ok(*addr.ip()),
        SocketAddr::V6(addr) => Err(ShareError::Validation(format!(
            "no IPv4 address, got {}",
            addr
        ))),
    }
}

/// Outbound IPv4 address, or loopback when the host has no route
pub fn local_ipv4_or_loopback() -> Ipv4Addr {
    local_ipv4().unwrap_or(Ipv4Addr::LOCALHOST)
}

/// Reject port 0
pub fn validate_port(port: u16) -> ShareResult<u16> {
    if port == 0 {
        return Err(ShareError::Validation("port must be in 1..=65535".to_string()));
    }
    Ok(port)
}
