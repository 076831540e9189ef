// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 naskel.com

//! Broadcast UDP socket construction for CHIRP beacons.

use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::{SocketAddr, UdpSocket};
use std::time::Duration;

/// Create a UDP socket bound to `bind_addr` with broadcast enabled.
///
/// `SO_REUSEADDR` (and `SO_REUSEPORT` on Unix) allow several constellation
/// processes on one machine to share the well-known CHIRP port. A short read
/// timeout keeps the receive loop responsive to shutdown.
pub fn broadcast_socket(bind_addr: SocketAddr) -> io::Result<UdpSocket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;
    socket.set_reuse_address(true)?;
    #[cfg(unix)]
    socket.set_reuse_port(true)?;
    socket.set_broadcast(true)?;
    socket.bind(&bind_addr.into())?;

    let socket: UdpSocket = socket.into();
    socket.set_read_timeout(Some(Duration::from_millis(100)))?;
    Ok(socket)
}
