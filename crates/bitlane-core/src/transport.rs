//! Transport abstraction for pluggable I/O.

use std::{io::Result, net::SocketAddr};

/// Low-level datagram transport abstraction.
///
/// The connection layer never performs I/O itself; callers wire up a
/// transport (UDP, a test simulator, etc.) and marshal bytes between it and
/// `Connection::write_packet_bytes` / `read_packet_bytes`.
pub trait Transport {
    /// Sends a single datagram to the given address.
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> Result<usize>;

    /// Receives a single datagram into `buffer`, returning the filled slice
    /// and the sender's address.
    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> Result<(&'a [u8], SocketAddr)>;

    /// Returns the local address this transport is bound to.
    fn local_addr(&self) -> Result<SocketAddr>;

    /// Returns whether the transport blocks on receive.
    fn is_blocking(&self) -> bool;
}
