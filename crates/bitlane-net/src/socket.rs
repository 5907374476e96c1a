//! UDP transport with socket option plumbing.

use std::{
    io,
    net::{Ipv4Addr, SocketAddr, SocketAddrV4, ToSocketAddrs, UdpSocket},
};

use bitlane_core::Transport;
use socket2::Socket as Socket2;

/// Socket options applied at bind time.
#[derive(Debug, Clone, Default)]
pub struct SocketOptions {
    /// Block on receive when true, otherwise non-blocking.
    pub blocking: bool,
    /// Receive buffer size in bytes (SO_RCVBUF), `None` for the system
    /// default.
    pub recv_buffer_size: Option<usize>,
    /// Send buffer size in bytes (SO_SNDBUF), `None` for the system
    /// default.
    pub send_buffer_size: Option<usize>,
    /// Time-to-live for outgoing packets, `None` for the system default.
    pub ttl: Option<u32>,
}

/// Applies socket options from configuration to a bound UDP socket.
fn apply_socket_options(socket: &UdpSocket, options: &SocketOptions) -> io::Result<()> {
    let socket2 = Socket2::from(socket.try_clone()?);

    if let Some(size) = options.recv_buffer_size {
        socket2.set_recv_buffer_size(size)?;
    }
    if let Some(size) = options.send_buffer_size {
        socket2.set_send_buffer_size(size)?;
    }
    if let Some(ttl) = options.ttl {
        socket.set_ttl(ttl)?;
    }
    Ok(())
}

/// Datagram transport over a UDP socket.
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    blocking: bool,
}

impl UdpTransport {
    /// Binds to the given address with default options (non-blocking).
    pub fn bind<A: ToSocketAddrs>(addresses: A) -> io::Result<Self> {
        Self::bind_with_options(addresses, SocketOptions::default())
    }

    /// Binds to any available port on localhost with default options.
    pub fn bind_any() -> io::Result<Self> {
        let loopback = Ipv4Addr::new(127, 0, 0, 1);
        Self::bind(SocketAddrV4::new(loopback, 0))
    }

    /// Binds to the given address and applies the options.
    pub fn bind_with_options<A: ToSocketAddrs>(
        addresses: A,
        options: SocketOptions,
    ) -> io::Result<Self> {
        let socket = UdpSocket::bind(addresses)?;
        apply_socket_options(&socket, &options)?;
        socket.set_nonblocking(!options.blocking)?;
        Ok(Self { socket, blocking: options.blocking })
    }
}

impl Transport for UdpTransport {
    fn send_packet(&mut self, addr: &SocketAddr, payload: &[u8]) -> io::Result<usize> {
        self.socket.send_to(payload, addr)
    }

    fn receive_packet<'a>(&mut self, buffer: &'a mut [u8]) -> io::Result<(&'a [u8], SocketAddr)> {
        self.socket
            .recv_from(buffer)
            .map(move |(received, address)| (&buffer[..received], address))
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    fn is_blocking(&self) -> bool {
        self.blocking
    }
}
