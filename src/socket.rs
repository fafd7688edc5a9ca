mod tcp_client;
mod udp_client;

pub use tcp_client::TcpClient;
pub use udp_client::UdpClient;

#[cfg(test)] use mockall::automock;
use std::net::SocketAddr;
use std::time::Duration;
use num_enum::{IntoPrimitive, TryFromPrimitive};

/// The kind of link a peer offers. It determines both the socket type and the framing:
///  stream connections carry framed messages, datagram connections carry one message per
///  datagram.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Protocol {
    Stream = 0,
    Datagram = 1,
}

/// This is the abstraction of a single connected socket, introduced to decouple the transport
///  logic from actual network I/O and to facilitate mocking it away for testing.
///
/// All operations are non-blocking.
#[cfg_attr(test, automock)]
pub trait PeerSocket: Send + 'static {
    /// Returns the number of bytes actually handed to the network, which may be less than
    ///  `buf.len()` if the socket can not take more data right now.
    fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize>;

    /// Returns the number of bytes received, `0` if no data is available right now. An error
    ///  means that the link is broken.
    fn recv(&mut self, buf: &mut [u8]) -> anyhow::Result<usize>;

    fn disconnect(&mut self);
}

/// Creates connected sockets
#[cfg_attr(test, automock)]
pub trait SocketFactory: Send + 'static {
    fn connect(&self, protocol: Protocol, addr: SocketAddr) -> anyhow::Result<Box<dyn PeerSocket>>;
}

/// [SocketFactory] based on the standard library's TCP and UDP sockets
#[derive(Debug, Clone)]
pub struct NetSocketFactory {
    connect_timeout: Duration,
}

impl NetSocketFactory {
    pub fn new(connect_timeout: Duration) -> NetSocketFactory {
        NetSocketFactory { connect_timeout }
    }
}

impl SocketFactory for NetSocketFactory {
    fn connect(&self, protocol: Protocol, addr: SocketAddr) -> anyhow::Result<Box<dyn PeerSocket>> {
        match protocol {
            Protocol::Stream => Ok(Box::new(TcpClient::connect(addr, self.connect_timeout)?)),
            Protocol::Datagram => Ok(Box::new(UdpClient::connect(addr)?)),
        }
    }
}
