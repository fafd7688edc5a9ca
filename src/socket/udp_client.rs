use std::io::ErrorKind;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr, UdpSocket};
use anyhow::bail;
use tracing::debug;

use crate::socket::PeerSocket;

/// Non-blocking UDP socket that is connected to a single peer, i.e. it sends to that peer and
///  only receives datagrams from it.
#[derive(Debug)]
pub struct UdpClient {
    peer_addr: SocketAddr,
    socket: Option<UdpSocket>,
}

impl UdpClient {
    pub fn connect(peer_addr: SocketAddr) -> anyhow::Result<UdpClient> {
        let bind_addr: SocketAddr = if peer_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        }
        else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };

        let socket = UdpSocket::bind(bind_addr)?;
        socket.connect(peer_addr)?;
        socket.set_nonblocking(true)?;

        debug!("UDP socket {:?} connected to {:?}", socket.local_addr()?, peer_addr);
        Ok(UdpClient {
            peer_addr,
            socket: Some(socket),
        })
    }

    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.socket.as_ref()
            .and_then(|s| s.local_addr().ok())
    }
}

impl PeerSocket for UdpClient {
    fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        let Some(socket) = &self.socket else {
            bail!("UDP socket for {:?} is closed", self.peer_addr);
        };

        match socket.send(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let Some(socket) = &self.socket else {
            bail!("UDP socket for {:?} is closed", self.peer_addr);
        };

        match socket.recv(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn disconnect(&mut self) {
        if self.socket.take().is_some() {
            debug!("closing UDP socket for {:?}", self.peer_addr);
        }
    }
}
