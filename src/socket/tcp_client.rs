use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream};
use std::time::Duration;
use anyhow::bail;
use tracing::debug;

use crate::socket::PeerSocket;

/// Non-blocking stream connection to a peer
#[derive(Debug)]
pub struct TcpClient {
    peer_addr: SocketAddr,
    stream: Option<TcpStream>,
}

impl TcpClient {
    pub fn connect(peer_addr: SocketAddr, timeout: Duration) -> anyhow::Result<TcpClient> {
        let stream = TcpStream::connect_timeout(&peer_addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_nonblocking(true)?;

        debug!("TCP connection to {:?} established", peer_addr);
        Ok(TcpClient {
            peer_addr,
            stream: Some(stream),
        })
    }
}

impl PeerSocket for TcpClient {
    fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        let Some(stream) = &mut self.stream else {
            bail!("TCP connection to {:?} is closed", self.peer_addr);
        };

        match stream.write(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn recv(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        let Some(stream) = &mut self.stream else {
            bail!("TCP connection to {:?} is closed", self.peer_addr);
        };
        if buf.is_empty() {
            return Ok(0);
        }

        match stream.read(buf) {
            // NB: a read of 0 bytes on a stream socket with a non-empty buffer means EOF
            Ok(0) => bail!("TCP connection closed by {:?}", self.peer_addr),
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::WouldBlock || e.kind() == ErrorKind::Interrupted => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            debug!("closing TCP connection to {:?}", self.peer_addr);
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::net::TcpListener;
    use std::thread::sleep;
    use super::*;

    fn recv_with_retry(client: &mut TcpClient, buf: &mut [u8]) -> anyhow::Result<usize> {
        for _ in 0..200 {
            let n = client.recv(buf)?;
            if n > 0 {
                return Ok(n);
            }
            sleep(Duration::from_millis(5));
        }
        Ok(0)
    }

    #[test]
    fn test_send_recv_disconnect() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();

        let mut client = TcpClient::connect(addr, Duration::from_secs(1)).unwrap();
        let (mut server_side, _) = listener.accept().unwrap();

        let mut buf = [0u8; 16];
        assert_eq!(client.recv(&mut buf).unwrap(), 0);

        assert_eq!(client.send(b"ping").unwrap(), 4);
        let mut received = [0u8; 4];
        server_side.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"ping");

        server_side.write_all(b"pong").unwrap();
        assert_eq!(recv_with_retry(&mut client, &mut buf).unwrap(), 4);
        assert_eq!(&buf[..4], b"pong");

        drop(server_side);
        let mut closed = false;
        for _ in 0..200 {
            if client.recv(&mut buf).is_err() {
                closed = true;
                break;
            }
            sleep(Duration::from_millis(5));
        }
        assert!(closed);

        client.disconnect();
        assert!(client.send(b"x").is_err());
    }
}
