use std::fmt::{Debug, Formatter};
use std::net::SocketAddr;
use anyhow::bail;
use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::config::TransportConfig;
use crate::frame_codec::{drain_frames, encode_frame, FRAME_OVERHEAD};
use crate::peer_id::PeerId;
use crate::socket::{PeerSocket, Protocol};

/// An active link to a single peer: the socket plus the buffer for reassembling messages
///  from received data.
pub struct PeerConnection<P: PeerId> {
    peer_id: P,
    addr: SocketAddr,
    protocol: Protocol,
    socket: Box<dyn PeerSocket>,

    /// received stream data that is not dispatched yet, i.e. an incomplete frame. This never
    ///  exceeds the configured capacity because reads are limited to the remaining space.
    recv_buf: BytesMut,
    /// scratch buffer that reads go to
    read_buf: Vec<u8>,
    max_payload_len: usize,
}

impl <P: PeerId> Debug for PeerConnection<P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "PeerConnection{{peer:{:?}, addr:{:?}, protocol:{:?}, buffered:{}}}", self.peer_id, self.addr, self.protocol, self.recv_buf.len())
    }
}

impl <P: PeerId> PeerConnection<P> {
    /// NB: `config` must have passed [TransportConfig::validate], i.e. the receive buffer must
    ///      be able to hold at least one frame
    pub fn new(peer_id: P, addr: SocketAddr, protocol: Protocol, socket: Box<dyn PeerSocket>, config: &TransportConfig) -> PeerConnection<P> {
        debug_assert!(config.validate().is_ok(), "invalid transport config");

        PeerConnection {
            peer_id,
            addr,
            protocol,
            socket,
            recv_buf: BytesMut::with_capacity(config.recv_buffer_capacity),
            read_buf: vec![0; config.recv_buffer_capacity],
            max_payload_len: config.max_payload_len(),
        }
    }

    pub fn peer_id(&self) -> P {
        self.peer_id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// number of bytes received but not yet part of a complete message
    pub fn buffered_len(&self) -> usize {
        self.recv_buf.len()
    }

    fn capacity(&self) -> usize {
        self.read_buf.len()
    }

    /// Reads from the socket until no more data is available, passing every complete message
    ///  to `on_message` in the order of arrival.
    ///
    /// An error means the link is broken (or the peer violated the framing protocol), and the
    ///  connection should be closed. Messages completed before the error are delivered
    ///  nonetheless.
    pub fn pump(&mut self, mut on_message: impl FnMut(Bytes)) -> anyhow::Result<()> {
        loop {
            let num_read = match self.protocol {
                Protocol::Stream => self.read_stream(&mut on_message)?,
                Protocol::Datagram => self.read_datagram(&mut on_message)?,
            };

            if num_read == 0 {
                return Ok(());
            }
        }
    }

    fn read_stream(&mut self, on_message: &mut impl FnMut(Bytes)) -> anyhow::Result<usize> {
        let available = self.capacity() - self.recv_buf.len();
        if available == 0 {
            // can not happen with frames limited to the buffer size, but never spin on a full buffer
            return Ok(0);
        }

        let num_read = self.socket.recv(&mut self.read_buf[..available])?;
        if num_read == 0 {
            return Ok(0);
        }
        trace!(peer=?self.peer_id, "received {} bytes", num_read);

        self.recv_buf.extend_from_slice(&self.read_buf[..num_read]);

        drain_frames(&mut self.recv_buf, self.max_payload_len, &mut *on_message)?;
        Ok(num_read)
    }

    /// every datagram is a message of its own, so there is no reassembly
    fn read_datagram(&mut self, on_message: &mut impl FnMut(Bytes)) -> anyhow::Result<usize> {
        let num_read = self.socket.recv(&mut self.read_buf)?;
        if num_read > 0 {
            trace!(peer=?self.peer_id, "received datagram with {} bytes", num_read);
            on_message(Bytes::copy_from_slice(&self.read_buf[..num_read]));
        }
        Ok(num_read)
    }

    /// Sends a message, framing it for stream connections. Returns the number of bytes put on
    ///  the wire.
    ///
    /// If the socket does not accept the entire message, the link is considered broken and an
    ///  error is returned: with framing, a partial send desynchronizes the stream.
    pub fn send(&mut self, payload: &[u8]) -> anyhow::Result<usize> {
        let num_sent = match self.protocol {
            Protocol::Stream => {
                let mut buf = BytesMut::with_capacity(FRAME_OVERHEAD + payload.len());
                encode_frame(payload, &mut buf)?;
                self.send_all(&buf)?
            }
            Protocol::Datagram => self.send_all(payload)?,
        };

        trace!(peer=?self.peer_id, "sent {} bytes", num_sent);
        Ok(num_sent)
    }

    fn send_all(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        let num_sent = self.socket.send(buf)?;
        if num_sent < buf.len() {
            bail!("partial send to {:?}: {} of {} bytes", self.peer_id, num_sent, buf.len());
        }
        Ok(num_sent)
    }

    pub fn disconnect(&mut self) {
        self.socket.disconnect();
        self.recv_buf.clear();
    }
}
