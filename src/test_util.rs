use std::collections::{HashMap, VecDeque};
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use anyhow::bail;

use crate::advertisement::AdvertisementMsg;
use crate::clock::Clock;
use crate::socket::{PeerSocket, Protocol, SocketFactory};

/// A clock that only moves when it is told to
#[derive(Debug, Clone)]
pub struct ManualClock {
    now: Arc<Mutex<Instant>>,
}

impl ManualClock {
    pub fn new() -> ManualClock {
        ManualClock {
            now: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn advance(&self, duration: Duration) {
        *self.now.lock().unwrap() += duration;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        *self.now.lock().unwrap()
    }
}

#[derive(Debug, Default)]
struct Endpoint {
    /// chunks returned by successive calls to `recv`
    inbound: VecDeque<Vec<u8>>,
    sent: Vec<Vec<u8>>,
    num_connects: usize,
    is_connected: bool,
    refuse_connections: bool,
    fail_recv: bool,
    fail_send: bool,
    max_send_len: Option<usize>,
}

/// An in-memory network for driving a transport in tests: data to be received is scripted per
///  remote address, and everything that is sent is recorded.
///
/// Clones share the same state, so tests can keep a handle after passing the network to the
///  transport as its [SocketFactory].
#[derive(Debug, Clone, Default)]
pub struct FakeNetwork {
    endpoints: Arc<Mutex<HashMap<SocketAddr, Endpoint>>>,
}

impl FakeNetwork {
    pub fn new() -> FakeNetwork {
        Default::default()
    }

    fn with_endpoint<T>(&self, addr: SocketAddr, f: impl FnOnce(&mut Endpoint) -> T) -> T {
        let mut endpoints = self.endpoints.lock().unwrap();
        f(endpoints.entry(addr).or_default())
    }

    /// the next call to `recv` on a socket for `addr` returns `chunk`
    pub fn push_inbound(&self, addr: SocketAddr, chunk: &[u8]) {
        self.with_endpoint(addr, |e| e.inbound.push_back(chunk.to_vec()));
    }

    pub fn advertise(&self, discovery_addr: SocketAddr, peer_id: u32, addr: SocketAddr, protocol: Protocol) {
        let mut buf = Vec::new();
        AdvertisementMsg { peer_id, addr, protocol }
            .ser(&mut buf)
            .unwrap();
        self.push_inbound(discovery_addr, &buf);
    }

    /// returns data sent to `addr`, clearing the internal buffer
    pub fn take_sent(&self, addr: SocketAddr) -> Vec<Vec<u8>> {
        self.with_endpoint(addr, |e| std::mem::take(&mut e.sent))
    }

    pub fn refuse_connections(&self, addr: SocketAddr, refuse: bool) {
        self.with_endpoint(addr, |e| e.refuse_connections = refuse);
    }

    pub fn fail_recv(&self, addr: SocketAddr) {
        self.with_endpoint(addr, |e| e.fail_recv = true);
    }

    pub fn fail_send(&self, addr: SocketAddr) {
        self.with_endpoint(addr, |e| e.fail_send = true);
    }

    /// sockets for `addr` accept at most `max_send_len` bytes per call to `send`
    pub fn limit_send(&self, addr: SocketAddr, max_send_len: usize) {
        self.with_endpoint(addr, |e| e.max_send_len = Some(max_send_len));
    }

    pub fn is_connected(&self, addr: SocketAddr) -> bool {
        self.with_endpoint(addr, |e| e.is_connected)
    }

    pub fn num_connects(&self, addr: SocketAddr) -> usize {
        self.with_endpoint(addr, |e| e.num_connects)
    }
}

impl SocketFactory for FakeNetwork {
    fn connect(&self, _protocol: Protocol, addr: SocketAddr) -> anyhow::Result<Box<dyn PeerSocket>> {
        self.with_endpoint(addr, |e| {
            if e.refuse_connections {
                bail!("connection to {:?} refused", addr);
            }
            e.num_connects += 1;
            e.is_connected = true;
            Ok(())
        })?;

        Ok(Box::new(FakeSocket {
            network: self.clone(),
            addr,
            is_open: true,
        }))
    }
}

struct FakeSocket {
    network: FakeNetwork,
    addr: SocketAddr,
    is_open: bool,
}

impl PeerSocket for FakeSocket {
    fn send(&mut self, buf: &[u8]) -> anyhow::Result<usize> {
        if !self.is_open {
            bail!("socket is closed");
        }
        self.network.with_endpoint(self.addr, |e| {
            if e.fail_send {
                bail!("network unreachable");
            }
            let len = e.max_send_len
                .map(|max| max.min(buf.len()))
                .unwrap_or(buf.len());
            e.sent.push(buf[..len].to_vec());
            Ok(len)
        })
    }

    fn recv(&mut self, buf: &mut [u8]) -> anyhow::Result<usize> {
        if !self.is_open {
            bail!("socket is closed");
        }
        self.network.with_endpoint(self.addr, |e| {
            if e.fail_recv {
                bail!("connection reset");
            }
            let Some(mut chunk) = e.inbound.pop_front() else {
                return Ok(0);
            };
            if chunk.len() > buf.len() {
                // behave like a stream: the rest is returned by the next call
                e.inbound.push_front(chunk.split_off(buf.len()));
            }
            buf[..chunk.len()].copy_from_slice(&chunk);
            Ok(chunk.len())
        })
    }

    fn disconnect(&mut self) {
        if self.is_open {
            self.is_open = false;
            self.network.with_endpoint(self.addr, |e| e.is_connected = false);
        }
    }
}
