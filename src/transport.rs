use std::time::Instant;
use anyhow::bail;
use bytes::Bytes;
use tracing::{debug, error, info, span, trace, warn, Level};

use crate::advertisement::{AdvertisementDirectory, AdvertisementMsg};
use crate::clock::{Clock, SystemClock};
use crate::config::TransportConfig;
use crate::connection_table::ConnectionTable;
use crate::frame_codec::FRAME_OVERHEAD;
use crate::message_queue::{InboundQueue, OutboundQueue, QueuedMessage};
use crate::peer_id::PeerId;
use crate::socket::{NetSocketFactory, PeerSocket, Protocol, SocketFactory};

/// sent to the advertisement service to register as a listener, and periodically to stay registered
const KEEPALIVE: [u8; 1] = [0];

/// Transport is where everything comes together: it listens for advertisements, manages
///  connections to peers and moves messages between the application and the network.
///
/// It is driven by the application calling [Transport::update] once per control tick. All I/O
///  is non-blocking, and all work for a tick is done inside that call.
pub struct Transport<P: PeerId> {
    config: TransportConfig,
    socket_factory: Box<dyn SocketFactory>,
    clock: Box<dyn Clock>,

    /// `None` if the advertisement service was not reachable yet
    discovery: Option<Box<dyn PeerSocket>>,
    advertisements: AdvertisementDirectory<P>,
    connections: ConnectionTable<P>,

    inbound: InboundQueue<P>,
    outbound: OutboundQueue<P>,

    ticks_until_keepalive: u32,
    tick: u64,
}

impl <P: PeerId> Transport<P> {
    /// Creates a transport based on the standard library's sockets and the system clock
    pub fn connect(config: TransportConfig) -> anyhow::Result<Transport<P>> {
        let socket_factory = NetSocketFactory::new(config.connect_timeout);
        Self::new(config, Box::new(socket_factory), Box::new(SystemClock))
    }

    /// This fails only for an invalid config. Failure to reach the advertisement service is
    ///  logged, and connecting is retried periodically (see [Transport::is_initialized]).
    pub fn new(config: TransportConfig, socket_factory: Box<dyn SocketFactory>, clock: Box<dyn Clock>) -> anyhow::Result<Transport<P>> {
        config.validate()?;

        let mut result = Transport {
            socket_factory,
            clock,
            discovery: None,
            advertisements: Default::default(),
            connections: ConnectionTable::new(config.clone()),
            inbound: Default::default(),
            outbound: Default::default(),
            ticks_until_keepalive: config.keepalive_interval_ticks,
            tick: 0,
            config,
        };
        result.connect_discovery();
        Ok(result)
    }

    fn connect_discovery(&mut self) {
        let addr = self.config.discovery_addr;
        match self.socket_factory.connect(Protocol::Datagram, addr) {
            Ok(mut socket) => {
                if let Err(e) = socket.send(&KEEPALIVE) {
                    warn!("failed to register with advertisement service at {:?}: {}", addr, e);
                }
                info!("listening to advertisement service at {:?}", addr);
                self.discovery = Some(socket);
            }
            Err(e) => {
                error!("failed to connect to advertisement service at {:?}: {}", addr, e);
            }
        }
    }

    /// `true` once the connection to the advertisement service is established
    pub fn is_initialized(&self) -> bool {
        self.discovery.is_some()
    }

    pub fn config(&self) -> &TransportConfig {
        &self.config
    }

    /// Sends a message to a connected peer, returning the number of bytes put on the wire
    ///  (including framing for stream peers).
    ///
    /// A failure to send disconnects the peer. That includes a partial send, which would leave
    ///  a stream in an inconsistent state.
    ///
    /// NB: With latency simulation, the message is only queued, and it is sent by a later
    ///      call to [Transport::update]. The return value is then the *expected* number of
    ///      bytes for a framed message, regardless of the peer's protocol and even if the peer
    ///      is not connected: the result of actually sending it is not known at this point.
    ///      A message exceeding a non-zero `max_sent_bytes_per_tick` is rejected with an error
    ///      instead of being queued, since it could never be flushed and would hold back all
    ///      messages queued after it.
    pub fn send(&mut self, peer_id: P, payload: &[u8]) -> anyhow::Result<usize> {
        if self.config.latency_simulation.is_none() {
            return self.send_now(peer_id, payload);
        }

        let budget = self.config.max_sent_bytes_per_tick;
        if budget > 0 && payload.len() > budget {
            bail!("message of {} bytes exceeds the per-tick send budget of {} bytes", payload.len(), budget);
        }

        let now = self.clock.now();
        trace!(peer=?peer_id, "queueing message with {} bytes", payload.len());
        self.outbound.push(QueuedMessage {
            peer_id,
            data: Bytes::copy_from_slice(payload),
            timestamp: now,
            release_at: now + self.config.send_latency(),
        });
        Ok(FRAME_OVERHEAD + payload.len())
    }

    fn send_now(&mut self, peer_id: P, payload: &[u8]) -> anyhow::Result<usize> {
        let Some(connection) = self.connections.get_mut(peer_id) else {
            bail!("peer {:?} is not connected", peer_id);
        };

        match connection.send(payload) {
            Ok(num_sent) => Ok(num_sent),
            Err(e) => {
                warn!(peer=?peer_id, "send failed - disconnecting: {}", e);
                self.connections.disconnect(peer_id);
                Err(e)
            }
        }
    }

    /// Does all work for a single tick: handle advertisements, receive messages from all
    ///  connected peers and flush queued messages.
    pub fn update(&mut self) {
        self.do_update(true);
    }

    /// Same as [Transport::update], but messages queued by latency simulation stay queued
    pub fn update_without_flush(&mut self) {
        self.do_update(false);
    }

    fn do_update(&mut self, flush_outbound: bool) {
        self.tick += 1;
        let span = span!(Level::TRACE, "update", tick = self.tick);
        let _entered = span.enter();

        let now = self.clock.now();

        self.drain_discovery(now);
        self.advertisements.expire_stale(now, self.config.advertising_timeout);
        self.receive_from_peers(now);
        self.inbound.refresh_ready(now);

        if flush_outbound {
            self.flush_outbound(now);
        }

        self.keepalive();
    }

    fn drain_discovery(&mut self, now: Instant) {
        let Some(discovery) = &mut self.discovery else {
            return;
        };

        // one byte extra to detect oversized datagrams
        let mut buf = [0u8; AdvertisementMsg::SERIALIZED_LEN + 1];
        loop {
            let num_read = match discovery.recv(&mut buf) {
                Ok(0) => return,
                Ok(n) => n,
                Err(e) => {
                    warn!("error receiving advertisements: {}", e);
                    return;
                }
            };

            match AdvertisementMsg::try_deser(&buf[..num_read]) {
                Ok(msg) => Self::on_advertisement(&mut self.advertisements, &self.connections, msg, now),
                Err(e) => warn!("dropping malformed advertisement: {}", e),
            }
        }
    }

    fn on_advertisement(advertisements: &mut AdvertisementDirectory<P>, connections: &ConnectionTable<P>, msg: AdvertisementMsg, now: Instant) {
        let Some(peer_id) = P::from_wire(msg.peer_id) else {
            warn!("dropping advertisement with unsupported peer id {}", msg.peer_id);
            return;
        };

        // advertisements may still arrive right after connecting
        if connections.contains(peer_id) {
            trace!(peer=?peer_id, "ignoring advertisement from connected peer");
            return;
        }

        advertisements.on_advertisement(peer_id, msg.addr, msg.protocol, now);
    }

    fn receive_from_peers(&mut self, now: Instant) {
        let release_at = now + self.config.recv_latency();
        let inbound = &mut self.inbound;

        self.connections.retain_connections(|connection| {
            let peer_id = connection.peer_id();
            let result = connection.pump(|data| {
                trace!(peer=?peer_id, "received message with {} bytes", data.len());
                inbound.push(QueuedMessage {
                    peer_id,
                    data,
                    timestamp: now,
                    release_at,
                });
            });

            match result {
                Ok(()) => true,
                Err(e) => {
                    warn!(peer=?peer_id, "receive failed - disconnecting: {}", e);
                    false
                }
            }
        });
    }

    fn flush_outbound(&mut self, now: Instant) {
        for msg in self.outbound.take_due(now, self.config.max_sent_bytes_per_tick) {
            if let Err(e) = self.send_now(msg.peer_id, &msg.data) {
                warn!(peer=?msg.peer_id, "dropping queued message: {}", e);
            }
        }
    }

    fn keepalive(&mut self) {
        self.ticks_until_keepalive -= 1;
        if self.ticks_until_keepalive > 0 {
            return;
        }
        self.ticks_until_keepalive = self.config.keepalive_interval_ticks;

        if let Some(discovery) = &mut self.discovery {
            trace!("sending keepalive to advertisement service");
            if let Err(e) = discovery.send(&KEEPALIVE) {
                warn!("failed to send keepalive to advertisement service: {}", e);
            }
        }
        else {
            debug!("retrying to connect to advertisement service");
            self.connect_discovery();
        }
    }

    /// Connects to an advertised peer. Returns `true` if the peer is connected afterwards,
    ///  including the case that it was connected already.
    pub fn connect_to_peer(&mut self, peer_id: P) -> bool {
        self.connections.connect(peer_id, &mut self.advertisements, self.socket_factory.as_ref())
    }

    /// returns the number of connected peers afterwards
    pub fn connect_to_all_peers(&mut self) -> usize {
        self.connections.connect_all(&mut self.advertisements, self.socket_factory.as_ref())
    }

    pub fn disconnect_peer(&mut self, peer_id: P) {
        self.connections.disconnect(peer_id);
    }

    pub fn disconnect_all_peers(&mut self) {
        self.connections.disconnect_all();
    }

    /// peers that are advertising and not connected, in ascending order
    pub fn advertising_peer_ids(&self) -> Vec<P> {
        self.advertisements.list_ids()
    }

    pub fn clear_advertising_peers(&mut self) {
        self.advertisements.clear();
    }

    /// in ascending order
    pub fn connected_peer_ids(&self) -> Vec<P> {
        self.connections.ids()
    }

    pub fn num_connected_peers(&self) -> usize {
        self.connections.len()
    }

    /// Takes the next received message. Messages become available in [Transport::update].
    pub fn next_msg_packet(&mut self) -> Option<QueuedMessage<P>> {
        self.inbound.pop_ready()
    }

    pub fn num_pending_msg_packets(&self) -> usize {
        self.inbound.num_ready()
    }

    pub fn clear_msg_packets(&mut self) {
        self.inbound.clear();
    }

    /// number of messages for a given peer that are queued by latency simulation
    pub fn num_queued_for_send(&self, peer_id: P) -> usize {
        self.outbound.num_queued_for(peer_id)
    }

    pub fn num_queued_outbound(&self) -> usize {
        self.outbound.len()
    }
}

impl <P: PeerId> Drop for Transport<P> {
    fn drop(&mut self) {
        self.connections.disconnect_all();
        if let Some(mut discovery) = self.discovery.take() {
            discovery.disconnect();
        }
    }
}
