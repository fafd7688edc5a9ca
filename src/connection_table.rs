use rustc_hash::FxHashMap;
use tracing::{debug, info, warn};

use crate::advertisement::AdvertisementDirectory;
use crate::config::TransportConfig;
use crate::connection::PeerConnection;
use crate::peer_id::PeerId;
use crate::socket::SocketFactory;

/// The set of active peer connections, keyed by peer id.
///
/// Connections are established from the peer's advertisement, which is then removed from the
///  advertisement directory: a peer is either advertised or connected.
pub struct ConnectionTable<P: PeerId> {
    connections: FxHashMap<P, PeerConnection<P>>,
    config: TransportConfig,
}

impl <P: PeerId> ConnectionTable<P> {
    /// NB: `config` must have passed [TransportConfig::validate]
    pub fn new(config: TransportConfig) -> ConnectionTable<P> {
        ConnectionTable {
            connections: FxHashMap::default(),
            config,
        }
    }

    /// Connects to an advertised peer, returning `true` if the peer is connected afterwards -
    ///  including the case that it was connected before. Returns `false` if there is no
    ///  advertisement for the peer or the connection attempt fails.
    pub fn connect(&mut self, peer_id: P, advertisements: &mut AdvertisementDirectory<P>, socket_factory: &dyn SocketFactory) -> bool {
        if self.connections.contains_key(&peer_id) {
            return true;
        }

        let Some(record) = advertisements.get(peer_id) else {
            debug!(peer=?peer_id, "no advertisement - can not connect");
            return false;
        };

        match socket_factory.connect(record.protocol, record.addr) {
            Ok(socket) => {
                info!(peer=?peer_id, "connected to {:?} ({:?})", record.addr, record.protocol);
                let connection = PeerConnection::new(peer_id, record.addr, record.protocol, socket, &self.config);
                advertisements.remove(peer_id);
                self.connections.insert(peer_id, connection);
                true
            }
            Err(e) => {
                warn!(peer=?peer_id, "connection attempt to {:?} ({:?}) failed: {}", record.addr, record.protocol, e);
                false
            }
        }
    }

    /// Tries to connect to every advertised peer, returning the number of connected peers
    ///  afterwards
    pub fn connect_all(&mut self, advertisements: &mut AdvertisementDirectory<P>, socket_factory: &dyn SocketFactory) -> usize {
        for peer_id in advertisements.list_ids() {
            self.connect(peer_id, advertisements, socket_factory);
        }
        self.connections.len()
    }

    pub fn disconnect(&mut self, peer_id: P) {
        if let Some(mut connection) = self.connections.remove(&peer_id) {
            info!(peer=?peer_id, "disconnecting from {:?}", connection.addr());
            connection.disconnect();
        }
    }

    pub fn disconnect_all(&mut self) {
        for (peer_id, mut connection) in self.connections.drain() {
            debug!(peer=?peer_id, "disconnecting from {:?}", connection.addr());
            connection.disconnect();
        }
    }

    pub fn get_mut(&mut self, peer_id: P) -> Option<&mut PeerConnection<P>> {
        self.connections.get_mut(&peer_id)
    }

    pub fn contains(&self, peer_id: P) -> bool {
        self.connections.contains_key(&peer_id)
    }

    /// connected peer ids in ascending order
    pub fn ids(&self) -> Vec<P> {
        let mut result = self.connections.keys()
            .cloned()
            .collect::<Vec<_>>();
        result.sort();
        result
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Visits every connection. Connections for which `f` returns `false` are disconnected and
    ///  removed; `f` has no access to the table itself, so it can not affect other entries.
    pub fn retain_connections(&mut self, mut f: impl FnMut(&mut PeerConnection<P>) -> bool) {
        self.connections.retain(|_, connection| {
            let keep = f(connection);
            if !keep {
                connection.disconnect();
            }
            keep
        });
    }
}
