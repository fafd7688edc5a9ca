use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use anyhow::{anyhow, bail};
use bytes::{Buf, BufMut};
use tracing::debug;

use crate::peer_id::PeerId;
use crate::socket::Protocol;

/// An advertisement as it is sent by peers to the discovery channel. The id is the raw wire
///  value, conversion to the application's [PeerId] happens when it is registered.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AdvertisementMsg {
    pub peer_id: u32,
    pub addr: SocketAddr,
    pub protocol: Protocol,
}

impl AdvertisementMsg {
    const IP_FIELD_LEN: usize = 18;
    pub const SERIALIZED_LEN: usize = size_of::<u32>() + Self::IP_FIELD_LEN + size_of::<u16>() + size_of::<u8>();

    pub fn ser(&self, buf: &mut impl BufMut) -> anyhow::Result<()> {
        let ip = self.addr.ip().to_string();
        if ip.len() > Self::IP_FIELD_LEN {
            bail!("IP address {} does not fit into an advertisement", ip);
        }

        let mut ip_field = [0u8; Self::IP_FIELD_LEN];
        ip_field[..ip.len()].copy_from_slice(ip.as_bytes());

        buf.put_u32_le(self.peer_id);
        buf.put_slice(&ip_field);
        buf.put_u16_le(self.addr.port());
        buf.put_u8(self.protocol.into());
        Ok(())
    }

    /// Advertisements have a fixed size, so anything with a different length is rejected
    pub fn try_deser(mut buf: &[u8]) -> anyhow::Result<AdvertisementMsg> {
        if buf.len() != Self::SERIALIZED_LEN {
            bail!("advertisement has {} bytes, expected {}", buf.len(), Self::SERIALIZED_LEN);
        }

        let peer_id = buf.get_u32_le();

        let ip_field = &buf[..Self::IP_FIELD_LEN];
        let ip_len = ip_field.iter()
            .position(|&b| b == 0)
            .unwrap_or(Self::IP_FIELD_LEN);
        let ip: IpAddr = std::str::from_utf8(&ip_field[..ip_len])?
            .parse()?;
        buf.advance(Self::IP_FIELD_LEN);

        let port = buf.get_u16_le();
        let raw_protocol = buf.get_u8();
        let protocol = Protocol::try_from(raw_protocol)
            .map_err(|_| anyhow!("invalid protocol discriminator: {}", raw_protocol))?;

        Ok(AdvertisementMsg {
            peer_id,
            addr: SocketAddr::new(ip, port),
            protocol,
        })
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct AdvertisementRecord<P: PeerId> {
    pub peer_id: P,
    pub addr: SocketAddr,
    pub protocol: Protocol,
    pub last_seen: Instant,
}

/// Peers that announced themselves recently but are not connected. Entries are refreshed by
///  every advertisement and expire if a peer stops advertising.
///
/// NB: The directory does not know about connections. It is the caller's responsibility to
///      ignore advertisements from connected peers and to remove a peer when connecting to it,
///      so that no peer is ever both advertised and connected.
pub struct AdvertisementDirectory<P: PeerId> {
    records: BTreeMap<P, AdvertisementRecord<P>>,
}

impl <P: PeerId> Default for AdvertisementDirectory<P> {
    fn default() -> Self {
        AdvertisementDirectory {
            records: Default::default(),
        }
    }
}

impl <P: PeerId> AdvertisementDirectory<P> {
    pub fn on_advertisement(&mut self, peer_id: P, addr: SocketAddr, protocol: Protocol, now: Instant) {
        if !self.records.contains_key(&peer_id) {
            debug!(peer=?peer_id, "detected advertising peer at {:?} ({:?})", addr, protocol);
        }

        self.records.insert(peer_id, AdvertisementRecord {
            peer_id,
            addr,
            protocol,
            last_seen: now,
        });
    }

    pub fn expire_stale(&mut self, now: Instant, timeout: Duration) {
        self.records.retain(|peer_id, record| {
            let is_fresh = now.saturating_duration_since(record.last_seen) <= timeout;
            if !is_fresh {
                debug!(peer=?peer_id, "advertisement expired");
            }
            is_fresh
        });
    }

    /// a snapshot of all advertised ids in ascending order
    pub fn list_ids(&self) -> Vec<P> {
        self.records.keys().cloned().collect()
    }

    pub fn get(&self, peer_id: P) -> Option<&AdvertisementRecord<P>> {
        self.records.get(&peer_id)
    }

    pub fn contains(&self, peer_id: P) -> bool {
        self.records.contains_key(&peer_id)
    }

    pub fn remove(&mut self, peer_id: P) -> Option<AdvertisementRecord<P>> {
        self.records.remove(&peer_id)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}
