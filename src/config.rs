use std::net::SocketAddr;
use std::time::Duration;
use anyhow::bail;

use crate::frame_codec::FRAME_OVERHEAD;

#[derive(Debug, Clone)]
pub struct TransportConfig {
    /// The address of the advertisement service. The transport keeps a single datagram
    ///  connection to this address for its entire lifetime.
    pub discovery_addr: SocketAddr,

    /// Upper bound for the number of bytes buffered per connected peer while waiting for a
    ///  frame to be completed. This also limits the size of a single message: a frame declaring
    ///  a payload that can not fit into this buffer is treated as a protocol error, and the
    ///  peer is disconnected.
    ///
    /// For datagram peers, this is the maximum datagram size that is received.
    pub recv_buffer_capacity: usize,

    /// Maximum number of payload bytes flushed from the outbound queue per call to `update()`.
    ///  Messages exceeding the budget stay queued for subsequent ticks.
    ///
    /// `0` means 'unlimited'.
    ///
    /// NB: This applies only to messages that are queued, i.e. with latency simulation.
    ///      Without latency simulation, messages are sent immediately.
    pub max_sent_bytes_per_tick: usize,

    /// Advertised peers are forgotten if no advertisement was received for longer than this
    pub advertising_timeout: Duration,

    /// A single-byte keepalive is sent to the advertisement service every this many ticks
    pub keepalive_interval_ticks: u32,

    /// used by the std socket implementation when establishing stream connections
    pub connect_timeout: Duration,

    pub latency_simulation: Option<LatencySimulation>,
}

/// Simulated latency for testing applications against slower links: received messages become
///  visible `recv_latency` after arrival, and sent messages are queued and go on the wire no
///  sooner than `send_latency` after the call to `send()`.
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct LatencySimulation {
    pub send_latency: Duration,
    pub recv_latency: Duration,
}

impl TransportConfig {
    pub fn new(discovery_addr: SocketAddr) -> TransportConfig {
        TransportConfig {
            discovery_addr,
            recv_buffer_capacity: 64*1024,
            max_sent_bytes_per_tick: 0,
            advertising_timeout: Duration::from_secs(1),
            keepalive_interval_ticks: 10,
            connect_timeout: Duration::from_secs(1),
            latency_simulation: None,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.recv_buffer_capacity <= FRAME_OVERHEAD {
            bail!("receive buffer capacity of {} bytes can not hold any frame", self.recv_buffer_capacity);
        }
        if self.keepalive_interval_ticks == 0 {
            bail!("keepalive interval must be at least one tick");
        }
        Ok(())
    }

    /// the biggest payload a peer can send in a single stream frame
    pub fn max_payload_len(&self) -> usize {
        self.recv_buffer_capacity.saturating_sub(FRAME_OVERHEAD)
    }

    pub fn send_latency(&self) -> Duration {
        self.latency_simulation
            .map(|l| l.send_latency)
            .unwrap_or_default()
    }

    pub fn recv_latency(&self) -> Duration {
        self.latency_simulation
            .map(|l| l.recv_latency)
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;
    use super::*;

    fn config() -> TransportConfig {
        TransportConfig::new(SocketAddr::from(([127, 0, 0, 1], 5100)))
    }

    #[test]
    fn test_default_is_valid() {
        assert!(config().validate().is_ok());
    }

    #[rstest]
    #[case::empty_buffer(0, 10, false)]
    #[case::overhead_only(FRAME_OVERHEAD, 10, false)]
    #[case::one_byte_payload(FRAME_OVERHEAD + 1, 10, true)]
    #[case::no_keepalive(1024, 0, false)]
    #[case::keepalive_every_tick(1024, 1, true)]
    fn test_validate(#[case] recv_buffer_capacity: usize, #[case] keepalive_interval_ticks: u32, #[case] expected_valid: bool) {
        let mut config = config();
        config.recv_buffer_capacity = recv_buffer_capacity;
        config.keepalive_interval_ticks = keepalive_interval_ticks;
        assert_eq!(config.validate().is_ok(), expected_valid);
    }

    #[test]
    fn test_max_payload_len_of_invalid_config() {
        let mut config = config();
        config.recv_buffer_capacity = 4;
        assert_eq!(config.max_payload_len(), 0);
    }

    #[test]
    fn test_latencies() {
        let mut config = config();
        assert_eq!(config.send_latency(), Duration::ZERO);
        assert_eq!(config.recv_latency(), Duration::ZERO);

        config.latency_simulation = Some(LatencySimulation {
            send_latency: Duration::from_millis(30),
            recv_latency: Duration::from_millis(20),
        });
        assert_eq!(config.send_latency(), Duration::from_millis(30));
        assert_eq!(config.recv_latency(), Duration::from_millis(20));
        assert_eq!(config.max_payload_len(), 64*1024 - 6);
    }
}
