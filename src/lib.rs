//! A link-layer transport for talking to many remote devices ("robots" or other peers) from
//!  a single control loop. It multiplexes stream (TCP) and datagram (UDP) connections, discovers
//!  peers through periodic advertisements, reassembles framed messages from the byte stream and
//!  bounds the number of bytes flushed to the network per control tick.
//!
//! ## Design
//!
//! * Single-threaded and tick-driven: the owning application calls [transport::Transport::update]
//!    once per control cycle. There are no internal threads, no async runtime and no blocking
//!    calls - all socket operations are non-blocking, and 'nothing available' is not an error
//! * Peers announce themselves on a shared discovery channel. An advertised peer is not
//!    connected until the application asks for it, and a peer id is either advertised or
//!    connected, never both
//! * Link failures are local: a failing peer is disconnected, and the application notices by
//!    its absence from the set of connected peers. Nothing is propagated out of `update()`
//! * The socket layer and the clock are injected as traits, so the whole state machine can be
//!    driven deterministically in tests
//! * Optionally, latency can be simulated for both directions. In that mode, outgoing messages
//!    are queued and flushed by `update()`, subject to a per-tick byte budget
//!
//! ## Stream frame format
//!
//! ```ascii
//! 0: header (2 bytes): 0xBE 0xEF
//! 2: payload length (u32 LE)
//! 6: payload
//! ```
//!
//! Datagram connections carry no framing: every datagram is one message, verbatim.
//!
//! The receiver scans for the header, so it can re-synchronize after garbage on the wire.
//!  Bytes before a header are dropped with a warning. If there is no header anywhere in the
//!  buffered data, the entire buffer is discarded.
//!
//! ## Advertisement format
//!
//! Advertisements are fixed-size datagrams (all numbers little endian):
//!
//! ```ascii
//!  0: peer id (u32)
//!  4: IP address as ASCII, NUL padded (18 bytes)
//! 22: port (u16)
//! 24: protocol (u8): 0 stream, 1 datagram
//! ```
//!
//! The transport's discovery client sends a single zero byte after connecting and then
//!  periodically as a keepalive, so the advertisement service knows it is listening.

pub mod advertisement;
pub mod clock;
pub mod config;
pub mod connection;
pub mod connection_table;
pub mod frame_codec;
pub mod message_queue;
pub mod peer_id;
pub mod socket;
pub mod transport;

#[cfg(test)]
pub mod test_util;

#[cfg(test)]
mod tests {
    use tracing::Level;

    #[ctor::ctor]
    fn init_test_logging() {
        tracing_subscriber::fmt()
            .with_test_writer()
            // .with_max_level(Level::DEBUG)
            .with_max_level(Level::TRACE)
            .try_init()
            .ok();
    }
}
