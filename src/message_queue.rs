use std::collections::VecDeque;
use std::time::Instant;
use bytes::Bytes;
use tracing::trace;

use crate::peer_id::PeerId;

/// A message waiting for delivery, either to the application (inbound) or to a peer (outbound).
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct QueuedMessage<P: PeerId> {
    /// the source for inbound messages, the destination for outbound messages
    pub peer_id: P,
    pub data: Bytes,
    /// when the message was received or handed to `send`, respectively
    pub timestamp: Instant,
    /// the message is not delivered before this point in time. It is the same as `timestamp`
    ///  unless latency simulation is active.
    pub release_at: Instant,
}

impl <P: PeerId> QueuedMessage<P> {
    pub fn data_len(&self) -> usize {
        self.data.len()
    }

    fn is_due(&self, now: Instant) -> bool {
        self.release_at <= now
    }
}

/// Received messages in order of arrival.
///
/// Messages become available to the application in batches: [InboundQueue::refresh_ready]
///  determines how many messages from the front are due, and only those can be taken. This
///  keeps delivery stable between two ticks even if wall clock time advances.
pub struct InboundQueue<P: PeerId> {
    messages: VecDeque<QueuedMessage<P>>,
    num_ready: usize,
}

impl <P: PeerId> Default for InboundQueue<P> {
    fn default() -> Self {
        InboundQueue {
            messages: Default::default(),
            num_ready: 0,
        }
    }
}

impl <P: PeerId> InboundQueue<P> {
    pub fn push(&mut self, msg: QueuedMessage<P>) {
        self.messages.push_back(msg);
    }

    pub fn refresh_ready(&mut self, now: Instant) {
        self.num_ready = self.messages.iter()
            .take_while(|m| m.is_due(now))
            .count();
    }

    pub fn pop_ready(&mut self) -> Option<QueuedMessage<P>> {
        if self.num_ready == 0 {
            return None;
        }
        self.num_ready -= 1;
        self.messages.pop_front()
    }

    pub fn num_ready(&self) -> usize {
        self.num_ready
    }

    /// including messages that are not due yet
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.num_ready = 0;
    }
}

/// Messages waiting to be sent, used only for latency simulation. This is a single FIFO
///  across all peers: messages are sent in the order they were queued, and a message that is
///  held back by the send budget holds back all messages after it.
pub struct OutboundQueue<P: PeerId> {
    messages: VecDeque<QueuedMessage<P>>,
}

impl <P: PeerId> Default for OutboundQueue<P> {
    fn default() -> Self {
        OutboundQueue {
            messages: Default::default(),
        }
    }
}

impl <P: PeerId> OutboundQueue<P> {
    pub fn push(&mut self, msg: QueuedMessage<P>) {
        self.messages.push_back(msg);
    }

    /// Removes and returns the longest prefix of due messages with a combined payload size of
    ///  at most `budget` bytes. A budget of `0` means unlimited.
    pub fn take_due(&mut self, now: Instant, budget: usize) -> Vec<QueuedMessage<P>> {
        let mut num_bytes = 0;
        let mut num_msgs = 0;

        for msg in &self.messages {
            if !msg.is_due(now) {
                break;
            }
            if budget > 0 && num_bytes + msg.data_len() > budget {
                trace!("send budget of {} bytes exhausted, deferring {} messages", budget, self.messages.len() - num_msgs);
                break;
            }
            num_bytes += msg.data_len();
            num_msgs += 1;
        }

        self.messages.drain(..num_msgs).collect()
    }

    pub fn num_queued_for(&self, peer_id: P) -> usize {
        self.messages.iter()
            .filter(|m| m.peer_id == peer_id)
            .count()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
