//! Per-peer outbound channels.
//!
//! The transport multiplexes four channels over each peer connection. The
//! reactor sees a peer as a set of bounded outbound queues plus a running
//! flag; the transport layer drains the queues onto the wire. `send`
//! blocks while a queue is saturated (bounded by a send timeout),
//! `try_send` drops immediately — gossip uses `send` for content that must
//! arrive and `try_send` for the low-value liveness prod.

use {
    crate::message::ConsensusMessage,
    crossbeam_channel::{bounded, Receiver, Sender},
    consensus_types::id::PeerId,
    log::trace,
    std::{
        collections::HashMap,
        sync::atomic::{AtomicBool, Ordering},
        time::Duration,
    },
};

/// Round-step and vote announcements.
pub const STATE_CHANNEL: u8 = 0x20;
/// Proposals, proof-of-lock bits, block parts.
pub const DATA_CHANNEL: u8 = 0x21;
/// Full votes.
pub const VOTE_CHANNEL: u8 = 0x22;
/// Maj23 replies.
pub const VOTE_SET_BITS_CHANNEL: u8 = 0x23;

/// How long a blocking send may wait on a saturated queue before giving
/// up on the peer.
const SEND_TIMEOUT: Duration = Duration::from_secs(10);

/// Static description of one multiplexed channel.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDescriptor {
    pub id: u8,
    pub priority: u8,
    pub send_queue_capacity: usize,
    pub recv_buffer_capacity: usize,
}

/// The four reactor channels, in priority order on the wire.
pub fn channel_descriptors() -> Vec<ChannelDescriptor> {
    vec![
        ChannelDescriptor {
            id: STATE_CHANNEL,
            priority: 5,
            send_queue_capacity: 100,
            recv_buffer_capacity: 4096,
        },
        ChannelDescriptor {
            id: DATA_CHANNEL,
            // Once the whole block has been gossiped there is nothing left
            // to send until the next height or round.
            priority: 10,
            send_queue_capacity: 100,
            recv_buffer_capacity: 200 * 1024,
        },
        ChannelDescriptor {
            id: VOTE_CHANNEL,
            priority: 5,
            send_queue_capacity: 100,
            recv_buffer_capacity: 100 * 100,
        },
        ChannelDescriptor {
            id: VOTE_SET_BITS_CHANNEL,
            priority: 1,
            send_queue_capacity: 2,
            recv_buffer_capacity: 1024,
        },
    ]
}

/// Reactor-side handle to one connected peer.
pub struct Peer {
    id: PeerId,
    running: AtomicBool,
    outbound: HashMap<u8, Sender<ConsensusMessage>>,
}

/// Transport-side ends of a peer's outbound queues.
pub struct PeerOutbound {
    pub channels: HashMap<u8, Receiver<ConsensusMessage>>,
}

impl PeerOutbound {
    /// Receiver for one channel id.
    pub fn channel(&self, id: u8) -> &Receiver<ConsensusMessage> {
        &self.channels[&id]
    }
}

impl Peer {
    /// Create a peer handle and the matching transport-side receivers.
    pub fn new(id: PeerId) -> (Self, PeerOutbound) {
        let mut outbound = HashMap::new();
        let mut receivers = HashMap::new();
        for desc in channel_descriptors() {
            let (tx, rx) = bounded(desc.send_queue_capacity);
            outbound.insert(desc.id, tx);
            receivers.insert(desc.id, rx);
        }
        (
            Self {
                id,
                running: AtomicBool::new(true),
                outbound,
            },
            PeerOutbound {
                channels: receivers,
            },
        )
    }

    pub fn id(&self) -> PeerId {
        self.id
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Mark the peer stopped. Queued messages are left for the transport
    /// to discard.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    /// Queue a message, waiting while the channel is saturated. Returns
    /// false when the peer is stopped, gone, or stays saturated past the
    /// send timeout.
    pub fn send(&self, channel: u8, msg: ConsensusMessage) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(tx) = self.outbound.get(&channel) else {
            trace!("send on unknown channel {channel:#04x} to {}", self.id);
            return false;
        };
        tx.send_timeout(msg, SEND_TIMEOUT).is_ok()
    }

    /// Queue a message only if there is room right now.
    pub fn try_send(&self, channel: u8, msg: ConsensusMessage) -> bool {
        if !self.is_running() {
            return false;
        }
        let Some(tx) = self.outbound.get(&channel) else {
            return false;
        };
        tx.try_send(msg).is_ok()
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::message::{HasVoteMessage, VoteSetBitsMessage},
        consensus_types::{bit_array::BitArray, block::BlockId, vote::VoteType},
    };

    fn has_vote() -> ConsensusMessage {
        ConsensusMessage::HasVote(HasVoteMessage {
            height: 1,
            round: 0,
            vote_type: VoteType::Prevote,
            index: 0,
        })
    }

    #[test]
    fn test_send_and_drain() {
        let (peer, outbound) = Peer::new(PeerId::new_unique());
        assert!(peer.send(STATE_CHANNEL, has_vote()));
        let got = outbound.channel(STATE_CHANNEL).try_recv().unwrap();
        assert_eq!(got.kind(), "has_vote");
    }

    #[test]
    fn test_try_send_drops_on_saturation() {
        let (peer, outbound) = Peer::new(PeerId::new_unique());
        let msg = ConsensusMessage::VoteSetBits(VoteSetBitsMessage {
            height: 1,
            round: 0,
            vote_type: VoteType::Prevote,
            block_id: BlockId::default(),
            votes: BitArray::new(4),
        });
        // The bits channel queue holds 2.
        assert!(peer.try_send(VOTE_SET_BITS_CHANNEL, msg.clone()));
        assert!(peer.try_send(VOTE_SET_BITS_CHANNEL, msg.clone()));
        assert!(!peer.try_send(VOTE_SET_BITS_CHANNEL, msg.clone()));
        outbound.channel(VOTE_SET_BITS_CHANNEL).try_recv().unwrap();
        assert!(peer.try_send(VOTE_SET_BITS_CHANNEL, msg));
    }

    #[test]
    fn test_stopped_peer_refuses_sends() {
        let (peer, _outbound) = Peer::new(PeerId::new_unique());
        peer.stop();
        assert!(!peer.is_running());
        assert!(!peer.send(STATE_CHANNEL, has_vote()));
        assert!(!peer.try_send(STATE_CHANNEL, has_vote()));
    }

    #[test]
    fn test_send_fails_when_transport_gone() {
        let (peer, outbound) = Peer::new(PeerId::new_unique());
        drop(outbound);
        assert!(!peer.send(STATE_CHANNEL, has_vote()));
    }

    #[test]
    fn test_channel_descriptors_match_protocol() {
        let descs = channel_descriptors();
        let ids: Vec<u8> = descs.iter().map(|d| d.id).collect();
        assert_eq!(ids, vec![0x20, 0x21, 0x22, 0x23]);
        let priorities: Vec<u8> = descs.iter().map(|d| d.priority).collect();
        assert_eq!(priorities, vec![5, 10, 5, 1]);
    }
}
