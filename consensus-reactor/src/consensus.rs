//! Reactor-facing surface of the consensus core.
//!
//! The consensus state machine proper (proposal creation, vote tallying,
//! lock rules) lives elsewhere. The reactor needs exactly four things from
//! it: mutex-guarded access to the current [`RoundState`], an ordered
//! ingest queue for peer-sourced consensus messages, commit lookups for
//! catch-up gossip, and a start/stop flag. [`ConsensusState`] is that
//! surface.

use {
    crate::{message::ConsensusMessage, store::BlockStore},
    consensus_types::{
        event_bus::EventBus,
        events::EventDataRoundState,
        id::PeerId,
        round_state::RoundState,
        vote_set::Commit,
    },
    crossbeam_channel::{bounded, Receiver, Sender},
    log::{info, warn},
    std::sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex, MutexGuard,
    },
};

/// Capacity of the peer message queue. Receives block while full, so
/// per-peer arrival order is preserved end to end.
const PEER_MSG_QUEUE_CAPACITY: usize = 1000;

/// A consensus input attributed to the peer that sent it.
#[derive(Clone, Debug)]
pub struct PeerMessage {
    pub msg: ConsensusMessage,
    pub peer_id: PeerId,
}

/// Handle to the consensus core held by the reactor.
pub struct ConsensusState {
    round_state: Mutex<RoundState>,
    peer_msg_tx: Sender<PeerMessage>,
    block_store: Arc<dyn BlockStore>,
    event_bus: Arc<EventBus>,
    running: AtomicBool,
}

impl ConsensusState {
    /// Build the handle. Returns the receiving end of the peer message
    /// queue, which the consensus state machine drains in order.
    pub fn new(
        round_state: RoundState,
        block_store: Arc<dyn BlockStore>,
        event_bus: Arc<EventBus>,
    ) -> (Arc<Self>, Receiver<PeerMessage>) {
        let (peer_msg_tx, peer_msg_rx) = bounded(PEER_MSG_QUEUE_CAPACITY);
        (
            Arc::new(Self {
                round_state: Mutex::new(round_state),
                peer_msg_tx,
                block_store,
                event_bus,
                running: AtomicBool::new(false),
            }),
            peer_msg_rx,
        )
    }

    /// Atomic value snapshot of the round state.
    pub fn get_round_state(&self) -> RoundState {
        self.round_state
            .lock()
            .expect("consensus round state lock poisoned")
            .clone()
    }

    /// Locked access for callers that must read and mutate atomically
    /// (e.g. recording a peer's maj23 claim while computing the reply).
    /// Never hold the guard across a peer send.
    pub fn round_state_mut(&self) -> MutexGuard<'_, RoundState> {
        self.round_state
            .lock()
            .expect("consensus round state lock poisoned")
    }

    /// Current height.
    pub fn height(&self) -> i64 {
        self.round_state
            .lock()
            .expect("consensus round state lock poisoned")
            .height
    }

    /// Enqueue a peer-sourced consensus input, blocking while the queue is
    /// full. Returns false when the consensus core is gone.
    pub fn send_peer_msg(&self, msg: ConsensusMessage, peer_id: PeerId) -> bool {
        if self.peer_msg_tx.send(PeerMessage { msg, peer_id }).is_err() {
            warn!("peer message queue disconnected");
            return false;
        }
        true
    }

    /// Canonical commit for a stored height.
    pub fn load_commit(&self, height: i64) -> Option<Commit> {
        self.block_store.load_block_commit(height)
    }

    pub fn block_store(&self) -> &Arc<dyn BlockStore> {
        &self.block_store
    }

    pub fn event_bus(&self) -> &Arc<EventBus> {
        &self.event_bus
    }

    /// Replace the round state (e.g. when leaving fast-sync with a fresh
    /// state). Publishes the new-round-step event, which the reactor's
    /// bridge turns into a broadcast to every peer.
    pub fn update_to_state(&self, round_state: RoundState) {
        info!(
            "consensus state updated to height {} round {}",
            round_state.height, round_state.round
        );
        let event = EventDataRoundState::from_round_state(&round_state);
        *self
            .round_state
            .lock()
            .expect("consensus round state lock poisoned") = round_state;
        if let Err(e) = self.event_bus.publish_event_new_round_step(event) {
            warn!("failed to publish round-step event: {e}");
        }
    }

    pub fn start(&self) {
        self.running.store(true, Ordering::Relaxed);
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }
}
