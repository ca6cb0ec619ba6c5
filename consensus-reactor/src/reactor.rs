//! The consensus reactor: lifecycle, inbound dispatch, and event-driven
//! broadcasts.
//!
//! One reactor runs per node. It owns the per-peer state and gossip
//! routines, demultiplexes inbound frames by channel id, and bridges the
//! local consensus core's events (round steps, votes, heartbeats) into
//! state-channel broadcasts.
//!
//! Locking: the consensus core's mutex is released before any peer send,
//! and the peer registry lock is never held across a send. Lock order is
//! consensus before peer state, never the reverse.

use {
    crate::{
        config::ReactorConfig,
        consensus::ConsensusState,
        gossip,
        message::{
            self, CommitStepMessage, ConsensusMessage, HasVoteMessage, NewRoundStepMessage,
            ProposalHeartbeatMessage, VoteSetBitsMessage, VoteSetMaj23Message,
        },
        peer::{Peer, DATA_CHANNEL, STATE_CHANNEL, VOTE_CHANNEL, VOTE_SET_BITS_CHANNEL},
        peer_state::PeerState,
    },
    consensus_types::{
        bit_array::BitArray,
        block::BlockId,
        events::{
            event_query, EventData, EVENT_NEW_ROUND_STEP, EVENT_PROPOSAL_HEARTBEAT, EVENT_VOTE,
        },
        id::PeerId,
        round_state::{RoundState, RoundStep},
        vote::{Vote, VoteType},
        vote_set::VoteSetReader,
    },
    crossbeam_channel::unbounded,
    log::{debug, error, info, warn},
    std::{
        collections::HashMap,
        sync::{
            atomic::{AtomicBool, Ordering},
            Arc, Mutex, RwLock,
        },
        thread::{self, JoinHandle},
        time::Duration,
    },
};

/// Subscriber id used for the reactor's event-bus registrations.
const SUBSCRIBER: &str = "consensus-reactor";

/// Deadline for the reactor's own event-bus subscriptions at start.
const SUBSCRIBE_TIMEOUT: Duration = Duration::from_secs(1);

struct PeerConnection {
    peer: Arc<Peer>,
    state: Arc<PeerState>,
    // Detached on drop; the routines exit by polling the running flags.
    _gossip_threads: Vec<JoinHandle<()>>,
}

/// The consensus reactor.
pub struct ConsensusReactor {
    consensus: Arc<ConsensusState>,
    config: ReactorConfig,
    running: AtomicBool,
    /// While fast-syncing, consensus inputs are dropped and only the state
    /// channel is processed. Cleared exactly once, by
    /// [`ConsensusReactor::switch_to_consensus`].
    fast_sync: RwLock<bool>,
    peers: Mutex<HashMap<PeerId, PeerConnection>>,
    bridge_threads: Mutex<Vec<JoinHandle<()>>>,
}

impl ConsensusReactor {
    pub fn new(consensus: Arc<ConsensusState>, config: ReactorConfig, fast_sync: bool) -> Arc<Self> {
        Arc::new(Self {
            consensus,
            config,
            running: AtomicBool::new(false),
            fast_sync: RwLock::new(fast_sync),
            peers: Mutex::new(HashMap::new()),
            bridge_threads: Mutex::new(Vec::new()),
        })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Whether the reactor is in fast-sync mode.
    pub fn fast_sync(&self) -> bool {
        *self.fast_sync.read().expect("fast sync lock poisoned")
    }

    pub fn consensus(&self) -> &Arc<ConsensusState> {
        &self.consensus
    }

    pub fn config(&self) -> &ReactorConfig {
        &self.config
    }

    /// Start the reactor: register the event-bus callbacks that broadcast
    /// local steps and votes, and start consensus unless fast-syncing.
    pub fn start(self: &Arc<Self>) {
        info!("consensus reactor starting (fast_sync={})", self.fast_sync());
        self.running.store(true, Ordering::Relaxed);
        self.register_event_callbacks();
        if !self.fast_sync() {
            self.consensus.start();
        }
    }

    /// Stop the reactor, its event bridge, and every peer routine.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
        self.consensus.stop();
        if let Err(e) = self.consensus.event_bus().unsubscribe_all(SUBSCRIBER) {
            debug!("unsubscribe on stop: {e}");
        }
        for handle in self
            .bridge_threads
            .lock()
            .expect("bridge threads lock poisoned")
            .drain(..)
        {
            let _ = handle.join();
        }
        let mut peers = self.peers.lock().expect("peer registry lock poisoned");
        for conn in peers.values() {
            conn.peer.stop();
        }
        peers.clear();
        info!("consensus reactor stopped");
    }

    /// Switch from fast-sync to consensus mode: adopt the given state
    /// (which re-broadcasts a round step), clear the flag, and start the
    /// consensus state machine. Reconstructing the last commit from the
    /// persisted state is the consensus core's part of this hand-off.
    pub fn switch_to_consensus(&self, state: RoundState) {
        info!("switching to consensus at height {}", state.height);
        self.consensus.update_to_state(state);
        *self.fast_sync.write().expect("fast sync lock poisoned") = false;
        self.consensus.start();
    }

    // -- Peer lifecycle --

    /// Register a peer: create its state record, launch its gossip
    /// routines, and tell it where we are.
    pub fn add_peer(self: &Arc<Self>, peer: Arc<Peer>) {
        if !self.is_running() {
            return;
        }
        let state = Arc::new(PeerState::new(peer.clone()));

        type GossipRoutine = fn(Arc<ConsensusReactor>, Arc<Peer>, Arc<PeerState>);
        let mut gossip_threads = Vec::with_capacity(3);
        for (name, routine) in [
            ("consGossipData", gossip::gossip_data_routine as GossipRoutine),
            ("consGossipVotes", gossip::gossip_votes_routine as GossipRoutine),
            ("consQueryMaj23", gossip::query_maj23_routine as GossipRoutine),
        ] {
            let reactor = Arc::clone(self);
            let peer = Arc::clone(&peer);
            let state = Arc::clone(&state);
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || routine(reactor, peer, state))
                .expect("failed to spawn gossip thread");
            gossip_threads.push(handle);
        }

        self.peers.lock().expect("peer registry lock poisoned").insert(
            peer.id(),
            PeerConnection {
                peer: peer.clone(),
                state,
                _gossip_threads: gossip_threads,
            },
        );

        // If fast-syncing, the peer learns our position later, on the
        // round-step broadcast fired by switch_to_consensus.
        if !self.fast_sync() {
            self.send_new_round_step_messages(&peer);
        }
    }

    /// Drop a peer; its gossip routines notice the stopped flag and exit.
    pub fn remove_peer(&self, peer_id: &PeerId) {
        if !self.is_running() {
            return;
        }
        if let Some(conn) = self
            .peers
            .lock()
            .expect("peer registry lock poisoned")
            .remove(peer_id)
        {
            conn.peer.stop();
            info!("removed peer {peer_id}");
        }
    }

    /// The state record of a connected peer.
    pub fn peer_state(&self, peer_id: &PeerId) -> Option<Arc<PeerState>> {
        self.peers
            .lock()
            .expect("peer registry lock poisoned")
            .get(peer_id)
            .map(|conn| Arc::clone(&conn.state))
    }

    // -- Inbound dispatch --

    /// Handle one inbound frame from a peer.
    ///
    /// Peer-state updates may happen in parallel across peers; proposals,
    /// block parts, and votes are additionally funneled into the consensus
    /// core's ordered queue. No frame is fatal: malformed or unknown input
    /// is logged and dropped, leaving room for soft upgrades.
    pub fn receive(&self, channel: u8, src: PeerId, frame: &[u8]) {
        if !self.is_running() {
            debug!("receive while stopped: ch={channel:#04x} from {src}");
            return;
        }
        let msg = match message::decode(frame) {
            Ok(msg) => msg,
            Err(e) => {
                error!("error decoding message from {src} on ch {channel:#04x}: {e}");
                return;
            }
        };
        let Some((peer, state)) = self.peer_handles(&src) else {
            warn!("message from unknown peer {src}");
            return;
        };
        debug!("receive {} from {src} on ch {channel:#04x}", msg.kind());

        match channel {
            STATE_CHANNEL => match msg {
                ConsensusMessage::NewRoundStep(m) => state.apply_new_round_step(&m),
                ConsensusMessage::CommitStep(m) => state.apply_commit_step(&m),
                ConsensusMessage::HasVote(m) => state.apply_has_vote(&m),
                ConsensusMessage::VoteSetMaj23(m) => self.handle_vote_set_maj23(&peer, src, &m),
                ConsensusMessage::ProposalHeartbeat(m) => {
                    debug!(
                        "proposal heartbeat from {src}: {} (height {} round {} seq {})",
                        m.heartbeat.validator_index,
                        m.heartbeat.height,
                        m.heartbeat.round,
                        m.heartbeat.sequence,
                    );
                }
                other => error!("unexpected {} on state channel", other.kind()),
            },

            DATA_CHANNEL => {
                if self.fast_sync() {
                    info!("ignoring {} received during fast sync", msg.kind());
                    return;
                }
                match msg {
                    ConsensusMessage::Proposal(m) => {
                        // Peer state first, then the ordered consensus queue.
                        state.set_has_proposal(&m.proposal);
                        self.consensus
                            .send_peer_msg(ConsensusMessage::Proposal(m), src);
                    }
                    ConsensusMessage::ProposalPol(m) => state.apply_proposal_pol(&m),
                    ConsensusMessage::BlockPart(m) => {
                        state.set_has_proposal_block_part(m.height, m.round, m.part.index as usize);
                        self.consensus
                            .send_peer_msg(ConsensusMessage::BlockPart(m), src);
                    }
                    other => error!("unexpected {} on data channel", other.kind()),
                }
            }

            VOTE_CHANNEL => {
                if self.fast_sync() {
                    info!("ignoring {} received during fast sync", msg.kind());
                    return;
                }
                match msg {
                    ConsensusMessage::Vote(m) => {
                        let (height, val_size, last_commit_size) = {
                            let rs = self.consensus.round_state_mut();
                            (
                                rs.height,
                                rs.validators.len(),
                                rs.last_commit.as_ref().map(|lc| lc.size()).unwrap_or(0),
                            )
                        };
                        state.ensure_vote_bit_arrays(height, val_size);
                        state.ensure_vote_bit_arrays(height - 1, last_commit_size);
                        state.set_has_vote(&m.vote);
                        self.consensus.send_peer_msg(ConsensusMessage::Vote(m), src);
                    }
                    // Don't punish: leave room for soft upgrades.
                    other => error!("unexpected {} on vote channel", other.kind()),
                }
            }

            VOTE_SET_BITS_CHANNEL => {
                if self.fast_sync() {
                    info!("ignoring {} received during fast sync", msg.kind());
                    return;
                }
                match msg {
                    ConsensusMessage::VoteSetBits(m) => {
                        let our_votes = {
                            let rs = self.consensus.round_state_mut();
                            if rs.height == m.height {
                                Self::votes_for_block_id(&rs, m.round, m.vote_type, &m.block_id)
                            } else {
                                // Stale height: the peer's claim is applied
                                // as a conservative overwrite.
                                None
                            }
                        };
                        state.apply_vote_set_bits(&m, our_votes.as_ref());
                    }
                    other => error!("unexpected {} on vote-set-bits channel", other.kind()),
                }
            }

            _ => error!("unknown channel {channel:#04x}"),
        }
    }

    fn handle_vote_set_maj23(&self, peer: &Arc<Peer>, src: PeerId, msg: &VoteSetMaj23Message) {
        // Record the claim and compute the reply under the consensus lock,
        // release, then send.
        let our_votes = {
            let mut rs = self.consensus.round_state_mut();
            if rs.height != msg.height {
                return;
            }
            rs.votes
                .set_peer_maj23(msg.round, msg.vote_type, src, msg.block_id);
            let votes = Self::votes_for_block_id(&rs, msg.round, msg.vote_type, &msg.block_id);
            votes.unwrap_or_else(|| BitArray::new(rs.validators.len()))
        };
        let reply = ConsensusMessage::VoteSetBits(VoteSetBitsMessage {
            height: msg.height,
            round: msg.round,
            vote_type: msg.vote_type,
            block_id: msg.block_id,
            votes: our_votes,
        });
        peer.try_send(VOTE_SET_BITS_CHANNEL, reply);
    }

    // The local votes for one block id, from whichever vote set the
    // (round, type) pair names.
    fn votes_for_block_id(
        rs: &RoundState,
        round: i32,
        vote_type: VoteType,
        block_id: &BlockId,
    ) -> Option<BitArray> {
        match vote_type {
            VoteType::Prevote => rs
                .votes
                .prevotes(round)
                .and_then(|vs| vs.bit_array_by_block_id(block_id)),
            VoteType::Precommit => rs
                .votes
                .precommits(round)
                .and_then(|vs| vs.bit_array_by_block_id(block_id)),
        }
    }

    fn peer_handles(&self, peer_id: &PeerId) -> Option<(Arc<Peer>, Arc<PeerState>)> {
        self.peers
            .lock()
            .expect("peer registry lock poisoned")
            .get(peer_id)
            .map(|conn| (Arc::clone(&conn.peer), Arc::clone(&conn.state)))
    }

    // -- Event-driven broadcasts --

    // Listens for local steps, votes, and heartbeats, broadcasting each to
    // every peer on the state channel.
    fn register_event_callbacks(self: &Arc<Self>) {
        let bus = Arc::clone(self.consensus.event_bus());
        let mut threads = self
            .bridge_threads
            .lock()
            .expect("bridge threads lock poisoned");

        for (event_type, name) in [
            (EVENT_NEW_ROUND_STEP, "consEventRoundStep"),
            (EVENT_VOTE, "consEventVote"),
            (EVENT_PROPOSAL_HEARTBEAT, "consEventHeartbeat"),
        ] {
            let (tx, rx) = unbounded();
            if let Err(e) = bus.subscribe(SUBSCRIBER, event_query(event_type), tx, SUBSCRIBE_TIMEOUT)
            {
                error!("failed to subscribe to {event_type}: {e}");
                continue;
            }
            let reactor = Arc::clone(self);
            let handle = thread::Builder::new()
                .name(name.to_string())
                .spawn(move || {
                    for event in rx.iter() {
                        if !reactor.is_running() {
                            break;
                        }
                        match event {
                            EventData::RoundState(e) => {
                                if let Some(rs) = e.round_state {
                                    reactor.broadcast_new_round_step(&rs);
                                }
                            }
                            EventData::Vote(e) => reactor.broadcast_has_vote(&e.vote),
                            EventData::ProposalHeartbeat(e) => {
                                debug!(
                                    "broadcasting proposal heartbeat (height {} round {} seq {})",
                                    e.heartbeat.height, e.heartbeat.round, e.heartbeat.sequence,
                                );
                                reactor.broadcast(
                                    STATE_CHANNEL,
                                    ConsensusMessage::ProposalHeartbeat(ProposalHeartbeatMessage {
                                        heartbeat: e.heartbeat,
                                    }),
                                );
                            }
                            other => debug!("ignoring event {other:?}"),
                        }
                    }
                })
                .expect("failed to spawn event bridge thread");
            threads.push(handle);
        }
    }

    /// Send a message to every registered peer.
    fn broadcast(&self, channel: u8, msg: ConsensusMessage) {
        let peers: Vec<Arc<Peer>> = self
            .peers
            .lock()
            .expect("peer registry lock poisoned")
            .values()
            .map(|conn| Arc::clone(&conn.peer))
            .collect();
        for peer in peers {
            peer.send(channel, msg.clone());
        }
    }

    fn broadcast_new_round_step(&self, rs: &RoundState) {
        let (nrs, commit_step) = make_round_step_messages(rs);
        self.broadcast(STATE_CHANNEL, ConsensusMessage::NewRoundStep(nrs));
        if let Some(cs) = commit_step {
            self.broadcast(STATE_CHANNEL, ConsensusMessage::CommitStep(cs));
        }
    }

    // Selective filtering by peer height is deferred; every peer gets the
    // announcement.
    fn broadcast_has_vote(&self, vote: &Vote) {
        let msg = ConsensusMessage::HasVote(HasVoteMessage {
            height: vote.height,
            round: vote.round,
            vote_type: vote.vote_type,
            index: vote.validator_index,
        });
        self.broadcast(STATE_CHANNEL, msg);
    }

    fn send_new_round_step_messages(&self, peer: &Arc<Peer>) {
        let rs = self.consensus.get_round_state();
        let (nrs, commit_step) = make_round_step_messages(&rs);
        peer.send(STATE_CHANNEL, ConsensusMessage::NewRoundStep(nrs));
        if let Some(cs) = commit_step {
            peer.send(STATE_CHANNEL, ConsensusMessage::CommitStep(cs));
        }
    }
}

/// The step announcement for a round state, plus the commit-step
/// announcement once the step reaches commit.
fn make_round_step_messages(
    rs: &RoundState,
) -> (NewRoundStepMessage, Option<CommitStepMessage>) {
    let nrs = NewRoundStepMessage {
        height: rs.height,
        round: rs.round,
        step: rs.step,
        seconds_since_start_time: rs.start_time.elapsed().as_secs() as u32,
        last_commit_round: rs.last_commit_round(),
    };
    let commit_step = (rs.step == RoundStep::Commit).then(|| CommitStepMessage {
        height: rs.height,
        block_parts_header: rs
            .proposal_block_parts
            .as_ref()
            .map(|p| p.header())
            .unwrap_or_default(),
        block_parts: rs
            .proposal_block_parts
            .as_ref()
            .map(|p| p.bit_array())
            .unwrap_or_else(|| BitArray::new(0)),
    });
    (nrs, commit_step)
}
