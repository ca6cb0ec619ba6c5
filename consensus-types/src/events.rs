//! The event taxonomy published on the event bus.
//!
//! Event *types* are string tags (they key the pub/sub query language);
//! event *payloads* are the [`EventData`] variants. Transactions use a
//! per-tx subtype (`Tx:<hex-hash>`) so a caller can subscribe to one
//! transaction's commitment.

use crate::{
    block::{Block, Header, Tx},
    proposal::Heartbeat,
    pubsub::{Query, EVENT_TYPE_KEY},
    round_state::RoundState,
    vote::Vote,
};

// Reserved event types.
pub const EVENT_BOND: &str = "Bond";
pub const EVENT_UNBOND: &str = "Unbond";
pub const EVENT_REBOND: &str = "Rebond";
pub const EVENT_DUPEOUT: &str = "Dupeout";
pub const EVENT_FORK: &str = "Fork";

pub const EVENT_NEW_BLOCK: &str = "NewBlock";
pub const EVENT_NEW_BLOCK_HEADER: &str = "NewBlockHeader";
pub const EVENT_NEW_ROUND: &str = "NewRound";
pub const EVENT_NEW_ROUND_STEP: &str = "NewRoundStep";
pub const EVENT_TIMEOUT_PROPOSE: &str = "TimeoutPropose";
pub const EVENT_COMPLETE_PROPOSAL: &str = "CompleteProposal";
pub const EVENT_POLKA: &str = "Polka";
pub const EVENT_UNLOCK: &str = "Unlock";
pub const EVENT_LOCK: &str = "Lock";
pub const EVENT_RELOCK: &str = "Relock";
pub const EVENT_TIMEOUT_WAIT: &str = "TimeoutWait";
pub const EVENT_VOTE: &str = "Vote";
pub const EVENT_PROPOSAL_HEARTBEAT: &str = "ProposalHeartbeat";

/// The per-tx event subtype, `Tx:<hex-hash>`.
pub fn event_tx_type(tx: &Tx) -> String {
    format!("Tx:{}", hex::encode_upper(tx.hash().0))
}

/// Query matching a single event type.
pub fn event_query(event_type: &str) -> Query {
    Query::must_parse(&format!("{EVENT_TYPE_KEY}={event_type}"))
}

/// Query matching the commitment of one specific transaction.
pub fn event_query_tx(tx: &Tx) -> Query {
    event_query(&event_tx_type(tx))
}

/// Payload of a new-block event.
#[derive(Clone, Debug)]
pub struct EventDataNewBlock {
    pub block: Block,
}

/// Lightweight header-only variant of the new-block event.
#[derive(Clone, Debug)]
pub struct EventDataNewBlockHeader {
    pub header: Header,
}

/// Result of delivering one transaction in a committed block.
#[derive(Clone, Debug)]
pub struct EventDataTx {
    pub height: i64,
    pub tx: Tx,
    pub data: Vec<u8>,
    pub log: String,
    pub code: u32,
    pub error: String,
}

/// Round-state transition payload. The full snapshot rides along for
/// in-process consumers (the reactor's broadcast bridge); external
/// consumers see only the (height, round, step) triple.
#[derive(Clone, Debug)]
pub struct EventDataRoundState {
    pub height: i64,
    pub round: i32,
    pub step: String,
    pub round_state: Option<RoundState>,
}

impl EventDataRoundState {
    pub fn from_round_state(rs: &RoundState) -> Self {
        Self {
            height: rs.height,
            round: rs.round,
            step: rs.step.to_string(),
            round_state: Some(rs.clone()),
        }
    }
}

/// A vote observed by the local node.
#[derive(Clone, Debug)]
pub struct EventDataVote {
    pub vote: Vote,
}

/// A proposer heartbeat observed by the local node.
#[derive(Clone, Debug)]
pub struct EventDataProposalHeartbeat {
    pub heartbeat: Heartbeat,
}

/// Every payload that can ride on the event bus.
#[derive(Clone, Debug)]
pub enum EventData {
    NewBlock(EventDataNewBlock),
    NewBlockHeader(EventDataNewBlockHeader),
    Tx(EventDataTx),
    RoundState(EventDataRoundState),
    Vote(EventDataVote),
    ProposalHeartbeat(EventDataProposalHeartbeat),
}
