//! Core types for the BFT consensus engine.
//!
//! This crate defines the data model shared by the consensus reactor and the
//! RPC layer:
//!
//! - **Identity & crypto shells** — [`id::ValidatorId`], [`id::PeerId`],
//!   [`block::Hash`], [`vote::Signature`].
//! - **Blocks and parts** — blocks are Merkle-split into fixed-size parts for
//!   pipelined gossip ([`part_set::PartSet`]).
//! - **Votes** — prevotes and precommits, collected per height/round/type in
//!   [`vote_set::VoteSet`], read through the [`vote_set::VoteSetReader`]
//!   seam by the gossip layer.
//! - **Round state** — the value snapshot of the consensus core that the
//!   reactor reads ([`round_state::RoundState`]).
//! - **Events** — the typed event taxonomy, a tag-query pub/sub server, the
//!   [`event_bus::EventBus`] facade, and the batch-then-flush
//!   [`event_buffer::TxEventBuffer`].

pub mod bit_array;
pub mod block;
pub mod error;
pub mod event_buffer;
pub mod event_bus;
pub mod events;
pub mod id;
pub mod part_set;
pub mod proposal;
pub mod pubsub;
pub mod round_state;
pub mod validator_set;
pub mod vote;
pub mod vote_set;

// Re-exports for convenience
pub use bit_array::BitArray;
pub use block::{Block, BlockId, BlockMeta, Hash, Header, PartSetHeader, Tx};
pub use error::{PartSetError, PubSubError};
pub use event_buffer::TxEventBuffer;
pub use event_bus::{EventBus, TxEventPublisher};
pub use events::{
    EventData, EventDataNewBlock, EventDataNewBlockHeader, EventDataProposalHeartbeat,
    EventDataRoundState, EventDataTx, EventDataVote,
};
pub use id::{PeerId, ValidatorId};
pub use part_set::{Part, PartSet};
pub use proposal::{Heartbeat, Proposal};
pub use pubsub::{PubSubServer, Query, EVENT_TYPE_KEY};
pub use round_state::{HeightVoteSet, RoundState, RoundStep};
pub use validator_set::ValidatorSet;
pub use vote::{Signature, Vote, VoteType};
pub use vote_set::{Commit, VoteSet, VoteSetReader};
