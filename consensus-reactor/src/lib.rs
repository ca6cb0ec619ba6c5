//! Consensus reactor: the peer gossip layer of the BFT engine.
//!
//! The reactor carries the consensus protocol across the validator
//! network. Per connected peer it tracks what the peer is known to have
//! (proposal, block parts, votes) and runs three cooperative routines that
//! continuously push whatever this node has and the peer lacks:
//!
//! - **data gossip** — the in-progress proposal and its block parts, plus
//!   block-part catch-up for peers on an earlier height;
//! - **vote gossip** — prevotes, precommits, last-height commits;
//! - **maj23 queries** — a low-rate liveness prod announcing observed +2/3
//!   majorities so both sides can fill gaps under vote withholding.
//!
//! Inbound traffic is demultiplexed by channel id: state-affecting messages
//! update the per-peer state, consensus inputs (proposals, block parts,
//! votes) are additionally forwarded to the consensus core's ordered
//! message queue.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`]     | gossip cadence knobs |
//! | [`message`]    | wire messages, tag-prefixed codec |
//! | [`peer`]       | channel descriptors, per-peer outbound queues |
//! | [`peer_state`] | what a peer is known to have, and what to send next |
//! | [`consensus`]  | reactor-facing surface of the consensus core |
//! | [`store`]      | block store seam used for catch-up |
//! | [`reactor`]    | lifecycle, dispatch, event-driven broadcasts |
//! | [`gossip`]     | the three per-peer routines |
//! | [`error`]      | codec and peer-state error enums |

pub mod config;
pub mod consensus;
pub mod error;
pub mod gossip;
pub mod message;
pub mod peer;
pub mod peer_state;
pub mod reactor;
pub mod store;

pub use config::ReactorConfig;
pub use consensus::{ConsensusState, PeerMessage};
pub use error::{DecodeError, EncodeError};
pub use message::{ConsensusMessage, MAX_CONSENSUS_MESSAGE_SIZE};
pub use peer::{
    Peer, PeerOutbound, DATA_CHANNEL, STATE_CHANNEL, VOTE_CHANNEL, VOTE_SET_BITS_CHANNEL,
};
pub use peer_state::{PeerRoundState, PeerState};
pub use reactor::ConsensusReactor;
pub use store::{BlockStore, InMemoryBlockStore};
