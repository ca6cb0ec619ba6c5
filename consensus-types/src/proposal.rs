//! Proposals and proposer heartbeats.

use {
    crate::{
        block::{BlockId, PartSetHeader},
        id::ValidatorId,
        vote::Signature,
    },
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// A proposer-signed block announcement for one (height, round): the part
/// split of the block, and the proof-of-lock round when the block was
/// already polka'd in an earlier round (`pol_round == -1` means none).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Proposal {
    pub height: i64,
    pub round: i32,
    pub block_parts_header: PartSetHeader,
    pub pol_round: i32,
    pub pol_block_id: BlockId,
    pub signature: Signature,
}

impl fmt::Display for Proposal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Proposal{{{}/{} {} (POL {})}}",
            self.height, self.round, self.block_parts_header, self.pol_round,
        )
    }
}

/// Periodic sign of life from a proposer that is waiting for transactions
/// before it can propose.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Heartbeat {
    pub validator_id: ValidatorId,
    pub validator_index: u32,
    pub height: i64,
    pub round: i32,
    pub sequence: u64,
    pub signature: Signature,
}

impl fmt::Display for Heartbeat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Heartbeat{{{}:{} {}/{:02} #{}}}",
            self.validator_index, self.validator_id, self.height, self.round, self.sequence,
        )
    }
}
