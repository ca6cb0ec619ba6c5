//! Vote collection and the reader seam used by gossip.
//!
//! A [`VoteSet`] tallies one (height, round, type) triple, one slot per
//! validator index. The gossip layer only needs a read view — which indices
//! are present, and the vote at an index — expressed by [`VoteSetReader`]
//! so that a stored [`Commit`] can be gossiped exactly like a live set.

use {
    crate::{
        bit_array::BitArray,
        block::BlockId,
        id::PeerId,
        vote::{Vote, VoteType},
    },
    log::warn,
    serde::{Deserialize, Serialize},
    std::collections::HashMap,
};

/// Read access to a set of votes at one (height, round, type).
pub trait VoteSetReader {
    fn height(&self) -> i64;
    fn round(&self) -> i32;
    fn vote_type(&self) -> VoteType;
    /// Number of validator slots.
    fn size(&self) -> usize;
    /// Bit per validator index: set when that validator's vote is present.
    fn bit_array(&self) -> BitArray;
    /// True for a decided precommit set (a commit).
    fn is_commit(&self) -> bool;
    fn get_by_index(&self, index: usize) -> Option<Vote>;
}

/// Votes of one (height, round, type), tallied by validator index.
///
/// Tallying is equal-weight: a block id reaches a two-thirds majority when
/// strictly more than 2/3 of the validator slots voted for it.
#[derive(Clone, Debug)]
pub struct VoteSet {
    height: i64,
    round: i32,
    vote_type: VoteType,
    size: usize,
    votes: Vec<Option<Vote>>,
    votes_bit_array: BitArray,
    by_block: HashMap<BlockId, BitArray>,
    maj23: Option<BlockId>,
    peer_maj23s: HashMap<PeerId, BlockId>,
}

impl VoteSet {
    pub fn new(height: i64, round: i32, vote_type: VoteType, size: usize) -> Self {
        Self {
            height,
            round,
            vote_type,
            size,
            votes: vec![None; size],
            votes_bit_array: BitArray::new(size),
            by_block: HashMap::new(),
            maj23: None,
            peer_maj23s: HashMap::new(),
        }
    }

    /// Record a vote at its validator index. Returns false for duplicates
    /// and out-of-range indices.
    pub fn add_vote(&mut self, vote: Vote) -> bool {
        let index = vote.validator_index as usize;
        if index >= self.size {
            warn!(
                "vote index {} out of range for validator set of {}",
                index, self.size
            );
            return false;
        }
        if vote.height != self.height
            || vote.round != self.round
            || vote.vote_type != self.vote_type
        {
            return false;
        }
        if self.votes[index].is_some() {
            return false;
        }

        let block_id = vote.block_id;
        self.votes[index] = Some(vote);
        self.votes_bit_array.set_index(index, true);
        let bits = self
            .by_block
            .entry(block_id)
            .or_insert_with(|| BitArray::new(self.size));
        bits.set_index(index, true);

        if self.maj23.is_none() && bits.count_ones() * 3 > self.size * 2 {
            self.maj23 = Some(block_id);
        }
        true
    }

    /// The votes we hold for a specific block id, or None if no vote for
    /// that block id has been seen.
    pub fn bit_array_by_block_id(&self, block_id: &BlockId) -> Option<BitArray> {
        self.by_block.get(block_id).cloned()
    }

    /// The decided block id, when a two-thirds majority exists.
    pub fn two_thirds_majority(&self) -> Option<BlockId> {
        self.maj23
    }

    /// Record a peer's claim of a +2/3 majority for a block id.
    pub fn set_peer_maj23(&mut self, peer: PeerId, block_id: BlockId) {
        self.peer_maj23s.entry(peer).or_insert(block_id);
    }

    /// The majority block id a peer claimed, if any.
    pub fn peer_maj23(&self, peer: &PeerId) -> Option<BlockId> {
        self.peer_maj23s.get(peer).copied()
    }
}

impl VoteSetReader for VoteSet {
    fn height(&self) -> i64 {
        self.height
    }

    fn round(&self) -> i32 {
        self.round
    }

    fn vote_type(&self) -> VoteType {
        self.vote_type
    }

    fn size(&self) -> usize {
        self.size
    }

    fn bit_array(&self) -> BitArray {
        self.votes_bit_array.clone()
    }

    fn is_commit(&self) -> bool {
        self.vote_type == VoteType::Precommit && self.maj23.is_some()
    }

    fn get_by_index(&self, index: usize) -> Option<Vote> {
        self.votes.get(index).and_then(|v| v.clone())
    }
}

/// The canonical +2/3 precommit set for a committed block, as persisted in
/// the block store. Indices without a precommit are absent (None).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Commit {
    pub block_id: BlockId,
    pub precommits: Vec<Option<Vote>>,
}

impl Commit {
    fn first_vote(&self) -> Option<&Vote> {
        self.precommits.iter().flatten().next()
    }
}

impl VoteSetReader for Commit {
    fn height(&self) -> i64 {
        self.first_vote().map(|v| v.height).unwrap_or(0)
    }

    fn round(&self) -> i32 {
        self.first_vote().map(|v| v.round).unwrap_or(-1)
    }

    fn vote_type(&self) -> VoteType {
        VoteType::Precommit
    }

    fn size(&self) -> usize {
        self.precommits.len()
    }

    fn bit_array(&self) -> BitArray {
        let mut bits = BitArray::new(self.precommits.len());
        for (index, vote) in self.precommits.iter().enumerate() {
            if vote.is_some() {
                bits.set_index(index, true);
            }
        }
        bits
    }

    fn is_commit(&self) -> bool {
        true
    }

    fn get_by_index(&self, index: usize) -> Option<Vote> {
        self.precommits.get(index).and_then(|v| v.clone())
    }
}
