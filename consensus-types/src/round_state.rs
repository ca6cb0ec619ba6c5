//! The local consensus core's round state, as seen by the reactor.
//!
//! The consensus state machine itself lives elsewhere; the reactor only
//! ever reads value snapshots ([`RoundState`]) taken under the core's lock.

use {
    crate::{
        block::BlockId,
        id::PeerId,
        part_set::PartSet,
        proposal::Proposal,
        validator_set::ValidatorSet,
        vote::VoteType,
        vote_set::VoteSet,
    },
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    std::{collections::BTreeMap, fmt, time::Instant},
};

/// Position within a consensus round. Ordered by protocol progression; the
/// discriminants are the wire bytes.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
#[repr(u8)]
pub enum RoundStep {
    NewHeight = 0x01,
    Propose = 0x02,
    Prevote = 0x03,
    Prevoting = 0x04,
    Precommit = 0x05,
    Precommitting = 0x06,
    Commit = 0x07,
}

impl RoundStep {
    /// Decode a wire byte. None for unknown bytes.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(RoundStep::NewHeight),
            0x02 => Some(RoundStep::Propose),
            0x03 => Some(RoundStep::Prevote),
            0x04 => Some(RoundStep::Prevoting),
            0x05 => Some(RoundStep::Precommit),
            0x06 => Some(RoundStep::Precommitting),
            0x07 => Some(RoundStep::Commit),
            _ => None,
        }
    }
}

impl fmt::Display for RoundStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RoundStep::NewHeight => "NewHeight",
            RoundStep::Propose => "Propose",
            RoundStep::Prevote => "Prevote",
            RoundStep::Prevoting => "Prevoting",
            RoundStep::Precommit => "Precommit",
            RoundStep::Precommitting => "Precommitting",
            RoundStep::Commit => "Commit",
        };
        write!(f, "{name}")
    }
}

impl Serialize for RoundStep {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for RoundStep {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let byte = u8::deserialize(deserializer)?;
        RoundStep::from_u8(byte)
            .ok_or_else(|| de::Error::custom(format!("invalid round step byte {byte:#04x}")))
    }
}

/// Prevote and precommit sets for every round of one height, materialized
/// lazily as rounds are touched.
#[derive(Clone, Debug)]
pub struct HeightVoteSet {
    height: i64,
    num_validators: usize,
    rounds: BTreeMap<i32, RoundVoteSet>,
}

#[derive(Clone, Debug)]
struct RoundVoteSet {
    prevotes: VoteSet,
    precommits: VoteSet,
}

impl HeightVoteSet {
    pub fn new(height: i64, num_validators: usize) -> Self {
        Self {
            height,
            num_validators,
            rounds: BTreeMap::new(),
        }
    }

    pub fn height(&self) -> i64 {
        self.height
    }

    pub fn prevotes(&self, round: i32) -> Option<&VoteSet> {
        self.rounds.get(&round).map(|r| &r.prevotes)
    }

    pub fn precommits(&self, round: i32) -> Option<&VoteSet> {
        self.rounds.get(&round).map(|r| &r.precommits)
    }

    pub fn prevotes_mut(&mut self, round: i32) -> &mut VoteSet {
        &mut self.round_entry(round).prevotes
    }

    pub fn precommits_mut(&mut self, round: i32) -> &mut VoteSet {
        &mut self.round_entry(round).precommits
    }

    /// Record a peer's +2/3 claim on the matching vote set.
    pub fn set_peer_maj23(&mut self, round: i32, vote_type: VoteType, peer: PeerId, block_id: BlockId) {
        let entry = self.round_entry(round);
        match vote_type {
            VoteType::Prevote => entry.prevotes.set_peer_maj23(peer, block_id),
            VoteType::Precommit => entry.precommits.set_peer_maj23(peer, block_id),
        }
    }

    fn round_entry(&mut self, round: i32) -> &mut RoundVoteSet {
        let (height, size) = (self.height, self.num_validators);
        self.rounds.entry(round).or_insert_with(|| RoundVoteSet {
            prevotes: VoteSet::new(height, round, VoteType::Prevote, size),
            precommits: VoteSet::new(height, round, VoteType::Precommit, size),
        })
    }
}

/// Value snapshot of the consensus core at one instant.
#[derive(Clone, Debug)]
pub struct RoundState {
    pub height: i64,
    pub round: i32,
    pub step: RoundStep,
    /// Estimated start of round 0 at this height.
    pub start_time: Instant,
    pub validators: ValidatorSet,
    pub proposal: Option<Proposal>,
    pub proposal_block_parts: Option<PartSet>,
    pub votes: HeightVoteSet,
    /// Precommits that committed the previous height.
    pub last_commit: Option<VoteSet>,
}

impl RoundState {
    /// Fresh state at the start of a height.
    pub fn new_height(height: i64, validators: ValidatorSet) -> Self {
        let num_validators = validators.len();
        Self {
            height,
            round: 0,
            step: RoundStep::NewHeight,
            start_time: Instant::now(),
            validators,
            proposal: None,
            proposal_block_parts: None,
            votes: HeightVoteSet::new(height, num_validators),
            last_commit: None,
        }
    }

    /// Round of the previous height's commit, -1 when unknown.
    pub fn last_commit_round(&self) -> i32 {
        use crate::vote_set::VoteSetReader;
        self.last_commit.as_ref().map(|lc| lc.round()).unwrap_or(-1)
    }
}
