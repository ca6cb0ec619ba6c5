//! Tracking what a peer is known to have.
//!
//! [`PeerRoundState`] is the passive record: the peer's (height, round,
//! step), which proposal and block parts it holds, and bit-per-validator
//! vote possession at the current and adjacent heights. [`PeerState`] owns
//! one record behind a mutex, applies the state-affecting inbound messages
//! to it, and picks what to send next.
//!
//! The record only moves forward: a peer's (height, round, step) is
//! monotonic under lexicographic order, and any message that would move it
//! backwards is dropped.

use {
    crate::{
        message::{
            CommitStepMessage, ConsensusMessage, HasVoteMessage, NewRoundStepMessage,
            ProposalPolMessage, VoteMessage, VoteSetBitsMessage,
        },
        peer::{Peer, VOTE_CHANNEL},
    },
    consensus_types::{
        bit_array::BitArray,
        block::PartSetHeader,
        proposal::Proposal,
        round_state::RoundStep,
        vote::{Vote, VoteType},
        vote_set::VoteSetReader,
    },
    log::trace,
    std::{
        cmp::Ordering,
        fmt,
        sync::{Arc, Mutex},
        time::{Duration, Instant},
    },
};

/// Lexicographic comparison of two (height, round, step) positions.
pub fn compare_hrs(
    h1: i64,
    r1: i32,
    s1: RoundStep,
    h2: i64,
    r2: i32,
    s2: RoundStep,
) -> Ordering {
    h1.cmp(&h2).then(r1.cmp(&r2)).then(s1.cmp(&s2))
}

/// The known consensus position of one peer.
///
/// Read-only when returned by [`PeerState::get_round_state`]; mutations
/// happen only under the owning [`PeerState`]'s lock.
#[derive(Clone, Debug)]
pub struct PeerRoundState {
    /// Height the peer is at.
    pub height: i64,
    /// Round the peer is at, -1 if unknown.
    pub round: i32,
    /// Step the peer is at.
    pub step: RoundStep,
    /// Estimated start of round 0 at this height.
    pub start_time: Instant,
    /// True if the peer has the proposal for this round.
    pub proposal: bool,
    pub proposal_block_parts_header: PartSetHeader,
    /// Bit per block part, sized by the header's total.
    pub proposal_block_parts: Option<BitArray>,
    /// The proposal's proof-of-lock round, -1 if none.
    pub proposal_pol_round: i32,
    /// None until a proposal-POL message arrives.
    pub proposal_pol: Option<BitArray>,
    /// Prevotes the peer has for this height/round.
    pub prevotes: Option<BitArray>,
    /// Precommits the peer has for this height/round.
    pub precommits: Option<BitArray>,
    /// Round of the commit for the previous height, -1 if none.
    pub last_commit_round: i32,
    /// Commit precommits the peer has for the previous height.
    pub last_commit: Option<BitArray>,
    /// Round for which we already hold a commit, -1 if none.
    pub catchup_commit_round: i32,
    /// Commit precommits the peer has for this height at
    /// `catchup_commit_round`. When `catchup_is_precommits` is set this
    /// field is unused and reads resolve to `precommits`.
    pub catchup_commit: Option<BitArray>,
    /// The catch-up commit shares the `precommits` bits: writes to either
    /// are visible through both until the rounds diverge.
    pub catchup_is_precommits: bool,
}

impl Default for PeerRoundState {
    fn default() -> Self {
        Self {
            height: 0,
            round: -1,
            step: RoundStep::NewHeight,
            start_time: Instant::now(),
            proposal: false,
            proposal_block_parts_header: PartSetHeader::zero(),
            proposal_block_parts: None,
            proposal_pol_round: -1,
            proposal_pol: None,
            prevotes: None,
            precommits: None,
            last_commit_round: -1,
            last_commit: None,
            catchup_commit_round: -1,
            catchup_commit: None,
            catchup_is_precommits: false,
        }
    }
}

// Which bit-array a vote lands in. Resolved against the record at access
// time so the catch-up alias stays live.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum VoteSlot {
    Prevotes,
    Precommits,
    CatchupCommit,
    ProposalPol,
    LastCommit,
}

impl PeerRoundState {
    // The vote-routing matrix: which slot, if any, records a vote at
    // (height, round, type), given where the peer currently is.
    fn vote_slot(&self, height: i64, round: i32, vote_type: VoteType) -> Option<VoteSlot> {
        if self.height == height {
            if self.round == round {
                return Some(match vote_type {
                    VoteType::Prevote => VoteSlot::Prevotes,
                    VoteType::Precommit => VoteSlot::Precommits,
                });
            }
            if self.catchup_commit_round == round {
                return match vote_type {
                    VoteType::Prevote => None,
                    VoteType::Precommit => Some(VoteSlot::CatchupCommit),
                };
            }
            if self.proposal_pol_round == round {
                return match vote_type {
                    VoteType::Prevote => Some(VoteSlot::ProposalPol),
                    VoteType::Precommit => None,
                };
            }
            return None;
        }
        if self.height == height + 1 {
            if self.last_commit_round == round {
                return match vote_type {
                    VoteType::Prevote => None,
                    VoteType::Precommit => Some(VoteSlot::LastCommit),
                };
            }
            return None;
        }
        None
    }

    fn bits(&self, slot: VoteSlot) -> Option<&BitArray> {
        match slot {
            VoteSlot::Prevotes => self.prevotes.as_ref(),
            VoteSlot::Precommits => self.precommits.as_ref(),
            VoteSlot::CatchupCommit if self.catchup_is_precommits => self.precommits.as_ref(),
            VoteSlot::CatchupCommit => self.catchup_commit.as_ref(),
            VoteSlot::ProposalPol => self.proposal_pol.as_ref(),
            VoteSlot::LastCommit => self.last_commit.as_ref(),
        }
    }

    fn bits_mut(&mut self, slot: VoteSlot) -> Option<&mut BitArray> {
        match slot {
            VoteSlot::Prevotes => self.prevotes.as_mut(),
            VoteSlot::Precommits => self.precommits.as_mut(),
            VoteSlot::CatchupCommit if self.catchup_is_precommits => self.precommits.as_mut(),
            VoteSlot::CatchupCommit => self.catchup_commit.as_mut(),
            VoteSlot::ProposalPol => self.proposal_pol.as_mut(),
            VoteSlot::LastCommit => self.last_commit.as_mut(),
        }
    }

    fn vote_bit_array(&self, height: i64, round: i32, vote_type: VoteType) -> Option<&BitArray> {
        self.vote_slot(height, round, vote_type)
            .and_then(|slot| self.bits(slot))
    }

    // Routing to a missing bit-array is a silent no-op.
    fn set_has_vote(&mut self, height: i64, round: i32, vote_type: VoteType, index: usize) {
        if let Some(slot) = self.vote_slot(height, round, vote_type) {
            if let Some(bits) = self.bits_mut(slot) {
                bits.set_index(index, true);
            }
        }
    }

    // The catch-up commit bits as currently visible, whether aliased or
    // materialized.
    fn catchup_commit_view(&self) -> Option<BitArray> {
        if self.catchup_is_precommits {
            self.precommits.clone()
        } else {
            self.catchup_commit.clone()
        }
    }

    // Break the alias before `precommits` is reassigned, keeping the
    // catch-up bits as their own copy.
    fn unalias_catchup_commit(&mut self) {
        if self.catchup_is_precommits {
            self.catchup_commit = self.precommits.clone();
            self.catchup_is_precommits = false;
        }
    }

    fn ensure_vote_bit_arrays(&mut self, height: i64, num_validators: usize) {
        if self.height == height {
            if self.prevotes.is_none() {
                self.prevotes = Some(BitArray::new(num_validators));
            }
            if self.precommits.is_none() {
                self.precommits = Some(BitArray::new(num_validators));
            }
            if !self.catchup_is_precommits && self.catchup_commit.is_none() {
                self.catchup_commit = Some(BitArray::new(num_validators));
            }
            if self.proposal_pol.is_none() {
                self.proposal_pol = Some(BitArray::new(num_validators));
            }
        } else if self.height == height + 1 && self.last_commit.is_none() {
            self.last_commit = Some(BitArray::new(num_validators));
        }
    }

    // `round` is a round for which we hold a +2/3 commit. Re-targets
    // silently when called with a different round; the commit round for a
    // height is not necessarily unique.
    fn ensure_catchup_commit_round(&mut self, height: i64, round: i32, num_validators: usize) {
        if self.height != height {
            return;
        }
        if self.catchup_commit_round == round {
            return;
        }
        self.catchup_commit_round = round;
        if round == self.round {
            // Share the precommit bits rather than tracking them twice.
            self.catchup_is_precommits = true;
            self.catchup_commit = None;
        } else {
            self.catchup_is_precommits = false;
            self.catchup_commit = Some(BitArray::new(num_validators));
        }
    }
}

impl fmt::Display for PeerRoundState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "PeerRoundState{{{}/{}/{} proposal={} parts={:?} pol={:?}@{} pv={:?} pc={:?} lc={:?}@{} cc={:?}@{}}}",
            self.height,
            self.round,
            self.step,
            self.proposal,
            self.proposal_block_parts,
            self.proposal_pol,
            self.proposal_pol_round,
            self.prevotes,
            self.precommits,
            self.last_commit,
            self.last_commit_round,
            self.catchup_commit_view(),
            self.catchup_commit_round,
        )
    }
}

/// Thread-safe owner of a peer's round state plus its send handle.
pub struct PeerState {
    peer: Arc<Peer>,
    inner: Mutex<PeerRoundState>,
}

impl PeerState {
    pub fn new(peer: Arc<Peer>) -> Self {
        Self {
            peer,
            inner: Mutex::new(PeerRoundState::default()),
        }
    }

    pub fn peer(&self) -> &Arc<Peer> {
        &self.peer
    }

    /// Value snapshot of the round state. The catch-up alias is resolved
    /// in the copy, so readers see the shared bits in both fields.
    pub fn get_round_state(&self) -> PeerRoundState {
        let inner = self.lock();
        let mut snapshot = inner.clone();
        if snapshot.catchup_is_precommits {
            snapshot.catchup_commit = snapshot.precommits.clone();
        }
        snapshot
    }

    /// The peer's height, for callers that only gate on height.
    pub fn get_height(&self) -> i64 {
        self.lock().height
    }

    /// Record that the peer has the proposal. No-op unless the proposal is
    /// for the peer's current (height, round) and none was recorded yet.
    pub fn set_has_proposal(&self, proposal: &Proposal) {
        let mut inner = self.lock();
        if inner.height != proposal.height || inner.round != proposal.round {
            return;
        }
        if inner.proposal {
            return;
        }
        inner.proposal = true;
        inner.proposal_block_parts_header = proposal.block_parts_header;
        inner.proposal_block_parts =
            Some(BitArray::new(proposal.block_parts_header.total as usize));
        inner.proposal_pol_round = proposal.pol_round;
        inner.proposal_pol = None; // None until a proposal-POL message arrives.
    }

    /// Record that the peer has one block part of its current proposal.
    pub fn set_has_proposal_block_part(&self, height: i64, round: i32, index: usize) {
        let mut inner = self.lock();
        if inner.height != height || inner.round != round {
            return;
        }
        if let Some(parts) = inner.proposal_block_parts.as_mut() {
            parts.set_index(index, true);
        }
    }

    /// Record that the peer has a vote.
    pub fn set_has_vote(&self, vote: &Vote) {
        self.lock().set_has_vote(
            vote.height,
            vote.round,
            vote.vote_type,
            vote.validator_index as usize,
        );
    }

    /// Allocate the vote bit-arrays for a height once the validator count
    /// is known. The count must match what this node sees for that height.
    pub fn ensure_vote_bit_arrays(&self, height: i64, num_validators: usize) {
        self.lock().ensure_vote_bit_arrays(height, num_validators);
    }

    /// Pick a vote the local set has and the peer lacks, mark it as known
    /// to the peer, and return it.
    ///
    /// `votes` must be sized for its height's validator set.
    pub fn pick_vote_to_send(&self, votes: &dyn VoteSetReader) -> Option<Vote> {
        let mut inner = self.lock();
        if votes.size() == 0 {
            return None;
        }
        let (height, round, vote_type, size) =
            (votes.height(), votes.round(), votes.vote_type(), votes.size());

        // Lazily allocate peer bit-arrays using the reader's dimensions.
        if votes.is_commit() {
            inner.ensure_catchup_commit_round(height, round, size);
        }
        inner.ensure_vote_bit_arrays(height, size);

        let peer_bits = inner.vote_bit_array(height, round, vote_type)?;
        let want = votes.bit_array().sub(peer_bits);
        let index = want.pick_random()?;
        inner.set_has_vote(height, round, vote_type, index);
        votes.get_by_index(index)
    }

    /// Pick a missing vote and send it on the vote channel. Returns
    /// whether a vote was sent.
    pub fn pick_send_vote(&self, votes: &dyn VoteSetReader) -> bool {
        // The pick marks the vote as known before the send; a failed send
        // is recovered by the has-vote broadcast or the maj23 prod.
        if let Some(vote) = self.pick_vote_to_send(votes) {
            trace!("picked vote to send: {vote}");
            let msg = ConsensusMessage::Vote(VoteMessage { vote });
            return self.peer.send(VOTE_CHANNEL, msg);
        }
        false
    }

    /// Apply a round-step announcement. Regressions are dropped.
    pub fn apply_new_round_step(&self, msg: &NewRoundStepMessage) {
        let mut inner = self.lock();

        // Ignore duplicates or decreases.
        if compare_hrs(
            msg.height,
            msg.round,
            msg.step,
            inner.height,
            inner.round,
            inner.step,
        ) != Ordering::Greater
        {
            return;
        }

        let ps_height = inner.height;
        let ps_round = inner.round;
        let ps_catchup_commit_round = inner.catchup_commit_round;
        let ps_catchup_commit = inner.catchup_commit_view();
        let ps_precommits = inner.precommits.clone();

        inner.height = msg.height;
        inner.round = msg.round;
        inner.step = msg.step;
        inner.start_time = Instant::now()
            .checked_sub(Duration::from_secs(u64::from(msg.seconds_since_start_time)))
            .unwrap_or_else(Instant::now);

        if ps_height != msg.height || ps_round != msg.round {
            inner.unalias_catchup_commit();
            inner.proposal = false;
            inner.proposal_block_parts_header = PartSetHeader::zero();
            inner.proposal_block_parts = None;
            inner.proposal_pol_round = -1;
            inner.proposal_pol = None;
            // Capacity is re-established lazily once the validator count
            // for the new position is known.
            inner.prevotes = None;
            inner.precommits = None;
        }

        if ps_height == msg.height && ps_round != msg.round && msg.round == ps_catchup_commit_round
        {
            // The peer caught up to the round we hold a commit for: its
            // precommits are exactly the catch-up commit bits.
            inner.precommits = ps_catchup_commit;
            inner.catchup_is_precommits = true;
            inner.catchup_commit = None;
        }

        if ps_height != msg.height {
            // Shift precommits to the last-commit slot.
            inner.last_commit_round = msg.last_commit_round;
            if ps_height + 1 == msg.height && ps_round == msg.last_commit_round {
                inner.last_commit = ps_precommits;
            } else {
                inner.last_commit = None;
            }
            inner.catchup_commit_round = -1;
            inner.catchup_is_precommits = false;
            inner.catchup_commit = None;
        }
    }

    /// Apply a commit-step announcement: adopt the decided part-set header
    /// and the peer's part possession.
    pub fn apply_commit_step(&self, msg: &CommitStepMessage) {
        let mut inner = self.lock();
        if inner.height != msg.height {
            return;
        }
        inner.proposal_block_parts_header = msg.block_parts_header;
        inner.proposal_block_parts = Some(msg.block_parts.clone());
    }

    /// Apply a proof-of-lock announcement.
    pub fn apply_proposal_pol(&self, msg: &ProposalPolMessage) {
        let mut inner = self.lock();
        if inner.height != msg.height {
            return;
        }
        if inner.proposal_pol_round != msg.proposal_pol_round {
            return;
        }
        // Replaces wholesale; votes sent in the meantime are re-learned
        // through has-vote announcements.
        inner.proposal_pol = Some(msg.proposal_pol.clone());
    }

    /// Apply a has-vote announcement.
    pub fn apply_has_vote(&self, msg: &HasVoteMessage) {
        let mut inner = self.lock();
        if inner.height != msg.height {
            return;
        }
        inner.set_has_vote(msg.height, msg.round, msg.vote_type, msg.index as usize);
    }

    /// Apply a maj23 reply: the votes the peer claims to have for a block
    /// id. With `our_votes` present the peer's record becomes
    /// `(peer ∖ ours) ∪ msg`; without it (the claim is for another
    /// height), the peer's record is conservatively overwritten.
    pub fn apply_vote_set_bits(&self, msg: &VoteSetBitsMessage, our_votes: Option<&BitArray>) {
        let mut inner = self.lock();
        let Some(slot) = inner.vote_slot(msg.height, msg.round, msg.vote_type) else {
            return;
        };
        let Some(current) = inner.bits(slot).cloned() else {
            return;
        };
        let updated = {
            let mut bits = current.clone();
            match our_votes {
                Some(ours) => bits.update(&current.sub(ours).or(&msg.votes)),
                None => bits.update(&msg.votes),
            }
            bits
        };
        if let Some(bits) = inner.bits_mut(slot) {
            *bits = updated;
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, PeerRoundState> {
        self.inner.lock().expect("peer state lock poisoned")
    }
}

impl fmt::Display for PeerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PeerState{{{} {}}}", self.peer.id(), self.get_round_state())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        consensus_types::{
            block::{BlockId, Hash},
            id::{PeerId, ValidatorId},
            vote::Signature,
            vote_set::VoteSet,
        },
    };

    fn peer_state() -> PeerState {
        let (peer, _outbound) = Peer::new(PeerId::new_unique());
        PeerState::new(Arc::new(peer))
    }

    fn new_round_step(height: i64, round: i32, step: RoundStep) -> NewRoundStepMessage {
        NewRoundStepMessage {
            height,
            round,
            step,
            seconds_since_start_time: 0,
            last_commit_round: 0,
        }
    }

    fn parts_header(total: u32) -> PartSetHeader {
        PartSetHeader {
            total,
            hash: Hash::of(b"parts"),
        }
    }

    fn proposal(height: i64, round: i32, total: u32) -> Proposal {
        Proposal {
            height,
            round,
            block_parts_header: parts_header(total),
            pol_round: -1,
            pol_block_id: BlockId::default(),
            signature: Signature::default(),
        }
    }

    fn vote(index: u32, height: i64, round: i32, vote_type: VoteType) -> Vote {
        Vote {
            validator_id: ValidatorId::new_unique(),
            validator_index: index,
            height,
            round,
            vote_type,
            block_id: BlockId::new(Hash::of(b"b"), parts_header(1)),
            signature: Signature::default(),
        }
    }

    #[test]
    fn test_hrs_regression_dropped() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(5, 2, RoundStep::Prevote));
        // A lower round is dropped even with a later step.
        ps.apply_new_round_step(&new_round_step(5, 1, RoundStep::Commit));
        let prs = ps.get_round_state();
        assert_eq!((prs.height, prs.round, prs.step), (5, 2, RoundStep::Prevote));
        // A duplicate is dropped too.
        ps.apply_new_round_step(&new_round_step(5, 2, RoundStep::Prevote));
        assert_eq!(ps.get_round_state().round, 2);
        // A later step advances.
        ps.apply_new_round_step(&new_round_step(5, 2, RoundStep::Precommit));
        assert_eq!(ps.get_round_state().step, RoundStep::Precommit);
    }

    #[test]
    fn test_set_has_proposal_allocates_parts() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(5, 0, RoundStep::Propose));
        let p = proposal(5, 0, 4);
        ps.set_has_proposal(&p);
        let prs = ps.get_round_state();
        assert!(prs.proposal);
        assert_eq!(prs.proposal_block_parts_header, p.block_parts_header);
        assert_eq!(prs.proposal_block_parts.as_ref().unwrap().len(), 4);
        assert!(prs.proposal_pol.is_none());
    }

    #[test]
    fn test_set_has_proposal_wrong_round_is_noop() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(5, 1, RoundStep::Propose));
        ps.set_has_proposal(&proposal(5, 0, 4));
        assert!(!ps.get_round_state().proposal);
    }

    #[test]
    fn test_set_has_proposal_block_part() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(5, 0, RoundStep::Propose));
        ps.set_has_proposal(&proposal(5, 0, 4));
        ps.set_has_proposal_block_part(5, 0, 2);
        // Wrong round: dropped.
        ps.set_has_proposal_block_part(5, 1, 3);
        let parts = ps.get_round_state().proposal_block_parts.unwrap();
        assert!(parts.get_index(2));
        assert!(!parts.get_index(3));
    }

    #[test]
    fn test_height_transition_preserves_last_commit() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 3, RoundStep::Commit));
        ps.ensure_vote_bit_arrays(10, 4);
        ps.set_has_vote(&vote(1, 10, 3, VoteType::Precommit));
        ps.set_has_vote(&vote(3, 10, 3, VoteType::Precommit));

        let mut msg = new_round_step(11, 0, RoundStep::NewHeight);
        msg.last_commit_round = 3;
        ps.apply_new_round_step(&msg);

        let prs = ps.get_round_state();
        assert_eq!(prs.height, 11);
        assert_eq!(prs.last_commit_round, 3);
        let lc = prs.last_commit.expect("last commit preserved");
        assert!(lc.get_index(1));
        assert!(lc.get_index(3));
        assert!(!lc.get_index(0));
        assert!(prs.precommits.is_none());
        assert_eq!(prs.catchup_commit_round, -1);
    }

    #[test]
    fn test_height_transition_round_mismatch_drops_last_commit() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 3, RoundStep::Commit));
        ps.ensure_vote_bit_arrays(10, 4);
        ps.set_has_vote(&vote(1, 10, 3, VoteType::Precommit));

        let mut msg = new_round_step(11, 0, RoundStep::NewHeight);
        msg.last_commit_round = 2; // peer committed at a round we did not record
        ps.apply_new_round_step(&msg);

        let prs = ps.get_round_state();
        assert_eq!(prs.last_commit_round, 2);
        assert!(prs.last_commit.is_none());
    }

    #[test]
    fn test_vote_routing_matrix() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 2, RoundStep::Prevote));
        ps.ensure_vote_bit_arrays(10, 4);
        ps.ensure_vote_bit_arrays(9, 4);

        // Current round prevote and precommit.
        ps.set_has_vote(&vote(0, 10, 2, VoteType::Prevote));
        ps.set_has_vote(&vote(1, 10, 2, VoteType::Precommit));
        // A precommit for the previous height at the recorded last-commit
        // round lands in the last-commit bits.
        ps.set_has_vote(&vote(3, 9, 0, VoteType::Precommit));
        // A vote for neither the peer's round, catch-up round, nor POL
        // round is silently ignored.
        ps.apply_has_vote(&HasVoteMessage {
            height: 10,
            round: 1,
            vote_type: VoteType::Precommit,
            index: 2,
        });

        let prs = ps.get_round_state();
        assert!(prs.prevotes.as_ref().unwrap().get_index(0));
        assert!(prs.precommits.as_ref().unwrap().get_index(1));
        assert!(prs.last_commit.as_ref().unwrap().get_index(3));
        assert!(!prs.precommits.as_ref().unwrap().get_index(2));
    }

    #[test]
    fn test_vote_for_other_height_is_noop() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 0, RoundStep::Prevote));
        ps.ensure_vote_bit_arrays(10, 4);
        ps.set_has_vote(&vote(0, 12, 0, VoteType::Prevote));
        let prs = ps.get_round_state();
        assert!(!prs.prevotes.unwrap().has_any());
    }

    fn commit_vote_set(height: i64, round: i32, size: usize, voted: &[u32]) -> VoteSet {
        let mut vs = VoteSet::new(height, round, VoteType::Precommit, size);
        let block_id = BlockId::new(Hash::of(b"decided"), parts_header(1));
        for index in voted {
            let mut v = vote(*index, height, round, VoteType::Precommit);
            v.block_id = block_id;
            assert!(vs.add_vote(v));
        }
        vs
    }

    #[test]
    fn test_catchup_commit_aliases_precommits() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 2, RoundStep::Precommit));
        // A commit vote set for the peer's current round.
        let votes = commit_vote_set(10, 2, 4, &[0, 1, 2]);
        assert!(votes.is_commit());

        let picked = ps.pick_vote_to_send(&votes);
        assert!(picked.is_some());

        let prs = ps.get_round_state();
        assert_eq!(prs.catchup_commit_round, 2);
        assert!(prs.catchup_is_precommits, "catch-up bits share precommits");
        // The picked vote shows through both views.
        let index = picked.unwrap().validator_index as usize;
        assert!(prs.precommits.as_ref().unwrap().get_index(index));
        assert!(prs.catchup_commit.as_ref().unwrap().get_index(index));

        // A direct precommit write stays visible through the catch-up view.
        ps.set_has_vote(&vote(3, 10, 2, VoteType::Precommit));
        let prs = ps.get_round_state();
        assert!(prs.catchup_commit.as_ref().unwrap().get_index(3));
    }

    #[test]
    fn test_catchup_commit_distinct_round_gets_own_bits() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 2, RoundStep::Precommit));
        // Commit decided at round 0 while the peer is on round 2.
        let votes = commit_vote_set(10, 0, 4, &[0, 1, 2]);
        assert!(ps.pick_vote_to_send(&votes).is_some());

        let prs = ps.get_round_state();
        assert_eq!(prs.catchup_commit_round, 0);
        assert!(!prs.catchup_is_precommits);
        assert_eq!(prs.catchup_commit.as_ref().unwrap().count_ones(), 1);
        // Precommits are untouched.
        assert!(!prs.precommits.as_ref().unwrap().has_any());
    }

    #[test]
    fn test_catchup_round_preserved_across_round_change() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 2, RoundStep::Precommit));
        let votes = commit_vote_set(10, 2, 4, &[0, 1, 2]);
        // Mark every vote known via the aliased bits.
        while ps.pick_vote_to_send(&votes).is_some() {}
        let before = ps.get_round_state();
        assert!(before.catchup_is_precommits);
        assert_eq!(before.precommits.as_ref().unwrap().count_ones(), 3);

        // Peer advances to round 3: precommits reset, but the catch-up
        // bits for round 2 survive as their own array.
        ps.apply_new_round_step(&new_round_step(10, 3, RoundStep::Propose));
        let after = ps.get_round_state();
        assert_eq!(after.catchup_commit_round, 2);
        assert!(!after.catchup_is_precommits);
        assert_eq!(after.catchup_commit.as_ref().unwrap().count_ones(), 3);
        assert!(after.precommits.is_none());
    }

    #[test]
    fn test_peer_catching_up_to_catchup_round_restores_precommits() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 0, RoundStep::Prevote));
        // We hold a commit for round 2; the peer is still on round 0.
        let votes = commit_vote_set(10, 2, 4, &[0, 1, 2]);
        assert!(ps.pick_vote_to_send(&votes).is_some());
        let sent = ps.get_round_state();
        assert_eq!(sent.catchup_commit_round, 2);
        let catchup_bits = sent.catchup_commit.clone().unwrap();
        assert_eq!(catchup_bits.count_ones(), 1);

        // The peer then advances to round 2: its precommits start as the
        // catch-up bits we tracked, re-aliased.
        ps.apply_new_round_step(&new_round_step(10, 2, RoundStep::Precommit));
        let prs = ps.get_round_state();
        assert!(prs.catchup_is_precommits);
        assert_eq!(prs.precommits.as_ref().unwrap(), &catchup_bits);
    }

    #[test]
    fn test_pick_vote_to_send_skips_known() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 0, RoundStep::Prevote));
        let mut votes = VoteSet::new(10, 0, VoteType::Prevote, 4);
        let block_id = BlockId::new(Hash::of(b"x"), parts_header(1));
        for index in [0u32, 2] {
            let mut v = vote(index, 10, 0, VoteType::Prevote);
            v.block_id = block_id;
            votes.add_vote(v);
        }

        let first = ps.pick_vote_to_send(&votes).unwrap().validator_index;
        let second = ps.pick_vote_to_send(&votes).unwrap().validator_index;
        assert_ne!(first, second);
        assert!(ps.pick_vote_to_send(&votes).is_none(), "all votes known");
    }

    #[test]
    fn test_apply_vote_set_bits_merges_with_ours() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 0, RoundStep::Prevote));
        ps.ensure_vote_bit_arrays(10, 4);
        ps.set_has_vote(&vote(0, 10, 0, VoteType::Prevote));

        let mut msg_votes = BitArray::new(4);
        msg_votes.set_index(2, true);
        let mut ours = BitArray::new(4);
        // We also have index 0, so the peer's claim of index 0 is reset to
        // whatever the message says about it.
        ours.set_index(0, true);

        let msg = VoteSetBitsMessage {
            height: 10,
            round: 0,
            vote_type: VoteType::Prevote,
            block_id: BlockId::new(Hash::of(b"x"), parts_header(1)),
            votes: msg_votes,
        };
        ps.apply_vote_set_bits(&msg, Some(&ours));
        let prs = ps.get_round_state();
        let pv = prs.prevotes.unwrap();
        assert!(!pv.get_index(0), "bit covered by ours is overwritten");
        assert!(pv.get_index(2), "bit claimed by the message is set");
    }

    #[test]
    fn test_apply_vote_set_bits_conservative_overwrite() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 0, RoundStep::Prevote));
        ps.ensure_vote_bit_arrays(10, 4);
        ps.set_has_vote(&vote(1, 10, 0, VoteType::Prevote));

        let mut msg_votes = BitArray::new(4);
        msg_votes.set_index(3, true);
        let msg = VoteSetBitsMessage {
            height: 10,
            round: 0,
            vote_type: VoteType::Prevote,
            block_id: BlockId::new(Hash::of(b"x"), parts_header(1)),
            votes: msg_votes,
        };
        ps.apply_vote_set_bits(&msg, None);
        let pv = ps.get_round_state().prevotes.unwrap();
        assert!(!pv.get_index(1), "conservatively overwritten");
        assert!(pv.get_index(3));
    }

    #[test]
    fn test_apply_commit_step_adopts_parts() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 0, RoundStep::Commit));
        let mut bits = BitArray::new(4);
        bits.set_index(0, true);
        ps.apply_commit_step(&CommitStepMessage {
            height: 10,
            block_parts_header: parts_header(4),
            block_parts: bits.clone(),
        });
        let prs = ps.get_round_state();
        assert_eq!(prs.proposal_block_parts_header, parts_header(4));
        assert_eq!(prs.proposal_block_parts.unwrap(), bits);

        // Wrong height: dropped.
        ps.apply_commit_step(&CommitStepMessage {
            height: 11,
            block_parts_header: parts_header(8),
            block_parts: BitArray::new(8),
        });
        assert_eq!(
            ps.get_round_state().proposal_block_parts_header,
            parts_header(4)
        );
    }

    #[test]
    fn test_apply_proposal_pol_requires_matching_round() {
        let ps = peer_state();
        ps.apply_new_round_step(&new_round_step(10, 1, RoundStep::Propose));
        let mut p = proposal(10, 1, 4);
        p.pol_round = 0;
        ps.set_has_proposal(&p);

        let mut pol = BitArray::new(4);
        pol.set_index(2, true);
        // Mismatched POL round: dropped.
        ps.apply_proposal_pol(&ProposalPolMessage {
            height: 10,
            proposal_pol_round: 1,
            proposal_pol: pol.clone(),
        });
        assert!(ps.get_round_state().proposal_pol.is_none());

        ps.apply_proposal_pol(&ProposalPolMessage {
            height: 10,
            proposal_pol_round: 0,
            proposal_pol: pol.clone(),
        });
        assert_eq!(ps.get_round_state().proposal_pol.unwrap(), pol);
    }
}
