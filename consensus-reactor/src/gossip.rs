//! The three per-peer gossip routines.
//!
//! Each runs on its own thread for the lifetime of the peer, comparing a
//! snapshot of the local round state against the peer's known state and
//! sending whatever the peer lacks. Every iteration re-checks both running
//! flags; every idle path sleeps. No lock is held across a send: the
//! snapshots are value copies.

use {
    crate::{
        consensus::ConsensusState,
        message::{
            BlockPartMessage, ConsensusMessage, ProposalMessage, ProposalPolMessage,
            VoteSetMaj23Message,
        },
        peer::{Peer, DATA_CHANNEL, STATE_CHANNEL},
        peer_state::{PeerRoundState, PeerState},
        reactor::ConsensusReactor,
    },
    consensus_types::{
        bit_array::BitArray,
        round_state::{RoundState, RoundStep},
        vote::VoteType,
        vote_set::VoteSetReader,
    },
    log::{debug, error, info, trace},
    std::{sync::Arc, thread, time::Duration},
};

/// Deliver the in-progress proposal and its block parts to the peer.
pub fn gossip_data_routine(reactor: Arc<ConsensusReactor>, peer: Arc<Peer>, ps: Arc<PeerState>) {
    let sleep = reactor.config().peer_gossip_sleep;
    loop {
        // Manage disconnects from self or peer.
        if !peer.is_running() || !reactor.is_running() {
            info!("stopping gossip data routine for {}", peer.id());
            return;
        }
        let rs = reactor.consensus().get_round_state();
        let prs = ps.get_round_state();

        // Send proposal block parts?
        if let Some(rs_parts) = rs
            .proposal_block_parts
            .as_ref()
            .filter(|parts| parts.has_header(&prs.proposal_block_parts_header))
        {
            let peer_bits = prs
                .proposal_block_parts
                .clone()
                .unwrap_or_else(|| BitArray::new(rs_parts.total() as usize));
            if let Some(index) = rs_parts.bit_array().sub(&peer_bits).pick_random() {
                if let Some(part) = rs_parts.get_part(index) {
                    // The height/round tell the peer this part applies to
                    // our in-progress proposal.
                    let msg = ConsensusMessage::BlockPart(BlockPartMessage {
                        height: rs.height,
                        round: rs.round,
                        part: part.clone(),
                    });
                    debug!(
                        "sending block part {index} to {} (height {} round {})",
                        peer.id(),
                        prs.height,
                        prs.round
                    );
                    if peer.send(DATA_CHANNEL, msg) {
                        ps.set_has_proposal_block_part(prs.height, prs.round, index);
                    }
                    continue;
                }
            }
        }

        // If the peer is on a previous height, help it catch up.
        if prs.height > 0 && prs.height < rs.height {
            gossip_data_for_catchup(reactor.consensus(), &rs, &prs, &ps, &peer, sleep);
            continue;
        }

        // If height and round don't match, sleep.
        if rs.height != prs.height || rs.round != prs.round {
            thread::sleep(sleep);
            continue;
        }

        // By here, height and round match. Block parts were matched above
        // (they match on hash, so the round doesn't matter). Consider
        // sending the proposal itself.
        if let Some(proposal) = rs.proposal.as_ref().filter(|_| !prs.proposal) {
            let msg = ConsensusMessage::Proposal(ProposalMessage {
                proposal: proposal.clone(),
            });
            debug!("sending proposal to {} (height {} round {})", peer.id(), prs.height, prs.round);
            if peer.send(DATA_CHANNEL, msg) {
                ps.set_has_proposal(proposal);
            }
            // The proof-of-lock bits are only meaningful once the peer has
            // the proposal, so they follow it. The proposal was validated,
            // so its POL round's prevote set exists locally.
            if proposal.pol_round >= 0 {
                if let Some(pol_prevotes) = rs.votes.prevotes(proposal.pol_round) {
                    let msg = ConsensusMessage::ProposalPol(ProposalPolMessage {
                        height: rs.height,
                        proposal_pol_round: proposal.pol_round,
                        proposal_pol: pol_prevotes.bit_array(),
                    });
                    debug!("sending POL to {} (round {})", peer.id(), proposal.pol_round);
                    peer.send(DATA_CHANNEL, msg);
                }
            }
            continue;
        }

        // Nothing to do. Sleep.
        thread::sleep(sleep);
    }
}

// Send the lagging peer a part of the block it is assembling. The stored
// block's part-set header must match the peer's; if the peer is on a
// different proposal for that height, leave it alone.
fn gossip_data_for_catchup(
    consensus: &Arc<ConsensusState>,
    rs: &RoundState,
    prs: &PeerRoundState,
    ps: &Arc<PeerState>,
    peer: &Arc<Peer>,
    sleep: Duration,
) {
    let peer_bits = prs
        .proposal_block_parts
        .clone()
        .unwrap_or_else(|| BitArray::new(prs.proposal_block_parts_header.total as usize));
    let Some(index) = peer_bits.not().pick_random() else {
        thread::sleep(sleep);
        return;
    };

    let store = consensus.block_store();
    let Some(block_meta) = store.load_block_meta(prs.height) else {
        error!(
            "failed to load block meta (our height {}, store height {})",
            rs.height,
            store.height()
        );
        thread::sleep(sleep);
        return;
    };
    if block_meta.block_id.parts_header != prs.proposal_block_parts_header {
        info!(
            "peer {} is on another part set for height {}, sleeping",
            peer.id(),
            prs.height
        );
        thread::sleep(sleep);
        return;
    }
    let Some(part) = store.load_block_part(prs.height, index) else {
        error!("could not load part {index} for height {}", prs.height);
        thread::sleep(sleep);
        return;
    };

    // Not our height, so the round doesn't matter; the peer validates the
    // part against its part-set header.
    let msg = ConsensusMessage::BlockPart(BlockPartMessage {
        height: prs.height,
        round: prs.round,
        part,
    });
    debug!("sending catch-up block part {index} to {}", peer.id());
    if peer.send(DATA_CHANNEL, msg) {
        ps.set_has_proposal_block_part(prs.height, prs.round, index);
    }
}

/// Deliver votes the peer lacks: current-height votes, then last-commit
/// and stored-commit catch-up.
pub fn gossip_votes_routine(reactor: Arc<ConsensusReactor>, peer: Arc<Peer>, ps: Arc<PeerState>) {
    let sleep = reactor.config().peer_gossip_sleep;
    // Throttles the idle log to the first sleep of each idle stretch.
    let mut sleeping = 0u8;

    loop {
        if !peer.is_running() || !reactor.is_running() {
            info!("stopping gossip votes routine for {}", peer.id());
            return;
        }
        let rs = reactor.consensus().get_round_state();
        let prs = ps.get_round_state();

        match sleeping {
            1 => sleeping = 2, // first sleep
            2 => sleeping = 0, // no more sleep
            _ => {}
        }

        // If heights match, send last commit, prevotes, precommits.
        if rs.height == prs.height && gossip_votes_for_height(&rs, &prs, &ps) {
            continue;
        }

        // If the peer is lagging by one height, send our last commit.
        if prs.height != 0 && rs.height == prs.height + 1 {
            if let Some(last_commit) = &rs.last_commit {
                if ps.pick_send_vote(last_commit) {
                    debug!("picked last commit to send to {}", peer.id());
                    continue;
                }
            }
        }

        // If the peer is lagging by more than one height, send the stored
        // commit, which carries the precommit signatures for its height.
        if prs.height != 0 && rs.height >= prs.height + 2 {
            if let Some(commit) = reactor.consensus().block_store().load_block_commit(prs.height)
            {
                if ps.pick_send_vote(&commit) {
                    debug!("picked stored commit for height {} to send", prs.height);
                    continue;
                }
            }
        }

        if sleeping == 0 {
            // We sent nothing. Sleep...
            sleeping = 1;
            trace!(
                "no votes to send to {} (rs.height {} prs.height {})",
                peer.id(),
                rs.height,
                prs.height
            );
        } else if sleeping == 2 {
            // Continued sleep...
            sleeping = 1;
        }
        thread::sleep(sleep);
    }
}

// Returns true on the first successful send.
fn gossip_votes_for_height(rs: &RoundState, prs: &PeerRoundState, ps: &Arc<PeerState>) -> bool {
    // If there is a last commit to send...
    if prs.step == RoundStep::NewHeight {
        if let Some(last_commit) = &rs.last_commit {
            if ps.pick_send_vote(last_commit) {
                debug!("picked last commit to send");
                return true;
            }
        }
    }
    // If there are prevotes to send...
    if prs.step <= RoundStep::Prevote && prs.round != -1 && prs.round <= rs.round {
        if let Some(prevotes) = rs.votes.prevotes(prs.round) {
            if ps.pick_send_vote(prevotes) {
                debug!("picked prevotes for round {} to send", prs.round);
                return true;
            }
        }
    }
    // If there are precommits to send...
    if prs.step <= RoundStep::Precommit && prs.round != -1 && prs.round <= rs.round {
        if let Some(precommits) = rs.votes.precommits(prs.round) {
            if ps.pick_send_vote(precommits) {
                debug!("picked precommits for round {} to send", prs.round);
                return true;
            }
        }
    }
    // If there are POL prevotes to send...
    if prs.proposal_pol_round != -1 {
        if let Some(pol_prevotes) = rs.votes.prevotes(prs.proposal_pol_round) {
            if ps.pick_send_vote(pol_prevotes) {
                debug!(
                    "picked POL prevotes for round {} to send",
                    prs.proposal_pol_round
                );
                return true;
            }
        }
    }
    false
}

/// Liveness prod: occasionally announce observed +2/3 majorities so a peer
/// withholding signatures cannot stall either side. Simple and crude by
/// design; it only comes into play under a signature-withholding attack.
pub fn query_maj23_routine(reactor: Arc<ConsensusReactor>, peer: Arc<Peer>, ps: Arc<PeerState>) {
    let sleep = reactor.config().peer_query_maj23_sleep;
    loop {
        if !peer.is_running() || !reactor.is_running() {
            info!("stopping query maj23 routine for {}", peer.id());
            return;
        }

        // Maybe announce a prevote majority for the peer's round.
        {
            let rs = reactor.consensus().get_round_state();
            let prs = ps.get_round_state();
            if rs.height == prs.height {
                if let Some(maj23) = rs
                    .votes
                    .prevotes(prs.round)
                    .and_then(|vs| vs.two_thirds_majority())
                {
                    peer.try_send(
                        STATE_CHANNEL,
                        ConsensusMessage::VoteSetMaj23(VoteSetMaj23Message {
                            height: prs.height,
                            round: prs.round,
                            vote_type: VoteType::Prevote,
                            block_id: maj23,
                        }),
                    );
                    thread::sleep(sleep);
                }
            }
        }

        // Maybe announce a precommit majority for the peer's round.
        {
            let rs = reactor.consensus().get_round_state();
            let prs = ps.get_round_state();
            if rs.height == prs.height {
                if let Some(maj23) = rs
                    .votes
                    .precommits(prs.round)
                    .and_then(|vs| vs.two_thirds_majority())
                {
                    peer.try_send(
                        STATE_CHANNEL,
                        ConsensusMessage::VoteSetMaj23(VoteSetMaj23Message {
                            height: prs.height,
                            round: prs.round,
                            vote_type: VoteType::Precommit,
                            block_id: maj23,
                        }),
                    );
                    thread::sleep(sleep);
                }
            }
        }

        // Maybe announce a prevote majority for the peer's POL round.
        {
            let rs = reactor.consensus().get_round_state();
            let prs = ps.get_round_state();
            if rs.height == prs.height && prs.proposal_pol_round >= 0 {
                if let Some(maj23) = rs
                    .votes
                    .prevotes(prs.proposal_pol_round)
                    .and_then(|vs| vs.two_thirds_majority())
                {
                    peer.try_send(
                        STATE_CHANNEL,
                        ConsensusMessage::VoteSetMaj23(VoteSetMaj23Message {
                            height: prs.height,
                            round: prs.proposal_pol_round,
                            vote_type: VoteType::Prevote,
                            block_id: maj23,
                        }),
                    );
                    thread::sleep(sleep);
                }
            }
        }

        // Last-commit announcements are pointless: fleeting, and the
        // channel is non-blocking anyway.

        // Maybe announce the stored commit the peer is catching up to.
        {
            let prs = ps.get_round_state();
            if prs.catchup_commit_round != -1
                && prs.height > 0
                && prs.height <= reactor.consensus().block_store().height()
            {
                if let Some(commit) = reactor.consensus().load_commit(prs.height) {
                    peer.try_send(
                        STATE_CHANNEL,
                        ConsensusMessage::VoteSetMaj23(VoteSetMaj23Message {
                            height: prs.height,
                            round: commit.round(),
                            vote_type: VoteType::Precommit,
                            block_id: commit.block_id,
                        }),
                    );
                    thread::sleep(sleep);
                }
            }
        }

        thread::sleep(sleep);
    }
}
