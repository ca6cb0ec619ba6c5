//! Wire messages exchanged between consensus reactors.
//!
//! Every frame is a 1-byte message tag followed by the bincode encoding of
//! the message body, with the whole frame bounded at
//! [`MAX_CONSENSUS_MESSAGE_SIZE`]. Decoding is total: any malformed,
//! oversized, or unknown frame yields a [`DecodeError`], never a panic.

use {
    crate::error::{DecodeError, EncodeError},
    consensus_types::{
        bit_array::BitArray,
        block::{BlockId, PartSetHeader},
        part_set::Part,
        proposal::{Heartbeat, Proposal},
        round_state::RoundStep,
        vote::{Vote, VoteType},
    },
    serde::{Deserialize, Serialize},
};

/// Upper bound for one encoded consensus message (1 MiB).
/// NOTE: keep in sync with the block part-set sizing.
pub const MAX_CONSENSUS_MESSAGE_SIZE: usize = 1_048_576;

// Message tags. 0x0_ for step announcements, 0x1_ for consensus data,
// 0x2_ for auxiliary signals.
const MSG_TAG_NEW_ROUND_STEP: u8 = 0x01;
const MSG_TAG_COMMIT_STEP: u8 = 0x02;
const MSG_TAG_PROPOSAL: u8 = 0x11;
const MSG_TAG_PROPOSAL_POL: u8 = 0x12;
const MSG_TAG_BLOCK_PART: u8 = 0x13;
const MSG_TAG_VOTE: u8 = 0x14;
const MSG_TAG_HAS_VOTE: u8 = 0x15;
const MSG_TAG_VOTE_SET_MAJ23: u8 = 0x16;
const MSG_TAG_VOTE_SET_BITS: u8 = 0x17;
const MSG_TAG_PROPOSAL_HEARTBEAT: u8 = 0x20;

/// Sent for every height/round/step transition of the local consensus
/// core.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct NewRoundStepMessage {
    pub height: i64,
    pub round: i32,
    pub step: RoundStep,
    /// Lets the peer estimate our round-0 start time.
    pub seconds_since_start_time: u32,
    pub last_commit_round: i32,
}

/// Sent when the local node reaches the commit step, so peers learn the
/// decided part-set header immediately.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct CommitStepMessage {
    pub height: i64,
    pub block_parts_header: PartSetHeader,
    pub block_parts: BitArray,
}

/// Announces a new proposed block.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ProposalMessage {
    pub proposal: Proposal,
}

/// Tells the peer which proof-of-lock prevotes we hold. Only meaningful
/// after the matching proposal has been received.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ProposalPolMessage {
    pub height: i64,
    pub proposal_pol_round: i32,
    pub proposal_pol: BitArray,
}

/// One part of the proposed block.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BlockPartMessage {
    pub height: i64,
    pub round: i32,
    pub part: Part,
}

/// A single vote.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct VoteMessage {
    pub vote: Vote,
}

/// Announces possession of a vote without carrying it.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct HasVoteMessage {
    pub height: i64,
    pub round: i32,
    pub vote_type: VoteType,
    pub index: u32,
}

/// Claims a +2/3 majority for a block id at (height, round, type).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct VoteSetMaj23Message {
    pub height: i64,
    pub round: i32,
    pub vote_type: VoteType,
    pub block_id: BlockId,
}

/// Reply to a maj23 claim: the votes the sender holds for that block id.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct VoteSetBitsMessage {
    pub height: i64,
    pub round: i32,
    pub vote_type: VoteType,
    pub block_id: BlockId,
    pub votes: BitArray,
}

/// Sign of life from a proposer waiting on transactions.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct ProposalHeartbeatMessage {
    pub heartbeat: Heartbeat,
}

/// The closed set of messages the reactor sends and receives.
#[derive(Clone, PartialEq, Debug)]
pub enum ConsensusMessage {
    NewRoundStep(NewRoundStepMessage),
    CommitStep(CommitStepMessage),
    Proposal(ProposalMessage),
    ProposalPol(ProposalPolMessage),
    BlockPart(BlockPartMessage),
    Vote(VoteMessage),
    HasVote(HasVoteMessage),
    VoteSetMaj23(VoteSetMaj23Message),
    VoteSetBits(VoteSetBitsMessage),
    ProposalHeartbeat(ProposalHeartbeatMessage),
}

impl ConsensusMessage {
    /// Short tag for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NewRoundStep(_) => "new_round_step",
            Self::CommitStep(_) => "commit_step",
            Self::Proposal(_) => "proposal",
            Self::ProposalPol(_) => "proposal_pol",
            Self::BlockPart(_) => "block_part",
            Self::Vote(_) => "vote",
            Self::HasVote(_) => "has_vote",
            Self::VoteSetMaj23(_) => "vote_set_maj23",
            Self::VoteSetBits(_) => "vote_set_bits",
            Self::ProposalHeartbeat(_) => "proposal_heartbeat",
        }
    }

    fn tag(&self) -> u8 {
        match self {
            Self::NewRoundStep(_) => MSG_TAG_NEW_ROUND_STEP,
            Self::CommitStep(_) => MSG_TAG_COMMIT_STEP,
            Self::Proposal(_) => MSG_TAG_PROPOSAL,
            Self::ProposalPol(_) => MSG_TAG_PROPOSAL_POL,
            Self::BlockPart(_) => MSG_TAG_BLOCK_PART,
            Self::Vote(_) => MSG_TAG_VOTE,
            Self::HasVote(_) => MSG_TAG_HAS_VOTE,
            Self::VoteSetMaj23(_) => MSG_TAG_VOTE_SET_MAJ23,
            Self::VoteSetBits(_) => MSG_TAG_VOTE_SET_BITS,
            Self::ProposalHeartbeat(_) => MSG_TAG_PROPOSAL_HEARTBEAT,
        }
    }

    // Bit-arrays cross the trust boundary inside several messages; reject
    // frames whose declared capacity and backing storage disagree.
    fn is_well_formed(&self) -> bool {
        match self {
            Self::CommitStep(m) => m.block_parts.is_well_formed(),
            Self::ProposalPol(m) => m.proposal_pol.is_well_formed(),
            Self::VoteSetBits(m) => m.votes.is_well_formed(),
            _ => true,
        }
    }
}

/// Encode a message into a tag-prefixed frame.
pub fn encode(msg: &ConsensusMessage) -> Result<Vec<u8>, EncodeError> {
    let body = match msg {
        ConsensusMessage::NewRoundStep(m) => bincode::serialize(m),
        ConsensusMessage::CommitStep(m) => bincode::serialize(m),
        ConsensusMessage::Proposal(m) => bincode::serialize(m),
        ConsensusMessage::ProposalPol(m) => bincode::serialize(m),
        ConsensusMessage::BlockPart(m) => bincode::serialize(m),
        ConsensusMessage::Vote(m) => bincode::serialize(m),
        ConsensusMessage::HasVote(m) => bincode::serialize(m),
        ConsensusMessage::VoteSetMaj23(m) => bincode::serialize(m),
        ConsensusMessage::VoteSetBits(m) => bincode::serialize(m),
        ConsensusMessage::ProposalHeartbeat(m) => bincode::serialize(m),
    }?;
    let size = body.len() + 1;
    if size > MAX_CONSENSUS_MESSAGE_SIZE {
        return Err(EncodeError::TooLarge {
            size,
            max: MAX_CONSENSUS_MESSAGE_SIZE,
        });
    }
    let mut frame = Vec::with_capacity(size);
    frame.push(msg.tag());
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Decode a tag-prefixed frame. Total: every failure mode is a
/// [`DecodeError`].
pub fn decode(frame: &[u8]) -> Result<ConsensusMessage, DecodeError> {
    if frame.is_empty() {
        return Err(DecodeError::EmptyFrame);
    }
    if frame.len() > MAX_CONSENSUS_MESSAGE_SIZE {
        return Err(DecodeError::Oversized {
            size: frame.len(),
            max: MAX_CONSENSUS_MESSAGE_SIZE,
        });
    }
    let body = &frame[1..];
    let msg = match frame[0] {
        MSG_TAG_NEW_ROUND_STEP => ConsensusMessage::NewRoundStep(decode_body(body)?),
        MSG_TAG_COMMIT_STEP => ConsensusMessage::CommitStep(decode_body(body)?),
        MSG_TAG_PROPOSAL => ConsensusMessage::Proposal(decode_body(body)?),
        MSG_TAG_PROPOSAL_POL => ConsensusMessage::ProposalPol(decode_body(body)?),
        MSG_TAG_BLOCK_PART => ConsensusMessage::BlockPart(decode_body(body)?),
        MSG_TAG_VOTE => ConsensusMessage::Vote(decode_body(body)?),
        MSG_TAG_HAS_VOTE => ConsensusMessage::HasVote(decode_body(body)?),
        MSG_TAG_VOTE_SET_MAJ23 => ConsensusMessage::VoteSetMaj23(decode_body(body)?),
        MSG_TAG_VOTE_SET_BITS => ConsensusMessage::VoteSetBits(decode_body(body)?),
        MSG_TAG_PROPOSAL_HEARTBEAT => ConsensusMessage::ProposalHeartbeat(decode_body(body)?),
        tag => return Err(DecodeError::UnknownTag(tag)),
    };
    if !msg.is_well_formed() {
        return Err(DecodeError::InvalidBody("inconsistent bit array".to_string()));
    }
    Ok(msg)
}

fn decode_body<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, DecodeError> {
    bincode::deserialize(body).map_err(|e| DecodeError::InvalidBody(e.to_string()))
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        consensus_types::{
            block::Hash,
            id::ValidatorId,
            vote::Signature,
        },
    };

    fn sample_block_id() -> BlockId {
        BlockId::new(
            Hash::of(b"block"),
            PartSetHeader {
                total: 4,
                hash: Hash::of(b"parts"),
            },
        )
    }

    fn sample_bits() -> BitArray {
        let mut bits = BitArray::new(7);
        bits.set_index(0, true);
        bits.set_index(5, true);
        bits
    }

    fn sample_messages() -> Vec<ConsensusMessage> {
        vec![
            ConsensusMessage::NewRoundStep(NewRoundStepMessage {
                height: 12,
                round: 1,
                step: RoundStep::Prevote,
                seconds_since_start_time: 3,
                last_commit_round: 0,
            }),
            ConsensusMessage::CommitStep(CommitStepMessage {
                height: 12,
                block_parts_header: sample_block_id().parts_header,
                block_parts: sample_bits(),
            }),
            ConsensusMessage::Proposal(ProposalMessage {
                proposal: Proposal {
                    height: 12,
                    round: 1,
                    block_parts_header: sample_block_id().parts_header,
                    pol_round: -1,
                    pol_block_id: BlockId::default(),
                    signature: Signature::default(),
                },
            }),
            ConsensusMessage::ProposalPol(ProposalPolMessage {
                height: 12,
                proposal_pol_round: 0,
                proposal_pol: sample_bits(),
            }),
            ConsensusMessage::BlockPart(BlockPartMessage {
                height: 12,
                round: 1,
                part: Part {
                    index: 2,
                    bytes: vec![1, 2, 3, 4],
                },
            }),
            ConsensusMessage::Vote(VoteMessage {
                vote: Vote {
                    validator_id: ValidatorId::from_bytes([9; 32]),
                    validator_index: 3,
                    height: 12,
                    round: 1,
                    vote_type: VoteType::Precommit,
                    block_id: sample_block_id(),
                    signature: Signature::default(),
                },
            }),
            ConsensusMessage::HasVote(HasVoteMessage {
                height: 12,
                round: 1,
                vote_type: VoteType::Prevote,
                index: 6,
            }),
            ConsensusMessage::VoteSetMaj23(VoteSetMaj23Message {
                height: 12,
                round: 1,
                vote_type: VoteType::Prevote,
                block_id: sample_block_id(),
            }),
            ConsensusMessage::VoteSetBits(VoteSetBitsMessage {
                height: 12,
                round: 1,
                vote_type: VoteType::Precommit,
                block_id: sample_block_id(),
                votes: sample_bits(),
            }),
            ConsensusMessage::ProposalHeartbeat(ProposalHeartbeatMessage {
                heartbeat: Heartbeat {
                    validator_id: ValidatorId::from_bytes([7; 32]),
                    validator_index: 1,
                    height: 12,
                    round: 1,
                    sequence: 42,
                    signature: Signature::default(),
                },
            }),
        ]
    }

    #[test]
    fn test_round_trip_all_variants() {
        for msg in sample_messages() {
            let frame = encode(&msg).unwrap();
            let decoded = decode(&frame).unwrap();
            assert_eq!(decoded, msg, "round trip failed for {}", msg.kind());
        }
    }

    #[test]
    fn test_tags_are_stable() {
        let tags: Vec<u8> = sample_messages()
            .iter()
            .map(|m| encode(m).unwrap()[0])
            .collect();
        assert_eq!(
            tags,
            vec![0x01, 0x02, 0x11, 0x12, 0x13, 0x14, 0x15, 0x16, 0x17, 0x20]
        );
    }

    #[test]
    fn test_decode_unknown_tag() {
        assert_eq!(decode(&[0xee, 1, 2, 3]), Err(DecodeError::UnknownTag(0xee)));
    }

    #[test]
    fn test_decode_empty_frame() {
        assert_eq!(decode(&[]), Err(DecodeError::EmptyFrame));
    }

    #[test]
    fn test_decode_oversized_frame() {
        let frame = vec![0x01; MAX_CONSENSUS_MESSAGE_SIZE + 1];
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::Oversized { .. })
        ));
    }

    #[test]
    fn test_decode_truncated_body() {
        let msg = sample_messages().remove(0);
        let frame = encode(&msg).unwrap();
        assert!(matches!(
            decode(&frame[..frame.len() - 1]),
            Err(DecodeError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_decode_invalid_vote_type_byte() {
        let msg = ConsensusMessage::HasVote(HasVoteMessage {
            height: 1,
            round: 0,
            vote_type: VoteType::Prevote,
            index: 0,
        });
        let mut frame = encode(&msg).unwrap();
        // The vote-type byte is the last field but one; corrupt every byte
        // position and require that no corruption panics.
        for i in 1..frame.len() {
            let orig = frame[i];
            frame[i] = 0xff;
            let _ = decode(&frame);
            frame[i] = orig;
        }
        // A targeted corruption of the vote-type byte fails cleanly.
        let body_offset = 1 + 8 + 4; // tag + height + round
        frame[body_offset] = 0x09;
        assert!(matches!(
            decode(&frame),
            Err(DecodeError::InvalidBody(_))
        ));
    }

    #[test]
    fn test_encode_rejects_oversized_part() {
        let msg = ConsensusMessage::BlockPart(BlockPartMessage {
            height: 1,
            round: 0,
            part: Part {
                index: 0,
                bytes: vec![0u8; MAX_CONSENSUS_MESSAGE_SIZE],
            },
        });
        assert!(matches!(encode(&msg), Err(EncodeError::TooLarge { .. })));
    }

    #[test]
    fn test_decode_rejects_malformed_bit_array() {
        // A VoteSetBits frame whose bit array claims more capacity than its
        // storage backs.
        let msg = ConsensusMessage::VoteSetBits(VoteSetBitsMessage {
            height: 1,
            round: 0,
            vote_type: VoteType::Prevote,
            block_id: sample_block_id(),
            votes: BitArray::new(8),
        });
        let mut frame = encode(&msg).unwrap();
        // Body layout (bincode fixint): height(8) round(4) type(1)
        // block_id(32 + 4 + 32), then the bit array's capacity as u64-le.
        let bits_offset = 1 + 8 + 4 + 1 + 32 + 4 + 32;
        assert_eq!(frame[bits_offset], 8);
        frame[bits_offset] = 200;
        assert!(matches!(decode(&frame), Err(DecodeError::InvalidBody(_))));
    }
}
