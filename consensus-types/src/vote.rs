//! Validator votes.

use {
    crate::{block::BlockId, id::ValidatorId},
    serde::{de, Deserialize, Deserializer, Serialize, Serializer},
    std::fmt,
};

/// The two vote kinds of the two-phase protocol. The discriminants are the
/// wire bytes.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
#[repr(u8)]
pub enum VoteType {
    Prevote = 0x01,
    Precommit = 0x02,
}

impl VoteType {
    /// Decode a wire byte. None for anything but the two known kinds.
    pub fn from_u8(byte: u8) -> Option<Self> {
        match byte {
            0x01 => Some(VoteType::Prevote),
            0x02 => Some(VoteType::Precommit),
            _ => None,
        }
    }
}

impl fmt::Display for VoteType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VoteType::Prevote => write!(f, "Prevote"),
            VoteType::Precommit => write!(f, "Precommit"),
        }
    }
}

impl Serialize for VoteType {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for VoteType {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let byte = u8::deserialize(deserializer)?;
        VoteType::from_u8(byte)
            .ok_or_else(|| de::Error::custom(format!("invalid vote type byte {byte:#04x}")))
    }
}

/// A detached signature. Verification lives with the crypto layer.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Signature(pub [u8; 64]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 64])
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({}..)", hex::encode(&self.0[..4]))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_bytes(&self.0)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let bytes = <Vec<u8>>::deserialize(deserializer)?;
        let arr: [u8; 64] = bytes
            .try_into()
            .map_err(|_| de::Error::custom("signature must be 64 bytes"))?;
        Ok(Self(arr))
    }
}

/// A signed prevote or precommit for a block id (a zero block id is a nil
/// vote).
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Vote {
    pub validator_id: ValidatorId,
    pub validator_index: u32,
    pub height: i64,
    pub round: i32,
    pub vote_type: VoteType,
    pub block_id: BlockId,
    pub signature: Signature,
}

impl fmt::Display for Vote {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Vote{{{}:{} {}/{:02}/{} {}}}",
            self.validator_index,
            self.validator_id,
            self.height,
            self.round,
            self.vote_type,
            self.block_id,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_vote_type_bytes() {
        assert_eq!(VoteType::from_u8(0x01), Some(VoteType::Prevote));
        assert_eq!(VoteType::from_u8(0x02), Some(VoteType::Precommit));
        assert_eq!(VoteType::from_u8(0x03), None);
        assert_eq!(VoteType::from_u8(0x00), None);
    }

    #[test]
    fn test_signature_default_is_zero() {
        assert_eq!(Signature::default().0, [0u8; 64]);
    }
}
