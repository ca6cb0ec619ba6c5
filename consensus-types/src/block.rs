//! Blocks, block identifiers, and transactions.
//!
//! A block is identified by its content hash plus the header of the part
//! set it was split into ([`BlockId`]); consensus votes commit to both so
//! that peers can cross-check gossiped parts against the agreed split.

use {
    serde::{Deserialize, Serialize},
    sha2::{Digest, Sha256},
    std::fmt,
};

/// A 32-byte SHA-256 digest.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Hash(pub [u8; 32]);

impl Hash {
    /// Digest arbitrary bytes.
    pub fn of(bytes: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        Self(hasher.finalize().into())
    }

    /// Digest the concatenation of several byte slices.
    pub fn of_parts(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for p in parts {
            hasher.update(p);
        }
        Self(hasher.finalize().into())
    }

    /// The all-zero hash.
    pub fn zero() -> Self {
        Self([0u8; 32])
    }

    pub fn is_zero(&self) -> bool {
        self.0 == [0u8; 32]
    }

    /// Returns a process-unique hash. Intended for tests.
    pub fn new_unique() -> Self {
        use std::sync::atomic::{AtomicU64, Ordering};
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        let n = COUNTER.fetch_add(1, Ordering::Relaxed);
        let mut bytes = [0u8; 32];
        bytes[..8].copy_from_slice(&n.to_le_bytes());
        Self(bytes)
    }
}

impl fmt::Display for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(self.0))
    }
}

impl fmt::Debug for Hash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Hash({}..)", hex::encode(&self.0[..4]))
    }
}

/// Header of a part set: how many parts a block was split into, and the
/// digest binding them together.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Default)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: Hash,
}

impl PartSetHeader {
    /// The zero header, used before any proposal is known.
    pub fn zero() -> Self {
        Self::default()
    }

    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash.is_zero()
    }
}

impl fmt::Display for PartSetHeader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{:?}", self.total, self.hash)
    }
}

/// Identifies a block: content hash + the header of its part split.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize, Default)]
pub struct BlockId {
    pub hash: Hash,
    pub parts_header: PartSetHeader,
}

impl BlockId {
    pub fn new(hash: Hash, parts_header: PartSetHeader) -> Self {
        Self { hash, parts_header }
    }

    pub fn is_zero(&self) -> bool {
        self.hash.is_zero() && self.parts_header.is_zero()
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}@{}", self.hash, self.parts_header)
    }
}

/// A raw transaction, opaque to consensus.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Tx(pub Vec<u8>);

impl Tx {
    /// Content hash of the transaction.
    pub fn hash(&self) -> Hash {
        Hash::of(&self.0)
    }
}

/// Block header. Carries the linkage and digests consensus needs; the
/// application-level fields live with the execution layer.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize, Default)]
pub struct Header {
    /// Block height (monotonically increasing).
    pub height: i64,
    /// Proposal wall-clock time, unix milliseconds.
    pub time_ms: u64,
    /// Identifier of the previous committed block.
    pub last_block_id: BlockId,
    /// Digest over the transaction list.
    pub data_hash: Hash,
}

/// A full block: header, transactions, and the commit for the previous
/// height.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct Block {
    pub header: Header,
    pub txs: Vec<Tx>,
    pub last_commit: Option<crate::vote_set::Commit>,
}

/// Summary of a stored block: its id plus header, enough for a peer to
/// validate catch-up gossip without loading the whole block.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct BlockMeta {
    pub block_id: BlockId,
    pub header: Header,
}
