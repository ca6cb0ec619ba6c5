//! Block part sets.
//!
//! Proposed blocks are split into fixed-size parts so gossip can pipeline
//! delivery: every peer forwards the parts it has, tracked bit-per-part.
//! The split is committed to by a [`PartSetHeader`] carried inside the
//! proposal and the block id.

use {
    crate::{
        bit_array::BitArray,
        block::{Hash, PartSetHeader},
        error::PartSetError,
    },
    serde::{Deserialize, Serialize},
    std::fmt,
};

/// Default part size used when splitting blocks (64 KiB).
pub const BLOCK_PART_SIZE: usize = 65_536;

/// One chunk of a split block.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct Part {
    pub index: u32,
    pub bytes: Vec<u8>,
}

/// A (possibly incomplete) set of block parts for one proposal.
#[derive(Clone, PartialEq, Debug)]
pub struct PartSet {
    header: PartSetHeader,
    parts: Vec<Option<Part>>,
    received: BitArray,
    count: u32,
}

impl PartSet {
    /// Split raw block bytes into a complete part set.
    pub fn split(data: &[u8], part_size: usize) -> Self {
        assert!(part_size > 0, "part size must be positive");
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![&[]]
        } else {
            data.chunks(part_size).collect()
        };
        let total = chunks.len() as u32;
        let header = PartSetHeader {
            total,
            hash: Hash::of(data),
        };
        let mut received = BitArray::new(total as usize);
        let parts = chunks
            .into_iter()
            .enumerate()
            .map(|(index, bytes)| {
                received.set_index(index, true);
                Some(Part {
                    index: index as u32,
                    bytes: bytes.to_vec(),
                })
            })
            .collect();
        Self {
            header,
            parts,
            received,
            count: total,
        }
    }

    /// An empty part set awaiting parts for the given header.
    pub fn new_from_header(header: PartSetHeader) -> Self {
        Self {
            header,
            parts: vec![None; header.total as usize],
            received: BitArray::new(header.total as usize),
            count: 0,
        }
    }

    pub fn header(&self) -> PartSetHeader {
        self.header
    }

    /// True when this set was built for exactly the given header.
    pub fn has_header(&self, header: &PartSetHeader) -> bool {
        !header.is_zero() && self.header == *header
    }

    /// Add a received part. Returns Ok(false) for a duplicate.
    pub fn add_part(&mut self, part: Part) -> Result<bool, PartSetError> {
        let index = part.index;
        if index >= self.header.total {
            return Err(PartSetError::InvalidIndex {
                index,
                total: self.header.total,
            });
        }
        if self.parts[index as usize].is_some() {
            return Ok(false);
        }
        self.parts[index as usize] = Some(part);
        self.received.set_index(index as usize, true);
        self.count += 1;
        Ok(true)
    }

    pub fn get_part(&self, index: usize) -> Option<&Part> {
        self.parts.get(index).and_then(|p| p.as_ref())
    }

    /// Bit per part: set when the part has been received.
    pub fn bit_array(&self) -> BitArray {
        self.received.clone()
    }

    pub fn total(&self) -> u32 {
        self.header.total
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn is_complete(&self) -> bool {
        self.count == self.header.total
    }

    /// Reassemble the block bytes. None until complete.
    pub fn assemble(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut out = Vec::new();
        for part in self.parts.iter().flatten() {
            out.extend_from_slice(&part.bytes);
        }
        Some(out)
    }
}

impl fmt::Display for PartSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PartSet{{{}/{} {}}}", self.count, self.header.total, self.received)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_and_reassemble() {
        let data: Vec<u8> = (0u8..=255).cycle().take(1000).collect();
        let ps = PartSet::split(&data, 256);
        assert_eq!(ps.total(), 4);
        assert!(ps.is_complete());
        assert_eq!(ps.assemble().unwrap(), data);
    }

    #[test]
    fn test_incremental_fill() {
        let data = vec![7u8; 600];
        let complete = PartSet::split(&data, 256);
        let mut partial = PartSet::new_from_header(complete.header());
        assert!(!partial.is_complete());
        assert!(partial.assemble().is_none());

        for i in 0..complete.total() as usize {
            let part = complete.get_part(i).unwrap().clone();
            assert!(partial.add_part(part).unwrap());
        }
        assert!(partial.is_complete());
        assert_eq!(partial.assemble().unwrap(), data);
    }

    #[test]
    fn test_duplicate_and_out_of_range() {
        let complete = PartSet::split(b"hello world", 4);
        let mut partial = PartSet::new_from_header(complete.header());
        let part = complete.get_part(0).unwrap().clone();
        assert!(partial.add_part(part.clone()).unwrap());
        // Duplicate is a no-op, not an error.
        assert!(!partial.add_part(part).unwrap());
        let bogus = Part {
            index: 99,
            bytes: vec![],
        };
        assert!(matches!(
            partial.add_part(bogus),
            Err(PartSetError::InvalidIndex { .. })
        ));
    }

    #[test]
    fn test_has_header() {
        let ps = PartSet::split(b"abc", 2);
        assert!(ps.has_header(&ps.header()));
        assert!(!ps.has_header(&PartSetHeader::zero()));
    }
}
