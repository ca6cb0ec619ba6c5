//! Block store seam.
//!
//! The reactor only reads the store, and only to help lagging peers: block
//! metas to validate a peer's part-set header, individual parts to gossip,
//! and commits to vote-gossip past heights. The canonical store lives with
//! the node; [`InMemoryBlockStore`] backs tests and local tooling.

use {
    consensus_types::{
        block::BlockMeta,
        part_set::{Part, PartSet},
        vote_set::Commit,
    },
    std::{
        collections::HashMap,
        sync::RwLock,
    },
};

/// Read access to committed blocks. Thread-safe.
pub trait BlockStore: Send + Sync {
    /// Height of the newest stored block, 0 when empty.
    fn height(&self) -> i64;
    fn load_block_meta(&self, height: i64) -> Option<BlockMeta>;
    fn load_block_part(&self, height: i64, index: usize) -> Option<Part>;
    fn load_block_commit(&self, height: i64) -> Option<Commit>;
}

struct StoredBlock {
    meta: BlockMeta,
    parts: PartSet,
    commit: Option<Commit>,
}

/// Map-backed block store.
#[derive(Default)]
pub struct InMemoryBlockStore {
    blocks: RwLock<HashMap<i64, StoredBlock>>,
}

impl InMemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store a block's meta, complete part set, and commit.
    pub fn save_block(&self, meta: BlockMeta, parts: PartSet, commit: Option<Commit>) {
        let height = meta.header.height;
        self.blocks
            .write()
            .expect("block store lock poisoned")
            .insert(
                height,
                StoredBlock {
                    meta,
                    parts,
                    commit,
                },
            );
    }
}

impl BlockStore for InMemoryBlockStore {
    fn height(&self) -> i64 {
        self.blocks
            .read()
            .expect("block store lock poisoned")
            .keys()
            .max()
            .copied()
            .unwrap_or(0)
    }

    fn load_block_meta(&self, height: i64) -> Option<BlockMeta> {
        self.blocks
            .read()
            .expect("block store lock poisoned")
            .get(&height)
            .map(|b| b.meta.clone())
    }

    fn load_block_part(&self, height: i64, index: usize) -> Option<Part> {
        self.blocks
            .read()
            .expect("block store lock poisoned")
            .get(&height)
            .and_then(|b| b.parts.get_part(index).cloned())
    }

    fn load_block_commit(&self, height: i64) -> Option<Commit> {
        self.blocks
            .read()
            .expect("block store lock poisoned")
            .get(&height)
            .and_then(|b| b.commit.clone())
    }
}

#[cfg(test)]
mod tests {
    use {
        super::*,
        consensus_types::block::{BlockId, Header, PartSetHeader},
    };

    fn stored_block(height: i64) -> (BlockMeta, PartSet) {
        let parts = PartSet::split(&vec![height as u8; 600], 256);
        let meta = BlockMeta {
            block_id: BlockId::new(parts.header().hash, parts.header()),
            header: Header {
                height,
                ..Default::default()
            },
        };
        (meta, parts)
    }

    #[test]
    fn test_empty_store() {
        let store = InMemoryBlockStore::new();
        assert_eq!(store.height(), 0);
        assert!(store.load_block_meta(1).is_none());
        assert!(store.load_block_part(1, 0).is_none());
        assert!(store.load_block_commit(1).is_none());
    }

    #[test]
    fn test_save_and_load() {
        let store = InMemoryBlockStore::new();
        let (meta, parts) = stored_block(3);
        let header: PartSetHeader = parts.header();
        store.save_block(meta, parts, None);

        assert_eq!(store.height(), 3);
        assert_eq!(
            store.load_block_meta(3).unwrap().block_id.parts_header,
            header
        );
        assert_eq!(store.load_block_part(3, 1).unwrap().index, 1);
        assert!(store.load_block_part(3, 99).is_none());
    }

    #[test]
    fn test_height_is_max() {
        let store = InMemoryBlockStore::new();
        for h in [5i64, 2, 9] {
            let (meta, parts) = stored_block(h);
            store.save_block(meta, parts, None);
        }
        assert_eq!(store.height(), 9);
    }
}
