//! A small LRU cache of finalized blocks, looked up by ID or by height.

use std::collections::{HashMap, VecDeque};

use crate::{
    block::Block,
    types::data_types::{BlockHeight, CryptoHash},
};

/// How many recently used finalized blocks the block manager keeps decoded in memory.
pub(crate) const BLOCK_CACHE_CAPACITY: usize = 10;

pub(crate) struct BlockCache {
    capacity: usize,
    blocks: HashMap<CryptoHash, Block>,
    by_height: HashMap<BlockHeight, CryptoHash>,
    // Least recently used first.
    recency: VecDeque<CryptoHash>,
}

impl BlockCache {
    pub(crate) fn new(capacity: usize) -> BlockCache {
        BlockCache {
            capacity,
            blocks: HashMap::new(),
            by_height: HashMap::new(),
            recency: VecDeque::new(),
        }
    }

    pub(crate) fn get(&mut self, id: &CryptoHash) -> Option<Block> {
        let block = self.blocks.get(id)?.clone();
        self.touch(id);
        Some(block)
    }

    pub(crate) fn get_by_height(&mut self, height: BlockHeight) -> Option<Block> {
        let id = *self.by_height.get(&height)?;
        self.get(&id)
    }

    pub(crate) fn put(&mut self, block: Block) {
        if self.capacity == 0 {
            return;
        }
        let id = block.id();
        if self.blocks.contains_key(&id) {
            self.touch(&id);
            return;
        }
        while self.blocks.len() >= self.capacity {
            match self.recency.pop_front() {
                Some(evicted) => {
                    if let Some(block) = self.blocks.remove(&evicted) {
                        self.by_height.remove(&block.height());
                    }
                }
                None => break,
            }
        }
        self.by_height.insert(block.height(), id);
        self.blocks.insert(id, block);
        self.recency.push_back(id);
    }

    pub(crate) fn len(&self) -> usize {
        self.blocks.len()
    }

    fn touch(&mut self, id: &CryptoHash) {
        if let Some(pos) = self.recency.iter().position(|cached| cached == id) {
            self.recency.remove(pos);
        }
        self.recency.push_back(*id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{block::block::BlockParams, block::header::VERSION_2, types::commit_votes::CommitVoteSet};

    fn block(height: u64) -> Block {
        Block::new(
            BlockParams::builder()
                .version(VERSION_2)
                .height(BlockHeight::new(height))
                .timestamp(height as i64)
                .votes(CommitVoteSet::empty(0))
                .result(Vec::new())
                .build(),
        )
    }

    #[test]
    fn evicts_least_recently_used() {
        let mut cache = BlockCache::new(2);
        let (a, b, c) = (block(1), block(2), block(3));
        cache.put(a.clone());
        cache.put(b.clone());
        assert!(cache.get(&a.id()).is_some());
        cache.put(c.clone());
        assert_eq!(cache.len(), 2);
        assert!(cache.get(&b.id()).is_none());
        assert!(cache.get_by_height(BlockHeight::new(2)).is_none());
        assert_eq!(cache.get_by_height(BlockHeight::new(1)), Some(a));
        assert_eq!(cache.get(&c.id()), Some(c));
    }

    #[test]
    fn holds_block_cache_capacity_blocks() {
        let mut cache = BlockCache::new(BLOCK_CACHE_CAPACITY);
        for height in 0..=BLOCK_CACHE_CAPACITY as u64 {
            cache.put(block(height));
        }
        assert_eq!(cache.len(), BLOCK_CACHE_CAPACITY);
        assert!(cache.get_by_height(BlockHeight::new(0)).is_none());
        assert!(cache.get_by_height(BlockHeight::new(BLOCK_CACHE_CAPACITY as u64)).is_some());
    }
}
