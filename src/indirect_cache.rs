// SPDX-License-Identifier: MPL-2.0

//! A small write-back cache of indirect pointer blocks.

use lru::LruCache;

use crate::block_ptr::{Ext2Bid, BID_SIZE};
use crate::fs::Ext2;
use crate::prelude::*;

/// `IndirectBlockCache` keeps recently used indirect blocks in memory so
/// that walking and growing the block map does not reread them from the
/// device on every step.
pub(crate) struct IndirectBlockCache {
    cache: LruCache<Ext2Bid, IndirectBlock>,
    fs: Weak<Ext2>,
}

impl IndirectBlockCache {
    /// The upper bound on the size of the cache.
    const MAX_SIZE: usize = 16;

    pub fn new(fs: Weak<Ext2>) -> Self {
        Self {
            cache: LruCache::unbounded(),
            fs,
        }
    }

    /// Retrieves a reference to an `IndirectBlock` by its `bid`, loading it
    /// from the device on a miss.
    pub fn find(&mut self, bid: Ext2Bid) -> Result<&IndirectBlock> {
        self.ensure_cached(bid)?;
        Ok(self.cache.get(&bid).expect("just inserted"))
    }

    /// Retrieves a mutable reference to an `IndirectBlock` by its `bid`,
    /// loading it from the device on a miss.
    pub fn find_mut(&mut self, bid: Ext2Bid) -> Result<&mut IndirectBlock> {
        self.ensure_cached(bid)?;
        Ok(self.cache.get_mut(&bid).expect("just inserted"))
    }

    fn ensure_cached(&mut self, bid: Ext2Bid) -> Result<()> {
        if self.cache.contains(&bid) {
            return Ok(());
        }
        self.try_shrink()?;
        let fs = self.fs();
        let mut data = vec![0u8; fs.block_size()].into_boxed_slice();
        fs.read_block(bid, &mut data)?;
        self.cache.put(
            bid,
            IndirectBlock {
                data,
                state: State::UpToDate,
            },
        );
        Ok(())
    }

    /// Inserts a freshly built `IndirectBlock` under `bid`.
    pub fn insert(&mut self, bid: Ext2Bid, block: IndirectBlock) -> Result<()> {
        self.try_shrink()?;
        self.cache.put(bid, block);
        Ok(())
    }

    /// Removes and returns the `IndirectBlock` for `bid`, if cached. Used
    /// when the block itself is being freed; its content need not be
    /// written back.
    pub fn remove(&mut self, bid: Ext2Bid) -> Option<IndirectBlock> {
        self.cache.pop(&bid).map(|mut block| {
            block.state = State::UpToDate;
            block
        })
    }

    /// Evicts every block from the cache, persisting the dirty ones.
    pub fn evict_all(&mut self) -> Result<()> {
        let cache_size = self.cache.len();
        self.evict(cache_size)
    }

    /// Evicts some blocks if the cache has grown past its bound.
    fn try_shrink(&mut self) -> Result<()> {
        if self.cache.len() < Self::MAX_SIZE {
            return Ok(());
        }
        self.evict(Self::MAX_SIZE / 2)
    }

    fn evict(&mut self, num: usize) -> Result<()> {
        let num = num.min(self.cache.len());
        for _ in 0..num {
            if let Some((bid, block)) = self.cache.pop_lru() {
                if block.is_dirty() {
                    self.fs().write_block(bid, &block.data)?;
                }
            }
        }
        Ok(())
    }

    fn fs(&self) -> Arc<Ext2> {
        self.fs.upgrade().unwrap()
    }
}

impl Debug for IndirectBlockCache {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("IndirectBlockCache")
            .field("len", &self.cache.len())
            .finish()
    }
}

/// A single cached indirect block buffer.
pub(crate) struct IndirectBlock {
    data: Box<[u8]>,
    state: State,
}

impl IndirectBlock {
    /// Allocates a block with every pointer zeroed; it is born dirty.
    pub fn alloc_zeroed(block_size: usize) -> Self {
        Self {
            data: vec![0u8; block_size].into_boxed_slice(),
            state: State::Dirty,
        }
    }

    /// Returns `true` if it is in the dirty state.
    pub fn is_dirty(&self) -> bool {
        self.state == State::Dirty
    }

    /// Reads the block id at a specified `idx`.
    pub fn read_bid(&self, idx: usize) -> Ext2Bid {
        let offset = idx * BID_SIZE;
        bytemuck::pod_read_unaligned(&self.data[offset..offset + BID_SIZE])
    }

    /// Writes a block id at a specified `idx` and marks the block dirty.
    pub fn write_bid(&mut self, idx: usize, bid: Ext2Bid) {
        let offset = idx * BID_SIZE;
        self.data[offset..offset + BID_SIZE].copy_from_slice(bytemuck::bytes_of(&bid));
        self.state = State::Dirty;
    }
}

#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum State {
    /// The content is consistent with the corresponding disk content.
    UpToDate,
    /// The content has been updated and not yet written back.
    Dirty,
}
