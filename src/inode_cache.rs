// SPDX-License-Identifier: MPL-2.0

//! The bounded inode cache.
//!
//! The cache hands out `Arc<Inode>` handles: the same inode number always
//! resolves to the same allocation while it stays cached, and the `Arc`
//! strong count serves as the reference count. Entries held only by the
//! cache (strong count one) are reclaim-eligible; the least recently used
//! of them is flushed and dropped when room is needed.

use lru::LruCache;

use crate::inode::Inode;
use crate::prelude::*;

pub(crate) struct InodeCache {
    cache: LruCache<u32, Arc<Inode>>,
}

impl InodeCache {
    /// The bound on cached inodes.
    const MAX_SIZE: usize = 64;

    pub fn new() -> Self {
        Self {
            cache: LruCache::unbounded(),
        }
    }

    /// Returns the cached inode, refreshing its recency.
    pub fn get(&mut self, ino: u32) -> Option<Arc<Inode>> {
        self.cache.get(&ino).cloned()
    }

    /// Inserts a loaded or freshly created inode, evicting an unreferenced
    /// entry first if the cache is full. Fails with `Busy` when every
    /// cached inode is pinned by an outstanding reference.
    pub fn insert(&mut self, ino: u32, inode: Arc<Inode>) -> Result<()> {
        if self.cache.len() >= Self::MAX_SIZE {
            self.evict_one()?;
        }
        self.cache.put(ino, inode);
        Ok(())
    }

    /// Drops the entry, if present. Used when the inode is freed on disk.
    pub fn remove(&mut self, ino: u32) -> Option<Arc<Inode>> {
        self.cache.pop(&ino)
    }

    /// Every cached inode, most recently used first.
    pub fn snapshot(&self) -> Vec<Arc<Inode>> {
        self.cache.iter().map(|(_, inode)| inode.clone()).collect()
    }

    fn evict_one(&mut self) -> Result<()> {
        // The iterator runs from most to least recently used, so the last
        // unpinned entry seen is the least recently used one.
        let victim = self
            .cache
            .iter()
            .filter(|(_, inode)| Arc::strong_count(inode) == 1)
            .last()
            .map(|(ino, _)| *ino);
        let Some(ino) = victim else {
            return_errno_with_message!(FsError::Busy, "all cached inodes are referenced");
        };
        if let Some(inode) = self.cache.pop(&ino) {
            inode.sync_metadata()?;
        }
        Ok(())
    }
}

impl Debug for InodeCache {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("InodeCache")
            .field("len", &self.cache.len())
            .finish()
    }
}
