// SPDX-License-Identifier: MPL-2.0

//! The volume engine: superblock and group-descriptor bookkeeping, bitmap
//! allocation of blocks and inodes, the inode table, and write-back.

use bytemuck::Zeroable;

use crate::block_dev::{self, BlockDevice};
use crate::block_group::{BlockGroup, RawGroupDescriptor, GROUP_DESCRIPTOR_SIZE};
use crate::block_ptr::{Ext2Bid, BID_SIZE};
use crate::dir::{DirEntryHeader, HEADER_LEN};
use crate::indirect_cache::IndirectBlockCache;
use crate::inode::{
    FilePerm, FileType, Inode, InodeDesc, RawInode, ROOT_INO,
};
use crate::inode_cache::InodeCache;
use crate::prelude::*;
use crate::super_block::{
    FsState, RawSuperBlock, SuperBlock, GOOD_OLD_FIRST_INO, GOOD_OLD_INODE_SIZE, MAGIC_NUM,
    SUPER_BLOCK_OFFSET,
};

/// One mounted ext2 volume.
pub struct Ext2 {
    device: Arc<dyn BlockDevice>,
    read_only: bool,
    block_size: usize,
    inode_size: usize,
    blocks_count: u32,
    first_data_block: Ext2Bid,
    blocks_per_group: u32,
    inodes_per_group: u32,
    first_ino: u32,
    has_filetype: bool,
    descriptor_table_bid: Ext2Bid,
    super_block: Mutex<Dirty<SuperBlock>>,
    block_groups: Vec<BlockGroup>,
    inode_cache: Mutex<InodeCache>,
    indirect_cache: Mutex<IndirectBlockCache>,
    self_ref: Weak<Ext2>,
}

impl Ext2 {
    /// Opens the volume on `device`, verifying the superblock and loading
    /// every group descriptor and bitmap.
    pub fn open(device: Arc<dyn BlockDevice>, read_only: bool) -> Result<Arc<Self>> {
        if !device.block_size().is_power_of_two() {
            return_errno_with_message!(FsError::Invalid, "device block size is not a power of two");
        }

        let raw = {
            let mut buf = [0u8; core::mem::size_of::<RawSuperBlock>()];
            block_dev::read_bytes(&*device, SUPER_BLOCK_OFFSET as u64, &mut buf)?;
            bytemuck::pod_read_unaligned::<RawSuperBlock>(&buf)
        };
        let super_block = SuperBlock::try_from(raw)?;

        if !read_only && !device.supports_write() {
            return_errno_with_message!(FsError::ReadOnly, "device does not support writing");
        }
        if !read_only && super_block.has_unknown_ro_features() {
            return_errno_with_message!(
                FsError::NotExt2,
                "unknown readonly-compatible features; mount read-only"
            );
        }
        if super_block.block_size() % device.block_size() != 0 {
            return_errno_with_message!(
                FsError::Invalid,
                "device block size does not divide the filesystem block size"
            );
        }
        let device_bytes = device.block_count() * device.block_size() as u64;
        let volume_bytes = super_block.total_blocks() as u64 * super_block.block_size() as u64;
        if volume_bytes > device_bytes {
            return_errno_with_message!(FsError::NotExt2, "volume is larger than its device");
        }

        let descriptor_table_bid = super_block.first_data_block() + 1;
        let group_count = super_block.block_groups_count();
        let descriptor_table = {
            let mut buf = vec![0u8; group_count * GROUP_DESCRIPTOR_SIZE];
            let offset = descriptor_table_bid as u64 * super_block.block_size() as u64;
            block_dev::read_bytes(&*device, offset, &mut buf)?;
            buf
        };
        let block_groups = (0..group_count)
            .map(|idx| BlockGroup::load(&*device, &descriptor_table, idx, &super_block))
            .collect::<Result<Vec<_>>>()?;

        debug!("ext2: mounted volume: {:?}", super_block);

        Ok(Arc::new_cyclic(|weak| Self {
            read_only,
            block_size: super_block.block_size(),
            inode_size: super_block.inode_size(),
            blocks_count: super_block.total_blocks(),
            first_data_block: super_block.first_data_block(),
            blocks_per_group: super_block.blocks_per_group(),
            inodes_per_group: super_block.inodes_per_group(),
            first_ino: super_block.first_ino(),
            has_filetype: super_block.has_filetype(),
            descriptor_table_bid,
            super_block: Mutex::new(Dirty::new(super_block)),
            block_groups,
            inode_cache: Mutex::new(InodeCache::new()),
            indirect_cache: Mutex::new(IndirectBlockCache::new(weak.clone())),
            self_ref: weak.clone(),
            device,
        }))
    }

    /// Returns the block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the total number of blocks.
    pub fn total_blocks(&self) -> u32 {
        self.blocks_count
    }

    /// Returns the number of free blocks.
    pub fn free_blocks_count(&self) -> u32 {
        self.super_block.lock().free_blocks_count()
    }

    /// Returns the number of free inodes.
    pub fn free_inodes_count(&self) -> u32 {
        self.super_block.lock().free_inodes_count()
    }

    /// Whether the volume was mounted without write support.
    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    pub(crate) fn ptrs_per_block(&self) -> u32 {
        (self.block_size / BID_SIZE) as u32
    }

    pub(crate) fn has_filetype(&self) -> bool {
        self.has_filetype
    }

    pub(crate) fn indirect_cache(&self) -> &Mutex<IndirectBlockCache> {
        &self.indirect_cache
    }

    pub(crate) fn group_count(&self) -> usize {
        self.block_groups.len()
    }

    pub(crate) fn group(&self, idx: usize) -> &BlockGroup {
        &self.block_groups[idx]
    }

    /// The root directory.
    pub(crate) fn root_inode(&self) -> Result<Arc<Inode>> {
        self.lookup_inode(ROOT_INO)
    }

    /// Reads one filesystem block.
    pub(crate) fn read_block(&self, bid: Ext2Bid, buf: &mut [u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size);
        if bid >= self.blocks_count {
            return_errno_with_message!(FsError::Io, "block number out of range");
        }
        block_dev::read_bytes(&*self.device, bid as u64 * self.block_size as u64, buf)
    }

    /// Writes one filesystem block.
    pub(crate) fn write_block(&self, bid: Ext2Bid, buf: &[u8]) -> Result<()> {
        debug_assert_eq!(buf.len(), self.block_size);
        if self.read_only {
            return_errno_with_message!(FsError::ReadOnly, "write on a read-only volume");
        }
        if bid >= self.blocks_count {
            return_errno_with_message!(FsError::Io, "block number out of range");
        }
        block_dev::write_bytes(&*self.device, bid as u64 * self.block_size as u64, buf)
    }

    /// Allocates one block, searching the bitmaps from `hint_group` and
    /// wrapping around.
    pub(crate) fn alloc_block(&self, hint_group: usize) -> Result<Ext2Bid> {
        let count = self.block_groups.len();
        for i in 0..count {
            let g = (hint_group + i) % count;
            if let Some(idx) = self.block_groups[g].alloc_block() {
                self.super_block.lock().dec_free_blocks();
                return Ok(self.first_data_block + g as u32 * self.blocks_per_group + idx);
            }
        }
        return_errno_with_message!(FsError::NoSpace, "no free blocks left")
    }

    /// Clears the block's bitmap bit. Freeing an already-free block is an
    /// invariant violation that is logged, not fatal.
    pub(crate) fn free_block(&self, bid: Ext2Bid) {
        if bid < self.first_data_block || bid >= self.blocks_count {
            warn!("ext2: freeing block {} outside the volume", bid);
            return;
        }
        let rel = bid - self.first_data_block;
        let group = (rel / self.blocks_per_group) as usize;
        let idx = rel % self.blocks_per_group;
        if self.block_groups[group].free_block(idx) {
            self.super_block.lock().inc_free_blocks();
        }
    }

    /// Allocates a fresh inode and returns it, cached and dirty.
    ///
    /// Ordinary objects land in `hint_group` (their parent's group) when it
    /// has room; new directories go to the group with the most free inodes.
    pub(crate) fn alloc_inode(
        &self,
        hint_group: usize,
        type_: FileType,
        perm: FilePerm,
        uid: u32,
        gid: u32,
    ) -> Result<Arc<Inode>> {
        let is_dir = type_ == FileType::Dir;
        let count = self.block_groups.len();
        let start = if is_dir {
            self.least_used_group()
        } else {
            hint_group
        };

        for i in 0..count {
            let g = (start + i) % count;
            let first_reserved = if g == 0 { self.first_ino - 1 } else { 0 };
            let Some(idx) = self.block_groups[g].alloc_inode(is_dir, first_reserved) else {
                continue;
            };
            let ino = g as u32 * self.inodes_per_group + idx + 1;
            self.super_block.lock().dec_free_inodes();

            let desc = InodeDesc::new(type_, perm, uid, gid);
            let inode = Inode::new(ino, g, Dirty::new_dirty(desc), self.self_ref.clone());
            if let Err(e) = self.inode_cache.lock().insert(ino, inode.clone()) {
                self.block_groups[g].free_inode(idx, is_dir);
                self.super_block.lock().inc_free_inodes();
                return Err(e);
            }
            return Ok(inode);
        }
        return_errno_with_message!(FsError::NoSpace, "no free inodes left")
    }

    /// Frees the inode's bitmap bit and drops it from the cache. The
    /// caller has already written back the deleted body.
    pub(crate) fn free_inode(&self, ino: u32, was_dir: bool) -> Result<()> {
        let (group, idx) = self.inode_location(ino)?;
        self.inode_cache.lock().remove(ino);
        if self.block_groups[group].free_inode(idx, was_dir) {
            self.super_block.lock().inc_free_inodes();
        }
        Ok(())
    }

    /// Fetches the inode, from the cache or the inode table.
    ///
    /// Every concurrent `lookup_inode` of the same live number yields the
    /// same `Arc` identity.
    pub(crate) fn lookup_inode(&self, ino: u32) -> Result<Arc<Inode>> {
        let (group, idx) = self.inode_location(ino)?;
        if !self.block_groups[group].is_inode_allocated(idx) {
            return_errno_with_message!(FsError::NotFound, "inode is not allocated");
        }

        let mut cache = self.inode_cache.lock();
        if let Some(inode) = cache.get(ino) {
            return Ok(inode);
        }

        let (bid, offset) = self.inode_table_pos(group, idx);
        let mut block = vec![0u8; self.block_size];
        self.read_block(bid, &mut block)?;
        let raw: RawInode =
            bytemuck::pod_read_unaligned(&block[offset..offset + GOOD_OLD_INODE_SIZE]);
        let desc = InodeDesc::try_from_raw(&raw, self.block_size)?;

        let inode = Inode::new(ino, group, Dirty::new(desc), self.self_ref.clone());
        cache.insert(ino, inode.clone())?;
        Ok(inode)
    }

    /// Writes an inode body back into its slot of the inode table.
    pub(crate) fn sync_inode(&self, ino: u32, desc: &InodeDesc) -> Result<()> {
        let (group, idx) = self.inode_location(ino)?;
        let (bid, offset) = self.inode_table_pos(group, idx);
        let mut block = vec![0u8; self.block_size];
        self.read_block(bid, &mut block)?;
        let raw = desc.to_raw(self.block_size);
        block[offset..offset + GOOD_OLD_INODE_SIZE].copy_from_slice(bytemuck::bytes_of(&raw));
        self.write_block(bid, &block)
    }

    /// Flushes every dirty cached inode, the indirect blocks, the group
    /// metadata and the superblock.
    pub fn sync_all(&self) -> Result<()> {
        let cached_inodes = self.inode_cache.lock().snapshot();
        for inode in cached_inodes {
            inode.sync_metadata()?;
        }
        self.indirect_cache.lock().evict_all()?;
        for group in &self.block_groups {
            group.sync_metadata(&*self.device, self.block_size, self.descriptor_table_bid)?;
        }

        let mut super_block = self.super_block.lock();
        if super_block.is_dirty() {
            let raw = super_block.to_raw();
            block_dev::write_bytes(
                &*self.device,
                SUPER_BLOCK_OFFSET as u64,
                bytemuck::bytes_of(&raw),
            )?;
            super_block.clear_dirty();
        }
        Ok(())
    }

    fn least_used_group(&self) -> usize {
        let mut best = 0;
        let mut best_free = 0;
        for (idx, group) in self.block_groups.iter().enumerate() {
            let free = group.free_inodes_count();
            if free > best_free {
                best = idx;
                best_free = free;
            }
        }
        best
    }

    fn inode_location(&self, ino: u32) -> Result<(usize, u32)> {
        let total = self.inodes_per_group * self.block_groups.len() as u32;
        if ino == 0 || ino > total {
            return_errno_with_message!(FsError::Invalid, "inode number out of range");
        }
        let idx0 = ino - 1;
        Ok(((idx0 / self.inodes_per_group) as usize, idx0 % self.inodes_per_group))
    }

    fn inode_table_pos(&self, group: usize, idx: u32) -> (Ext2Bid, usize) {
        let table_bid = self.block_groups[group].inode_table_bid();
        let byte = idx as u64 * self.inode_size as u64;
        (
            table_bid + (byte / self.block_size as u64) as Ext2Bid,
            (byte % self.block_size as u64) as usize,
        )
    }
}

impl Debug for Ext2 {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Ext2")
            .field("block_size", &self.block_size)
            .field("blocks_count", &self.blocks_count)
            .field("groups", &self.block_groups.len())
            .field("read_only", &self.read_only)
            .finish()
    }
}

/// Knobs for [`Ext2::format`].
#[derive(Clone, Copy, Debug)]
pub struct FormatOptions {
    /// Filesystem block size: 1024, 2048 or 4096.
    pub block_size: usize,
    /// Inode count; a size-derived default when `None`.
    pub inodes: Option<u32>,
}

impl Default for FormatOptions {
    fn default() -> Self {
        Self {
            block_size: 1024,
            inodes: None,
        }
    }
}

impl Ext2 {
    /// Writes a fresh single-group revision-0 volume onto `device`: the
    /// superblock, one group descriptor, both bitmaps, the inode table and
    /// an empty root directory.
    pub fn format(device: &Arc<dyn BlockDevice>, options: FormatOptions) -> Result<()> {
        let bs = options.block_size;
        if !matches!(bs, 1024 | 2048 | 4096) {
            return_errno_with_message!(FsError::Invalid, "unsupported block size");
        }
        if !device.supports_write() {
            return_errno_with_message!(FsError::ReadOnly, "device does not support writing");
        }
        if bs % device.block_size() != 0 {
            return_errno_with_message!(
                FsError::Invalid,
                "device block size does not divide the filesystem block size"
            );
        }

        let first_data_block = u32::from(bs == 1024);
        let blocks_per_group = (bs * 8) as u32;
        let device_bytes = device.block_count() * device.block_size() as u64;
        let total_blocks =
            ((device_bytes / bs as u64) as u32).min(first_data_block + blocks_per_group);

        let inodes_per_block = (bs / GOOD_OLD_INODE_SIZE) as u32;
        let inodes = options
            .inodes
            .unwrap_or((total_blocks / 4).max(16))
            .clamp(inodes_per_block, (bs * 8) as u32)
            .div_ceil(inodes_per_block)
            * inodes_per_block;
        let inode_table_blocks = inodes / inodes_per_block;

        let descriptor_bid = first_data_block + 1;
        let block_bitmap_bid = descriptor_bid + 1;
        let inode_bitmap_bid = block_bitmap_bid + 1;
        let inode_table_bid = inode_bitmap_bid + 1;
        let root_dir_bid = inode_table_bid + inode_table_blocks;
        let first_free = root_dir_bid + 1;
        if total_blocks < first_free + 8 {
            return_errno_with_message!(FsError::Invalid, "device too small to format");
        }

        let free_blocks = total_blocks - first_free;
        let free_inodes = inodes - (GOOD_OLD_FIRST_INO - 1);

        let write_block = |bid: u32, buf: &[u8]| -> Result<()> {
            block_dev::write_bytes(&**device, bid as u64 * bs as u64, buf)
        };

        // Superblock, always at byte 1024.
        let mut raw_sb = RawSuperBlock::zeroed();
        raw_sb.inodes_count = inodes;
        raw_sb.blocks_count = total_blocks;
        raw_sb.free_blocks_count = free_blocks;
        raw_sb.free_inodes_count = free_inodes;
        raw_sb.first_data_block = first_data_block;
        raw_sb.log_block_size = (bs.trailing_zeros() - 10) as u32;
        raw_sb.log_frag_size = raw_sb.log_block_size;
        raw_sb.blocks_per_group = blocks_per_group;
        raw_sb.frags_per_group = blocks_per_group;
        raw_sb.inodes_per_group = inodes;
        raw_sb.magic = MAGIC_NUM;
        raw_sb.state = FsState::Valid as u16;
        raw_sb.errors = 1;
        raw_sb.wtime = now();
        block_dev::write_bytes(
            &**device,
            SUPER_BLOCK_OFFSET as u64,
            bytemuck::bytes_of(&raw_sb),
        )?;

        // The single group descriptor.
        let mut block = vec![0u8; bs];
        let descriptor = RawGroupDescriptor {
            block_bitmap: block_bitmap_bid,
            inode_bitmap: inode_bitmap_bid,
            inode_table: inode_table_bid,
            free_blocks_count: free_blocks as u16,
            free_inodes_count: free_inodes as u16,
            dirs_count: 1,
            ..RawGroupDescriptor::zeroed()
        };
        block[..GROUP_DESCRIPTOR_SIZE].copy_from_slice(bytemuck::bytes_of(&descriptor));
        write_block(descriptor_bid, &block)?;

        // Block bitmap: metadata blocks and the root block are in use; the
        // pad bits past the volume's end are set, by convention.
        block.fill(0);
        for idx in 0..(first_free - first_data_block) {
            bitmap_set(&mut block, idx);
        }
        for idx in (total_blocks - first_data_block)..(bs * 8) as u32 {
            bitmap_set(&mut block, idx);
        }
        write_block(block_bitmap_bid, &block)?;

        // Inode bitmap: the reserved inodes 1..11, plus tail padding.
        block.fill(0);
        for idx in 0..(GOOD_OLD_FIRST_INO - 1) {
            bitmap_set(&mut block, idx);
        }
        for idx in inodes..(bs * 8) as u32 {
            bitmap_set(&mut block, idx);
        }
        write_block(inode_bitmap_bid, &block)?;

        // Inode table, zeroed except the root inode.
        block.fill(0);
        for bid in inode_table_bid..inode_table_bid + inode_table_blocks {
            write_block(bid, &block)?;
        }
        let mut root = RawInode::zeroed();
        root.mode = FileType::Dir as u16 | 0o755;
        root.links_count = 2;
        root.size = bs as u32;
        root.blocks = (bs / 512) as u32;
        root.atime = now();
        root.ctime = now();
        root.mtime = now();
        root.block_ptrs.set_direct(0, root_dir_bid);
        block_dev::write_bytes(
            &**device,
            inode_table_bid as u64 * bs as u64 + (ROOT_INO - 1) as u64 * GOOD_OLD_INODE_SIZE as u64,
            bytemuck::bytes_of(&root),
        )?;

        // The root directory's one block: `.` and a block-spanning `..`.
        block.fill(0);
        let dot = DirEntryHeader {
            ino: ROOT_INO,
            rec_len: align4(HEADER_LEN + 1) as u16,
            name_len: 1,
            file_type: 0,
        };
        block[..HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&dot));
        block[HEADER_LEN] = b'.';
        let dotdot_off = dot.rec_len as usize;
        let dotdot = DirEntryHeader {
            ino: ROOT_INO,
            rec_len: (bs - dotdot_off) as u16,
            name_len: 2,
            file_type: 0,
        };
        block[dotdot_off..dotdot_off + HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&dotdot));
        block[dotdot_off + HEADER_LEN] = b'.';
        block[dotdot_off + HEADER_LEN + 1] = b'.';
        write_block(root_dir_bid, &block)?;

        debug!(
            "ext2: formatted volume: {} blocks of {} bytes, {} inodes",
            total_blocks, bs, inodes
        );
        Ok(())
    }
}

fn bitmap_set(block: &mut [u8], idx: u32) {
    let idx = idx as usize;
    block[idx / 8] |= 1 << (idx % 8);
}
