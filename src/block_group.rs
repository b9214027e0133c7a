// SPDX-License-Identifier: MPL-2.0

//! Block groups: the on-disk descriptor and the in-memory metadata holding
//! the group's two allocation bitmaps.

use bytemuck::{Pod, Zeroable};
use static_assertions::const_assert;

use crate::bitmap::Bitmap;
use crate::block_dev::{self, BlockDevice};
use crate::block_ptr::Ext2Bid;
use crate::prelude::*;
use crate::super_block::SuperBlock;

/// Size of one on-disk group descriptor.
pub(crate) const GROUP_DESCRIPTOR_SIZE: usize = core::mem::size_of::<RawGroupDescriptor>();

/// One block group: its descriptor plus both bitmaps, dirty-tracked as a
/// unit and written back together.
pub(crate) struct BlockGroup {
    idx: usize,
    metadata: Mutex<Dirty<GroupMetadata>>,
}

impl BlockGroup {
    /// Loads a block group: its descriptor from the already-read descriptor
    /// table, then both bitmap blocks from the device.
    pub fn load(
        device: &dyn BlockDevice,
        descriptor_table: &[u8],
        idx: usize,
        super_block: &SuperBlock,
    ) -> Result<Self> {
        let offset = idx * GROUP_DESCRIPTOR_SIZE;
        let raw: RawGroupDescriptor =
            bytemuck::pod_read_unaligned(&descriptor_table[offset..offset + GROUP_DESCRIPTOR_SIZE]);
        let descriptor = GroupDescriptor::from(raw);

        let block_size = super_block.block_size();
        let blocks_in_group = {
            let covered = super_block.total_blocks() - super_block.first_data_block();
            let before = idx as u32 * super_block.blocks_per_group();
            (covered - before).min(super_block.blocks_per_group()) as usize
        };

        let read_bitmap = |bid: Ext2Bid, capacity: usize| -> Result<Bitmap> {
            if capacity > block_size * 8 {
                return_errno_with_message!(FsError::Io, "bad bitmap capacity");
            }
            let mut buf = vec![0u8; block_size];
            block_dev::read_bytes(device, bid as u64 * block_size as u64, &mut buf)?;
            Ok(Bitmap::from_bytes_with_capacity(&buf, capacity))
        };

        let block_bitmap = read_bitmap(descriptor.block_bitmap_bid, blocks_in_group)?;
        let inode_bitmap = read_bitmap(
            descriptor.inode_bitmap_bid,
            super_block.inodes_per_group() as usize,
        )?;

        Ok(Self {
            idx,
            metadata: Mutex::new(Dirty::new(GroupMetadata {
                descriptor,
                block_bitmap,
                inode_bitmap,
            })),
        })
    }

    pub fn idx(&self) -> usize {
        self.idx
    }

    /// Starting block of this group's slice of the inode table.
    pub fn inode_table_bid(&self) -> Ext2Bid {
        self.metadata.lock().descriptor.inode_table_bid
    }

    pub fn is_inode_allocated(&self, inode_idx: u32) -> bool {
        self.metadata.lock().inode_bitmap.is_set(inode_idx)
    }

    /// Allocates an inode index within the group, never below `first`.
    pub fn alloc_inode(&self, is_dir: bool, first: u32) -> Option<u32> {
        let mut metadata = self.metadata.lock();
        if metadata.descriptor.free_inodes_count == 0 {
            return None;
        }
        let idx = metadata.inode_bitmap.alloc()?;
        if idx < first {
            // Reserved inode numbers below first_ino must stay allocated;
            // a clear bit there means the bitmap is damaged.
            warn!("ext2: reserved inode {} was free in group {}", idx, self.idx);
            metadata.inode_bitmap.clear(idx);
            return None;
        }
        metadata.dec_free_inodes();
        if is_dir {
            metadata.inc_dirs();
        }
        Some(idx)
    }

    /// Frees an inode index; reports whether the bit was actually set so
    /// the caller can keep the superblock count consistent.
    pub fn free_inode(&self, inode_idx: u32, is_dir: bool) -> bool {
        let mut metadata = self.metadata.lock();
        if !metadata.inode_bitmap.clear(inode_idx) {
            warn!(
                "ext2: freeing unallocated inode {} in group {}",
                inode_idx, self.idx
            );
            return false;
        }
        metadata.inc_free_inodes();
        if is_dir {
            metadata.dec_dirs();
        }
        true
    }

    /// Allocates a block index within the group.
    pub fn alloc_block(&self) -> Option<u32> {
        let mut metadata = self.metadata.lock();
        if metadata.descriptor.free_blocks_count == 0 {
            return None;
        }
        let idx = metadata.block_bitmap.alloc()?;
        metadata.dec_free_blocks();
        Some(idx)
    }

    /// Frees a block index; reports whether the bit was actually set so the
    /// caller can keep the superblock count consistent.
    pub fn free_block(&self, block_idx: u32) -> bool {
        let mut metadata = self.metadata.lock();
        if !metadata.block_bitmap.clear(block_idx) {
            warn!(
                "ext2: freeing unallocated block bit {} in group {}",
                block_idx, self.idx
            );
            return false;
        }
        metadata.inc_free_blocks();
        true
    }

    pub fn free_blocks_count(&self) -> u32 {
        self.metadata.lock().descriptor.free_blocks_count as u32
    }

    pub fn free_inodes_count(&self) -> u32 {
        self.metadata.lock().descriptor.free_inodes_count as u32
    }

    pub fn dirs_count(&self) -> u32 {
        self.metadata.lock().descriptor.dirs_count as u32
    }

    /// Writes back the descriptor and both bitmaps if anything changed.
    pub fn sync_metadata(
        &self,
        device: &dyn BlockDevice,
        block_size: usize,
        descriptor_table_bid: Ext2Bid,
    ) -> Result<()> {
        let mut metadata = self.metadata.lock();
        if !metadata.is_dirty() {
            return Ok(());
        }

        let raw = RawGroupDescriptor::from(&metadata.descriptor);
        let offset = descriptor_table_bid as u64 * block_size as u64
            + (self.idx * GROUP_DESCRIPTOR_SIZE) as u64;
        block_dev::write_bytes(device, offset, bytemuck::bytes_of(&raw))?;

        let block_bitmap_off = metadata.descriptor.block_bitmap_bid as u64 * block_size as u64;
        block_dev::write_bytes(device, block_bitmap_off, metadata.block_bitmap.as_bytes())?;

        let inode_bitmap_off = metadata.descriptor.inode_bitmap_bid as u64 * block_size as u64;
        block_dev::write_bytes(device, inode_bitmap_off, metadata.inode_bitmap.as_bytes())?;

        metadata.clear_dirty();
        Ok(())
    }
}

impl Debug for BlockGroup {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("BlockGroup")
            .field("idx", &self.idx)
            .field("metadata", &self.metadata.lock())
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct GroupMetadata {
    descriptor: GroupDescriptor,
    block_bitmap: Bitmap,
    inode_bitmap: Bitmap,
}

impl GroupMetadata {
    fn inc_free_inodes(&mut self) {
        self.descriptor.free_inodes_count += 1;
    }

    fn dec_free_inodes(&mut self) {
        debug_assert!(self.descriptor.free_inodes_count > 0);
        self.descriptor.free_inodes_count -= 1;
    }

    fn inc_free_blocks(&mut self) {
        self.descriptor.free_blocks_count += 1;
    }

    fn dec_free_blocks(&mut self) {
        debug_assert!(self.descriptor.free_blocks_count > 0);
        self.descriptor.free_blocks_count -= 1;
    }

    fn inc_dirs(&mut self) {
        self.descriptor.dirs_count += 1;
    }

    fn dec_dirs(&mut self) {
        debug_assert!(self.descriptor.dirs_count > 0);
        self.descriptor.dirs_count -= 1;
    }
}

/// The in-memory block group descriptor.
#[derive(Clone, Copy, Debug)]
struct GroupDescriptor {
    /// Block usage bitmap block.
    block_bitmap_bid: Ext2Bid,
    /// Inode usage bitmap block.
    inode_bitmap_bid: Ext2Bid,
    /// Starting block of the inode table.
    inode_table_bid: Ext2Bid,
    /// Number of free blocks in the group.
    free_blocks_count: u16,
    /// Number of free inodes in the group.
    free_inodes_count: u16,
    /// Number of directories in the group.
    dirs_count: u16,
}

impl From<RawGroupDescriptor> for GroupDescriptor {
    fn from(desc: RawGroupDescriptor) -> Self {
        Self {
            block_bitmap_bid: desc.block_bitmap,
            inode_bitmap_bid: desc.inode_bitmap,
            inode_table_bid: desc.inode_table,
            free_blocks_count: desc.free_blocks_count,
            free_inodes_count: desc.free_inodes_count,
            dirs_count: desc.dirs_count,
        }
    }
}

const_assert!(core::mem::size_of::<RawGroupDescriptor>() == 32);

/// The raw block group descriptor.
///
/// The table starts in the block following the superblock.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct RawGroupDescriptor {
    pub block_bitmap: u32,
    pub inode_bitmap: u32,
    pub inode_table: u32,
    pub free_blocks_count: u16,
    pub free_inodes_count: u16,
    pub dirs_count: u16,
    pub(crate) pad: u16,
    pub(crate) reserved: [u32; 3],
}

impl From<&GroupDescriptor> for RawGroupDescriptor {
    fn from(desc: &GroupDescriptor) -> Self {
        Self {
            block_bitmap: desc.block_bitmap_bid,
            inode_bitmap: desc.inode_bitmap_bid,
            inode_table: desc.inode_table_bid,
            free_blocks_count: desc.free_blocks_count,
            free_inodes_count: desc.free_inodes_count,
            dirs_count: desc.dirs_count,
            pad: 0,
            reserved: [0; 3],
        }
    }
}
