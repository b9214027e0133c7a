// SPDX-License-Identifier: MPL-2.0

//! The ext2 superblock, on-disk and in-memory.

use bytemuck::{Pod, Zeroable};
use int_to_c_enum::TryFromInt;
use static_assertions::const_assert;

use crate::block_ptr::Ext2Bid;
use crate::prelude::*;

/// The magic number of ext2.
pub const MAGIC_NUM: u16 = 0xef53;

/// The main superblock is located at byte 1024 from the beginning of the
/// device.
pub const SUPER_BLOCK_OFFSET: usize = 1024;

const SUPER_BLOCK_SIZE: usize = 1024;

/// The in-memory superblock.
///
/// It contains all information about the layout of the volume. Fields this
/// driver never interprets (uuid, volume name, preallocation hints, the
/// ext3 journal block) are preserved through the retained raw copy so that
/// write-back does not clobber them.
pub struct SuperBlock {
    /// Total number of inodes.
    inodes_count: u32,
    /// Total number of blocks.
    blocks_count: u32,
    /// Total number of free blocks.
    free_blocks_count: u32,
    /// Total number of free inodes.
    free_inodes_count: u32,
    /// First data block.
    first_data_block: Ext2Bid,
    /// Block size.
    block_size: usize,
    /// Number of blocks in each block group.
    blocks_per_group: u32,
    /// Number of inodes in each block group.
    inodes_per_group: u32,
    /// Mount count since the last check.
    mnt_count: u16,
    /// Filesystem state.
    state: FsState,
    /// Revision level.
    rev_level: RevLevel,
    /// First non-reserved inode number.
    first_ino: u32,
    /// Size of the on-disk inode structure.
    inode_size: usize,
    /// Compatible feature set.
    feature_compat: FeatureCompatSet,
    /// Incompatible feature set.
    feature_incompat: FeatureInCompatSet,
    /// Readonly-compatible feature set, as read (may carry unknown bits).
    feature_ro_compat_bits: u32,
    /// The raw superblock as read from disk.
    raw: RawSuperBlock,
}

impl TryFrom<RawSuperBlock> for SuperBlock {
    type Error = crate::error::Error;

    fn try_from(sb: RawSuperBlock) -> Result<Self> {
        if sb.magic != MAGIC_NUM {
            return_errno_with_message!(FsError::NotExt2, "bad ext2 magic number");
        }
        if sb.log_block_size > 2 {
            return_errno_with_message!(FsError::NotExt2, "unsupported block size");
        }
        let block_size = 1024usize << sb.log_block_size;

        let state = FsState::try_from(sb.state)
            .map_err(|_| Error::with_message(FsError::NotExt2, "invalid fs state"))?;
        if state != FsState::Valid {
            warn!("ext2: volume was not cleanly unmounted");
        }

        let rev_level = RevLevel::try_from(sb.rev_level)
            .map_err(|_| Error::with_message(FsError::NotExt2, "invalid revision level"))?;

        let (first_ino, inode_size) = match rev_level {
            RevLevel::GoodOld => (GOOD_OLD_FIRST_INO, GOOD_OLD_INODE_SIZE),
            RevLevel::Dynamic => {
                let inode_size = sb.inode_size as usize;
                if inode_size < GOOD_OLD_INODE_SIZE || !inode_size.is_power_of_two() {
                    return_errno_with_message!(FsError::NotExt2, "bad inode size");
                }
                (sb.first_ino, inode_size)
            }
        };

        let feature_incompat = FeatureInCompatSet::from_bits(sb.feature_incompat)
            .filter(|set| FeatureInCompatSet::SUPPORTED.contains(*set))
            .ok_or(Error::with_message(
                FsError::NotExt2,
                "unsupported incompatible features",
            ))?;

        if sb.blocks_per_group == 0
            || sb.blocks_per_group > (block_size * 8) as u32
            || sb.inodes_per_group == 0
            || sb.inodes_per_group > (block_size * 8) as u32
        {
            return_errno_with_message!(FsError::NotExt2, "bad group geometry");
        }
        if sb.first_data_block != u32::from(sb.log_block_size == 0) {
            return_errno_with_message!(FsError::NotExt2, "bad first data block");
        }

        Ok(Self {
            inodes_count: sb.inodes_count,
            blocks_count: sb.blocks_count,
            free_blocks_count: sb.free_blocks_count,
            free_inodes_count: sb.free_inodes_count,
            first_data_block: sb.first_data_block,
            block_size,
            blocks_per_group: sb.blocks_per_group,
            inodes_per_group: sb.inodes_per_group,
            mnt_count: sb.mnt_count,
            state,
            rev_level,
            first_ino,
            inode_size,
            feature_compat: FeatureCompatSet::from_bits_truncate(sb.feature_compat),
            feature_incompat,
            feature_ro_compat_bits: sb.feature_ro_compat,
            raw: sb,
        })
    }
}

impl SuperBlock {
    /// Returns the block size.
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Returns the size of the on-disk inode structure.
    pub fn inode_size(&self) -> usize {
        self.inode_size
    }

    /// Returns the total number of inodes.
    pub fn total_inodes(&self) -> u32 {
        self.inodes_count
    }

    /// Returns the total number of blocks.
    pub fn total_blocks(&self) -> u32 {
        self.blocks_count
    }

    /// Returns the first data block number.
    pub fn first_data_block(&self) -> Ext2Bid {
        self.first_data_block
    }

    /// Returns the number of blocks in each block group.
    pub fn blocks_per_group(&self) -> u32 {
        self.blocks_per_group
    }

    /// Returns the number of inodes in each block group.
    pub fn inodes_per_group(&self) -> u32 {
        self.inodes_per_group
    }

    /// Returns the number of block groups.
    pub fn block_groups_count(&self) -> usize {
        let covered = self.blocks_count - self.first_data_block;
        covered.div_ceil(self.blocks_per_group) as usize
    }

    /// Returns the first inode number usable for ordinary objects.
    pub fn first_ino(&self) -> u32 {
        self.first_ino
    }

    /// Returns the revision level.
    pub fn rev_level(&self) -> RevLevel {
        self.rev_level
    }

    /// Returns the number of free blocks.
    pub fn free_blocks_count(&self) -> u32 {
        self.free_blocks_count
    }

    /// Returns the number of free inodes.
    pub fn free_inodes_count(&self) -> u32 {
        self.free_inodes_count
    }

    /// Whether directory entries carry a file-type byte.
    pub fn has_filetype(&self) -> bool {
        self.feature_incompat
            .contains(FeatureInCompatSet::FILETYPE)
    }

    /// Whether the volume carries readonly-compatible features this driver
    /// does not know about.
    pub fn has_unknown_ro_features(&self) -> bool {
        self.feature_ro_compat_bits & !FeatureRoCompatSet::SUPPORTED.bits() != 0
    }

    /// Increase the number of free blocks.
    pub(crate) fn inc_free_blocks(&mut self) {
        self.free_blocks_count += 1;
    }

    /// Decrease the number of free blocks.
    pub(crate) fn dec_free_blocks(&mut self) {
        debug_assert!(self.free_blocks_count > 0);
        self.free_blocks_count -= 1;
    }

    /// Increase the number of free inodes.
    pub(crate) fn inc_free_inodes(&mut self) {
        self.free_inodes_count += 1;
    }

    /// Decrease the number of free inodes.
    pub(crate) fn dec_free_inodes(&mut self) {
        debug_assert!(self.free_inodes_count > 0);
        self.free_inodes_count -= 1;
    }

    /// Rebuilds the raw superblock for write-back, refreshing the fields
    /// this driver mutates and stamping the write time.
    pub(crate) fn to_raw(&self) -> RawSuperBlock {
        let mut raw = self.raw;
        raw.free_blocks_count = self.free_blocks_count;
        raw.free_inodes_count = self.free_inodes_count;
        raw.mnt_count = self.mnt_count;
        raw.state = self.state as u16;
        raw.wtime = now();
        raw
    }
}

impl Debug for SuperBlock {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("SuperBlock")
            .field("blocks_count", &self.blocks_count)
            .field("inodes_count", &self.inodes_count)
            .field("free_blocks_count", &self.free_blocks_count)
            .field("free_inodes_count", &self.free_inodes_count)
            .field("block_size", &self.block_size)
            .field("blocks_per_group", &self.blocks_per_group)
            .field("inodes_per_group", &self.inodes_per_group)
            .field("rev_level", &self.rev_level)
            .field("state", &self.state)
            .finish()
    }
}

bitflags::bitflags! {
    /// Compatible feature set.
    pub struct FeatureCompatSet: u32 {
        /// Preallocate some number of blocks to a directory when creating a new one
        const DIR_PREALLOC = 1 << 0;
        /// AFS server inodes exist
        const IMAGIC_INODES = 1 << 1;
        /// File system has a journal
        const HAS_JOURNAL = 1 << 2;
        /// Inodes have extended attributes
        const EXT_ATTR = 1 << 3;
        /// File system can resize itself for larger partitions
        const RESIZE_INO = 1 << 4;
        /// Directories use hash index
        const DIR_INDEX = 1 << 5;
    }
}

bitflags::bitflags! {
    /// Incompatible feature set.
    pub struct FeatureInCompatSet: u32 {
        /// Compression is used
        const COMPRESSION = 1 << 0;
        /// Directory entries contain a type field
        const FILETYPE = 1 << 1;
        /// File system needs to replay its journal
        const RECOVER = 1 << 2;
        /// File system uses a journal device
        const JOURNAL_DEV = 1 << 3;
        /// Metablock block group
        const META_BG = 1 << 4;
    }
}

impl FeatureInCompatSet {
    /// The incompatible features this driver can honor.
    const SUPPORTED: FeatureInCompatSet = FeatureInCompatSet::FILETYPE;
}

bitflags::bitflags! {
    /// Readonly-compatible feature set.
    pub struct FeatureRoCompatSet: u32 {
        /// Sparse superblocks and group descriptor tables
        const SPARSE_SUPER = 1 << 0;
        /// File system uses a 64-bit file size
        const LARGE_FILE = 1 << 1;
        /// Directory contents are stored in the form of a Binary Tree
        const BTREE_DIR = 1 << 2;
    }
}

impl FeatureRoCompatSet {
    /// The readonly-compatible features a read-write mount can honor.
    const SUPPORTED: FeatureRoCompatSet = FeatureRoCompatSet::from_bits_truncate(
        FeatureRoCompatSet::SPARSE_SUPER.bits() | FeatureRoCompatSet::LARGE_FILE.bits(),
    );
}

#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromInt)]
pub enum FsState {
    /// Unmounted cleanly
    Valid = 1,
    /// Errors detected
    Err = 2,
}

#[repr(u32)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromInt)]
pub enum RevLevel {
    /// The good old (original) format, with 128-byte inodes and the first
    /// eleven inode numbers reserved.
    GoodOld = 0,
    /// V2 format with dynamic inode size.
    Dynamic = 1,
}

/// First non-reserved inode for revision 0.
pub const GOOD_OLD_FIRST_INO: u32 = 11;

/// Inode structure size for revision 0.
pub const GOOD_OLD_INODE_SIZE: usize = 128;

const_assert!(core::mem::size_of::<RawSuperBlock>() == SUPER_BLOCK_SIZE);

/// The raw superblock, exactly 1024 bytes in length.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct RawSuperBlock {
    pub inodes_count: u32,
    pub blocks_count: u32,
    pub reserved_blocks_count: u32,
    pub free_blocks_count: u32,
    pub free_inodes_count: u32,
    pub first_data_block: u32,
    /// The number to left-shift 1024 to obtain the block size.
    pub log_block_size: u32,
    /// The number to left-shift 1024 to obtain the fragment size.
    pub log_frag_size: u32,
    pub blocks_per_group: u32,
    pub frags_per_group: u32,
    pub inodes_per_group: u32,
    /// Mount time.
    pub mtime: u32,
    /// Write time.
    pub wtime: u32,
    pub mnt_count: u16,
    pub max_mnt_count: u16,
    pub magic: u16,
    pub state: u16,
    pub errors: u16,
    pub min_rev_level: u16,
    /// Time of last check.
    pub last_check_time: u32,
    pub check_interval: u32,
    pub creator_os: u32,
    pub rev_level: u32,
    pub def_resuid: u16,
    pub def_resgid: u16,
    pub first_ino: u32,
    pub inode_size: u16,
    pub block_group_idx: u16,
    pub feature_compat: u32,
    pub feature_incompat: u32,
    pub feature_ro_compat: u32,
    pub uuid: [u8; 16],
    pub volume_name: [u8; 16],
    pub last_mounted_dir: [u8; 64],
    pub algorithm_usage_bitmap: u32,
    pub prealloc_file_blocks: u8,
    pub prealloc_dir_blocks: u8,
    padding1: u16,
    /// Uuid of journal superblock (ext3 compatibility; preserved, unused).
    pub journal_uuid: [u8; 16],
    /// Inode number of journal file.
    pub journal_ino: u32,
    /// Device number of journal file.
    pub journal_dev: u32,
    /// Start of list of inodes to delete.
    pub last_orphan: u32,
    /// HTREE hash seed.
    pub hash_seed: [u32; 4],
    /// Default hash version to use.
    pub def_hash_version: u8,
    reserved_char_pad: u8,
    reserved_word_pad: u16,
    /// Default mount options.
    pub default_mount_opts: u32,
    /// First metablock block group.
    pub first_meta_bg: u32,
    reserved: [u32; 190],
}
