// SPDX-License-Identifier: MPL-2.0

//! The fifteen block pointers of an inode and the classification of a
//! logical block index into its level of indirection.

use bytemuck::{Pod, Zeroable};

use crate::prelude::*;

/// A block number on the volume.
pub type Ext2Bid = u32;

/// Direct pointers to blocks.
pub const DIRECT_RANGE: core::ops::Range<usize> = 0..12;
/// The number of direct blocks.
pub const MAX_DIRECT_BLOCKS: Ext2Bid = DIRECT_RANGE.end as Ext2Bid;

/// Indirect pointer to blocks.
pub const INDIRECT: usize = DIRECT_RANGE.end;
/// Doubly indirect pointer to blocks.
pub const DB_INDIRECT: usize = INDIRECT + 1;
/// Trebly indirect pointer to blocks.
pub const TB_INDIRECT: usize = DB_INDIRECT + 1;

/// The number of block pointers.
pub const MAX_BLOCK_PTRS: usize = TB_INDIRECT + 1;

/// The size of a block id.
pub const BID_SIZE: usize = core::mem::size_of::<Ext2Bid>();

/// The pointers to blocks for an inode.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct BlockPtrs {
    inner: [Ext2Bid; MAX_BLOCK_PTRS],
}

impl BlockPtrs {
    /// Returns the direct block ID.
    ///
    /// # Panics
    ///
    /// If the `idx` is out of bounds, this method will panic.
    pub fn direct(&self, idx: usize) -> Ext2Bid {
        assert!(DIRECT_RANGE.contains(&idx));
        self.inner[idx]
    }

    /// Sets the direct block ID.
    ///
    /// # Panics
    ///
    /// If the `idx` is out of bounds, this method will panic.
    pub fn set_direct(&mut self, idx: usize, bid: Ext2Bid) {
        assert!(DIRECT_RANGE.contains(&idx));
        self.inner[idx] = bid;
    }

    /// Returns the block ID of the single indirect block pointer.
    pub fn indirect(&self) -> Ext2Bid {
        self.inner[INDIRECT]
    }

    /// Sets the block ID of the single indirect block pointer.
    pub fn set_indirect(&mut self, bid: Ext2Bid) {
        self.inner[INDIRECT] = bid;
    }

    /// Returns the block ID of the double indirect block pointer.
    pub fn db_indirect(&self) -> Ext2Bid {
        self.inner[DB_INDIRECT]
    }

    /// Sets the block ID of the double indirect block pointer.
    pub fn set_db_indirect(&mut self, bid: Ext2Bid) {
        self.inner[DB_INDIRECT] = bid;
    }

    /// Returns the block ID of the treble indirect block pointer.
    pub fn tb_indirect(&self) -> Ext2Bid {
        self.inner[TB_INDIRECT]
    }

    /// Sets the block ID of the treble indirect block pointer.
    pub fn set_tb_indirect(&mut self, bid: Ext2Bid) {
        self.inner[TB_INDIRECT] = bid;
    }

    /// Views the pointer area as bytes; fast symlinks store their target
    /// here.
    pub fn as_bytes(&self) -> &[u8] {
        bytemuck::bytes_of(&self.inner)
    }

    /// Views the pointer area as mutable bytes.
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        bytemuck::bytes_of_mut(&mut self.inner)
    }
}

/// Where a logical block index lands in the inode's pointer tree.
///
/// The index arithmetic depends on the number of pointers per block, which
/// is the volume's block size over [`BID_SIZE`]; classification therefore
/// takes it as a parameter rather than baking one block size in.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum BidPath {
    /// Direct reference to a block.
    Direct(u32),
    /// The block ID lives at the given index of the indirect block.
    Indirect(u32),
    /// First-level index within the double indirect tree, then the index
    /// within that second-level block.
    DbIndirect(u32, u32),
    /// Indices within the first-, second- and third-level blocks of the
    /// treble indirect tree.
    TbIndirect(u32, u32, u32),
}

impl BidPath {
    pub fn classify(bid: Ext2Bid, ptrs_per_block: u32) -> Result<Self> {
        let p = ptrs_per_block as u64;
        let bid = bid as u64;
        let direct = MAX_DIRECT_BLOCKS as u64;

        if bid < direct {
            Ok(Self::Direct(bid as u32))
        } else if bid < direct + p {
            Ok(Self::Indirect((bid - direct) as u32))
        } else if bid < direct + p + p * p {
            let idx = bid - direct - p;
            Ok(Self::DbIndirect((idx / p) as u32, (idx % p) as u32))
        } else if bid < direct + p + p * p + p * p * p {
            let idx = bid - direct - p - p * p;
            Ok(Self::TbIndirect(
                (idx / (p * p)) as u32,
                ((idx / p) % p) as u32,
                (idx % p) as u32,
            ))
        } else {
            return_errno_with_message!(FsError::Invalid, "logical block beyond ext2 reach")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const P: u32 = 256; // 1024-byte blocks

    #[test]
    fn classifies_direct_boundary() {
        assert_eq!(BidPath::classify(0, P).unwrap(), BidPath::Direct(0));
        assert_eq!(BidPath::classify(11, P).unwrap(), BidPath::Direct(11));
        assert_eq!(BidPath::classify(12, P).unwrap(), BidPath::Indirect(0));
    }

    #[test]
    fn classifies_indirect_boundaries() {
        assert_eq!(BidPath::classify(12 + 255, P).unwrap(), BidPath::Indirect(255));
        assert_eq!(
            BidPath::classify(12 + 256, P).unwrap(),
            BidPath::DbIndirect(0, 0)
        );
        assert_eq!(
            BidPath::classify(12 + 256 + 256 * 256 - 1, P).unwrap(),
            BidPath::DbIndirect(255, 255)
        );
        assert_eq!(
            BidPath::classify(12 + 256 + 256 * 256, P).unwrap(),
            BidPath::TbIndirect(0, 0, 0)
        );
    }

    #[test]
    fn rejects_blocks_beyond_reach() {
        let max = 12 + 256 + 256 * 256 + 256 * 256 * 256;
        assert!(BidPath::classify(max, P).is_err());
        assert_eq!(
            BidPath::classify(max - 1, P).unwrap(),
            BidPath::TbIndirect(255, 255, 255)
        );
    }
}
