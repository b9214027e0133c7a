// SPDX-License-Identifier: MPL-2.0

//! Inodes: the on-disk record, the validated in-memory body, and the cached
//! inode object carrying the block-map walker, truncation and byte-granular
//! I/O.

use bytemuck::{Pod, Zeroable};
use int_to_c_enum::TryFromInt;
use static_assertions::const_assert;

use crate::block_ptr::{BidPath, BlockPtrs, Ext2Bid, DB_INDIRECT, INDIRECT, TB_INDIRECT};
use crate::fs::Ext2;
use crate::indirect_cache::IndirectBlock;
use crate::prelude::*;

/// The root directory of every ext2 volume.
pub const ROOT_INO: u32 = 2;

/// Max length of a file name.
pub const MAX_FNAME_LEN: usize = 255;

/// Max target length of a fast symlink, stored in the pointer area.
pub const FAST_SYMLINK_MAX_LEN: usize = core::mem::size_of::<BlockPtrs>();

/// Largest byte size this driver lets a file grow to; the on-disk size
/// field of a revision-0 inode is 32 bits.
const MAX_FILE_SIZE: u64 = u32::MAX as u64;

/// The kind of object an inode describes, encoded in the top nibble of the
/// mode.
#[repr(u16)]
#[derive(Copy, Clone, Debug, Eq, PartialEq, TryFromInt)]
pub enum FileType {
    Fifo = 0x1000,
    CharDevice = 0x2000,
    Dir = 0x4000,
    BlockDevice = 0x6000,
    File = 0x8000,
    Symlink = 0xa000,
    Socket = 0xc000,
}

impl FileType {
    pub fn is_dir(self) -> bool {
        self == FileType::Dir
    }

    pub fn is_regular(self) -> bool {
        self == FileType::File
    }

    pub fn is_symlink(self) -> bool {
        self == FileType::Symlink
    }
}

bitflags::bitflags! {
    /// The lower twelve mode bits: permissions, setuid/setgid, sticky.
    pub struct FilePerm: u16 {
        const S_ISUID = 0o4000;
        const S_ISGID = 0o2000;
        const S_ISVTX = 0o1000;
        const S_IRUSR = 0o400;
        const S_IWUSR = 0o200;
        const S_IXUSR = 0o100;
        const S_IRGRP = 0o40;
        const S_IWGRP = 0o20;
        const S_IXGRP = 0o10;
        const S_IROTH = 0o4;
        const S_IWOTH = 0o2;
        const S_IXOTH = 0o1;
    }
}

/// The validated in-memory inode body.
#[derive(Clone, Debug)]
pub(crate) struct InodeDesc {
    pub type_: FileType,
    pub perm: FilePerm,
    pub uid: u32,
    pub gid: u32,
    pub size: u64,
    pub atime: UnixTime,
    pub ctime: UnixTime,
    pub mtime: UnixTime,
    pub dtime: UnixTime,
    pub hard_links: u16,
    /// Blocks in use by this inode, counted in filesystem blocks and
    /// including indirect blocks.
    pub blocks_count: u32,
    pub flags: u32,
    pub block_ptrs: BlockPtrs,
}

impl InodeDesc {
    /// A fresh, empty inode body stamped with the current time.
    pub fn new(type_: FileType, perm: FilePerm, uid: u32, gid: u32) -> Self {
        let time = now();
        Self {
            type_,
            perm,
            uid,
            gid,
            size: 0,
            atime: time,
            ctime: time,
            mtime: time,
            dtime: 0,
            hard_links: 0,
            blocks_count: 0,
            flags: 0,
            block_ptrs: BlockPtrs::zeroed(),
        }
    }

    pub fn try_from_raw(raw: &RawInode, block_size: usize) -> Result<Self> {
        let type_ = FileType::try_from(raw.mode & 0xf000)
            .map_err(|_| Error::with_message(FsError::Io, "corrupted inode mode"))?;
        let size = if type_ == FileType::File {
            (raw.size as u64) | ((raw.dir_acl as u64) << 32)
        } else {
            raw.size as u64
        };
        Ok(Self {
            type_,
            perm: FilePerm::from_bits_truncate(raw.mode & 0o7777),
            uid: (raw.uid as u32) | ((raw.uid_high as u32) << 16),
            gid: (raw.gid as u32) | ((raw.gid_high as u32) << 16),
            size,
            atime: raw.atime,
            ctime: raw.ctime,
            mtime: raw.mtime,
            dtime: raw.dtime,
            hard_links: raw.links_count,
            blocks_count: raw.blocks / (block_size / 512) as u32,
            flags: raw.flags,
            block_ptrs: raw.block_ptrs,
        })
    }

    pub fn to_raw(&self, block_size: usize) -> RawInode {
        let mut raw = RawInode::zeroed();
        raw.mode = self.type_ as u16 | self.perm.bits();
        raw.uid = self.uid as u16;
        raw.uid_high = (self.uid >> 16) as u16;
        raw.gid = self.gid as u16;
        raw.gid_high = (self.gid >> 16) as u16;
        raw.size = self.size as u32;
        if self.type_ == FileType::File {
            raw.dir_acl = (self.size >> 32) as u32;
        }
        raw.atime = self.atime;
        raw.ctime = self.ctime;
        raw.mtime = self.mtime;
        raw.dtime = self.dtime;
        raw.links_count = self.hard_links;
        raw.blocks = self.blocks_count * (block_size / 512) as u32;
        raw.flags = self.flags;
        raw.block_ptrs = self.block_ptrs;
        raw
    }
}

/// A cached inode.
///
/// The cache hands the same `Arc<Inode>` to every `get` of the same inode
/// number, so the body behind `desc` is one identity; the `Arc` strong
/// count is the reference count the reclaim policy looks at.
pub(crate) struct Inode {
    ino: u32,
    type_: FileType,
    block_group_idx: usize,
    fs: Weak<Ext2>,
    desc: Mutex<Dirty<InodeDesc>>,
}

impl Inode {
    pub fn new(ino: u32, block_group_idx: usize, desc: Dirty<InodeDesc>, fs: Weak<Ext2>) -> Arc<Self> {
        Arc::new(Self {
            ino,
            type_: desc.type_,
            block_group_idx,
            fs,
            desc: Mutex::new(desc),
        })
    }

    pub fn ino(&self) -> u32 {
        self.ino
    }

    pub fn type_(&self) -> FileType {
        self.type_
    }

    pub fn block_group_idx(&self) -> usize {
        self.block_group_idx
    }

    pub fn fs(&self) -> Arc<Ext2> {
        self.fs.upgrade().unwrap()
    }

    pub fn size(&self) -> u64 {
        self.desc.lock().size
    }

    pub fn hard_links(&self) -> u16 {
        self.desc.lock().hard_links
    }

    pub fn perm(&self) -> FilePerm {
        self.desc.lock().perm
    }

    pub fn uid(&self) -> u32 {
        self.desc.lock().uid
    }

    pub fn gid(&self) -> u32 {
        self.desc.lock().gid
    }

    pub fn atime(&self) -> UnixTime {
        self.desc.lock().atime
    }

    pub fn mtime(&self) -> UnixTime {
        self.desc.lock().mtime
    }

    pub fn ctime(&self) -> UnixTime {
        self.desc.lock().ctime
    }

    pub fn blocks_count(&self) -> u32 {
        self.desc.lock().blocks_count
    }

    pub fn set_atime(&self, time: UnixTime) {
        self.desc.lock().atime = time;
    }

    pub fn set_mtime(&self, time: UnixTime) {
        self.desc.lock().mtime = time;
    }

    pub fn set_ctime(&self, time: UnixTime) {
        self.desc.lock().ctime = time;
    }

    pub fn set_dtime(&self, time: UnixTime) {
        self.desc.lock().dtime = time;
    }

    pub fn inc_hard_links(&self) {
        self.desc.lock().hard_links += 1;
    }

    pub fn dec_hard_links(&self) {
        let mut desc = self.desc.lock();
        debug_assert!(desc.hard_links > 0);
        desc.hard_links -= 1;
    }

    pub fn set_hard_links(&self, links: u16) {
        self.desc.lock().hard_links = links;
    }

    /// Reads up to `buf.len()` bytes at `offset`, clamped to the file size.
    /// Holes read as zeros.
    pub fn read_at(&self, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let fs = self.fs();
        let bs = fs.block_size() as u64;
        let desc = self.desc.lock();

        if offset >= desc.size {
            return Ok(0);
        }
        let len = buf.len().min((desc.size - offset) as usize);

        let mut done = 0;
        while done < len {
            let pos = offset + done as u64;
            let logical = (pos / bs) as Ext2Bid;
            let in_block = (pos % bs) as usize;
            let n = (bs as usize - in_block).min(len - done);

            let bid = self.bid_at_inner(&fs, &desc, logical)?;
            if bid == 0 {
                buf[done..done + n].fill(0);
            } else if in_block == 0 && n == bs as usize {
                fs.read_block(bid, &mut buf[done..done + n])?;
            } else {
                let mut block = vec![0u8; bs as usize];
                fs.read_block(bid, &mut block)?;
                buf[done..done + n].copy_from_slice(&block[in_block..in_block + n]);
            }
            done += n;
        }
        Ok(len)
    }

    /// Writes `buf` at `offset`, allocating data and indirect blocks as
    /// needed and extending the file size. Blocks between the old end and
    /// `offset` are left unallocated and read back as zeros.
    pub fn write_at(&self, offset: u64, buf: &[u8]) -> Result<usize> {
        if buf.is_empty() {
            return Ok(0);
        }
        let fs = self.fs();
        let bs = fs.block_size() as u64;
        let mut desc = self.desc.lock();

        let end = offset + buf.len() as u64;
        if end > MAX_FILE_SIZE {
            return_errno_with_message!(FsError::Invalid, "file too large");
        }

        let mut done = 0;
        while done < buf.len() {
            let pos = offset + done as u64;
            let logical = (pos / bs) as Ext2Bid;
            let in_block = (pos % bs) as usize;
            let n = (bs as usize - in_block).min(buf.len() - done);

            if in_block == 0 && n == bs as usize {
                let bid = self.bid_at_or_alloc_inner(&fs, &mut desc, logical)?;
                fs.write_block(bid, &buf[done..done + n])?;
            } else {
                let existing = self.bid_at_inner(&fs, &desc, logical)?;
                let mut block = vec![0u8; bs as usize];
                if existing != 0 {
                    fs.read_block(existing, &mut block)?;
                }
                block[in_block..in_block + n].copy_from_slice(&buf[done..done + n]);
                let bid = if existing != 0 {
                    existing
                } else {
                    self.bid_at_or_alloc_inner(&fs, &mut desc, logical)?
                };
                fs.write_block(bid, &block)?;
            }
            done += n;
        }

        if end > desc.size {
            desc.size = end;
        }
        Ok(buf.len())
    }

    /// Reads one whole logical block; a hole fills the buffer with zeros.
    pub fn read_block_at(&self, logical: Ext2Bid, buf: &mut [u8]) -> Result<()> {
        let fs = self.fs();
        debug_assert_eq!(buf.len(), fs.block_size());
        let desc = self.desc.lock();
        let bid = self.bid_at_inner(&fs, &desc, logical)?;
        if bid == 0 {
            buf.fill(0);
            return Ok(());
        }
        fs.read_block(bid, buf)
    }

    /// Writes one whole logical block in place, allocating it if absent.
    /// The file size is not changed.
    pub fn write_block_at(&self, logical: Ext2Bid, buf: &[u8]) -> Result<()> {
        let fs = self.fs();
        debug_assert_eq!(buf.len(), fs.block_size());
        let mut desc = self.desc.lock();
        let bid = self.bid_at_or_alloc_inner(&fs, &mut desc, logical)?;
        fs.write_block(bid, buf)
    }

    /// Shrinks the file to `new_size`, freeing every data block beyond it
    /// and every indirect block whose subtree becomes empty. Growing is the
    /// write path's business; a `new_size` at or past the current size is a
    /// no-op.
    pub fn truncate(&self, new_size: u64) -> Result<()> {
        let fs = self.fs();
        let bs = fs.block_size() as u64;
        let p = fs.ptrs_per_block();
        let mut desc = self.desc.lock();

        if new_size >= desc.size {
            return Ok(());
        }
        if desc.blocks_count == 0 {
            // Nothing allocated; fast symlinks and device nodes keep their
            // payload bytes in the pointer area, which must not be walked.
            desc.size = new_size;
            return Ok(());
        }
        let keep = new_size.div_ceil(bs) as u32;
        let mut freed = 0u32;

        for i in keep.min(12)..12 {
            let bid = desc.block_ptrs.direct(i as usize);
            if bid != 0 {
                fs.free_block(bid);
                desc.block_ptrs.set_direct(i as usize, 0);
                freed += 1;
            }
        }

        let subtrees = [
            (INDIRECT, 12u32, 1u32),
            (DB_INDIRECT, 12 + p, 2),
            (TB_INDIRECT, 12 + p + p * p, 3),
        ];
        for (which, start, level) in subtrees {
            let root = match which {
                INDIRECT => desc.block_ptrs.indirect(),
                DB_INDIRECT => desc.block_ptrs.db_indirect(),
                _ => desc.block_ptrs.tb_indirect(),
            };
            if root == 0 {
                continue;
            }
            let span = p.pow(level);
            let keep_in = keep.saturating_sub(start).min(span);
            if keep_in == span {
                continue;
            }
            self.shrink_subtree(&fs, root, level, keep_in, &mut freed)?;
            if keep_in == 0 {
                fs.indirect_cache().lock().remove(root);
                fs.free_block(root);
                match which {
                    INDIRECT => desc.block_ptrs.set_indirect(0),
                    DB_INDIRECT => desc.block_ptrs.set_db_indirect(0),
                    _ => desc.block_ptrs.set_tb_indirect(0),
                }
                freed += 1;
            }
        }

        debug_assert!(desc.blocks_count >= freed);
        desc.blocks_count -= freed;
        desc.size = new_size;
        Ok(())
    }

    /// Frees every leaf under the indirect block `bid` whose leaf index
    /// within the subtree is at or past `keep`, then every child indirect
    /// block left empty.
    fn shrink_subtree(
        &self,
        fs: &Ext2,
        bid: Ext2Bid,
        level: u32,
        keep: u32,
        freed: &mut u32,
    ) -> Result<()> {
        let p = fs.ptrs_per_block();
        let span = p.pow(level - 1);
        for idx in 0..p {
            let entry = fs.indirect_cache().lock().find(bid)?.read_bid(idx as usize);
            if entry == 0 {
                continue;
            }
            let entry_keep = keep.saturating_sub(idx * span).min(span);
            if entry_keep == span {
                continue;
            }
            if level > 1 {
                self.shrink_subtree(fs, entry, level - 1, entry_keep, freed)?;
            }
            if entry_keep == 0 {
                if level > 1 {
                    fs.indirect_cache().lock().remove(entry);
                }
                fs.free_block(entry);
                fs.indirect_cache().lock().find_mut(bid)?.write_bid(idx as usize, 0);
                *freed += 1;
            }
        }
        Ok(())
    }

    /// Translates a logical block index into a device block, or 0 for a
    /// hole.
    pub fn bid_at(&self, logical: Ext2Bid) -> Result<Ext2Bid> {
        let fs = self.fs();
        let desc = self.desc.lock();
        self.bid_at_inner(&fs, &desc, logical)
    }

    fn bid_at_inner(&self, fs: &Ext2, desc: &InodeDesc, logical: Ext2Bid) -> Result<Ext2Bid> {
        let cache = fs.indirect_cache();
        match BidPath::classify(logical, fs.ptrs_per_block())? {
            BidPath::Direct(i) => Ok(desc.block_ptrs.direct(i as usize)),
            BidPath::Indirect(i) => {
                let root = desc.block_ptrs.indirect();
                if root == 0 {
                    return Ok(0);
                }
                Ok(cache.lock().find(root)?.read_bid(i as usize))
            }
            BidPath::DbIndirect(i, j) => {
                let root = desc.block_ptrs.db_indirect();
                if root == 0 {
                    return Ok(0);
                }
                let mut cache = cache.lock();
                let l1 = cache.find(root)?.read_bid(i as usize);
                if l1 == 0 {
                    return Ok(0);
                }
                Ok(cache.find(l1)?.read_bid(j as usize))
            }
            BidPath::TbIndirect(i, j, k) => {
                let root = desc.block_ptrs.tb_indirect();
                if root == 0 {
                    return Ok(0);
                }
                let mut cache = cache.lock();
                let l1 = cache.find(root)?.read_bid(i as usize);
                if l1 == 0 {
                    return Ok(0);
                }
                let l2 = cache.find(l1)?.read_bid(j as usize);
                if l2 == 0 {
                    return Ok(0);
                }
                Ok(cache.find(l2)?.read_bid(k as usize))
            }
        }
    }

    /// The allocate-on-write walk: returns the device block for `logical`,
    /// materializing intermediate pointer blocks and the leaf as needed.
    fn bid_at_or_alloc_inner(
        &self,
        fs: &Ext2,
        desc: &mut Dirty<InodeDesc>,
        logical: Ext2Bid,
    ) -> Result<Ext2Bid> {
        match BidPath::classify(logical, fs.ptrs_per_block())? {
            BidPath::Direct(i) => {
                let bid = desc.block_ptrs.direct(i as usize);
                if bid != 0 {
                    return Ok(bid);
                }
                let bid = fs.alloc_block(self.block_group_idx)?;
                desc.block_ptrs.set_direct(i as usize, bid);
                desc.blocks_count += 1;
                Ok(bid)
            }
            BidPath::Indirect(i) => {
                let root = self.ensure_root(fs, desc, INDIRECT)?;
                self.ensure_leaf(fs, desc, root, i as usize)
            }
            BidPath::DbIndirect(i, j) => {
                let root = self.ensure_root(fs, desc, DB_INDIRECT)?;
                let l1 = self.ensure_child(fs, desc, root, i as usize)?;
                self.ensure_leaf(fs, desc, l1, j as usize)
            }
            BidPath::TbIndirect(i, j, k) => {
                let root = self.ensure_root(fs, desc, TB_INDIRECT)?;
                let l1 = self.ensure_child(fs, desc, root, i as usize)?;
                let l2 = self.ensure_child(fs, desc, l1, j as usize)?;
                self.ensure_leaf(fs, desc, l2, k as usize)
            }
        }
    }

    /// Returns the root pointer block of the given indirection level,
    /// allocating and zeroing it if the inode does not have one yet.
    fn ensure_root(&self, fs: &Ext2, desc: &mut Dirty<InodeDesc>, which: usize) -> Result<Ext2Bid> {
        let current = match which {
            INDIRECT => desc.block_ptrs.indirect(),
            DB_INDIRECT => desc.block_ptrs.db_indirect(),
            _ => desc.block_ptrs.tb_indirect(),
        };
        if current != 0 {
            return Ok(current);
        }
        let bid = fs.alloc_block(self.block_group_idx)?;
        fs.indirect_cache()
            .lock()
            .insert(bid, IndirectBlock::alloc_zeroed(fs.block_size()))?;
        match which {
            INDIRECT => desc.block_ptrs.set_indirect(bid),
            DB_INDIRECT => desc.block_ptrs.set_db_indirect(bid),
            _ => desc.block_ptrs.set_tb_indirect(bid),
        }
        desc.blocks_count += 1;
        Ok(bid)
    }

    /// Returns the child pointer block at `idx` of `parent`, allocating and
    /// zeroing it on demand.
    fn ensure_child(
        &self,
        fs: &Ext2,
        desc: &mut Dirty<InodeDesc>,
        parent: Ext2Bid,
        idx: usize,
    ) -> Result<Ext2Bid> {
        let current = fs.indirect_cache().lock().find(parent)?.read_bid(idx);
        if current != 0 {
            return Ok(current);
        }
        let bid = fs.alloc_block(self.block_group_idx)?;
        let mut cache = fs.indirect_cache().lock();
        cache.insert(bid, IndirectBlock::alloc_zeroed(fs.block_size()))?;
        cache.find_mut(parent)?.write_bid(idx, bid);
        drop(cache);
        desc.blocks_count += 1;
        Ok(bid)
    }

    /// Returns the leaf data block at `idx` of `parent`, allocating it on
    /// demand. The caller is responsible for the leaf's content.
    fn ensure_leaf(
        &self,
        fs: &Ext2,
        desc: &mut Dirty<InodeDesc>,
        parent: Ext2Bid,
        idx: usize,
    ) -> Result<Ext2Bid> {
        let current = fs.indirect_cache().lock().find(parent)?.read_bid(idx);
        if current != 0 {
            return Ok(current);
        }
        let bid = fs.alloc_block(self.block_group_idx)?;
        fs.indirect_cache().lock().find_mut(parent)?.write_bid(idx, bid);
        desc.blocks_count += 1;
        Ok(bid)
    }

    /// Reads a symlink target, from the pointer area for fast symlinks and
    /// from data blocks otherwise.
    pub fn read_link(&self) -> Result<String> {
        let desc = self.desc.lock();
        let size = desc.size as usize;
        if desc.blocks_count == 0 && size <= FAST_SYMLINK_MAX_LEN {
            let bytes = desc.block_ptrs.as_bytes()[..size].to_vec();
            drop(desc);
            return String::from_utf8(bytes)
                .map_err(|_| Error::with_message(FsError::Invalid, "symlink target is not utf-8"));
        }
        drop(desc);

        let mut buf = vec![0u8; size];
        self.read_at(0, &mut buf)?;
        String::from_utf8(buf)
            .map_err(|_| Error::with_message(FsError::Invalid, "symlink target is not utf-8"))
    }

    /// Writes a symlink target.
    pub fn write_link(&self, target: &str) -> Result<()> {
        self.truncate(0)?;
        {
            // The pointer area may still hold a previous fast target's
            // bytes; an allocating walk must never mistake them for block
            // numbers.
            let mut desc = self.desc.lock();
            desc.block_ptrs.as_bytes_mut().fill(0);
            if target.len() <= FAST_SYMLINK_MAX_LEN {
                let bytes = desc.block_ptrs.as_bytes_mut();
                bytes[..target.len()].copy_from_slice(target.as_bytes());
                desc.size = target.len() as u64;
                return Ok(());
            }
        }
        self.write_at(0, target.as_bytes())?;
        Ok(())
    }

    /// Writes the inode body back into the inode table if it changed.
    pub fn sync_metadata(&self) -> Result<()> {
        let fs = self.fs();
        let mut desc = self.desc.lock();
        if !desc.is_dirty() {
            return Ok(());
        }
        fs.sync_inode(self.ino, &desc)?;
        desc.clear_dirty();
        Ok(())
    }
}

impl Debug for Inode {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        f.debug_struct("Inode")
            .field("ino", &self.ino)
            .field("type", &self.type_)
            .field("block_group_idx", &self.block_group_idx)
            .finish()
    }
}

const_assert!(core::mem::size_of::<RawInode>() == 128);

/// The raw inode record, 128 bytes, as laid out on disk. The `osd2` union
/// is spelled out in its Linux form, whose high uid/gid halves this driver
/// honors.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct RawInode {
    /// File type and permission mode.
    pub mode: u16,
    /// Low 16 bits of the owner uid.
    pub uid: u16,
    /// Low 32 bits of the size in bytes.
    pub size: u32,
    pub atime: u32,
    pub ctime: u32,
    pub mtime: u32,
    pub dtime: u32,
    /// Low 16 bits of the group id.
    pub gid: u16,
    pub links_count: u16,
    /// Blocks in use, counted in 512-byte units.
    pub blocks: u32,
    pub flags: u32,
    reserved1: u32,
    pub block_ptrs: BlockPtrs,
    /// File version (for NFS).
    pub generation: u32,
    /// In revision 1, the block of extended attributes.
    pub file_acl: u32,
    /// For regular files, the high 32 bits of the size.
    pub dir_acl: u32,
    /// Fragment address (unused).
    pub faddr: u32,
    frag: u8,
    fsize: u8,
    pad1: u16,
    /// High 16 bits of the owner uid.
    pub uid_high: u16,
    /// High 16 bits of the group id.
    pub gid_high: u16,
    reserved2: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_round_trip_preserves_identity() {
        let mut desc = InodeDesc::new(
            FileType::File,
            FilePerm::from_bits_truncate(0o644),
            0x12345,
            7,
        );
        desc.size = 4097;
        desc.hard_links = 1;
        desc.blocks_count = 5;
        let raw = desc.to_raw(1024);
        assert_eq!(raw.blocks, 10);
        assert_eq!(raw.uid, 0x2345);
        assert_eq!(raw.uid_high, 1);

        let back = InodeDesc::try_from_raw(&raw, 1024).unwrap();
        assert_eq!(back.type_, FileType::File);
        assert_eq!(back.uid, 0x12345);
        assert_eq!(back.gid, 7);
        assert_eq!(back.size, 4097);
        assert_eq!(back.blocks_count, 5);
    }

    #[test]
    fn rejects_garbage_mode() {
        let mut raw = RawInode::zeroed();
        raw.mode = 0x3000;
        assert!(InodeDesc::try_from_raw(&raw, 1024).is_err());
    }
}
