// SPDX-License-Identifier: MPL-2.0

//! Directory records.
//!
//! A directory's data is a sequence of blocks; each block is partitioned
//! exactly by variable-length records, four-byte aligned, and no record
//! crosses a block boundary. The final record of a block stretches to the
//! block's end. A record whose inode field is zero is unused space that a
//! later insertion may claim.

use bytemuck::{Pod, Zeroable};

use crate::block_ptr::Ext2Bid;
use crate::inode::{FileType, Inode, MAX_FNAME_LEN};
use crate::prelude::*;

pub(crate) const HEADER_LEN: usize = core::mem::size_of::<DirEntryHeader>();

/// File-type byte values stored in directory records when the volume has
/// the filetype feature.
const DT_UNKNOWN: u8 = 0;
const DT_REG_FILE: u8 = 1;
const DT_DIR: u8 = 2;
const DT_CHRDEV: u8 = 3;
const DT_BLKDEV: u8 = 4;
const DT_FIFO: u8 = 5;
const DT_SOCK: u8 = 6;
const DT_SYMLINK: u8 = 7;

/// The fixed head of an on-disk directory record; the name bytes follow.
#[repr(C)]
#[derive(Clone, Copy, Debug, Pod, Zeroable)]
pub(crate) struct DirEntryHeader {
    pub ino: u32,
    pub rec_len: u16,
    pub name_len: u8,
    pub file_type: u8,
}

/// One parsed directory record.
#[derive(Clone, Debug)]
pub(crate) struct DirEntry {
    pub ino: u32,
    pub name: String,
}

fn dt_of(type_: FileType) -> u8 {
    match type_ {
        FileType::File => DT_REG_FILE,
        FileType::Dir => DT_DIR,
        FileType::CharDevice => DT_CHRDEV,
        FileType::BlockDevice => DT_BLKDEV,
        FileType::Fifo => DT_FIFO,
        FileType::Socket => DT_SOCK,
        FileType::Symlink => DT_SYMLINK,
    }
}

/// Reads and sanity-checks the record at `off`.
fn read_record(block: &[u8], off: usize) -> Result<DirEntryHeader> {
    if off + HEADER_LEN > block.len() {
        return_errno_with_message!(FsError::Io, "directory record outside its block");
    }
    let header: DirEntryHeader = bytemuck::pod_read_unaligned(&block[off..off + HEADER_LEN]);
    let rec_len = header.rec_len as usize;
    if rec_len < HEADER_LEN
        || rec_len % 4 != 0
        || off + rec_len > block.len()
        || (header.ino != 0 && align4(HEADER_LEN + header.name_len as usize) > rec_len)
    {
        return_errno_with_message!(FsError::Io, "corrupted directory record");
    }
    Ok(header)
}

fn write_record(block: &mut [u8], off: usize, header: &DirEntryHeader, name: &[u8]) {
    block[off..off + HEADER_LEN].copy_from_slice(bytemuck::bytes_of(header));
    block[off + HEADER_LEN..off + HEADER_LEN + name.len()].copy_from_slice(name);
}

fn name_matches(block: &[u8], off: usize, header: &DirEntryHeader, name: &str) -> bool {
    header.ino != 0
        && header.name_len as usize == name.len()
        && &block[off + HEADER_LEN..off + HEADER_LEN + name.len()] == name.as_bytes()
}

/// Looks a name up, returning the inode number of its record.
pub(crate) fn lookup(dir: &Inode, name: &str) -> Result<Option<u32>> {
    let fs = dir.fs();
    let block_size = fs.block_size();
    let blocks = dir.size() / block_size as u64;
    let mut block = vec![0u8; block_size];

    for logical in 0..blocks {
        dir.read_block_at(logical as Ext2Bid, &mut block)?;
        let mut off = 0;
        while off < block_size {
            let header = read_record(&block, off)?;
            if name_matches(&block, off, &header, name) {
                return Ok(Some(header.ino));
            }
            off += header.rec_len as usize;
        }
    }
    Ok(None)
}

/// Adds a record, splitting the slack of an existing record when one has
/// room and appending a fresh directory block otherwise.
pub(crate) fn add_entry(dir: &Inode, name: &str, child_ino: u32, child_type: FileType) -> Result<()> {
    if name.is_empty() {
        return_errno_with_message!(FsError::Invalid, "empty directory entry name");
    }
    if name.len() > MAX_FNAME_LEN {
        return_errno!(FsError::NameTooLong);
    }

    let fs = dir.fs();
    let block_size = fs.block_size();
    let file_type = if fs.has_filetype() {
        dt_of(child_type)
    } else {
        DT_UNKNOWN
    };
    let needed = align4(HEADER_LEN + name.len());
    let blocks = dir.size() / block_size as u64;
    let mut block = vec![0u8; block_size];

    // One pass over every record: refuse a duplicate name anywhere, and
    // remember the first slot with enough room.
    let mut slot: Option<(u64, usize, bool)> = None;
    for logical in 0..blocks {
        dir.read_block_at(logical as Ext2Bid, &mut block)?;
        let mut off = 0;
        while off < block_size {
            let header = read_record(&block, off)?;
            if name_matches(&block, off, &header, name) {
                return_errno!(FsError::Exists);
            }
            if slot.is_none() {
                if header.ino == 0 && header.rec_len as usize >= needed {
                    slot = Some((logical, off, true));
                } else if header.ino != 0 {
                    let used = align4(HEADER_LEN + header.name_len as usize);
                    if header.rec_len as usize - used >= needed {
                        slot = Some((logical, off, false));
                    }
                }
            }
            off += header.rec_len as usize;
        }
    }

    match slot {
        Some((logical, off, reuse_empty)) => {
            dir.read_block_at(logical as Ext2Bid, &mut block)?;
            let old = read_record(&block, off)?;
            if reuse_empty {
                let header = DirEntryHeader {
                    ino: child_ino,
                    rec_len: old.rec_len,
                    name_len: name.len() as u8,
                    file_type,
                };
                write_record(&mut block, off, &header, name.as_bytes());
            } else {
                let used = align4(HEADER_LEN + old.name_len as usize);
                let shortened = DirEntryHeader {
                    rec_len: used as u16,
                    ..old
                };
                block[off..off + HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&shortened));
                let header = DirEntryHeader {
                    ino: child_ino,
                    rec_len: old.rec_len - used as u16,
                    name_len: name.len() as u8,
                    file_type,
                };
                write_record(&mut block, off + used, &header, name.as_bytes());
            }
            dir.write_block_at(logical as Ext2Bid, &block)
        }
        None => {
            // No room anywhere; the new record spans a fresh block.
            block.fill(0);
            let header = DirEntryHeader {
                ino: child_ino,
                rec_len: block_size as u16,
                name_len: name.len() as u8,
                file_type,
            };
            write_record(&mut block, 0, &header, name.as_bytes());
            let end = dir.size();
            dir.write_at(end, &block)?;
            Ok(())
        }
    }
}

/// Removes the record carrying `name`: the first record of a block is
/// blanked by zeroing its inode field, any other is swallowed into its
/// predecessor's record length. Returns the inode number the record held;
/// the caller owns the link-count consequences.
pub(crate) fn remove_entry(dir: &Inode, name: &str) -> Result<u32> {
    let fs = dir.fs();
    let block_size = fs.block_size();
    let blocks = dir.size() / block_size as u64;
    let mut block = vec![0u8; block_size];

    for logical in 0..blocks {
        dir.read_block_at(logical as Ext2Bid, &mut block)?;
        let mut off = 0;
        let mut prev: Option<usize> = None;
        while off < block_size {
            let header = read_record(&block, off)?;
            if name_matches(&block, off, &header, name) {
                match prev {
                    Some(prev_off) => {
                        let mut prev_header = read_record(&block, prev_off)?;
                        prev_header.rec_len += header.rec_len;
                        block[prev_off..prev_off + HEADER_LEN]
                            .copy_from_slice(bytemuck::bytes_of(&prev_header));
                    }
                    None => {
                        let blanked = DirEntryHeader { ino: 0, ..header };
                        block[off..off + HEADER_LEN]
                            .copy_from_slice(bytemuck::bytes_of(&blanked));
                    }
                }
                dir.write_block_at(logical as Ext2Bid, &block)?;
                return Ok(header.ino);
            }
            prev = Some(off);
            off += header.rec_len as usize;
        }
    }
    return_errno!(FsError::NotFound)
}

/// Rewrites the inode number of the record carrying `name` in place.
pub(crate) fn redirect_entry(dir: &Inode, name: &str, new_ino: u32) -> Result<()> {
    let fs = dir.fs();
    let block_size = fs.block_size();
    let blocks = dir.size() / block_size as u64;
    let mut block = vec![0u8; block_size];

    for logical in 0..blocks {
        dir.read_block_at(logical as Ext2Bid, &mut block)?;
        let mut off = 0;
        while off < block_size {
            let header = read_record(&block, off)?;
            if name_matches(&block, off, &header, name) {
                let updated = DirEntryHeader {
                    ino: new_ino,
                    ..header
                };
                block[off..off + HEADER_LEN].copy_from_slice(bytemuck::bytes_of(&updated));
                return dir.write_block_at(logical as Ext2Bid, &block);
            }
            off += header.rec_len as usize;
        }
    }
    return_errno!(FsError::NotFound)
}

/// True iff every live record is `.` or `..`.
pub(crate) fn is_empty(dir: &Inode) -> Result<bool> {
    let fs = dir.fs();
    let block_size = fs.block_size();
    let blocks = dir.size() / block_size as u64;
    let mut block = vec![0u8; block_size];

    for logical in 0..blocks {
        dir.read_block_at(logical as Ext2Bid, &mut block)?;
        let mut off = 0;
        while off < block_size {
            let header = read_record(&block, off)?;
            if header.ino != 0 {
                let name = &block[off + HEADER_LEN..off + HEADER_LEN + header.name_len as usize];
                if name != b"." && name != b".." {
                    return Ok(false);
                }
            }
            off += header.rec_len as usize;
        }
    }
    Ok(true)
}

/// Reads the live record at or after byte `pos`, skipping blanked records.
/// Returns the entry together with the byte position just past it, or
/// `None` at end of stream.
pub(crate) fn next_entry(dir: &Inode, mut pos: u64) -> Result<Option<(DirEntry, u64)>> {
    let fs = dir.fs();
    let block_size = fs.block_size() as u64;
    let size = dir.size();
    let mut block = vec![0u8; block_size as usize];

    while pos < size {
        let logical = (pos / block_size) as Ext2Bid;
        let off = (pos % block_size) as usize;
        dir.read_block_at(logical, &mut block)?;
        let header = read_record(&block, off)?;
        if header.ino == 0 {
            pos += header.rec_len as u64;
            continue;
        }
        let name_bytes = &block[off + HEADER_LEN..off + HEADER_LEN + header.name_len as usize];
        let entry = DirEntry {
            ino: header.ino,
            name: String::from_utf8_lossy(name_bytes).into_owned(),
        };
        return Ok(Some((entry, pos + header.rec_len as u64)));
    }
    Ok(None)
}

/// Lays out a fresh directory: one block holding `.` and a `..` record
/// spanning the remainder, a link count of two, and a size of one block.
pub(crate) fn create_empty(dir: &Inode, parent_ino: u32) -> Result<()> {
    let fs = dir.fs();
    let block_size = fs.block_size();
    let file_type = if fs.has_filetype() { DT_DIR } else { DT_UNKNOWN };

    let mut block = vec![0u8; block_size];
    let dot = DirEntryHeader {
        ino: dir.ino(),
        rec_len: align4(HEADER_LEN + 1) as u16,
        name_len: 1,
        file_type,
    };
    write_record(&mut block, 0, &dot, b".");
    let dotdot = DirEntryHeader {
        ino: parent_ino,
        rec_len: (block_size - dot.rec_len as usize) as u16,
        name_len: 2,
        file_type,
    };
    write_record(&mut block, dot.rec_len as usize, &dotdot, b"..");

    dir.write_at(0, &block)?;
    dir.set_hard_links(2);
    Ok(())
}
