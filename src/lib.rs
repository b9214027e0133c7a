// SPDX-License-Identifier: MPL-2.0

//! A safe Rust ext2 filesystem driver.
//!
//! The crate implements the second extended filesystem on top of an abstract
//! [`BlockDevice`]: superblock and block-group bookkeeping, bitmap allocation
//! of blocks and inodes, the direct/indirect block map, variable-length
//! directory records, and a POSIX-shaped file API behind a mount registry.
//!
//! The public surface lives in two layers:
//!
//! - [`Ext2`] is one mounted volume: open it (or [`Ext2::format`] a fresh
//!   one), look up inodes, and sync it back.
//! - [`Ext2Driver`] is the process-wide driver context: an ordered set of
//!   mounted volumes plus a bounded open-file table, serialized by a single
//!   driver-wide lock. `open`/`read`/`readdir`/`rename`/`mkdir` and friends
//!   live here.
//!
//! On-disk structures are byte-exact ext2 revision 0 or 1 and are accessed
//! as plain-old-data; the driver assumes a little-endian host, as every
//! target ext2 itself ships on.

#![cfg_attr(not(test), no_std)]
#![allow(dead_code)]

extern crate alloc;

#[macro_use]
mod error;

pub use block_dev::BlockDevice;
pub use error::{Error, FsError, Result};
pub use fs::{Ext2, FormatOptions};
pub use inode::{FilePerm, FileType, ROOT_INO};
pub use utils::{now, set_wall_time, UnixTime};
pub use vfs::{
    Dirent, Ext2Driver, FcntlCmd, FileStat, Handle, MountFlags, OpenFlags, SeekFrom,
    MAX_OPEN_FILES,
};

mod bitmap;
mod block_dev;
mod block_group;
mod block_ptr;
mod dir;
mod fs;
mod indirect_cache;
mod inode;
mod inode_cache;
mod path;
mod prelude;
mod super_block;
mod utils;
mod vfs;

#[cfg(test)]
mod test;
