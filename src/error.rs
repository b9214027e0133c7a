// SPDX-License-Identifier: MPL-2.0

//! The driver's error taxonomy and the errno mapping used at the public
//! boundary.

use core::fmt;

/// Error kinds the driver distinguishes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FsError {
    /// The superblock does not carry the ext2 magic, or carries feature
    /// flags this driver cannot honor.
    NotExt2,
    /// The block device reported a read or write failure, or on-disk
    /// metadata is corrupted.
    Io,
    /// Path resolution failed at some component.
    NotFound,
    /// An object that must be absent is present.
    Exists,
    /// A directory was required but something else was found.
    NotDir,
    /// A non-directory was required but a directory was found.
    IsDir,
    /// The directory is not empty.
    NotEmpty,
    /// The target inode is referenced by an open file handle, or the mount
    /// is in use.
    Busy,
    /// Bitmap allocation found no free block or inode.
    NoSpace,
    /// A mutating call reached a read-only mount or a write-less device.
    ReadOnly,
    /// The open-file table is full.
    TooManyOpen,
    /// Malformed path, out-of-range handle, bad seek target, or an unknown
    /// fcntl command.
    Invalid,
    /// A directory entry name exceeds 255 bytes.
    NameTooLong,
    /// Symlink traversal exceeded the configured depth.
    TooManySymlinks,
    /// The operation is forbidden on this object (`unlink` of a directory,
    /// `rmdir` of the root, and similar EPERM-flavored refusals).
    NotPermitted,
}

/// An error with its kind and an optional static description.
#[derive(Clone, Copy, Debug)]
pub struct Error {
    kind: FsError,
    msg: Option<&'static str>,
}

impl Error {
    pub const fn new(kind: FsError) -> Self {
        Self { kind, msg: None }
    }

    pub const fn with_message(kind: FsError, msg: &'static str) -> Self {
        Self {
            kind,
            msg: Some(msg),
        }
    }

    pub const fn kind(&self) -> FsError {
        self.kind
    }

    /// The POSIX errno this error maps to at the driver boundary.
    pub const fn errno(&self) -> i32 {
        match self.kind {
            FsError::NotExt2 => EINVAL,
            FsError::Io => EIO,
            FsError::NotFound => ENOENT,
            FsError::Exists => EEXIST,
            FsError::NotDir => ENOTDIR,
            FsError::IsDir => EISDIR,
            FsError::NotEmpty => ENOTEMPTY,
            FsError::Busy => EBUSY,
            FsError::NoSpace => ENOSPC,
            FsError::ReadOnly => EROFS,
            FsError::TooManyOpen => ENFILE,
            FsError::Invalid => EINVAL,
            FsError::NameTooLong => ENAMETOOLONG,
            FsError::TooManySymlinks => ELOOP,
            FsError::NotPermitted => EPERM,
        }
    }
}

impl From<FsError> for Error {
    fn from(kind: FsError) -> Self {
        Self::new(kind)
    }
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        self.kind == other.kind
    }
}

impl Eq for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.msg {
            Some(msg) => write!(f, "{:?}: {}", self.kind, msg),
            None => write!(f, "{:?}", self.kind),
        }
    }
}

pub type Result<T> = core::result::Result<T, Error>;

pub const EPERM: i32 = 1;
pub const ENOENT: i32 = 2;
pub const EIO: i32 = 5;
pub const EBUSY: i32 = 16;
pub const EEXIST: i32 = 17;
pub const ENOTDIR: i32 = 20;
pub const EISDIR: i32 = 21;
pub const EINVAL: i32 = 22;
pub const ENFILE: i32 = 23;
pub const ENOSPC: i32 = 28;
pub const EROFS: i32 = 30;
pub const ENAMETOOLONG: i32 = 36;
pub const ENOTEMPTY: i32 = 39;
pub const ELOOP: i32 = 40;

#[macro_export]
macro_rules! return_errno {
    ($kind:expr) => {
        return Err($crate::error::Error::new($kind))
    };
}

#[macro_export]
macro_rules! return_errno_with_message {
    ($kind:expr, $msg:literal) => {
        return Err($crate::error::Error::with_message($kind, $msg))
    };
}
