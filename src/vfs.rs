// SPDX-License-Identifier: MPL-2.0

//! The driver context: an ordered registry of mounted volumes, a bounded
//! open-file table, and the POSIX-shaped operations over them.
//!
//! One driver-wide mutex serializes every public operation for its whole
//! duration, device I/O included; metadata consistency needs no finer
//! locking and the target deployments are latency-insensitive. The lock is
//! never taken reentrantly: public operations do not call each other.

use int_to_c_enum::TryFromInt;

use crate::block_dev::BlockDevice;
use crate::dir;
use crate::fs::Ext2;
use crate::inode::{FilePerm, FileType, Inode, MAX_FNAME_LEN, ROOT_INO};
use crate::path;
use crate::prelude::*;

/// Size of the open-file table.
pub const MAX_OPEN_FILES: usize = 16;

bitflags::bitflags! {
    /// Mount flags.
    pub struct MountFlags: u32 {
        const READ_WRITE = 1;
    }
}

bitflags::bitflags! {
    /// Open flags; the empty set is a plain read-only open.
    pub struct OpenFlags: u32 {
        const WRONLY    = 0o1;
        const RDWR      = 0o2;
        const CREAT     = 0o100;
        const EXCL      = 0o200;
        const TRUNC     = 0o1000;
        const APPEND    = 0o2000;
        const DIRECTORY = 0o200000;
    }
}

impl OpenFlags {
    fn wants_write(self) -> bool {
        self.intersects(OpenFlags::WRONLY | OpenFlags::RDWR)
    }

    fn readable(self) -> bool {
        !self.contains(OpenFlags::WRONLY)
    }
}

/// Where a seek offset is measured from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SeekFrom {
    Start(u64),
    Current(i64),
    End(i64),
}

/// The fcntl commands, by their POSIX numbers.
#[repr(u32)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, TryFromInt)]
pub enum FcntlCmd {
    GetFd = 1,
    SetFd = 2,
    GetFl = 3,
    SetFl = 4,
}

/// One `readdir` result.
#[derive(Clone, Debug)]
pub struct Dirent {
    pub ino: u32,
    pub name: String,
    pub size: u64,
    pub time: UnixTime,
    pub kind: FileType,
}

/// One `stat` result.
#[derive(Clone, Copy, Debug)]
pub struct FileStat {
    pub ino: u32,
    pub size: u64,
    pub mtime: UnixTime,
    pub kind: FileType,
    pub nlinks: u16,
    /// Owner read permission.
    pub readable: bool,
    /// Owner write permission.
    pub writable: bool,
}

/// An open-file handle, 1-based as handed to callers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Handle(usize);

impl Handle {
    pub fn index(self) -> usize {
        self.0
    }
}

struct FileHandle {
    fs: Arc<Ext2>,
    read_write: bool,
    ino: u32,
    inode: Arc<Inode>,
    flags: OpenFlags,
    pos: u64,
}

struct Mount {
    point: String,
    fs: Arc<Ext2>,
    read_write: bool,
}

struct DriverState {
    mounts: Vec<Mount>,
    handles: Vec<Option<FileHandle>>,
}

/// The process-wide ext2 driver.
///
/// Holds what the mount registry and open-file table used to be as process
/// globals: create one with [`Ext2Driver::new`], keep it for the process
/// lifetime, and call [`Ext2Driver::shutdown`] at the end.
pub struct Ext2Driver {
    state: Mutex<DriverState>,
}

impl Default for Ext2Driver {
    fn default() -> Self {
        Self::new()
    }
}

impl Ext2Driver {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(DriverState {
                mounts: Vec::new(),
                handles: (0..MAX_OPEN_FILES).map(|_| None).collect(),
            }),
        }
    }

    /// Mounts the ext2 volume on `device` under `mountpoint`.
    pub fn mount(
        &self,
        mountpoint: &str,
        device: Arc<dyn BlockDevice>,
        flags: MountFlags,
    ) -> Result<()> {
        let point = normalize_mountpoint(mountpoint)?;
        let read_write = flags.contains(MountFlags::READ_WRITE);

        let mut state = self.state.lock();
        if state.mounts.iter().any(|m| m.point == point) {
            return_errno_with_message!(FsError::Exists, "mountpoint already in use");
        }
        if read_write && !device.supports_write() {
            debug!("ext2: device cannot write; refusing read-write mount of {}", point);
            return_errno_with_message!(FsError::ReadOnly, "device does not support writing");
        }

        let fs = Ext2::open(device, !read_write)?;
        debug!("ext2: mounted {} ({})", point, if read_write { "rw" } else { "ro" });
        state.mounts.push(Mount {
            point,
            fs,
            read_write,
        });
        Ok(())
    }

    /// Unmounts the volume at `mountpoint`, flushing it first. Refused
    /// with `Busy` while any file handle still references the volume.
    pub fn unmount(&self, mountpoint: &str) -> Result<()> {
        let point = normalize_mountpoint(mountpoint)?;

        let mut state = self.state.lock();
        let idx = state
            .mounts
            .iter()
            .position(|m| m.point == point)
            .ok_or(Error::with_message(FsError::NotFound, "nothing mounted there"))?;

        let fs = state.mounts[idx].fs.clone();
        let busy = state
            .handles
            .iter()
            .flatten()
            .any(|fh| Arc::ptr_eq(&fh.fs, &fs));
        if busy {
            warn!("ext2: refusing to unmount {} with open handles", point);
            return_errno_with_message!(FsError::Busy, "open handles reference the mount");
        }

        fs.sync_all()?;
        state.mounts.remove(idx);
        debug!("ext2: unmounted {}", point);
        Ok(())
    }

    /// Opens `path`. A directory may only be opened with
    /// [`OpenFlags::DIRECTORY`] and only for `readdir`; `CREAT` on a
    /// read-write mount creates a missing regular file with `perm` and the
    /// parent directory's uid/gid.
    pub fn open(&self, full_path: &str, flags: OpenFlags, perm: FilePerm) -> Result<Handle> {
        let mut state = self.state.lock();
        let (fs, read_write, rest) = volume_for(&state, full_path)?;

        if !read_write
            && (flags.wants_write() || flags.intersects(OpenFlags::TRUNC | OpenFlags::APPEND))
        {
            return_errno!(FsError::ReadOnly);
        }
        if flags.contains(OpenFlags::CREAT) && flags.contains(OpenFlags::DIRECTORY) {
            return_errno_with_message!(FsError::Invalid, "open cannot create directories");
        }

        // Claim a table slot before resolving, as the slot shortage is the
        // cheaper failure to surface.
        let slot = free_slot(&state)?;

        let inode = match path::resolve(&fs, rest) {
            Ok(inode) => {
                if flags.contains(OpenFlags::CREAT) && flags.contains(OpenFlags::EXCL) {
                    return_errno!(FsError::Exists);
                }
                inode
            }
            Err(e) if e.kind() == FsError::NotFound && flags.contains(OpenFlags::CREAT) => {
                if !read_write {
                    return_errno!(FsError::ReadOnly);
                }
                create_regular(&fs, rest, perm)?
            }
            Err(e) => return Err(e),
        };

        if inode.type_() == FileType::Dir {
            if flags.wants_write() || !flags.contains(OpenFlags::DIRECTORY) {
                return_errno!(FsError::IsDir);
            }
        } else if flags.contains(OpenFlags::DIRECTORY) {
            return_errno!(FsError::NotDir);
        }

        if flags.contains(OpenFlags::TRUNC) && inode.type_().is_regular() && inode.size() > 0 {
            inode.truncate(0)?;
            let time = now();
            inode.set_mtime(time);
            inode.set_ctime(time);
        }

        let pos = if flags.contains(OpenFlags::APPEND) {
            inode.size()
        } else {
            0
        };
        state.handles[slot] = Some(FileHandle {
            ino: inode.ino(),
            inode,
            fs,
            read_write,
            flags,
            pos,
        });
        Ok(Handle(slot + 1))
    }

    /// Closes a handle. Closing an already-closed handle is tolerated.
    pub fn close(&self, handle: Handle) -> Result<()> {
        let mut state = self.state.lock();
        let idx = handle.0.wrapping_sub(1);
        if let Some(slot) = state.handles.get_mut(idx) {
            slot.take();
        }
        Ok(())
    }

    /// Reads at the handle's position, advancing it. Reads past the end are
    /// clamped; holes read as zeros.
    pub fn read(&self, handle: Handle, buf: &mut [u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let fh = handle_mut(&mut state, handle)?;
        if fh.flags.contains(OpenFlags::DIRECTORY) || !fh.flags.readable() {
            return_errno!(FsError::Invalid);
        }
        let n = fh.inode.read_at(fh.pos, buf)?;
        fh.pos += n as u64;
        Ok(n)
    }

    /// Writes at the handle's position, advancing it and growing the file
    /// as needed. With [`OpenFlags::APPEND`] every write lands at the
    /// current end of file.
    pub fn write(&self, handle: Handle, buf: &[u8]) -> Result<usize> {
        let mut state = self.state.lock();
        let fh = handle_mut(&mut state, handle)?;
        if fh.flags.contains(OpenFlags::DIRECTORY) || !fh.flags.wants_write() {
            return_errno!(FsError::Invalid);
        }
        if !fh.read_write {
            return_errno!(FsError::ReadOnly);
        }
        if fh.flags.contains(OpenFlags::APPEND) {
            fh.pos = fh.inode.size();
        }
        let n = fh.inode.write_at(fh.pos, buf)?;
        fh.pos += n as u64;
        let time = now();
        fh.inode.set_mtime(time);
        fh.inode.set_ctime(time);
        Ok(n)
    }

    /// Repositions the handle. Readers are clamped into `[0, size]`; a
    /// writable handle may park past the end, and the next write leaves a
    /// hole behind itself.
    pub fn seek(&self, handle: Handle, pos: SeekFrom) -> Result<u64> {
        let mut state = self.state.lock();
        let fh = handle_mut(&mut state, handle)?;
        if fh.flags.contains(OpenFlags::DIRECTORY) {
            return_errno!(FsError::Invalid);
        }
        let size = fh.inode.size();
        let target = match pos {
            SeekFrom::Start(offset) => offset as i128,
            SeekFrom::Current(delta) => fh.pos as i128 + delta as i128,
            SeekFrom::End(delta) => size as i128 + delta as i128,
        };
        if target < 0 {
            return_errno_with_message!(FsError::Invalid, "seek before the start of the file");
        }
        let mut target = target as u64;
        if !fh.flags.wants_write() && target > size {
            target = size;
        }
        fh.pos = target;
        Ok(target)
    }

    /// Returns the handle's position.
    pub fn tell(&self, handle: Handle) -> Result<u64> {
        let mut state = self.state.lock();
        let fh = handle_mut(&mut state, handle)?;
        if fh.flags.contains(OpenFlags::DIRECTORY) {
            return_errno!(FsError::Invalid);
        }
        Ok(fh.pos)
    }

    /// Returns the size of the open object.
    pub fn total(&self, handle: Handle) -> Result<u64> {
        let mut state = self.state.lock();
        let fh = handle_mut(&mut state, handle)?;
        if fh.flags.contains(OpenFlags::DIRECTORY) {
            return_errno!(FsError::Invalid);
        }
        Ok(fh.inode.size())
    }

    /// Reads the next directory entry of a handle opened with
    /// [`OpenFlags::DIRECTORY`], or `None` at the end of the stream.
    ///
    /// The handle's position is the byte offset of the next record, so the
    /// cursor stays valid under concurrent mutation of other entries.
    pub fn readdir(&self, handle: Handle) -> Result<Option<Dirent>> {
        let mut state = self.state.lock();
        let fh = handle_mut(&mut state, handle)?;
        if !fh.flags.contains(OpenFlags::DIRECTORY) {
            return_errno!(FsError::Invalid);
        }
        let Some((entry, next_pos)) = dir::next_entry(&fh.inode, fh.pos)? else {
            return Ok(None);
        };
        let child = fh.fs.lookup_inode(entry.ino)?;
        fh.pos = next_pos;
        Ok(Some(Dirent {
            ino: entry.ino,
            name: entry.name,
            size: child.size(),
            time: child.mtime(),
            kind: child.type_(),
        }))
    }

    /// Resolves `path` and reports size, kind, times and owner permission
    /// bits.
    pub fn stat(&self, full_path: &str) -> Result<FileStat> {
        let state = self.state.lock();
        let (fs, _, rest) = volume_for(&state, full_path)?;
        let inode = path::resolve(&fs, rest)?;
        let perm = inode.perm();
        Ok(FileStat {
            ino: inode.ino(),
            size: inode.size(),
            mtime: inode.mtime(),
            kind: inode.type_(),
            nlinks: inode.hard_links(),
            readable: perm.contains(FilePerm::S_IRUSR),
            writable: perm.contains(FilePerm::S_IWUSR),
        })
    }

    /// Removes a regular file, symlink or special file. The inode and its
    /// blocks are freed once the last link goes; an open handle on the
    /// target makes this fail with `Busy`.
    pub fn unlink(&self, full_path: &str) -> Result<()> {
        let state = self.state.lock();
        let (fs, read_write, rest) = volume_for(&state, full_path)?;
        if !read_write {
            return_errno!(FsError::ReadOnly);
        }
        let (parent_path, name) = path::split_parent(rest);
        if name.is_empty() {
            return_errno_with_message!(FsError::NotPermitted, "cannot unlink the root");
        }

        let parent = path::resolve(&fs, parent_path)?;
        if parent.type_() != FileType::Dir {
            return_errno!(FsError::NotDir);
        }
        let ino = dir::lookup(&parent, name)?.ok_or(Error::new(FsError::NotFound))?;
        let inode = fs.lookup_inode(ino)?;
        if inode.type_() == FileType::Dir {
            return_errno_with_message!(FsError::NotPermitted, "target is a directory; use rmdir");
        }
        if inode_busy(&state, &fs, ino) {
            return_errno!(FsError::Busy);
        }

        dir::remove_entry(&parent, name)?;
        let time = now();
        parent.set_mtime(time);
        parent.set_ctime(time);
        release_inode(&fs, &inode, false)
    }

    /// Creates a directory, inheriting mode, uid and gid from the parent.
    pub fn mkdir(&self, full_path: &str) -> Result<()> {
        let state = self.state.lock();
        let (fs, read_write, rest) = volume_for(&state, full_path)?;
        if !read_write {
            return_errno!(FsError::ReadOnly);
        }
        let (parent_path, name) = path::split_parent(rest);
        if name.is_empty() {
            // The root always exists.
            return_errno!(FsError::Exists);
        }
        if name.len() > MAX_FNAME_LEN {
            return_errno!(FsError::NameTooLong);
        }

        let parent = path::resolve(&fs, parent_path)?;
        if parent.type_() != FileType::Dir {
            return_errno!(FsError::NotDir);
        }
        if dir::lookup(&parent, name)?.is_some() {
            return_errno!(FsError::Exists);
        }

        let inode = fs.alloc_inode(
            parent.block_group_idx(),
            FileType::Dir,
            parent.perm(),
            parent.uid(),
            parent.gid(),
        )?;
        if let Err(e) = dir::create_empty(&inode, parent.ino()) {
            let _ = release_inode(&fs, &inode, true);
            return Err(e);
        }
        if let Err(e) = dir::add_entry(&parent, name, inode.ino(), FileType::Dir) {
            let _ = release_inode(&fs, &inode, true);
            return Err(e);
        }
        parent.inc_hard_links();
        let time = now();
        parent.set_mtime(time);
        parent.set_ctime(time);
        Ok(())
    }

    /// Removes an empty directory.
    pub fn rmdir(&self, full_path: &str) -> Result<()> {
        let state = self.state.lock();
        let (fs, read_write, rest) = volume_for(&state, full_path)?;
        if !read_write {
            return_errno!(FsError::ReadOnly);
        }
        let (parent_path, name) = path::split_parent(rest);
        if name.is_empty() {
            return_errno_with_message!(FsError::NotPermitted, "cannot remove the root");
        }
        if name == "." {
            return_errno_with_message!(FsError::Invalid, "rmdir on .");
        }
        if name == ".." {
            return_errno!(FsError::NotEmpty);
        }

        let parent = path::resolve(&fs, parent_path)?;
        if parent.type_() != FileType::Dir {
            return_errno!(FsError::NotDir);
        }
        let ino = dir::lookup(&parent, name)?.ok_or(Error::new(FsError::NotFound))?;
        let inode = fs.lookup_inode(ino)?;
        if inode.type_() != FileType::Dir {
            return_errno_with_message!(FsError::NotPermitted, "not a directory; use unlink");
        }
        if ino == ROOT_INO {
            return_errno_with_message!(FsError::NotPermitted, "cannot remove the root");
        }
        if inode_busy(&state, &fs, ino) {
            return_errno!(FsError::Busy);
        }
        if !dir::is_empty(&inode)? {
            return_errno!(FsError::NotEmpty);
        }

        dir::remove_entry(&parent, name)?;
        release_inode(&fs, &inode, true)?;
        parent.dec_hard_links();
        let time = now();
        parent.set_mtime(time);
        parent.set_ctime(time);
        Ok(())
    }

    /// Moves `old_path` to `new_path` within one volume.
    ///
    /// An existing destination must match the source's kind, must be empty
    /// if a directory, and must not be open; it is then replaced. Atomic
    /// with respect to other driver calls, but not across a crash: a
    /// mid-sequence I/O error is surfaced and the volume stays
    /// ext2-consistent, possibly with the moved object present under both
    /// names or an orphaned destination inode.
    pub fn rename(&self, old_path: &str, new_path: &str) -> Result<()> {
        let state = self.state.lock();
        let (fs, read_write, old_rest) = volume_for(&state, old_path)?;
        let (other_fs, _, new_rest) = volume_for(&state, new_path)?;
        if !Arc::ptr_eq(&fs, &other_fs) {
            return_errno_with_message!(FsError::Invalid, "rename across mounts");
        }
        if !read_write {
            return_errno!(FsError::ReadOnly);
        }

        let (old_parent_path, old_name) = path::split_parent(old_rest);
        if old_name.is_empty() {
            return_errno_with_message!(FsError::Invalid, "cannot move the root");
        }
        let (new_parent_path, new_name) = path::split_parent(new_rest);
        if new_name.is_empty() {
            return_errno_with_message!(FsError::Invalid, "bad destination path");
        }
        if matches!(old_name, "." | "..") || matches!(new_name, "." | "..") {
            return_errno!(FsError::Invalid);
        }
        if new_name.len() > MAX_FNAME_LEN {
            return_errno!(FsError::NameTooLong);
        }

        let old_parent = path::resolve(&fs, old_parent_path)?;
        if old_parent.type_() != FileType::Dir {
            return_errno!(FsError::NotDir);
        }
        let src_ino = dir::lookup(&old_parent, old_name)?.ok_or(Error::new(FsError::NotFound))?;
        let src = fs.lookup_inode(src_ino)?;
        let src_is_dir = src.type_() == FileType::Dir;

        let new_parent = path::resolve(&fs, new_parent_path)?;
        if new_parent.type_() != FileType::Dir {
            return_errno!(FsError::NotDir);
        }
        if src_is_dir && new_parent.ino() == src_ino {
            return_errno_with_message!(FsError::Invalid, "cannot move a directory into itself");
        }

        if let Some(dst_ino) = dir::lookup(&new_parent, new_name)? {
            if dst_ino == src_ino {
                // Same object under both names; nothing to do.
                return Ok(());
            }
            let dst = fs.lookup_inode(dst_ino)?;
            let dst_is_dir = dst.type_() == FileType::Dir;
            match (src_is_dir, dst_is_dir) {
                (false, true) => return_errno!(FsError::IsDir),
                (true, false) => return_errno!(FsError::NotDir),
                (true, true) => {
                    if !dir::is_empty(&dst)? {
                        return_errno!(FsError::NotEmpty);
                    }
                }
                (false, false) => {}
            }
            if inode_busy(&state, &fs, dst_ino) {
                return_errno!(FsError::Busy);
            }

            dir::remove_entry(&new_parent, new_name)?;
            release_inode(&fs, &dst, dst_is_dir)?;
            if dst_is_dir {
                new_parent.dec_hard_links();
            }
        }

        dir::add_entry(&new_parent, new_name, src_ino, src.type_())?;
        dir::remove_entry(&old_parent, old_name)?;

        if src_is_dir {
            dir::redirect_entry(&src, "..", new_parent.ino())?;
            old_parent.dec_hard_links();
            new_parent.inc_hard_links();
        }

        let time = now();
        old_parent.set_mtime(time);
        old_parent.set_ctime(time);
        new_parent.set_mtime(time);
        new_parent.set_ctime(time);
        src.set_ctime(time);
        Ok(())
    }

    /// The fcntl surface of the original driver: `F_GETFL` reports the
    /// stored flags; `F_SETFL`, `F_GETFD` and `F_SETFD` succeed as no-ops.
    pub fn fcntl(&self, handle: Handle, cmd: i32) -> Result<i32> {
        let mut state = self.state.lock();
        let fh = handle_mut(&mut state, handle)?;
        let cmd = FcntlCmd::try_from(cmd as u32)
            .map_err(|_| Error::with_message(FsError::Invalid, "unknown fcntl command"))?;
        match cmd {
            FcntlCmd::GetFl => Ok(fh.flags.bits() as i32),
            FcntlCmd::SetFl | FcntlCmd::GetFd | FcntlCmd::SetFd => Ok(0),
        }
    }

    /// Flushes every mounted volume.
    pub fn sync(&self) -> Result<()> {
        let state = self.state.lock();
        for mount in &state.mounts {
            mount.fs.sync_all()?;
        }
        Ok(())
    }

    /// Drops every open handle and unmounts everything, flushing as it
    /// goes. The first flush failure is reported after the teardown
    /// completes.
    pub fn shutdown(&self) -> Result<()> {
        let mut state = self.state.lock();
        for slot in state.handles.iter_mut() {
            slot.take();
        }
        let mut first_err = None;
        for mount in state.mounts.drain(..) {
            if let Err(e) = mount.fs.sync_all() {
                warn!("ext2: flush of {} failed during shutdown: {}", mount.point, e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl Debug for Ext2Driver {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Ext2Driver")
            .field("mounts", &state.mounts.len())
            .field(
                "open_files",
                &state.handles.iter().flatten().count(),
            )
            .finish()
    }
}

fn normalize_mountpoint(mountpoint: &str) -> Result<String> {
    if !mountpoint.starts_with('/') {
        return_errno_with_message!(FsError::Invalid, "mountpoint must be absolute");
    }
    let trimmed = mountpoint.trim_end_matches('/');
    Ok(if trimmed.is_empty() {
        "/".to_string()
    } else {
        trimmed.to_string()
    })
}

/// Longest-prefix mount lookup; the remainder of the path is resolved
/// inside the matched volume.
fn volume_for<'p>(state: &DriverState, full_path: &'p str) -> Result<(Arc<Ext2>, bool, &'p str)> {
    if !full_path.starts_with('/') {
        return_errno_with_message!(FsError::Invalid, "path must be absolute");
    }
    let mut best: Option<(&Mount, &'p str)> = None;
    for mount in &state.mounts {
        let Some(rest) = mount_rest(&mount.point, full_path) else {
            continue;
        };
        if best.map_or(true, |(b, _)| mount.point.len() > b.point.len()) {
            best = Some((mount, rest));
        }
    }
    let (mount, rest) = best.ok_or(Error::with_message(
        FsError::NotFound,
        "no mounted volume covers the path",
    ))?;
    Ok((mount.fs.clone(), mount.read_write, rest))
}

fn mount_rest<'p>(point: &str, full_path: &'p str) -> Option<&'p str> {
    if point == "/" {
        return full_path.strip_prefix('/');
    }
    let rest = full_path.strip_prefix(point)?;
    if rest.is_empty() || rest.starts_with('/') {
        Some(rest)
    } else {
        None
    }
}

fn free_slot(state: &DriverState) -> Result<usize> {
    state
        .handles
        .iter()
        .position(|slot| slot.is_none())
        .ok_or(Error::new(FsError::TooManyOpen))
}

fn handle_mut<'s>(state: &'s mut DriverState, handle: Handle) -> Result<&'s mut FileHandle> {
    let idx = handle.0.wrapping_sub(1);
    state
        .handles
        .get_mut(idx)
        .and_then(|slot| slot.as_mut())
        .ok_or(Error::with_message(FsError::Invalid, "bad file handle"))
}

fn inode_busy(state: &DriverState, fs: &Arc<Ext2>, ino: u32) -> bool {
    state
        .handles
        .iter()
        .flatten()
        .any(|fh| fh.ino == ino && Arc::ptr_eq(&fh.fs, fs))
}

/// Creates a regular file for `open(CREAT)`: the inode goes to the
/// parent's group and inherits the parent's uid/gid.
fn create_regular(fs: &Arc<Ext2>, rest: &str, perm: FilePerm) -> Result<Arc<Inode>> {
    let (parent_path, name) = path::split_parent(rest);
    if name.is_empty() || name == "." || name == ".." {
        return_errno!(FsError::Invalid);
    }
    if name.len() > MAX_FNAME_LEN {
        return_errno!(FsError::NameTooLong);
    }

    let parent = path::resolve(fs, parent_path)?;
    if parent.type_() != FileType::Dir {
        return_errno!(FsError::NotDir);
    }

    let inode = fs.alloc_inode(
        parent.block_group_idx(),
        FileType::File,
        perm,
        parent.uid(),
        parent.gid(),
    )?;
    inode.set_hard_links(1);
    if let Err(e) = dir::add_entry(&parent, name, inode.ino(), FileType::File) {
        let _ = release_inode(fs, &inode, false);
        return Err(e);
    }
    let time = now();
    parent.set_mtime(time);
    parent.set_ctime(time);
    Ok(inode)
}

/// Drops one link (or, for a directory being removed, all of them); a
/// last-link inode has its data freed, its deletion time stamped and its
/// body written back before the bitmap bit clears.
fn release_inode(fs: &Arc<Ext2>, inode: &Arc<Inode>, was_dir: bool) -> Result<()> {
    if was_dir {
        inode.set_hard_links(0);
    } else {
        inode.dec_hard_links();
    }
    if inode.hard_links() == 0 {
        inode.truncate(0)?;
        inode.set_dtime(now());
        inode.sync_metadata()?;
        fs.free_inode(inode.ino(), was_dir)?;
    } else {
        inode.set_ctime(now());
    }
    Ok(())
}
