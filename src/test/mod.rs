// SPDX-License-Identifier: MPL-2.0

//! Integration tests against an in-memory block device.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex as StdMutex;

use crate::block_dev::BlockDevice;
use crate::error::{EINVAL, EPERM};
use crate::fs::{Ext2, FormatOptions};
use crate::inode::{FilePerm, FileType};
use crate::prelude::*;
use crate::utils::set_wall_time;
use crate::vfs::{Ext2Driver, MountFlags, OpenFlags, SeekFrom, MAX_OPEN_FILES};
use crate::{dir, path};

const LBA_SIZE: usize = 512;

/// A RAM-backed block device with a write counter.
struct MemDisk {
    data: StdMutex<Vec<u8>>,
    writes: AtomicUsize,
    writable: bool,
}

impl MemDisk {
    fn new(kib: usize) -> Arc<Self> {
        Arc::new(Self {
            data: StdMutex::new(vec![0u8; kib * 1024]),
            writes: AtomicUsize::new(0),
            writable: true,
        })
    }

    fn write_count(&self) -> usize {
        self.writes.load(Ordering::Relaxed)
    }
}

impl BlockDevice for MemDisk {
    fn block_size(&self) -> usize {
        LBA_SIZE
    }

    fn block_count(&self) -> u64 {
        (self.data.lock().unwrap().len() / LBA_SIZE) as u64
    }

    fn read_blocks(&self, start_lba: u64, buf: &mut [u8]) -> Result<()> {
        let offset = start_lba as usize * LBA_SIZE;
        let data = self.data.lock().unwrap();
        if offset + buf.len() > data.len() {
            return_errno_with_message!(FsError::Io, "read past the end of the disk");
        }
        buf.copy_from_slice(&data[offset..offset + buf.len()]);
        Ok(())
    }

    fn write_blocks(&self, start_lba: u64, buf: &[u8]) -> Result<()> {
        if !self.writable {
            return_errno!(FsError::ReadOnly);
        }
        let offset = start_lba as usize * LBA_SIZE;
        let mut data = self.data.lock().unwrap();
        if offset + buf.len() > data.len() {
            return_errno_with_message!(FsError::Io, "write past the end of the disk");
        }
        data[offset..offset + buf.len()].copy_from_slice(buf);
        self.writes.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    fn supports_write(&self) -> bool {
        self.writable
    }
}

fn formatted_disk(kib: usize) -> Arc<MemDisk> {
    set_wall_time(1_700_000_000);
    let disk = MemDisk::new(kib);
    let dev: Arc<dyn BlockDevice> = disk.clone();
    Ext2::format(&dev, FormatOptions::default()).unwrap();
    disk
}

fn mounted_rw(kib: usize) -> (Ext2Driver, Arc<MemDisk>) {
    let disk = formatted_disk(kib);
    let driver = Ext2Driver::new();
    driver
        .mount("/ext", disk.clone(), MountFlags::READ_WRITE)
        .unwrap();
    (driver, disk)
}

fn perm(bits: u16) -> FilePerm {
    FilePerm::from_bits_truncate(bits)
}

/// Creates `path` with `contents` through the driver.
fn put_file(driver: &Ext2Driver, path: &str, contents: &[u8]) {
    let h = driver
        .open(path, OpenFlags::CREAT | OpenFlags::RDWR, perm(0o644))
        .unwrap();
    assert_eq!(driver.write(h, contents).unwrap(), contents.len());
    driver.close(h).unwrap();
}

fn read_file(driver: &Ext2Driver, path: &str) -> Vec<u8> {
    let h = driver.open(path, OpenFlags::empty(), perm(0)).unwrap();
    let size = driver.total(h).unwrap() as usize;
    let mut buf = vec![0u8; size];
    let mut done = 0;
    while done < size {
        let n = driver.read(h, &mut buf[done..]).unwrap();
        assert!(n > 0);
        done += n;
    }
    driver.close(h).unwrap();
    buf
}

fn list_names(driver: &Ext2Driver, path: &str) -> Vec<String> {
    let h = driver
        .open(path, OpenFlags::DIRECTORY, perm(0))
        .unwrap();
    let mut names = Vec::new();
    while let Some(entry) = driver.readdir(h).unwrap() {
        names.push(entry.name);
    }
    driver.close(h).unwrap();
    names
}

/// Reopens the (unmounted) disk read-only and returns the free block and
/// inode counts plus the used-directories counter, checking the sums
/// against the group descriptors on the way.
fn free_counts(disk: &Arc<MemDisk>) -> (u32, u32, u32) {
    let dev: Arc<dyn BlockDevice> = disk.clone();
    let fs = Ext2::open(dev, true).unwrap();
    let mut group_blocks = 0;
    let mut group_inodes = 0;
    let mut dirs = 0;
    for idx in 0..fs.group_count() {
        group_blocks += fs.group(idx).free_blocks_count();
        group_inodes += fs.group(idx).free_inodes_count();
        dirs += fs.group(idx).dirs_count();
    }
    assert_eq!(fs.free_blocks_count(), group_blocks);
    assert_eq!(fs.free_inodes_count(), group_inodes);
    (group_blocks, group_inodes, dirs)
}

#[test]
fn mount_then_list_root() {
    let disk = formatted_disk(1024);
    let driver = Ext2Driver::new();
    driver
        .mount("/ext", disk.clone(), MountFlags::empty())
        .unwrap();

    let h = driver.open("/ext", OpenFlags::DIRECTORY, perm(0)).unwrap();
    let first = driver.readdir(h).unwrap().unwrap();
    assert_eq!(first.name, ".");
    assert_eq!(first.kind, FileType::Dir);
    let second = driver.readdir(h).unwrap().unwrap();
    assert_eq!(second.name, "..");
    assert!(driver.readdir(h).unwrap().is_none());
    driver.close(h).unwrap();
    driver.unmount("/ext").unwrap();
}

#[test]
fn mount_unmount_without_writes_touches_nothing() {
    let disk = formatted_disk(1024);
    let baseline = disk.write_count();

    let driver = Ext2Driver::new();
    driver
        .mount("/ext", disk.clone(), MountFlags::empty())
        .unwrap();
    let h = driver.open("/ext", OpenFlags::DIRECTORY, perm(0)).unwrap();
    while driver.readdir(h).unwrap().is_some() {}
    driver.close(h).unwrap();
    driver.unmount("/ext").unwrap();

    assert_eq!(disk.write_count(), baseline);
}

#[test]
fn read_back_a_small_file() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/hello", b"Hello, world!");

    let h = driver.open("/ext/hello", OpenFlags::empty(), perm(0)).unwrap();
    let mut buf = [0u8; 32];
    assert_eq!(driver.read(h, &mut buf).unwrap(), 13);
    assert_eq!(&buf[..13], b"Hello, world!");
    // A second read is at end of file.
    assert_eq!(driver.read(h, &mut buf).unwrap(), 0);
    driver.close(h).unwrap();
}

#[test]
fn file_survives_a_remount() {
    let (driver, disk) = mounted_rw(1024);
    put_file(&driver, "/ext/persist", b"written before unmount");
    driver.unmount("/ext").unwrap();

    driver
        .mount("/ext", disk.clone(), MountFlags::empty())
        .unwrap();
    assert_eq!(read_file(&driver, "/ext/persist"), b"written before unmount");
}

#[test]
fn leading_hole_reads_as_zeros() {
    let (driver, _disk) = mounted_rw(1024);
    let h = driver
        .open("/ext/sparse", OpenFlags::CREAT | OpenFlags::RDWR, perm(0o644))
        .unwrap();
    // Park past the first eight blocks and write one byte; everything
    // before it stays unallocated.
    driver.seek(h, SeekFrom::Start(8191)).unwrap();
    driver.write(h, b"x").unwrap();
    assert_eq!(driver.total(h).unwrap(), 8192);

    driver.seek(h, SeekFrom::Start(0)).unwrap();
    let mut buf = vec![0xffu8; 4096];
    assert_eq!(driver.read(h, &mut buf).unwrap(), 4096);
    assert!(buf.iter().all(|&b| b == 0));
    driver.close(h).unwrap();
}

#[test]
fn mkdir_then_stat() {
    set_wall_time(1_700_000_123);
    let (driver, _disk) = mounted_rw(1024);

    let root_before = driver.stat("/ext").unwrap();
    driver.mkdir("/ext/sub").unwrap();

    let st = driver.stat("/ext/sub").unwrap();
    assert_eq!(st.kind, FileType::Dir);
    assert_eq!(st.size, 1024);
    assert_eq!(st.nlinks, 2);
    assert!(st.mtime > 0);
    assert!(st.readable && st.writable);

    // The parent gained the new directory's `..` link.
    let root_after = driver.stat("/ext").unwrap();
    assert_eq!(root_after.nlinks, root_before.nlinks + 1);
    let names = list_names(&driver, "/ext/sub");
    assert_eq!(names, vec![".", ".."]);
}

#[test]
fn mkdir_rmdir_roundtrip_restores_the_volume() {
    let (driver, disk) = mounted_rw(1024);
    driver.unmount("/ext").unwrap();
    let before = free_counts(&disk);

    driver
        .mount("/ext", disk.clone(), MountFlags::READ_WRITE)
        .unwrap();
    driver.mkdir("/ext/tmp").unwrap();
    driver.rmdir("/ext/tmp").unwrap();
    driver.unmount("/ext").unwrap();

    assert_eq!(free_counts(&disk), before);
}

#[test]
fn rmdir_refuses_non_empty_directories() {
    let (driver, _disk) = mounted_rw(1024);
    driver.mkdir("/ext/d").unwrap();
    put_file(&driver, "/ext/d/f", b"x");

    let err = driver.rmdir("/ext/d").unwrap_err();
    assert_eq!(err.kind(), FsError::NotEmpty);

    driver.unlink("/ext/d/f").unwrap();
    driver.rmdir("/ext/d").unwrap();
    assert_eq!(driver.stat("/ext/d").unwrap_err().kind(), FsError::NotFound);
}

#[test]
fn unlink_restores_free_counts() {
    let (driver, disk) = mounted_rw(1024);
    driver.unmount("/ext").unwrap();
    let before = free_counts(&disk);

    driver
        .mount("/ext", disk.clone(), MountFlags::READ_WRITE)
        .unwrap();
    put_file(&driver, "/ext/data", &vec![7u8; 50 * 1024]);
    driver.unlink("/ext/data").unwrap();
    driver.unmount("/ext").unwrap();

    assert_eq!(free_counts(&disk), before);
}

#[test]
fn double_indirect_files_read_back_and_free_cleanly() {
    let (driver, disk) = mounted_rw(1024);
    driver.unmount("/ext").unwrap();
    let before = free_counts(&disk);
    driver
        .mount("/ext", disk.clone(), MountFlags::READ_WRITE)
        .unwrap();

    // 300 KiB at 1 KiB blocks reaches well into the double indirect tree.
    let data: Vec<u8> = (0..300 * 1024).map(|i| (i % 251) as u8).collect();
    put_file(&driver, "/ext/big", &data);
    assert_eq!(read_file(&driver, "/ext/big"), data);

    driver.unlink("/ext/big").unwrap();
    driver.unmount("/ext").unwrap();
    assert_eq!(free_counts(&disk), before);
}

#[test]
fn unlink_of_an_open_file_is_busy() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/x", b"abc");

    let h = driver.open("/ext/x", OpenFlags::empty(), perm(0)).unwrap();
    let err = driver.unlink("/ext/x").unwrap_err();
    assert_eq!(err.kind(), FsError::Busy);

    driver.close(h).unwrap();
    driver.unlink("/ext/x").unwrap();
}

#[test]
fn unmount_with_open_handles_is_busy() {
    let (driver, _disk) = mounted_rw(1024);
    let h = driver.open("/ext", OpenFlags::DIRECTORY, perm(0)).unwrap();
    assert_eq!(driver.unmount("/ext").unwrap_err().kind(), FsError::Busy);
    driver.close(h).unwrap();
    driver.unmount("/ext").unwrap();
}

#[test]
fn unlink_refuses_directories() {
    let (driver, _disk) = mounted_rw(1024);
    driver.mkdir("/ext/d").unwrap();
    let err = driver.unlink("/ext/d").unwrap_err();
    assert_eq!(err.kind(), FsError::NotPermitted);
    assert_eq!(err.errno(), EPERM);
}

#[test]
fn open_kind_checks() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/f", b"data");

    // A directory needs the directory flag.
    assert_eq!(
        driver.open("/ext", OpenFlags::empty(), perm(0)).unwrap_err().kind(),
        FsError::IsDir
    );
    // The directory flag needs a directory.
    assert_eq!(
        driver
            .open("/ext/f", OpenFlags::DIRECTORY, perm(0))
            .unwrap_err()
            .kind(),
        FsError::NotDir
    );
    // Directories never open for writing.
    assert_eq!(
        driver
            .open("/ext", OpenFlags::DIRECTORY | OpenFlags::RDWR, perm(0))
            .unwrap_err()
            .kind(),
        FsError::IsDir
    );
}

#[test]
fn open_excl_on_an_existing_file_fails() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/once", b"");
    let err = driver
        .open(
            "/ext/once",
            OpenFlags::CREAT | OpenFlags::EXCL | OpenFlags::RDWR,
            perm(0o644),
        )
        .unwrap_err();
    assert_eq!(err.kind(), FsError::Exists);
}

#[test]
fn open_trunc_discards_contents() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/t", b"old contents");
    let h = driver
        .open("/ext/t", OpenFlags::RDWR | OpenFlags::TRUNC, perm(0))
        .unwrap();
    assert_eq!(driver.total(h).unwrap(), 0);
    driver.close(h).unwrap();
}

#[test]
fn append_writes_land_at_the_end() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/log", b"one");
    let h = driver
        .open("/ext/log", OpenFlags::RDWR | OpenFlags::APPEND, perm(0))
        .unwrap();
    driver.write(h, b"two").unwrap();
    driver.close(h).unwrap();
    assert_eq!(read_file(&driver, "/ext/log"), b"onetwo");
}

#[test]
fn the_open_file_table_is_bounded() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/f", b"x");

    let handles: Vec<_> = (0..MAX_OPEN_FILES)
        .map(|_| driver.open("/ext/f", OpenFlags::empty(), perm(0)).unwrap())
        .collect();
    assert_eq!(
        driver.open("/ext/f", OpenFlags::empty(), perm(0)).unwrap_err().kind(),
        FsError::TooManyOpen
    );
    for h in handles {
        driver.close(h).unwrap();
    }
}

#[test]
fn seek_clamps_readers_and_rejects_negative_targets() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/s", b"thirteen byte");

    let h = driver.open("/ext/s", OpenFlags::empty(), perm(0)).unwrap();
    assert_eq!(driver.seek(h, SeekFrom::End(10)).unwrap(), 13);
    assert_eq!(driver.seek(h, SeekFrom::Start(5)).unwrap(), 5);
    assert_eq!(driver.tell(h).unwrap(), 5);
    let err = driver.seek(h, SeekFrom::Current(-10)).unwrap_err();
    assert_eq!(err.kind(), FsError::Invalid);
    assert_eq!(err.errno(), EINVAL);
    driver.close(h).unwrap();
}

#[test]
fn readdir_skips_deleted_entries() {
    let (driver, _disk) = mounted_rw(1024);
    for name in ["a", "b", "c"] {
        put_file(&driver, &format!("/ext/{}", name), b"");
    }
    driver.unlink("/ext/b").unwrap();
    assert_eq!(list_names(&driver, "/ext"), vec![".", "..", "a", "c"]);
}

#[test]
fn a_directory_grows_into_a_second_block() {
    let (driver, _disk) = mounted_rw(2048);
    driver.mkdir("/ext/many").unwrap();
    for i in 0..100 {
        put_file(&driver, &format!("/ext/many/f{:03}", i), b"");
    }

    let st = driver.stat("/ext/many").unwrap();
    assert_eq!(st.size, 2048, "directory should span two blocks");

    // Every entry resolves, including ones in the appended block.
    for i in 0..100 {
        driver.stat(&format!("/ext/many/f{:03}", i)).unwrap();
    }
    assert_eq!(list_names(&driver, "/ext/many").len(), 102);
}

#[test]
fn rename_moves_a_file_across_directories() {
    let (driver, _disk) = mounted_rw(1024);
    driver.mkdir("/ext/a").unwrap();
    driver.mkdir("/ext/b").unwrap();
    put_file(&driver, "/ext/a/f", b"payload");
    let ino = driver.stat("/ext/a/f").unwrap().ino;

    driver.rename("/ext/a/f", "/ext/b/g").unwrap();

    assert_eq!(driver.stat("/ext/a/f").unwrap_err().kind(), FsError::NotFound);
    let st = driver.stat("/ext/b/g").unwrap();
    assert_eq!(st.ino, ino);
    assert_eq!(read_file(&driver, "/ext/b/g"), b"payload");
}

#[test]
fn rename_of_a_directory_rewrites_dotdot() {
    let (driver, _disk) = mounted_rw(1024);
    driver.mkdir("/ext/a").unwrap();
    driver.mkdir("/ext/b").unwrap();
    driver.mkdir("/ext/a/d").unwrap();
    put_file(&driver, "/ext/a/d/inner", b"kept");

    driver.rename("/ext/a/d", "/ext/b/d").unwrap();

    // `..` now points at /ext/b, so parent-relative resolution works.
    assert_eq!(read_file(&driver, "/ext/b/d/inner"), b"kept");
    let b = driver.stat("/ext/b").unwrap();
    let via_dotdot = driver.stat("/ext/b/d/..").unwrap();
    assert_eq!(via_dotdot.ino, b.ino);

    // Link counts moved with it: /ext/a is back to two links.
    driver.rmdir("/ext/a").unwrap();
}

#[test]
fn rename_over_an_existing_file_replaces_it() {
    let (driver, disk) = mounted_rw(1024);
    driver.unmount("/ext").unwrap();
    let before = free_counts(&disk);
    driver
        .mount("/ext", disk.clone(), MountFlags::READ_WRITE)
        .unwrap();

    put_file(&driver, "/ext/src", b"new");
    put_file(&driver, "/ext/dst", b"old");
    driver.rename("/ext/src", "/ext/dst").unwrap();

    assert_eq!(read_file(&driver, "/ext/dst"), b"new");
    assert_eq!(driver.stat("/ext/src").unwrap_err().kind(), FsError::NotFound);

    driver.unlink("/ext/dst").unwrap();
    driver.unmount("/ext").unwrap();
    assert_eq!(free_counts(&disk), before, "the replaced inode leaked");
}

#[test]
fn rename_over_a_non_empty_directory_fails() {
    let (driver, _disk) = mounted_rw(1024);
    driver.mkdir("/ext/src").unwrap();
    driver.mkdir("/ext/dst").unwrap();
    put_file(&driver, "/ext/dst/occupant", b"");

    let err = driver.rename("/ext/src", "/ext/dst").unwrap_err();
    assert_eq!(err.kind(), FsError::NotEmpty);
}

#[test]
fn rename_kind_mismatches_fail() {
    let (driver, _disk) = mounted_rw(1024);
    driver.mkdir("/ext/d").unwrap();
    put_file(&driver, "/ext/f", b"");

    assert_eq!(
        driver.rename("/ext/f", "/ext/d").unwrap_err().kind(),
        FsError::IsDir
    );
    assert_eq!(
        driver.rename("/ext/d", "/ext/f").unwrap_err().kind(),
        FsError::NotDir
    );
}

#[test]
fn rename_of_the_root_is_invalid() {
    let (driver, _disk) = mounted_rw(1024);
    let err = driver.rename("/ext", "/ext/elsewhere").unwrap_err();
    assert_eq!(err.kind(), FsError::Invalid);
    assert_eq!(err.errno(), EINVAL);
}

#[test]
fn rename_there_and_back_is_a_noop() {
    let (driver, _disk) = mounted_rw(1024);
    driver.mkdir("/ext/a").unwrap();
    driver.mkdir("/ext/b").unwrap();
    put_file(&driver, "/ext/a/f", b"contents");
    let before = driver.stat("/ext/a/f").unwrap();

    driver.rename("/ext/a/f", "/ext/b/f").unwrap();
    driver.rename("/ext/b/f", "/ext/a/f").unwrap();

    let after = driver.stat("/ext/a/f").unwrap();
    assert_eq!(after.ino, before.ino);
    assert_eq!(after.size, before.size);
    assert_eq!(read_file(&driver, "/ext/a/f"), b"contents");
}

#[test]
fn mutating_calls_fail_on_a_read_only_mount() {
    let disk = formatted_disk(1024);
    let driver = Ext2Driver::new();
    driver
        .mount("/ext", disk.clone(), MountFlags::empty())
        .unwrap();

    assert_eq!(driver.mkdir("/ext/d").unwrap_err().kind(), FsError::ReadOnly);
    assert_eq!(
        driver
            .open("/ext/f", OpenFlags::CREAT | OpenFlags::RDWR, perm(0o644))
            .unwrap_err()
            .kind(),
        FsError::ReadOnly
    );
    assert_eq!(
        driver.rename("/ext/a", "/ext/b").unwrap_err().kind(),
        FsError::ReadOnly
    );
    assert_eq!(driver.unlink("/ext/x").unwrap_err().kind(), FsError::ReadOnly);
}

#[test]
fn a_write_less_device_cannot_mount_read_write() {
    let disk = formatted_disk(1024);
    let gelded = Arc::new(MemDisk {
        data: StdMutex::new(disk.data.lock().unwrap().clone()),
        writes: AtomicUsize::new(0),
        writable: false,
    });
    let driver = Ext2Driver::new();
    let err = driver
        .mount("/ext", gelded.clone(), MountFlags::READ_WRITE)
        .unwrap_err();
    assert_eq!(err.kind(), FsError::ReadOnly);

    // Read-only still works.
    driver.mount("/ext", gelded, MountFlags::empty()).unwrap();
    assert_eq!(list_names(&driver, "/ext"), vec![".", ".."]);
}

#[test]
fn mounting_garbage_is_not_ext2() {
    let disk = MemDisk::new(1024);
    let driver = Ext2Driver::new();
    let err = driver
        .mount("/ext", disk, MountFlags::empty())
        .unwrap_err();
    assert_eq!(err.kind(), FsError::NotExt2);
}

#[test]
fn mountpoints_are_exclusive_and_tracked() {
    let disk_a = formatted_disk(1024);
    let disk_b = formatted_disk(1024);
    let driver = Ext2Driver::new();
    driver
        .mount("/a", disk_a.clone(), MountFlags::READ_WRITE)
        .unwrap();
    assert_eq!(
        driver
            .mount("/a", disk_b.clone(), MountFlags::empty())
            .unwrap_err()
            .kind(),
        FsError::Exists
    );
    driver.mount("/a/b", disk_b, MountFlags::empty()).unwrap();

    // Longest prefix wins: /a/b/... resolves inside the second volume.
    put_file(&driver, "/a/hello", b"first");
    assert_eq!(list_names(&driver, "/a/b"), vec![".", ".."]);

    assert_eq!(driver.unmount("/c").unwrap_err().kind(), FsError::NotFound);
    driver.unmount("/a/b").unwrap();
    driver.unmount("/a").unwrap();
}

#[test]
fn fcntl_reports_flags_and_tolerates_setters() {
    let (driver, _disk) = mounted_rw(1024);
    put_file(&driver, "/ext/f", b"");
    let flags = OpenFlags::RDWR | OpenFlags::APPEND;
    let h = driver.open("/ext/f", flags, perm(0)).unwrap();

    assert_eq!(driver.fcntl(h, 3).unwrap() as u32, flags.bits()); // F_GETFL
    assert_eq!(driver.fcntl(h, 4).unwrap(), 0); // F_SETFL
    assert_eq!(driver.fcntl(h, 1).unwrap(), 0); // F_GETFD
    assert_eq!(driver.fcntl(h, 99).unwrap_err().kind(), FsError::Invalid);
    driver.close(h).unwrap();
}

#[test]
fn paths_with_odd_slashes_resolve() {
    let (driver, _disk) = mounted_rw(1024);
    driver.mkdir("/ext/a").unwrap();
    put_file(&driver, "/ext/a/f", b"x");

    assert!(driver.stat("/ext//a/").unwrap().kind.is_dir());
    assert_eq!(driver.stat("/ext/a//f").unwrap().size, 1);
}

#[test]
fn symlinks_resolve_and_loop_detection_trips() {
    let disk = formatted_disk(1024);
    let dev: Arc<dyn BlockDevice> = disk.clone();
    let fs = Ext2::open(dev, false).unwrap();
    let root = fs.root_inode().unwrap();

    let file = fs
        .alloc_inode(0, FileType::File, perm(0o644), 0, 0)
        .unwrap();
    file.set_hard_links(1);
    file.write_at(0, b"the target").unwrap();
    dir::add_entry(&root, "target", file.ino(), FileType::File).unwrap();

    let fast = fs
        .alloc_inode(0, FileType::Symlink, perm(0o777), 0, 0)
        .unwrap();
    fast.set_hard_links(1);
    fast.write_link("target").unwrap();
    dir::add_entry(&root, "fast", fast.ino(), FileType::Symlink).unwrap();

    // A target longer than the pointer area goes through data blocks.
    let deep_name = format!("{}/target", "/".repeat(70));
    let slow = fs
        .alloc_inode(0, FileType::Symlink, perm(0o777), 0, 0)
        .unwrap();
    slow.set_hard_links(1);
    slow.write_link(&deep_name).unwrap();
    assert!(slow.blocks_count() > 0, "long target should use a data block");
    dir::add_entry(&root, "slow", slow.ino(), FileType::Symlink).unwrap();

    assert_eq!(path::resolve(&fs, "/fast").unwrap().ino(), file.ino());
    assert_eq!(path::resolve(&fs, "/slow").unwrap().ino(), file.ino());

    // Two symlinks chasing each other exhaust the traversal depth.
    let ping = fs
        .alloc_inode(0, FileType::Symlink, perm(0o777), 0, 0)
        .unwrap();
    ping.set_hard_links(1);
    ping.write_link("pong").unwrap();
    dir::add_entry(&root, "ping", ping.ino(), FileType::Symlink).unwrap();
    let pong = fs
        .alloc_inode(0, FileType::Symlink, perm(0o777), 0, 0)
        .unwrap();
    pong.set_hard_links(1);
    pong.write_link("ping").unwrap();
    dir::add_entry(&root, "pong", pong.ino(), FileType::Symlink).unwrap();

    assert_eq!(
        path::resolve(&fs, "/ping").unwrap_err().kind(),
        FsError::TooManySymlinks
    );

    fs.sync_all().unwrap();
}

#[test]
fn the_block_map_reports_holes_and_mapped_blocks() {
    let disk = formatted_disk(1024);
    let dev: Arc<dyn BlockDevice> = disk.clone();
    let fs = Ext2::open(dev, false).unwrap();
    let root = fs.root_inode().unwrap();

    let file = fs
        .alloc_inode(0, FileType::File, perm(0o644), 0, 0)
        .unwrap();
    file.set_hard_links(1);
    dir::add_entry(&root, "holey", file.ino(), FileType::File).unwrap();

    // One byte in logical block 8; everything before stays a hole.
    file.write_at(8192, b"!").unwrap();
    for logical in 0..8 {
        assert_eq!(file.bid_at(logical).unwrap(), 0);
    }
    assert_ne!(file.bid_at(8).unwrap(), 0);
    assert_eq!(file.blocks_count(), 1);

    // Truncating to inside the hole frees the mapped block again.
    file.truncate(4096).unwrap();
    assert_eq!(file.bid_at(8).unwrap(), 0);
    assert_eq!(file.blocks_count(), 0);
    assert_eq!(file.size(), 4096);

    fs.sync_all().unwrap();
}

#[test]
fn sync_persists_without_unmounting() {
    let (driver, disk) = mounted_rw(1024);
    put_file(&driver, "/ext/durable", b"synced bytes");
    driver.sync().unwrap();

    // A read-only snapshot of the device already sees the file.
    let dev: Arc<dyn BlockDevice> = disk.clone();
    let fs = Ext2::open(dev, true).unwrap();
    let inode = path::resolve(&fs, "/durable").unwrap();
    let mut buf = vec![0u8; 12];
    inode.read_at(0, &mut buf).unwrap();
    assert_eq!(buf, b"synced bytes");
}

#[test]
fn shutdown_closes_handles_and_flushes() {
    let (driver, disk) = mounted_rw(1024);
    put_file(&driver, "/ext/f", b"bytes");
    let _still_open = driver.open("/ext/f", OpenFlags::empty(), perm(0)).unwrap();
    driver.shutdown().unwrap();

    let dev: Arc<dyn BlockDevice> = disk.clone();
    let fs = Ext2::open(dev, true).unwrap();
    assert_eq!(path::resolve(&fs, "/f").unwrap().size(), 5);
}

#[test]
fn lookups_of_one_inode_share_identity() {
    let disk = formatted_disk(1024);
    let dev: Arc<dyn BlockDevice> = disk.clone();
    let fs = Ext2::open(dev, true).unwrap();

    let a = fs.root_inode().unwrap();
    let b = fs.root_inode().unwrap();
    assert!(Arc::ptr_eq(&a, &b));
}

#[test]
fn directory_link_counts_follow_subdirectories() {
    let (driver, _disk) = mounted_rw(1024);

    // links(dir) = 2 + number of subdirectories, at every step.
    assert_eq!(driver.stat("/ext").unwrap().nlinks, 2);
    driver.mkdir("/ext/one").unwrap();
    driver.mkdir("/ext/two").unwrap();
    put_file(&driver, "/ext/file", b"");
    assert_eq!(driver.stat("/ext").unwrap().nlinks, 4);
    assert_eq!(driver.stat("/ext/one").unwrap().nlinks, 2);

    driver.mkdir("/ext/one/deeper").unwrap();
    assert_eq!(driver.stat("/ext/one").unwrap().nlinks, 3);

    driver.rmdir("/ext/one/deeper").unwrap();
    driver.rmdir("/ext/two").unwrap();
    assert_eq!(driver.stat("/ext").unwrap().nlinks, 3);
    assert_eq!(driver.stat("/ext/one").unwrap().nlinks, 2);

    // A file link count is one and unlinking drops the object.
    assert_eq!(driver.stat("/ext/file").unwrap().nlinks, 1);
}
