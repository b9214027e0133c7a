// SPDX-License-Identifier: MPL-2.0

//! The abstract block device the driver runs on, plus the byte-granular
//! adapter the volume engine uses for structures that do not fall on
//! filesystem-block boundaries (the superblock at byte 1024, the group
//! descriptor table).

use crate::prelude::*;

/// A synchronous device of fixed-size blocks.
///
/// A device that leaves [`BlockDevice::write_blocks`] unimplemented is
/// mountable only read-only.
pub trait BlockDevice: Send + Sync {
    /// Size in bytes of one device block (LBA). Must be a power of two.
    fn block_size(&self) -> usize;

    /// Total number of device blocks.
    fn block_count(&self) -> u64;

    /// Reads `buf.len() / block_size()` blocks starting at `start_lba`.
    ///
    /// `buf.len()` must be a multiple of the device block size.
    fn read_blocks(&self, start_lba: u64, buf: &mut [u8]) -> Result<()>;

    /// Writes `buf.len() / block_size()` blocks starting at `start_lba`.
    fn write_blocks(&self, start_lba: u64, buf: &[u8]) -> Result<()> {
        let _ = (start_lba, buf);
        Err(Error::with_message(
            FsError::ReadOnly,
            "device does not support writing",
        ))
    }

    /// Whether [`BlockDevice::write_blocks`] is actually backed by the
    /// device.
    fn supports_write(&self) -> bool {
        false
    }
}

/// Reads `buf.len()` bytes starting at absolute byte `offset`, bouncing
/// through a device-block-aligned buffer for unaligned edges.
pub(crate) fn read_bytes(device: &dyn BlockDevice, offset: u64, buf: &mut [u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let lba_size = device.block_size() as u64;
    if offset % lba_size == 0 && buf.len() as u64 % lba_size == 0 {
        return device.read_blocks(offset / lba_size, buf);
    }
    let start_lba = offset / lba_size;
    let end_lba = (offset + buf.len() as u64).div_ceil(lba_size);
    let mut bounce = vec![0u8; ((end_lba - start_lba) * lba_size) as usize];
    device.read_blocks(start_lba, &mut bounce)?;
    let skip = (offset - start_lba * lba_size) as usize;
    buf.copy_from_slice(&bounce[skip..skip + buf.len()]);
    Ok(())
}

/// Writes `buf.len()` bytes at absolute byte `offset`, read-modify-writing
/// the covering device blocks when the edges are unaligned.
pub(crate) fn write_bytes(device: &dyn BlockDevice, offset: u64, buf: &[u8]) -> Result<()> {
    if buf.is_empty() {
        return Ok(());
    }
    let lba_size = device.block_size() as u64;
    let start_lba = offset / lba_size;
    let end_lba = (offset + buf.len() as u64).div_ceil(lba_size);
    let skip = (offset - start_lba * lba_size) as usize;
    let span = ((end_lba - start_lba) * lba_size) as usize;

    if skip == 0 && buf.len() == span {
        return device.write_blocks(start_lba, buf);
    }

    let mut bounce = vec![0u8; span];
    device.read_blocks(start_lba, &mut bounce)?;
    bounce[skip..skip + buf.len()].copy_from_slice(buf);
    device.write_blocks(start_lba, &bounce)
}
