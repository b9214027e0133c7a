// SPDX-License-Identifier: MPL-2.0

//! Shared helpers: the dirty-tracking wrapper, wall-clock time, alignment.

use core::fmt::Debug;
use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicU32, Ordering};

use log::warn;

/// Seconds since the Unix epoch, as ext2 stores timestamps.
pub type UnixTime = u32;

static WALL_CLOCK: AtomicU32 = AtomicU32::new(0);

/// Sets the wall-clock time used to stamp inodes.
///
/// The driver has no clock of its own; the embedder feeds it the current
/// Unix time (typically from an RTC) whenever timestamps matter. Until the
/// first call, objects are stamped with 0.
pub fn set_wall_time(secs: UnixTime) {
    WALL_CLOCK.store(secs, Ordering::Relaxed);
}

/// Returns the current time.
pub fn now() -> UnixTime {
    WALL_CLOCK.load(Ordering::Relaxed)
}

/// Rounds `len` up to the next multiple of four, the alignment of directory
/// records.
pub(crate) const fn align4(len: usize) -> usize {
    (len + 3) & !3
}

/// The `Dirty` wraps a value of type `T` with functions similar to that of
/// a rw-lock, but simply sets a dirty flag on `write()`.
pub(crate) struct Dirty<T: Debug> {
    value: T,
    dirty: bool,
}

impl<T: Debug> Dirty<T> {
    /// Creates a new Dirty without setting the dirty flag.
    pub fn new(val: T) -> Dirty<T> {
        Dirty {
            value: val,
            dirty: false,
        }
    }

    /// Creates a new Dirty with setting the dirty flag.
    pub fn new_dirty(val: T) -> Dirty<T> {
        Dirty {
            value: val,
            dirty: true,
        }
    }

    /// Returns true if dirty, false otherwise.
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Clears the dirty flag.
    pub fn clear_dirty(&mut self) {
        self.dirty = false;
    }
}

impl<T: Debug> Deref for Dirty<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

impl<T: Debug> DerefMut for Dirty<T> {
    /// Returns the mutable value, sets the dirty flag.
    fn deref_mut(&mut self) -> &mut T {
        self.dirty = true;
        &mut self.value
    }
}

impl<T: Debug> Drop for Dirty<T> {
    /// Guards if it is dirty when dropping.
    fn drop(&mut self) {
        if self.is_dirty() {
            warn!("[{:?}] is dirty then dropping", self.value);
        }
    }
}

impl<T: Debug> Debug for Dirty<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter) -> core::fmt::Result {
        let tag = if self.dirty { "Dirty" } else { "Clean" };
        write!(f, "[{}] {:?}", tag, self.value)
    }
}
