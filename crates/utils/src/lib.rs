#![cfg_attr(not(feature = "std"), no_std)]

pub mod hex;

// Spin locks are the lock API for short critical sections (packet buffers,
// handle cells). Anything that sleeps uses a blocking primitive instead.
pub use spin::{Lazy, Once};
pub use spin::{Mutex, MutexGuard};
pub use spin::{RwLock, RwLockReadGuard, RwLockWriteGuard};

pub use hashbrown::{HashMap, HashSet};

/// A value that may be assigned once, read while set, and cleared again.
///
/// Assigning while a value is present is rejected and hands the new value
/// back, so callers never silently overwrite state the host gave them.
pub struct SetOnce<T: Copy> {
    slot: Mutex<Option<T>>,
}

impl<T: Copy> Default for SetOnce<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Copy> SetOnce<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Store `value` if the cell is empty; otherwise return it as the error.
    pub fn set(&self, value: T) -> Result<(), T> {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return Err(value);
        }
        *slot = Some(value);
        Ok(())
    }

    pub fn get(&self) -> Option<T> {
        *self.slot.lock()
    }

    /// Empty the cell, returning what it held.
    pub fn clear(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_set(&self) -> bool {
        self.slot.lock().is_some()
    }
}

impl<T: Copy + core::fmt::Debug> core::fmt::Debug for SetOnce<T> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_tuple("SetOnce").field(&self.get()).finish()
    }
}

// ============================================================================
// Unit Tests
// ============================================================================
