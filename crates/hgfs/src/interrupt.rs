//! Cancellation token standing in for signal delivery.
//!
//! A thread blocked in the pool or in the coordinator parks a wake callback
//! on the token while it sleeps. `raise()` marks the token pending and runs
//! every parked callback, each of which takes the sleeper's mutex before
//! notifying, so a raise that races with a thread about to sleep is never
//! lost: the sleeper either sees the pending flag on its recheck or is
//! already waiting when the notify lands.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use hgfs_utils::Mutex;

/// Callback run by [`Interrupt::raise`] to wake a parked sleeper.
pub(crate) type Waker = Box<dyn Fn() + Send + Sync>;

struct Inner {
    pending: AtomicBool,
    next_key: AtomicU64,
    parked: Mutex<Vec<(u64, Waker)>>,
}

/// Clonable interrupt token. Clones share the pending flag.
#[derive(Clone)]
pub struct Interrupt {
    inner: Arc<Inner>,
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}

impl core::fmt::Debug for Interrupt {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Interrupt")
            .field("raised", &self.is_raised())
            .finish_non_exhaustive()
    }
}

impl Interrupt {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                pending: AtomicBool::new(false),
                next_key: AtomicU64::new(0),
                parked: Mutex::new(Vec::new()),
            }),
        }
    }

    /// Mark the token pending and wake every thread sleeping on it.
    ///
    /// The token stays raised until [`clear`](Self::clear).
    pub fn raise(&self) {
        self.inner.pending.store(true, Ordering::SeqCst);
        // Run callbacks outside the spin lock: they take blocking mutexes.
        let parked = core::mem::take(&mut *self.inner.parked.lock());
        log::trace!("hgfs: interrupt raised, waking {} sleeper(s)", parked.len());
        for (_, wake) in &parked {
            wake();
        }
    }

    pub fn is_raised(&self) -> bool {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn clear(&self) {
        self.inner.pending.store(false, Ordering::SeqCst);
    }

    /// Register `wake` until the returned guard is dropped.
    ///
    /// Callers must recheck [`is_raised`](Self::is_raised) after parking and
    /// before sleeping.
    pub(crate) fn park(&self, wake: Waker) -> Parked<'_> {
        let key = self.inner.next_key.fetch_add(1, Ordering::Relaxed);
        self.inner.parked.lock().push((key, wake));
        Parked { token: self, key }
    }
}

/// Removes a parked callback when the sleeper wakes.
pub(crate) struct Parked<'a> {
    token: &'a Interrupt,
    key: u64,
}

impl Drop for Parked<'_> {
    fn drop(&mut self) {
        self.token
            .inner
            .parked
            .lock()
            .retain(|(key, _)| *key != self.key);
    }
}
