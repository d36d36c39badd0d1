//! Double-buffered state snapshot exchange with optimistic versioning.
//!
//! Single producer (the estimator), many consumers (controller, planner,
//! telemetry). The writer fills the inactive slot, seals it with an
//! even/odd sequence, then atomically swaps the active index and
//! publishes a strictly increasing user-visible version. Readers sample
//! the active slot and validate the slot sequence before and after the
//! copy; a torn read retries against the freshly published slot.
//!
//! `latest()` is O(1) and lock-free. `wait_for_new()` parks on a condvar
//! signalled by each publish, so consumers that want the next version do
//! not spin.

use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use dart_common::state::StateSnapshot;

/// Bounded retries for a torn read before re-sampling the active index.
const READ_RETRIES: usize = 8;

/// Read/write counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub struct BufferStats {
    updates: AtomicU64,
    reads: AtomicU64,
    stale_reads: AtomicU64,
}

/// Point-in-time copy of [`BufferStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct BufferStatsSnapshot {
    pub updates: u64,
    pub reads: u64,
    pub stale_reads: u64,
}

impl BufferStats {
    fn snapshot(&self) -> BufferStatsSnapshot {
        BufferStatsSnapshot {
            updates: self.updates.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            stale_reads: self.stale_reads.load(Ordering::Relaxed),
        }
    }
}

struct Slot<T> {
    /// Even = stable, odd = write in progress.
    seq: AtomicU64,
    data: UnsafeCell<Option<(T, f64, u64)>>,
}

struct Shared<T> {
    slots: [Slot<T>; 2],
    /// Index of the slot readers should sample.
    active: AtomicUsize,
    /// Last published user-visible version (0 = never written).
    version: AtomicU64,
    stats: BufferStats,
    source: &'static str,
    wait_lock: Mutex<()>,
    wait_cv: Condvar,
}

// The seqlock protocol guarantees readers never observe a half-written
// value as valid: the copy is discarded unless the slot sequence is
// stable and unchanged across it.
unsafe impl<T: Copy + Send> Send for Shared<T> {}
unsafe impl<T: Copy + Send> Sync for Shared<T> {}

/// Producer handle. Exactly one exists per buffer; multiple producers
/// require external serialization by construction.
pub struct StateWriter<T: Copy> {
    shared: Arc<Shared<T>>,
}

/// Consumer handle. Cheap to clone; all clones observe the same buffer.
pub struct StateReader<T: Copy> {
    shared: Arc<Shared<T>>,
}

impl<T: Copy> Clone for StateReader<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

/// Create a buffer, returning the single writer and a cloneable reader.
pub fn state_buffer<T: Copy + Send>(source: &'static str) -> (StateWriter<T>, StateReader<T>) {
    let shared = Arc::new(Shared {
        slots: [
            Slot {
                seq: AtomicU64::new(0),
                data: UnsafeCell::new(None),
            },
            Slot {
                seq: AtomicU64::new(0),
                data: UnsafeCell::new(None),
            },
        ],
        active: AtomicUsize::new(0),
        version: AtomicU64::new(0),
        stats: BufferStats::default(),
        source,
        wait_lock: Mutex::new(()),
        wait_cv: Condvar::new(),
    });
    (
        StateWriter {
            shared: Arc::clone(&shared),
        },
        StateReader { shared },
    )
}

impl<T: Copy + Send> StateWriter<T> {
    /// Publish a new snapshot. Returns the assigned version.
    ///
    /// Completes atomically with respect to readers: a reader either
    /// sees the previous snapshot or this one, never a mix.
    pub fn update(&mut self, state: T, timestamp: f64) -> u64 {
        let shared = &*self.shared;
        let version = shared.version.load(Ordering::Relaxed) + 1;
        let inactive = 1 - shared.active.load(Ordering::Relaxed);
        let slot = &shared.slots[inactive];

        // Begin write: odd sequence tells a late reader the slot is dirty.
        let seq = slot.seq.load(Ordering::Relaxed);
        slot.seq.store(seq + 1, Ordering::Release);
        unsafe {
            *slot.data.get() = Some((state, timestamp, version));
        }
        slot.seq.store(seq + 2, Ordering::Release);

        shared.active.store(inactive, Ordering::Release);
        shared.version.store(version, Ordering::Release);
        shared.stats.updates.fetch_add(1, Ordering::Relaxed);

        let _guard = shared.wait_lock.lock();
        shared.wait_cv.notify_all();
        version
    }

    /// Last published version (0 = never written).
    #[inline]
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }
}

impl<T: Copy + Send> StateReader<T> {
    /// Most recent complete snapshot, or `None` before the first write.
    ///
    /// Lock-free; never blocks the caller and never observes a torn
    /// value.
    pub fn latest(&self) -> Option<StateSnapshot<T>> {
        let shared = &*self.shared;
        if shared.version.load(Ordering::Acquire) == 0 {
            return None;
        }
        shared.stats.reads.fetch_add(1, Ordering::Relaxed);

        loop {
            let idx = shared.active.load(Ordering::Acquire);
            let slot = &shared.slots[idx];
            for _ in 0..READ_RETRIES {
                let v1 = slot.seq.load(Ordering::Acquire);
                if v1 % 2 == 1 {
                    std::hint::spin_loop();
                    continue;
                }
                let copied = unsafe { *slot.data.get() };
                let v2 = slot.seq.load(Ordering::Acquire);
                if v1 == v2 {
                    let (state, timestamp, version) = copied?;
                    return Some(StateSnapshot {
                        state,
                        timestamp,
                        version,
                        source: shared.source,
                    });
                }
            }
            // The writer lapped us: accept the newer value by
            // re-sampling the active index.
        }
    }

    /// Like [`latest`](Self::latest), but counts a stale read when the
    /// returned version does not exceed `last_version`.
    pub fn poll(&self, last_version: u64) -> Option<StateSnapshot<T>> {
        let snap = self.latest()?;
        if snap.version <= last_version {
            self.shared.stats.stale_reads.fetch_add(1, Ordering::Relaxed);
        }
        Some(snap)
    }

    /// Block until a version greater than `last_version` is published,
    /// or `timeout` elapses. Returns `None` on timeout.
    pub fn wait_for_new(&self, last_version: u64, timeout: Duration) -> Option<StateSnapshot<T>> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(snap) = self.latest() {
                if snap.version > last_version {
                    return Some(snap);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                self.shared.stats.stale_reads.fetch_add(1, Ordering::Relaxed);
                return None;
            }
            let mut guard = self.shared.wait_lock.lock();
            // Re-check under the lock so a publish between the check
            // and the wait cannot be missed.
            if self.shared.version.load(Ordering::Acquire) > last_version {
                continue;
            }
            self.shared
                .wait_cv
                .wait_until(&mut guard, deadline);
        }
    }

    /// Last published version (0 = never written).
    #[inline]
    pub fn version(&self) -> u64 {
        self.shared.version.load(Ordering::Acquire)
    }

    /// Counter snapshot.
    pub fn stats(&self) -> BufferStatsSnapshot {
        self.shared.stats.snapshot()
    }
}
