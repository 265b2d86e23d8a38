#[cfg(feature = "serde")]
use serde_derive::{Deserialize, Serialize};
use std::sync::atomic::{AtomicIsize, AtomicUsize, Ordering::Relaxed};

/// Where an acquisition was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Source {
    Cache,
    Store,
    Fresh,
}

#[derive(Debug, Default)]
pub(crate) struct StatsBlock {
    acquires: AtomicUsize,
    releases: AtomicUsize,
    creates: AtomicUsize,
    cross_thread_ops: AtomicUsize,
    cross_thread_releases: AtomicUsize,
    same_thread_hits: AtomicUsize,
    in_use: AtomicIsize,
    batch_operations: AtomicUsize,
}

impl StatsBlock {
    pub(crate) fn acquired(&self, src: Source) {
        self.acquires.fetch_add(1, Relaxed);
        self.in_use.fetch_add(1, Relaxed);
        match src {
            Source::Cache => self.same_thread_hits.fetch_add(1, Relaxed),
            Source::Store => self.cross_thread_ops.fetch_add(1, Relaxed),
            Source::Fresh => self.creates.fetch_add(1, Relaxed),
        };
    }

    pub(crate) fn released(&self, n: usize, cross_thread: usize) {
        self.releases.fetch_add(n, Relaxed);
        self.in_use.fetch_sub(n as isize, Relaxed);
        if cross_thread > 0 {
            self.cross_thread_releases.fetch_add(cross_thread, Relaxed);
        }
    }

    /// an object handed out earlier was detached from the pool for good
    pub(crate) fn detached(&self) {
        self.in_use.fetch_sub(1, Relaxed);
    }

    pub(crate) fn batch(&self) {
        self.batch_operations.fetch_add(1, Relaxed);
    }

    pub(crate) fn snapshot(&self, current_pool_size: usize) -> PoolStats {
        PoolStats {
            acquires: self.acquires.load(Relaxed),
            releases: self.releases.load(Relaxed),
            creates: self.creates.load(Relaxed),
            cross_thread_ops: self.cross_thread_ops.load(Relaxed),
            cross_thread_releases: self.cross_thread_releases.load(Relaxed),
            same_thread_hits: self.same_thread_hits.load(Relaxed),
            in_use: self.in_use.load(Relaxed).max(0) as usize,
            current_pool_size,
            batch_operations: self.batch_operations.load(Relaxed),
        }
    }
}

/// A best effort snapshot of a pool's counters. The counters are updated
/// with relaxed atomics, so a snapshot taken while other threads are working
/// need not be consistent with itself. Every field is zero when the pool's
/// configuration disables statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct PoolStats {
    /// successful acquisitions
    pub acquires: usize,
    pub releases: usize,
    /// acquisitions that had to make a new object
    pub creates: usize,
    /// acquisitions served from the shared store
    pub cross_thread_ops: usize,
    /// releases on a thread other than the one that created the object
    pub cross_thread_releases: usize,
    /// acquisitions served from the calling thread's cache
    pub same_thread_hits: usize,
    /// objects currently handed out
    pub in_use: usize,
    /// idle objects in the shared store
    pub current_pool_size: usize,
    /// bulk returns to the store (cache flushes, batch releases)
    pub batch_operations: usize,
}
