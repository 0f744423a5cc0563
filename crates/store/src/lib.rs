//! kinv store: the current inventory snapshot, swapped whole on every publish

#![forbid(unsafe_code)]

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use arc_swap::ArcSwap;
use kinv_core::Inventory;
use tracing::debug;

/// Holds exactly one current snapshot. Readers get an `Arc` that stays
/// self-consistent for as long as they hold it; publishing never mutates it.
pub struct SnapshotStore {
    snap: ArcSwap<Inventory>,
    epoch: AtomicU64,
}

impl Default for SnapshotStore {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotStore {
    pub fn new() -> Self {
        Self { snap: ArcSwap::from_pointee(Inventory::default()), epoch: AtomicU64::new(0) }
    }

    /// Replace the current snapshot and bump the epoch.
    pub fn publish(&self, next: impl Into<Arc<Inventory>>) {
        let next = next.into();
        let workloads = next.workloads.len();
        let succeeded = next.collection_succeeded;
        self.snap.store(next);
        let epoch = self.epoch.fetch_add(1, Ordering::AcqRel) + 1;
        metrics::counter!("snapshot_publish_total", 1u64);
        debug!(epoch, workloads, succeeded, "snapshot published");
    }

    pub fn current(&self) -> Arc<Inventory> {
        self.snap.load_full()
    }

    /// Number of publishes so far; 0 means readers still see the empty default.
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }
}
