//! Snapshot history

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::rebuild::Snapshot;

/// Snapshots of interesting cycles, keyed by cycle index
#[derive(Debug, Clone, Default)]
pub struct History {
    snapshots: BTreeMap<u64, Arc<Snapshot>>,
    capacity: Option<usize>,
}

impl History {
    /// Unbounded history
    pub fn new() -> Self {
        Self::default()
    }

    /// History keeping at most `capacity` snapshots
    pub fn with_capacity(capacity: Option<usize>) -> Self {
        Self {
            snapshots: BTreeMap::new(),
            capacity,
        }
    }

    /// Store the snapshot taken after `cycle`, evicting the oldest if full
    pub fn insert(&mut self, cycle: u64, snapshot: Snapshot) -> Arc<Snapshot> {
        let snapshot = Arc::new(snapshot);
        self.snapshots.insert(cycle, snapshot.clone());
        if let Some(capacity) = self.capacity {
            while self.snapshots.len() > capacity {
                if let Some((evicted, _)) = self.snapshots.pop_first() {
                    tracing::trace!(cycle = evicted, "Evicted snapshot");
                }
            }
        }
        snapshot
    }

    pub fn get(&self, cycle: u64) -> Option<Arc<Snapshot>> {
        self.snapshots.get(&cycle).cloned()
    }

    /// Latest snapshot taken at or before `cycle`
    pub fn snapshot_at_or_before(&self, cycle: u64) -> Option<(u64, Arc<Snapshot>)> {
        self.snapshots
            .range(..=cycle)
            .next_back()
            .map(|(n, snapshot)| (*n, snapshot.clone()))
    }

    /// Cycle indices with a snapshot, in order
    pub fn cycles(&self) -> impl Iterator<Item = u64> + '_ {
        self.snapshots.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    pub fn clear(&mut self) {
        self.snapshots.clear();
    }
}
