//! Point-in-time copies of the rebuilt plan

use super::object_manager::{ObjectManager, ProxyMapping};
use super::state::PlanState;
use crate::log::CycleStats;

/// Independent copy of a rebuilder's state at one cycle boundary
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    stats: Option<CycleStats>,
    processed: u64,
    state: PlanState,
    manager: ObjectManager,
}

impl Snapshot {
    /// Deep-copy `state` and `manager`
    pub(crate) fn capture(
        stats: Option<CycleStats>,
        processed: u64,
        state: &PlanState,
        manager: &ObjectManager,
    ) -> Self {
        let mut copy = ObjectManager::new();
        let mut mapping = ProxyMapping::new();
        manager.copy_to(&mut copy, &mut mapping);
        Self {
            stats,
            processed,
            state: state.remapped(&mapping),
            manager: copy,
        }
    }

    /// Stats of the cycle the snapshot was taken after
    pub fn stats(&self) -> Option<&CycleStats> {
        self.stats.as_ref()
    }

    /// Index of the cycle the snapshot was taken after
    pub fn cycle(&self) -> Option<u64> {
        self.processed.checked_sub(1)
    }

    /// Number of cycles processed when the snapshot was taken
    pub fn processed(&self) -> u64 {
        self.processed
    }

    pub fn state(&self) -> &PlanState {
        &self.state
    }

    pub fn manager(&self) -> &ObjectManager {
        &self.manager
    }
}
