//! Callbacks for consumers of decoded cycles and rebuilt plans
//!
//! Display layers implement these traits; every method except the per-cycle
//! one has a no-op default, so a listener only overrides what it needs.

use std::sync::{Arc, Mutex};

use crate::log::{CycleStats, LogOptions, Record, RecordKind};
use crate::rebuild::{CycleReport, ObjectManager, PlanState};

/// Receives the raw decoded stream
pub trait CycleListener {
    /// Header options, sent once before the first cycle
    fn options(&mut self, _options: &LogOptions) {}

    /// One record of a known kind, in stream order
    fn record(&mut self, _kind: RecordKind, _record: &Record) {}

    /// A complete cycle, `cycle_end` included
    fn cycle(&mut self, stats: &CycleStats, records: &[Record]);
}

/// Receives the rebuilt plan
pub trait PlanListener {
    /// A record was applied to `state`
    fn record(&mut self, _kind: RecordKind, _record: &Record, _state: &PlanState) {}

    /// A cycle was fully applied
    fn cycle_rebuilt(&mut self, report: &CycleReport, state: &PlanState, manager: &ObjectManager);
}

impl<L: CycleListener> CycleListener for Arc<Mutex<L>> {
    fn options(&mut self, options: &LogOptions) {
        let mut inner = self.lock().unwrap_or_else(|e| e.into_inner());
        inner.options(options);
    }

    fn record(&mut self, kind: RecordKind, record: &Record) {
        let mut inner = self.lock().unwrap_or_else(|e| e.into_inner());
        inner.record(kind, record);
    }

    fn cycle(&mut self, stats: &CycleStats, records: &[Record]) {
        let mut inner = self.lock().unwrap_or_else(|e| e.into_inner());
        inner.cycle(stats, records);
    }
}

impl<L: PlanListener> PlanListener for Arc<Mutex<L>> {
    fn record(&mut self, kind: RecordKind, record: &Record, state: &PlanState) {
        let mut inner = self.lock().unwrap_or_else(|e| e.into_inner());
        inner.record(kind, record, state);
    }

    fn cycle_rebuilt(&mut self, report: &CycleReport, state: &PlanState, manager: &ObjectManager) {
        let mut inner = self.lock().unwrap_or_else(|e| e.into_inner());
        inner.cycle_rebuilt(report, state, manager);
    }
}

/// Listener collecting everything it receives
#[derive(Debug, Default)]
pub struct CollectingListener {
    pub options: Option<LogOptions>,
    pub kinds: Vec<RecordKind>,
    pub cycles: Vec<Vec<Record>>,
}

impl CycleListener for CollectingListener {
    fn options(&mut self, options: &LogOptions) {
        self.options = Some(options.clone());
    }

    fn record(&mut self, kind: RecordKind, _record: &Record) {
        self.kinds.push(kind);
    }

    fn cycle(&mut self, _stats: &CycleStats, records: &[Record]) {
        self.cycles.push(records.to_vec());
    }
}
