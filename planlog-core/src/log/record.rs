//! Record and cycle types
//!
//! A record is one recorded call of the producer: a method name, a wall-clock
//! timestamp split in seconds and microseconds, and the call arguments. A
//! cycle is the ordered list of records closed by a `cycle_end` record whose
//! single argument is the cycle's [`CycleStats`].

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::{PlanlogError, Result};

/// Options map stored in the log header
pub type LogOptions = BTreeMap<String, Value>;

/// Method name closing every cycle
pub const CYCLE_END: &str = "cycle_end";

/// One recorded call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    /// Name of the recorded method
    pub method: String,

    /// Wall-clock seconds
    pub sec: u64,

    /// Microseconds within `sec`
    pub usec: u32,

    /// Call arguments
    #[serde(default)]
    pub args: Vec<Value>,
}

impl Record {
    /// Create a record with an explicit timestamp
    pub fn new(method: impl Into<String>, sec: u64, usec: u32, args: Vec<Value>) -> Self {
        Self {
            method: method.into(),
            sec,
            usec,
            args,
        }
    }

    /// Create a record stamped with the current wall-clock time
    pub fn now(method: impl Into<String>, args: Vec<Value>) -> Self {
        let now = chrono::Utc::now();
        Self::new(
            method,
            now.timestamp().max(0) as u64,
            now.timestamp_subsec_micros(),
            args,
        )
    }

    /// Build the `cycle_end` record carrying `stats`
    pub fn cycle_end(sec: u64, usec: u32, stats: &CycleStats) -> Result<Self> {
        Ok(Self::new(CYCLE_END, sec, usec, vec![serde_json::to_value(stats)?]))
    }

    /// Typed kind of this record, if it is one the rebuilder knows
    pub fn kind(&self) -> Option<RecordKind> {
        RecordKind::from_name(&self.method)
    }

    /// Whether this record closes a cycle
    pub fn is_cycle_end(&self) -> bool {
        self.method == CYCLE_END
    }

    /// Timestamp as fractional seconds
    pub fn time(&self) -> f64 {
        self.sec as f64 + f64::from(self.usec) / 1_000_000.0
    }

    /// Decode argument `index` into `T`
    pub fn arg<T: DeserializeOwned>(&self, index: usize) -> Result<T> {
        let value = self.args.get(index).ok_or_else(|| {
            PlanlogError::dispatch(
                &self.method,
                format!("missing argument {} (got {})", index, self.args.len()),
            )
        })?;
        T::deserialize(value).map_err(|e| {
            PlanlogError::dispatch(&self.method, format!("argument {}: {}", index, e))
        })
    }

    /// Stats carried by a `cycle_end` record
    pub fn stats(&self) -> Option<CycleStats> {
        if !self.is_cycle_end() {
            return None;
        }
        self.args
            .first()
            .and_then(|v| CycleStats::deserialize(v).ok())
    }
}

/// Record methods the plan rebuilder understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    DiscoveredTasks,
    DiscoveredEvents,
    AddedMission,
    RemovedMission,
    FinalizedTask,
    FinalizedEvent,
    AddedTaskChild,
    RemovedTaskChild,
    AddedEventChild,
    RemovedEventChild,
    GeneratorFired,
    GeneratorEmitFailed,
    GeneratorPropagateEvent,
    GeneratorPostponed,
    GeneratorUnreachable,
    TaskArgumentsUpdated,
    TaskFailedToStart,
    CycleEnd,
}

impl RecordKind {
    /// Every known kind, in declaration order
    pub const ALL: [RecordKind; 18] = [
        RecordKind::DiscoveredTasks,
        RecordKind::DiscoveredEvents,
        RecordKind::AddedMission,
        RecordKind::RemovedMission,
        RecordKind::FinalizedTask,
        RecordKind::FinalizedEvent,
        RecordKind::AddedTaskChild,
        RecordKind::RemovedTaskChild,
        RecordKind::AddedEventChild,
        RecordKind::RemovedEventChild,
        RecordKind::GeneratorFired,
        RecordKind::GeneratorEmitFailed,
        RecordKind::GeneratorPropagateEvent,
        RecordKind::GeneratorPostponed,
        RecordKind::GeneratorUnreachable,
        RecordKind::TaskArgumentsUpdated,
        RecordKind::TaskFailedToStart,
        RecordKind::CycleEnd,
    ];

    /// Method name as written in the log
    pub fn as_str(self) -> &'static str {
        match self {
            RecordKind::DiscoveredTasks => "discovered_tasks",
            RecordKind::DiscoveredEvents => "discovered_events",
            RecordKind::AddedMission => "added_mission",
            RecordKind::RemovedMission => "removed_mission",
            RecordKind::FinalizedTask => "finalized_task",
            RecordKind::FinalizedEvent => "finalized_event",
            RecordKind::AddedTaskChild => "added_task_child",
            RecordKind::RemovedTaskChild => "removed_task_child",
            RecordKind::AddedEventChild => "added_event_child",
            RecordKind::RemovedEventChild => "removed_event_child",
            RecordKind::GeneratorFired => "generator_fired",
            RecordKind::GeneratorEmitFailed => "generator_emit_failed",
            RecordKind::GeneratorPropagateEvent => "generator_propagate_event",
            RecordKind::GeneratorPostponed => "generator_postponed",
            RecordKind::GeneratorUnreachable => "generator_unreachable",
            RecordKind::TaskArgumentsUpdated => "task_arguments_updated",
            RecordKind::TaskFailedToStart => "task_failed_to_start",
            RecordKind::CycleEnd => CYCLE_END,
        }
    }

    /// Parse a method name; unknown names yield `None`
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|kind| kind.as_str() == name)
    }
}

impl fmt::Display for RecordKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Statistics closing a cycle, also used as index entry
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CycleStats {
    /// Cycle start, fractional seconds
    pub start: f64,

    /// Cycle end, fractional seconds
    #[serde(default)]
    pub end: f64,

    /// Offset of the cycle's first frame in the event file (index only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pos: Option<u64>,

    /// Number of records in the cycle, `cycle_end` included (index only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_count: Option<u64>,

    /// Producer state snapshot, if the producer records one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<Value>,

    /// Named durations and counters
    #[serde(flatten)]
    pub fields: BTreeMap<String, Value>,
}

impl CycleStats {
    /// Stats for a cycle spanning `start..end`
    pub fn new(start: f64, end: f64) -> Self {
        Self {
            start,
            end,
            ..Default::default()
        }
    }

    /// Add a named field
    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }

    /// Cycle duration in seconds
    pub fn duration(&self) -> f64 {
        (self.end - self.start).max(0.0)
    }

    /// Compare two stats ignoring the fields only the index stores
    pub fn same_cycle(&self, other: &CycleStats) -> bool {
        self.start == other.start
            && self.end == other.end
            && self.state == other.state
            && self.fields == other.fields
    }

    /// Copy of these stats stamped with index-only fields
    pub fn indexed(&self, pos: u64, event_count: u64) -> CycleStats {
        CycleStats {
            pos: Some(pos),
            event_count: Some(event_count),
            ..self.clone()
        }
    }
}

/// Stats of a cycle from its closing record, checking cycle shape
pub fn cycle_stats(records: &[Record]) -> Result<CycleStats> {
    let last = records
        .last()
        .ok_or_else(|| PlanlogError::InvalidFormat("empty cycle".to_string()))?;
    if !last.is_cycle_end() {
        return Err(PlanlogError::InvalidFormat(format!(
            "cycle does not end with {} (last record is '{}')",
            CYCLE_END, last.method
        )));
    }
    let ends = records.iter().filter(|r| r.is_cycle_end()).count();
    if ends != 1 {
        return Err(PlanlogError::InvalidFormat(format!(
            "cycle contains {} {} records",
            ends, CYCLE_END
        )));
    }
    last.stats().ok_or_else(|| {
        PlanlogError::InvalidFormat(format!("{} carries no stats mapping", CYCLE_END))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_kind_names_roundtrip() {
        for kind in RecordKind::ALL {
            assert_eq!(RecordKind::from_name(kind.as_str()), Some(kind));
            let serialized = serde_json::to_value(kind).unwrap();
            assert_eq!(serialized, json!(kind.as_str()));
        }
        assert_eq!(RecordKind::from_name("exception_notification"), None);
    }

    #[test]
    fn test_stats_preserve_unknown_fields() {
        let value = json!({"start": 10.0, "end": 10.5, "ruby_gc": 0.01, "pos": 42});
        let stats: CycleStats = serde_json::from_value(value).unwrap();
        assert_eq!(stats.pos, Some(42));
        assert_eq!(stats.fields.get("ruby_gc"), Some(&json!(0.01)));

        let back = serde_json::to_value(&stats).unwrap();
        assert_eq!(back["ruby_gc"], json!(0.01));
    }

    #[test]
    fn test_same_cycle_ignores_index_fields() {
        let stats = CycleStats::new(1.0, 2.0).with_field("expected_ruby_gc", 3);
        let indexed = stats.indexed(128, 7);
        assert!(stats.same_cycle(&indexed));
        assert_ne!(stats, indexed);
        assert!(!stats.same_cycle(&CycleStats::new(1.0, 2.5)));
    }

    #[test]
    fn test_cycle_stats_requires_single_trailing_cycle_end() {
        let end = Record::cycle_end(1, 0, &CycleStats::new(1.0, 1.1)).unwrap();
        let other = Record::new("discovered_tasks", 1, 0, vec![]);

        assert!(cycle_stats(&[other.clone(), end.clone()]).is_ok());
        assert!(cycle_stats(&[end.clone(), other.clone()]).is_err());
        assert!(cycle_stats(&[end.clone(), end.clone()]).is_err());
        assert!(cycle_stats(&[]).is_err());
    }

    #[test]
    fn test_missing_argument_is_dispatch_error() {
        let record = Record::new("added_mission", 0, 0, vec![json!(1)]);
        let err = record.arg::<u64>(1).unwrap_err();
        assert!(matches!(err, PlanlogError::RecordDispatch { .. }));
        assert_eq!(record.arg::<u64>(0).unwrap(), 1);
    }

    #[test]
    fn test_record_time() {
        let record = Record::new("x", 12, 500_000, vec![]);
        assert!((record.time() - 12.5).abs() < f64::EPSILON);
    }
}
