//! Cycle-by-cycle plan reconstruction

use serde_json::Value;
use std::collections::HashMap;

use super::object_manager::{ObjectManager, ProxyMapping};
use super::proxy::{ProxyId, ProxyKind, RemoteRef};
use super::snapshot::Snapshot;
use super::state::{Emission, EmissionFailure, PlanState, Postponement, Propagation, RelationGraph};
use crate::error::{PlanlogError, Result};
use crate::listener::PlanListener;
use crate::log::{CycleStats, Record, RecordKind};

/// What a handler changed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
    /// Persistent structure (tasks, relations, missions, finalization)
    Structural,
    /// A transient propagation log
    EventPropagation,
    /// Cycle stats or proxy attributes
    StateUpdated,
    None,
}

/// Result of one record handler
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    Applied(Effect),
    /// The record was skipped on purpose, e.g. it is about another plan
    Ignored(String),
}

/// Where the rebuilder is in the current cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    #[default]
    Idle,
    Processing,
    Interesting,
    NotInteresting,
}

/// Marks collected while processing a cycle
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleFlags {
    pub structural: bool,
    pub event_propagation: bool,
    pub state_updated: bool,
}

impl CycleFlags {
    /// Whether the cycle warrants a snapshot
    pub fn is_interesting(&self) -> bool {
        self.structural || self.event_propagation
    }

    fn mark(&mut self, effect: Effect) {
        match effect {
            Effect::Structural => self.structural = true,
            Effect::EventPropagation => self.event_propagation = true,
            Effect::StateUpdated => self.state_updated = true,
            Effect::None => {}
        }
    }
}

/// A record a handler skipped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IgnoredRecord {
    pub method: String,
    pub reason: String,
}

/// Summary of one processed cycle
#[derive(Debug, Clone, Default)]
pub struct CycleReport {
    /// Stats from the cycle's `cycle_end`
    pub stats: Option<CycleStats>,
    pub flags: CycleFlags,
    pub interesting: bool,
    /// Records handled, ignored or failed
    pub dispatched: usize,
    /// Records whose method has no handler
    pub skipped: usize,
    pub ignored: Vec<IgnoredRecord>,
    /// Handler failures, as logged
    pub errors: Vec<String>,
}

/// Record handler signature
pub type Handler = fn(&mut PlanRebuilder, &Record) -> Result<HandlerOutcome>;

/// Replays recorded calls against a local mirror of the plan
pub struct PlanRebuilder {
    state: PlanState,
    manager: ObjectManager,
    handlers: HashMap<RecordKind, Handler>,
    listeners: Vec<Box<dyn PlanListener + Send>>,
    phase: Phase,
    flags: CycleFlags,
    stats: Option<CycleStats>,
    processed: u64,
}

impl Default for PlanRebuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl PlanRebuilder {
    pub fn new() -> Self {
        Self {
            state: PlanState::new(),
            manager: ObjectManager::new(),
            handlers: default_handlers(),
            listeners: Vec::new(),
            phase: Phase::Idle,
            flags: CycleFlags::default(),
            stats: None,
            processed: 0,
        }
    }

    /// Register a listener called for every record and every cycle
    pub fn add_listener(&mut self, listener: Box<dyn PlanListener + Send>) {
        self.listeners.push(listener);
    }

    /// Replace the handler of `kind`
    pub fn set_handler(&mut self, kind: RecordKind, handler: Handler) {
        self.handlers.insert(kind, handler);
    }

    /// Record kinds that have a handler
    pub fn handled_kinds(&self) -> impl Iterator<Item = RecordKind> + '_ {
        self.handlers.keys().copied()
    }

    /// Apply one cycle
    ///
    /// Transient logs left by the previous cycle are cleared first. A handler
    /// failure is logged and dispatch continues with the next record.
    pub fn process(&mut self, records: &[Record]) -> CycleReport {
        self.clear_integrated();
        self.phase = Phase::Processing;
        self.flags = CycleFlags::default();

        let mut report = CycleReport::default();
        for record in records {
            let Some(kind) = record.kind() else {
                report.skipped += 1;
                continue;
            };
            let Some(handler) = self.handlers.get(&kind).copied() else {
                report.skipped += 1;
                continue;
            };

            report.dispatched += 1;
            match handler(self, record) {
                Ok(HandlerOutcome::Applied(effect)) => {
                    self.flags.mark(effect);
                    for listener in &mut self.listeners {
                        listener.record(kind, record, &self.state);
                    }
                }
                Ok(HandlerOutcome::Ignored(reason)) => {
                    tracing::trace!(method = %record.method, %reason, "Ignored record");
                    report.ignored.push(IgnoredRecord {
                        method: record.method.clone(),
                        reason,
                    });
                }
                Err(PlanlogError::InvalidReference(reason)) => {
                    tracing::debug!(method = %record.method, %reason, "Ignored record");
                    report.ignored.push(IgnoredRecord {
                        method: record.method.clone(),
                        reason,
                    });
                }
                Err(e) => {
                    tracing::warn!(
                        method = %record.method,
                        args = ?record.args,
                        error = %e,
                        "Failed to dispatch record"
                    );
                    report.errors.push(e.to_string());
                }
            }
        }

        self.processed += 1;
        self.phase = if self.flags.is_interesting() {
            Phase::Interesting
        } else {
            Phase::NotInteresting
        };
        report.stats = self.stats.clone();
        report.flags = self.flags;
        report.interesting = self.flags.is_interesting();

        for listener in &mut self.listeners {
            listener.cycle_rebuilt(&report, &self.state, &self.manager);
        }
        report
    }

    /// Whether the last processed cycle changed structure or propagated events
    pub fn has_interesting_events(&self) -> bool {
        self.phase == Phase::Interesting
    }

    /// Empty the transient logs and drop finalized proxies
    pub fn clear_integrated(&mut self) {
        self.state.clear_integrated();
        self.manager.collect_garbage();
        self.phase = Phase::Idle;
    }

    /// Copy of the current state
    pub fn snapshot(&self) -> Snapshot {
        Snapshot::capture(self.stats.clone(), self.processed, &self.state, &self.manager)
    }

    /// Restore the state captured in `snapshot`
    pub fn apply_snapshot(&mut self, snapshot: &Snapshot) {
        self.manager.clear();
        let mut mapping = ProxyMapping::new();
        snapshot.manager().copy_to(&mut self.manager, &mut mapping);
        self.state = snapshot.state().remapped(&mapping);
        self.stats = snapshot.stats().cloned();
        self.processed = snapshot.processed();
        self.flags = CycleFlags::default();
        self.phase = Phase::Idle;
    }

    /// Forget everything processed so far
    pub fn reset(&mut self) {
        self.state.clear();
        self.manager.clear();
        self.stats = None;
        self.processed = 0;
        self.flags = CycleFlags::default();
        self.phase = Phase::Idle;
    }

    pub fn state(&self) -> &PlanState {
        &self.state
    }

    pub fn manager(&self) -> &ObjectManager {
        &self.manager
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Stats of the last `cycle_end`
    pub fn stats(&self) -> Option<&CycleStats> {
        self.stats.as_ref()
    }

    /// Number of cycles processed
    pub fn processed(&self) -> u64 {
        self.processed
    }

    fn resolve(&mut self, record: &Record, index: usize) -> Result<ProxyId> {
        let remote: RemoteRef = record.arg(index)?;
        self.manager.local_object(&remote)
    }

    fn resolve_all(&mut self, record: &Record, index: usize) -> Result<Vec<ProxyId>> {
        let remotes: Vec<RemoteRef> = record.arg(index)?;
        remotes
            .iter()
            .map(|remote| self.manager.local_object(remote))
            .collect()
    }

    /// Resolve the plan argument, `None` if it is not the plan being mirrored
    fn main_plan(&mut self, record: &Record) -> Result<Option<ProxyId>> {
        let plan = self.resolve(record, 0)?;
        if self.manager.kind(plan) != Some(ProxyKind::Plan) {
            return Ok(None);
        }
        match self.state.plan {
            None => {
                self.state.plan = Some(plan);
                Ok(Some(plan))
            }
            Some(main) if main == plan => Ok(Some(plan)),
            Some(_) => Ok(None),
        }
    }
}

fn default_handlers() -> HashMap<RecordKind, Handler> {
    let mut handlers: HashMap<RecordKind, Handler> = HashMap::new();
    handlers.insert(RecordKind::DiscoveredTasks, discovered_tasks);
    handlers.insert(RecordKind::DiscoveredEvents, discovered_events);
    handlers.insert(RecordKind::AddedMission, added_mission);
    handlers.insert(RecordKind::RemovedMission, removed_mission);
    handlers.insert(RecordKind::FinalizedTask, finalized_task);
    handlers.insert(RecordKind::FinalizedEvent, finalized_event);
    handlers.insert(RecordKind::AddedTaskChild, added_task_child);
    handlers.insert(RecordKind::RemovedTaskChild, removed_task_child);
    handlers.insert(RecordKind::AddedEventChild, added_event_child);
    handlers.insert(RecordKind::RemovedEventChild, removed_event_child);
    handlers.insert(RecordKind::GeneratorFired, generator_fired);
    handlers.insert(RecordKind::GeneratorEmitFailed, generator_emit_failed);
    handlers.insert(RecordKind::GeneratorPropagateEvent, generator_propagate_event);
    handlers.insert(RecordKind::GeneratorPostponed, generator_postponed);
    handlers.insert(RecordKind::GeneratorUnreachable, generator_unreachable);
    handlers.insert(RecordKind::TaskArgumentsUpdated, task_arguments_updated);
    handlers.insert(RecordKind::TaskFailedToStart, task_failed_to_start);
    handlers.insert(RecordKind::CycleEnd, cycle_end);
    handlers
}

fn other_plan() -> HandlerOutcome {
    HandlerOutcome::Ignored("not the mirrored plan".to_string())
}

fn discovered_tasks(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    if r.main_plan(record)?.is_none() {
        return Ok(other_plan());
    }
    for task in r.resolve_all(record, 1)? {
        r.state.known_tasks.insert(task);
    }
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn discovered_events(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    if r.main_plan(record)?.is_none() {
        return Ok(other_plan());
    }
    for event in r.resolve_all(record, 1)? {
        r.state.free_events.insert(event);
    }
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn added_mission(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    if r.main_plan(record)?.is_none() {
        return Ok(other_plan());
    }
    let task = r.resolve(record, 1)?;
    r.state.known_tasks.insert(task);
    r.state.missions.insert(task);
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn removed_mission(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    if r.main_plan(record)?.is_none() {
        return Ok(other_plan());
    }
    let task = r.resolve(record, 1)?;
    r.state.missions.remove(&task);
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn finalized_task(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    if r.main_plan(record)?.is_none() {
        return Ok(other_plan());
    }
    let remote: RemoteRef = record.arg(1)?;
    let task = r.manager.local_object(&remote)?;

    let mut gone = vec![task];
    if let Some(proxy) = r.manager.get(task) {
        gone.extend(proxy.events.values().copied());
    }
    r.state.known_tasks.remove(&task);
    r.state.missions.remove(&task);
    r.state.remove_relations_involving(&gone);
    r.state.finalized_tasks.insert(task);
    r.manager.remove(&remote);
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn finalized_event(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    if r.main_plan(record)?.is_none() {
        return Ok(other_plan());
    }
    let remote: RemoteRef = record.arg(1)?;
    let event = r.manager.local_object(&remote)?;

    r.state.free_events.remove(&event);
    r.state.remove_relations_involving(&[event]);
    r.state.finalized_events.insert(event);
    r.manager.remove(&remote);
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn added_task_child(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    added_child(r, record, RelationGraph::Task)
}

fn removed_task_child(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    removed_child(r, record, RelationGraph::Task)
}

fn added_event_child(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    added_child(r, record, RelationGraph::Event)
}

fn removed_event_child(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    removed_child(r, record, RelationGraph::Event)
}

fn added_child(
    r: &mut PlanRebuilder,
    record: &Record,
    graph: RelationGraph,
) -> Result<HandlerOutcome> {
    let parent = r.resolve(record, 0)?;
    let relation: String = record.arg(1)?;
    let child = r.resolve(record, 2)?;
    let info = record.args.get(3).cloned().unwrap_or(Value::Null);
    r.state.add_relation(graph, parent, child, relation, info);
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn removed_child(
    r: &mut PlanRebuilder,
    record: &Record,
    graph: RelationGraph,
) -> Result<HandlerOutcome> {
    let parent = r.resolve(record, 0)?;
    let relation: String = record.arg(1)?;
    let child = r.resolve(record, 2)?;
    if !r.state.remove_relation(graph, parent, child, relation.as_str()) {
        return Ok(HandlerOutcome::Ignored(format!(
            "no {} relation from {} to {}",
            relation, parent, child
        )));
    }
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn generator_fired(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    let event = r.resolve(record, 0)?;
    r.state.emitted_events.push(Emission {
        event,
        id: record.arg(1)?,
        time: record.arg(2)?,
        context: record.args.get(3).cloned().unwrap_or(Value::Null),
    });
    Ok(HandlerOutcome::Applied(Effect::EventPropagation))
}

fn generator_emit_failed(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    let event = r.resolve(record, 0)?;
    r.state.failed_emissions.push(EmissionFailure {
        event,
        error: record.arg(1)?,
    });
    Ok(HandlerOutcome::Applied(Effect::EventPropagation))
}

fn generator_propagate_event(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    let forwarding: bool = record.arg(0)?;
    let sources = r.resolve_all(record, 1)?;
    let target = r.resolve(record, 2)?;
    r.state.propagated_events.push(Propagation {
        forwarding,
        sources,
        target,
    });
    Ok(HandlerOutcome::Applied(Effect::EventPropagation))
}

fn generator_postponed(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    let event = r.resolve(record, 0)?;
    let until: Option<RemoteRef> = record.arg(2)?;
    let until = match until {
        Some(remote) => Some(r.manager.local_object(&remote)?),
        None => None,
    };
    r.state.postponed_events.push(Postponement {
        event,
        context: record.arg(1)?,
        until,
        reason: record.args.get(3).cloned().unwrap_or(Value::Null),
    });
    Ok(HandlerOutcome::Applied(Effect::EventPropagation))
}

fn generator_unreachable(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    let event = r.resolve(record, 0)?;
    let reason = record.args.get(1).cloned().unwrap_or(Value::Null);
    if let Some(proxy) = r.manager.get_mut(event) {
        proxy.unreachable = Some(reason);
    }
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn task_arguments_updated(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    let task = r.resolve(record, 0)?;
    let key: String = record.arg(1)?;
    let value: Value = record.arg(2)?;
    if let Some(proxy) = r.manager.get_mut(task) {
        proxy.arguments.insert(key, value);
    }
    Ok(HandlerOutcome::Applied(Effect::StateUpdated))
}

fn task_failed_to_start(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    let task = r.resolve(record, 0)?;
    let reason = record.args.get(1).cloned().unwrap_or(Value::Null);
    if let Some(proxy) = r.manager.get_mut(task) {
        proxy.failed_to_start = Some(reason);
    }
    Ok(HandlerOutcome::Applied(Effect::Structural))
}

fn cycle_end(r: &mut PlanRebuilder, record: &Record) -> Result<HandlerOutcome> {
    let stats: CycleStats = record.arg(0)?;
    tracing::trace!(start = stats.start, end = stats.end, "Cycle end");
    r.stats = Some(stats);
    Ok(HandlerOutcome::Applied(Effect::StateUpdated))
}
