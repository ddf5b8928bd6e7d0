//! Plan rebuilder tests

use super::*;
use crate::listener::PlanListener;
use crate::log::{CycleStats, Record, RecordKind};
use serde_json::{Value, json};
use std::sync::{Arc, Mutex};

fn s(id: u64) -> SiblingId {
    SiblingId::new(0, id)
}

fn plan() -> Value {
    RemoteRef::plan(s(1)).to_value()
}

fn task(id: u64) -> Value {
    RemoteRef::task(s(id), format!("Task{}", id)).to_value()
}

fn bare(id: u64) -> Value {
    RemoteRef::bare([s(id)]).to_value()
}

fn generator(id: u64) -> Value {
    RemoteRef::generator(s(id)).to_value()
}

fn rec(method: &str, args: Vec<Value>) -> Record {
    Record::new(method, 100, 0, args)
}

fn end(t: f64) -> Record {
    Record::cycle_end(100, 0, &CycleStats::new(t, t + 0.01)).unwrap()
}

fn cycle(mut records: Vec<Record>, t: f64) -> Vec<Record> {
    records.push(end(t));
    records
}

#[test]
fn test_identity_is_stable_across_cycles() {
    let mut rebuilder = PlanRebuilder::new();
    rebuilder.process(&cycle(
        vec![rec("discovered_tasks", vec![plan(), json!([task(2)])])],
        1.0,
    ));
    let first = rebuilder.manager().find(&RemoteRef::bare([s(2)])).unwrap();

    rebuilder.process(&cycle(
        vec![rec("added_mission", vec![bare(1), bare(2)])],
        2.0,
    ));
    assert!(rebuilder.state().missions.contains(&first));

    // Re-announced under an additional identity
    let alias = RemoteRef::task(s(2), "Task2").with_sibling(SiblingId::new(3, 77));
    rebuilder.process(&cycle(
        vec![rec("task_arguments_updated", vec![alias.to_value(), json!("speed"), json!(2)])],
        3.0,
    ));
    let manager = rebuilder.manager();
    assert_eq!(manager.find(&RemoteRef::bare([SiblingId::new(3, 77)])), Some(first));
    assert_eq!(manager.get(first).unwrap().arguments["speed"], json!(2));
    assert_eq!(manager.len(), 2);
}

#[test]
fn test_unknown_incremental_reference_is_ignored() {
    let mut rebuilder = PlanRebuilder::new();
    let report = rebuilder.process(&cycle(
        vec![
            rec("added_mission", vec![plan(), bare(40)]),
            rec("added_mission", vec![plan(), task(2)]),
        ],
        1.0,
    ));
    assert_eq!(report.ignored.len(), 1);
    assert_eq!(report.ignored[0].method, "added_mission");
    assert!(report.errors.is_empty());
    assert_eq!(rebuilder.state().missions.len(), 1);
}

#[test]
fn test_records_about_other_plans_are_ignored() {
    let mut rebuilder = PlanRebuilder::new();
    rebuilder.process(&cycle(vec![rec("added_mission", vec![plan(), task(2)])], 1.0));

    let other = RemoteRef::plan(s(50)).to_value();
    let transaction = RemoteRef::new(ProxyKind::TransactionProxy, s(51)).to_value();
    let report = rebuilder.process(&cycle(
        vec![
            rec("added_mission", vec![other, task(3)]),
            rec("discovered_tasks", vec![transaction, json!([task(4)])]),
        ],
        2.0,
    ));
    assert_eq!(report.ignored.len(), 2);
    assert_eq!(rebuilder.state().missions.len(), 1);
    assert_eq!(rebuilder.state().known_tasks.len(), 1);
    assert!(!report.interesting);
}

#[test]
fn test_failing_record_does_not_abort_cycle() {
    let mut rebuilder = PlanRebuilder::new();
    let report = rebuilder.process(&cycle(
        vec![
            rec("added_mission", vec![plan()]),
            rec("generator_fired", vec![json!("not a reference")]),
            rec("added_mission", vec![plan(), task(2)]),
            rec("exception_notification", vec![json!(1)]),
        ],
        1.0,
    ));

    assert_eq!(report.errors.len(), 2);
    assert_eq!(report.skipped, 1);
    assert_eq!(report.dispatched, 4);
    assert_eq!(rebuilder.state().missions.len(), 1);
    assert_eq!(report.stats.unwrap().start, 1.0);
}

#[test]
fn test_cycle_flags() {
    let mut rebuilder = PlanRebuilder::new();
    assert_eq!(rebuilder.phase(), Phase::Idle);

    let report = rebuilder.process(&cycle(vec![], 1.0));
    assert!(report.flags.state_updated);
    assert!(!report.interesting);
    assert_eq!(rebuilder.phase(), Phase::NotInteresting);
    assert!(!rebuilder.has_interesting_events());

    let report = rebuilder.process(&cycle(
        vec![rec("generator_fired", vec![generator(9), json!(1), json!(1.5), json!([])])],
        2.0,
    ));
    assert!(report.flags.event_propagation);
    assert!(!report.flags.structural);
    assert!(report.interesting);
    assert!(rebuilder.has_interesting_events());
    assert_eq!(rebuilder.state().emitted_events.len(), 1);

    let report = rebuilder.process(&cycle(
        vec![rec("added_task_child", vec![task(2), json!("Dependency"), task(3), json!({})])],
        3.0,
    ));
    assert!(report.flags.structural);
    assert!(rebuilder.state().emitted_events.is_empty());

    rebuilder.clear_integrated();
    assert_eq!(rebuilder.phase(), Phase::Idle);
    assert_eq!(rebuilder.processed(), 3);
}

#[test]
fn test_event_propagation_logs() {
    let mut rebuilder = PlanRebuilder::new();
    rebuilder.process(&cycle(
        vec![
            rec("generator_propagate_event", vec![json!(false), json!([generator(1)]), generator(2)]),
            rec("generator_postponed", vec![generator(2), json!([]), generator(3), json!("waiting")]),
            rec("generator_emit_failed", vec![generator(4), json!("boom")]),
            rec("generator_unreachable", vec![generator(5), json!("finalized")]),
        ],
        1.0,
    ));
    let state = rebuilder.state();
    let manager = rebuilder.manager();
    let id = |n| manager.find(&RemoteRef::bare([s(n)])).unwrap();

    assert_eq!(state.propagated_events[0].sources, vec![id(1)]);
    assert_eq!(state.propagated_events[0].target, id(2));
    assert!(!state.propagated_events[0].forwarding);
    assert_eq!(state.postponed_events[0].until, Some(id(3)));
    assert_eq!(state.postponed_events[0].reason, json!("waiting"));
    assert_eq!(state.failed_emissions[0].error, json!("boom"));
    assert_eq!(manager.get(id(5)).unwrap().unreachable, Some(json!("finalized")));
}

#[test]
fn test_task_bound_events() {
    let mut rebuilder = PlanRebuilder::new();
    let start = RemoteRef::bound_event(RemoteRef::task(s(2), "Task2"), "start");
    rebuilder.process(&cycle(
        vec![rec("generator_fired", vec![start.to_value(), json!(1), json!(0.1), json!([])])],
        1.0,
    ));

    let again = RemoteRef {
        task: Some(Box::new(RemoteRef::bare([s(2)]))),
        symbol: Some("start".into()),
        ..Default::default()
    };
    rebuilder.process(&cycle(
        vec![rec("generator_fired", vec![again.to_value(), json!(2), json!(0.2), json!([])])],
        2.0,
    ));

    let manager = rebuilder.manager();
    let task = manager.find(&RemoteRef::bare([s(2)])).unwrap();
    let event = manager.get(task).unwrap().events["start"];
    assert_eq!(rebuilder.state().emitted_events[0].event, event);
    assert_eq!(manager.get(event).unwrap().task, Some(task));
    assert_eq!(manager.get(event).unwrap().kind, ProxyKind::Event);
    assert_eq!(manager.len(), 2);
}

#[test]
fn test_finalized_task_is_removed() {
    let mut rebuilder = PlanRebuilder::new();
    let start = RemoteRef::bound_event(RemoteRef::bare([s(2)]), "start");
    rebuilder.process(&cycle(
        vec![
            rec("discovered_tasks", vec![plan(), json!([task(2), task(3)])]),
            rec("added_mission", vec![plan(), bare(2)]),
            rec("added_task_child", vec![bare(2), json!("Dependency"), bare(3), json!(null)]),
            rec("added_event_child", vec![start.to_value(), json!("Signal"), generator(8), json!(null)]),
        ],
        1.0,
    ));
    assert_eq!(rebuilder.state().relations.len(), 2);
    let task2 = rebuilder.manager().find(&RemoteRef::bare([s(2)])).unwrap();

    rebuilder.process(&cycle(vec![rec("finalized_task", vec![plan(), bare(2)])], 2.0));
    let state = rebuilder.state();
    assert!(state.finalized_tasks.contains(&task2));
    assert!(!state.known_tasks.contains(&task2));
    assert!(state.missions.is_empty());
    assert!(state.relations.is_empty());
    assert!(rebuilder.manager().find(&RemoteRef::bare([s(2)])).is_none());
    // Still there for listeners until the cycle is integrated
    assert!(rebuilder.manager().get(task2).is_some());

    rebuilder.clear_integrated();
    assert!(rebuilder.manager().get(task2).is_none());
    assert!(rebuilder.state().finalized_tasks.is_empty());

    let report = rebuilder.process(&cycle(vec![rec("added_mission", vec![plan(), bare(2)])], 3.0));
    assert_eq!(report.ignored.len(), 1);
}

#[test]
fn test_removed_relations() {
    let mut rebuilder = PlanRebuilder::new();
    rebuilder.process(&cycle(
        vec![rec("added_task_child", vec![task(2), json!("Dependency"), task(3), json!({"model": "x"})])],
        1.0,
    ));
    let report = rebuilder.process(&cycle(
        vec![
            rec("removed_task_child", vec![bare(2), json!("Dependency"), bare(3)]),
            rec("removed_task_child", vec![bare(2), json!("Dependency"), bare(3)]),
        ],
        2.0,
    ));
    assert!(rebuilder.state().relations.is_empty());
    assert_eq!(report.ignored.len(), 1);
}

#[test]
fn test_copy_to_remaps_colliding_ids() {
    let mut source = ObjectManager::new();
    let task = source.local_object(&RemoteRef::task(s(2), "T")).unwrap();
    let event = source
        .local_object(&RemoteRef::bound_event(RemoteRef::bare([s(2)]), "stop"))
        .unwrap();

    let mut target = ObjectManager::new();
    let existing = target.local_object(&RemoteRef::plan(s(90))).unwrap();
    assert_eq!(existing, task);

    let mut mapping = ProxyMapping::new();
    source.copy_to(&mut target, &mut mapping);
    let new_task = mapping[&task];
    assert_ne!(new_task, task);
    assert_eq!(mapping[&event], event);
    assert_eq!(target.len(), 3);
    assert_eq!(target.get(new_task).unwrap().events["stop"], event);
    assert_eq!(target.get(event).unwrap().task, Some(new_task));
    assert_eq!(target.find(&RemoteRef::bare([s(2)])), Some(new_task));
    assert_eq!(target.kind(existing), Some(ProxyKind::Plan));

    let fresh = target.local_object(&RemoteRef::generator(s(91))).unwrap();
    assert!(![existing, new_task, event].contains(&fresh));
}

#[test]
fn test_conflicting_siblings_merge_into_first() {
    let mut manager = ObjectManager::new();
    let a = manager.local_object(&RemoteRef::task(s(2), "A")).unwrap();
    let b = manager.local_object(&RemoteRef::task(s(3), "B")).unwrap();
    assert_ne!(a, b);

    let merged = manager
        .local_object(&RemoteRef::bare([s(2), s(3)]))
        .unwrap();
    assert_eq!(merged, a);
    assert_eq!(manager.find(&RemoteRef::bare([s(3)])), Some(a));
}

fn scripted_history() -> Vec<Vec<Record>> {
    vec![
        cycle(
            vec![
                rec("discovered_tasks", vec![plan(), json!([task(2), task(3)])]),
                rec("added_mission", vec![plan(), bare(2)]),
            ],
            1.0,
        ),
        cycle(
            vec![rec("added_task_child", vec![bare(2), json!("Dependency"), bare(3), json!({})])],
            2.0,
        ),
        cycle(vec![], 3.0),
        cycle(
            vec![
                rec("generator_fired", vec![generator(10), json!(1), json!(3.5), json!([])]),
                rec("task_arguments_updated", vec![bare(3), json!("goal"), json!("dock")]),
            ],
            4.0,
        ),
        cycle(
            vec![
                rec("discovered_tasks", vec![plan(), json!([task(4)])]),
                rec("finalized_task", vec![plan(), bare(3)]),
            ],
            5.0,
        ),
        cycle(
            vec![
                rec("added_task_child", vec![bare(2), json!("Dependency"), bare(4), json!({})]),
                rec("removed_mission", vec![plan(), bare(2)]),
                rec("added_mission", vec![plan(), bare(4)]),
            ],
            6.0,
        ),
        cycle(vec![rec("finalized_event", vec![plan(), bare(10)])], 7.0),
    ]
}

#[test]
fn test_snapshot_fidelity() {
    let history = scripted_history();
    let mut direct = PlanRebuilder::new();
    let mut snapshots = Vec::new();
    for (n, records) in history.iter().enumerate() {
        direct.process(records);
        if direct.has_interesting_events() {
            snapshots.push((n, direct.snapshot()));
        }
        direct.clear_integrated();
    }
    assert!(snapshots.len() >= 5);

    for (n, snapshot) in &snapshots {
        assert_eq!(snapshot.cycle(), Some(*n as u64));

        let mut restored = PlanRebuilder::new();
        restored.apply_snapshot(snapshot);
        restored.clear_integrated();
        for records in &history[n + 1..] {
            restored.process(records);
            restored.clear_integrated();
        }
        assert_eq!(restored.state(), direct.state(), "snapshot of cycle {}", n);
        assert_eq!(restored.manager(), direct.manager(), "snapshot of cycle {}", n);
        assert_eq!(restored.processed(), direct.processed());
    }
}

#[test]
fn test_snapshot_is_independent() {
    let history = scripted_history();
    let mut rebuilder = PlanRebuilder::new();
    rebuilder.process(&history[0]);
    let snapshot = rebuilder.snapshot();
    let missions = snapshot.state().missions.clone();

    for records in &history[1..] {
        rebuilder.process(records);
    }
    assert_ne!(rebuilder.state().missions, missions);
    assert_eq!(snapshot.state().missions, missions);

    rebuilder.apply_snapshot(&snapshot);
    assert_eq!(rebuilder.state().missions, missions);
    assert_eq!(rebuilder.processed(), 1);
    assert_eq!(rebuilder.stats().unwrap().start, 1.0);
}

#[derive(Default)]
struct Seen {
    kinds: Vec<RecordKind>,
    cycles: usize,
    last_tasks: usize,
}

impl PlanListener for Seen {
    fn record(&mut self, kind: RecordKind, _record: &Record, _state: &PlanState) {
        self.kinds.push(kind);
    }

    fn cycle_rebuilt(&mut self, _report: &CycleReport, state: &PlanState, _manager: &ObjectManager) {
        self.cycles += 1;
        self.last_tasks = state.known_tasks.len();
    }
}

#[test]
fn test_listeners_are_notified() {
    let seen = Arc::new(Mutex::new(Seen::default()));
    let mut rebuilder = PlanRebuilder::new();
    rebuilder.add_listener(Box::new(seen.clone()));

    rebuilder.process(&cycle(
        vec![
            rec("discovered_tasks", vec![plan(), json!([task(2)])]),
            rec("added_mission", vec![plan(), bare(99)]),
        ],
        1.0,
    ));

    let seen = seen.lock().unwrap();
    assert_eq!(seen.kinds, vec![RecordKind::DiscoveredTasks, RecordKind::CycleEnd]);
    assert_eq!(seen.cycles, 1);
    assert_eq!(seen.last_tasks, 1);
}

#[test]
fn test_every_kind_has_a_handler() {
    let rebuilder = PlanRebuilder::new();
    let mut kinds: Vec<RecordKind> = rebuilder.handled_kinds().collect();
    kinds.sort();
    let mut all = RecordKind::ALL.to_vec();
    all.sort();
    assert_eq!(kinds, all);
}
