//! Mirror of the producer's plan

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use super::object_manager::ProxyMapping;
use super::proxy::ProxyId;

/// Which relation graph an edge belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationGraph {
    Task,
    Event,
}

/// Key of one relation edge
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RelationKey {
    pub graph: RelationGraph,
    pub from: ProxyId,
    pub to: ProxyId,
    pub relation: String,
}

/// An event emission seen during the cycle
#[derive(Debug, Clone, PartialEq)]
pub struct Emission {
    pub event: ProxyId,
    pub id: Value,
    pub time: Value,
    pub context: Value,
}

/// A failed emission attempt
#[derive(Debug, Clone, PartialEq)]
pub struct EmissionFailure {
    pub event: ProxyId,
    pub error: Value,
}

/// A signal or forward from `sources` to `target`
#[derive(Debug, Clone, PartialEq)]
pub struct Propagation {
    pub forwarding: bool,
    pub sources: Vec<ProxyId>,
    pub target: ProxyId,
}

/// An emission delayed until another event
#[derive(Debug, Clone, PartialEq)]
pub struct Postponement {
    pub event: ProxyId,
    pub context: Value,
    pub until: Option<ProxyId>,
    pub reason: Value,
}

/// Persistent plan structure plus the per-cycle transient logs
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PlanState {
    /// The plan the records are about; records from other plans are ignored
    pub plan: Option<ProxyId>,

    pub known_tasks: BTreeSet<ProxyId>,
    pub free_events: BTreeSet<ProxyId>,
    pub missions: BTreeSet<ProxyId>,

    /// Edges to the `info` value recorded when they were added
    pub relations: BTreeMap<RelationKey, Value>,

    // Transient, emptied by `clear_integrated`
    pub emitted_events: Vec<Emission>,
    pub failed_emissions: Vec<EmissionFailure>,
    pub propagated_events: Vec<Propagation>,
    pub postponed_events: Vec<Postponement>,
    pub finalized_tasks: BTreeSet<ProxyId>,
    pub finalized_events: BTreeSet<ProxyId>,
}

impl PlanState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty the transient logs, keeping the plan structure
    pub fn clear_integrated(&mut self) {
        self.emitted_events.clear();
        self.failed_emissions.clear();
        self.propagated_events.clear();
        self.postponed_events.clear();
        self.finalized_tasks.clear();
        self.finalized_events.clear();
    }

    /// Whether any transient log holds entries
    pub fn has_transient(&self) -> bool {
        !(self.emitted_events.is_empty()
            && self.failed_emissions.is_empty()
            && self.propagated_events.is_empty()
            && self.postponed_events.is_empty()
            && self.finalized_tasks.is_empty()
            && self.finalized_events.is_empty())
    }

    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Add an edge, returning whether it is new
    pub fn add_relation(
        &mut self,
        graph: RelationGraph,
        from: ProxyId,
        to: ProxyId,
        relation: impl Into<String>,
        info: Value,
    ) -> bool {
        let key = RelationKey {
            graph,
            from,
            to,
            relation: relation.into(),
        };
        self.relations.insert(key, info).is_none()
    }

    /// Remove an edge, returning whether it existed
    pub fn remove_relation(
        &mut self,
        graph: RelationGraph,
        from: ProxyId,
        to: ProxyId,
        relation: impl Into<String>,
    ) -> bool {
        let key = RelationKey {
            graph,
            from,
            to,
            relation: relation.into(),
        };
        self.relations.remove(&key).is_some()
    }

    /// Drop every edge touching one of `ids`
    pub fn remove_relations_involving(&mut self, ids: &[ProxyId]) -> usize {
        let before = self.relations.len();
        self.relations
            .retain(|key, _| !ids.contains(&key.from) && !ids.contains(&key.to));
        before - self.relations.len()
    }

    /// Edges leaving `from`
    pub fn children_of(&self, from: ProxyId) -> impl Iterator<Item = &RelationKey> {
        self.relations.keys().filter(move |key| key.from == from)
    }

    /// Copy with every proxy id rewritten through `mapping`
    pub fn remapped(&self, mapping: &ProxyMapping) -> PlanState {
        let map = |id: &ProxyId| mapping.get(id).copied().unwrap_or(*id);
        let map_set = |set: &BTreeSet<ProxyId>| set.iter().map(map).collect::<BTreeSet<_>>();

        PlanState {
            plan: self.plan.as_ref().map(map),
            known_tasks: map_set(&self.known_tasks),
            free_events: map_set(&self.free_events),
            missions: map_set(&self.missions),
            relations: self
                .relations
                .iter()
                .map(|(key, info)| {
                    let key = RelationKey {
                        graph: key.graph,
                        from: map(&key.from),
                        to: map(&key.to),
                        relation: key.relation.clone(),
                    };
                    (key, info.clone())
                })
                .collect(),
            emitted_events: self
                .emitted_events
                .iter()
                .map(|e| Emission {
                    event: map(&e.event),
                    ..e.clone()
                })
                .collect(),
            failed_emissions: self
                .failed_emissions
                .iter()
                .map(|e| EmissionFailure {
                    event: map(&e.event),
                    error: e.error.clone(),
                })
                .collect(),
            propagated_events: self
                .propagated_events
                .iter()
                .map(|p| Propagation {
                    forwarding: p.forwarding,
                    sources: p.sources.iter().map(map).collect(),
                    target: map(&p.target),
                })
                .collect(),
            postponed_events: self
                .postponed_events
                .iter()
                .map(|p| Postponement {
                    event: map(&p.event),
                    until: p.until.as_ref().map(map),
                    ..p.clone()
                })
                .collect(),
            finalized_tasks: map_set(&self.finalized_tasks),
            finalized_events: map_set(&self.finalized_events),
        }
    }
}
