//! Remote references and local proxies

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// Identity of an object on one peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SiblingId {
    pub peer: u32,
    pub id: u64,
}

impl SiblingId {
    pub fn new(peer: u32, id: u64) -> Self {
        Self { peer, id }
    }
}

impl fmt::Display for SiblingId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.peer, self.id)
    }
}

/// Opaque handle of a proxy inside an [`ObjectManager`](super::ObjectManager)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ProxyId(pub u64);

impl fmt::Display for ProxyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Kind of remote object a proxy stands in for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyKind {
    Plan,
    TransactionProxy,
    Task,
    /// Event bound to a task, addressed by the task and a symbol
    Event,
    /// Free-standing event generator
    EventGenerator,
}

/// Reference to a remote object as it appears in record arguments
///
/// The first time an object is dumped the reference is full (it has a
/// `kind`); later dumps of the same object only carry its siblings.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteRef {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProxyKind>,

    #[serde(default)]
    pub siblings: Vec<SiblingId>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub arguments: BTreeMap<String, Value>,

    /// Owning task of a task-bound event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task: Option<Box<RemoteRef>>,

    /// Symbol of a task-bound event (`start`, `success`, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
}

impl RemoteRef {
    /// Full reference of an object of `kind`
    pub fn new(kind: ProxyKind, sibling: SiblingId) -> Self {
        Self {
            kind: Some(kind),
            siblings: vec![sibling],
            ..Default::default()
        }
    }

    /// Bare reference carrying siblings only
    pub fn bare(siblings: impl IntoIterator<Item = SiblingId>) -> Self {
        Self {
            siblings: siblings.into_iter().collect(),
            ..Default::default()
        }
    }

    pub fn plan(sibling: SiblingId) -> Self {
        Self::new(ProxyKind::Plan, sibling)
    }

    pub fn task(sibling: SiblingId, model: impl Into<String>) -> Self {
        Self::new(ProxyKind::Task, sibling).with_model(model)
    }

    pub fn generator(sibling: SiblingId) -> Self {
        Self::new(ProxyKind::EventGenerator, sibling)
    }

    /// Event `symbol` of `task`
    pub fn bound_event(task: RemoteRef, symbol: impl Into<String>) -> Self {
        Self {
            kind: Some(ProxyKind::Event),
            task: Some(Box::new(task)),
            symbol: Some(symbol.into()),
            ..Default::default()
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_sibling(mut self, sibling: SiblingId) -> Self {
        self.siblings.push(sibling);
        self
    }

    pub fn with_argument(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.arguments.insert(key.into(), value.into());
        self
    }

    /// Whether this is an incremental dump (no kind information)
    pub fn is_bare(&self) -> bool {
        self.kind.is_none()
    }

    /// JSON form used in record arguments
    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Local stand-in for a remote object
///
/// Cross-references to other proxies are held as [`ProxyId`]s.
#[derive(Debug, Clone, PartialEq)]
pub struct Proxy {
    pub id: ProxyId,
    pub kind: ProxyKind,
    pub model: Option<String>,
    pub siblings: BTreeSet<SiblingId>,
    pub arguments: BTreeMap<String, Value>,

    /// Owning task, for task-bound events
    pub task: Option<ProxyId>,
    pub symbol: Option<String>,

    /// Bound events of a task, by symbol
    pub events: BTreeMap<String, ProxyId>,

    pub failed_to_start: Option<Value>,
    pub unreachable: Option<Value>,
    pub finalized: bool,
}

impl Proxy {
    pub(crate) fn new(id: ProxyId, kind: ProxyKind) -> Self {
        Self {
            id,
            kind,
            model: None,
            siblings: BTreeSet::new(),
            arguments: BTreeMap::new(),
            task: None,
            symbol: None,
            events: BTreeMap::new(),
            failed_to_start: None,
            unreachable: None,
            finalized: false,
        }
    }

    /// Merge the information carried by a full reference
    pub(crate) fn update(&mut self, remote: &RemoteRef) {
        self.siblings.extend(remote.siblings.iter().copied());
        if remote.model.is_some() {
            self.model.clone_from(&remote.model);
        }
        for (key, value) in &remote.arguments {
            self.arguments.insert(key.clone(), value.clone());
        }
    }

    pub fn is_task(&self) -> bool {
        self.kind == ProxyKind::Task
    }

    pub fn is_event(&self) -> bool {
        matches!(self.kind, ProxyKind::Event | ProxyKind::EventGenerator)
    }

    /// Copy with every proxy reference rewritten through `mapping`
    pub(crate) fn remapped(&self, mapping: &super::ProxyMapping) -> Proxy {
        let map = |id: ProxyId| mapping.get(&id).copied().unwrap_or(id);
        Proxy {
            id: map(self.id),
            task: self.task.map(map),
            events: self
                .events
                .iter()
                .map(|(symbol, id)| (symbol.clone(), map(*id)))
                .collect(),
            ..self.clone()
        }
    }
}
