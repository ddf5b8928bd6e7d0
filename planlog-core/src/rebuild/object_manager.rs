//! Identity interning of remote objects

use std::collections::{BTreeMap, HashMap};

use super::proxy::{Proxy, ProxyId, ProxyKind, RemoteRef, SiblingId};
use crate::error::{PlanlogError, Result};

/// Old id to new id, produced when copying proxies between managers
pub type ProxyMapping = BTreeMap<ProxyId, ProxyId>;

/// Maps sibling ids to local proxies
///
/// Each rebuilder owns one. Proxies live in an arena keyed by [`ProxyId`];
/// several sibling ids may alias the same proxy.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ObjectManager {
    siblings: HashMap<SiblingId, ProxyId>,
    proxies: BTreeMap<ProxyId, Proxy>,
    next_id: u64,
}

impl ObjectManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `remote` to a local proxy, creating it if needed
    ///
    /// A reference whose siblings (or, for a task-bound event, whose task and
    /// symbol) are already known updates the existing proxy in place. A bare
    /// reference to an unknown object is an `InvalidReference` error.
    pub fn local_object(&mut self, remote: &RemoteRef) -> Result<ProxyId> {
        let task = match &remote.task {
            Some(task) => Some(self.local_object(task)?),
            None => None,
        };

        let mut known: Vec<ProxyId> = Vec::new();
        for sibling in &remote.siblings {
            if let Some(id) = self.siblings.get(sibling)
                && !known.contains(id)
            {
                known.push(*id);
            }
        }
        if let (Some(task), Some(symbol)) = (task, &remote.symbol)
            && let Some(id) = self.proxies.get(&task).and_then(|t| t.events.get(symbol))
            && !known.contains(id)
        {
            known.push(*id);
        }

        let id = match known.first() {
            Some(&id) => {
                if known.len() > 1 {
                    tracing::warn!(
                        proxy = %id,
                        aliases = ?known,
                        "Siblings resolve to several proxies; merging into the first"
                    );
                }
                id
            }
            None => {
                let kind = remote.kind.ok_or_else(|| {
                    PlanlogError::InvalidReference(format!(
                        "incremental reference to unknown object {:?}",
                        remote.siblings
                    ))
                })?;
                let id = self.allocate();
                self.proxies.insert(id, Proxy::new(id, kind));
                tracing::trace!(proxy = %id, ?kind, "Created proxy");
                id
            }
        };

        for sibling in &remote.siblings {
            self.siblings.insert(*sibling, id);
        }
        if let Some(proxy) = self.proxies.get_mut(&id) {
            proxy.update(remote);
            if task.is_some() {
                proxy.task = task;
                proxy.symbol.clone_from(&remote.symbol);
            }
        }
        if let (Some(task), Some(symbol)) = (task, &remote.symbol)
            && let Some(owner) = self.proxies.get_mut(&task)
        {
            owner.events.insert(symbol.clone(), id);
        }
        Ok(id)
    }

    /// Resolve `remote` without creating anything
    pub fn find(&self, remote: &RemoteRef) -> Option<ProxyId> {
        if let Some(id) = remote
            .siblings
            .iter()
            .find_map(|sibling| self.siblings.get(sibling))
        {
            return Some(*id);
        }
        let task = self.find(remote.task.as_deref()?)?;
        self.proxies.get(&task)?.events.get(remote.symbol.as_ref()?).copied()
    }

    /// Forget every sibling id of the proxy `remote` resolves to
    ///
    /// The proxy, and the events bound to it, are marked finalized and
    /// dropped by the next [`collect_garbage`](Self::collect_garbage).
    pub fn remove(&mut self, remote: &RemoteRef) -> Option<ProxyId> {
        let id = self.find(remote)?;
        let mut finalized = vec![id];
        if let Some(proxy) = self.proxies.get(&id) {
            finalized.extend(proxy.events.values().copied());
        }

        self.siblings.retain(|_, target| !finalized.contains(target));
        for target in &finalized {
            if let Some(proxy) = self.proxies.get_mut(target) {
                proxy.finalized = true;
            }
        }
        Some(id)
    }

    /// Drop finalized proxies that no sibling id refers to any more
    ///
    /// Returns the number of dropped proxies.
    pub fn collect_garbage(&mut self) -> usize {
        let referenced: std::collections::HashSet<ProxyId> =
            self.siblings.values().copied().collect();
        let before = self.proxies.len();
        self.proxies
            .retain(|id, proxy| !proxy.finalized || referenced.contains(id));
        let dropped = before - self.proxies.len();
        if dropped > 0 {
            tracing::trace!(dropped, remaining = self.proxies.len(), "Collected proxies");
        }
        dropped
    }

    /// Copy every proxy into `target`
    ///
    /// Ids are kept unless `target` already uses them; `mapping` receives
    /// the id each proxy got in `target`, and cross-references are rewritten
    /// accordingly.
    pub fn copy_to(&self, target: &mut ObjectManager, mapping: &mut ProxyMapping) {
        target.next_id = target.next_id.max(self.next_id);
        for id in self.proxies.keys() {
            let new_id = if target.proxies.contains_key(id) {
                target.allocate()
            } else {
                *id
            };
            mapping.insert(*id, new_id);
        }

        for proxy in self.proxies.values() {
            let copy = proxy.remapped(mapping);
            target.next_id = target.next_id.max(copy.id.0 + 1);
            target.proxies.insert(copy.id, copy);
        }
        for (sibling, id) in &self.siblings {
            target
                .siblings
                .insert(*sibling, mapping.get(id).copied().unwrap_or(*id));
        }
    }

    /// Forget everything
    pub fn clear(&mut self) {
        self.siblings.clear();
        self.proxies.clear();
        self.next_id = 0;
    }

    pub fn get(&self, id: ProxyId) -> Option<&Proxy> {
        self.proxies.get(&id)
    }

    pub fn get_mut(&mut self, id: ProxyId) -> Option<&mut Proxy> {
        self.proxies.get_mut(&id)
    }

    /// Kind of proxy `id`
    pub fn kind(&self, id: ProxyId) -> Option<ProxyKind> {
        self.proxies.get(&id).map(|p| p.kind)
    }

    pub fn proxies(&self) -> impl Iterator<Item = &Proxy> {
        self.proxies.values()
    }

    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    fn allocate(&mut self) -> ProxyId {
        let id = ProxyId(self.next_id);
        self.next_id += 1;
        id
    }
}
