//! Incremental plan reconstruction
//!
//! [`PlanRebuilder`] replays each cycle's records against a [`PlanState`],
//! resolving object references through its own [`ObjectManager`]. Cycles
//! that change the plan structure or propagate events can be captured as
//! [`Snapshot`]s and restored later to jump back in time.

mod object_manager;
mod proxy;
mod rebuilder;
mod snapshot;
mod state;

pub use object_manager::{ObjectManager, ProxyMapping};
pub use proxy::{Proxy, ProxyId, ProxyKind, RemoteRef, SiblingId};
pub use rebuilder::{
    CycleFlags, CycleReport, Effect, Handler, HandlerOutcome, IgnoredRecord, Phase, PlanRebuilder,
};
pub use snapshot::Snapshot;
pub use state::{
    Emission, EmissionFailure, PlanState, Postponement, Propagation, RelationGraph, RelationKey,
};

#[cfg(test)]
mod tests;
