//! # Planlog - Execution Logs for Plan-Based Controllers
//!
//! Planlog records what an autonomous-control process does to its plan, one
//! execution cycle at a time, and lets tools reconstruct that plan later:
//! - Append-only event logs with a derivable sidecar index
//! - Live tailing of a growing log to any number of TCP clients
//! - Incremental frame reassembly on the client side
//! - Plan reconstruction from the recorded mutations
//! - Snapshot-based rewinding to any recorded cycle
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use planlog_core::prelude::*;
//! use serde_json::json;
//!
//! fn main() -> Result<()> {
//!     // Record a cycle
//!     let mut recorder = CycleRecorder::create("run", &LogOptions::new())?;
//!     recorder.record("added_mission", vec![json!({}), json!({})]);
//!     recorder.end_cycle(Default::default())?;
//!
//!     // Rebuild the plan from it
//!     let mut replay = LogReplay::open("run")?;
//!     replay.run_to_end()?;
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! - **log**: file format, writer, reader and index maintenance
//! - **server**: the tailing server streaming a log as it grows
//! - **client**: stream decoding and the TCP connection to a server
//! - **rebuild**: proxy identities and the plan rebuilder
//! - **replay**: cycle-by-cycle drivers and the snapshot history

pub mod client;
pub mod config;
pub mod error;
pub mod listener;
pub mod log;
pub mod rebuild;
pub mod replay;
pub mod server;

/// Current library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Re-export commonly used types
pub mod prelude {
    pub use crate::client::{StreamClient, StreamConnection};
    pub use crate::config::{ConfigBuilder, LogConfig, PlanlogConfig, ReplayConfig, ServerConfig};
    pub use crate::error::{PlanlogError, Result};
    pub use crate::listener::{CollectingListener, CycleListener, PlanListener};
    pub use crate::log::{
        CycleRecorder, CycleStats, LogFile, LogOptions, LogPaths, LogWriter, Record, RecordKind,
    };
    pub use crate::rebuild::{
        CycleReport, Effect, HandlerOutcome, ObjectManager, PlanRebuilder, PlanState, Proxy,
        ProxyId, ProxyKind, RemoteRef, SiblingId, Snapshot,
    };
    pub use crate::replay::{History, LogReplay, Replay};
    pub use crate::server::{ServerHandle, TailingServer};
}
