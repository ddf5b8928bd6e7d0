//! Replay of recorded executions
//!
//! This module drives a [`PlanRebuilder`](crate::rebuild::PlanRebuilder)
//! over a sequence of cycles, for:
//! - Live viewing: attach a [`Replay`] to a stream client
//! - Post-mortem analysis: walk a log file with [`LogReplay`]
//! - Rewinding: jump to any cycle through the snapshot [`History`]
//!
//! # Example
//!
//! ```rust,no_run
//! use planlog_core::replay::LogReplay;
//!
//! let mut replay = LogReplay::open("run")?;
//! replay.run_to_end()?;
//! replay.seek(10)?;
//! println!("{} tasks", replay.replay().rebuilder().state().known_tasks.len());
//! # Ok::<(), planlog_core::error::PlanlogError>(())
//! ```

mod history;
mod session;

pub use history::History;
pub use session::{LogReplay, Replay};
