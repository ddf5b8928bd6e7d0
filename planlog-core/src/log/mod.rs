//! Append-only event log
//!
//! This module owns the on-disk format:
//! - Framing: every value is a little-endian `u32` length followed by its
//!   JSON serialization
//! - Event file: `ROBYLOG` magic, format version, an options frame, then one
//!   frame per cycle
//! - Index file: one stats frame per cycle, a cache rebuilt from the event
//!   file whenever it is missing or disagrees with it
//!
//! # Example
//!
//! ```rust,no_run
//! use planlog_core::log::{CycleRecorder, LogFile, LogOptions};
//! use std::collections::BTreeMap;
//!
//! let mut recorder = CycleRecorder::create("run", &LogOptions::new())?;
//! recorder.record("added_mission", vec![]);
//! recorder.end_cycle(BTreeMap::new())?;
//!
//! let mut log = LogFile::open("run")?;
//! while let Some(cycle) = log.read_cycle()? {
//!     println!("{} records", cycle.len());
//! }
//! # Ok::<(), planlog_core::error::PlanlogError>(())
//! ```

mod file;
mod frame;
mod index;
mod record;
mod recorder;

pub use file::{Cycles, DEFAULT_INDEX_SAMPLES, LogFile, LogPaths, LogWriter, read_cycle};
pub use frame::{
    FORMAT_VERSION, LEN_PREFIX_SIZE, MAGIC, MAX_FRAME_SIZE, PROLOGUE_SIZE, check_prologue,
    decode_payload, encode_frame, read_frame, read_header, read_raw_frame, split_frame,
    write_frame, write_header,
};
pub use index::{CycleIndex, rebuild_index};
pub use record::{CYCLE_END, CycleStats, LogOptions, Record, RecordKind, cycle_stats};
pub use recorder::CycleRecorder;
