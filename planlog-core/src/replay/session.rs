//! Replay drivers

use std::path::Path;

use super::history::History;
use crate::config::ReplayConfig;
use crate::error::{PlanlogError, Result};
use crate::listener::CycleListener;
use crate::log::{CycleStats, LogFile, Record};
use crate::rebuild::{CycleReport, PlanRebuilder};

/// A rebuilder fed one cycle at a time, checkpointing interesting cycles
pub struct Replay {
    rebuilder: PlanRebuilder,
    history: History,
    /// Index of the next cycle to ingest
    cycle: u64,
}

impl Default for Replay {
    fn default() -> Self {
        Self::new()
    }
}

impl Replay {
    pub fn new() -> Self {
        Self::with_config(&ReplayConfig::default())
    }

    pub fn with_config(config: &ReplayConfig) -> Self {
        Self::with_rebuilder(PlanRebuilder::new(), config)
    }

    /// Drive an already configured rebuilder (custom listeners or handlers)
    pub fn with_rebuilder(rebuilder: PlanRebuilder, config: &ReplayConfig) -> Self {
        Self {
            rebuilder,
            history: History::with_capacity(config.max_snapshots),
            cycle: 0,
        }
    }

    /// Process one cycle
    ///
    /// The cycle is snapshotted if it is interesting, then its transient
    /// logs are cleared; listeners see them from `cycle_rebuilt`.
    pub fn ingest(&mut self, records: &[Record]) -> CycleReport {
        let report = self.rebuilder.process(records);
        if self.rebuilder.has_interesting_events() {
            self.history.insert(self.cycle, self.rebuilder.snapshot());
        }
        self.rebuilder.clear_integrated();
        self.cycle += 1;
        report
    }

    /// Restore the latest snapshot at or before `cycle`
    ///
    /// The restored state is integrated, as after [`ingest`](Self::ingest).
    /// Returns the cycle the snapshot was taken after, or `None` (with the
    /// state reset to empty) when no such snapshot exists.
    pub fn rewind_to(&mut self, cycle: u64) -> Option<u64> {
        match self.history.snapshot_at_or_before(cycle) {
            Some((taken, snapshot)) => {
                self.rebuilder.apply_snapshot(&snapshot);
                self.rebuilder.clear_integrated();
                self.cycle = taken + 1;
                tracing::debug!(target_cycle = cycle, snapshot = taken, "Applied snapshot");
                Some(taken)
            }
            None => {
                self.reset();
                None
            }
        }
    }

    /// Start over from an empty plan, keeping the history
    pub fn reset(&mut self) {
        self.rebuilder.reset();
        self.cycle = 0;
    }

    /// Index of the next cycle to ingest
    pub fn next_cycle(&self) -> u64 {
        self.cycle
    }

    pub fn rebuilder(&self) -> &PlanRebuilder {
        &self.rebuilder
    }

    pub fn rebuilder_mut(&mut self) -> &mut PlanRebuilder {
        &mut self.rebuilder
    }

    pub fn history(&self) -> &History {
        &self.history
    }
}

impl CycleListener for Replay {
    fn cycle(&mut self, _stats: &CycleStats, records: &[Record]) {
        self.ingest(records);
    }
}

/// Replay of a log file with random access through the index
pub struct LogReplay {
    log: LogFile,
    replay: Replay,
}

impl LogReplay {
    /// Open the log at `basename` with a default replay
    pub fn open(basename: impl AsRef<Path>) -> Result<Self> {
        Self::new(LogFile::open(basename)?, Replay::new())
    }

    /// Continue `replay` from `log`
    ///
    /// A replay that already went past the end of the log starts over.
    pub fn new(mut log: LogFile, mut replay: Replay) -> Result<Self> {
        if replay.next_cycle() as usize > log.cycle_count() {
            tracing::warn!(
                next = replay.next_cycle(),
                available = log.cycle_count(),
                "Replay is ahead of the log; restarting"
            );
            replay.reset();
        }
        log.seek_cycle(replay.next_cycle() as usize)?;
        Ok(Self { log, replay })
    }

    /// Process the next complete cycle, if any
    pub fn step(&mut self) -> Result<Option<CycleReport>> {
        match self.log.read_cycle()? {
            Some(records) => Ok(Some(self.replay.ingest(&records))),
            None => Ok(None),
        }
    }

    /// Process every remaining complete cycle, returning how many
    pub fn run_to_end(&mut self) -> Result<usize> {
        let mut count = 0;
        while self.step()?.is_some() {
            count += 1;
        }
        Ok(count)
    }

    /// Catch up with cycles appended since the log was opened
    pub fn refresh(&mut self) -> Result<usize> {
        self.log.update_index()?;
        self.run_to_end()
    }

    /// Move to the state right after cycle `cycle`
    ///
    /// Starts from the latest snapshot at or before `cycle` and replays the
    /// cycles in between; replays from the first cycle when there is none.
    pub fn seek(&mut self, cycle: u64) -> Result<()> {
        let available = self.log.cycle_count();
        if cycle as usize >= available {
            return Err(PlanlogError::CycleOutOfRange {
                requested: cycle as usize,
                available,
            });
        }

        self.replay.rewind_to(cycle);
        self.log.seek_cycle(self.replay.next_cycle() as usize)?;
        while self.replay.next_cycle() <= cycle {
            if self.step()?.is_none() {
                break;
            }
        }
        Ok(())
    }

    pub fn log(&self) -> &LogFile {
        &self.log
    }

    pub fn replay(&self) -> &Replay {
        &self.replay
    }

    pub fn replay_mut(&mut self) -> &mut Replay {
        &mut self.replay
    }

    pub fn into_parts(self) -> (LogFile, Replay) {
        (self.log, self.replay)
    }
}
