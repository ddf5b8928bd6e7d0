//! Producer-side cycle recorder

use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

use super::file::LogWriter;
use super::record::{CycleStats, LogOptions, Record};
use crate::error::Result;

/// Buffers timestamped records and persists them one cycle at a time
///
/// A cycle starts at the first record after the previous `end_cycle` (or at
/// creation) and is written as a whole by `end_cycle`, so readers never see
/// a partial cycle except after a crash.
pub struct CycleRecorder {
    writer: LogWriter,
    pending: Vec<Record>,
    cycle_start: DateTime<Utc>,
}

impl CycleRecorder {
    /// Create a new log and record into it
    pub fn create(basename: impl AsRef<Path>, options: &LogOptions) -> Result<Self> {
        Ok(Self::new(LogWriter::create(basename, options)?))
    }

    /// Record into an existing writer
    pub fn new(writer: LogWriter) -> Self {
        Self {
            writer,
            pending: Vec::new(),
            cycle_start: Utc::now(),
        }
    }

    /// Buffer one call, stamped with the current time
    pub fn record(&mut self, method: impl Into<String>, args: Vec<Value>) {
        if self.pending.is_empty() {
            self.cycle_start = Utc::now();
        }
        self.pending.push(Record::now(method, args));
    }

    /// Number of records buffered in the current cycle
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Close the current cycle and append it to the log
    ///
    /// `fields` are stored next to `start` and `end` in the `cycle_end`
    /// stats. Returns the index entry written for the cycle.
    pub fn end_cycle(&mut self, fields: BTreeMap<String, Value>) -> Result<CycleStats> {
        let now = Utc::now();
        let mut stats = CycleStats::new(seconds(&self.cycle_start), seconds(&now));
        stats.fields = fields;

        let end = Record::cycle_end(
            now.timestamp().max(0) as u64,
            now.timestamp_subsec_micros(),
            &stats,
        )?;
        self.pending.push(end);

        let result = self.writer.append(&self.pending);
        self.pending.clear();
        self.cycle_start = now;
        result
    }

    /// The underlying writer
    pub fn writer(&self) -> &LogWriter {
        &self.writer
    }

    /// Stop recording, dropping any records not yet closed by `end_cycle`
    pub fn into_writer(self) -> LogWriter {
        if !self.pending.is_empty() {
            tracing::debug!(dropped = self.pending.len(), "Discarding unterminated cycle");
        }
        self.writer
    }
}

fn seconds(time: &DateTime<Utc>) -> f64 {
    time.timestamp() as f64 + f64::from(time.timestamp_subsec_micros()) / 1_000_000.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::LogFile;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_recorded_cycles_are_readable() {
        let dir = TempDir::new().unwrap();
        let basename = dir.path().join("run");

        let mut recorder = CycleRecorder::create(&basename, &LogOptions::new()).unwrap();
        recorder.record("added_mission", vec![json!(null), json!(null)]);
        recorder.record("generator_fired", vec![json!(null)]);
        assert_eq!(recorder.pending(), 2);

        let mut fields = BTreeMap::new();
        fields.insert("expected_sleep".to_string(), json!(0.05));
        let entry = recorder.end_cycle(fields).unwrap();
        assert_eq!(entry.event_count, Some(3));
        assert!(entry.end >= entry.start);
        assert_eq!(recorder.pending(), 0);

        recorder.end_cycle(BTreeMap::new()).unwrap();
        drop(recorder);

        let mut log = LogFile::open(&basename).unwrap();
        assert_eq!(log.cycle_count(), 2);
        let first = log.read_cycle().unwrap().unwrap();
        assert_eq!(first.len(), 3);
        assert_eq!(first[0].method, "added_mission");
        assert_eq!(first[2].stats().unwrap().fields["expected_sleep"], json!(0.05));

        let second = log.read_cycle().unwrap().unwrap();
        assert_eq!(second.len(), 1);
        assert!(log.read_cycle().unwrap().is_none());
    }
}
