//! Cycle index
//!
//! The index file holds one frame per cycle: a copy of the cycle's
//! `cycle_end` stats stamped with `pos` and `event_count`. It is a cache
//! derivable from the event file and is rebuilt whenever it looks wrong.

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::file::read_cycle;
use super::frame::{read_frame, write_frame};
use super::record::{CycleStats, cycle_stats};
use crate::error::{PlanlogError, Result};

/// In-memory copy of the index
#[derive(Debug, Clone, Default)]
pub struct CycleIndex {
    entries: Vec<CycleStats>,
    /// Number of leading entries known to be on disk
    persisted: usize,
}

impl CycleIndex {
    /// Load the index file at `path`
    ///
    /// A missing, truncated or undecodable file is reported as
    /// `IndexInconsistent`, which callers answer with a rebuild.
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path).map_err(|e| {
            PlanlogError::IndexInconsistent(format!("cannot open {}: {}", path.display(), e))
        })?;
        let len = file.metadata()?.len();
        let mut reader = BufReader::new(file);

        let mut entries = Vec::new();
        while reader.stream_position()? < len {
            let entry: CycleStats = read_frame(&mut reader).map_err(|e| {
                PlanlogError::IndexInconsistent(format!(
                    "entry {} of {}: {}",
                    entries.len(),
                    path.display(),
                    e
                ))
            })?;
            entries.push(entry);
        }

        let persisted = entries.len();
        Ok(Self { entries, persisted })
    }

    /// All entries, in cycle order
    pub fn entries(&self) -> &[CycleStats] {
        &self.entries
    }

    /// Entry of cycle `n`
    pub fn get(&self, n: usize) -> Option<&CycleStats> {
        self.entries.get(n)
    }

    /// Last indexed cycle
    pub fn last(&self) -> Option<&CycleStats> {
        self.entries.last()
    }

    /// Number of indexed cycles
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no cycle is indexed
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether entries exist that were never written to the index file
    pub fn lags_on_disk(&self) -> bool {
        self.persisted < self.entries.len()
    }

    /// Start and end time of the indexed range
    pub fn time_span(&self) -> Option<(f64, f64)> {
        let first = self.entries.first()?;
        let last = self.entries.last()?;
        Some((first.start, last.end))
    }

    /// Index of the last cycle starting at or before `time`
    pub fn cycle_at_time(&self, time: f64) -> Option<usize> {
        let after = self.entries.partition_point(|entry| entry.start <= time);
        after.checked_sub(1)
    }

    pub(crate) fn push(&mut self, entry: CycleStats) {
        self.entries.push(entry);
    }

    pub(crate) fn check_ordering(&self, data_start: u64) -> Result<()> {
        let mut previous: Option<u64> = None;
        for (n, entry) in self.entries.iter().enumerate() {
            let pos = entry.pos.ok_or_else(|| {
                PlanlogError::IndexInconsistent(format!("entry {} has no pos", n))
            })?;
            if pos < data_start || previous.is_some_and(|p| pos <= p) {
                return Err(PlanlogError::IndexInconsistent(format!(
                    "entry {} has out-of-order pos {}",
                    n, pos
                )));
            }
            previous = Some(pos);
        }
        Ok(())
    }
}

/// Rebuild the index by replaying the event file
///
/// Reads cycles from `data_start` (just past the header), stamps each
/// cycle's stats with the offset the cycle started at and its record count,
/// and writes them to a temporary file renamed over `index_path`. An
/// incomplete trailing cycle is dropped. Returns the index and the offset
/// just past the last complete cycle.
pub fn rebuild_index<R: Read + Seek>(
    events: &mut R,
    data_start: u64,
    index_path: &Path,
) -> Result<(CycleIndex, u64)> {
    let tmp_path = tmp_path(index_path);
    let mut writer = BufWriter::new(File::create(&tmp_path)?);

    events.seek(SeekFrom::Start(data_start))?;
    let mut entries = Vec::new();
    let mut end = data_start;
    while let Some(records) = read_cycle(events)? {
        let entry = cycle_stats(&records)?.indexed(end, records.len() as u64);
        write_frame(&mut writer, &entry)?;
        entries.push(entry);
        end = events.stream_position()?;
    }

    writer.flush()?;
    writer.get_ref().sync_data()?;
    drop(writer);
    fs::rename(&tmp_path, index_path)?;

    tracing::info!(
        index = %index_path.display(),
        cycles = entries.len(),
        "Rebuilt cycle index"
    );

    let persisted = entries.len();
    Ok((CycleIndex { entries, persisted }, end))
}

/// Evenly spaced sample of `count` positions in `0..len`, first and last included
pub(crate) fn sample_positions(len: usize, count: usize) -> Vec<usize> {
    if len == 0 || count == 0 {
        return Vec::new();
    }
    if count >= len {
        return (0..len).collect();
    }
    if count == 1 {
        return vec![len - 1];
    }
    let mut positions: Vec<usize> = (0..count).map(|j| j * (len - 1) / (count - 1)).collect();
    positions.dedup();
    positions
}

fn tmp_path(index_path: &Path) -> PathBuf {
    let mut name = index_path.as_os_str().to_owned();
    name.push(".tmp");
    PathBuf::from(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_positions() {
        assert!(sample_positions(0, 4).is_empty());
        assert_eq!(sample_positions(3, 8), vec![0, 1, 2]);
        assert_eq!(sample_positions(10, 1), vec![9]);
        assert_eq!(sample_positions(10, 2), vec![0, 9]);
        assert_eq!(sample_positions(101, 5), vec![0, 25, 50, 75, 100]);
    }

    #[test]
    fn test_cycle_at_time() {
        let mut index = CycleIndex::default();
        index.push(CycleStats::new(1.0, 1.1).indexed(20, 1));
        index.push(CycleStats::new(2.0, 2.1).indexed(40, 1));
        index.push(CycleStats::new(3.0, 3.1).indexed(60, 1));

        assert_eq!(index.cycle_at_time(0.5), None);
        assert_eq!(index.cycle_at_time(1.0), Some(0));
        assert_eq!(index.cycle_at_time(2.5), Some(1));
        assert_eq!(index.cycle_at_time(99.0), Some(2));
        assert_eq!(index.time_span(), Some((1.0, 3.1)));
    }

    #[test]
    fn test_ordering_check() {
        let mut index = CycleIndex::default();
        index.push(CycleStats::new(1.0, 1.1).indexed(40, 1));
        index.push(CycleStats::new(2.0, 2.1).indexed(20, 1));
        assert!(index.check_ordering(11).is_err());

        let mut index = CycleIndex::default();
        index.push(CycleStats::new(1.0, 1.1));
        assert!(index.check_ordering(11).is_err());
    }

    #[test]
    fn test_missing_index_is_inconsistent() {
        let dir = tempfile::TempDir::new().unwrap();
        let err = CycleIndex::load(&dir.path().join("absent-index.log")).unwrap_err();
        assert!(matches!(err, PlanlogError::IndexInconsistent(_)));
    }
}
