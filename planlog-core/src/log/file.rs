//! Event and index files
//!
//! A log is a pair of files sharing a basename: `<basename>-events.log`
//! holds the header and the cycles, `<basename>-index.log` one stats frame
//! per cycle. The event file has a single writer; any number of readers may
//! open it while it grows.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use super::frame::{encode_frame, read_frame, read_header, write_frame, write_header};
use super::index::{CycleIndex, rebuild_index, sample_positions};
use super::record::{CycleStats, LogOptions, Record, cycle_stats};
use crate::error::{PlanlogError, Result};

/// Default number of index entries checked when opening a log
pub const DEFAULT_INDEX_SAMPLES: usize = 8;

/// Paths of the two files making up a log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogPaths {
    /// `<basename>-events.log`
    pub events: PathBuf,
    /// `<basename>-index.log`
    pub index: PathBuf,
}

impl LogPaths {
    /// Paths derived from a basename
    pub fn new(basename: impl AsRef<Path>) -> Self {
        Self {
            events: suffixed(basename.as_ref(), "-events.log"),
            index: suffixed(basename.as_ref(), "-index.log"),
        }
    }
}

fn suffixed(basename: &Path, suffix: &str) -> PathBuf {
    let mut name = basename.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

/// Read one cycle from the current position
///
/// Concatenates frames until the `cycle_end` record. When the data ends
/// before that (the producer is mid-write or crashed), the reader is moved
/// back to where the cycle started and `None` is returned.
pub fn read_cycle<R: Read + Seek>(events: &mut R) -> Result<Option<Vec<Record>>> {
    let start = events.stream_position()?;
    let mut records: Vec<Record> = Vec::new();
    loop {
        match read_frame::<_, Vec<Record>>(events) {
            Ok(batch) => {
                records.extend(batch);
                if records.last().is_some_and(Record::is_cycle_end) {
                    return Ok(Some(records));
                }
            }
            Err(e) if e.is_truncated() => {
                events.seek(SeekFrom::Start(start))?;
                return Ok(None);
            }
            Err(e) => return Err(e),
        }
    }
}

/// Producer side of a log
pub struct LogWriter {
    paths: LogPaths,
    events: File,
    index: File,
    position: u64,
    cycle_count: u64,
}

impl LogWriter {
    /// Create a new log, replacing any existing one with the same basename
    pub fn create(basename: impl AsRef<Path>, options: &LogOptions) -> Result<Self> {
        let paths = LogPaths::new(basename);
        let mut header = Vec::new();
        write_header(&mut header, options)?;

        let mut events = File::create(&paths.events)?;
        events.write_all(&header)?;
        events.flush()?;
        let index = File::create(&paths.index)?;

        tracing::debug!(path = %paths.events.display(), "Created event log");
        Ok(Self {
            paths,
            events,
            index,
            position: header.len() as u64,
            cycle_count: 0,
        })
    }

    /// Reopen an existing log for appending
    ///
    /// An incomplete trailing cycle left by a crash is cut off so new cycles
    /// follow the last complete one, and an index that lags the event file is
    /// rebuilt first.
    pub fn open_append(basename: impl AsRef<Path>) -> Result<Self> {
        let mut log = LogFile::open(basename)?;
        if log.index().lags_on_disk() {
            log.rebuild_index()?;
        }
        let paths = log.paths().clone();
        let position = log.indexed_end();
        let cycle_count = log.cycle_count() as u64;
        drop(log);

        let mut events = OpenOptions::new().write(true).open(&paths.events)?;
        let len = events.metadata()?.len();
        if len > position {
            tracing::warn!(
                path = %paths.events.display(),
                discarded = len - position,
                "Discarding incomplete trailing cycle"
            );
            events.set_len(position)?;
        }
        events.seek(SeekFrom::Start(position))?;
        let index = OpenOptions::new().append(true).open(&paths.index)?;

        Ok(Self {
            paths,
            events,
            index,
            position,
            cycle_count,
        })
    }

    /// Append one cycle
    ///
    /// `cycle` must end with its single `cycle_end` record. The whole cycle is
    /// written as one frame to the event file, then its stats, stamped with
    /// `pos` and `event_count`, as one frame to the index file. Returns the
    /// index entry.
    pub fn append(&mut self, cycle: &[Record]) -> Result<CycleStats> {
        let stats = cycle_stats(cycle)?;
        let frame = encode_frame(cycle)?;
        self.events.write_all(&frame)?;
        self.events.flush()?;

        let entry = stats.indexed(self.position, cycle.len() as u64);
        write_frame(&mut self.index, &entry)?;
        self.index.flush()?;

        self.position += frame.len() as u64;
        self.cycle_count += 1;
        tracing::trace!(
            cycle = self.cycle_count - 1,
            records = cycle.len(),
            bytes = frame.len(),
            "Appended cycle"
        );
        Ok(entry)
    }

    /// Flush both files to stable storage
    pub fn sync(&self) -> Result<()> {
        self.events.sync_data()?;
        self.index.sync_data()?;
        Ok(())
    }

    /// Offset where the next cycle will be written
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Number of cycles in the log
    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    /// Paths of the log files
    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }
}

/// Reader side of a log
pub struct LogFile {
    paths: LogPaths,
    reader: BufReader<File>,
    options: LogOptions,
    data_start: u64,
    index: CycleIndex,
    indexed_end: u64,
    sample_count: usize,
}

impl LogFile {
    /// Open the log with the default index sample count
    pub fn open(basename: impl AsRef<Path>) -> Result<Self> {
        Self::open_with(basename, DEFAULT_INDEX_SAMPLES)
    }

    /// Open the log, validating `sample_count` index entries
    ///
    /// Header errors abort the open. A missing, empty or inconsistent index
    /// is rebuilt from the event file.
    pub fn open_with(basename: impl AsRef<Path>, sample_count: usize) -> Result<Self> {
        let paths = LogPaths::new(basename);
        if !paths.events.exists() {
            return Err(PlanlogError::SourceMissing(paths.events.clone()));
        }

        let mut reader = BufReader::new(File::open(&paths.events)?);
        let options = read_header(&mut reader)?;
        let data_start = reader.stream_position()?;

        let mut log = Self {
            paths,
            reader,
            options,
            data_start,
            index: CycleIndex::default(),
            indexed_end: data_start,
            sample_count,
        };

        let file_len = log.reader.get_ref().metadata()?.len();
        let loaded = CycleIndex::load(&log.paths.index).and_then(|index| {
            if index.is_empty() {
                // A log without cycles has nothing to index.
                if file_len == data_start {
                    return Ok(());
                }
                return Err(PlanlogError::IndexInconsistent("index is empty".into()));
            }
            log.index = index;
            log.validate_index()
        });
        if let Err(e) = loaded {
            tracing::warn!(
                index = %log.paths.index.display(),
                error = %e,
                "Cycle index unusable; rebuilding from event file"
            );
            log.rebuild_index()?;
        }

        log.update_index()?;
        log.rewind()?;
        Ok(log)
    }

    /// Compare sampled index entries with the cycles they point at
    fn validate_index(&mut self) -> Result<()> {
        self.index.check_ordering(self.data_start)?;

        let file_len = self.reader.get_ref().metadata()?.len();
        // The last entry is always checked; it fixes where catching up resumes.
        for n in sample_positions(self.index.len(), self.sample_count.max(1)) {
            let entry = self.index.entries()[n].clone();
            let pos = entry.pos.unwrap_or_default();
            if pos >= file_len {
                return Err(PlanlogError::IndexInconsistent(format!(
                    "entry {} points past the end of the event file",
                    n
                )));
            }

            self.reader.seek(SeekFrom::Start(pos))?;
            let records = match read_cycle(&mut self.reader) {
                Ok(Some(records)) => records,
                Ok(None) => {
                    return Err(PlanlogError::IndexInconsistent(format!(
                        "cycle {} at {} is incomplete",
                        n, pos
                    )));
                }
                Err(e) => {
                    return Err(PlanlogError::IndexInconsistent(format!(
                        "cycle {} at {}: {}",
                        n, pos, e
                    )));
                }
            };
            let stats = cycle_stats(&records)
                .map_err(|e| PlanlogError::IndexInconsistent(format!("cycle {}: {}", n, e)))?;
            if !stats.same_cycle(&entry) || entry.event_count != Some(records.len() as u64) {
                return Err(PlanlogError::IndexInconsistent(format!(
                    "entry {} does not match the cycle at {}",
                    n, pos
                )));
            }
            if n + 1 == self.index.len() {
                self.indexed_end = self.reader.stream_position()?;
            }
        }
        Ok(())
    }

    /// Rebuild the index file from the event file
    ///
    /// Returns the number of indexed cycles.
    pub fn rebuild_index(&mut self) -> Result<usize> {
        let (index, end) = rebuild_index(&mut self.reader, self.data_start, &self.paths.index)?;
        self.index = index;
        self.indexed_end = end;
        self.rewind()?;
        Ok(self.index.len())
    }

    /// Index, in memory, cycles appended since the last indexed one
    ///
    /// Lets a reader follow a file that is still growing. The index file is
    /// left untouched. Returns the number of new cycles.
    pub fn update_index(&mut self) -> Result<usize> {
        let resume = self.reader.stream_position()?;
        self.reader.seek(SeekFrom::Start(self.indexed_end))?;

        let mut added = 0;
        while let Some(records) = read_cycle(&mut self.reader)? {
            let entry = cycle_stats(&records)?.indexed(self.indexed_end, records.len() as u64);
            self.index.push(entry);
            self.indexed_end = self.reader.stream_position()?;
            added += 1;
        }

        self.reader.seek(SeekFrom::Start(resume))?;
        if added > 0 {
            tracing::debug!(added, total = self.index.len(), "Indexed new cycles");
        }
        Ok(added)
    }

    /// Read the next cycle, or `None` if no complete cycle follows
    pub fn read_cycle(&mut self) -> Result<Option<Vec<Record>>> {
        read_cycle(&mut self.reader)
    }

    /// Iterate over the remaining complete cycles
    pub fn cycles(&mut self) -> Cycles<'_> {
        Cycles { log: self }
    }

    /// Move back to the first cycle
    pub fn rewind(&mut self) -> Result<()> {
        self.reader.seek(SeekFrom::Start(self.data_start))?;
        Ok(())
    }

    /// Move to the start of cycle `n`
    ///
    /// `n` may equal the cycle count to move just past the last indexed cycle.
    pub fn seek_cycle(&mut self, n: usize) -> Result<()> {
        let pos = if n == self.index.len() {
            Some(self.indexed_end)
        } else {
            self.index.get(n).and_then(|entry| entry.pos)
        };
        let pos = pos.ok_or(PlanlogError::CycleOutOfRange {
            requested: n,
            available: self.index.len(),
        })?;
        self.reader.seek(SeekFrom::Start(pos))?;
        Ok(())
    }

    /// Current offset in the event file
    pub fn position(&mut self) -> Result<u64> {
        Ok(self.reader.stream_position()?)
    }

    /// Options stored in the header
    pub fn options(&self) -> &LogOptions {
        &self.options
    }

    /// The cycle index
    pub fn index(&self) -> &CycleIndex {
        &self.index
    }

    /// Number of indexed cycles
    pub fn cycle_count(&self) -> usize {
        self.index.len()
    }

    /// Offset of the first cycle
    pub fn data_start(&self) -> u64 {
        self.data_start
    }

    /// Offset just past the last indexed cycle
    pub fn indexed_end(&self) -> u64 {
        self.indexed_end
    }

    /// Paths of the log files
    pub fn paths(&self) -> &LogPaths {
        &self.paths
    }
}

/// Iterator over the complete cycles following the reader position
pub struct Cycles<'a> {
    log: &'a mut LogFile,
}

impl Iterator for Cycles<'_> {
    type Item = Result<Vec<Record>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.log.read_cycle().transpose()
    }
}
