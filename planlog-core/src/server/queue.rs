//! Per-client send queue

use std::collections::VecDeque;
use std::io::{self, ErrorKind};

/// Bytes waiting to be written to one client, split into bounded chunks
#[derive(Debug)]
pub struct ChunkQueue {
    chunks: VecDeque<Vec<u8>>,
    pending: usize,
    max_chunk_size: usize,
}

impl ChunkQueue {
    /// Empty queue splitting pushes into chunks of at most `max_chunk_size`
    pub fn new(max_chunk_size: usize) -> Self {
        Self {
            chunks: VecDeque::new(),
            pending: 0,
            max_chunk_size: max_chunk_size.max(1),
        }
    }

    /// Queue `bytes` as chunks of at most the maximum chunk size
    pub fn push(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(self.max_chunk_size) {
            self.chunks.push_back(chunk.to_vec());
        }
        self.pending += bytes.len();
    }

    /// Write as much as `write` accepts without blocking
    ///
    /// Adjacent chunks are coalesced up to the maximum chunk size. A short
    /// write puts the unwritten remainder back at the front and stops;
    /// `WouldBlock` stops without losing anything. Other errors are returned
    /// and leave the queue as it was before the failing write.
    pub fn write_with<F>(&mut self, mut write: F) -> io::Result<usize>
    where
        F: FnMut(&[u8]) -> io::Result<usize>,
    {
        let mut written = 0;
        while let Some(batch) = self.take_batch() {
            match write(&batch) {
                Ok(n) if n == batch.len() => {
                    written += n;
                    self.pending -= n;
                }
                Ok(n) => {
                    written += n;
                    self.pending -= n;
                    self.chunks.push_front(batch[n..].to_vec());
                    break;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => {
                    self.chunks.push_front(batch);
                    break;
                }
                Err(e) => {
                    self.chunks.push_front(batch);
                    return Err(e);
                }
            }
        }
        Ok(written)
    }

    fn take_batch(&mut self) -> Option<Vec<u8>> {
        let mut batch = self.chunks.pop_front()?;
        while let Some(next) = self.chunks.front() {
            if batch.len() + next.len() > self.max_chunk_size {
                break;
            }
            if let Some(next) = self.chunks.pop_front() {
                batch.extend_from_slice(&next);
            }
        }
        Some(batch)
    }

    /// Total queued bytes
    pub fn pending_bytes(&self) -> usize {
        self.pending
    }

    /// Number of queued chunks
    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    /// True when nothing is waiting to be written
    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }
}
