//! Frame reassembly from a byte stream

use serde::Deserialize;
use serde_json::Value;

use crate::error::{PlanlogError, Result};
use crate::listener::CycleListener;
use crate::log::{Record, cycle_stats, decode_payload, split_frame};

/// Rebuilds frames from arbitrarily chunked bytes and dispatches cycles
///
/// The stream carries the event file minus its prologue: the options frame
/// first, then cycle frames. Chunk boundaries have no meaning.
pub struct StreamClient<L> {
    buffer: Vec<u8>,
    listener: L,
    header_seen: bool,
    partial: Vec<Record>,
    cycles: u64,
}

impl<L: CycleListener> StreamClient<L> {
    pub fn new(listener: L) -> Self {
        Self {
            buffer: Vec::new(),
            listener,
            header_seen: false,
            partial: Vec::new(),
            cycles: 0,
        }
    }

    /// Feed received bytes, returning the number of cycles completed
    ///
    /// Errors mean the stream itself is corrupt; the client should be
    /// discarded.
    pub fn push_bytes(&mut self, bytes: &[u8]) -> Result<usize> {
        self.buffer.extend_from_slice(bytes);

        let mut consumed = 0;
        let mut completed = 0;
        while let Some((payload, used)) = split_frame(&self.buffer[consumed..])? {
            let frame: Value = decode_payload(payload)?;
            consumed += used;
            completed += self.handle_frame(frame)?;
        }

        self.buffer.drain(..consumed);
        Ok(completed)
    }

    fn handle_frame(&mut self, frame: Value) -> Result<usize> {
        if !self.header_seen {
            self.header_seen = true;
            if let Value::Object(options) = frame {
                let options = options.into_iter().collect();
                tracing::debug!("Received log options");
                self.listener.options(&options);
                return Ok(0);
            }
        }

        let records = Vec::<Record>::deserialize(frame)
            .map_err(|e| PlanlogError::InvalidFormat(format!("undecodable cycle frame: {}", e)))?;

        let mut completed = 0;
        for record in records {
            if let Some(kind) = record.kind() {
                self.listener.record(kind, &record);
            }
            let closes = record.is_cycle_end();
            self.partial.push(record);
            if closes {
                let stats = cycle_stats(&self.partial)?;
                self.listener.cycle(&stats, &self.partial);
                self.partial.clear();
                self.cycles += 1;
                completed += 1;
            }
        }
        Ok(completed)
    }

    /// Bytes waiting for the rest of their frame
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Whether the options frame has been received
    pub fn header_seen(&self) -> bool {
        self.header_seen
    }

    /// Number of cycles dispatched so far
    pub fn cycle_count(&self) -> u64 {
        self.cycles
    }

    pub fn listener(&self) -> &L {
        &self.listener
    }

    pub fn listener_mut(&mut self) -> &mut L {
        &mut self.listener
    }

    pub fn into_listener(self) -> L {
        self.listener
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::CollectingListener;
    use crate::log::{CycleStats, LogOptions, encode_frame, write_frame};
    use serde_json::json;

    fn cycle(t: u64) -> Vec<Record> {
        vec![
            Record::new("added_mission", t, 0, vec![json!(1), json!(2)]),
            Record::new("unknown_call", t, 1, vec![]),
            Record::cycle_end(t, 2, &CycleStats::new(t as f64, t as f64 + 0.5)).unwrap(),
        ]
    }

    fn stream() -> Vec<u8> {
        let mut options = LogOptions::new();
        options.insert("plugins".into(), json!([]));
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &options).unwrap();
        write_frame(&mut bytes, &cycle(1)).unwrap();
        write_frame(&mut bytes, &cycle(2)).unwrap();
        bytes
    }

    #[test]
    fn test_whole_stream() {
        let mut client = StreamClient::new(CollectingListener::default());
        assert_eq!(client.push_bytes(&stream()).unwrap(), 2);
        assert_eq!(client.buffered(), 0);

        let listener = client.into_listener();
        assert!(listener.options.unwrap().contains_key("plugins"));
        assert_eq!(listener.cycles, vec![cycle(1), cycle(2)]);
        assert_eq!(listener.kinds.len(), 4);
    }

    #[test]
    fn test_byte_by_byte() {
        let mut client = StreamClient::new(CollectingListener::default());
        let bytes = stream();
        let completed: usize = bytes
            .iter()
            .map(|b| client.push_bytes(std::slice::from_ref(b)).unwrap())
            .sum();
        assert_eq!(completed, 2);
        assert_eq!(client.listener().cycles, vec![cycle(1), cycle(2)]);
    }

    #[test]
    fn test_cycle_split_over_frames() {
        let records = cycle(3);
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &json!({})).unwrap();
        write_frame(&mut bytes, &records[..1]).unwrap();

        let mut client = StreamClient::new(CollectingListener::default());
        assert_eq!(client.push_bytes(&bytes).unwrap(), 0);
        assert!(client.header_seen());

        let rest = encode_frame(&records[1..]).unwrap();
        assert_eq!(client.push_bytes(&rest).unwrap(), 1);
        assert_eq!(client.listener().cycles, vec![records]);
    }

    #[test]
    fn test_corrupt_frame_is_an_error() {
        let mut client = StreamClient::new(CollectingListener::default());
        let mut bytes = Vec::new();
        write_frame(&mut bytes, &json!({})).unwrap();
        write_frame(&mut bytes, &json!("not records")).unwrap();
        assert!(matches!(
            client.push_bytes(&bytes),
            Err(PlanlogError::InvalidFormat(_))
        ));
    }
}
