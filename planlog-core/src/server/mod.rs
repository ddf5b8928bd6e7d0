//! Live distribution of a growing log
//!
//! The wire protocol is the event file itself minus its prologue: the
//! options frame, then cycle frames, chunked arbitrarily by the transport.

mod queue;
mod tailing;

pub use queue::ChunkQueue;
pub use tailing::{ServerHandle, TailingServer};
