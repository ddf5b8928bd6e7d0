//! Consumers of the tailing stream

mod connection;
mod stream;

pub use connection::StreamConnection;
pub use stream::StreamClient;
