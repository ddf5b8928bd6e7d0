//! TCP connection to a tailing server

use std::net::SocketAddr;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpStream, ToSocketAddrs};

use super::stream::StreamClient;
use crate::error::{PlanlogError, Result};
use crate::listener::CycleListener;

const READ_BUFFER_SIZE: usize = 64 * 1024;

/// A [`StreamClient`] fed from a socket
pub struct StreamConnection<L> {
    stream: TcpStream,
    peer: SocketAddr,
    client: StreamClient<L>,
    read_buffer: Vec<u8>,
}

impl<L: CycleListener> StreamConnection<L> {
    /// Connect to the server at `addr`
    pub async fn connect(addr: impl ToSocketAddrs, listener: L) -> Result<Self> {
        let stream = TcpStream::connect(addr)
            .await
            .map_err(|e| PlanlogError::Transport(format!("Failed to connect: {}", e)))?;
        let peer = stream
            .peer_addr()
            .map_err(|e| PlanlogError::Transport(format!("Failed to read peer address: {}", e)))?;
        tracing::info!(%peer, "Connected to log server");

        Ok(Self {
            stream,
            peer,
            client: StreamClient::new(listener),
            read_buffer: vec![0u8; READ_BUFFER_SIZE],
        })
    }

    /// Wait for bytes once and feed them to the client
    ///
    /// Returns the number of bytes read, or `None` once the server closed the
    /// connection.
    pub async fn read_available(&mut self) -> Result<Option<usize>> {
        let n = self
            .stream
            .read(&mut self.read_buffer)
            .await
            .map_err(|e| PlanlogError::Transport(format!("Failed to read from {}: {}", self.peer, e)))?;
        if n == 0 {
            tracing::info!(peer = %self.peer, "Log server closed the connection");
            return Ok(None);
        }
        self.client.push_bytes(&self.read_buffer[..n])?;
        Ok(Some(n))
    }

    /// Read until the server closes the connection
    ///
    /// Returns the number of cycles received.
    pub async fn run(&mut self) -> Result<u64> {
        while self.read_available().await?.is_some() {}
        Ok(self.client.cycle_count())
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    pub fn client(&self) -> &StreamClient<L> {
        &self.client
    }

    pub fn client_mut(&mut self) -> &mut StreamClient<L> {
        &mut self.client
    }

    pub fn into_client(self) -> StreamClient<L> {
        self.client
    }
}
