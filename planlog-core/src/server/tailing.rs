//! Tailing server
//!
//! Polls one growing event file and streams everything after its prologue
//! to every connected client. A single loop multiplexes the listening socket,
//! the sampling timer and client writability; no client can stall it.
//!
//! Each client tracks the file offset it has been queued up to. Clients that
//! joined late read the backlog from the file as their queue drains, never
//! holding more than `max_pending_bytes`. Once caught up they receive the
//! bytes read by the sampling loop, and are dropped if those pile up past
//! the limit.

use futures::future::{pending, select_all};
use std::io::SeekFrom;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::{AsyncReadExt, AsyncSeekExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::queue::ChunkQueue;
use crate::config::ServerConfig;
use crate::error::{PlanlogError, Result};
use crate::log::{PROLOGUE_SIZE, check_prologue};

/// Stops a running [`TailingServer`]
#[derive(Debug, Clone)]
pub struct ServerHandle {
    token: CancellationToken,
}

impl ServerHandle {
    /// Ask the server loop to exit
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// True once [`ServerHandle::shutdown`] was called
    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }
}

struct ClientConnection {
    id: Uuid,
    peer: SocketAddr,
    stream: TcpStream,
    queue: ChunkQueue,
    /// Event file offset up to which bytes were queued
    sent_pos: u64,
}

impl ClientConnection {
    fn flush(&mut self) -> Result<usize> {
        let stream = &self.stream;
        self.queue
            .write_with(|buf| stream.try_write(buf))
            .map_err(|e| PlanlogError::Transport(format!("write to {} failed: {}", self.peer, e)))
    }
}

enum LoopEvent {
    Shutdown,
    Accepted(std::io::Result<(TcpStream, SocketAddr)>),
    Tick,
    Writable(usize),
}

/// Streams a growing event file to TCP clients
pub struct TailingServer {
    listener: TcpListener,
    local_addr: SocketAddr,
    events_path: PathBuf,
    source: File,
    config: ServerConfig,
    token: CancellationToken,
    clients: Vec<ClientConnection>,
    /// End of the event file as of the last poll
    read_pos: u64,
    found_header: bool,
}

impl TailingServer {
    /// Bind the listening socket for `events_path`
    ///
    /// Fails with `SourceMissing` if the event file does not exist.
    pub async fn bind(events_path: impl Into<PathBuf>, config: ServerConfig) -> Result<Self> {
        let events_path = events_path.into();
        if !tokio::fs::try_exists(&events_path).await.unwrap_or(false) {
            return Err(PlanlogError::SourceMissing(events_path));
        }
        let source = File::open(&events_path).await?;

        let listener = TcpListener::bind((config.bind_address, config.port)).await?;
        let local_addr = listener.local_addr()?;
        tracing::info!(
            addr = %local_addr,
            path = %events_path.display(),
            "Log server listening"
        );

        Ok(Self {
            listener,
            local_addr,
            events_path,
            source,
            config,
            token: CancellationToken::new(),
            clients: Vec::new(),
            read_pos: 0,
            found_header: false,
        })
    }

    /// Address the server is listening on
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle to stop the server
    pub fn handle(&self) -> ServerHandle {
        ServerHandle {
            token: self.token.clone(),
        }
    }

    /// Event file being served
    pub fn events_path(&self) -> &Path {
        &self.events_path
    }

    /// Run until shut down
    ///
    /// Only failures to read the event file, or a prologue that fails
    /// validation, end the loop with an error. Client failures drop that
    /// client.
    pub async fn run(mut self) -> Result<()> {
        let mut ticker = interval(self.config.sampling_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = tokio::select! {
                _ = self.token.cancelled() => LoopEvent::Shutdown,
                accepted = self.listener.accept() => LoopEvent::Accepted(accepted),
                _ = ticker.tick() => LoopEvent::Tick,
                index = wait_writable(&self.clients) => LoopEvent::Writable(index),
            };

            match event {
                LoopEvent::Shutdown => break,
                LoopEvent::Accepted(Ok((stream, peer))) => self.add_client(stream, peer).await?,
                LoopEvent::Accepted(Err(e)) => {
                    tracing::warn!(error = %e, "Failed to accept connection");
                }
                LoopEvent::Tick => {
                    self.poll_source().await?;
                    self.catch_up().await?;
                    self.flush_all();
                }
                LoopEvent::Writable(index) => {
                    self.flush_one(index);
                    self.catch_up().await?;
                }
            }
        }

        tracing::info!(
            addr = %self.local_addr,
            clients = self.clients.len(),
            "Log server stopped"
        );
        Ok(())
    }

    async fn add_client(&mut self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        if let Err(e) = stream.set_nodelay(true) {
            tracing::debug!(%peer, error = %e, "Failed to disable Nagle");
        }
        let client = ClientConnection {
            id: Uuid::new_v4(),
            peer,
            stream,
            queue: ChunkQueue::new(self.config.max_chunk_size),
            sent_pos: PROLOGUE_SIZE as u64,
        };

        let backlog = if self.found_header {
            self.read_pos - PROLOGUE_SIZE as u64
        } else {
            0
        };
        tracing::info!(client = %client.id, %peer, backlog, "Client connected");

        self.clients.push(client);
        self.catch_up().await
    }

    /// Queue backlog bytes for clients behind the sampling loop
    ///
    /// A client never gets more than `max_pending_bytes` queued this way; the
    /// rest is read once its queue drains.
    async fn catch_up(&mut self) -> Result<()> {
        if !self.found_header {
            return Ok(());
        }
        let limit = self.config.max_pending_bytes;
        for client in &mut self.clients {
            let behind = self.read_pos.saturating_sub(client.sent_pos);
            let room = limit.saturating_sub(client.queue.pending_bytes()) as u64;
            let len = behind.min(room);
            if len == 0 {
                continue;
            }

            self.source.seek(SeekFrom::Start(client.sent_pos)).await?;
            let mut bytes = Vec::with_capacity(len as usize);
            (&mut self.source).take(len).read_to_end(&mut bytes).await?;
            client.queue.push(&bytes);
            client.sent_pos += bytes.len() as u64;

            if client.sent_pos == self.read_pos {
                tracing::debug!(client = %client.id, "Client caught up");
            }
        }
        Ok(())
    }

    async fn poll_source(&mut self) -> Result<()> {
        let size = self.source.metadata().await?.len();
        if size <= self.read_pos {
            return Ok(());
        }

        if !self.found_header {
            if size < PROLOGUE_SIZE as u64 {
                return Ok(());
            }
            let mut prologue = [0u8; PROLOGUE_SIZE];
            self.source.seek(SeekFrom::Start(0)).await?;
            self.source.read_exact(&mut prologue).await?;
            check_prologue(&prologue)?;
            self.found_header = true;
            // Everything up to here is backlog, read by each client as it catches up
            self.read_pos = size;
            tracing::debug!(path = %self.events_path.display(), size, "Found log prologue");
            return Ok(());
        }

        let start = self.read_pos;
        if !self.clients.iter().any(|c| c.sent_pos == start) {
            self.read_pos = size;
            return Ok(());
        }

        self.source.seek(SeekFrom::Start(start)).await?;
        let mut fresh = Vec::with_capacity((size - start) as usize);
        (&mut self.source).take(size - start).read_to_end(&mut fresh).await?;
        self.read_pos = start + fresh.len() as u64;

        tracing::trace!(bytes = fresh.len(), clients = self.clients.len(), "Broadcasting");
        for client in self.clients.iter_mut().filter(|c| c.sent_pos == start) {
            client.queue.push(&fresh);
            client.sent_pos = self.read_pos;
        }
        self.drop_overflowing();
        Ok(())
    }

    /// Drop caught-up clients whose queue grew past the pending limit
    fn drop_overflowing(&mut self) {
        let limit = self.config.max_pending_bytes;
        let read_pos = self.read_pos;
        self.clients.retain(|client| {
            let keep = client.sent_pos < read_pos || client.queue.pending_bytes() <= limit;
            if !keep {
                tracing::warn!(
                    client = %client.id,
                    peer = %client.peer,
                    pending = client.queue.pending_bytes(),
                    limit,
                    "Client too slow; disconnecting"
                );
            }
            keep
        });
    }

    fn flush_all(&mut self) {
        self.clients.retain_mut(|client| flush_or_drop(client));
    }

    fn flush_one(&mut self, index: usize) {
        if let Some(client) = self.clients.get_mut(index)
            && !flush_or_drop(client)
        {
            self.clients.remove(index);
        }
    }

    /// Number of connected clients
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }
}

fn flush_or_drop(client: &mut ClientConnection) -> bool {
    if client.queue.is_empty() {
        return true;
    }
    match client.flush() {
        Ok(written) => {
            if written > 0 {
                tracing::trace!(client = %client.id, written, "Sent");
            }
            true
        }
        Err(e) => {
            tracing::info!(
                client = %client.id,
                peer = %client.peer,
                error = %e,
                "Client disconnected"
            );
            false
        }
    }
}

/// Resolves with the index of a client that has data queued and can be written
async fn wait_writable(clients: &[ClientConnection]) -> usize {
    let waits: Vec<_> = clients
        .iter()
        .enumerate()
        .filter(|(_, client)| !client.queue.is_empty())
        .map(|(index, client)| {
            Box::pin(async move {
                // An error surfaces again on the write and drops the client.
                let _ = client.stream.writable().await;
                index
            })
        })
        .collect();

    if waits.is_empty() {
        return pending().await;
    }
    let (index, _, _) = select_all(waits).await;
    index
}
