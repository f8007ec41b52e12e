//! WebSocket connection hub
//!
//! Accepts client connections, forwards their text frames to the scheduler
//! as [`ConnectionEvent`]s and delivers outbound frames per connection.

use crate::transport::{ConnectionId, Outbound};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};
use tokio::time::Duration;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

/// Events emitted by the connection hub
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    /// A client completed the WebSocket handshake
    Connected {
        connection: ConnectionId,
        addr: SocketAddr,
    },
    /// A text frame arrived
    Message {
        connection: ConnectionId,
        text: String,
    },
    /// A client went away
    Disconnected {
        connection: ConnectionId,
        reason: String,
    },
}

/// Configuration for the connection hub
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Address the WebSocket server listens on
    pub listen_addr: String,
    /// Frames buffered per connection before sends start failing
    pub outbound_buffer: usize,
    /// Slots of each connection's buffer that broadcasts may not take
    pub reserved_slots: usize,
    /// Buffered events waiting for the scheduler
    pub event_buffer: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            listen_addr: "0.0.0.0:81".into(),
            outbound_buffer: 64,
            reserved_slots: 8,
            event_buffer: 256,
        }
    }
}

/// Outbound frame queue of one connection
///
/// The last `reserved` slots only accept [`PeerQueue::push`], so a burst of
/// broadcasts cannot crowd out a task's terminal response.
#[derive(Clone)]
struct PeerQueue {
    tx: mpsc::Sender<String>,
    reserved: usize,
}

impl PeerQueue {
    fn new(tx: mpsc::Sender<String>, reserved: usize) -> Self {
        Self { tx, reserved }
    }

    /// Queue a frame using any free slot
    fn push(&self, text: String) -> Result<()> {
        self.tx.try_send(text).map_err(|e| anyhow!("{}", e))
    }

    /// Queue a frame only while more than the reserved slots are free
    fn offer(&self, text: String) -> Result<()> {
        if self.tx.capacity() <= self.reserved {
            return Err(anyhow!("queue nearly full"));
        }
        self.push(text)
    }
}

/// Tracks open connections; cloning shares the same connection table
#[derive(Clone)]
pub struct ConnectionManager {
    config: ConnectionConfig,
    local_addr: SocketAddr,
    /// Map of connection id -> outbound frame queue
    peers: Arc<RwLock<HashMap<ConnectionId, PeerQueue>>>,
}

impl ConnectionManager {
    /// Bind the listener and start accepting connections
    pub async fn bind(
        config: ConnectionConfig,
    ) -> Result<(Self, mpsc::Receiver<ConnectionEvent>)> {
        let listener = TcpListener::bind(&config.listen_addr).await?;
        let local_addr = listener.local_addr()?;
        let (event_tx, event_rx) = mpsc::channel(config.event_buffer);

        info!("WebSocket server listening on {}", local_addr);

        let manager = Self {
            config,
            local_addr,
            peers: Arc::new(RwLock::new(HashMap::new())),
        };

        let accept = manager.clone();
        tokio::spawn(async move {
            accept.accept_loop(listener, event_tx).await;
        });

        Ok((manager, event_rx))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    async fn peer(&self, connection: ConnectionId) -> Result<PeerQueue> {
        self.peers
            .read()
            .await
            .get(&connection)
            .cloned()
            .ok_or_else(|| anyhow!("Connection {} not open", connection))
    }

    async fn accept_loop(self, listener: TcpListener, event_tx: mpsc::Sender<ConnectionEvent>) {
        let mut next_id: ConnectionId = 0;

        loop {
            match listener.accept().await {
                Ok((stream, addr)) => {
                    next_id += 1;
                    let connection = next_id;
                    let manager = self.clone();
                    let event_tx = event_tx.clone();

                    tokio::spawn(async move {
                        if let Err(e) = manager
                            .handle_connection(connection, stream, addr, event_tx)
                            .await
                        {
                            warn!("Connection {} from {} failed: {}", connection, addr, e);
                        }
                    });
                }
                Err(e) => {
                    error!("Accept failed: {}", e);
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }

    /// Run one connection until either side closes it
    async fn handle_connection(
        &self,
        connection: ConnectionId,
        stream: TcpStream,
        addr: SocketAddr,
        event_tx: mpsc::Sender<ConnectionEvent>,
    ) -> Result<()> {
        let ws = tokio_tungstenite::accept_async(stream).await?;
        let (mut sink, mut frames) = ws.split();

        let (out_tx, mut out_rx) = mpsc::channel::<String>(self.config.outbound_buffer);
        let queue = PeerQueue::new(out_tx, self.config.reserved_slots);
        self.peers.write().await.insert(connection, queue);

        if event_tx
            .send(ConnectionEvent::Connected { connection, addr })
            .await
            .is_err()
        {
            self.peers.write().await.remove(&connection);
            let _ = sink.close().await;
            return Err(anyhow!("Scheduler closed"));
        }

        let reason = loop {
            tokio::select! {
                Some(text) = out_rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        break format!("Write error: {}", e);
                    }
                }

                frame = frames.next() => match frame {
                    Some(Ok(Message::Text(text))) => {
                        if event_tx
                            .send(ConnectionEvent::Message { connection, text })
                            .await
                            .is_err()
                        {
                            break "Scheduler closed".to_string();
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        debug!("Ignoring {} byte binary frame from {}", data.len(), connection);
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        break "Client closed connection".to_string();
                    }
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        break format!("Read error: {}", e);
                    }
                },
            }
        };

        self.peers.write().await.remove(&connection);
        let _ = sink.close().await;

        let _ = event_tx
            .send(ConnectionEvent::Disconnected { connection, reason })
            .await;
        Ok(())
    }
}

#[async_trait]
impl Outbound for ConnectionManager {
    async fn send(&self, connection: ConnectionId, text: String) -> Result<()> {
        // Never block the scheduler on a slow client
        self.peer(connection)
            .await?
            .push(text)
            .map_err(|e| anyhow!("Connection {} not writable: {}", connection, e))
    }

    async fn offer(&self, connection: ConnectionId, text: String) -> Result<()> {
        self.peer(connection)
            .await?
            .offer(text)
            .map_err(|e| anyhow!("Connection {} busy: {}", connection, e))
    }

    async fn connections(&self) -> Vec<ConnectionId> {
        let mut ids: Vec<ConnectionId> = self.peers.read().await.keys().copied().collect();
        ids.sort_unstable();
        ids
    }
}
