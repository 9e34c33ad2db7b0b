//! TCP transport for the session engine.
//!
//! Each connection speaks newline-delimited JSON: one client event per
//! inbound line, one server event per outbound line. The transport assigns
//! connection identifiers, forwards decoded events to the engine loop, and
//! fans engine output back out to the right sockets. It never touches game
//! state itself.

use crate::engine::{EngineCommand, Outbound};
use anyhow::Context;
use log::{debug, error, info, warn};
use shared::ClientEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, RwLock};

pub struct NetworkServer {
    address: String,
    peers: Arc<RwLock<HashMap<u32, mpsc::UnboundedSender<String>>>>,
    next_conn_id: AtomicU32,
}

impl NetworkServer {
    pub fn new(address: &str) -> Self {
        NetworkServer {
            address: address.to_string(),
            peers: Arc::new(RwLock::new(HashMap::new())),
            next_conn_id: AtomicU32::new(1),
        }
    }

    /// Accept loop. Each accepted socket gets a fresh connection identifier
    /// and its own reader/writer task pair.
    pub async fn start(&self, commands: mpsc::UnboundedSender<EngineCommand>) -> anyhow::Result<()> {
        let listener = TcpListener::bind(&self.address)
            .await
            .with_context(|| format!("failed to bind {}", self.address))?;
        info!("listening on {}", self.address);

        loop {
            let (stream, addr) = listener.accept().await.context("accept failed")?;
            let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
            info!("connection {conn_id} accepted from {addr}");

            let peers = Arc::clone(&self.peers);
            let commands = commands.clone();
            tokio::spawn(async move {
                Self::handle_connection(conn_id, stream, peers, commands).await;
            });
        }
    }

    async fn handle_connection(
        conn_id: u32,
        stream: TcpStream,
        peers: Arc<RwLock<HashMap<u32, mpsc::UnboundedSender<String>>>>,
        commands: mpsc::UnboundedSender<EngineCommand>,
    ) {
        let (reader, mut writer) = stream.into_split();

        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel::<String>();
        peers.write().await.insert(conn_id, peer_tx);

        let writer_task = tokio::spawn(async move {
            while let Some(line) = peer_rx.recv().await {
                if writer.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
                if writer.write_all(b"\n").await.is_err() {
                    break;
                }
            }
        });

        let mut lines = BufReader::new(reader).lines();
        loop {
            match lines.next_line().await {
                Ok(Some(line)) => {
                    let line = line.trim();
                    if line.is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<ClientEvent>(line) {
                        Ok(event) => {
                            if commands
                                .send(EngineCommand::Event { conn_id, event })
                                .is_err()
                            {
                                error!("engine channel closed, dropping connection {conn_id}");
                                break;
                            }
                        }
                        Err(err) => {
                            // Malformed input never kills the connection.
                            warn!("undecodable event from connection {conn_id}: {err}");
                        }
                    }
                }
                Ok(None) => {
                    debug!("connection {conn_id} reached EOF");
                    break;
                }
                Err(err) => {
                    warn!("read error on connection {conn_id}: {err}");
                    break;
                }
            }
        }

        peers.write().await.remove(&conn_id);
        writer_task.abort();
        // Socket-level close counts as a disconnect even without the event.
        let _ = commands.send(EngineCommand::ConnectionClosed { conn_id });
        info!("connection {conn_id} closed");
    }

    /// Drains engine output, serializing each event once and fanning
    /// broadcasts out to every live peer.
    pub async fn run_outbound(&self, mut outbound: mpsc::UnboundedReceiver<Outbound>) {
        while let Some(message) = outbound.recv().await {
            match message {
                Outbound::ToClient { conn_id, event } => match serde_json::to_string(&event) {
                    Ok(line) => self.send_to(conn_id, line).await,
                    Err(err) => error!("failed to encode event for {conn_id}: {err}"),
                },
                Outbound::Broadcast { event } => match serde_json::to_string(&event) {
                    Ok(line) => self.broadcast(line).await,
                    Err(err) => error!("failed to encode broadcast: {err}"),
                },
            }
        }
        debug!("outbound channel closed");
    }

    async fn send_to(&self, conn_id: u32, line: String) {
        let peers = self.peers.read().await;
        match peers.get(&conn_id) {
            Some(peer) => {
                if peer.send(line).is_err() {
                    debug!("peer {conn_id} hung up before delivery");
                }
            }
            None => debug!("dropping event for unknown connection {conn_id}"),
        }
    }

    async fn broadcast(&self, line: String) {
        let peers = self.peers.read().await;
        for (conn_id, peer) in peers.iter() {
            if peer.send(line.clone()).is_err() {
                debug!("peer {conn_id} hung up before broadcast delivery");
            }
        }
    }

    pub async fn peer_count(&self) -> usize {
        self.peers.read().await.len()
    }
}
