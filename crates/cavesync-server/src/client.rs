use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{CloseFrame, Message as WsMessage, WebSocket};
use cavesync_core::{ClientId, ServerMessage};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// WebSocket close code for "going away", sent on operator shutdown.
const SHUTDOWN_CLOSE_CODE: u16 = 1001;

/// Directive queued for a client's writer task.
#[derive(Clone, Debug, PartialEq)]
pub enum Outbound {
    Text(String),
    /// Close the socket with a deliberate shutdown reason.
    Shutdown,
}

/// Transport-side registry: one bounded send queue per connected client.
///
/// Fan-out serializes a message once and pushes it to every queue without
/// blocking, so a slow or dead client only ever loses its own messages. No
/// lock is held across a socket write; the writer tasks drain the queues.
pub struct ClientRegistry {
    clients: DashMap<ClientId, mpsc::Sender<Outbound>>,
    max_send_queue: usize,
    closed: AtomicBool,
}

impl ClientRegistry {
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            clients: DashMap::new(),
            max_send_queue,
            closed: AtomicBool::new(false),
        }
    }

    /// Register a new client and return its id plus the queue its writer task
    /// drains. Returns `None` once shutdown has begun.
    pub fn register(&self) -> Option<(ClientId, mpsc::Receiver<Outbound>)> {
        if self.closed.load(Ordering::Acquire) {
            return None;
        }
        let id = ClientId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.clients.insert(id.clone(), tx);
        Some((id, rx))
    }

    pub fn unregister(&self, id: &ClientId) {
        self.clients.remove(id);
    }

    pub fn count(&self) -> usize {
        self.clients.len()
    }

    /// Serialize once and fan out to every connected client. A full or closed
    /// queue costs that client the message and nobody else anything.
    pub fn broadcast(&self, message: &ServerMessage) {
        let json = match serde_json::to_string(message) {
            Ok(json) => json,
            Err(error) => {
                tracing::error!(%error, "failed to serialize broadcast");
                return;
            }
        };
        for entry in self.clients.iter() {
            if let Err(error) = entry.value().try_send(Outbound::Text(json.clone())) {
                tracing::warn!(client_id = %entry.key(), %error, "dropping broadcast for client");
            }
        }
    }

    /// Disconnect everyone with a shutdown close frame, clear the registry,
    /// and refuse further registrations. Calling this twice is a no-op.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        tracing::info!(clients = self.clients.len(), "closing all client connections");
        for entry in self.clients.iter() {
            let _ = entry.value().try_send(Outbound::Shutdown);
        }
        self.clients.clear();
    }
}

/// Drive one WebSocket connection: the writer drains the send queue and emits
/// heartbeat pings, the reader forwards text frames to the message pump.
/// Returns when either side finishes; the caller handles deregistration.
pub async fn handle_ws_connection(
    socket: WebSocket,
    client_id: ClientId,
    mut rx: mpsc::Receiver<Outbound>,
    on_message: mpsc::Sender<(ClientId, String)>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let writer_cid = client_id.clone();
    let writer = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
        ping_interval.tick().await; // consume first immediate tick

        loop {
            tokio::select! {
                directive = rx.recv() => {
                    match directive {
                        Some(Outbound::Text(text)) => {
                            if ws_tx.send(WsMessage::Text(text.into())).await.is_err() {
                                break;
                            }
                        }
                        Some(Outbound::Shutdown) => {
                            let close = CloseFrame {
                                code: SHUTDOWN_CLOSE_CODE,
                                reason: "Server shutdown".into(),
                            };
                            let _ = ws_tx.send(WsMessage::Close(Some(close))).await;
                            break;
                        }
                        None => break,
                    }
                }
                _ = ping_interval.tick() => {
                    if ws_tx.send(WsMessage::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                    tracing::trace!(client_id = %writer_cid, "sent ping");
                }
            }
        }
    });

    let reader_cid = client_id.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(message)) = ws_rx.next().await {
            match message {
                WsMessage::Text(text) => {
                    let _ = on_message.send((reader_cid.clone(), text.to_string())).await;
                }
                WsMessage::Close(_) => break,
                // axum answers pings automatically; pongs carry no state here
                WsMessage::Ping(_) | WsMessage::Pong(_) => {}
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = writer => {},
        _ = reader => {},
    }
}
