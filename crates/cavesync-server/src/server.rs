use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use cavesync_core::protocol::{self, DecodeError};
use cavesync_core::{ClientId, ClientMessage, PoseStore, ServerMessage};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use crate::client::{self, ClientRegistry};
use crate::pacer::FramePacer;
use crate::sync::FrameSync;

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    /// Frame pacer rate in ticks per second.
    pub update_rate: f64,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 5000,
            update_rate: 60.0,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub sync: Arc<FrameSync>,
    pub message_tx: mpsc::Sender<(ClientId, String)>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Create and start the coordinator. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    store: Arc<PoseStore>,
    cancel: CancellationToken,
) -> Result<ServerHandle, std::io::Error> {
    let registry = Arc::new(ClientRegistry::new(config.max_send_queue));
    let sync = Arc::new(FrameSync::new());

    // Inbound readiness-message pump
    let (message_tx, message_rx) = mpsc::channel::<(ClientId, String)>(1024);
    let pump = tokio::spawn(process_client_messages(
        message_rx,
        Arc::clone(&sync),
        Arc::clone(&registry),
    ));

    // Frame pacer
    let pacer = FramePacer::new(
        Arc::clone(&registry),
        Arc::clone(&sync),
        Arc::clone(&store),
        config.update_rate,
        cancel.clone(),
    );
    let pacer_handle = tokio::spawn(pacer.run());

    let state = AppState {
        registry: Arc::clone(&registry),
        sync,
        message_tx,
    };

    let router = build_router(state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "cavesync server started");

    let server_task = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        registry,
        cancel,
        pacer: pacer_handle,
        server: server_task,
        pump,
    })
}

/// Handle returned by [`start`]; owns the background tasks.
pub struct ServerHandle {
    pub port: u16,
    registry: Arc<ClientRegistry>,
    cancel: CancellationToken,
    pacer: tokio::task::JoinHandle<()>,
    server: tokio::task::JoinHandle<()>,
    pump: tokio::task::JoinHandle<()>,
}

impl ServerHandle {
    /// Stop the pacer, then disconnect every client with a shutdown close
    /// frame and release the listener. The pacer is joined first so no
    /// broadcast is attempted once connections start closing.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        let _ = self.pacer.await;
        self.registry.shutdown();
        self.server.abort();
        self.pump.abort();
        tracing::info!("cavesync server stopped");
    }
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Drive one display client from connect to disconnect.
async fn handle_socket(socket: WebSocket, state: AppState) {
    let Some((client_id, rx)) = state.registry.register() else {
        // Shutdown already began; drop the socket.
        return;
    };
    state.sync.on_connect(client_id.clone());
    tracing::info!(client_id = %client_id, "display client connected");

    client::handle_ws_connection(socket, client_id.clone(), rx, state.message_tx.clone()).await;

    state.registry.unregister(&client_id);
    // Losing a client can complete the current readiness round.
    if let Some(frame) = state.sync.on_disconnect(&client_id) {
        state
            .registry
            .broadcast(&ServerMessage::DisplayFrame { frame });
    }
    tracing::info!(client_id = %client_id, "display client disconnected");
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "clients": state.registry.count(),
    }))
}

/// Apply inbound readiness messages to the ledger and broadcast the release
/// when a round completes. Bad payloads are logged and dropped; the sender's
/// connection stays open either way.
async fn process_client_messages(
    mut rx: mpsc::Receiver<(ClientId, String)>,
    sync: Arc<FrameSync>,
    registry: Arc<ClientRegistry>,
) {
    while let Some((client_id, raw)) = rx.recv().await {
        match protocol::decode_client_message(&raw) {
            Ok(ClientMessage::FrameReady { frame }) => {
                if let Some(released) = sync.on_ready(&client_id, frame) {
                    registry.broadcast(&ServerMessage::DisplayFrame { frame: released });
                }
            }
            Err(DecodeError::UnknownType(kind)) => {
                tracing::warn!(client_id = %client_id, kind = %kind, "unknown message type");
            }
            Err(error) => {
                tracing::error!(client_id = %client_id, %error, "dropping malformed message");
            }
        }
    }
}
