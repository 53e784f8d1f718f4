//! WebSocket server: upgrade handshake, per-connection read and forward
//! loops, and the static chat page.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        ConnectInfo, State, WebSocketUpgrade,
    },
    response::{Html, IntoResponse},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use metrics::counter;
use tokio::sync::mpsc;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::client::{ClientRegistry, ClientState};
use crate::dispatcher::HubConfig;
use crate::error::Result;
use crate::protocol::Envelope;

/// Chat page served at `/`. Embedded so the binary has no runtime file
/// dependency.
const INDEX_HTML: &str = include_str!("../static/index.html");

/// Shared hub state handed to every connection handler.
pub struct AppState {
    pub registry: Arc<ClientRegistry>,
    pub inbound_tx: mpsc::Sender<String>,
    pub config: HubConfig,
}

/// Create the hub router.
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(home_handler))
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
}

/// Serve the client entry point.
async fn home_handler() -> impl IntoResponse {
    Html(INDEX_HTML)
}

/// Health check handler.
async fn health_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    format!(
        r#"{{"status":"ok","clients":{}}}"#,
        state.registry.client_count()
    )
}

/// WebSocket upgrade handler.
async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, addr, state))
}

/// Handle one WebSocket connection for its whole lifetime.
async fn handle_socket(socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Bounded outbound queue: the dispatcher writes, the forward task
    // below drains.
    let (tx, mut rx) = mpsc::channel::<Message>(state.config.outbound_capacity);

    // The registry keeps the only handle to the client state, so evicting
    // the entry closes `tx` and the forward task unblocks.
    let client_id = state
        .registry
        .register(ClientState::new(addr.to_string(), tx));

    counter!("hub_connections_total").increment(1);
    info!("Client {} connected", client_id);

    // Forward task: outbound queue → socket, in arrival order. Ends on
    // write failure or on queue close (disconnect or eviction), draining
    // already-queued payloads first.
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            if ws_tx.send(msg).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    // Read loop: every text frame becomes an envelope on the shared
    // inbound queue. Submission may wait for queue capacity; only this
    // connection's reads are delayed by that.
    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => {
                counter!("hub_messages_received_total").increment(1);
                debug!("Received message from {}: {}", client_id, text.as_str());
                if let Err(e) = submit(&state, &client_id, &text).await {
                    warn!("Client {} inbound submit failed: {:?}", client_id, e);
                    break;
                }
            }
            Ok(Message::Binary(_)) => {
                debug!("Client {} sent binary frame, ignoring", client_id);
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {
                // Handled by the protocol layer.
            }
            Ok(Message::Close(_)) => {
                debug!("Client {} sent close frame", client_id);
                break;
            }
            Err(e) => {
                warn!("WebSocket error for {}: {:?}", client_id, e);
                break;
            }
        }
    }

    // Removal closes the outbound queue unless the dispatcher already
    // evicted this client; both paths are idempotent.
    state.registry.unregister(&client_id);
    send_task.abort();

    counter!("hub_disconnections_total").increment(1);
    info!("Client {} disconnected", client_id);
}

/// Wrap a text frame in an envelope and push it onto the inbound queue.
/// The sender field always comes from the connection's own identity.
async fn submit(state: &AppState, client_id: &str, text: &str) -> Result<()> {
    let payload = Envelope::new(client_id, text).to_json()?;
    state.inbound_tx.send(payload).await?;
    Ok(())
}
