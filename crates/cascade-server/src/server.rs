use std::sync::Arc;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use tokio::sync::{broadcast, mpsc};
use tower_http::cors::CorsLayer;

use cascade_core::events::SequenceEvent;
use cascade_engine::Sequencer;
use cascade_store::SessionStore;

use crate::client::{self, ClientId, ClientRegistry};
use crate::event_bridge;
use crate::handlers::{self, HandlerState};

/// Server configuration.
pub struct ServerConfig {
    pub port: u16,
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 9800,
            max_send_queue: 256,
        }
    }
}

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub client_registry: Arc<ClientRegistry>,
    pub store: Arc<SessionStore>,
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

/// Create and start the server. Returns a handle that keeps the
/// background tasks alive.
pub async fn start(
    config: ServerConfig,
    store: Arc<SessionStore>,
    sequencer: Arc<Sequencer>,
    event_tx: broadcast::Sender<SequenceEvent>,
) -> Result<ServerHandle, std::io::Error> {
    let client_registry = Arc::new(ClientRegistry::new(config.max_send_queue));

    // Event bridge: sequencer events → bound WebSocket clients
    let bridge_rx = event_tx.subscribe();
    let bridge_handle = event_bridge::create_bridge(Arc::clone(&client_registry), bridge_rx);

    // Dead-client cleanup (every 60s)
    let cleanup_handle = client::start_cleanup_task(
        Arc::clone(&client_registry),
        std::time::Duration::from_secs(60),
    );

    let (msg_tx, msg_rx) = mpsc::channel::<(ClientId, String)>(1024);

    let handler_state = Arc::new(HandlerState::new(
        Arc::clone(&store),
        sequencer,
        Arc::clone(&client_registry),
    ));

    let app_state = AppState {
        client_registry,
        store,
        message_tx: msg_tx,
    };

    let frames_handle = tokio::spawn(process_frames(msg_rx, handler_state));

    let router = build_router(app_state);
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;

    tracing::info!(port = local_addr.port(), "cascade server started");

    let server_handle = tokio::spawn(async move {
        axum::serve(listener, router).await.ok();
    });

    Ok(ServerHandle {
        port: local_addr.port(),
        _server: server_handle,
        _bridge: bridge_handle,
        _frames: frames_handle,
        _cleanup: cleanup_handle,
    })
}

/// Handle returned by `start()` — keeps background tasks alive.
pub struct ServerHandle {
    pub port: u16,
    _server: tokio::task::JoinHandle<()>,
    _bridge: tokio::task::JoinHandle<()>,
    _frames: tokio::task::JoinHandle<()>,
    _cleanup: tokio::task::JoinHandle<()>,
}

/// WebSocket upgrade handler.
async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (client_id, rx) = state.client_registry.register();
    tracing::info!(client_id = %client_id, "WebSocket client connected");

    client::handle_ws_connection(
        socket,
        client_id,
        rx,
        state.client_registry,
        state.message_tx,
    )
    .await;
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    axum::Json(serde_json::json!({
        "status": "healthy",
        "sessions": state.store.len(),
        "clients": state.client_registry.count(),
    }))
}

/// Process inbound frames from all WebSocket clients.
async fn process_frames(mut rx: mpsc::Receiver<(ClientId, String)>, state: Arc<HandlerState>) {
    while let Some((client_id, raw)) = rx.recv().await {
        handlers::handle_frame(&state, &client_id, &raw).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cascade_engine::config::ModelLineup;
    use cascade_llm::MockGenerator;

    fn setup() -> (Arc<SessionStore>, Arc<Sequencer>, broadcast::Sender<SequenceEvent>) {
        let store = Arc::new(SessionStore::new());
        let (event_tx, _) = broadcast::channel(100);
        let sequencer = Arc::new(Sequencer::new(
            Arc::new(MockGenerator::new(vec![])),
            Arc::clone(&store),
            event_tx.clone(),
            ModelLineup::from_lookup(|_| None),
        ));
        (store, sequencer, event_tx)
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let (store, sequencer, event_tx) = setup();

        let config = ServerConfig {
            port: 0, // random port
            ..Default::default()
        };

        let handle = start(config, store, sequencer, event_tx).await.unwrap();
        assert!(handle.port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["sessions"], 0);
    }

    #[test]
    fn build_router_creates_routes() {
        let (store, _sequencer, _event_tx) = setup();
        let client_registry = Arc::new(ClientRegistry::new(32));
        let (msg_tx, _) = mpsc::channel(32);

        let state = AppState {
            client_registry,
            store,
            message_tx: msg_tx,
        };

        let _router = build_router(state);
        // If this doesn't panic, the router was built successfully
    }
}
