use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use chatroom_core::Username;
use chatroom_store::MessageStore;

use crate::client::Client;
use crate::config::{ClientConfig, ServerConfig};
use crate::health::{self, HealthResponse};
use crate::hub::{Hub, HubHandle, HubPort};
use crate::transport::Transport;

/// Shared application state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub client_config: ClientConfig,
    pub started_at: Instant,
}

#[derive(Debug, Default, Deserialize)]
pub struct ConnectParams {
    pub username: Option<String>,
}

/// Build the Axum router with all routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}

/// Bind the listener, spawn the hub and serve until [`ServerHandle::shutdown`].
pub async fn start(
    config: ServerConfig,
    store: Arc<dyn MessageStore>,
) -> Result<ServerHandle, std::io::Error> {
    let (hub, hub_handle) = Hub::new(store, config.history_limit, config.hub_capacity);
    let shutdown = CancellationToken::new();
    let hub_task = tokio::spawn(hub.run_until(shutdown.clone()));

    let state = AppState {
        hub: hub_handle.clone(),
        client_config: config.client.clone(),
        started_at: Instant::now(),
    };
    let router = build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "chat server listening");

    let stop = shutdown.clone();
    let server_task = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move { stop.cancelled().await })
            .await;
        if let Err(e) = result {
            error!(error = %e, "server error");
        }
    });

    Ok(ServerHandle {
        local_addr,
        hub: hub_handle,
        shutdown,
        server_task,
        hub_task,
    })
}

/// Handle returned by `start()`. Keeps the server and hub tasks alive.
pub struct ServerHandle {
    local_addr: SocketAddr,
    hub: HubHandle,
    shutdown: CancellationToken,
    server_task: JoinHandle<()>,
    hub_task: JoinHandle<()>,
}

impl ServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn hub(&self) -> &HubHandle {
        &self.hub
    }

    /// Stop accepting connections and close every registered client.
    pub fn shutdown(&self) {
        info!("chat server shutting down");
        self.shutdown.cancel();
    }

    /// Wait for the server and hub tasks to finish.
    pub async fn wait(self) {
        let _ = self.server_task.await;
        let _ = self.hub_task.await;
    }
}

/// WebSocket upgrade handler. A missing or blank `username` joins as the
/// default identity.
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let username = Username::or_default(params.username.as_deref());
    ws.max_message_size(state.client_config.max_message_size)
        .on_upgrade(move |socket| handle_socket(socket, username, state))
}

async fn handle_socket(socket: WebSocket, username: Username, state: AppState) {
    let transport = Transport::from_websocket(socket);
    let client = Client::new(
        username,
        transport,
        Arc::new(state.hub.clone()),
        &state.client_config,
    );
    info!(conn_id = %client.id(), username = %client.username(), "WebSocket client connected");
    state.hub.register(client).await;
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let connections = state.hub.roster().await.len();
    Json(health::health_check(state.started_at, connections))
}
