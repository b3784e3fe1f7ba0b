//! HTTP and WebSocket surface.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    Router,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tokio::net::TcpListener;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::ServerConfig;
use crate::hub::{BroadcastHub, OutboundQueue};
use crate::registry::RoomRegistry;
use crate::session::ClientSession;

/// How often a connection checks its idle and overflow deadlines.
const LIVENESS_CHECK: Duration = Duration::from_millis(250);

/// Display name for connections that give none.
const ANONYMOUS: &str = "anonymous";

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error("Server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Shared application state
pub struct AppState {
    pub config: ServerConfig,
    pub hub: BroadcastHub,
}

impl AppState {
    pub fn new(config: ServerConfig) -> Self {
        let registry = Arc::new(RoomRegistry::new(config.room_grace));
        Self {
            config,
            hub: BroadcastHub::new(registry),
        }
    }

    pub fn registry(&self) -> &Arc<RoomRegistry> {
        self.hub.registry()
    }
}

/// Why a connection loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    Peer,
    SocketError,
    WriteFailed,
    Idle,
    Overflow,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    name: Option<String>,
}

/// Build the router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Bind the configured address and serve until the process ends.
pub async fn serve(config: ServerConfig) -> Result<(), ServerError> {
    let addr = config.bind_addr;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    run(listener, config).await
}

/// Serve on an already bound listener.
pub async fn run(listener: TcpListener, config: ServerConfig) -> Result<(), ServerError> {
    let addr = listener.local_addr()?;
    info!("Inkroom server listening on {}", addr);
    info!("WebSocket endpoint: ws://{}/ws", addr);

    let state = Arc::new(AppState::new(config));
    let sweeper = tokio::spawn(sweep_rooms(
        state.registry().clone(),
        state.config.sweep_interval,
    ));

    let result = axum::serve(listener, router(state)).await;
    sweeper.abort();
    Ok(result?)
}

/// Periodically destroy rooms that stayed empty past their grace period.
async fn sweep_rooms(registry: Arc<RoomRegistry>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        let removed = registry.sweep(Instant::now());
        if removed > 0 {
            let live = registry.room_count();
            info!("Swept {} expired rooms, {} live", removed, live);
        }
    }
}

/// Index page
async fn index() -> &'static str {
    "Inkroom Server - Connect via WebSocket at /ws?name=<display name>"
}

/// Health check
async fn health() -> &'static str {
    "ok"
}

/// WebSocket upgrade handler
async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    let name = params
        .name
        .map(|n| n.trim().to_string())
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| ANONYMOUS.to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, state, name))
}

/// Handle a WebSocket connection
async fn handle_socket(socket: WebSocket, state: Arc<AppState>, name: String) {
    let peer_id = Uuid::new_v4();
    info!("New connection: {} ({})", peer_id, name);

    let config = &state.config;
    let queue = Arc::new(OutboundQueue::new(config.queue_capacity));
    let mut session = ClientSession::new(peer_id, name, state.hub.clone(), queue.clone());

    let (sender, mut receiver) = socket.split();
    let mut writer = tokio::spawn(write_frames(sender, queue.clone(), config.ping_interval));
    let mut liveness = tokio::time::interval(LIVENESS_CHECK);

    let reason = loop {
        tokio::select! {
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        session.touch();
                        session.handle_text(text.as_str());
                    }
                    Some(Ok(Message::Binary(_))) => {
                        session.touch();
                        debug!("Ignoring binary frame from {}", peer_id);
                    }
                    Some(Ok(Message::Close(_))) | None => break CloseReason::Peer,
                    // Ping/pong
                    Some(Ok(_)) => session.touch(),
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", peer_id, e);
                        break CloseReason::SocketError;
                    }
                }
            }
            _ = &mut writer => break CloseReason::WriteFailed,
            _ = liveness.tick() => {
                let now = Instant::now();
                if now.saturating_duration_since(session.last_seen()) > config.idle_timeout {
                    break CloseReason::Idle;
                }
                if queue
                    .saturated_for(now)
                    .is_some_and(|saturated| saturated > config.overflow_timeout)
                {
                    break CloseReason::Overflow;
                }
            }
        }
    };

    // Cleanup on disconnect
    session.on_disconnect();
    queue.close();
    if matches!(reason, CloseReason::Idle | CloseReason::Overflow) {
        // the writer may be stuck on a peer that stopped reading
        writer.abort();
    }
    info!("Connection closed: {} ({:?})", peer_id, reason);
}

/// Drain the connection's queue onto the socket and keep it pinged.
async fn write_frames(
    mut sender: SplitSink<WebSocket, Message>,
    queue: Arc<OutboundQueue>,
    ping_every: Duration,
) {
    let mut ping = tokio::time::interval(ping_every);
    // the first tick completes immediately
    ping.tick().await;

    loop {
        tokio::select! {
            _ = queue.notified() => {
                for frame in queue.drain() {
                    if sender.send(Message::Text(frame.text.to_string().into())).await.is_err() {
                        return;
                    }
                }
                if queue.is_closed() {
                    let _ = sender.send(Message::Close(None)).await;
                    return;
                }
            }
            _ = ping.tick() => {
                if sender.send(Message::Ping(Default::default())).await.is_err() {
                    return;
                }
            }
        }
    }
}
