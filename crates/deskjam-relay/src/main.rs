//! DeskJam WebSocket Relay Server
//!
//! Broadcasts CRDT updates and presence between clients in the same room.
//!
//! ## Protocol
//!
//! Messages are JSON with the following format:
//! ```json
//! { "type": "join", "room": "room-id" }
//! { "type": "sync", "data": "<base64-encoded-loro-bytes>" }
//! { "type": "awareness", "peer_id": 123, "cursor": { "x": 100, "y": 200 } }
//! ```

mod rooms;

use axum::{
    Router,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
    routing::get,
};
use deskjam_core::sync::ServerMessage;
use futures_util::{SinkExt, StreamExt};
use rooms::{AppState, RoomMessage, Session};
use std::{net::SocketAddr, sync::Arc};
use thiserror::Error;
use tokio::sync::broadcast;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{error, info, warn};
use uuid::Uuid;

const DEFAULT_ADDR: &str = "0.0.0.0:3030";

#[derive(Debug, Error)]
enum RelayError {
    #[error("invalid DESKJAM_RELAY_ADDR '{0}': {1}")]
    Addr(String, std::net::AddrParseError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

struct RelayConfig {
    addr: SocketAddr,
}

impl RelayConfig {
    /// Reads `DESKJAM_RELAY_ADDR` (default `0.0.0.0:3030`).
    fn from_env() -> Result<Self, RelayError> {
        let raw = std::env::var("DESKJAM_RELAY_ADDR").unwrap_or_else(|_| DEFAULT_ADDR.to_string());
        let addr = raw.parse().map_err(|e| RelayError::Addr(raw.clone(), e))?;
        Ok(Self { addr })
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "deskjam_relay=info,tower_http=info".into()),
        )
        .init();

    if let Err(e) = run().await {
        error!("Relay stopped: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<(), RelayError> {
    let config = RelayConfig::from_env()?;
    let state = Arc::new(AppState::new());

    let app = Router::new()
        .route("/", get(index))
        .route("/ws", get(ws_handler))
        .route("/health", get(health))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    info!("DeskJam relay listening on {}", config.addr);
    info!("WebSocket endpoint: ws://{}/ws", config.addr);

    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

async fn index() -> &'static str {
    "DeskJam Relay Server - Connect via WebSocket at /ws"
}

async fn health() -> &'static str {
    "ok"
}

async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn send_json(sender: &mut futures_util::stream::SplitSink<WebSocket, Message>, msg: &ServerMessage) -> bool {
    match serde_json::to_string(msg) {
        Ok(json) => sender.send(Message::Text(json.into())).await.is_ok(),
        Err(e) => {
            warn!("Failed to encode {:?}: {}", msg, e);
            true
        }
    }
}

async fn next_room_message(feed: Option<&mut broadcast::Receiver<RoomMessage>>) -> Option<RoomMessage> {
    match feed {
        Some(rx) => loop {
            match rx.recv().await {
                Ok(msg) => return Some(msg),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    warn!("Peer feed lagged, skipped {} messages", skipped);
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        },
        // Not in a room yet.
        None => std::future::pending().await,
    }
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let mut session = Session::new(Uuid::new_v4().to_string());
    info!("New connection: {}", session.peer_id());

    let (mut sender, mut receiver) = socket.split();

    loop {
        tokio::select! {
            msg = receiver.next() => {
                let replies = match msg {
                    Some(Ok(Message::Text(text))) => session.handle_text(&state, text.as_str()),
                    Some(Ok(Message::Binary(data))) => {
                        session.handle_binary(&state, &data);
                        Vec::new()
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => Vec::new(),
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", session.peer_id(), e);
                        break;
                    }
                };
                let mut open = true;
                for reply in &replies {
                    open = send_json(&mut sender, reply).await;
                    if !open {
                        break;
                    }
                }
                if !open {
                    break;
                }
            }

            msg = next_room_message(session.feed_mut()) => {
                if let Some((from, server_msg)) = msg {
                    if session.accepts(&from) && !send_json(&mut sender, &server_msg).await {
                        break;
                    }
                }
            }
        }
    }

    session.leave(&state);
    info!("Connection closed: {}", session.peer_id());
}
