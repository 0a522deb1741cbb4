//! Server shell: shared state, WebSocket handler and HTTP routes.
//!
//! Each accepted WebSocket gets a fresh peer identity and two tasks: a
//! reader that decodes inbound units and hands them to the router, and a
//! writer that drains the peer's outbound queue onto the socket. When either
//! ends, the other is aborted and the peer is disconnected from the router.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use duet_proto::codec;
use duet_proto::message::{DEFAULT_MAX_MESSAGE_SIZE, PeerId};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::broadcast;
use crate::config::{Mode, ServerConfig};
use crate::registry::{ConnectionRegistry, Outbound};
use crate::router::SignalingRouter;

/// Shared server state: the router (which owns the registry) and limits.
pub struct ServerState {
    /// Room state machine and connection registry.
    pub router: SignalingRouter,
    mode: Mode,
    max_message_size: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self::new()
    }
}

impl ServerState {
    /// Creates room-mode state with the default message size limit.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(Mode::Rooms, DEFAULT_MAX_MESSAGE_SIZE)
    }

    /// Creates state for the given mode and inbound size limit.
    #[must_use]
    pub fn with_config(mode: Mode, max_message_size: usize) -> Self {
        Self {
            router: SignalingRouter::new(Arc::new(ConnectionRegistry::new())),
            mode,
            max_message_size,
        }
    }

    /// The registry of live connections.
    #[must_use]
    pub fn registry(&self) -> &ConnectionRegistry {
        self.router.registry()
    }

    /// Routing mode in effect.
    #[must_use]
    pub const fn mode(&self) -> Mode {
        self.mode
    }
}

/// One inbound unit as delivered by the transport.
enum Unit<'a> {
    Text(&'a str),
    Binary(&'a [u8]),
}

impl Unit<'_> {
    const fn len(&self) -> usize {
        match self {
            Self::Text(t) => t.len(),
            Self::Binary(b) => b.len(),
        }
    }
}

/// Handles an upgraded WebSocket connection for a single peer.
pub async fn handle_socket(socket: WebSocket, state: Arc<ServerState>) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let peer_id = state.registry().register(tx).id();
    tracing::info!(peer_id = %peer_id, mode = %state.mode, "peer connected");

    let writer_peer_id = peer_id;
    let mut write_task = tokio::spawn(async move {
        while let Some(unit) = rx.recv().await {
            let text = match unit {
                Outbound::Message(msg) => match codec::encode_server(&msg) {
                    Ok(text) => text,
                    Err(e) => {
                        tracing::error!(peer_id = %writer_peer_id, error = %e, "failed to encode outbound message");
                        continue;
                    }
                },
                Outbound::Text(text) => text,
            };
            if ws_sender.send(Message::Text(text.into())).await.is_err() {
                tracing::warn!(peer_id = %writer_peer_id, "WebSocket write failed");
                break;
            }
        }
    });

    let reader_state = Arc::clone(&state);
    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = ws_receiver.next().await {
            match msg {
                Message::Text(text) => {
                    handle_unit(&peer_id, &Unit::Text(text.as_str()), &reader_state);
                }
                Message::Binary(data) => {
                    handle_unit(&peer_id, &Unit::Binary(&data), &reader_state);
                }
                Message::Close(_) => {
                    tracing::info!(peer_id = %peer_id, "received close frame");
                    break;
                }
                _ => {
                    // Ping/pong are answered by the transport.
                }
            }
        }
    });

    tokio::select! {
        _ = &mut read_task => {
            write_task.abort();
        }
        _ = &mut write_task => {
            read_task.abort();
        }
    }

    state.router.handle_disconnect(&peer_id);
    tracing::info!(peer_id = %peer_id, "peer disconnected");
}

/// Routes one inbound unit according to the server mode.
fn handle_unit(peer_id: &PeerId, unit: &Unit<'_>, state: &ServerState) {
    if unit.len() > state.max_message_size {
        tracing::warn!(
            peer_id = %peer_id,
            size = unit.len(),
            max = state.max_message_size,
            "message exceeds size limit, dropped"
        );
        return;
    }

    match state.mode {
        Mode::Rooms => {
            let decoded = match unit {
                Unit::Text(text) => codec::decode_client(text),
                Unit::Binary(bytes) => codec::decode_client_slice(bytes),
            };
            match decoded {
                Ok(msg) => state.router.dispatch(peer_id, msg),
                Err(e) => {
                    tracing::warn!(peer_id = %peer_id, error = %e, "malformed message dropped");
                }
            }
        }
        Mode::Broadcast => match unit {
            Unit::Text(text) => {
                broadcast::broadcast_text(&state.router, peer_id, text);
            }
            Unit::Binary(bytes) => {
                broadcast::broadcast_text(&state.router, peer_id, &String::from_utf8_lossy(bytes));
            }
        },
    }
}

/// Starts a room-mode server on the given address and returns the bound
/// address and a join handle.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(ServerState::new())).await
}

/// Starts a server from a resolved [`ServerConfig`].
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the configured address.
pub async fn start_server_with_config(
    config: &ServerConfig,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let state = Arc::new(ServerState::with_config(
        config.mode,
        config.max_message_size,
    ));
    start_server_with_state(&config.bind_addr, state).await
}

/// Starts the server with a pre-built [`ServerState`].
///
/// Routes: `GET /ws` upgrades to the signaling WebSocket, `GET /health`
/// answers `OK`.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<ServerState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = axum::Router::new()
        .route("/ws", axum::routing::get(ws_handler))
        .route("/health", axum::routing::get(health_handler))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "signaling server error");
        }
    });

    Ok((bound_addr, handle))
}

/// axum handler that upgrades an HTTP request to a WebSocket connection.
async fn ws_handler(
    ws: axum::extract::ws::WebSocketUpgrade,
    axum::extract::State(state): axum::extract::State<Arc<ServerState>>,
) -> impl axum::response::IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn health_handler() -> &'static str {
    "OK"
}
