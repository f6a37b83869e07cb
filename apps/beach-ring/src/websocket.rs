use std::{
    net::SocketAddr,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
};

use axum::{
    extract::{
        ws::{rejection::WebSocketUpgradeRejection, Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, State,
    },
    response::{IntoResponse, Response},
};
use futures_util::{SinkExt, StreamExt};
use metrics::{counter, gauge};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::registry::{IdentityRegistry, PeerSink};
use crate::session::SessionHandler;
use crate::signaling::ServerMessage;

/// Shared state for the websocket endpoint
#[derive(Clone)]
pub struct SignalingState {
    registry: IdentityRegistry,
    active_sessions: Arc<AtomicUsize>,
}

impl SignalingState {
    pub fn new(registry: IdentityRegistry) -> Self {
        Self {
            registry,
            active_sessions: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn registry(&self) -> &IdentityRegistry {
        &self.registry
    }

    pub fn active_sessions(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    fn session_opened(&self) -> usize {
        let active = self.active_sessions.fetch_add(1, Ordering::Relaxed) + 1;
        counter!("beach_ring_connections_total", 1);
        gauge!("beach_ring_connections_active", active as f64);
        active
    }

    fn session_closed(&self) -> usize {
        let active = self
            .active_sessions
            .fetch_sub(1, Ordering::Relaxed)
            .saturating_sub(1);
        gauge!("beach_ring_connections_active", active as f64);
        active
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CloseReason {
    ClientClosed,
    StreamEnded,
    TransportError,
    DecodeFailure,
}

impl CloseReason {
    fn as_str(self) -> &'static str {
        match self {
            CloseReason::ClientClosed => "client_closed",
            CloseReason::StreamEnded => "stream_ended",
            CloseReason::TransportError => "transport_error",
            CloseReason::DecodeFailure => "decode_failure",
        }
    }
}

/// WebSocket upgrade handler
pub async fn websocket_handler(
    State(state): State<SignalingState>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    match ws {
        Ok(ws) => ws
            .on_failed_upgrade(move |err| {
                warn!(%remote_addr, error = %err, "websocket upgrade failed");
                counter!("beach_ring_upgrade_failures_total", 1);
            })
            .on_upgrade(move |socket| handle_socket(socket, state, remote_addr)),
        Err(rejection) => {
            warn!(%remote_addr, error = %rejection, "websocket upgrade rejected");
            counter!("beach_ring_upgrade_failures_total", 1);
            rejection.into_response()
        }
    }
}

async fn handle_socket(socket: WebSocket, state: SignalingState, remote_addr: SocketAddr) {
    let connection_id = Uuid::new_v4();
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();
    let mut session =
        SessionHandler::new(state.registry.clone(), PeerSink::new(connection_id, tx));

    let active = state.session_opened();
    info!(
        connection_id = %connection_id,
        %remote_addr,
        active_sessions = active,
        "websocket connected"
    );

    let writer = tokio::spawn(async move {
        while let Some(message) = rx.recv().await {
            let text = match message.encode() {
                Ok(text) => text,
                Err(err) => {
                    warn!(connection_id = %connection_id, error = %err, "failed to encode frame");
                    continue;
                }
            };
            if ws_tx.send(Message::Text(text)).await.is_err() {
                break;
            }
        }
        debug!(connection_id = %connection_id, "writer task finished");
    });

    let reason = loop {
        let Some(frame) = ws_rx.next().await else {
            break CloseReason::StreamEnded;
        };
        let frame = match frame {
            Ok(frame) => frame,
            Err(err) => {
                debug!(connection_id = %connection_id, error = %err, "websocket receive error");
                break CloseReason::TransportError;
            }
        };
        let handled = match frame {
            Message::Text(text) => session.handle_text(&text),
            Message::Binary(bytes) => session.handle_bytes(&bytes),
            Message::Close(_) => break CloseReason::ClientClosed,
            Message::Ping(_) | Message::Pong(_) => continue,
        };
        if let Err(err) = handled {
            warn!(
                connection_id = %connection_id,
                identity = session.bound_identity().unwrap_or_default(),
                error = %err,
                "closing session after undecodable frame"
            );
            counter!("beach_ring_decode_failures_total", 1);
            break CloseReason::DecodeFailure;
        }
    };

    let identity = session.bound_identity().map(str::to_string);
    session.terminate();
    writer.abort();
    let active = state.session_closed();

    info!(
        connection_id = %connection_id,
        identity = identity.as_deref().unwrap_or_default(),
        reason = reason.as_str(),
        active_sessions = active,
        "websocket disconnected"
    );
}
