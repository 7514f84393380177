// Live event stream over WebSocket
//
// GET /stream upgrades to a WebSocket. The connection task:
// 1. Registers a stream session with the hub and sends a `connected` frame
// 2. Waits briefly for an optional resume request
// 3. Spawns the session driver (backfill, then live) writing into a channel
// 4. Forwards that channel to the socket with periodic Ping frames
// 5. Cancels everything for this connection on disconnect

use agentdash_core::{BroadcastHub, EventStore, SessionRegistry};
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::stream::SplitStream;
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;

use crate::services::{StreamConfig, StreamRequest, StreamSession};

/// Interval between server-initiated Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong before considering the client dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

/// Frames buffered between the session driver and the socket writer
const OUTBOUND_BUFFER: usize = 64;

/// App state for the stream route
#[derive(Clone)]
pub struct AppState {
    pub hub: BroadcastHub,
    pub store: Arc<dyn EventStore>,
    pub registry: Arc<SessionRegistry>,
    pub config: StreamConfig,
}

impl AppState {
    pub fn new(
        hub: BroadcastHub,
        store: Arc<dyn EventStore>,
        registry: Arc<SessionRegistry>,
        config: StreamConfig,
    ) -> Self {
        Self {
            hub,
            store,
            registry,
            config,
        }
    }
}

/// Create stream routes
pub fn routes(state: AppState) -> Router {
    Router::new()
        .route("/stream", get(stream_events))
        .with_state(state)
}

/// GET /stream - Live event stream (WebSocket)
///
/// After the `connected` frame, the client may send
/// `{"resume_from": [{"app", "session_id", "sequence"}], "backfill_limit": n}`.
/// Server frames are JSON objects tagged by `type`: `connected`, `event`,
/// `session`, `gap`, `live`.
#[utoipa::path(
    get,
    path = "/stream",
    responses(
        (status = 101, description = "Switching to WebSocket"),
        (status = 400, description = "Not a WebSocket upgrade request")
    ),
    tag = "stream"
)]
pub async fn stream_events(State(state): State<AppState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| run_ws_session(socket, state))
}

/// Run one WebSocket connection from upgrade through disconnect.
pub async fn run_ws_session(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    // Subscribe before anything else so nothing published from here on is missed
    let session = StreamSession::connect(
        &state.hub,
        state.store.clone(),
        state.registry.clone(),
        state.config,
    );
    let subscription_id = session.id();
    let connection_start = Instant::now();
    tracing::info!(subscription_id, "stream client connected");

    if let Some(frame) = session.connected_frame() {
        if ws_tx.send(Message::Text(frame)).await.is_err() {
            tracing::info!(subscription_id, "stream client gone before handshake");
            return;
        }
    }

    let Some(request) = read_stream_request(&mut ws_rx, state.config.handshake_timeout).await
    else {
        tracing::info!(subscription_id, "stream client closed during handshake");
        return;
    };
    tracing::debug!(
        subscription_id,
        resume_sessions = request.resume_from.len(),
        backfill_limit = ?request.backfill_limit,
        "stream handshake complete"
    );

    let (frame_tx, mut frame_rx) = mpsc::channel::<String>(OUTBOUND_BUFFER);
    let last_pong = Arc::new(Mutex::new(Instant::now()));

    // Session driver: backfill then live, until the hub closes or the channel does
    let driver = tokio::spawn(async move {
        let mut sink = frame_tx;
        if session.run(request, &mut sink).await.is_err() {
            tracing::debug!(subscription_id, "stream writer gone, stopping session");
        }
    });

    // Outbound forwarder with periodic Ping frames
    let outbound_pong = last_pong.clone();
    let mut outbound = tokio::spawn(async move {
        let mut ping_interval = tokio::time::interval(PING_INTERVAL);
        // Skip the immediate first tick
        ping_interval.tick().await;

        loop {
            tokio::select! {
                frame = frame_rx.recv() => match frame {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text)).await.is_err() {
                            break;
                        }
                    }
                    None => {
                        // Session ended (hub closed); say goodbye
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                },
                _ = ping_interval.tick() => {
                    let silent_for = outbound_pong.lock().elapsed();
                    if silent_for > PONG_TIMEOUT {
                        tracing::warn!(subscription_id, ?silent_for, "stream client unresponsive, disconnecting");
                        break;
                    }
                    if ws_tx.send(Message::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    // Inbound: only liveness and close matter after the handshake
    loop {
        tokio::select! {
            msg = ws_rx.next() => match msg {
                Some(Ok(Message::Close(_))) => {
                    tracing::info!(subscription_id, "stream client sent close frame");
                    break;
                }
                Some(Ok(Message::Pong(_))) | Some(Ok(Message::Ping(_))) => {
                    *last_pong.lock() = Instant::now();
                }
                Some(Ok(_)) => {
                    tracing::debug!(subscription_id, "ignoring client message after handshake");
                }
                Some(Err(e)) => {
                    tracing::debug!(subscription_id, error = %e, "stream read error");
                    break;
                }
                None => break,
            },
            _ = &mut outbound => break,
        }
    }

    // Dropping the driver drops the session, which unregisters from the hub
    driver.abort();
    outbound.abort();
    tracing::info!(
        subscription_id,
        duration_ms = connection_start.elapsed().as_millis() as u64,
        "stream client disconnected"
    );
}

/// Wait for the optional resume request.
///
/// Returns `None` if the client went away, the default request if it stayed
/// silent until the deadline.
async fn read_stream_request(
    ws_rx: &mut SplitStream<WebSocket>,
    wait: Duration,
) -> Option<StreamRequest> {
    let deadline = tokio::time::Instant::now() + wait;
    loop {
        let msg = match tokio::time::timeout_at(deadline, ws_rx.next()).await {
            Err(_) => return Some(StreamRequest::default()),
            Ok(None) | Ok(Some(Err(_))) => return None,
            Ok(Some(Ok(msg))) => msg,
        };
        match msg {
            Message::Text(text) => return Some(parse_stream_request(&text)),
            Message::Binary(data) => {
                let text = String::from_utf8_lossy(&data);
                return Some(parse_stream_request(&text));
            }
            Message::Close(_) => return None,
            Message::Ping(_) | Message::Pong(_) => continue,
        }
    }
}

fn parse_stream_request(text: &str) -> StreamRequest {
    serde_json::from_str(text).unwrap_or_else(|e| {
        tracing::warn!(error = %e, "invalid stream request, using defaults");
        StreamRequest::default()
    })
}
