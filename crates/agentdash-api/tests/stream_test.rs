//! End-to-end stream tests using a real WebSocket client.

use std::sync::Arc;
use std::time::Duration;

use agentdash_api::{build_app, AppContext, ServerConfig};
use agentdash_core::InMemoryEventStore;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Boot a test server on an ephemeral port and return the stream URL + context.
async fn boot_server(config: ServerConfig) -> (String, AppContext) {
    let ctx = AppContext::new(Arc::new(InMemoryEventStore::new()), "memory", &config);
    let app = build_app(&ctx, &config);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (format!("ws://{addr}/stream"), ctx)
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.stream.handshake_timeout = Duration::from_millis(100);
    config
}

async fn ingest(ctx: &AppContext, session_id: &str, event_type: &str) -> u64 {
    let body = json!({
        "app": "demo",
        "session_id": session_id,
        "event_type": event_type,
        "payload": {"tool_name": "Bash"},
    });
    ctx.ingest
        .ingest_bytes(body.to_string().as_bytes())
        .await
        .unwrap()
        .sequence
}

/// Read the next JSON frame, skipping control frames.
async fn next_frame(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timed out waiting for frame")
            .expect("stream ended")
            .expect("websocket error");
        match msg {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected message: {other:?}"),
        }
    }
}

async fn connect(url: &str) -> WsStream {
    let (mut ws, _) = timeout(TIMEOUT, connect_async(url)).await.unwrap().unwrap();
    let connected = next_frame(&mut ws).await;
    assert_eq!(connected["type"], "connected");
    assert!(connected["subscription_id"].is_u64());
    ws
}

async fn send_request(ws: &mut WsStream, request: Value) {
    ws.send(Message::Text(request.to_string())).await.unwrap();
}

#[tokio::test]
async fn test_live_event_after_handshake() {
    let (url, ctx) = boot_server(test_config()).await;
    let mut ws = connect(&url).await;
    send_request(&mut ws, json!({"backfill_limit": 0})).await;

    let live = next_frame(&mut ws).await;
    assert_eq!(live, json!({"type": "live", "backfilled": 0}));

    ingest(&ctx, "s1", "UserPromptSubmit").await;

    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["type"], "event");
    assert_eq!(frame["event"]["sequence"], 1);
    assert_eq!(frame["event"]["event_type"], "UserPromptSubmit");
    assert_eq!(frame["session_state"]["status"], "active");
    assert_eq!(frame["session_state"]["event_count"], 1);
}

#[tokio::test]
async fn test_silent_client_gets_recent_backfill() {
    let (url, ctx) = boot_server(test_config()).await;
    for event_type in ["UserPromptSubmit", "PostToolUse", "Stop"] {
        ingest(&ctx, "s1", event_type).await;
    }

    // No request sent: the handshake times out and the default backfill applies
    let mut ws = connect(&url).await;

    let mut sequences = Vec::new();
    for _ in 0..3 {
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["type"], "event");
        sequences.push(frame["event"]["sequence"].as_u64().unwrap());
    }
    assert_eq!(sequences, vec![1, 2, 3]);
    assert_eq!(next_frame(&mut ws).await, json!({"type": "live", "backfilled": 3}));
}

#[tokio::test]
async fn test_resume_from_cursor_backfills_only_missing_events() {
    let (url, ctx) = boot_server(test_config()).await;
    for _ in 0..5 {
        ingest(&ctx, "s1", "PreToolUse").await;
    }
    ingest(&ctx, "s2", "PreToolUse").await;

    let mut ws = connect(&url).await;
    send_request(
        &mut ws,
        json!({"resume_from": [{"app": "demo", "session_id": "s1", "sequence": 2}]}),
    )
    .await;

    let mut sequences = Vec::new();
    for _ in 0..3 {
        let frame = next_frame(&mut ws).await;
        assert_eq!(frame["event"]["session_id"], "s1");
        sequences.push(frame["event"]["sequence"].as_u64().unwrap());
    }
    assert_eq!(sequences, vec![3, 4, 5]);
    assert_eq!(next_frame(&mut ws).await, json!({"type": "live", "backfilled": 3}));

    // Live delivery continues where backfill stopped
    assert_eq!(ingest(&ctx, "s1", "Stop").await, 6);
    let frame = next_frame(&mut ws).await;
    assert_eq!(frame["event"]["sequence"], 6);
    assert_eq!(frame["session_state"]["status"], "stopped");
}

#[tokio::test]
async fn test_disconnect_unregisters_subscriber() {
    let (url, ctx) = boot_server(test_config()).await;
    let mut ws = connect(&url).await;
    send_request(&mut ws, json!({})).await;
    next_frame(&mut ws).await;
    assert_eq!(ctx.hub.subscriber_count(), 1);

    ws.close(None).await.unwrap();
    drop(ws);

    timeout(TIMEOUT, async {
        while ctx.hub.subscriber_count() > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("subscriber was not unregistered");
}

#[tokio::test]
async fn test_hub_shutdown_closes_stream() {
    let (url, ctx) = boot_server(test_config()).await;
    let mut ws = connect(&url).await;
    send_request(&mut ws, json!({})).await;
    next_frame(&mut ws).await;

    ctx.hub.close_all();

    let closed = timeout(TIMEOUT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return true,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .unwrap();
    assert!(closed);
}
