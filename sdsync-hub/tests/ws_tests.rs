//! WebSocket end-to-end tests against a real bound server

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use sdsync_hub::{build_router, AppState, HubConfig};
use tokio::net::TcpStream;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Test helper: serve the hub on an ephemeral port
async fn spawn_hub(config: HubConfig) -> (String, AppState) {
    let state = AppState::new(config);
    let app = build_router(state.clone());
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("ws://{}", addr), state)
}

async fn connect(base: &str, path: &str) -> Socket {
    let (socket, _) = connect_async(format!("{}{}", base, path)).await.unwrap();
    socket
}

async fn send(socket: &mut Socket, frame: Value) {
    socket.send(Message::Text(frame.to_string())).await.unwrap();
}

/// Next JSON frame, or `None` once the server closes the socket
async fn next_frame(socket: &mut Socket) -> Option<Value> {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), socket.next())
            .await
            .expect("timed out waiting for frame")?;
        match msg {
            Ok(Message::Text(text)) => return Some(serde_json::from_str(&text).unwrap()),
            Ok(Message::Close(_)) | Err(_) => return None,
            Ok(_) => continue,
        }
    }
}

/// Skip frames until one of `kind` arrives
async fn expect_type(socket: &mut Socket, kind: &str) -> Value {
    loop {
        let frame = next_frame(socket)
            .await
            .unwrap_or_else(|| panic!("socket closed while waiting for {}", kind));
        if frame["type"] == kind {
            return frame;
        }
    }
}

#[tokio::test]
async fn test_operator_drives_listener_over_websocket() {
    let (base, _state) = spawn_hub(HubConfig::default()).await;

    let mut operator = connect(&base, "/ws/session/class-a").await;
    send(&mut operator, json!({"type": "JOIN", "data": {"role": "operator"}})).await;
    expect_type(&mut operator, "STATE_SYNC").await;
    send(
        &mut operator,
        json!({"type": "SESSION_START", "data": {"name": "Class A", "trackList": ["x.mp3"]}}),
    )
    .await;
    expect_type(&mut operator, "SESSION_START").await;

    let mut listener = connect(&base, "/api/ws/session/class-a").await;
    send(&mut listener, json!({"type": "JOIN"})).await;
    let sync = expect_type(&mut listener, "STATE_SYNC").await;
    assert_eq!(sync["data"]["displayName"], "Class A");
    assert_eq!(sync["data"]["playing"], false);
    assert_eq!(sync["data"]["participantCount"], 1);
    let count = expect_type(&mut listener, "PARTICIPANT_COUNT").await;
    assert_eq!(count["data"]["count"], 1);

    send(&mut operator, json!({"type": "PLAY", "data": {}})).await;
    let play = expect_type(&mut listener, "PLAY").await;
    assert_eq!(play["data"]["position"], 0.0);
    assert!(play["data"]["referenceInstant"].is_string());

    send(&mut operator, json!({"type": "SEEK", "data": {"position": 42.0}})).await;
    let seek = expect_type(&mut listener, "SEEK").await;
    assert_eq!(seek["data"]["position"], 42.0);
    assert_eq!(seek["data"]["playing"], true);

    send(&mut operator, json!({"type": "SESSION_END", "data": {}})).await;
    expect_type(&mut listener, "SESSION_END").await;
    assert!(next_frame(&mut listener).await.is_none());
}

#[tokio::test]
async fn test_listener_commands_are_rejected() {
    let (base, state) = spawn_hub(HubConfig::default()).await;
    state.hub.create_session(Some("s1".to_string()), None).await.unwrap();

    let mut listener = connect(&base, "/ws/session/s1").await;
    send(&mut listener, json!({"type": "JOIN", "data": {}})).await;
    expect_type(&mut listener, "STATE_SYNC").await;

    send(&mut listener, json!({"type": "PLAY", "data": {}})).await;
    let error = expect_type(&mut listener, "ERROR").await;
    assert_eq!(error["data"]["code"], "NOT_OPERATOR");
    assert!(!state.hub.state("s1").await.unwrap().playing);
}

#[tokio::test]
async fn test_join_unknown_session_closes_socket() {
    let (base, _state) = spawn_hub(HubConfig::default()).await;

    let mut listener = connect(&base, "/ws/session/missing").await;
    send(&mut listener, json!({"type": "JOIN", "data": {}})).await;
    let error = expect_type(&mut listener, "ERROR").await;
    assert_eq!(error["data"]["code"], "SESSION_NOT_FOUND");
    assert!(next_frame(&mut listener).await.is_none());
}

#[tokio::test]
async fn test_ping_is_answered_with_server_time() {
    let (base, _state) = spawn_hub(HubConfig::default()).await;

    let mut socket = connect(&base, "/ws/session/any").await;
    let client_time = chrono::Utc::now().to_rfc3339();
    send(&mut socket, json!({"type": "PING", "data": {"clientTime": client_time}})).await;
    let pong = expect_type(&mut socket, "PONG").await;
    assert!(pong["data"]["serverTime"].is_string());
    let echoed: chrono::DateTime<chrono::Utc> =
        serde_json::from_value(pong["data"]["clientTime"].clone()).unwrap();
    let sent: chrono::DateTime<chrono::Utc> = client_time.parse().unwrap();
    assert_eq!(echoed, sent);
}

#[tokio::test]
async fn test_connection_without_join_times_out() {
    let config = HubConfig {
        join_timeout_secs: 1,
        ..HubConfig::default()
    };
    let (base, _state) = spawn_hub(config).await;

    let mut socket = connect(&base, "/ws/session/s1").await;
    let error = expect_type(&mut socket, "ERROR").await;
    assert_eq!(error["data"]["code"], "JOIN_TIMEOUT");
    assert!(next_frame(&mut socket).await.is_none());
}

#[tokio::test]
async fn test_listener_disconnect_updates_count() {
    let (base, state) = spawn_hub(HubConfig::default()).await;
    state.hub.create_session(Some("s1".to_string()), None).await.unwrap();

    let mut staying = connect(&base, "/ws/session/s1").await;
    send(&mut staying, json!({"type": "JOIN"})).await;
    expect_type(&mut staying, "STATE_SYNC").await;

    let mut leaving = connect(&base, "/ws/session/s1").await;
    send(&mut leaving, json!({"type": "JOIN"})).await;
    expect_type(&mut leaving, "STATE_SYNC").await;

    let two = expect_type(&mut staying, "PARTICIPANT_COUNT").await;
    let two = if two["data"]["count"] == 1 {
        expect_type(&mut staying, "PARTICIPANT_COUNT").await
    } else {
        two
    };
    assert_eq!(two["data"]["count"], 2);

    leaving.close(None).await.unwrap();
    let one = expect_type(&mut staying, "PARTICIPANT_COUNT").await;
    assert_eq!(one["data"]["count"], 1);
}
