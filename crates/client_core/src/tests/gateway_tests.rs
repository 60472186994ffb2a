use std::sync::Mutex as StdMutex;

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        State,
    },
    response::IntoResponse,
    routing::get,
    Router,
};
use tokio::{
    net::TcpListener,
    sync::mpsc,
    time::{sleep, timeout},
};

use super::*;

/// Scripted gateway backend: frames pushed into the script sender are written
/// to the client; every text frame the client sends is decoded and forwarded
/// to the returned receiver.
struct GatewayHarness {
    url: String,
    script: mpsc::UnboundedSender<String>,
    frames: mpsc::UnboundedReceiver<Value>,
}

#[derive(Clone)]
struct HarnessState {
    script: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>>,
    frames: mpsc::UnboundedSender<Value>,
}

async fn handle_upgrade(State(state): State<HarnessState>, ws: WebSocketUpgrade) -> impl IntoResponse {
    ws.on_upgrade(move |socket| drive_socket(socket, state))
}

async fn drive_socket(socket: WebSocket, state: HarnessState) {
    let (mut sender, mut receiver) = socket.split();
    let mut script = state
        .script
        .lock()
        .await
        .take()
        .expect("harness accepts a single connection");

    let writer = tokio::spawn(async move {
        while let Some(frame) = script.recv().await {
            if sender.send(WsMessage::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            WsMessage::Text(text) => {
                if let Ok(value) = serde_json::from_str::<Value>(&text) {
                    let _ = state.frames.send(value);
                }
            }
            WsMessage::Close(_) => break,
            _ => {}
        }
    }
    writer.abort();
}

async fn spawn_gateway_server() -> GatewayHarness {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let (script_tx, script_rx) = mpsc::unbounded_channel();
    let (frames_tx, frames_rx) = mpsc::unbounded_channel();
    let state = HarnessState {
        script: Arc::new(tokio::sync::Mutex::new(Some(script_rx))),
        frames: frames_tx,
    };
    let app = Router::new().route("/", get(handle_upgrade)).with_state(state);
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    GatewayHarness {
        url: format!("ws://{addr}/"),
        script: script_tx,
        frames: frames_rx,
    }
}

fn hello(heartbeat_interval: u64) -> String {
    json!({"op": 10, "d": {"heartbeat_interval": heartbeat_interval}}).to_string()
}

fn dispatch(sequence: Option<u64>, event: &str, data: Value) -> String {
    json!({"op": 0, "s": sequence, "t": event, "d": data}).to_string()
}

async fn next_frame(harness: &mut GatewayHarness) -> Value {
    timeout(Duration::from_secs(5), harness.frames.recv())
        .await
        .expect("frame within deadline")
        .expect("socket still open")
}

fn noop_callback() -> EventCallback {
    Arc::new(|_, _| {})
}

#[tokio::test]
async fn identify_is_sent_once_after_the_first_hello() {
    let mut harness = spawn_gateway_server().await;
    let gateway = Gateway::new(Handle::current(), noop_callback());
    gateway.connect(harness.url.clone(), "token-abc".into());

    harness.script.send(hello(45_000)).expect("script");
    harness.script.send(hello(45_000)).expect("script");

    let identify = next_frame(&mut harness).await;
    assert_eq!(identify["op"], 2);
    assert_eq!(identify["d"]["token"], "token-abc");
    assert_eq!(identify["d"]["intents"], 33_280);
    assert_eq!(identify["d"]["properties"]["$device"], "ferrocord");

    // The repeated HELLO must not trigger a second identify; with a 45s
    // heartbeat interval no other frame is due either.
    assert!(
        timeout(Duration::from_millis(300), harness.frames.recv())
            .await
            .is_err(),
        "no further frame expected after duplicate HELLO"
    );

    gateway.close();
}

#[tokio::test]
async fn heartbeats_carry_the_last_seen_sequence() {
    let mut harness = spawn_gateway_server().await;
    let gateway = Gateway::new(Handle::current(), noop_callback());
    gateway.connect(harness.url.clone(), "t".into());

    harness.script.send(hello(100)).expect("script");
    let identify = next_frame(&mut harness).await;
    assert_eq!(identify["op"], 2);

    // First heartbeat fires before any sequence was observed.
    let first = next_frame(&mut harness).await;
    assert_eq!(first["op"], 1);
    assert!(first["d"].is_null());

    harness
        .script
        .send(dispatch(Some(7), "MESSAGE_CREATE", json!({})))
        .expect("script");

    // Subsequent heartbeats echo the sequence once the dispatch is processed.
    let mut echoed = false;
    for _ in 0..20 {
        let frame = next_frame(&mut harness).await;
        assert_eq!(frame["op"], 1);
        if frame["d"] == json!(7) {
            echoed = true;
            break;
        }
        assert!(frame["d"].is_null());
    }
    assert!(echoed, "heartbeat never echoed sequence 7");

    gateway.close();
}

#[tokio::test]
async fn sequence_tracking_keeps_the_latest_and_ignores_missing_fields() {
    let mut harness = spawn_gateway_server().await;
    let seen: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let gateway = Gateway::new(
        Handle::current(),
        Arc::new(move |event, _| sink.lock().expect("seen").push(event)),
    );
    gateway.connect(harness.url.clone(), "t".into());

    harness.script.send(hello(60_000)).expect("script");
    let identify = next_frame(&mut harness).await;
    assert_eq!(identify["op"], 2);
    assert!(gateway.last_sequence().is_none());

    harness
        .script
        .send(dispatch(Some(1), "A", json!({})))
        .expect("script");
    harness
        .script
        .send(dispatch(Some(5), "B", json!({})))
        .expect("script");
    harness
        .script
        .send(dispatch(None, "C", json!({})))
        .expect("script");

    // Wait until all three dispatches went through the callback.
    for _ in 0..100 {
        if seen.lock().expect("seen").len() == 3 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(*seen.lock().expect("seen"), vec!["A", "B", "C"]);
    assert_eq!(gateway.last_sequence(), Some(5));

    gateway.close();
}

#[tokio::test]
async fn close_stops_heartbeats_and_is_idempotent() {
    let mut harness = spawn_gateway_server().await;
    let gateway = Gateway::new(Handle::current(), noop_callback());
    gateway.connect(harness.url.clone(), "t".into());

    harness.script.send(hello(50)).expect("script");
    let identify = next_frame(&mut harness).await;
    assert_eq!(identify["op"], 2);
    let heartbeat = next_frame(&mut harness).await;
    assert_eq!(heartbeat["op"], 1);

    gateway.close();
    gateway.close();
    assert!(!gateway.is_connected());

    // Drain anything already in flight, then require silence for several
    // heartbeat intervals.
    sleep(Duration::from_millis(100)).await;
    while harness.frames.try_recv().is_ok() {}
    assert!(
        timeout(Duration::from_millis(300), harness.frames.recv())
            .await
            .is_err(),
        "heartbeats must stop after close"
    );
}

#[tokio::test]
async fn connect_failure_ends_disconnected_without_retry() {
    // Nothing listens on this port; connect must fail and settle.
    let gateway = Gateway::new(Handle::current(), noop_callback());
    gateway.connect("ws://127.0.0.1:1/".into(), "t".into());

    for _ in 0..100 {
        if gateway.phase() == GatewayPhase::Disconnected && !gateway.is_connected() {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(gateway.phase(), GatewayPhase::Disconnected);

    // close() on an already-failed connection is a harmless no-op.
    gateway.close();
}

#[tokio::test]
async fn a_replacement_connection_survives_the_old_ones_teardown() {
    let mut first = spawn_gateway_server().await;
    let mut second = spawn_gateway_server().await;
    let gateway = Gateway::new(Handle::current(), noop_callback());

    gateway.connect(first.url.clone(), "t".into());
    first.script.send(hello(60_000)).expect("script");
    let identify = next_frame(&mut first).await;
    assert_eq!(identify["op"], 2);

    // Close and immediately reconnect; the first connection's tasks are
    // still winding down while the second one comes up.
    gateway.close();
    gateway.connect(second.url.clone(), "t".into());
    second.script.send(hello(100)).expect("script");
    let identify = next_frame(&mut second).await;
    assert_eq!(identify["op"], 2);
    assert_eq!(gateway.phase(), GatewayPhase::Live);

    // Wake whatever is left of the first read loop so its exit cleanup runs.
    let _ = first.script.send(dispatch(Some(1), "STALE", json!({})));
    sleep(Duration::from_millis(300)).await;

    // The stale cleanup must not flip the phase or drop the new write path.
    assert_eq!(gateway.phase(), GatewayPhase::Live);
    while second.frames.try_recv().is_ok() {}
    let heartbeat = next_frame(&mut second).await;
    assert_eq!(heartbeat["op"], 1);

    gateway.close();
}

#[tokio::test]
async fn dispatch_callback_receives_events_in_arrival_order() {
    let mut harness = spawn_gateway_server().await;
    let seen: Arc<StdMutex<Vec<(String, Value)>>> = Arc::new(StdMutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let gateway = Gateway::new(
        Handle::current(),
        Arc::new(move |event, data| sink.lock().expect("seen").push((event, data))),
    );
    gateway.connect(harness.url.clone(), "t".into());

    harness.script.send(hello(60_000)).expect("script");
    let identify = next_frame(&mut harness).await;
    assert_eq!(identify["op"], 2);

    for n in 0..5u64 {
        harness
            .script
            .send(dispatch(Some(n + 1), "MESSAGE_CREATE", json!({"n": n})))
            .expect("script");
    }
    // Malformed frame in between is skipped without killing the loop.
    harness.script.send("{not json".into()).expect("script");
    harness
        .script
        .send(dispatch(Some(9), "LAST", json!({})))
        .expect("script");

    for _ in 0..100 {
        if seen.lock().expect("seen").len() == 6 {
            break;
        }
        sleep(Duration::from_millis(20)).await;
    }
    let events = seen.lock().expect("seen");
    assert_eq!(events.len(), 6);
    for (index, (event, data)) in events.iter().take(5).enumerate() {
        assert_eq!(event, "MESSAGE_CREATE");
        assert_eq!(data["n"], index as u64);
    }
    assert_eq!(events[5].0, "LAST");
    drop(events);

    gateway.close();
}
