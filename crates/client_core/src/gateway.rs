use std::{
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use futures::{
    stream::{SplitSink, SplitStream},
    SinkExt, StreamExt,
};
use serde_json::{json, Value};
use shared::protocol::{
    opcode, GatewayEnvelope, HelloPayload, IdentifyPayload, IdentifyProperties, IDENTIFY_INTENTS,
};
use tokio::{net::TcpStream, runtime::Handle, sync::watch};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use crate::error::GatewayError;

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
type WsSource = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// Called synchronously on the read task for every dispatch frame. The
/// callback must only capture the payload and post a task; the read loop has
/// to get back to the socket before the peer decides we are unresponsive.
pub type EventCallback = Arc<dyn Fn(String, Value) + Send + Sync>;

/// Connection lifecycle. There is no reconnect: any failure ends in
/// `Disconnected` permanently and a new `connect` call is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatewayPhase {
    Disconnected,
    Connecting,
    HandshakeWait,
    Live,
}

/// The single persistent gateway connection: one read loop task, one
/// heartbeat loop task, and a mutually exclusive write path shared by both.
pub struct Gateway {
    inner: Arc<GatewayInner>,
    stop: Mutex<Option<watch::Sender<bool>>>,
}

struct GatewayInner {
    handle: Handle,
    callback: EventCallback,
    phase: Mutex<GatewayPhase>,
    /// Bumped for every `connect` call. Connection tasks carry the value they
    /// were spawned with; a task whose generation is no longer current must
    /// not touch the shared phase or writer, or it would tear down the
    /// connection that replaced it.
    generation: AtomicU64,
    identified: AtomicBool,
    /// Last-seen sequence number, echoed in heartbeats. Zero means none
    /// observed yet (backends assign sequences starting at 1).
    last_sequence: AtomicU64,
    /// The transport does not tolerate concurrent writers; every outbound
    /// frame goes through this mutex.
    writer: tokio::sync::Mutex<Option<WsSink>>,
}

impl Gateway {
    pub fn new(handle: Handle, callback: EventCallback) -> Self {
        Self {
            inner: Arc::new(GatewayInner {
                handle,
                callback,
                phase: Mutex::new(GatewayPhase::Disconnected),
                generation: AtomicU64::new(0),
                identified: AtomicBool::new(false),
                last_sequence: AtomicU64::new(0),
                writer: tokio::sync::Mutex::new(None),
            }),
            stop: Mutex::new(None),
        }
    }

    /// Spawns the connection worker. Any I/O failure at any stage transitions
    /// straight to `Disconnected`; no retry is attempted.
    pub fn connect(&self, url: String, token: String) {
        let Some(generation) = self.inner.begin_connect() else {
            warn!("gateway connect ignored: connection already active");
            return;
        };
        self.inner.identified.store(false, Ordering::SeqCst);
        self.inner.last_sequence.store(0, Ordering::SeqCst);

        let (stop_tx, stop_rx) = watch::channel(false);
        *lock_stop(&self.stop) = Some(stop_tx);

        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            let (stream, _) = match connect_async(&url).await {
                Ok(connected) => connected,
                Err(err) => {
                    error!(error = %GatewayError::Connect(err), %url, "gateway connect failed");
                    inner.finish(generation).await;
                    return;
                }
            };
            info!(%url, "gateway transport established");

            let (sink, source) = stream.split();
            {
                let mut writer = inner.writer.lock().await;
                if !inner.is_current(generation) {
                    debug!("connection replaced before the transport came up");
                    return;
                }
                *writer = Some(sink);
            }
            // close() may have raced the connect; do not resurrect the phase.
            if !inner.advance_phase(generation, GatewayPhase::HandshakeWait) {
                debug!("connection closed before the handshake started");
                let mut writer = inner.writer.lock().await;
                if inner.is_current(generation) {
                    *writer = None;
                }
                return;
            }

            inner.read_loop(source, token, stop_rx, generation).await;
            inner.finish(generation).await;
        });
    }

    /// Idempotent teardown: flips the connection to `Disconnected`, stops the
    /// heartbeat loop, and attempts a graceful close frame, swallowing any
    /// error. Duplicate calls are no-ops.
    pub fn close(&self) {
        let generation = self.inner.generation.load(Ordering::SeqCst);
        if !self.inner.deactivate() {
            return;
        }
        if let Some(stop) = lock_stop(&self.stop).take() {
            let _ = stop.send(true);
        }
        let inner = Arc::clone(&self.inner);
        self.inner.handle.spawn(async move {
            let mut writer = inner.writer.lock().await;
            // A replacement connection may already own the writer slot.
            if !inner.is_current(generation) {
                return;
            }
            if let Some(sink) = writer.as_mut() {
                if let Err(err) = sink.send(Message::Close(None)).await {
                    debug!(error = %err, "close frame failed during teardown");
                }
            }
            *writer = None;
        });
    }

    pub fn phase(&self) -> GatewayPhase {
        self.inner.phase()
    }

    pub fn is_connected(&self) -> bool {
        !matches!(self.inner.phase(), GatewayPhase::Disconnected)
    }

    pub fn last_sequence(&self) -> Option<u64> {
        match self.inner.last_sequence.load(Ordering::SeqCst) {
            0 => None,
            seq => Some(seq),
        }
    }
}

impl GatewayInner {
    async fn read_loop(
        self: &Arc<Self>,
        mut source: WsSource,
        token: String,
        stop_rx: watch::Receiver<bool>,
        generation: u64,
    ) {
        while let Some(frame) = source.next().await {
            if !self.is_current(generation) || self.phase() == GatewayPhase::Disconnected {
                break;
            }
            match frame {
                Ok(Message::Text(text)) => {
                    if let Err(err) = self.handle_frame(&text, &token, &stop_rx, generation).await
                    {
                        warn!(error = %err, "skipping malformed gateway frame");
                    }
                }
                Ok(Message::Close(_)) => {
                    info!("gateway closed by peer");
                    break;
                }
                Ok(_) => {}
                Err(err) => {
                    if self.phase() != GatewayPhase::Disconnected {
                        error!(error = %err, "gateway read failed; connection lost");
                    }
                    break;
                }
            }
        }
    }

    async fn handle_frame(
        self: &Arc<Self>,
        text: &str,
        token: &str,
        stop_rx: &watch::Receiver<bool>,
        generation: u64,
    ) -> Result<(), GatewayError> {
        let envelope: GatewayEnvelope = serde_json::from_str(text)?;

        if let Some(sequence) = envelope.s {
            self.last_sequence.store(sequence, Ordering::SeqCst);
        }

        match envelope.op {
            opcode::HELLO => {
                let hello: HelloPayload = serde_json::from_value(envelope.d)?;
                // Identify exactly once per connection, even if the backend
                // repeats HELLO; the heartbeat loop starts alongside it.
                if self.identified.swap(true, Ordering::SeqCst) {
                    debug!("repeated HELLO ignored; already identified");
                    return Ok(());
                }
                info!(
                    heartbeat_interval_ms = hello.heartbeat_interval,
                    "gateway said hello; identifying"
                );

                let heartbeat = Arc::clone(self);
                let interval = Duration::from_millis(hello.heartbeat_interval);
                let stop_rx = stop_rx.clone();
                self.handle.spawn(async move {
                    heartbeat.heartbeat_loop(interval, stop_rx, generation).await
                });

                let identify = IdentifyPayload {
                    token: token.to_string(),
                    intents: IDENTIFY_INTENTS,
                    properties: IdentifyProperties {
                        os: std::env::consts::OS.to_string(),
                        browser: "ferrocord".to_string(),
                        device: "ferrocord".to_string(),
                    },
                };
                self.send_json(&json!({"op": opcode::IDENTIFY, "d": identify}))
                    .await?;
                self.advance_phase(generation, GatewayPhase::Live);
            }
            opcode::HEARTBEAT_ACK => {
                debug!("heartbeat acknowledged");
            }
            opcode::DISPATCH => {
                if let Some(event) = envelope.t {
                    (self.callback)(event, envelope.d);
                }
            }
            other => debug!(op = other, "ignoring gateway op"),
        }
        Ok(())
    }

    /// Sends a heartbeat every negotiated interval until stopped, replaced,
    /// or disconnected. The stop signal is observed both before sleeping and
    /// while asleep, so `close()` never leaves a dangling sender.
    async fn heartbeat_loop(
        self: Arc<Self>,
        interval: Duration,
        mut stop_rx: watch::Receiver<bool>,
        generation: u64,
    ) {
        loop {
            if *stop_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                changed = stop_rx.changed() => {
                    if changed.is_err() || *stop_rx.borrow() {
                        break;
                    }
                    continue;
                }
            }
            if *stop_rx.borrow()
                || !self.is_current(generation)
                || self.phase() == GatewayPhase::Disconnected
            {
                break;
            }

            let payload = match self.last_sequence.load(Ordering::SeqCst) {
                0 => Value::Null,
                seq => json!(seq),
            };
            if let Err(err) = self.send_json(&json!({"op": opcode::HEARTBEAT, "d": payload})).await
            {
                warn!(error = %err, "heartbeat send failed");
            }
        }
        debug!("heartbeat loop stopped");
    }

    async fn send_json(&self, frame: &Value) -> Result<(), GatewayError> {
        let mut writer = self.writer.lock().await;
        let sink = writer.as_mut().ok_or(GatewayError::NotConnected)?;
        sink.send(Message::Text(frame.to_string()))
            .await
            .map_err(GatewayError::Send)
    }

    fn phase(&self) -> GatewayPhase {
        *self.phase.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Claims a fresh connection generation and enters `Connecting`. Returns
    /// `None` when a connection is already active. The generation bump and the
    /// phase change happen under the same lock, so a stale task's `finish`
    /// can never interleave between them.
    fn begin_connect(&self) -> Option<u64> {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase != GatewayPhase::Disconnected {
            return None;
        }
        *phase = GatewayPhase::Connecting;
        Some(self.generation.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Moves the phase forward for one connection generation. Refuses when a
    /// newer connection took over or `close()` already flipped the phase to
    /// `Disconnected`.
    fn advance_phase(&self, generation: u64, next: GatewayPhase) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if !self.is_current(generation) || *phase == GatewayPhase::Disconnected {
            return false;
        }
        *phase = next;
        true
    }

    /// Exit cleanup for a connection task. A stale generation leaves the
    /// successor's phase and writer untouched.
    async fn finish(&self, generation: u64) {
        {
            let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
            if !self.is_current(generation) {
                debug!("stale gateway connection wound down");
                return;
            }
            *phase = GatewayPhase::Disconnected;
        }
        let mut writer = self.writer.lock().await;
        if self.is_current(generation) {
            *writer = None;
        }
        info!("gateway read loop exited");
    }

    /// Marks the connection not-connected. Returns false when it already was,
    /// making `close()` idempotent.
    fn deactivate(&self) -> bool {
        let mut phase = self.phase.lock().unwrap_or_else(PoisonError::into_inner);
        if *phase == GatewayPhase::Disconnected {
            return false;
        }
        *phase = GatewayPhase::Disconnected;
        true
    }
}

fn lock_stop(
    stop: &Mutex<Option<watch::Sender<bool>>>,
) -> std::sync::MutexGuard<'_, Option<watch::Sender<bool>>> {
    stop.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
#[path = "tests/gateway_tests.rs"]
mod tests;
