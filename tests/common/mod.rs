//! Shared test harness for end-to-end session protocol tests.
//!
//! Starts the real gateway (axum router, connection supervisor, segment
//! pipeline) on an ephemeral port and drives it with a plain WebSocket
//! client: bind to port 0, hand back the real address, spawn the server in
//! the background.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use realtime_stt_gateway::config::Config;
use realtime_stt_gateway::gateway::{self, GatewayState};
use realtime_stt_gateway::recognizer::{SharedDenoiser, SharedRecognizer};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

pub type TestSocket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub struct TestGateway {
    pub ws_url: String,
    pub state: GatewayState,
    _server: tokio::task::JoinHandle<()>,
}

impl TestGateway {
    /// Starts a gateway with the given collaborators and VAD bypass flag,
    /// bound to `127.0.0.1:0`.
    pub async fn start(
        recognizer: SharedRecognizer,
        denoiser: Option<SharedDenoiser>,
        vad_bypass_for_testing: bool,
    ) -> Self {
        Self::start_with(recognizer, denoiser, |c| {
            c.vad_bypass_for_testing = vad_bypass_for_testing;
        })
        .await
    }

    /// As [`start`], but lets the caller tweak any other `Config` field
    /// (queue capacity, recognizer timeout, max sessions, ...) before the
    /// server binds.
    pub async fn start_with(
        recognizer: SharedRecognizer,
        denoiser: Option<SharedDenoiser>,
        configure: impl FnOnce(&mut Config),
    ) -> Self {
        let mut config = Config::parse_from(["test-gateway", "--host", "127.0.0.1", "--port", "0"]);
        configure(&mut config);
        let state = GatewayState::new(config.clone(), recognizer, denoiser);
        let (handle, addr) = gateway::start_gateway_server(&config, state.clone())
            .await
            .expect("gateway failed to bind");
        Self {
            ws_url: format!("ws://{addr}/v1/realtime"),
            state,
            _server: handle,
        }
    }

    pub async fn connect(&self) -> TestSocket {
        connect(&self.ws_url).await
    }

    pub async fn connect_with_auth(&self, bearer: &str) -> Result<TestSocket, String> {
        use tokio_tungstenite::tungstenite::client::IntoClientRequest;
        let mut request = self.ws_url.clone().into_client_request().unwrap();
        request.headers_mut().insert(
            "Authorization",
            format!("Bearer {bearer}").parse().unwrap(),
        );
        connect_async(request)
            .await
            .map(|(ws, _resp)| ws)
            .map_err(|e| e.to_string())
    }
}

pub async fn connect(url: &str) -> TestSocket {
    let (ws, _response) = connect_async(url).await.expect("failed to connect");
    ws
}

pub async fn send_json(ws: &mut TestSocket, value: Value) {
    ws.send(Message::Text(value.to_string()))
        .await
        .expect("failed to send frame");
}

/// Receives one text frame and parses it as JSON, skipping WS-level
/// ping/pong control frames (the Connection Supervisor's heartbeat fiber
/// uses those, not JSON `heartbeat.*` events, for its keepalive).
pub async fn recv_json(ws: &mut TestSocket) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(5), ws.next())
            .await
            .expect("timed out waiting for a server event")
            .expect("connection closed while waiting for an event")
            .expect("websocket error while waiting for an event");
        match msg {
            Message::Text(t) => return serde_json::from_str(&t).expect("server sent invalid JSON"),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("unexpected non-text frame: {other:?}"),
        }
    }
}

/// Receives events until one of `want_type` is seen, returning it. Panics
/// if `max_events` pass without a match — keeps a misbehaving test from
/// hanging forever on a dropped/missing event.
pub async fn recv_until(ws: &mut TestSocket, want_type: &str, max_events: usize) -> Value {
    for _ in 0..max_events {
        let v = recv_json(ws).await;
        if v["type"] == want_type {
            return v;
        }
    }
    panic!("did not observe a \"{want_type}\" event within {max_events} events");
}

/// Asserts no further text frame arrives within `millis` — used to check a
/// negative (e.g. no `speech_stopped` after a `clear`).
pub async fn expect_no_event_within(ws: &mut TestSocket, millis: u64) {
    let outcome = tokio::time::timeout(Duration::from_millis(millis), ws.next()).await;
    if let Ok(Some(Ok(Message::Text(t)))) = outcome {
        panic!("expected no event, got: {t}");
    }
}

/// Collects the next `n` events verbatim. Useful where two expected events
/// race against each other (e.g. a synchronously-emitted `committed` vs. an
/// asynchronously-emitted pipeline result) and a plain `recv_until` could
/// discard one while scanning past it for the other.
pub async fn collect_events(ws: &mut TestSocket, n: usize) -> Vec<Value> {
    let mut out = Vec::with_capacity(n);
    for _ in 0..n {
        out.push(recv_json(ws).await);
    }
    out
}

pub fn has_type(events: &[Value], want_type: &str) -> bool {
    events.iter().any(|v| v["type"] == want_type)
}

pub fn find_type<'a>(events: &'a [Value], want_type: &str) -> &'a Value {
    events
        .iter()
        .find(|v| v["type"] == want_type)
        .unwrap_or_else(|| panic!("expected a \"{want_type}\" event among {events:?}"))
}

pub fn session_update(body: Value) -> Value {
    json!({ "type": "session.update", "session": body })
}

pub fn append(pcm_bytes: &[u8]) -> Value {
    use base64::Engine;
    json!({
        "type": "input_audio_buffer.append",
        "audio": base64::engine::general_purpose::STANDARD.encode(pcm_bytes),
    })
}

pub fn commit() -> Value {
    json!({ "type": "input_audio_buffer.commit" })
}

pub fn clear() -> Value {
    json!({ "type": "input_audio_buffer.clear" })
}

/// `count` little-endian PCM16 samples at roughly full-scale amplitude —
/// loud enough to clear the default energy-VAD threshold of 0.5.
pub fn loud_pcm16(count: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(count * 2);
    for i in 0..count {
        let sample: i16 = if i % 2 == 0 { 30000 } else { -30000 };
        out.extend_from_slice(&sample.to_le_bytes());
    }
    out
}

/// `count` little-endian PCM16 samples of digital silence.
pub fn silence_pcm16(count: usize) -> Vec<u8> {
    vec![0u8; count * 2]
}
