//! Connection Supervisor: one WebSocket connection owns exactly four
//! cooperative fibers — reader, writer, heartbeat, monitor — all cancelled
//! together on the first shutdown trigger.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, Notify};
use tracing::{debug, info, warn};

use crate::error::ErrorKind;
use crate::event::{decode_client_event, encode_server_event, new_id, ClientEvent, ServerEvent};
use crate::pipeline::{PipelineConfig, SegmentPipeline};
use crate::recognizer::{SharedDenoiser, SharedRecognizer};
use crate::session::{PendingSegment, Session};
use crate::stats::GatewayStats;

/// What the writer fiber may be asked to put on the wire.
enum Outbound {
    Event(ServerEvent),
    Ping,
}

/// First-wins shutdown signal shared by all four fibers.
#[derive(Clone)]
struct Shutdown {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Shutdown {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    fn trigger(&self) {
        if !self.flag.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    async fn wait(&self) {
        if !self.is_triggered() {
            self.notify.notified().await;
        }
    }
}

pub struct ConnectionParams {
    pub heartbeat_interval: Duration,
    pub session_timeout: Duration,
    pub write_timeout: Duration,
    pub pipeline: PipelineConfig,
    /// Shared with the Gateway Frontend: flips to `true` once the gateway
    /// has started a graceful shutdown. The monitor fiber polls this
    /// alongside connection health.
    pub gateway_shutting_down: Arc<AtomicBool>,
    /// Bound on how long `closing` waits for the at-most-one in-flight
    /// recognition to finish before the session is force-closed.
    pub closing_drain_timeout: Duration,
}

/// Drives one accepted WebSocket connection end to end. Returns once the
/// session is fully closed and all four fibers have stopped.
pub async fn run(
    socket: WebSocket,
    mut session: Session,
    recognizer: SharedRecognizer,
    denoiser: Option<SharedDenoiser>,
    params: ConnectionParams,
    stats: Arc<GatewayStats>,
) {
    let session_id = session.id.clone();
    let (ws_tx, ws_rx) = socket.split();

    let (outbox_tx, outbox_rx) = mpsc::channel::<Outbound>(1024);
    let (pipeline_evt_tx, mut pipeline_evt_rx) = mpsc::channel::<ServerEvent>(64);

    let pipeline = Arc::new(SegmentPipeline::spawn(
        recognizer,
        denoiser,
        params.pipeline.clone(),
        pipeline_evt_tx,
    ));

    let shutdown = Shutdown::new();
    let transport_failed = Arc::new(AtomicBool::new(false));

    let _ = outbox_tx
        .send(Outbound::Event(ServerEvent::SessionCreated {
            event_id: new_id("evt_"),
            session: session.snapshot(),
        }))
        .await;
    stats.record_session_opened();

    let writer_handle = tokio::spawn(writer_loop(
        ws_tx,
        outbox_rx,
        shutdown.clone(),
        transport_failed.clone(),
        params.write_timeout,
    ));

    let heartbeat_handle = tokio::spawn(heartbeat_loop(
        outbox_tx.clone(),
        params.heartbeat_interval,
        shutdown.clone(),
    ));

    let monitor_handle = tokio::spawn(monitor_loop(
        shutdown.clone(),
        transport_failed.clone(),
        params.gateway_shutting_down.clone(),
        outbox_tx.clone(),
    ));

    // Reader fiber: turns incoming WS frames and pipeline results into
    // outbox messages. It owns `session` exclusively for its lifetime —
    // the only mutator of session state, so no cross-session locking is
    // ever needed.
    let reader_handle = tokio::spawn(async move {
        let mut ws_rx = ws_rx;
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                frame = tokio::time::timeout(params.session_timeout, ws_rx.next()) => {
                    match frame {
                        Err(_) => {
                            let _ = outbox_tx.send(Outbound::Event(ServerEvent::error(&ErrorKind::SessionTimeout))).await;
                            shutdown.trigger();
                            break;
                        }
                        Ok(None) => {
                            transport_failed.store(true, Ordering::SeqCst);
                            break;
                        }
                        Ok(Some(Err(e))) => {
                            warn!(session = %session.id, error = %e, "websocket read error");
                            transport_failed.store(true, Ordering::SeqCst);
                            break;
                        }
                        Ok(Some(Ok(msg))) => {
                            if !handle_inbound(msg, &mut session, &pipeline, &outbox_tx, &stats).await {
                                shutdown.trigger();
                                break;
                            }
                        }
                    }
                }
                Some(evt) = pipeline_evt_rx.recv() => {
                    let _ = outbox_tx.send(Outbound::Event(evt)).await;
                }
            }
        }
        session.begin_closing();
        pipeline.drain(params.closing_drain_timeout).await;
        session.close();
        debug!(session = %session.id, "session closed");
    });

    let _ = tokio::join!(reader_handle, writer_handle, heartbeat_handle, monitor_handle);
    pipeline.shutdown();
    stats.record_session_closed();
    info!(session = %session_id, "connection supervisor stopped");
}

/// Applies one decoded inbound event to the session, emitting any server
/// events it produces. Returns `false` if the connection should close.
async fn handle_inbound(
    msg: Message,
    session: &mut Session,
    pipeline: &Arc<SegmentPipeline>,
    outbox_tx: &mpsc::Sender<Outbound>,
    stats: &Arc<GatewayStats>,
) -> bool {
    let text = match msg {
        Message::Text(t) => t,
        Message::Close(_) => return false,
        Message::Binary(_) => {
            let _ = outbox_tx
                .send(Outbound::Event(ServerEvent::error(&ErrorKind::UnsupportedFrame)))
                .await;
            return true;
        }
        Message::Ping(_) | Message::Pong(_) => return true,
    };

    let event = match decode_client_event(&text) {
        Ok(e) => e,
        Err(kind) => {
            let _ = outbox_tx.send(Outbound::Event(ServerEvent::error(&kind))).await;
            return true;
        }
    };

    let is_audio_event = matches!(
        event,
        ClientEvent::InputAudioBufferAppend { .. }
            | ClientEvent::InputAudioBufferCommit { .. }
            | ClientEvent::InputAudioBufferClear { .. }
    );
    let is_heartbeat = matches!(event, ClientEvent::HeartbeatPing { .. });
    if !session.is_event_allowed(is_audio_event, is_heartbeat) {
        let _ = outbox_tx
            .send(Outbound::Event(ServerEvent::error(&ErrorKind::InvalidState)))
            .await;
        return true;
    }

    match event {
        ClientEvent::SessionUpdate { session: patch, .. } => match session.apply_update(patch) {
            Ok(_) => {
                let _ = outbox_tx
                    .send(Outbound::Event(ServerEvent::SessionUpdated {
                        event_id: new_id("evt_"),
                        session: session.snapshot(),
                    }))
                    .await;
            }
            Err(kind) => {
                let _ = outbox_tx.send(Outbound::Event(ServerEvent::error(&kind))).await;
            }
        },
        ClientEvent::InputAudioBufferAppend { audio, .. } => {
            use base64::Engine;
            let bytes = match base64::engine::general_purpose::STANDARD.decode(audio) {
                Ok(b) => b,
                Err(_) => {
                    let _ = outbox_tx
                        .send(Outbound::Event(ServerEvent::error(&ErrorKind::InvalidEvent)))
                        .await;
                    return true;
                }
            };
            match session.append_audio(&bytes) {
                Ok(outputs) => {
                    for out in outputs {
                        if let Some(ms) = out.speech_started_ms {
                            let _ = outbox_tx
                                .send(Outbound::Event(ServerEvent::SpeechStarted {
                                    event_id: new_id("evt_"),
                                    audio_start_ms: ms,
                                }))
                                .await;
                        }
                        if let Some(segment) = out.segment {
                            if let Some(ms) = out.speech_stopped_ms {
                                let _ = outbox_tx
                                    .send(Outbound::Event(ServerEvent::SpeechStopped {
                                        event_id: new_id("evt_"),
                                        audio_end_ms: ms,
                                    }))
                                    .await;
                            }
                            submit_segment(pipeline, outbox_tx, segment.samples, stats).await;
                        }
                    }
                }
                Err(kind) => {
                    let _ = outbox_tx.send(Outbound::Event(ServerEvent::error(&kind))).await;
                }
            }
        }
        ClientEvent::InputAudioBufferCommit { .. } => {
            if let Some(samples) = session.commit() {
                submit_segment(pipeline, outbox_tx, samples, stats).await;
            }
            let _ = outbox_tx
                .send(Outbound::Event(ServerEvent::InputAudioBufferCommitted {
                    event_id: new_id("evt_"),
                }))
                .await;
        }
        ClientEvent::InputAudioBufferClear { .. } => {
            session.clear();
            let _ = outbox_tx
                .send(Outbound::Event(ServerEvent::InputAudioBufferCleared {
                    event_id: new_id("evt_"),
                }))
                .await;
        }
        ClientEvent::HeartbeatPing { heartbeat_type, .. } => {
            let _ = outbox_tx
                .send(Outbound::Event(ServerEvent::HeartbeatPong {
                    event_id: new_id("evt_"),
                    heartbeat_type,
                }))
                .await;
        }
    }

    true
}

async fn submit_segment(
    pipeline: &Arc<SegmentPipeline>,
    outbox_tx: &mpsc::Sender<Outbound>,
    samples: Vec<f32>,
    stats: &Arc<GatewayStats>,
) {
    if samples.is_empty() {
        return;
    }
    let segment = PendingSegment {
        item_id: new_id("item_"),
        samples,
    };
    if let Some(kind) = pipeline.submit(segment).await {
        stats.record_backpressure();
        let _ = outbox_tx.send(Outbound::Event(ServerEvent::error(&kind))).await;
    }
}

async fn writer_loop(
    mut ws_tx: futures_util::stream::SplitSink<WebSocket, Message>,
    mut outbox_rx: mpsc::Receiver<Outbound>,
    shutdown: Shutdown,
    transport_failed: Arc<AtomicBool>,
    write_timeout: Duration,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            msg = outbox_rx.recv() => {
                let Some(msg) = msg else { break };
                let frame = match msg {
                    Outbound::Event(evt) => Message::Text(encode_server_event(&evt)),
                    Outbound::Ping => Message::Ping(Vec::new()),
                };
                if tokio::time::timeout(write_timeout, ws_tx.send(frame)).await.is_err() {
                    transport_failed.store(true, Ordering::SeqCst);
                    shutdown.trigger();
                    break;
                }
            }
        }
    }
}

async fn heartbeat_loop(outbox_tx: mpsc::Sender<Outbound>, interval: Duration, shutdown: Shutdown) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                if outbox_tx.send(Outbound::Ping).await.is_err() {
                    break;
                }
            }
        }
    }
}

/// Polls connection health every 5s and, while doing so, also watches for a
/// gateway-wide graceful shutdown: on the first tick where it observes one,
/// it surfaces `error{code=server_shutdown}` on this session before
/// triggering the same shutdown path a transport failure would.
async fn monitor_loop(
    shutdown: Shutdown,
    transport_failed: Arc<AtomicBool>,
    gateway_shutting_down: Arc<AtomicBool>,
    outbox_tx: mpsc::Sender<Outbound>,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    loop {
        tokio::select! {
            biased;
            _ = shutdown.wait() => break,
            _ = ticker.tick() => {
                if transport_failed.load(Ordering::SeqCst) {
                    shutdown.trigger();
                    break;
                }
                if gateway_shutting_down.load(Ordering::SeqCst) {
                    let _ = outbox_tx
                        .send(Outbound::Event(ServerEvent::error(&ErrorKind::ServerShutdown)))
                        .await;
                    shutdown.trigger();
                    break;
                }
            }
        }
    }
}
