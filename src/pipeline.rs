//! Segment Pipeline: optional denoise with a deadline, a strict
//! one-in-flight recognition policy enforced by processing the queue
//! sequentially in a single worker fiber, and a bounded oldest-drop queue
//! for backpressure.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex, Notify};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::error::ErrorKind;
use crate::event::{new_id, ConversationItem, ServerEvent, TranscriptItem};
use crate::recognizer::{SharedDenoiser, SharedRecognizer};
use crate::session::PendingSegment;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_processing_time_ms: u64,
    pub recognizer_timeout_ms: u64,
    pub queue_capacity: usize,
    pub bypass_for_testing: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_processing_time_ms: 50,
            recognizer_timeout_ms: 30_000,
            queue_capacity: 4,
            bypass_for_testing: false,
        }
    }
}

#[derive(Default)]
pub struct PipelineStats {
    pub segments_processed: AtomicU64,
    pub segments_failed: AtomicU64,
    pub denoise_overruns: AtomicU64,
    pub backpressure_drops: AtomicU64,
    pub total_latency_ms: AtomicU64,
}

impl PipelineStats {
    fn record_success(&self, elapsed: Duration) {
        self.segments_processed.fetch_add(1, Ordering::Relaxed);
        self.total_latency_ms
            .fetch_add(elapsed.as_millis() as u64, Ordering::Relaxed);
    }
    fn record_failure(&self) {
        self.segments_failed.fetch_add(1, Ordering::Relaxed);
    }
    fn record_denoise_overrun(&self) {
        self.denoise_overruns.fetch_add(1, Ordering::Relaxed);
    }
    fn record_backpressure(&self) {
        self.backpressure_drops.fetch_add(1, Ordering::Relaxed);
    }

    pub fn average_latency_ms(&self) -> f64 {
        let processed = self.segments_processed.load(Ordering::Relaxed);
        if processed == 0 {
            return 0.0;
        }
        self.total_latency_ms.load(Ordering::Relaxed) as f64 / processed as f64
    }
}

/// One session's recognition pipeline: a bounded queue feeding a single
/// worker fiber, guaranteeing at most one in-flight recognizer call.
pub struct SegmentPipeline {
    queue: Arc<Mutex<VecDeque<PendingSegment>>>,
    notify: Arc<Notify>,
    capacity: usize,
    pub stats: Arc<PipelineStats>,
    worker: JoinHandle<()>,
    in_flight: Arc<AtomicBool>,
}

impl SegmentPipeline {
    pub fn spawn(
        recognizer: SharedRecognizer,
        denoiser: Option<SharedDenoiser>,
        config: PipelineConfig,
        output_tx: mpsc::Sender<ServerEvent>,
    ) -> Self {
        let queue = Arc::new(Mutex::new(VecDeque::new()));
        let notify = Arc::new(Notify::new());
        let stats = Arc::new(PipelineStats::default());
        let in_flight = Arc::new(AtomicBool::new(false));

        let worker = tokio::spawn(Self::worker_loop(
            queue.clone(),
            notify.clone(),
            recognizer,
            denoiser,
            config.clone(),
            output_tx,
            stats.clone(),
            in_flight.clone(),
        ));

        Self {
            queue,
            notify,
            capacity: config.queue_capacity,
            stats,
            worker,
            in_flight,
        }
    }

    /// Enqueue a segment. If the queue is already at capacity the oldest
    /// queued segment is dropped to make room; returns the backpressure
    /// error the caller should surface on the wire in that case.
    pub async fn submit(&self, segment: PendingSegment) -> Option<ErrorKind> {
        let mut q = self.queue.lock().await;
        let dropped = if q.len() >= self.capacity {
            q.pop_front();
            true
        } else {
            false
        };
        q.push_back(segment);
        drop(q);
        self.notify.notify_one();

        if dropped {
            self.stats.record_backpressure();
            Some(ErrorKind::RecognitionBackpressure)
        } else {
            None
        }
    }

    pub fn shutdown(&self) {
        self.worker.abort();
    }

    /// Waits for the queue to drain and the current in-flight recognition
    /// (at most one, per the pipeline's invariant) to finish, up to
    /// `timeout`. Best-effort — on timeout the caller proceeds to close the
    /// session regardless, abandoning whatever is still running.
    pub async fn drain(&self, timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            let idle = self.queue.lock().await.is_empty() && !self.in_flight.load(Ordering::SeqCst);
            if idle || Instant::now() >= deadline {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn worker_loop(
        queue: Arc<Mutex<VecDeque<PendingSegment>>>,
        notify: Arc<Notify>,
        recognizer: SharedRecognizer,
        denoiser: Option<SharedDenoiser>,
        config: PipelineConfig,
        output_tx: mpsc::Sender<ServerEvent>,
        stats: Arc<PipelineStats>,
        in_flight: Arc<AtomicBool>,
    ) {
        loop {
            let segment = {
                let mut q = queue.lock().await;
                q.pop_front()
            };
            let segment = match segment {
                Some(s) => s,
                None => {
                    notify.notified().await;
                    continue;
                }
            };
            in_flight.store(true, Ordering::SeqCst);

            let start = Instant::now();
            let samples = match (&denoiser, config.bypass_for_testing) {
                (Some(d), false) => {
                    match timeout(
                        Duration::from_millis(config.max_processing_time_ms),
                        d.process(&segment.samples, 16000),
                    )
                    .await
                    {
                        Ok(Ok(out)) if !out.is_empty() => out,
                        _ => {
                            stats.record_denoise_overrun();
                            segment.samples.clone()
                        }
                    }
                }
                _ => segment.samples.clone(),
            };

            let item_id = segment.item_id.clone();
            let _ = output_tx
                .send(ServerEvent::ConversationItemCreated {
                    event_id: new_id("evt_"),
                    item: ConversationItem::new(item_id.clone()),
                })
                .await;

            let outcome = timeout(
                Duration::from_millis(config.recognizer_timeout_ms),
                recognizer.transcribe(&samples, 16000),
            )
            .await;
            let elapsed = start.elapsed();

            match outcome {
                Ok(Ok(transcript)) => {
                    stats.record_success(elapsed);
                    let _ = output_tx
                        .send(ServerEvent::TranscriptionCompleted {
                            event_id: new_id("evt_"),
                            item_id: item_id.clone(),
                            item: TranscriptItem::new(item_id, transcript),
                        })
                        .await;
                }
                Ok(Err(message)) => {
                    stats.record_failure();
                    let _ = output_tx
                        .send(ServerEvent::TranscriptionFailed {
                            event_id: new_id("evt_"),
                            item_id,
                            error: ErrorKind::TranscriptionFailed(message).payload(),
                        })
                        .await;
                }
                Err(_) => {
                    stats.record_failure();
                    let _ = output_tx
                        .send(ServerEvent::TranscriptionFailed {
                            event_id: new_id("evt_"),
                            item_id,
                            error: ErrorKind::TranscriptionTimeout.payload(),
                        })
                        .await;
                }
            }
            in_flight.store(false, Ordering::SeqCst);
        }
    }
}

impl Drop for SegmentPipeline {
    fn drop(&mut self) {
        self.worker.abort();
    }
}
