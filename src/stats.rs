use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Lock-free gateway-level counters: connection lifecycle and backpressure.
/// Per-segment latency lives in `pipeline::PipelineStats`, one instance per
/// session; this struct tracks only what's meaningful aggregated across the
/// whole process.
#[derive(Debug)]
pub struct GatewayStats {
    pub sessions_opened: AtomicU64,
    pub sessions_closed: AtomicU64,
    pub sessions_rejected: AtomicU64,
    pub backpressure_events: AtomicU64,
}

impl GatewayStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sessions_opened: AtomicU64::new(0),
            sessions_closed: AtomicU64::new(0),
            sessions_rejected: AtomicU64::new(0),
            backpressure_events: AtomicU64::new(0),
        })
    }

    #[inline(always)]
    pub fn record_session_opened(&self) {
        self.sessions_opened.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_session_closed(&self) {
        self.sessions_closed.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_session_rejected(&self) {
        self.sessions_rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    pub fn record_backpressure(&self) {
        self.backpressure_events.fetch_add(1, Ordering::Relaxed);
    }

    pub fn active_sessions(&self) -> u64 {
        self.sessions_opened
            .load(Ordering::Relaxed)
            .saturating_sub(self.sessions_closed.load(Ordering::Relaxed))
    }

    /// Snapshot and reset the counters that make sense as rates; lifetime
    /// counters (active_sessions) are read directly, not reset.
    pub fn snapshot_and_reset(&self, elapsed: Duration) -> StatsSnapshot {
        let secs = elapsed.as_secs_f64().max(0.001);

        let opened = self.sessions_opened.swap(0, Ordering::Relaxed);
        let closed = self.sessions_closed.swap(0, Ordering::Relaxed);
        let rejected = self.sessions_rejected.swap(0, Ordering::Relaxed);
        let backpressure = self.backpressure_events.swap(0, Ordering::Relaxed);

        StatsSnapshot {
            sessions_opened_per_sec: opened as f64 / secs,
            sessions_closed_per_sec: closed as f64 / secs,
            sessions_rejected: rejected,
            backpressure_events: backpressure,
        }
    }
}

#[derive(Debug)]
pub struct StatsSnapshot {
    pub sessions_opened_per_sec: f64,
    pub sessions_closed_per_sec: f64,
    pub sessions_rejected: u64,
    pub backpressure_events: u64,
}

/// Background stats reporter task, same interval-sleep shape as the
/// teacher's `stats_reporter`.
pub async fn stats_reporter(stats: Arc<GatewayStats>, interval_secs: u64) {
    if interval_secs == 0 {
        std::future::pending::<()>().await;
        return;
    }

    let interval = Duration::from_secs(interval_secs);
    let mut last = Instant::now();

    loop {
        tokio::time::sleep(interval).await;
        let now = Instant::now();
        let elapsed = now - last;
        last = now;

        let snap = stats.snapshot_and_reset(elapsed);
        println!(
            "[STATS] sessions: +{:.1}/s -{:.1}/s active={} | rejected={} backpressure={}",
            snap.sessions_opened_per_sec,
            snap.sessions_closed_per_sec,
            stats.active_sessions(),
            snap.sessions_rejected,
            snap.backpressure_events
        );
    }
}
