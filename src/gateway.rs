//! Gateway Frontend: axum router exposing the `/v1/realtime` WebSocket
//! upgrade and a `/health` probe.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tracing::{info, warn};

use crate::config::Config;
use crate::connection::{self, ConnectionParams};
use crate::error::ErrorKind;
use crate::event::new_id;
use crate::recognizer::{SharedDenoiser, SharedRecognizer};
use crate::session::Session;
use crate::stats::GatewayStats;

#[derive(Clone)]
pub struct GatewayState {
    pub config: Arc<Config>,
    pub stats: Arc<GatewayStats>,
    pub recognizer: SharedRecognizer,
    pub denoiser: Option<SharedDenoiser>,
    active_sessions: Arc<AtomicUsize>,
    shutting_down: Arc<AtomicBool>,
}

impl GatewayState {
    pub fn new(
        config: Config,
        recognizer: SharedRecognizer,
        denoiser: Option<SharedDenoiser>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            stats: GatewayStats::new(),
            recognizer,
            denoiser,
            active_sessions: Arc::new(AtomicUsize::new(0)),
            shutting_down: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn active_session_count(&self) -> usize {
        self.active_sessions.load(Ordering::Relaxed)
    }

    /// Begins a graceful shutdown: rejects new upgrades and signals every
    /// active session's monitor fiber to emit `server_shutdown` and close.
    /// Idempotent.
    pub fn begin_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    active_sessions: usize,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

async fn health(State(state): State<GatewayState>) -> impl IntoResponse {
    Json(HealthResponse {
        status: if state.shutting_down.load(Ordering::Relaxed) {
            "shutting_down"
        } else {
            "ok"
        },
        active_sessions: state.active_sessions.load(Ordering::Relaxed),
    })
}

fn bearer_ok(headers: &HeaderMap, expected: &str) -> bool {
    if expected.is_empty() {
        return true;
    }
    let Some(value) = headers.get(axum::http::header::AUTHORIZATION) else {
        return false;
    };
    let Ok(value) = value.to_str() else {
        return false;
    };
    value
        .strip_prefix("Bearer ")
        .map(|token| token == expected)
        .unwrap_or(false)
}

async fn realtime_upgrade(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    if !bearer_ok(&headers, &state.config.api_key) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "invalid or missing bearer token".into(),
            }),
        )
            .into_response();
    }

    if state.shutting_down.load(Ordering::Relaxed) {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorKind::ServerShutdown.payload()),
        )
            .into_response();
    }

    let cap = state.config.max_sessions;
    if cap > 0 && state.active_sessions.load(Ordering::Relaxed) >= cap {
        state.stats.record_session_rejected();
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorKind::CapacityExceeded.payload()),
        )
            .into_response();
    }

    state.active_sessions.fetch_add(1, Ordering::Relaxed);

    ws.on_upgrade(move |socket| async move {
        let session_id = new_id("sess_");
        info!(session = %session_id, "session accepted");

        let session = Session::new_with_defaults(
            session_id.clone(),
            state.config.vad_enable,
            state.config.vad_bypass_for_testing,
            state.config.session_defaults(),
        );
        let params = ConnectionParams {
            heartbeat_interval: Duration::from_secs(state.config.heartbeat_interval_secs),
            session_timeout: Duration::from_secs(state.config.session_timeout_secs),
            write_timeout: Duration::from_secs(state.config.write_timeout_secs),
            pipeline: state.config.pipeline_config(),
            gateway_shutting_down: state.shutting_down.clone(),
            closing_drain_timeout: Duration::from_secs(state.config.closing_drain_timeout_secs),
        };

        connection::run(
            socket,
            session,
            state.recognizer.clone(),
            state.denoiser.clone(),
            params,
            state.stats.clone(),
        )
        .await;

        state.active_sessions.fetch_sub(1, Ordering::Relaxed);
    })
}

pub fn build_router(state: GatewayState) -> Router {
    Router::new()
        .route("/v1/realtime", get(realtime_upgrade))
        .route("/health", get(health))
        .with_state(state)
}

/// Starts the HTTP/WebSocket server, returning its `JoinHandle` and the
/// bound local address (useful in tests, which bind to port 0 and need to
/// know the ephemeral port actually assigned).
pub async fn start_gateway_server(
    config: &Config,
    state: GatewayState,
) -> anyhow::Result<(tokio::task::JoinHandle<()>, std::net::SocketAddr)> {
    let addr = config.listen_addr();
    let listener = TcpListener::bind(&addr).await?;
    let local_addr = listener.local_addr()?;
    info!(addr = %local_addr, "gateway listening");

    let router = build_router(state.clone());
    let shutdown_state = state.clone();

    let handle = tokio::spawn(async move {
        let result = axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                tokio::signal::ctrl_c().await.ok();
                shutdown_state.begin_shutdown();
            })
            .await;
        if let Err(e) = result {
            warn!(error = %e, "gateway server exited with error");
        }
    });

    Ok((handle, local_addr))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bearer_check_allows_anonymous_when_no_key_configured() {
        let headers = HeaderMap::new();
        assert!(bearer_ok(&headers, ""));
    }

    #[test]
    fn bearer_check_rejects_missing_header_when_key_configured() {
        let headers = HeaderMap::new();
        assert!(!bearer_ok(&headers, "secret"));
    }

    #[test]
    fn bearer_check_accepts_matching_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer secret".parse().unwrap(),
        );
        assert!(bearer_ok(&headers, "secret"));
    }

    #[test]
    fn bearer_check_rejects_mismatched_token() {
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            "Bearer wrong".parse().unwrap(),
        );
        assert!(!bearer_ok(&headers, "secret"));
    }
}
