use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use realtime_stt_gateway::config::Config;
use realtime_stt_gateway::gateway::GatewayState;
use realtime_stt_gateway::recognizer::{self, MockRecognizer, PassthroughDenoiser};
use realtime_stt_gateway::{gateway, stats};
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_thread_ids(true)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .init();

    let config = Config::parse();

    if let Err(e) = config.validate() {
        error!(error = %e, "invalid configuration");
        std::process::exit(2);
    }

    info!(
        listen = config.listen_addr(),
        input_sample_rate = config.input_sample_rate,
        vad_enable = config.vad_enable,
        denoiser_enable = config.denoiser_enable,
        "speech-to-text gateway starting"
    );

    // No real recognizer/denoiser model ships here; this process wires the
    // bundled mocks. A production deployment swaps these for real
    // implementations of the same traits.
    let recognizer: recognizer::SharedRecognizer =
        Arc::new(MockRecognizer::new("transcription unavailable: mock recognizer"));
    let denoiser: Option<recognizer::SharedDenoiser> = if config.denoiser_enable {
        Some(Arc::new(PassthroughDenoiser))
    } else {
        None
    };

    let state = GatewayState::new(config.clone(), recognizer, denoiser);

    let stats_handle = {
        let stats = state.stats.clone();
        let interval = config.stats_interval_secs;
        tokio::spawn(async move {
            stats::stats_reporter(stats, interval).await;
        })
    };

    let server_handle = match gateway::start_gateway_server(&config, state).await {
        Ok((h, _addr)) => h,
        Err(e) => {
            error!(error = %e, "failed to start gateway server");
            std::process::exit(1);
        }
    };

    info!("gateway ready");

    if let Err(e) = server_handle.await {
        error!(error = %e, "gateway server task panicked");
    }
    stats_handle.abort();
    tokio::time::sleep(Duration::from_millis(10)).await;

    Ok(())
}
