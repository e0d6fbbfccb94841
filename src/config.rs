use clap::Parser;

/// Real-time speech-to-text gateway: terminates OpenAI-Realtime-compatible
/// WebSocket sessions, runs server-side VAD/segmentation, and dispatches
/// speech segments to a recognizer.
#[derive(Parser, Debug, Clone)]
#[command(author, version, about)]
pub struct Config {
    // ── Connection ──────────────────────────────────────────────────────
    /// Listen address
    #[arg(long, default_value = "0.0.0.0")]
    pub host: String,

    /// HTTP/WebSocket listen port
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Heartbeat (WS ping) interval in seconds
    #[arg(long, default_value_t = 15)]
    pub heartbeat_interval_secs: u64,

    /// Idle session timeout in seconds (no event received)
    #[arg(long, default_value_t = 1800)]
    pub session_timeout_secs: u64,

    /// Maximum concurrent sessions (0 = unlimited)
    #[arg(long, default_value_t = 0)]
    pub max_sessions: usize,

    /// Bearer API key required on `/v1/realtime` (empty = no auth)
    #[arg(long, env = "GATEWAY_API_KEY", default_value = "")]
    pub api_key: String,

    /// WebSocket write timeout in seconds
    #[arg(long, default_value_t = 10)]
    pub write_timeout_secs: u64,

    /// Bound on how long a closing session waits for its at-most-one
    /// in-flight recognition to finish before being force-closed
    #[arg(long, default_value_t = 5)]
    pub closing_drain_timeout_secs: u64,

    // ── Audio format ────────────────────────────────────────────────────
    /// Declared input sample rate (16000 or 48000)
    #[arg(long, default_value_t = 16000)]
    pub input_sample_rate: u32,

    /// Declared output sample rate
    #[arg(long, default_value_t = 16000)]
    pub output_sample_rate: u32,

    /// Input channel count (must be 1)
    #[arg(long, default_value_t = 1)]
    pub channels: u8,

    // ── VAD ─────────────────────────────────────────────────────────────
    /// Enable server-side VAD segmentation (disabling requires `commit` to segment audio)
    #[arg(long, default_value_t = true)]
    pub vad_enable: bool,

    /// Energy threshold in [0,1] above which a frame is considered speech
    #[arg(long, default_value_t = 0.5)]
    pub vad_threshold: f32,

    /// Minimum trailing silence before closing a segment
    #[arg(long, default_value_t = 500)]
    pub vad_min_silence_ms: u32,

    /// Minimum speech run before opening a segment
    #[arg(long, default_value_t = 30)]
    pub vad_min_speech_ms: u32,

    /// Force-close a segment after this much continuous speech
    #[arg(long, default_value_t = 30_000)]
    pub vad_max_speech_ms: u32,

    /// Leading padding prepended to `audio_start_ms` on speech_started
    #[arg(long, default_value_t = 300)]
    pub vad_prefix_padding_ms: u32,

    /// Bypass the VAD state machine and wrap every frame as a segment (tests)
    #[arg(long, default_value_t = false)]
    pub vad_bypass_for_testing: bool,

    // ── Denoiser ────────────────────────────────────────────────────────
    /// Enable the denoise step of the segment pipeline
    #[arg(long, default_value_t = false)]
    pub denoiser_enable: bool,

    /// Denoise deadline; overruns fall back to the original samples
    #[arg(long, default_value_t = 50)]
    pub denoiser_max_processing_time_ms: u64,

    /// Bypass the denoise step even when enabled, forwarding samples
    /// unchanged (tests)
    #[arg(long, default_value_t = false)]
    pub denoiser_bypass_for_testing: bool,

    // ── Recognizer ──────────────────────────────────────────────────────
    /// Recognizer model identifier (opaque to the core, passed through)
    #[arg(long, default_value = "mock")]
    pub recognizer_model: String,

    /// Recognizer language hint (opaque to the core)
    #[arg(long, default_value = "en")]
    pub recognizer_language: String,

    /// Recognizer call timeout in milliseconds
    #[arg(long, default_value_t = 30_000)]
    pub recognizer_timeout_ms: u64,

    /// Bounded recognition queue depth per session (oldest-drop on overflow)
    #[arg(long, default_value_t = 4)]
    pub recognizer_queue_capacity: usize,

    // ── Observability ───────────────────────────────────────────────────
    /// Stats logging interval in seconds (0 = disabled)
    #[arg(long, default_value_t = 30)]
    pub stats_interval_secs: u64,
}

impl Config {
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.input_sample_rate != 16000 && self.input_sample_rate != 48000 {
            anyhow::bail!("input_sample_rate must be 16000 or 48000");
        }
        if self.channels != 1 {
            anyhow::bail!("channels must be 1");
        }
        if !(0.0..=1.0).contains(&self.vad_threshold) {
            anyhow::bail!("vad_threshold must be in [0,1]");
        }
        if !(100..=10_000).contains(&self.vad_min_silence_ms) {
            anyhow::bail!("vad_min_silence_ms must be in [100,10000]");
        }
        if self.vad_prefix_padding_ms > 3000 {
            anyhow::bail!("vad_prefix_padding_ms must be in [0,3000]");
        }
        Ok(())
    }

    pub fn pipeline_config(&self) -> crate::pipeline::PipelineConfig {
        crate::pipeline::PipelineConfig {
            max_processing_time_ms: self.denoiser_max_processing_time_ms,
            recognizer_timeout_ms: self.recognizer_timeout_ms,
            queue_capacity: self.recognizer_queue_capacity,
            bypass_for_testing: self.denoiser_bypass_for_testing,
        }
    }

    /// The config a new session is initialized from, before any
    /// `session.update` overrides it.
    pub fn session_defaults(&self) -> crate::session::SessionDefaults {
        use crate::session::{AudioFormat, Transcription, TurnDetection};

        crate::session::SessionDefaults {
            input_format: AudioFormat {
                codec: "pcm16".into(),
                sample_rate: self.input_sample_rate,
                channels: self.channels,
            },
            output_format: AudioFormat {
                codec: "pcm16".into(),
                sample_rate: self.output_sample_rate,
                channels: self.channels,
            },
            turn_detection: TurnDetection {
                kind: "server_vad".into(),
                threshold: self.vad_threshold,
                prefix_padding_ms: self.vad_prefix_padding_ms,
                silence_duration_ms: self.vad_min_silence_ms,
            },
            transcription: Transcription {
                model: Some(self.recognizer_model.clone()),
                language: Some(self.recognizer_language.clone()),
            },
            vad_min_speech_ms: self.vad_min_speech_ms,
            vad_max_speech_ms: self.vad_max_speech_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> Config {
        Config::parse_from(["gateway"])
    }

    #[test]
    fn default_config_validates() {
        assert!(base().validate().is_ok());
    }

    #[test]
    fn rejects_bad_sample_rate() {
        let mut c = base();
        c.input_sample_rate = 44100;
        assert!(c.validate().is_err());
    }

    #[test]
    fn session_defaults_carry_configured_values_through() {
        let mut c = base();
        c.input_sample_rate = 48000;
        c.vad_threshold = 0.7;
        c.vad_min_speech_ms = 60;
        c.vad_max_speech_ms = 15_000;
        c.recognizer_model = "whisper-large".into();

        let defaults = c.session_defaults();
        assert_eq!(defaults.input_format.sample_rate, 48000);
        assert_eq!(defaults.turn_detection.threshold, 0.7);
        assert_eq!(defaults.vad_min_speech_ms, 60);
        assert_eq!(defaults.vad_max_speech_ms, 15_000);
        assert_eq!(defaults.transcription.model.as_deref(), Some("whisper-large"));
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut c = base();
        c.vad_threshold = 1.5;
        assert!(c.validate().is_err());
    }
}
