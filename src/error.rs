use serde::Serialize;
use thiserror::Error;

/// Closed taxonomy of errors the gateway can surface on the wire.
///
/// Every variant maps to exactly one `code` string in the `error` event
/// payload (§7). Recoverable variants never close the session; the three
/// marked below do.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ErrorKind {
    #[error("malformed or unknown event")]
    InvalidEvent,

    #[error("event not valid in current session state")]
    InvalidState,

    #[error("session.update payload failed validation: {0}")]
    InvalidConfig(String),

    #[error("input audio buffer exceeded its capacity")]
    AudioBufferOverflow,

    #[error("recognition queue is full, oldest segment dropped")]
    RecognitionBackpressure,

    #[error("denoiser exceeded its processing deadline")]
    DenoiseOverrun,

    #[error("transcription failed")]
    TranscriptionFailed(String),

    #[error("transcription timed out")]
    TranscriptionTimeout,

    #[error("session was idle past its timeout")]
    SessionTimeout,

    #[error("gateway is at capacity")]
    CapacityExceeded,

    #[error("server is shutting down")]
    ServerShutdown,

    #[error("transport failed")]
    FatalTransport,

    #[error("binary frames are not supported on this endpoint")]
    UnsupportedFrame,
}

impl ErrorKind {
    /// Wire-stable error code. Never renamed across versions.
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidEvent => "invalid_event",
            ErrorKind::InvalidState => "invalid_state",
            ErrorKind::InvalidConfig(_) => "invalid_config",
            ErrorKind::AudioBufferOverflow => "audio_buffer_overflow",
            ErrorKind::RecognitionBackpressure => "recognition_backpressure",
            ErrorKind::DenoiseOverrun => "denoise_overrun",
            ErrorKind::TranscriptionFailed(_) => "transcription_failed",
            ErrorKind::TranscriptionTimeout => "transcription_timeout",
            ErrorKind::SessionTimeout => "session_timeout",
            ErrorKind::CapacityExceeded => "capacity_exceeded",
            ErrorKind::ServerShutdown => "server_shutdown",
            ErrorKind::FatalTransport => "fatal_transport",
            ErrorKind::UnsupportedFrame => "unsupported_frame",
        }
    }

    /// Whether this error terminates the session once reported.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ErrorKind::SessionTimeout | ErrorKind::ServerShutdown | ErrorKind::FatalTransport
        )
    }

    pub fn payload(&self) -> ErrorPayload {
        ErrorPayload {
            r#type: "error",
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// The `error` event body, `{type, code, message}` as required by the wire
/// contract — deliberately not a transparent `Display` of `anyhow::Error`,
/// since clients key off `code`.
#[derive(Debug, Serialize, Clone)]
pub struct ErrorPayload {
    pub r#type: &'static str,
    pub code: &'static str,
    pub message: String,
}
