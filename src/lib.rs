//! Real-time speech-to-text gateway core.
//!
//! Exposed as a library, not just a binary, so `tests/` can drive the full
//! session protocol (event codec → session state machine → VAD segmenter →
//! segment pipeline → wire events) over an in-process gateway instead of
//! only unit-testing modules in isolation.

pub mod audio_frame;
pub mod config;
pub mod connection;
pub mod error;
pub mod event;
pub mod gateway;
pub mod pipeline;
pub mod recognizer;
pub mod session;
pub mod stats;
pub mod vad;
pub mod vad_segmenter;
