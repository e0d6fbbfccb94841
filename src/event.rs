use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ErrorPayload;
use crate::session::{SessionConfigPatch, SessionSnapshot};

/// Generate an opaque id with the given prefix, e.g. `sess_` or `evt_`.
pub fn new_id(prefix: &str) -> String {
    format!("{prefix}{}", Uuid::new_v4().simple())
}

/// Events a client may send over the session WebSocket.
///
/// Tagged on `type` with dotted, snake_case variant names, matching the
/// OpenAI-Realtime-compatible wire contract.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "session.update")]
    SessionUpdate {
        event_id: Option<String>,
        session: SessionConfigPatch,
    },
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioBufferAppend {
        event_id: Option<String>,
        /// Base64-encoded little-endian PCM16 at the session's declared input rate.
        audio: String,
    },
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioBufferCommit { event_id: Option<String> },
    #[serde(rename = "input_audio_buffer.clear")]
    InputAudioBufferClear { event_id: Option<String> },
    #[serde(rename = "heartbeat.ping")]
    HeartbeatPing {
        event_id: Option<String>,
        heartbeat_type: Option<String>,
    },
}

/// Events the gateway sends back to the client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "session.created")]
    SessionCreated { event_id: String, session: SessionSnapshot },
    #[serde(rename = "session.updated")]
    SessionUpdated { event_id: String, session: SessionSnapshot },
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpeechStarted {
        event_id: String,
        audio_start_ms: u64,
    },
    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpeechStopped { event_id: String, audio_end_ms: u64 },
    #[serde(rename = "input_audio_buffer.committed")]
    InputAudioBufferCommitted { event_id: String },
    #[serde(rename = "input_audio_buffer.cleared")]
    InputAudioBufferCleared { event_id: String },
    #[serde(rename = "conversation.item.created")]
    ConversationItemCreated { event_id: String, item: ConversationItem },
    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    TranscriptionCompleted {
        event_id: String,
        item_id: String,
        item: TranscriptItem,
    },
    #[serde(rename = "conversation.item.input_audio_transcription.failed")]
    TranscriptionFailed {
        event_id: String,
        item_id: String,
        error: ErrorPayload,
    },
    #[serde(rename = "heartbeat.pong")]
    HeartbeatPong {
        event_id: String,
        heartbeat_type: Option<String>,
    },
    #[serde(rename = "error")]
    Error { event_id: String, error: ErrorPayload },
}

/// Conversation item stub created alongside a speech segment, before its
/// transcript is known. Mirrors the OpenAI-Realtime `conversation.item`
/// shape closely enough for a client to key off `item.id`.
#[derive(Debug, Clone, Serialize)]
pub struct ConversationItem {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub role: &'static str,
}

impl ConversationItem {
    pub fn new(id: String) -> Self {
        Self {
            id,
            kind: "message",
            role: "user",
        }
    }
}

/// One transcript content part, per the wire contract's
/// `item.content[0].transcript` shape.
#[derive(Debug, Clone, Serialize)]
pub struct TranscriptContent {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub transcript: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TranscriptItem {
    pub id: String,
    pub content: Vec<TranscriptContent>,
}

impl TranscriptItem {
    pub fn new(id: String, transcript: String) -> Self {
        Self {
            id,
            content: vec![TranscriptContent {
                kind: "input_audio_transcription",
                transcript,
            }],
        }
    }

    /// The `item.content[0].transcript` value.
    pub fn transcript(&self) -> &str {
        self.content
            .first()
            .map(|c| c.transcript.as_str())
            .unwrap_or_default()
    }
}

impl ServerEvent {
    pub fn error(kind: &crate::error::ErrorKind) -> Self {
        ServerEvent::Error {
            event_id: new_id("evt_"),
            error: kind.payload(),
        }
    }
}

/// Decode one incoming WebSocket text frame as a [`ClientEvent`].
///
/// Failures here are always `invalid_event` — unknown `type`, missing
/// required fields, or malformed JSON all collapse to the same wire error.
pub fn decode_client_event(text: &str) -> Result<ClientEvent, crate::error::ErrorKind> {
    serde_json::from_str(text).map_err(|_| crate::error::ErrorKind::InvalidEvent)
}

pub fn encode_server_event(event: &ServerEvent) -> String {
    serde_json::to_string(event).expect("ServerEvent serialization is infallible")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_session_update() {
        let raw = r#"{"type":"session.update","session":{"modalities":["audio"]}}"#;
        let evt = decode_client_event(raw).unwrap();
        assert!(matches!(evt, ClientEvent::SessionUpdate { .. }));
    }

    #[test]
    fn rejects_unknown_type() {
        let raw = r#"{"type":"not.a.real.event"}"#;
        assert_eq!(
            decode_client_event(raw).unwrap_err(),
            crate::error::ErrorKind::InvalidEvent
        );
    }

    #[test]
    fn rejects_malformed_json() {
        let raw = r#"{"type": "session.update", "#;
        assert_eq!(
            decode_client_event(raw).unwrap_err(),
            crate::error::ErrorKind::InvalidEvent
        );
    }

    #[test]
    fn encodes_error_event_with_stable_code() {
        let event = ServerEvent::error(&crate::error::ErrorKind::CapacityExceeded);
        let json = encode_server_event(&event);
        assert!(json.contains("\"code\":\"capacity_exceeded\""));
        assert!(json.contains("\"type\":\"error\""));
    }

    #[test]
    fn ids_are_prefixed_and_unique() {
        let a = new_id("sess_");
        let b = new_id("sess_");
        assert!(a.starts_with("sess_"));
        assert_ne!(a, b);
    }

    #[test]
    fn transcription_completed_nests_transcript_under_item_content() {
        let item = TranscriptItem::new(new_id("item_"), "hello world".into());
        assert_eq!(item.transcript(), "hello world");
        let event = ServerEvent::TranscriptionCompleted {
            event_id: new_id("evt_"),
            item_id: item.id.clone(),
            item,
        };
        let json = encode_server_event(&event);
        assert!(json.contains("\"content\":[{\"type\":\"input_audio_transcription\",\"transcript\":\"hello world\"}]"));
    }
}
