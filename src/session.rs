//! Session data model and Session State Machine.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::audio_frame::AudioFrameBuffer;
use crate::error::ErrorKind;
use crate::vad::EnergyVad;
use crate::vad_segmenter::VadSegmenter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Ready,
    Closing,
    Closed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Modality {
    Audio,
    Text,
    #[serde(rename = "audio+text")]
    AudioText,
}

impl Modality {
    pub fn includes_audio(&self) -> bool {
        matches!(self, Modality::Audio | Modality::AudioText)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioFormat {
    pub codec: String,
    pub sample_rate: u32,
    pub channels: u8,
}

impl Default for AudioFormat {
    fn default() -> Self {
        Self {
            codec: "pcm16".into(),
            sample_rate: 16000,
            channels: 1,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transcription {
    pub model: Option<String>,
    pub language: Option<String>,
}

impl Default for Transcription {
    fn default() -> Self {
        Self {
            model: None,
            language: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TurnDetection {
    #[serde(rename = "type")]
    pub kind: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
}

impl Default for TurnDetection {
    fn default() -> Self {
        Self {
            kind: "server_vad".into(),
            threshold: 0.5,
            prefix_padding_ms: 300,
            silence_duration_ms: 500,
        }
    }
}

/// Partial session configuration as received in `session.update`. Every
/// field is optional; present fields are merged field-wise into the
/// session's current configuration.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionConfigPatch {
    pub modalities: Option<Vec<String>>,
    pub input_audio_format: Option<AudioFormat>,
    pub output_audio_format: Option<AudioFormat>,
    pub input_audio_transcription: Option<Transcription>,
    pub turn_detection: Option<TurnDetection>,
}

/// Read-only view sent to clients in `session.created`/`session.updated`.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub id: String,
    pub status: SessionStatus,
    pub modality: Modality,
    pub input_audio_format: AudioFormat,
    pub output_audio_format: AudioFormat,
    pub transcription: Transcription,
    pub turn_detection: TurnDetection,
    pub created_at: u64,
    pub updated_at: u64,
}

fn unix_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

fn validate_turn_detection(td: &TurnDetection) -> Result<(), ErrorKind> {
    if !(0.0..=1.0).contains(&td.threshold) {
        return Err(ErrorKind::InvalidConfig("threshold must be in [0,1]".into()));
    }
    if td.prefix_padding_ms > 3000 {
        return Err(ErrorKind::InvalidConfig(
            "prefixPaddingMs must be in [0,3000]".into(),
        ));
    }
    if !(100..=10000).contains(&td.silence_duration_ms) {
        return Err(ErrorKind::InvalidConfig(
            "silenceDurationMs must be in [100,10000]".into(),
        ));
    }
    Ok(())
}

fn validate_audio_format(fmt: &AudioFormat) -> Result<(), ErrorKind> {
    if fmt.codec != "pcm16" {
        return Err(ErrorKind::InvalidConfig("codec must be pcm16".into()));
    }
    if fmt.sample_rate != 16000 && fmt.sample_rate != 48000 {
        return Err(ErrorKind::InvalidConfig(
            "sampleRate must be 16000 or 48000".into(),
        ));
    }
    if fmt.channels != 1 {
        return Err(ErrorKind::InvalidConfig("channels must be 1".into()));
    }
    Ok(())
}

/// Per-segment work handed from the Session SM to the Segment Pipeline.
pub struct PendingSegment {
    pub item_id: String,
    pub samples: Vec<f32>,
}

/// Server-side defaults a new session is initialized from, before any
/// `session.update` from the client overrides them. Sourced from `Config`
/// at connection-accept time; a client that never sends `session.update`
/// still gets the operator's configured sample rate, VAD thresholds, and
/// recognizer hints rather than hardcoded wire defaults.
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub input_format: AudioFormat,
    pub output_format: AudioFormat,
    pub turn_detection: TurnDetection,
    pub transcription: Transcription,
    /// Minimum speech run before the VAD opens a segment. Not part of the
    /// `session.update` wire contract; fixed per deployment.
    pub vad_min_speech_ms: u32,
    /// Force-close a segment after this much continuous speech.
    pub vad_max_speech_ms: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            input_format: AudioFormat::default(),
            output_format: AudioFormat::default(),
            turn_detection: TurnDetection::default(),
            transcription: Transcription::default(),
            vad_min_speech_ms: 30,
            vad_max_speech_ms: 30_000,
        }
    }
}

/// Owns one session's full lifecycle: config, audio buffer, VAD segmenter.
/// Exclusively driven by its Connection Supervisor fiber — never shared.
pub struct Session {
    pub id: String,
    pub status: SessionStatus,
    pub modality: Modality,
    pub input_format: AudioFormat,
    pub output_format: AudioFormat,
    pub transcription: Transcription,
    pub turn_detection: TurnDetection,
    pub created_at: u64,
    pub updated_at: u64,

    audio_buffer: AudioFrameBuffer,
    segmenter: VadSegmenter,
    bypass_for_testing: bool,
    /// When `false`, `append_audio` never drives the segmenter — audio only
    /// accumulates in the buffer and segments are produced exclusively by
    /// `commit`'s partial drain. Set once at construction from the gateway's
    /// `vad.enable` config; not changeable from a session.
    vad_enabled: bool,
    vad_min_speech_ms: u32,
    vad_max_speech_ms: u32,
}

impl Session {
    pub fn new(id: String, bypass_for_testing: bool) -> Self {
        Self::new_with_vad(id, true, bypass_for_testing)
    }

    pub fn new_with_vad(id: String, vad_enabled: bool, bypass_for_testing: bool) -> Self {
        Self::new_with_defaults(id, vad_enabled, bypass_for_testing, SessionDefaults::default())
    }

    pub fn new_with_defaults(
        id: String,
        vad_enabled: bool,
        bypass_for_testing: bool,
        defaults: SessionDefaults,
    ) -> Self {
        let now = unix_millis();
        let SessionDefaults {
            input_format,
            output_format,
            turn_detection,
            transcription,
            vad_min_speech_ms,
            vad_max_speech_ms,
        } = defaults;
        Self {
            id,
            status: SessionStatus::Initializing,
            modality: Modality::Audio,
            segmenter: Self::build_segmenter(
                &turn_detection,
                vad_min_speech_ms,
                vad_max_speech_ms,
                bypass_for_testing,
            ),
            audio_buffer: AudioFrameBuffer::new(input_format.sample_rate),
            input_format,
            output_format,
            transcription,
            turn_detection,
            created_at: now,
            updated_at: now,
            bypass_for_testing,
            vad_enabled,
            vad_min_speech_ms,
            vad_max_speech_ms,
        }
    }

    fn build_segmenter(
        td: &TurnDetection,
        min_speech_ms: u32,
        max_speech_ms: u32,
        bypass: bool,
    ) -> VadSegmenter {
        VadSegmenter::new(
            Box::new(EnergyVad::new(
                td.threshold,
                td.silence_duration_ms,
                min_speech_ms,
                max_speech_ms,
            )),
            td.prefix_padding_ms as u64,
            bypass,
        )
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            id: self.id.clone(),
            status: self.status,
            modality: self.modality,
            input_audio_format: self.input_format.clone(),
            output_audio_format: self.output_format.clone(),
            transcription: self.transcription.clone(),
            turn_detection: self.turn_detection.clone(),
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }

    /// §4.5's acceptance matrix: `heartbeat.ping` is accepted in every state
    /// but `closed` (diagnostic only, never gated on session lifecycle);
    /// `session.update` and audio events follow the per-state columns.
    pub fn is_event_allowed(&self, is_audio_event: bool, is_heartbeat: bool) -> bool {
        if is_heartbeat {
            return self.status != SessionStatus::Closed;
        }
        match self.status {
            SessionStatus::Initializing => !is_audio_event,
            SessionStatus::Ready => !is_audio_event || self.modality.includes_audio(),
            SessionStatus::Closing | SessionStatus::Closed => false,
        }
    }

    /// Applies a `session.update` patch. Returns whether any VAD-affecting
    /// field changed (caller resets VAD/audio buffer if so; an in-flight
    /// recognition is left running regardless).
    pub fn apply_update(&mut self, patch: SessionConfigPatch) -> Result<bool, ErrorKind> {
        let mut vad_affecting = false;

        if let Some(fmt) = &patch.input_audio_format {
            validate_audio_format(fmt)?;
        }
        if let Some(fmt) = &patch.output_audio_format {
            validate_audio_format(fmt)?;
        }
        if let Some(td) = &patch.turn_detection {
            validate_turn_detection(td)?;
        }

        if let Some(modalities) = &patch.modalities {
            self.modality = if modalities.iter().any(|m| m == "audio")
                && modalities.iter().any(|m| m == "text")
            {
                Modality::AudioText
            } else if modalities.iter().any(|m| m == "audio") {
                Modality::Audio
            } else {
                Modality::Text
            };
        }
        if let Some(fmt) = patch.input_audio_format {
            if fmt.sample_rate != self.input_format.sample_rate {
                vad_affecting = true;
            }
            self.input_format = fmt;
        }
        if let Some(fmt) = patch.output_audio_format {
            self.output_format = fmt;
        }
        if let Some(t) = patch.input_audio_transcription {
            self.transcription = t;
        }
        if let Some(td) = patch.turn_detection {
            self.turn_detection = td;
            vad_affecting = true;
        }

        if vad_affecting {
            self.audio_buffer = AudioFrameBuffer::new(self.input_format.sample_rate);
            self.segmenter = Self::build_segmenter(
                &self.turn_detection,
                self.vad_min_speech_ms,
                self.vad_max_speech_ms,
                self.bypass_for_testing,
            );
        }

        self.updated_at = unix_millis();
        if self.status == SessionStatus::Initializing {
            self.status = SessionStatus::Ready;
        }
        Ok(vad_affecting)
    }

    /// Appends raw PCM16 bytes and pulls every full frame through the VAD
    /// segmenter, returning any boundary events and segments produced.
    pub fn append_audio(
        &mut self,
        bytes: &[u8],
    ) -> Result<Vec<crate::vad_segmenter::SegmenterOutput>, ErrorKind> {
        self.audio_buffer.append(bytes)?;
        if !self.vad_enabled {
            // VAD disabled for this deployment: audio only accumulates;
            // segmentation happens exclusively via `commit`.
            return Ok(Vec::new());
        }
        let mut outputs = Vec::new();
        while let Some(frame) = self.audio_buffer.pull_frame() {
            outputs.push(self.segmenter.accept(&frame));
        }
        Ok(outputs)
    }

    /// `input_audio_buffer.commit`: resets the VAD and wraps any buffered
    /// partial samples as a synthetic segment, if present.
    pub fn commit(&mut self) -> Option<Vec<f32>> {
        let partial = self.audio_buffer.drain_partial();
        self.segmenter.reset();
        if partial.is_empty() {
            None
        } else {
            Some(partial)
        }
    }

    /// `input_audio_buffer.clear`: drops all buffered audio and VAD state.
    pub fn clear(&mut self) {
        self.audio_buffer.clear();
        self.segmenter.reset();
    }

    pub fn begin_closing(&mut self) {
        self.status = SessionStatus::Closing;
    }

    pub fn close(&mut self) {
        self.status = SessionStatus::Closed;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_session_starts_initializing() {
        let s = Session::new("sess_x".into(), false);
        assert_eq!(s.status, SessionStatus::Initializing);
        assert!(!s.is_event_allowed(true, false), "audio not allowed before configure");
        assert!(s.is_event_allowed(false, false), "non-audio events allowed while initializing");
        assert!(s.is_event_allowed(false, true), "heartbeat allowed while initializing");
    }

    #[test]
    fn valid_update_transitions_to_ready() {
        let mut s = Session::new("sess_x".into(), false);
        let patch = SessionConfigPatch {
            modalities: Some(vec!["audio".into()]),
            ..Default::default()
        };
        s.apply_update(patch).unwrap();
        assert_eq!(s.status, SessionStatus::Ready);
        assert!(s.is_event_allowed(true, false));
    }

    #[test]
    fn heartbeat_allowed_while_closing_but_not_once_closed() {
        let mut s = Session::new("sess_x".into(), false);
        s.begin_closing();
        assert!(s.is_event_allowed(false, true), "heartbeat allowed while closing");
        assert!(!s.is_event_allowed(false, false), "session.update not allowed while closing");
        assert!(!s.is_event_allowed(true, false), "audio not allowed while closing");
        s.close();
        assert!(!s.is_event_allowed(false, true), "heartbeat not allowed once closed");
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut s = Session::new("sess_x".into(), false);
        let patch = SessionConfigPatch {
            turn_detection: Some(TurnDetection {
                threshold: 1.5,
                ..TurnDetection::default()
            }),
            ..Default::default()
        };
        let err = s.apply_update(patch).unwrap_err();
        assert_eq!(err.code(), "invalid_config");
        // Session stays in prior state on a failed update.
        assert_eq!(s.status, SessionStatus::Initializing);
    }

    #[test]
    fn boundary_threshold_values_accepted() {
        let mut s = Session::new("sess_x".into(), false);
        for edge in [0.0, 1.0] {
            let patch = SessionConfigPatch {
                turn_detection: Some(TurnDetection {
                    threshold: edge,
                    ..TurnDetection::default()
                }),
                ..Default::default()
            };
            assert!(s.apply_update(patch).is_ok());
        }
    }

    #[test]
    fn boundary_silence_duration_values() {
        let mut s = Session::new("sess_x".into(), false);
        for (value, ok) in [(99, false), (100, true), (10000, true), (10001, false)] {
            let patch = SessionConfigPatch {
                turn_detection: Some(TurnDetection {
                    silence_duration_ms: value,
                    ..TurnDetection::default()
                }),
                ..Default::default()
            };
            assert_eq!(s.apply_update(patch).is_ok(), ok, "value={value}");
        }
    }

    #[test]
    fn sample_rate_change_is_vad_affecting() {
        let mut s = Session::new("sess_x".into(), false);
        s.apply_update(SessionConfigPatch {
            modalities: Some(vec!["audio".into()]),
            ..Default::default()
        })
        .unwrap();
        let changed = s
            .apply_update(SessionConfigPatch {
                input_audio_format: Some(AudioFormat {
                    sample_rate: 48000,
                    ..AudioFormat::default()
                }),
                ..Default::default()
            })
            .unwrap();
        assert!(changed);
    }

    #[test]
    fn configured_max_speech_ms_forces_a_segment_before_silence() {
        // A deployment-configured max_speech_ms of one frame should force a
        // segment out on the very next frame of continuous loud audio, well
        // before any trailing silence arrives.
        let defaults = SessionDefaults {
            vad_max_speech_ms: 20,
            ..SessionDefaults::default()
        };
        let mut s = Session::new_with_defaults("sess_x".into(), true, false, defaults);
        s.apply_update(SessionConfigPatch {
            modalities: Some(vec!["audio".into()]),
            ..Default::default()
        })
        .unwrap();

        let loud_frame = vec![30000i16; 160];
        let bytes: Vec<u8> = loud_frame.iter().flat_map(|s| s.to_le_bytes()).collect();
        let mut forced = false;
        for _ in 0..10 {
            let outputs = s.append_audio(&bytes).unwrap();
            if outputs.iter().any(|o| o.segment.is_some()) {
                forced = true;
                break;
            }
        }
        assert!(forced, "max_speech_ms should force a segment without silence");
    }

    #[test]
    fn clear_then_clear_is_idempotent() {
        let mut s = Session::new("sess_x".into(), false);
        s.append_audio(&[1, 2, 3, 4]).unwrap();
        s.clear();
        s.clear();
    }

    #[test]
    fn commit_with_no_buffered_audio_returns_none() {
        let mut s = Session::new("sess_x".into(), false);
        assert!(s.commit().is_none());
    }

    #[test]
    fn vad_disabled_never_auto_segments_only_commit_does() {
        let mut s = Session::new_with_vad("sess_x".into(), false, false);
        // Well past one full frame (160 samples) at 16kHz, which would have
        // auto-emitted a segment with VAD enabled.
        let loud_frame_bytes: Vec<u8> = (0..320)
            .flat_map(|_| 30000i16.to_le_bytes())
            .collect();
        let outputs = s.append_audio(&loud_frame_bytes).unwrap();
        assert!(outputs.is_empty());

        let partial = s.commit();
        assert!(partial.is_some());
        assert_eq!(partial.unwrap().len(), 320);
    }
}
