//! VAD Segmenter: drives a `Vad` implementation over incoming frames and
//! turns its segment queue into `speech_started`/`speech_stopped` events
//! with absolute stream offsets.

use crate::vad::{Vad, VadSegment};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Idle,
    Speaking,
}

/// Emitted alongside a segment so the session can turn it into wire events.
pub struct SegmenterOutput {
    pub speech_started_ms: Option<u64>,
    pub speech_stopped_ms: Option<u64>,
    pub segment: Option<VadSegment>,
}

impl SegmenterOutput {
    fn empty() -> Self {
        Self {
            speech_started_ms: None,
            speech_stopped_ms: None,
            segment: None,
        }
    }
}

pub struct VadSegmenter {
    vad: Box<dyn Vad>,
    state: State,
    prefix_padding_ms: u64,
    samples_accepted: u64,
    speech_run_start_samples: u64,
    bypass: bool,
}

const CANONICAL_RATE: u64 = 16_000;

impl VadSegmenter {
    pub fn new(vad: Box<dyn Vad>, prefix_padding_ms: u64, bypass_for_testing: bool) -> Self {
        Self {
            vad,
            state: State::Idle,
            prefix_padding_ms,
            samples_accepted: 0,
            speech_run_start_samples: 0,
            bypass: bypass_for_testing,
        }
    }

    fn samples_to_ms(samples: u64) -> u64 {
        samples * 1000 / CANONICAL_RATE
    }

    /// Feed one frame (already at the canonical 16kHz rate). Returns any
    /// speech_started/speech_stopped boundaries crossed and a popped
    /// segment, if one closed on this call.
    pub fn accept(&mut self, frame: &[f32]) -> SegmenterOutput {
        if frame.is_empty() {
            return SegmenterOutput::empty();
        }

        if self.bypass {
            let samples_before = self.samples_accepted;
            self.samples_accepted += frame.len() as u64;
            return SegmenterOutput {
                speech_started_ms: Some(Self::samples_to_ms(samples_before)),
                speech_stopped_ms: Some(Self::samples_to_ms(self.samples_accepted)),
                segment: Some(VadSegment {
                    samples: frame.to_vec(),
                }),
            };
        }

        let was_speaking = self.vad.is_speech();
        let samples_before = self.samples_accepted;
        self.vad.accept(frame);
        self.samples_accepted += frame.len() as u64;
        let now_speaking = self.vad.is_speech();

        let mut out = SegmenterOutput::empty();

        if !was_speaking && now_speaking && self.state == State::Idle {
            self.state = State::Speaking;
            self.speech_run_start_samples = samples_before;
            let padding_samples = self.prefix_padding_ms * CANONICAL_RATE / 1000;
            let start_samples = samples_before.saturating_sub(padding_samples);
            out.speech_started_ms = Some(Self::samples_to_ms(start_samples));
        }

        if !self.vad.is_empty() {
            if let Some(segment) = self.vad.pop_front() {
                if !segment.samples.is_empty() {
                    out.speech_stopped_ms = Some(Self::samples_to_ms(self.samples_accepted));
                    out.segment = Some(segment);
                }
                self.state = State::Idle;
            }
        }

        out
    }

    /// Explicit reset, e.g. on `input_audio_buffer.clear` or VAD-affecting
    /// `session.update`. Discards any in-progress speech run without
    /// emitting `speech_stopped`.
    pub fn reset(&mut self) {
        self.vad.reset();
        self.state = State::Idle;
    }

    pub fn is_speaking(&self) -> bool {
        self.state == State::Speaking
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::EnergyVad;

    fn segmenter(prefix_padding_ms: u64) -> VadSegmenter {
        VadSegmenter::new(
            Box::new(EnergyVad::new(0.5, 50, 20, 30000)),
            prefix_padding_ms,
            false,
        )
    }

    fn loud() -> Vec<f32> {
        vec![0.9; 160]
    }
    fn quiet() -> Vec<f32> {
        vec![0.0; 160]
    }

    #[test]
    fn emits_started_then_stopped_for_one_utterance() {
        let mut seg = segmenter(0);
        let mut started = false;
        let mut stopped = false;
        for _ in 0..4 {
            let out = seg.accept(&loud());
            if out.speech_started_ms.is_some() {
                started = true;
            }
        }
        for _ in 0..6 {
            let out = seg.accept(&quiet());
            if out.speech_stopped_ms.is_some() {
                stopped = true;
                assert!(out.segment.is_some());
            }
        }
        assert!(started && stopped);
    }

    #[test]
    fn prefix_padding_floors_at_zero() {
        let mut seg = segmenter(5000);
        let out = seg.accept(&loud());
        // samples_before=0, padding way larger than elapsed -> floors at 0
        if let Some(ms) = out.speech_started_ms {
            assert_eq!(ms, 0);
        }
    }

    #[test]
    fn bypass_mode_wraps_every_nonempty_frame_as_a_segment() {
        let mut seg = VadSegmenter::new(Box::new(EnergyVad::new(0.5, 50, 20, 30000)), 0, true);
        let out = seg.accept(&quiet());
        assert!(out.speech_started_ms.is_some());
        assert!(out.speech_stopped_ms.is_some());
        assert!(out.segment.is_some());
    }

    #[test]
    fn empty_frame_is_ignored_not_faulted() {
        let mut seg = segmenter(0);
        let out = seg.accept(&[]);
        assert!(out.segment.is_none());
        assert!(out.speech_started_ms.is_none());
    }

    #[test]
    fn reset_clears_in_progress_speech_without_emitting_stopped() {
        let mut seg = segmenter(0);
        for _ in 0..4 {
            seg.accept(&loud());
        }
        assert!(seg.is_speaking());
        seg.reset();
        assert!(!seg.is_speaking());
    }
}
