//! Voice activity detection.
//!
//! `Vad` is the trait boundary the segmenter (`vad_segmenter.rs`) drives; the
//! segmenter never inspects a frame directly. `EnergyVad` is the default,
//! bundled implementation — generalized from the RMS-energy classifier this
//! crate used to run per-packet (`compute_rms_energy`) into a stateful
//! detector with hysteresis, so a real model-based VAD can later implement
//! the same trait without touching the segmenter.

/// One detected speech segment, in the canonical 16kHz mono domain.
#[derive(Debug, Clone, Default)]
pub struct VadSegment {
    pub samples: Vec<f32>,
}

/// Contract the VAD segmenter drives. Implementations are frame-at-a-time:
/// callers push frames via `accept`, then poll `is_speech`/segment queue.
pub trait Vad: Send {
    /// Feed one frame (canonical 16kHz, `FRAME_SAMPLES` long) to the detector.
    fn accept(&mut self, frame: &[f32]);

    /// Whether the detector currently considers itself mid-speech.
    fn is_speech(&self) -> bool;

    /// Whether there is a completed segment ready to pop.
    fn is_empty(&self) -> bool;

    /// Pop the oldest completed segment, if any.
    fn pop_front(&mut self) -> Option<VadSegment>;

    /// Discard all in-progress state and queued segments.
    fn reset(&mut self);
}

/// RMS-energy threshold detector with hysteresis, grounded on this crate's
/// original `compute_rms_energy`/`VAD_ENERGY_THRESHOLD` audio path.
pub struct EnergyVad {
    threshold: f32,
    min_silence_frames: u32,
    min_speech_frames: u32,
    max_speech_frames: u32,

    speaking: bool,
    silence_run: u32,
    speech_run: u32,
    current: Vec<f32>,
    queue: std::collections::VecDeque<VadSegment>,
}

/// Frame period in ms, fixed at the canonical 10ms/160-sample frame size.
const FRAME_MS: u32 = 10;

impl EnergyVad {
    pub fn new(threshold: f32, min_silence_ms: u32, min_speech_ms: u32, max_speech_ms: u32) -> Self {
        Self {
            threshold: threshold.clamp(0.0, 1.0),
            min_silence_frames: (min_silence_ms / FRAME_MS).max(1),
            min_speech_frames: (min_speech_ms / FRAME_MS).max(1),
            max_speech_frames: (max_speech_ms / FRAME_MS).max(1),
            speaking: false,
            silence_run: 0,
            speech_run: 0,
            current: Vec::new(),
            queue: std::collections::VecDeque::new(),
        }
    }

    fn frame_energy(frame: &[f32]) -> f32 {
        if frame.is_empty() {
            return 0.0;
        }
        let sum_sq: f32 = frame.iter().map(|s| s * s).sum();
        (sum_sq / frame.len() as f32).sqrt()
    }

    fn close_segment(&mut self) {
        if !self.current.is_empty() {
            self.queue.push_back(VadSegment {
                samples: std::mem::take(&mut self.current),
            });
        }
        self.speaking = false;
        self.speech_run = 0;
        self.silence_run = 0;
    }
}

impl Vad for EnergyVad {
    fn accept(&mut self, frame: &[f32]) {
        if frame.is_empty() {
            return;
        }
        let loud = Self::frame_energy(frame) >= self.threshold;

        if loud {
            self.silence_run = 0;
            self.speech_run += 1;
            if self.speaking || self.speech_run >= self.min_speech_frames {
                self.speaking = true;
                self.current.extend_from_slice(frame);
                if self.speech_run >= self.max_speech_frames {
                    self.close_segment();
                }
            }
        } else if self.speaking {
            self.silence_run += 1;
            self.current.extend_from_slice(frame);
            if self.silence_run >= self.min_silence_frames {
                self.close_segment();
            }
        } else {
            self.speech_run = 0;
        }
    }

    fn is_speech(&self) -> bool {
        self.speaking
    }

    fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    fn pop_front(&mut self) -> Option<VadSegment> {
        self.queue.pop_front()
    }

    fn reset(&mut self) {
        self.speaking = false;
        self.silence_run = 0;
        self.speech_run = 0;
        self.current.clear();
        self.queue.clear();
    }
}
