use crate::error::ErrorKind;

/// Default cap on buffered-but-unconsumed input bytes (~32s @16kHz mono PCM16).
pub const DEFAULT_BUFFER_CAP_BYTES: usize = 1024 * 1024;

/// Samples per VAD frame at the canonical 16kHz rate (10ms).
pub const FRAME_SAMPLES: usize = 160;

/// Convert one little-endian PCM16 sample to float32 in [-1.0, 1.0].
#[inline]
pub fn pcm16_to_f32(sample: i16) -> f32 {
    sample as f32 / 32768.0
}

/// Convert one float32 sample back to little-endian PCM16, clamped.
#[inline]
pub fn f32_to_pcm16(sample: f32) -> i16 {
    (sample.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Decode a little-endian PCM16 byte slice into float32 samples.
pub fn bytes_to_f32(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(2)
        .map(|c| pcm16_to_f32(i16::from_le_bytes([c[0], c[1]])))
        .collect()
}

/// Encode float32 samples back into little-endian PCM16 bytes.
pub fn f32_to_bytes(samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for &s in samples {
        out.extend_from_slice(&f32_to_pcm16(s).to_le_bytes());
    }
    out
}

/// Downsample 48kHz float32 samples to 16kHz by averaging blocks of 3.
///
/// Deliberately block-average rather than interpolate: a live input stream
/// feeding a VAD should not have interpolation's smoothing introduce energy
/// the detector didn't see, and 48000/16000 is an exact integer ratio so
/// block averaging has no remainder to handle.
pub fn downsample_48k_to_16k(samples: &[f32]) -> Vec<f32> {
    samples
        .chunks(3)
        .map(|chunk| chunk.iter().sum::<f32>() / chunk.len() as f32)
        .collect()
}

/// Bounded, append-only PCM16 byte log feeding fixed-size 16kHz frames to
/// the VAD. Frame extraction is destructive: once pulled, bytes are gone.
pub struct AudioFrameBuffer {
    bytes: Vec<u8>,
    cap: usize,
    input_sample_rate: u32,
}

impl AudioFrameBuffer {
    pub fn new(input_sample_rate: u32) -> Self {
        Self::with_capacity(input_sample_rate, DEFAULT_BUFFER_CAP_BYTES)
    }

    pub fn with_capacity(input_sample_rate: u32, cap: usize) -> Self {
        Self {
            bytes: Vec::new(),
            cap,
            input_sample_rate,
        }
    }

    /// Append raw PCM16 bytes from the wire. Rejects odd-length chunks and
    /// enforces the capacity bound.
    pub fn append(&mut self, chunk: &[u8]) -> Result<(), ErrorKind> {
        if chunk.is_empty() {
            return Ok(());
        }
        if chunk.len() % 2 != 0 {
            return Err(ErrorKind::InvalidEvent);
        }
        if self.bytes.len() + chunk.len() > self.cap {
            return Err(ErrorKind::AudioBufferOverflow);
        }
        self.bytes.extend_from_slice(chunk);
        Ok(())
    }

    /// Pull one fixed-size 16kHz frame (160 samples) if enough data is
    /// buffered, converting from the declared input rate. Returns `None`
    /// (not an error) when there isn't yet a full frame.
    pub fn pull_frame(&mut self) -> Option<Vec<f32>> {
        let bytes_per_16k_frame = FRAME_SAMPLES * 2;
        let bytes_needed = match self.input_sample_rate {
            48000 => bytes_per_16k_frame * 3,
            16000 => bytes_per_16k_frame,
            _ => bytes_per_16k_frame,
        };

        if self.bytes.len() < bytes_needed {
            return None;
        }

        let raw: Vec<u8> = self.bytes.drain(0..bytes_needed).collect();
        let samples = bytes_to_f32(&raw);

        Some(match self.input_sample_rate {
            48000 => downsample_48k_to_16k(&samples),
            _ => samples,
        })
    }

    pub fn clear(&mut self) {
        self.bytes.clear();
    }

    pub fn buffered_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Drain and convert whatever partial bytes remain, for `commit`. Does
    /// not require a full frame's worth of data.
    pub fn drain_partial(&mut self) -> Vec<f32> {
        if self.bytes.is_empty() {
            return Vec::new();
        }
        // Drop a single trailing odd byte rather than fail a commit.
        let usable = self.bytes.len() - (self.bytes.len() % 2);
        let raw: Vec<u8> = self.bytes.drain(0..usable).collect();
        let samples = bytes_to_f32(&raw);
        match self.input_sample_rate {
            48000 => downsample_48k_to_16k(&samples),
            _ => samples,
        }
    }
}
