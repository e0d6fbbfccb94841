//! Contracts for the external collaborators this gateway calls out to.
//! Neither a real model is bundled; only the trait boundary plus mocks
//! sufficient to drive end-to-end tests.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Transcribes a segment of 16kHz mono float32 samples.
#[async_trait]
pub trait Recognizer: Send + Sync {
    async fn transcribe(&self, samples: &[f32], sample_rate: u32) -> Result<String, String>;
}

/// Applies noise reduction to a segment prior to recognition.
#[async_trait]
pub trait Denoiser: Send + Sync {
    async fn process(&self, samples: &[f32], sample_rate: u32) -> Result<Vec<f32>, String>;
}

/// Canned-response recognizer for development and tests. Can be configured
/// to inject latency and failures to exercise backpressure/timeout paths.
pub struct MockRecognizer {
    transcript: String,
    latency: Duration,
    fail_every: Option<u64>,
    calls: AtomicU64,
}

impl MockRecognizer {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            latency: Duration::ZERO,
            fail_every: None,
            calls: AtomicU64::new(0),
        }
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Fail every Nth call (1-indexed), for backpressure/retry tests.
    pub fn with_failure_every(mut self, n: u64) -> Self {
        self.fail_every = Some(n);
        self
    }

    pub fn call_count(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Recognizer for MockRecognizer {
    async fn transcribe(&self, samples: &[f32], _sample_rate: u32) -> Result<String, String> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let call = self.calls.fetch_add(1, Ordering::Relaxed) + 1;
        if let Some(n) = self.fail_every {
            if call % n == 0 {
                return Err("mock recognizer injected failure".into());
            }
        }
        if samples.is_empty() {
            return Err("empty segment".into());
        }
        Ok(self.transcript.clone())
    }
}

/// Identity transform: forwards samples unchanged.
pub struct PassthroughDenoiser;

#[async_trait]
impl Denoiser for PassthroughDenoiser {
    async fn process(&self, samples: &[f32], _sample_rate: u32) -> Result<Vec<f32>, String> {
        Ok(samples.to_vec())
    }
}

/// Configurable-delay denoiser for exercising the `maxProcessingTimeMs`
/// deadline path in the segment pipeline.
pub struct MockDenoiser {
    pub delay: Duration,
}

impl MockDenoiser {
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl Denoiser for MockDenoiser {
    async fn process(&self, samples: &[f32], _sample_rate: u32) -> Result<Vec<f32>, String> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(samples.to_vec())
    }
}

pub type SharedRecognizer = Arc<dyn Recognizer>;
pub type SharedDenoiser = Arc<dyn Denoiser>;

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mock_recognizer_returns_canned_transcript() {
        let r = MockRecognizer::new("hello world");
        let out = r.transcribe(&[0.1, 0.2], 16000).await.unwrap();
        assert_eq!(out, "hello world");
    }

    #[tokio::test]
    async fn mock_recognizer_fails_on_empty_segment() {
        let r = MockRecognizer::new("x");
        assert!(r.transcribe(&[], 16000).await.is_err());
    }

    #[tokio::test]
    async fn mock_recognizer_injects_periodic_failures() {
        let r = MockRecognizer::new("x").with_failure_every(2);
        assert!(r.transcribe(&[0.1], 16000).await.is_ok());
        assert!(r.transcribe(&[0.1], 16000).await.is_err());
        assert!(r.transcribe(&[0.1], 16000).await.is_ok());
    }

    #[tokio::test]
    async fn passthrough_denoiser_returns_input_unchanged() {
        let d = PassthroughDenoiser;
        let samples = vec![0.1, -0.2, 0.3];
        let out = d.process(&samples, 16000).await.unwrap();
        assert_eq!(out, samples);
    }
}
