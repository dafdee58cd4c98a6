//! Deterministic embedders for offline tests.

use crate::embedder::SpeakerEmbedder;
use streamscribe_foundation::DiarError;

/// Maps a window to a gaussian bump positioned by its zero-crossing
/// rate. Synthetic "voices" with different fundamental periods land at
/// different positions and cluster apart; a window mixing two voices
/// lands proportionally between them, like a real embedding would.
pub struct MockEmbedder {
    dim: usize,
}

impl MockEmbedder {
    pub fn new(dim: usize) -> Self {
        assert!(dim >= 2);
        Self { dim }
    }
}

impl SpeakerEmbedder for MockEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&mut self, samples_16k: &[i16]) -> Result<Vec<f32>, DiarError> {
        if samples_16k.len() < 2 {
            return Err(DiarError::EmbeddingFailed("window too short".into()));
        }

        let crossings = samples_16k
            .windows(2)
            .filter(|w| (w[0] >= 0) != (w[1] >= 0))
            .count();
        let zcr = crossings as f32 / (samples_16k.len() - 1) as f32;

        // Spread plausible rates across the vector; clamp the loudest.
        let pos = (zcr * self.dim as f32 * 2.0).min(self.dim as f32 - 1.0);

        let v = (0..self.dim)
            .map(|i| (-0.5 * (i as f32 - pos).powi(2)).exp())
            .collect();
        Ok(v)
    }
}

/// Always fails; used to exercise the diarization disable path.
pub struct FailingEmbedder;

impl SpeakerEmbedder for FailingEmbedder {
    fn dim(&self) -> usize {
        8
    }

    fn embed(&mut self, _samples_16k: &[i16]) -> Result<Vec<f32>, DiarError> {
        Err(DiarError::EmbeddingFailed("mock failure".into()))
    }
}
