//! ONNX speaker-embedding backend via pyannote-rs.

use std::path::Path;

use pyannote_rs::EmbeddingExtractor;

use crate::embedder::SpeakerEmbedder;
use streamscribe_foundation::DiarError;

pub struct PyannoteEmbedder {
    extractor: EmbeddingExtractor,
    dim: usize,
}

impl PyannoteEmbedder {
    /// Load an embedding model (e.g. wespeaker/pyannote ONNX export).
    /// `dim` must match the model output (commonly 192 or 256).
    pub fn load(model_path: &Path, dim: usize) -> Result<Self, DiarError> {
        if !model_path.exists() {
            return Err(DiarError::ModelNotFound {
                path: model_path.to_path_buf(),
            });
        }
        let extractor = EmbeddingExtractor::new(model_path)
            .map_err(|e| DiarError::LoadFailed(e.to_string()))?;

        tracing::info!(
            "Speaker embedding model loaded from {} (dim={})",
            model_path.display(),
            dim
        );
        Ok(Self { extractor, dim })
    }
}

impl SpeakerEmbedder for PyannoteEmbedder {
    fn dim(&self) -> usize {
        self.dim
    }

    fn embed(&mut self, samples_16k: &[i16]) -> Result<Vec<f32>, DiarError> {
        let embedding: Vec<f32> = self
            .extractor
            .compute(samples_16k)
            .map_err(|e| DiarError::EmbeddingFailed(e.to_string()))?
            .collect();

        if embedding.len() != self.dim {
            return Err(DiarError::DimensionMismatch {
                expected: self.dim,
                actual: embedding.len(),
            });
        }
        Ok(embedding)
    }
}
