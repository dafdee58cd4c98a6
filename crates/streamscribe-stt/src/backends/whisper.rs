//! whisper.cpp ASR backend via the whisper-rs bindings.

use std::path::Path;

use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::backend::AsrBackend;
use crate::types::AsrSegment;
use streamscribe_foundation::SttError;

pub struct WhisperBackend {
    ctx: WhisperContext,
    language: String,
    n_threads: i32,
}

impl WhisperBackend {
    /// Load a ggml model. `n_threads == 0` lets whisper pick.
    pub fn load(model_path: &Path, language: &str, n_threads: usize) -> Result<Self, SttError> {
        if !model_path.exists() {
            return Err(SttError::ModelNotFound {
                path: model_path.to_path_buf(),
            });
        }

        let ctx = WhisperContext::new_with_params(
            &model_path.to_string_lossy(),
            WhisperContextParameters::default(),
        )
        .map_err(|e| SttError::LoadFailed(e.to_string()))?;

        let n_threads = if n_threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get() as i32)
                .unwrap_or(4)
        } else {
            n_threads as i32
        };

        tracing::info!(
            "Whisper model loaded from {} (language={}, threads={})",
            model_path.display(),
            language,
            n_threads
        );

        Ok(Self {
            ctx,
            language: language.to_string(),
            n_threads,
        })
    }
}

impl AsrBackend for WhisperBackend {
    fn transcribe(&mut self, samples_16k: &[i16]) -> Result<Vec<AsrSegment>, SttError> {
        let mut audio = vec![0.0f32; samples_16k.len()];
        whisper_rs::convert_integer_to_float_audio(samples_16k, &mut audio)
            .map_err(|e| SttError::TranscriptionFailed(e.to_string()))?;

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| SttError::TranscriptionFailed(e.to_string()))?;

        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.n_threads);
        params.set_language(Some(&self.language));
        params.set_print_special(false);
        params.set_print_progress(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);

        state
            .full(params, &audio)
            .map_err(|e| SttError::TranscriptionFailed(e.to_string()))?;

        let num_segments = state.full_n_segments();
        let mut segments = Vec::with_capacity(num_segments as usize);

        for i in 0..num_segments {
            let Some(segment) = state.get_segment(i) else {
                continue;
            };
            let text = segment
                .to_str()
                .map_err(|e| SttError::TranscriptionFailed(e.to_string()))?
                .trim()
                .to_string();
            if text.is_empty() {
                continue;
            }
            // Whisper timestamps are in centiseconds.
            segments.push(AsrSegment {
                text,
                t0_ms: segment.start_timestamp() * 10,
                t1_ms: segment.end_timestamp() * 10,
            });
        }

        Ok(segments)
    }
}
