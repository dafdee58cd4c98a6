//! Fixed-rate speaker-embedding frame extraction.
//!
//! Runs on the same resampled stream as ASR but keeps its own small
//! accumulation buffer, so it can never perturb the ASR window and
//! produces no back-pressure on it.

use std::collections::VecDeque;

use crate::embedder::{l2_normalize, SpeakerEmbedder};
use streamscribe_foundation::{ms_to_samples, samples_to_ms, DiarError};

/// One embedding frame. `speaker_id` stays `None` until clustering has
/// run over the history.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingFrame {
    pub t_start_ms: i64,
    pub t_end_ms: i64,
    pub vector: Vec<f32>,
    pub speaker_id: Option<u32>,
    pub confidence: f32,
}

#[derive(Debug, Clone)]
pub struct FrameAnalyzerConfig {
    /// Distance between consecutive frame centers.
    pub hop_ms: i64,
    /// Audio window each embedding summarizes.
    pub window_ms: i64,
    /// Frame history retention.
    pub history_sec: u64,
}

impl Default for FrameAnalyzerConfig {
    fn default() -> Self {
        Self {
            hop_ms: 250,
            window_ms: 1000,
            history_sec: 60,
        }
    }
}

pub struct FrameAnalyzer {
    cfg: FrameAnalyzerConfig,
    embedder: Box<dyn SpeakerEmbedder>,
    /// Rolling tail of the 16 kHz stream, long enough for one window.
    window_buf: Vec<i16>,
    /// Absolute sample index of `window_buf[0]`.
    buf_start_sample: u64,
    total_samples: u64,
    /// Absolute sample index at which the next frame's window ends.
    next_frame_end: u64,
    frames: VecDeque<EmbeddingFrame>,
    consecutive_failures: u32,
    disabled: bool,
}

const MAX_CONSECUTIVE_EMBED_FAILURES: u32 = 3;

impl FrameAnalyzer {
    pub fn new(cfg: FrameAnalyzerConfig, embedder: Box<dyn SpeakerEmbedder>) -> Self {
        let window_samples = ms_to_samples(cfg.window_ms) as u64;
        Self {
            cfg,
            embedder,
            window_buf: Vec::new(),
            buf_start_sample: 0,
            total_samples: 0,
            next_frame_end: window_samples,
            frames: VecDeque::new(),
            consecutive_failures: 0,
            disabled: false,
        }
    }

    /// Append resampled audio; extract one frame per `hop_ms` of new
    /// audio once `window_ms` has accumulated. Returns the number of
    /// frames extracted by this call.
    ///
    /// A single embedding failure skips that frame; hitting the
    /// consecutive-failure threshold disables the analyzer for the
    /// rest of the session and reports the error once.
    pub fn add_audio(&mut self, samples: &[i16]) -> Result<usize, DiarError> {
        if self.disabled || samples.is_empty() {
            return Ok(0);
        }

        self.window_buf.extend_from_slice(samples);
        self.total_samples += samples.len() as u64;

        let window_samples = ms_to_samples(self.cfg.window_ms) as u64;
        let hop_samples = ms_to_samples(self.cfg.hop_ms) as u64;
        let mut extracted = 0usize;

        while self.total_samples >= self.next_frame_end {
            let start_sample = self.next_frame_end - window_samples;
            let offset = (start_sample - self.buf_start_sample) as usize;
            let window = &self.window_buf[offset..offset + window_samples as usize];

            match self.embedder.embed(window) {
                Ok(mut vector) => {
                    self.consecutive_failures = 0;
                    l2_normalize(&mut vector);
                    self.frames.push_back(EmbeddingFrame {
                        t_start_ms: samples_to_ms(start_sample as usize),
                        t_end_ms: samples_to_ms(self.next_frame_end as usize),
                        vector,
                        speaker_id: None,
                        confidence: 0.0,
                    });
                    extracted += 1;
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    tracing::warn!(
                        "Embedding failed at {}ms ({} consecutive): {}",
                        samples_to_ms(self.next_frame_end as usize),
                        self.consecutive_failures,
                        e
                    );
                    if self.consecutive_failures >= MAX_CONSECUTIVE_EMBED_FAILURES {
                        self.disabled = true;
                        self.trim_audio_buffer(window_samples);
                        return Err(DiarError::ConsecutiveFailures {
                            count: self.consecutive_failures,
                        });
                    }
                }
            }

            self.next_frame_end += hop_samples;
        }

        self.trim_audio_buffer(window_samples);
        self.trim_history();
        Ok(extracted)
    }

    /// Drop audio older than the next frame's window start.
    fn trim_audio_buffer(&mut self, window_samples: u64) {
        let keep_from = self
            .next_frame_end
            .saturating_sub(window_samples)
            .max(self.buf_start_sample);
        let drop = (keep_from - self.buf_start_sample) as usize;
        if drop > 0 {
            self.window_buf.drain(..drop);
            self.buf_start_sample = keep_from;
        }
    }

    fn trim_history(&mut self) {
        let Some(newest_end) = self.frames.back().map(|f| f.t_end_ms) else {
            return;
        };
        let horizon = newest_end - (self.cfg.history_sec as i64 * 1000);
        while let Some(front) = self.frames.front() {
            if front.t_end_ms < horizon {
                self.frames.pop_front();
            } else {
                break;
            }
        }
    }

    /// Frames whose span intersects `[t_start_ms, t_end_ms]`, in time
    /// order.
    pub fn frames_in_range(&self, t_start_ms: i64, t_end_ms: i64) -> Vec<EmbeddingFrame> {
        self.frames
            .iter()
            .filter(|f| f.t_start_ms <= t_end_ms && f.t_end_ms >= t_start_ms)
            .cloned()
            .collect()
    }

    /// Run clustering over the whole history, relabeling every frame.
    /// Returns the resulting clusters.
    pub fn apply_clustering(
        &mut self,
        max_speakers: usize,
        threshold: f32,
    ) -> Vec<crate::cluster::SpeakerCluster> {
        let frames = self.frames.make_contiguous();
        crate::cluster::cluster_frames(frames, max_speakers, threshold)
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Time span covered by the retained history, in ms.
    pub fn duration_ms(&self) -> i64 {
        match (self.frames.front(), self.frames.back()) {
            (Some(first), Some(last)) => last.t_end_ms - first.t_start_ms,
            _ => 0,
        }
    }

    pub fn is_disabled(&self) -> bool {
        self.disabled
    }

    pub fn disable(&mut self) {
        self.disabled = true;
    }
}
