//! Sliding-window ASR with the hold-and-emit policy.
//!
//! A block-based ASR wants several seconds of context and re-segments
//! whenever its input changes; a live stream must never transcribe the
//! same audio twice or retract an emitted segment. The windower bridges
//! the two: segments ending inside the overlap zone are held and only
//! released once the buffer has slid past them, so every time range is
//! transcribed by exactly one window.

use crate::backend::AsrBackend;
use crate::dedup::TailDeduplicator;
use crate::energy::EnergyMeter;
use crate::types::{SpeakerVote, TranscriptSegment};
use streamscribe_foundation::{samples_to_ms, SttError, SAMPLE_RATE_HZ};

#[derive(Debug, Clone)]
pub struct WindowerConfig {
    /// Sliding buffer length fed to ASR. Default 3 s (10 s in the
    /// higher-latency profile).
    pub buffer_duration_s: f32,
    /// Overlap carried into the next window. Default 1 s.
    pub overlap_duration_s: f32,
    /// RMS gate below which ASR is skipped for the window.
    pub silence_gate_dbfs: f32,
    /// Consecutive ASR failures tolerated before escalating.
    pub max_consecutive_failures: u32,
    /// Secondary token-tail guard against backends that repeat leading
    /// tokens from overlapped audio.
    pub enable_text_dedup: bool,
}

impl Default for WindowerConfig {
    fn default() -> Self {
        Self {
            buffer_duration_s: 3.0,
            overlap_duration_s: 1.0,
            silence_gate_dbfs: -55.0,
            max_consecutive_failures: 3,
            enable_text_dedup: true,
        }
    }
}

impl WindowerConfig {
    pub fn validate(&self) -> Result<(), SttError> {
        if self.buffer_duration_s <= 0.0 {
            return Err(SttError::InvalidConfig(
                "buffer_duration_s must be positive".into(),
            ));
        }
        if self.overlap_duration_s < 0.0 || self.overlap_duration_s >= self.buffer_duration_s {
            return Err(SttError::InvalidConfig(
                "overlap_duration_s must be in [0, buffer_duration_s)".into(),
            ));
        }
        Ok(())
    }

    pub fn buffer_samples(&self) -> usize {
        (self.buffer_duration_s * SAMPLE_RATE_HZ as f32) as usize
    }

    pub fn overlap_samples(&self) -> usize {
        (self.overlap_duration_s * SAMPLE_RATE_HZ as f32) as usize
    }

    pub fn slide_samples(&self) -> usize {
        self.buffer_samples() - self.overlap_samples()
    }

    /// Hold boundary, relative to the current buffer start: a segment
    /// whose end reaches this point is still inside the zone the next
    /// window will re-transcribe.
    pub fn emit_boundary_ms(&self) -> i64 {
        samples_to_ms(self.slide_samples())
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WindowerStats {
    pub windows_processed: u64,
    pub windows_gated_silent: u64,
    pub asr_failures: u64,
}

/// A classified segment waiting for the buffer to slide past it. The
/// speaker vote is captured at classification time.
#[derive(Debug, Clone)]
struct HeldSegment {
    text: String,
    t_start_ms: i64,
    t_end_ms: i64,
    speaker: SpeakerVote,
}

pub struct StreamingWindower {
    cfg: WindowerConfig,
    buffer: Vec<i16>,
    buffer_start_ms: i64,
    held: Vec<HeldSegment>,
    last_emitted_end_ms: i64,
    next_id: u64,
    consecutive_failures: u32,
    has_slid: bool,
    dedup: TailDeduplicator,
    meter: EnergyMeter,
    stats: WindowerStats,
}

impl StreamingWindower {
    pub fn new(cfg: WindowerConfig) -> Result<Self, SttError> {
        cfg.validate()?;
        Ok(Self {
            buffer: Vec::with_capacity(cfg.buffer_samples() * 2),
            cfg,
            buffer_start_ms: 0,
            held: Vec::new(),
            last_emitted_end_ms: 0,
            next_id: 0,
            consecutive_failures: 0,
            has_slid: false,
            dedup: TailDeduplicator::default(),
            meter: EnergyMeter::new(),
            stats: WindowerStats::default(),
        })
    }

    /// Accumulate resampled 16 kHz audio and run ASR on every full
    /// window. `assign` is consulted once per classified segment with
    /// absolute (start, end) times and produces the speaker vote.
    ///
    /// Returns the segments emitted by this call, in timeline order.
    pub fn push_audio(
        &mut self,
        samples: &[i16],
        asr: &mut dyn AsrBackend,
        assign: &mut dyn FnMut(i64, i64) -> SpeakerVote,
    ) -> Result<Vec<TranscriptSegment>, SttError> {
        self.buffer.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.buffer.len() >= self.cfg.buffer_samples() {
            self.process_window(asr, assign, &mut out)?;
        }
        Ok(out)
    }

    fn process_window(
        &mut self,
        asr: &mut dyn AsrBackend,
        assign: &mut dyn FnMut(i64, i64) -> SpeakerVote,
        out: &mut Vec<TranscriptSegment>,
    ) -> Result<(), SttError> {
        let window_len = self.cfg.buffer_samples();
        let dbfs = self.meter.calculate_dbfs(&self.buffer[..window_len]);

        if dbfs <= self.cfg.silence_gate_dbfs {
            tracing::debug!(
                "Window at {}ms gated as silence ({:.1} dBFS)",
                self.buffer_start_ms,
                dbfs
            );
            self.stats.windows_gated_silent += 1;
            self.slide();
            self.flush_holds(out);
            return Ok(());
        }

        let result = asr.transcribe(&self.buffer[..window_len]);
        self.stats.windows_processed += 1;

        match result {
            Ok(segments) => {
                self.consecutive_failures = 0;
                let emit_boundary_ms = self.cfg.emit_boundary_ms();

                for w in segments {
                    let seg_start = self.buffer_start_ms + w.t0_ms;
                    let seg_end = self.buffer_start_ms + w.t1_ms;

                    // Already covered by a previous window's emission;
                    // re-segmentation of overlapped audio must not
                    // produce duplicates.
                    if seg_end <= self.last_emitted_end_ms {
                        tracing::trace!(
                            "Skipping segment [{}..{}]ms, already emitted through {}ms",
                            seg_start,
                            seg_end,
                            self.last_emitted_end_ms
                        );
                        continue;
                    }

                    let speaker = assign(seg_start, seg_end);
                    let draft = HeldSegment {
                        text: w.text.trim().to_string(),
                        t_start_ms: seg_start,
                        t_end_ms: seg_end,
                        speaker,
                    };

                    if w.t1_ms >= emit_boundary_ms {
                        self.held.push(draft);
                    } else {
                        self.emit(draft, out);
                    }
                }
            }
            Err(e) => {
                self.consecutive_failures += 1;
                self.stats.asr_failures += 1;
                tracing::warn!(
                    "ASR failed on window at {}ms ({} consecutive): {}",
                    self.buffer_start_ms,
                    self.consecutive_failures,
                    e
                );
                if self.consecutive_failures >= self.cfg.max_consecutive_failures {
                    return Err(SttError::ConsecutiveFailures {
                        count: self.consecutive_failures,
                    });
                }
                // Abandon the window but keep the stream moving.
            }
        }

        // Slide, then release holds so they are emitted exactly when
        // their audio leaves the re-transcription zone and before the
        // next window's ASR runs.
        self.slide();
        self.flush_holds(out);
        Ok(())
    }

    fn slide(&mut self) {
        let n = self.cfg.slide_samples().min(self.buffer.len());
        self.buffer.drain(..n);
        self.buffer_start_ms += samples_to_ms(n);
        self.has_slid = true;
    }

    fn flush_holds(&mut self, out: &mut Vec<TranscriptSegment>) {
        let held = std::mem::take(&mut self.held);
        for draft in held {
            self.emit(draft, out);
        }
    }

    /// Trim, deduplicate, assign a monotone ID, append.
    fn emit(&mut self, draft: HeldSegment, out: &mut Vec<TranscriptSegment>) {
        if draft.text.is_empty() {
            return;
        }

        let mut t_start = draft.t_start_ms;
        let t_end = draft.t_end_ms;
        if t_start < self.last_emitted_end_ms {
            t_start = self.last_emitted_end_ms;
            if t_start >= t_end {
                tracing::trace!("Dropping segment fully inside already-emitted range");
                return;
            }
        }

        let text = if self.cfg.enable_text_dedup {
            self.dedup.apply(&draft.text)
        } else {
            draft.text
        };
        if text.is_empty() {
            return;
        }

        let segment = TranscriptSegment {
            id: self.next_id,
            text,
            t_start_ms: t_start,
            t_end_ms: t_end,
            speaker_id: draft.speaker.speaker_id,
            confidence: draft.speaker.confidence,
            is_finalized: false,
        };
        self.next_id += 1;
        self.last_emitted_end_ms = t_end;
        out.push(segment);
    }

    /// Final flush on stream end: release holds, then transcribe only
    /// the residual audio no previous window has seen.
    pub fn finish(
        &mut self,
        asr: &mut dyn AsrBackend,
        assign: &mut dyn FnMut(i64, i64) -> SpeakerVote,
    ) -> Result<Vec<TranscriptSegment>, SttError> {
        let mut out = Vec::new();
        self.flush_holds(&mut out);

        // After at least one slide the leading overlap has already been
        // transcribed; a never-filled buffer is entirely unseen.
        let skip = if self.has_slid {
            self.cfg.overlap_samples().min(self.buffer.len())
        } else {
            0
        };
        let tail = &self.buffer[skip..];

        if !tail.is_empty() && self.meter.calculate_dbfs(tail) > self.cfg.silence_gate_dbfs {
            let tail_start_ms = self.buffer_start_ms + samples_to_ms(skip);
            match asr.transcribe(tail) {
                Ok(segments) => {
                    self.stats.windows_processed += 1;
                    for w in segments {
                        let seg_start = tail_start_ms + w.t0_ms;
                        let seg_end = tail_start_ms + w.t1_ms;
                        if seg_end <= self.last_emitted_end_ms {
                            continue;
                        }
                        let speaker = assign(seg_start, seg_end);
                        self.emit(
                            HeldSegment {
                                text: w.text.trim().to_string(),
                                t_start_ms: seg_start,
                                t_end_ms: seg_end,
                                speaker,
                            },
                            &mut out,
                        );
                    }
                }
                Err(e) => {
                    self.stats.asr_failures += 1;
                    tracing::warn!("ASR failed on final flush: {}", e);
                }
            }
        }

        // Advance the time base past the consumed audio so a stream
        // resumed after a flush (pause) stays on the session clock.
        self.buffer_start_ms += samples_to_ms(self.buffer.len());
        self.buffer.clear();
        self.has_slid = false;
        Ok(out)
    }

    pub fn stats(&self) -> WindowerStats {
        self.stats
    }

    pub fn held_count(&self) -> usize {
        self.held.len()
    }

    pub fn last_emitted_end_ms(&self) -> i64 {
        self.last_emitted_end_ms
    }

    /// Absolute end time of the last accumulated sample.
    pub fn buffer_end_ms(&self) -> i64 {
        self.buffer_start_ms + samples_to_ms(self.buffer.len())
    }
}
