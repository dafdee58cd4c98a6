//! Transcription controller: lifecycle, worker-thread orchestration,
//! segment timeline, frame-to-segment speaker voting, and event
//! fan-out.
//!
//! Exactly two application threads touch the engine: the capture
//! callback (pushes into the audio queue and returns) and the worker
//! owned here, which performs resampling, frame extraction, ASR,
//! clustering, voting, and callback dispatch. All mutable pipeline
//! state lives on the worker; readers get snapshots.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::Mutex;
use serde::Deserialize;

use streamscribe_audio::resampler::downmix_to_mono;
use streamscribe_audio::{
    AudioQueue, CaptureThread, DeviceInfo, DeviceManager, PcmChunk, ResamplerQuality,
    StreamResampler, WavDumpWriter,
};
use streamscribe_diar::{
    EmbeddingFrame, FrameAnalyzer, FrameAnalyzerConfig, SpeakerCluster, SpeakerEmbedder,
};
use streamscribe_foundation::{
    samples_to_ms, EngineError, EngineState, Severity, StateManager, StreamPosition,
};
use streamscribe_stt::{
    AsrBackend, SpeakerVote, StreamingWindower, TranscriptSegment, WindowerConfig,
};
use streamscribe_telemetry::{EngineMetrics, MetricsSnapshot, Stage, StageTimer};

use crate::events::{
    ErrorEvent, EventBus, ReclassificationEvent, ReclassifyReason, StatusUpdate,
};

/// Recognized engine options. Defaults mirror the interactive profile:
/// 3 s windows with 1 s overlap, two speakers, reclassification over
/// the trailing 5 s.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub model_path: String,
    pub language: String,
    /// 0 = auto.
    pub n_threads: usize,
    pub buffer_duration_s: f32,
    pub overlap_duration_s: f32,
    pub enable_asr: bool,
    pub enable_diarization: bool,
    pub max_speakers: usize,
    /// Cosine-distance merge threshold for clustering.
    pub speaker_threshold: f32,
    pub enable_reclassification: bool,
    /// How far back non-finalized segments remain eligible.
    pub reclassification_window_ms: i64,
    /// Segments with fewer labeled frames inherit the previous speaker.
    pub min_vote_frames: usize,
    pub low_confidence_threshold: f32,
    pub high_confidence_threshold: f32,
    pub silence_gate_dbfs: f32,
    pub queue_capacity: usize,
    /// Cadence of the periodic re-clustering pass, in audio time.
    pub cluster_interval_ms: i64,
    pub hop_ms: i64,
    pub window_ms: i64,
    pub history_sec: u64,
    pub embedding_model_path: String,
    pub save_mic_wav: Option<PathBuf>,
    pub save_asr_wav: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            model_path: "models/ggml-base.en.bin".into(),
            language: "en".into(),
            n_threads: 0,
            buffer_duration_s: 3.0,
            overlap_duration_s: 1.0,
            enable_asr: true,
            enable_diarization: true,
            max_speakers: 2,
            speaker_threshold: 0.35,
            enable_reclassification: true,
            reclassification_window_ms: 5000,
            min_vote_frames: 3,
            low_confidence_threshold: 0.5,
            high_confidence_threshold: 0.9,
            silence_gate_dbfs: -55.0,
            queue_capacity: 500,
            cluster_interval_ms: 5000,
            hop_ms: 250,
            window_ms: 1000,
            history_sec: 60,
            embedding_model_path: "models/embedding.onnx".into(),
            save_mic_wav: None,
            save_asr_wav: None,
        }
    }
}

impl EngineConfig {
    fn windower_config(&self) -> WindowerConfig {
        WindowerConfig {
            buffer_duration_s: self.buffer_duration_s,
            overlap_duration_s: self.overlap_duration_s,
            silence_gate_dbfs: self.silence_gate_dbfs,
            ..WindowerConfig::default()
        }
    }

    fn analyzer_config(&self) -> FrameAnalyzerConfig {
        FrameAnalyzerConfig {
            hop_ms: self.hop_ms,
            window_ms: self.window_ms,
            history_sec: self.history_sec,
        }
    }
}

/// Concrete inference backends, constructed by the caller so mocks can
/// drive the whole engine offline.
pub struct Backends {
    pub asr: Option<Box<dyn AsrBackend>>,
    pub embedder: Option<Box<dyn SpeakerEmbedder>>,
}

/// Where chunks come from: the managed microphone capture thread, or
/// an external driver (file simulation, tests) pushing into
/// [`TranscriptionController::audio_queue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioInput {
    Microphone,
    External,
}

pub struct TranscriptionController {
    state: Arc<StateManager>,
    events: Arc<EventBus>,
    metrics: Arc<EngineMetrics>,
    timeline: Arc<Mutex<Vec<TranscriptSegment>>>,
    queue: Option<Arc<AudioQueue>>,
    worker: Option<JoinHandle<()>>,
    capture: Option<CaptureThread>,
    paused: Arc<AtomicBool>,
    selected_device: Option<usize>,
}

impl Default for TranscriptionController {
    fn default() -> Self {
        Self::new()
    }
}

impl TranscriptionController {
    pub fn new() -> Self {
        Self {
            state: Arc::new(StateManager::new()),
            events: Arc::new(EventBus::new()),
            metrics: Arc::new(EngineMetrics::default()),
            timeline: Arc::new(Mutex::new(Vec::new())),
            queue: None,
            worker: None,
            capture: None,
            paused: Arc::new(AtomicBool::new(false)),
            selected_device: None,
        }
    }

    /// Query-only; no side effects.
    pub fn list_audio_devices(&self) -> Vec<DeviceInfo> {
        DeviceManager::new()
            .map(|dm| dm.enumerate_devices())
            .unwrap_or_default()
    }

    /// Must be called while idle.
    pub fn select_audio_device(&mut self, id: usize) -> bool {
        if self.state.current() != EngineState::Idle {
            tracing::warn!("select_audio_device called while not idle");
            return false;
        }
        self.selected_device = Some(id);
        true
    }

    pub fn events(&self) -> Arc<EventBus> {
        Arc::clone(&self.events)
    }

    pub fn on_segment(&self, f: impl Fn(&TranscriptSegment) + Send + Sync + 'static) {
        self.events.subscribe_segment(f);
    }

    pub fn on_reclassification(
        &self,
        f: impl Fn(&ReclassificationEvent) + Send + Sync + 'static,
    ) {
        self.events.subscribe_reclassification(f);
    }

    pub fn on_status(&self, f: impl Fn(&StatusUpdate) + Send + Sync + 'static) {
        self.events.subscribe_status(f);
    }

    pub fn on_error(&self, f: impl Fn(&ErrorEvent) + Send + Sync + 'static) {
        self.events.subscribe_error(f);
    }

    pub fn state(&self) -> EngineState {
        self.state.current()
    }

    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Snapshot of the emitted timeline.
    pub fn segments(&self) -> Vec<TranscriptSegment> {
        self.timeline.lock().clone()
    }

    /// Hand-off queue for external drivers; available once started.
    pub fn audio_queue(&self) -> Option<Arc<AudioQueue>> {
        self.queue.clone()
    }

    /// IDLE → STARTING → RUNNING. Returns false (and lands in ERROR)
    /// when configuration or backend setup fails.
    pub fn start(&mut self, config: EngineConfig, input: AudioInput, backends: Backends) -> bool {
        if self.state.current() != EngineState::Idle {
            tracing::warn!("start called while not idle");
            return false;
        }
        if self.state.transition(EngineState::Starting).is_err() {
            return false;
        }

        if let Err(e) = self.try_start(config, input, backends) {
            self.fail_start(&e.to_string());
            return false;
        }

        let _ = self.state.transition(EngineState::Running);
        true
    }

    fn try_start(
        &mut self,
        config: EngineConfig,
        input: AudioInput,
        backends: Backends,
    ) -> Result<(), EngineError> {
        config.windower_config().validate()?;
        if config.enable_asr && backends.asr.is_none() {
            return Err(EngineError::Stt(
                streamscribe_foundation::SttError::BackendUnavailable(
                    "transcription enabled but no ASR backend configured".into(),
                ),
            ));
        }

        let windower = StreamingWindower::new(config.windower_config())?;

        let analyzer = match (config.enable_diarization, backends.embedder) {
            (true, Some(embedder)) => Some(FrameAnalyzer::new(config.analyzer_config(), embedder)),
            (true, None) => {
                self.events.emit_error(&ErrorEvent {
                    severity: Severity::Warning,
                    message: "diarization enabled but no embedder configured; speakers will be unknown"
                        .into(),
                });
                None
            }
            (false, _) => None,
        };

        let queue = Arc::new(AudioQueue::new(config.queue_capacity));
        self.queue = Some(Arc::clone(&queue));

        self.paused.store(false, Ordering::SeqCst);

        if input == AudioInput::Microphone {
            let (capture, fmt) = CaptureThread::spawn(Arc::clone(&queue), self.selected_device)?;
            tracing::info!(
                "Capture started at {} Hz, {} channels",
                fmt.sample_rate,
                fmt.channels
            );
            self.capture = Some(capture);
        }

        let mut worker = Worker {
            cfg: config,
            queue,
            events: Arc::clone(&self.events),
            metrics: Arc::clone(&self.metrics),
            state: Arc::clone(&self.state),
            timeline: Arc::clone(&self.timeline),
            paused: Arc::clone(&self.paused),
            asr: backends.asr,
            analyzer,
            windower,
            resampler: None,
            resampler_rate: 0,
            pos: StreamPosition::new(),
            clusters: Vec::new(),
            last_speaker: None,
            last_cluster_ms: 0,
            last_status_ms: 0,
            was_paused: false,
            mic_dump: None,
            asr_dump: None,
            failed: false,
        };

        let handle = thread::Builder::new()
            .name("transcribe-worker".to_string())
            .spawn(move || worker.run())
            .map_err(|e| EngineError::Fatal(format!("Failed to spawn worker thread: {}", e)))?;
        self.worker = Some(handle);

        Ok(())
    }

    fn fail_start(&mut self, message: &str) {
        tracing::error!("Start failed: {}", message);
        self.events.emit_error(&ErrorEvent {
            severity: Severity::Error,
            message: message.to_string(),
        });
        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(queue) = &self.queue {
            queue.close();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.queue = None;
        let _ = self.state.transition(EngineState::Error);
    }

    /// RUNNING/PAUSED → STOPPING → IDLE. Signals the queue, joins the
    /// worker (which runs the final flush), and fires a closing status.
    /// Idempotent: a second call is a no-op.
    pub fn stop(&mut self) {
        match self.state.current() {
            EngineState::Running | EngineState::Paused | EngineState::Error => {}
            _ => return,
        }
        let _ = self.state.transition(EngineState::Stopping);

        if let Some(capture) = self.capture.take() {
            capture.stop();
        }
        if let Some(queue) = &self.queue {
            queue.close();
        }
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
        self.queue = None;
        self.paused.store(false, Ordering::SeqCst);

        let _ = self.state.transition(EngineState::Idle);

        let snapshot = self.metrics.snapshot();
        self.events.emit_status(&StatusUpdate {
            state: EngineState::Idle,
            elapsed_audio_ms: snapshot.audio_ms_ingested as i64,
            rtf: snapshot.rtf,
            dropped_chunks: snapshot.chunks_dropped,
            segments_emitted: snapshot.segments_emitted,
            metrics: snapshot,
        });
    }

    /// In PAUSED the worker keeps draining the queue but discards audio
    /// and never invokes ASR; pending window content is flushed so no
    /// segment spans the pause boundary.
    pub fn pause(&mut self) -> bool {
        if self.state.current() != EngineState::Running {
            return false;
        }
        self.paused.store(true, Ordering::SeqCst);
        self.state.transition(EngineState::Paused).is_ok()
    }

    pub fn resume(&mut self) -> bool {
        if self.state.current() != EngineState::Paused {
            return false;
        }
        self.paused.store(false, Ordering::SeqCst);
        self.state.transition(EngineState::Running).is_ok()
    }
}

impl Drop for TranscriptionController {
    fn drop(&mut self) {
        self.stop();
    }
}

// ───────────────────────────────────────────────────────────────────

struct Worker {
    cfg: EngineConfig,
    queue: Arc<AudioQueue>,
    events: Arc<EventBus>,
    metrics: Arc<EngineMetrics>,
    state: Arc<StateManager>,
    timeline: Arc<Mutex<Vec<TranscriptSegment>>>,
    paused: Arc<AtomicBool>,
    asr: Option<Box<dyn AsrBackend>>,
    analyzer: Option<FrameAnalyzer>,
    windower: StreamingWindower,
    resampler: Option<StreamResampler>,
    resampler_rate: u32,
    pos: StreamPosition,
    clusters: Vec<SpeakerCluster>,
    last_speaker: Option<u32>,
    last_cluster_ms: i64,
    last_status_ms: i64,
    was_paused: bool,
    mic_dump: Option<WavDumpWriter>,
    asr_dump: Option<WavDumpWriter>,
    failed: bool,
}

impl Worker {
    fn run(&mut self) {
        tracing::info!("Worker thread started");

        while let Some(chunk) = self.queue.pop() {
            if self.paused.load(Ordering::SeqCst) {
                if !self.was_paused {
                    self.was_paused = true;
                    self.flush_for_pause();
                }
                // Paused: drain and discard; audio time stands still.
                continue;
            }
            self.was_paused = false;

            if let Err(e) = self.process_chunk(chunk) {
                tracing::error!("Worker failed: {}", e);
                self.events.emit_error(&ErrorEvent {
                    severity: Severity::Error,
                    message: e.to_string(),
                });
                let _ = self.state.transition(EngineState::Error);
                self.failed = true;
                break;
            }
        }

        if !self.failed {
            self.final_flush();
        }

        if let Some(dump) = self.mic_dump.take() {
            let _ = dump.finish();
        }
        if let Some(dump) = self.asr_dump.take() {
            let _ = dump.finish();
        }
        tracing::info!("Worker thread exiting");
    }

    fn process_chunk(&mut self, chunk: PcmChunk) -> Result<(), EngineError> {
        self.metrics.chunks_popped.fetch_add(1, Ordering::Relaxed);
        self.metrics.set_dropped(self.queue.dropped_count());

        let mono = downmix_to_mono(&chunk.samples, chunk.channels);

        if let Some(path) = self.cfg.save_mic_wav.clone() {
            if self.mic_dump.is_none() {
                match WavDumpWriter::create(&path, chunk.sample_rate, 1) {
                    Ok(w) => self.mic_dump = Some(w),
                    Err(e) => {
                        tracing::warn!("Cannot open mic dump {}: {}", path.display(), e);
                        self.cfg.save_mic_wav = None;
                    }
                }
            }
            if let Some(dump) = self.mic_dump.as_mut() {
                let _ = dump.write_samples(&mono);
            }
        }

        let resampled = self.resample(mono, chunk.sample_rate)?;
        if resampled.is_empty() {
            return Ok(());
        }

        self.pos.advance(resampled.len());
        self.metrics
            .record_audio_ms(samples_to_ms(resampled.len()) as u64);

        if let Some(path) = self.cfg.save_asr_wav.clone() {
            if self.asr_dump.is_none() {
                match WavDumpWriter::create(&path, 16_000, 1) {
                    Ok(w) => self.asr_dump = Some(w),
                    Err(e) => {
                        tracing::warn!("Cannot open ASR dump {}: {}", path.display(), e);
                        self.cfg.save_asr_wav = None;
                    }
                }
            }
            if let Some(dump) = self.asr_dump.as_mut() {
                let _ = dump.write_samples(&resampled);
            }
        }

        // Frame extraction runs unconditionally, in parallel to ASR on
        // the same resampled stream, and never touches the ASR buffer.
        if let Some(analyzer) = self.analyzer.as_mut() {
            let timer = StageTimer::start(&self.metrics, Stage::Embed);
            let result = analyzer.add_audio(&resampled);
            drop(timer);
            match result {
                Ok(n) => {
                    self.metrics
                        .frames_extracted
                        .fetch_add(n as u64, Ordering::Relaxed);
                }
                Err(e) => {
                    // Diarization is lost for the session; transcription
                    // continues with unknown speakers.
                    self.events.emit_error(&ErrorEvent {
                        severity: Severity::Warning,
                        message: format!("diarization disabled: {}", e),
                    });
                    self.analyzer = None;
                    self.clusters.clear();
                }
            }
        }

        if self.cfg.enable_asr {
            if let Some(asr) = self.asr.as_mut() {
                let analyzer = self.analyzer.as_ref();
                // One window can yield several segments, each voted in
                // turn; a low-frame segment inherits from the segment
                // classified just before it, not from the chunk start.
                let mut last_speaker = self.last_speaker;
                let min_frames = self.cfg.min_vote_frames;
                let mut assign = |s: i64, e: i64| {
                    let vote = vote_speaker(analyzer, last_speaker, min_frames, s, e);
                    if let Some(id) = vote.speaker_id {
                        last_speaker = Some(id);
                    }
                    vote
                };

                let timer = StageTimer::start(&self.metrics, Stage::Asr);
                let result = self.windower.push_audio(&resampled, asr.as_mut(), &mut assign);
                drop(timer);

                let stats = self.windower.stats();
                self.metrics
                    .windows_processed
                    .store(stats.windows_processed, Ordering::Relaxed);
                self.metrics
                    .windows_gated_silent
                    .store(stats.windows_gated_silent, Ordering::Relaxed);
                self.metrics
                    .asr_failures
                    .store(stats.asr_failures, Ordering::Relaxed);

                let segments = result.map_err(EngineError::Stt)?;
                self.commit_segments(segments);
            }
        }

        let now = self.pos.now_ms();
        if self.analyzer.is_some() && now - self.last_cluster_ms >= self.cfg.cluster_interval_ms {
            self.recluster(now);
        }
        self.finalize_aged(now);
        if now - self.last_status_ms >= 1000 {
            self.last_status_ms = now;
            self.emit_status();
        }

        Ok(())
    }

    fn resample(&mut self, mono: Vec<i16>, rate: u32) -> Result<Vec<i16>, EngineError> {
        if rate == 16_000 {
            return Ok(mono);
        }
        if self.resampler_rate != rate {
            tracing::info!("Configuring resampler: {} Hz -> 16000 Hz", rate);
            self.resampler = Some(StreamResampler::new_with_quality(
                rate,
                16_000,
                ResamplerQuality::Balanced,
            )?);
            self.resampler_rate = rate;
        }
        let timer = StageTimer::start(&self.metrics, Stage::Resample);
        let out = self
            .resampler
            .as_mut()
            .expect("resampler configured above")
            .process(&mono);
        drop(timer);
        Ok(out)
    }

    fn commit_segments(&mut self, segments: Vec<TranscriptSegment>) {
        if segments.is_empty() {
            return;
        }
        {
            let mut timeline = self.timeline.lock();
            timeline.extend(segments.iter().cloned());
        }
        for seg in &segments {
            self.metrics.segments_emitted.fetch_add(1, Ordering::Relaxed);
            self.last_speaker = seg.speaker_id;
            self.events.emit_segment(seg);
        }
    }

    fn recluster(&mut self, now: i64) {
        let Some(analyzer) = self.analyzer.as_mut() else {
            return;
        };
        self.clusters =
            analyzer.apply_clustering(self.cfg.max_speakers, self.cfg.speaker_threshold);
        self.last_cluster_ms = now;
        tracing::debug!(
            "Clustering pass at {}ms: {} clusters over {} frames",
            now,
            self.clusters.len(),
            analyzer.frame_count()
        );
        if self.cfg.enable_reclassification {
            self.reclassify(now);
        }
    }

    /// Walk non-finalized segments inside the reclassification window
    /// and repair speaker labels with the benefit of the new clustering.
    fn reclassify(&mut self, now: i64) {
        let window_start = now - self.cfg.reclassification_window_ms;
        let mut changes: Vec<(u64, Option<u32>, Option<u32>, ReclassifyReason)> = Vec::new();

        {
            let mut timeline = self.timeline.lock();

            // Better context: the post-clustering vote changed the winner.
            for i in 0..timeline.len() {
                let (id, old, t_start, t_end, finalized) = {
                    let s = &timeline[i];
                    (s.id, s.speaker_id, s.t_start_ms, s.t_end_ms, s.is_finalized)
                };
                if finalized || t_end < window_start {
                    continue;
                }
                let vote = vote_speaker(
                    self.analyzer.as_ref(),
                    None,
                    self.cfg.min_vote_frames,
                    t_start,
                    t_end,
                );
                if let Some(new_id) = vote.speaker_id {
                    timeline[i].confidence = vote.confidence;
                    if old != Some(new_id) {
                        timeline[i].speaker_id = Some(new_id);
                        changes.push((id, old, Some(new_id), ReclassifyReason::BetterContext));
                    }
                }
            }

            // Isolated chunk: [A, B, A] with a lone contradicting
            // middle. Detection runs against a snapshot of the labels
            // at pass entry so a correction applied at index i cannot
            // hide an adjacent pattern from index i + 1.
            let before: Vec<Option<u32>> = timeline.iter().map(|s| s.speaker_id).collect();
            for i in 1..timeline.len().saturating_sub(1) {
                let prev_speaker = before[i - 1];
                let next_speaker = before[i + 1];
                let cur_speaker = before[i];
                let (id, t_end, finalized) = {
                    let s = &timeline[i];
                    (s.id, s.t_end_ms, s.is_finalized)
                };
                if finalized || t_end < window_start {
                    continue;
                }
                if prev_speaker.is_some()
                    && prev_speaker == next_speaker
                    && cur_speaker != prev_speaker
                {
                    timeline[i].speaker_id = prev_speaker;
                    changes.push((id, cur_speaker, prev_speaker, ReclassifyReason::IsolatedChunk));
                }
            }

            // Low-confidence correction against a confident successor.
            for i in 0..timeline.len().saturating_sub(1) {
                let (next_speaker, next_conf) = {
                    let s = &timeline[i + 1];
                    (s.speaker_id, s.confidence)
                };
                let (id, cur_speaker, cur_conf, t_end, finalized) = {
                    let s = &timeline[i];
                    (s.id, s.speaker_id, s.confidence, s.t_end_ms, s.is_finalized)
                };
                if finalized || t_end < window_start {
                    continue;
                }
                if cur_conf < self.cfg.low_confidence_threshold
                    && next_conf >= self.cfg.high_confidence_threshold
                    && next_speaker.is_some()
                    && next_speaker != cur_speaker
                {
                    timeline[i].speaker_id = next_speaker;
                    changes.push((id, cur_speaker, next_speaker, ReclassifyReason::LowConfidence));
                }
            }
        }

        if changes.is_empty() {
            return;
        }

        self.metrics
            .reclassifications
            .fetch_add(changes.len() as u64, Ordering::Relaxed);

        // One event per (old, new, reason) tuple.
        let mut grouped: HashMap<(Option<u32>, Option<u32>, ReclassifyReason), Vec<u64>> =
            HashMap::new();
        for (id, old, new, reason) in changes {
            grouped.entry((old, new, reason)).or_default().push(id);
        }
        for ((old, new, reason), mut ids) in grouped {
            ids.sort_unstable();
            self.events.emit_reclassification(&ReclassificationEvent {
                segment_ids: ids,
                old_speaker_id: old,
                new_speaker_id: new,
                reason,
            });
        }
    }

    fn finalize_aged(&mut self, now: i64) {
        let horizon = now - self.cfg.reclassification_window_ms;
        let mut timeline = self.timeline.lock();
        for seg in timeline.iter_mut() {
            if !seg.is_finalized && seg.t_end_ms < horizon {
                seg.is_finalized = true;
            }
        }
    }

    /// Pause boundary: release everything pending so no later segment
    /// can span the gap, then report status once.
    fn flush_for_pause(&mut self) {
        tracing::info!("Paused at {}ms; flushing pending window", self.pos.now_ms());
        self.run_final_windower_flush();
        self.emit_status();
    }

    fn final_flush(&mut self) {
        self.run_final_windower_flush();

        let now = self.pos.now_ms();
        if self.analyzer.is_some() {
            // End-of-stream clustering and the last chance to repair
            // speaker labels before everything is locked.
            self.recluster(now);
        }

        {
            let mut timeline = self.timeline.lock();
            for seg in timeline.iter_mut() {
                seg.is_finalized = true;
            }
        }
        self.emit_status();
    }

    fn run_final_windower_flush(&mut self) {
        if !self.cfg.enable_asr {
            return;
        }
        let Some(asr) = self.asr.as_mut() else {
            return;
        };
        let analyzer = self.analyzer.as_ref();
        let mut last_speaker = self.last_speaker;
        let min_frames = self.cfg.min_vote_frames;
        let mut assign = |s: i64, e: i64| {
            let vote = vote_speaker(analyzer, last_speaker, min_frames, s, e);
            if let Some(id) = vote.speaker_id {
                last_speaker = Some(id);
            }
            vote
        };

        match self.windower.finish(asr.as_mut(), &mut assign) {
            Ok(segments) => self.commit_segments(segments),
            Err(e) => tracing::warn!("Final flush failed: {}", e),
        }
    }

    fn emit_status(&self) {
        let snapshot = self.metrics.snapshot();
        self.events.emit_status(&StatusUpdate {
            state: self.state.current(),
            elapsed_audio_ms: self.pos.now_ms(),
            rtf: snapshot.rtf,
            dropped_chunks: snapshot.chunks_dropped,
            segments_emitted: snapshot.segments_emitted,
            metrics: snapshot,
        });
    }
}

/// Majority vote over the labeled frames intersecting the segment.
/// Ties go to the most recent frame's cluster (the speaker currently
/// talking); segments with too few labeled frames inherit the previous
/// segment's speaker at low confidence.
fn vote_speaker(
    analyzer: Option<&FrameAnalyzer>,
    last_speaker: Option<u32>,
    min_frames: usize,
    seg_start_ms: i64,
    seg_end_ms: i64,
) -> SpeakerVote {
    let Some(analyzer) = analyzer else {
        return SpeakerVote::unknown();
    };

    let frames = analyzer.frames_in_range(seg_start_ms, seg_end_ms);
    let labeled: Vec<&EmbeddingFrame> =
        frames.iter().filter(|f| f.speaker_id.is_some()).collect();

    if labeled.is_empty() {
        // Clustering has not covered this range yet.
        return SpeakerVote {
            speaker_id: last_speaker,
            confidence: if last_speaker.is_some() { 0.3 } else { 0.0 },
        };
    }

    if labeled.len() < min_frames && last_speaker.is_some() {
        return SpeakerVote {
            speaker_id: last_speaker,
            confidence: 0.3,
        };
    }

    let mut counts: HashMap<u32, usize> = HashMap::new();
    for f in &labeled {
        *counts.entry(f.speaker_id.unwrap()).or_default() += 1;
    }

    let most_recent = labeled
        .iter()
        .max_by_key(|f| f.t_end_ms)
        .and_then(|f| f.speaker_id)
        .unwrap_or(0);

    let max_count = counts.values().copied().max().unwrap_or(0);
    let mut tied: Vec<u32> = counts
        .iter()
        .filter(|(_, &c)| c == max_count)
        .map(|(&id, _)| id)
        .collect();
    tied.sort_unstable();

    let winner = if tied.contains(&most_recent) {
        most_recent
    } else {
        tied[0]
    };

    SpeakerVote {
        speaker_id: Some(winner),
        confidence: max_count as f32 / labeled.len() as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamscribe_diar::backends::mock::MockEmbedder;

    fn analyzer_with_tone(ms: i64, amplitude: i16) -> FrameAnalyzer {
        let mut a = FrameAnalyzer::new(
            FrameAnalyzerConfig::default(),
            Box::new(MockEmbedder::new(8)),
        );
        let samples: Vec<i16> = (0..(ms * 16))
            .map(|i| if i % 2 == 0 { amplitude } else { -amplitude })
            .collect();
        a.add_audio(&samples).unwrap();
        a
    }

    #[test]
    fn vote_without_analyzer_is_unknown() {
        let v = vote_speaker(None, Some(1), 3, 0, 1000);
        assert_eq!(v.speaker_id, None);
        assert_eq!(v.confidence, 0.0);
    }

    #[test]
    fn vote_with_unclustered_frames_inherits_previous_speaker() {
        let a = analyzer_with_tone(3000, 5000);
        let v = vote_speaker(Some(&a), Some(1), 3, 0, 2000);
        assert_eq!(v.speaker_id, Some(1));
        assert!(v.confidence < 0.5);
    }

    #[test]
    fn vote_with_unclustered_frames_and_no_history_is_unknown() {
        let a = analyzer_with_tone(3000, 5000);
        let v = vote_speaker(Some(&a), None, 3, 0, 2000);
        assert_eq!(v.speaker_id, None);
    }

    #[test]
    fn majority_vote_wins_after_clustering() {
        let mut a = analyzer_with_tone(3000, 5000);
        a.apply_clustering(2, 0.35);
        let v = vote_speaker(Some(&a), None, 3, 0, 3000);
        assert_eq!(v.speaker_id, Some(0));
        assert!(v.confidence > 0.9);
    }

    #[test]
    fn default_config_is_valid() {
        EngineConfig::default().windower_config().validate().unwrap();
    }

    #[test]
    fn controller_rejects_start_without_asr_backend() {
        let mut c = TranscriptionController::new();
        let ok = c.start(
            EngineConfig::default(),
            AudioInput::External,
            Backends {
                asr: None,
                embedder: None,
            },
        );
        assert!(!ok);
        assert_eq!(c.state(), EngineState::Error);
        // stop() clears the error state.
        c.stop();
        assert_eq!(c.state(), EngineState::Idle);
    }
}
