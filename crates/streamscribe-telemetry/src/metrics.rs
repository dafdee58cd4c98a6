use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Shared metrics for cross-thread pipeline monitoring.
///
/// Written by the worker thread, read by API accessors and the periodic
/// status reporter. Everything is a relaxed atomic; the struct is shared
/// behind an `Arc`.
#[derive(Debug, Default)]
pub struct EngineMetrics {
    // Queue behavior
    pub chunks_popped: AtomicU64,
    pub chunks_dropped: AtomicU64,

    // Window processing
    pub windows_processed: AtomicU64,
    pub windows_gated_silent: AtomicU64,
    pub asr_failures: AtomicU64,

    // Output
    pub segments_emitted: AtomicU64,
    pub reclassifications: AtomicU64,
    pub frames_extracted: AtomicU64,

    // Per-stage wall time, microseconds
    pub resample_us: AtomicU64,
    pub embed_us: AtomicU64,
    pub asr_us: AtomicU64,

    // Real-time factor inputs
    pub audio_ms_ingested: AtomicU64,
    pub processing_us: AtomicU64,
}

#[derive(Debug, Clone, Copy)]
pub enum Stage {
    Resample,
    Embed,
    Asr,
}

impl EngineMetrics {
    pub fn record_stage(&self, stage: Stage, micros: u64) {
        let counter = match stage {
            Stage::Resample => &self.resample_us,
            Stage::Embed => &self.embed_us,
            Stage::Asr => &self.asr_us,
        };
        counter.fetch_add(micros, Ordering::Relaxed);
        self.processing_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn record_audio_ms(&self, ms: u64) {
        self.audio_ms_ingested.fetch_add(ms, Ordering::Relaxed);
    }

    pub fn set_dropped(&self, dropped: u64) {
        self.chunks_dropped.store(dropped, Ordering::Relaxed);
    }

    /// Processing wall time divided by ingested audio duration.
    /// Values < 1.0 mean the engine is faster than real time.
    pub fn rtf(&self) -> f64 {
        let audio_ms = self.audio_ms_ingested.load(Ordering::Relaxed);
        if audio_ms == 0 {
            return 0.0;
        }
        let processing_ms = self.processing_us.load(Ordering::Relaxed) as f64 / 1000.0;
        processing_ms / audio_ms as f64
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            chunks_popped: self.chunks_popped.load(Ordering::Relaxed),
            chunks_dropped: self.chunks_dropped.load(Ordering::Relaxed),
            windows_processed: self.windows_processed.load(Ordering::Relaxed),
            windows_gated_silent: self.windows_gated_silent.load(Ordering::Relaxed),
            asr_failures: self.asr_failures.load(Ordering::Relaxed),
            segments_emitted: self.segments_emitted.load(Ordering::Relaxed),
            reclassifications: self.reclassifications.load(Ordering::Relaxed),
            frames_extracted: self.frames_extracted.load(Ordering::Relaxed),
            resample_us: self.resample_us.load(Ordering::Relaxed),
            embed_us: self.embed_us.load(Ordering::Relaxed),
            asr_us: self.asr_us.load(Ordering::Relaxed),
            audio_ms_ingested: self.audio_ms_ingested.load(Ordering::Relaxed),
            rtf: self.rtf(),
        }
    }
}

/// Point-in-time copy of the engine metrics, safe to hand to callers.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricsSnapshot {
    pub chunks_popped: u64,
    pub chunks_dropped: u64,
    pub windows_processed: u64,
    pub windows_gated_silent: u64,
    pub asr_failures: u64,
    pub segments_emitted: u64,
    pub reclassifications: u64,
    pub frames_extracted: u64,
    pub resample_us: u64,
    pub embed_us: u64,
    pub asr_us: u64,
    pub audio_ms_ingested: u64,
    pub rtf: f64,
}

/// Times one stage on drop.
pub struct StageTimer<'a> {
    metrics: &'a EngineMetrics,
    stage: Stage,
    start: Instant,
}

impl<'a> StageTimer<'a> {
    pub fn start(metrics: &'a EngineMetrics, stage: Stage) -> Self {
        Self {
            metrics,
            stage,
            start: Instant::now(),
        }
    }
}

impl Drop for StageTimer<'_> {
    fn drop(&mut self) {
        let micros = self.start.elapsed().as_micros() as u64;
        self.metrics.record_stage(self.stage, micros);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rtf_is_processing_over_audio() {
        let m = EngineMetrics::default();
        m.record_audio_ms(2000);
        m.record_stage(Stage::Asr, 500_000); // 500ms
        assert!((m.rtf() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn rtf_with_no_audio_is_zero() {
        let m = EngineMetrics::default();
        assert_eq!(m.rtf(), 0.0);
    }

    #[test]
    fn stage_timer_accumulates_on_drop() {
        let m = EngineMetrics::default();
        {
            let _t = StageTimer::start(&m, Stage::Resample);
            std::thread::sleep(std::time::Duration::from_millis(2));
        }
        assert!(m.resample_us.load(Ordering::Relaxed) > 0);
        assert!(m.processing_us.load(Ordering::Relaxed) > 0);
    }

    #[test]
    fn snapshot_copies_counters() {
        let m = EngineMetrics::default();
        m.chunks_popped.fetch_add(7, Ordering::Relaxed);
        m.set_dropped(3);
        let s = m.snapshot();
        assert_eq!(s.chunks_popped, 7);
        assert_eq!(s.chunks_dropped, 3);
    }
}
