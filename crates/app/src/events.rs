//! Event fan-out to subscribers.
//!
//! Callbacks fire on the worker thread. The registry holds each list
//! behind a short-lived mutex and snapshots it before invoking, so no
//! lock is held across user code; a well-behaved subscriber copies the
//! event and returns.

use parking_lot::Mutex;
use std::sync::Arc;

use streamscribe_foundation::{EngineState, Severity};
use streamscribe_stt::TranscriptSegment;
use streamscribe_telemetry::MetricsSnapshot;

#[derive(Debug, Clone)]
pub struct StatusUpdate {
    pub state: EngineState,
    /// Audio time processed so far; stable while paused.
    pub elapsed_audio_ms: i64,
    pub rtf: f64,
    pub dropped_chunks: u64,
    pub segments_emitted: u64,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone)]
pub struct ErrorEvent {
    pub severity: Severity,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReclassifyReason {
    /// A single segment bracketed by the same speaker on both sides.
    IsolatedChunk,
    /// Low-confidence segment contradicted by a confident neighbor.
    LowConfidence,
    /// The post-clustering vote for the segment changed its winner.
    BetterContext,
}

/// Batched speaker relabeling of already-emitted segments.
#[derive(Debug, Clone)]
pub struct ReclassificationEvent {
    pub segment_ids: Vec<u64>,
    pub old_speaker_id: Option<u32>,
    pub new_speaker_id: Option<u32>,
    pub reason: ReclassifyReason,
}

type Callback<T> = Arc<dyn Fn(&T) + Send + Sync>;

#[derive(Default)]
pub struct EventBus {
    on_segment: Mutex<Vec<Callback<TranscriptSegment>>>,
    on_reclassification: Mutex<Vec<Callback<ReclassificationEvent>>>,
    on_status: Mutex<Vec<Callback<StatusUpdate>>>,
    on_error: Mutex<Vec<Callback<ErrorEvent>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe_segment(&self, f: impl Fn(&TranscriptSegment) + Send + Sync + 'static) {
        self.on_segment.lock().push(Arc::new(f));
    }

    pub fn subscribe_reclassification(
        &self,
        f: impl Fn(&ReclassificationEvent) + Send + Sync + 'static,
    ) {
        self.on_reclassification.lock().push(Arc::new(f));
    }

    pub fn subscribe_status(&self, f: impl Fn(&StatusUpdate) + Send + Sync + 'static) {
        self.on_status.lock().push(Arc::new(f));
    }

    pub fn subscribe_error(&self, f: impl Fn(&ErrorEvent) + Send + Sync + 'static) {
        self.on_error.lock().push(Arc::new(f));
    }

    pub fn emit_segment(&self, segment: &TranscriptSegment) {
        for cb in self.snapshot(&self.on_segment) {
            cb(segment);
        }
    }

    pub fn emit_reclassification(&self, event: &ReclassificationEvent) {
        for cb in self.snapshot(&self.on_reclassification) {
            cb(event);
        }
    }

    pub fn emit_status(&self, status: &StatusUpdate) {
        for cb in self.snapshot(&self.on_status) {
            cb(status);
        }
    }

    pub fn emit_error(&self, error: &ErrorEvent) {
        for cb in self.snapshot(&self.on_error) {
            cb(error);
        }
    }

    fn snapshot<T>(&self, list: &Mutex<Vec<Callback<T>>>) -> Vec<Callback<T>> {
        list.lock().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn segment_callbacks_receive_events() {
        let bus = EventBus::new();
        let count = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&count);
        bus.subscribe_segment(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        let seg = TranscriptSegment {
            id: 0,
            text: "hi".into(),
            t_start_ms: 0,
            t_end_ms: 500,
            speaker_id: None,
            confidence: 0.0,
            is_finalized: false,
        };
        bus.emit_segment(&seg);
        bus.emit_segment(&seg);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn callbacks_may_resubscribe_without_deadlock() {
        // The bus must not hold its lock while invoking user code.
        let bus = Arc::new(EventBus::new());
        let bus2 = Arc::clone(&bus);
        bus.subscribe_error(move |_| {
            bus2.subscribe_error(|_| {});
        });
        bus.emit_error(&ErrorEvent {
            severity: Severity::Warning,
            message: "w".into(),
        });
    }
}
