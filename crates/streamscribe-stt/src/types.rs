//! Core types for the streaming transcription path.

use serde::Serialize;

/// Raw output of the ASR backend for one buffer. Times are relative to
/// the start of the buffer that was fed in.
#[derive(Debug, Clone, PartialEq)]
pub struct AsrSegment {
    pub text: String,
    pub t0_ms: i64,
    pub t1_ms: i64,
}

/// Speaker assignment produced by the voting step at classification
/// time. `None` means no speaker could be determined.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeakerVote {
    pub speaker_id: Option<u32>,
    pub confidence: f32,
}

impl SpeakerVote {
    pub fn unknown() -> Self {
        Self {
            speaker_id: None,
            confidence: 0.0,
        }
    }
}

/// A segment on the emitted timeline, in absolute session time.
///
/// Stream invariants: IDs strictly increase, `t_start_ms` never
/// precedes the previous segment's `t_end_ms`, text is non-empty, and
/// once `is_finalized` is set the text and timing never change again.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TranscriptSegment {
    pub id: u64,
    pub text: String,
    pub t_start_ms: i64,
    pub t_end_ms: i64,
    pub speaker_id: Option<u32>,
    pub confidence: f32,
    pub is_finalized: bool,
}
