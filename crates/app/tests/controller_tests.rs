//! End-to-end engine tests driven entirely by mock backends.
//!
//! Audio is pushed through the external queue the way a file source
//! would; pushing everything and then calling `stop()` is
//! deterministic because the worker drains the queue before observing
//! the close.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use streamscribe_app::controller::{
    AudioInput, Backends, EngineConfig, TranscriptionController,
};
use streamscribe_app::events::{ReclassificationEvent, ReclassifyReason};
use streamscribe_audio::PcmChunk;
use streamscribe_diar::backends::mock::{FailingEmbedder, MockEmbedder};
use streamscribe_foundation::{EngineState, Severity};
use streamscribe_stt::backends::ScriptedAsr;
use streamscribe_stt::types::AsrSegment;
use streamscribe_stt::TranscriptSegment;

fn seg(text: &str, t0_ms: i64, t1_ms: i64) -> AsrSegment {
    AsrSegment {
        text: text.to_string(),
        t0_ms,
        t1_ms,
    }
}

/// Square wave voices distinguished by fundamental period.
fn voice_x(ms: i64) -> Vec<i16> {
    (0..(ms * 16))
        .map(|i| if (i / 8) % 2 == 0 { 8000 } else { -8000 })
        .collect()
}

fn voice_y(ms: i64) -> Vec<i16> {
    (0..(ms * 16))
        .map(|i| if (i / 2) % 2 == 0 { 8000 } else { -8000 })
        .collect()
}

fn silence(ms: i64) -> Vec<i16> {
    vec![0i16; (ms * 16) as usize]
}

/// Short analyzer windows keep speaker boundaries crisp for the mock
/// embedder; clustering every 2 s keeps labels fresh.
fn test_config() -> EngineConfig {
    EngineConfig {
        window_ms: 250,
        hop_ms: 250,
        cluster_interval_ms: 2000,
        reclassification_window_ms: 2000,
        ..EngineConfig::default()
    }
}

fn feed(queue: &streamscribe_audio::AudioQueue, samples: &[i16]) {
    for chunk in samples.chunks(320) {
        queue.push(PcmChunk {
            samples: chunk.to_vec(),
            sample_rate: 16_000,
            channels: 1,
        });
    }
}

fn wait_until(timeout: Duration, mut pred: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if pred() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    false
}

fn assert_timeline_invariants(segments: &[TranscriptSegment]) {
    for pair in segments.windows(2) {
        assert!(pair[1].id > pair[0].id, "segment IDs must strictly increase");
        assert!(
            pair[1].t_start_ms >= pair[0].t_end_ms,
            "segments must not overlap: {:?} then {:?}",
            pair[0],
            pair[1]
        );
    }
    for s in segments {
        assert!(!s.text.is_empty());
        assert!(s.t_start_ms < s.t_end_ms);
    }
}

#[test]
fn two_speaker_dialogue_end_to_end() {
    // X speaks 0-2.8s, Y 2.8-4.9s, X 4.9-6.5s, Y 6.5-10s. Windows are
    // 3s with 1s overlap, so ASR sees 0-3, 2-5, 4-7, 6-9 and a final
    // 9-10 tail; each re-transcription of overlapped audio repeats the
    // previous window's trailing segment, which must be skipped.
    let script = vec![
        vec![seg("we should ship this week", 0, 2800)],
        vec![
            seg("ship this week", 0, 800),
            seg("i think that is too soon", 800, 2900),
        ],
        vec![
            seg("too soon", 0, 900),
            seg("we can cut scope", 900, 2500),
        ],
        vec![
            seg("cut scope", 0, 500),
            seg("fine let us do that", 500, 3000),
        ],
        vec![seg("and tell the team", 0, 1000)],
    ];

    let mut controller = TranscriptionController::new();
    let segments_seen = Arc::new(Mutex::new(Vec::<TranscriptSegment>::new()));
    {
        let seen = Arc::clone(&segments_seen);
        controller.events().subscribe_segment(move |s| {
            seen.lock().push(s.clone());
        });
    }

    let ok = controller.start(
        test_config(),
        AudioInput::External,
        Backends {
            asr: Some(Box::new(ScriptedAsr::new(script))),
            embedder: Some(Box::new(MockEmbedder::new(8))),
        },
    );
    assert!(ok);
    assert_eq!(controller.state(), EngineState::Running);

    let queue = controller.audio_queue().unwrap();
    let mut audio = voice_x(2800);
    audio.extend(voice_y(2100));
    audio.extend(voice_x(1600));
    audio.extend(voice_y(3500));
    feed(&queue, &audio);

    controller.stop();
    assert_eq!(controller.state(), EngineState::Idle);

    let segments = controller.segments();
    assert_eq!(segments.len(), 5, "segments: {:?}", segments);
    assert_timeline_invariants(&segments);

    let texts: Vec<&str> = segments.iter().map(|s| s.text.as_str()).collect();
    assert_eq!(
        texts,
        vec![
            "we should ship this week",
            "i think that is too soon",
            "we can cut scope",
            "fine let us do that",
            "and tell the team",
        ]
    );

    // Speaker labels alternate with the dialogue; first voice owns id 0.
    let speakers: Vec<Option<u32>> = segments.iter().map(|s| s.speaker_id).collect();
    assert_eq!(
        speakers,
        vec![Some(0), Some(1), Some(0), Some(1), Some(1)],
        "segments: {:?}",
        segments
    );

    // Everything is locked once the stream has stopped.
    assert!(segments.iter().all(|s| s.is_finalized));

    // Subscribers saw each segment exactly once, in order.
    let seen = segments_seen.lock();
    assert_eq!(seen.len(), 5);
    let seen_ids: Vec<u64> = seen.iter().map(|s| s.id).collect();
    assert_eq!(seen_ids, vec![0, 1, 2, 3, 4]);

    let metrics = controller.metrics();
    assert_eq!(metrics.segments_emitted, 5);
    // 10s at 250ms hop with a 250ms window: 40 frames, give or take.
    assert!((39..=41).contains(&metrics.frames_extracted));
}

#[test]
fn pure_silence_gates_asr_but_frames_still_flow() {
    let mut controller = TranscriptionController::new();
    let ok = controller.start(
        test_config(),
        AudioInput::External,
        Backends {
            asr: Some(Box::new(ScriptedAsr::new(vec![]))),
            embedder: Some(Box::new(MockEmbedder::new(8))),
        },
    );
    assert!(ok);

    let queue = controller.audio_queue().unwrap();
    feed(&queue, &silence(5000));
    controller.stop();

    assert!(controller.segments().is_empty());
    let metrics = controller.metrics();
    assert_eq!(metrics.windows_processed, 0, "ASR must never be invoked");
    assert!(metrics.windows_gated_silent >= 1);
    assert!(metrics.frames_extracted > 0, "analyzer keeps producing frames");
}

#[test]
fn pause_and_resume_discard_audio_without_spanning_segments() {
    let script = vec![
        vec![seg("before pause", 0, 1500)],
        vec![seg("after resume", 0, 1500)],
    ];

    let mut controller = TranscriptionController::new();
    let ok = controller.start(
        test_config(),
        AudioInput::External,
        Backends {
            asr: Some(Box::new(ScriptedAsr::new(script))),
            embedder: Some(Box::new(MockEmbedder::new(8))),
        },
    );
    assert!(ok);
    let queue = controller.audio_queue().unwrap();

    feed(&queue, &voice_x(3000));
    assert!(wait_until(Duration::from_secs(5), || {
        controller.metrics().audio_ms_ingested == 3000
    }));

    assert!(controller.pause());
    assert_eq!(controller.state(), EngineState::Paused);

    // Audio arriving while paused is drained and discarded; audio time
    // stands still.
    feed(&queue, &voice_y(5000));
    assert!(wait_until(Duration::from_secs(5), || queue.is_empty()));
    assert_eq!(controller.metrics().audio_ms_ingested, 3000);

    assert!(controller.resume());
    feed(&queue, &voice_x(3000));
    controller.stop();

    let segments = controller.segments();
    assert_eq!(segments.len(), 2, "segments: {:?}", segments);
    assert_timeline_invariants(&segments);
    assert_eq!(segments[0].text, "before pause");
    assert_eq!(segments[1].text, "after resume");
    // The second utterance starts exactly where pre-pause audio ended:
    // nothing spans the boundary.
    assert_eq!(segments[1].t_start_ms, 3000);
    assert_eq!(controller.metrics().audio_ms_ingested, 6000);
}

#[test]
fn overrun_drops_chunks_but_keeps_invariants() {
    let config = EngineConfig {
        queue_capacity: 10,
        ..test_config()
    };

    let mut controller = TranscriptionController::new();
    let ok = controller.start(
        config,
        AudioInput::External,
        Backends {
            asr: Some(Box::new(
                ScriptedAsr::new(vec![]).with_delay(Duration::from_millis(50)),
            )),
            embedder: Some(Box::new(MockEmbedder::new(8))),
        },
    );
    assert!(ok);

    let queue = controller.audio_queue().unwrap();
    // 8s pushed far faster than the slowed backend can drain.
    feed(&queue, &voice_x(8000));
    controller.stop();

    let metrics = controller.metrics();
    assert!(metrics.chunks_dropped > 0, "overrun must shed oldest chunks");
    assert_timeline_invariants(&controller.segments());
    assert_eq!(controller.state(), EngineState::Idle);
}

#[test]
fn stop_mid_buffer_flushes_partial_window() {
    let script = vec![vec![seg("half a window", 100, 1300)]];

    let mut controller = TranscriptionController::new();
    let ok = controller.start(
        test_config(),
        AudioInput::External,
        Backends {
            asr: Some(Box::new(ScriptedAsr::new(script))),
            embedder: Some(Box::new(MockEmbedder::new(8))),
        },
    );
    assert!(ok);

    let queue = controller.audio_queue().unwrap();
    feed(&queue, &voice_x(1500));
    controller.stop();

    let segments = controller.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].text, "half a window");
    assert!(segments[0].t_end_ms <= 1500, "no segment may outrun the audio");
    assert!(segments[0].is_finalized);
}

#[test]
fn stop_is_idempotent() {
    let idle_statuses = Arc::new(AtomicUsize::new(0));

    let mut controller = TranscriptionController::new();
    {
        let count = Arc::clone(&idle_statuses);
        controller.events().subscribe_status(move |s| {
            if s.state == EngineState::Idle {
                count.fetch_add(1, Ordering::SeqCst);
            }
        });
    }

    let ok = controller.start(
        test_config(),
        AudioInput::External,
        Backends {
            asr: Some(Box::new(ScriptedAsr::new(vec![]))),
            embedder: Some(Box::new(MockEmbedder::new(8))),
        },
    );
    assert!(ok);

    let queue = controller.audio_queue().unwrap();
    feed(&queue, &voice_x(1000));

    controller.stop();
    controller.stop();

    assert_eq!(controller.state(), EngineState::Idle);
    assert_eq!(
        idle_statuses.load(Ordering::SeqCst),
        1,
        "exactly one STOPPING -> IDLE transition"
    );
}

#[test]
fn embedder_failure_disables_diarization_and_warns() {
    let warnings = Arc::new(Mutex::new(Vec::<String>::new()));

    let mut controller = TranscriptionController::new();
    {
        let warnings = Arc::clone(&warnings);
        controller.events().subscribe_error(move |e| {
            if e.severity == Severity::Warning {
                warnings.lock().push(e.message.clone());
            }
        });
    }

    let script = vec![vec![seg("still transcribing", 0, 1500)]];
    let ok = controller.start(
        test_config(),
        AudioInput::External,
        Backends {
            asr: Some(Box::new(ScriptedAsr::new(script))),
            embedder: Some(Box::new(FailingEmbedder)),
        },
    );
    assert!(ok);

    let queue = controller.audio_queue().unwrap();
    feed(&queue, &voice_x(3000));
    controller.stop();

    // Transcription survives; speakers are unknown for the session.
    let segments = controller.segments();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].speaker_id, None);

    let warnings = warnings.lock();
    assert!(
        warnings.iter().any(|w| w.contains("diarization disabled")),
        "warnings: {:?}",
        warnings
    );
}

#[test]
fn late_clustering_reclassifies_early_segments() {
    // Both segments of the first window are emitted before any
    // clustering pass has run, so they carry no speaker; the first
    // pass then repairs them retroactively.
    let script = vec![vec![
        seg("morning update", 0, 1400),
        seg("sounds good", 1500, 1900),
    ]];

    let config = EngineConfig {
        window_ms: 250,
        hop_ms: 250,
        cluster_interval_ms: 3000,
        ..EngineConfig::default()
    };

    let events_seen = Arc::new(Mutex::new(Vec::<ReclassificationEvent>::new()));
    let mut controller = TranscriptionController::new();
    {
        let seen = Arc::clone(&events_seen);
        controller.events().subscribe_reclassification(move |e| {
            seen.lock().push(e.clone());
        });
    }

    let ok = controller.start(
        config,
        AudioInput::External,
        Backends {
            asr: Some(Box::new(ScriptedAsr::new(script))),
            embedder: Some(Box::new(MockEmbedder::new(8))),
        },
    );
    assert!(ok);

    let queue = controller.audio_queue().unwrap();
    let mut audio = voice_x(1500);
    audio.extend(voice_y(1500));
    feed(&queue, &audio);
    controller.stop();

    let segments = controller.segments();
    assert_eq!(segments.len(), 2);
    assert_eq!(segments[0].speaker_id, Some(0));
    assert_eq!(segments[1].speaker_id, Some(1));

    let events = events_seen.lock();
    assert!(!events.is_empty(), "expected retroactive reclassification");
    let emitted_ids: Vec<u64> = segments.iter().map(|s| s.id).collect();
    for e in events.iter() {
        assert_eq!(e.reason, ReclassifyReason::BetterContext);
        for id in &e.segment_ids {
            assert!(emitted_ids.contains(id), "event references unknown id {}", id);
        }
    }
}

#[test]
fn non_16k_chunks_are_resampled_in_stream() {
    let mut controller = TranscriptionController::new();
    let ok = controller.start(
        test_config(),
        AudioInput::External,
        Backends {
            asr: Some(Box::new(ScriptedAsr::new(vec![]))),
            embedder: Some(Box::new(MockEmbedder::new(8))),
        },
    );
    assert!(ok);

    let queue = controller.audio_queue().unwrap();
    // 3s of 48 kHz stereo in ~20ms chunks.
    let frames = 48_000 * 3;
    let interleaved: Vec<i16> = (0..frames * 2)
        .map(|i| if (i / 24) % 2 == 0 { 6000 } else { -6000 })
        .collect();
    for chunk in interleaved.chunks(1920) {
        queue.push(PcmChunk {
            samples: chunk.to_vec(),
            sample_rate: 48_000,
            channels: 2,
        });
    }
    controller.stop();

    let ingested = controller.metrics().audio_ms_ingested;
    // Filter delay trims a little from the tail.
    assert!(
        (2800..=3000).contains(&ingested),
        "expected ~3000ms of 16k audio, got {}ms",
        ingested
    );
    assert!(controller.metrics().frames_extracted > 0);
}
