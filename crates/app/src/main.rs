// Logging behavior:
// - Writes logs to both stderr and a daily-rotated file at logs/streamscribe.log.
// - Default log level is INFO; control via RUST_LOG or --verbose (debug).
// - The logs/ directory is created on startup if missing; file output uses a
//   non-blocking writer with ANSI disabled.

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use streamscribe_app::controller::{
    AudioInput, Backends, EngineConfig, TranscriptionController,
};
use streamscribe_app::source::WavSource;
use streamscribe_foundation::SttError;
use streamscribe_stt::AsrBackend;

#[derive(Parser, Debug)]
#[command(
    name = "streamscribe",
    author,
    version,
    about = "Real-time streaming transcription with speaker diarization"
)]
struct Cli {
    /// WAV file to transcribe; omit to capture from the microphone
    wav: Option<PathBuf>,

    /// ASR model path or short name (tiny.en, base.en, small.en)
    #[arg(long)]
    model: Option<String>,

    /// Stop after this many seconds of audio
    #[arg(long = "limit-seconds")]
    limit_seconds: Option<f32>,

    /// Capture device id (see --list-devices)
    #[arg(long)]
    device: Option<usize>,

    /// ASR thread count (0 = auto)
    #[arg(long)]
    threads: Option<usize>,

    /// Disable the diarization subsystem entirely
    #[arg(long = "no-diar")]
    no_diar: bool,

    /// Run only the audio path (isolation testing)
    #[arg(long = "no-asr")]
    no_asr: bool,

    /// When driven by a file, also render it to the speakers
    #[arg(long = "play-file")]
    play_file: bool,

    #[arg(long = "no-play-file", conflicts_with = "play_file")]
    no_play_file: bool,

    /// Persist captured mono audio at the input rate
    #[arg(long = "save-mic-wav", value_name = "PATH", num_args = 0..=1,
          default_missing_value = "mic_capture.wav")]
    save_mic_wav: Option<PathBuf>,

    /// Persist the 16 kHz stream the ASR actually consumed
    #[arg(long = "save-asr-wav", value_name = "PATH", num_args = 0..=1,
          default_missing_value = "asr_input.wav")]
    save_asr_wav: Option<PathBuf>,

    /// Per-window and per-frame diagnostics
    #[arg(long)]
    verbose: bool,

    /// List available input devices and exit
    #[arg(long = "list-devices")]
    list_devices: bool,
}

fn init_logging(verbose: bool) -> anyhow::Result<tracing_appender::non_blocking::WorkerGuard> {
    std::fs::create_dir_all("logs")?;
    let file_appender = RollingFileAppender::new(Rotation::DAILY, "logs", "streamscribe.log");
    let (non_blocking_file, guard) = tracing_appender::non_blocking(file_appender);

    let default_level = if verbose { "debug" } else { "info" };
    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_string());
    let env_filter = EnvFilter::try_new(log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let stderr_layer = fmt::layer().with_writer(std::io::stderr);
    let file_layer = fmt::layer().with_writer(non_blocking_file).with_ansi(false);

    tracing_subscriber::registry()
        .with(env_filter)
        .with(stderr_layer)
        .with(file_layer)
        .init();
    Ok(guard)
}

/// Resolve a model path or short name, falling back through the usual
/// local model locations.
#[cfg(feature = "whisper")]
fn resolve_model(requested: Option<&str>, configured: &str) -> Option<PathBuf> {
    let mut candidates: Vec<PathBuf> = Vec::new();

    if let Some(req) = requested {
        let p = PathBuf::from(req);
        if p.exists() {
            return Some(p);
        }
        candidates.push(PathBuf::from(format!("models/ggml-{}.bin", req)));
    }

    candidates.push(PathBuf::from(configured));
    for name in ["base.en", "small.en", "tiny.en"] {
        candidates.push(PathBuf::from(format!("models/ggml-{}.bin", name)));
    }

    candidates.into_iter().find(|p| p.exists())
}

#[cfg(feature = "whisper")]
fn build_asr(config: &EngineConfig, requested: Option<&str>) -> Result<Box<dyn AsrBackend>, SttError> {
    let model = resolve_model(requested, &config.model_path).ok_or_else(|| {
        SttError::ModelNotFound {
            path: PathBuf::from(requested.unwrap_or(&config.model_path)),
        }
    })?;
    let backend = streamscribe_stt::backends::WhisperBackend::load(
        &model,
        &config.language,
        config.n_threads,
    )?;
    Ok(Box::new(backend))
}

#[cfg(not(feature = "whisper"))]
fn build_asr(_config: &EngineConfig, _requested: Option<&str>) -> Result<Box<dyn AsrBackend>, SttError> {
    Err(SttError::BackendUnavailable(
        "this build has no ASR backend; rebuild with --features whisper or pass --no-asr".into(),
    ))
}

#[cfg(feature = "pyannote")]
fn build_embedder(
    config: &EngineConfig,
) -> Option<Box<dyn streamscribe_diar::SpeakerEmbedder>> {
    let path = PathBuf::from(&config.embedding_model_path);
    match streamscribe_diar::backends::PyannoteEmbedder::load(&path, 256) {
        Ok(e) => Some(Box::new(e)),
        Err(e) => {
            tracing::warn!("Speaker embedder unavailable ({}); diarization disabled", e);
            None
        }
    }
}

#[cfg(not(feature = "pyannote"))]
fn build_embedder(
    _config: &EngineConfig,
) -> Option<Box<dyn streamscribe_diar::SpeakerEmbedder>> {
    tracing::warn!("This build has no embedding backend; diarization disabled");
    None
}

fn print_segment(seg: &streamscribe_stt::TranscriptSegment) {
    let speaker = match seg.speaker_id {
        Some(id) => format!("Speaker {}", id),
        None => "Speaker ?".to_string(),
    };
    println!(
        "[{:6.1}s - {:6.1}s] {}: {}",
        seg.t_start_ms as f64 / 1000.0,
        seg.t_end_ms as f64 / 1000.0,
        speaker,
        seg.text
    );
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let _log_guard = match init_logging(cli.verbose) {
        Ok(g) => g,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::from(1);
        }
    };

    let mut controller = TranscriptionController::new();

    if cli.list_devices {
        let devices = controller.list_audio_devices();
        println!("Input devices:");
        for d in devices {
            let marker = if d.is_default { " (default)" } else { "" };
            println!("  [{}] {}{}", d.id, d.name, marker);
        }
        return ExitCode::SUCCESS;
    }

    let mut config = match EngineConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::from(1);
        }
    };

    if let Some(threads) = cli.threads {
        config.n_threads = threads;
    }
    if cli.no_diar {
        config.enable_diarization = false;
    }
    if cli.no_asr {
        config.enable_asr = false;
    }
    config.save_mic_wav = cli.save_mic_wav.clone();
    config.save_asr_wav = cli.save_asr_wav.clone();

    let asr = if config.enable_asr {
        match build_asr(&config, cli.model.as_deref()) {
            Ok(b) => Some(b),
            Err(e) => {
                eprintln!("ASR backend unavailable: {}", e);
                return ExitCode::from(1);
            }
        }
    } else {
        None
    };

    let embedder = if config.enable_diarization {
        build_embedder(&config)
    } else {
        None
    };

    let events = controller.events();
    events.subscribe_segment(print_segment);
    events.subscribe_error(|e| eprintln!("[{:?}] {}", e.severity, e.message));
    let verbose = cli.verbose;
    events.subscribe_status(move |s| {
        if verbose {
            tracing::debug!(
                "status: state={:?} elapsed={}ms rtf={:.3} dropped={} segments={}",
                s.state,
                s.elapsed_audio_ms,
                s.rtf,
                s.dropped_chunks,
                s.segments_emitted
            );
        }
    });
    events.subscribe_reclassification(|r| {
        tracing::info!(
            "reclassified segments {:?}: {:?} -> {:?} ({:?})",
            r.segment_ids,
            r.old_speaker_id,
            r.new_speaker_id,
            r.reason
        );
    });

    let stop_flag = Arc::new(AtomicBool::new(false));
    {
        let stop_flag = Arc::clone(&stop_flag);
        if let Err(e) = ctrlc::set_handler(move || {
            stop_flag.store(true, Ordering::SeqCst);
        }) {
            tracing::warn!("Failed to install Ctrl-C handler: {}", e);
        }
    }

    let limit = cli.limit_seconds.map(Duration::from_secs_f32);

    let exit = match cli.wav {
        Some(path) => run_file(
            &mut controller,
            config,
            Backends { asr, embedder },
            &path,
            cli.play_file && !cli.no_play_file,
            limit,
            &stop_flag,
        ),
        None => {
            if let Some(id) = cli.device {
                if !controller.select_audio_device(id) {
                    eprintln!("Cannot select device {}", id);
                    return ExitCode::from(1);
                }
            }
            run_microphone(
                &mut controller,
                config,
                Backends { asr, embedder },
                limit,
                &stop_flag,
            )
        }
    };

    ExitCode::from(exit)
}

fn run_file(
    controller: &mut TranscriptionController,
    config: EngineConfig,
    backends: Backends,
    path: &PathBuf,
    play: bool,
    limit: Option<Duration>,
    stop_flag: &Arc<AtomicBool>,
) -> u8 {
    let asr_enabled = config.enable_asr;

    let source = match WavSource::load(path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Cannot load {}: {}", path.display(), e);
            return 1;
        }
    };

    if !controller.start(config, AudioInput::External, backends) {
        return 1;
    }
    let queue = controller
        .audio_queue()
        .expect("queue exists after successful start");

    let _playback = if play {
        match streamscribe_app::source::start_playback(source.samples().to_vec()) {
            Ok(p) => Some(p),
            Err(e) => {
                tracing::warn!("Playback unavailable: {}", e);
                None
            }
        }
    } else {
        None
    };

    // Real-time pacing mirrors live capture.
    source.stream_into(&queue, true, limit, stop_flag);

    controller.stop();

    let segments = controller.segments();
    tracing::info!(
        "Done: {} segments, RTF {:.3}",
        segments.len(),
        controller.metrics().rtf
    );

    if asr_enabled && segments.is_empty() {
        2
    } else {
        0
    }
}

fn run_microphone(
    controller: &mut TranscriptionController,
    config: EngineConfig,
    backends: Backends,
    limit: Option<Duration>,
    stop_flag: &Arc<AtomicBool>,
) -> u8 {
    if !controller.start(config, AudioInput::Microphone, backends) {
        return 1;
    }

    tracing::info!("Transcribing from microphone; Ctrl-C to stop");
    let started = Instant::now();

    loop {
        if stop_flag.load(Ordering::SeqCst) {
            break;
        }
        if let Some(limit) = limit {
            if started.elapsed() >= limit {
                break;
            }
        }
        std::thread::sleep(Duration::from_millis(100));
    }

    controller.stop();
    0
}
