use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Audio(#[from] AudioError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Stt(#[from] SttError),

    #[error(transparent)]
    Diar(#[from] DiarError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Error, Debug)]
pub enum AudioError {
    #[error("Device not found: {name:?}")]
    DeviceNotFound { name: Option<String> },

    #[error("Device disconnected")]
    DeviceDisconnected,

    #[error("Format not supported: {format}")]
    FormatNotSupported { format: String },

    #[error("Audio queue closed")]
    QueueClosed,

    #[error("Invalid sample rate: {rate}")]
    InvalidSampleRate { rate: u32 },

    #[error("WAV error: {0}")]
    Wav(String),

    #[error("CPAL error: {0}")]
    Cpal(#[from] cpal::StreamError),

    #[error("Build stream error: {0}")]
    BuildStream(#[from] cpal::BuildStreamError),

    #[error("Play stream error: {0}")]
    PlayStream(#[from] cpal::PlayStreamError),

    #[error("Supported stream configs error: {0}")]
    SupportedStreamConfigs(#[from] cpal::SupportedStreamConfigsError),

    #[error("Fatal error, cannot recover: {0}")]
    Fatal(String),
}

#[derive(Debug, thiserror::Error)]
pub enum SttError {
    #[error("Model not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("Model load failed: {0}")]
    LoadFailed(String),

    #[error("Transcription failed: {0}")]
    TranscriptionFailed(String),

    #[error("Transcription failed {count} consecutive times")]
    ConsecutiveFailures { count: u32 },

    #[error("No ASR backend available: {0}")]
    BackendUnavailable(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

#[derive(Debug, thiserror::Error)]
pub enum DiarError {
    #[error("Embedding model not found: {path}")]
    ModelNotFound { path: PathBuf },

    #[error("Embedder load failed: {0}")]
    LoadFailed(String),

    #[error("Embedding failed: {0}")]
    EmbeddingFailed(String),

    #[error("Embedding failed {count} consecutive times, diarization disabled")]
    ConsecutiveFailures { count: u32 },

    #[error("Invalid embedding dimension: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Configuration parsing error: {0}")]
    Parse(#[from] config::ConfigError),

    #[error("Validation failed: {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("Invalid device id: {0}")]
    InvalidDevice(String),
}

/// Severity attached to `on_error` events. Warnings are recoverable;
/// errors terminate the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warning,
    Error,
}

impl EngineError {
    pub fn severity(&self) -> Severity {
        match self {
            EngineError::Audio(AudioError::DeviceDisconnected) => Severity::Warning,
            EngineError::Stt(SttError::TranscriptionFailed(_)) => Severity::Warning,
            EngineError::Diar(_) => Severity::Warning,
            _ => Severity::Error,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_classification() {
        let e = EngineError::Audio(AudioError::DeviceDisconnected);
        assert_eq!(e.severity(), Severity::Warning);

        let e = EngineError::Stt(SttError::ModelNotFound {
            path: PathBuf::from("missing.bin"),
        });
        assert_eq!(e.severity(), Severity::Error);

        let e = EngineError::Diar(DiarError::EmbeddingFailed("onnx".into()));
        assert_eq!(e.severity(), Severity::Warning);
    }

    #[test]
    fn error_display_includes_context() {
        let e = SttError::ConsecutiveFailures { count: 3 };
        assert!(e.to_string().contains("3 consecutive"));
    }
}
