//! Layered configuration: `streamscribe.toml` (optional) → environment
//! (`STREAMSCRIBE_*`) → CLI overrides applied by the binary.

use config::{Config, Environment, File};

use crate::controller::EngineConfig;
use streamscribe_foundation::ConfigError;

impl EngineConfig {
    /// Load from the optional config file and environment. Missing
    /// sources fall back to defaults; a malformed file is an error.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(File::with_name("streamscribe").required(false))
            .add_source(Environment::with_prefix("STREAMSCRIBE"));

        let cfg: EngineConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buffer_duration_s <= 0.0 {
            return Err(ConfigError::Validation {
                field: "buffer_duration_s".into(),
                reason: "must be positive".into(),
            });
        }
        if self.overlap_duration_s < 0.0 || self.overlap_duration_s >= self.buffer_duration_s {
            return Err(ConfigError::Validation {
                field: "overlap_duration_s".into(),
                reason: "must be in [0, buffer_duration_s)".into(),
            });
        }
        if self.max_speakers == 0 {
            return Err(ConfigError::Validation {
                field: "max_speakers".into(),
                reason: "must be at least 1".into(),
            });
        }
        if !(0.0..=1.0).contains(&self.speaker_threshold) {
            return Err(ConfigError::Validation {
                field: "speaker_threshold".into(),
                reason: "must be in [0, 1]".into(),
            });
        }
        if self.queue_capacity == 0 {
            return Err(ConfigError::Validation {
                field: "queue_capacity".into(),
                reason: "must be at least 1".into(),
            });
        }
        if self.hop_ms <= 0 || self.window_ms <= 0 || self.hop_ms > self.window_ms {
            return Err(ConfigError::Validation {
                field: "hop_ms".into(),
                reason: "hop must be positive and no larger than the window".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        EngineConfig::default().validate().unwrap();
    }

    #[test]
    fn zero_max_speakers_rejected() {
        let cfg = EngineConfig {
            max_speakers: 0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_buffer() {
        let cfg = EngineConfig {
            buffer_duration_s: 2.0,
            overlap_duration_s: 2.0,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn hop_larger_than_window_rejected() {
        let cfg = EngineConfig {
            hop_ms: 2000,
            window_ms: 1000,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());
    }
}
