pub mod mock;

#[cfg(feature = "whisper")]
pub mod whisper;

pub use mock::ScriptedAsr;

#[cfg(feature = "whisper")]
pub use whisper::WhisperBackend;
