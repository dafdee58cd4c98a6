pub mod mock;

#[cfg(feature = "pyannote")]
pub mod pyannote;

pub use mock::MockEmbedder;

#[cfg(feature = "pyannote")]
pub use pyannote::PyannoteEmbedder;
