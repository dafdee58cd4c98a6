pub mod analyzer;
pub mod backends;
pub mod cluster;
pub mod embedder;

pub use analyzer::{EmbeddingFrame, FrameAnalyzer, FrameAnalyzerConfig};
pub use cluster::{cluster_frames, cosine_similarity, SpeakerCluster};
pub use embedder::{l2_normalize, SpeakerEmbedder};
