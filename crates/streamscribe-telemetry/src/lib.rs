pub mod metrics;

pub use metrics::{EngineMetrics, MetricsSnapshot, Stage, StageTimer};
