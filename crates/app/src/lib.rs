pub mod controller;
pub mod events;
pub mod settings;
pub mod source;

pub use controller::{AudioInput, Backends, EngineConfig, TranscriptionController};
pub use events::{
    ErrorEvent, EventBus, ReclassificationEvent, ReclassifyReason, StatusUpdate,
};
