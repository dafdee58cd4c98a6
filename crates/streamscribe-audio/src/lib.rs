pub mod capture;
pub mod device;
pub mod queue;
pub mod resampler;
pub mod watchdog;
pub mod wav;

// Public API
pub use capture::{CaptureStats, CaptureThread};
pub use device::{DeviceInfo, DeviceManager};
pub use queue::{AudioQueue, PcmChunk};
pub use resampler::{ResamplerQuality, StreamResampler};
pub use watchdog::WatchdogTimer;
pub use wav::{read_wav, WavDumpWriter, WavData};
