use crate::types::AsrSegment;
use streamscribe_foundation::SttError;

/// Block-based ASR backend.
///
/// Synchronous and CPU-bound; one instance per session, driven only
/// from the worker thread. Implementations honor the language and
/// thread count they were configured with at load time and return zero
/// or more segments with times relative to the start of the supplied
/// buffer.
pub trait AsrBackend: Send {
    fn transcribe(&mut self, samples_16k: &[i16]) -> Result<Vec<AsrSegment>, SttError>;
}
