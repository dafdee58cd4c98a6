//! Scripted ASR backend for offline tests.

use std::collections::VecDeque;
use std::time::Duration;

use crate::backend::AsrBackend;
use crate::types::AsrSegment;
use streamscribe_foundation::SttError;

/// Returns one pre-scripted response per `transcribe` call, in order;
/// an exhausted script returns empty results. Failures can be injected
/// and a per-call delay configured to simulate a slow backend.
pub struct ScriptedAsr {
    script: VecDeque<Vec<AsrSegment>>,
    fail_next: u32,
    calls: u64,
    last_input_len: Option<usize>,
    delay: Option<Duration>,
}

impl ScriptedAsr {
    pub fn new(script: Vec<Vec<AsrSegment>>) -> Self {
        Self {
            script: script.into(),
            fail_next: 0,
            calls: 0,
            last_input_len: None,
            delay: None,
        }
    }

    /// Make the next `n` calls fail before the script resumes.
    pub fn fail_next(&mut self, n: u32) {
        self.fail_next = n;
    }

    /// Sleep this long on every call, simulating a slow model.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn last_input_len(&self) -> Option<usize> {
        self.last_input_len
    }
}

impl AsrBackend for ScriptedAsr {
    fn transcribe(&mut self, samples_16k: &[i16]) -> Result<Vec<AsrSegment>, SttError> {
        self.calls += 1;
        self.last_input_len = Some(samples_16k.len());

        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }

        if self.fail_next > 0 {
            self.fail_next -= 1;
            return Err(SttError::TranscriptionFailed("scripted failure".into()));
        }

        Ok(self.script.pop_front().unwrap_or_default())
    }
}
