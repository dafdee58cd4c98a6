//! WAV file source: simulates live capture by pushing paced chunks
//! into the engine's audio queue.
//!
//! Non-16 kHz files are converted exactly once, up front, with the
//! sinc resampler; the stream then enters the pipeline already at the
//! canonical rate, matching what a pre-converted file would produce.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use streamscribe_audio::resampler::{convert_clip_to_16k, downmix_to_mono};
use streamscribe_audio::{read_wav, AudioQueue, PcmChunk, ResamplerQuality};
use streamscribe_foundation::AudioError;

/// 20 ms chunks, the typical device callback period.
const CHUNK_SAMPLES: usize = 320;

pub struct WavSource {
    samples: Vec<i16>,
}

impl WavSource {
    /// Load and pre-convert a WAV file to 16 kHz mono.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, AudioError> {
        let data = read_wav(&path)?;
        if data.sample_rate == 0 || data.samples.is_empty() {
            return Err(AudioError::Wav(format!(
                "{}: empty or invalid file",
                path.as_ref().display()
            )));
        }

        let mono = downmix_to_mono(&data.samples, data.channels);
        let samples = convert_clip_to_16k(&mono, data.sample_rate, ResamplerQuality::Quality)?;

        tracing::info!(
            "WAV source ready: {:.1}s at 16 kHz mono (file was {} Hz, {} ch)",
            samples.len() as f32 / 16_000.0,
            data.sample_rate,
            data.channels
        );
        Ok(Self { samples })
    }

    pub fn duration_ms(&self) -> i64 {
        streamscribe_foundation::samples_to_ms(self.samples.len())
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    /// Push the clip into `queue` in capture-sized chunks. In realtime
    /// mode chunks are paced at their wall-clock rate, mirroring a
    /// microphone; otherwise they are fed as fast as the queue accepts
    /// them. Stops early when `cancel` is set or after `limit`.
    pub fn stream_into(
        &self,
        queue: &AudioQueue,
        realtime: bool,
        limit: Option<Duration>,
        cancel: &Arc<AtomicBool>,
    ) {
        let start = Instant::now();
        let mut sent_samples = 0usize;

        for chunk in self.samples.chunks(CHUNK_SAMPLES) {
            if cancel.load(Ordering::SeqCst) {
                break;
            }
            if let Some(limit) = limit {
                let audio_time =
                    Duration::from_millis((sent_samples as u64 * 1000) / 16_000);
                if audio_time >= limit {
                    break;
                }
            }

            queue.push(PcmChunk {
                samples: chunk.to_vec(),
                sample_rate: 16_000,
                channels: 1,
            });
            sent_samples += chunk.len();

            if realtime {
                // Sleep until this chunk's wall-clock position.
                let target =
                    Duration::from_millis((sent_samples as u64 * 1000) / 16_000);
                let elapsed = start.elapsed();
                if target > elapsed {
                    std::thread::sleep(target - elapsed);
                }
            }
        }
    }
}

/// Render a 16 kHz mono clip to the default output device while a file
/// is being streamed. Returns a handle that keeps the stream alive;
/// failure to open an output device is reported, not fatal.
#[allow(dead_code)]
pub struct Playback {
    _stream: cpal::Stream,
}

pub fn start_playback(samples_16k: Vec<i16>) -> Result<Playback, AudioError> {
    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or(AudioError::DeviceNotFound { name: None })?;
    let config = device
        .default_output_config()
        .map_err(|e| AudioError::Fatal(format!("No default output config: {}", e)))?;

    let out_rate = config.sample_rate().0;
    let channels = config.channels() as usize;

    // Match the device rate once up front.
    let resampled = if out_rate == 16_000 {
        samples_16k
    } else {
        let mut rs = streamscribe_audio::StreamResampler::new(16_000, out_rate)?;
        let mut out = rs.process(&samples_16k);
        out.extend(rs.process(&vec![0i16; 2048]));
        out
    };

    let mut cursor = 0usize;
    let stream = device
        .build_output_stream(
            &config.config(),
            move |data: &mut [f32], _: &_| {
                for frame in data.chunks_mut(channels) {
                    let sample = if cursor < resampled.len() {
                        let s = resampled[cursor] as f32 / 32768.0;
                        cursor += 1;
                        s
                    } else {
                        0.0
                    };
                    for out in frame.iter_mut() {
                        *out = sample;
                    }
                }
            },
            |err| tracing::warn!("Playback stream error: {}", err),
            None,
        )
        .map_err(AudioError::BuildStream)?;

    stream.play().map_err(AudioError::PlayStream)?;
    Ok(Playback { _stream: stream })
}

#[cfg(test)]
mod tests {
    use super::*;
    use streamscribe_audio::WavDumpWriter;

    fn write_test_wav(path: &Path, rate: u32, channels: u16, ms: u64) {
        let mut w = WavDumpWriter::create(path, rate, channels).unwrap();
        let total = (rate as u64 * ms / 1000) as usize * channels as usize;
        let samples: Vec<i16> = (0..total)
            .map(|i| if i % 2 == 0 { 6000 } else { -6000 })
            .collect();
        w.write_samples(&samples).unwrap();
        w.finish().unwrap();
    }

    #[test]
    fn loads_16k_mono_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.wav");
        write_test_wav(&path, 16_000, 1, 500);

        let src = WavSource::load(&path).unwrap();
        assert_eq!(src.duration_ms(), 500);
    }

    #[test]
    fn converts_stereo_44k_once_up_front() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("b.wav");
        write_test_wav(&path, 44_100, 2, 1000);

        let src = WavSource::load(&path).unwrap();
        // Length matches the rate ratio within a millisecond.
        assert!((src.duration_ms() - 1000).abs() <= 1);
    }

    #[test]
    fn streams_all_samples_in_fast_mode() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("c.wav");
        write_test_wav(&path, 16_000, 1, 200);

        let src = WavSource::load(&path).unwrap();
        let queue = AudioQueue::new(1000);
        let cancel = Arc::new(AtomicBool::new(false));
        src.stream_into(&queue, false, None, &cancel);

        let mut total = 0;
        while let Some(chunk) = queue.try_pop() {
            total += chunk.samples.len();
            assert_eq!(chunk.sample_rate, 16_000);
            assert_eq!(chunk.channels, 1);
        }
        assert_eq!(total, 3200);
    }

    #[test]
    fn limit_truncates_the_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("d.wav");
        write_test_wav(&path, 16_000, 1, 1000);

        let src = WavSource::load(&path).unwrap();
        let queue = AudioQueue::new(1000);
        let cancel = Arc::new(AtomicBool::new(false));
        src.stream_into(&queue, false, Some(Duration::from_millis(300)), &cancel);

        let mut total = 0;
        while let Some(chunk) = queue.try_pop() {
            total += chunk.samples.len();
        }
        // 300ms of audio, give or take one chunk.
        assert!(total >= 4800 && total <= 4800 + CHUNK_SAMPLES);
    }
}
