use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use super::device::DeviceManager;
use super::queue::{AudioQueue, PcmChunk};
use super::watchdog::WatchdogTimer;
use streamscribe_foundation::AudioError;

#[derive(Debug, Default)]
pub struct CaptureStats {
    pub chunks_captured: AtomicU64,
    pub restarts: AtomicU64,
}

/// Negotiated stream parameters, reported back to the caller.
#[derive(Debug, Clone, Copy)]
pub struct NegotiatedFormat {
    pub sample_rate: u32,
    pub channels: u16,
}

/// Handle to the dedicated capture thread.
///
/// The cpal callback converts device samples to i16 and pushes a chunk
/// into the queue; it never blocks and never takes a lock the worker
/// could hold. The owning thread only babysits the stream (watchdog
/// restarts) and tears it down on stop.
pub struct CaptureThread {
    handle: JoinHandle<()>,
    shutdown: Arc<AtomicBool>,
    pub stats: Arc<CaptureStats>,
}

impl CaptureThread {
    pub fn spawn(
        queue: Arc<AudioQueue>,
        device_id: Option<usize>,
    ) -> Result<(Self, NegotiatedFormat), AudioError> {
        let running = Arc::new(AtomicBool::new(true));
        let shutdown = Arc::clone(&running);
        let stats = Arc::new(CaptureStats::default());
        let stats_out = Arc::clone(&stats);
        let negotiated = Arc::new(RwLock::new(None::<NegotiatedFormat>));
        let negotiated_out = Arc::clone(&negotiated);

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let mut capture = match CaptureStream::new(queue, Arc::clone(&running), stats) {
                    Ok(c) => c,
                    Err(e) => {
                        tracing::error!("Failed to create capture stream: {}", e);
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                match capture.start(device_id) {
                    Ok(fmt) => {
                        *negotiated.write() = Some(fmt);
                    }
                    Err(e) => {
                        tracing::error!("Failed to start capture: {}", e);
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                }

                while running.load(Ordering::SeqCst) {
                    if capture.watchdog.is_triggered() || capture.restart_needed.load(Ordering::SeqCst)
                    {
                        tracing::warn!("Capture restart triggered (watchdog or stream error)");
                        capture.stop_stream();
                        capture.restart_needed.store(false, Ordering::SeqCst);
                        match capture.start(device_id) {
                            Ok(fmt) => {
                                *negotiated.write() = Some(fmt);
                                capture.stats.restarts.fetch_add(1, Ordering::Relaxed);
                            }
                            Err(e) => {
                                tracing::error!("Capture restart failed: {}", e);
                            }
                        }
                    }
                    thread::sleep(Duration::from_millis(100));
                }

                tracing::info!("Audio capture thread shutting down");
                capture.stop_stream();
            })
            .map_err(|e| AudioError::Fatal(format!("Failed to spawn capture thread: {}", e)))?;

        // Wait for the stream to come up (or the thread to bail out).
        let start = Instant::now();
        let fmt = loop {
            if let Some(fmt) = *negotiated_out.read() {
                break Some(fmt);
            }
            if !shutdown.load(Ordering::SeqCst) || start.elapsed() > Duration::from_secs(3) {
                break None;
            }
            thread::sleep(Duration::from_millis(20));
        };

        let fmt = fmt.ok_or_else(|| {
            AudioError::Fatal("Capture stream failed to start within timeout".to_string())
        })?;

        Ok((
            Self {
                handle,
                shutdown,
                stats: stats_out,
            },
            fmt,
        ))
    }

    pub fn stop(self) {
        self.shutdown.store(false, Ordering::SeqCst);
        let _ = self.handle.join();
    }
}

struct CaptureStream {
    device_manager: DeviceManager,
    stream: Option<Stream>,
    queue: Arc<AudioQueue>,
    watchdog: WatchdogTimer,
    running: Arc<AtomicBool>,
    restart_needed: Arc<AtomicBool>,
    stats: Arc<CaptureStats>,
}

impl CaptureStream {
    fn new(
        queue: Arc<AudioQueue>,
        running: Arc<AtomicBool>,
        stats: Arc<CaptureStats>,
    ) -> Result<Self, AudioError> {
        Ok(Self {
            device_manager: DeviceManager::new()?,
            stream: None,
            queue,
            watchdog: WatchdogTimer::new(Duration::from_secs(5)),
            running,
            restart_needed: Arc::new(AtomicBool::new(false)),
            stats,
        })
    }

    fn start(&mut self, device_id: Option<usize>) -> Result<NegotiatedFormat, AudioError> {
        let device = self.device_manager.open_device(device_id)?;
        if let Ok(name) = device.name() {
            tracing::info!(
                "Selected input device: {} (host: {:?})",
                name,
                self.device_manager.host_id()
            );
        }

        let (config, sample_format) = negotiate_config(&device)?;
        let fmt = NegotiatedFormat {
            sample_rate: config.sample_rate.0,
            channels: config.channels,
        };

        let stream = self.build_stream(device, config, sample_format, fmt)?;
        stream.play()?;
        self.stream = Some(stream);
        self.watchdog.start(Arc::clone(&self.running));
        Ok(fmt)
    }

    fn build_stream(
        &mut self,
        device: cpal::Device,
        config: StreamConfig,
        sample_format: SampleFormat,
        fmt: NegotiatedFormat,
    ) -> Result<Stream, AudioError> {
        let queue = Arc::clone(&self.queue);
        let stats = Arc::clone(&self.stats);
        let watchdog = self.watchdog.clone();
        let running = Arc::clone(&self.running);
        let restart_needed = Arc::clone(&self.restart_needed);

        let err_fn = move |err: cpal::StreamError| {
            tracing::error!("Audio stream error: {}", err);
            restart_needed.store(true, Ordering::SeqCst);
        };

        let handle_i16 = move |data: &[i16]| {
            if !running.load(Ordering::SeqCst) {
                return;
            }
            watchdog.feed();
            queue.push(PcmChunk {
                samples: data.to_vec(),
                sample_rate: fmt.sample_rate,
                channels: fmt.channels,
            });
            stats.chunks_captured.fetch_add(1, Ordering::Relaxed);
        };

        // Reuse one conversion buffer per callback thread.
        thread_local! {
            static CONVERT_BUFFER: std::cell::RefCell<Vec<i16>> =
                const { std::cell::RefCell::new(Vec::new()) };
        }

        let stream = match sample_format {
            SampleFormat::I16 => device.build_input_stream(
                &config,
                move |data: &[i16], _: &_| handle_i16(data),
                err_fn,
                None,
            )?,
            SampleFormat::F32 => device.build_input_stream(
                &config,
                move |data: &[f32], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.reserve(data.len());
                        for &s in data {
                            let clamped = s.clamp(-1.0, 1.0);
                            converted.push((clamped * 32767.0).round() as i16);
                        }
                        handle_i16(&converted);
                    });
                },
                err_fn,
                None,
            )?,
            SampleFormat::U16 => device.build_input_stream(
                &config,
                move |data: &[u16], _: &_| {
                    CONVERT_BUFFER.with(|buf| {
                        let mut converted = buf.borrow_mut();
                        converted.clear();
                        converted.reserve(data.len());
                        for &s in data {
                            converted.push((s as i32 - 32768) as i16);
                        }
                        handle_i16(&converted);
                    });
                },
                err_fn,
                None,
            )?,
            other => {
                return Err(AudioError::FormatNotSupported {
                    format: format!("{:?}", other),
                });
            }
        };

        Ok(stream)
    }

    fn stop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
        }
        self.watchdog.stop();
    }
}

fn negotiate_config(device: &cpal::Device) -> Result<(StreamConfig, SampleFormat), AudioError> {
    if let Ok(default_config) = device.default_input_config() {
        return Ok((
            StreamConfig {
                channels: default_config.channels(),
                sample_rate: default_config.sample_rate(),
                buffer_size: cpal::BufferSize::Default,
            },
            default_config.sample_format(),
        ));
    }

    if let Ok(configs) = device.supported_input_configs() {
        if let Some(config) = configs.into_iter().next() {
            return Ok((config.with_max_sample_rate().into(), config.sample_format()));
        }
    }

    Err(AudioError::FormatNotSupported {
        format: "No supported audio formats".to_string(),
    })
}

#[cfg(test)]
mod convert_tests {
    #[test]
    fn f32_to_i16_basic() {
        let src = [-1.0f32, -0.5, 0.0, 0.5, 1.0];
        let expected = [-32767i16, -16384, 0, 16384, 32767];
        let out: Vec<i16> = src
            .iter()
            .map(|&s| (s.clamp(-1.0, 1.0) * 32767.0).round() as i16)
            .collect();
        assert_eq!(&out[..], &expected);
    }

    #[test]
    fn u16_to_i16_centering() {
        let src = [0u16, 32768, 65535];
        let expected = [-32768i16, 0, 32767];
        let out: Vec<i16> = src.iter().map(|&s| (s as i32 - 32768) as i16).collect();
        assert_eq!(&out[..], &expected);
    }
}
