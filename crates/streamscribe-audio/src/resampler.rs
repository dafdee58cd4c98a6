use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use streamscribe_foundation::AudioError;

#[derive(Debug, Clone, Copy)]
pub enum ResamplerQuality {
    Fast,     // Lower quality, lower CPU usage
    Balanced, // Default quality/performance balance
    Quality,  // Higher quality, higher CPU usage
}

/// Streaming resampler for mono i16 audio using sinc interpolation.
///
/// - Maintains internal buffers to handle arbitrary-sized input chunks
/// - Returns input verbatim when rates already match
/// - Never falls back to linear interpolation: on non-trivial rate
///   conversion a cheap interpolator audibly corrupts the spectrum the
///   ASR consumes
pub struct StreamResampler {
    in_rate: u32,
    out_rate: u32,
    resampler: Option<SincFixedIn<f32>>,
    input_buffer: Vec<f32>,
    output_buffer: Vec<f32>,
    chunk_size: usize,
}

impl StreamResampler {
    pub fn new(in_rate: u32, out_rate: u32) -> Result<Self, AudioError> {
        Self::new_with_quality(in_rate, out_rate, ResamplerQuality::Balanced)
    }

    pub fn new_with_quality(
        in_rate: u32,
        out_rate: u32,
        quality: ResamplerQuality,
    ) -> Result<Self, AudioError> {
        if in_rate == 0 {
            return Err(AudioError::InvalidSampleRate { rate: in_rate });
        }

        // Identity conversion needs no filter state.
        if in_rate == out_rate {
            return Ok(Self {
                in_rate,
                out_rate,
                resampler: None,
                input_buffer: Vec::new(),
                output_buffer: Vec::new(),
                chunk_size: 0,
            });
        }

        // 512 samples keeps latency low; 32ms at 16kHz.
        let chunk_size = 512;

        let sinc_params = match quality {
            ResamplerQuality::Fast => SincInterpolationParameters {
                sinc_len: 32,
                f_cutoff: 0.92,
                interpolation: SincInterpolationType::Linear,
                oversampling_factor: 64,
                window: WindowFunction::Blackman,
            },
            ResamplerQuality::Balanced => SincInterpolationParameters {
                sinc_len: 64,
                f_cutoff: 0.95,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 128,
                window: WindowFunction::Blackman2,
            },
            ResamplerQuality::Quality => SincInterpolationParameters {
                sinc_len: 128,
                f_cutoff: 0.97,
                interpolation: SincInterpolationType::Cubic,
                oversampling_factor: 256,
                window: WindowFunction::BlackmanHarris2,
            },
        };

        let resampler = SincFixedIn::<f32>::new(
            out_rate as f64 / in_rate as f64,
            2.0,
            sinc_params,
            chunk_size,
            1, // mono
        )
        .map_err(|e| AudioError::Fatal(format!("Failed to create resampler: {}", e)))?;

        Ok(Self {
            in_rate,
            out_rate,
            resampler: Some(resampler),
            input_buffer: Vec::with_capacity(chunk_size * 2),
            output_buffer: Vec::new(),
            chunk_size,
        })
    }

    /// Process an arbitrary chunk of mono i16 samples. Returns resampled
    /// i16 at the output rate; output length lags input by the filter
    /// delay until enough samples have accumulated.
    pub fn process(&mut self, input: &[i16]) -> Vec<i16> {
        if input.is_empty() {
            return Vec::new();
        }

        let Some(resampler) = self.resampler.as_mut() else {
            // Fast path: rates match, return the input verbatim.
            return input.to_vec();
        };

        for &sample in input {
            self.input_buffer.push(sample as f32 / 32768.0);
        }

        while self.input_buffer.len() >= self.chunk_size {
            let chunk: Vec<f32> = self.input_buffer.drain(..self.chunk_size).collect();
            let input_frames = vec![chunk];

            let output_frames = match resampler.process(&input_frames, None) {
                Ok(frames) => frames,
                Err(e) => {
                    tracing::error!("Resampler error: {}", e);
                    return Vec::new();
                }
            };

            if !output_frames.is_empty() && !output_frames[0].is_empty() {
                self.output_buffer.extend_from_slice(&output_frames[0]);
            }
        }

        let mut result = Vec::with_capacity(self.output_buffer.len());
        for &sample in &self.output_buffer {
            let clamped = sample.clamp(-1.0, 1.0);
            result.push((clamped * 32767.0).round() as i16);
        }
        self.output_buffer.clear();

        result
    }

    /// Reset internal state, clearing buffers and the filter history.
    pub fn reset(&mut self) {
        self.input_buffer.clear();
        self.output_buffer.clear();
        if let Some(r) = self.resampler.as_mut() {
            r.reset();
        }
    }

    pub fn input_rate(&self) -> u32 {
        self.in_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.out_rate
    }
}

/// One-shot conversion of a whole clip to 16 kHz mono. Used for
/// file-backed inputs so the conversion happens exactly once, up front,
/// instead of per chunk.
pub fn convert_clip_to_16k(
    samples: &[i16],
    in_rate: u32,
    quality: ResamplerQuality,
) -> Result<Vec<i16>, AudioError> {
    if in_rate == 16_000 {
        return Ok(samples.to_vec());
    }
    let mut rs = StreamResampler::new_with_quality(in_rate, 16_000, quality)?;
    let mut out = rs.process(samples);
    // Flush the filter tail with silence so the clip end is not cut off.
    let flush = vec![0i16; 2048];
    out.extend(rs.process(&flush));
    let expected = (samples.len() as u64 * 16_000 / in_rate as u64) as usize;
    out.truncate(expected);
    Ok(out)
}

/// Downmix interleaved multi-channel i16 to mono by averaging channels.
pub fn downmix_to_mono(samples: &[i16], channels: u16) -> Vec<i16> {
    if channels <= 1 {
        return samples.to_vec();
    }
    let channels = channels as usize;
    samples
        .chunks_exact(channels)
        .map(|frame| {
            let sum: i32 = frame.iter().map(|&s| s as i32).sum();
            (sum / channels as i32) as i16
        })
        .collect()
}
