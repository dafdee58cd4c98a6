use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::Path;

use streamscribe_foundation::AudioError;

/// Decoded WAV clip, still at the file's native rate and channel count.
#[derive(Debug, Clone)]
pub struct WavData {
    pub samples: Vec<i16>,
    pub sample_rate: u32,
    pub channels: u16,
}

impl WavData {
    pub fn duration_ms(&self) -> i64 {
        if self.sample_rate == 0 || self.channels == 0 {
            return 0;
        }
        let frames = self.samples.len() as i64 / self.channels as i64;
        frames * 1000 / self.sample_rate as i64
    }
}

/// Read a WAV file into interleaved i16 samples. 16-bit PCM is read
/// verbatim; 32-bit float is converted.
pub fn read_wav<P: AsRef<Path>>(path: P) -> Result<WavData, AudioError> {
    let mut reader = hound::WavReader::open(&path)
        .map_err(|e| AudioError::Wav(format!("{}: {}", path.as_ref().display(), e)))?;
    let spec = reader.spec();

    tracing::info!(
        "Loading WAV: {} Hz, {} channels, {} bits",
        spec.sample_rate,
        spec.channels,
        spec.bits_per_sample
    );

    let samples: Vec<i16> = match spec.sample_format {
        hound::SampleFormat::Int => reader
            .samples::<i16>()
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::Wav(e.to_string()))?,
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(|v| (v.clamp(-1.0, 1.0) * 32767.0).round() as i16))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| AudioError::Wav(e.to_string()))?,
    };

    Ok(WavData {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Streaming diagnostic dump writer: PCM int16 RIFF/WAVE with the
/// 44-byte header written up front and the size fields patched in place
/// on close. Writing is incremental so a crash still leaves a mostly
/// playable file.
pub struct WavDumpWriter {
    writer: BufWriter<File>,
    data_bytes: u32,
    finalized: bool,
}

impl WavDumpWriter {
    pub fn create<P: AsRef<Path>>(
        path: P,
        sample_rate: u32,
        channels: u16,
    ) -> Result<Self, AudioError> {
        let file = File::create(&path)
            .map_err(|e| AudioError::Wav(format!("{}: {}", path.as_ref().display(), e)))?;
        let mut writer = BufWriter::new(file);

        let byte_rate = sample_rate * channels as u32 * 2;
        let block_align = channels * 2;

        // Placeholder sizes; patched by finish().
        writer.write_all(b"RIFF").map_err(wav_io)?;
        writer.write_all(&0u32.to_le_bytes()).map_err(wav_io)?;
        writer.write_all(b"WAVE").map_err(wav_io)?;
        writer.write_all(b"fmt ").map_err(wav_io)?;
        writer.write_all(&16u32.to_le_bytes()).map_err(wav_io)?;
        writer.write_all(&1u16.to_le_bytes()).map_err(wav_io)?; // PCM
        writer.write_all(&channels.to_le_bytes()).map_err(wav_io)?;
        writer.write_all(&sample_rate.to_le_bytes()).map_err(wav_io)?;
        writer.write_all(&byte_rate.to_le_bytes()).map_err(wav_io)?;
        writer.write_all(&block_align.to_le_bytes()).map_err(wav_io)?;
        writer.write_all(&16u16.to_le_bytes()).map_err(wav_io)?; // bits
        writer.write_all(b"data").map_err(wav_io)?;
        writer.write_all(&0u32.to_le_bytes()).map_err(wav_io)?;

        Ok(Self {
            writer,
            data_bytes: 0,
            finalized: false,
        })
    }

    pub fn write_samples(&mut self, samples: &[i16]) -> Result<(), AudioError> {
        for &s in samples {
            self.writer.write_all(&s.to_le_bytes()).map_err(wav_io)?;
        }
        self.data_bytes += samples.len() as u32 * 2;
        Ok(())
    }

    /// Patch the RIFF and data chunk sizes and flush.
    pub fn finish(mut self) -> Result<(), AudioError> {
        self.patch_header()?;
        self.finalized = true;
        Ok(())
    }

    fn patch_header(&mut self) -> Result<(), AudioError> {
        self.writer.flush().map_err(wav_io)?;
        let file = self.writer.get_mut();
        file.seek(SeekFrom::Start(4)).map_err(wav_io)?;
        file.write_all(&(36 + self.data_bytes).to_le_bytes())
            .map_err(wav_io)?;
        file.seek(SeekFrom::Start(40)).map_err(wav_io)?;
        file.write_all(&self.data_bytes.to_le_bytes())
            .map_err(wav_io)?;
        file.flush().map_err(wav_io)?;
        Ok(())
    }
}

impl Drop for WavDumpWriter {
    fn drop(&mut self) {
        if !self.finalized {
            let _ = self.patch_header();
        }
    }
}

fn wav_io(e: std::io::Error) -> AudioError {
    AudioError::Wav(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_round_trips_through_hound() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.wav");

        let samples: Vec<i16> = (0..1600).map(|i| (i % 1000) as i16).collect();
        let mut w = WavDumpWriter::create(&path, 16_000, 1).unwrap();
        w.write_samples(&samples[..800]).unwrap();
        w.write_samples(&samples[800..]).unwrap();
        w.finish().unwrap();

        let data = read_wav(&path).unwrap();
        assert_eq!(data.sample_rate, 16_000);
        assert_eq!(data.channels, 1);
        assert_eq!(data.samples, samples);
        assert_eq!(data.duration_ms(), 100);
    }

    #[test]
    fn header_is_exactly_44_bytes_before_data() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.wav");
        let w = WavDumpWriter::create(&path, 44_100, 2).unwrap();
        w.finish().unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(bytes.len(), 44);
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
        assert_eq!(u32::from_le_bytes(bytes[4..8].try_into().unwrap()), 36);
    }

    #[test]
    fn unfinished_writer_patches_header_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dropped.wav");
        {
            let mut w = WavDumpWriter::create(&path, 16_000, 1).unwrap();
            w.write_samples(&[1, 2, 3, 4]).unwrap();
        }
        let data = read_wav(&path).unwrap();
        assert_eq!(data.samples, vec![1, 2, 3, 4]);
    }
}
