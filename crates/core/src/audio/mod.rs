mod inner_voice;
mod pipeline;
mod toolchain;

use std::path::Path;

pub use inner_voice::{EchoParams, EchoTweaks, InnerVoiceKind};
pub use pipeline::{AudioQualitySettings, OutputFormat, PostProcessor, ProcessOutcome};
pub use toolchain::Toolchain;

/// Sample rate every track is brought to before concatenation and export.
pub const BROADCAST_SAMPLE_RATE: u32 = 48_000;

#[derive(thiserror::Error, Debug)]
pub enum AudioError {
    #[error("wav error: {0}")]
    Wav(#[from] hound::Error),
    #[error("audio io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("resample error: {0}")]
    Resample(String),
    #[error("audio toolchain unavailable")]
    ToolchainUnavailable,
    #[error("audio toolchain failed: {0}")]
    ToolchainFailed(String),
    #[error("audio toolchain timed out after {0:?}")]
    ToolchainTimeout(std::time::Duration),
}

/// Mono PCM held as f32 in [-1.0, 1.0].
#[derive(Clone, Debug, PartialEq)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn silence(seconds: f64, sample_rate: u32) -> Self {
        let count = (seconds * f64::from(sample_rate)).round().max(0.0) as usize;
        Self {
            samples: vec![0.0; count],
            sample_rate,
        }
    }

    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Read a wav file into a mono buffer. Stereo input is downmixed by
    /// averaging channel pairs; integer formats are scaled to [-1.0, 1.0].
    pub fn read_wav(path: &Path) -> Result<Self, AudioError> {
        let mut reader = hound::WavReader::open(path)?;
        let spec = reader.spec();
        let channels = usize::from(spec.channels.max(1));

        let interleaved: Vec<f32> = match spec.sample_format {
            hound::SampleFormat::Float => {
                reader.samples::<f32>().collect::<Result<_, _>>()?
            }
            hound::SampleFormat::Int => {
                let scale = (1i64 << (spec.bits_per_sample - 1)) as f32;
                reader
                    .samples::<i32>()
                    .map(|s| s.map(|v| v as f32 / scale))
                    .collect::<Result<_, _>>()?
            }
        };

        let samples = if channels == 1 {
            interleaved
        } else {
            interleaved
                .chunks(channels)
                .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
                .collect()
        };

        Ok(Self {
            samples,
            sample_rate: spec.sample_rate,
        })
    }

    /// Write as 16-bit PCM wav, the interchange format between synthesis
    /// and post-processing.
    pub fn write_wav_16(&self, path: &Path) -> Result<(), AudioError> {
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * f32::from(i16::MAX)) as i16)?;
        }
        writer.finalize()?;
        Ok(())
    }

    /// Write as 24-bit PCM wav, the export quality for final tracks.
    pub fn write_wav_24(&self, path: &Path) -> Result<(), AudioError> {
        const SCALE: f32 = ((1i32 << 23) - 1) as f32;
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: self.sample_rate,
            bits_per_sample: 24,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(path, spec)?;
        for &sample in &self.samples {
            let clamped = sample.clamp(-1.0, 1.0);
            writer.write_sample((clamped * SCALE) as i32)?;
        }
        writer.finalize()?;
        Ok(())
    }

    pub fn extend(&mut self, other: &AudioBuffer) {
        debug_assert_eq!(self.sample_rate, other.sample_rate);
        self.samples.extend_from_slice(&other.samples);
    }
}

/// Measure a wav file's duration without loading its payload.
pub fn wav_duration_seconds(path: &Path) -> Result<f64, AudioError> {
    let reader = hound::WavReader::open(path)?;
    let spec = reader.spec();
    Ok(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn silence_rounds_to_exact_sample_count() {
        let buf = AudioBuffer::silence(0.2, BROADCAST_SAMPLE_RATE);
        assert_eq!(buf.samples.len(), 9600);
        assert!(buf.samples.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn wav_16_round_trip_preserves_samples() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tone.wav");
        let original = AudioBuffer {
            samples: (0..480)
                .map(|i| (i as f32 / 480.0 * std::f32::consts::TAU).sin() * 0.8)
                .collect(),
            sample_rate: 24_000,
        };
        original.write_wav_16(&path).expect("write");
        let read = AudioBuffer::read_wav(&path).expect("read");
        assert_eq!(read.sample_rate, 24_000);
        assert_eq!(read.samples.len(), original.samples.len());
        for (a, b) in read.samples.iter().zip(&original.samples) {
            assert!((a - b).abs() < 1e-3, "{a} vs {b}");
        }
    }

    #[test]
    fn wav_24_round_trip_preserves_samples() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("tone24.wav");
        let original = AudioBuffer {
            samples: vec![0.0, 0.25, -0.25, 0.99, -0.99],
            sample_rate: BROADCAST_SAMPLE_RATE,
        };
        original.write_wav_24(&path).expect("write");
        let read = AudioBuffer::read_wav(&path).expect("read");
        for (a, b) in read.samples.iter().zip(&original.samples) {
            assert!((a - b).abs() < 1e-5, "{a} vs {b}");
        }
    }

    #[test]
    fn stereo_input_is_downmixed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("stereo.wav");
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).expect("writer");
        for _ in 0..100 {
            writer.write_sample(i16::MAX / 2).expect("left");
            writer.write_sample(0i16).expect("right");
        }
        writer.finalize().expect("finalize");

        let read = AudioBuffer::read_wav(&path).expect("read");
        assert_eq!(read.samples.len(), 100);
        assert!((read.samples[0] - 0.25).abs() < 1e-2);
    }

    #[test]
    fn duration_is_measured_from_header() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("halfsec.wav");
        AudioBuffer::silence(0.5, 8_000)
            .write_wav_16(&path)
            .expect("write");
        let seconds = wav_duration_seconds(&path).expect("duration");
        assert!((seconds - 0.5).abs() < 1e-3);
    }
}
