use crate::audio::{
    AudioBuffer, AudioError, OutputFormat, Toolchain, BROADCAST_SAMPLE_RATE,
};
use crate::error::{ErrorKind, Warning};
use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};
use std::path::{Path, PathBuf};
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

const LOG_TARGET: &str = "concat";
const RESAMPLE_CHUNK: usize = 1024;

#[derive(Clone, Debug)]
pub struct ConcatOutcome {
    pub output_path: PathBuf,
    pub duration_seconds: f64,
    pub warnings: Vec<Warning>,
}

/// Assembles rendered utterances and their planned pauses into one track at
/// 48 kHz. Per-segment loudness normalization is authoritative: nothing is
/// re-normalized here.
pub struct Concatenator {
    toolchain: Toolchain,
}

impl Concatenator {
    pub fn new(toolchain: Toolchain) -> Self {
        Self { toolchain }
    }

    /// `segments` pairs each audio file with the silence that follows it,
    /// in seconds. The final segment's silence is expected to be zero and
    /// is honored either way.
    pub fn concatenate(
        &self,
        segments: &[(PathBuf, f64)],
        format: OutputFormat,
        output: &Path,
    ) -> Result<ConcatOutcome, AudioError> {
        if segments.is_empty() {
            return Err(AudioError::Decode("no segments to concatenate".into()));
        }
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut track = AudioBuffer {
            samples: Vec::new(),
            sample_rate: BROADCAST_SAMPLE_RATE,
        };
        for (path, trailing_silence) in segments {
            let decoded = decode_to_mono(path)?;
            let at_rate = resample(decoded, BROADCAST_SAMPLE_RATE)?;
            track.extend(&at_rate);
            if *trailing_silence > 0.0 {
                track.extend(&AudioBuffer::silence(*trailing_silence, BROADCAST_SAMPLE_RATE));
            }
        }

        let duration_seconds = track.duration_seconds();
        let mut warnings = Vec::new();

        match format {
            OutputFormat::Wav => track.write_wav_24(output)?,
            OutputFormat::Mp3 | OutputFormat::Flac => {
                if self.toolchain.is_available() {
                    let staging = output.with_extension("staging.wav");
                    track.write_wav_24(&staging)?;
                    let result =
                        self.toolchain.run(&staging, output, None, format.export_args());
                    std::fs::remove_file(&staging).ok();
                    result?;
                } else {
                    track.write_wav_24(output)?;
                    warnings.push(Warning::new(
                        ErrorKind::PostProcessDegraded,
                        format!(
                            "ffmpeg unavailable, wrote wav data to {}",
                            output.display()
                        ),
                    ));
                }
            }
        }

        tracing::info!(
            target: LOG_TARGET,
            output = %output.display(),
            segments = segments.len(),
            duration_seconds,
            "concatenated track written"
        );
        Ok(ConcatOutcome {
            output_path: output.to_path_buf(),
            duration_seconds,
            warnings,
        })
    }
}

/// Decode any supported container (wav, mp3, flac) to mono f32.
fn decode_to_mono(path: &Path) -> Result<AudioBuffer, AudioError> {
    let file = std::fs::File::open(path)?;
    let stream = MediaSourceStream::new(Box::new(file), Default::default());
    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            stream,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| AudioError::Decode(format!("{}: {e}", path.display())))?;
    let mut reader = probed.format;
    let track = reader
        .default_track()
        .ok_or_else(|| AudioError::Decode(format!("{}: no audio track", path.display())))?;
    let track_id = track.id;
    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| AudioError::Decode(e.to_string()))?;

    let mut samples = Vec::new();
    let mut sample_rate = track.codec_params.sample_rate.unwrap_or(BROADCAST_SAMPLE_RATE);

    loop {
        let packet = match reader.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break;
            }
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };
        if packet.track_id() != track_id {
            continue;
        }
        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            // lossy streams may carry isolated corrupt packets
            Err(SymphoniaError::DecodeError(_)) => continue,
            Err(e) => return Err(AudioError::Decode(e.to_string())),
        };
        let spec = *decoded.spec();
        sample_rate = spec.rate;
        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(decoded.capacity() as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        if channels == 1 {
            samples.extend_from_slice(buffer.samples());
        } else {
            samples.extend(
                buffer
                    .samples()
                    .chunks(channels)
                    .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
            );
        }
    }

    if samples.is_empty() {
        return Err(AudioError::Decode(format!(
            "{}: decoded zero samples",
            path.display()
        )));
    }
    Ok(AudioBuffer {
        samples,
        sample_rate,
    })
}

/// Bring a buffer to the target rate with sinc interpolation. The output is
/// pinned to `round(len × ratio)` samples so pause arithmetic stays exact.
fn resample(input: AudioBuffer, target_rate: u32) -> Result<AudioBuffer, AudioError> {
    if input.sample_rate == target_rate || input.is_empty() {
        return Ok(AudioBuffer {
            sample_rate: target_rate,
            ..input
        });
    }

    let ratio = f64::from(target_rate) / f64::from(input.sample_rate);
    let expected = (input.samples.len() as f64 * ratio).round() as usize;

    let params = SincInterpolationParameters {
        sinc_len: 128,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 128,
        window: WindowFunction::BlackmanHarris2,
    };
    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, RESAMPLE_CHUNK, 1)
        .map_err(|e| AudioError::Resample(e.to_string()))?;

    let mut output = Vec::with_capacity(expected + RESAMPLE_CHUNK);
    let mut chunk = vec![0.0f32; RESAMPLE_CHUNK];
    for block in input.samples.chunks(RESAMPLE_CHUNK) {
        chunk[..block.len()].copy_from_slice(block);
        chunk[block.len()..].fill(0.0);
        let frames = resampler
            .process(&[chunk.clone()], None)
            .map_err(|e| AudioError::Resample(e.to_string()))?;
        output.extend_from_slice(&frames[0]);
    }

    output.resize(expected, 0.0);
    Ok(AudioBuffer {
        samples: output,
        sample_rate: target_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn tone(dir: &Path, name: &str, seconds: f64, sample_rate: u32) -> PathBuf {
        let path = dir.join(name);
        let count = (seconds * f64::from(sample_rate)) as usize;
        let buffer = AudioBuffer {
            samples: (0..count)
                .map(|i| (i as f32 * 0.03).sin() * 0.5)
                .collect(),
            sample_rate,
        };
        buffer.write_wav_16(&path).expect("write tone");
        path
    }

    fn concatenator() -> Concatenator {
        Concatenator::new(Toolchain::unavailable(Duration::from_secs(5)))
    }

    #[test]
    fn pause_insertion_adds_exact_silence() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = tone(dir.path(), "a.wav", 0.5, BROADCAST_SAMPLE_RATE);
        let b = tone(dir.path(), "b.wav", 0.5, BROADCAST_SAMPLE_RATE);
        let output = dir.path().join("track.wav");

        let outcome = concatenator()
            .concatenate(&[(a, 0.2), (b, 0.0)], OutputFormat::Wav, &output)
            .expect("concatenate");

        assert!((outcome.duration_seconds - 1.2).abs() < 0.01);
        let written = AudioBuffer::read_wav(&output).expect("read");
        assert_eq!(written.sample_rate, BROADCAST_SAMPLE_RATE);
        assert!((written.duration_seconds() - 1.2).abs() < 0.01);
    }

    #[test]
    fn mixed_sample_rates_are_resampled_to_48k() {
        let dir = tempfile::tempdir().expect("tempdir");
        let low = tone(dir.path(), "low.wav", 0.5, 24_000);
        let high = tone(dir.path(), "high.wav", 0.25, BROADCAST_SAMPLE_RATE);
        let output = dir.path().join("track.wav");

        let outcome = concatenator()
            .concatenate(&[(low, 0.1), (high, 0.0)], OutputFormat::Wav, &output)
            .expect("concatenate");
        assert!((outcome.duration_seconds - 0.85).abs() < 0.01);
    }

    #[test]
    fn empty_segment_list_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = concatenator()
            .concatenate(&[], OutputFormat::Wav, &dir.path().join("x.wav"))
            .unwrap_err();
        assert!(matches!(err, AudioError::Decode(_)));
    }

    #[test]
    fn degraded_mp3_export_warns_and_still_writes() {
        let dir = tempfile::tempdir().expect("tempdir");
        let a = tone(dir.path(), "a.wav", 0.3, BROADCAST_SAMPLE_RATE);
        let output = dir.path().join("track.mp3");

        let outcome = concatenator()
            .concatenate(&[(a, 0.0)], OutputFormat::Mp3, &output)
            .expect("concatenate");
        assert!(output.exists());
        assert_eq!(outcome.warnings.len(), 1);
        assert_eq!(outcome.warnings[0].kind, ErrorKind::PostProcessDegraded);
    }

    #[test]
    fn resample_doubles_sample_count_for_double_rate() {
        let input = AudioBuffer {
            samples: vec![0.1; 12_000],
            sample_rate: 24_000,
        };
        let out = resample(input, 48_000).expect("resample");
        assert_eq!(out.samples.len(), 24_000);
        assert_eq!(out.sample_rate, 48_000);
    }

    #[test]
    fn no_normalization_is_applied_during_concat() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("quiet.wav");
        let quiet = AudioBuffer {
            samples: vec![0.1; 4800],
            sample_rate: BROADCAST_SAMPLE_RATE,
        };
        quiet.write_wav_16(&path).expect("write");
        let output = dir.path().join("out.wav");
        concatenator()
            .concatenate(&[(path, 0.0)], OutputFormat::Wav, &output)
            .expect("concatenate");
        let written = AudioBuffer::read_wav(&output).expect("read");
        let peak = written.samples.iter().fold(0.0f32, |a, &b| a.max(b.abs()));
        assert!((peak - 0.1).abs() < 0.01, "peak changed to {peak}");
    }
}
