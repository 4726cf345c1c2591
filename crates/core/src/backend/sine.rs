use crate::audio::AudioBuffer;
use crate::backend::{
    BackendError, Device, SynthesisOutput, SynthesisRequest, TtsBackend,
};
use std::collections::hash_map::DefaultHasher;
use std::f32::consts::TAU;
use std::hash::{Hash, Hasher};

const SAMPLE_RATE: u32 = 24_000;
const BASE_FREQ_HZ: f32 = 180.0;
const FREQ_SPREAD_HZ: f32 = 120.0;
const MS_PER_CHAR: usize = 100;
const MIN_DURATION_MS: usize = 500;

/// Deterministic fallback synthesizer for environments without the neural
/// stack: a pure tone whose length tracks the text and whose pitch tracks
/// the selected voice. Good enough to exercise the whole pipeline.
#[derive(Clone, Debug, Default)]
pub struct SineBackend;

impl SineBackend {
    pub fn new() -> Self {
        Self
    }

    fn voice_frequency(request: &SynthesisRequest) -> f32 {
        let mut hasher = DefaultHasher::new();
        match (&request.voice_sample, &request.voice_id) {
            (Some(sample), _) => sample.hash(&mut hasher),
            (None, Some(id)) => id.hash(&mut hasher),
            (None, None) => "default".hash(&mut hasher),
        }
        BASE_FREQ_HZ + (hasher.finish() % 1000) as f32 / 1000.0 * FREQ_SPREAD_HZ
    }
}

impl TtsBackend for SineBackend {
    fn name(&self) -> &'static str {
        "sine"
    }

    fn device(&self) -> Device {
        Device::Cpu
    }

    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, BackendError> {
        let chars = request.text.chars().count();
        let duration_ms =
            ((chars * MS_PER_CHAR).max(MIN_DURATION_MS) as f32 / request.params.speed) as usize;
        let total_samples = duration_ms * SAMPLE_RATE as usize / 1000;
        if total_samples == 0 {
            return Err(BackendError::Empty);
        }

        let freq = Self::voice_frequency(request);
        let amplitude = (0.25 * request.params.exaggeration).clamp(0.05, 0.9);

        let seconds = total_samples as f32 / SAMPLE_RATE as f32;
        let samples: Vec<f32> = (0..total_samples)
            .map(|i| {
                let t = i as f32 / SAMPLE_RATE as f32;
                // 20ms linear fades so segment joins stay click-free
                let fade_in = (t * 50.0).min(1.0);
                let fade_out = ((seconds - t) * 50.0).clamp(0.0, 1.0);
                (TAU * freq * t).sin() * amplitude * fade_in * fade_out
            })
            .collect();

        let buffer = AudioBuffer {
            samples,
            sample_rate: SAMPLE_RATE,
        };
        buffer
            .write_wav_16(&request.scratch_path)
            .map_err(|e| BackendError::Other(e.to_string()))?;

        Ok(SynthesisOutput {
            wav_path: request.scratch_path.clone(),
            sample_rate: SAMPLE_RATE,
            duration_seconds: buffer.duration_seconds(),
            provider: self.name(),
            device: self.device(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emotion::AcousticParams;
    use std::path::PathBuf;

    fn request(text: &str, voice_id: Option<&str>, speed: f32, scratch: PathBuf) -> SynthesisRequest {
        SynthesisRequest {
            text: text.to_owned(),
            voice_id: voice_id.map(str::to_owned),
            voice_sample: None,
            params: AcousticParams {
                speed,
                ..AcousticParams::default()
            },
            scratch_path: scratch,
        }
    }

    #[test]
    fn duration_tracks_text_length_and_speed() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = SineBackend::new();

        let short = backend
            .synthesize(&request("Hello world", Some("alice"), 1.0, dir.path().join("a.wav")))
            .expect("synthesize");
        assert!((0.4..=2.0).contains(&short.duration_seconds), "{}", short.duration_seconds);

        let fast = backend
            .synthesize(&request("Hello world", Some("alice"), 2.0, dir.path().join("b.wav")))
            .expect("synthesize");
        assert!(fast.duration_seconds < short.duration_seconds);
    }

    #[test]
    fn output_is_a_readable_nonsilent_wav() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = SineBackend::new()
            .synthesize(&request("test", Some("alice"), 1.0, dir.path().join("t.wav")))
            .expect("synthesize");
        assert_eq!(out.sample_rate, 24_000);
        assert_eq!(out.provider, "sine");
        let buffer = AudioBuffer::read_wav(&out.wav_path).expect("read back");
        assert!(buffer.samples.iter().any(|&s| s.abs() > 0.01));
    }

    #[test]
    fn voice_pitch_is_stable_and_voices_spread_out() {
        let dir = tempfile::tempdir().expect("tempdir");
        let voices = ["alice", "gabriel", "olivia", "thomas", "jordan"];
        let freqs: Vec<f32> = voices
            .iter()
            .map(|v| {
                SineBackend::voice_frequency(&request("x", Some(v), 1.0, dir.path().join("f.wav")))
            })
            .collect();
        let alice_again =
            SineBackend::voice_frequency(&request("y", Some("alice"), 1.0, dir.path().join("g.wav")));
        assert_eq!(freqs[0], alice_again);
        let distinct: std::collections::BTreeSet<u32> =
            freqs.iter().map(|f| f.to_bits()).collect();
        assert!(distinct.len() > 1);
    }

    #[test]
    fn same_request_is_deterministic() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = SineBackend::new();
        backend
            .synthesize(&request("repeat", Some("alice"), 1.0, dir.path().join("1.wav")))
            .expect("first");
        backend
            .synthesize(&request("repeat", Some("alice"), 1.0, dir.path().join("2.wav")))
            .expect("second");
        assert_eq!(
            std::fs::read(dir.path().join("1.wav")).unwrap(),
            std::fs::read(dir.path().join("2.wav")).unwrap()
        );
    }
}
