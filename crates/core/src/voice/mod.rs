mod catalog;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub use catalog::{CatalogError, VoiceCatalog};

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Neutral,
}

impl Gender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Male => "male",
            Self::Female => "female",
            Self::Neutral => "neutral",
        }
    }
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VoiceSource {
    Builtin,
    UserUploaded,
}

/// A selectable speaker: a sample on disk plus display metadata.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Voice {
    pub id: String,
    pub display_name: String,
    pub gender: Gender,
    pub sample_path: Option<PathBuf>,
    pub source: VoiceSource,
    pub description: String,
}

/// Derive a voice id from a requested name: lowercase, keep only
/// `[a-z0-9_-]`. Returns `None` when nothing survives.
pub fn sanitize_voice_id(requested: &str) -> Option<String> {
    let id: String = requested
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '_' || *c == '-')
        .collect();
    if id.is_empty() {
        None
    } else {
        Some(id)
    }
}

/// Build an in-memory mono 16-bit wav for tests.
#[cfg(test)]
pub(crate) fn test_wav_bytes(seconds: f64, sample_rate: u32) -> Vec<u8> {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut cursor = std::io::Cursor::new(Vec::new());
    {
        let mut writer = hound::WavWriter::new(&mut cursor, spec).expect("writer");
        let count = (seconds * f64::from(sample_rate)) as usize;
        for i in 0..count {
            let t = i as f32 / sample_rate as f32;
            let sample = (t * 440.0 * std::f32::consts::TAU).sin();
            writer
                .write_sample((sample * f32::from(i16::MAX)) as i16)
                .expect("sample");
        }
        writer.finalize().expect("finalize");
    }
    cursor.into_inner()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_lowercases_and_strips() {
        assert_eq!(sanitize_voice_id("Olivia"), Some("olivia".into()));
        assert_eq!(sanitize_voice_id("My Voice (v2)!"), Some("myvoicev2".into()));
        assert_eq!(sanitize_voice_id("deep_male-01"), Some("deep_male-01".into()));
    }

    #[test]
    fn sanitize_rejects_names_with_no_usable_characters() {
        assert_eq!(sanitize_voice_id("!!!"), None);
        assert_eq!(sanitize_voice_id(""), None);
    }
}
