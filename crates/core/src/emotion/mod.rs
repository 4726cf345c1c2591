mod registry;

use serde::{Deserialize, Serialize};

pub use registry::{EmotionRegistry, RegistryError};

pub const EXAGGERATION_RANGE: (f32, f32) = (0.0, 2.5);
pub const CFG_WEIGHT_RANGE: (f32, f32) = (0.0, 1.0);
pub const TEMPERATURE_RANGE: (f32, f32) = (0.1, 1.5);
pub const SPEED_RANGE: (f32, f32) = (0.5, 2.0);

/// The emotion every lookup falls back to. Guaranteed present in the
/// built-in set and never deletable.
pub const FALLBACK_EMOTION: &str = "neutral";

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum EmotionCategory {
    Neutral,
    Positive,
    Negative,
    Dramatic,
    Special,
    Urgent,
}

impl EmotionCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Dramatic => "dramatic",
            Self::Special => "special",
            Self::Urgent => "urgent",
        }
    }
}

/// The four knobs every backend understands. Values are clamped on read,
/// not on store, so a registry document edited by hand round-trips as-is.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AcousticParams {
    pub exaggeration: f32,
    pub cfg_weight: f32,
    pub temperature: f32,
    pub speed: f32,
}

impl AcousticParams {
    pub fn clamped(&self) -> Self {
        Self {
            exaggeration: clamp(self.exaggeration, EXAGGERATION_RANGE),
            cfg_weight: clamp(self.cfg_weight, CFG_WEIGHT_RANGE),
            temperature: clamp(self.temperature, TEMPERATURE_RANGE),
            speed: clamp(self.speed, SPEED_RANGE),
        }
    }
}

impl Default for AcousticParams {
    fn default() -> Self {
        Self {
            exaggeration: 1.0,
            cfg_weight: 0.6,
            temperature: 0.8,
            speed: 1.0,
        }
    }
}

fn clamp(value: f32, (min, max): (f32, f32)) -> f32 {
    value.clamp(min, max)
}

/// Partial set of parameter overrides merged over an emotion's base values.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct ParamOverrides {
    pub exaggeration: Option<f32>,
    pub cfg_weight: Option<f32>,
    pub temperature: Option<f32>,
    pub speed: Option<f32>,
}

impl ParamOverrides {
    pub fn is_empty(&self) -> bool {
        self.exaggeration.is_none()
            && self.cfg_weight.is_none()
            && self.temperature.is_none()
            && self.speed.is_none()
    }

    pub fn apply(&self, base: AcousticParams) -> AcousticParams {
        AcousticParams {
            exaggeration: self.exaggeration.unwrap_or(base.exaggeration),
            cfg_weight: self.cfg_weight.unwrap_or(base.cfg_weight),
            temperature: self.temperature.unwrap_or(base.temperature),
            speed: self.speed.unwrap_or(base.speed),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Emotion {
    pub name: String,
    pub aliases: Vec<String>,
    pub category: EmotionCategory,
    pub params: AcousticParams,
    pub description: String,
    pub builtin: bool,
}

impl Emotion {
    fn builtin(
        name: &str,
        category: EmotionCategory,
        (temperature, exaggeration, cfg_weight, speed): (f32, f32, f32, f32),
        description: &str,
        aliases: &[&str],
    ) -> Self {
        Self {
            name: name.to_owned(),
            aliases: aliases.iter().map(|a| (*a).to_owned()).collect(),
            category,
            params: AcousticParams {
                exaggeration,
                cfg_weight,
                temperature,
                speed,
            },
            description: description.to_owned(),
            builtin: true,
        }
    }
}

/// The built-in emotion database. Parameter tuples are
/// (temperature, exaggeration, cfg_weight, speed).
pub fn builtin_emotions() -> Vec<Emotion> {
    use EmotionCategory::*;
    vec![
        Emotion::builtin(
            "neutral",
            Neutral,
            (0.8, 1.0, 0.6, 1.0),
            "Balanced, objective narration",
            &["normal", "balanced"],
        ),
        Emotion::builtin(
            "calm",
            Neutral,
            (0.7, 0.9, 0.5, 0.9),
            "Peaceful, composed speech",
            &["peaceful", "composed"],
        ),
        Emotion::builtin(
            "contemplative",
            Neutral,
            (0.8, 0.9, 0.5, 0.8),
            "Deep inner thoughts",
            &["thoughtful", "meditative"],
        ),
        Emotion::builtin(
            "soft",
            Neutral,
            (0.7, 0.8, 0.5, 0.9),
            "Gentle, tender expressions",
            &["gentle", "tender"],
        ),
        Emotion::builtin(
            "whisper",
            Neutral,
            (0.7, 0.8, 0.5, 0.8),
            "Intimate, secretive tone",
            &["secret", "intimate"],
        ),
        Emotion::builtin(
            "happy",
            Positive,
            (0.9, 1.2, 0.6, 1.1),
            "General joy, positive mood",
            &["joyful", "pleased"],
        ),
        Emotion::builtin(
            "excited",
            Positive,
            (1.0, 1.2, 0.6, 1.3),
            "High energy, enthusiastic",
            &["energetic", "thrilled"],
        ),
        Emotion::builtin(
            "cheerful",
            Positive,
            (0.9, 1.1, 0.6, 1.1),
            "Bright, uplifting tone",
            &["bright", "uplifting"],
        ),
        Emotion::builtin(
            "friendly",
            Positive,
            (0.8, 1.0, 0.6, 1.0),
            "Warm, welcoming tone",
            &["warm", "welcoming"],
        ),
        Emotion::builtin(
            "confident",
            Positive,
            (0.8, 1.1, 0.6, 1.0),
            "Self-assured, determined",
            &["assured", "determined"],
        ),
        Emotion::builtin(
            "encouraging",
            Positive,
            (0.9, 1.1, 0.6, 1.0),
            "Inspiring, motivating",
            &["motivating", "inspiring", "enthusiastic"],
        ),
        Emotion::builtin(
            "playful",
            Positive,
            (0.9, 1.1, 0.6, 1.1),
            "Fun, teasing tone",
            &["teasing", "mischievous"],
        ),
        Emotion::builtin(
            "romantic",
            Positive,
            (0.8, 1.0, 0.6, 0.9),
            "Loving, tender expressions",
            &["loving", "affectionate"],
        ),
        Emotion::builtin(
            "sad",
            Negative,
            (0.7, 0.9, 0.5, 0.8),
            "General sadness, melancholy",
            &["melancholy", "melancholic", "hurt"],
        ),
        Emotion::builtin(
            "angry",
            Negative,
            (0.9, 1.2, 0.7, 1.2),
            "General anger, irritation",
            &["furious", "irritated", "frustrated"],
        ),
        Emotion::builtin(
            "sarcastic",
            Negative,
            (0.8, 1.0, 0.6, 1.1),
            "Mocking, ironic tone",
            &["mocking", "ironic"],
        ),
        Emotion::builtin(
            "anxious",
            Negative,
            (0.8, 1.0, 0.6, 1.1),
            "Worried, underlying tension",
            &["worried", "nervous", "restless"],
        ),
        Emotion::builtin(
            "fearful",
            Negative,
            (0.8, 1.0, 0.6, 1.0),
            "Afraid, scared expressions",
            &["afraid", "scared", "fear"],
        ),
        Emotion::builtin(
            "cold",
            Negative,
            (0.7, 0.8, 0.6, 1.0),
            "Emotionless, distant",
            &["distant", "indifferent", "detached"],
        ),
        Emotion::builtin(
            "dramatic",
            Dramatic,
            (1.0, 1.2, 0.6, 1.0),
            "Theatrical, intense expression",
            &["theatrical", "intense"],
        ),
        Emotion::builtin(
            "mysterious",
            Dramatic,
            (0.8, 1.0, 0.6, 0.9),
            "Enigmatic, secretive tone",
            &["enigmatic", "ominous", "eerie"],
        ),
        Emotion::builtin(
            "surprised",
            Dramatic,
            (0.9, 1.2, 0.6, 1.2),
            "Shock, disbelief, amazement",
            &["shocked", "amazed", "astonished"],
        ),
        Emotion::builtin(
            "commanding",
            Dramatic,
            (0.8, 1.1, 0.7, 1.0),
            "Authoritative, decisive tone",
            &["authoritative", "decisive", "firm"],
        ),
        Emotion::builtin(
            "suspenseful",
            Dramatic,
            (0.8, 1.0, 0.6, 0.9),
            "Tense, anticipatory",
            &["tense", "anticipatory"],
        ),
        Emotion::builtin(
            "persuasive",
            Special,
            (0.8, 1.0, 0.6, 1.0),
            "Convincing, eloquent argument",
            &["convincing", "eloquent", "rhetorical"],
        ),
        Emotion::builtin(
            "humorous",
            Special,
            (0.9, 1.1, 0.6, 1.1),
            "Funny, charming, witty",
            &["witty", "amusing", "charming"],
        ),
        Emotion::builtin(
            "sleepy",
            Special,
            (0.7, 0.8, 0.5, 0.8),
            "Drowsy, tired expression",
            &["drowsy", "tired"],
        ),
        Emotion::builtin(
            "shy",
            Special,
            (0.7, 0.8, 0.5, 0.9),
            "Timid, bashful tone",
            &["timid", "bashful"],
        ),
        Emotion::builtin(
            "urgent",
            Urgent,
            (0.9, 1.2, 0.7, 1.2),
            "Emergency, warning calls",
            &["warning", "emergency", "alarm"],
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clamping_pins_every_field_to_its_range() {
        let wild = AcousticParams {
            exaggeration: 9.0,
            cfg_weight: -1.0,
            temperature: 0.0,
            speed: 3.0,
        };
        let c = wild.clamped();
        assert_eq!(c.exaggeration, EXAGGERATION_RANGE.1);
        assert_eq!(c.cfg_weight, CFG_WEIGHT_RANGE.0);
        assert_eq!(c.temperature, TEMPERATURE_RANGE.0);
        assert_eq!(c.speed, SPEED_RANGE.1);
    }

    #[test]
    fn overrides_replace_only_named_fields() {
        let base = AcousticParams::default();
        let merged = ParamOverrides {
            speed: Some(1.4),
            ..Default::default()
        }
        .apply(base);
        assert_eq!(merged.speed, 1.4);
        assert_eq!(merged.exaggeration, base.exaggeration);
        assert_eq!(merged.cfg_weight, base.cfg_weight);
    }

    #[test]
    fn builtin_set_contains_the_fallback_and_all_categories() {
        let emotions = builtin_emotions();
        assert!(emotions.iter().any(|e| e.name == FALLBACK_EMOTION));
        for category in [
            EmotionCategory::Neutral,
            EmotionCategory::Positive,
            EmotionCategory::Negative,
            EmotionCategory::Dramatic,
            EmotionCategory::Special,
            EmotionCategory::Urgent,
        ] {
            assert!(
                emotions.iter().any(|e| e.category == category),
                "missing category {category:?}"
            );
        }
    }

    #[test]
    fn builtin_params_are_already_within_range() {
        for emotion in builtin_emotions() {
            assert_eq!(emotion.params, emotion.params.clamped(), "{}", emotion.name);
        }
    }

    #[test]
    fn aliases_are_unique_across_the_builtin_set() {
        let mut seen = std::collections::BTreeSet::new();
        for emotion in builtin_emotions() {
            assert!(seen.insert(emotion.name.clone()), "{}", emotion.name);
            for alias in &emotion.aliases {
                assert!(seen.insert(alias.clone()), "duplicate alias {alias}");
            }
        }
    }
}
