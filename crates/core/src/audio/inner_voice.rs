use serde::{Deserialize, Serialize};

/// Inner-voice flavor requested on a render. `Off` keeps the track dry.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum InnerVoiceKind {
    #[default]
    Off,
    Light,
    Deep,
    Dreamy,
}

/// Numeric echo parameters behind an inner-voice preset. The opaque filter
/// strings the legacy configs carried are treated as a compatibility hint
/// only; this numeric scheme is authoritative.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct EchoParams {
    pub delay_ms: f32,
    pub decay: f32,
    pub gain: f32,
    pub lowpass_hz: Option<f32>,
}

impl EchoParams {
    pub fn preset(kind: InnerVoiceKind) -> Option<Self> {
        match kind {
            InnerVoiceKind::Off => None,
            InnerVoiceKind::Light => Some(Self {
                delay_ms: 130.0,
                decay: 0.3,
                gain: 0.5,
                lowpass_hz: None,
            }),
            InnerVoiceKind::Deep => Some(Self {
                delay_ms: 400.0,
                decay: 0.55,
                gain: 0.6,
                lowpass_hz: Some(3500.0),
            }),
            InnerVoiceKind::Dreamy => Some(Self {
                delay_ms: 1900.0,
                decay: 0.8,
                gain: 0.6,
                lowpass_hz: Some(3000.0),
            }),
        }
    }

    /// Compile to an ffmpeg filter chain: echo, then the optional lowpass.
    pub fn filter_string(&self) -> String {
        let mut filter = format!(
            "aecho={}:{}:{}:{}",
            self.gain, self.decay, self.delay_ms, self.decay
        );
        if let Some(hz) = self.lowpass_hz {
            filter.push_str(&format!(",lowpass=f={hz}"));
        }
        filter
    }
}

/// Per-render overrides applied on top of a preset.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct EchoTweaks {
    pub delay_ms: Option<f32>,
    pub decay: Option<f32>,
    pub gain: Option<f32>,
    pub lowpass_hz: Option<f32>,
}

impl EchoTweaks {
    pub fn apply(&self, base: EchoParams) -> EchoParams {
        EchoParams {
            delay_ms: self.delay_ms.unwrap_or(base.delay_ms),
            decay: self.decay.unwrap_or(base.decay),
            gain: self.gain.unwrap_or(base.gain),
            lowpass_hz: self.lowpass_hz.or(base.lowpass_hz),
        }
    }
}
