use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable error identifiers carried across the request boundary. Shells map
/// these to exit codes or HTTP statuses; no stack traces ever cross.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidRequest,
    EmotionNotFound,
    VoiceNotFound,
    DuplicateVoice,
    BackendUnavailable,
    SynthesisEmpty,
    ResourceExhausted,
    PostProcessDegraded,
    Timeout,
    IoFailure,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::EmotionNotFound => "emotion_not_found",
            Self::VoiceNotFound => "voice_not_found",
            Self::DuplicateVoice => "duplicate_voice",
            Self::BackendUnavailable => "backend_unavailable",
            Self::SynthesisEmpty => "synthesis_empty",
            Self::ResourceExhausted => "resource_exhausted",
            Self::PostProcessDegraded => "post_process_degraded",
            Self::Timeout => "timeout",
            Self::IoFailure => "io_failure",
        }
    }

    /// Whether the dispatcher may retry a request that failed with this kind.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::ResourceExhausted)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {message}")]
pub struct RenderError {
    pub kind: ErrorKind,
    pub message: String,
}

impl RenderError {
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn invalid_request<M: Into<String>>(message: M) -> Self {
        Self::new(ErrorKind::InvalidRequest, message)
    }
}

/// Non-fatal note attached to an otherwise successful render.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct Warning {
    pub kind: ErrorKind,
    pub message: String,
}

impl Warning {
    pub fn new<M: Into<String>>(kind: ErrorKind, message: M) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}
