mod chatterbox;
mod device;
mod fallback;
mod sine;

use crate::emotion::AcousticParams;
use crate::error::ErrorKind;
use std::path::PathBuf;

pub use chatterbox::ChatterboxBackend;
pub use device::{detect_device, detect_dtype, Device, Dtype};
pub use fallback::FallbackBackend;
pub use sine::SineBackend;

/// Resolved input to one synthesis call. Voice resolution has already
/// happened: `voice_sample` is a readable reference file when cloning, and
/// `voice_id` names a predefined voice otherwise.
#[derive(Clone, Debug)]
pub struct SynthesisRequest {
    pub text: String,
    pub voice_id: Option<String>,
    pub voice_sample: Option<PathBuf>,
    pub params: AcousticParams,
    /// Where the backend must leave its raw wav.
    pub scratch_path: PathBuf,
}

#[derive(Clone, Debug)]
pub struct SynthesisOutput {
    pub wav_path: PathBuf,
    pub sample_rate: u32,
    pub duration_seconds: f64,
    pub provider: &'static str,
    pub device: Device,
}

#[derive(thiserror::Error, Debug)]
pub enum BackendError {
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    #[error("backend produced no audio")]
    Empty,
    #[error("backend resources exhausted: {0}")]
    ResourceExhausted(String),
    #[error("synthesis timed out: {0}")]
    Timeout(String),
    #[error("backend io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("backend error: {0}")]
    Other(String),
}

impl BackendError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::BackendUnavailable,
            Self::Empty => ErrorKind::SynthesisEmpty,
            Self::ResourceExhausted(_) => ErrorKind::ResourceExhausted,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Io(_) => ErrorKind::IoFailure,
            Self::Other(_) => ErrorKind::BackendUnavailable,
        }
    }
}

/// Uniform interface over concrete synthesis engines. Implementations are
/// internally synchronized where the underlying engine is not thread-safe;
/// callers may invoke `synthesize` from multiple worker threads.
pub trait TtsBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn device(&self) -> Device;

    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, BackendError>;

    /// Drop cached resources. Called before the single retry that follows a
    /// `ResourceExhausted` failure.
    fn clear_cache(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_kinds_follow_the_taxonomy() {
        assert_eq!(
            BackendError::Unavailable("down".into()).kind(),
            ErrorKind::BackendUnavailable
        );
        assert_eq!(BackendError::Empty.kind(), ErrorKind::SynthesisEmpty);
        assert_eq!(
            BackendError::ResourceExhausted("oom".into()).kind(),
            ErrorKind::ResourceExhausted
        );
        assert_eq!(
            BackendError::Timeout("120s".into()).kind(),
            ErrorKind::Timeout
        );
    }
}
