mod validate;

use crate::audio::{EchoTweaks, InnerVoiceKind, OutputFormat, PostProcessor};
use crate::backend::{BackendError, SynthesisRequest, TtsBackend};
use crate::emotion::{EmotionRegistry, ParamOverrides};
use crate::error::{ErrorKind, RenderError, Warning};
use crate::voice::VoiceCatalog;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub use validate::{resolve, ResolvedRequest};

const LOG_TARGET: &str = "render";

#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum VoiceMode {
    #[default]
    Selection,
    Clone,
}

/// One utterance to render. Defaults are tuned so a JSON body can carry
/// nothing but `text`.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
pub struct RenderRequest {
    pub text: String,
    #[serde(default)]
    pub character_id: Option<String>,
    #[serde(default)]
    pub voice_id: Option<String>,
    #[serde(default)]
    pub voice_mode: VoiceMode,
    #[serde(default)]
    pub voice_clone_path: Option<PathBuf>,
    #[serde(default)]
    pub emotion: Option<String>,
    #[serde(default)]
    pub parameter_overrides: ParamOverrides,
    #[serde(default)]
    pub inner_voice: InnerVoiceKind,
    #[serde(default)]
    pub inner_voice_tweaks: EchoTweaks,
    #[serde(default)]
    pub output_format: OutputFormat,
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct RenderResult {
    pub success: bool,
    pub output_path: Option<PathBuf>,
    pub duration_seconds: f64,
    pub provider_used: Option<String>,
    pub device_used: Option<String>,
    pub warnings: Vec<Warning>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
}

impl RenderResult {
    pub fn failure(error: RenderError) -> Self {
        Self {
            success: false,
            output_path: None,
            duration_seconds: 0.0,
            provider_used: None,
            device_used: None,
            warnings: Vec::new(),
            error_kind: Some(error.kind),
            error_message: Some(error.message),
        }
    }

    fn cancelled() -> Self {
        Self {
            success: false,
            output_path: None,
            duration_seconds: 0.0,
            provider_used: None,
            device_used: None,
            warnings: Vec::new(),
            error_kind: None,
            error_message: Some("cancelled before completion".to_owned()),
        }
    }
}

/// Single-utterance orchestration: validate, resolve, synthesize,
/// post-process, persist.
pub struct Renderer {
    registry: Arc<EmotionRegistry>,
    catalog: Arc<VoiceCatalog>,
    backend: Arc<dyn TtsBackend>,
    postprocessor: Arc<PostProcessor>,
    outputs_dir: PathBuf,
    scratch: tempfile::TempDir,
    max_text_chars: usize,
}

impl Renderer {
    pub fn new(
        registry: Arc<EmotionRegistry>,
        catalog: Arc<VoiceCatalog>,
        backend: Arc<dyn TtsBackend>,
        postprocessor: Arc<PostProcessor>,
        outputs_dir: PathBuf,
        max_text_chars: usize,
    ) -> Result<Self, std::io::Error> {
        std::fs::create_dir_all(&outputs_dir)?;
        Ok(Self {
            registry,
            catalog,
            backend,
            postprocessor,
            outputs_dir,
            scratch: tempfile::Builder::new().prefix("voice-studio-render-").tempdir()?,
            max_text_chars,
        })
    }

    pub fn outputs_dir(&self) -> &PathBuf {
        &self.outputs_dir
    }

    pub fn render(&self, request: &RenderRequest) -> RenderResult {
        let stem = uuid::Uuid::new_v4().to_string();
        self.render_as(request, &stem, &AtomicBool::new(false))
    }

    /// Render with an externally supplied output stem (the batch task id)
    /// and a cooperative cancel flag. The flag is consulted before
    /// synthesis and again before post-processing; in-flight synthesis is
    /// never interrupted.
    pub fn render_as(
        &self,
        request: &RenderRequest,
        output_stem: &str,
        cancel: &AtomicBool,
    ) -> RenderResult {
        let resolved = match resolve(request, &self.registry, &self.catalog, self.max_text_chars)
        {
            Ok(resolved) => resolved,
            Err(error) => {
                tracing::warn!(target: LOG_TARGET, kind = %error.kind, message = %error.message, "render rejected");
                return RenderResult::failure(error);
            }
        };
        let mut warnings = resolved.warnings.clone();

        if cancel.load(Ordering::Relaxed) {
            return RenderResult::cancelled();
        }

        let scratch_path = self
            .scratch
            .path()
            .join(format!("{output_stem}_raw.wav"));
        let synthesis = SynthesisRequest {
            text: resolved.text.clone(),
            voice_id: resolved.voice_id.clone(),
            voice_sample: resolved.voice_sample.clone(),
            params: resolved.params,
            scratch_path,
        };

        let output = match self.synthesize_with_retry(&synthesis) {
            Ok(output) => output,
            Err(error) => {
                let error = RenderError::new(error.kind(), error.to_string());
                tracing::warn!(target: LOG_TARGET, kind = %error.kind, message = %error.message, "synthesis failed");
                return RenderResult {
                    warnings,
                    ..RenderResult::failure(error)
                };
            }
        };

        if cancel.load(Ordering::Relaxed) {
            return RenderResult::cancelled();
        }

        let output_path = self
            .outputs_dir
            .join(format!("{output_stem}.{}", resolved.format.extension()));
        let (final_path, duration_seconds) = match self.postprocessor.process(
            &output.wav_path,
            &output_path,
            resolved.format,
            resolved.echo,
        ) {
            Ok(outcome) => {
                warnings.extend(outcome.warnings);
                (outcome.output_path, outcome.duration_seconds)
            }
            Err(audio_error) => {
                // Raw synthesis succeeded, so the render must not fail on a
                // post-processing problem. Persist the raw track instead.
                tracing::warn!(target: LOG_TARGET, error = %audio_error, "post-processing failed, persisting raw synthesis");
                if let Err(io) = std::fs::copy(&output.wav_path, &output_path) {
                    return RenderResult {
                        warnings,
                        ..RenderResult::failure(RenderError::new(
                            ErrorKind::IoFailure,
                            format!("failed to persist output: {io}"),
                        ))
                    };
                }
                warnings.push(Warning::new(
                    ErrorKind::PostProcessDegraded,
                    format!("post-processing failed ({audio_error}), output is raw synthesis"),
                ));
                (output_path.clone(), output.duration_seconds)
            }
        };

        tracing::info!(
            target: LOG_TARGET,
            output = %final_path.display(),
            provider = output.provider,
            device = %output.device,
            duration_seconds,
            "render complete"
        );

        RenderResult {
            success: true,
            output_path: Some(final_path),
            duration_seconds,
            provider_used: Some(output.provider.to_owned()),
            device_used: Some(output.device.to_string()),
            warnings,
            error_kind: None,
            error_message: None,
        }
    }

    /// Exactly one automatic retry, and only for resource exhaustion: the
    /// backend drops its caches first, then gets a second chance.
    fn synthesize_with_retry(
        &self,
        synthesis: &SynthesisRequest,
    ) -> Result<crate::backend::SynthesisOutput, BackendError> {
        match self.backend.synthesize(synthesis) {
            Err(BackendError::ResourceExhausted(reason)) => {
                tracing::warn!(target: LOG_TARGET, reason = %reason, "backend resources exhausted, clearing caches and retrying once");
                self.backend.clear_cache();
                self.backend.synthesize(synthesis)
            }
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioQualitySettings, Toolchain};
    use crate::backend::{Device, SineBackend, SynthesisOutput};
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    fn renderer_with_backend(
        dir: &tempfile::TempDir,
        backend: Arc<dyn TtsBackend>,
    ) -> Renderer {
        let registry =
            EmotionRegistry::open(dir.path().join("registry.json")).expect("registry");
        let catalog = VoiceCatalog::open(dir.path().join("voices"), 30.0).expect("catalog");
        let postprocessor = PostProcessor::new(
            Toolchain::unavailable(Duration::from_secs(5)),
            AudioQualitySettings::default(),
            false,
        )
        .expect("postprocessor");
        Renderer::new(
            Arc::new(registry),
            Arc::new(catalog),
            backend,
            Arc::new(postprocessor),
            dir.path().join("outputs"),
            5000,
        )
        .expect("renderer")
    }

    fn sine_renderer(dir: &tempfile::TempDir) -> Renderer {
        renderer_with_backend(dir, Arc::new(SineBackend::new()))
    }

    #[test]
    fn default_request_renders_to_a_wav() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = sine_renderer(&dir);
        let result = renderer.render(&RenderRequest {
            text: "Hello world".into(),
            voice_id: Some("alice".into()),
            ..Default::default()
        });
        assert!(result.success, "{:?}", result.error_message);
        let path = result.output_path.expect("output path");
        assert!(path.exists());
        assert_eq!(path.extension().unwrap(), "wav");
        assert!((0.4..=2.0).contains(&result.duration_seconds));
        assert_eq!(result.provider_used.as_deref(), Some("sine"));
        assert_eq!(result.device_used.as_deref(), Some("cpu"));
    }

    #[test]
    fn unknown_emotion_succeeds_with_warning() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = sine_renderer(&dir);
        let result = renderer.render(&RenderRequest {
            text: "Hello".into(),
            voice_id: Some("alice".into()),
            emotion: Some("does-not-exist".into()),
            ..Default::default()
        });
        assert!(result.success);
        assert!(result
            .warnings
            .iter()
            .any(|w| w.kind == ErrorKind::EmotionNotFound));
    }

    #[test]
    fn clone_with_missing_sample_creates_no_output() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = sine_renderer(&dir);
        let result = renderer.render(&RenderRequest {
            text: "Hello".into(),
            voice_mode: VoiceMode::Clone,
            voice_clone_path: Some(PathBuf::from("/no/such.wav")),
            ..Default::default()
        });
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::InvalidRequest));
        assert!(result.output_path.is_none());
        let outputs: Vec<_> = std::fs::read_dir(renderer.outputs_dir())
            .unwrap()
            .filter_map(|e| e.ok())
            .collect();
        assert!(outputs.is_empty());
    }

    struct ExhaustedOnce {
        inner: SineBackend,
        attempts: AtomicUsize,
        cache_clears: AtomicUsize,
    }

    impl TtsBackend for ExhaustedOnce {
        fn name(&self) -> &'static str {
            "exhausted-once"
        }

        fn device(&self) -> Device {
            Device::Cuda
        }

        fn synthesize(
            &self,
            request: &SynthesisRequest,
        ) -> Result<SynthesisOutput, BackendError> {
            if self.attempts.fetch_add(1, Ordering::SeqCst) == 0 {
                return Err(BackendError::ResourceExhausted("simulated oom".into()));
            }
            self.inner.synthesize(request)
        }

        fn clear_cache(&self) {
            self.cache_clears.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn resource_exhaustion_is_retried_once_after_cache_clear() {
        let dir = tempfile::tempdir().expect("tempdir");
        let backend = Arc::new(ExhaustedOnce {
            inner: SineBackend::new(),
            attempts: AtomicUsize::new(0),
            cache_clears: AtomicUsize::new(0),
        });
        let renderer = renderer_with_backend(&dir, backend.clone());
        let result = renderer.render(&RenderRequest {
            text: "retry me".into(),
            ..Default::default()
        });
        assert!(result.success);
        assert_eq!(backend.attempts.load(Ordering::SeqCst), 2);
        assert_eq!(backend.cache_clears.load(Ordering::SeqCst), 1);
    }

    struct AlwaysEmpty;

    impl TtsBackend for AlwaysEmpty {
        fn name(&self) -> &'static str {
            "always-empty"
        }

        fn device(&self) -> Device {
            Device::Cpu
        }

        fn synthesize(
            &self,
            _request: &SynthesisRequest,
        ) -> Result<SynthesisOutput, BackendError> {
            Err(BackendError::Empty)
        }
    }

    #[test]
    fn synthesis_empty_is_not_retried() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = renderer_with_backend(&dir, Arc::new(AlwaysEmpty));
        let result = renderer.render(&RenderRequest {
            text: "silence".into(),
            ..Default::default()
        });
        assert!(!result.success);
        assert_eq!(result.error_kind, Some(ErrorKind::SynthesisEmpty));
    }

    #[test]
    fn cancel_flag_short_circuits_before_postprocess() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = sine_renderer(&dir);
        let cancel = AtomicBool::new(true);
        let result = renderer.render_as(
            &RenderRequest {
                text: "never mind".into(),
                ..Default::default()
            },
            "cancelled-task",
            &cancel,
        );
        assert!(!result.success);
        assert!(result.error_kind.is_none());
    }

    #[test]
    fn batch_stem_names_the_output_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let renderer = sine_renderer(&dir);
        let result = renderer.render_as(
            &RenderRequest {
                text: "named output".into(),
                ..Default::default()
            },
            "task-42",
            &AtomicBool::new(false),
        );
        let path = result.output_path.expect("path");
        assert_eq!(path.file_name().unwrap(), "task-42.wav");
    }
}
