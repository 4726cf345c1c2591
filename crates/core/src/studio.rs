use crate::audio::{AudioError, AudioQualitySettings, PostProcessor, Toolchain};
use crate::backend::{
    detect_device, detect_dtype, BackendError, ChatterboxBackend, FallbackBackend, SineBackend,
    TtsBackend,
};
use crate::batch::{Scheduler, SchedulerError, TaskStatus};
use crate::concat::Concatenator;
use crate::config::{Env, EngineConfig};
use crate::emotion::{Emotion, EmotionRegistry, ParamOverrides, RegistryError};
use crate::error::{ErrorKind, RenderError, Warning};
use crate::render::{RenderRequest, RenderResult, Renderer};
use crate::text::PausePlanner;
use crate::voice::{CatalogError, Voice, VoiceCatalog};
use std::path::PathBuf;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

const LOG_TARGET: &str = "studio";

#[derive(thiserror::Error, Debug)]
pub enum StudioError {
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Catalog(#[from] CatalogError),
    #[error(transparent)]
    Audio(#[from] AudioError),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error("studio io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result of rendering a whole multi-line script into one track.
#[derive(Clone, Debug)]
pub struct ScriptResult {
    pub output_path: PathBuf,
    pub duration_seconds: f64,
    pub utterance_count: usize,
    pub warnings: Vec<Warning>,
}

/// The programmatic surface of the synthesis core. Owns the emotion
/// registry, voice catalog, backend, pipeline and scheduler; CLI, HTTP and
/// GUI shells are thin layers over this type.
pub struct Studio {
    config: EngineConfig,
    registry: Arc<EmotionRegistry>,
    catalog: Arc<VoiceCatalog>,
    renderer: Arc<Renderer>,
    scheduler: Scheduler,
    concatenator: Concatenator,
    planner: PausePlanner,
}

impl Studio {
    /// Production construction: probe the toolchain, detect the device, and
    /// stand up the chatterbox backend with the sine fallback behind it.
    pub fn open(config: EngineConfig, env: &impl Env) -> Result<Self, StudioError> {
        let device = detect_device(env);
        let dtype = detect_dtype(env, device);
        let primary = ChatterboxBackend::new(
            config.chatterbox_url.clone(),
            device,
            dtype,
            config.limits.task_timeout,
            config.limits.sample_cache_entries,
        )?;
        let backend: Arc<dyn TtsBackend> =
            Arc::new(FallbackBackend::new(primary, SineBackend::new()));
        let toolchain = Toolchain::probe(config.limits.subprocess_timeout);
        Self::with_parts(config, backend, toolchain)
    }

    /// Explicit construction from pre-built collaborators. Tests use this
    /// with the deterministic backend and an explicitly degraded toolchain.
    pub fn with_parts(
        config: EngineConfig,
        backend: Arc<dyn TtsBackend>,
        toolchain: Toolchain,
    ) -> Result<Self, StudioError> {
        let registry = Arc::new(EmotionRegistry::open(config.layout.registry_path())?);
        let catalog = Arc::new(VoiceCatalog::open(
            config.layout.voices_dir(),
            config.limits.max_sample_seconds,
        )?);
        let postprocessor = Arc::new(PostProcessor::new(
            toolchain.clone(),
            AudioQualitySettings::default(),
            config.disable_postprocess,
        )?);
        let renderer = Arc::new(Renderer::new(
            Arc::clone(&registry),
            Arc::clone(&catalog),
            backend,
            postprocessor,
            config.layout.outputs_dir(),
            config.limits.max_text_chars,
        )?);
        let scheduler = Scheduler::new(
            Arc::clone(&renderer) as Arc<dyn crate::batch::RenderHandler>,
            config.limits.workers.get(),
            config.limits.queue_capacity,
        );
        scheduler.start();
        let planner = PausePlanner::new(config.limits.pause_per_break_seconds);

        tracing::info!(
            target: LOG_TARGET,
            root = %config.layout.root().display(),
            workers = config.limits.workers.get(),
            "voice studio core ready"
        );
        Ok(Self {
            config,
            registry,
            catalog,
            renderer,
            scheduler,
            concatenator: Concatenator::new(toolchain),
            planner,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Stop the worker pool. Queued tasks drain first.
    pub fn shutdown(&self) {
        self.scheduler.stop();
    }

    pub fn synthesize_one(&self, request: &RenderRequest) -> RenderResult {
        self.renderer.render(request)
    }

    pub fn submit_batch(
        &self,
        requests: Vec<RenderRequest>,
    ) -> Result<Vec<String>, SchedulerError> {
        requests
            .into_iter()
            .map(|request| self.scheduler.submit(request, 0))
            .collect()
    }

    pub fn get_status(&self, task_id: &str) -> Option<TaskStatus> {
        self.scheduler.status(task_id)
    }

    pub fn cancel(&self, task_id: &str) -> bool {
        self.scheduler.cancel(task_id)
    }

    pub fn metrics(&self) -> crate::batch::SchedulerMetrics {
        self.scheduler.metrics()
    }

    pub fn list_voices(&self) -> Vec<Voice> {
        self.catalog.list()
    }

    pub fn upload_voice(
        &self,
        wav_bytes: &[u8],
        name: Option<&str>,
    ) -> Result<Voice, CatalogError> {
        self.catalog.upload(wav_bytes, name)
    }

    pub fn delete_voice(&self, id: &str) -> Result<(), CatalogError> {
        self.catalog.delete(id)
    }

    pub fn list_emotions(&self) -> Vec<Emotion> {
        self.registry.list()
    }

    pub fn customize_emotion(
        &self,
        name: &str,
        overrides: ParamOverrides,
    ) -> Result<Emotion, RegistryError> {
        self.registry.customize(name, overrides)
    }

    pub fn reset_emotion(&self, name: &str) -> Result<Emotion, RegistryError> {
        self.registry.reset(name)
    }

    /// Render a multi-line script as one track: plan pauses at line breaks,
    /// render each utterance with the request's voice and emotion, then
    /// concatenate with the planned silences.
    pub fn synthesize_script(&self, request: &RenderRequest) -> Result<ScriptResult, RenderError> {
        let plan = self.planner.plan(&request.text);
        if plan.is_empty() {
            return Err(RenderError::invalid_request(
                "script contains no speakable lines",
            ));
        }

        let batch_id = uuid::Uuid::new_v4().simple().to_string();
        let mut segments = Vec::with_capacity(plan.len());
        let mut warnings = Vec::new();
        let no_cancel = AtomicBool::new(false);

        for (index, utterance) in plan.iter().enumerate() {
            let mut line_request = request.clone();
            line_request.text = utterance.text.clone();
            line_request.output_format = crate::audio::OutputFormat::Wav;
            let stem = format!("{batch_id}_{index}");
            let result = self.renderer.render_as(&line_request, &stem, &no_cancel);
            if !result.success {
                return Err(RenderError::new(
                    result.error_kind.unwrap_or(ErrorKind::IoFailure),
                    result
                        .error_message
                        .unwrap_or_else(|| "utterance render failed".to_owned()),
                ));
            }
            warnings.extend(result.warnings);
            let path = result
                .output_path
                .ok_or_else(|| RenderError::new(ErrorKind::IoFailure, "missing output path"))?;
            segments.push((path, utterance.trailing_silence_seconds));
        }

        let output = self
            .renderer
            .outputs_dir()
            .join(format!("{batch_id}.{}", request.output_format.extension()));
        let outcome = self
            .concatenator
            .concatenate(&segments, request.output_format, &output)
            .map_err(|e| RenderError::new(ErrorKind::IoFailure, e.to_string()))?;
        warnings.extend(outcome.warnings);

        // intermediate per-line files are not part of the deliverable
        for (path, _) in &segments {
            std::fs::remove_file(path).ok();
        }

        Ok(ScriptResult {
            output_path: outcome.output_path,
            duration_seconds: outcome.duration_seconds,
            utterance_count: plan.len(),
            warnings,
        })
    }
}

impl Drop for Studio {
    fn drop(&mut self) {
        self.shutdown();
    }
}
