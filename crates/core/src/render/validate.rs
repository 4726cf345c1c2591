use crate::audio::{EchoParams, OutputFormat};
use crate::emotion::{AcousticParams, EmotionRegistry};
use crate::error::{ErrorKind, RenderError, Warning};
use crate::render::{RenderRequest, VoiceMode};
use crate::voice::VoiceCatalog;
use std::path::PathBuf;

/// A request after validation: parameters merged and clamped, voice and
/// inner-voice resolved, ready to hand to a backend.
#[derive(Clone, Debug)]
pub struct ResolvedRequest {
    pub text: String,
    pub voice_id: Option<String>,
    pub voice_sample: Option<PathBuf>,
    pub params: AcousticParams,
    pub echo: Option<EchoParams>,
    pub format: OutputFormat,
    pub warnings: Vec<Warning>,
}

pub fn resolve(
    request: &RenderRequest,
    registry: &EmotionRegistry,
    catalog: &VoiceCatalog,
    max_text_chars: usize,
) -> Result<ResolvedRequest, RenderError> {
    let text = request.text.trim();
    if text.is_empty() {
        return Err(RenderError::invalid_request("text must not be empty"));
    }
    let chars = text.chars().count();
    if chars > max_text_chars {
        return Err(RenderError::invalid_request(format!(
            "text is {chars} characters, limit is {max_text_chars}"
        )));
    }

    let mut warnings = Vec::new();

    let base_params = match &request.emotion {
        None => registry.neutral_params(),
        Some(name) => match registry.get(name) {
            Ok(emotion) => emotion.params,
            Err(_) => {
                warnings.push(Warning::new(
                    ErrorKind::EmotionNotFound,
                    format!("unknown emotion {name:?}, using neutral"),
                ));
                registry.neutral_params()
            }
        },
    };
    let params = request.parameter_overrides.apply(base_params).clamped();

    let (voice_id, voice_sample) = match request.voice_mode {
        VoiceMode::Clone => {
            let path = request.voice_clone_path.as_ref().ok_or_else(|| {
                RenderError::invalid_request("voice_mode=clone requires voice_clone_path")
            })?;
            if !path.is_file() {
                return Err(RenderError::invalid_request(format!(
                    "voice clone sample not found: {}",
                    path.display()
                )));
            }
            std::fs::File::open(path).map_err(|e| {
                RenderError::invalid_request(format!(
                    "voice clone sample unreadable: {}: {e}",
                    path.display()
                ))
            })?;
            (None, Some(path.clone()))
        }
        VoiceMode::Selection => match &request.voice_id {
            None => (None, None),
            Some(id) => {
                let voice = catalog.get(id).map_err(|_| {
                    RenderError::new(ErrorKind::VoiceNotFound, format!("unknown voice id {id:?}"))
                })?;
                (Some(voice.id), voice.sample_path)
            }
        },
    };

    let echo = EchoParams::preset(request.inner_voice)
        .map(|preset| request.inner_voice_tweaks.apply(preset));

    Ok(ResolvedRequest {
        text: text.to_owned(),
        voice_id,
        voice_sample,
        params,
        echo,
        format: request.output_format,
        warnings,
    })
}
