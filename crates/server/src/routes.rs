use axum::{
    extract::{Multipart, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use voice_studio_core::emotion::ParamOverrides;
use voice_studio_core::error::ErrorKind;
use voice_studio_core::render::RenderRequest;
use voice_studio_core::studio::Studio;
use voice_studio_core::voice::CatalogError;

#[derive(Clone)]
pub struct AppState {
    pub studio: Arc<Studio>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/v1/audio/speech", post(speech))
        .route("/v1/voices/", get(list_voices))
        .route("/v1/voices/upload", post(upload_voice))
        .route("/health", get(health))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any))
        .with_state(state)
}

/// Error body shape shared by every endpoint.
struct ApiError {
    status: StatusCode,
    kind: String,
    message: String,
}

impl ApiError {
    fn from_kind(kind: ErrorKind, message: String) -> Self {
        let status = match kind {
            ErrorKind::InvalidRequest | ErrorKind::EmotionNotFound => StatusCode::BAD_REQUEST,
            ErrorKind::VoiceNotFound => StatusCode::NOT_FOUND,
            ErrorKind::DuplicateVoice => StatusCode::CONFLICT,
            ErrorKind::BackendUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::SynthesisEmpty
            | ErrorKind::ResourceExhausted
            | ErrorKind::PostProcessDegraded
            | ErrorKind::Timeout
            | ErrorKind::IoFailure => StatusCode::INTERNAL_SERVER_ERROR,
        };
        Self {
            status,
            kind: kind.as_str().to_owned(),
            message,
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::InvalidRequest, message.into())
    }

    fn internal(message: impl Into<String>) -> Self {
        Self::from_kind(ErrorKind::IoFailure, message.into())
    }
}

impl From<CatalogError> for ApiError {
    fn from(error: CatalogError) -> Self {
        let kind = match &error {
            CatalogError::NotFound(_) => ErrorKind::VoiceNotFound,
            CatalogError::Duplicate(_) => ErrorKind::DuplicateVoice,
            CatalogError::InvalidName(_)
            | CatalogError::InvalidSample(_)
            | CatalogError::SampleTooLong { .. }
            | CatalogError::BuiltinImmutable(_) => ErrorKind::InvalidRequest,
            CatalogError::DuplicateOnDisk { .. } | CatalogError::Io(_) => ErrorKind::IoFailure,
        };
        Self::from_kind(kind, error.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({
                "error_kind": self.kind,
                "message": self.message,
            })),
        )
            .into_response()
    }
}

/// Body of `POST /v1/audio/speech`.
#[derive(Debug, Deserialize)]
struct SpeechRequest {
    input: String,
    #[serde(default)]
    voice_id: Option<String>,
    #[serde(default)]
    emotion: Option<String>,
    #[serde(default)]
    exaggeration: Option<f32>,
    #[serde(default)]
    cfg_weight: Option<f32>,
    #[serde(default)]
    temperature: Option<f32>,
    #[serde(default)]
    speed: Option<f32>,
    #[serde(default)]
    inner: voice_studio_core::audio::InnerVoiceKind,
}

async fn speech(
    State(state): State<AppState>,
    Json(body): Json<SpeechRequest>,
) -> Result<Response, ApiError> {
    let request = RenderRequest {
        text: body.input,
        voice_id: body.voice_id,
        emotion: body.emotion,
        parameter_overrides: ParamOverrides {
            exaggeration: body.exaggeration,
            cfg_weight: body.cfg_weight,
            temperature: body.temperature,
            speed: body.speed,
        },
        inner_voice: body.inner,
        ..Default::default()
    };

    let studio = Arc::clone(&state.studio);
    let result = tokio::task::spawn_blocking(move || studio.synthesize_one(&request))
        .await
        .map_err(|e| ApiError::internal(format!("render task panicked: {e}")))?;

    if !result.success {
        let kind = result.error_kind.unwrap_or(ErrorKind::IoFailure);
        return Err(ApiError::from_kind(
            kind,
            result.error_message.unwrap_or_default(),
        ));
    }

    let path = result
        .output_path
        .ok_or_else(|| ApiError::internal("render produced no output path"))?;
    let audio = tokio::fs::read(&path)
        .await
        .map_err(|e| ApiError::internal(format!("reading {}: {e}", path.display())))?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, "audio/wav")],
        audio,
    )
        .into_response())
}

async fn list_voices(State(state): State<AppState>) -> Json<serde_json::Value> {
    let voices = state.studio.list_voices();
    Json(serde_json::json!({
        "count": voices.len(),
        "voices": voices
            .iter()
            .map(|v| serde_json::json!({
                "id": v.id,
                "name": v.display_name,
                "gender": v.gender.as_str(),
                "description": v.description,
            }))
            .collect::<Vec<_>>(),
    }))
}

async fn upload_voice(
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<Json<serde_json::Value>, ApiError> {
    let mut wav_bytes: Option<Vec<u8>> = None;
    let mut name: Option<String> = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("invalid multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                if name.is_none() {
                    name = field
                        .file_name()
                        .map(|f| f.trim_end_matches(".wav").to_owned());
                }
                wav_bytes = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("reading upload: {e}")))?
                        .to_vec(),
                );
            }
            Some("name") => {
                name = Some(
                    field
                        .text()
                        .await
                        .map_err(|e| ApiError::bad_request(format!("reading name: {e}")))?,
                );
            }
            _ => {}
        }
    }

    let wav_bytes = wav_bytes.ok_or_else(|| ApiError::bad_request("missing file field"))?;
    let studio = Arc::clone(&state.studio);
    let voice = tokio::task::spawn_blocking(move || {
        studio.upload_voice(&wav_bytes, name.as_deref())
    })
    .await
    .map_err(|e| ApiError::internal(format!("upload task panicked: {e}")))??;

    Ok(Json(serde_json::json!({
        "success": true,
        "voice_id": voice.id,
    })))
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use voice_studio_core::audio::Toolchain;
    use voice_studio_core::backend::SineBackend;
    use voice_studio_core::config::{EngineConfig, MapEnv};

    #[test]
    fn router_builds_against_a_fresh_studio() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = EngineConfig::from_env(dir.path(), &MapEnv::default()).expect("config");
        let studio = Studio::with_parts(
            config,
            Arc::new(SineBackend::new()),
            Toolchain::unavailable(Duration::from_secs(5)),
        )
        .expect("studio");
        let _ = router(AppState {
            studio: Arc::new(studio),
        });
    }

    #[test]
    fn error_kinds_map_to_the_documented_statuses() {
        assert_eq!(
            ApiError::from_kind(ErrorKind::InvalidRequest, String::new()).status,
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from_kind(ErrorKind::VoiceNotFound, String::new()).status,
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from_kind(ErrorKind::DuplicateVoice, String::new()).status,
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::from_kind(ErrorKind::BackendUnavailable, String::new()).status,
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::from_kind(ErrorKind::SynthesisEmpty, String::new()).status,
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
