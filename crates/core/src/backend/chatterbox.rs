use crate::audio::wav_duration_seconds;
use crate::backend::{
    BackendError, Device, Dtype, SynthesisOutput, SynthesisRequest, TtsBackend,
};
use crate::util::LruCache;
use reqwest::blocking::{multipart, Client};
use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

const LOG_TARGET: &str = "backend::chatterbox";
const HEALTH_TIMEOUT: Duration = Duration::from_secs(5);

/// JSON body for predefined-voice synthesis. Field names follow the
/// Chatterbox server API; `speed_factor` is its spelling of speed.
#[derive(Serialize)]
struct SpeechBody<'a> {
    text: &'a str,
    voice_mode: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    predefined_voice_id: Option<String>,
    output_format: &'static str,
    exaggeration: f32,
    cfg_weight: f32,
    temperature: f32,
    speed_factor: f32,
    seed: i64,
}

struct BackendState {
    samples: LruCache<PathBuf, Arc<Vec<u8>>>,
    ready: bool,
}

/// Adapter for a Chatterbox-compatible TTS server. The server owns the
/// model; this side owns serialization of calls (the model is not assumed
/// thread-safe) and a small LRU of clone reference samples.
pub struct ChatterboxBackend {
    http: Client,
    base_url: String,
    device: Device,
    dtype: Dtype,
    state: Mutex<BackendState>,
}

impl ChatterboxBackend {
    pub fn new(
        base_url: impl Into<String>,
        device: Device,
        dtype: Dtype,
        request_timeout: Duration,
        sample_cache_entries: usize,
    ) -> Result<Self, BackendError> {
        let http = Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            device,
            dtype,
            state: Mutex::new(BackendState {
                samples: LruCache::new(sample_cache_entries.max(1)),
                ready: false,
            }),
        })
    }

    pub fn dtype(&self) -> Dtype {
        self.dtype
    }

    /// First call probes the server once; success is memoized for the
    /// process lifetime, mirroring lazy model load.
    fn ensure_ready(&self, state: &mut BackendState) -> Result<(), BackendError> {
        if state.ready {
            return Ok(());
        }
        let url = format!("{}/health", self.base_url);
        let response = self
            .http
            .get(&url)
            .timeout(HEALTH_TIMEOUT)
            .send()
            .map_err(|e| BackendError::Unavailable(format!("{url}: {e}")))?;
        if !response.status().is_success() {
            return Err(BackendError::Unavailable(format!(
                "{url} returned {}",
                response.status()
            )));
        }
        state.ready = true;
        tracing::info!(target: LOG_TARGET, url = %self.base_url, device = %self.device, "chatterbox server ready");
        Ok(())
    }

    /// Cache key is the absolute path so the same sample reached through
    /// different working directories hits the same entry.
    fn sample_bytes(
        &self,
        state: &mut BackendState,
        path: &PathBuf,
    ) -> Result<Arc<Vec<u8>>, BackendError> {
        let key = path.canonicalize().unwrap_or_else(|_| path.clone());
        if let Some(bytes) = state.samples.get(&key) {
            return Ok(Arc::clone(bytes));
        }
        let bytes = Arc::new(std::fs::read(&key)?);
        state.samples.put(key, Arc::clone(&bytes));
        tracing::debug!(target: LOG_TARGET, sample = %path.display(), "cached clone reference sample");
        Ok(bytes)
    }

    fn send(
        &self,
        state: &mut BackendState,
        request: &SynthesisRequest,
    ) -> Result<reqwest::blocking::Response, BackendError> {
        let url = format!("{}/tts", self.base_url);
        let result = match &request.voice_sample {
            None => {
                let body = SpeechBody {
                    text: &request.text,
                    voice_mode: "predefined",
                    predefined_voice_id: request
                        .voice_id
                        .as_ref()
                        .map(|id| format!("{id}.wav")),
                    output_format: "wav",
                    exaggeration: request.params.exaggeration,
                    cfg_weight: request.params.cfg_weight,
                    temperature: request.params.temperature,
                    speed_factor: request.params.speed,
                    seed: -1,
                };
                self.http.post(&url).json(&body).send()
            }
            Some(sample_path) => {
                let bytes = self.sample_bytes(state, sample_path)?;
                let file_name = sample_path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "reference.wav".to_owned());
                let part = multipart::Part::bytes(bytes.as_ref().clone())
                    .file_name(file_name)
                    .mime_str("audio/wav")
                    .map_err(|e| BackendError::Other(e.to_string()))?;
                let form = multipart::Form::new()
                    .text("text", request.text.clone())
                    .text("voice_mode", "clone")
                    .text("output_format", "wav")
                    .text("exaggeration", request.params.exaggeration.to_string())
                    .text("cfg_weight", request.params.cfg_weight.to_string())
                    .text("temperature", request.params.temperature.to_string())
                    .text("speed_factor", request.params.speed.to_string())
                    .part("reference_audio", part);
                self.http.post(&url).multipart(form).send()
            }
        };

        result.map_err(|e| {
            if e.is_timeout() {
                BackendError::Timeout(e.to_string())
            } else if e.is_connect() {
                BackendError::Unavailable(e.to_string())
            } else {
                BackendError::Other(e.to_string())
            }
        })
    }
}

/// Classify a non-success server reply. Device OOM surfaces as a 500 whose
/// body names the allocator.
fn classify_failure(status: reqwest::StatusCode, body: &str) -> BackendError {
    let lowered = body.to_ascii_lowercase();
    if lowered.contains("out of memory") || lowered.contains("cuda oom") {
        return BackendError::ResourceExhausted(body.trim().to_owned());
    }
    if status == reqwest::StatusCode::SERVICE_UNAVAILABLE {
        return BackendError::Unavailable(body.trim().to_owned());
    }
    BackendError::Other(format!("{status}: {}", body.trim()))
}

impl TtsBackend for ChatterboxBackend {
    fn name(&self) -> &'static str {
        "chatterbox"
    }

    fn device(&self) -> Device {
        self.device
    }

    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, BackendError> {
        // The lock spans the whole call: the server's model is treated as
        // single-threaded, so synthesis is serialized while the rest of the
        // pipeline runs concurrently on other workers.
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        self.ensure_ready(&mut state)?;

        let response = self.send(&mut state, request)?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(classify_failure(status, &body));
        }

        let audio = response
            .bytes()
            .map_err(|e| BackendError::Other(e.to_string()))?;
        if audio.is_empty() {
            return Err(BackendError::Empty);
        }
        std::fs::write(&request.scratch_path, &audio)?;

        let reader = hound::WavReader::open(&request.scratch_path)
            .map_err(|e| BackendError::Other(format!("server returned non-wav audio: {e}")))?;
        let sample_rate = reader.spec().sample_rate;
        drop(reader);
        let duration_seconds = wav_duration_seconds(&request.scratch_path)
            .map_err(|e| BackendError::Other(e.to_string()))?;
        if duration_seconds <= 0.0 {
            return Err(BackendError::Empty);
        }

        Ok(SynthesisOutput {
            wav_path: request.scratch_path.clone(),
            sample_rate,
            duration_seconds,
            provider: self.name(),
            device: self.device,
        })
    }

    fn clear_cache(&self) {
        let mut state = self.state.lock().unwrap_or_else(|e| e.into_inner());
        state.samples.clear();
        tracing::debug!(target: LOG_TARGET, "cleared clone sample cache");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn speech_body_serializes_like_the_server_expects() {
        let body = SpeechBody {
            text: "hello",
            voice_mode: "predefined",
            predefined_voice_id: Some("alice.wav".into()),
            output_format: "wav",
            exaggeration: 1.0,
            cfg_weight: 0.6,
            temperature: 0.8,
            speed_factor: 1.0,
            seed: -1,
        };
        let json: serde_json::Value = serde_json::from_str(&serde_json::to_string(&body).unwrap()).unwrap();
        assert_eq!(json["voice_mode"], "predefined");
        assert_eq!(json["predefined_voice_id"], "alice.wav");
        assert_eq!(json["speed_factor"], 1.0);
        assert_eq!(json["seed"], -1);
    }

    #[test]
    fn oom_bodies_map_to_resource_exhaustion() {
        let err = classify_failure(
            reqwest::StatusCode::INTERNAL_SERVER_ERROR,
            "CUDA error: out of memory",
        );
        assert!(matches!(err, BackendError::ResourceExhausted(_)));
    }

    #[test]
    fn unavailable_status_maps_to_unavailable() {
        let err = classify_failure(reqwest::StatusCode::SERVICE_UNAVAILABLE, "warming up");
        assert!(matches!(err, BackendError::Unavailable(_)));
        let other = classify_failure(reqwest::StatusCode::BAD_REQUEST, "bad text");
        assert!(matches!(other, BackendError::Other(_)));
    }
}
