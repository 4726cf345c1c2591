use std::{
    num::NonZeroUsize,
    path::{Path, PathBuf},
    time::Duration,
};

pub const DEFAULT_QUEUE_CAPACITY: usize = 100;
pub const DEFAULT_WORKER_CAP: usize = 4;
pub const DEFAULT_TASK_TIMEOUT_SECS: u64 = 120;
pub const DEFAULT_SUBPROCESS_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SAMPLE_CACHE_ENTRIES: usize = 32;
pub const DEFAULT_UPLOAD_CAP_SECS: f64 = 30.0;
pub const DEFAULT_MAX_TEXT_CHARS: usize = 5000;
pub const DEFAULT_PAUSE_PER_BREAK_SECS: f64 = 0.1;
pub const DEFAULT_CHATTERBOX_URL: &str = "http://localhost:8004";

pub const ENV_BACKEND_DEVICE: &str = "BACKEND_DEVICE";
pub const ENV_BACKEND_DTYPE: &str = "BACKEND_DTYPE";
pub const ENV_WORKERS: &str = "WORKERS";
pub const ENV_DISABLE_POSTPROCESS: &str = "DISABLE_POSTPROCESS";
pub const ENV_CHATTERBOX_URL: &str = "CHATTERBOX_URL";

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("worker count must be > 0")]
    ZeroWorkers,
    #[error("invalid value for {key}: {value}")]
    InvalidEnvValue { key: String, value: String },
}

/// Abstraction over process environment lookup so config resolution is
/// testable without mutating global state.
pub trait Env {
    fn var(&self, key: &str) -> Option<String>;
}

#[derive(Clone, Debug, Default)]
pub struct StdEnv;

impl Env for StdEnv {
    fn var(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }
}

#[derive(Clone, Debug, Default)]
pub struct MapEnv {
    vars: std::collections::BTreeMap<String, String>,
}

impl MapEnv {
    pub fn with_var(mut self, key: &str, value: &str) -> Self {
        self.vars.insert(key.to_owned(), value.to_owned());
        self
    }
}

impl Env for MapEnv {
    fn var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }
}

/// Number of scheduler workers, capped at the machine's parallelism.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WorkerCount(usize);

impl WorkerCount {
    pub fn new(configured: usize) -> Result<Self, ConfigError> {
        if configured == 0 {
            return Err(ConfigError::ZeroWorkers);
        }
        let hw = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        Ok(Self(configured.min(hw)))
    }

    pub fn get(&self) -> usize {
        self.0
    }
}

impl Default for WorkerCount {
    fn default() -> Self {
        Self::new(DEFAULT_WORKER_CAP).unwrap_or(Self(1))
    }
}

/// On-disk layout: voice samples, the emotion registry document and
/// rendered outputs all live under one data root.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DataLayout {
    root: PathBuf,
}

impl DataLayout {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn voices_dir(&self) -> PathBuf {
        self.root.join("voices")
    }

    pub fn registry_path(&self) -> PathBuf {
        self.root.join("emotions").join("registry.json")
    }

    pub fn outputs_dir(&self) -> PathBuf {
        self.root.join("outputs")
    }
}

#[derive(Clone, Debug)]
pub struct Limits {
    pub queue_capacity: usize,
    pub workers: WorkerCount,
    pub task_timeout: Duration,
    pub subprocess_timeout: Duration,
    pub sample_cache_entries: usize,
    pub max_sample_seconds: f64,
    pub max_text_chars: usize,
    pub pause_per_break_seconds: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            workers: WorkerCount::default(),
            task_timeout: Duration::from_secs(DEFAULT_TASK_TIMEOUT_SECS),
            subprocess_timeout: Duration::from_secs(DEFAULT_SUBPROCESS_TIMEOUT_SECS),
            sample_cache_entries: DEFAULT_SAMPLE_CACHE_ENTRIES,
            max_sample_seconds: DEFAULT_UPLOAD_CAP_SECS,
            max_text_chars: DEFAULT_MAX_TEXT_CHARS,
            pause_per_break_seconds: DEFAULT_PAUSE_PER_BREAK_SECS,
        }
    }
}

#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub layout: DataLayout,
    pub limits: Limits,
    pub disable_postprocess: bool,
    pub chatterbox_url: String,
}

impl EngineConfig {
    /// Assemble a config from a data root plus recognized environment
    /// variables. CLI flags are expected to be resolved by the caller and
    /// passed through `limits` afterwards.
    pub fn from_env<P: Into<PathBuf>>(root: P, env: &impl Env) -> Result<Self, ConfigError> {
        let mut limits = Limits::default();
        if let Some(workers) = resolve_workers(env)? {
            limits.workers = workers;
        }

        Ok(Self {
            layout: DataLayout::new(root),
            limits,
            disable_postprocess: resolve_bool(ENV_DISABLE_POSTPROCESS, env)?,
            chatterbox_url: env
                .var(ENV_CHATTERBOX_URL)
                .unwrap_or_else(|| DEFAULT_CHATTERBOX_URL.to_owned()),
        })
    }
}

fn resolve_workers(env: &impl Env) -> Result<Option<WorkerCount>, ConfigError> {
    match env.var(ENV_WORKERS) {
        None => Ok(None),
        Some(raw) => {
            let parsed: usize = raw.parse().map_err(|_| ConfigError::InvalidEnvValue {
                key: ENV_WORKERS.to_owned(),
                value: raw.clone(),
            })?;
            WorkerCount::new(parsed).map(Some)
        }
    }
}

pub fn resolve_bool(key: &str, env: &impl Env) -> Result<bool, ConfigError> {
    match env.var(key) {
        None => Ok(false),
        Some(raw) => match raw.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(true),
            "false" | "0" | "no" | "" => Ok(false),
            _ => Err(ConfigError::InvalidEnvValue {
                key: key.to_owned(),
                value: raw,
            }),
        },
    }
}

pub fn resolve_string_with_default(
    cli_value: Option<String>,
    env_key: &str,
    env: &impl Env,
    default: &str,
) -> String {
    match cli_value {
        Some(v) => v,
        None => env.var(env_key).unwrap_or_else(|| default.to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_count_rejects_zero() {
        assert_eq!(WorkerCount::new(0), Err(ConfigError::ZeroWorkers));
    }

    #[test]
    fn worker_count_caps_at_hardware() {
        let hw = std::thread::available_parallelism()
            .map(NonZeroUsize::get)
            .unwrap_or(1);
        let w = WorkerCount::new(4096).expect("nonzero");
        assert!(w.get() <= hw);
    }

    #[test]
    fn layout_paths_hang_off_root() {
        let layout = DataLayout::new("/data/studio");
        assert_eq!(layout.voices_dir(), PathBuf::from("/data/studio/voices"));
        assert_eq!(
            layout.registry_path(),
            PathBuf::from("/data/studio/emotions/registry.json")
        );
        assert_eq!(layout.outputs_dir(), PathBuf::from("/data/studio/outputs"));
    }

    #[test]
    fn from_env_reads_workers_and_postprocess_flag() {
        let env = MapEnv::default()
            .with_var(ENV_WORKERS, "1")
            .with_var(ENV_DISABLE_POSTPROCESS, "true");
        let cfg = EngineConfig::from_env("/tmp/studio", &env).expect("valid env");
        assert_eq!(cfg.limits.workers.get(), 1);
        assert!(cfg.disable_postprocess);
        assert_eq!(cfg.chatterbox_url, DEFAULT_CHATTERBOX_URL);
    }

    #[test]
    fn from_env_rejects_bad_workers() {
        let env = MapEnv::default().with_var(ENV_WORKERS, "many");
        let err = EngineConfig::from_env("/tmp/studio", &env).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnvValue { .. }));
    }

    #[test]
    fn resolve_bool_accepts_common_spellings() {
        let env = MapEnv::default()
            .with_var("A", "TRUE")
            .with_var("B", "0")
            .with_var("C", "maybe");
        assert!(resolve_bool("A", &env).unwrap());
        assert!(!resolve_bool("B", &env).unwrap());
        assert!(!resolve_bool("MISSING", &env).unwrap());
        assert!(resolve_bool("C", &env).is_err());
    }

    #[test]
    fn string_with_default_prefers_cli_then_env() {
        let env = MapEnv::default().with_var(ENV_CHATTERBOX_URL, "http://env:1");
        let cli = resolve_string_with_default(
            Some("http://cli:1".into()),
            ENV_CHATTERBOX_URL,
            &env,
            "http://def:1",
        );
        assert_eq!(cli, "http://cli:1");
        let from_env =
            resolve_string_with_default(None, ENV_CHATTERBOX_URL, &env, "http://def:1");
        assert_eq!(from_env, "http://env:1");
    }
}
