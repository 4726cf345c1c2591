use crate::backend::{BackendError, Device, SynthesisOutput, SynthesisRequest, TtsBackend};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const RETRY_PRIMARY_INTERVAL: Duration = Duration::from_secs(300);
const LOG_TARGET: &str = "backend::fallback";

/// Routes synthesis to a primary backend and drops to a local fallback when
/// the primary is unavailable. After a cooldown the primary is probed again
/// so a recovered server is picked back up without a restart.
pub struct FallbackBackend<P, F>
where
    P: TtsBackend,
    F: TtsBackend,
{
    primary: P,
    fallback: F,
    state: Arc<FallbackState>,
}

struct FallbackState {
    primary_down: AtomicBool,
    down_since: Mutex<Option<Instant>>,
}

impl<P, F> FallbackBackend<P, F>
where
    P: TtsBackend,
    F: TtsBackend,
{
    pub fn new(primary: P, fallback: F) -> Self {
        Self {
            primary,
            fallback,
            state: Arc::new(FallbackState {
                primary_down: AtomicBool::new(false),
                down_since: Mutex::new(None),
            }),
        }
    }

    pub fn is_using_fallback(&self) -> bool {
        self.state.primary_down.load(Ordering::Relaxed)
    }

    fn mark_down(&self) {
        self.state.primary_down.store(true, Ordering::Relaxed);
        *self.state.down_since.lock().unwrap_or_else(|e| e.into_inner()) = Some(Instant::now());
    }

    fn mark_up(&self) {
        self.state.primary_down.store(false, Ordering::Relaxed);
        *self.state.down_since.lock().unwrap_or_else(|e| e.into_inner()) = None;
    }

    fn cooldown_elapsed(&self) -> bool {
        self.state
            .down_since
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .map(|t| t.elapsed() >= RETRY_PRIMARY_INTERVAL)
            .unwrap_or(false)
    }

    #[cfg(test)]
    fn force_fallback_since(&self, since: Instant) {
        self.state.primary_down.store(true, Ordering::Relaxed);
        *self.state.down_since.lock().unwrap_or_else(|e| e.into_inner()) = Some(since);
    }
}

impl<P, F> TtsBackend for FallbackBackend<P, F>
where
    P: TtsBackend,
    F: TtsBackend,
{
    fn name(&self) -> &'static str {
        if self.is_using_fallback() {
            self.fallback.name()
        } else {
            self.primary.name()
        }
    }

    fn device(&self) -> Device {
        if self.is_using_fallback() {
            self.fallback.device()
        } else {
            self.primary.device()
        }
    }

    fn synthesize(&self, request: &SynthesisRequest) -> Result<SynthesisOutput, BackendError> {
        if self.state.primary_down.load(Ordering::Relaxed) {
            if self.cooldown_elapsed() {
                tracing::info!(target: LOG_TARGET, primary = self.primary.name(), "cooldown elapsed, retrying primary backend");
                match self.primary.synthesize(request) {
                    Ok(output) => {
                        self.mark_up();
                        tracing::info!(target: LOG_TARGET, primary = self.primary.name(), "primary backend recovered");
                        return Ok(output);
                    }
                    Err(BackendError::Unavailable(reason)) => {
                        tracing::warn!(target: LOG_TARGET, reason = %reason, "primary still unavailable");
                        self.mark_down();
                    }
                    Err(other) => return Err(other),
                }
            }
            return self.fallback.synthesize(request);
        }

        match self.primary.synthesize(request) {
            Ok(output) => Ok(output),
            Err(BackendError::Unavailable(reason)) => {
                tracing::warn!(
                    target: LOG_TARGET,
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    reason = %reason,
                    "primary backend unavailable, switching to fallback"
                );
                self.mark_down();
                self.fallback.synthesize(request)
            }
            Err(other) => Err(other),
        }
    }

    fn clear_cache(&self) {
        self.primary.clear_cache();
        self.fallback.clear_cache();
    }
}
