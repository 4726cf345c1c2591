use crate::audio::AudioError;
use std::{
    path::{Path, PathBuf},
    process::{Command, Stdio},
    time::{Duration, Instant},
};

const LOG_TARGET: &str = "audio::toolchain";
const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Handle to the external audio toolchain (ffmpeg). Probed once at startup
/// so degraded mode is known up front rather than discovered mid-render.
#[derive(Clone, Debug)]
pub struct Toolchain {
    ffmpeg: Option<PathBuf>,
    subprocess_timeout: Duration,
}

impl Toolchain {
    pub fn probe(subprocess_timeout: Duration) -> Self {
        let ffmpeg = if ffmpeg_sidecar::command::ffmpeg_is_installed() {
            Some(ffmpeg_sidecar::paths::ffmpeg_path())
        } else {
            None
        };
        match &ffmpeg {
            Some(path) => {
                tracing::info!(target: LOG_TARGET, ffmpeg = %path.display(), "audio toolchain available")
            }
            None => {
                tracing::warn!(target: LOG_TARGET, "ffmpeg not found, post-processing degraded to copy-through")
            }
        }
        Self {
            ffmpeg,
            subprocess_timeout,
        }
    }

    /// A toolchain that behaves as if ffmpeg were missing. Used by tests and
    /// by `DISABLE_POSTPROCESS` diagnostics.
    pub fn unavailable(subprocess_timeout: Duration) -> Self {
        Self {
            ffmpeg: None,
            subprocess_timeout,
        }
    }

    pub fn is_available(&self) -> bool {
        self.ffmpeg.is_some()
    }

    /// Run one ffmpeg pass: optional `-af` filter plus free-form output
    /// arguments. The child is killed when the subprocess budget runs out.
    pub fn run(
        &self,
        input: &Path,
        output: &Path,
        filter: Option<&str>,
        output_args: &[&str],
    ) -> Result<(), AudioError> {
        let ffmpeg = self.ffmpeg.as_ref().ok_or(AudioError::ToolchainUnavailable)?;

        let mut command = Command::new(ffmpeg);
        command
            .args(["-hide_banner", "-nostdin", "-loglevel", "error"])
            .arg("-i")
            .arg(input);
        if let Some(filter) = filter {
            command.args(["-af", filter]);
        }
        command.args(output_args);
        command.arg("-y").arg(output);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());

        let mut child = command.spawn()?;
        let deadline = Instant::now() + self.subprocess_timeout;

        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            if Instant::now() >= deadline {
                child.kill().ok();
                child.wait().ok();
                return Err(AudioError::ToolchainTimeout(self.subprocess_timeout));
            }
            std::thread::sleep(POLL_INTERVAL);
        };

        if !status.success() {
            let stderr = child
                .stderr
                .take()
                .and_then(|mut pipe| {
                    use std::io::Read;
                    let mut buf = String::new();
                    pipe.read_to_string(&mut buf).ok().map(|_| buf)
                })
                .unwrap_or_default();
            return Err(AudioError::ToolchainFailed(format!(
                "exit_code={:?} stderr={}",
                status.code(),
                stderr.trim()
            )));
        }
        Ok(())
    }
}
