use crate::audio::{wav_duration_seconds, AudioError, EchoParams, Toolchain};
use crate::error::{ErrorKind, Warning};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const LOG_TARGET: &str = "audio::pipeline";

/// Leading silence, in seconds, that must accumulate before the trim stage
/// starts cutting.
const SILENCE_TRIM_WINDOW_SECS: f64 = 0.1;

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    Wav,
    Mp3,
    Flac,
}

impl OutputFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Wav => "wav",
            Self::Mp3 => "mp3",
            Self::Flac => "flac",
        }
    }

    pub(crate) fn export_args(&self) -> &'static [&'static str] {
        match self {
            Self::Wav => &["-codec:a", "pcm_s24le", "-ar", "48000"],
            Self::Mp3 => &["-codec:a", "libmp3lame", "-b:a", "320k", "-ar", "44100"],
            Self::Flac => &["-codec:a", "flac", "-compression_level", "8", "-ar", "48000"],
        }
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self::Wav
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "wav" => Ok(Self::Wav),
            "mp3" => Ok(Self::Mp3),
            "flac" => Ok(Self::Flac),
            other => Err(format!("unknown output format: {other}")),
        }
    }
}

/// Knobs for the broadcast-quality chain. Defaults follow EBU R128.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct AudioQualitySettings {
    pub target_lufs: f64,
    pub true_peak_dbfs: f64,
    pub loudness_range: f64,
    pub remove_silence: bool,
    pub silence_threshold_db: f64,
    pub compression_enabled: bool,
    pub compression_ratio: f64,
    pub noise_gate_enabled: bool,
    pub noise_gate_db: f64,
}

impl Default for AudioQualitySettings {
    fn default() -> Self {
        Self {
            target_lufs: -23.0,
            true_peak_dbfs: -1.0,
            loudness_range: 7.0,
            remove_silence: true,
            silence_threshold_db: -40.0,
            compression_enabled: true,
            compression_ratio: 2.5,
            noise_gate_enabled: true,
            noise_gate_db: -40.0,
        }
    }
}

#[derive(Clone, Debug)]
pub struct ProcessOutcome {
    pub output_path: PathBuf,
    pub duration_seconds: f64,
    pub warnings: Vec<Warning>,
}

/// Ordered post-processing chain over synthesized audio. Never fails a
/// render for toolchain reasons: without ffmpeg every stage degrades to a
/// copy-through with an up-front warning.
pub struct PostProcessor {
    toolchain: Toolchain,
    settings: AudioQualitySettings,
    bypass_quality_stages: bool,
    scratch: tempfile::TempDir,
}

impl PostProcessor {
    pub fn new(
        toolchain: Toolchain,
        settings: AudioQualitySettings,
        bypass_quality_stages: bool,
    ) -> Result<Self, AudioError> {
        Ok(Self {
            toolchain,
            settings,
            bypass_quality_stages,
            scratch: tempfile::Builder::new().prefix("voice-studio-audio-").tempdir()?,
        })
    }

    pub fn is_degraded(&self) -> bool {
        !self.toolchain.is_available()
    }

    pub fn settings(&self) -> &AudioQualitySettings {
        &self.settings
    }

    /// Run the chain over `input` and leave the result at `output`.
    pub fn process(
        &self,
        input: &Path,
        output: &Path,
        format: OutputFormat,
        inner_voice: Option<EchoParams>,
    ) -> Result<ProcessOutcome, AudioError> {
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent)?;
        }

        if self.is_degraded() {
            return self.degrade_to_copy(input, output, format, inner_voice);
        }

        let call_id = uuid::Uuid::new_v4().simple().to_string();
        let mut current = input.to_path_buf();
        let mut stage = 0usize;
        let mut next_stage = |label: &str| {
            stage += 1;
            self.scratch.path().join(format!("{call_id}_{stage}_{label}.wav"))
        };

        if !self.bypass_quality_stages {
            if self.settings.remove_silence {
                let out = next_stage("trim");
                self.toolchain.run(
                    &current,
                    &out,
                    Some(&format!(
                        "silenceremove=start_periods=1:start_silence={SILENCE_TRIM_WINDOW_SECS}:start_threshold={}dB",
                        self.settings.silence_threshold_db
                    )),
                    &[],
                )?;
                current = out;
            }
            if self.settings.compression_enabled {
                let out = next_stage("compress");
                self.toolchain.run(
                    &current,
                    &out,
                    Some(&format!(
                        "acompressor=ratio={}:threshold=-20dB:attack=5:release=50",
                        self.settings.compression_ratio
                    )),
                    &[],
                )?;
                current = out;
            }
            let out = next_stage("loudnorm");
            self.toolchain.run(
                &current,
                &out,
                Some(&format!(
                    "loudnorm=I={}:TP={}:LRA={}",
                    self.settings.target_lufs,
                    self.settings.true_peak_dbfs,
                    self.settings.loudness_range
                )),
                &["-ar", "48000"],
            )?;
            current = out;
        }

        if let Some(echo) = inner_voice {
            let out = next_stage("inner");
            self.toolchain
                .run(&current, &out, Some(&echo.filter_string()), &["-ar", "48000"])?;
            current = out;
        }

        let duration_seconds = wav_duration_seconds(&current)?;
        self.toolchain.run(&current, output, None, format.export_args())?;
        tracing::debug!(
            target: LOG_TARGET,
            output = %output.display(),
            format = format.extension(),
            duration_seconds,
            "post-processing complete"
        );

        Ok(ProcessOutcome {
            output_path: output.to_path_buf(),
            duration_seconds,
            warnings: Vec::new(),
        })
    }

    fn degrade_to_copy(
        &self,
        input: &Path,
        output: &Path,
        format: OutputFormat,
        inner_voice: Option<EchoParams>,
    ) -> Result<ProcessOutcome, AudioError> {
        let mut warnings = vec![Warning::new(
            ErrorKind::PostProcessDegraded,
            format!(
                "ffmpeg unavailable, copied raw synthesis to {} without processing",
                format.extension()
            ),
        )];
        if inner_voice.is_some() {
            warnings.push(Warning::new(
                ErrorKind::PostProcessDegraded,
                "inner-voice effect skipped: ffmpeg unavailable",
            ));
        }

        std::fs::copy(input, output)?;
        let duration_seconds = wav_duration_seconds(input).unwrap_or(0.0);
        tracing::warn!(
            target: LOG_TARGET,
            output = %output.display(),
            "degraded post-processing: copy-through"
        );
        Ok(ProcessOutcome {
            output_path: output.to_path_buf(),
            duration_seconds,
            warnings,
        })
    }
}
