#![deny(warnings)]

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;
use voice_studio_core::audio::{InnerVoiceKind, OutputFormat};
use voice_studio_core::config::{EngineConfig, StdEnv};
use voice_studio_core::emotion::ParamOverrides;
use voice_studio_core::render::{RenderRequest, VoiceMode};
use voice_studio_core::studio::Studio;

#[derive(Parser, Debug)]
#[command(name = "voice-studio")]
#[command(about = "Multi-character narrative speech synthesis")]
struct Args {
    /// Data root holding voices/, emotions/ and outputs/
    #[arg(long, default_value = "./studio-data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Render text to speech. Line breaks become pauses in a single track.
    Say {
        text: String,

        #[arg(long)]
        voice: Option<String>,

        #[arg(long)]
        emotion: Option<String>,

        /// Clone the voice from a reference wav instead of selecting one
        #[arg(long)]
        clone_from: Option<PathBuf>,

        /// off | light | deep | dreamy
        #[arg(long, default_value = "off")]
        inner: String,

        /// wav | mp3 | flac
        #[arg(long, default_value = "wav")]
        format: String,

        #[arg(long)]
        exaggeration: Option<f32>,

        #[arg(long)]
        cfg_weight: Option<f32>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        speed: Option<f32>,
    },
    /// Submit a JSON array of render requests and wait for completion
    Batch {
        script: PathBuf,

        /// Seconds to wait before giving up on the batch
        #[arg(long, default_value_t = 600)]
        timeout_secs: u64,
    },
    /// List available voices
    Voices,
    /// Upload a wav file as a new voice
    UploadVoice {
        file: PathBuf,

        #[arg(long)]
        name: Option<String>,
    },
    /// List the emotion registry
    Emotions,
    /// Customize an emotion's parameters (persisted)
    CustomizeEmotion {
        name: String,

        #[arg(long)]
        exaggeration: Option<f32>,

        #[arg(long)]
        cfg_weight: Option<f32>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        speed: Option<f32>,
    },
    /// Restore an emotion to its built-in defaults
    ResetEmotion { name: String },
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let config = EngineConfig::from_env(&args.data_dir, &env)?;
    let studio = Studio::open(config, &env)?;

    match args.command {
        Command::Say {
            text,
            voice,
            emotion,
            clone_from,
            inner,
            format,
            exaggeration,
            cfg_weight,
            temperature,
            speed,
        } => {
            let request = RenderRequest {
                text,
                voice_id: voice,
                voice_mode: if clone_from.is_some() {
                    VoiceMode::Clone
                } else {
                    VoiceMode::Selection
                },
                voice_clone_path: clone_from,
                emotion,
                parameter_overrides: ParamOverrides {
                    exaggeration,
                    cfg_weight,
                    temperature,
                    speed,
                },
                inner_voice: parse_inner(&inner)?,
                output_format: parse_format(&format)?,
                ..Default::default()
            };
            say(&studio, request)?;
        }
        Command::Batch {
            script,
            timeout_secs,
        } => run_batch(&studio, &script, Duration::from_secs(timeout_secs))?,
        Command::Voices => {
            for voice in studio.list_voices() {
                println!(
                    "{:<16} {:<8} {:<13} {}",
                    voice.id,
                    voice.gender.as_str(),
                    match voice.source {
                        voice_studio_core::voice::VoiceSource::Builtin => "builtin",
                        voice_studio_core::voice::VoiceSource::UserUploaded => "user_uploaded",
                    },
                    voice.description
                );
            }
        }
        Command::UploadVoice { file, name } => {
            let bytes = std::fs::read(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let voice = studio.upload_voice(&bytes, name.as_deref())?;
            println!("uploaded voice {}", voice.id);
        }
        Command::Emotions => {
            for emotion in studio.list_emotions() {
                println!(
                    "{:<16} {:<9} exag={:.2} cfg={:.2} temp={:.2} speed={:.2}  {}",
                    emotion.name,
                    emotion.category.as_str(),
                    emotion.params.exaggeration,
                    emotion.params.cfg_weight,
                    emotion.params.temperature,
                    emotion.params.speed,
                    emotion.description
                );
            }
        }
        Command::CustomizeEmotion {
            name,
            exaggeration,
            cfg_weight,
            temperature,
            speed,
        } => {
            let emotion = studio.customize_emotion(
                &name,
                ParamOverrides {
                    exaggeration,
                    cfg_weight,
                    temperature,
                    speed,
                },
            )?;
            println!(
                "{}: exag={:.2} cfg={:.2} temp={:.2} speed={:.2}",
                emotion.name,
                emotion.params.exaggeration,
                emotion.params.cfg_weight,
                emotion.params.temperature,
                emotion.params.speed
            );
        }
        Command::ResetEmotion { name } => {
            let emotion = studio.reset_emotion(&name)?;
            println!("{} restored to defaults", emotion.name);
        }
    }

    studio.shutdown();
    Ok(())
}

fn say(studio: &Studio, request: RenderRequest) -> anyhow::Result<()> {
    if request.text.contains('\n') || request.text.contains('\r') {
        let script = studio
            .synthesize_script(&request)
            .map_err(|e| anyhow::anyhow!("{e}"))?;
        for warning in &script.warnings {
            tracing::warn!(kind = %warning.kind, "{}", warning.message);
        }
        println!(
            "{} ({:.2}s, {} utterances)",
            script.output_path.display(),
            script.duration_seconds,
            script.utterance_count
        );
        return Ok(());
    }

    let result = studio.synthesize_one(&request);
    for warning in &result.warnings {
        tracing::warn!(kind = %warning.kind, "{}", warning.message);
    }
    if !result.success {
        anyhow::bail!(
            "render failed: {} ({})",
            result.error_message.unwrap_or_default(),
            result
                .error_kind
                .map(|k| k.to_string())
                .unwrap_or_else(|| "unknown".to_owned())
        );
    }
    println!(
        "{} ({:.2}s via {} on {})",
        result.output_path.unwrap_or_default().display(),
        result.duration_seconds,
        result.provider_used.unwrap_or_default(),
        result.device_used.unwrap_or_default()
    );
    Ok(())
}

fn run_batch(studio: &Studio, script: &PathBuf, timeout: Duration) -> anyhow::Result<()> {
    let raw = std::fs::read_to_string(script)
        .with_context(|| format!("reading {}", script.display()))?;
    let requests: Vec<RenderRequest> =
        serde_json::from_str(&raw).context("batch script must be a JSON array of requests")?;
    anyhow::ensure!(!requests.is_empty(), "batch script is empty");

    let count = requests.len();
    let ids = studio
        .submit_batch(requests)
        .map_err(|e| anyhow::anyhow!("{e}"))?;
    tracing::info!(tasks = count, "batch submitted");

    let deadline = Instant::now() + timeout;
    loop {
        let done = ids
            .iter()
            .filter(|id| {
                studio
                    .get_status(id)
                    .map(|s| s.state.is_terminal())
                    .unwrap_or(false)
            })
            .count();
        if done == ids.len() {
            break;
        }
        anyhow::ensure!(Instant::now() < deadline, "batch timed out: {done}/{count} done");
        std::thread::sleep(Duration::from_millis(200));
    }

    let mut failed = 0usize;
    for id in &ids {
        let status = studio.get_status(id).expect("terminal task");
        match status.result {
            Some(result) if result.success => println!(
                "{id} ok {}",
                result.output_path.unwrap_or_default().display()
            ),
            Some(result) => {
                failed += 1;
                println!(
                    "{id} failed: {}",
                    result.error_message.unwrap_or_default()
                );
            }
            None => println!("{id} {:?}", status.state),
        }
    }

    let metrics = studio.metrics();
    println!(
        "{} tasks in {:.2}s, {:.2} tasks/s, efficiency {:.1}%, {failed} failed",
        metrics.total_tasks_processed,
        metrics.runtime_seconds,
        metrics.throughput_per_second,
        metrics.efficiency_percent
    );
    Ok(())
}

fn parse_inner(value: &str) -> anyhow::Result<InnerVoiceKind> {
    match value.to_ascii_lowercase().as_str() {
        "off" => Ok(InnerVoiceKind::Off),
        "light" => Ok(InnerVoiceKind::Light),
        "deep" => Ok(InnerVoiceKind::Deep),
        "dreamy" => Ok(InnerVoiceKind::Dreamy),
        other => anyhow::bail!("invalid --inner: {other}"),
    }
}

fn parse_format(value: &str) -> anyhow::Result<OutputFormat> {
    value.parse().map_err(|e: String| anyhow::anyhow!(e))
}

fn init_tracing(level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::builder()
        .with_default_directive(
            level
                .parse()
                .with_context(|| format!("invalid --log-level: {level}"))?,
        )
        .from_env_lossy();

    tracing_subscriber::fmt().with_env_filter(filter).init();
    Ok(())
}
