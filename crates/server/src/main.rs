#![deny(warnings)]

mod routes;

use anyhow::Context;
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;
use voice_studio_core::config::{EngineConfig, StdEnv};
use voice_studio_core::studio::Studio;

#[derive(Parser, Debug)]
#[command(name = "voice-studio-server")]
#[command(about = "HTTP surface over the voice synthesis core")]
struct Args {
    /// Data root holding voices/, emotions/ and outputs/
    #[arg(long, default_value = "./studio-data")]
    data_dir: PathBuf,

    #[arg(long, default_value = "127.0.0.1:8080")]
    bind: SocketAddr,

    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(&args.log_level)?;

    let env = StdEnv;
    let config = EngineConfig::from_env(&args.data_dir, &env)?;
    let studio = Arc::new(Studio::open(config, &env)?);

    let router = routes::router(routes::AppState {
        studio: Arc::clone(&studio),
    });

    let listener = tokio::net::TcpListener::bind(args.bind)
        .await
        .with_context(|| format!("binding {}", args.bind))?;
    tracing::info!(bind = %args.bind, "voice studio server listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    studio.shutdown();
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::warn!("failed to install ctrl-c handler");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutdown signal received");
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
