//! perfscope agent - Main Entry Point
//!
//! Builds a pipeline from the agent config, runs it until every spawned
//! target has exited or `--duration` elapses, then shuts down and logs the
//! final status of every subscription.

use anyhow::{Context, Result};
use clap::Parser;
use perfscope::{
    config::{self, AgentConfig},
    ChannelState, Pipeline, PipelineBuilder, Target,
};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

#[derive(Parser, Debug)]
#[command(name = "perfscope-agent", version, about = "Host telemetry agent")]
struct Args {
    /// Config file. Defaults to the platform config directory.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log to stdout even if the config disables it
    #[arg(long)]
    stdout: bool,

    /// Write daily-rolling log files to this directory
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Stop after this many seconds (0 = run until targets exit)
    #[arg(short, long, default_value_t = 0)]
    duration: u64,
}

fn load_config(args: &Args) -> Result<AgentConfig> {
    let path = match &args.config {
        Some(path) => path.clone(),
        None => match config::default_config_path() {
            Some(path) if path.exists() => path,
            _ => return Ok(AgentConfig::default()),
        },
    };
    AgentConfig::load(&path).with_context(|| format!("Failed to load config {}", path.display()))
}

fn init_logging(args: &Args, config: &AgentConfig) -> Option<WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.filter));
    let stdout_layer = (config.logging.stdout || args.stdout).then(fmt::layer);

    let (file_layer, guard) = match args.log_dir.as_ref().or(config.logging.directory.as_ref()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "perfscope-agent.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (Some(fmt::layer().with_ansi(false).with_writer(writer)), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stdout_layer)
        .with(file_layer)
        .init();
    guard
}

/// Block until every spawned target has exited or `duration` elapses.
/// Without spawned targets and without a duration this never returns.
fn wait(pipeline: &Pipeline, duration: Duration) {
    let deadline = (!duration.is_zero()).then(|| Instant::now() + duration);
    let spawned: Vec<_> = pipeline
        .channel_ids()
        .into_iter()
        .filter_map(|id| pipeline.channel(id).ok())
        .filter(|channel| matches!(channel.spec().target, Target::Spawn(_)))
        .collect();

    loop {
        if deadline.is_some_and(|d| Instant::now() >= d) {
            tracing::info!("Run duration elapsed");
            return;
        }
        if !spawned.is_empty() && spawned.iter().all(|c| c.state() == ChannelState::Stopped) {
            tracing::info!("All targets exited");
            return;
        }
        std::thread::sleep(POLL_INTERVAL);
    }
}

fn main() -> Result<()> {
    let args = Args::parse();
    let config = load_config(&args)?;
    let _guard = init_logging(&args, &config);

    tracing::info!("Starting perfscope agent {}", env!("CARGO_PKG_VERSION"));

    let mut pipeline = PipelineBuilder::new(config)
        .build()
        .context("Failed to build pipeline")?;
    if let Err(e) = pipeline.start_all() {
        pipeline.shutdown();
        return Err(e).context("Failed to start pipeline");
    }

    wait(&pipeline, Duration::from_secs(args.duration));

    tracing::info!("Shutting down...");
    pipeline.shutdown();

    for id in pipeline.subscription_ids() {
        let Ok(status) = pipeline.subscription_status(id) else {
            continue;
        };
        match serde_json::to_string(&status) {
            Ok(json) => tracing::info!("Subscription {}: {}", id, json),
            Err(e) => tracing::warn!("Cannot serialize status of subscription {}: {}", id, e),
        }
    }
    for id in pipeline.channel_ids() {
        if let Some(status) = pipeline.channel(id).ok().and_then(|c| c.exit_status()) {
            tracing::info!("Channel {} target exited with {}", id, status);
        }
    }
    Ok(())
}
