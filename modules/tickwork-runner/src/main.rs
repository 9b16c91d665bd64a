mod config;
mod demo;

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use tickwork_engine::Processor;

use crate::config::RunnerConfig;

#[derive(Parser)]
#[command(name = "tickwork", about = "Drive a tickwork processor on a fixed tick")]
struct Cli {
    /// Path to config TOML file. Defaults plus TICKWORK_* env vars when omitted.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("tickwork=info".parse()?))
        .init();

    info!("tickwork starting...");

    let cli = Cli::parse();
    let config = RunnerConfig::load(cli.config.as_deref())?;
    config.log();

    let mut processor = Processor::from_config(&config.processor);
    let root = demo::install(&mut processor, config.heartbeat_ms)?;
    info!(%root, "Demo chain installed");

    let mut interval = tokio::time::interval(Duration::from_millis(config.tick_interval_ms.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let deadline = (config.run_for_ms > 0)
        .then(|| Instant::now() + Duration::from_millis(config.run_for_ms));
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("Shutdown requested");
                break;
            }
            _ = interval.tick() => {
                let summary = processor.update();
                if summary.executed > 0 {
                    debug!(
                        now = summary.now,
                        executed = summary.executed,
                        deferred = summary.deferred,
                        "Tick"
                    );
                }
                if deadline.is_some_and(|d| Instant::now() >= d) {
                    info!("Run time elapsed");
                    break;
                }
            }
        }
    }

    processor.clear_all_events(root);
    info!(
        ticks = processor.update_counter(),
        pending = processor.time_keeper().len(),
        "tickwork stopped"
    );
    Ok(())
}
