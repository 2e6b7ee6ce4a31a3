//! slotwatch - drive the session orchestration layer from the command line
//!
//! Subcommands:
//! - `slotwatch demo` - Run a scripted station against the simulated SDK and
//!   print the final pool status as JSON
//! - `slotwatch config` - Show the effective configuration and where it came from

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use slotconf::SlotwatchConfig;
use slotwatch::sim::{RecordingSurfaceHost, SimulatedSdk};
use slotwatch::{
    Collaborators, DeviceId, PlaybackCommand, RecordSegment, SessionError, SlotPool, StreamParams,
    TimeRange,
};
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "slotwatch")]
#[command(about = "Video session orchestration for a multi-camera viewing station")]
#[command(version)]
struct Cli {
    /// Config file to use in place of ./slotwatch.toml
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted station against the simulated device SDK
    Demo {
        /// Number of slots (defaults to orchestration.default_slots)
        #[arg(short, long)]
        slots: Option<usize>,

        /// Number of simulated cameras
        #[arg(long, default_value = "3")]
        cameras: usize,
    },

    /// Print the effective configuration as TOML, with its sources
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, sources) = SlotwatchConfig::load_with_sources_from(cli.config.as_deref())
        .context("loading configuration")?;

    match cli.command {
        Commands::Config => {
            if sources.files.is_empty() {
                println!("# no config files found, using defaults");
            }
            for file in &sources.files {
                println!("# loaded: {}", file.display());
            }
            for var in &sources.env_overrides {
                println!("# env override: {var}");
            }
            println!("{}", config.to_toml());
        }
        Commands::Demo { slots, cameras } => {
            slotwatch::telemetry::init(&config.infra.telemetry)?;
            let slots = slots.unwrap_or(config.orchestration.default_slots);
            run_demo(&config, slots, cameras).await?;
        }
    }

    Ok(())
}

async fn run_demo(config: &SlotwatchConfig, slots: usize, cameras: usize) -> Result<()> {
    let sdk = Arc::new(SimulatedSdk::new());
    let now = Utc::now();
    for i in 0..cameras {
        let id = format!("cam{}", i + 1);
        sdk.add_device(id.as_str(), format!("Camera {}", i + 1));
        sdk.add_recording(
            &id,
            0,
            RecordSegment {
                start: now - Duration::hours(2),
                end: now - Duration::minutes(30),
            },
        );
    }

    let surfaces = Arc::new(RecordingSurfaceHost::new());
    let pool = SlotPool::new(Collaborators::new(sdk.clone(), sdk.clone(), surfaces), config);
    pool.build(slots).await?;
    info!(slots, cameras, "station ready");

    for i in 0..cameras {
        let device = DeviceId::new(format!("cam{}", i + 1));
        match pool.open_live_on_available(device.clone(), 0, StreamParams::default()).await {
            Ok(slot) => info!(slot, device = %device, "live"),
            Err(SessionError::NoSlotAvailable) => {
                warn!(device = %device, "grid full, skipping remaining cameras");
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }

    let first = pool.controller(0)?;
    let range = TimeRange::new(now - Duration::hours(3), now)?;
    match first.switch_to_playback(range).await {
        Ok(started) => {
            info!(stream = %started.stream, segments = started.segments, "slot 0 playing back");
            first.playback_control(PlaybackCommand::Fast).await?;
            first.playback_control(PlaybackCommand::Normal).await?;
        }
        Err(err) if err.is_expected() => warn!(error = %err, "playback unavailable"),
        Err(err) => return Err(err.into()),
    }

    if first.has_active_content() {
        pool.enter_full_screen(0).await?;
        pool.exit_full_screen().await?;
    }
    if let Err(err) = first.switch_to_live().await {
        warn!(error = %err, "slot 0 stays as it is");
    }

    println!("{}", serde_json::to_string_pretty(&pool.status())?);

    let report = pool.stop_all().await;
    info!(stopped = report.stopped, forced = report.forced, "all slots stopped");
    pool.dispose().await;
    Ok(())
}
