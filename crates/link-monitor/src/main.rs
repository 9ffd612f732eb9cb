//! Sensor Link Monitor - Main Entry Point
//!
//! Usage: `link-monitor [config.toml]`. Settings may also come from
//! `SENSOR_LINK_*` environment variables.

use anyhow::{Context, Result};
use frame_bus::{FrameBuffer, FrameBus};
use frame_protocol::CommandFrame;
use ring_buffer::RingBuffer;
use serial_link::{LinkConfig, SerialLink};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::FmtSubscriber;

/// Frames the monitor can fall behind by before dropping
const MONITOR_CAPACITY: usize = 1024;

const DRAIN_INTERVAL: Duration = Duration::from_millis(20);
const STATS_INTERVAL: Duration = Duration::from_secs(5);

fn parse_level(level: &str) -> Level {
    Level::from_str(level.trim()).unwrap_or(Level::INFO)
}

fn init_logging(level: Level) -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(true)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")
}

fn drain_frames(frames: &FrameBuffer) -> Result<()> {
    for frame in frames.read_all() {
        info!(target: "frames", "{}", serde_json::to_string(&frame)?);
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = LinkConfig::load(config_path.as_deref()).context("Failed to load configuration")?;
    init_logging(parse_level(&config.log_level))?;

    info!("=== Sensor Link Monitor v{} ===", env!("CARGO_PKG_VERSION"));

    let bus = Arc::new(FrameBus::new());
    let frames: Arc<FrameBuffer> = Arc::new(RingBuffer::new(MONITOR_CAPACITY)?);
    bus.subscribe(&frames);

    let mut link = SerialLink::open(config, Arc::clone(&bus))
        .context("Failed to open serial link")?;
    let mut errors = link
        .take_errors()
        .context("Error channel already taken")?;

    link.send_command(&CommandFrame::read_status())?;

    let mut drain = tokio::time::interval(DRAIN_INTERVAL);
    let mut report = tokio::time::interval(STATS_INTERVAL);
    let interrupt = tokio::signal::ctrl_c();
    tokio::pin!(interrupt);
    loop {
        tokio::select! {
            _ = &mut interrupt => {
                info!("Interrupt received");
                break;
            }
            _ = drain.tick() => drain_frames(&frames)?,
            _ = report.tick() => {
                let stats = link.stats();
                info!(target: "stats", "{}", serde_json::to_string(&stats)?);
                if frames.total_dropped() > 0 {
                    warn!(dropped = frames.total_dropped(), "Monitor fell behind");
                }
            }
            Some(error) = errors.recv() => debug!(error = %error, "Link error drained"),
        }

        if !link.is_running() {
            warn!("Serial link no longer running");
            break;
        }
    }

    drain_frames(&frames)?;
    link.shutdown().await?;
    info!("Monitor stopped");
    Ok(())
}
