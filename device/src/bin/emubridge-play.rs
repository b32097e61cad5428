//! emubridge player
//!
//! Plays the reference tone core through the default output device and
//! exercises the bridge: capture and restore, power cycling and metrics.
//! Set `RUST_LOG=debug` to see the once-per-second bridge metrics.

use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use emubridge_core::{BridgeConfig, BridgeSession, IdleAudio, SessionEvent, SessionStatus, ToneCore};
use emubridge_device::{DeviceOutput, default_sample_rate};

/// Command-line arguments for emubridge-play
#[derive(Parser)]
#[command(name = "emubridge-play")]
#[command(author, version, about = "Play an emulated tone core through the default audio device", long_about = None)]
struct Args {
    /// Config file to load instead of the user config
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// How long to play
    #[arg(long, default_value_t = 6)]
    seconds: u64,

    /// Tone frequency in Hz
    #[arg(long, default_value_t = 440)]
    frequency: u32,

    /// Tone amplitude (0.0-1.0)
    #[arg(long, default_value_t = 0.25)]
    volume: f32,

    /// Play white noise instead of silence while powered off
    #[arg(long)]
    white_noise: bool,

    /// Write the mid-run snapshot to this file
    #[arg(long, value_name = "PATH")]
    save_snapshot: Option<PathBuf>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => BridgeConfig::load_from(path)
            .with_context(|| format!("failed to load config from {}", path.display()))?,
        None => BridgeConfig::load(),
    };
    if args.white_noise {
        config.audio.idle = IdleAudio::WhiteNoise;
    }
    config.audio.output_sample_rate =
        default_sample_rate().context("failed to query the output device")?;

    let mut core = ToneCore::new(args.frequency);
    core.set_volume(args.volume);

    let mut session = BridgeSession::start(core, config)
        .context("failed to start bridge session")?;
    let source = session
        .take_audio_source()
        .context("audio source already taken")?;
    let output = DeviceOutput::open(source).context("failed to open audio output")?;

    info!(
        "Playing {} Hz tone at {} Hz output for {}s",
        args.frequency,
        output.sample_rate(),
        args.seconds
    );

    let total = Duration::from_secs(args.seconds);
    let capture_at = total / 3;
    let restore_at = total * 2 / 3;
    let power_off_at = total.saturating_sub(Duration::from_secs(1));

    let started = Instant::now();
    let mut snapshot = None;
    let mut restored = false;

    while started.elapsed() < total {
        thread::sleep(Duration::from_millis(50));
        let elapsed = started.elapsed();

        while let Some(event) = session.poll_event() {
            match event {
                SessionEvent::DriftResync {
                    drift_cycles,
                    virtual_cycles,
                } => warn!(
                    "Clock resynchronized: drift {} cycles at cycle {}",
                    drift_cycles, virtual_cycles
                ),
                SessionEvent::CoreFault(message) => warn!("Core fault: {}", message),
                SessionEvent::Stopped => info!("Worker stopped"),
            }
        }
        if session.status() == SessionStatus::Faulted {
            break;
        }

        if snapshot.is_none() && elapsed >= capture_at {
            let blob = session
                .capture_snapshot()
                .context("failed to capture snapshot")?;
            info!(
                "Captured snapshot: {} bytes state, {} bytes encoded",
                blob.uncompressed_len,
                blob.encoded_len()
            );
            if let Some(path) = &args.save_snapshot {
                blob.save_to_file(path)
                    .with_context(|| format!("failed to write {}", path.display()))?;
                info!("Snapshot written to {}", path.display());
            }
            snapshot = Some(blob);
        }

        if !restored && elapsed >= restore_at {
            if let Some(blob) = &snapshot {
                session
                    .restore_snapshot(blob)
                    .context("failed to restore snapshot")?;
                info!("Restored snapshot");
            }
            restored = true;
        }

        if session.status() == SessionStatus::Running && elapsed >= power_off_at {
            session.power_off().context("failed to power off")?;
            info!("Powered off, playing idle audio");
        }
    }

    let stats = session.stop();
    drop(output);

    info!(
        "Done: {} frames produced, {} rendered, {} underruns ({} frames), {} overruns ({} frames), {} resyncs",
        stats.frames_produced,
        stats.frames_rendered,
        stats.underruns,
        stats.underrun_frames,
        stats.overruns,
        stats.dropped_frames,
        stats.drift_resyncs
    );

    Ok(())
}
