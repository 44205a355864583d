//! KVSrecorder CLI
//!
//! Thin command-line harness over the recording pipeline: list input
//! devices, query the installed encoder's codec menus, or run a timed
//! recording and print the finalized report as JSON.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use kvsrecorder::encoder::probe;
use kvsrecorder::{
    list_input_devices, AudioFormat, CpalCapture, FileStatusMonitor, OutputSpec, RecordingSession,
    SessionConfig,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "kvsrecorder", version, about = "Dual-stream microphone recorder")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List audio input devices
    Devices,

    /// Show the codecs the installed encoder supports, per format
    Codecs {
        /// Encoder program to probe
        #[arg(long, default_value = "ffmpeg")]
        program: String,
    },

    /// Record for a fixed duration
    Record {
        /// Directory receiving output files and audit logs
        #[arg(long, default_value = "recordings")]
        output_dir: PathBuf,

        /// Recording length in seconds
        #[arg(long, default_value_t = 10)]
        duration: u64,

        /// Input device index (default input when omitted)
        #[arg(long)]
        device: Option<usize>,

        /// Sample rate in Hz
        #[arg(long, default_value_t = 48000)]
        sample_rate: u32,

        /// Encoder program
        #[arg(long, default_value = "ffmpeg")]
        program: String,

        /// Primary output format
        #[arg(long, default_value = "wav")]
        format: AudioFormat,

        /// Primary codec (format default when omitted)
        #[arg(long)]
        codec: Option<String>,

        /// Primary bitrate for lossy formats (e.g. "192k")
        #[arg(long)]
        bitrate: Option<String>,

        /// Secondary output format (enables dual recording)
        #[arg(long)]
        format2: Option<AudioFormat>,

        /// Secondary codec (format default when omitted)
        #[arg(long)]
        codec2: Option<String>,

        /// Secondary bitrate for lossy formats
        #[arg(long)]
        bitrate2: Option<String>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "kvsrecorder=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Devices => devices(),
        Commands::Codecs { program } => codecs(&program),
        Commands::Record {
            output_dir,
            duration,
            device,
            sample_rate,
            program,
            format,
            codec,
            bitrate,
            format2,
            codec2,
            bitrate2,
        } => {
            let primary = output_spec(format, codec, bitrate);
            let secondary = format2.map(|f| output_spec(f, codec2, bitrate2));
            record(
                output_dir,
                duration,
                device,
                sample_rate,
                program,
                primary,
                secondary,
            )
        }
    }
}

fn output_spec(format: AudioFormat, codec: Option<String>, bitrate: Option<String>) -> OutputSpec {
    let codec = codec.unwrap_or_else(|| format.default_codec().to_string());
    let mut spec = OutputSpec::new(format, codec);
    spec.bitrate = bitrate;
    spec
}

fn devices() -> Result<()> {
    let devices = list_input_devices().context("enumerating input devices")?;
    if devices.is_empty() {
        println!("no input devices found");
        return Ok(());
    }
    for device in devices {
        let marker = if device.is_default { " (default)" } else { "" };
        println!("{}: {}{}", device.index, device.name, marker);
    }
    Ok(())
}

fn codecs(program: &str) -> Result<()> {
    for (format, codecs) in probe::available_codecs(program) {
        println!("{}: {}", format, codecs.join(", "));
    }
    Ok(())
}

fn record(
    output_dir: PathBuf,
    duration: u64,
    device: Option<usize>,
    sample_rate: u32,
    program: String,
    primary: OutputSpec,
    secondary: Option<OutputSpec>,
) -> Result<()> {
    let mut config = SessionConfig::new(output_dir, primary);
    config.device_index = device;
    config.sample_rate = sample_rate;
    config.program = program;
    config.secondary = secondary;

    let mut session = RecordingSession::new(Box::new(CpalCapture::new()));

    let report = session.start(config).context("starting recording")?;
    tracing::info!("recording session {} started", report.session_id);
    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }

    let mut monitor =
        FileStatusMonitor::start(session.output_paths(), kvsrecorder::monitor::POLL_PERIOD);
    let mut status_rx = monitor.subscribe();

    let deadline = std::time::Instant::now() + Duration::from_secs(duration);
    while std::time::Instant::now() < deadline {
        match status_rx.blocking_recv() {
            Ok(status) if status.target == 0 => {
                eprint!(
                    "\rrecording... {:>6.1}s  {} KB",
                    session.duration_ms() as f64 / 1000.0,
                    status.size_kb
                );
            }
            Ok(_) => {}
            Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
            Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
        }
    }
    eprintln!();
    monitor.stop();

    let report = session.stop().context("stopping recording")?;
    println!("{}", serde_json::to_string_pretty(&report)?);

    if report.success {
        Ok(())
    } else {
        anyhow::bail!(
            "{}",
            report
                .diagnostic
                .unwrap_or_else(|| "recording failed".to_string())
        )
    }
}
