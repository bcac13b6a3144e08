//! Tether CLI
//!
//! Lists output devices, and streams a test tone through a device session
//! from a producer loop running at a fixed period on its own clock.

use std::f64::consts::TAU;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::Context;
use clap::{Parser, Subcommand};
use crossbeam_channel::Receiver;
use serde::Deserialize;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use tether_core::{
    BridgeConfig, CpalHost, DeviceSession, Event, OutputControls, StreamParams,
    DEFAULT_OUTPUT_NAME,
};

/// Tether - bridge a fixed-period producer to an output device
#[derive(Parser)]
#[command(name = "tether")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log filter, e.g. "debug" or "tether_core=trace" (RUST_LOG wins)
    #[arg(long, global = true, default_value = "info")]
    log_level: String,
}

#[derive(Subcommand)]
enum Commands {
    /// List output devices
    List,

    /// Stream a sine tone to a device
    Play(PlayArgs),
}

#[derive(clap::Args)]
struct PlayArgs {
    /// Output device, "<host>::<device>" (use 'list' to see them)
    #[arg(short, long)]
    device: Option<String>,

    /// Device sample rate in Hz
    #[arg(short, long)]
    rate: Option<u32>,

    /// Producer sample rate in Hz
    #[arg(long, default_value = "48000")]
    source_rate: u32,

    /// Frames per producer period
    #[arg(short, long, default_value = "128")]
    block: u32,

    /// Number of channels
    #[arg(short, long, default_value = "2")]
    channels: u16,

    /// Tone frequency in Hz
    #[arg(short, long, default_value = "440")]
    frequency: f64,

    /// Tone amplitude (0.0 - 1.0)
    #[arg(long, default_value = "0.2")]
    amplitude: f32,

    /// Playback duration in seconds
    #[arg(short, long, default_value = "10")]
    seconds: f64,

    /// Manual drift trim in ppm
    #[arg(long)]
    trim: Option<f64>,

    /// Run the producer clock this many ppm fast (negative: slow)
    #[arg(long, default_value = "0", allow_negative_numbers = true)]
    producer_offset_ppm: f64,

    /// JSON file with "bridge" and "output" sections
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Layout of the `--config` file
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct FileConfig {
    bridge: BridgeConfig,
    output: OutputControls,
}

fn load_config(path: &Path) -> anyhow::Result<FileConfig> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    let config: FileConfig = serde_json::from_str(&text)
        .with_context(|| format!("parsing {}", path.display()))?;

    config.bridge.validate().map_err(anyhow::Error::msg)?;
    config.output.validate().map_err(anyhow::Error::msg)?;
    Ok(config)
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "tether_core={level},tether_cli={level}",
            level = cli.log_level
        ))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::List => list_devices(),
        Commands::Play(args) => play(args),
    }
}

fn list_devices() -> anyhow::Result<()> {
    let devices = CpalHost::new()
        .describe_devices()
        .context("enumerating output devices")?;

    println!("=== Output Devices ===\n");
    for device in &devices {
        let default_mark = if device.is_default { " *" } else { "" };
        let rates: Vec<String> = device.sample_rates.iter().map(u32::to_string).collect();
        println!(
            "[{:>3}] {}{} ({} ch, {} Hz)",
            device.index,
            device.name,
            default_mark,
            device.max_channels,
            if rates.is_empty() { "?".to_string() } else { rates.join("/") }
        );
    }

    println!();
    println!("* = system default, also reachable as \"{}\"", DEFAULT_OUTPUT_NAME);
    Ok(())
}

fn play(args: PlayArgs) -> anyhow::Result<()> {
    let FileConfig { bridge, mut output } = match &args.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };
    if let Some(device) = &args.device {
        output.device_name = device.clone();
    }
    if let Some(rate) = args.rate {
        output.device_sample_rate = rate;
    }
    if let Some(trim) = args.trim {
        output.drift_trim_ppm = trim;
    }

    let params = StreamParams {
        channels: args.channels,
        source_rate: args.source_rate,
        producer_block: args.block,
    };

    let (sender, events) = crossbeam_channel::unbounded();
    let mut session = DeviceSession::with_cpal(bridge)?
        .with_controls(output)
        .with_event_sender(sender);

    session.start_with(params).context("starting output")?;

    let period = Duration::from_secs_f64(
        args.block as f64 / (args.source_rate as f64 * (1.0 + args.producer_offset_ppm * 1e-6)),
    );
    let frames = args.block as usize;
    let mut tone = Tone::new(args.frequency, args.source_rate, args.amplitude);
    let mut buffer = vec![0.0_f32; frames];

    info!(
        "Playing {:.0} Hz for {:.1} s, producer period {:.3} ms",
        args.frequency,
        args.seconds,
        period.as_secs_f64() * 1000.0
    );

    let start = Instant::now();
    let end = start + Duration::from_secs_f64(args.seconds);
    let mut next_block = start;
    let mut next_tick = start + Duration::from_secs(1);

    while Instant::now() < end {
        tone.fill(&mut buffer);
        let blocks: Vec<&[f32]> = (0..args.channels).map(|_| buffer.as_slice()).collect();
        session.submit(&blocks, frames);
        next_block += period;

        let now = Instant::now();
        if now >= next_tick {
            session.on_diagnostic_tick();
            next_tick += Duration::from_secs(1);
        }
        drain_events(&events);

        if let Some(wait) = next_block.checked_duration_since(Instant::now()) {
            std::thread::sleep(wait);
        }
    }

    session.stop();
    drain_events(&events);
    Ok(())
}

fn drain_events(events: &Receiver<Event>) {
    for event in events.try_iter() {
        match event {
            Event::Error { message } => error!("Output error: {}", message),
            Event::Diagnostic(report) => {
                for fault in report.faults() {
                    warn!("Channel {}: {}", report.channel, fault);
                }
            }
            Event::Started { .. } | Event::Stopped => {}
        }
    }
}

/// Phase-accumulating sine generator
struct Tone {
    phase: f64,
    increment: f64,
    amplitude: f32,
}

impl Tone {
    fn new(frequency: f64, sample_rate: u32, amplitude: f32) -> Self {
        Self {
            phase: 0.0,
            increment: TAU * frequency / sample_rate as f64,
            amplitude: amplitude.clamp(0.0, 1.0),
        }
    }

    fn fill(&mut self, buffer: &mut [f32]) {
        for sample in buffer.iter_mut() {
            *sample = self.phase.sin() as f32 * self.amplitude;
            self.phase = (self.phase + self.increment) % TAU;
        }
    }
}
