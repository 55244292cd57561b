//! AUNetSend Receiver Application
//!
//! Connects to an AUNetSend host and writes the stream to a file, stdout,
//! or an audio device with drift compensation.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use aunet_receiver::{
    audio::device::list_devices,
    config::AppConfig,
    session::{Session, Sink},
};

#[derive(Parser, Debug)]
#[command(name = "aunetreceive", version, about = "Receive an AUNetSend audio stream")]
struct Args {
    /// AUNetSend host
    #[arg(short = 'H', long)]
    host: Option<String>,

    /// AUNetSend TCP port number
    #[arg(short, long)]
    port: Option<u16>,

    /// Bonjour instance name to resolve (default "AUNetSend")
    #[arg(short = 'B', long, conflicts_with_all = ["host", "port"])]
    bonjour_name: Option<String>,

    /// Play through an audio device instead of writing raw PCM
    #[arg(long, conflicts_with = "outfile")]
    play: bool,

    /// Output device name (implies --play)
    #[arg(short, long, conflicts_with = "outfile")]
    device: Option<String>,

    /// Frames per device period
    #[arg(long)]
    period_size: Option<usize>,

    /// Periods in the device buffer
    #[arg(long)]
    periods: Option<usize>,

    /// Drift filter momentum, in (0, 1]
    #[arg(long)]
    momentum: Option<f64>,

    /// Drift filter sensitivity
    #[arg(long)]
    sensitivity: Option<f64>,

    /// Target free device buffer space in frames (default: half the buffer)
    #[arg(long)]
    target_occupancy: Option<usize>,

    /// TCP connect timeout in milliseconds
    #[arg(long)]
    connect_timeout_ms: Option<u64>,

    /// Wait this long for queue space before counting an overrun
    #[arg(long)]
    put_timeout_ms: Option<u64>,

    /// Stop on the first overrun instead of dropping the chunk
    #[arg(long)]
    no_ignore_overruns: bool,

    /// Hand-off queue capacity in chunks
    #[arg(long)]
    queue_capacity: Option<usize>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// List output devices and exit
    #[arg(long)]
    list_devices: bool,

    /// Append raw PCM here instead of stdout
    outfile: Option<PathBuf>,
}

impl Args {
    fn apply(&self, config: &mut AppConfig) {
        let network = &mut config.network;
        if self.host.is_some() || self.port.is_some() || self.bonjour_name.is_some() {
            network.host = self.host.clone();
            network.port = self.port;
            config.discovery.bonjour_name = self.bonjour_name.clone();
        }
        if let Some(ms) = self.connect_timeout_ms {
            network.connect_timeout_ms = ms;
        }
        if let Some(ms) = self.put_timeout_ms {
            network.put_timeout_ms = Some(ms);
        }
        if self.no_ignore_overruns {
            network.ignore_overruns = false;
        }
        if let Some(capacity) = self.queue_capacity {
            network.queue_capacity = Some(capacity);
        }

        let playback = &mut config.playback;
        if let Some(device) = &self.device {
            playback.device = Some(device.clone());
        }
        if let Some(period_size) = self.period_size {
            playback.period_size = period_size;
        }
        if let Some(periods) = self.periods {
            playback.periods = periods;
        }
        if let Some(momentum) = self.momentum {
            playback.momentum = momentum;
        }
        if let Some(sensitivity) = self.sensitivity {
            playback.sensitivity = sensitivity;
        }
        if let Some(target) = self.target_occupancy {
            playback.target_occupancy = Some(target);
        }

        if self.play || self.device.is_some() {
            config.output.play = true;
            config.output.file = None;
        } else if let Some(outfile) = &self.outfile {
            config.output.play = false;
            config.output.file = Some(outfile.clone());
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr, stdout may carry PCM
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Args::parse();

    if args.list_devices {
        println!("\n=== Available Output Devices ===");
        for device in list_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        return Ok(());
    }

    let mut config = match &args.config {
        Some(path) => AppConfig::load(path)?,
        None => AppConfig::load_or_default()?,
    };
    args.apply(&mut config);

    let sink = Sink::from_config(&config.output, &config.playback)?;
    let session = Session::new(config)?;

    tracing::info!("Starting AUNetSend receiver");

    tokio::select! {
        result = session.run(sink) => match result {
            Ok(never) => match never {},
            Err(e) => {
                tracing::error!("{}", e);
                Err(e.into())
            }
        },
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Interrupted, shutting down");
            Ok(())
        }
    }
}
