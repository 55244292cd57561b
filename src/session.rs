//! Receive + output as one unit
//!
//! The receive loop runs as a tokio task, the output (device playback or
//! raw file/stdout writer) on its own thread. Whichever fails first ends
//! the session; nothing is retried.

use std::convert::Infallible;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

use crate::audio::buffer::{chunk_queue, ChunkReceiver};
use crate::audio::device::CpalOutput;
use crate::audio::drift::SpeedCell;
use crate::audio::playback::{drain_to_writer, play_forever, PlaybackSettings};
use crate::config::{AppConfig, Endpoint, OutputConfig, PlaybackConfig};
use crate::error::{Error, QueueError, Result};
use crate::network::receiver::{receive_forever, ReceiverSettings};

/// Where received audio is written
pub enum Sink {
    /// Drift-compensated playback on an output device
    Device(PlaybackConfig),
    /// Raw PCM, no drift compensation
    Writer(Box<dyn Write + Send>),
}

impl Sink {
    /// Build the sink described by `output`.
    pub fn from_config(output: &OutputConfig, playback: &PlaybackConfig) -> Result<Self> {
        if output.play {
            return Ok(Sink::Device(playback.clone()));
        }
        match &output.file {
            Some(path) => {
                let file = OpenOptions::new().create(true).append(true).open(path)?;
                tracing::info!("appending PCM to {}", path.display());
                Ok(Sink::Writer(Box::new(file)))
            }
            None => Ok(Sink::Writer(Box::new(std::io::stdout()))),
        }
    }
}

/// A configured receiver session
pub struct Session {
    config: AppConfig,
    speed: Arc<SpeedCell>,
}

impl Session {
    pub fn new(config: AppConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            speed: Arc::new(SpeedCell::default()),
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current playback speed correction
    pub fn speed(&self) -> Arc<SpeedCell> {
        self.speed.clone()
    }

    /// Resolve the configured endpoint to a host and port.
    pub async fn resolve(&self) -> Result<(String, u16)> {
        match self.config.endpoint()? {
            Endpoint::Direct { host, port } => Ok((host, port)),
            #[cfg(feature = "discovery")]
            Endpoint::Bonjour { name } => {
                let service =
                    crate::network::discovery::resolve(&name, self.config.discovery.timeout()).await?;
                Ok((service.host.to_string(), service.port))
            }
            #[cfg(not(feature = "discovery"))]
            Endpoint::Bonjour { name } => Err(Error::Config(format!(
                "cannot resolve {}: built without Bonjour discovery, pass --host",
                name
            ))),
        }
    }

    /// Connect and run until either loop fails.
    pub async fn run(self, sink: Sink) -> Result<Infallible> {
        let (host, port) = self.resolve().await?;
        let settings = ReceiverSettings::new(host, port, &self.config.network);

        let (tx, rx) = chunk_queue(self.config.queue_capacity());
        let probe = tx.probe();

        let (done_tx, mut done_rx) = oneshot::channel();
        spawn_output(rx, sink, self.speed.clone(), done_tx)?;

        let mut receive = tokio::spawn(receive_forever(tx, settings));

        let interval = Duration::from_secs(self.config.playback.stats_interval_secs.max(1));
        let mut stats = tokio::time::interval(interval);
        stats.tick().await;

        loop {
            tokio::select! {
                biased;
                joined = &mut receive => {
                    return join_result(joined);
                }
                output = &mut done_rx => {
                    return match output {
                        Ok(Ok(never)) => match never {},
                        // Queue closed: the receive side ended first
                        Ok(Err(Error::Queue(QueueError::Closed))) => join_result(receive.await),
                        Ok(Err(e)) => {
                            receive.abort();
                            Err(e)
                        }
                        Err(_) => {
                            receive.abort();
                            Err(Error::Task("output thread exited".into()))
                        }
                    };
                }
                _ = stats.tick() => {
                    let stats = probe.stats();
                    tracing::debug!(
                        queued = stats.depth,
                        delivered = stats.delivered,
                        overruns = stats.overruns,
                        speed = self.speed.load(),
                        "receiver"
                    );
                }
            }
        }
    }
}

fn join_result(
    joined: std::result::Result<Result<Infallible>, tokio::task::JoinError>,
) -> Result<Infallible> {
    match joined {
        Ok(Ok(never)) => match never {},
        Ok(Err(e)) => Err(e),
        Err(e) => Err(Error::Task(e.to_string())),
    }
}

fn spawn_output(
    rx: ChunkReceiver,
    sink: Sink,
    speed: Arc<SpeedCell>,
    done: oneshot::Sender<Result<Infallible>>,
) -> Result<()> {
    let name = match &sink {
        Sink::Device(_) => "playback",
        Sink::Writer(_) => "writer",
    };

    std::thread::Builder::new()
        .name(name.to_string())
        .spawn(move || {
            let result = run_output(rx, sink, speed);
            let _ = done.send(result);
        })?;
    Ok(())
}

fn run_output(rx: ChunkReceiver, sink: Sink, speed: Arc<SpeedCell>) -> Result<Infallible> {
    match sink {
        Sink::Device(playback) => {
            let mut device = CpalOutput::open(
                playback.device.as_deref(),
                playback.period_size,
                playback.periods,
            )?;
            let settings = PlaybackSettings::from(&playback);
            let result = play_forever(rx, &mut device, &settings, speed);
            tracing::debug!("device underruns: {}", device.underruns());
            result
        }
        Sink::Writer(mut out) => drain_to_writer(rx, &mut out),
    }
}
