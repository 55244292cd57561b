//! Playback loop
//!
//! Drains the hand-off queue through unpack -> accordion -> pack and writes
//! each period to the device. After every write the drift filter turns the
//! device fill level into a new speed for the accordion.

use bytes::Bytes;
use std::convert::Infallible;
use std::io::Write;
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::accordion::accordion;
use super::buffer::ChunkReceiver;
use super::drift::{DriftFilter, DriftParams, SpeedCell};
use crate::codec::{pack_frames, unpack_frames};
use crate::config::PlaybackConfig;
use crate::constants::{FRAMES_PER_CHUNK, FRAME_SIZE};
use crate::error::{AudioError, QueueError, Result};

/// Sink the playback loop writes periods to
pub trait PlaybackDevice {
    /// Free space in the device buffer, in frames
    fn avail(&self) -> std::result::Result<usize, AudioError>;

    /// Total device buffer size, in frames
    fn buffer_frames(&self) -> usize;

    /// Write one period of interleaved s16le frames, blocking while the
    /// device is full.
    fn write(&mut self, period: &[u8]) -> std::result::Result<(), AudioError>;
}

/// Playback loop settings
#[derive(Debug, Clone)]
pub struct PlaybackSettings {
    pub period_size: usize,
    pub drift: DriftParams,
    pub wait_for_device: bool,
    pub stats_interval: Duration,
}

impl From<&PlaybackConfig> for PlaybackSettings {
    fn from(config: &PlaybackConfig) -> Self {
        Self {
            period_size: config.period_size,
            drift: DriftParams {
                momentum: config.momentum,
                sensitivity: config.sensitivity,
                target_occupancy: config.target_occupancy() as f64,
                frames_per_chunk: FRAMES_PER_CHUNK,
            },
            wait_for_device: config.wait_for_device,
            stats_interval: Duration::from_secs(config.stats_interval_secs),
        }
    }
}

/// Play `chunks` on `device` until the queue closes or the device fails.
///
/// Keeps `avail - queued * frames_per_chunk` near the target occupancy by
/// duplicating or dropping single frames. `speed` is reset to zero on entry
/// and updated once per period.
pub fn play_forever<D>(
    chunks: ChunkReceiver,
    device: &mut D,
    settings: &PlaybackSettings,
    speed: Arc<SpeedCell>,
) -> Result<Infallible>
where
    D: PlaybackDevice + ?Sized,
{
    let queue = chunks.probe();
    let mut filter = DriftFilter::new(settings.drift);
    speed.store(0.0);

    let frames = chunks
        .into_blocking_iter()
        .flat_map(|chunk| unpack_frames(chunk, FRAME_SIZE));
    let corrected = accordion(frames, speed.clone());
    let periods = pack_frames(corrected, settings.period_size);

    let mut periods_written = 0u64;
    let mut last_stats = Instant::now();

    for period in periods {
        if settings.wait_for_device {
            wait_for_room(device, period.len() / FRAME_SIZE)?;
        }

        let avail = device.avail()?;
        device.write(&period)?;
        speed.store(filter.update(avail, queue.len()));
        periods_written += 1;

        if last_stats.elapsed() >= settings.stats_interval {
            last_stats = Instant::now();
            let stats = queue.stats();
            tracing::debug!(
                avail,
                queued = stats.depth,
                overruns = stats.overruns,
                error = filter.last_error(),
                speed = filter.speed(),
                periods_written,
                "playback"
            );
        }
    }

    Err(QueueError::Closed.into())
}

/// Yield until the device can take `frames` more frames.
fn wait_for_room<D>(device: &D, frames: usize) -> std::result::Result<(), AudioError>
where
    D: PlaybackDevice + ?Sized,
{
    let frames = frames.min(device.buffer_frames());
    while device.avail()? < frames {
        std::thread::sleep(Duration::from_micros(250));
    }
    Ok(())
}

/// Write raw chunks to `out` with no drift correction.
pub fn drain_to_writer<W: Write>(chunks: ChunkReceiver, out: &mut W) -> Result<Infallible> {
    for chunk in chunks.into_blocking_iter() {
        write_chunk(out, &chunk)?;
    }
    Err(QueueError::Closed.into())
}

fn write_chunk<W: Write>(out: &mut W, chunk: &Bytes) -> std::io::Result<()> {
    out.write_all(chunk)?;
    out.flush()
}
