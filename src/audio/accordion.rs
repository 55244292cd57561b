//! Accordion stage: stretch or squeeze the frame stream
//!
//! For every frame the current speed is sampled once:
//! - `speed < 0`: duplicate the frame with probability `|speed|` (adds latency)
//! - `speed > 0`: drop the frame with probability `|speed|` (removes latency)
//! - `speed == 0`: pass the frame through
//!
//! Corrections are spread randomly instead of on a fixed cadence, which
//! keeps any single inserted or skipped frame inaudible.

use bytes::Bytes;
use rand::Rng;
use std::sync::Arc;

use super::drift::SpeedCell;

/// Anything the accordion can read the current speed from
pub trait SpeedSource {
    fn speed(&self) -> f64;
}

impl SpeedSource for SpeedCell {
    fn speed(&self) -> f64 {
        self.load()
    }
}

impl<T: SpeedSource + ?Sized> SpeedSource for Arc<T> {
    fn speed(&self) -> f64 {
        (**self).speed()
    }
}

impl<T: SpeedSource + ?Sized> SpeedSource for &T {
    fn speed(&self) -> f64 {
        (**self).speed()
    }
}

/// Fixed speed, mostly useful for tests
impl SpeedSource for f64 {
    fn speed(&self) -> f64 {
        *self
    }
}

/// Running totals of accordion corrections
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccordionStats {
    pub frames_in: u64,
    pub duplicated: u64,
    pub dropped: u64,
}

/// Iterator adapter returned by [`accordion`]
pub struct Accordion<I, S, R> {
    frames: I,
    speed: S,
    rng: R,
    repeat: Option<Bytes>,
    stats: AccordionStats,
}

impl<I, S, R> Accordion<I, S, R> {
    pub fn stats(&self) -> AccordionStats {
        self.stats
    }
}

impl<I, S, R> Iterator for Accordion<I, S, R>
where
    I: Iterator<Item = Bytes>,
    S: SpeedSource,
    R: Rng,
{
    type Item = Bytes;

    fn next(&mut self) -> Option<Bytes> {
        if let Some(frame) = self.repeat.take() {
            return Some(frame);
        }

        loop {
            let frame = self.frames.next()?;
            self.stats.frames_in += 1;

            let speed = self.speed.speed();
            if speed < 0.0 && self.rng.gen::<f64>() < speed.abs() {
                // underrun: play this frame twice
                self.stats.duplicated += 1;
                self.repeat = Some(frame.clone());
                return Some(frame);
            } else if speed > 0.0 && self.rng.gen::<f64>() < speed.abs() {
                // overrun: skip this frame
                self.stats.dropped += 1;
                continue;
            }
            return Some(frame);
        }
    }
}

/// Duplicate or drop frames of `frames` according to `speed`, using the
/// thread-local RNG.
pub fn accordion<I, S>(frames: I, speed: S) -> Accordion<I::IntoIter, S, rand::rngs::ThreadRng>
where
    I: IntoIterator<Item = Bytes>,
    S: SpeedSource,
{
    accordion_with_rng(frames, speed, rand::thread_rng())
}

/// [`accordion`] with an explicit random source.
pub fn accordion_with_rng<I, S, R>(frames: I, speed: S, rng: R) -> Accordion<I::IntoIter, S, R>
where
    I: IntoIterator<Item = Bytes>,
    S: SpeedSource,
    R: Rng,
{
    Accordion {
        frames: frames.into_iter(),
        speed,
        rng,
        repeat: None,
        stats: AccordionStats::default(),
    }
}
