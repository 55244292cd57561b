//! Clock drift estimation
//!
//! The playback thread measures how far the device buffer is from its
//! target fill level once per period and turns that into a `speed` in
//! `[-1.0, 1.0]`, smoothed by a single-pole low-pass filter. The accordion
//! stage reads the same value once per frame.

use std::sync::atomic::{AtomicU64, Ordering};

/// Lock-free `f64` cell shared between the drift filter and the accordion
///
/// Stored as raw bits in an `AtomicU64`. Loads and stores never block and
/// use relaxed ordering, a reader only needs some recent value.
#[derive(Debug)]
pub struct SpeedCell(AtomicU64);

impl SpeedCell {
    pub fn new(speed: f64) -> Self {
        Self(AtomicU64::new(speed.to_bits()))
    }

    pub fn load(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::Relaxed))
    }

    pub fn store(&self, speed: f64) {
        self.0.store(speed.to_bits(), Ordering::Relaxed);
    }
}

impl Default for SpeedCell {
    fn default() -> Self {
        Self::new(0.0)
    }
}

/// Drift filter parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DriftParams {
    /// Weight of the newest measurement, in `(0, 1]`
    pub momentum: f64,
    /// Scale from frame-count error to probability
    pub sensitivity: f64,
    /// Desired free space in the device buffer, in frames
    pub target_occupancy: f64,
    /// Frames represented by one queued chunk
    pub frames_per_chunk: usize,
}

/// Single-pole feedback filter producing the playback speed
///
/// ```text
/// error = avail - queued * frames_per_chunk - target
/// speed = momentum * -error * sensitivity + (1 - momentum) * speed
/// ```
///
/// The result is clamped to `[-1.0, 1.0]` after every update.
#[derive(Debug, Clone)]
pub struct DriftFilter {
    params: DriftParams,
    speed: f64,
    last_error: f64,
}

impl DriftFilter {
    pub fn new(params: DriftParams) -> Self {
        Self {
            params,
            speed: 0.0,
            last_error: 0.0,
        }
    }

    /// Occupancy error for a device with `avail` free frames and
    /// `queued_chunks` chunks still waiting in the hand-off queue.
    pub fn error(&self, avail: usize, queued_chunks: usize) -> f64 {
        let queued_frames = (queued_chunks * self.params.frames_per_chunk) as f64;
        avail as f64 - queued_frames - self.params.target_occupancy
    }

    /// Feed one measurement, returning the new speed.
    pub fn update(&mut self, avail: usize, queued_chunks: usize) -> f64 {
        let error = self.error(avail, queued_chunks);
        self.update_error(error)
    }

    /// Feed a raw error value, returning the new speed.
    pub fn update_error(&mut self, error: f64) -> f64 {
        let DriftParams {
            momentum,
            sensitivity,
            ..
        } = self.params;

        let speed = momentum * -error * sensitivity + (1.0 - momentum) * self.speed;
        self.speed = speed.clamp(-1.0, 1.0);
        self.last_error = error;
        self.speed
    }

    pub fn speed(&self) -> f64 {
        self.speed
    }

    pub fn last_error(&self) -> f64 {
        self.last_error
    }

    pub fn params(&self) -> &DriftParams {
        &self.params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn params() -> DriftParams {
        DriftParams {
            momentum: 1e-2,
            sensitivity: 1e-5,
            target_occupancy: 3072.0,
            frames_per_chunk: 256,
        }
    }

    #[test]
    fn test_speed_cell_shared() {
        let cell = Arc::new(SpeedCell::default());
        assert_eq!(cell.load(), 0.0);

        let writer = cell.clone();
        std::thread::spawn(move || writer.store(-0.25)).join().unwrap();
        assert_eq!(cell.load(), -0.25);
    }

    #[test]
    fn test_error_term() {
        let filter = DriftFilter::new(params());
        // 6144 free, 4 chunks queued, target 3072
        assert_eq!(filter.error(6144, 4), 6144.0 - 1024.0 - 3072.0);
        assert_eq!(filter.error(3072, 0), 0.0);
    }

    #[test]
    fn test_at_target_speed_stays_zero() {
        let mut filter = DriftFilter::new(params());
        for _ in 0..100 {
            assert_eq!(filter.update(3072, 0), 0.0);
        }
    }

    #[test]
    fn test_positive_error_decreases_speed() {
        let mut filter = DriftFilter::new(params());
        let mut previous = filter.speed();

        for _ in 0..1000 {
            let speed = filter.update_error(1000.0);
            assert!(speed < previous);
            assert!(speed >= -1.0);
            previous = speed;
        }
        // Converges towards -error * sensitivity
        assert!((previous + 0.01).abs() < 1e-4);
    }

    #[test]
    fn test_negative_error_increases_speed() {
        let mut filter = DriftFilter::new(params());
        let mut previous = filter.speed();

        for _ in 0..1000 {
            let speed = filter.update_error(-1000.0);
            assert!(speed > previous);
            assert!(speed <= 1.0);
            previous = speed;
        }
    }

    #[test]
    fn test_speed_is_clamped() {
        let mut filter = DriftFilter::new(DriftParams {
            momentum: 1.0,
            sensitivity: 1.0,
            ..params()
        });

        assert_eq!(filter.update_error(1e9), -1.0);
        assert_eq!(filter.update_error(-1e9), 1.0);
        assert_eq!(filter.last_error(), -1e9);
    }
}
