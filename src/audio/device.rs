//! Output device enumeration and cpal-backed playback

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{FromSample, Sample, SampleFormat, SizedSample, StreamConfig};
use crossbeam::channel::{bounded, Receiver};
use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use super::playback::PlaybackDevice;
use crate::constants::{DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, FRAME_SIZE};
use crate::error::AudioError;

/// Description of an output device
#[derive(Debug, Clone, Serialize)]
pub struct AudioDeviceInfo {
    pub name: String,
    pub is_default: bool,
    pub sample_rates: Vec<u32>,
    pub channels: Vec<u16>,
}

impl AudioDeviceInfo {
    /// Whether the device can play the AUNetSend stream format directly
    pub fn supports_stream_format(&self) -> bool {
        self.sample_rates.contains(&DEFAULT_SAMPLE_RATE) && self.channels.contains(&DEFAULT_CHANNELS)
    }
}

/// List all output devices of the default host
pub fn list_devices() -> Vec<AudioDeviceInfo> {
    let host = cpal::default_host();
    let default_name = host.default_output_device().and_then(|d| d.name().ok());

    let mut devices = Vec::new();
    if let Ok(output_devices) = host.output_devices() {
        for device in output_devices {
            if let Ok(name) = device.name() {
                let (sample_rates, channels) = get_device_capabilities(&device);
                devices.push(AudioDeviceInfo {
                    is_default: default_name.as_ref() == Some(&name),
                    name,
                    sample_rates,
                    channels,
                });
            }
        }
    }
    devices
}

fn get_device_capabilities(device: &cpal::Device) -> (Vec<u32>, Vec<u16>) {
    let mut sample_rates = Vec::new();
    let mut channels = Vec::new();

    if let Ok(configs) = device.supported_output_configs() {
        for config in configs {
            for rate_val in [44100u32, 48000, 88200, 96000, 176400, 192000] {
                let rate = cpal::SampleRate(rate_val);
                if rate >= config.min_sample_rate()
                    && rate <= config.max_sample_rate()
                    && !sample_rates.contains(&rate_val)
                {
                    sample_rates.push(rate_val);
                }
            }
            if !channels.contains(&config.channels()) {
                channels.push(config.channels());
            }
        }
    }

    sample_rates.sort();
    channels.sort();
    (sample_rates, channels)
}

/// Find an output device by name, or the default output when `name` is `None`
pub fn get_output_device(name: Option<&str>) -> Result<cpal::Device, AudioError> {
    let host = cpal::default_host();

    let Some(name) = name else {
        return host
            .default_output_device()
            .ok_or_else(|| AudioError::DeviceNotFound("No default output device".to_string()));
    };

    let devices = host
        .output_devices()
        .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;
    for device in devices {
        if device.name().map(|n| n == name).unwrap_or(false) {
            return Ok(device);
        }
    }
    Err(AudioError::DeviceNotFound(name.to_string()))
}

/// Output stream fed from a lock-free sample ring
///
/// The cpal callback pops samples and plays silence when the ring runs dry.
/// The stream is not `Send` on every platform, so it must be opened on the
/// thread that writes to it.
pub struct CpalOutput {
    _stream: cpal::Stream,
    ring: Arc<ArrayQueue<i16>>,
    channels: usize,
    buffer_frames: usize,
    underruns: Arc<AtomicU64>,
    error_rx: Receiver<AudioError>,
    name: String,
}

impl CpalOutput {
    /// Open `device_name` (or the default output) with a buffer of
    /// `period_size * periods` frames.
    pub fn open(device_name: Option<&str>, period_size: usize, periods: usize) -> Result<Self, AudioError> {
        let device = get_output_device(device_name)?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        let sample_format = device
            .default_output_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?
            .sample_format();

        let channels = DEFAULT_CHANNELS as usize;
        let buffer_frames = period_size * periods;
        let ring = Arc::new(ArrayQueue::new(buffer_frames * channels));
        let underruns = Arc::new(AtomicU64::new(0));
        let (error_tx, error_rx) = bounded::<AudioError>(16);

        let fixed = StreamConfig {
            channels: DEFAULT_CHANNELS,
            sample_rate: cpal::SampleRate(DEFAULT_SAMPLE_RATE),
            buffer_size: cpal::BufferSize::Fixed(period_size as u32),
        };

        let build = |config: &StreamConfig| match sample_format {
            SampleFormat::I16 => build_stream::<i16>(&device, config, &ring, &underruns, &error_tx),
            SampleFormat::F32 => build_stream::<f32>(&device, config, &ring, &underruns, &error_tx),
            SampleFormat::I32 => build_stream::<i32>(&device, config, &ring, &underruns, &error_tx),
            SampleFormat::U16 => build_stream::<u16>(&device, config, &ring, &underruns, &error_tx),
            other => Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
        };

        // Not every backend accepts a fixed buffer size
        let stream = match build(&fixed) {
            Ok(stream) => stream,
            Err(AudioError::UnsupportedFormat(e)) => return Err(AudioError::UnsupportedFormat(e)),
            Err(e) => {
                tracing::debug!("fixed buffer size rejected ({}), using device default", e);
                build(&StreamConfig {
                    buffer_size: cpal::BufferSize::Default,
                    ..fixed.clone()
                })?
            }
        };

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        tracing::info!(
            "playing on {} ({:?}, {} frames buffer)",
            name,
            sample_format,
            buffer_frames
        );

        Ok(Self {
            _stream: stream,
            ring,
            channels,
            buffer_frames,
            underruns,
            error_rx,
            name,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Callbacks that found the ring empty
    pub fn underruns(&self) -> u64 {
        self.underruns.load(Ordering::Relaxed)
    }

    fn check_errors(&self) -> Result<(), AudioError> {
        match self.error_rx.try_recv() {
            Ok(e) => Err(e),
            Err(_) => Ok(()),
        }
    }
}

fn build_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    ring: &Arc<ArrayQueue<i16>>,
    underruns: &Arc<AtomicU64>,
    error_tx: &crossbeam::channel::Sender<AudioError>,
) -> Result<cpal::Stream, AudioError>
where
    T: SizedSample + FromSample<i16>,
{
    let ring = ring.clone();
    let underruns = underruns.clone();
    let error_tx = error_tx.clone();

    device
        .build_output_stream(
            config,
            move |data: &mut [T], _: &cpal::OutputCallbackInfo| {
                let mut starved = false;
                for sample in data.iter_mut() {
                    *sample = match ring.pop() {
                        Some(s) => T::from_sample(s),
                        None => {
                            starved = true;
                            T::EQUILIBRIUM
                        }
                    };
                }
                if starved {
                    underruns.fetch_add(1, Ordering::Relaxed);
                }
            },
            move |err| {
                tracing::error!("output stream error: {}", err);
                let _ = error_tx.try_send(AudioError::DeviceError(err.to_string()));
            },
            None,
        )
        .map_err(|e| AudioError::StreamError(e.to_string()))
}

impl PlaybackDevice for CpalOutput {
    fn avail(&self) -> Result<usize, AudioError> {
        self.check_errors()?;
        Ok((self.ring.capacity() - self.ring.len()) / self.channels)
    }

    fn buffer_frames(&self) -> usize {
        self.buffer_frames
    }

    fn write(&mut self, period: &[u8]) -> Result<(), AudioError> {
        if period.len() % FRAME_SIZE != 0 {
            return Err(AudioError::UnsupportedFormat(format!(
                "period of {} bytes is not a whole number of frames",
                period.len()
            )));
        }

        for bytes in period.chunks_exact(2) {
            let mut sample = i16::from_le_bytes([bytes[0], bytes[1]]);
            // Device full: wait for the callback to make room
            while let Err(rejected) = self.ring.push(sample) {
                sample = rejected;
                self.check_errors()?;
                std::thread::sleep(Duration::from_micros(250));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_devices() {
        // May be empty on CI/systems without audio devices
        let devices = list_devices();
        assert!(devices.iter().filter(|d| d.is_default).count() <= 1);
    }

    #[test]
    fn test_stream_format_support() {
        let info = AudioDeviceInfo {
            name: "test".into(),
            is_default: false,
            sample_rates: vec![44100, 48000],
            channels: vec![2],
        };
        assert!(info.supports_stream_format());

        let mono = AudioDeviceInfo {
            channels: vec![1],
            ..info
        };
        assert!(!mono.supports_stream_format());
    }

    #[test]
    fn test_unknown_device_name() {
        let result = get_output_device(Some("no such device 7f3a"));
        assert!(matches!(result, Err(AudioError::DeviceNotFound(_))));
    }
}
