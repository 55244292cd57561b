//! Receiver configuration
//!
//! Loaded from a TOML file (optional) and overridden from the command line.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::audio::buffer::OverrunPolicy;
use crate::constants::*;
use crate::error::{Error, Result};

/// Top-level configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub discovery: DiscoveryConfig,
    pub playback: PlaybackConfig,
    pub output: OutputConfig,
}

/// Connection and hand-off settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Sender host; mutually exclusive with a Bonjour name
    pub host: Option<String>,
    /// Sender port, defaults to 52800 when a host is given
    pub port: Option<u16>,
    pub connect_timeout_ms: u64,
    /// Timeout of each handshake step and sync scan
    pub step_timeout_ms: u64,
    /// How long to wait for queue space; unset fails immediately
    pub put_timeout_ms: Option<u64>,
    /// Drop chunks on overrun instead of stopping
    pub ignore_overruns: bool,
    /// Hand-off queue capacity in chunks; unset picks the sink default
    pub queue_capacity: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            host: None,
            port: None,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
            step_timeout_ms: STEP_TIMEOUT.as_millis() as u64,
            put_timeout_ms: None,
            ignore_overruns: true,
            queue_capacity: None,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn step_timeout(&self) -> Duration {
        Duration::from_millis(self.step_timeout_ms)
    }

    pub fn overrun_policy(&self) -> OverrunPolicy {
        OverrunPolicy {
            put_timeout: self.put_timeout_ms.map(Duration::from_millis),
            ignore_overruns: self.ignore_overruns,
        }
    }
}

/// Bonjour lookup settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    /// Instance name to resolve when no host is given
    pub bonjour_name: Option<String>,
    pub timeout_ms: u64,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            bonjour_name: None,
            timeout_ms: 5000,
        }
    }
}

impl DiscoveryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Device playback and drift compensation settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlaybackConfig {
    /// Output device name; unset uses the default output
    pub device: Option<String>,
    /// Frames per period written to the device
    pub period_size: usize,
    /// Periods in the device buffer
    pub periods: usize,
    pub momentum: f64,
    pub sensitivity: f64,
    /// Target free space in frames; unset means half the device buffer
    pub target_occupancy: Option<usize>,
    /// Yield until the device has room before each write
    pub wait_for_device: bool,
    /// Interval between statistics log lines
    pub stats_interval_secs: u64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            device: None,
            period_size: DEFAULT_PERIOD_SIZE,
            periods: DEFAULT_PERIODS,
            momentum: DEFAULT_MOMENTUM,
            sensitivity: DEFAULT_SENSITIVITY,
            target_occupancy: None,
            wait_for_device: true,
            stats_interval_secs: 5,
        }
    }
}

impl PlaybackConfig {
    /// Device buffer size in frames
    pub fn buffer_frames(&self) -> usize {
        self.period_size * self.periods
    }

    pub fn target_occupancy(&self) -> usize {
        self.target_occupancy.unwrap_or(self.buffer_frames() / 2)
    }
}

/// Where received audio goes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    /// Play through an audio device instead of writing raw PCM
    pub play: bool,
    /// Append raw PCM to this file; unset writes to stdout
    pub file: Option<PathBuf>,
}

/// Where to connect
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    Direct { host: String, port: u16 },
    Bonjour { name: String },
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    /// Default config file location, `<config dir>/aunetreceive/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "aunetreceive")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// Load the default config file if it exists, defaults otherwise.
    pub fn load_or_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) if path.exists() => {
                tracing::debug!("loading config from {}", path.display());
                Self::load(&path)
            }
            _ => Ok(Self::default()),
        }
    }

    /// Decide where to connect.
    pub fn endpoint(&self) -> Result<Endpoint> {
        let network = &self.network;
        match (&network.host, network.port, &self.discovery.bonjour_name) {
            (Some(_), _, Some(_)) | (None, Some(_), Some(_)) => Err(Error::Config(
                "--host/-H and --port/-p are mutually exclusive with --bonjour-name/-B".into(),
            )),
            (Some(host), port, None) => Ok(Endpoint::Direct {
                host: host.clone(),
                port: port.unwrap_or(DEFAULT_PORT),
            }),
            (None, Some(_), None) => Err(Error::Config("--port/-p requires --host/-H".into())),
            (None, None, name) => Ok(Endpoint::Bonjour {
                name: name.clone().unwrap_or_else(|| DEFAULT_BONJOUR_NAME.to_string()),
            }),
        }
    }

    /// Hand-off queue capacity: explicit, else 1 for file output and
    /// unbounded for device playback.
    pub fn queue_capacity(&self) -> Option<usize> {
        match self.network.queue_capacity {
            Some(capacity) => Some(capacity),
            None if self.output.play => None,
            None => Some(1),
        }
    }

    /// Check value ranges.
    pub fn validate(&self) -> Result<()> {
        let network = &self.network;
        let playback = &self.playback;

        if network.connect_timeout_ms == 0 {
            return Err(Error::Config("connect timeout must be positive".into()));
        }
        if network.step_timeout_ms == 0 {
            return Err(Error::Config("step timeout must be positive".into()));
        }
        if network.put_timeout_ms == Some(0) {
            return Err(Error::Config("put timeout must be positive when set".into()));
        }
        if network.queue_capacity == Some(0) {
            return Err(Error::Config("queue capacity must be positive when set".into()));
        }
        if playback.period_size == 0 {
            return Err(Error::Config("period size must be positive".into()));
        }
        if playback.periods < 2 {
            return Err(Error::Config("at least two periods are required".into()));
        }
        if !(playback.momentum > 0.0 && playback.momentum <= 1.0) {
            return Err(Error::Config(format!(
                "momentum must be in (0, 1], got {}",
                playback.momentum
            )));
        }
        if !(playback.sensitivity > 0.0 && playback.sensitivity.is_finite()) {
            return Err(Error::Config(format!(
                "sensitivity must be positive, got {}",
                playback.sensitivity
            )));
        }
        if let Some(target) = playback.target_occupancy {
            if target > playback.buffer_frames() {
                return Err(Error::Config(format!(
                    "target occupancy {} exceeds device buffer of {} frames",
                    target,
                    playback.buffer_frames()
                )));
            }
        }
        if self.output.play && self.output.file.is_some() {
            return Err(Error::Config("an output file cannot be combined with device playback".into()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = AppConfig::default();
        config.validate().unwrap();
        assert_eq!(config.playback.target_occupancy(), 64 * 96 / 2);
        assert_eq!(config.network.overrun_policy(), OverrunPolicy::default());
    }

    #[test]
    fn test_partial_toml() {
        let config = AppConfig::from_toml(
            r#"
            [network]
            host = "10.0.0.2"
            put_timeout_ms = 250

            [playback]
            period_size = 128
            momentum = 0.05
            "#,
        )
        .unwrap();

        assert_eq!(config.network.host.as_deref(), Some("10.0.0.2"));
        assert_eq!(
            config.network.overrun_policy().put_timeout,
            Some(Duration::from_millis(250))
        );
        assert_eq!(config.playback.period_size, 128);
        assert_eq!(config.playback.periods, DEFAULT_PERIODS);
        assert_eq!(config.playback.momentum, 0.05);
    }

    #[test]
    fn test_toml_roundtrip() {
        let mut config = AppConfig::default();
        config.network.host = Some("studio.local".into());
        config.playback.target_occupancy = Some(1000);

        let text = config.to_toml().unwrap();
        assert_eq!(AppConfig::from_toml(&text).unwrap(), config);
    }

    #[test]
    fn test_endpoint_selection() {
        let mut config = AppConfig::default();
        assert_eq!(
            config.endpoint().unwrap(),
            Endpoint::Bonjour {
                name: "AUNetSend".into()
            }
        );

        config.network.host = Some("host".into());
        assert_eq!(
            config.endpoint().unwrap(),
            Endpoint::Direct {
                host: "host".into(),
                port: 52800
            }
        );

        config.network.port = Some(9000);
        assert_eq!(
            config.endpoint().unwrap(),
            Endpoint::Direct {
                host: "host".into(),
                port: 9000
            }
        );

        config.discovery.bonjour_name = Some("Studio".into());
        assert!(matches!(config.endpoint(), Err(Error::Config(_))));

        config.network.host = None;
        assert!(matches!(config.endpoint(), Err(Error::Config(_))));
    }

    #[test]
    fn test_queue_capacity_follows_sink() {
        let mut config = AppConfig::default();
        assert_eq!(config.queue_capacity(), Some(1));

        config.output.play = true;
        assert_eq!(config.queue_capacity(), None);

        config.network.queue_capacity = Some(32);
        assert_eq!(config.queue_capacity(), Some(32));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = AppConfig::default();
        config.playback.momentum = 0.0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.playback.periods = 1;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.network.put_timeout_ms = Some(0);
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.playback.target_occupancy = Some(1_000_000);
        assert!(config.validate().is_err());
    }
}
