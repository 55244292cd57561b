//! # AUNet Receiver
//!
//! Receives an AUNetSend TCP audio stream and plays it on a local device,
//! compensating for clock drift between sender and sound card.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           AUNetSend host                             │
//! │        "ausend" greeting │ metadata │ ("sync" + 1024 B PCM)*         │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    │ TCP
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Receive task (network::receiver) - tokio                            │
//! │  PreHandshake ─► PreMetadata ─► PreSync ◄──► Ready                   │
//! └──────────────────────────────────┬───────────────────────────────────┘
//!                                    │ chunks (audio::buffer)
//!                                    ▼
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │  Playback thread (audio::playback)                                   │
//! │  unpack ─► accordion ─► pack ─► device.write()                       │
//! │               ▲                      │                               │
//! │               └──── speed ◄── drift filter ◄── device.avail()        │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod codec;
pub mod config;
pub mod error;
pub mod network;
pub mod protocol;
pub mod session;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Default AUNetSend TCP port
    pub const DEFAULT_PORT: u16 = 52800;

    /// Stream sample rate
    pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

    /// Stream channel count (interleaved stereo)
    pub const DEFAULT_CHANNELS: u16 = 2;

    /// Bytes per frame (one 16-bit stereo sample pair)
    pub const FRAME_SIZE: usize = 4;

    /// Bytes per chunk on the wire
    pub const CHUNK_SIZE: usize = 1024;

    /// Frames carried by one chunk
    pub const FRAMES_PER_CHUNK: usize = CHUNK_SIZE / FRAME_SIZE;

    /// Default frames per device period
    pub const DEFAULT_PERIOD_SIZE: usize = 64;

    /// Default number of periods in the device buffer
    pub const DEFAULT_PERIODS: usize = 96;

    /// Timeout applied to each handshake step and each sync scan
    pub const STEP_TIMEOUT: Duration = Duration::from_secs(1);

    /// Default TCP connect timeout
    pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Default drift filter momentum
    pub const DEFAULT_MOMENTUM: f64 = 1e-2;

    /// Default drift filter sensitivity
    pub const DEFAULT_SENSITIVITY: f64 = 1e-5;

    /// Bonjour service type advertised by AUNetSend
    pub const BONJOUR_SERVICE_TYPE: &str = "_apple-ausend._tcp.local.";

    /// Default Bonjour instance name
    pub const DEFAULT_BONJOUR_NAME: &str = "AUNetSend";
}
