//! Audio subsystem module

pub mod accordion;
pub mod buffer;
pub mod device;
pub mod drift;
pub mod playback;

pub use accordion::{accordion, Accordion, SpeedSource};
pub use buffer::{chunk_queue, ChunkReceiver, ChunkSender, OverrunPolicy};
pub use device::{list_devices, AudioDeviceInfo, CpalOutput};
pub use drift::{DriftFilter, DriftParams, SpeedCell};
pub use playback::{drain_to_writer, play_forever, PlaybackDevice, PlaybackSettings};
