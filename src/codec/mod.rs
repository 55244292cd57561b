//! Frame codec
//!
//! Slices network chunks into 4-byte stereo frames and regroups frames
//! into device-sized periods.

pub mod frames;

pub use frames::{pack_frames, unpack_frames, PackFrames, UnpackFrames};
