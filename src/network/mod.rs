//! Network subsystem for the AUNetSend TCP stream

pub mod connection;
#[cfg(feature = "discovery")]
pub mod discovery;
pub mod receiver;

pub use connection::{Connection, PreHandshake, PreMetadata, PreSync, Ready};
pub use receiver::{receive_forever, receive_from, ReceiverSettings};
