//! AUNetSend wire format
//!
//! ```text
//! server ─► client   16 B   "ausend" + 10 opaque bytes
//! client ─► server   40 B   "aurecv" + 34 zero bytes
//! server ─► client   40 B   opaque stream metadata
//! server ─► client   repeating: "sync" (4 B) + 1024 B s16le stereo PCM @ 48 kHz
//! ```

use crate::constants::CHUNK_SIZE;

/// Magic the sender's greeting starts with
pub const SENDER_MAGIC: [u8; 6] = *b"ausend";

/// Magic our reply starts with
pub const RECEIVER_MAGIC: [u8; 6] = *b"aurecv";

/// Marker preceding every chunk
pub const SYNC_MARKER: [u8; 4] = *b"sync";

/// Length of the sender's greeting
pub const GREETING_LEN: usize = 16;

/// Length of our reply to the greeting
pub const REPLY_LEN: usize = 40;

/// Length of the metadata block following the handshake
pub const METADATA_LEN: usize = 40;

/// Maximum payload of a single chunk read
pub const MAX_CHUNK_LEN: usize = CHUNK_SIZE;

/// Build the 40-byte handshake reply: the receiver magic, zero padded.
pub fn handshake_reply() -> [u8; REPLY_LEN] {
    let mut reply = [0u8; REPLY_LEN];
    reply[..RECEIVER_MAGIC.len()].copy_from_slice(&RECEIVER_MAGIC);
    reply
}

/// Check a greeting read from the sender.
pub fn is_valid_greeting(payload: &[u8]) -> bool {
    payload.len() == GREETING_LEN && payload.starts_with(&SENDER_MAGIC)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reply_layout() {
        let reply = handshake_reply();
        assert_eq!(reply.len(), 40);
        assert_eq!(&reply[..6], b"aurecv");
        assert!(reply[6..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_greeting_validation() {
        assert!(is_valid_greeting(b"ausend\0\0\0\0\0\0\0\0\0\x01"));
        assert!(!is_valid_greeting(b"ausend"));
        assert!(!is_valid_greeting(b"ausenx\0\0\0\0\0\0\0\0\0\0"));
        assert!(!is_valid_greeting(b"ausend\0\0\0\0\0\0\0\0\0\0\0"));
    }
}
