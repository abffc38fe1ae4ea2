//! Wire protocol shared by the relay hub and its clients.
//!
//! Inbound frames are JSON objects tagged by `type`:
//!
//! ```json
//! {"type": "handshake_attempt", "sender_id": "alice", "target_id": "bob", "code": "123456"}
//! {"type": "dm", "sender_id": "alice", "target_id": "bob", "content": "hi"}
//! {"type": "broadcast", "sender_id": "alice", "content": "hello all"}
//! ```
//!
//! Anything with an unrecognized `type` is fanned out like a broadcast.
//! Outbound frames produced by the hub itself are described by [`ServerFrame`].

pub mod frames;
pub mod message;

pub use {
    frames::ServerFrame,
    message::{Message, MessageKind, Route},
};

pub const PROTOCOL_VERSION: u32 = 1;

/// Largest inbound frame accepted from a client, in bytes.
pub const MAX_MESSAGE_SIZE: usize = 512;

/// Time allowed to read the next pong from the peer.
pub const PONG_WAIT_MS: u64 = 60_000;

/// Time allowed to write a frame to the peer.
pub const WRITE_WAIT_MS: u64 = 10_000;

/// Capacity of each session's outbound queue.
pub const SEND_QUEUE_CAPACITY: usize = 256;

/// Ping period for a given pong wait. Must be less than the pong wait.
pub const fn ping_period_ms(pong_wait_ms: u64) -> u64 {
    pong_wait_ms * 9 / 10
}

/// Request header carrying the caller-asserted client identifier.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Type names of frames the hub originates.
pub mod kinds {
    pub const ENROLLMENT: &str = "totp dm verification";
    pub const HANDSHAKE_ACCEPTED: &str = "handshake_accepted";
}

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("malformed message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("failed to encode frame: {0}")]
    Encode(#[source] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ping_period_is_nine_tenths_of_pong_wait() {
        assert_eq!(ping_period_ms(PONG_WAIT_MS), 54_000);
        assert!(ping_period_ms(PONG_WAIT_MS) < PONG_WAIT_MS);
    }
}
