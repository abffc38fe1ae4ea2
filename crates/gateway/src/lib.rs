//! Gateway: the direct-message relay hub and its WebSocket/HTTP surface.
//!
//! Lifecycle:
//! 1. Load config, build the secret store and OTP engine
//! 2. Spawn the hub task that owns the session registry
//! 3. Bind the HTTP server (health, WebSocket upgrade)
//! 4. Attach each upgraded connection as a session with a read and a write loop
//!
//! Routing policy (handshakes, allow-lists, direct messages, broadcast) lives
//! in `hub.rs`; connection timing and framing live in `session.rs`.

pub mod clock;
pub mod error;
pub mod hub;
pub mod server;
pub mod session;
pub mod transport;

pub use {
    error::{Error, SessionError},
    hub::{Hub, HubHandle},
    session::{Relay, SessionLimits},
};
