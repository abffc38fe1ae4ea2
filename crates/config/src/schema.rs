//! Config schema types (server, session, otp, hub, secrets).

use std::{path::PathBuf, time::Duration};

use {
    parley_protocol::{
        MAX_MESSAGE_SIZE, PONG_WAIT_MS, SEND_QUEUE_CAPACITY, WRITE_WAIT_MS, ping_period_ms,
    },
    serde::{Deserialize, Serialize},
};

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ParleyConfig {
    pub server: ServerConfig,
    pub session: SessionConfig,
    pub otp: OtpConfig,
    pub hub: HubConfig,
    pub secrets: SecretsConfig,
}

/// HTTP listener settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Listen port. When unset, `APP_PORT` is consulted, then 8080.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: None,
        }
    }
}

impl ServerConfig {
    pub const DEFAULT_PORT: u16 = 8080;

    /// Resolve the listen port: explicit config, then `APP_PORT`, then the default.
    pub fn resolved_port(&self) -> u16 {
        self.port
            .or_else(|| {
                std::env::var("APP_PORT")
                    .ok()
                    .and_then(|p| p.trim().parse().ok())
            })
            .unwrap_or(Self::DEFAULT_PORT)
    }
}

/// Per-connection limits and keepalive timing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Inbound frames larger than this are rejected by the transport.
    pub max_message_size: usize,
    /// A connection with no pong for this long is considered dead.
    pub pong_wait_secs: u64,
    /// Deadline for a single frame write.
    pub write_wait_secs: u64,
    /// Capacity of each session's outbound queue.
    pub send_queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            max_message_size: MAX_MESSAGE_SIZE,
            pong_wait_secs: PONG_WAIT_MS / 1000,
            write_wait_secs: WRITE_WAIT_MS / 1000,
            send_queue_capacity: SEND_QUEUE_CAPACITY,
        }
    }
}

impl SessionConfig {
    /// Pong wait, never below one second.
    pub fn pong_wait(&self) -> Duration {
        Duration::from_secs(self.pong_wait_secs.max(1))
    }

    pub fn ping_period(&self) -> Duration {
        Duration::from_millis(ping_period_ms(self.pong_wait_secs.max(1).saturating_mul(1000)))
    }

    /// Write deadline, never below one second.
    pub fn write_wait(&self) -> Duration {
        Duration::from_secs(self.write_wait_secs.max(1))
    }
}

/// One-time code parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OtpConfig {
    pub digits: usize,
    pub step_secs: u64,
    /// Adjacent windows accepted on either side of the current one.
    pub skew: u8,
    /// Length of generated secrets in raw bytes.
    pub secret_bytes: usize,
    /// Issuer label prefix; the client alias is appended.
    pub issuer_prefix: String,
}

impl Default for OtpConfig {
    fn default() -> Self {
        Self {
            digits: 6,
            step_secs: 30,
            skew: 1,
            secret_bytes: 20,
            issuer_prefix: "direct_message".into(),
        }
    }
}

/// Hub routing policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Notify both parties when a handshake succeeds.
    pub acknowledge_handshakes: bool,
    /// Drop handshakes and dms whose `sender_id` is not the sending connection's id.
    pub enforce_sender_identity: bool,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            acknowledge_handshakes: true,
            enforce_sender_identity: true,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SecretsBackend {
    #[default]
    File,
    Memory,
    /// Every lookup reports absent; clients re-enroll on every connect.
    None,
}

/// Where per-client one-time-code secrets live.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SecretsConfig {
    pub backend: SecretsBackend,
    /// File backend location. Defaults to `~/.parley/client_secrets.json`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl SecretsConfig {
    pub fn resolved_path(&self) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| crate::loader::data_dir().join("client_secrets.json"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_protocol_constants() {
        let session = SessionConfig::default();
        assert_eq!(session.max_message_size, 512);
        assert_eq!(session.ping_period(), Duration::from_secs(54));
        assert_eq!(session.write_wait(), Duration::from_secs(10));
    }

    #[test]
    fn partial_toml_keeps_other_defaults() {
        let cfg: ParleyConfig = toml::from_str(
            r#"
            [session]
            pong_wait_secs = 20

            [secrets]
            backend = "memory"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.session.pong_wait_secs, 20);
        assert_eq!(cfg.session.ping_period(), Duration::from_secs(18));
        assert_eq!(cfg.session.send_queue_capacity, 256);
        assert_eq!(cfg.secrets.backend, SecretsBackend::Memory);
        assert_eq!(cfg.otp.digits, 6);
        assert!(cfg.hub.acknowledge_handshakes);
    }

    #[test]
    fn zero_timings_are_clamped() {
        let session = SessionConfig {
            pong_wait_secs: 0,
            write_wait_secs: 0,
            ..Default::default()
        };
        assert_eq!(session.pong_wait(), Duration::from_secs(1));
        assert_eq!(session.ping_period(), Duration::from_millis(900));
        assert_eq!(session.write_wait(), Duration::from_secs(1));
    }

    #[test]
    fn explicit_port_wins() {
        let server = ServerConfig {
            port: Some(9000),
            ..Default::default()
        };
        assert_eq!(server.resolved_port(), 9000);
    }
}
