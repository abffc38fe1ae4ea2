use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Frames originated by the hub rather than relayed verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerFrame {
    /// One-off provisioning descriptor sent to a newly enrolled client.
    #[serde(rename = "totp dm verification")]
    Enrollment { data: String },
    /// Sent to both parties once a handshake succeeds.
    #[serde(rename = "handshake_accepted")]
    HandshakeAccepted { peer_id: String },
    /// A direct message delivered to its target.
    #[serde(rename = "dm")]
    Direct { sender_id: String, content: String },
}

impl ServerFrame {
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }
}
