use serde::{Deserialize, Deserializer, Serialize};

use crate::ProtocolError;

/// Message type tag. Unrecognized tags decode as [`MessageKind::Unknown`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageKind {
    HandshakeAttempt,
    Dm,
    Broadcast,
    #[default]
    #[serde(other)]
    Unknown,
}

/// A structured inbound frame.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    #[serde(rename = "type", default, deserialize_with = "null_as_default")]
    pub kind: MessageKind,
    #[serde(default, deserialize_with = "null_as_default")]
    pub sender_id: String,
    /// Only needed for dm or handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// The one-time code presented in a handshake.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<String>,
}

/// What the hub should do with a decoded [`Message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route<'a> {
    Handshake {
        sender_id: &'a str,
        target_id: &'a str,
        code: &'a str,
    },
    Direct {
        sender_id: &'a str,
        target_id: &'a str,
        content: &'a str,
    },
    /// Fan the raw payload out to every live session.
    Broadcast,
    /// A handshake or dm missing a field it requires.
    Incomplete(MessageKind),
}

/// `null` decodes like an absent field.
fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn non_empty(field: Option<&String>) -> Option<&str> {
    field.map(String::as_str).filter(|s| !s.is_empty())
}

impl Message {
    /// Decode a raw text payload. Unknown fields are ignored.
    pub fn decode(raw: &str) -> Result<Self, ProtocolError> {
        serde_json::from_str(raw).map_err(ProtocolError::Decode)
    }

    pub fn handshake(sender_id: &str, target_id: &str, code: &str) -> Self {
        Self {
            kind: MessageKind::HandshakeAttempt,
            sender_id: sender_id.into(),
            target_id: Some(target_id.into()),
            code: Some(code.into()),
            ..Default::default()
        }
    }

    pub fn dm(sender_id: &str, target_id: &str, content: &str) -> Self {
        Self {
            kind: MessageKind::Dm,
            sender_id: sender_id.into(),
            target_id: Some(target_id.into()),
            content: Some(content.into()),
            ..Default::default()
        }
    }

    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(ProtocolError::Encode)
    }

    pub fn route(&self) -> Route<'_> {
        match self.kind {
            MessageKind::HandshakeAttempt => {
                match (non_empty(self.target_id.as_ref()), non_empty(self.code.as_ref())) {
                    (Some(target_id), Some(code)) => Route::Handshake {
                        sender_id: &self.sender_id,
                        target_id,
                        code,
                    },
                    _ => Route::Incomplete(self.kind),
                }
            },
            MessageKind::Dm => match (non_empty(self.target_id.as_ref()), &self.content) {
                (Some(target_id), Some(content)) => Route::Direct {
                    sender_id: &self.sender_id,
                    target_id,
                    content,
                },
                _ => Route::Incomplete(self.kind),
            },
            MessageKind::Broadcast | MessageKind::Unknown => Route::Broadcast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_type_and_sender_fall_back_to_defaults() {
        let msg =
            Message::decode(r#"{"type":null,"sender_id":null,"content":"hi","code":null}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Unknown);
        assert_eq!(msg.sender_id, "");
        assert_eq!(msg.code, None);
        assert_eq!(msg.route(), Route::Broadcast);
    }

    #[test]
    fn null_sender_on_dm_still_routes() {
        let msg = Message::decode(
            r#"{"type":"dm","sender_id":null,"target_id":"bob","content":"hi"}"#,
        )
        .unwrap();
        assert_eq!(msg.route(), Route::Direct {
            sender_id: "",
            target_id: "bob",
            content: "hi",
        });
    }

    #[test]
    fn decodes_handshake_attempt() {
        let msg = Message::decode(
            r#"{"type":"handshake_attempt","sender_id":"alice","target_id":"bob","code":"123456"}"#,
        )
        .unwrap();
        assert_eq!(msg.route(), Route::Handshake {
            sender_id: "alice",
            target_id: "bob",
            code: "123456",
        });
    }

    #[test]
    fn unknown_type_routes_as_broadcast() {
        let msg = Message::decode(r#"{"type":"typing","sender_id":"alice"}"#).unwrap();
        assert_eq!(msg.kind, MessageKind::Unknown);
        assert_eq!(msg.route(), Route::Broadcast);
    }

    #[test]
    fn missing_type_routes_as_broadcast() {
        let msg = Message::decode(r#"{"sender_id":"alice","content":"hey"}"#).unwrap();
        assert_eq!(msg.route(), Route::Broadcast);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let msg =
            Message::decode(r#"{"type":"dm","sender_id":"a","target_id":"b","content":"x","ttl":3}"#)
                .unwrap();
        assert_eq!(msg.route(), Route::Direct {
            sender_id: "a",
            target_id: "b",
            content: "x",
        });
    }

    #[test]
    fn handshake_without_code_is_incomplete() {
        let msg =
            Message::decode(r#"{"type":"handshake_attempt","sender_id":"a","target_id":"b"}"#)
                .unwrap();
        assert_eq!(msg.route(), Route::Incomplete(MessageKind::HandshakeAttempt));
    }

    #[test]
    fn dm_with_empty_target_is_incomplete() {
        let msg = Message::dm("a", "", "hello");
        assert_eq!(msg.route(), Route::Incomplete(MessageKind::Dm));
    }

    #[test]
    fn malformed_json_is_a_decode_error() {
        let err = Message::decode("not json").unwrap_err();
        assert!(matches!(err, ProtocolError::Decode(_)));
    }

    #[test]
    fn encode_omits_absent_fields() {
        let json = Message::dm("alice", "bob", "hi").encode().unwrap();
        assert_eq!(
            json,
            r#"{"type":"dm","sender_id":"alice","target_id":"bob","content":"hi"}"#
        );
    }
}
