//! Wire frames exchanged with chat clients
//!
//! Inbound (client -> server):
//! ```json
//! {"type": "join" | "leave" | "typing" | "typing_stop", "channel_id": 1, "user_name": "..."}
//! ```
//!
//! Outbound (server -> client):
//! ```json
//! {"type": "message", "message": {...}}
//! {"type": "error", "error": "..."}
//! {"type": "message_updated" | "message_deleted" | "reaction" | "typing", "payload": {...}}
//! ```

use bytes::Bytes;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use thiserror::Error;

use super::{ChannelId, UserId};

/// Tags the inbound decoder understands
const KNOWN_CLIENT_TYPES: [&str; 4] = ["join", "leave", "typing", "typing_stop"];

/// Inbound WebSocket frames from client to server
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    Join {
        #[serde(default)]
        channel_id: Option<ChannelId>,
    },
    Leave {
        #[serde(default)]
        channel_id: Option<ChannelId>,
    },
    Typing {
        #[serde(default)]
        channel_id: Option<ChannelId>,
        #[serde(default)]
        user_name: Option<String>,
    },
    TypingStop {
        #[serde(default)]
        channel_id: Option<ChannelId>,
        #[serde(default)]
        user_name: Option<String>,
    },
}

/// Decode failures, reported back to the offending client only
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("invalid json")]
    InvalidJson,

    #[error("unknown type: {0}")]
    UnknownType(String),
}

impl ClientFrame {
    /// Decode one inbound frame.
    ///
    /// A well-formed JSON object whose `type` is not one of the known tags
    /// fails closed with [`FrameError::UnknownType`]; anything that is not
    /// JSON, or a known tag with mistyped fields, is [`FrameError::InvalidJson`].
    pub fn decode(raw: &[u8]) -> Result<Self, FrameError> {
        let value: Value = serde_json::from_slice(raw).map_err(|_| FrameError::InvalidJson)?;
        if !value.is_object() {
            return Err(FrameError::InvalidJson);
        }

        let kind = match value.get("type") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(FrameError::InvalidJson),
        };

        if !KNOWN_CLIENT_TYPES.contains(&kind.as_str()) {
            return Err(FrameError::UnknownType(kind));
        }

        Self::deserialize(value).map_err(|_| FrameError::InvalidJson)
    }

    /// Target channel, `None` when absent or zero
    pub fn channel_id(&self) -> Option<ChannelId> {
        let raw = match self {
            Self::Join { channel_id }
            | Self::Leave { channel_id }
            | Self::Typing { channel_id, .. }
            | Self::TypingStop { channel_id, .. } => *channel_id,
        };
        raw.filter(|id| *id != 0)
    }
}

/// Server event names carried in the generic `{type, payload}` envelope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    MessageUpdated,
    MessageDeleted,
    Reaction,
    Typing,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MessageUpdated => "message_updated",
            Self::MessageDeleted => "message_deleted",
            Self::Reaction => "reaction",
            Self::Typing => "typing",
        }
    }
}

/// Outbound WebSocket frames from server to client
#[derive(Debug, Clone, Copy)]
pub enum ServerFrame<'a> {
    /// A newly created chat message
    Message(&'a Value),
    /// Protocol or validation error for this client only
    Error(&'a str),
    /// Update, deletion, reaction or typing relay; payload omitted when `None`
    Event {
        kind: EventKind,
        payload: Option<&'a Value>,
    },
}

impl Serialize for ServerFrame<'_> {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(2))?;
        match self {
            Self::Message(message) => {
                map.serialize_entry("type", "message")?;
                map.serialize_entry("message", message)?;
            }
            Self::Error(error) => {
                map.serialize_entry("type", "error")?;
                map.serialize_entry("error", error)?;
            }
            Self::Event { kind, payload } => {
                map.serialize_entry("type", kind.as_str())?;
                if let Some(payload) = payload {
                    map.serialize_entry("payload", payload)?;
                }
            }
        }
        map.end()
    }
}

impl ServerFrame<'_> {
    /// Serialize into a mailbox payload
    pub fn encode(&self) -> Bytes {
        match serde_json::to_vec(self) {
            Ok(buf) => Bytes::from(buf),
            Err(e) => {
                tracing::error!(error = %e, "failed to encode server frame");
                Bytes::from_static(br#"{"type":"error","error":"internal error"}"#)
            }
        }
    }
}

/// Body of a `typing` event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypingPayload {
    pub user_id: UserId,
    pub user_name: String,
    pub typing: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn as_json(bytes: &Bytes) -> Value {
        serde_json::from_slice(bytes).expect("frame is json")
    }

    #[test]
    fn test_decode_join_and_leave() {
        let join = ClientFrame::decode(br#"{"type":"join","channel_id":7}"#).unwrap();
        assert_eq!(join, ClientFrame::Join { channel_id: Some(7) });
        assert_eq!(join.channel_id(), Some(7));

        let leave = ClientFrame::decode(br#"{"type":"leave","channel_id":7,"user_name":"x"}"#)
            .unwrap();
        assert_eq!(leave.channel_id(), Some(7));
    }

    #[test]
    fn test_decode_typing_keeps_user_name() {
        let frame =
            ClientFrame::decode(br#"{"type":"typing_stop","channel_id":3,"user_name":"Aiko"}"#)
                .unwrap();
        assert_eq!(
            frame,
            ClientFrame::TypingStop {
                channel_id: Some(3),
                user_name: Some("Aiko".into())
            }
        );
    }

    #[test]
    fn test_missing_or_zero_channel_has_no_channel() {
        let missing = ClientFrame::decode(br#"{"type":"join"}"#).unwrap();
        assert_eq!(missing.channel_id(), None);

        let zero = ClientFrame::decode(br#"{"type":"typing","channel_id":0}"#).unwrap();
        assert_eq!(zero.channel_id(), None);

        let null = ClientFrame::decode(br#"{"type":"leave","channel_id":null}"#).unwrap();
        assert_eq!(null.channel_id(), None);
    }

    #[test]
    fn test_unknown_type_fails_closed() {
        assert_eq!(
            ClientFrame::decode(br#"{"type":"subscribe","channel_id":1}"#),
            Err(FrameError::UnknownType("subscribe".into()))
        );
        assert_eq!(
            ClientFrame::decode(br#"{"channel_id":1}"#),
            Err(FrameError::UnknownType(String::new()))
        );
    }

    #[test]
    fn test_malformed_input_is_invalid_json() {
        assert_eq!(ClientFrame::decode(b"{not json"), Err(FrameError::InvalidJson));
        assert_eq!(ClientFrame::decode(b"[1,2]"), Err(FrameError::InvalidJson));
        assert_eq!(
            ClientFrame::decode(br#"{"type":"join","channel_id":"seven"}"#),
            Err(FrameError::InvalidJson)
        );
        assert_eq!(
            ClientFrame::decode(br#"{"type":"join","channel_id":-1}"#),
            Err(FrameError::InvalidJson)
        );
    }

    #[test]
    fn test_error_text_matches_wire_contract() {
        assert_eq!(FrameError::InvalidJson.to_string(), "invalid json");
        assert_eq!(
            FrameError::UnknownType("ping".into()).to_string(),
            "unknown type: ping"
        );
    }

    #[test]
    fn test_encode_message_envelope() {
        let msg = json!({"id": 10, "content": "hello"});
        let encoded = ServerFrame::Message(&msg).encode();
        assert_eq!(
            as_json(&encoded),
            json!({"type": "message", "message": {"id": 10, "content": "hello"}})
        );
    }

    #[test]
    fn test_encode_error_envelope() {
        let encoded = ServerFrame::Error("channel_id required").encode();
        assert_eq!(
            as_json(&encoded),
            json!({"type": "error", "error": "channel_id required"})
        );
    }

    #[test]
    fn test_encode_event_with_and_without_payload() {
        let payload = json!({"message_id": 4, "channel_id": 2});
        let with = ServerFrame::Event {
            kind: EventKind::MessageDeleted,
            payload: Some(&payload),
        }
        .encode();
        assert_eq!(
            as_json(&with),
            json!({"type": "message_deleted", "payload": {"message_id": 4, "channel_id": 2}})
        );

        let without = ServerFrame::Event {
            kind: EventKind::Reaction,
            payload: None,
        }
        .encode();
        assert_eq!(as_json(&without), json!({"type": "reaction"}));
    }
}
