//! WebSocket Protocol Types
//!
//! Typed envelopes for client-server communication. Every frame on the
//! wire is a JSON object with a `type` tag, an optional `data` payload,
//! a `timestamp`, and (on delivery/ack frames) a `messageId`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use chat_gateway_auth::UserId;

/// Per-process identifier for a single WebSocket connection.
pub type ConnectionId = uuid::Uuid;

/// Frames sent FROM the client TO the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientFrame {
    /// First frame of the handshake: a bearer token to bind this
    /// connection to a user.
    Auth(AuthPayload),

    /// A chat message to route. Only accepted after authentication.
    Chat(ChatPayload),

    /// Client-initiated liveness check. Answered with
    /// `heartbeat_response` and counts as read activity.
    Heartbeat,
}

/// Inbound envelope: the tagged frame plus optional metadata the
/// client may attach. Client timestamps are informational only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientEnvelope {
    #[serde(flatten)]
    pub frame: ClientFrame,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(
        default,
        rename = "messageId",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthPayload {
    pub token: String,
}

/// Whether a chat message targets a single user or a group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChatKind {
    Private,
    Group,
}

/// Client chat payload. `targetId` is a user id for PRIVATE and a
/// group id for GROUP. `chatId` and `messageType` are numeric platform
/// ids, passed through untouched. The sender identity is never taken
/// from here; it is bound server-side from the authenticated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatPayload {
    pub content: String,
    pub target_id: i64,
    pub chat_type: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<i64>,
}

/// Frames sent FROM the server TO the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerFrame {
    /// Handshake accepted; the connection is now bound to `userId`.
    AuthSuccess(AuthSuccessPayload),

    /// A routed chat message, identical for every recipient connection.
    ChatMessage(ChatDelivery),

    /// Server-initiated liveness probe. Any inbound frame counts as
    /// the answer.
    Heartbeat,

    /// Reply to a client `heartbeat`.
    HeartbeatResponse,

    /// Recoverable failure report. The connection stays open unless
    /// the error was fatal to the session.
    Error(ErrorPayload),

    /// Ack to the sender: the message was accepted for delivery.
    /// Not a receipt; delivery is at-most-once.
    MessageSent(MessageSentPayload),
}

/// Outbound envelope: tagged frame plus server-assigned metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerEnvelope {
    #[serde(flatten)]
    pub frame: ServerFrame,
    pub timestamp: DateTime<Utc>,
    #[serde(
        default,
        rename = "messageId",
        skip_serializing_if = "Option::is_none"
    )]
    pub message_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSuccessPayload {
    pub user_id: UserId,
}

/// Server-side chat message as delivered to recipients. Unlike
/// [`ChatPayload`] this carries the bound sender identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatDelivery {
    pub from_user_id: UserId,
    pub content: String,
    pub target_id: i64,
    pub chat_type: ChatKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_type: Option<i64>,
}

impl ChatDelivery {
    /// Binds `from` as the sender of a validated client payload.
    pub fn bind(from: UserId, payload: ChatPayload) -> Self {
        Self {
            from_user_id: from,
            content: payload.content,
            target_id: payload.target_id,
            chat_type: payload.chat_type,
            chat_id: payload.chat_id,
            message_type: payload.message_type,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSentPayload {
    pub message_id: String,
    pub target_id: i64,
}

impl ServerEnvelope {
    pub fn new(frame: ServerFrame) -> Self {
        Self {
            frame,
            timestamp: Utc::now(),
            message_id: None,
        }
    }

    pub fn auth_success(user_id: UserId) -> Self {
        Self::new(ServerFrame::AuthSuccess(AuthSuccessPayload { user_id }))
    }

    pub fn heartbeat_probe() -> Self {
        Self::new(ServerFrame::Heartbeat)
    }

    pub fn heartbeat_response() -> Self {
        Self::new(ServerFrame::HeartbeatResponse)
    }

    pub fn error(code: &str, message: impl Into<String>) -> Self {
        Self::new(ServerFrame::Error(ErrorPayload {
            code: code.to_string(),
            message: message.into(),
        }))
    }

    /// Delivery envelope shared by every recipient of one message.
    pub fn chat_message(delivery: ChatDelivery, message_id: String) -> Self {
        Self {
            frame: ServerFrame::ChatMessage(delivery),
            timestamp: Utc::now(),
            message_id: Some(message_id),
        }
    }

    /// Ack for the originating connection only.
    pub fn message_sent(message_id: &str, target_id: i64) -> Self {
        Self {
            frame: ServerFrame::MessageSent(MessageSentPayload {
                message_id: message_id.to_string(),
                target_id,
            }),
            timestamp: Utc::now(),
            message_id: Some(message_id.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_frame_deserializes() {
        let json = r#"{"type":"auth","data":{"token":"abc.def.ghi"}}"#;
        let envelope: ClientEnvelope = serde_json::from_str(json).unwrap();
        match envelope.frame {
            ClientFrame::Auth(payload) => assert_eq!(payload.token, "abc.def.ghi"),
            other => panic!("Expected Auth, got {other:?}"),
        }
        assert!(envelope.timestamp.is_none());
    }

    #[test]
    fn heartbeat_frame_deserializes_without_data() {
        let json = r#"{"type":"heartbeat"}"#;
        let envelope: ClientEnvelope = serde_json::from_str(json).unwrap();
        assert_eq!(envelope.frame, ClientFrame::Heartbeat);
    }

    #[test]
    fn chat_frame_uses_camel_case_and_uppercase_kind() {
        let json = r#"{
            "type": "chat",
            "data": {
                "content": "hello",
                "targetId": 7,
                "chatType": "PRIVATE",
                "chatId": 5,
                "messageType": 1
            },
            "timestamp": "2026-08-30T12:00:00Z"
        }"#;
        let envelope: ClientEnvelope = serde_json::from_str(json).unwrap();
        match envelope.frame {
            ClientFrame::Chat(payload) => {
                assert_eq!(payload.content, "hello");
                assert_eq!(payload.target_id, 7);
                assert_eq!(payload.chat_type, ChatKind::Private);
                assert_eq!(payload.chat_id, Some(5));
                assert_eq!(payload.message_type, Some(1));
            }
            other => panic!("Expected Chat, got {other:?}"),
        }
        assert!(envelope.timestamp.is_some());
    }

    #[test]
    fn chat_frame_optional_fields_default() {
        let json = r#"{"type":"chat","data":{"content":"hi","targetId":3,"chatType":"GROUP"}}"#;
        let envelope: ClientEnvelope = serde_json::from_str(json).unwrap();
        match envelope.frame {
            ClientFrame::Chat(payload) => {
                assert_eq!(payload.chat_type, ChatKind::Group);
                assert!(payload.chat_id.is_none());
                assert!(payload.message_type.is_none());
            }
            other => panic!("Expected Chat, got {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_rejected() {
        let json = r#"{"type":"shout","data":{}}"#;
        assert!(serde_json::from_str::<ClientEnvelope>(json).is_err());
    }

    #[test]
    fn lowercase_chat_kind_is_rejected() {
        let json = r#"{"type":"chat","data":{"content":"x","targetId":1,"chatType":"private"}}"#;
        assert!(serde_json::from_str::<ClientEnvelope>(json).is_err());
    }

    #[test]
    fn auth_success_wire_shape() {
        let envelope = ServerEnvelope::auth_success(42);
        let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "auth_success");
        assert_eq!(value["data"]["userId"], 42);
        assert!(value["timestamp"].is_string());
        assert!(value.get("messageId").is_none());
    }

    #[test]
    fn chat_message_wire_shape() {
        let delivery = ChatDelivery {
            from_user_id: 1,
            content: "hey".to_string(),
            target_id: 2,
            chat_type: ChatKind::Private,
            chat_id: None,
            message_type: None,
        };
        let envelope = ServerEnvelope::chat_message(delivery, "m-123".to_string());
        let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "chat_message");
        assert_eq!(value["data"]["fromUserId"], 1);
        assert_eq!(value["data"]["targetId"], 2);
        assert_eq!(value["data"]["chatType"], "PRIVATE");
        assert_eq!(value["messageId"], "m-123");
        // Unset optionals stay off the wire entirely.
        assert!(value["data"].get("chatId").is_none());
    }

    #[test]
    fn probe_and_response_are_distinct_types() {
        let probe: serde_json::Value =
            serde_json::to_value(ServerEnvelope::heartbeat_probe()).unwrap();
        let response: serde_json::Value =
            serde_json::to_value(ServerEnvelope::heartbeat_response()).unwrap();
        assert_eq!(probe["type"], "heartbeat");
        assert_eq!(response["type"], "heartbeat_response");
    }

    #[test]
    fn message_sent_carries_id_twice() {
        let envelope = ServerEnvelope::message_sent("m-9", 5);
        let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["type"], "message_sent");
        assert_eq!(value["data"]["messageId"], "m-9");
        assert_eq!(value["data"]["targetId"], 5);
        assert_eq!(value["messageId"], "m-9");
    }

    #[test]
    fn server_envelope_round_trips() {
        let envelope = ServerEnvelope::error("validation_error", "empty content");
        let json = serde_json::to_string(&envelope).unwrap();
        let back: ServerEnvelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, envelope);
    }

    #[test]
    fn bind_discards_nothing_and_adds_sender() {
        let payload = ChatPayload {
            content: "yo".to_string(),
            target_id: 9,
            chat_type: ChatKind::Group,
            chat_id: Some(11),
            message_type: Some(1),
        };
        let delivery = ChatDelivery::bind(4, payload);
        assert_eq!(delivery.from_user_id, 4);
        assert_eq!(delivery.target_id, 9);
        assert_eq!(delivery.chat_id, Some(11));
        assert_eq!(delivery.message_type, Some(1));
    }

    #[test]
    fn delivery_keeps_numeric_chat_ids_on_the_wire() {
        let delivery = ChatDelivery {
            from_user_id: 4,
            content: "yo".to_string(),
            target_id: 9,
            chat_type: ChatKind::Group,
            chat_id: Some(11),
            message_type: Some(1),
        };
        let envelope = ServerEnvelope::chat_message(delivery, "m-4".to_string());
        let value: serde_json::Value = serde_json::to_value(&envelope).unwrap();
        assert_eq!(value["data"]["chatId"], 11);
        assert_eq!(value["data"]["messageType"], 1);
    }
}
