use serde::Serialize;
use serde_json::Value;

use crate::error::ChatError;
use crate::id::ObjectId;
use crate::models::{Conversation, Message, User};

/// Frames sent FROM client TO server over the WebSocket, one variant per
/// `action` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "action")]
pub enum InboundFrame {
    #[serde(rename = "create_conversation", rename_all = "camelCase")]
    CreateConversation {
        sender_id: ObjectId,
        receiver_id: ObjectId,
    },

    #[serde(rename = "get_conversationById")]
    GetConversationById {
        #[serde(rename = "_id")]
        id: ObjectId,
    },

    #[serde(rename = "send_message", rename_all = "camelCase")]
    SendMessage {
        conversation_id: ObjectId,
        sender_id: ObjectId,
        message: String,
    },

    /// Any action the server does not handle. Never produced by clients
    /// through serialization.
    #[serde(skip_serializing)]
    Unknown(String),
}

impl InboundFrame {
    /// Decode a raw text frame. Every field is checked for type before use,
    /// so a wrong-typed field is a `BadInput` rather than a panic.
    pub fn parse(text: &str) -> Result<Self, ChatError> {
        let value: Value = serde_json::from_str(text)
            .map_err(|e| ChatError::BadInput(format!("invalid message format: {}", e)))?;

        let action = value
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| ChatError::BadInput("missing or invalid action field".into()))?;

        match action {
            "create_conversation" => Ok(Self::CreateConversation {
                sender_id: id_field(&value, "senderId")?,
                receiver_id: id_field(&value, "receiverId")?,
            }),
            "get_conversationById" => Ok(Self::GetConversationById {
                id: id_field(&value, "_id")?,
            }),
            "send_message" => Ok(Self::SendMessage {
                conversation_id: id_field(&value, "conversationId")?,
                sender_id: id_field(&value, "senderId")?,
                message: value
                    .get("message")
                    .and_then(Value::as_str)
                    .ok_or_else(|| ChatError::BadInput("invalid message: expected a string".into()))?
                    .to_string(),
            }),
            other => Ok(Self::Unknown(other.to_string())),
        }
    }

    pub fn action(&self) -> &str {
        match self {
            Self::CreateConversation { .. } => "create_conversation",
            Self::GetConversationById { .. } => "get_conversationById",
            Self::SendMessage { .. } => "send_message",
            Self::Unknown(action) => action,
        }
    }
}

fn id_field(value: &Value, field: &str) -> Result<ObjectId, ChatError> {
    let raw = value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| ChatError::BadInput(format!("invalid {}: id is not a string", field)))?;

    ObjectId::parse_str(raw)
        .map_err(|e| ChatError::BadInput(format!("invalid {}: {}", field, e.message())))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Success,
    Error,
}

/// Frames sent FROM server TO the client that originated a request.
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum OutboundFrame {
    /// Reply to `get_conversationById`.
    ConversationDetails {
        conversation: Conversation,
        sender: User,
        receiver: User,
    },

    /// Reply to `create_conversation`.
    ConversationCreated {
        status: Status,
        conversation: Conversation,
    },

    /// Reply to `send_message`.
    MessageSent { status: Status, message: Message },

    Error {
        status: Status,
        kind: String,
        message: String,
    },
}

impl OutboundFrame {
    pub fn conversation_created(conversation: Conversation) -> Self {
        Self::ConversationCreated {
            status: Status::Success,
            conversation,
        }
    }

    pub fn message_sent(message: Message) -> Self {
        Self::MessageSent {
            status: Status::Success,
            message,
        }
    }

    pub fn error(err: &ChatError) -> Self {
        Self::Error {
            status: Status::Error,
            kind: err.kind().to_string(),
            message: err.message().to_string(),
        }
    }

    pub fn to_json(&self) -> Result<String, ChatError> {
        Ok(serde_json::to_string(self)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbb";

    #[test]
    fn create_request_survives_reencoding() {
        let original = serde_json::json!({
            "action": "create_conversation",
            "senderId": A,
            "receiverId": B,
        });

        let frame = InboundFrame::parse(&original.to_string()).unwrap();
        let reencoded = serde_json::to_value(&frame).unwrap();
        assert_eq!(reencoded, original);
    }

    #[test]
    fn get_and_send_frames_decode() {
        let get = InboundFrame::parse(&format!(r#"{{"action":"get_conversationById","_id":"{A}"}}"#)).unwrap();
        assert_eq!(get, InboundFrame::GetConversationById { id: A.parse().unwrap() });

        let send = InboundFrame::parse(&format!(
            r#"{{"action":"send_message","conversationId":"{A}","senderId":"{B}","message":"hi"}}"#
        ))
        .unwrap();
        assert_eq!(
            send,
            InboundFrame::SendMessage {
                conversation_id: A.parse().unwrap(),
                sender_id: B.parse().unwrap(),
                message: "hi".into(),
            }
        );
    }

    #[test]
    fn missing_or_non_string_action_is_bad_input() {
        for text in [r#"{}"#, r#"{"action":7}"#, r#"[1,2]"#] {
            let err = InboundFrame::parse(text).unwrap_err();
            assert_eq!(err, ChatError::BadInput("missing or invalid action field".into()));
        }
        assert!(matches!(InboundFrame::parse("not json"), Err(ChatError::BadInput(_))));
    }

    #[test]
    fn malformed_id_names_the_field() {
        let err = InboundFrame::parse(&format!(
            r#"{{"action":"send_message","conversationId":"zzz","senderId":"{A}","message":"hi"}}"#
        ))
        .unwrap_err();
        match err {
            ChatError::BadInput(msg) => assert!(msg.starts_with("invalid conversationId"), "{msg}"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn non_string_message_is_bad_input() {
        let err = InboundFrame::parse(&format!(
            r#"{{"action":"send_message","conversationId":"{A}","senderId":"{B}","message":42}}"#
        ))
        .unwrap_err();
        assert_eq!(err, ChatError::BadInput("invalid message: expected a string".into()));
    }

    #[test]
    fn unknown_action_is_kept_verbatim() {
        let frame = InboundFrame::parse(r#"{"action":"nope"}"#).unwrap();
        assert_eq!(frame, InboundFrame::Unknown("nope".into()));
        assert_eq!(frame.action(), "nope");
    }

    #[test]
    fn error_frame_shape() {
        let json = OutboundFrame::error(&ChatError::Conflict("Conversation already exists".into()))
            .to_json()
            .unwrap();
        let value: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(
            value,
            serde_json::json!({
                "status": "error",
                "kind": "conflict",
                "message": "Conversation already exists",
            })
        );
    }
}
