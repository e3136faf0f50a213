use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::id::ObjectId;

/// A registered account. The password hash and pending one-time code never
/// leave the server.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub email: String,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password: String,
    pub verified_email: bool,
    #[serde(skip_serializing, default)]
    pub otp_token: Option<String>,
    #[serde(skip_serializing, default)]
    pub otp_expires_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A durable link between two users. The pair is ordered: (A, B) and (B, A)
/// are distinct conversations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub sender_id: ObjectId,
    pub receiver_id: ObjectId,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Conversation {
    /// An unsaved conversation with only the participants filled in.
    pub fn between(sender_id: ObjectId, receiver_id: ObjectId) -> Self {
        Self {
            id: ObjectId::NIL,
            sender_id,
            receiver_id,
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    #[serde(rename = "_id")]
    pub id: ObjectId,
    pub conversation_id: ObjectId,
    pub sender_id: ObjectId,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// An unsaved message; the store assigns the id and timestamps.
    pub fn draft(conversation_id: ObjectId, sender_id: ObjectId, message: impl Into<String>) -> Self {
        Self {
            id: ObjectId::NIL,
            conversation_id,
            sender_id,
            message: message.into(),
            created_at: DateTime::<Utc>::default(),
            updated_at: DateTime::<Utc>::default(),
        }
    }
}
