//! Database row types. These map directly to SQLite rows.
//! Distinct from murmur-types models to keep the DB layer independent.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

use murmur_types::ObjectId;
use murmur_types::models::{Conversation, Message, User};

pub struct UserRow {
    pub id: String,
    pub email: String,
    pub username: String,
    pub password: String,
    pub verified_email: bool,
    pub otp_token: Option<String>,
    pub otp_expires_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

pub struct ConversationRow {
    pub id: String,
    pub sender_id: String,
    pub receiver_id: String,
    pub created_at: String,
    pub updated_at: String,
}

pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub sender_id: String,
    pub message: String,
    pub created_at: String,
    pub updated_at: String,
}

/// Timestamps are stored as RFC 3339 with microsecond precision.
pub fn encode_ts(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn decode_ts(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Corrupt timestamp '{}'", raw))?;
    Ok(parsed.with_timezone(&Utc))
}

fn decode_id(raw: &str) -> Result<ObjectId> {
    ObjectId::parse_str(raw).map_err(|e| anyhow::anyhow!("Corrupt id '{}': {}", raw, e))
}

impl TryFrom<UserRow> for User {
    type Error = anyhow::Error;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(User {
            id: decode_id(&row.id)?,
            email: row.email,
            username: row.username,
            password: row.password,
            verified_email: row.verified_email,
            otp_token: row.otp_token,
            otp_expires_at: row.otp_expires_at.as_deref().map(decode_ts).transpose()?,
            created_at: decode_ts(&row.created_at)?,
            updated_at: decode_ts(&row.updated_at)?,
        })
    }
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = anyhow::Error;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            id: decode_id(&row.id)?,
            sender_id: decode_id(&row.sender_id)?,
            receiver_id: decode_id(&row.receiver_id)?,
            created_at: decode_ts(&row.created_at)?,
            updated_at: decode_ts(&row.updated_at)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = anyhow::Error;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            id: decode_id(&row.id)?,
            conversation_id: decode_id(&row.conversation_id)?,
            sender_id: decode_id(&row.sender_id)?,
            message: row.message,
            created_at: decode_ts(&row.created_at)?,
            updated_at: decode_ts(&row.updated_at)?,
        })
    }
}
