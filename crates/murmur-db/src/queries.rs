use crate::Database;
use crate::models::{ConversationRow, MessageRow, UserRow, encode_ts};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, Row};

use murmur_types::ObjectId;
use murmur_types::models::{Conversation, Message, User};

const USER_COLUMNS: &str =
    "id, email, username, password, verified_email, otp_token, otp_expires_at, created_at, updated_at";
const CONVERSATION_COLUMNS: &str = "id, sender_id, receiver_id, created_at, updated_at";

impl Database {
    // -- Users --

    pub fn insert_user(&self, user: &User) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO user (id, email, username, password, verified_email, otp_token, otp_expires_at, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                rusqlite::params![
                    user.id.to_hex(),
                    user.email,
                    user.username,
                    user.password,
                    user.verified_email,
                    user.otp_token,
                    user.otp_expires_at.as_ref().map(encode_ts),
                    encode_ts(&user.created_at),
                    encode_ts(&user.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_user_by_id(&self, id: &ObjectId) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM user WHERE id = ?1", USER_COLUMNS);
            let row = conn.query_row(&sql, [id.to_hex()], map_user).optional()?;
            row.map(User::try_from).transpose()
        })
    }

    pub fn find_user_by_email(&self, email: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM user WHERE email = ?1", USER_COLUMNS);
            let row = conn.query_row(&sql, [email], map_user).optional()?;
            row.map(User::try_from).transpose()
        })
    }

    pub fn find_user_by_email_or_username(&self, email: &str, username: &str) -> Result<Option<User>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM user WHERE email = ?1 OR username = ?2 LIMIT 1",
                USER_COLUMNS
            );
            let row = conn.query_row(&sql, [email, username], map_user).optional()?;
            row.map(User::try_from).transpose()
        })
    }

    /// Count how many of `ids` have a user record. Duplicates count once.
    pub fn count_users_with_ids(&self, ids: &[ObjectId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=ids.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT COUNT(*) FROM user WHERE id IN ({})",
                placeholders.join(", ")
            );

            let hex_ids: Vec<String> = ids.iter().map(ObjectId::to_hex).collect();
            let params: Vec<&dyn rusqlite::types::ToSql> = hex_ids
                .iter()
                .map(|id| id as &dyn rusqlite::types::ToSql)
                .collect();

            let count: i64 = conn.query_row(&sql, params.as_slice(), |row| row.get(0))?;
            Ok(count as u64)
        })
    }

    /// Store a fresh one-time code digest and its expiry. Returns false when
    /// no user has that email.
    pub fn set_user_otp(&self, email: &str, otp_digest: &str, expires_at: &DateTime<Utc>) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE user SET otp_token = ?1, otp_expires_at = ?2, updated_at = ?3 WHERE email = ?4",
                rusqlite::params![otp_digest, encode_ts(expires_at), encode_ts(&Utc::now()), email],
            )?;
            Ok(changed > 0)
        })
    }

    /// Flag the email as verified and clear the pending code.
    pub fn mark_email_verified(&self, email: &str) -> Result<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute(
                "UPDATE user SET verified_email = 1, otp_token = NULL, otp_expires_at = NULL, updated_at = ?1
                 WHERE email = ?2",
                rusqlite::params![encode_ts(&Utc::now()), email],
            )?;
            Ok(changed > 0)
        })
    }

    // -- Conversations --

    pub fn insert_conversation(&self, conversation: &Conversation) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO conversation (id, sender_id, receiver_id, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                rusqlite::params![
                    conversation.id.to_hex(),
                    conversation.sender_id.to_hex(),
                    conversation.receiver_id.to_hex(),
                    encode_ts(&conversation.created_at),
                    encode_ts(&conversation.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_conversation_by_id(&self, id: &ObjectId) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!("SELECT {} FROM conversation WHERE id = ?1", CONVERSATION_COLUMNS);
            let row = conn.query_row(&sql, [id.to_hex()], map_conversation).optional()?;
            row.map(Conversation::try_from).transpose()
        })
    }

    pub fn find_conversation_by_pair(
        &self,
        sender_id: &ObjectId,
        receiver_id: &ObjectId,
    ) -> Result<Option<Conversation>> {
        self.with_conn(|conn| {
            let sql = format!(
                "SELECT {} FROM conversation WHERE sender_id = ?1 AND receiver_id = ?2",
                CONVERSATION_COLUMNS
            );
            let row = conn
                .query_row(&sql, [sender_id.to_hex(), receiver_id.to_hex()], map_conversation)
                .optional()?;
            row.map(Conversation::try_from).transpose()
        })
    }

    pub fn count_conversations(&self) -> Result<u64> {
        self.with_conn(|conn| count(conn, "conversation"))
    }

    // -- Messages --

    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO message (id, conversation_id, sender_id, message, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    message.id.to_hex(),
                    message.conversation_id.to_hex(),
                    message.sender_id.to_hex(),
                    message.message,
                    encode_ts(&message.created_at),
                    encode_ts(&message.updated_at),
                ],
            )?;
            Ok(())
        })
    }

    pub fn find_message_by_id(&self, id: &ObjectId) -> Result<Option<Message>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, conversation_id, sender_id, message, created_at, updated_at
                     FROM message WHERE id = ?1",
                    [id.to_hex()],
                    |row| {
                        Ok(MessageRow {
                            id: row.get(0)?,
                            conversation_id: row.get(1)?,
                            sender_id: row.get(2)?,
                            message: row.get(3)?,
                            created_at: row.get(4)?,
                            updated_at: row.get(5)?,
                        })
                    },
                )
                .optional()?;
            row.map(Message::try_from).transpose()
        })
    }

    pub fn count_messages(&self) -> Result<u64> {
        self.with_conn(|conn| count(conn, "message"))
    }
}

/// True when the error is a SQLite constraint violation (UNIQUE, NOT NULL, ...).
pub fn is_constraint_violation(err: &anyhow::Error) -> bool {
    err.downcast_ref::<rusqlite::Error>()
        .and_then(rusqlite::Error::sqlite_error_code)
        == Some(ErrorCode::ConstraintViolation)
}

fn count(conn: &Connection, table: &str) -> Result<u64> {
    let n: i64 = conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| row.get(0))?;
    Ok(n as u64)
}

fn map_user(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        email: row.get(1)?,
        username: row.get(2)?,
        password: row.get(3)?,
        verified_email: row.get(4)?,
        otp_token: row.get(5)?,
        otp_expires_at: row.get(6)?,
        created_at: row.get(7)?,
        updated_at: row.get(8)?,
    })
}

fn map_conversation(row: &Row<'_>) -> rusqlite::Result<ConversationRow> {
    Ok(ConversationRow {
        id: row.get(0)?,
        sender_id: row.get(1)?,
        receiver_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
