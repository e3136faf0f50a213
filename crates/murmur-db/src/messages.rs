use std::sync::Arc;
use std::time::Duration;

use chrono::{SubsecRound, Utc};

use murmur_types::models::Message;
use murmur_types::{ChatError, ObjectId};

use crate::Database;
use crate::deadline::{self, STORE_DEADLINE, internal};

#[derive(Clone)]
pub struct MessageStore {
    db: Arc<Database>,
    deadline: Duration,
}

impl MessageStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            deadline: STORE_DEADLINE,
        }
    }

    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }

    /// Append a message. The referenced conversation is not checked.
    pub async fn create(&self, message: Message) -> Result<Message, ChatError> {
        if message.conversation_id.is_nil() || message.sender_id.is_nil() {
            return Err(ChatError::BadInput("conversationId and senderId are required".into()));
        }

        deadline::run(&self.db, self.deadline, move |db| {
            let now = Utc::now().trunc_subsecs(6);
            let message = Message {
                id: ObjectId::new(),
                created_at: now,
                updated_at: now,
                ..message
            };

            db.insert_message(&message).map_err(internal)?;
            Ok(message)
        })
        .await
    }
}
