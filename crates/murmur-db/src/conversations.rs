use std::sync::Arc;
use std::time::Duration;

use chrono::{SubsecRound, Utc};
use thiserror::Error;

use murmur_types::models::{Conversation, User};
use murmur_types::{ChatError, ObjectId};

use crate::Database;
use crate::deadline::{self, STORE_DEADLINE, internal};
use crate::queries::is_constraint_violation;

/// A conversation with both participants loaded.
#[derive(Debug, Clone)]
pub struct ConversationWithUsers {
    pub conversation: Conversation,
    pub sender: User,
    pub receiver: User,
}

/// Whatever was loaded before a participant lookup failed.
#[derive(Debug, Clone)]
pub struct PartialConversation {
    pub conversation: Conversation,
    pub sender: Option<User>,
}

/// Failure from [`ConversationStore::get_with_users`]. `partial` is set when
/// the conversation itself was found but a participant was not.
#[derive(Debug, Error)]
#[error("{error}")]
pub struct LookupError {
    pub error: ChatError,
    pub partial: Option<PartialConversation>,
}

impl From<ChatError> for LookupError {
    fn from(error: ChatError) -> Self {
        Self { error, partial: None }
    }
}

#[derive(Clone)]
pub struct ConversationStore {
    db: Arc<Database>,
    deadline: Duration,
}

impl ConversationStore {
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

    /// Insert a conversation between two existing users. Only `sender_id` and
    /// `receiver_id` are read from `conversation`; id and timestamps are
    /// assigned here.
    pub async fn create(&self, conversation: Conversation) -> Result<Conversation, ChatError> {
        if conversation.sender_id.is_nil() || conversation.receiver_id.is_nil() {
            return Err(ChatError::BadInput("senderId and receiverId are required".into()));
        }

        deadline::run(&self.db, self.deadline, move |db| {
            let sender_id = conversation.sender_id;
            let receiver_id = conversation.receiver_id;

            let found = db
                .count_users_with_ids(&[sender_id, receiver_id])
                .map_err(internal)?;
            if found < 2 {
                return Err(ChatError::BadRequest("One or both users do not exist".into()));
            }

            if db
                .find_conversation_by_pair(&sender_id, &receiver_id)
                .map_err(internal)?
                .is_some()
            {
                return Err(ChatError::Conflict("Conversation already exists".into()));
            }

            let now = Utc::now().trunc_subsecs(6);
            let conversation = Conversation {
                id: ObjectId::new(),
                sender_id,
                receiver_id,
                created_at: now,
                updated_at: now,
            };

            // The unique index catches a concurrent create that slipped past the lookup.
            db.insert_conversation(&conversation).map_err(|e| {
                if is_constraint_violation(&e) {
                    ChatError::Conflict("Conversation already exists".into())
                } else {
                    internal(e)
                }
            })?;

            Ok(conversation)
        })
        .await
    }

    /// Load a conversation and both participants.
    pub async fn get_with_users(&self, id: ObjectId) -> Result<ConversationWithUsers, LookupError> {
        deadline::run(&self.db, self.deadline, move |db| {
            let conversation = db
                .find_conversation_by_id(&id)
                .map_err(internal)?
                .ok_or_else(|| ChatError::NotFound(format!("conversation {} not found", id)))?;

            let sender = match load_user(db, &conversation.sender_id, "sender") {
                Ok(user) => user,
                Err(error) => {
                    return Err(LookupError {
                        error,
                        partial: Some(PartialConversation {
                            conversation,
                            sender: None,
                        }),
                    });
                }
            };

            let receiver = match load_user(db, &conversation.receiver_id, "receiver") {
                Ok(user) => user,
                Err(error) => {
                    return Err(LookupError {
                        error,
                        partial: Some(PartialConversation {
                            conversation,
                            sender: Some(sender),
                        }),
                    });
                }
            };

            Ok(ConversationWithUsers {
                conversation,
                sender,
                receiver,
            })
        })
        .await
    }
}

fn load_user(db: &Database, id: &ObjectId, role: &str) -> Result<User, ChatError> {
    db.find_user_by_id(id)
        .map_err(internal)?
        .ok_or_else(|| ChatError::NotFound(format!("{} {} not found", role, id)))
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: &str = "aaaaaaaaaaaaaaaaaaaaaaaa";
    const B: &str = "bbbbbbbbbbbbbbbbbbbbbbbb";

    fn user(id: &str, name: &str) -> User {
        let now = Utc::now().trunc_subsecs(6);
        User {
            id: id.parse().unwrap(),
            email: format!("{name}@example.com"),
            username: name.to_string(),
            password: "hash".into(),
            verified_email: true,
            otp_token: None,
            otp_expires_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn seeded() -> (Arc<Database>, ConversationStore) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.insert_user(&user(A, "alice")).unwrap();
        db.insert_user(&user(B, "bob")).unwrap();
        let store = ConversationStore::new(db.clone());
        (db, store)
    }

    fn pair() -> Conversation {
        Conversation::between(A.parse().unwrap(), B.parse().unwrap())
    }

    #[tokio::test]
    async fn create_sets_id_and_equal_timestamps() {
        let (db, store) = seeded();

        let created = store.create(pair()).await.unwrap();
        assert!(!created.id.is_nil());
        assert_eq!(created.created_at, created.updated_at);
        assert_eq!(created.sender_id.to_hex(), A);
        assert_eq!(created.receiver_id.to_hex(), B);

        let stored = db.find_conversation_by_id(&created.id).unwrap().unwrap();
        assert_eq!(stored, created);
    }

    #[tokio::test]
    async fn duplicate_pair_is_rejected_without_insert() {
        let (db, store) = seeded();

        store.create(pair()).await.unwrap();
        let err = store.create(pair()).await.unwrap_err();
        assert_eq!(err, ChatError::Conflict("Conversation already exists".into()));
        assert_eq!(db.count_conversations().unwrap(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_for_one_pair_leave_one_row() {
        const N: usize = 8;

        for _ in 0..20 {
            let (db, store) = seeded();

            let tasks: Vec<_> = (0..N)
                .map(|_| {
                    let store = store.clone();
                    tokio::spawn(async move { store.create(pair()).await })
                })
                .collect();

            let (mut ok, mut conflict) = (0, 0);
            for task in tasks {
                match task.await.unwrap() {
                    Ok(_) => ok += 1,
                    Err(ChatError::Conflict(_)) => conflict += 1,
                    Err(other) => panic!("unexpected error: {other:?}"),
                }
            }

            assert_eq!((ok, conflict), (1, N - 1));
            assert_eq!(db.count_conversations().unwrap(), 1);
        }
    }

    #[test]
    fn second_insert_of_a_pair_is_a_constraint_violation() {
        let (db, _store) = seeded();
        let now = Utc::now().trunc_subsecs(6);
        let row = |id| Conversation {
            id,
            sender_id: A.parse().unwrap(),
            receiver_id: B.parse().unwrap(),
            created_at: now,
            updated_at: now,
        };

        db.insert_conversation(&row(ObjectId::new())).unwrap();
        let err = db.insert_conversation(&row(ObjectId::new())).unwrap_err();
        assert!(is_constraint_violation(&err));
        assert_eq!(db.count_conversations().unwrap(), 1);
    }

    #[tokio::test]
    async fn swapped_pair_is_a_distinct_conversation() {
        let (db, store) = seeded();

        store.create(pair()).await.unwrap();
        store
            .create(Conversation::between(B.parse().unwrap(), A.parse().unwrap()))
            .await
            .unwrap();
        assert_eq!(db.count_conversations().unwrap(), 2);
    }

    #[tokio::test]
    async fn nil_participant_is_bad_input() {
        let (db, store) = seeded();

        let err = store
            .create(Conversation::between(ObjectId::NIL, B.parse().unwrap()))
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::BadInput(_)));
        assert_eq!(db.count_conversations().unwrap(), 0);
    }

    #[tokio::test]
    async fn missing_user_is_bad_request() {
        let (_db, store) = seeded();

        let err = store
            .create(Conversation::between(A.parse().unwrap(), ObjectId::new()))
            .await
            .unwrap_err();
        assert_eq!(err, ChatError::BadRequest("One or both users do not exist".into()));
    }

    #[tokio::test]
    async fn get_with_users_loads_both_participants() {
        let (_db, store) = seeded();
        let created = store.create(pair()).await.unwrap();

        let found = store.get_with_users(created.id).await.unwrap();
        assert_eq!(found.conversation, created);
        assert_eq!(found.sender.username, "alice");
        assert_eq!(found.receiver.username, "bob");
    }

    #[tokio::test]
    async fn get_with_users_missing_conversation_is_not_found() {
        let (_db, store) = seeded();

        let err = store.get_with_users(ObjectId::new()).await.unwrap_err();
        assert!(matches!(err.error, ChatError::NotFound(_)));
        assert!(err.partial.is_none());
    }

    #[tokio::test]
    async fn get_with_users_returns_partial_when_receiver_is_gone() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.insert_user(&user(A, "alice")).unwrap();
        let now = Utc::now().trunc_subsecs(6);
        let orphan = Conversation {
            id: ObjectId::new(),
            sender_id: A.parse().unwrap(),
            receiver_id: B.parse().unwrap(),
            created_at: now,
            updated_at: now,
        };
        db.insert_conversation(&orphan).unwrap();

        let err = ConversationStore::new(db).get_with_users(orphan.id).await.unwrap_err();
        assert!(matches!(err.error, ChatError::NotFound(_)));
        let partial = err.partial.unwrap();
        assert_eq!(partial.conversation, orphan);
        assert_eq!(partial.sender.unwrap().username, "alice");
    }
}
