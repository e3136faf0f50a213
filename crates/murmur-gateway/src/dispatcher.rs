use tracing::{debug, info, warn};
use uuid::Uuid;

use murmur_db::{ConversationStore, LookupError, MessageStore};
use murmur_types::events::{InboundFrame, OutboundFrame};
use murmur_types::models::{Conversation, Message};
use murmur_types::{ChatError, ObjectId};

/// Who is on the other end of a socket.
#[derive(Debug, Clone, Copy)]
pub struct Session {
    pub conn_id: Uuid,

    /// Set when the upgrade carried a valid bearer token.
    pub user_id: Option<ObjectId>,
}

impl Session {
    pub fn anonymous(conn_id: Uuid) -> Self {
        Self { conn_id, user_id: None }
    }

    /// The sender to record for a frame. An authenticated socket always acts
    /// as its own user, whatever the frame claims.
    fn sender(&self, claimed: ObjectId) -> ObjectId {
        match self.user_id {
            Some(user_id) => {
                if user_id != claimed {
                    debug!(
                        "Connection {} claimed senderId {}, using bound user {}",
                        self.conn_id, claimed, user_id
                    );
                }
                user_id
            }
            None => claimed,
        }
    }
}

/// Routes decoded frames to the stores and builds the reply for the
/// originating socket.
#[derive(Clone)]
pub struct Dispatcher {
    conversations: ConversationStore,
    messages: MessageStore,
}

impl Dispatcher {
    pub fn new(conversations: ConversationStore, messages: MessageStore) -> Self {
        Self {
            conversations,
            messages,
        }
    }

    /// Decode and handle one raw text frame. `Ok(None)` means no reply.
    pub async fn dispatch(&self, text: &str, session: &Session) -> Result<Option<OutboundFrame>, ChatError> {
        let frame = InboundFrame::parse(text)?;
        self.handle(frame, session).await
    }

    pub async fn handle(
        &self,
        frame: InboundFrame,
        session: &Session,
    ) -> Result<Option<OutboundFrame>, ChatError> {
        match frame {
            InboundFrame::CreateConversation {
                sender_id,
                receiver_id,
            } => {
                let sender_id = session.sender(sender_id);
                let conversation = self
                    .conversations
                    .create(Conversation::between(sender_id, receiver_id))
                    .await?;

                info!(
                    "Conversation {} created ({} -> {})",
                    conversation.id, conversation.sender_id, conversation.receiver_id
                );
                Ok(Some(OutboundFrame::conversation_created(conversation)))
            }

            InboundFrame::GetConversationById { id } => {
                match self.conversations.get_with_users(id).await {
                    Ok(found) => Ok(Some(OutboundFrame::ConversationDetails {
                        conversation: found.conversation,
                        sender: found.sender,
                        receiver: found.receiver,
                    })),
                    Err(LookupError { error, partial }) => {
                        if let Some(partial) = partial {
                            warn!(
                                "Conversation {} loaded without all participants (sender loaded: {})",
                                partial.conversation.id,
                                partial.sender.is_some()
                            );
                        }
                        Err(error)
                    }
                }
            }

            InboundFrame::SendMessage {
                conversation_id,
                sender_id,
                message,
            } => {
                let sender_id = session.sender(sender_id);
                let created = self
                    .messages
                    .create(Message::draft(conversation_id, sender_id, message))
                    .await?;

                debug!(
                    "Message {} stored in conversation {}",
                    created.id, created.conversation_id
                );
                Ok(Some(OutboundFrame::message_sent(created)))
            }

            InboundFrame::Unknown(action) => {
                info!("Unknown action: {}", action);
                Ok(None)
            }
        }
    }
}
