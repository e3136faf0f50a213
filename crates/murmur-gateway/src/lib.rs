pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod hub;
pub mod state;

use std::sync::Arc;

use murmur_db::{ConversationStore, Database, MessageStore};

pub use config::GatewayConfig;
pub use dispatcher::{Dispatcher, Session};
pub use hub::{ConnectionHandle, Hub};

/// Everything a connection needs: the hub, the action dispatcher, and the
/// tuning knobs. Cheap to clone.
#[derive(Clone)]
pub struct Gateway {
    pub hub: Hub,
    pub dispatcher: Dispatcher,
    pub config: GatewayConfig,
}

impl Gateway {
    /// Spawn the hub worker and wire the stores. Must be called inside a
    /// Tokio runtime.
    pub fn start(db: Arc<Database>, config: GatewayConfig) -> Self {
        let conversations = ConversationStore::new(db.clone()).with_deadline(config.store_deadline);
        let messages = MessageStore::new(db).with_deadline(config.store_deadline);

        Self {
            hub: Hub::spawn(config.hub_queue),
            dispatcher: Dispatcher::new(conversations, messages),
            config,
        }
    }
}
