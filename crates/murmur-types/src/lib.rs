pub mod api;
pub mod error;
pub mod events;
pub mod id;
pub mod models;

pub use error::ChatError;
pub use id::ObjectId;
