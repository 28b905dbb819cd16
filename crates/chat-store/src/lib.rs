//! Durable store traits with in-memory and SQLite implementations.

mod memory;
mod timeout;

#[cfg(feature = "sqlite")]
mod sqlite;

pub use chat_types::{
    ConversationStore, DurableStore, MessageStore, StoreError, UserStore,
};
pub use memory::InMemoryStore;
pub use timeout::TimeoutStore;

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
