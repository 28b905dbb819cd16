//! Traits for the durable store, volatile cache, and text generator.

use crate::{CacheError, Conversation, GeneratorError, Message, StoreError, User};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

/// User table. `external_hash` and `email` are unique when present.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Insert a user. Returns `StoreError::Conflict` when the external hash or
    /// email is already taken.
    async fn insert_user(&self, user: &User) -> Result<(), StoreError>;

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_external_hash(&self, hash: &str) -> Result<Option<User>, StoreError>;

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError>;

    /// Backfill the external hash onto an existing user.
    async fn set_external_hash(&self, user_id: &str, hash: &str) -> Result<(), StoreError>;

    async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError>;
}

/// Conversation table plus its participant set.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError>;

    /// Load a conversation with its participants.
    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError>;

    /// Conversations owned by or shared with the user, most recent activity first.
    async fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, StoreError>;

    /// Delete a conversation, cascading its messages and participants.
    /// Returns false when no row existed.
    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError>;

    async fn add_participant(&self, conversation_id: &str, user_id: &str)
        -> Result<(), StoreError>;

    /// Returns false when the user was not a participant.
    async fn remove_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError>;
}

/// Message table.
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Insert the message and touch the conversation's `last_activity` as one
    /// unit. Fails with `StoreError::NotFound` when the conversation is gone.
    async fn append_message(&self, message: &Message) -> Result<(), StoreError>;

    /// All messages of a conversation, timestamp ascending (insertion order on ties).
    async fn find_messages_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError>;

    async fn count_messages(&self, conversation_id: &str) -> Result<usize, StoreError>;
}

/// The relational source of truth.
pub trait DurableStore: UserStore + ConversationStore + MessageStore {}

impl<T> DurableStore for T where T: UserStore + ConversationStore + MessageStore {}

/// String-keyed volatile cache over opaque serialized values.
#[async_trait]
pub trait VolatileCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set_with_expiry(&self, key: &str, value: String, ttl_secs: u64)
        -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

/// Text generation: (history, prompt) -> reply text.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, history: &str, prompt: &str) -> Result<String, GeneratorError>;
}
