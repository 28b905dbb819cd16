//! Deadline wrapper: bounds every durable call by a fixed timeout.

use chat_types::{
    Conversation, ConversationStore, Message, MessageStore, StoreError, User, UserStore,
};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;

/// Wraps a store so that each call fails with `StoreError::Timeout` once the
/// deadline passes. A timed-out write may still have committed underneath.
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutStore<S> {
    pub fn new(inner: S, timeout: Duration) -> Self {
        Self { inner, timeout }
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }

    async fn bounded<T, F>(&self, op: &'static str, fut: F) -> Result<T, StoreError>
    where
        F: Future<Output = Result<T, StoreError>>,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(res) => res,
            Err(_) => {
                let ms = self.timeout.as_millis() as u64;
                tracing::error!(op, timeout_ms = ms, "durable store call timed out");
                Err(StoreError::Timeout(ms))
            }
        }
    }
}

#[async_trait::async_trait]
impl<S: UserStore> UserStore for TimeoutStore<S> {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        self.bounded("insert_user", self.inner.insert_user(user)).await
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        self.bounded("find_user_by_id", self.inner.find_user_by_id(id))
            .await
    }

    async fn find_user_by_external_hash(&self, hash: &str) -> Result<Option<User>, StoreError> {
        self.bounded(
            "find_user_by_external_hash",
            self.inner.find_user_by_external_hash(hash),
        )
        .await
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        self.bounded("find_user_by_email", self.inner.find_user_by_email(email))
            .await
    }

    async fn set_external_hash(&self, user_id: &str, hash: &str) -> Result<(), StoreError> {
        self.bounded(
            "set_external_hash",
            self.inner.set_external_hash(user_id, hash),
        )
        .await
    }

    async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        self.bounded("touch_last_login", self.inner.touch_last_login(user_id, at))
            .await
    }
}

#[async_trait::async_trait]
impl<S: ConversationStore> ConversationStore for TimeoutStore<S> {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        self.bounded(
            "insert_conversation",
            self.inner.insert_conversation(conversation),
        )
        .await
    }

    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        self.bounded("find_conversation", self.inner.find_conversation(id))
            .await
    }

    async fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        self.bounded(
            "list_conversations_for_user",
            self.inner.list_conversations_for_user(user_id),
        )
        .await
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        self.bounded("delete_conversation", self.inner.delete_conversation(id))
            .await
    }

    async fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        self.bounded(
            "add_participant",
            self.inner.add_participant(conversation_id, user_id),
        )
        .await
    }

    async fn remove_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        self.bounded(
            "remove_participant",
            self.inner.remove_participant(conversation_id, user_id),
        )
        .await
    }
}

#[async_trait::async_trait]
impl<S: MessageStore> MessageStore for TimeoutStore<S> {
    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        self.bounded("append_message", self.inner.append_message(message))
            .await
    }

    async fn find_messages_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        self.bounded(
            "find_messages_by_conversation",
            self.inner.find_messages_by_conversation(conversation_id),
        )
        .await
    }

    async fn count_messages(&self, conversation_id: &str) -> Result<usize, StoreError> {
        self.bounded("count_messages", self.inner.count_messages(conversation_id))
            .await
    }
}
