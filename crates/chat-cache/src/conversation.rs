//! Cache-aside projection of recent conversation messages.
//!
//! The durable store is the source of truth. The cache holds at most
//! `max_messages` of the most recent messages per conversation and is
//! populated lazily on a read miss. Writers call [`ConversationMemoryCache::append_and_cache`]
//! only after their durable commit succeeded; a cold key is left cold.

use chat_types::{
    CacheError, ConversationMemory, DurableStore, Message, StoreError, VolatileCache,
};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

const KEY_PREFIX: &str = "memory:";

/// Capacity, expiry, and cache-call timeout of the projection.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Capacity N: messages kept per conversation.
    pub max_messages: usize,
    /// TTL of an entry; refreshed on every write.
    pub ttl: Duration,
    /// Bound on a single cache call; expiry degrades to a miss or no-op.
    pub cache_timeout: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_messages: 50,
            ttl: Duration::from_secs(24 * 3600),
            cache_timeout: Duration::from_millis(500),
        }
    }
}

pub struct ConversationMemoryCache {
    cache: Arc<dyn VolatileCache>,
    store: Arc<dyn DurableStore>,
    config: CacheConfig,
}

impl ConversationMemoryCache {
    pub fn new(
        cache: Arc<dyn VolatileCache>,
        store: Arc<dyn DurableStore>,
        config: CacheConfig,
    ) -> Self {
        Self {
            cache,
            store,
            config,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn key(conversation_id: &str) -> String {
        format!("{}{}", KEY_PREFIX, conversation_id)
    }

    fn ttl_secs(&self) -> u64 {
        self.config.ttl.as_secs().max(1)
    }

    async fn cache_call<T, F>(&self, fut: F) -> Result<T, CacheError>
    where
        F: Future<Output = Result<T, CacheError>>,
    {
        match tokio::time::timeout(self.config.cache_timeout, fut).await {
            Ok(res) => res,
            Err(_) => Err(CacheError::Timeout(
                self.config.cache_timeout.as_millis() as u64,
            )),
        }
    }

    /// Read the cached projection only. Any cache fault reads as a miss.
    async fn read_cached(&self, conversation_id: &str) -> Option<ConversationMemory> {
        let key = Self::key(conversation_id);
        let raw = match self.cache_call(self.cache.get(&key)).await {
            Ok(Some(raw)) => raw,
            Ok(None) => return None,
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "cache read failed, treating as miss");
                return None;
            }
        };
        match serde_json::from_str::<ConversationMemory>(&raw) {
            Ok(memory) => Some(memory),
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "undecodable cache entry, treating as miss");
                None
            }
        }
    }

    /// Write the projection with a fresh TTL. Failures are logged only.
    async fn write_cached(&self, memory: &ConversationMemory) {
        let raw = match serde_json::to_string(memory) {
            Ok(raw) => raw,
            Err(e) => {
                tracing::warn!(conversation_id = %memory.conversation_id, error = %e, "failed to encode memory");
                return;
            }
        };
        let key = Self::key(&memory.conversation_id);
        if let Err(e) = self
            .cache_call(self.cache.set_with_expiry(&key, raw, self.ttl_secs()))
            .await
        {
            tracing::warn!(conversation_id = %memory.conversation_id, error = %e, "cache write failed");
        }
    }

    /// Hit: return the projection. Miss: rebuild from the durable store, fill
    /// the cache, return. `Ok(None)` means the conversation does not exist.
    ///
    /// Concurrent misses on one key each reload independently.
    pub async fn get(
        &self,
        conversation_id: &str,
    ) -> Result<Option<ConversationMemory>, StoreError> {
        if let Some(memory) = self.read_cached(conversation_id).await {
            tracing::debug!(conversation_id = %conversation_id, messages = memory.message_count(), "memory cache hit");
            return Ok(Some(memory));
        }
        tracing::debug!(conversation_id = %conversation_id, "memory cache miss");

        let conversation = match self.store.find_conversation(conversation_id).await? {
            Some(c) => c,
            None => return Ok(None),
        };
        let messages = self
            .store
            .find_messages_by_conversation(conversation_id)
            .await?;
        let memory =
            ConversationMemory::from_durable(&conversation, messages, self.config.max_messages);
        self.write_cached(&memory).await;
        Ok(Some(memory))
    }

    /// Drop the cache entry. The durable store is untouched.
    pub async fn invalidate(&self, conversation_id: &str) {
        let key = Self::key(conversation_id);
        match self.cache_call(self.cache.delete(&key)).await {
            Ok(()) => tracing::debug!(conversation_id = %conversation_id, "memory cache invalidated"),
            Err(e) => {
                tracing::warn!(conversation_id = %conversation_id, error = %e, "cache invalidation failed")
            }
        }
    }

    /// Override the capacity of one conversation's projection, loading it
    /// first if cold. The override lives as long as the cache entry; a later
    /// reload starts again from the configured default.
    ///
    /// Returns false when the conversation does not exist.
    pub async fn set_max_messages(
        &self,
        conversation_id: &str,
        max_messages: usize,
    ) -> Result<bool, StoreError> {
        let Some(mut memory) = self.get(conversation_id).await? else {
            return Ok(false);
        };
        memory.set_max_messages(max_messages);
        self.write_cached(&memory).await;
        tracing::debug!(conversation_id = %conversation_id, max_messages = memory.max_messages, "memory capacity updated");
        Ok(true)
    }

    /// Fold a durably committed message into a warm entry and refresh its TTL.
    /// A cold key stays cold. Never fails: cache faults are logged only.
    ///
    /// Not atomic against other appenders on the same key; the last write wins
    /// and readers can always fall back to a reload.
    pub async fn append_and_cache(&self, message: &Message) {
        let conversation_id = message.conversation_id.as_str();
        let Some(mut memory) = self.read_cached(conversation_id).await else {
            tracing::debug!(conversation_id = %conversation_id, "memory cache cold, skipping append");
            return;
        };
        memory.push(message.clone());
        self.write_cached(&memory).await;
    }
}
