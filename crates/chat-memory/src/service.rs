//! MemoryService: the per-request pipeline over store, cache, and guard.
//!
//! Writes flow one way: authorize, commit durably, then fold the committed
//! message into the cache. Reads go through the cache-aside projection.

use crate::config::MemoryConfig;
use chat_auth::AccessGuard;
use chat_cache::ConversationMemoryCache;
use chat_types::{
    Conversation, ConversationMemory, DurableStore, GeneratorError, MemoryError, Message,
    NewMessage, Role, StoreError, TextGenerator, User, VolatileCache,
};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

pub struct MemoryService {
    store: Arc<dyn DurableStore>,
    cache: ConversationMemoryCache,
    guard: AccessGuard,
    generator: Option<Arc<dyn TextGenerator>>,
}

impl MemoryService {
    /// `store` should already carry its deadline (see [`MemoryConfig::bound_store`]).
    pub fn new(
        store: Arc<dyn DurableStore>,
        cache: Arc<dyn VolatileCache>,
        config: MemoryConfig,
    ) -> Self {
        Self {
            cache: ConversationMemoryCache::new(cache, store.clone(), config.cache),
            guard: AccessGuard::new(store.clone()),
            store,
            generator: None,
        }
    }

    pub fn with_generator(mut self, generator: Arc<dyn TextGenerator>) -> Self {
        self.generator = Some(generator);
        self
    }

    pub fn guard(&self) -> &AccessGuard {
        &self.guard
    }

    async fn resolve_user(&self, user_ref: &str) -> Result<Option<User>, MemoryError> {
        Ok(self.guard.resolve_user(user_ref).await?)
    }

    async fn require_conversation(&self, conversation_id: &str) -> Result<Conversation, MemoryError> {
        self.store
            .find_conversation(conversation_id)
            .await?
            .ok_or_else(|| MemoryError::ConversationNotFound(conversation_id.to_string()))
    }

    /// Owner check for owner-only mutations. An unresolvable caller is denied.
    async fn require_owner(
        &self,
        conversation: &Conversation,
        user_ref: &str,
    ) -> Result<User, MemoryError> {
        match self.resolve_user(user_ref).await? {
            Some(user) if conversation.is_owner(&user.id) => Ok(user),
            _ => {
                tracing::warn!(conversation_id = %conversation.id, "owner-only operation denied");
                Err(MemoryError::AccessDenied)
            }
        }
    }

    /// Authorize (role user only), commit durably, then sync the cache.
    ///
    /// The durable write runs on its own task: dropping this future after the
    /// write was issued does not abort it.
    pub async fn save_message(&self, new: NewMessage) -> Result<Message, MemoryError> {
        let conversation_id = new.conversation_id.clone();
        let is_user = new.role == Role::User;

        if is_user {
            let Some(author) = new.author.as_deref() else {
                tracing::warn!(conversation_id = %conversation_id, "user message without author");
                return Err(MemoryError::AccessDenied);
            };
            if !self.guard.has_access(author, &conversation_id).await {
                tracing::warn!(conversation_id = %conversation_id, "message rejected: access denied");
                return Err(MemoryError::AccessDenied);
            }
        }

        self.require_conversation(&conversation_id).await?;

        let author_user_id = match (is_user, new.author.as_deref()) {
            (true, Some(author)) => match self.resolve_user(author).await? {
                Some(user) => Some(user.id),
                None => return Err(MemoryError::UserNotFound(author.to_string())),
            },
            _ => None,
        };

        let message = Message {
            id: Uuid::new_v4().to_string(),
            conversation_id: conversation_id.clone(),
            author_user_id,
            body: new.body,
            role: new.role,
            timestamp: new.timestamp.unwrap_or_else(Utc::now),
        };

        let store = self.store.clone();
        let pending = message.clone();
        let commit = tokio::spawn(async move { store.append_message(&pending).await });
        match commit.await {
            Ok(Ok(())) => {}
            Ok(Err(StoreError::NotFound(what))) => {
                tracing::warn!(conversation_id = %conversation_id, %what, "conversation vanished before commit");
                return Err(MemoryError::ConversationNotFound(conversation_id));
            }
            Ok(Err(e)) => {
                tracing::error!(conversation_id = %conversation_id, error = %e, "message commit failed");
                return Err(e.into());
            }
            Err(e) => {
                tracing::error!(conversation_id = %conversation_id, error = %e, "message commit task failed");
                return Err(StoreError::Other(e.to_string()).into());
            }
        }
        tracing::debug!(conversation_id = %conversation_id, message_id = %message.id, role = %message.role, "message committed");

        self.cache.append_and_cache(&message).await;
        Ok(message)
    }

    pub async fn get_conversation_memory(
        &self,
        conversation_id: &str,
    ) -> Result<ConversationMemory, MemoryError> {
        self.cache
            .get(conversation_id)
            .await?
            .ok_or_else(|| MemoryError::ConversationNotFound(conversation_id.to_string()))
    }

    /// Last `count` messages of the projection, oldest first. An unknown
    /// conversation reads as empty.
    pub async fn get_last_messages(
        &self,
        conversation_id: &str,
        count: usize,
    ) -> Result<Vec<Message>, MemoryError> {
        Ok(self
            .cache
            .get(conversation_id)
            .await?
            .map(|m| m.last_messages(count))
            .unwrap_or_default())
    }

    /// The projection rendered as `Label: body` lines; empty for an unknown
    /// conversation.
    pub async fn get_history(&self, conversation_id: &str) -> Result<String, MemoryError> {
        Ok(self
            .cache
            .get(conversation_id)
            .await?
            .map(|m| m.history())
            .unwrap_or_default())
    }

    /// Override how many messages the cached projection keeps for one
    /// conversation. False when the conversation does not exist.
    pub async fn set_max_messages(
        &self,
        conversation_id: &str,
        max_messages: usize,
    ) -> Result<bool, MemoryError> {
        Ok(self
            .cache
            .set_max_messages(conversation_id, max_messages)
            .await?)
    }

    /// Drop the cached projection only; durable rows stay.
    pub async fn clear_conversation(&self, conversation_id: &str) {
        self.cache.invalidate(conversation_id).await;
    }

    /// True when the conversation exists and holds at least one message.
    pub async fn has_conversation(&self, conversation_id: &str) -> Result<bool, MemoryError> {
        Ok(self
            .cache
            .get(conversation_id)
            .await?
            .is_some_and(|m| !m.is_empty()))
    }

    /// `owner` is a local user id or an external hash.
    pub async fn create_conversation(
        &self,
        owner: &str,
        title: &str,
    ) -> Result<Conversation, MemoryError> {
        let user = self
            .resolve_user(owner)
            .await?
            .ok_or_else(|| MemoryError::UserNotFound(owner.to_string()))?;
        let conversation = Conversation::new(&user.id, title.trim());
        self.store.insert_conversation(&conversation).await?;
        tracing::info!(conversation_id = %conversation.id, owner_id = %user.id, "conversation created");
        Ok(conversation)
    }

    pub async fn user_has_access(&self, user_ref: &str, conversation_id: &str) -> bool {
        self.guard.has_access(user_ref, conversation_id).await
    }

    /// Owner only. Cascades messages and participants, then drops the cache entry.
    pub async fn delete_conversation(
        &self,
        conversation_id: &str,
        user_ref: &str,
    ) -> Result<(), MemoryError> {
        if !self.guard.has_access(user_ref, conversation_id).await {
            return Err(MemoryError::AccessDenied);
        }
        let conversation = self.require_conversation(conversation_id).await?;
        self.require_owner(&conversation, user_ref).await?;

        if !self.store.delete_conversation(conversation_id).await? {
            return Err(MemoryError::ConversationNotFound(conversation_id.to_string()));
        }
        self.cache.invalidate(conversation_id).await;
        tracing::info!(conversation_id = %conversation_id, "conversation deleted");
        Ok(())
    }

    /// Owner grants `target` access. Sharing with the owner or an existing
    /// participant changes nothing.
    pub async fn share_conversation(
        &self,
        conversation_id: &str,
        owner_ref: &str,
        target: &str,
    ) -> Result<Conversation, MemoryError> {
        let conversation = self.require_conversation(conversation_id).await?;
        self.require_owner(&conversation, owner_ref).await?;
        let target_user = self
            .resolve_user(target)
            .await?
            .ok_or_else(|| MemoryError::UserNotFound(target.to_string()))?;
        if conversation.is_member(&target_user.id) {
            return Ok(conversation);
        }
        match self
            .store
            .add_participant(conversation_id, &target_user.id)
            .await
        {
            Ok(()) | Err(StoreError::Conflict(_)) => {}
            Err(StoreError::NotFound(_)) => {
                return Err(MemoryError::ConversationNotFound(conversation_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        }
        tracing::info!(conversation_id = %conversation_id, participant = %target_user.id, "conversation shared");
        self.require_conversation(conversation_id).await
    }

    /// Owner revokes `target`. Returns whether a participant was removed.
    pub async fn remove_participant(
        &self,
        conversation_id: &str,
        owner_ref: &str,
        target: &str,
    ) -> Result<bool, MemoryError> {
        let conversation = self.require_conversation(conversation_id).await?;
        self.require_owner(&conversation, owner_ref).await?;
        let target_user = self
            .resolve_user(target)
            .await?
            .ok_or_else(|| MemoryError::UserNotFound(target.to_string()))?;
        match self
            .store
            .remove_participant(conversation_id, &target_user.id)
            .await
        {
            Ok(removed) => Ok(removed),
            Err(StoreError::NotFound(_)) => {
                Err(MemoryError::ConversationNotFound(conversation_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Conversations owned by or shared with the user. Unknown users get none.
    pub async fn list_conversations(&self, user_ref: &str) -> Result<Vec<Conversation>, MemoryError> {
        match self.resolve_user(user_ref).await? {
            Some(user) => Ok(self.store.list_conversations_for_user(&user.id).await?),
            None => Ok(Vec::new()),
        }
    }

    /// Durable message count, independent of the projection's capacity.
    pub async fn message_count(&self, conversation_id: &str) -> Result<usize, MemoryError> {
        self.require_conversation(conversation_id).await?;
        Ok(self.store.count_messages(conversation_id).await?)
    }

    /// One assistant turn: store the prompt, generate from prior history, store
    /// the reply. A generation failure leaves the prompt committed.
    pub async fn chat(
        &self,
        user_ref: &str,
        conversation_id: &str,
        prompt: &str,
    ) -> Result<String, MemoryError> {
        if !self.guard.has_access(user_ref, conversation_id).await {
            return Err(MemoryError::AccessDenied);
        }
        let generator = self
            .generator
            .clone()
            .ok_or_else(|| GeneratorError::Other("no text generator configured".to_string()))?;

        let history = self.get_history(conversation_id).await?;
        self.save_message(NewMessage::user(conversation_id, user_ref, prompt))
            .await?;

        let reply = match generator.generate(&history, prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                tracing::error!(conversation_id = %conversation_id, error = %e, "generation failed");
                return Err(e.into());
            }
        };
        self.save_message(NewMessage::assistant(conversation_id, reply.as_str()))
            .await?;
        Ok(reply)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_cache::{CacheConfig, InMemoryCache};
    use chat_llm::{EchoGenerator, FailingGenerator};
    use chat_store::InMemoryStore;
    use chat_types::{CacheError, ConversationStore, MessageStore, UserStore};
    use chrono::{DateTime, TimeZone};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Counts message loads; can be told to fail commits.
    #[derive(Default)]
    struct TrackingStore {
        inner: InMemoryStore,
        loads: AtomicUsize,
        fail_appends: AtomicBool,
    }

    #[async_trait::async_trait]
    impl UserStore for TrackingStore {
        async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
            self.inner.insert_user(user).await
        }
        async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_id(id).await
        }
        async fn find_user_by_external_hash(&self, h: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_external_hash(h).await
        }
        async fn find_user_by_email(&self, e: &str) -> Result<Option<User>, StoreError> {
            self.inner.find_user_by_email(e).await
        }
        async fn set_external_hash(&self, id: &str, h: &str) -> Result<(), StoreError> {
            self.inner.set_external_hash(id, h).await
        }
        async fn touch_last_login(&self, id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
            self.inner.touch_last_login(id, at).await
        }
    }

    #[async_trait::async_trait]
    impl ConversationStore for TrackingStore {
        async fn insert_conversation(&self, c: &Conversation) -> Result<(), StoreError> {
            self.inner.insert_conversation(c).await
        }
        async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
            self.inner.find_conversation(id).await
        }
        async fn list_conversations_for_user(
            &self,
            u: &str,
        ) -> Result<Vec<Conversation>, StoreError> {
            self.inner.list_conversations_for_user(u).await
        }
        async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
            self.inner.delete_conversation(id).await
        }
        async fn add_participant(&self, c: &str, u: &str) -> Result<(), StoreError> {
            self.inner.add_participant(c, u).await
        }
        async fn remove_participant(&self, c: &str, u: &str) -> Result<bool, StoreError> {
            self.inner.remove_participant(c, u).await
        }
    }

    #[async_trait::async_trait]
    impl MessageStore for TrackingStore {
        async fn append_message(&self, m: &Message) -> Result<(), StoreError> {
            if self.fail_appends.load(Ordering::SeqCst) {
                return Err(StoreError::Other("disk full".to_string()));
            }
            self.inner.append_message(m).await
        }
        async fn find_messages_by_conversation(&self, c: &str) -> Result<Vec<Message>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.find_messages_by_conversation(c).await
        }
        async fn count_messages(&self, c: &str) -> Result<usize, StoreError> {
            self.inner.count_messages(c).await
        }
    }

    /// Cache that is always down.
    struct DownCache;

    #[async_trait::async_trait]
    impl VolatileCache for DownCache {
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
            Err(CacheError::Other("connection refused".to_string()))
        }
        async fn set_with_expiry(&self, _k: &str, _v: String, _t: u64) -> Result<(), CacheError> {
            Err(CacheError::Other("connection refused".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheError> {
            Err(CacheError::Other("connection refused".to_string()))
        }
    }

    struct Fixture {
        store: Arc<TrackingStore>,
        service: MemoryService,
        owner: User,
        stranger: User,
        conversation: Conversation,
    }

    async fn fixture_with(max_messages: usize, cache: Arc<dyn VolatileCache>) -> Fixture {
        let store = Arc::new(TrackingStore::default());
        let config = MemoryConfig {
            cache: CacheConfig {
                max_messages,
                ..CacheConfig::default()
            },
            ..MemoryConfig::default()
        };
        let service = MemoryService::new(store.clone(), cache, config);
        let owner = User::new("owner", "owner@x.io").with_external_hash("owner-hash");
        let stranger = User::new("stranger", "stranger@x.io");
        store.insert_user(&owner).await.unwrap();
        store.insert_user(&stranger).await.unwrap();
        let conversation = service.create_conversation(&owner.id, "Rust").await.unwrap();
        Fixture {
            store,
            service,
            owner,
            stranger,
            conversation,
        }
    }

    async fn fixture(max_messages: usize) -> Fixture {
        fixture_with(max_messages, Arc::new(InMemoryCache::new())).await
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn bodies(messages: &[Message]) -> Vec<&str> {
        messages.iter().map(|m| m.body.as_str()).collect()
    }

    #[tokio::test]
    async fn projection_keeps_most_recent_messages() {
        let f = fixture(2).await;
        let conv = &f.conversation.id;
        // Warm the entry so appends land in the cache.
        f.service.get_conversation_memory(conv).await.unwrap();
        for (i, body) in ["A", "B", "C"].into_iter().enumerate() {
            f.service
                .save_message(NewMessage::user(conv, &f.owner.id, body).at(at(i as i64 + 1)))
                .await
                .unwrap();
        }
        let memory = f.service.get_conversation_memory(conv).await.unwrap();
        assert_eq!(bodies(&memory.messages), vec!["B", "C"]);
        assert_eq!(f.service.message_count(conv).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn non_member_user_message_is_denied_without_writes() {
        let f = fixture(10).await;
        let conv = &f.conversation.id;
        let err = f
            .service
            .save_message(NewMessage::user(conv, &f.stranger.id, "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::AccessDenied));
        assert_eq!(f.store.count_messages(conv).await.unwrap(), 0);

        let err = f
            .service
            .save_message(NewMessage::user(conv, "ghost", "hi"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::AccessDenied));
    }

    #[tokio::test]
    async fn user_message_without_author_is_denied() {
        let f = fixture(10).await;
        let mut new = NewMessage::user(&f.conversation.id, "x", "hi");
        new.author = None;
        let err = f.service.save_message(new).await.unwrap_err();
        assert!(matches!(err, MemoryError::AccessDenied));
    }

    #[tokio::test]
    async fn author_resolves_by_external_hash() {
        let f = fixture(10).await;
        let saved = f
            .service
            .save_message(NewMessage::user(&f.conversation.id, "owner-hash", "hi"))
            .await
            .unwrap();
        assert_eq!(saved.author_user_id.as_deref(), Some(f.owner.id.as_str()));
    }

    #[tokio::test]
    async fn assistant_messages_skip_authorization_and_carry_no_author() {
        let f = fixture(10).await;
        let mut new = NewMessage::assistant(&f.conversation.id, "hello");
        new.author = Some(f.stranger.id.clone());
        let saved = f.service.save_message(new).await.unwrap();
        assert_eq!(saved.role, Role::Assistant);
        assert!(saved.author_user_id.is_none());

        let err = f
            .service
            .save_message(NewMessage::system("missing", "boot"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::ConversationNotFound(_)));
    }

    #[tokio::test]
    async fn cold_read_matches_durable_then_hits_cache() {
        let f = fixture(2).await;
        let conv = &f.conversation.id;
        for (i, body) in ["A", "B", "C"].into_iter().enumerate() {
            f.service
                .save_message(NewMessage::user(conv, &f.owner.id, body).at(at(i as i64 + 1)))
                .await
                .unwrap();
        }
        // Entry was never warmed: the appends left it cold.
        assert_eq!(f.store.loads.load(Ordering::SeqCst), 0);

        let first = f.service.get_conversation_memory(conv).await.unwrap();
        assert_eq!(bodies(&first.messages), vec!["B", "C"]);
        assert_eq!(f.store.loads.load(Ordering::SeqCst), 1);

        let second = f.service.get_conversation_memory(conv).await.unwrap();
        assert_eq!(second, first);
        assert_eq!(f.store.loads.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn clear_only_drops_cache() {
        let f = fixture(10).await;
        let conv = &f.conversation.id;
        f.service
            .save_message(NewMessage::user(conv, &f.owner.id, "A"))
            .await
            .unwrap();
        let before = f.service.get_conversation_memory(conv).await.unwrap();

        f.service.clear_conversation(conv).await;
        assert_eq!(f.store.count_messages(conv).await.unwrap(), 1);
        let after = f.service.get_conversation_memory(conv).await.unwrap();
        assert_eq!(after.messages, before.messages);
        assert_eq!(f.store.loads.load(Ordering::SeqCst), 2);
        assert!(f.service.has_conversation(conv).await.unwrap());
    }

    #[tokio::test]
    async fn failed_commit_leaves_cache_untouched() {
        let f = fixture(10).await;
        let conv = &f.conversation.id;
        f.service.get_conversation_memory(conv).await.unwrap();
        f.store.fail_appends.store(true, Ordering::SeqCst);

        let err = f
            .service
            .save_message(NewMessage::user(conv, &f.owner.id, "lost"))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::Storage(_)));
        assert!(f.service.get_conversation_memory(conv).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn cache_outage_never_fails_the_pipeline() {
        let f = fixture_with(10, Arc::new(DownCache)).await;
        let conv = &f.conversation.id;
        f.service
            .save_message(NewMessage::user(conv, &f.owner.id, "A"))
            .await
            .unwrap();
        let memory = f.service.get_conversation_memory(conv).await.unwrap();
        assert_eq!(bodies(&memory.messages), vec!["A"]);
        f.service.clear_conversation(conv).await;
    }

    #[tokio::test]
    async fn delete_by_non_owner_changes_nothing() {
        let f = fixture(10).await;
        let conv = &f.conversation.id;
        f.service
            .save_message(NewMessage::user(conv, &f.owner.id, "A"))
            .await
            .unwrap();

        let err = f
            .service
            .delete_conversation(conv, &f.stranger.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::AccessDenied));

        // A participant may write but not delete.
        f.service
            .share_conversation(conv, &f.owner.id, &f.stranger.id)
            .await
            .unwrap();
        let err = f
            .service
            .delete_conversation(conv, &f.stranger.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::AccessDenied));

        assert!(f.store.find_conversation(conv).await.unwrap().is_some());
        assert_eq!(f.store.count_messages(conv).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn owner_delete_cascades_and_invalidates() {
        let f = fixture(10).await;
        let conv = &f.conversation.id;
        f.service
            .save_message(NewMessage::user(conv, &f.owner.id, "A"))
            .await
            .unwrap();
        f.service.get_conversation_memory(conv).await.unwrap();

        f.service.delete_conversation(conv, &f.owner.id).await.unwrap();
        assert!(matches!(
            f.service.get_conversation_memory(conv).await,
            Err(MemoryError::ConversationNotFound(_))
        ));
        assert!(!f.service.has_conversation(conv).await.unwrap());
        assert_eq!(f.store.count_messages(conv).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn sharing_rules() {
        let f = fixture(10).await;
        let conv = &f.conversation.id;

        let err = f
            .service
            .share_conversation(conv, &f.stranger.id, &f.stranger.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::AccessDenied));
        let err = f
            .service
            .share_conversation(conv, &f.owner.id, "nobody")
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::UserNotFound(_)));
        let err = f
            .service
            .share_conversation("missing", &f.owner.id, &f.stranger.id)
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::ConversationNotFound(_)));

        let same = f
            .service
            .share_conversation(conv, &f.owner.id, &f.owner.id)
            .await
            .unwrap();
        assert!(same.participants.is_empty());

        let shared = f
            .service
            .share_conversation(conv, &f.owner.id, &f.stranger.id)
            .await
            .unwrap();
        assert_eq!(shared.participants, vec![f.stranger.id.clone()]);
        assert!(f.service.user_has_access(&f.stranger.id, conv).await);
        assert_eq!(f.service.list_conversations(&f.stranger.id).await.unwrap().len(), 1);

        assert!(f
            .service
            .remove_participant(conv, &f.owner.id, &f.stranger.id)
            .await
            .unwrap());
        assert!(!f.service.user_has_access(&f.stranger.id, conv).await);
        assert!(f.service.list_conversations(&f.stranger.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn listing_unknown_identity_is_empty() {
        let f = fixture(10).await;
        assert!(f.service.list_conversations("nobody").await.unwrap().is_empty());
        let owned = f.service.list_conversations("owner-hash").await.unwrap();
        assert_eq!(owned.len(), 1);
        assert!(matches!(
            f.service.create_conversation("nobody", "t").await,
            Err(MemoryError::UserNotFound(_))
        ));
    }

    #[tokio::test]
    async fn chat_stores_prompt_and_reply() {
        let f = fixture(10).await;
        let echo = Arc::new(EchoGenerator::new());
        let service = MemoryService::new(
            f.store.clone(),
            Arc::new(InMemoryCache::new()),
            MemoryConfig::default(),
        )
        .with_generator(echo.clone());
        let conv = &f.conversation.id;

        let reply = service.chat(&f.owner.id, conv, "first").await.unwrap();
        assert_eq!(reply, "echo: first");
        service.chat(&f.owner.id, conv, "second").await.unwrap();

        let histories = echo.histories();
        assert_eq!(histories[0], "");
        assert_eq!(histories[1], "User: first\nAssistant: echo: first");
        let last = service.get_last_messages(conv, 2).await.unwrap();
        assert_eq!(bodies(&last), vec!["second", "echo: second"]);
        assert_eq!(last[1].role, Role::Assistant);

        let err = service.chat(&f.stranger.id, conv, "hi").await.unwrap_err();
        assert!(matches!(err, MemoryError::AccessDenied));
    }

    #[tokio::test]
    async fn failed_generation_keeps_prompt() {
        let f = fixture(10).await;
        let service = MemoryService::new(
            f.store.clone(),
            Arc::new(InMemoryCache::new()),
            MemoryConfig::default(),
        )
        .with_generator(Arc::new(FailingGenerator));
        let conv = &f.conversation.id;

        let err = service.chat(&f.owner.id, conv, "hello?").await.unwrap_err();
        assert!(matches!(err, MemoryError::Generation(_)));
        assert_eq!(f.store.count_messages(conv).await.unwrap(), 1);

        let err = f.service.chat(&f.owner.id, conv, "x").await.unwrap_err();
        assert!(matches!(err, MemoryError::Generation(_)));
    }

    #[tokio::test]
    async fn unknown_conversation_reads_as_empty() {
        let f = fixture(10).await;
        assert!(f.service.get_last_messages("missing", 5).await.unwrap().is_empty());
        assert_eq!(f.service.get_history("missing").await.unwrap(), "");
        assert!(!f.service.has_conversation("missing").await.unwrap());
        assert!(matches!(
            f.service.get_conversation_memory("missing").await,
            Err(MemoryError::ConversationNotFound(_))
        ));
    }

    #[tokio::test]
    async fn capacity_override_limits_one_conversation() {
        let f = fixture(10).await;
        let conv = &f.conversation.id;
        let other = f.service.create_conversation(&f.owner.id, "Other").await.unwrap();
        for (i, body) in ["A", "B", "C"].into_iter().enumerate() {
            for c in [conv.as_str(), other.id.as_str()] {
                f.service
                    .save_message(NewMessage::user(c, &f.owner.id, body).at(at(i as i64 + 1)))
                    .await
                    .unwrap();
            }
        }

        assert!(f.service.set_max_messages(conv, 1).await.unwrap());
        f.service
            .save_message(NewMessage::assistant(conv.as_str(), "D").at(at(10)))
            .await
            .unwrap();
        let last = f.service.get_last_messages(conv, 10).await.unwrap();
        assert_eq!(bodies(&last), vec!["D"]);
        let untouched = f.service.get_last_messages(&other.id, 10).await.unwrap();
        assert_eq!(untouched.len(), 3);
        assert_eq!(f.store.count_messages(conv).await.unwrap(), 4);

        assert!(!f.service.set_max_messages("missing", 1).await.unwrap());
    }

    #[tokio::test]
    async fn chat_checks_access_before_generator() {
        let f = fixture(10).await;
        let conv = &f.conversation.id;
        let err = f.service.chat(&f.stranger.id, conv, "hi").await.unwrap_err();
        assert!(matches!(err, MemoryError::AccessDenied));
        let err = f.service.chat(&f.owner.id, conv, "hi").await.unwrap_err();
        assert!(matches!(err, MemoryError::Generation(_)));
    }
}
