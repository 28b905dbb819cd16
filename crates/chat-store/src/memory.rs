//! In-memory durable store. Constraint checks and writes happen under one lock,
//! so each operation is atomic with respect to the others.

use chat_types::{
    Conversation, ConversationStore, Message, MessageStore, StoreError, User, UserStore,
};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    /// user_id -> user.
    users: HashMap<String, User>,
    /// external_hash -> user_id (unique index).
    by_hash: HashMap<String, String>,
    /// email -> user_id (unique index).
    by_email: HashMap<String, String>,
    /// conversation_id -> conversation (participants inline).
    conversations: HashMap<String, Conversation>,
    /// conversation_id -> messages in insertion order.
    messages: HashMap<String, Vec<Message>>,
}

/// In-memory implementation of the durable store traits.
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(RwLock::new(Tables::default())),
        }
    }

    pub async fn user_count(&self) -> usize {
        self.tables.read().await.users.len()
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl UserStore for InMemoryStore {
    async fn insert_user(&self, user: &User) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if t.users.contains_key(&user.id) {
            return Err(StoreError::Conflict(format!("user id {}", user.id)));
        }
        if t.by_email.contains_key(&user.email) {
            return Err(StoreError::Conflict(format!("email {}", user.email)));
        }
        if let Some(ref hash) = user.external_hash {
            if t.by_hash.contains_key(hash) {
                return Err(StoreError::Conflict("external hash".to_string()));
            }
            t.by_hash.insert(hash.clone(), user.id.clone());
        }
        t.by_email.insert(user.email.clone(), user.id.clone());
        t.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn find_user_by_id(&self, id: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.users.get(id).cloned())
    }

    async fn find_user_by_external_hash(&self, hash: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.by_hash.get(hash).and_then(|id| t.users.get(id)).cloned())
    }

    async fn find_user_by_email(&self, email: &str) -> Result<Option<User>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.by_email.get(email).and_then(|id| t.users.get(id)).cloned())
    }

    async fn set_external_hash(&self, user_id: &str, hash: &str) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        match t.by_hash.get(hash) {
            Some(owner) if owner != user_id => {
                return Err(StoreError::Conflict("external hash".to_string()));
            }
            _ => {}
        }
        let previous = match t.users.get_mut(user_id) {
            Some(user) => user.external_hash.replace(hash.to_string()),
            None => return Err(StoreError::NotFound(format!("user {}", user_id))),
        };
        if let Some(old) = previous {
            t.by_hash.remove(&old);
        }
        t.by_hash.insert(hash.to_string(), user_id.to_string());
        Ok(())
    }

    async fn touch_last_login(&self, user_id: &str, at: DateTime<Utc>) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        let user = t
            .users
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {}", user_id)))?;
        user.last_login = Some(at);
        Ok(())
    }
}

#[async_trait::async_trait]
impl ConversationStore for InMemoryStore {
    async fn insert_conversation(&self, conversation: &Conversation) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(&conversation.owner_id) {
            return Err(StoreError::NotFound(format!(
                "owner {}",
                conversation.owner_id
            )));
        }
        if t.conversations.contains_key(&conversation.id) {
            return Err(StoreError::Conflict(format!(
                "conversation id {}",
                conversation.id
            )));
        }
        t.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(())
    }

    async fn find_conversation(&self, id: &str) -> Result<Option<Conversation>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.conversations.get(id).cloned())
    }

    async fn list_conversations_for_user(
        &self,
        user_id: &str,
    ) -> Result<Vec<Conversation>, StoreError> {
        let t = self.tables.read().await;
        let mut out: Vec<Conversation> = t
            .conversations
            .values()
            .filter(|c| c.is_member(user_id))
            .cloned()
            .collect();
        out.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(out)
    }

    async fn delete_conversation(&self, id: &str) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        let existed = t.conversations.remove(id).is_some();
        t.messages.remove(id);
        Ok(existed)
    }

    async fn add_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if !t.users.contains_key(user_id) {
            return Err(StoreError::NotFound(format!("user {}", user_id)));
        }
        let conv = t
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", conversation_id)))?;
        if conv.participants.iter().any(|p| p == user_id) {
            return Err(StoreError::Conflict(format!("participant {}", user_id)));
        }
        conv.participants.push(user_id.to_string());
        Ok(())
    }

    async fn remove_participant(
        &self,
        conversation_id: &str,
        user_id: &str,
    ) -> Result<bool, StoreError> {
        let mut t = self.tables.write().await;
        let conv = t
            .conversations
            .get_mut(conversation_id)
            .ok_or_else(|| StoreError::NotFound(format!("conversation {}", conversation_id)))?;
        let before = conv.participants.len();
        conv.participants.retain(|p| p != user_id);
        Ok(conv.participants.len() != before)
    }
}

#[async_trait::async_trait]
impl MessageStore for InMemoryStore {
    async fn append_message(&self, message: &Message) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        if let Some(ref author) = message.author_user_id {
            if !t.users.contains_key(author) {
                return Err(StoreError::NotFound(format!("user {}", author)));
            }
        }
        let conv = t
            .conversations
            .get_mut(&message.conversation_id)
            .ok_or_else(|| {
                StoreError::NotFound(format!("conversation {}", message.conversation_id))
            })?;
        conv.last_activity = Utc::now();
        t.messages
            .entry(message.conversation_id.clone())
            .or_default()
            .push(message.clone());
        Ok(())
    }

    async fn find_messages_by_conversation(
        &self,
        conversation_id: &str,
    ) -> Result<Vec<Message>, StoreError> {
        let t = self.tables.read().await;
        let mut out = t.messages.get(conversation_id).cloned().unwrap_or_default();
        // Stable: insertion order survives on equal timestamps.
        out.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        Ok(out)
    }

    async fn count_messages(&self, conversation_id: &str) -> Result<usize, StoreError> {
        let t = self.tables.read().await;
        Ok(t.messages.get(conversation_id).map_or(0, Vec::len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat_types::Role;
    use chrono::TimeZone;

    fn message(conv: &str, author: Option<&str>, body: &str, secs: i64) -> Message {
        Message {
            id: format!("m-{}", body),
            conversation_id: conv.to_string(),
            author_user_id: author.map(str::to_string),
            body: body.to_string(),
            role: if author.is_some() { Role::User } else { Role::Assistant },
            timestamp: Utc.timestamp_opt(secs, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn email_and_hash_are_unique() {
        let store = InMemoryStore::new();
        let alice = User::new("alice", "alice@example.com").with_external_hash("h1");
        store.insert_user(&alice).await.unwrap();

        let dup_email = User::new("alice2", "alice@example.com");
        assert!(matches!(
            store.insert_user(&dup_email).await,
            Err(StoreError::Conflict(_))
        ));
        let dup_hash = User::new("bob", "bob@example.com").with_external_hash("h1");
        assert!(matches!(
            store.insert_user(&dup_hash).await,
            Err(StoreError::Conflict(_))
        ));

        let found = store.find_user_by_external_hash("h1").await.unwrap().unwrap();
        assert_eq!(found.id, alice.id);
    }

    #[tokio::test]
    async fn set_external_hash_backfills_and_indexes() {
        let store = InMemoryStore::new();
        let user = User::new("carol", "carol@example.com");
        store.insert_user(&user).await.unwrap();
        assert!(store.find_user_by_external_hash("hc").await.unwrap().is_none());

        store.set_external_hash(&user.id, "hc").await.unwrap();
        let found = store.find_user_by_external_hash("hc").await.unwrap().unwrap();
        assert_eq!(found.id, user.id);
        assert_eq!(found.external_hash.as_deref(), Some("hc"));
    }

    #[tokio::test]
    async fn append_touches_activity_and_orders_by_timestamp() {
        let store = InMemoryStore::new();
        let owner = User::new("dave", "dave@example.com");
        store.insert_user(&owner).await.unwrap();
        let conv = Conversation::new(&owner.id, "t");
        store.insert_conversation(&conv).await.unwrap();

        store
            .append_message(&message(&conv.id, Some(&owner.id), "second", 20))
            .await
            .unwrap();
        store
            .append_message(&message(&conv.id, None, "first", 10))
            .await
            .unwrap();

        let msgs = store.find_messages_by_conversation(&conv.id).await.unwrap();
        let bodies: Vec<_> = msgs.iter().map(|m| m.body.as_str()).collect();
        assert_eq!(bodies, vec!["first", "second"]);
        assert_eq!(store.count_messages(&conv.id).await.unwrap(), 2);

        let reloaded = store.find_conversation(&conv.id).await.unwrap().unwrap();
        assert!(reloaded.last_activity >= conv.last_activity);
    }

    #[tokio::test]
    async fn append_to_missing_conversation_is_not_found() {
        let store = InMemoryStore::new();
        let res = store.append_message(&message("nope", None, "x", 1)).await;
        assert!(matches!(res, Err(StoreError::NotFound(_))));
    }

    #[tokio::test]
    async fn delete_cascades_messages() {
        let store = InMemoryStore::new();
        let owner = User::new("erin", "erin@example.com");
        store.insert_user(&owner).await.unwrap();
        let conv = Conversation::new(&owner.id, "t");
        store.insert_conversation(&conv).await.unwrap();
        store
            .append_message(&message(&conv.id, None, "hello", 1))
            .await
            .unwrap();

        assert!(store.delete_conversation(&conv.id).await.unwrap());
        assert!(!store.delete_conversation(&conv.id).await.unwrap());
        assert!(store
            .find_messages_by_conversation(&conv.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn participants_widen_listing() {
        let store = InMemoryStore::new();
        let owner = User::new("fay", "fay@example.com");
        let guest = User::new("gus", "gus@example.com");
        store.insert_user(&owner).await.unwrap();
        store.insert_user(&guest).await.unwrap();
        let conv = Conversation::new(&owner.id, "shared");
        store.insert_conversation(&conv).await.unwrap();

        assert!(store
            .list_conversations_for_user(&guest.id)
            .await
            .unwrap()
            .is_empty());
        store.add_participant(&conv.id, &guest.id).await.unwrap();
        assert!(matches!(
            store.add_participant(&conv.id, &guest.id).await,
            Err(StoreError::Conflict(_))
        ));
        assert_eq!(
            store.list_conversations_for_user(&guest.id).await.unwrap().len(),
            1
        );
        assert!(store.remove_participant(&conv.id, &guest.id).await.unwrap());
        assert!(!store.remove_participant(&conv.id, &guest.id).await.unwrap());
    }
}
