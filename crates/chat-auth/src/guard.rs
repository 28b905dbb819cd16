//! Conversation membership check.

use chat_types::{DurableStore, StoreError, User};
use std::sync::Arc;

/// Grants access to a conversation's owner and its participants.
///
/// Every failure path answers `false`: an unknown user, an unknown
/// conversation, and a store fault all deny without leaking which one it was.
pub struct AccessGuard {
    store: Arc<dyn DurableStore>,
}

impl AccessGuard {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// `user_ref` is a local user id or, for older callers, an external hash.
    pub async fn has_access(&self, user_ref: &str, conversation_id: &str) -> bool {
        match self.check(user_ref, conversation_id).await {
            Ok(allowed) => {
                if !allowed {
                    tracing::debug!(conversation_id = %conversation_id, "access denied");
                }
                allowed
            }
            Err(e) => {
                tracing::error!(conversation_id = %conversation_id, error = %e, "access check failed, denying");
                false
            }
        }
    }

    async fn check(&self, user_ref: &str, conversation_id: &str) -> Result<bool, StoreError> {
        let Some(user) = self.resolve_user(user_ref).await? else {
            return Ok(false);
        };
        let conversation = self.store.find_conversation(conversation_id).await?;
        Ok(conversation.is_some_and(|c| c.is_member(&user.id)))
    }

    /// Lookup by id, then by external hash.
    pub async fn resolve_user(&self, user_ref: &str) -> Result<Option<User>, StoreError> {
        if let Some(user) = self.store.find_user_by_id(user_ref).await? {
            return Ok(Some(user));
        }
        self.store.find_user_by_external_hash(user_ref).await
    }
}
