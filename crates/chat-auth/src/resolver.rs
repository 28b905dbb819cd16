//! Maps token claims to exactly one durable user, creating it on first sight.

use crate::token::parse_claims;
use chat_types::{DurableStore, MemoryError, StoreError, TokenClaims, User};
use chrono::Utc;
use std::sync::Arc;

pub struct IdentityResolver {
    store: Arc<dyn DurableStore>,
}

impl IdentityResolver {
    pub fn new(store: Arc<dyn DurableStore>) -> Self {
        Self { store }
    }

    /// Parse the bearer token and resolve its claims to a user.
    pub async fn resolve_identity(&self, token: &str) -> Result<User, MemoryError> {
        let claims = parse_claims(token)?;
        self.resolve_claims(&claims).await
    }

    /// Lookup by external hash, then by email (backfilling the hash), then
    /// create. Losing an insert race retries the hash lookup once.
    pub async fn resolve_claims(&self, claims: &TokenClaims) -> Result<User, MemoryError> {
        let mut user = self.find_or_create(claims).await?;
        let now = Utc::now();
        match self.store.touch_last_login(&user.id, now).await {
            Ok(()) => user.last_login = Some(now),
            Err(e) => tracing::warn!(user_id = %user.id, error = %e, "failed to record login"),
        }
        Ok(user)
    }

    async fn find_or_create(&self, claims: &TokenClaims) -> Result<User, MemoryError> {
        if let Some(user) = self
            .store
            .find_user_by_external_hash(&claims.external_hash)
            .await?
        {
            return Ok(user);
        }

        if let Some(mut user) = self.store.find_user_by_email(&claims.email).await? {
            if let Some(previous) = user
                .external_hash
                .as_deref()
                .filter(|h| *h != claims.external_hash)
            {
                tracing::warn!(user_id = %user.id, previous, "relinking user to a new external hash");
            }
            return match self
                .store
                .set_external_hash(&user.id, &claims.external_hash)
                .await
            {
                Ok(()) => {
                    tracing::info!(user_id = %user.id, "external hash backfilled");
                    user.external_hash = Some(claims.external_hash.clone());
                    Ok(user)
                }
                Err(StoreError::Conflict(_)) => self.retry_hash_lookup(claims).await,
                Err(e) => Err(e.into()),
            };
        }

        let user = User::new(claims.username(), &claims.email)
            .with_external_hash(&claims.external_hash);
        match self.store.insert_user(&user).await {
            Ok(()) => {
                tracing::info!(user_id = %user.id, username = %user.username, "user created on first sight");
                Ok(user)
            }
            Err(StoreError::Conflict(_)) => self.retry_hash_lookup(claims).await,
            Err(e) => Err(e.into()),
        }
    }

    async fn retry_hash_lookup(&self, claims: &TokenClaims) -> Result<User, MemoryError> {
        tracing::debug!(email = %claims.email, "identity insert lost a race, retrying lookup");
        self.store
            .find_user_by_external_hash(&claims.external_hash)
            .await?
            .ok_or_else(|| MemoryError::UserAlreadyExists(claims.email.clone()))
    }

    /// Explicit registration. A taken email fails `UserAlreadyExists`.
    pub async fn register_user(&self, username: &str, email: &str) -> Result<User, MemoryError> {
        let email = email.trim();
        if self.store.find_user_by_email(email).await?.is_some() {
            return Err(MemoryError::UserAlreadyExists(email.to_string()));
        }
        let user = User::new(username.trim(), email);
        match self.store.insert_user(&user).await {
            Ok(()) => Ok(user),
            Err(StoreError::Conflict(_)) => Err(MemoryError::UserAlreadyExists(email.to_string())),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use chat_store::InMemoryStore;
    use chat_types::UserStore;

    fn token(hash: &str, email: &str) -> String {
        let payload = format!(r#"{{"c_hash":"{}","email":"{}"}}"#, hash, email);
        format!("h.{}.s", URL_SAFE_NO_PAD.encode(payload))
    }

    fn resolver() -> (Arc<InMemoryStore>, IdentityResolver) {
        let store = Arc::new(InMemoryStore::new());
        (store.clone(), IdentityResolver::new(store))
    }

    #[tokio::test]
    async fn resolution_is_idempotent() {
        let (store, resolver) = resolver();
        let first = resolver.resolve_identity(&token("h1", "ann@x.io")).await.unwrap();
        assert_eq!(first.username, "ann");
        assert_eq!(first.external_hash.as_deref(), Some("h1"));
        assert!(first.last_login.is_some());

        for _ in 0..5 {
            let again = resolver.resolve_identity(&token("h1", "ann@x.io")).await.unwrap();
            assert_eq!(again.id, first.id);
        }
        let stored = store.find_user_by_email("ann@x.io").await.unwrap().unwrap();
        assert_eq!(stored.id, first.id);
    }

    #[tokio::test]
    async fn backfills_hash_on_email_match() {
        let (store, resolver) = resolver();
        let registered = resolver.register_user("bob", "bob@x.io").await.unwrap();
        assert!(registered.external_hash.is_none());

        let resolved = resolver.resolve_identity(&token("h2", "bob@x.io")).await.unwrap();
        assert_eq!(resolved.id, registered.id);
        assert_eq!(resolved.username, "bob");
        let by_hash = store.find_user_by_external_hash("h2").await.unwrap().unwrap();
        assert_eq!(by_hash.id, registered.id);
    }

    #[tokio::test]
    async fn malformed_token_is_invalid() {
        let (_, resolver) = resolver();
        let err = resolver.resolve_identity("garbage").await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidToken(_)));
        let err = resolver
            .resolve_identity(&format!("h.{}.s", URL_SAFE_NO_PAD.encode(r#"{"c_hash":"h"}"#)))
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidToken(_)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_first_sight_creates_one_user() {
        let (store, resolver) = resolver();
        let resolver = Arc::new(resolver);
        let tok = token("h3", "cat@x.io");

        let mut handles = Vec::new();
        for _ in 0..8 {
            let resolver = resolver.clone();
            let tok = tok.clone();
            handles.push(tokio::spawn(async move {
                resolver.resolve_identity(&tok).await
            }));
        }
        let mut ids = Vec::new();
        for h in handles {
            ids.push(h.await.unwrap().unwrap().id);
        }
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(store.user_count().await, 1);
    }

    #[tokio::test]
    async fn lost_race_without_winner_hash_is_already_exists() {
        let (store, resolver) = resolver();
        // Email owner appears between the email lookup and the insert.
        let racer = User::new("dan", "dan@x.io").with_external_hash("other");
        store.insert_user(&racer).await.unwrap();
        let claims = TokenClaims {
            external_hash: "h4".to_string(),
            email: "dan@x.io".to_string(),
        };
        let user = User::new(claims.username(), &claims.email).with_external_hash("h4");
        assert!(matches!(
            store.insert_user(&user).await,
            Err(StoreError::Conflict(_))
        ));
        let err = resolver.retry_hash_lookup(&claims).await.unwrap_err();
        assert!(matches!(err, MemoryError::UserAlreadyExists(_)));
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let (_, resolver) = resolver();
        resolver.register_user("eve", "eve@x.io").await.unwrap();
        let err = resolver.register_user("eve2", "eve@x.io").await.unwrap_err();
        assert!(matches!(err, MemoryError::UserAlreadyExists(_)));
        // Usernames need not be unique.
        resolver.register_user("eve", "eve.other@x.io").await.unwrap();
    }
}
