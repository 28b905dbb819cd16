//! Memory configuration from the environment.

use chat_cache::CacheConfig;
use chat_store::{DurableStore, TimeoutStore};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MemoryConfig {
    pub cache: CacheConfig,
    /// Bound on every durable call.
    pub store_timeout: Duration,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            cache: CacheConfig::default(),
            store_timeout: Duration::from_secs(5),
        }
    }
}

impl MemoryConfig {
    /// Read `CHAT_MEMORY_MAX_MESSAGES`, `CHAT_MEMORY_TTL_HOURS`,
    /// `CHAT_STORE_TIMEOUT_MS`, and `CHAT_CACHE_TIMEOUT_MS`.
    /// Unset or unparsable values keep their defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(n) = parse_var::<usize>(&lookup, "CHAT_MEMORY_MAX_MESSAGES") {
            config.cache.max_messages = n.max(1);
        }
        if let Some(h) = parse_var::<u64>(&lookup, "CHAT_MEMORY_TTL_HOURS") {
            config.cache.ttl = Duration::from_secs(h.max(1) * 3600);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "CHAT_STORE_TIMEOUT_MS") {
            config.store_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64>(&lookup, "CHAT_CACHE_TIMEOUT_MS") {
            config.cache.cache_timeout = Duration::from_millis(ms);
        }
        config
    }

    /// Wrap a durable store so every call honors `store_timeout`.
    pub fn bound_store<S>(&self, store: S) -> Arc<dyn DurableStore>
    where
        S: DurableStore + 'static,
    {
        Arc::new(TimeoutStore::new(store, self.store_timeout))
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            tracing::warn!(key, value = %raw, "ignoring unparsable config value");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults() {
        let c = MemoryConfig::from_lookup(|_| None);
        assert_eq!(c.cache.max_messages, 50);
        assert_eq!(c.cache.ttl, Duration::from_secs(24 * 3600));
        assert_eq!(c.store_timeout, Duration::from_millis(5000));
        assert_eq!(c.cache.cache_timeout, Duration::from_millis(500));
    }

    #[test]
    fn overrides_and_bad_values() {
        let env: HashMap<&str, &str> = [
            ("CHAT_MEMORY_MAX_MESSAGES", "2"),
            ("CHAT_MEMORY_TTL_HOURS", "abc"),
            ("CHAT_STORE_TIMEOUT_MS", " 250 "),
        ]
        .into_iter()
        .collect();
        let c = MemoryConfig::from_lookup(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(c.cache.max_messages, 2);
        assert_eq!(c.cache.ttl, Duration::from_secs(24 * 3600));
        assert_eq!(c.store_timeout, Duration::from_millis(250));
    }
}
