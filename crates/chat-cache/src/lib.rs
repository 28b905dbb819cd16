//! Volatile cache backend and the cache-aside conversation memory projection.

mod conversation;
mod memory_cache;

pub use chat_types::{CacheError, ConversationMemory, VolatileCache};
pub use conversation::{CacheConfig, ConversationMemoryCache};
pub use memory_cache::InMemoryCache;
