//! Memory orchestration: resolve, authorize, persist, then sync the cache.

mod config;
mod service;

pub use chat_types::MemoryError;
pub use config::MemoryConfig;
pub use service::MemoryService;
