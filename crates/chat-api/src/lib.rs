//! HTTP surface for conversation memory.

pub mod server;
