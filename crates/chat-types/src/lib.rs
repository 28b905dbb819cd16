//! Core types and traits for the conversation memory kernel.
//!
//! Entities are id-linked: a message holds its conversation's id, a conversation
//! holds its owner's id. No crate in the workspace keeps live object graphs.

mod dto;
mod entity;
mod error;
mod traits;

pub use dto::*;
pub use entity::*;
pub use error::*;
pub use traits::*;
