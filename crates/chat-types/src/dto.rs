//! Request and response DTOs for the HTTP surface.

use crate::{Conversation, ConversationMemory, Message, User};
use serde::{Deserialize, Serialize};

/// Explicit registration request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterUserRequest {
    pub username: String,
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateConversationRequest {
    #[serde(default = "default_title")]
    pub title: String,
}

fn default_title() -> String {
    "New conversation".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShareConversationRequest {
    pub user_id: String,
}

/// A user-authored message; the author is the caller resolved from the token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PostMessageRequest {
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatRequest {
    pub prompt: String,
}

/// Per-conversation capacity of the cached projection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SetCapacityRequest {
    pub max_messages: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LastMessagesQuery {
    #[serde(default = "default_count")]
    pub count: usize,
}

fn default_count() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatReply {
    pub reply: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryData {
    pub history: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExistsData {
    pub exists: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemovedData {
    pub removed: bool,
}

/// Durable message count of a conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CountData {
    pub count: usize,
}

/// Base response envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BaseResponse<T> {
    #[serde(default = "default_code")]
    pub code: u16,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

fn default_code() -> u16 {
    200
}

impl<T> BaseResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            code: 200,
            message: "Success".to_string(),
            data: Some(data),
        }
    }

    pub fn error(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            data: None,
        }
    }
}

pub type UserResponse = BaseResponse<User>;
pub type ConversationResponse = BaseResponse<Conversation>;
pub type ConversationListResponse = BaseResponse<Vec<Conversation>>;
pub type MessageResponse = BaseResponse<Message>;
pub type MessageListResponse = BaseResponse<Vec<Message>>;
pub type MemoryResponse = BaseResponse<ConversationMemory>;
