//! Durable entities and the cached conversation projection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local user record. `external_hash` links it to the external identity system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_hash: Option<String>,
    pub username: String,
    pub email: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_login: Option<DateTime<Utc>>,
}

impl User {
    /// New unsaved user with a fresh id.
    pub fn new(username: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            external_hash: None,
            username: username.into(),
            email: email.into(),
            created_at: Utc::now(),
            last_login: None,
        }
    }

    pub fn with_external_hash(mut self, hash: impl Into<String>) -> Self {
        self.external_hash = Some(hash.into());
        self
    }
}

/// A conversation owned by one user, optionally shared with participants.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub owner_id: String,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    /// User ids granted access besides the owner.
    #[serde(default)]
    pub participants: Vec<String>,
}

impl Conversation {
    pub fn new(owner_id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            owner_id: owner_id.into(),
            title: title.into(),
            created_at: now,
            last_activity: now,
            participants: Vec::new(),
        }
    }

    pub fn is_owner(&self, user_id: &str) -> bool {
        self.owner_id == user_id
    }

    /// Owner or registered participant.
    pub fn is_member(&self, user_id: &str) -> bool {
        self.is_owner(user_id) || self.participants.iter().any(|p| p == user_id)
    }
}

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }

    /// Label used when rendering history for the generator.
    pub fn label(self) -> &'static str {
        match self {
            Role::User => "User",
            Role::Assistant => "Assistant",
            Role::System => "System",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "user" => Some(Role::User),
            "assistant" => Some(Role::Assistant),
            "system" => Some(Role::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A committed message. `author_user_id` is set iff `role == Role::User`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author_user_id: Option<String>,
    pub body: String,
    pub role: Role,
    pub timestamp: DateTime<Utc>,
}

/// Message as submitted by a caller, before authorization and persistence.
///
/// `author` may carry either a local user id or an external hash; the
/// orchestrator resolves it to a user id before commit.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: String,
    pub author: Option<String>,
    pub body: String,
    pub role: Role,
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewMessage {
    pub fn user(
        conversation_id: impl Into<String>,
        author: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            author: Some(author.into()),
            body: body.into(),
            role: Role::User,
            timestamp: None,
        }
    }

    pub fn assistant(conversation_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            author: None,
            body: body.into(),
            role: Role::Assistant,
            timestamp: None,
        }
    }

    pub fn system(conversation_id: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            ..Self::assistant(conversation_id, body)
        }
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}

/// Cached projection of a conversation: the most recent `max_messages`
/// messages in timestamp-ascending order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMemory {
    pub conversation_id: String,
    pub owner_id: String,
    pub messages: Vec<Message>,
    pub last_activity: DateTime<Utc>,
    pub max_messages: usize,
}

impl ConversationMemory {
    /// Build a projection from the durable message list, keeping only the tail.
    pub fn from_durable(
        conversation: &Conversation,
        mut messages: Vec<Message>,
        max_messages: usize,
    ) -> Self {
        messages.sort_by(|a, b| a.timestamp.cmp(&b.timestamp));
        let mut memory = Self {
            conversation_id: conversation.id.clone(),
            owner_id: conversation.owner_id.clone(),
            messages,
            last_activity: conversation.last_activity,
            max_messages,
        };
        memory.trim();
        memory
    }

    /// Insert a committed message in timestamp order, dropping the oldest
    /// entries past capacity. Returns false if the message is already present.
    pub fn push(&mut self, message: Message) -> bool {
        if self.messages.iter().any(|m| m.id == message.id) {
            return false;
        }
        if message.timestamp > self.last_activity {
            self.last_activity = message.timestamp;
        }
        let idx = self
            .messages
            .partition_point(|m| m.timestamp <= message.timestamp);
        self.messages.insert(idx, message);
        self.trim();
        true
    }

    /// Change the capacity of this projection and drop the oldest overflow.
    /// A capacity of zero is raised to one.
    pub fn set_max_messages(&mut self, max_messages: usize) {
        self.max_messages = max_messages.max(1);
        self.trim();
    }

    fn trim(&mut self) {
        if self.messages.len() > self.max_messages {
            let excess = self.messages.len() - self.max_messages;
            self.messages.drain(..excess);
        }
    }

    pub fn message_count(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Last `count` messages, oldest first.
    pub fn last_messages(&self, count: usize) -> Vec<Message> {
        let start = self.messages.len().saturating_sub(count);
        self.messages[start..].to_vec()
    }

    /// Render as `Label: body` lines for the text generator.
    pub fn history(&self) -> String {
        self.messages
            .iter()
            .map(|m| format!("{}: {}", m.role.label(), m.body))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Identity claims carried by the bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    pub external_hash: String,
    pub email: String,
}

impl TokenClaims {
    /// Username derived from the email local-part.
    pub fn username(&self) -> &str {
        self.email.split('@').next().unwrap_or(&self.email)
    }
}
