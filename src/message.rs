use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
        }
    }
}

/// Whether a message carries text or a generated-image reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
}

/// A single message in the conversation
///
/// Messages are immutable once appended, with one exception: the assistant's
/// streaming placeholder, whose content the dispatcher replaces as deltas
/// arrive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub content: String,
    pub kind: MessageKind,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>, kind: MessageKind) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            content: content.into(),
            kind,
        }
    }

    /// Create a user text message
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content, MessageKind::Text)
    }

    /// Create an assistant text message
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content, MessageKind::Text)
    }

    /// Create an assistant message holding an image reference
    pub fn assistant_image(reference: impl Into<String>) -> Self {
        Self::new(Role::Assistant, reference, MessageKind::Image)
    }

    /// Create a system text message
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content, MessageKind::Text)
    }
}
