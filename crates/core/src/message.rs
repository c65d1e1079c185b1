use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Who authored a message on the router.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Role {
    Interviewer,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Interviewer => "Interviewer",
            Role::User => "User",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageType {
    Conversation,
    /// The user declines the current question; fans out like conversation.
    Skip,
    /// Positive feedback on the previous message; recorded, never fanned out.
    Like,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub role: Role,
    pub kind: MessageType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn conversation(role: Role, content: impl Into<String>) -> Self {
        Self::new(role, MessageType::Conversation, content.into())
    }

    /// Skip and like messages carry fixed content.
    pub fn skip(role: Role) -> Self {
        Self::new(role, MessageType::Skip, "Skip the question".to_string())
    }

    pub fn like(role: Role) -> Self {
        Self::new(role, MessageType::Like, "Like the question".to_string())
    }

    fn new(role: Role, kind: MessageType, content: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            role,
            kind,
            content,
            timestamp: Utc::now(),
        }
    }
}
