//! Conversation turns.
//!
//! A [`Message`] is the unit both sent to the completion API and shown to the
//! player.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Role of the turn's author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Role instructions; exactly one, first in every session
    System,
    /// The other party: the player, or another NPC's speech
    User,
    /// The NPC itself
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::System => write!(f, "system"),
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// An immutable (role, content) pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

impl fmt::Display for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.role, self.content)
    }
}

impl From<&Message> for openai::Message {
    fn from(message: &Message) -> Self {
        let role = match message.role {
            Role::System => openai::Role::System,
            Role::User => openai::Role::User,
            Role::Assistant => openai::Role::Assistant,
        };
        openai::Message {
            role,
            content: message.content.clone(),
        }
    }
}

/// Who a displayed line is attributed to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Speaker {
    /// The human player
    User,
    /// An NPC, by display name
    Npc(String),
    /// System-visible notices (openers, recalled memories, end markers)
    Narrator,
}

impl Speaker {
    pub fn label(&self) -> &str {
        match self {
            Speaker::User => "User",
            Speaker::Npc(name) => name,
            Speaker::Narrator => "",
        }
    }
}

impl fmt::Display for Speaker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}
