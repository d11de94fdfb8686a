//! Error types for the conversation engine.
//!
//! Transport problems never escape to the chat UI as errors: they are folded
//! into [`CompletionError::fallback_text`] and shown as if the NPC said them.
//! Validation problems (empty input, no open chat) are rejected at the
//! orchestrator boundary and never reach the network.

use crate::profile::NpcId;
use crate::session::SessionState;
use thiserror::Error;

/// Shown when the model answers without any usable choice.
pub const NO_RESPONSE_TEXT: &str = "No response";

/// Prefix shared by every degraded reply produced from a failed request.
pub const ERROR_PREFIX: &str = "Error:";

/// Problems with an NPC record, detected when it is registered.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ProfileError {
    #[error("NPC id must not be empty")]
    EmptyId,

    #[error("NPC {id} has an empty name")]
    EmptyName { id: String },

    #[error("NPC {id}: {dimension} = {value} is outside [0, 1]")]
    PersonalityOutOfRange {
        id: String,
        dimension: &'static str,
        value: f32,
    },

    #[error("NPC {0} is already registered")]
    Duplicate(String),
}

/// Failure classes of one completion request.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CompletionError {
    #[error("no usable API credential")]
    MissingCredential,

    #[error("transport failure: {0}")]
    TransportFailure(String),

    #[error("server returned status {status}: {message}")]
    ServerError { status: u16, message: String },

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl CompletionError {
    /// The degraded text the conversation shows in place of a real reply.
    pub fn fallback_text(&self) -> String {
        match self {
            CompletionError::MissingCredential => {
                format!("{ERROR_PREFIX} API key not configured. Please contact support.")
            }
            CompletionError::TransportFailure(_) => format!(
                "{ERROR_PREFIX} Unable to reach the language model. Please check your connection and try again."
            ),
            CompletionError::ServerError { status, .. } => format!(
                "{ERROR_PREFIX} API request failed with status {status}. Please check your API key and try again."
            ),
            CompletionError::MalformedResponse(_) => NO_RESPONSE_TEXT.to_string(),
        }
    }
}

impl From<openai::Error> for CompletionError {
    fn from(err: openai::Error) -> Self {
        match err {
            openai::Error::NoApiKey | openai::Error::Config(_) => CompletionError::MissingCredential,
            openai::Error::Network(msg) => CompletionError::TransportFailure(msg),
            openai::Error::Timeout(after) => {
                CompletionError::TransportFailure(format!("timed out after {after:?}"))
            }
            openai::Error::Api { status, message } => {
                CompletionError::ServerError { status, message }
            }
            openai::Error::Parse(msg) => CompletionError::MalformedResponse(msg),
        }
    }
}

/// Misuse of a single NPC's conversation session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("no active session")]
    NoActiveSession,

    #[error("cannot {operation} while session is {state:?}")]
    InvalidTransition {
        operation: &'static str,
        state: SessionState,
    },

    #[error("the system turn is fixed when the session starts")]
    SystemTurnRejected,
}

/// Errors surfaced by the dialogue orchestrator.
#[derive(Debug, Error)]
pub enum DialogueError {
    #[error("message is empty")]
    EmptyUserInput,

    #[error("no chat is open")]
    NoActiveSession,

    #[error("unknown NPC: {0}")]
    UnknownNpc(NpcId),

    #[error("NPC {0} is already in a conversation")]
    NpcBusy(NpcId),

    #[error("an NPC cannot hold a conversation with itself ({0})")]
    SameNpc(NpcId),

    #[error("no archived conversation at index {0}")]
    UnknownTranscript(usize),

    #[error("profile error: {0}")]
    Profile(#[from] ProfileError),

    #[error("session error: {0}")]
    Session(#[from] SessionError),
}

/// Errors reading or writing persisted memories.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
