//! Conversation engine for NPC dialogue.
//!
//! This crate provides:
//! - NPC profiles and system prompts derived from their personality
//! - Per-NPC conversation sessions with summarize-and-carry-forward memory
//! - Player-to-NPC chats and autonomous NPC-to-NPC conversations
//! - An archive of finished NPC-to-NPC transcripts
//!
//! # Quick Start
//!
//! ```ignore
//! use crowd_core::{
//!     ChatCompletionClient, DialogueConfig, DialogueOrchestrator, EnvCredentialProvider,
//!     NpcId, NpcRegistry,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let roster: Vec<crowd_core::NpcProfile> = serde_json::from_str(&std::fs::read_to_string("npcs.json")?)?;
//!     let registry = NpcRegistry::from_profiles(roster)?;
//!
//!     let config = DialogueConfig::from_env();
//!     let client = ChatCompletionClient::from_config(&config, Arc::new(EnvCredentialProvider::new()));
//!     let (dialogue, mut events) = DialogueOrchestrator::new(registry, Arc::new(client), config);
//!
//!     dialogue.start_chat(&NpcId::new("npc_1")).await?;
//!     dialogue.send_user_message("Good morning!").await?;
//!     dialogue.end_chat().await?;
//!
//!     while let Ok(event) = events.try_recv() {
//!         println!("{event:?}");
//!     }
//!     Ok(())
//! }
//! ```

pub mod archive;
pub mod autonomous;
pub mod completion;
pub mod config;
pub mod credential;
pub mod error;
pub mod events;
pub mod memory;
pub mod message;
pub mod orchestrator;
pub mod profile;
pub mod prompt;
pub mod session;
pub mod testing;

// Primary public API
pub use archive::{ArchiveStore, LoopStatus, Transcript, TranscriptEntry};
pub use autonomous::AutonomousOutcome;
pub use completion::{ChatCompletion, ChatCompletionClient};
pub use config::DialogueConfig;
pub use credential::{CredentialProvider, EnvCredentialProvider, StaticCredentialProvider};
pub use error::{CompletionError, DialogueError, PersistError, ProfileError, SessionError};
pub use events::{DialogueEvent, EventReceiver, GatewayCommand};
pub use memory::{ConversationMemory, MemoryBank};
pub use message::{Message, Role, Speaker};
pub use orchestrator::DialogueOrchestrator;
pub use profile::{Appearance, NpcId, NpcProfile, NpcRegistry, Personality};
pub use prompt::{build_system_prompt, PromptCache};
pub use session::{ConversationSession, EndOutcome, Reply, SessionHandle, SessionState, TurnOutcome};
pub use testing::{MockCompletion, TestHarness};
