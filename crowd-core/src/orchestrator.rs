//! DialogueOrchestrator - the primary public API of the conversation engine.
//!
//! Owns the NPC registry and one session per NPC, and runs the two supported
//! conversation shapes: the player chatting with a single NPC, and two NPCs
//! talking to each other. All methods take `&self`, so an orchestrator can be
//! shared behind an `Arc` and autonomous conversations spawned onto tasks.

use crate::archive::ArchiveStore;
use crate::autonomous::{AutonomousChat, AutonomousOutcome, LoopLimits};
use crate::completion::ChatCompletion;
use crate::config::DialogueConfig;
use crate::error::{DialogueError, SessionError};
use crate::events::{self, DialogueEvent, EventReceiver, GatewayCommand};
use crate::memory::MemoryBank;
use crate::message::{Role, Speaker};
use crate::profile::{NpcId, NpcProfile, NpcRegistry};
use crate::prompt::PromptCache;
use crate::session::{EndOutcome, SessionHandle, SessionServices, SessionState, TurnOutcome};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

/// Partner name used for the player.
pub const USER_PARTNER: &str = "User";

/// Shown when the player opens a chat with an NPC that remembers nothing.
pub const DEFAULT_OPENER: &str = "Let's start a conversation!";

/// Coordinates every conversation in the game.
pub struct DialogueOrchestrator {
    registry: RwLock<NpcRegistry>,
    sessions: RwLock<HashMap<NpcId, SessionHandle>>,
    services: Arc<SessionServices>,
    archive: ArchiveStore,
    config: DialogueConfig,
    user_chat: Mutex<Option<NpcId>>,
    cancel: CancellationToken,
}

impl DialogueOrchestrator {
    /// Create an orchestrator and the receiver its events arrive on.
    pub fn new(
        registry: NpcRegistry,
        completion: Arc<dyn ChatCompletion>,
        config: DialogueConfig,
    ) -> (Self, EventReceiver) {
        let memory = Arc::new(MemoryBank::new(config.max_memory_chars));
        Self::with_memory(registry, completion, memory, config)
    }

    /// Create an orchestrator over an existing memory bank.
    pub fn with_memory(
        registry: NpcRegistry,
        completion: Arc<dyn ChatCompletion>,
        memory: Arc<MemoryBank>,
        config: DialogueConfig,
    ) -> (Self, EventReceiver) {
        let (events, receiver) = events::channel();
        let services = Arc::new(SessionServices {
            completion,
            memory,
            prompts: Arc::new(PromptCache::new()),
            events,
            model: config.model.clone(),
            summary_model: config.summary_model.clone(),
        });

        let orchestrator = Self {
            registry: RwLock::new(registry),
            sessions: RwLock::new(HashMap::new()),
            services,
            archive: ArchiveStore::new(),
            config,
            user_chat: Mutex::new(None),
            cancel: CancellationToken::new(),
        };
        (orchestrator, receiver)
    }

    pub fn config(&self) -> &DialogueConfig {
        &self.config
    }

    pub fn memory(&self) -> &Arc<MemoryBank> {
        &self.services.memory
    }

    pub fn prompts(&self) -> &PromptCache {
        &self.services.prompts
    }

    pub fn archive(&self) -> &ArchiveStore {
        &self.archive
    }

    /// Profiles in roster order.
    pub fn npcs(&self) -> Vec<Arc<NpcProfile>> {
        self.read_registry().iter().cloned().collect()
    }

    /// NPC the player is currently chatting with.
    pub async fn active_chat(&self) -> Option<NpcId> {
        self.user_chat.lock().await.clone()
    }

    /// Session state of an NPC.
    pub async fn session_state(&self, npc: &NpcId) -> Result<SessionState, DialogueError> {
        Ok(self.session(npc)?.state().await)
    }

    /// The session handle of an NPC, created on first use.
    pub fn session(&self, npc: &NpcId) -> Result<SessionHandle, DialogueError> {
        if let Some(handle) = self.read_sessions().get(npc) {
            return Ok(handle.clone());
        }

        let profile = self
            .read_registry()
            .get(npc)
            .ok_or_else(|| DialogueError::UnknownNpc(npc.clone()))?;

        let mut sessions = self
            .sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let handle = sessions
            .entry(npc.clone())
            .or_insert_with(|| SessionHandle::new(profile, Arc::clone(&self.services)));
        Ok(handle.clone())
    }

    /// Add an NPC to the roster.
    pub fn register_npc(&self, profile: NpcProfile) -> Result<Arc<NpcProfile>, DialogueError> {
        let profile = self
            .registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .register(profile)?;
        tracing::info!(npc = %profile.id, name = %profile.name, "NPC registered");
        Ok(profile)
    }

    /// Remove an idle NPC, forgetting its cached prompt and memories.
    pub async fn retire_npc(&self, npc: &NpcId) -> Result<(), DialogueError> {
        if self.session_state(npc).await? != SessionState::Idle {
            return Err(DialogueError::NpcBusy(npc.clone()));
        }

        self.registry
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .retire(npc);
        self.sessions
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(npc);
        self.services.prompts.retire(npc);
        self.services.memory.retire(npc);
        tracing::info!(npc = %npc, "NPC retired");
        Ok(())
    }

    // ========================================================================
    // Player <-> NPC
    // ========================================================================

    /// Open a chat between the player and `npc`, closing any other open chat.
    ///
    /// Emits what the NPC remembers of the player, or a generic opener.
    pub async fn start_chat(&self, npc: &NpcId) -> Result<(), DialogueError> {
        let handle = self.session(npc)?;
        let mut user_chat = self.user_chat.lock().await;

        if user_chat.as_ref() == Some(npc) {
            if handle.state().await == SessionState::Active {
                tracing::debug!(npc = %npc, "chat already open");
                return Ok(());
            }
            *user_chat = None;
        }

        // The open chat survives a failed switch
        match handle.start(USER_PARTNER).await {
            Ok(()) => {}
            Err(SessionError::InvalidTransition { .. }) => {
                return Err(DialogueError::NpcBusy(npc.clone()));
            }
            Err(e) => return Err(e.into()),
        }

        if let Some(previous) = user_chat.replace(npc.clone()) {
            if let Ok(previous_handle) = self.session(&previous) {
                log_end(&previous, previous_handle.end().await);
            }
        }

        let opener = match self.services.memory.summary_for(npc, USER_PARTNER).await {
            Some(summary) => format!("**{}**: {summary}", handle.profile().name),
            None => DEFAULT_OPENER.to_string(),
        };
        events::emit_line(&self.services.events, Speaker::Narrator, opener);
        Ok(())
    }

    /// Forward a player line to the open chat.
    ///
    /// Blank input is rejected without touching the session or the network.
    pub async fn send_user_message(&self, text: &str) -> Result<TurnOutcome, DialogueError> {
        if text.trim().is_empty() {
            tracing::warn!("ignoring empty user message");
            events::emit(
                &self.services.events,
                DialogueEvent::Warning("Cannot send an empty message.".to_string()),
            );
            return Err(DialogueError::EmptyUserInput);
        }

        let npc = self
            .user_chat
            .lock()
            .await
            .clone()
            .ok_or(DialogueError::NoActiveSession)?;
        let handle = self.session(&npc)?;

        events::emit_line(&self.services.events, Speaker::User, text);
        let outcome = handle.send_turn(Role::User, text).await?;
        Ok(outcome)
    }

    /// Close the open chat, summarizing it into the NPC's memory.
    pub async fn end_chat(&self) -> Result<EndOutcome, DialogueError> {
        let npc = self
            .user_chat
            .lock()
            .await
            .take()
            .ok_or(DialogueError::NoActiveSession)?;

        let outcome = self.session(&npc)?.end().await?;
        log_end(&npc, Ok(outcome.clone()));
        Ok(outcome)
    }

    // ========================================================================
    // NPC <-> NPC
    // ========================================================================

    /// Run a conversation between two NPCs, `first` speaking `opener`.
    ///
    /// Resolves once both sessions have ended and the transcript is archived.
    pub async fn start_autonomous_chat(
        &self,
        first: &NpcId,
        second: &NpcId,
        opener: &str,
    ) -> Result<AutonomousOutcome, DialogueError> {
        if first == second {
            return Err(DialogueError::SameNpc(first.clone()));
        }
        if opener.trim().is_empty() {
            return Err(DialogueError::EmptyUserInput);
        }

        let first_handle = self.session(first)?;
        let second_handle = self.session(second)?;

        start_or_busy(&first_handle, &second_handle.profile().name).await?;
        if let Err(e) = start_or_busy(&second_handle, &first_handle.profile().name).await {
            log_end(first, first_handle.end().await);
            return Err(e);
        }
        tracing::info!(first = %first, second = %second, "autonomous conversation started");

        let chat = AutonomousChat {
            first: first_handle,
            second: second_handle,
            limits: LoopLimits {
                max_exchanges: self.config.max_exchanges,
                max_consecutive_failures: self.config.max_consecutive_failures.max(1),
                turn_delay: self.config.turn_delay,
            },
            events: self.services.events.clone(),
            cancel: self.cancel.child_token(),
        };

        let (transcript, exchanges, endings) = chat.run(opener).await;
        let status = transcript.status;
        let archive_index = self.archive.push(transcript);

        Ok(AutonomousOutcome {
            status,
            exchanges,
            archive_index,
            endings,
        })
    }

    /// Re-emit an archived conversation, line by line. Returns the line count.
    pub fn replay_transcript(&self, index: usize) -> Result<usize, DialogueError> {
        let transcript = self
            .archive
            .get(index)
            .ok_or(DialogueError::UnknownTranscript(index))?;

        for entry in &transcript.entries {
            events::emit_line(
                &self.services.events,
                Speaker::Npc(entry.speaker.clone()),
                entry.text.clone(),
            );
        }
        Ok(transcript.entries.len())
    }

    // ========================================================================
    // Gateway
    // ========================================================================

    /// Apply a command from the presentation layer.
    pub async fn handle(&self, command: GatewayCommand) -> Result<(), DialogueError> {
        match command {
            GatewayCommand::UserMessageSubmitted(text) => {
                self.send_user_message(&text).await?;
            }
            GatewayCommand::ChatOpened(npc) => self.start_chat(&npc).await?,
            GatewayCommand::ChatClosed => {
                self.end_chat().await?;
            }
            GatewayCommand::AutonomousChatRequested {
                first,
                second,
                opener,
            } => {
                self.start_autonomous_chat(&first, &second, &opener).await?;
            }
        }
        Ok(())
    }

    /// Stop every running autonomous conversation and close the player's chat.
    ///
    /// Cancelled conversations still end (and summarize) both sessions.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down dialogue orchestrator");
        self.cancel.cancel();

        match self.end_chat().await {
            Ok(_) | Err(DialogueError::NoActiveSession) => {}
            Err(e) => tracing::warn!(error = %e, "failed to close player chat on shutdown"),
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    fn read_registry(&self) -> std::sync::RwLockReadGuard<'_, NpcRegistry> {
        self.registry
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read_sessions(&self) -> std::sync::RwLockReadGuard<'_, HashMap<NpcId, SessionHandle>> {
        self.sessions
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

async fn start_or_busy(handle: &SessionHandle, partner: &str) -> Result<(), DialogueError> {
    match handle.start(partner).await {
        Ok(()) => Ok(()),
        Err(SessionError::InvalidTransition { .. }) => {
            Err(DialogueError::NpcBusy(handle.profile().id.clone()))
        }
        Err(e) => Err(e.into()),
    }
}

fn log_end(npc: &NpcId, outcome: Result<EndOutcome, SessionError>) {
    match outcome {
        Ok(EndOutcome::Skipped) => tracing::debug!(npc = %npc, "chat ended without summary"),
        Ok(EndOutcome::Summarized(_)) => tracing::info!(npc = %npc, "chat ended and summarized"),
        Ok(EndOutcome::SummarizationFailed(e)) => {
            tracing::warn!(npc = %npc, error = %e, "chat ended, summary lost")
        }
        Err(e) => tracing::warn!(npc = %npc, error = %e, "could not end chat"),
    }
}
