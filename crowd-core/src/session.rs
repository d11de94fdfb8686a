//! Per-NPC conversation sessions.
//!
//! [`ConversationSession`] is the synchronous state machine
//! (`Idle -> Active -> Summarizing -> Idle`). [`SessionHandle`] drives it
//! asynchronously against the completion client without ever holding the
//! session lock across a network call. Every transition out of `Active` bumps
//! the session generation, so a reply that was in flight when the chat ended
//! is recognised as stale and dropped.

use crate::completion::ChatCompletion;
use crate::error::{CompletionError, SessionError, ERROR_PREFIX};
use crate::events::{self, DialogueEvent, EventSender};
use crate::memory::MemoryBank;
use crate::message::{Message, Role, Speaker};
use crate::profile::{NpcId, NpcProfile};
use crate::prompt::PromptCache;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Instruction sent with every end-of-chat summarization request.
pub const SUMMARY_INSTRUCTION: &str = "Summarize the following conversation in 2-3 sentences. Keep only important context that will help continue the discussion later.";

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Active,
    Summarizing,
}

/// Turns that must be summarized once the session leaves `Active`.
#[derive(Debug, Clone, PartialEq)]
pub enum EndPlan {
    /// Too little was said; the session is already back to `Idle`.
    Skip { partner: String },
    /// The session is `Summarizing`; call [`ConversationSession::finish_end`]
    /// once the summary request settles.
    Summarize {
        partner: String,
        turns: Vec<Message>,
    },
}

/// A completion request captured from the session at a given generation.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingTurn {
    pub generation: u64,
    pub messages: Vec<Message>,
}

/// Ephemeral state of one chat for one NPC.
#[derive(Debug, Clone)]
pub struct ConversationSession {
    npc: NpcId,
    state: SessionState,
    partner: Option<String>,
    turns: Vec<Message>,
    generation: u64,
}

impl ConversationSession {
    pub fn new(npc: NpcId) -> Self {
        Self {
            npc,
            state: SessionState::Idle,
            partner: None,
            turns: Vec::new(),
            generation: 0,
        }
    }

    pub fn npc(&self) -> &NpcId {
        &self.npc
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn partner(&self) -> Option<&str> {
        self.partner.as_deref()
    }

    pub fn turns(&self) -> &[Message] {
        &self.turns
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Open a chat with `partner`. The system turn is the NPC's prompt
    /// followed by what it remembers about this partner, if anything.
    pub fn start(
        &mut self,
        partner: impl Into<String>,
        system_prompt: &str,
        memory: Option<&str>,
    ) -> Result<(), SessionError> {
        self.require(SessionState::Idle, "start")?;
        let partner = partner.into();

        let mut system = system_prompt.to_string();
        if let Some(memory) = memory.filter(|m| !m.trim().is_empty()) {
            system.push_str(&format!(
                "\n### Past conversations ###\nCharacter = **{partner}**: {memory}\n"
            ));
        }

        self.turns.clear();
        self.turns.push(Message::system(system));
        self.partner = Some(partner);
        self.state = SessionState::Active;
        Ok(())
    }

    /// Append a turn. A user turn yields the request that must be completed
    /// and applied with [`apply_reply`](Self::apply_reply).
    pub fn push_turn(
        &mut self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<Option<PendingTurn>, SessionError> {
        self.require(SessionState::Active, "send a turn")?;
        match role {
            Role::System => Err(SessionError::SystemTurnRejected),
            Role::Assistant => {
                self.turns.push(Message::assistant(content));
                Ok(None)
            }
            Role::User => {
                self.turns.push(Message::user(content));
                Ok(Some(PendingTurn {
                    generation: self.generation,
                    messages: self.turns.clone(),
                }))
            }
        }
    }

    /// Append a user-side turn without requesting a reply.
    pub fn add_note(&mut self, content: impl Into<String>) -> Result<(), SessionError> {
        self.require(SessionState::Active, "add a note")?;
        self.turns.push(Message::user(content));
        Ok(())
    }

    /// Append the reply to a pending turn. Returns `false`, leaving the
    /// session untouched, when the session has moved on since the request.
    pub fn apply_reply(&mut self, generation: u64, text: impl Into<String>) -> bool {
        if generation != self.generation || self.state != SessionState::Active {
            return false;
        }
        self.turns.push(Message::assistant(text));
        true
    }

    /// Content of the latest turn, or empty while only the system turn exists.
    pub fn last_message(&self) -> &str {
        if self.turns.len() < 2 {
            return "";
        }
        self.turns
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }

    /// Turns other than the system turn.
    pub fn exchange_len(&self) -> usize {
        self.turns.iter().filter(|m| m.role != Role::System).count()
    }

    /// Leave `Active`. Short chats go straight back to `Idle`.
    pub fn begin_end(&mut self) -> Result<EndPlan, SessionError> {
        self.require(SessionState::Active, "end")?;
        self.generation += 1;

        let partner = self.partner.clone().unwrap_or_default();
        if self.exchange_len() < 2 {
            self.reset();
            return Ok(EndPlan::Skip { partner });
        }

        self.state = SessionState::Summarizing;
        let turns = self
            .turns
            .iter()
            .filter(|m| m.role != Role::System)
            .cloned()
            .collect();
        Ok(EndPlan::Summarize { partner, turns })
    }

    /// Clear the history and return to `Idle` after summarization.
    pub fn finish_end(&mut self) {
        self.reset();
    }

    fn reset(&mut self) {
        self.turns.clear();
        self.partner = None;
        self.state = SessionState::Idle;
    }

    fn require(&self, state: SessionState, operation: &'static str) -> Result<(), SessionError> {
        if self.state == state {
            return Ok(());
        }
        if state == SessionState::Active && self.state == SessionState::Idle {
            return Err(SessionError::NoActiveSession);
        }
        Err(SessionError::InvalidTransition {
            operation,
            state: self.state,
        })
    }
}

/// Messages for an end-of-chat summary request (system turn excluded).
pub fn summarization_request(turns: &[Message]) -> Vec<Message> {
    let transcript = turns
        .iter()
        .filter(|m| m.role != Role::System)
        .map(|m| match m.role {
            Role::Assistant => format!("Assistant: {}", m.content),
            _ => format!("User: {}", m.content),
        })
        .collect::<Vec<_>>()
        .join("\n");

    vec![Message::system(SUMMARY_INSTRUCTION), Message::user(transcript)]
}

/// What came back for a user turn.
#[derive(Debug, Clone, PartialEq)]
pub struct Reply {
    /// Text appended to the history: the model's answer or the fallback.
    pub text: String,
    /// Set when `text` is a fallback.
    pub error: Option<CompletionError>,
}

impl Reply {
    /// Whether this turn should count as a failed answer.
    pub fn is_failure(&self) -> bool {
        self.error.is_some() || self.text.trim().is_empty() || self.text.starts_with(ERROR_PREFIX)
    }
}

/// Result of [`SessionHandle::send_turn`].
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// Appended without asking the model.
    Recorded,
    /// The model (or its fallback) answered and the answer was appended.
    Replied(Reply),
    /// The session ended while the request was in flight; nothing appended.
    Discarded,
}

/// Result of ending a session.
#[derive(Debug, Clone, PartialEq)]
pub enum EndOutcome {
    /// Fewer than two exchanged turns; nothing to remember.
    Skipped,
    /// The summary appended to memory.
    Summarized(String),
    /// The chat ended but memory was left unchanged.
    SummarizationFailed(CompletionError),
}

/// Shared collaborators of every session.
pub struct SessionServices {
    pub completion: Arc<dyn ChatCompletion>,
    pub memory: Arc<MemoryBank>,
    pub prompts: Arc<PromptCache>,
    pub events: EventSender,
    pub model: String,
    pub summary_model: String,
}

/// Async driver for one NPC's session.
#[derive(Clone)]
pub struct SessionHandle {
    profile: Arc<NpcProfile>,
    session: Arc<Mutex<ConversationSession>>,
    /// Held for a whole turn so at most one completion is in flight.
    turn_gate: Arc<Mutex<()>>,
    services: Arc<SessionServices>,
}

impl SessionHandle {
    pub fn new(profile: Arc<NpcProfile>, services: Arc<SessionServices>) -> Self {
        let session = ConversationSession::new(profile.id.clone());
        Self {
            profile,
            session: Arc::new(Mutex::new(session)),
            turn_gate: Arc::new(Mutex::new(())),
            services,
        }
    }

    pub fn profile(&self) -> &Arc<NpcProfile> {
        &self.profile
    }

    pub async fn state(&self) -> SessionState {
        self.session.lock().await.state()
    }

    pub async fn partner(&self) -> Option<String> {
        self.session.lock().await.partner().map(str::to_string)
    }

    pub async fn last_message(&self) -> String {
        self.session.lock().await.last_message().to_string()
    }

    /// Copy of the current turn sequence.
    pub async fn turns(&self) -> Vec<Message> {
        self.session.lock().await.turns().to_vec()
    }

    /// Open a chat with `partner`, recalling what this NPC remembers of them.
    pub async fn start(&self, partner: &str) -> Result<(), SessionError> {
        let prompt = self.services.prompts.get_or_build(&self.profile);
        let memory = self
            .services
            .memory
            .summary_for(&self.profile.id, partner)
            .await;

        self.session
            .lock()
            .await
            .start(partner, &prompt, memory.as_deref())?;
        tracing::info!(npc = %self.profile.id, partner, recalled = memory.is_some(), "session started");
        Ok(())
    }

    pub async fn add_note(&self, content: impl Into<String>) -> Result<(), SessionError> {
        self.session.lock().await.add_note(content)
    }

    /// Append a turn; user turns get exactly one completion whose text (or
    /// fallback) is appended and emitted as this NPC's line.
    ///
    /// Turns are serialized: a second caller waits until the first reply has
    /// been applied. [`end`](Self::end) does not wait, so a chat can still be
    /// closed while a reply is in flight.
    pub async fn send_turn(
        &self,
        role: Role,
        content: impl Into<String>,
    ) -> Result<TurnOutcome, SessionError> {
        let _turn = self.turn_gate.lock().await;
        let pending = self.session.lock().await.push_turn(role, content)?;
        let Some(pending) = pending else {
            return Ok(TurnOutcome::Recorded);
        };

        let result = self
            .services
            .completion
            .complete(&pending.messages, &self.services.model)
            .await;

        let reply = match result {
            Ok(text) => Reply { text, error: None },
            Err(err) => {
                tracing::warn!(npc = %self.profile.id, error = %err, "completion failed, using fallback text");
                Reply {
                    text: err.fallback_text(),
                    error: Some(err),
                }
            }
        };

        let applied = self
            .session
            .lock()
            .await
            .apply_reply(pending.generation, reply.text.clone());
        if !applied {
            tracing::debug!(npc = %self.profile.id, "discarding reply for an ended session");
            return Ok(TurnOutcome::Discarded);
        }

        events::emit_line(
            &self.services.events,
            Speaker::Npc(self.profile.name.clone()),
            reply.text.clone(),
        );
        Ok(TurnOutcome::Replied(reply))
    }

    /// End the chat, summarizing it into memory when anything was said.
    pub async fn end(&self) -> Result<EndOutcome, SessionError> {
        let plan = self.session.lock().await.begin_end()?;

        let outcome = match plan {
            EndPlan::Skip { partner } => {
                tracing::debug!(npc = %self.profile.id, partner = %partner, "nothing to summarize");
                EndOutcome::Skipped
            }
            EndPlan::Summarize { partner, turns } => {
                let outcome = match self.summarize(&turns).await {
                    Ok(summary) => {
                        self.services
                            .memory
                            .append(&self.profile.id, &partner, &summary)
                            .await;
                        EndOutcome::Summarized(summary)
                    }
                    Err(err) => {
                        tracing::warn!(npc = %self.profile.id, partner = %partner, error = %err, "summarization failed, memory unchanged");
                        EndOutcome::SummarizationFailed(err)
                    }
                };
                self.session.lock().await.finish_end();
                outcome
            }
        };

        events::emit(
            &self.services.events,
            DialogueEvent::ConversationEnded {
                npc_id: self.profile.id.clone(),
            },
        );
        Ok(outcome)
    }

    #[tracing::instrument(skip(self, turns), fields(npc = %self.profile.id, turns = turns.len()))]
    async fn summarize(&self, turns: &[Message]) -> Result<String, CompletionError> {
        let summary = self
            .services
            .completion
            .complete(&summarization_request(turns), &self.services.summary_model)
            .await?;

        let summary = summary.trim();
        if summary.is_empty() {
            return Err(CompletionError::MalformedResponse(
                "empty summary".to_string(),
            ));
        }
        tracing::info!(chars = summary.len(), "conversation summarized");
        Ok(summary.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn active_session() -> ConversationSession {
        let mut session = ConversationSession::new(NpcId::new("mira"));
        session.start("User", "You are Mira.", None).unwrap();
        session
    }

    #[test]
    fn test_start_inserts_single_system_turn() {
        let session = active_session();
        assert_eq!(session.state(), SessionState::Active);
        assert_eq!(session.turns().len(), 1);
        assert_eq!(session.turns()[0].role, Role::System);
        assert_eq!(session.partner(), Some("User"));
        assert_eq!(session.last_message(), "");
    }

    #[test]
    fn test_start_appends_partner_memory() {
        let mut session = ConversationSession::new(NpcId::new("mira"));
        session
            .start("Bram", "You are Mira.", Some("They swapped recipes."))
            .unwrap();
        let system = &session.turns()[0].content;
        assert!(system.starts_with("You are Mira."));
        assert!(system.contains("Character = **Bram**: They swapped recipes."));
    }

    #[test]
    fn test_start_twice_is_rejected() {
        let mut session = active_session();
        assert_eq!(
            session.start("User", "You are Mira.", None),
            Err(SessionError::InvalidTransition {
                operation: "start",
                state: SessionState::Active
            })
        );
    }

    #[test]
    fn test_turns_require_active_session() {
        let mut session = ConversationSession::new(NpcId::new("mira"));
        assert_eq!(
            session.push_turn(Role::User, "Hello"),
            Err(SessionError::NoActiveSession)
        );
        assert_eq!(session.begin_end(), Err(SessionError::NoActiveSession));
    }

    #[test]
    fn test_system_turn_rejected_after_start() {
        let mut session = active_session();
        assert_eq!(
            session.push_turn(Role::System, "new rules"),
            Err(SessionError::SystemTurnRejected)
        );
    }

    #[test]
    fn test_user_turn_yields_pending_request() {
        let mut session = active_session();
        assert_eq!(session.push_turn(Role::Assistant, "Hi!").unwrap(), None);

        let pending = session.push_turn(Role::User, "Hello").unwrap().unwrap();
        assert_eq!(pending.messages.len(), 3);
        assert!(session.apply_reply(pending.generation, "Welcome."));
        assert_eq!(session.last_message(), "Welcome.");
    }

    #[test]
    fn test_stale_reply_is_discarded() {
        let mut session = active_session();
        let pending = session.push_turn(Role::User, "Hello").unwrap().unwrap();

        // Ending with a single exchanged turn goes straight back to idle
        assert_eq!(
            session.begin_end().unwrap(),
            EndPlan::Skip {
                partner: "User".into()
            }
        );
        assert!(!session.apply_reply(pending.generation, "Too late"));
        assert!(session.turns().is_empty());

        // A fresh chat does not accept the old generation either
        session.start("User", "You are Mira.", None).unwrap();
        assert!(!session.apply_reply(pending.generation, "Too late"));
        assert_eq!(session.turns().len(), 1);
    }

    #[test]
    fn test_end_with_exchange_summarizes() {
        let mut session = active_session();
        let pending = session.push_turn(Role::User, "Hello").unwrap().unwrap();
        session.apply_reply(pending.generation, "Welcome.");

        match session.begin_end().unwrap() {
            EndPlan::Summarize { partner, turns } => {
                assert_eq!(partner, "User");
                assert_eq!(turns.len(), 2);
            }
            other => panic!("expected summarize, got {other:?}"),
        }
        assert_eq!(session.state(), SessionState::Summarizing);
        assert!(session.push_turn(Role::User, "wait").is_err());

        session.finish_end();
        assert_eq!(session.state(), SessionState::Idle);
        assert!(session.turns().is_empty());
    }

    #[test]
    fn test_summarization_request_renders_turns() {
        let turns = vec![
            Message::system("ignored"),
            Message::user("Hello"),
            Message::assistant("Welcome."),
        ];
        let request = summarization_request(&turns);
        assert_eq!(request[0].content, SUMMARY_INSTRUCTION);
        assert_eq!(request[1].content, "User: Hello\nAssistant: Welcome.");
    }

    #[test]
    fn test_reply_failure_detection() {
        let ok = Reply {
            text: "Fine weather.".into(),
            error: None,
        };
        assert!(!ok.is_failure());

        let blank = Reply {
            text: "   ".into(),
            error: None,
        };
        assert!(blank.is_failure());

        let err = CompletionError::TransportFailure("refused".into());
        let fallback = Reply {
            text: err.fallback_text(),
            error: Some(err),
        };
        assert!(fallback.is_failure());
    }
}
