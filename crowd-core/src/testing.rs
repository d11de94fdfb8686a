//! Testing utilities for the dialogue engine.
//!
//! This module provides tools for integration testing:
//! - `MockCompletion` for deterministic testing without API calls
//! - `TestHarness` wiring an orchestrator to the mock and its event stream
//! - Profile fixtures and assertion helpers

use crate::completion::ChatCompletion;
use crate::config::DialogueConfig;
use crate::error::CompletionError;
use crate::events::{DialogueEvent, EventReceiver};
use crate::message::{Message, Role, Speaker};
use crate::orchestrator::DialogueOrchestrator;
use crate::profile::{Appearance, NpcId, NpcProfile, NpcRegistry, Personality};
use crate::session::{SessionState, SUMMARY_INSTRUCTION};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// A key that passes format validation.
pub const VALID_TEST_KEY: &str = "sk-test-0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJ";

/// Summary returned when no summary is scripted.
pub const DEFAULT_SUMMARY: &str = "They had a short, friendly chat.";

/// A sample NPC record: a marsh herbalist.
pub fn sample_profile(id: &str, name: &str) -> NpcProfile {
    NpcProfile {
        id: NpcId::new(id),
        name: name.to_string(),
        gender: "female".to_string(),
        age: 34,
        culture: "Marshfolk".to_string(),
        occupation: "Herbalist".to_string(),
        goal: "Find a cure for the marsh fever".to_string(),
        appearance: Some(Appearance {
            hair_color: "auburn".to_string(),
            eye_color: "green".to_string(),
            height_cm: 165,
            build: "slender".to_string(),
        }),
        personality: Personality::new(0.7, 0.5, 0.4, 0.8, 0.3),
        traits: vec!["curious".to_string(), "patient".to_string()],
        backstory: Some("Grew up in the marsh villages.".to_string()),
        portrait: None,
    }
}

/// A registry holding the given (id, name) pairs as sample profiles.
pub fn sample_registry(npcs: &[(&str, &str)]) -> NpcRegistry {
    let mut registry = NpcRegistry::new();
    for (id, name) in npcs {
        if let Err(e) = registry.register(sample_profile(id, name)) {
            panic!("invalid sample profile {id}: {e}");
        }
    }
    registry
}

/// A completion request the mock received.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub messages: Vec<Message>,
    pub model: String,
}

impl RecordedCall {
    /// Whether this was an end-of-chat summarization request.
    pub fn is_summary(&self) -> bool {
        self.messages
            .first()
            .is_some_and(|m| m.role == Role::System && m.content == SUMMARY_INSTRUCTION)
    }

    /// Content of the final turn sent.
    pub fn last_content(&self) -> &str {
        self.messages
            .last()
            .map(|m| m.content.as_str())
            .unwrap_or_default()
    }
}

/// A completion client that returns scripted responses.
///
/// Dialogue and summary requests draw from separate queues. Once a queue is
/// exhausted, dialogue requests answer `"Reply <n>"` (n = dialogue call
/// number, from 1) and summaries answer [`DEFAULT_SUMMARY`].
#[derive(Debug, Default)]
pub struct MockCompletion {
    replies: Mutex<VecDeque<Result<String, CompletionError>>>,
    summaries: Mutex<VecDeque<Result<String, CompletionError>>>,
    calls: Mutex<Vec<RecordedCall>>,
    delay: Option<Duration>,
}

impl MockCompletion {
    pub fn new() -> Self {
        Self::default()
    }

    /// A mock answering dialogue requests with these texts in order.
    pub fn with_replies<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mock = Self::new();
        for reply in replies {
            mock.queue_reply(Ok(reply.into()));
        }
        mock
    }

    /// Hold every request for `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn queue_reply(&self, reply: Result<String, CompletionError>) -> &Self {
        lock(&self.replies).push_back(reply);
        self
    }

    pub fn queue_summary(&self, summary: Result<String, CompletionError>) -> &Self {
        lock(&self.summaries).push_back(summary);
        self
    }

    /// Every request received, in order.
    pub fn calls(&self) -> Vec<RecordedCall> {
        lock(&self.calls).clone()
    }

    pub fn call_count(&self) -> usize {
        lock(&self.calls).len()
    }

    pub fn dialogue_calls(&self) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(|c| !c.is_summary()).collect()
    }

    pub fn summary_calls(&self) -> Vec<RecordedCall> {
        self.calls().into_iter().filter(RecordedCall::is_summary).collect()
    }
}

#[async_trait]
impl ChatCompletion for MockCompletion {
    async fn complete(&self, messages: &[Message], model: &str) -> Result<String, CompletionError> {
        let call = RecordedCall {
            messages: messages.to_vec(),
            model: model.to_string(),
        };
        let is_summary = call.is_summary();

        let response = {
            let mut calls = lock(&self.calls);
            calls.push(call);
            if is_summary {
                lock(&self.summaries)
                    .pop_front()
                    .unwrap_or_else(|| Ok(DEFAULT_SUMMARY.to_string()))
            } else {
                let n = calls.iter().filter(|c| !c.is_summary()).count();
                lock(&self.replies)
                    .pop_front()
                    .unwrap_or_else(|| Ok(format!("Reply {n}")))
            }
        };

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        response
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Test harness: an orchestrator over sample NPCs and a mock client.
pub struct TestHarness {
    pub orchestrator: Arc<DialogueOrchestrator>,
    pub completion: Arc<MockCompletion>,
    pub events: EventReceiver,
}

impl TestHarness {
    /// Harness with NPCs `mira`, `bram` and `oskar`, no pacing delay and no
    /// rate limit.
    pub fn new() -> Self {
        Self::with_completion(MockCompletion::new())
    }

    pub fn with_completion(completion: MockCompletion) -> Self {
        Self::with_parts(completion, Self::fast_config())
    }

    pub fn with_parts(completion: MockCompletion, config: DialogueConfig) -> Self {
        let completion = Arc::new(completion);
        let registry = sample_registry(&[("mira", "Mira"), ("bram", "Bram"), ("oskar", "Oskar")]);
        let (orchestrator, events) = DialogueOrchestrator::new(
            registry,
            Arc::clone(&completion) as Arc<dyn ChatCompletion>,
            config,
        );

        Self {
            orchestrator: Arc::new(orchestrator),
            completion,
            events,
        }
    }

    /// Default config without delays or throttling.
    pub fn fast_config() -> DialogueConfig {
        DialogueConfig::default()
            .with_turn_delay(Duration::ZERO)
            .with_rate_limit(None)
    }

    /// Every event emitted since the last drain.
    pub fn drain_events(&mut self) -> Vec<DialogueEvent> {
        let mut drained = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            drained.push(event);
        }
        drained
    }

    /// Displayed lines since the last drain, as (speaker label, text).
    pub fn drain_lines(&mut self) -> Vec<(String, String)> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                DialogueEvent::MessageProduced { speaker, text } => {
                    Some((speaker.label().to_string(), text))
                }
                _ => None,
            })
            .collect()
    }

    pub async fn state(&self, npc: &str) -> SessionState {
        match self.orchestrator.session_state(&NpcId::new(npc)).await {
            Ok(state) => state,
            Err(e) => panic!("unknown harness NPC {npc}: {e}"),
        }
    }

    pub async fn summary(&self, npc: &str, partner: &str) -> Option<String> {
        self.orchestrator
            .memory()
            .summary_for(&NpcId::new(npc), partner)
            .await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert that an NPC's session is idle.
#[track_caller]
pub fn assert_idle(state: SessionState) {
    assert_eq!(state, SessionState::Idle, "Expected session to be idle");
}

/// Assert that a line from `speaker` with exactly `text` was emitted.
#[track_caller]
pub fn assert_line(lines: &[(String, String)], speaker: &Speaker, text: &str) {
    assert!(
        lines
            .iter()
            .any(|(s, t)| s == speaker.label() && t == text),
        "Expected line '{text}' from '{speaker}', got {lines:?}"
    );
}
