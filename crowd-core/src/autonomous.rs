//! NPC-to-NPC conversations driven without player input.
//!
//! Each NPC answers the other's latest line until the exchange cap is hit.
//! A listener that fails to answer (error, fallback text, or silence) is
//! re-prompted instead of handing the floor over; too many failures in a row
//! abort the conversation. Either way both sessions are ended and summarized
//! and the transcript is returned for archiving.

use crate::archive::{LoopStatus, Transcript};
use crate::events::{self, EventSender};
use crate::message::{Role, Speaker};
use crate::profile::NpcProfile;
use crate::session::{EndOutcome, SessionHandle, TurnOutcome};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Shown once an autonomous conversation has finished.
pub const CONVERSATION_ENDED_TEXT: &str = "Conversation ended.";

/// Result of one autonomous conversation.
#[derive(Debug, Clone, PartialEq)]
pub struct AutonomousOutcome {
    pub status: LoopStatus,
    /// Successful listener responses.
    pub exchanges: usize,
    /// Index of the archived transcript.
    pub archive_index: usize,
    /// How each session ended, in (first, second) order.
    pub endings: [EndOutcome; 2],
}

/// Silent context note telling an NPC who it is talking to.
pub fn scene_context(other: &NpcProfile) -> String {
    format!(
        "You are now talking with {}, a {} from {}. Stay in character.",
        other.name, other.occupation, other.culture
    )
}

/// Line handed to the listener carrying the speaker's words.
pub fn relay_line(speaker: &str, text: &str) -> String {
    format!("{speaker} says: {text}")
}

/// Re-prompt for a listener whose last answer failed.
pub fn follow_up_line(speaker: &str, last_line: &str) -> String {
    format!(
        "{speaker} is still waiting for your answer to: \"{last_line}\". Reply directly, in character."
    )
}

/// Limits of one autonomous run.
#[derive(Debug, Clone, Copy)]
pub(crate) struct LoopLimits {
    pub max_exchanges: usize,
    pub max_consecutive_failures: usize,
    pub turn_delay: Duration,
}

/// A conversation between two NPCs whose sessions are already started with
/// each other as partner.
pub(crate) struct AutonomousChat {
    pub first: SessionHandle,
    pub second: SessionHandle,
    pub limits: LoopLimits,
    pub events: EventSender,
    pub cancel: CancellationToken,
}

impl AutonomousChat {
    /// Drive the conversation to completion or abort, then end both sessions.
    pub async fn run(self, opener: &str) -> (Transcript, usize, [EndOutcome; 2]) {
        let first_name = self.first.profile().name.clone();
        let second_name = self.second.profile().name.clone();
        let mut transcript = Transcript::new(&first_name, &second_name);

        let (exchanges, status) = self.converse(opener, &mut transcript).await;
        transcript.status = status;

        let endings = [
            end_session(&self.first).await,
            end_session(&self.second).await,
        ];
        events::emit_line(&self.events, Speaker::Narrator, CONVERSATION_ENDED_TEXT);

        tracing::info!(
            first = %first_name,
            second = %second_name,
            exchanges,
            status = ?status,
            "autonomous conversation finished"
        );
        (transcript, exchanges, endings)
    }

    async fn converse(&self, opener: &str, transcript: &mut Transcript) -> (usize, LoopStatus) {
        let seeded = async {
            self.first
                .add_note(scene_context(self.second.profile()))
                .await?;
            self.second
                .add_note(scene_context(self.first.profile()))
                .await?;
            self.first.send_turn(Role::Assistant, opener).await
        }
        .await;
        if let Err(e) = seeded {
            tracing::warn!(error = %e, "could not seed autonomous conversation");
            return (0, LoopStatus::Aborted);
        }

        let first_name = &self.first.profile().name;
        events::emit_line(&self.events, Speaker::Npc(first_name.clone()), opener);
        transcript.push(first_name, opener);

        let mut speaker = &self.first;
        let mut listener = &self.second;
        let mut last_line = opener.to_string();
        let mut exchanges = 0;
        let mut failures = 0;

        while exchanges < self.limits.max_exchanges {
            let speaker_name = &speaker.profile().name;
            let prompt = if failures == 0 {
                relay_line(speaker_name, &last_line)
            } else {
                follow_up_line(speaker_name, &last_line)
            };

            let outcome = tokio::select! {
                _ = self.cancel.cancelled() => {
                    tracing::info!("autonomous conversation cancelled");
                    return (exchanges, LoopStatus::Aborted);
                }
                outcome = listener.send_turn(Role::User, prompt) => outcome,
            };

            match outcome {
                Ok(TurnOutcome::Replied(reply)) if !reply.is_failure() => {
                    failures = 0;
                    exchanges += 1;
                    transcript.push(&listener.profile().name, &reply.text);
                    last_line = reply.text;
                    std::mem::swap(&mut speaker, &mut listener);
                }
                Ok(TurnOutcome::Replied(reply)) => {
                    failures += 1;
                    tracing::warn!(
                        npc = %listener.profile().id,
                        failures,
                        text = %reply.text,
                        "listener failed to answer"
                    );
                    if failures >= self.limits.max_consecutive_failures {
                        return (exchanges, LoopStatus::Aborted);
                    }
                }
                Ok(TurnOutcome::Recorded) | Ok(TurnOutcome::Discarded) => {
                    tracing::warn!(npc = %listener.profile().id, "session ended mid-conversation");
                    return (exchanges, LoopStatus::Aborted);
                }
                Err(e) => {
                    tracing::warn!(npc = %listener.profile().id, error = %e, "session rejected turn");
                    return (exchanges, LoopStatus::Aborted);
                }
            }

            if exchanges < self.limits.max_exchanges && !self.limits.turn_delay.is_zero() {
                tokio::select! {
                    _ = self.cancel.cancelled() => return (exchanges, LoopStatus::Aborted),
                    _ = tokio::time::sleep(self.limits.turn_delay) => {}
                }
            }
        }

        (exchanges, LoopStatus::Completed)
    }
}

async fn end_session(handle: &SessionHandle) -> EndOutcome {
    match handle.end().await {
        Ok(outcome) => outcome,
        Err(e) => {
            tracing::warn!(npc = %handle.profile().id, error = %e, "session was not active at loop end");
            EndOutcome::Skipped
        }
    }
}
