//! Messages exchanged with the presentation gateway.
//!
//! The core pushes [`DialogueEvent`]s down an unbounded channel; whoever
//! renders chat bubbles drains the receiver. Commands flow the other way as
//! [`GatewayCommand`]s.

use crate::message::Speaker;
use crate::profile::NpcId;
use tokio::sync::mpsc;

/// Something the chat UI should show or react to.
#[derive(Debug, Clone, PartialEq)]
pub enum DialogueEvent {
    /// A line to display, attributed to a speaker.
    MessageProduced { speaker: Speaker, text: String },

    /// An NPC's session returned to idle.
    ConversationEnded { npc_id: NpcId },

    /// A rejected command or degraded condition, for diagnostics.
    Warning(String),
}

/// A request from the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayCommand {
    UserMessageSubmitted(String),
    ChatOpened(NpcId),
    ChatClosed,
    AutonomousChatRequested {
        first: NpcId,
        second: NpcId,
        opener: String,
    },
}

pub type EventSender = mpsc::UnboundedSender<DialogueEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<DialogueEvent>;

/// A connected sender/receiver pair.
pub fn channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Send an event, ignoring a gateway that has gone away.
pub(crate) fn emit(events: &EventSender, event: DialogueEvent) {
    if events.send(event).is_err() {
        tracing::trace!("event receiver dropped");
    }
}

pub(crate) fn emit_line(events: &EventSender, speaker: Speaker, text: impl Into<String>) {
    emit(
        events,
        DialogueEvent::MessageProduced {
            speaker,
            text: text.into(),
        },
    );
}
