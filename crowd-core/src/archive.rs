//! Archived NPC-to-NPC conversations, addressable by index for replay.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::RwLock;
use uuid::Uuid;

/// Characters of the first entry shown by [`ArchiveStore::preview`].
const PREVIEW_CHARS: usize = 60;

/// One line of an archived conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TranscriptEntry {
    pub speaker: String,
    pub text: String,
}

/// How an autonomous conversation terminated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LoopStatus {
    /// Ran to the exchange cap.
    Completed,
    /// Stopped early on repeated failures or shutdown.
    Aborted,
}

/// A finished conversation between two NPCs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub participants: [String; 2],
    pub entries: Vec<TranscriptEntry>,
    pub status: LoopStatus,
}

impl Transcript {
    pub fn new(first: impl Into<String>, second: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            participants: [first.into(), second.into()],
            entries: Vec::new(),
            status: LoopStatus::Completed,
        }
    }

    pub fn push(&mut self, speaker: impl Into<String>, text: impl Into<String>) {
        self.entries.push(TranscriptEntry {
            speaker: speaker.into(),
            text: text.into(),
        });
    }

    /// `"<first> & <second>: <opening line…>"`
    pub fn preview(&self) -> String {
        let opening = self
            .entries
            .first()
            .map(|e| e.text.as_str())
            .unwrap_or_default();
        let mut snippet: String = opening.chars().take(PREVIEW_CHARS).collect();
        if opening.chars().count() > PREVIEW_CHARS {
            snippet.push('…');
        }
        format!(
            "{} & {}: {}",
            self.participants[0], self.participants[1], snippet
        )
    }
}

/// In-memory ordered list of finished transcripts.
#[derive(Debug, Default)]
pub struct ArchiveStore {
    transcripts: RwLock<Vec<Transcript>>,
}

impl ArchiveStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Archive a transcript, returning its index.
    pub fn push(&self, transcript: Transcript) -> usize {
        let mut transcripts = self
            .transcripts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        transcripts.push(transcript);
        transcripts.len() - 1
    }

    pub fn count(&self) -> usize {
        self.read(|t| t.len())
    }

    pub fn get(&self, index: usize) -> Option<Transcript> {
        self.read(|t| t.get(index).cloned())
    }

    /// Short label for the transcript at `index`.
    pub fn preview(&self, index: usize) -> Option<String> {
        self.read(|t| t.get(index).map(Transcript::preview))
    }

    fn read<R>(&self, f: impl FnOnce(&Vec<Transcript>) -> R) -> R {
        let transcripts = self
            .transcripts
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        f(&transcripts)
    }
}
