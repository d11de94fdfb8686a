//! Cross-session memory: what each NPC remembers about each partner.
//!
//! Memory is only written by the summarization step at the end of a chat.
//! Every NPC's memory sits behind its own async mutex, so two loops touching
//! the same NPC serialize their updates while unrelated NPCs never contend.

use crate::error::PersistError;
use crate::profile::NpcId;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::{Arc, RwLock};
use tokio::fs;
use tokio::sync::Mutex;

/// Partner name to cumulative summary text, for one NPC.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationMemory {
    entries: BTreeMap<String, String>,
}

impl ConversationMemory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulated summary text about `partner`, if any.
    pub fn summary_for(&self, partner: &str) -> Option<&str> {
        self.entries.get(partner).map(String::as_str)
    }

    /// Append a summary for `partner`, newline-separated from earlier ones.
    ///
    /// When `max_chars` is non-zero the entry is kept within it by dropping
    /// the oldest summaries first; a single summary longer than the bound
    /// keeps its tail.
    pub fn append(&mut self, partner: &str, summary: &str, max_chars: usize) {
        let entry = self.entries.entry(partner.to_string()).or_default();
        if !entry.is_empty() {
            entry.push('\n');
        }
        entry.push_str(summary);

        if max_chars > 0 {
            bound_text(entry, max_chars);
        }
    }

    pub fn partners(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn bound_text(text: &mut String, max_chars: usize) {
    while text.chars().count() > max_chars {
        match text.find('\n') {
            Some(newline) => {
                text.drain(..=newline);
            }
            None => {
                let excess = text.chars().count() - max_chars;
                let cut = text
                    .char_indices()
                    .nth(excess)
                    .map(|(i, _)| i)
                    .unwrap_or(text.len());
                text.drain(..cut);
            }
        }
    }
}

/// Shared handle to one NPC's memory.
pub type SharedMemory = Arc<Mutex<ConversationMemory>>;

/// Every NPC's memory, keyed by NPC id.
#[derive(Debug)]
pub struct MemoryBank {
    memories: RwLock<HashMap<NpcId, SharedMemory>>,
    max_chars: usize,
}

impl MemoryBank {
    /// A bank bounding each partner entry to `max_chars` (0 = unbounded).
    pub fn new(max_chars: usize) -> Self {
        Self {
            memories: RwLock::new(HashMap::new()),
            max_chars,
        }
    }

    /// The memory of `npc`, created empty on first use.
    pub fn memory_for(&self, npc: &NpcId) -> SharedMemory {
        if let Some(memory) = self.read().get(npc) {
            return Arc::clone(memory);
        }
        Arc::clone(self.write().entry(npc.clone()).or_default())
    }

    /// What `npc` remembers about `partner`.
    pub async fn summary_for(&self, npc: &NpcId, partner: &str) -> Option<String> {
        let memory = self.memory_for(npc);
        let memory = memory.lock().await;
        memory.summary_for(partner).map(str::to_string)
    }

    /// Record a new summary of a chat between `npc` and `partner`.
    pub async fn append(&self, npc: &NpcId, partner: &str, summary: &str) {
        let memory = self.memory_for(npc);
        memory.lock().await.append(partner, summary, self.max_chars);
        tracing::debug!(npc = %npc, partner, "memory updated");
    }

    /// Drop the memory of a retired NPC.
    pub fn retire(&self, npc: &NpcId) -> bool {
        self.write().remove(npc).is_some()
    }

    /// Copy of every NPC's memory.
    pub async fn snapshot(&self) -> BTreeMap<NpcId, ConversationMemory> {
        let handles: Vec<(NpcId, SharedMemory)> = self
            .read()
            .iter()
            .map(|(id, memory)| (id.clone(), Arc::clone(memory)))
            .collect();

        let mut snapshot = BTreeMap::new();
        for (id, memory) in handles {
            snapshot.insert(id, memory.lock().await.clone());
        }
        snapshot
    }

    /// Write every NPC's memory to a JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), PersistError> {
        let json = serde_json::to_string_pretty(&self.snapshot().await)?;
        fs::write(path.as_ref(), json).await?;
        tracing::info!(path = %path.as_ref().display(), "saved NPC memories");
        Ok(())
    }

    /// Replace the memories of every NPC present in a saved file.
    pub async fn load(&self, path: impl AsRef<Path>) -> Result<usize, PersistError> {
        let content = fs::read_to_string(path.as_ref()).await?;
        let saved: BTreeMap<NpcId, ConversationMemory> = serde_json::from_str(&content)?;
        let count = saved.len();

        for (id, restored) in saved {
            let memory = self.memory_for(&id);
            *memory.lock().await = restored;
        }
        tracing::info!(path = %path.as_ref().display(), npcs = count, "loaded NPC memories");
        Ok(count)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<NpcId, SharedMemory>> {
        self.memories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<NpcId, SharedMemory>> {
        self.memories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for MemoryBank {
    fn default() -> Self {
        Self::new(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_creates_then_concatenates() {
        let mut memory = ConversationMemory::new();
        memory.append("User", "They talked about herbs.", 0);
        assert_eq!(memory.summary_for("User"), Some("They talked about herbs."));

        memory.append("User", "They argued about the price.", 0);
        assert_eq!(
            memory.summary_for("User"),
            Some("They talked about herbs.\nThey argued about the price.")
        );
        assert_eq!(memory.len(), 1);
        assert_eq!(memory.summary_for("Bram"), None);
    }

    #[test]
    fn test_bound_drops_oldest_summary() {
        let mut memory = ConversationMemory::new();
        memory.append("User", "first", 12);
        memory.append("User", "second", 12);
        assert_eq!(memory.summary_for("User"), Some("first\nsecond"));

        memory.append("User", "third", 12);
        assert_eq!(memory.summary_for("User"), Some("second\nthird"));
    }

    #[test]
    fn test_bound_keeps_tail_of_oversized_summary() {
        let mut memory = ConversationMemory::new();
        memory.append("User", "abcdefghij", 4);
        assert_eq!(memory.summary_for("User"), Some("ghij"));

        let mut memory = ConversationMemory::new();
        memory.append("User", "héllo wörld", 5);
        assert_eq!(memory.summary_for("User"), Some("wörld"));
    }

    #[tokio::test]
    async fn test_bank_keeps_npcs_apart() {
        let bank = MemoryBank::new(0);
        let mira = NpcId::new("mira");
        let bram = NpcId::new("bram");

        bank.append(&mira, "User", "Mira met the player.").await;
        assert_eq!(
            bank.summary_for(&mira, "User").await.as_deref(),
            Some("Mira met the player.")
        );
        assert_eq!(bank.summary_for(&bram, "User").await, None);

        assert!(bank.retire(&mira));
        assert_eq!(bank.summary_for(&mira, "User").await, None);
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("memories.json");

        let bank = MemoryBank::new(0);
        bank.append(&NpcId::new("mira"), "Bram", "They traded gossip.")
            .await;
        bank.save(&path).await.unwrap();

        let restored = MemoryBank::new(0);
        assert_eq!(restored.load(&path).await.unwrap(), 1);
        assert_eq!(
            restored
                .summary_for(&NpcId::new("mira"), "Bram")
                .await
                .as_deref(),
            Some("They traded gossip.")
        );
    }
}
