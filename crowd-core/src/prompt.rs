//! System prompts for NPC agents.
//!
//! `build_system_prompt` is pure and deterministic. `PromptCache` memoizes it
//! per NPC id for the lifetime of the profile.

use crate::profile::{Dimension, NpcId, NpcProfile, Personality};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

/// Scores at or above this use the high-end adjectives.
pub const STYLE_THRESHOLD: f32 = 0.6;

/// Adjective sets per dimension: (at/above threshold, below threshold).
const STYLE_TABLE: [(Dimension, &str, &str); 5] = [
    (
        Dimension::Openness,
        "imaginative, curious, and open to new ideas.",
        "practical, concrete, and prefers routine.",
    ),
    (
        Dimension::Conscientiousness,
        "structured, careful, and reliable.",
        "spontaneous, casual, and informal.",
    ),
    (
        Dimension::Extraversion,
        "energetic, talkative, engages actively.",
        "reserved, quiet, short replies.",
    ),
    (
        Dimension::Agreeableness,
        "kind, empathetic, cooperative.",
        "blunt, self-focused, argumentative if needed.",
    ),
    (
        Dimension::Neuroticism,
        "emotional, slightly anxious or reactive.",
        "calm, steady, confident.",
    ),
];

/// Adjective set for one dimension at the given score.
pub fn style_adjectives(dimension: Dimension, score: f32) -> &'static str {
    let (_, high, low) = STYLE_TABLE
        .iter()
        .find(|(d, _, _)| *d == dimension)
        .copied()
        .unwrap_or((dimension, "", ""));
    if score >= STYLE_THRESHOLD {
        high
    } else {
        low
    }
}

/// One hint line per dimension, in canonical order.
pub fn style_hints(personality: &Personality) -> Vec<String> {
    personality
        .scores()
        .iter()
        .map(|(dimension, score)| {
            format!(
                "- **{}:** {}",
                dimension.label(),
                style_adjectives(*dimension, *score)
            )
        })
        .collect()
}

/// Build the full role instruction block for an NPC.
pub fn build_system_prompt(profile: &NpcProfile) -> String {
    let (hair, eyes, height, build) = match &profile.appearance {
        Some(a) => (
            a.hair_color.as_str(),
            a.eye_color.as_str(),
            a.height_cm,
            a.build.as_str(),
        ),
        None => ("Unknown", "Unknown", 0, "Average"),
    };
    let p = &profile.personality;
    let traits = if profile.traits.is_empty() {
        "- None noted".to_string()
    } else {
        profile
            .traits
            .iter()
            .map(|t| format!("- {t}"))
            .collect::<Vec<_>>()
            .join("\n")
    };
    let backstory = profile
        .backstory
        .as_deref()
        .filter(|b| !b.trim().is_empty())
        .unwrap_or("No backstory available.");

    format!(
        r#"### NPC Role Definition ###
You are roleplaying as a game NPC. Stay in character at all times.

**ID:** {id}
**Name:** {name}
**Gender:** {gender}
**Age:** {age}
**Culture:** {culture}
**Occupation:** {occupation}
**Goal:** {goal}

### Appearance ###
**Hair Color:** {hair}
**Eye Color:** {eyes}
**Height:** {height} cm
**Build:** {build}

### Personality Traits (Big Five) ###
**Openness:** {openness}
**Conscientiousness:** {conscientiousness}
**Extraversion:** {extraversion}
**Agreeableness:** {agreeableness}
**Neuroticism:** {neuroticism}

### Conversation Style Guidelines ###
{hints}

### Distinctive Traits ###
{traits}

### Backstory ###
{backstory}

---

### Behavioral Rules ###
- Always stay in character as **{name}**.
- Keep responses **short (under 100 tokens)** and natural, like real dialogue.
- Respond according to personality, backstory, and traits.
- Use aggression only if it fits your personality when the other party is hostile.
- Do **not break character** or mention being an AI.
- If the conversation is going in circles, subtly change topic or ask a question to move it forward.
- If you don't know something, respond with uncertainty or deflect.
- If there is no topic, relate to your goals, traits, or backstory.
- Avoid repetitive phrases or sentence structures.
"#,
        id = profile.id,
        name = profile.name,
        gender = profile.gender,
        age = profile.age,
        culture = profile.culture,
        occupation = profile.occupation,
        goal = profile.goal,
        openness = p.openness,
        conscientiousness = p.conscientiousness,
        extraversion = p.extraversion,
        agreeableness = p.agreeableness,
        neuroticism = p.neuroticism,
        hints = style_hints(p).join("\n"),
    )
}

/// Process-wide memo of built prompts, keyed by NPC id.
#[derive(Debug, Default)]
pub struct PromptCache {
    prompts: RwLock<HashMap<NpcId, Arc<str>>>,
}

impl PromptCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached prompt for this profile, building it on first request.
    pub fn get_or_build(&self, profile: &NpcProfile) -> Arc<str> {
        if let Some(prompt) = self.read().get(&profile.id) {
            return Arc::clone(prompt);
        }

        let mut prompts = self.write();
        // Another caller may have built it between the two locks
        let prompt = prompts
            .entry(profile.id.clone())
            .or_insert_with(|| Arc::from(build_system_prompt(profile)));
        Arc::clone(prompt)
    }

    /// Forget the prompt of a retired NPC.
    pub fn retire(&self, id: &NpcId) -> bool {
        self.write().remove(id).is_some()
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<NpcId, Arc<str>>> {
        self.prompts.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<NpcId, Arc<str>>> {
        self.prompts
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
