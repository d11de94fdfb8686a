//! NPC descriptive records and the registry that owns them.
//!
//! Profiles are immutable once registered. Registration is the only place a
//! profile is validated; out-of-range personality scores are rejected, never
//! clamped.

use crate::error::ProfileError;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

/// Stable identifier of an NPC in the roster.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NpcId(String);

impl NpcId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NpcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NpcId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Physical description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Appearance {
    pub hair_color: String,
    pub eye_color: String,
    pub height_cm: u32,
    pub build: String,
}

/// One axis of the five-factor personality model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dimension {
    Openness,
    Conscientiousness,
    Extraversion,
    Agreeableness,
    Neuroticism,
}

impl Dimension {
    pub const ALL: [Dimension; 5] = [
        Dimension::Openness,
        Dimension::Conscientiousness,
        Dimension::Extraversion,
        Dimension::Agreeableness,
        Dimension::Neuroticism,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Dimension::Openness => "Openness",
            Dimension::Conscientiousness => "Conscientiousness",
            Dimension::Extraversion => "Extraversion",
            Dimension::Agreeableness => "Agreeableness",
            Dimension::Neuroticism => "Neuroticism",
        }
    }
}

/// Five-factor personality scores, each in `[0, 1]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Personality {
    pub openness: f32,
    pub conscientiousness: f32,
    pub extraversion: f32,
    pub agreeableness: f32,
    pub neuroticism: f32,
}

impl Personality {
    pub fn new(
        openness: f32,
        conscientiousness: f32,
        extraversion: f32,
        agreeableness: f32,
        neuroticism: f32,
    ) -> Self {
        Self {
            openness,
            conscientiousness,
            extraversion,
            agreeableness,
            neuroticism,
        }
    }

    /// Score for one dimension.
    pub fn score(&self, dimension: Dimension) -> f32 {
        match dimension {
            Dimension::Openness => self.openness,
            Dimension::Conscientiousness => self.conscientiousness,
            Dimension::Extraversion => self.extraversion,
            Dimension::Agreeableness => self.agreeableness,
            Dimension::Neuroticism => self.neuroticism,
        }
    }

    /// All five scores in canonical order.
    pub fn scores(&self) -> [(Dimension, f32); 5] {
        Dimension::ALL.map(|d| (d, self.score(d)))
    }
}

/// Descriptive record for one NPC, as delivered by the roster data source.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcProfile {
    pub id: NpcId,
    pub name: String,
    #[serde(default)]
    pub gender: String,
    #[serde(default)]
    pub age: u32,
    #[serde(default)]
    pub culture: String,
    #[serde(default)]
    pub occupation: String,
    #[serde(default)]
    pub goal: String,
    #[serde(default)]
    pub appearance: Option<Appearance>,
    pub personality: Personality,
    #[serde(default)]
    pub traits: Vec<String>,
    #[serde(default, rename = "brief_history")]
    pub backstory: Option<String>,
    /// Portrait asset path; carried for the presentation layer only.
    #[serde(default)]
    pub portrait: Option<String>,
}

impl NpcProfile {
    /// Check identity fields and that every personality score lies in `[0, 1]`.
    pub fn validate(&self) -> Result<(), ProfileError> {
        if self.id.as_str().trim().is_empty() {
            return Err(ProfileError::EmptyId);
        }
        if self.name.trim().is_empty() {
            return Err(ProfileError::EmptyName {
                id: self.id.to_string(),
            });
        }
        for (dimension, value) in self.personality.scores() {
            // NaN fails the range check as well
            if !(0.0..=1.0).contains(&value) {
                return Err(ProfileError::PersonalityOutOfRange {
                    id: self.id.to_string(),
                    dimension: dimension.label(),
                    value,
                });
            }
        }
        Ok(())
    }
}

/// Owns every loaded profile. Sessions and the orchestrator only hold ids or
/// shared handles into it.
#[derive(Debug, Default)]
pub struct NpcRegistry {
    profiles: HashMap<NpcId, Arc<NpcProfile>>,
    order: Vec<NpcId>,
}

impl NpcRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry, rejecting the whole batch on the first invalid record.
    pub fn from_profiles(
        profiles: impl IntoIterator<Item = NpcProfile>,
    ) -> Result<Self, ProfileError> {
        let mut registry = Self::new();
        for profile in profiles {
            registry.register(profile)?;
        }
        Ok(registry)
    }

    /// Validate and add a profile.
    pub fn register(&mut self, profile: NpcProfile) -> Result<Arc<NpcProfile>, ProfileError> {
        profile.validate()?;
        if self.profiles.contains_key(&profile.id) {
            return Err(ProfileError::Duplicate(profile.id.to_string()));
        }
        let id = profile.id.clone();
        let profile = Arc::new(profile);
        self.profiles.insert(id.clone(), Arc::clone(&profile));
        self.order.push(id);
        Ok(profile)
    }

    pub fn get(&self, id: &NpcId) -> Option<Arc<NpcProfile>> {
        self.profiles.get(id).cloned()
    }

    /// Remove a profile from the roster.
    pub fn retire(&mut self, id: &NpcId) -> Option<Arc<NpcProfile>> {
        self.order.retain(|existing| existing != id);
        self.profiles.remove(id)
    }

    /// Profiles in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<NpcProfile>> {
        self.order.iter().filter_map(|id| self.profiles.get(id))
    }

    pub fn len(&self) -> usize {
        self.profiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.profiles.is_empty()
    }
}
