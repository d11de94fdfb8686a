//! Loading the NPC roster file.
//!
//! The file is either a JSON array of NPC records or an object with an `npcs`
//! array.

use crowd_core::{NpcProfile, NpcRegistry};
use serde_json::Value;
use std::path::Path;

pub async fn load(path: &Path) -> Result<NpcRegistry, Box<dyn std::error::Error>> {
    let content = tokio::fs::read_to_string(path).await?;
    parse(&content)
}

pub fn parse(content: &str) -> Result<NpcRegistry, Box<dyn std::error::Error>> {
    let value: Value = serde_json::from_str(content)?;
    let records = match value {
        Value::Object(mut map) => map.remove("npcs").unwrap_or(Value::Array(Vec::new())),
        other => other,
    };
    let profiles: Vec<NpcProfile> = serde_json::from_value(records)?;
    Ok(NpcRegistry::from_profiles(profiles)?)
}
