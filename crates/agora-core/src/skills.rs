//! # Skill Store
//!
//! Named, stored query templates. The store decides skillhood from the
//! configured asset-reference pattern; resolution happens once per request
//! in the query processor.

use regex::Regex;
use std::collections::HashMap;
use std::sync::Mutex;

// =============================================================================
// SKILL STORE TRAIT
// =============================================================================

/// Lookup collaborator for named query templates.
pub trait SkillStore: Send + Sync {
    /// Whether the key denotes a skill asset.
    fn is_skill(&self, key: &str) -> bool;

    /// Store a skill text under a key, returning the key.
    fn put(&self, key: &str, skill: &str) -> String;

    /// Resolve a skill text.
    fn get(&self, key: &str) -> Option<String>;
}

// =============================================================================
// IN-MEMORY STORE
// =============================================================================

/// A process-local skill store.
#[derive(Debug)]
pub struct InMemorySkillStore {
    skills: Mutex<HashMap<String, String>>,
    asset_pattern: Regex,
}

impl InMemorySkillStore {
    /// Create a store with the given asset-reference pattern. The pattern
    /// must expose an `asset` capture group; it is matched against the full
    /// key.
    pub fn from_pattern(pattern: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            skills: Mutex::new(HashMap::new()),
            asset_pattern: Regex::new(&format!("^(?:{pattern})$"))?,
        })
    }
}

impl Default for InMemorySkillStore {
    fn default() -> Self {
        Self {
            skills: Mutex::new(HashMap::new()),
            asset_pattern: Regex::new("^(?<asset>.+)$").expect("default asset pattern compiles"),
        }
    }
}

impl SkillStore for InMemorySkillStore {
    fn is_skill(&self, key: &str) -> bool {
        self.asset_pattern
            .captures(key)
            .and_then(|c| c.name("asset"))
            .is_some_and(|asset| asset.as_str().contains("Skill"))
    }

    fn put(&self, key: &str, skill: &str) -> String {
        self.skills
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(key.to_string(), skill.to_string());
        key.to_string()
    }

    fn get(&self, key: &str) -> Option<String> {
        self.skills
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(key)
            .cloned()
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn put_then_get_round_trips() {
        let store = InMemorySkillStore::default();
        let key = store.put("urn:agora:SkillAsset#vins", "SELECT @vin WHERE { }");
        assert_eq!(key, "urn:agora:SkillAsset#vins");
        assert_eq!(
            store.get(&key).as_deref(),
            Some("SELECT @vin WHERE { }")
        );
        assert!(store.get("urn:agora:other").is_none());
    }

    #[test]
    fn skillhood_follows_the_asset_pattern() {
        let store = InMemorySkillStore::default();
        assert!(store.is_skill("urn:agora:SkillAsset#vins"));
        assert!(!store.is_skill("urn:agora:GraphAsset#parts"));
    }

    #[test]
    fn custom_pattern_scopes_the_asset_group() {
        let store =
            InMemorySkillStore::from_pattern("urn:agora:(?<asset>[^#]+)#.*").expect("compiles");
        assert!(store.is_skill("urn:agora:SkillAsset#vins"));
        // the Skill marker outside the asset group does not count
        assert!(!store.is_skill("urn:agora:data#Skill"));
    }
}
