//! The closed set of characters known to a story.
//!
//! Extraction validation, the extraction prompt and the agent shell all read
//! the same registry, so adding a character is a configuration change only.

use serde::{Deserialize, Serialize};

/// Descriptor of one character.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharacterInfo {
    /// Stable identifier, used as the `characterId` of private facts.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Short description, used in prompts and personas.
    #[serde(default)]
    pub description: String,
}

impl CharacterInfo {
    pub fn new(id: impl Into<String>, name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Ordered registry of characters. Declaration order is preserved and used
/// wherever facts or characters are listed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CharacterRegistry {
    characters: Vec<CharacterInfo>,
}

impl CharacterRegistry {
    pub fn new(characters: Vec<CharacterInfo>) -> Self {
        Self { characters }
    }

    /// Registry with ids only; names default to the id.
    pub fn from_ids<I, S>(ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let characters = ids
            .into_iter()
            .map(|id| {
                let id = id.into();
                CharacterInfo::new(id.clone(), id, String::new())
            })
            .collect();
        Self { characters }
    }

    pub fn get(&self, id: &str) -> Option<&CharacterInfo> {
        self.characters.iter().find(|c| c.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Position of `id` in declaration order.
    pub fn position(&self, id: &str) -> Option<usize> {
        self.characters.iter().position(|c| c.id == id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.characters.iter().map(|c| c.id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &CharacterInfo> {
        self.characters.iter()
    }

    pub fn len(&self) -> usize {
        self.characters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.characters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_and_order() {
        let registry = CharacterRegistry::new(vec![
            CharacterInfo::new("himuro-nigo", "Nigo Himuro", "A student"),
            CharacterInfo::new("misaki", "Misaki", "Nigo's sister"),
        ]);
        assert!(registry.contains("misaki"));
        assert!(!registry.contains("rei"));
        assert_eq!(registry.position("misaki"), Some(1));
        assert_eq!(registry.get("himuro-nigo").unwrap().name, "Nigo Himuro");
        assert_eq!(registry.ids().collect::<Vec<_>>(), vec!["himuro-nigo", "misaki"]);
    }

    #[test]
    fn test_deserialize_from_list() {
        let registry: CharacterRegistry = serde_json::from_str(
            r#"[{"id": "misaki", "name": "Misaki"}, {"id": "kamishiro-rei", "name": "Rei", "description": "Amber eyes"}]"#,
        )
        .unwrap();
        assert_eq!(registry.len(), 2);
        assert_eq!(registry.get("misaki").unwrap().description, "");
    }
}
