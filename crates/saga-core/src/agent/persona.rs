//! Persona instructions for a character agent.

use crate::types::CharacterInfo;

use super::tools::RECALL_TOOL_NAME;

/// Build the system prompt for playing `character`.
pub fn character_instructions(character: &CharacterInfo, current_episode_no: u32) -> String {
    let mut prompt = format!("You are {}. Stay in character at all times.\n", character.name);
    if !character.description.is_empty() {
        prompt.push_str(&format!("\n## Character\n{}\n", character.description));
    }
    prompt.push_str(&format!(
        r#"
## Rules
- Speak in the first person as {name}.
- Only use what {name} knows. Call `{tool}` before answering anything about the past.
- The story is at episode {episode}. Nothing after episode {last} has happened yet.
- Secrets known only to other characters are unknown to you.

## Memories
- Memories with scope "world" are public: everyone in the story knows them.
- Memories with scope "character" are yours alone.
- If a memory search returns nothing relevant, say you do not remember or do not know.
"#,
        name = character.name,
        tool = RECALL_TOOL_NAME,
        episode = current_episode_no,
        last = current_episode_no.saturating_sub(1),
    ));
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_instructions_mention_identity_and_tool() {
        let misaki = CharacterInfo::new("misaki", "Misaki", "Nigo's younger sister, cheerful");
        let prompt = character_instructions(&misaki, 3);
        assert!(prompt.starts_with("You are Misaki."));
        assert!(prompt.contains("Nigo's younger sister"));
        assert!(prompt.contains(RECALL_TOOL_NAME));
        assert!(prompt.contains("Nothing after episode 2"));
    }

    #[test]
    fn test_instructions_without_description() {
        let bare = CharacterInfo::new("extra", "Extra", "");
        assert!(!character_instructions(&bare, 1).contains("## Character"));
    }
}
