//! Prompts for fact extraction.

use crate::types::CharacterRegistry;

const EXTRACTION_INSTRUCTIONS: &str = r#"You extract the facts a character AI should remember from one episode of a story.

## Classify every fact as public or private

### worldFacts (public)
Anything another character could observe or has been told:
- the setting, society, news
- a character's appearance, occupation and public actions
- relationships as they appear from outside
- information shared in conversation

### characterFacts (private)
Anything only one character knows:
- inner thoughts, true feelings
- secret identities, hidden abilities
- actions nobody else saw
- a past nobody else knows

Ask: could another character see or hear this? Then it is a worldFact. Does it exist only in one character's head? Then it belongs to that character.

## Importance
- 5: the core of the story or of a character
- 4: an important event or relationship
- 3: everyday but meaningful
- 2: supporting detail
- 1: trivial

## Rules
- One short sentence per fact.
- Only facts established by the end of this episode. No foreshadowing or speculation.
- Use only the character ids listed above as keys of characterFacts. Characters who do not appear may be omitted or given an empty list.

## Output
Respond with a single JSON object and nothing else:
{"worldFacts": [{"text": "...", "importance": 3}], "characterFacts": {"<character id>": [{"text": "...", "importance": 4}]}}"#;

/// System prompt for extraction, listing the known characters.
///
/// `custom_instructions` replaces the built-in classification rules; the
/// character list is always included.
pub fn extraction_system_prompt(
    registry: &CharacterRegistry,
    custom_instructions: Option<&str>,
) -> String {
    let characters = if registry.is_empty() {
        "(no characters registered; return an empty characterFacts object)".to_string()
    } else {
        registry
            .iter()
            .map(|c| {
                if c.description.is_empty() {
                    format!("- {}: {}", c.id, c.name)
                } else {
                    format!("- {}: {} - {}", c.id, c.name, c.description)
                }
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "## Characters\n{}\n\n{}",
        characters,
        custom_instructions.unwrap_or(EXTRACTION_INSTRUCTIONS)
    )
}

/// User prompt carrying the episode text.
pub fn extraction_user_prompt(episode_no: u32, episode_text: &str) -> String {
    format!(
        "Extract the important facts from episode {}:\n\n{}",
        episode_no, episode_text
    )
}
