//! Approximate token counting for local budget control.
//!
//! Korean text packs roughly two characters per token while Latin text packs
//! about four, so mixed-language bodies are estimated per character class.
//! Counts are for trimming decisions only, never billing.

use crate::llm::types::{ChatMessage, ContentBlock};

/// Flat overhead added per message for role/framing tokens.
const PER_MESSAGE_OVERHEAD: usize = 4;

/// True for characters in the Hangul syllable and Jamo blocks.
fn is_hangul(c: char) -> bool {
    matches!(c,
        '\u{AC00}'..='\u{D7A3}'   // Hangul syllables
        | '\u{1100}'..='\u{11FF}' // Hangul Jamo
        | '\u{3130}'..='\u{318F}' // Hangul compatibility Jamo
    )
}

/// Estimate the token count of a text body.
///
/// `ceil(korean_chars / 2 + other_chars / 4)`, accurate to roughly ±20%
/// against provider counts for mixed-language text.
pub fn estimate(text: &str) -> usize {
    let mut korean = 0usize;
    let mut other = 0usize;
    for c in text.chars() {
        if is_hangul(c) {
            korean += 1;
        } else {
            other += 1;
        }
    }
    // ceil(korean/2) + ceil(other/4), combined as a single ceiling over
    // quarters so short mixed strings don't round to zero twice.
    (korean * 2 + other + 3) / 4
}

/// Estimate the token count of a message array, including per-message overhead.
pub fn estimate_messages(messages: &[ChatMessage]) -> usize {
    messages
        .iter()
        .map(|m| PER_MESSAGE_OVERHEAD + estimate_content(&m.content))
        .sum()
}

fn estimate_content(blocks: &[ContentBlock]) -> usize {
    blocks
        .iter()
        .map(|b| match b {
            ContentBlock::Text { text } => estimate(text),
            // Images dominate any estimate; a fixed charge keeps trimming sane.
            ContentBlock::Image { .. } => 1500,
            ContentBlock::ToolUse { input, .. } => estimate(&input.to_string()),
            ContentBlock::ToolResult { content, .. } => estimate(content),
        })
        .sum()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::types::Role;

    #[test]
    fn test_empty_text() {
        assert_eq!(estimate(""), 0);
    }

    #[test]
    fn test_latin_text() {
        // 40 chars / 4 = 10 tokens.
        assert_eq!(estimate(&"a".repeat(40)), 10);
    }

    #[test]
    fn test_latin_rounds_up() {
        assert_eq!(estimate("ab"), 1);
        assert_eq!(estimate("abcde"), 2);
    }

    #[test]
    fn test_korean_text() {
        // 10 Hangul syllables / 2 = 5 tokens.
        assert_eq!(estimate(&"가".repeat(10)), 5);
    }

    #[test]
    fn test_mixed_text() {
        // 4 Hangul (2 tokens) + 8 Latin (2 tokens).
        let text = format!("{}{}", "내이름은멋".chars().take(4).collect::<String>(), "abcdefgh");
        assert_eq!(estimate(&text), 4);
    }

    #[test]
    fn test_message_overhead() {
        let messages = vec![ChatMessage::user_text("hello world!")]; // 12 chars -> 3 tokens
        assert_eq!(estimate_messages(&messages), 4 + 3);
    }

    #[test]
    fn test_multiple_messages() {
        let messages = vec![
            ChatMessage::user_text("abcd"),
            ChatMessage {
                role: Role::Assistant,
                content: vec![ContentBlock::Text {
                    text: "efgh".into(),
                }],
            },
        ];
        assert_eq!(estimate_messages(&messages), (4 + 1) * 2);
    }

    #[test]
    fn test_image_block_fixed_charge() {
        let msg = ChatMessage {
            role: Role::User,
            content: vec![ContentBlock::Image {
                media_type: "image/jpeg".into(),
                data: "abc".into(),
            }],
        };
        assert_eq!(estimate_messages(&[msg]), 4 + 1500);
    }
}
