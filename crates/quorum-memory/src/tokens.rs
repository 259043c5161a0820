use quorum_core::types::Message;

/// Tokens charged per word of non-CJK text.
const WORD_MULTIPLIER: f64 = 1.3;

/// Fixed framing cost of every non-empty message.
pub const MESSAGE_OVERHEAD: usize = 4;

fn is_cjk(c: char) -> bool {
    ('\u{4e00}'..='\u{9fa5}').contains(&c)
}

/// Approximate token count: 1.3 per whitespace-delimited word of non-CJK
/// text plus one per CJK character. Deterministic for a given input.
pub fn estimate_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    let cjk = text.chars().filter(|c| is_cjk(*c)).count();
    let words = text
        .split(|c: char| c.is_whitespace() || is_cjk(c))
        .filter(|w| !w.is_empty())
        .count();
    (words as f64 * WORD_MULTIPLIER) as usize + cjk
}

/// Estimate a single message, including tool-call arguments and overhead.
/// A message with no text and no tool calls costs nothing.
pub fn estimate_message_tokens(msg: &Message) -> usize {
    if msg.content().is_empty() && msg.tool_calls().is_empty() {
        return 0;
    }
    let calls: usize = msg
        .tool_calls()
        .iter()
        .map(|c| estimate_tokens(&c.name) + estimate_tokens(&c.arguments.to_string()))
        .sum();
    estimate_tokens(msg.content()) + calls + MESSAGE_OVERHEAD
}

pub fn estimate_messages_tokens(messages: &[Message]) -> usize {
    messages.iter().map(estimate_message_tokens).sum()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_text_is_free() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_message_tokens(&Message::user("")), 0);
    }

    #[test]
    fn words_use_multiplier() {
        // 10 words * 1.3 = 13
        assert_eq!(estimate_tokens("one two three four five six seven eight nine ten"), 13);
        // 3 words * 1.3 = 3.9, floored
        assert_eq!(estimate_tokens("  leading and trailing  "), 3);
    }

    #[test]
    fn cjk_characters_count_individually() {
        assert_eq!(estimate_tokens("你好世界"), 4);
        // "hello" is one word (1), plus two CJK characters
        assert_eq!(estimate_tokens("hello你好"), 3);
    }

    #[test]
    fn message_overhead_is_added() {
        let msg = Message::assistant("one two three four five six seven eight nine ten");
        assert_eq!(estimate_message_tokens(&msg), 13 + MESSAGE_OVERHEAD);
    }

    #[test]
    fn estimate_is_reproducible() {
        let text = "The quick brown fox 跳过 the lazy dog";
        assert_eq!(estimate_tokens(text), estimate_tokens(text));
    }
}
