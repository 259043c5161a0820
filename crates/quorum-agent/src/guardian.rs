use quorum_core::types::{Message, Role};

/// Corrective instruction injected when an agent repeats itself.
pub const STUCK_PROMPT: &str = "Observed duplicate responses. Consider new strategies and \
avoid repeating ineffective paths already attempted.";

/// True when the latest assistant reply has already been given at least
/// `threshold` times before.
///
/// Only non-empty assistant text is compared; tool-call-only turns never
/// count as duplicates.
pub fn is_stuck(messages: &[Message], threshold: usize) -> bool {
    if threshold == 0 {
        return false;
    }

    let mut assistant = messages
        .iter()
        .rev()
        .filter(|m| m.role() == Role::Assistant);

    let Some(last) = assistant.next() else {
        return false;
    };
    if last.content().is_empty() {
        return false;
    }

    let duplicates = assistant.filter(|m| m.content() == last.content()).count();
    duplicates >= threshold
}

/// Prepend the stuck prompt to `current`, unless it is already there.
pub fn with_stuck_prompt(current: Option<&str>) -> String {
    match current {
        Some(prompt) if prompt.contains(STUCK_PROMPT) => prompt.to_string(),
        Some(prompt) if !prompt.is_empty() => format!("{}\n{}", STUCK_PROMPT, prompt),
        _ => STUCK_PROMPT.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quorum_core::types::ToolCall;

    fn convo(replies: &[&str]) -> Vec<Message> {
        let mut msgs = vec![Message::system("sys"), Message::user("go")];
        for r in replies {
            msgs.push(Message::assistant(*r));
            msgs.push(Message::user("continue"));
        }
        msgs
    }

    #[test]
    fn fires_at_threshold() {
        assert!(!is_stuck(&convo(&["same", "same"]), 2));
        assert!(is_stuck(&convo(&["same", "same", "same"]), 2));
    }

    #[test]
    fn only_latest_reply_matters() {
        // "a" repeats three times, but the latest reply is "b".
        assert!(!is_stuck(&convo(&["a", "a", "a", "b"]), 2));
    }

    #[test]
    fn empty_and_tool_only_turns_never_count() {
        let call = ToolCall {
            id: "c".into(),
            name: "web_search".into(),
            arguments: serde_json::json!({}),
        };
        let msgs = vec![
            Message::assistant_with_tool_calls("", vec![call.clone()]),
            Message::assistant_with_tool_calls("", vec![call.clone()]),
            Message::assistant_with_tool_calls("", vec![call]),
        ];
        assert!(!is_stuck(&msgs, 2));
        assert!(!is_stuck(&[], 2));
    }

    #[test]
    fn stuck_prompt_is_prepended_once() {
        let first = with_stuck_prompt(Some("Keep going."));
        assert!(first.starts_with(STUCK_PROMPT));
        assert!(first.ends_with("Keep going."));

        let second = with_stuck_prompt(Some(&first));
        assert_eq!(second, first);

        assert_eq!(with_stuck_prompt(None), STUCK_PROMPT);
    }
}
