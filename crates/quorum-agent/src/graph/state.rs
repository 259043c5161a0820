use std::collections::hash_map::Entry;
use std::collections::{BTreeMap, HashMap};

use quorum_core::error::{QuorumError, Result};
use quorum_core::types::Message;

/// Well-known session state keys.
pub mod keys {
    pub const MESSAGES: &str = "messages";
    pub const SESSION_HISTORY: &str = "sessionHistory";
    pub const USER_INPUT: &str = "userInput";
    pub const NEXT: &str = "next";
    pub const FINISHED: &str = "finished";
    pub const RESULT: &str = "result";
    pub const TOOL_RESULTS: &str = "toolResults";
    pub const CURRENT_AGENT: &str = "currentAgent";
    pub const HAS_HISTORY: &str = "hasHistory";
    pub const ERROR: &str = "error";
}

/// How a partial update to a key combines with the current value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePolicy {
    /// Extend the existing list.
    Append,
    /// Replace the existing value.
    Overwrite,
}

/// Declared merge policy for every key a graph may write.
#[derive(Debug, Clone, Default)]
pub struct StateSchema {
    policies: HashMap<String, MergePolicy>,
}

impl StateSchema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(mut self, key: impl Into<String>) -> Self {
        self.policies.insert(key.into(), MergePolicy::Append);
        self
    }

    pub fn overwrite(mut self, key: impl Into<String>) -> Self {
        self.policies.insert(key.into(), MergePolicy::Overwrite);
        self
    }

    pub fn policy(&self, key: &str) -> Option<MergePolicy> {
        self.policies.get(key).copied()
    }

    pub fn declares(&self, key: &str) -> bool {
        self.policies.contains_key(key)
    }

    /// The schema of a multi-agent session.
    pub fn session() -> Self {
        Self::new()
            .append(keys::MESSAGES)
            .append(keys::SESSION_HISTORY)
            .append(keys::TOOL_RESULTS)
            .overwrite(keys::USER_INPUT)
            .overwrite(keys::NEXT)
            .overwrite(keys::FINISHED)
            .overwrite(keys::RESULT)
            .overwrite(keys::CURRENT_AGENT)
            .overwrite(keys::HAS_HISTORY)
            .overwrite(keys::ERROR)
    }
}

/// A single state value.
#[derive(Debug, Clone, PartialEq)]
pub enum StateValue {
    Text(String),
    Flag(bool),
    Messages(Vec<Message>),
    List(Vec<String>),
}

impl StateValue {
    fn kind(&self) -> &'static str {
        match self {
            Self::Text(_) => "text",
            Self::Flag(_) => "flag",
            Self::Messages(_) => "messages",
            Self::List(_) => "list",
        }
    }

    fn is_list(&self) -> bool {
        matches!(self, Self::Messages(_) | Self::List(_))
    }
}

/// Shared state flowing through the workflow graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    values: HashMap<String, StateValue>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn text(&self, key: &str) -> Option<&str> {
        match self.values.get(key) {
            Some(StateValue::Text(s)) => Some(s),
            _ => None,
        }
    }

    /// A boolean key; absent means false.
    pub fn flag(&self, key: &str) -> bool {
        matches!(self.values.get(key), Some(StateValue::Flag(true)))
    }

    pub fn message_list(&self, key: &str) -> &[Message] {
        match self.values.get(key) {
            Some(StateValue::Messages(m)) => m,
            _ => &[],
        }
    }

    pub fn list(&self, key: &str) -> &[String] {
        match self.values.get(key) {
            Some(StateValue::List(l)) => l,
            _ => &[],
        }
    }

    pub fn user_input(&self) -> &str {
        self.text(keys::USER_INPUT).unwrap_or_default()
    }

    pub fn next(&self) -> Option<&str> {
        self.text(keys::NEXT)
    }

    pub fn is_finished(&self) -> bool {
        self.flag(keys::FINISHED)
    }

    pub fn result(&self) -> Option<&str> {
        self.text(keys::RESULT).filter(|r| !r.is_empty())
    }

    pub fn current_agent(&self) -> Option<&str> {
        self.text(keys::CURRENT_AGENT)
    }

    pub fn has_history(&self) -> bool {
        self.flag(keys::HAS_HISTORY)
    }

    pub fn messages(&self) -> &[Message] {
        self.message_list(keys::MESSAGES)
    }

    pub fn session_history(&self) -> &[Message] {
        self.message_list(keys::SESSION_HISTORY)
    }

    pub fn tool_results(&self) -> &[String] {
        self.list(keys::TOOL_RESULTS)
    }

    pub fn error(&self) -> Option<&str> {
        self.text(keys::ERROR)
    }

    /// Merge a partial update using the schema's per-key policy.
    ///
    /// Every key is validated before anything is written, so a rejected
    /// update leaves the state untouched.
    pub fn apply(&mut self, schema: &StateSchema, update: StateUpdate) -> Result<()> {
        for (key, value) in &update.values {
            let policy = schema
                .policy(key)
                .ok_or_else(|| QuorumError::UndeclaredStateKey(key.clone()))?;
            if policy == MergePolicy::Append {
                let appendable = match (self.values.get(key), value) {
                    (None, StateValue::Messages(_) | StateValue::List(_)) => true,
                    (Some(existing), value) => existing.kind() == value.kind() && value.is_list(),
                    _ => false,
                };
                if !appendable {
                    return Err(QuorumError::Graph(format!(
                        "cannot append a {} value to '{}'",
                        value.kind(),
                        key
                    )));
                }
            }
        }

        for (key, value) in update.values {
            let policy = schema.policy(&key);
            match (policy, self.values.entry(key)) {
                (Some(MergePolicy::Append), Entry::Occupied(mut slot)) => {
                    match (slot.get_mut(), value) {
                        (StateValue::Messages(cur), StateValue::Messages(new)) => cur.extend(new),
                        (StateValue::List(cur), StateValue::List(new)) => cur.extend(new),
                        // Kinds were checked above.
                        (cur, new) => *cur = new,
                    }
                }
                (_, Entry::Occupied(mut slot)) => {
                    slot.insert(value);
                }
                (_, Entry::Vacant(slot)) => {
                    slot.insert(value);
                }
            }
        }
        Ok(())
    }
}

/// A partial state update produced by one node.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    values: BTreeMap<String, StateValue>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: StateValue) -> Self {
        self.values.insert(key.into(), value);
        self
    }

    fn text(self, key: &str, value: impl Into<String>) -> Self {
        self.set(key, StateValue::Text(value.into()))
    }

    fn push_message(mut self, key: &str, message: Message) -> Self {
        match self.values.get_mut(key) {
            Some(StateValue::Messages(list)) => list.push(message),
            _ => {
                self.values.insert(key.to_string(), StateValue::Messages(vec![message]));
            }
        }
        self
    }

    pub fn user_input(self, input: impl Into<String>) -> Self {
        self.text(keys::USER_INPUT, input)
    }

    pub fn next(self, target: impl Into<String>) -> Self {
        self.text(keys::NEXT, target)
    }

    pub fn finished(self, finished: bool) -> Self {
        self.set(keys::FINISHED, StateValue::Flag(finished))
    }

    pub fn result(self, result: impl Into<String>) -> Self {
        self.text(keys::RESULT, result)
    }

    pub fn current_agent(self, agent: impl Into<String>) -> Self {
        self.text(keys::CURRENT_AGENT, agent)
    }

    pub fn has_history(self, has_history: bool) -> Self {
        self.set(keys::HAS_HISTORY, StateValue::Flag(has_history))
    }

    pub fn error(self, error: impl Into<String>) -> Self {
        self.text(keys::ERROR, error)
    }

    /// Queue one message for the `messages` log.
    pub fn message(self, message: Message) -> Self {
        self.push_message(keys::MESSAGES, message)
    }

    pub fn messages(self, messages: Vec<Message>) -> Self {
        messages.into_iter().fold(self, |u, m| u.message(m))
    }

    /// Queue one message for the `sessionHistory` log.
    pub fn session_message(self, message: Message) -> Self {
        self.push_message(keys::SESSION_HISTORY, message)
    }

    pub fn session_history(self, messages: Vec<Message>) -> Self {
        messages.into_iter().fold(self, |u, m| u.session_message(m))
    }

    pub fn tool_result(mut self, entry: impl Into<String>) -> Self {
        match self.values.get_mut(keys::TOOL_RESULTS) {
            Some(StateValue::List(list)) => list.push(entry.into()),
            _ => {
                self.values
                    .insert(keys::TOOL_RESULTS.to_string(), StateValue::List(vec![entry.into()]));
            }
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&StateValue> {
        self.values.get(key)
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_keys_accumulate_and_overwrite_keys_replace() {
        let schema = StateSchema::session();
        let mut state = SessionState::new();

        state
            .apply(
                &schema,
                StateUpdate::new()
                    .message(Message::user("hi"))
                    .tool_result("search: a")
                    .next("search"),
            )
            .unwrap();
        state
            .apply(
                &schema,
                StateUpdate::new()
                    .message(Message::assistant("hello"))
                    .tool_result("analysis: b")
                    .next("summary"),
            )
            .unwrap();

        assert_eq!(state.messages().len(), 2);
        assert_eq!(state.tool_results(), &["search: a", "analysis: b"]);
        assert_eq!(state.next(), Some("summary"));
    }

    #[test]
    fn undeclared_key_rejects_whole_update() {
        let schema = StateSchema::new().overwrite(keys::NEXT);
        let mut state = SessionState::new();
        let update = StateUpdate::new()
            .next("search")
            .set("mystery", StateValue::Flag(true));

        let err = state.apply(&schema, update).unwrap_err();
        assert!(matches!(err, QuorumError::UndeclaredStateKey(ref k) if k == "mystery"));
        assert!(state.next().is_none());
    }

    #[test]
    fn appending_scalar_is_rejected() {
        let schema = StateSchema::session();
        let mut state = SessionState::new();
        let update = StateUpdate::new().set(keys::MESSAGES, StateValue::Text("oops".into()));
        assert!(matches!(
            state.apply(&schema, update),
            Err(QuorumError::Graph(_))
        ));
    }

    #[test]
    fn flags_default_to_false() {
        let state = SessionState::new();
        assert!(!state.is_finished());
        assert!(!state.has_history());
        assert_eq!(state.user_input(), "");
        assert!(state.result().is_none());
    }

    #[test]
    fn update_builder_groups_messages() {
        let update = StateUpdate::new()
            .messages(vec![Message::user("a"), Message::user("b")])
            .session_message(Message::assistant("c"));
        match update.get(keys::MESSAGES) {
            Some(StateValue::Messages(m)) => assert_eq!(m.len(), 2),
            other => panic!("unexpected: {:?}", other),
        }
        assert_eq!(update.keys().count(), 2);
    }
}
