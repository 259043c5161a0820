use tracing::debug;

use quorum_core::config::MemoryConfig;
use quorum_core::types::{Message, Role};

use crate::tokens::{estimate_message_tokens, estimate_messages_tokens};

/// Earliest non-system messages that may use the safety margin.
const PROTECTED_HEAD: usize = 3;

/// Never truncate below this many messages.
const MIN_RETAINED: usize = 2;

/// Ordered message log with a token budget.
///
/// Appending re-evaluates the budget. When the estimate exceeds
/// `max_tokens`, the log is truncated: system messages are always kept, the
/// newest other messages are admitted while the total stays within
/// `max_tokens - safety_margin`, and the first three non-system messages may
/// still be admitted up to the hard `max_tokens`. Kept messages retain their
/// original order.
#[derive(Debug, Clone)]
pub struct Memory {
    messages: Vec<Message>,
    max_tokens: usize,
    safety_margin: usize,
}

impl Memory {
    pub fn new(max_tokens: usize, safety_margin: usize) -> Self {
        Self {
            messages: Vec::new(),
            max_tokens,
            safety_margin,
        }
    }

    pub fn from_config(config: &MemoryConfig) -> Self {
        Self::new(config.max_tokens, config.safety_margin)
    }

    pub fn add_message(&mut self, message: Message) {
        self.messages.push(message);
        self.enforce_budget();
    }

    pub fn add_messages(&mut self, messages: impl IntoIterator<Item = Message>) {
        self.messages.extend(messages);
        self.enforce_budget();
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// The last `n` messages, or all of them if fewer.
    pub fn recent(&self, n: usize) -> &[Message] {
        let start = self.messages.len().saturating_sub(n);
        &self.messages[start..]
    }

    pub fn last(&self) -> Option<&Message> {
        self.messages.last()
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn clear(&mut self) {
        self.messages.clear();
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    pub fn token_count(&self) -> usize {
        estimate_messages_tokens(&self.messages)
    }

    fn enforce_budget(&mut self) {
        let total = self.token_count();
        if total <= self.max_tokens || self.messages.len() <= MIN_RETAINED {
            return;
        }

        let before = self.messages.len();
        let costs: Vec<usize> = self.messages.iter().map(estimate_message_tokens).collect();
        let mut keep = vec![false; before];
        let mut current = 0usize;

        for (idx, msg) in self.messages.iter().enumerate() {
            if msg.role() == Role::System {
                keep[idx] = true;
                current += costs[idx];
            }
        }

        let others: Vec<usize> = (0..before).filter(|&idx| !keep[idx]).collect();
        let soft_limit = self.max_tokens.saturating_sub(self.safety_margin);

        for (rank, &idx) in others.iter().enumerate().rev() {
            let cost = costs[idx];
            if current + cost <= soft_limit
                || (rank < PROTECTED_HEAD && current + cost <= self.max_tokens)
            {
                keep[idx] = true;
                current += cost;
            }
        }

        let mut kept = keep.iter().filter(|k| **k).count();
        for &idx in others.iter().rev() {
            if kept >= MIN_RETAINED {
                break;
            }
            if !keep[idx] {
                keep[idx] = true;
                current += costs[idx];
                kept += 1;
            }
        }

        let mut flags = keep.into_iter();
        self.messages.retain(|_| flags.next().unwrap_or(false));

        debug!(
            before,
            after = self.messages.len(),
            tokens_before = total,
            tokens_after = current,
            budget = self.max_tokens,
            "Truncated memory to token budget"
        );
    }
}

impl Default for Memory {
    fn default() -> Self {
        Self::from_config(&MemoryConfig::default())
    }
}
