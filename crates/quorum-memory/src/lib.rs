//! Bounded conversation memory.
//!
//! Every agent owns one [`Memory`]. Appends re-check a token budget computed
//! by the deterministic estimator in [`tokens`] and truncate the log when it
//! is exceeded.

pub mod memory;
pub mod tokens;

pub use memory::Memory;
pub use tokens::{estimate_message_tokens, estimate_messages_tokens, estimate_tokens};
