pub mod providers;
pub mod retry;

use std::sync::Arc;

use quorum_core::config::ModelConfig;
use quorum_core::error::{QuorumError, Result};
use quorum_core::traits::LlmClient;

pub use providers::openai::OpenAiClient;
pub use retry::RetryingClient;

/// Create an LLM client based on the provider name, wrapped with retries
/// when the model config carries a `[model.retry]` section.
pub fn create_client(config: &ModelConfig) -> Result<Arc<dyn LlmClient>> {
    let base: Box<dyn LlmClient> = match config.provider.as_str() {
        "openai" | "ollama" | "vllm" | "groq" | "openrouter" | "deepseek" => {
            Box::new(OpenAiClient::new())
        }
        other => return Err(QuorumError::UnsupportedProvider(other.to_string())),
    };

    Ok(match &config.retry {
        Some(retry) => Arc::new(RetryingClient::new(base, retry.clone())),
        None => Arc::from(base),
    })
}
