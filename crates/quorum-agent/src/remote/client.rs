use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::json;
use tracing::{debug, warn};

use quorum_core::error::{QuorumError, Result};

use super::card::AgentCapabilities;
use super::registry::A2aRegistry;

/// Agent-to-agent transport.
pub trait A2aClient: Send + Sync + 'static {
    /// Whether the agent answers its health check. Unknown agents are an
    /// error; unreachable ones are `Ok(false)`.
    fn check_availability<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<bool>>;

    fn capabilities<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<AgentCapabilities>>;

    fn invoke_skill<'a>(
        &'a self,
        agent_id: &'a str,
        skill_id: &'a str,
        params: serde_json::Value,
    ) -> BoxFuture<'a, Result<String>>;

    fn send_message<'a>(&'a self, agent_id: &'a str, message: &'a str) -> BoxFuture<'a, Result<String>>;
}

/// JSON-over-HTTP A2A client.
///
/// Paths are relative to the registered endpoint: `GET /health`,
/// `GET /.well-known/agent.json`, `POST /skills/{skill}` answering
/// `{"result": ...}`, and `POST /messages` answering `{"reply": ...}`.
pub struct HttpA2aClient {
    http: Client,
    registry: Arc<A2aRegistry>,
}

impl HttpA2aClient {
    pub fn new(registry: Arc<A2aRegistry>) -> Self {
        Self::with_timeout(registry, Duration::from_secs(30))
    }

    pub fn with_timeout(registry: Arc<A2aRegistry>, timeout: Duration) -> Self {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!(error = %e, "Failed to build configured HTTP client, using defaults");
                Client::new()
            });
        Self { http, registry }
    }

    pub fn registry(&self) -> &Arc<A2aRegistry> {
        &self.registry
    }

    fn url(&self, agent_id: &str, path: &str) -> Result<String> {
        Ok(format!("{}{}", self.registry.endpoint(agent_id)?, path))
    }

    async fn post_for<T: DeserializeOwned>(
        &self,
        agent_id: &str,
        path: &str,
        body: serde_json::Value,
    ) -> Result<T> {
        let url = self.url(agent_id, path)?;
        debug!(agent_id, url = %url, "A2A request");
        let resp = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| remote_error(agent_id, e))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            return Err(remote_error(agent_id, format!("HTTP {}: {}", status, text)));
        }
        resp.json().await.map_err(|e| remote_error(agent_id, e))
    }
}

fn remote_error(agent_id: &str, message: impl ToString) -> QuorumError {
    QuorumError::Remote {
        agent: agent_id.to_string(),
        message: message.to_string(),
    }
}

#[derive(serde::Deserialize)]
struct SkillResponse {
    result: String,
}

#[derive(serde::Deserialize)]
struct MessageResponse {
    reply: String,
}

impl A2aClient for HttpA2aClient {
    fn check_availability<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<bool>> {
        Box::pin(async move {
            let url = self.url(agent_id, "/health")?;
            match self.http.get(&url).send().await {
                Ok(resp) => Ok(resp.status().is_success()),
                Err(e) => {
                    warn!(agent_id, error = %e, "Remote agent health check failed");
                    Ok(false)
                }
            }
        })
    }

    fn capabilities<'a>(&'a self, agent_id: &'a str) -> BoxFuture<'a, Result<AgentCapabilities>> {
        Box::pin(async move {
            let url = self.url(agent_id, "/.well-known/agent.json")?;
            let resp = self
                .http
                .get(&url)
                .send()
                .await
                .map_err(|e| remote_error(agent_id, e))?;
            if !resp.status().is_success() {
                return Err(remote_error(agent_id, format!("HTTP {}", resp.status())));
            }
            resp.json().await.map_err(|e| remote_error(agent_id, e))
        })
    }

    fn invoke_skill<'a>(
        &'a self,
        agent_id: &'a str,
        skill_id: &'a str,
        params: serde_json::Value,
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let path = format!("/skills/{}", skill_id);
            let resp: SkillResponse = self.post_for(agent_id, &path, params).await?;
            Ok(resp.result)
        })
    }

    fn send_message<'a>(&'a self, agent_id: &'a str, message: &'a str) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let resp: MessageResponse = self
                .post_for(agent_id, "/messages", json!({ "message": message }))
                .await?;
            Ok(resp.reply)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn unknown_agent_is_not_found() {
        let client = HttpA2aClient::new(Arc::new(A2aRegistry::new()));
        let err = client.check_availability("ghost").await.unwrap_err();
        assert!(matches!(err, QuorumError::AgentNotFound(_)));
        assert!(client.invoke_skill("ghost", "x", json!({})).await.is_err());
    }

    #[tokio::test]
    async fn unreachable_agent_is_unavailable() {
        let registry = Arc::new(A2aRegistry::new());
        registry.register("down", "http://127.0.0.1:1", AgentCapabilities::default());
        let client = HttpA2aClient::with_timeout(registry, Duration::from_secs(2));

        assert!(!client.check_availability("down").await.unwrap());
        let err = client.send_message("down", "hi").await.unwrap_err();
        assert!(matches!(err, QuorumError::Remote { .. }));
    }
}
