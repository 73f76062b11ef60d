use std::time::Duration;

use futures::future::BoxFuture;
use tracing::debug;

use weft_core::config::AgentClientConfig;
use weft_core::error::{Result, WeftError};
use weft_core::traits::AgentClient;
use weft_core::types::{AgentRequest, AgentResponse};

/// Agent backend reached over HTTP.
///
/// POSTs the [`AgentRequest`] as JSON to the configured endpoint and expects
/// an [`AgentResponse`] JSON body back.
pub struct HttpAgentClient {
    config: AgentClientConfig,
    client: reqwest::Client,
}

impl HttpAgentClient {
    pub fn new(config: AgentClientConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("weft/0.1")
            .build()
            .map_err(|e| WeftError::Config(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { config, client })
    }

    fn prepare(&self, mut request: AgentRequest) -> AgentRequest {
        if let Some(model) = &self.config.model {
            if request.params.get("model").is_none() {
                let mut params = match request.params {
                    serde_json::Value::Object(map) => map,
                    _ => serde_json::Map::new(),
                };
                params.insert("model".into(), serde_json::Value::String(model.clone()));
                request.params = serde_json::Value::Object(params);
            }
        }
        request
    }
}

impl AgentClient for HttpAgentClient {
    fn invoke(&self, request: AgentRequest) -> BoxFuture<'_, Result<AgentResponse>> {
        Box::pin(async move {
            let request = self.prepare(request);
            debug!(
                node_id = %request.node_id,
                turn = request.turn,
                endpoint = %self.config.endpoint,
                "Calling agent backend"
            );

            let mut req = self.client.post(&self.config.endpoint).json(&request);
            if let Some(key) = &self.config.api_key {
                req = req.bearer_auth(key);
            }

            let resp = req
                .send()
                .await
                .map_err(|e| WeftError::AgentRequest(e.to_string()))?;
            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(WeftError::AgentRequest(format!(
                    "HTTP {}: {}",
                    status.as_u16(),
                    body
                )));
            }

            resp.json::<AgentResponse>()
                .await
                .map_err(|e| WeftError::AgentRequest(format!("invalid response: {}", e)))
        })
    }
}
