use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::traits::Tool;
use weft_core::types::{ToolContext, ToolResult};

use super::{send, Outbound};

/// Generic outbound HTTP call. Transport for webhook nodes.
///
/// Always succeeds once a response arrives; the status code is part of the
/// output so callers decide what counts as failure. Redirects are followed
/// only to hosts the call's policy allows.
pub struct HttpRequestTool;

#[derive(Deserialize)]
struct HttpRequestInput {
    url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "GET".into()
}

fn tool_err(message: impl Into<String>) -> WeftError {
    super::tool_err("http_request", message)
}

impl Tool for HttpRequestTool {
    fn name(&self) -> &str {
        "http_request"
    }

    fn description(&self) -> &str {
        "Make an HTTP request. Returns status and body (parsed as JSON when possible)."
    }

    fn timeout_secs(&self) -> u64 {
        60
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string" },
                "method": { "type": "string", "description": "HTTP method (default: GET)" },
                "headers": { "type": "object", "description": "Request headers" },
                "body": { "description": "Request body; objects are sent as JSON" }
            },
            "required": ["url"]
        })
    }

    fn execute(
        &self,
        input: serde_json::Value,
        ctx: ToolContext,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        Box::pin(async move {
            let p: HttpRequestInput =
                serde_json::from_value(input).map_err(|e| WeftError::ToolValidation {
                    tool: "http_request".into(),
                    message: e.to_string(),
                })?;

            let method = reqwest::Method::from_bytes(p.method.to_uppercase().as_bytes())
                .map_err(|e| tool_err(format!("invalid method '{}': {}", p.method, e)))?;

            debug!(url = %p.url, method = %method, "Sending HTTP request");

            let request = Outbound {
                tool: "http_request",
                method,
                url: &p.url,
                headers: &p.headers,
                body: p.body.as_ref(),
            };
            let resp = send(request, &ctx.policy).await?;
            let status = resp.status().as_u16();
            let text = resp
                .text()
                .await
                .map_err(|e| tool_err(format!("Failed to read response body: {}", e)))?;
            let body = serde_json::from_str::<serde_json::Value>(&text)
                .unwrap_or(serde_json::Value::String(text));

            Ok(ToolResult::success(serde_json::json!({
                "status": status,
                "body": body,
            })))
        })
    }
}
