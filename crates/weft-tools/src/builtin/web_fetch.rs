use std::collections::BTreeMap;

use futures::future::BoxFuture;
use serde::Deserialize;
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::policy::ToolPolicy;
use weft_core::traits::Tool;
use weft_core::types::{ToolContext, ToolResult};

use super::{send, Outbound};

/// Fetch a page as text. Domain-restricted: with no `[tools.web_fetch]`
/// allowlist configured every host is rejected, redirect targets included.
pub struct WebFetchTool;

#[derive(Deserialize)]
struct WebFetchInput {
    url: String,
    #[serde(default)]
    max_length: Option<usize>,
}

fn tool_err(message: impl Into<String>) -> WeftError {
    super::tool_err("web_fetch", message)
}

impl Tool for WebFetchTool {
    fn name(&self) -> &str {
        "web_fetch"
    }

    fn timeout_secs(&self) -> u64 {
        60
    }

    fn description(&self) -> &str {
        "Fetch content from a URL and return it as text, truncated to max_length."
    }

    fn policy(&self) -> ToolPolicy {
        ToolPolicy {
            allowed_domains: Some(vec![]),
            ..Default::default()
        }
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch content from"
                },
                "max_length": {
                    "type": "integer",
                    "description": "Maximum characters to return (default: 30000)"
                }
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
            let params: WebFetchInput =
                serde_json::from_value(input).map_err(|e| WeftError::ToolValidation {
                    tool: "web_fetch".to_string(),
                    message: e.to_string(),
                })?;

            let max_length = params.max_length.unwrap_or(30_000);

            debug!(url = %params.url, "Fetching URL");

            let headers = BTreeMap::new();
            let request = Outbound {
                tool: "web_fetch",
                method: reqwest::Method::GET,
                url: &params.url,
                headers: &headers,
                body: None,
            };
            let resp = send(request, &ctx.policy).await?;

            let status = resp.status();
            if !status.is_success() {
                return Ok(ToolResult::error(format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                )));
            }

            let content_type = resp
                .headers()
                .get("content-type")
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string();

            let body = resp
                .text()
                .await
                .map_err(|e| tool_err(format!("Failed to read response body: {}", e)))?;

            let (text, truncated) = truncate_chars(&body, max_length);

            Ok(ToolResult::success(serde_json::json!({
                "url": params.url,
                "content_type": content_type,
                "text": text,
                "truncated": truncated,
            })))
        })
    }
}

fn truncate_chars(text: &str, max: usize) -> (String, bool) {
    match text.char_indices().nth(max) {
        Some((idx, _)) => (text[..idx].to_string(), true),
        None => (text.to_string(), false),
    }
}
