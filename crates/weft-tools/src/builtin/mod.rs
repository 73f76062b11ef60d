pub mod http_request;
pub mod web_fetch;

use std::collections::BTreeMap;
use std::sync::OnceLock;
use std::time::Duration;

use reqwest::header::LOCATION;
use reqwest::{Method, StatusCode, Url};
use tracing::debug;

use weft_core::error::{Result, WeftError};
use weft_core::policy::ToolPolicy;

const MAX_REDIRECTS: usize = 10;

/// Headers that are not forwarded when a redirect leaves the origin.
const SENSITIVE_HEADERS: [&str; 3] = ["authorization", "cookie", "proxy-authorization"];

fn tool_err(tool: &str, message: impl Into<String>) -> WeftError {
    WeftError::ToolExecution {
        tool: tool.to_string(),
        message: message.into(),
    }
}

/// Client shared by the built-in tools.
///
/// reqwest never follows redirects on its own; [`send`] does, hop by hop.
/// There is no request timeout here: the invoker bounds every call with the
/// tool's effective `timeout_secs`.
fn client(tool: &str) -> Result<&'static reqwest::Client> {
    static CLIENT: OnceLock<std::result::Result<reqwest::Client, String>> = OnceLock::new();
    CLIENT
        .get_or_init(|| {
            reqwest::Client::builder()
                .redirect(reqwest::redirect::Policy::none())
                .connect_timeout(Duration::from_secs(10))
                .user_agent("weft/0.1")
                .build()
                .map_err(|e| e.to_string())
        })
        .as_ref()
        .map_err(|e| tool_err(tool, format!("Failed to create HTTP client: {}", e)))
}

/// One outbound request made by a built-in tool.
pub(crate) struct Outbound<'a> {
    pub tool: &'a str,
    pub method: Method,
    pub url: &'a str,
    pub headers: &'a BTreeMap<String, String>,
    pub body: Option<&'a serde_json::Value>,
}

/// Send `request`, following up to ten redirects.
///
/// Every hop, the first included, must pass the domain allowlist of
/// `policy`. A hop that does not is rejected with `DomainNotAllowed` before
/// any connection to it is made.
pub(crate) async fn send(request: Outbound<'_>, policy: &ToolPolicy) -> Result<reqwest::Response> {
    let tool = request.tool;
    let client = client(tool)?;
    let mut url = Url::parse(request.url)
        .map_err(|e| tool_err(tool, format!("invalid url '{}': {}", request.url, e)))?;
    let mut method = request.method;
    let mut body = request.body;
    let mut same_origin = true;

    for hop in 0..=MAX_REDIRECTS {
        check_host(tool, &url, policy)?;

        let mut req = client.request(method.clone(), url.clone());
        for (name, value) in request.headers {
            let sensitive = SENSITIVE_HEADERS
                .iter()
                .any(|h| name.eq_ignore_ascii_case(h));
            if same_origin || !sensitive {
                req = req.header(name.as_str(), value.as_str());
            }
        }
        req = match body {
            Some(serde_json::Value::String(s)) => req.body(s.clone()),
            Some(other) => req.json(other),
            None => req,
        };

        let resp = req
            .send()
            .await
            .map_err(|e| tool_err(tool, format!("Request failed: {}", e)))?;
        let status = resp.status();
        if !status.is_redirection() {
            return Ok(resp);
        }
        let Some(location) = resp.headers().get(LOCATION).and_then(|v| v.to_str().ok()) else {
            return Ok(resp);
        };
        let next = url.join(location).map_err(|e| {
            tool_err(tool, format!("invalid redirect location '{}': {}", location, e))
        })?;
        debug!(tool, from = %url, to = %next, hop, status = status.as_u16(), "Following redirect");

        let rewrite_to_get = (status == StatusCode::SEE_OTHER && method != Method::HEAD)
            || (matches!(status, StatusCode::MOVED_PERMANENTLY | StatusCode::FOUND)
                && method == Method::POST);
        if rewrite_to_get {
            method = Method::GET;
            body = None;
        }
        same_origin &= next.origin() == url.origin();
        url = next;
    }

    Err(tool_err(tool, format!("too many redirects (max {})", MAX_REDIRECTS)))
}

fn check_host(tool: &str, url: &Url, policy: &ToolPolicy) -> Result<()> {
    let host = url.host_str().unwrap_or_default();
    if policy.allows_host(host) {
        Ok(())
    } else {
        Err(WeftError::DomainNotAllowed {
            tool: tool.to_string(),
            host: host.to_string(),
        })
    }
}
