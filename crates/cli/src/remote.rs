//! Network collaborators: plain HTTP, MCP tool calls and an OpenAI-compatible model.

use std::{env, time::Duration};

use anyhow::{Context, Result, anyhow, bail};
use indexmap::IndexMap;
use reqwest::{
    Client, Method, RequestBuilder,
    header::{self, HeaderMap},
};
use serde_json::{Value, json};
use stepline_engine::services::{HttpRequest, HttpResponse, McpCall, ModelRequest, ModelResponse};
use tracing::debug;

const MCP_PROTOCOL_VERSION: &str = "2025-03-26";
const MCP_SESSION_HEADER: &str = "mcp-session-id";

/// Chat-completions endpoint used by `command` nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelEndpoint {
    pub url: String,
    pub api_key: Option<String>,
    pub model: String,
}

impl ModelEndpoint {
    /// Reads `STEPLINE_MODEL_URL`, `STEPLINE_MODEL_API_KEY` and `STEPLINE_MODEL`.
    pub fn from_env() -> Option<Self> {
        let url = env::var("STEPLINE_MODEL_URL").ok().filter(|url| !url.trim().is_empty())?;
        Some(Self {
            url,
            api_key: env::var("STEPLINE_MODEL_API_KEY").ok().filter(|key| !key.is_empty()),
            model: env::var("STEPLINE_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct RemoteClient {
    http: Client,
    model: Option<ModelEndpoint>,
}

impl RemoteClient {
    pub fn new(model: Option<ModelEndpoint>) -> Result<Self> {
        let http = Client::builder()
            .connect_timeout(Duration::from_secs(30))
            .user_agent(concat!("stepline/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("build http client")?;
        Ok(Self { http, model })
    }

    pub fn has_model(&self) -> bool {
        self.model.is_some()
    }

    pub async fn send(&self, request: &HttpRequest) -> Result<HttpResponse> {
        let method = Method::from_bytes(request.method.trim().to_uppercase().as_bytes())
            .map_err(|_| anyhow!("invalid HTTP method '{}'", request.method))?;
        debug!(%method, url = %request.url, "sending http request");

        let mut builder = with_headers(self.http.request(method, &request.url), &request.headers);
        if let Some(body) = &request.body {
            builder = builder.body(body.clone());
        }
        let response = builder.send().await.map_err(|e| anyhow!("Network error: {}", e))?;

        let status = response.status().as_u16();
        let headers = header_map(response.headers());
        let body = response.text().await.unwrap_or_default();
        Ok(HttpResponse { status, headers, body })
    }

    /// Calls an MCP tool over the streamable HTTP transport.
    ///
    /// Each call opens its own session: `initialize`, `notifications/initialized`, then
    /// `tools/call`. JSON-RPC errors and tool results flagged `isError` fail the call.
    pub async fn call_tool(&self, call: &McpCall) -> Result<Value> {
        let initialize = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": MCP_PROTOCOL_VERSION,
                "capabilities": {},
                "clientInfo": { "name": "stepline", "version": env!("CARGO_PKG_VERSION") }
            }
        });
        let (session, _) = self.rpc(call, None, &initialize).await.context("MCP initialize failed")?;

        let initialized = json!({ "jsonrpc": "2.0", "method": "notifications/initialized" });
        with_headers(self.http.post(&call.url), &call.headers)
            .header(header::ACCEPT, "application/json, text/event-stream")
            .headers(session_header(session.as_deref()))
            .json(&initialized)
            .send()
            .await
            .map_err(|e| anyhow!("Network error: {}", e))?;

        let request = json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": call.tool, "arguments": call.arguments }
        });
        let (_, result) = self
            .rpc(call, session.as_deref(), &request)
            .await
            .with_context(|| format!("MCP tool '{}' failed", call.tool))?;

        if result.get("isError").and_then(Value::as_bool).unwrap_or(false) {
            bail!("tool reported an error: {}", result.get("content").cloned().unwrap_or(Value::Null));
        }
        Ok(result)
    }

    async fn rpc(&self, call: &McpCall, session: Option<&str>, message: &Value) -> Result<(Option<String>, Value)> {
        let response = with_headers(self.http.post(&call.url), &call.headers)
            .header(header::ACCEPT, "application/json, text/event-stream")
            .headers(session_header(session))
            .json(message)
            .send()
            .await
            .map_err(|e| anyhow!("Network error: {}", e))?;

        let status = response.status();
        let session = response
            .headers()
            .get(MCP_SESSION_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
            .or_else(|| session.map(str::to_string));
        let event_stream = response
            .headers()
            .get(header::CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|content_type| content_type.starts_with("text/event-stream"));
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("HTTP {}: {}", status.as_u16(), text);
        }

        let envelope = if event_stream { last_event_payload(&text)? } else { serde_json::from_str(&text)? };
        if let Some(error) = envelope.get("error") {
            bail!("JSON-RPC error: {error}");
        }
        Ok((session, envelope.get("result").cloned().unwrap_or(Value::Null)))
    }

    /// Sends one chat-completions request. Tool declarations are forwarded as-is; tool
    /// calls requested by the model are not executed locally.
    pub async fn generate(&self, request: &ModelRequest) -> Result<ModelResponse> {
        let Some(endpoint) = &self.model else {
            bail!("no AI model is configured; set STEPLINE_MODEL_URL");
        };
        let model = request.model.clone().unwrap_or_else(|| endpoint.model.clone());

        let mut messages = Vec::new();
        if let Some(system_prompt) = &request.system_prompt {
            messages.push(json!({ "role": "system", "content": system_prompt }));
        }
        let mut content = vec![json!({ "type": "text", "text": request.prompt })];
        for attachment in &request.attachments {
            if attachment.mime_type.starts_with("image/") {
                let url = format!("data:{};base64,{}", attachment.mime_type, attachment.data);
                content.push(json!({ "type": "image_url", "image_url": { "url": url } }));
            } else {
                content.push(json!({ "type": "text", "text": format!("{}:\n{}", attachment.name, attachment.data) }));
            }
        }
        messages.push(json!({ "role": "user", "content": content }));

        let mut body = json!({ "model": model, "messages": messages });
        if !request.tools.is_empty() {
            body["tools"] = Value::Array(request.tools.clone());
        }

        let mut builder = self.http.post(&endpoint.url).json(&body);
        if let Some(api_key) = &endpoint.api_key {
            builder = builder.bearer_auth(api_key);
        }
        debug!(url = %endpoint.url, %model, "sending model request");
        let response = builder.send().await.map_err(|e| anyhow!("Network error: {}", e))?;
        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("model endpoint returned HTTP {}: {}", status.as_u16(), text);
        }

        let payload: Value = serde_json::from_str(&text).context("model response is not JSON")?;
        let text = payload
            .pointer("/choices/0/message/content")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string();
        let model = payload.get("model").and_then(Value::as_str).map(str::to_string).or(Some(model));
        Ok(ModelResponse { text, model })
    }
}

fn with_headers(mut builder: RequestBuilder, headers: &IndexMap<String, String>) -> RequestBuilder {
    for (name, value) in headers {
        builder = builder.header(name.as_str(), value.as_str());
    }
    builder
}

fn session_header(session: Option<&str>) -> HeaderMap {
    let mut headers = HeaderMap::new();
    if let Some(value) = session.and_then(|session| header::HeaderValue::from_str(session).ok()) {
        headers.insert(MCP_SESSION_HEADER, value);
    }
    headers
}

fn header_map(headers: &HeaderMap) -> IndexMap<String, String> {
    headers
        .iter()
        .filter_map(|(name, value)| value.to_str().ok().map(|value| (name.as_str().to_string(), value.to_string())))
        .collect()
}

/// JSON payload of the last `data:` event in a server-sent event stream.
fn last_event_payload(stream: &str) -> Result<Value> {
    let mut last = None;
    let mut data = String::new();
    for line in stream.lines().chain(std::iter::once("")) {
        if let Some(chunk) = line.strip_prefix("data:") {
            if !data.is_empty() {
                data.push('\n');
            }
            data.push_str(chunk.trim_start());
        } else if line.trim().is_empty() && !data.is_empty() {
            last = Some(std::mem::take(&mut data));
        }
    }
    let payload = last.ok_or_else(|| anyhow!("event stream carried no data"))?;
    serde_json::from_str(&payload).context("event payload is not JSON")
}
