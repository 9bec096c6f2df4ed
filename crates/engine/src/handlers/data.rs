//! Nodes that call models and remote tools or reshape data.

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use super::{Directive, NodeHandler, StepContext, split_list, string_map};
use crate::services::{Attachment, HttpRequest, McpCall, ModelRequest, RagSyncRequest};

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^\s*```[A-Za-z0-9_-]*\s*\n?(.*?)\n?\s*```\s*$").expect("code fence pattern compiles"));

/// `command`: asks the AI model and stores its final answer.
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandHandler;

#[async_trait]
impl NodeHandler for CommandHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let tools = match step.json("tools")? {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(tools)) => tools,
            Some(_) => bail!("property 'tools' must be a JSON array"),
        };
        let attachments = split_list(step.property("attachments"))
            .into_iter()
            .map(|variable| attachment_from_variable(step, &variable))
            .collect::<Result<Vec<_>>>()?;

        let request = ModelRequest {
            prompt: step.required("prompt")?.to_string(),
            model: step.property("model").map(str::to_string),
            system_prompt: step.property("systemPrompt").map(str::to_string),
            tools,
            attachments,
        };

        let response = step
            .services
            .generate(&request, step.cancel)
            .await
            .context("model request failed")?;
        step.save("saveTo", response.text);
        Ok(Directive::Continue)
    }
}

fn attachment_from_variable(step: &StepContext<'_>, variable: &str) -> Result<Attachment> {
    let raw = step
        .variables
        .get(variable)
        .with_context(|| format!("attachment variable '{variable}' is not defined"))?;
    if let Ok(attachment) = serde_json::from_str::<Attachment>(raw) {
        return Ok(attachment);
    }
    Ok(Attachment {
        name: variable.to_string(),
        mime_type: "text/plain".to_string(),
        data: raw.to_string(),
    })
}

/// `http`: performs a request through the service context.
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpHandler;

#[async_trait]
impl NodeHandler for HttpHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let url = step.required("url")?.trim().to_string();
        let method = step.property("method").unwrap_or("GET").trim().to_ascii_uppercase();
        let mut headers = string_map(step.json("headers")?, "headers")?;
        let body = step.property("body").map(str::to_string);

        if body.is_some() && !headers.keys().any(|name| name.eq_ignore_ascii_case("content-type")) {
            let content_type = match step.property("contentType").map(str::trim) {
                None | Some("json") => "application/json",
                Some("form") => "application/x-www-form-urlencoded",
                Some("text") => "text/plain",
                Some(other) => other,
            };
            headers.insert("Content-Type".to_string(), content_type.to_string());
        }

        let request = HttpRequest {
            method,
            url,
            headers,
            body,
        };
        let response = step
            .services
            .http_request(&request, step.cancel)
            .await
            .with_context(|| format!("{} {} failed", request.method, request.url))?;

        if response.is_error() && step.flag("throwOnError") {
            bail!("{} {} returned status {}: {}", request.method, request.url, response.status, preview(&response.body));
        }

        if let Some(variable) = step.property("saveStatus").map(|name| name.trim().to_string()) {
            step.variables.set(variable, response.status.to_string());
        }
        step.save("saveTo", response.body);
        Ok(Directive::Continue)
    }
}

fn preview(text: &str) -> String {
    const LIMIT: usize = 200;
    match text.char_indices().nth(LIMIT) {
        Some((cut, _)) => format!("{}...", &text[..cut]),
        None => text.to_string(),
    }
}

/// `json`: parses a variable holding JSON text, tolerating a fenced code block.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonHandler;

#[async_trait]
impl NodeHandler for JsonHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let source = step.required("source")?.trim().to_string();
        let raw = step
            .variables
            .get(&source)
            .with_context(|| format!("source variable '{source}' is not defined"))?;
        let parsed: Value = serde_json::from_str(strip_code_fence(raw))
            .with_context(|| format!("variable '{source}' does not contain valid JSON"))?;
        step.save("saveTo", parsed.to_string());
        Ok(Directive::Continue)
    }
}

/// Returns the body of a Markdown code fence, or the trimmed text.
pub(crate) fn strip_code_fence(text: &str) -> &str {
    CODE_FENCE
        .captures(text)
        .and_then(|captures| captures.get(1))
        .map(|body| body.as_str().trim())
        .unwrap_or_else(|| text.trim())
}

/// `mcp`: calls a tool on an MCP server.
#[derive(Debug, Clone, Copy, Default)]
pub struct McpHandler;

#[async_trait]
impl NodeHandler for McpHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let call = McpCall {
            url: step.required("url")?.trim().to_string(),
            tool: step.required("tool")?.trim().to_string(),
            arguments: step.json("args")?.unwrap_or_else(|| Value::Object(Default::default())),
            headers: string_map(step.json("headers")?, "headers")?,
        };
        let result = step
            .services
            .mcp_call(&call, step.cancel)
            .await
            .with_context(|| format!("MCP tool '{}' failed", call.tool))?;

        match text_content(&result) {
            Some(text) => step.save("saveTo", text),
            None => step.save_json("saveTo", &result),
        }
        Ok(Directive::Continue)
    }
}

/// Joins the `text` items of an MCP `content` array.
fn text_content(result: &Value) -> Option<String> {
    let items = result.get("content")?.as_array()?;
    let texts: Vec<&str> = items
        .iter()
        .filter(|item| item.get("type").and_then(Value::as_str) == Some("text"))
        .filter_map(|item| item.get("text").and_then(Value::as_str))
        .collect();
    (!texts.is_empty()).then(|| texts.join("\n"))
}

/// `rag-sync`: pushes a file or folder into a retrieval index.
#[derive(Debug, Clone, Copy, Default)]
pub struct RagSyncHandler;

#[async_trait]
impl NodeHandler for RagSyncHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let request = RagSyncRequest {
            path: step.required("path")?.trim().to_string(),
            setting: step.property("ragSetting").map(str::to_string),
        };
        let result = step
            .services
            .rag_sync(&request, step.cancel)
            .await
            .with_context(|| format!("retrieval sync of '{}' failed", request.path))?;
        step.save_json("saveTo", &result);
        Ok(Directive::Continue)
    }
}

#[cfg(test)]
mod tests {
    use stepline_types::NodeType;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        context::ExecutionContext,
        handlers::test_support::{MemoryServices, RecordingObserver, node, step},
    };

    #[test]
    fn strips_markdown_fences() {
        assert_eq!(strip_code_fence("```json\n{\"a\":1}\n```"), "{\"a\":1}");
        assert_eq!(strip_code_fence("  [1,2] "), "[1,2]");
    }

    #[tokio::test]
    async fn json_node_normalizes_fenced_model_output() {
        let services = MemoryServices::default();
        let observer = RecordingObserver::default();
        let cancel = CancellationToken::new();
        let mut variables = ExecutionContext::with_variables([("reply", "```json\n{ \"items\": [1, 2] }\n```")]);

        let parse = node(NodeType::Json, &[("source", "reply"), ("saveTo", "data")]);
        JsonHandler
            .execute(&mut step(&parse, &mut variables, &services, &observer, &cancel))
            .await
            .expect("json");
        assert_eq!(variables.get("data"), Some(r#"{"items":[1,2]}"#));
    }

    #[tokio::test]
    async fn json_node_rejects_invalid_text() {
        let services = MemoryServices::default();
        let observer = RecordingObserver::default();
        let cancel = CancellationToken::new();
        let mut variables = ExecutionContext::with_variables([("reply", "not json")]);

        let parse = node(NodeType::Json, &[("source", "reply"), ("saveTo", "data")]);
        assert!(
            JsonHandler
                .execute(&mut step(&parse, &mut variables, &services, &observer, &cancel))
                .await
                .is_err()
        );
    }

    #[tokio::test]
    async fn http_node_saves_body_and_status() {
        let services = MemoryServices::default();
        let observer = RecordingObserver::default();
        let cancel = CancellationToken::new();
        let mut variables = ExecutionContext::with_variables([("id", "42")]);

        let fetch = node(
            NodeType::Http,
            &[
                ("url", "https://api.test/items/{{id}}"),
                ("method", "post"),
                ("body", r#"{"id":"{{id}}"}"#),
                ("saveTo", "body"),
                ("saveStatus", "status"),
            ],
        );
        HttpHandler
            .execute(&mut step(&fetch, &mut variables, &services, &observer, &cancel))
            .await
            .expect("http");

        assert_eq!(variables.get("body"), Some(r#"{"ok":true}"#));
        assert_eq!(variables.get("status"), Some("200"));
        let requests = services.http_requests.lock().expect("http lock");
        assert_eq!(requests[0].method, "POST");
        assert_eq!(requests[0].url, "https://api.test/items/42");
        assert_eq!(requests[0].headers.get("Content-Type").map(String::as_str), Some("application/json"));
    }

    #[tokio::test]
    async fn http_node_throws_on_error_status_when_asked() {
        let services = MemoryServices {
            http_status: 503,
            ..MemoryServices::default()
        };
        let observer = RecordingObserver::default();
        let cancel = CancellationToken::new();
        let mut variables = ExecutionContext::new();

        let lenient = node(NodeType::Http, &[("url", "https://api.test"), ("saveStatus", "status")]);
        HttpHandler
            .execute(&mut step(&lenient, &mut variables, &services, &observer, &cancel))
            .await
            .expect("lenient http");
        assert_eq!(variables.get("status"), Some("503"));

        let strict = node(NodeType::Http, &[("url", "https://api.test"), ("throwOnError", "true")]);
        let error = HttpHandler
            .execute(&mut step(&strict, &mut variables, &services, &observer, &cancel))
            .await
            .expect_err("strict http");
        assert!(error.to_string().contains("503"));
    }

    #[tokio::test]
    async fn command_node_passes_attachments_and_saves_answer() {
        let services = MemoryServices::default();
        let observer = RecordingObserver::default();
        let cancel = CancellationToken::new();
        let mut variables = ExecutionContext::with_variables([
            ("topic", "rust"),
            ("doc", r#"{"name":"a.png","mimeType":"image/png","data":"AAAA"}"#),
        ]);

        let ask = node(
            NodeType::Command,
            &[
                ("prompt", "Tell me about {{topic}}"),
                ("attachments", "doc"),
                ("tools", r#"[{"name":"search"}]"#),
                ("saveTo", "answer"),
            ],
        );
        CommandHandler
            .execute(&mut step(&ask, &mut variables, &services, &observer, &cancel))
            .await
            .expect("command");

        assert_eq!(variables.get("answer"), Some("echo: Tell me about rust"));
        let requests = services.model_requests.lock().expect("model lock");
        assert_eq!(requests[0].attachments[0].mime_type, "image/png");
        assert_eq!(requests[0].tools.len(), 1);
    }

    #[tokio::test]
    async fn mcp_node_extracts_text_content() {
        let services = MemoryServices::default();
        let observer = RecordingObserver::default();
        let cancel = CancellationToken::new();
        let mut variables = ExecutionContext::new();

        let call = node(
            NodeType::Mcp,
            &[("url", "http://mcp.test"), ("tool", "greet"), ("args", r#"{"who":"me"}"#), ("saveTo", "reply")],
        );
        McpHandler
            .execute(&mut step(&call, &mut variables, &services, &observer, &cancel))
            .await
            .expect("mcp");
        assert_eq!(variables.get("reply"), Some("tool says hi"));
        assert_eq!(services.mcp_calls.lock().expect("mcp lock")[0].arguments["who"], "me");
    }
}
