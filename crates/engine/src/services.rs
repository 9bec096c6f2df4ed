//! Capabilities injected into a run.
//!
//! The engine never touches storage, models or the network itself. Handlers call
//! through [`ServiceContext`], interactive nodes are answered through
//! [`PromptCallbacks`], and progress is reported to a [`ProgressObserver`]. Every
//! asynchronous capability receives the run's cancellation token so in-flight I/O can
//! be aborted instead of merely ignored.

use anyhow::{Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use stepline_types::{LogEntry, PromptRequest, RunStatus};
use tokio_util::sync::CancellationToken;

/// Descriptor of a stored file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct FileInfo {
    /// Opaque identifier assigned by the store.
    pub id: String,
    pub name: String,
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub modified_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// File content returned by [`ServiceContext::read_file`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileContent {
    pub info: FileInfo,
    pub content: String,
    /// The content is still encrypted; the caller must retry with a password.
    pub encrypted: bool,
}

/// Write request for [`ServiceContext::create_file`] and [`ServiceContext::update_file`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileWrite {
    pub path: String,
    pub content: String,
    pub mime_type: Option<String>,
    /// Keep the previous revision in the store's edit history.
    pub record_history: bool,
    /// Encrypt the content at rest.
    pub encrypt: bool,
}

/// Parameters of a file search.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileQuery {
    pub query: String,
    /// Match file contents as well as names.
    pub search_content: bool,
    pub limit: Option<usize>,
}

/// Sort order of a folder listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FileSort {
    #[default]
    Name,
    Modified,
}

/// Parameters of a folder listing.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FileListing {
    pub folder: String,
    pub limit: Option<usize>,
    pub sort: FileSort,
}

/// Binary or text payload attached to a model request.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Attachment {
    pub name: String,
    pub mime_type: String,
    /// Base64 data or plain text, as stored by the producing node.
    pub data: String,
}

/// AI model invocation, including the tools it may call.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelRequest {
    pub prompt: String,
    pub model: Option<String>,
    pub system_prompt: Option<String>,
    /// Tool declarations passed through to the model's tool-calling loop.
    pub tools: Vec<Value>,
    pub attachments: Vec<Attachment>,
}

/// Final answer of a model invocation after its tool-calling loop.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ModelResponse {
    pub text: String,
    pub model: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpRequest {
    pub method: String,
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub body: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: IndexMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

/// Tool invocation on an MCP server.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct McpCall {
    pub url: String,
    pub tool: String,
    pub arguments: Value,
    pub headers: IndexMap<String, String>,
}

/// Request to synchronize a file or folder into a retrieval index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RagSyncRequest {
    pub path: String,
    pub setting: Option<String>,
}

/// Store-wide settings that influence how drive nodes write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ServiceSettings {
    pub edit_history: bool,
    pub encryption: bool,
}

/// External capabilities consumed by node handlers.
///
/// Implementations must honor `cancel`: once it fires, pending calls should return
/// promptly. The interpreter also races every call against the token, so a slow
/// implementation cannot delay cancellation, but only the implementation can abort the
/// underlying request.
#[async_trait]
pub trait ServiceContext: Send + Sync {
    async fn read_file(&self, file_id: &str, password: Option<&str>, cancel: &CancellationToken) -> Result<FileContent>;

    async fn find_file_by_path(&self, path: &str, cancel: &CancellationToken) -> Result<Option<FileInfo>>;

    async fn search_files(&self, query: &FileQuery, cancel: &CancellationToken) -> Result<Vec<FileInfo>>;

    async fn list_files(&self, listing: &FileListing, cancel: &CancellationToken) -> Result<Vec<FileInfo>>;

    async fn list_folders(&self, folder: &str, cancel: &CancellationToken) -> Result<Vec<String>>;

    async fn create_file(&self, write: &FileWrite, cancel: &CancellationToken) -> Result<FileInfo>;

    async fn update_file(&self, file_id: &str, write: &FileWrite, cancel: &CancellationToken) -> Result<FileInfo>;

    /// Loads the YAML source of a workflow reference used by `workflow` nodes.
    async fn load_workflow_source(&self, reference: &str, cancel: &CancellationToken) -> Result<String>;

    async fn generate(&self, _request: &ModelRequest, _cancel: &CancellationToken) -> Result<ModelResponse> {
        bail!("no AI model is configured")
    }

    async fn http_request(&self, request: &HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse>;

    async fn mcp_call(&self, _call: &McpCall, _cancel: &CancellationToken) -> Result<Value> {
        bail!("MCP tool calls are not supported by this service context")
    }

    async fn rag_sync(&self, _request: &RagSyncRequest, _cancel: &CancellationToken) -> Result<Value> {
        bail!("retrieval sync is not supported by this service context")
    }

    fn settings(&self) -> ServiceSettings {
        ServiceSettings::default()
    }
}

/// Human answers for suspended runs.
///
/// Each method resolves to the raw answer, or `None` when the human declined.
#[async_trait]
pub trait PromptCallbacks: Send + Sync {
    async fn prompt_for_value(&self, request: &PromptRequest) -> Option<String>;

    async fn prompt_for_dialog(&self, request: &PromptRequest) -> Option<String>;

    async fn prompt_for_drive_file(&self, request: &PromptRequest) -> Option<String>;

    async fn prompt_for_diff(&self, request: &PromptRequest) -> Option<String>;

    async fn prompt_for_password(&self, request: &PromptRequest) -> Option<String>;
}

/// Receives progress for one or more runs.
pub trait ProgressObserver: Send + Sync {
    /// Called once when a node starts and once when it finishes.
    fn on_log(&self, entry: LogEntry);

    fn on_status(&self, _execution_id: &str, _status: RunStatus) {}

    fn on_prompt(&self, _request: &PromptRequest) {}
}

/// Observer that discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl ProgressObserver for NoopObserver {
    fn on_log(&self, _entry: LogEntry) {}
}

/// Observer that forwards log entries through `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl ProgressObserver for TracingObserver {
    fn on_log(&self, entry: LogEntry) {
        match entry.status {
            stepline_types::LogStatus::Error => {
                tracing::warn!(node_id = %entry.node_id, node_type = %entry.node_type, "{}", entry.message)
            }
            _ => tracing::info!(node_id = %entry.node_id, node_type = %entry.node_type, "{}", entry.message),
        }
    }

    fn on_status(&self, execution_id: &str, status: RunStatus) {
        tracing::debug!(execution_id, status = status.as_str(), "run status changed");
    }
}
