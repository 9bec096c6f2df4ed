//! Node handlers and the registry that dispatches to them.
//!
//! A handler receives a [`StepContext`] holding the node, its template-resolved
//! properties, the run's variables and the injected services. It returns a
//! [`Directive`] telling the interpreter where control goes next. Interactive handlers
//! return [`Directive::Suspend`] and are re-entered through [`NodeHandler::resume`]
//! once the answer arrives.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;
use stepline_types::{LogEntry, LogStatus, NodeType, PromptPayload, PromptRequest, workflow::properties::is_truthy_flag};
use tokio_util::sync::CancellationToken;

use crate::{
    context::ExecutionContext,
    model::{Target, WorkflowNode},
    prompt::new_prompt_request,
    services::{ProgressObserver, ServiceContext},
};

mod control;
mod data;
mod drive;
mod interactive;
mod workflow;

pub use control::{ConditionHandler, SetHandler, SleepHandler, VariableHandler};
pub use data::{CommandHandler, HttpHandler, JsonHandler, McpHandler, RagSyncHandler};
pub use drive::{
    DriveFileHandler, DriveFolderListHandler, DriveListHandler, DriveReadHandler, DriveSaveHandler, DriveSearchHandler, PreviewHandler,
};
pub use interactive::{DialogHandler, PromptFileHandler, PromptSelectionHandler, PromptValueHandler};
pub use workflow::SubWorkflowHandler;

/// Control-flow decision returned by a handler.
#[derive(Debug, Clone, PartialEq)]
pub enum Directive {
    /// Advance along the node's `next` jump.
    Continue,
    /// Advance to an explicit target.
    JumpTo(Target),
    /// Stop the run as completed.
    Terminate,
    /// Park the run until the request is answered.
    Suspend(PromptRequest),
    /// Run a nested workflow, then continue.
    Call(SubWorkflowCall),
}

/// Nested workflow invocation requested by a `workflow` node.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubWorkflowCall {
    /// Reference handed to [`ServiceContext::load_workflow_source`].
    pub reference: String,
    /// Workflow selected inside a multi-workflow document.
    pub name: Option<String>,
    /// Child variable name to already resolved value.
    pub inputs: IndexMap<String, String>,
    /// Parent variable name to child variable name.
    pub outputs: IndexMap<String, String>,
}

/// Everything a handler may touch while running one node.
pub struct StepContext<'a> {
    pub execution_id: &'a str,
    pub node: &'a WorkflowNode,
    /// Template-resolved properties.
    pub properties: IndexMap<String, String>,
    pub variables: &'a mut ExecutionContext,
    pub services: &'a dyn ServiceContext,
    pub observer: &'a dyn ProgressObserver,
    pub cancel: &'a CancellationToken,
    output: Option<String>,
}

impl<'a> StepContext<'a> {
    pub fn new(
        execution_id: &'a str,
        node: &'a WorkflowNode,
        properties: IndexMap<String, String>,
        variables: &'a mut ExecutionContext,
        services: &'a dyn ServiceContext,
        observer: &'a dyn ProgressObserver,
        cancel: &'a CancellationToken,
    ) -> Self {
        Self {
            execution_id,
            node,
            properties,
            variables,
            services,
            observer,
            cancel,
            output: None,
        }
    }

    /// Resolved property, treating blank values as absent.
    pub fn property(&self, name: &str) -> Option<&str> {
        self.properties
            .get(name)
            .map(String::as_str)
            .filter(|value| !value.trim().is_empty())
    }

    /// Resolved property including blank values.
    pub fn property_or_default(&self, name: &str) -> String {
        self.properties.get(name).cloned().unwrap_or_default()
    }

    pub fn required(&self, name: &str) -> Result<&str> {
        match self.property(name) {
            Some(value) => Ok(value),
            None => bail!("missing required property '{name}'"),
        }
    }

    pub fn flag(&self, name: &str) -> bool {
        is_truthy_flag(self.property(name))
    }

    /// Parses an optional property into `T`.
    pub fn parsed<T>(&self, name: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::error::Error + Send + Sync + 'static,
    {
        self.property(name)
            .map(|value| {
                value
                    .trim()
                    .parse::<T>()
                    .with_context(|| format!("property '{name}' has invalid value '{value}'"))
            })
            .transpose()
    }

    /// Parses an optional property as JSON.
    pub fn json(&self, name: &str) -> Result<Option<Value>> {
        self.property(name)
            .map(|value| serde_json::from_str(value).with_context(|| format!("property '{name}' is not valid JSON")))
            .transpose()
    }

    /// Stores `value` in the variable named by property `target` (for example `saveTo`)
    /// and records it as the step output.
    pub fn save(&mut self, target: &str, value: impl Into<String>) {
        let value = value.into();
        if let Some(variable) = self.property(target).map(|name| name.trim().to_string()) {
            self.variables.set(variable, value.clone());
        }
        self.output = Some(value);
    }

    /// Like [`StepContext::save`] for JSON values; strings are stored raw.
    pub fn save_json(&mut self, target: &str, value: &Value) {
        let text = match value {
            Value::String(text) => text.clone(),
            other => other.to_string(),
        };
        self.save(target, text);
    }

    pub fn record_output(&mut self, value: impl Into<String>) {
        self.output = Some(value.into());
    }

    pub fn output(&self) -> Option<&str> {
        self.output.as_deref()
    }

    pub fn take_output(&mut self) -> Option<String> {
        self.output.take()
    }

    /// Builds a suspend directive for this node.
    pub fn prompt(&self, payload: PromptPayload) -> Directive {
        Directive::Suspend(new_prompt_request(self.execution_id, &self.node.id, payload))
    }

    /// Emits an informational progress entry for this node.
    pub fn log(&self, message: impl Into<String>) {
        self.observer.on_log(LogEntry::new(
            self.node.id.clone(),
            self.node.node_type.as_str(),
            message,
            LogStatus::Info,
        ));
    }
}

/// Behaviour of one node type.
#[async_trait]
pub trait NodeHandler: Send + Sync {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive>;

    /// Continues a node after the human answered `request`. `None` means declined.
    async fn resume(&self, step: &mut StepContext<'_>, request: &PromptRequest, answer: Option<String>) -> Result<Directive> {
        let _ = answer;
        bail!(
            "node type '{}' cannot resume prompt '{}'",
            step.node.node_type,
            request.id
        )
    }
}

/// Dispatch table from node type to handler.
#[derive(Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<NodeType, Arc<dyn NodeHandler>>,
}

impl HandlerRegistry {
    /// Registry without any handler.
    pub fn empty() -> Self {
        Self { handlers: HashMap::new() }
    }

    /// Registry covering every built-in node type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::empty();
        registry.register(NodeType::Variable, VariableHandler);
        registry.register(NodeType::Set, SetHandler);
        registry.register(NodeType::If, ConditionHandler);
        registry.register(NodeType::While, ConditionHandler);
        registry.register(NodeType::Sleep, SleepHandler);
        registry.register(NodeType::Command, CommandHandler);
        registry.register(NodeType::Http, HttpHandler);
        registry.register(NodeType::Json, JsonHandler);
        registry.register(NodeType::DriveFile, DriveFileHandler);
        registry.register(NodeType::DriveRead, DriveReadHandler);
        registry.register(NodeType::DriveSearch, DriveSearchHandler);
        registry.register(NodeType::DriveList, DriveListHandler);
        registry.register(NodeType::DriveFolderList, DriveFolderListHandler);
        registry.register(NodeType::DriveSave, DriveSaveHandler);
        registry.register(NodeType::Preview, PreviewHandler);
        registry.register(NodeType::Dialog, DialogHandler);
        registry.register(NodeType::PromptValue, PromptValueHandler);
        registry.register(NodeType::PromptFile, PromptFileHandler);
        registry.register(NodeType::PromptSelection, PromptSelectionHandler);
        registry.register(NodeType::Workflow, SubWorkflowHandler);
        registry.register(NodeType::Mcp, McpHandler);
        registry.register(NodeType::RagSync, RagSyncHandler);
        registry
    }

    /// Installs or replaces the handler for a node type.
    pub fn register(&mut self, node_type: NodeType, handler: impl NodeHandler + 'static) {
        self.handlers.insert(node_type, Arc::new(handler));
    }

    pub fn get(&self, node_type: NodeType) -> Option<Arc<dyn NodeHandler>> {
        self.handlers.get(&node_type).cloned()
    }

    pub fn supports(&self, node_type: NodeType) -> bool {
        self.handlers.contains_key(&node_type)
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<&'static str> = self.handlers.keys().map(NodeType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("HandlerRegistry").field("types", &types).finish()
    }
}

/// Splits a comma separated property into trimmed, non-empty items.
pub(crate) fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .map(|text| {
            text.split(',')
                .map(str::trim)
                .filter(|item| !item.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Reads a JSON object property as string pairs. Non-string values are kept as JSON text.
pub(crate) fn string_map(value: Option<Value>, name: &str) -> Result<IndexMap<String, String>> {
    match value {
        None | Some(Value::Null) => Ok(IndexMap::new()),
        Some(Value::Object(map)) => Ok(map
            .into_iter()
            .map(|(key, value)| {
                let text = match value {
                    Value::String(text) => text,
                    other => other.to_string(),
                };
                (key, text)
            })
            .collect()),
        Some(_) => bail!("property '{name}' must be a JSON object"),
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    //! In-memory collaborators shared by the handler tests.

    use std::sync::Mutex;

    use anyhow::{Result, anyhow};
    use async_trait::async_trait;
    use indexmap::IndexMap;
    use serde_json::Value;
    use stepline_types::{LogEntry, NodeType};
    use tokio_util::sync::CancellationToken;

    use crate::{
        context::ExecutionContext,
        model::{Jumps, Target, WorkflowNode},
        services::{
            FileContent, FileInfo, FileListing, FileQuery, FileWrite, HttpRequest, HttpResponse, McpCall, ModelRequest, ModelResponse,
            ProgressObserver, ServiceContext,
        },
    };

    use super::StepContext;

    #[derive(Default)]
    pub struct MemoryServices {
        pub files: Mutex<IndexMap<String, (FileInfo, String, Option<String>)>>,
        pub http_requests: Mutex<Vec<HttpRequest>>,
        pub http_status: u16,
        pub model_requests: Mutex<Vec<ModelRequest>>,
        pub mcp_calls: Mutex<Vec<McpCall>>,
    }

    impl MemoryServices {
        pub fn with_file(self, path: &str, content: &str) -> Self {
            self.insert(path, content, None);
            self
        }

        pub fn with_encrypted_file(self, path: &str, content: &str, password: &str) -> Self {
            self.insert(path, content, Some(password.to_string()));
            self
        }

        fn insert(&self, path: &str, content: &str, password: Option<String>) {
            let mut files = self.files.lock().expect("files lock");
            let info = FileInfo {
                id: format!("id-{}", files.len() + 1),
                name: path.rsplit('/').next().unwrap_or(path).to_string(),
                path: path.to_string(),
                ..FileInfo::default()
            };
            files.insert(path.to_string(), (info, content.to_string(), password));
        }

        pub fn content(&self, path: &str) -> Option<String> {
            self.files
                .lock()
                .expect("files lock")
                .get(path)
                .map(|(_, content, _)| content.clone())
        }
    }

    #[async_trait]
    impl ServiceContext for MemoryServices {
        async fn read_file(&self, file_id: &str, password: Option<&str>, _cancel: &CancellationToken) -> Result<FileContent> {
            let files = self.files.lock().expect("files lock");
            let (info, content, secret) = files
                .values()
                .find(|(info, _, _)| info.id == file_id)
                .ok_or_else(|| anyhow!("no file with id {file_id}"))?;
            let unlocked = secret.is_none() || secret.as_deref() == password;
            Ok(FileContent {
                info: info.clone(),
                content: if unlocked { content.clone() } else { "encrypted".into() },
                encrypted: !unlocked,
            })
        }

        async fn find_file_by_path(&self, path: &str, _cancel: &CancellationToken) -> Result<Option<FileInfo>> {
            Ok(self.files.lock().expect("files lock").get(path).map(|(info, _, _)| info.clone()))
        }

        async fn search_files(&self, query: &FileQuery, _cancel: &CancellationToken) -> Result<Vec<FileInfo>> {
            let files = self.files.lock().expect("files lock");
            Ok(files
                .values()
                .filter(|(info, content, _)| {
                    info.name.contains(&query.query) || (query.search_content && content.contains(&query.query))
                })
                .map(|(info, _, _)| info.clone())
                .take(query.limit.unwrap_or(usize::MAX))
                .collect())
        }

        async fn list_files(&self, listing: &FileListing, _cancel: &CancellationToken) -> Result<Vec<FileInfo>> {
            let files = self.files.lock().expect("files lock");
            Ok(files
                .values()
                .filter(|(info, _, _)| info.path.starts_with(&listing.folder))
                .map(|(info, _, _)| info.clone())
                .take(listing.limit.unwrap_or(usize::MAX))
                .collect())
        }

        async fn list_folders(&self, _folder: &str, _cancel: &CancellationToken) -> Result<Vec<String>> {
            Ok(vec!["notes".into(), "reports".into()])
        }

        async fn create_file(&self, write: &FileWrite, cancel: &CancellationToken) -> Result<FileInfo> {
            self.insert(&write.path, &write.content, None);
            self.find_file_by_path(&write.path, cancel)
                .await?
                .ok_or_else(|| anyhow!("created file vanished"))
        }

        async fn update_file(&self, file_id: &str, write: &FileWrite, _cancel: &CancellationToken) -> Result<FileInfo> {
            let mut files = self.files.lock().expect("files lock");
            let (info, content, _) = files
                .values_mut()
                .find(|(info, _, _)| info.id == file_id)
                .ok_or_else(|| anyhow!("no file with id {file_id}"))?;
            *content = write.content.clone();
            Ok(info.clone())
        }

        async fn load_workflow_source(&self, reference: &str, _cancel: &CancellationToken) -> Result<String> {
            self.content(reference).ok_or_else(|| anyhow!("workflow '{reference}' not found"))
        }

        async fn generate(&self, request: &ModelRequest, _cancel: &CancellationToken) -> Result<ModelResponse> {
            self.model_requests.lock().expect("model lock").push(request.clone());
            Ok(ModelResponse {
                text: format!("echo: {}", request.prompt),
                model: request.model.clone(),
            })
        }

        async fn http_request(&self, request: &HttpRequest, _cancel: &CancellationToken) -> Result<HttpResponse> {
            self.http_requests.lock().expect("http lock").push(request.clone());
            Ok(HttpResponse {
                status: if self.http_status == 0 { 200 } else { self.http_status },
                headers: IndexMap::new(),
                body: r#"{"ok":true}"#.into(),
            })
        }

        async fn mcp_call(&self, call: &McpCall, _cancel: &CancellationToken) -> Result<Value> {
            self.mcp_calls.lock().expect("mcp lock").push(call.clone());
            Ok(serde_json::json!({"content": [{"type": "text", "text": "tool says hi"}]}))
        }
    }

    #[derive(Default)]
    pub struct RecordingObserver {
        pub entries: Mutex<Vec<LogEntry>>,
    }

    impl ProgressObserver for RecordingObserver {
        fn on_log(&self, entry: LogEntry) {
            self.entries.lock().expect("entries lock").push(entry);
        }
    }

    pub fn node(node_type: NodeType, properties: &[(&str, &str)]) -> WorkflowNode {
        WorkflowNode {
            id: "node".into(),
            node_type,
            properties: properties
                .iter()
                .map(|(key, value)| (key.to_string(), value.to_string()))
                .collect(),
            jumps: Jumps {
                next: Target::PastEnd,
                true_next: None,
                false_next: None,
            },
        }
    }

    pub fn step<'a>(
        node: &'a WorkflowNode,
        variables: &'a mut ExecutionContext,
        services: &'a dyn ServiceContext,
        observer: &'a dyn ProgressObserver,
        cancel: &'a CancellationToken,
    ) -> StepContext<'a> {
        let properties = crate::templates::resolve_properties(&node.properties, variables);
        StepContext::new("run-test", node, properties, variables, services, observer, cancel)
    }
}
