//! Collaborators shared by the engine integration tests.

#![allow(dead_code)]

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use stepline_engine::{
    Engine, ProgressObserver, PromptCallbacks, ServiceContext,
    services::{FileContent, FileInfo, FileListing, FileQuery, FileWrite, HttpRequest, HttpResponse},
};
use stepline_types::{LogEntry, LogStatus, PromptRequest, RunStatus};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// Serves workflow sources from memory; every other capability is unavailable.
#[derive(Default)]
pub struct WorkflowSources {
    sources: HashMap<String, String>,
}

impl WorkflowSources {
    pub fn with(mut self, reference: &str, source: impl Into<String>) -> Self {
        self.sources.insert(reference.to_string(), source.into());
        self
    }
}

#[async_trait]
impl ServiceContext for WorkflowSources {
    async fn read_file(&self, file_id: &str, _password: Option<&str>, _cancel: &CancellationToken) -> Result<FileContent> {
        bail!("no file with id {file_id}")
    }

    async fn find_file_by_path(&self, _path: &str, _cancel: &CancellationToken) -> Result<Option<FileInfo>> {
        Ok(None)
    }

    async fn search_files(&self, _query: &FileQuery, _cancel: &CancellationToken) -> Result<Vec<FileInfo>> {
        Ok(Vec::new())
    }

    async fn list_files(&self, _listing: &FileListing, _cancel: &CancellationToken) -> Result<Vec<FileInfo>> {
        Ok(Vec::new())
    }

    async fn list_folders(&self, _folder: &str, _cancel: &CancellationToken) -> Result<Vec<String>> {
        Ok(Vec::new())
    }

    async fn create_file(&self, _write: &FileWrite, _cancel: &CancellationToken) -> Result<FileInfo> {
        bail!("read-only store")
    }

    async fn update_file(&self, _file_id: &str, _write: &FileWrite, _cancel: &CancellationToken) -> Result<FileInfo> {
        bail!("read-only store")
    }

    async fn load_workflow_source(&self, reference: &str, _cancel: &CancellationToken) -> Result<String> {
        self.sources
            .get(reference)
            .cloned()
            .ok_or_else(|| anyhow!("workflow '{reference}' not found"))
    }

    async fn http_request(&self, request: &HttpRequest, _cancel: &CancellationToken) -> Result<HttpResponse> {
        bail!("offline: {}", request.url)
    }
}

/// Answers every prompt with a fixed value and remembers what was asked.
#[derive(Default)]
pub struct ScriptedPrompts {
    pub answer: Option<String>,
    pub asked: Mutex<Vec<PromptRequest>>,
}

impl ScriptedPrompts {
    pub fn answering(answer: &str) -> Self {
        Self {
            answer: Some(answer.to_string()),
            asked: Mutex::default(),
        }
    }

    fn reply(&self, request: &PromptRequest) -> Option<String> {
        self.asked.lock().expect("asked lock").push(request.clone());
        self.answer.clone()
    }
}

#[async_trait]
impl PromptCallbacks for ScriptedPrompts {
    async fn prompt_for_value(&self, request: &PromptRequest) -> Option<String> {
        self.reply(request)
    }

    async fn prompt_for_dialog(&self, request: &PromptRequest) -> Option<String> {
        self.reply(request)
    }

    async fn prompt_for_drive_file(&self, request: &PromptRequest) -> Option<String> {
        self.reply(request)
    }

    async fn prompt_for_diff(&self, request: &PromptRequest) -> Option<String> {
        self.reply(request)
    }

    async fn prompt_for_password(&self, request: &PromptRequest) -> Option<String> {
        self.reply(request)
    }
}

/// Records log entries and status transitions; wakes `started` whenever a node starts.
#[derive(Default)]
pub struct Recorder {
    pub entries: Mutex<Vec<LogEntry>>,
    pub statuses: Mutex<Vec<RunStatus>>,
    pub started: Notify,
}

impl Recorder {
    pub fn statuses(&self) -> Vec<RunStatus> {
        self.statuses.lock().expect("statuses lock").clone()
    }

    pub fn node_ids(&self, status: LogStatus) -> Vec<String> {
        self.entries
            .lock()
            .expect("entries lock")
            .iter()
            .filter(|entry| entry.status == status)
            .map(|entry| entry.node_id.clone())
            .collect()
    }
}

impl ProgressObserver for Recorder {
    fn on_log(&self, entry: LogEntry) {
        let started = entry.message == "started";
        self.entries.lock().expect("entries lock").push(entry);
        if started {
            self.started.notify_one();
        }
    }

    fn on_status(&self, _execution_id: &str, status: RunStatus) {
        self.statuses.lock().expect("statuses lock").push(status);
    }
}

pub fn engine(sources: WorkflowSources) -> Engine {
    Engine::new(Arc::new(sources))
}
