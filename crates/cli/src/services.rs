//! Service context backing terminal runs.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use stepline_engine::{
    ServiceContext,
    services::{
        FileContent, FileInfo, FileListing, FileQuery, FileWrite, HttpRequest, HttpResponse, McpCall, ModelRequest, ModelResponse,
        ServiceSettings,
    },
};
use tokio_util::sync::CancellationToken;

use crate::{remote::RemoteClient, store::DirectoryStore};

/// Local files plus network access.
///
/// Sub-workflow references resolve against the directory of the workflow being run.
pub struct LocalServices {
    store: DirectoryStore,
    remote: RemoteClient,
    workflow_dir: PathBuf,
    settings: ServiceSettings,
}

impl LocalServices {
    pub fn new(store: DirectoryStore, remote: RemoteClient, workflow_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            remote,
            workflow_dir: workflow_dir.into(),
            settings: ServiceSettings::default(),
        }
    }

    pub fn with_edit_history(mut self, enabled: bool) -> Self {
        self.settings.edit_history = enabled;
        self
    }

    fn workflow_path(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() { path.to_path_buf() } else { self.workflow_dir.join(path) }
    }
}

/// Abandons `work` once `cancel` fires.
async fn cancellable<T>(cancel: &CancellationToken, work: impl Future<Output = Result<T>>) -> Result<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => anyhow::bail!("cancelled"),
        result = work => result,
    }
}

#[async_trait]
impl ServiceContext for LocalServices {
    async fn read_file(&self, file_id: &str, _password: Option<&str>, cancel: &CancellationToken) -> Result<FileContent> {
        cancellable(cancel, self.store.read(file_id)).await
    }

    async fn find_file_by_path(&self, path: &str, cancel: &CancellationToken) -> Result<Option<FileInfo>> {
        cancellable(cancel, self.store.find(path)).await
    }

    async fn search_files(&self, query: &FileQuery, cancel: &CancellationToken) -> Result<Vec<FileInfo>> {
        cancellable(cancel, self.store.search(query)).await
    }

    async fn list_files(&self, listing: &FileListing, cancel: &CancellationToken) -> Result<Vec<FileInfo>> {
        cancellable(cancel, self.store.list(listing)).await
    }

    async fn list_folders(&self, folder: &str, cancel: &CancellationToken) -> Result<Vec<String>> {
        cancellable(cancel, self.store.folders(folder)).await
    }

    async fn create_file(&self, write: &FileWrite, cancel: &CancellationToken) -> Result<FileInfo> {
        cancellable(cancel, self.store.write(&write.path, write)).await
    }

    async fn update_file(&self, file_id: &str, write: &FileWrite, cancel: &CancellationToken) -> Result<FileInfo> {
        cancellable(cancel, self.store.write(file_id, write)).await
    }

    async fn load_workflow_source(&self, reference: &str, cancel: &CancellationToken) -> Result<String> {
        let path = self.workflow_path(reference);
        cancellable(cancel, async {
            tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read workflow file: {}", path.display()))
        })
        .await
    }

    async fn generate(&self, request: &ModelRequest, cancel: &CancellationToken) -> Result<ModelResponse> {
        cancellable(cancel, self.remote.generate(request)).await
    }

    async fn http_request(&self, request: &HttpRequest, cancel: &CancellationToken) -> Result<HttpResponse> {
        cancellable(cancel, self.remote.send(request)).await
    }

    async fn mcp_call(&self, call: &McpCall, cancel: &CancellationToken) -> Result<Value> {
        cancellable(cancel, self.remote.call_tool(call)).await
    }

    fn settings(&self) -> ServiceSettings {
        self.settings
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_sub_workflows_relative_to_the_workflow_directory() {
        let temp_dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(temp_dir.path().join("flows")).unwrap();
        std::fs::write(temp_dir.path().join("flows/child.yaml"), "nodes: []").unwrap();

        let services = LocalServices::new(
            DirectoryStore::new(temp_dir.path()),
            RemoteClient::new(None).unwrap(),
            temp_dir.path().join("flows"),
        );
        let cancel = CancellationToken::new();
        let source = services.load_workflow_source("child.yaml", &cancel).await.unwrap();
        assert_eq!(source, "nodes: []");

        cancel.cancel();
        let error = services.load_workflow_source("child.yaml", &cancel).await.expect_err("cancelled");
        assert_eq!(error.to_string(), "cancelled");
    }

    #[tokio::test]
    async fn writes_go_through_the_directory_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let services = LocalServices::new(DirectoryStore::new(temp_dir.path()), RemoteClient::new(None).unwrap(), temp_dir.path())
            .with_edit_history(true);
        assert!(services.settings().edit_history);

        let cancel = CancellationToken::new();
        let write = FileWrite {
            path: "out/report.md".into(),
            content: "# Report".into(),
            ..FileWrite::default()
        };
        let info = services.create_file(&write, &cancel).await.unwrap();
        assert_eq!(info.id, "out/report.md");
        let found = services.find_file_by_path("out/report.md", &cancel).await.unwrap();
        assert_eq!(found.map(|info| info.name).as_deref(), Some("report.md"));
    }
}
