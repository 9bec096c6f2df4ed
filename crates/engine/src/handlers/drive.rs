//! File store nodes.
//!
//! Paths are resolved to store file ids through [`ServiceContext::find_file_by_path`];
//! the engine never interprets ids itself.
//!
//! [`ServiceContext::find_file_by_path`]: crate::services::ServiceContext::find_file_by_path

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::{Value, json};
use stepline_types::{DiffPrompt, PasswordPrompt, PromptPayload, PromptRequest};

use super::{Directive, NodeHandler, StepContext};
use crate::services::{FileInfo, FileListing, FileQuery, FileSort, FileWrite};

const CANCELLED_BY_USER: &str = "cancelled by user";

/// Looks a path up in the store, failing when it does not exist.
pub(crate) async fn require_file(step: &StepContext<'_>, path: &str) -> Result<FileInfo> {
    step.services
        .find_file_by_path(path, step.cancel)
        .await
        .with_context(|| format!("failed to look up '{path}'"))?
        .ok_or_else(|| anyhow!("file not found: {path}"))
}

/// Reads a file, asking for a password when the store reports it encrypted.
///
/// Returns `Ok(Err(directive))` when the node must suspend first.
pub(crate) async fn read_or_ask_password(step: &StepContext<'_>, info: &FileInfo) -> Result<Result<String, Directive>> {
    let file = step
        .services
        .read_file(&info.id, None, step.cancel)
        .await
        .with_context(|| format!("failed to read '{}'", info.path))?;
    if !file.encrypted {
        return Ok(Ok(file.content));
    }
    Ok(Err(step.prompt(PromptPayload::Password(PasswordPrompt {
        title: format!("Password for {}", info.path),
        path: info.path.clone(),
        file_id: info.id.clone(),
    }))))
}

/// Completes a password prompt raised by [`read_or_ask_password`].
pub(crate) async fn read_with_password(step: &StepContext<'_>, prompt: &PasswordPrompt, answer: Option<String>) -> Result<String> {
    let password = answer.ok_or_else(|| anyhow!(CANCELLED_BY_USER))?;
    let file = step
        .services
        .read_file(&prompt.file_id, Some(&password), step.cancel)
        .await
        .with_context(|| format!("failed to read '{}'", prompt.path))?;
    if file.encrypted {
        bail!("incorrect password for '{}'", prompt.path);
    }
    Ok(file.content)
}

fn file_descriptor(info: &FileInfo) -> Value {
    json!({ "id": info.id, "path": info.path, "name": info.name })
}

fn mime_type_for(path: &str) -> Option<String> {
    let extension = path.rsplit_once('.')?.1.to_ascii_lowercase();
    let mime = match extension.as_str() {
        "md" => "text/markdown",
        "txt" => "text/plain",
        "json" => "application/json",
        "yaml" | "yml" => "application/yaml",
        "html" => "text/html",
        "csv" => "text/csv",
        _ => return None,
    };
    Some(mime.to_string())
}

/// `drive-file`: writes text to a file, optionally after a diff confirmation.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveFileHandler;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteMode {
    Overwrite,
    Append,
    Create,
}

impl DriveFileHandler {
    fn mode(step: &StepContext<'_>) -> Result<WriteMode> {
        match step.property("mode").map(|mode| mode.trim().to_ascii_lowercase()).as_deref() {
            None | Some("overwrite") => Ok(WriteMode::Overwrite),
            Some("append") => Ok(WriteMode::Append),
            Some("create") => Ok(WriteMode::Create),
            Some(other) => bail!("unsupported write mode '{other}'"),
        }
    }

    async fn write(step: &mut StepContext<'_>, path: &str, content: String) -> Result<Directive> {
        let settings = step.services.settings();
        let write = FileWrite {
            path: path.to_string(),
            content,
            mime_type: mime_type_for(path),
            record_history: settings.edit_history,
            encrypt: settings.encryption,
        };
        let existing = step.services.find_file_by_path(path, step.cancel).await?;
        let info = match existing {
            Some(info) => step.services.update_file(&info.id, &write, step.cancel).await,
            None => step.services.create_file(&write, step.cancel).await,
        }
        .with_context(|| format!("failed to write '{path}'"))?;

        step.save_json("saveTo", &json!({ "id": info.id, "path": info.path }));
        Ok(Directive::Continue)
    }
}

#[async_trait]
impl NodeHandler for DriveFileHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let path = step.required("path")?.trim().to_string();
        let content = step.property_or_default("content");
        let mode = Self::mode(step)?;

        let existing = step.services.find_file_by_path(&path, step.cancel).await?;
        let original = match &existing {
            Some(info) if mode == WriteMode::Create => bail!("file already exists: {}", info.path),
            Some(info) => match read_or_ask_password(step, info).await? {
                Ok(text) => text,
                Err(_) => bail!("cannot modify encrypted file '{path}'"),
            },
            None => String::new(),
        };

        let proposed = match mode {
            WriteMode::Append if !original.is_empty() => format!("{original}{content}"),
            _ => content,
        };

        if step.flag("confirm") {
            return Ok(step.prompt(PromptPayload::Diff(DiffPrompt {
                path,
                original,
                proposed,
            })));
        }
        Self::write(step, &path, proposed).await
    }

    async fn resume(&self, step: &mut StepContext<'_>, request: &PromptRequest, answer: Option<String>) -> Result<Directive> {
        let PromptPayload::Diff(diff) = &request.payload else {
            bail!("unexpected prompt kind for drive-file");
        };
        let accepted = answer
            .as_deref()
            .is_some_and(|text| !text.trim().eq_ignore_ascii_case("false"));
        if !accepted {
            step.log(format!("write to {} skipped", diff.path));
            step.record_output("skipped");
            return Ok(Directive::Continue);
        }
        Self::write(step, &diff.path, diff.proposed.clone()).await
    }
}

/// `drive-read`: stores a file's content.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveReadHandler;

#[async_trait]
impl NodeHandler for DriveReadHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let path = step.required("path")?.trim().to_string();
        let info = require_file(step, &path).await?;
        match read_or_ask_password(step, &info).await? {
            Ok(content) => {
                step.save("saveTo", content);
                Ok(Directive::Continue)
            }
            Err(suspend) => Ok(suspend),
        }
    }

    async fn resume(&self, step: &mut StepContext<'_>, request: &PromptRequest, answer: Option<String>) -> Result<Directive> {
        let PromptPayload::Password(prompt) = &request.payload else {
            bail!("unexpected prompt kind for drive-read");
        };
        let content = read_with_password(step, prompt, answer).await?;
        step.save("saveTo", content);
        Ok(Directive::Continue)
    }
}

/// `drive-search`: stores matching file descriptors as a JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveSearchHandler;

#[async_trait]
impl NodeHandler for DriveSearchHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let query = FileQuery {
            query: step.required("query")?.to_string(),
            search_content: step.flag("searchContent"),
            limit: step.parsed::<usize>("limit")?,
        };
        let files = step.services.search_files(&query, step.cancel).await.context("file search failed")?;
        step.save_json("saveTo", &serde_json::to_value(files)?);
        Ok(Directive::Continue)
    }
}

/// `drive-list`: stores the files of a folder as a JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveListHandler;

#[async_trait]
impl NodeHandler for DriveListHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let sort = match step.property("sortBy").map(str::trim) {
            None | Some("name") => FileSort::Name,
            Some("modified") => FileSort::Modified,
            Some(other) => bail!("unsupported sort order '{other}'"),
        };
        let listing = FileListing {
            folder: step.property_or_default("folder").trim().to_string(),
            limit: step.parsed::<usize>("limit")?,
            sort,
        };
        let files = step.services.list_files(&listing, step.cancel).await.context("file listing failed")?;
        step.save_json("saveTo", &serde_json::to_value(files)?);
        Ok(Directive::Continue)
    }
}

/// `drive-folder-list`: stores folder names as a JSON array.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveFolderListHandler;

#[async_trait]
impl NodeHandler for DriveFolderListHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let folder = step.property_or_default("folder").trim().to_string();
        let folders = step
            .services
            .list_folders(&folder, step.cancel)
            .await
            .context("folder listing failed")?;
        step.save_json("saveTo", &json!(folders));
        Ok(Directive::Continue)
    }
}

/// `drive-save`: writes file data held in a variable.
///
/// The variable holds either `{name, mimeType, data}` JSON (as produced by
/// `prompt-file` or an attachment) or plain text.
#[derive(Debug, Clone, Copy, Default)]
pub struct DriveSaveHandler;

#[async_trait]
impl NodeHandler for DriveSaveHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let source = step.required("source")?.trim().to_string();
        let path = step.required("path")?.trim().to_string();
        let raw = step
            .variables
            .get(&source)
            .with_context(|| format!("source variable '{source}' is not defined"))?
            .to_string();

        let (content, mime_type) = match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(object)) if object.contains_key("data") => (
                object.get("data").and_then(Value::as_str).unwrap_or_default().to_string(),
                object.get("mimeType").and_then(Value::as_str).map(str::to_string),
            ),
            _ => (raw, None),
        };

        let settings = step.services.settings();
        let write = FileWrite {
            mime_type: mime_type.or_else(|| mime_type_for(&path)),
            path: path.clone(),
            content,
            record_history: settings.edit_history,
            encrypt: settings.encryption,
        };
        let info = match step.services.find_file_by_path(&path, step.cancel).await? {
            Some(existing) => step.services.update_file(&existing.id, &write, step.cancel).await,
            None => step.services.create_file(&write, step.cancel).await,
        }
        .with_context(|| format!("failed to save '{path}'"))?;

        step.save("savePathTo", info.path);
        Ok(Directive::Continue)
    }
}

/// `preview`: announces a file to the observer so a client can open it.
#[derive(Debug, Clone, Copy, Default)]
pub struct PreviewHandler;

#[async_trait]
impl NodeHandler for PreviewHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let path = step.required("path")?.trim().to_string();
        let info = require_file(step, &path).await?;
        step.log(format!("preview {}", info.path));
        step.save_json("saveTo", &file_descriptor(&info));
        Ok(Directive::Continue)
    }
}
