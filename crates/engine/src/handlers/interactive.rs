//! Nodes that pause the run for a human answer.

use anyhow::{Context, Result, anyhow, bail};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use stepline_types::{DialogPrompt, DialogResult, DriveFilePrompt, DriveFileSelection, PromptPayload, PromptRequest, ValuePrompt};

use super::{
    Directive, NodeHandler, StepContext,
    drive::{read_or_ask_password, read_with_password, require_file},
    split_list,
};
use crate::services::FileInfo;

const CANCELLED_BY_USER: &str = "cancelled by user";

/// Optional `defaults` property of a dialog.
#[derive(Debug, Default, Deserialize)]
struct DialogDefaults {
    #[serde(default)]
    input: Option<String>,
    #[serde(default)]
    selected: Vec<String>,
}

/// `dialog`: message box with buttons, optional choices and an optional input.
///
/// The answer is JSON `{button, selected, input}`. A declined dialog stores an empty
/// result so later conditions can test `{{result.button}}`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DialogHandler;

#[async_trait]
impl NodeHandler for DialogHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let defaults: DialogDefaults = match step.json("defaults")? {
            Some(value) => serde_json::from_value(value).context("property 'defaults' has an unexpected shape")?,
            None => DialogDefaults::default(),
        };

        let prompt = DialogPrompt {
            title: step.property_or_default("title"),
            message: step.property_or_default("message"),
            options: split_list(step.property("options")),
            multi_select: step.flag("multiSelect"),
            button1: step.property("button1").unwrap_or("OK").to_string(),
            button2: step.property("button2").map(str::to_string),
            input_title: step.property("inputTitle").map(str::to_string),
            multiline: step.flag("multiline"),
            default_input: defaults.input,
            default_selected: defaults.selected,
            markdown: step.flag("markdown"),
        };
        Ok(step.prompt(PromptPayload::Dialog(prompt)))
    }

    async fn resume(&self, step: &mut StepContext<'_>, _request: &PromptRequest, answer: Option<String>) -> Result<Directive> {
        let result = match answer {
            None => DialogResult::default(),
            Some(text) => serde_json::from_str::<DialogResult>(&text).unwrap_or(DialogResult {
                button: text,
                ..DialogResult::default()
            }),
        };
        step.save("saveTo", serde_json::to_string(&result)?);
        Ok(Directive::Continue)
    }
}

/// `prompt-value`: free-form text input. A declined prompt stores an empty string.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptValueHandler;

#[async_trait]
impl NodeHandler for PromptValueHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let prompt = ValuePrompt {
            title: step.property("title").unwrap_or("Enter a value").to_string(),
            default_value: step.property("default").map(str::to_string),
            multiline: step.flag("multiline"),
        };
        Ok(step.prompt(PromptPayload::Value(prompt)))
    }

    async fn resume(&self, step: &mut StepContext<'_>, _request: &PromptRequest, answer: Option<String>) -> Result<Directive> {
        step.save("saveTo", answer.unwrap_or_default());
        Ok(Directive::Continue)
    }
}

/// `prompt-file`: lets the human pick a stored file, then reads it.
///
/// `saveTo` receives the content and `saveFileTo` a `{id, path, name}` descriptor.
/// Picking an encrypted file chains into a password prompt.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptFileHandler;

impl PromptFileHandler {
    fn store(step: &mut StepContext<'_>, info: &FileInfo, content: String) {
        if let Some(variable) = step.property("saveFileTo").map(|name| name.trim().to_string()) {
            let descriptor = json!({ "id": info.id, "path": info.path, "name": info.name });
            step.variables.set(variable, descriptor.to_string());
        }
        step.save("saveTo", content);
    }

    async fn selected_file(step: &StepContext<'_>, answer: &str) -> Result<FileInfo> {
        match serde_json::from_str::<DriveFileSelection>(answer) {
            Ok(selection) if !selection.path.is_empty() => require_file(step, &selection.path).await,
            Ok(selection) => Ok(FileInfo {
                name: selection.id.clone(),
                id: selection.id,
                ..FileInfo::default()
            }),
            Err(_) => require_file(step, answer.trim()).await,
        }
    }
}

#[async_trait]
impl NodeHandler for PromptFileHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let prompt = DriveFilePrompt {
            title: step.property("title").unwrap_or("Select a file").to_string(),
            extensions: split_list(step.property("extensions")),
        };
        Ok(step.prompt(PromptPayload::DriveFile(prompt)))
    }

    async fn resume(&self, step: &mut StepContext<'_>, request: &PromptRequest, answer: Option<String>) -> Result<Directive> {
        match &request.payload {
            PromptPayload::DriveFile(_) => {
                let answer = answer.ok_or_else(|| anyhow!(CANCELLED_BY_USER))?;
                let info = Self::selected_file(step, &answer).await?;
                match read_or_ask_password(step, &info).await? {
                    Ok(content) => {
                        Self::store(step, &info, content);
                        Ok(Directive::Continue)
                    }
                    Err(suspend) => Ok(suspend),
                }
            }
            PromptPayload::Password(prompt) => {
                let content = read_with_password(step, prompt, answer).await?;
                let info = FileInfo {
                    id: prompt.file_id.clone(),
                    name: prompt.path.rsplit('/').next().unwrap_or_default().to_string(),
                    path: prompt.path.clone(),
                    ..FileInfo::default()
                };
                Self::store(step, &info, content);
                Ok(Directive::Continue)
            }
            _ => bail!("unexpected prompt kind for prompt-file"),
        }
    }
}

/// `prompt-selection`: multi-line text the human selects or pastes.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromptSelectionHandler;

#[async_trait]
impl NodeHandler for PromptSelectionHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let prompt = ValuePrompt {
            title: step.property("title").unwrap_or("Select text").to_string(),
            default_value: None,
            multiline: true,
        };
        Ok(step.prompt(PromptPayload::Value(prompt)))
    }

    async fn resume(&self, step: &mut StepContext<'_>, _request: &PromptRequest, answer: Option<String>) -> Result<Directive> {
        let selection = answer.ok_or_else(|| anyhow!(CANCELLED_BY_USER))?;
        step.save("saveTo", selection);
        Ok(Directive::Continue)
    }
}
