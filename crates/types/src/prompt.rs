//! Human-in-the-loop prompt requests and their parsed answers.
//!
//! A suspending node describes what it needs as a [`PromptRequest`]. The request is
//! delivered to an external transport and resolved by exactly one answer, or dropped
//! when the run is aborted. Answers travel back as plain optional strings; nodes
//! decode structured answers (for example [`DialogResult`]) themselves.

use serde::{Deserialize, Serialize};

/// Kind of human interaction requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum PromptKind {
    Value,
    Dialog,
    DriveFile,
    Diff,
    Password,
}

impl PromptKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PromptKind::Value => "value",
            PromptKind::Dialog => "dialog",
            PromptKind::DriveFile => "drive-file",
            PromptKind::Diff => "diff",
            PromptKind::Password => "password",
        }
    }
}

/// Prompt emitted by a suspended run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PromptRequest {
    /// Correlation id used to resolve the request.
    pub id: String,
    pub execution_id: String,
    pub node_id: String,
    pub payload: PromptPayload,
}

impl PromptRequest {
    pub fn kind(&self) -> PromptKind {
        self.payload.kind()
    }
}

/// Kind-specific prompt parameters.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum PromptPayload {
    Value(ValuePrompt),
    Dialog(DialogPrompt),
    DriveFile(DriveFilePrompt),
    Diff(DiffPrompt),
    Password(PasswordPrompt),
}

impl PromptPayload {
    pub fn kind(&self) -> PromptKind {
        match self {
            PromptPayload::Value(_) => PromptKind::Value,
            PromptPayload::Dialog(_) => PromptKind::Dialog,
            PromptPayload::DriveFile(_) => PromptKind::DriveFile,
            PromptPayload::Diff(_) => PromptKind::Diff,
            PromptPayload::Password(_) => PromptKind::Password,
        }
    }
}

/// Free-form text input.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct ValuePrompt {
    pub title: String,
    #[serde(default)]
    pub default_value: Option<String>,
    #[serde(default)]
    pub multiline: bool,
}

/// Message box with buttons, optional choices and an optional input field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DialogPrompt {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub options: Vec<String>,
    #[serde(default)]
    pub multi_select: bool,
    pub button1: String,
    #[serde(default)]
    pub button2: Option<String>,
    #[serde(default)]
    pub input_title: Option<String>,
    #[serde(default)]
    pub multiline: bool,
    #[serde(default)]
    pub default_input: Option<String>,
    #[serde(default)]
    pub default_selected: Vec<String>,
    #[serde(default)]
    pub markdown: bool,
}

/// File picker over the remote store.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DriveFilePrompt {
    pub title: String,
    #[serde(default)]
    pub extensions: Vec<String>,
}

/// Confirmation of a proposed file change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct DiffPrompt {
    pub path: String,
    pub original: String,
    pub proposed: String,
}

/// Password entry for an encrypted file.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(rename_all = "camelCase")]
pub struct PasswordPrompt {
    pub title: String,
    pub path: String,
    pub file_id: String,
}

/// Decoded answer of a dialog prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DialogResult {
    #[serde(default)]
    pub button: String,
    #[serde(default)]
    pub selected: Vec<String>,
    #[serde(default)]
    pub input: String,
}

/// Answer of a file picker prompt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DriveFileSelection {
    pub id: String,
    #[serde(default)]
    pub path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_serializes_with_kind_tag() {
        let request = PromptRequest {
            id: "p1".into(),
            execution_id: "run-1".into(),
            node_id: "ask".into(),
            payload: PromptPayload::Value(ValuePrompt {
                title: "Name?".into(),
                default_value: None,
                multiline: false,
            }),
        };

        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["payload"]["kind"], "value");
        assert_eq!(json["executionId"], "run-1");
        assert_eq!(request.kind(), PromptKind::Value);
    }

    #[test]
    fn dialog_result_tolerates_missing_fields() {
        let parsed: DialogResult = serde_json::from_str(r#"{"button":"OK"}"#).expect("parse");
        assert_eq!(parsed.button, "OK");
        assert!(parsed.selected.is_empty());
        assert_eq!(parsed.input, "");
    }
}
