//! Shared type definitions for Stepline workflows.
//!
//! The engine, the CLI and any external transport exchange these types: authored
//! workflow documents, run status, progress log entries, history records and prompt
//! requests. Everything here is plain serde data without behaviour beyond small
//! conveniences.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub mod history;
pub mod prompt;
pub mod workflow;

pub use history::{HistoryRecord, HistoryStep, StepStatus};
pub use prompt::{
    DialogPrompt, DialogResult, DiffPrompt, DriveFilePrompt, DriveFileSelection, PasswordPrompt, PromptKind, PromptPayload,
    PromptRequest, ValuePrompt,
};
pub use workflow::{END_TARGET, NodeDefinition, NodeType, UnknownNodeType, WorkflowBundleDocument, WorkflowDocument};

/// Lifecycle state of an execution run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    #[default]
    Pending,
    Running,
    WaitingPrompt,
    Completed,
    Error,
    Cancelled,
}

impl RunStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunStatus::Completed | RunStatus::Error | RunStatus::Cancelled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::WaitingPrompt => "waiting-prompt",
            RunStatus::Completed => "completed",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// Severity of a progress log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum LogStatus {
    Info,
    Success,
    Error,
}

/// Progress event emitted once per node start and finish.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    pub node_id: String,
    pub node_type: String,
    pub message: String,
    pub status: LogStatus,
    pub timestamp: DateTime<Utc>,
}

impl LogEntry {
    pub fn new(node_id: impl Into<String>, node_type: impl Into<String>, message: impl Into<String>, status: LogStatus) -> Self {
        Self {
            node_id: node_id.into(),
            node_type: node_type.into(),
            message: message.into(),
            status,
            timestamp: Utc::now(),
        }
    }
}
