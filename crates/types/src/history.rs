//! Execution history records handed to external persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RunStatus;

/// Outcome of a single executed node.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum StepStatus {
    /// The node started and has not finished yet.
    Running,
    /// The handler returned normally.
    Success,
    /// The handler failed; the step carries the error message.
    Error,
    /// The run was aborted while this node was in flight.
    Cancelled,
}

/// One executed node within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryStep {
    pub node_id: String,
    pub node_type: String,
    pub status: StepStatus,
    /// Resolved properties the handler received.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<serde_json::Value>,
    /// Branch outcome or value written by the handler.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

/// Append-only record of a workflow run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryRecord {
    /// Execution identifier.
    pub id: String,
    /// Reference the workflow was loaded from (path or file id).
    pub workflow_ref: String,
    pub workflow_name: String,
    pub status: RunStatus,
    pub steps: Vec<HistoryStep>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl HistoryRecord {
    /// Returns the steps recorded for a node, in execution order.
    pub fn steps_for<'a>(&'a self, node_id: &'a str) -> impl Iterator<Item = &'a HistoryStep> + 'a {
        self.steps.iter().filter(move |step| step.node_id == node_id)
    }

    /// Returns the first step that failed, if any.
    pub fn first_error(&self) -> Option<&HistoryStep> {
        self.steps.iter().find(|step| step.status == StepStatus::Error)
    }
}
