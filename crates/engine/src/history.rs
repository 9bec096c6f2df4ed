//! Step-by-step history of a run.
//!
//! The recorder is append-only while the run is in progress and is consumed by
//! [`HistoryRecorder::finalize`], so a record can only be finalized once.

use chrono::Utc;
use serde_json::Value;
use stepline_types::{HistoryRecord, HistoryStep, RunStatus, StepStatus};

/// Handle to a step opened with [`HistoryRecorder::start_step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StepHandle(usize);

/// Accumulates history steps for one run.
#[derive(Debug, Clone)]
pub struct HistoryRecorder {
    record: HistoryRecord,
}

impl HistoryRecorder {
    pub fn new(execution_id: impl Into<String>, workflow_ref: impl Into<String>, workflow_name: impl Into<String>) -> Self {
        Self {
            record: HistoryRecord {
                id: execution_id.into(),
                workflow_ref: workflow_ref.into(),
                workflow_name: workflow_name.into(),
                status: RunStatus::Running,
                steps: Vec::new(),
                started_at: Utc::now(),
                finished_at: None,
            },
        }
    }

    /// Opens a step in `running` state.
    pub fn start_step(&mut self, node_id: &str, node_type: &str, input: Option<Value>) -> StepHandle {
        self.record.steps.push(HistoryStep {
            node_id: node_id.to_string(),
            node_type: node_type.to_string(),
            status: StepStatus::Running,
            input,
            output: None,
            error: None,
            started_at: Utc::now(),
            finished_at: None,
        });
        StepHandle(self.record.steps.len() - 1)
    }

    /// Closes a step. Closing an already closed step is ignored.
    pub fn finish_step(&mut self, handle: StepHandle, status: StepStatus, output: Option<String>, error: Option<String>) {
        let Some(step) = self.record.steps.get_mut(handle.0) else {
            return;
        };
        if step.finished_at.is_some() {
            return;
        }
        step.status = status;
        step.output = output;
        step.error = error;
        step.finished_at = Some(Utc::now());
    }

    pub fn steps(&self) -> &[HistoryStep] {
        &self.record.steps
    }

    /// Closes the record with the run's terminal status and hands it over.
    pub fn finalize(mut self, status: RunStatus) -> HistoryRecord {
        let finished_at = Utc::now();
        for step in self.record.steps.iter_mut().filter(|step| step.finished_at.is_none()) {
            step.status = StepStatus::Cancelled;
            step.finished_at = Some(finished_at);
        }
        self.record.status = status;
        self.record.finished_at = Some(finished_at);
        self.record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_steps_in_order_and_finalizes_once() {
        let mut recorder = HistoryRecorder::new("run-1", "flows/count.yaml", "count");
        let first = recorder.start_step("init", "variable", None);
        recorder.finish_step(first, StepStatus::Success, Some("0".into()), None);
        recorder.finish_step(first, StepStatus::Error, None, Some("ignored".into()));
        let second = recorder.start_step("fetch", "http", None);
        recorder.finish_step(second, StepStatus::Error, None, Some("status 500".into()));

        let record = recorder.finalize(RunStatus::Error);

        assert_eq!(record.status, RunStatus::Error);
        assert_eq!(record.steps.len(), 2);
        assert_eq!(record.steps[0].status, StepStatus::Success);
        assert_eq!(record.steps[0].output.as_deref(), Some("0"));
        assert_eq!(record.first_error().map(|step| step.node_id.as_str()), Some("fetch"));
        assert!(record.finished_at.is_some());
    }

    #[test]
    fn open_steps_are_closed_as_cancelled() {
        let mut recorder = HistoryRecorder::new("run-2", "wf", "wf");
        recorder.start_step("wait", "sleep", None);

        let record = recorder.finalize(RunStatus::Cancelled);
        assert_eq!(record.steps[0].status, StepStatus::Cancelled);
        assert!(record.steps[0].error.is_none());
    }
}
