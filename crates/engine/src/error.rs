//! Error taxonomy of the engine.
//!
//! Parse failures are reported before anything runs. Run failures end the current run
//! with `error` status; cancellation is not an error and never appears here.

use thiserror::Error;

/// Structural problems found while turning a workflow document into a [`crate::Workflow`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("invalid workflow document: {0}")]
    Malformed(String),

    #[error("workflow '{0}' not found in document")]
    UnknownWorkflow(String),

    #[error("document contains several workflows; select one of: {}", .0.join(", "))]
    AmbiguousWorkflow(Vec<String>),

    #[error("workflow has no nodes")]
    Empty,

    #[error("node '{node_id}' has unknown type '{node_type}'")]
    UnknownNodeType { node_id: String, node_type: String },

    #[error("duplicate node id '{0}'")]
    DuplicateNodeId(String),

    #[error("node '{node_id}' references undeclared node '{target}' in '{field}'")]
    UndeclaredTarget { node_id: String, field: &'static str, target: String },

    #[error("node '{node_id}' of type '{node_type}' requires '{field}'")]
    MissingBranch {
        node_id: String,
        node_type: String,
        field: &'static str,
    },

    #[error("node '{node_id}' of type '{node_type}' cannot declare '{field}'")]
    UnexpectedBranch {
        node_id: String,
        node_type: String,
        field: &'static str,
    },

    #[error("node '{node_id}' jumps back to '{target}', which is a '{target_type}' node; only 'while' nodes may be jumped back to")]
    IllegalBackReference {
        node_id: String,
        target: String,
        target_type: String,
    },

    #[error("start node '{0}' is not declared")]
    UnknownStartNode(String),
}

/// Failures that end a run with `error` status.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RunError {
    #[error("node '{node_id}' failed: {message}")]
    Handler { node_id: String, message: String },

    #[error("sub-workflow cycle detected: {}", .stack.join(" -> "))]
    Cycle { key: String, stack: Vec<String> },

    #[error("sub-workflow call depth exceeds {max_depth} (entering '{key}')")]
    DepthExceeded { key: String, max_depth: usize },

    #[error("could not load sub-workflow '{key}': {source}")]
    SubWorkflowParse { key: String, source: ParseError },

    #[error("node '{node_id}' raised a '{kind}' prompt, but no prompt callbacks are attached to this run")]
    PromptUnavailable { node_id: String, kind: String },
}

impl RunError {
    /// Message stored on the failing history step.
    pub fn step_message(&self) -> String {
        match self {
            RunError::Handler { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }
}

/// Errors reported by the prompt broker when answering or withdrawing requests.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PromptError {
    #[error("no pending prompt with id '{0}'")]
    NotPending(String),

    #[error("prompt '{0}' was withdrawn before it was answered")]
    Withdrawn(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_lists_the_stack() {
        let error = RunError::Cycle {
            key: "a.yaml:main".into(),
            stack: vec!["a.yaml:main".into(), "b.yaml:main".into(), "a.yaml:main".into()],
        };
        assert_eq!(
            error.to_string(),
            "sub-workflow cycle detected: a.yaml:main -> b.yaml:main -> a.yaml:main"
        );
    }

    #[test]
    fn handler_step_message_omits_node_prefix() {
        let error = RunError::Handler {
            node_id: "fetch".into(),
            message: "status 500".into(),
        };
        assert_eq!(error.step_message(), "status 500");
        assert_eq!(error.to_string(), "node 'fetch' failed: status 500");
    }
}
