//! # Stepline Engine
//!
//! The Stepline Engine parses YAML workflow definitions into a flat node table and runs
//! them as a program-counter interpreter. Nodes read and write string variables, branch
//! on simple conditions, loop through `while` back-jumps, call nested workflows and
//! pause for human answers.
//!
//! ## Key Features
//!
//! - **Workflow Parsing**: single or multi-workflow YAML documents, validated up front
//!   (unknown node types, dangling targets, back-jumps that do not land on `while`)
//! - **Template Interpolation**: `{{name.path[0]:json}}` substitution into node properties
//! - **Expressions**: left-to-right arithmetic for `set` and comparisons for `if`/`while`
//! - **Suspension**: interactive nodes park the run until a prompt answer arrives
//! - **Cancellation**: one abort signal stops the run, its prompts and in-flight I/O
//!
//! ## Usage
//!
//! ```rust
//! use stepline_engine::parse_workflow_file;
//!
//! let temp_dir = tempfile::tempdir()?;
//! let workflow_path = temp_dir.path().join("greet.yaml");
//! std::fs::write(&workflow_path, r#"
//! name: greet
//! nodes:
//!   - id: hello
//!     type: variable
//!     name: greeting
//!     value: hello
//! "#)?;
//!
//! let workflow = parse_workflow_file(&workflow_path, None)?;
//! assert_eq!(workflow.name, "greet");
//! assert_eq!(workflow.len(), 1);
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Architecture
//!
//! - **`parser`** / **`model`**: YAML documents to an indexed node table with a jump table
//! - **`templates`** / **`expression`**: value resolution and evaluation
//! - **`handlers`**: one [`handlers::NodeHandler`] per node type behind a registry
//! - **`executor`**: the interpreter, call stack and run lifecycle
//! - **`prompt`** / **`history`**: suspension plumbing and the run record
//! - **`services`**: traits for everything the engine does not do itself

use std::{fs, path::Path};

use anyhow::{Context, Result};

pub mod context;
pub mod error;
pub mod executor;
pub mod expression;
pub mod handlers;
pub mod history;
pub mod model;
pub mod parser;
pub mod prompt;
pub mod services;
pub mod templates;

pub use context::ExecutionContext;
pub use error::{ParseError, PromptError, RunError};
pub use executor::{Engine, EngineOptions, ExecutionRun, MAX_CALL_DEPTH, RunHandle, RunOutcome};
pub use handlers::{Directive, HandlerRegistry, NodeHandler, StepContext};
pub use history::HistoryRecorder;
pub use model::{Target, Workflow, WorkflowNode};
pub use parser::{parse_bundle, parse_workflow_str};
pub use prompt::PromptBroker;
pub use services::{NoopObserver, ProgressObserver, PromptCallbacks, ServiceContext, TracingObserver};
pub use templates::resolve;

/// Loads and validates a workflow file.
///
/// `name` selects a workflow inside a multi-workflow document; it may be omitted when
/// the document defines exactly one.
///
/// # Errors
///
/// Fails when the file cannot be read or when it does not parse into a valid workflow.
pub fn parse_workflow_file(file_path: impl AsRef<Path>, name: Option<&str>) -> Result<Workflow> {
    let file_path = file_path.as_ref();
    let file_content = fs::read(file_path).with_context(|| format!("Failed to read workflow file: {}", file_path.display()))?;
    let content_string = String::from_utf8_lossy(&file_content);

    parse_workflow_str(&content_string, name).with_context(|| format!("Invalid workflow file: {}", file_path.display()))
}
