//! Execution engine: runs a parsed workflow as a program-counter interpreter.
//!
//! - [`Engine`] bundles the handler registry with the injected collaborators and is
//!   cheap to clone; every run gets its own [`ExecutionRun`] and variables
//! - `interpreter` drives the instruction pointer through the jump table, suspends on
//!   prompts and manages nested workflow frames
//! - [`call_stack`] guards sub-workflow recursion (cycles and depth)
//!
//! Runs never share mutable state. Cancellation is a [`CancellationToken`] observed
//! before every node and raced against every handler, prompt and collaborator future.

use std::sync::Arc;

use stepline_types::{HistoryRecord, RunStatus};
use tokio::{sync::watch, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::{
    context::ExecutionContext,
    error::RunError,
    handlers::HandlerRegistry,
    model::Workflow,
    services::{NoopObserver, ProgressObserver, PromptCallbacks, ServiceContext},
};

pub mod call_stack;
mod interpreter;

pub use call_stack::{CallStack, MAX_CALL_DEPTH, call_key};

/// Tunables of the interpreter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// Maximum sub-workflow nesting, counting the top-level workflow.
    pub max_call_depth: usize,
    /// Include step outputs in progress log messages.
    pub log_values: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            max_call_depth: MAX_CALL_DEPTH,
            log_values: false,
        }
    }
}

/// Mutable state of one run.
#[derive(Debug)]
pub struct ExecutionRun {
    id: String,
    workflow_ref: String,
    status: RunStatus,
    instruction_pointer: Option<usize>,
    call_stack: CallStack,
    cancel: CancellationToken,
    status_tx: Option<watch::Sender<RunStatus>>,
}

impl ExecutionRun {
    /// Creates a pending run with a fresh execution id.
    pub fn new(workflow_ref: impl Into<String>, cancel: CancellationToken) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            workflow_ref: workflow_ref.into(),
            status: RunStatus::Pending,
            instruction_pointer: None,
            call_stack: CallStack::new(),
            cancel,
            status_tx: None,
        }
    }

    /// Publishes every status transition on `sender`.
    pub fn with_status_channel(mut self, sender: watch::Sender<RunStatus>) -> Self {
        self.status_tx = Some(sender);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn workflow_ref(&self) -> &str {
        &self.workflow_ref
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    /// Declaration index of the node executing (or last executed) in the innermost frame.
    pub fn instruction_pointer(&self) -> Option<usize> {
        self.instruction_pointer
    }

    pub fn call_stack(&self) -> &CallStack {
        &self.call_stack
    }

    pub fn abort_signal(&self) -> &CancellationToken {
        &self.cancel
    }

    fn set_status(&mut self, status: RunStatus) {
        self.status = status;
        if let Some(sender) = &self.status_tx {
            sender.send_replace(status);
        }
    }
}

/// Final state of a run.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub execution_id: String,
    pub status: RunStatus,
    /// Variables of the top-level workflow when the run stopped.
    pub variables: ExecutionContext,
    pub history: HistoryRecord,
    /// Set when `status` is [`RunStatus::Error`].
    pub error: Option<RunError>,
}

/// Handle to a run started with [`Engine::spawn`].
#[derive(Debug)]
pub struct RunHandle {
    execution_id: String,
    cancel: CancellationToken,
    status: watch::Receiver<RunStatus>,
    task: JoinHandle<RunOutcome>,
}

impl RunHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Raises the abort signal.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn abort_signal(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Latest published status.
    pub fn status(&self) -> RunStatus {
        *self.status.borrow()
    }

    /// Receiver that observes every status transition.
    pub fn subscribe(&self) -> watch::Receiver<RunStatus> {
        self.status.clone()
    }

    /// Waits for the run to reach a terminal state.
    pub async fn wait(self) -> Result<RunOutcome, tokio::task::JoinError> {
        self.task.await
    }
}

/// Workflow interpreter bound to a set of collaborators.
#[derive(Clone)]
pub struct Engine {
    registry: Arc<HandlerRegistry>,
    services: Arc<dyn ServiceContext>,
    prompts: Option<Arc<dyn PromptCallbacks>>,
    observer: Arc<dyn ProgressObserver>,
    options: EngineOptions,
}

impl Engine {
    /// Engine with every built-in handler, no prompt callbacks and a silent observer.
    pub fn new(services: Arc<dyn ServiceContext>) -> Self {
        Self {
            registry: Arc::new(HandlerRegistry::with_defaults()),
            services,
            prompts: None,
            observer: Arc::new(NoopObserver),
            options: EngineOptions::default(),
        }
    }

    pub fn with_prompts(mut self, prompts: Arc<dyn PromptCallbacks>) -> Self {
        self.prompts = Some(prompts);
        self
    }

    pub fn with_observer(mut self, observer: Arc<dyn ProgressObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_registry(mut self, registry: HandlerRegistry) -> Self {
        self.registry = Arc::new(registry);
        self
    }

    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    pub fn options(&self) -> EngineOptions {
        self.options
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Runs a workflow to a terminal state on the current task.
    pub async fn run(
        &self,
        workflow: &Workflow,
        workflow_ref: &str,
        variables: ExecutionContext,
        cancel: CancellationToken,
    ) -> RunOutcome {
        let mut run = ExecutionRun::new(workflow_ref, cancel);
        self.execute(&mut run, workflow, variables).await
    }

    /// Runs a workflow on a background task.
    pub fn spawn(&self, workflow: Arc<Workflow>, workflow_ref: impl Into<String>, variables: ExecutionContext) -> RunHandle {
        let cancel = CancellationToken::new();
        let (status_tx, status_rx) = watch::channel(RunStatus::Pending);
        let mut run = ExecutionRun::new(workflow_ref, cancel.clone()).with_status_channel(status_tx);
        let execution_id = run.id.clone();

        let engine = self.clone();
        let task = tokio::spawn(async move { engine.execute(&mut run, &workflow, variables).await });

        RunHandle {
            execution_id,
            cancel,
            status: status_rx,
            task,
        }
    }

    fn transition(&self, run: &mut ExecutionRun, status: RunStatus) {
        if run.status == status {
            return;
        }
        run.set_status(status);
        self.observer.on_status(&run.id, status);
    }
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("registry", &self.registry)
            .field("prompts", &self.prompts.is_some())
            .field("options", &self.options)
            .finish()
    }
}
