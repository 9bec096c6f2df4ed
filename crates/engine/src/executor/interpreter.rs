//! Program-counter interpreter.
//!
//! A frame walks one workflow's jump table starting at the first declared node. The
//! instruction pointer only ever moves to a jump target computed at parse time, so
//! loops are plain back-jumps to `while` nodes and no graph traversal happens at run
//! time. `workflow` nodes push a child frame onto the same run: the child shares the
//! abort signal and the call stack but gets its own variables and no history.

use std::{future::Future, pin::Pin};

use indexmap::IndexMap;
use serde_json::{Map, Value};
use stepline_types::{LogEntry, LogStatus, PromptRequest, RunStatus, StepStatus};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{Engine, ExecutionRun, RunOutcome, call_stack::call_key};
use crate::{
    context::ExecutionContext,
    error::RunError,
    handlers::{Directive, NodeHandler, StepContext, SubWorkflowCall},
    history::HistoryRecorder,
    model::{Target, Workflow, WorkflowNode},
    parser::{DEFAULT_WORKFLOW_NAME, parse_workflow_str},
    prompt::dispatch_prompt,
    services::ProgressObserver,
    templates::resolve_properties,
};

type FrameFuture<'a> = Pin<Box<dyn Future<Output = FrameOutcome> + Send + 'a>>;

/// One workflow being interpreted.
struct Frame<'a> {
    workflow: &'a Workflow,
    variables: &'a mut ExecutionContext,
    /// Only the top-level frame records history.
    history: Option<&'a mut HistoryRecorder>,
    observer: &'a dyn ProgressObserver,
}

enum FrameOutcome {
    Completed,
    Cancelled,
    Failed(RunError),
}

/// Why a node did not hand back a jump target.
enum StepInterrupt {
    Cancelled,
    Failed(RunError),
}

/// Where control goes once the handler is done with a node.
enum Flow {
    Jump(Target),
    Call(SubWorkflowCall),
}

impl Engine {
    /// Drives `run` through `workflow` until it completes, fails or is cancelled.
    ///
    /// The run must be fresh; its status is published on every transition.
    pub async fn execute(&self, run: &mut ExecutionRun, workflow: &Workflow, variables: ExecutionContext) -> RunOutcome {
        let mut variables = variables;
        let mut history = HistoryRecorder::new(run.id.clone(), run.workflow_ref.clone(), workflow.name.clone());
        self.transition(run, RunStatus::Running);
        info!(run_id = %run.id, workflow = %workflow.name, workflow_ref = %run.workflow_ref, "workflow run started");

        let key = call_key(&run.workflow_ref, &workflow.name);
        let outcome = match run.call_stack.push(key, self.options.max_call_depth) {
            Ok(()) => {
                let observer = self.observer.clone();
                let frame = Frame {
                    workflow,
                    variables: &mut variables,
                    history: Some(&mut history),
                    observer: observer.as_ref(),
                };
                let outcome = self.run_frame(run, frame).await;
                run.call_stack.pop();
                outcome
            }
            Err(error) => FrameOutcome::Failed(error),
        };

        let (status, error) = match outcome {
            FrameOutcome::Completed => (RunStatus::Completed, None),
            FrameOutcome::Cancelled => (RunStatus::Cancelled, None),
            FrameOutcome::Failed(error) => (RunStatus::Error, Some(error)),
        };
        self.transition(run, status);
        match &error {
            Some(error) => warn!(run_id = %run.id, error = %error, "workflow run failed"),
            None => info!(run_id = %run.id, status = status.as_str(), "workflow run finished"),
        }

        RunOutcome {
            execution_id: run.id.clone(),
            status,
            variables,
            history: history.finalize(status),
            error,
        }
    }

    fn run_frame<'a>(&'a self, run: &'a mut ExecutionRun, mut frame: Frame<'a>) -> FrameFuture<'a> {
        Box::pin(async move {
            let workflow = frame.workflow;
            let mut target = Target::Node(workflow.start_index());
            loop {
                if run.cancel.is_cancelled() {
                    return FrameOutcome::Cancelled;
                }
                let Some(index) = target.node_index() else {
                    return FrameOutcome::Completed;
                };
                let Some(node) = workflow.node(index) else {
                    return FrameOutcome::Completed;
                };
                run.instruction_pointer = Some(index);

                match self.step(run, &mut frame, node).await {
                    Ok(next) => target = next,
                    Err(StepInterrupt::Cancelled) => return FrameOutcome::Cancelled,
                    Err(StepInterrupt::Failed(error)) => return FrameOutcome::Failed(error),
                }
            }
        })
    }

    /// Executes one node, recording history and progress around it.
    async fn step(&self, run: &mut ExecutionRun, frame: &mut Frame<'_>, node: &WorkflowNode) -> Result<Target, StepInterrupt> {
        let node_type = node.node_type.as_str();
        let properties = resolve_properties(&node.properties, &*frame.variables);
        let handle = frame
            .history
            .as_deref_mut()
            .map(|history| history.start_step(&node.id, node_type, Some(properties_json(&properties))));
        debug!(run_id = %run.id, node_id = %node.id, node_type, "node started");
        frame
            .observer
            .on_log(LogEntry::new(node.id.clone(), node_type, "started", LogStatus::Info));

        let (result, output) = self.drive_node(run, frame, node, properties).await;

        let (status, error) = match &result {
            Ok(_) => {
                let message = match (&output, self.options.log_values) {
                    (Some(value), true) => format!("completed: {value}"),
                    _ => "completed".to_string(),
                };
                frame
                    .observer
                    .on_log(LogEntry::new(node.id.clone(), node_type, message, LogStatus::Success));
                (StepStatus::Success, None)
            }
            Err(StepInterrupt::Cancelled) => {
                debug!(run_id = %run.id, node_id = %node.id, "node cancelled");
                frame
                    .observer
                    .on_log(LogEntry::new(node.id.clone(), node_type, "cancelled", LogStatus::Info));
                (StepStatus::Cancelled, None)
            }
            Err(StepInterrupt::Failed(error)) => {
                let message = error.step_message();
                warn!(run_id = %run.id, node_id = %node.id, error = %message, "node failed");
                frame
                    .observer
                    .on_log(LogEntry::new(node.id.clone(), node_type, message.clone(), LogStatus::Error));
                (StepStatus::Error, Some(message))
            }
        };
        if let (Some(history), Some(handle)) = (frame.history.as_deref_mut(), handle) {
            history.finish_step(handle, status, output, error);
        }
        result
    }

    /// Runs the handler, answering prompts and nested calls until the node yields a target.
    async fn drive_node(
        &self,
        run: &mut ExecutionRun,
        frame: &mut Frame<'_>,
        node: &WorkflowNode,
        properties: IndexMap<String, String>,
    ) -> (Result<Target, StepInterrupt>, Option<String>) {
        let Some(handler) = self.registry.get(node.node_type) else {
            let error = RunError::Handler {
                node_id: node.id.clone(),
                message: format!("no handler registered for node type '{}'", node.node_type),
            };
            return (Err(StepInterrupt::Failed(error)), None);
        };

        let cancel = run.cancel.clone();
        let execution_id = run.id.clone();
        let observer = frame.observer;
        let mut step = StepContext::new(
            &execution_id,
            node,
            properties,
            &mut *frame.variables,
            self.services.as_ref(),
            observer,
            &cancel,
        );

        let flow = self.interact(run, handler.as_ref(), &mut step, observer).await;
        let output = step.take_output();
        drop(step);

        match flow {
            Ok(Flow::Jump(target)) => (Ok(target), output),
            Ok(Flow::Call(call)) => match self.call_subworkflow(run, frame, node, call).await {
                Ok(copied) => {
                    let copied = Value::Object(copied.into_iter().map(|(name, value)| (name, Value::String(value))).collect());
                    (Ok(node.jumps.next), Some(copied.to_string()))
                }
                Err(interrupt) => (Err(interrupt), output),
            },
            Err(interrupt) => (Err(interrupt), output),
        }
    }

    /// Executes the handler and feeds it answers while it keeps suspending.
    async fn interact(
        &self,
        run: &mut ExecutionRun,
        handler: &dyn NodeHandler,
        step: &mut StepContext<'_>,
        observer: &dyn ProgressObserver,
    ) -> Result<Flow, StepInterrupt> {
        let cancel = step.cancel.clone();
        let node = step.node;
        let mut result = race(&cancel, handler.execute(step)).await;
        loop {
            let directive = match result {
                None => return Err(StepInterrupt::Cancelled),
                Some(Err(error)) => return Err(handler_failure(node, &error)),
                Some(Ok(directive)) => directive,
            };
            match directive {
                Directive::Continue => return Ok(Flow::Jump(node.jumps.next)),
                Directive::JumpTo(target) => return Ok(Flow::Jump(target)),
                Directive::Terminate => return Ok(Flow::Jump(Target::End)),
                Directive::Call(call) => return Ok(Flow::Call(call)),
                Directive::Suspend(request) => {
                    let answer = self.await_answer(run, &request, observer).await?;
                    result = race(&cancel, handler.resume(step, &request, answer)).await;
                }
            }
        }
    }

    /// Parks the run in `waiting-prompt` until the request is answered or the run aborts.
    async fn await_answer(
        &self,
        run: &mut ExecutionRun,
        request: &PromptRequest,
        observer: &dyn ProgressObserver,
    ) -> Result<Option<String>, StepInterrupt> {
        let Some(prompts) = self.prompts.as_ref() else {
            return Err(StepInterrupt::Failed(RunError::PromptUnavailable {
                node_id: request.node_id.clone(),
                kind: request.kind().as_str().to_string(),
            }));
        };

        self.transition(run, RunStatus::WaitingPrompt);
        info!(run_id = %run.id, node_id = %request.node_id, prompt_id = %request.id, kind = request.kind().as_str(), "waiting for prompt answer");
        observer.on_prompt(request);

        let cancel = run.cancel.clone();
        match race(&cancel, dispatch_prompt(prompts.as_ref(), request)).await {
            Some(answer) => {
                debug!(run_id = %run.id, prompt_id = %request.id, answered = answer.is_some(), "prompt resolved");
                self.transition(run, RunStatus::Running);
                Ok(answer)
            }
            None => Err(StepInterrupt::Cancelled),
        }
    }

    /// Runs a nested workflow in a fresh context and returns the outputs copied back.
    async fn call_subworkflow(
        &self,
        run: &mut ExecutionRun,
        frame: &mut Frame<'_>,
        node: &WorkflowNode,
        call: SubWorkflowCall,
    ) -> Result<IndexMap<String, String>, StepInterrupt> {
        let cancel = run.cancel.clone();
        let source = match race(&cancel, self.services.load_workflow_source(&call.reference, &cancel)).await {
            None => return Err(StepInterrupt::Cancelled),
            Some(Err(error)) => return Err(handler_failure(node, &error.context(format!("could not load sub-workflow '{}'", call.reference)))),
            Some(Ok(source)) => source,
        };
        let child = parse_workflow_str(&source, call.name.as_deref()).map_err(|source| {
            StepInterrupt::Failed(RunError::SubWorkflowParse {
                key: call_key(&call.reference, call.name.as_deref().unwrap_or(DEFAULT_WORKFLOW_NAME)),
                source,
            })
        })?;

        let key = call_key(&call.reference, &child.name);
        run.call_stack
            .push(key.clone(), self.options.max_call_depth)
            .map_err(StepInterrupt::Failed)?;
        debug!(run_id = %run.id, node_id = %node.id, call = %key, depth = run.call_stack.depth(), "entering sub-workflow");

        let mut child_variables = ExecutionContext::with_variables(call.inputs);
        let child_observer = PrefixedObserver {
            inner: frame.observer,
            prefix: &key,
        };
        let resume_at = run.instruction_pointer;
        let outcome = {
            let child_frame = Frame {
                workflow: &child,
                variables: &mut child_variables,
                history: None,
                observer: &child_observer,
            };
            self.run_frame(run, child_frame).await
        };
        run.call_stack.pop();
        run.instruction_pointer = resume_at;

        match outcome {
            FrameOutcome::Completed => {
                let mut copied = IndexMap::new();
                for (parent_variable, child_variable) in call.outputs {
                    if let Some(value) = child_variables.get(&child_variable) {
                        frame.variables.set(parent_variable.clone(), value);
                        copied.insert(parent_variable, value.to_string());
                    }
                }
                debug!(run_id = %run.id, call = %key, copied = copied.len(), "left sub-workflow");
                Ok(copied)
            }
            FrameOutcome::Cancelled => Err(StepInterrupt::Cancelled),
            FrameOutcome::Failed(error @ (RunError::Cycle { .. } | RunError::DepthExceeded { .. })) => Err(StepInterrupt::Failed(error)),
            FrameOutcome::Failed(error) => Err(StepInterrupt::Failed(RunError::Handler {
                node_id: node.id.clone(),
                message: format!("sub-workflow '{key}' failed: {error}"),
            })),
        }
    }
}

/// Awaits `work` unless the abort signal fires first.
async fn race<T>(cancel: &CancellationToken, work: impl Future<Output = T>) -> Option<T> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        value = work => Some(value),
    }
}

fn handler_failure(node: &WorkflowNode, error: &anyhow::Error) -> StepInterrupt {
    StepInterrupt::Failed(RunError::Handler {
        node_id: node.id.clone(),
        message: format!("{error:#}"),
    })
}

fn properties_json(properties: &IndexMap<String, String>) -> Value {
    Value::Object(
        properties
            .iter()
            .map(|(name, value)| (name.clone(), Value::String(value.clone())))
            .collect::<Map<String, Value>>(),
    )
}

/// Reports nested progress under the call key of the sub-workflow.
struct PrefixedObserver<'a> {
    inner: &'a dyn ProgressObserver,
    prefix: &'a str,
}

impl ProgressObserver for PrefixedObserver<'_> {
    fn on_log(&self, mut entry: LogEntry) {
        entry.node_id = format!("{}/{}", self.prefix, entry.node_id);
        self.inner.on_log(entry);
    }

    fn on_prompt(&self, request: &PromptRequest) {
        self.inner.on_prompt(request);
    }
}
