//! `workflow`: invokes a nested workflow.
//!
//! The handler only prepares the call. The interpreter owns the call stack, runs the
//! child with a fresh context and copies the mapped outputs back.

use anyhow::{Context, Result};
use async_trait::async_trait;
use indexmap::IndexMap;
use serde_json::Value;

use super::{Directive, NodeHandler, StepContext, SubWorkflowCall, string_map};
use crate::templates::resolve;

#[derive(Debug, Clone, Copy, Default)]
pub struct SubWorkflowHandler;

#[async_trait]
impl NodeHandler for SubWorkflowHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let reference = step.required("path")?.trim().to_string();
        let name = step.property("name").map(|name| name.trim().to_string());

        // Input values are templated one by one so that substituted text never has to be
        // valid inside the JSON literal.
        let raw_inputs = match step.node.property("input").filter(|text| !text.trim().is_empty()) {
            Some(text) => Some(serde_json::from_str::<Value>(text).context("property 'input' is not valid JSON")?),
            None => None,
        };
        let variables = &*step.variables;
        let inputs: IndexMap<String, String> = string_map(raw_inputs, "input")?
            .into_iter()
            .map(|(child_variable, template)| (child_variable, resolve(&template, variables)))
            .collect();
        let outputs = string_map(step.json("output")?, "output")?;

        Ok(Directive::Call(SubWorkflowCall {
            reference,
            name,
            inputs,
            outputs,
        }))
    }
}

#[cfg(test)]
mod tests {
    use stepline_types::NodeType;
    use tokio_util::sync::CancellationToken;

    use super::*;
    use crate::{
        context::ExecutionContext,
        handlers::test_support::{MemoryServices, RecordingObserver, node, step},
    };

    #[tokio::test]
    async fn prepares_call_with_resolved_inputs() {
        let services = MemoryServices::default();
        let observer = RecordingObserver::default();
        let cancel = CancellationToken::new();
        let mut variables = ExecutionContext::with_variables([("topic", r#"say "hi""#)]);

        let call = node(
            NodeType::Workflow,
            &[
                ("path", "flows/child.yaml"),
                ("name", "summarize"),
                ("input", r#"{"text":"{{topic}}","limit":3}"#),
                ("output", r#"{"summary":"result"}"#),
            ],
        );
        let directive = SubWorkflowHandler
            .execute(&mut step(&call, &mut variables, &services, &observer, &cancel))
            .await
            .expect("workflow");

        let Directive::Call(call) = directive else {
            panic!("expected a sub-workflow call");
        };
        assert_eq!(call.reference, "flows/child.yaml");
        assert_eq!(call.name.as_deref(), Some("summarize"));
        assert_eq!(call.inputs.get("text").map(String::as_str), Some(r#"say "hi""#));
        assert_eq!(call.inputs.get("limit").map(String::as_str), Some("3"));
        assert_eq!(call.outputs.get("summary").map(String::as_str), Some("result"));
    }
}
