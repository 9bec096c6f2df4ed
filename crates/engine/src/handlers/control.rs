//! Variables, arithmetic, branching and waiting.

use std::time::Duration;

use anyhow::{Result, bail};
use async_trait::async_trait;

use super::{Directive, NodeHandler, StepContext};
use crate::expression::{evaluate_assignment, evaluate_condition};

/// `variable`: stores the resolved `value` verbatim.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableHandler;

#[async_trait]
impl NodeHandler for VariableHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let name = step.required("name")?.trim().to_string();
        let value = step.property_or_default("value");
        step.variables.set(name, value.clone());
        step.record_output(value);
        Ok(Directive::Continue)
    }
}

/// `set`: stores the arithmetic result of `value`, or the resolved text.
#[derive(Debug, Clone, Copy, Default)]
pub struct SetHandler;

#[async_trait]
impl NodeHandler for SetHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let name = step.required("name")?.trim().to_string();
        let value = evaluate_assignment(&step.property_or_default("value"));
        step.variables.set(name, value.clone());
        step.record_output(value);
        Ok(Directive::Continue)
    }
}

/// `if` and `while`: branch on `condition`.
///
/// A `while` loops purely through its jump targets: the body jumps back to the
/// header, which re-evaluates the condition every time.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionHandler;

#[async_trait]
impl NodeHandler for ConditionHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let outcome = evaluate_condition(&step.property_or_default("condition"));
        step.record_output(outcome.to_string());
        Ok(Directive::JumpTo(step.node.jumps.branch(outcome)))
    }
}

/// `sleep`: waits `duration` milliseconds unless the run is cancelled first.
#[derive(Debug, Clone, Copy, Default)]
pub struct SleepHandler;

#[async_trait]
impl NodeHandler for SleepHandler {
    async fn execute(&self, step: &mut StepContext<'_>) -> Result<Directive> {
        let millis = match step.parsed::<f64>("duration")? {
            Some(value) if value.is_finite() && value >= 0.0 => value,
            Some(value) => bail!("duration must be a non-negative number of milliseconds, got {value}"),
            None => 0.0,
        };

        let duration = Duration::try_from_secs_f64(millis / 1000.0)?;

        tokio::select! {
            _ = step.cancel.cancelled() => bail!("sleep interrupted by cancellation"),
            _ = tokio::time::sleep(duration) => {}
        }
        Ok(Directive::Continue)
    }
}
