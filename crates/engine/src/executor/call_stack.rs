//! Sub-workflow call stack with cycle and depth guards.

use crate::error::RunError;

/// Maximum nesting of workflow invocations, including the top-level workflow.
pub const MAX_CALL_DEPTH: usize = 20;

/// Key identifying a workflow invocation on the stack.
pub fn call_key(workflow_ref: &str, workflow_name: &str) -> String {
    format!("{workflow_ref}:{workflow_name}")
}

/// Chain of workflows currently executing in one run, outermost first.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CallStack {
    entries: Vec<String>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enters a workflow.
    ///
    /// Fails with [`RunError::Cycle`] when the key is already on the stack, and with
    /// [`RunError::DepthExceeded`] when `max_depth` entries are already present.
    pub fn push(&mut self, key: impl Into<String>, max_depth: usize) -> Result<(), RunError> {
        let key = key.into();
        if self.entries.contains(&key) {
            let mut stack = self.entries.clone();
            stack.push(key.clone());
            return Err(RunError::Cycle { key, stack });
        }
        if self.entries.len() >= max_depth {
            return Err(RunError::DepthExceeded { key, max_depth });
        }
        self.entries.push(key);
        Ok(())
    }

    pub fn pop(&mut self) -> Option<String> {
        self.entries.pop()
    }

    pub fn depth(&self) -> usize {
        self.entries.len()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.entries.iter().any(|entry| entry == key)
    }

    pub fn entries(&self) -> &[String] {
        &self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_keys_already_on_the_stack() {
        let mut stack = CallStack::new();
        stack.push("a.yaml:main", MAX_CALL_DEPTH).expect("first");
        stack.push("b.yaml:main", MAX_CALL_DEPTH).expect("second");

        let error = stack.push("a.yaml:main", MAX_CALL_DEPTH).expect_err("cycle");
        assert!(matches!(error, RunError::Cycle { ref stack, .. } if stack.len() == 3));
        assert_eq!(stack.depth(), 2);
    }

    #[test]
    fn rejects_the_push_beyond_max_depth() {
        let mut stack = CallStack::new();
        for level in 0..MAX_CALL_DEPTH {
            stack.push(call_key(&format!("flow-{level}.yaml"), "default"), MAX_CALL_DEPTH).expect("within depth");
        }

        let error = stack.push(call_key("flow-20.yaml", "default"), MAX_CALL_DEPTH).expect_err("too deep");
        assert_eq!(
            error,
            RunError::DepthExceeded {
                key: "flow-20.yaml:default".into(),
                max_depth: MAX_CALL_DEPTH
            }
        );

        stack.pop();
        assert!(!stack.contains("flow-19.yaml:default"));
        assert_eq!(stack.depth(), MAX_CALL_DEPTH - 1);
    }
}
