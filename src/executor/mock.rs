//! Mock executor for testing
//!
//! Every call succeeds unless a rule says otherwise. Rules match on the
//! step label, the command text, the action name or an arbitrary predicate.
//! Used by the test suite and `actflow run --dry-run`.

use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use super::{Invocation, InvocationContext, StepExecutor};
use crate::error::FlowError;
use crate::step_action::ActionRef;
use crate::workflow::OrderedMap;

/// What a recorded call invoked
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockCallKind {
    Action {
        action: String,
        inputs: Vec<(String, String)>,
    },
    Command {
        run: String,
    },
}

/// A call recorded by [`MockExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub instance: String,
    pub step_index: usize,
    pub label: String,
    pub kind: MockCallKind,
    pub env: Vec<(String, String)>,
}

impl MockCall {
    pub fn input(&self, name: &str) -> Option<&str> {
        match &self.kind {
            MockCallKind::Action { inputs, .. } => inputs
                .iter()
                .find(|(k, _)| k == name)
                .map(|(_, v)| v.as_str()),
            MockCallKind::Command { .. } => None,
        }
    }
}

type Rule = Box<dyn Fn(&MockCall) -> Option<i32> + Send + Sync>;

/// Scripted executor
pub struct MockExecutor {
    rules: Vec<Rule>,
    calls: Arc<Mutex<Vec<MockCall>>>,
    stdout: String,
}

impl MockExecutor {
    pub fn new() -> Self {
        Self {
            rules: Vec::new(),
            calls: Arc::new(Mutex::new(Vec::new())),
            stdout: String::new(),
        }
    }

    /// Stdout returned by successful calls
    pub fn with_stdout(mut self, stdout: impl Into<String>) -> Self {
        self.stdout = stdout.into();
        self
    }

    /// Fail any step whose label equals `label`
    pub fn fail_step(self, label: impl Into<String>, exit_status: i32) -> Self {
        let label = label.into();
        self.fail_if(move |call| call.label == label, exit_status)
    }

    /// Fail any command containing `fragment`
    pub fn fail_command(self, fragment: impl Into<String>, exit_status: i32) -> Self {
        let fragment = fragment.into();
        self.fail_if(
            move |call| matches!(&call.kind, MockCallKind::Command { run } if run.contains(&fragment)),
            exit_status,
        )
    }

    /// Fail any invocation of the action named `name` (without version)
    pub fn fail_action(self, name: impl Into<String>, exit_status: i32) -> Self {
        let name = name.into();
        self.fail_if(
            move |call| {
                matches!(&call.kind, MockCallKind::Action { action, .. }
                    if action.split('@').next() == Some(name.as_str()))
            },
            exit_status,
        )
    }

    pub fn fail_if<F>(mut self, predicate: F, exit_status: i32) -> Self
    where
        F: Fn(&MockCall) -> bool + Send + Sync + 'static,
    {
        self.rules
            .push(Box::new(move |call: &MockCall| predicate(call).then_some(exit_status)));
        self
    }

    /// All calls so far, in invocation order
    pub fn calls(&self) -> Vec<MockCall> {
        self.calls.lock().clone()
    }

    /// Calls made by one job instance
    pub fn calls_for(&self, instance: &str) -> Vec<MockCall> {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.instance == instance)
            .cloned()
            .collect()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    fn record(&self, ctx: &InvocationContext, kind: MockCallKind) -> Invocation {
        let call = MockCall {
            instance: ctx.instance.to_string(),
            step_index: ctx.step_index,
            label: ctx.step_label.clone(),
            kind,
            env: ctx
                .env
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        };
        let outcome = self.rules.iter().find_map(|rule| rule(&call));
        self.calls.lock().push(call);

        match outcome {
            Some(code) => Invocation::failure(code, format!("mock failure (exit {})", code)),
            None => Invocation::success(self.stdout.clone()),
        }
    }
}

impl Default for MockExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for MockExecutor {
    fn name(&self) -> &str {
        "mock"
    }

    async fn invoke_action(
        &self,
        action: &ActionRef,
        inputs: &OrderedMap<String>,
        ctx: &InvocationContext,
    ) -> Result<Invocation, FlowError> {
        let kind = MockCallKind::Action {
            action: action.to_string(),
            inputs: inputs
                .iter()
                .map(|(k, v)| (k.to_string(), v.clone()))
                .collect(),
        };
        Ok(self.record(ctx, kind))
    }

    async fn invoke_command(
        &self,
        command: &str,
        ctx: &InvocationContext,
    ) -> Result<Invocation, FlowError> {
        let kind = MockCallKind::Command {
            run: command.to_string(),
        };
        Ok(self.record(ctx, kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixCell;
    use std::time::Duration;

    fn ctx(label: &str) -> InvocationContext {
        InvocationContext {
            instance: Arc::from("test"),
            step_index: 1,
            step_label: label.to_string(),
            cell: MatrixCell::empty(),
            runner: "ubuntu-latest".to_string(),
            env: OrderedMap::new(),
            timeout: Duration::from_secs(1),
        }
    }

    #[tokio::test]
    async fn succeeds_by_default_and_records() {
        let mock = MockExecutor::new().with_stdout("ok");
        let out = mock.invoke_command("pytest", &ctx("Test")).await.unwrap();
        assert!(out.is_success());
        assert_eq!(out.stdout, "ok");
        assert_eq!(mock.call_count(), 1);
        assert_eq!(mock.calls()[0].label, "Test");
    }

    #[tokio::test]
    async fn rules_fail_matching_calls() {
        let mock = MockExecutor::new()
            .fail_step("Install dependencies", 1)
            .fail_command("flake8", 2)
            .fail_action("codecov/codecov-action", 3);

        let install = mock
            .invoke_command("pip install -r requirements.txt", &ctx("Install dependencies"))
            .await
            .unwrap();
        assert_eq!(install.exit_status, 1);

        let lint = mock.invoke_command("flake8 .", &ctx("Lint")).await.unwrap();
        assert_eq!(lint.exit_status, 2);

        let action = ActionRef::parse("codecov/codecov-action@v4").unwrap();
        let upload = mock
            .invoke_action(&action, &OrderedMap::new(), &ctx("Upload"))
            .await
            .unwrap();
        assert_eq!(upload.exit_status, 3);

        let other = mock.invoke_command("pytest", &ctx("Test")).await.unwrap();
        assert!(other.is_success());
    }

    #[tokio::test]
    async fn records_action_inputs() {
        let mock = MockExecutor::new();
        let action = ActionRef::parse("actions/setup-python@v2").unwrap();
        let mut inputs = OrderedMap::new();
        inputs.insert("python-version", "3.9".to_string());
        mock.invoke_action(&action, &inputs, &ctx("Set up Python"))
            .await
            .unwrap();
        assert_eq!(mock.calls()[0].input("python-version"), Some("3.9"));
    }
}
