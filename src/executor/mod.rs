//! # Executor boundary
//!
//! The interpreter never runs anything itself. Every step is handed to a
//! [`StepExecutor`]:
//!
//! - [`ShellExecutor`] - runs `run:` commands through `sh`, simulates actions
//! - [`MockExecutor`] - scripted exit statuses, records every call
//!
//! ```rust
//! use actflow::executor::create_executor;
//!
//! assert!(create_executor("shell").is_ok());
//! assert!(create_executor("mock").is_ok());
//! assert!(create_executor("docker").is_err());
//! ```

mod mock;
mod shell;

pub use mock::{MockCall, MockCallKind, MockExecutor};
pub use shell::ShellExecutor;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::FlowError;
use crate::matrix::MatrixCell;
use crate::step_action::ActionRef;
use crate::workflow::OrderedMap;

/// Default per-step timeout when the step sets no `timeout-minutes`
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);

/// What an executor reports back for one step
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Invocation {
    pub exit_status: i32,
    pub stdout: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

impl Invocation {
    pub fn success(stdout: impl Into<String>) -> Self {
        Self {
            exit_status: 0,
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    pub fn failure(exit_status: i32, stderr: impl Into<String>) -> Self {
        Self {
            exit_status,
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.exit_status == 0
    }
}

/// Everything an executor may need about the step it runs
#[derive(Debug, Clone)]
pub struct InvocationContext {
    /// Job instance id, e.g. `test (python-version=3.9)`
    pub instance: Arc<str>,
    /// 1-based
    pub step_index: usize,
    pub step_label: String,
    pub cell: MatrixCell,
    pub runner: String,
    /// Resolved workflow + job + step env
    pub env: OrderedMap<String>,
    pub timeout: Duration,
}

/// Capability that actually runs steps
#[async_trait]
pub trait StepExecutor: Send + Sync {
    fn name(&self) -> &str;

    /// Invoke a `uses:` action with resolved inputs
    async fn invoke_action(
        &self,
        action: &ActionRef,
        inputs: &OrderedMap<String>,
        ctx: &InvocationContext,
    ) -> Result<Invocation, FlowError>;

    /// Invoke a resolved `run:` command
    async fn invoke_command(
        &self,
        command: &str,
        ctx: &InvocationContext,
    ) -> Result<Invocation, FlowError>;
}

/// Create an executor by name
pub fn create_executor(name: &str) -> Result<Arc<dyn StepExecutor>, FlowError> {
    match name {
        "shell" => Ok(Arc::new(ShellExecutor::new())),
        "mock" => Ok(Arc::new(MockExecutor::new())),
        other => Err(FlowError::Execution(format!(
            "unknown executor '{}' (expected 'shell' or 'mock')",
            other
        ))),
    }
}
