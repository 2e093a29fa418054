//! Shell executor
//!
//! `run:` commands go through `sh -e -c` with the step's env. Actions cannot
//! be fetched and run locally, so they are simulated: the catalog has
//! already checked their inputs, and they report success.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{debug, instrument};

use super::{Invocation, InvocationContext, StepExecutor};
use crate::error::FlowError;
use crate::step_action::ActionRef;
use crate::workflow::OrderedMap;

pub struct ShellExecutor {
    shell: String,
    working_dir: Option<PathBuf>,
}

impl ShellExecutor {
    pub fn new() -> Self {
        Self {
            shell: "sh".to_string(),
            working_dir: None,
        }
    }

    pub fn with_shell(mut self, shell: impl Into<String>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn in_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Default for ShellExecutor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepExecutor for ShellExecutor {
    fn name(&self) -> &str {
        "shell"
    }

    #[instrument(skip(self, inputs, ctx), fields(instance = %ctx.instance, step = ctx.step_index))]
    async fn invoke_action(
        &self,
        action: &ActionRef,
        inputs: &OrderedMap<String>,
        ctx: &InvocationContext,
    ) -> Result<Invocation, FlowError> {
        debug!(action = %action, inputs = inputs.len(), "simulating action");
        Ok(Invocation::success(format!(
            "{} (simulated, {} input(s))",
            action,
            inputs.len()
        )))
    }

    #[instrument(skip(self, command, ctx), fields(instance = %ctx.instance, step = ctx.step_index))]
    async fn invoke_command(
        &self,
        command: &str,
        ctx: &InvocationContext,
    ) -> Result<Invocation, FlowError> {
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-e").arg("-c").arg(command).kill_on_drop(true);
        for (key, value) in ctx.env.iter() {
            cmd.env(key, value);
        }
        for (axis, value) in ctx.cell.bindings() {
            cmd.env(matrix_env_name(axis), value);
        }
        if let Some(dir) = &self.working_dir {
            cmd.current_dir(dir);
        }

        let output = tokio::time::timeout(ctx.timeout, cmd.output())
            .await
            .map_err(|_| {
                FlowError::Execution(format!(
                    "Command timed out after {}s",
                    ctx.timeout.as_secs()
                ))
            })?
            .map_err(|e| FlowError::Execution(format!("Failed to execute command: {}", e)))?;

        let exit_status = output.status.code().unwrap_or(-1);
        debug!(exit_status, "command finished");

        Ok(Invocation {
            exit_status,
            stdout: String::from_utf8_lossy(&output.stdout).trim_end().to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim_end().to_string(),
        })
    }
}

/// `python-version` -> `MATRIX_PYTHON_VERSION`
fn matrix_env_name(axis: &str) -> String {
    let mut name = String::from("MATRIX_");
    name.extend(axis.chars().map(|c| {
        if c.is_ascii_alphanumeric() {
            c.to_ascii_uppercase()
        } else {
            '_'
        }
    }));
    name
}
