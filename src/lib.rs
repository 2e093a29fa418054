//! actflow - local interpreter for GitHub-Actions-style workflows

pub mod catalog;
pub mod error;
pub mod event_log;
pub mod executor;
pub mod expression;
pub mod guard;
pub mod interpreter;
pub mod lint;
pub mod matrix;
pub mod output;
pub mod result;
pub mod secrets;
pub mod step_action;
pub mod template;
pub mod trigger;
pub mod validator;
pub mod workflow;

pub use catalog::{ActionCatalog, ActionManifest};
pub use error::{FixSuggestion, FlowError};
pub use event_log::{Event, EventKind, EventLog};
pub use executor::{create_executor, MockExecutor, ShellExecutor, StepExecutor};
pub use guard::Guard;
pub use interpreter::Interpreter;
pub use lint::{lint, LintWarning};
pub use matrix::{MatrixCell, MatrixSpec};
pub use output::OutputFormat;
pub use result::{ExecutionResult, FailureReason, JobStatus, StepRecord, StepStatus, WorkflowReport};
pub use secrets::Secrets;
pub use step_action::{ActionRef, StepAction};
pub use trigger::{TriggerEvent, Triggers};
pub use workflow::{JobSpec, StepSpec, Workflow};
