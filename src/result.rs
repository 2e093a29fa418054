//! Execution results
//!
//! One [`ExecutionResult`] per (job, matrix cell). Results carry no
//! timestamps, so two runs with a deterministic executor compare equal;
//! timing lives in the event log.

use serde::Serialize;

use crate::error::FlowError;
use crate::lint::LintWarning;
use crate::matrix::MatrixCell;
use crate::trigger::TriggerEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Success,
    Failed,
    Skipped,
}

impl StepStatus {
    /// `steps.<id>.outcome` value
    pub fn as_outcome(&self) -> &'static str {
        match self {
            StepStatus::Success => "success",
            StepStatus::Failed => "failure",
            StepStatus::Skipped => "skipped",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Success,
    Failure,
    Skipped,
}

/// Why a step failed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureReason {
    /// The step was misconfigured (missing secret, missing input, bad expression)
    Configuration { message: String },
    /// The executor ran the step and it failed, or could not run it
    Invocation {
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_status: Option<i32>,
        message: String,
    },
}

impl FailureReason {
    pub fn configuration(err: &FlowError) -> Self {
        FailureReason::Configuration {
            message: err.to_string(),
        }
    }

    pub fn is_configuration(&self) -> bool {
        matches!(self, FailureReason::Configuration { .. })
    }

    pub fn message(&self) -> &str {
        match self {
            FailureReason::Configuration { message } | FailureReason::Invocation { message, .. } => {
                message
            }
        }
    }
}

/// Status of one step within one job instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    /// 1-based
    pub index: usize,
    pub label: String,
    pub status: StepStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<FailureReason>,
    /// Why a step was skipped when it was not the plain default-guard case
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_status: Option<i32>,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stdout: String,
    /// Failed, but `continue-on-error` kept the job going
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub continued: bool,
}

impl StepRecord {
    pub fn skipped(index: usize, label: impl Into<String>, note: Option<String>) -> Self {
        Self {
            index,
            label: label.into(),
            status: StepStatus::Skipped,
            reason: None,
            note,
            exit_status: None,
            stdout: String::new(),
            continued: false,
        }
    }

    pub fn success(index: usize, label: impl Into<String>, stdout: String) -> Self {
        Self {
            index,
            label: label.into(),
            status: StepStatus::Success,
            reason: None,
            note: None,
            exit_status: Some(0),
            stdout,
            continued: false,
        }
    }

    pub fn failed(index: usize, label: impl Into<String>, reason: FailureReason) -> Self {
        let exit_status = match &reason {
            FailureReason::Invocation { exit_status, .. } => *exit_status,
            FailureReason::Configuration { .. } => None,
        };
        Self {
            index,
            label: label.into(),
            status: StepStatus::Failed,
            reason: Some(reason),
            note: None,
            exit_status,
            stdout: String::new(),
            continued: false,
        }
    }
}

/// Outcome of one job instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExecutionResult {
    pub job: String,
    pub cell: MatrixCell,
    pub status: JobStatus,
    pub steps: Vec<StepRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

impl ExecutionResult {
    /// `test` or `test (python-version=3.9)`
    pub fn instance_id(&self) -> String {
        instance_id(&self.job, &self.cell)
    }

    /// First step that failed the instance
    pub fn failed_step(&self) -> Option<&StepRecord> {
        self.steps
            .iter()
            .find(|s| s.status == StepStatus::Failed && !s.continued)
    }

    pub fn step(&self, index: usize) -> Option<&StepRecord> {
        self.steps.iter().find(|s| s.index == index)
    }

    pub fn statuses(&self) -> Vec<StepStatus> {
        self.steps.iter().map(|s| s.status).collect()
    }

    pub fn is_success(&self) -> bool {
        self.status != JobStatus::Failure
    }
}

pub fn instance_id(job: &str, cell: &MatrixCell) -> String {
    if cell.is_empty() {
        job.to_string()
    } else {
        format!("{} ({})", job, cell)
    }
}

/// Everything one triggering event produced
#[derive(Debug, Clone, Serialize)]
pub struct WorkflowReport {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workflow: Option<String>,
    pub event: TriggerEvent,
    pub triggered: bool,
    pub results: Vec<ExecutionResult>,
    pub warnings: Vec<LintWarning>,
}

impl WorkflowReport {
    pub fn not_triggered(workflow: Option<String>, event: TriggerEvent) -> Self {
        Self {
            workflow,
            event,
            triggered: false,
            results: Vec::new(),
            warnings: Vec::new(),
        }
    }

    /// No instance failed
    pub fn is_success(&self) -> bool {
        self.results.iter().all(ExecutionResult::is_success)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ExecutionResult> {
        self.results.iter().filter(|r| r.status == JobStatus::Failure)
    }

    pub fn results_for(&self, job: &str) -> Vec<&ExecutionResult> {
        self.results.iter().filter(|r| r.job == job).collect()
    }
}
