//! Workflow Descriptor Interpreter
//!
//! Given a validated [`Workflow`] and a triggering event, produces one
//! [`ExecutionResult`] per (job, matrix cell).
//!
//! Within an instance steps run strictly in declaration order. The first
//! failing step fails the instance; later steps with the default guard are
//! skipped, while `failure()` / `always()` guarded steps still run. Instances
//! never affect each other and run concurrently.

use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::future::join_all;
use tracing::{debug, info, instrument, warn};

use crate::catalog::ActionCatalog;
use crate::error::FlowError;
use crate::event_log::{EventKind, EventLog};
use crate::executor::{Invocation, InvocationContext, StepExecutor, DEFAULT_STEP_TIMEOUT};
use crate::expression::{ExprValue, Scope};
use crate::guard::GuardDecision;
use crate::lint;
use crate::matrix::MatrixCell;
use crate::result::{
    instance_id, ExecutionResult, FailureReason, JobStatus, StepRecord, StepStatus, WorkflowReport,
};
use crate::secrets::Secrets;
use crate::step_action::StepAction;
use crate::template::{self, TemplateResolver};
use crate::trigger::TriggerEvent;
use crate::workflow::{JobSpec, OrderedMap, StepSpec, Workflow};

pub struct Interpreter {
    executor: Arc<dyn StepExecutor>,
    secrets: Arc<Secrets>,
    catalog: ActionCatalog,
    event_log: EventLog,
    default_timeout: Duration,
}

impl Interpreter {
    pub fn new(executor: Arc<dyn StepExecutor>, secrets: Secrets) -> Self {
        Self {
            executor,
            secrets: Arc::new(secrets),
            catalog: ActionCatalog::builtin(),
            event_log: EventLog::new(),
            default_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    pub fn with_catalog(mut self, catalog: ActionCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn with_event_log(mut self, event_log: EventLog) -> Self {
        self.event_log = event_log;
        self
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn event_log(&self) -> &EventLog {
        &self.event_log
    }

    /// Whether `event` fires the workflow
    pub fn should_trigger(&self, workflow: &Workflow, event: &TriggerEvent) -> bool {
        workflow.triggers.matches(event)
    }

    /// One cell per job instance; no matrix yields a single empty cell
    pub fn expand_matrix(&self, job: &JobSpec) -> Vec<MatrixCell> {
        job.cells()
    }

    /// Run every instance of every job for `event`
    #[instrument(skip_all, fields(event = %event.name))]
    pub async fn run_workflow(&self, workflow: &Workflow, event: &TriggerEvent) -> WorkflowReport {
        if !self.should_trigger(workflow, event) {
            info!("workflow not triggered");
            self.event_log.emit(EventKind::WorkflowNotTriggered {
                event: event.name.clone(),
            });
            return WorkflowReport::not_triggered(workflow.name.clone(), event.clone());
        }

        let started = Instant::now();
        self.event_log.emit(EventKind::WorkflowStarted {
            event: event.name.clone(),
            job_count: workflow.jobs.len(),
        });

        let mut plan = Vec::new();
        for job in &workflow.jobs {
            match self.job_guard(job, event) {
                GuardDecision::Run => {
                    for cell in self.expand_matrix(job) {
                        plan.push(Planned::Run(job, cell));
                    }
                }
                GuardDecision::Skip => plan.push(Planned::Skipped(self.skipped_job(job, None))),
                GuardDecision::Unresolvable(msg) => {
                    let note = format!("job guard not evaluated: {}", msg);
                    plan.push(Planned::Skipped(self.skipped_job(job, Some(note))));
                }
            }
        }

        let results = join_all(plan.iter().map(|planned| async move {
            match planned {
                Planned::Skipped(result) => result.clone(),
                Planned::Run(job, cell) => self.run_job(job, cell, event).await,
            }
        }))
        .await;

        let failed = results
            .iter()
            .filter(|r| r.status == JobStatus::Failure)
            .count();
        self.event_log.emit(EventKind::WorkflowCompleted {
            instances: results.len(),
            failed,
            total_duration_ms: started.elapsed().as_millis() as u64,
        });
        info!(instances = results.len(), failed, "workflow finished");

        WorkflowReport {
            workflow: workflow.name.clone(),
            event: event.clone(),
            triggered: true,
            results,
            warnings: lint::lint(workflow),
        }
    }

    /// Run one job instance
    #[instrument(skip_all, fields(job = %job.key, cell = %cell))]
    pub async fn run_job(
        &self,
        job: &JobSpec,
        cell: &MatrixCell,
        event: &TriggerEvent,
    ) -> ExecutionResult {
        let instance: Arc<str> = Arc::from(instance_id(&job.key, cell));
        let started = Instant::now();
        self.event_log.emit(EventKind::JobStarted {
            instance: Arc::clone(&instance),
            runner: job.runs_on.clone(),
            steps: job.steps.len(),
        });

        let empty = OrderedMap::new();
        let base = InstanceScope {
            job: &job.key,
            runner: &job.runs_on,
            cell,
            env: &empty,
            secrets: &self.secrets,
            event,
            outcomes: &[],
            prior_failure: false,
        };
        // Resolved once per instance; an error fails every step that runs
        let job_env = resolve_map(&job.env, &base);

        let mut records: Vec<StepRecord> = Vec::with_capacity(job.steps.len());
        let mut outcomes: Vec<(String, StepStatus)> = Vec::new();
        let mut failed = false;

        for (i, step) in job.steps.iter().enumerate() {
            let index = i + 1;
            let label = step.label();
            let scope = base.at_step(job_env.as_ref().unwrap_or(&empty), &outcomes, failed);

            let record = match step.guard.evaluate(&scope) {
                GuardDecision::Run => {
                    let target = StepTarget {
                        instance: &instance,
                        index,
                        label: &label,
                    };
                    self.run_step(step, target, &scope, job_env.as_ref()).await
                }
                GuardDecision::Skip => StepRecord::skipped(index, &label, None),
                GuardDecision::Unresolvable(msg) => {
                    warn!(step = index, error = %msg, "guard could not be evaluated, skipping");
                    StepRecord::skipped(index, &label, Some(format!("guard not evaluated: {}", msg)))
                }
            };

            if record.status == StepStatus::Skipped {
                self.event_log.emit(EventKind::StepSkipped {
                    instance: Arc::clone(&instance),
                    index,
                    note: record.note.clone(),
                });
            }
            if record.status == StepStatus::Failed && !record.continued {
                failed = true;
            }
            if let Some(id) = &step.id {
                outcomes.push((id.clone(), record.status));
            }
            records.push(record);
        }

        self.event_log.emit(EventKind::JobCompleted {
            instance: Arc::clone(&instance),
            success: !failed,
            duration_ms: started.elapsed().as_millis() as u64,
        });

        ExecutionResult {
            job: job.key.clone(),
            cell: cell.clone(),
            status: if failed {
                JobStatus::Failure
            } else {
                JobStatus::Success
            },
            steps: records,
            note: None,
        }
    }

    async fn run_step(
        &self,
        step: &StepSpec,
        target: StepTarget<'_>,
        scope: &InstanceScope<'_>,
        job_env: Result<&OrderedMap<String>, &FlowError>,
    ) -> StepRecord {
        let instance = target.instance;
        self.event_log.emit(EventKind::StepStarted {
            instance: Arc::clone(instance),
            index: target.index,
            label: target.label.to_string(),
        });
        debug!(step = target.index, kind = step.action.kind(), label = target.label, "running step");

        let started = Instant::now();
        let outcome = self.invoke_step(step, &target, scope, job_env).await;
        let duration_ms = started.elapsed().as_millis() as u64;

        let record = match outcome {
            Ok(invocation) if invocation.is_success() => {
                self.event_log.emit(EventKind::StepSucceeded {
                    instance: Arc::clone(instance),
                    index: target.index,
                    duration_ms,
                });
                StepRecord::success(
                    target.index,
                    target.label,
                    self.secrets.mask(&invocation.stdout),
                )
            }
            Ok(invocation) => {
                let mut message = format!("exit status {}", invocation.exit_status);
                // last non-blank stderr line is usually the useful one
                if let Some(line) = invocation.stderr.lines().rev().find(|l| !l.trim().is_empty()) {
                    message = format!("{}: {}", message, self.secrets.mask(line.trim()));
                }
                let mut record = StepRecord::failed(
                    target.index,
                    target.label,
                    FailureReason::Invocation {
                        exit_status: Some(invocation.exit_status),
                        message,
                    },
                );
                record.stdout = self.secrets.mask(&invocation.stdout);
                record
            }
            Err(reason) => StepRecord::failed(target.index, target.label, reason),
        };

        if let Some(reason) = &record.reason {
            warn!(step = target.index, error = reason.message(), "step failed");
            self.event_log.emit(EventKind::StepFailed {
                instance: Arc::clone(instance),
                index: target.index,
                error: reason.message().to_string(),
                duration_ms,
            });
        }

        StepRecord {
            continued: record.status == StepStatus::Failed && step.continue_on_error,
            ..record
        }
    }

    /// Resolve env, inputs and command, then hand the step to the executor
    async fn invoke_step(
        &self,
        step: &StepSpec,
        target: &StepTarget<'_>,
        scope: &InstanceScope<'_>,
        job_env: Result<&OrderedMap<String>, &FlowError>,
    ) -> Result<Invocation, FailureReason> {
        let job_env = job_env.map_err(FailureReason::configuration)?;

        let mut env = job_env.clone();
        for (key, value) in resolve_map(&step.env, scope)
            .map_err(|e| FailureReason::configuration(&e))?
        {
            env.insert(key, value);
        }
        let scope = scope.at_step(&env, scope.outcomes, scope.prior_failure);

        let ctx = InvocationContext {
            instance: Arc::clone(target.instance),
            step_index: target.index,
            step_label: target.label.to_string(),
            cell: scope.cell.clone(),
            runner: scope.runner.to_string(),
            env: env.clone(),
            timeout: step.timeout.unwrap_or(self.default_timeout),
        };

        let invoked = match &step.action {
            StepAction::Action(action) => {
                let mut inputs = resolve_map(&action.inputs, &scope)
                    .map_err(|e| FailureReason::configuration(&e))?;
                bind_matrix_inputs(&mut inputs, &action.inputs, scope.cell);
                self.catalog
                    .check(&action.reference, &inputs, &env)
                    .map_err(|e| FailureReason::configuration(&e))?;
                self.executor
                    .invoke_action(&action.reference, &inputs, &ctx)
                    .await
            }
            StepAction::Command(command) => {
                let run = template::resolve(&command.run, &scope)
                    .map_err(|e| FailureReason::configuration(&e))?;
                self.executor.invoke_command(&run, &ctx).await
            }
        };

        invoked.map_err(|e| FailureReason::Invocation {
            exit_status: None,
            message: self.secrets.mask(&e.to_string()),
        })
    }

    fn job_guard(&self, job: &JobSpec, event: &TriggerEvent) -> GuardDecision {
        let empty_cell = MatrixCell::empty();
        let scope = InstanceScope {
            job: &job.key,
            runner: &job.runs_on,
            cell: &empty_cell,
            env: &job.env,
            secrets: &self.secrets,
            event,
            outcomes: &[],
            prior_failure: false,
        };
        job.guard.evaluate(&scope)
    }

    fn skipped_job(&self, job: &JobSpec, note: Option<String>) -> ExecutionResult {
        let instance: Arc<str> = Arc::from(job.key.as_str());
        self.event_log.emit(EventKind::JobSkipped {
            instance,
            reason: note.clone().unwrap_or_else(|| "job guard is false".to_string()),
        });
        ExecutionResult {
            job: job.key.clone(),
            cell: MatrixCell::empty(),
            status: JobStatus::Skipped,
            steps: job
                .steps
                .iter()
                .enumerate()
                .map(|(i, s)| StepRecord::skipped(i + 1, s.label(), None))
                .collect(),
            note,
        }
    }
}

enum Planned<'a> {
    Skipped(ExecutionResult),
    Run(&'a JobSpec, MatrixCell),
}

struct StepTarget<'a> {
    instance: &'a Arc<str>,
    index: usize,
    label: &'a str,
}

/// What expressions can see inside one job instance
#[derive(Clone, Copy)]
struct InstanceScope<'a> {
    job: &'a str,
    runner: &'a str,
    cell: &'a MatrixCell,
    env: &'a OrderedMap<String>,
    secrets: &'a Secrets,
    event: &'a TriggerEvent,
    outcomes: &'a [(String, StepStatus)],
    prior_failure: bool,
}

impl<'a> InstanceScope<'a> {
    fn at_step<'b>(
        &self,
        env: &'b OrderedMap<String>,
        outcomes: &'b [(String, StepStatus)],
        prior_failure: bool,
    ) -> InstanceScope<'b>
    where
        'a: 'b,
    {
        InstanceScope {
            job: self.job,
            runner: self.runner,
            cell: self.cell,
            env,
            secrets: self.secrets,
            event: self.event,
            outcomes,
            prior_failure,
        }
    }
}

impl Scope for InstanceScope<'_> {
    fn lookup(&self, path: &[String]) -> Result<ExprValue, FlowError> {
        let unresolved = || FlowError::UnresolvedReference {
            reference: path.join("."),
        };
        let string = |s: &str| -> Result<ExprValue, FlowError> { Ok(ExprValue::String(s.to_string())) };

        let segments: Vec<&str> = path.iter().map(String::as_str).collect();
        match segments.as_slice() {
            ["matrix", axis] => self.cell.get(axis).map_or_else(|| Err(unresolved()), string),
            ["env", name] => Ok(self
                .env
                .get(name)
                .map_or(ExprValue::Null, |v| ExprValue::String(v.clone()))),
            ["secrets", name] => self.secrets.require(name).map(ExprValue::String),
            ["github", "event_name"] => string(&self.event.name),
            ["github", "job"] => string(self.job),
            ["github", "ref"] => string(self.event.git_ref().unwrap_or_default().as_str()),
            ["github", "ref_name"] => string(self.event.branch.as_deref().unwrap_or_default()),
            ["github", "head_ref"] if self.event.name == "pull_request" => {
                string(self.event.branch.as_deref().unwrap_or_default())
            }
            ["github", "head_ref"] => string(""),
            ["runner", "os"] => string(runner_os(self.runner)),
            ["runner", "name"] => string(self.runner),
            ["job", "status"] => string(if self.prior_failure { "failure" } else { "success" }),
            ["steps", id, "outcome" | "conclusion"] => self
                .outcomes
                .iter()
                .find(|(step_id, _)| step_id == id)
                .map_or_else(|| Err(unresolved()), |(_, status)| string(status.as_outcome())),
            _ => Err(unresolved()),
        }
    }

    fn prior_failure(&self) -> bool {
        self.prior_failure
    }
}

/// `runner.os` as GitHub reports it for the common hosted labels
fn runner_os(label: &str) -> &'static str {
    let label = label.to_ascii_lowercase();
    if label.contains("windows") {
        "Windows"
    } else if label.contains("macos") {
        "macOS"
    } else {
        "Linux"
    }
}

/// A literal input named after a matrix axis takes the cell's value
fn bind_matrix_inputs(inputs: &mut OrderedMap<String>, raw: &OrderedMap<String>, cell: &MatrixCell) {
    for (key, literal) in raw.iter() {
        if TemplateResolver::has_expressions(literal) {
            continue;
        }
        if let Some(value) = cell.get(key) {
            if value != literal {
                debug!(input = key, literal = literal.as_str(), value, "matrix value replaces literal input");
            }
            inputs.insert(key, value.to_string());
        }
    }
}

fn resolve_map(
    map: &OrderedMap<String>,
    scope: &dyn Scope,
) -> Result<OrderedMap<String>, FlowError> {
    map.iter()
        .map(|(k, v)| Ok((k.to_string(), template::resolve(v, scope)?)))
        .collect()
}
