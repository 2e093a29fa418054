//! Interpreter tests
//!
//! Whole workflows run against the scripted mock executor.

use std::sync::Arc;

use actflow::executor::MockCallKind;
use actflow::{
    lint, EventKind, ExecutionResult, Interpreter, JobStatus, MatrixCell, MockExecutor, Secrets,
    ShellExecutor, StepStatus, TriggerEvent, Workflow,
};

// ============================================================================
// FIXTURES
// ============================================================================

const PYTHON_APP: &str = r#"
name: Python application
on: [push, pull_request]
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        python-version: ['3.8', '3.9', '3.10']
    steps:
      - uses: actions/checkout@v2
      - name: Set up Python
        uses: actions/setup-python@v2
        with:
          python-version: ${{ matrix.python-version }}
      - name: Install dependencies
        run: pip install -r requirements.txt
      - name: Test with pytest
        run: pytest
"#;

const WITH_NOTIFY: &str = r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        python-version: ['3.8', '3.9', '3.10']
    steps:
      - uses: actions/checkout@v2
      - name: Install dependencies
        run: pip install -r requirements.txt
      - name: Test with pytest
        run: pytest
      - name: Notify Slack
        if: failure()
        run: echo "tests failed on ${{ matrix.python-version }}"
      - name: Cleanup
        if: always()
        run: rm -rf build
"#;

fn load(yaml: &str) -> Workflow {
    Workflow::from_yaml(yaml).expect("fixture parses")
}

fn interpreter(mock: MockExecutor, secrets: Secrets) -> (Interpreter, Arc<MockExecutor>) {
    let mock = Arc::new(mock);
    (Interpreter::new(mock.clone(), secrets), mock)
}

async fn run_all(interp: &Interpreter, wf: &Workflow) -> Vec<ExecutionResult> {
    interp
        .run_workflow(wf, &TriggerEvent::push("main"))
        .await
        .results
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[tokio::test]
async fn all_steps_succeed_in_every_cell() {
    let wf = load(PYTHON_APP);
    let (interp, mock) = interpreter(MockExecutor::new(), Secrets::new());

    let results = run_all(&interp, &wf).await;

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.status, JobStatus::Success);
        assert_eq!(result.statuses(), vec![StepStatus::Success; 4]);
    }
    assert_eq!(mock.call_count(), 12);
}

#[tokio::test]
async fn failing_step_skips_the_rest_of_the_instance() {
    let wf = load(PYTHON_APP);
    let (interp, _) = interpreter(
        MockExecutor::new().fail_step("Install dependencies", 1),
        Secrets::new(),
    );

    let results = run_all(&interp, &wf).await;

    assert_eq!(results.len(), 3);
    for result in &results {
        assert_eq!(result.status, JobStatus::Failure);
        assert_eq!(
            result.statuses(),
            vec![
                StepStatus::Success,
                StepStatus::Success,
                StepStatus::Failed,
                StepStatus::Skipped
            ]
        );
        let failed = result.failed_step().unwrap();
        assert_eq!(failed.index, 3);
        assert_eq!(failed.exit_status, Some(1));
        assert!(!failed.reason.as_ref().unwrap().is_configuration());
    }
}

#[tokio::test]
async fn failure_guarded_step_runs_after_a_failure() {
    let wf = load(WITH_NOTIFY);
    let (interp, mock) = interpreter(MockExecutor::new().fail_command("pytest", 1), Secrets::new());

    let results = run_all(&interp, &wf).await;

    for result in &results {
        assert_eq!(result.status, JobStatus::Failure);
        assert_eq!(
            result.statuses(),
            vec![
                StepStatus::Success,
                StepStatus::Success,
                StepStatus::Failed,
                StepStatus::Success,
                StepStatus::Success
            ]
        );
    }
    let notify = mock.calls_for("test (python-version=3.10)");
    match &notify[3].kind {
        MockCallKind::Command { run } => assert_eq!(run, "echo \"tests failed on 3.10\""),
        other => panic!("unexpected call {:?}", other),
    }
}

#[tokio::test]
async fn failure_guard_is_skipped_when_nothing_failed() {
    let wf = load(WITH_NOTIFY);
    let (interp, _) = interpreter(MockExecutor::new(), Secrets::new());

    let results = run_all(&interp, &wf).await;

    assert_eq!(
        results[0].statuses(),
        vec![
            StepStatus::Success,
            StepStatus::Success,
            StepStatus::Success,
            StepStatus::Skipped,
            StepStatus::Success
        ]
    );
    assert_eq!(results[0].status, JobStatus::Success);
}

#[tokio::test]
async fn missing_secret_is_a_configuration_failure() {
    let wf = load(
        r#"
on: push
jobs:
  coverage:
    runs-on: ubuntu-latest
    steps:
      - uses: actions/checkout@v2
      - name: Upload coverage
        uses: codecov/codecov-action@v3
        with:
          token: ${{ secrets.CODECOV_TOKEN }}
      - name: Done
        run: echo done
"#,
    );
    let (interp, mock) = interpreter(MockExecutor::new(), Secrets::new());

    let results = run_all(&interp, &wf).await;

    let result = &results[0];
    assert_eq!(result.status, JobStatus::Failure);
    assert_eq!(
        result.statuses(),
        vec![StepStatus::Success, StepStatus::Failed, StepStatus::Skipped]
    );
    let reason = result.steps[1].reason.as_ref().unwrap();
    assert!(reason.is_configuration());
    assert!(reason.message().contains("CODECOV_TOKEN"));
    // the executor never saw the misconfigured step
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn provided_secret_reaches_the_action() {
    let wf = load(
        r#"
on: push
jobs:
  coverage:
    runs-on: ubuntu-latest
    steps:
      - uses: codecov/codecov-action@v3
        with:
          token: ${{ secrets.CODECOV_TOKEN }}
"#,
    );
    let (interp, mock) = interpreter(
        MockExecutor::new(),
        Secrets::new().with("CODECOV_TOKEN", "abc123"),
    );

    let results = run_all(&interp, &wf).await;

    assert_eq!(results[0].status, JobStatus::Success);
    assert_eq!(mock.calls()[0].input("token"), Some("abc123"));
}

#[tokio::test]
async fn env_fallback_secret_is_masked_in_step_output() {
    std::env::set_var("ACTFLOW_IT_FALLBACK_TOKEN", "hunter2value");
    let wf = load(
        r#"
on: push
jobs:
  leak:
    runs-on: ubuntu-latest
    steps:
      - name: Echo token
        run: echo token=${{ secrets.ACTFLOW_IT_FALLBACK_TOKEN }}
"#,
    );
    let interp = Interpreter::new(
        Arc::new(ShellExecutor::new()),
        Secrets::new().with_env_fallback(),
    );

    let report = interp.run_workflow(&wf, &TriggerEvent::push("main")).await;

    let step = &report.results[0].steps[0];
    assert_eq!(step.status, StepStatus::Success);
    assert_eq!(step.stdout, "token=***");
    let json = actflow::output::render_json(&report).unwrap();
    assert!(!json.contains("hunter2value"));
}

#[tokio::test]
async fn missing_required_input_is_a_configuration_failure() {
    let wf = load(
        r#"
on: push
jobs:
  notify:
    runs-on: ubuntu-latest
    steps:
      - uses: slackapi/slack-github-action@v1.24.0
        with:
          slack-message: hello
        env:
          SLACK_BOT_TOKEN: xoxb-test
"#,
    );
    let (interp, mock) = interpreter(MockExecutor::new(), Secrets::new());

    let results = run_all(&interp, &wf).await;

    let reason = results[0].steps[0].reason.as_ref().unwrap();
    assert!(reason.is_configuration());
    assert!(reason.message().contains("channel-id"));
    assert_eq!(mock.call_count(), 0);
}

// ============================================================================
// MATRIX
// ============================================================================

#[tokio::test]
async fn results_follow_matrix_declaration_order() {
    let wf = load(
        r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        os: [ubuntu-latest, macos-latest]
        python-version: ['3.9', '3.10']
    steps:
      - run: pytest
"#,
    );
    let (interp, _) = interpreter(MockExecutor::new(), Secrets::new());

    let ids: Vec<String> = run_all(&interp, &wf)
        .await
        .iter()
        .map(ExecutionResult::instance_id)
        .collect();

    assert_eq!(
        ids,
        vec![
            "test (os=ubuntu-latest, python-version=3.9)",
            "test (os=ubuntu-latest, python-version=3.10)",
            "test (os=macos-latest, python-version=3.9)",
            "test (os=macos-latest, python-version=3.10)",
        ]
    );
}

#[tokio::test]
async fn failing_cell_does_not_affect_siblings() {
    let wf = load(PYTHON_APP);
    let (interp, _) = interpreter(
        MockExecutor::new().fail_if(
            |call| call.instance == "test (python-version=3.8)" && call.label == "Test with pytest",
            1,
        ),
        Secrets::new(),
    );

    let results = run_all(&interp, &wf).await;

    let statuses: Vec<JobStatus> = results.iter().map(|r| r.status).collect();
    assert_eq!(
        statuses,
        vec![JobStatus::Failure, JobStatus::Success, JobStatus::Success]
    );
}

#[tokio::test]
async fn literal_input_yields_to_matrix_value() {
    let wf = load(
        r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        python-version: ['3.8', '3.9', '3.10']
    steps:
      - name: Set up Python
        uses: actions/setup-python@v2
        with:
          python-version: '3.9'
"#,
    );
    let (interp, mock) = interpreter(MockExecutor::new(), Secrets::new());

    let report = interp.run_workflow(&wf, &TriggerEvent::push("main")).await;

    let versions: Vec<String> = report
        .results
        .iter()
        .map(|r| {
            mock.calls_for(&r.instance_id())[0]
                .input("python-version")
                .unwrap()
                .to_string()
        })
        .collect();
    assert_eq!(versions, vec!["3.8", "3.9", "3.10"]);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].to_string().contains("python-version"));
}

#[tokio::test]
async fn include_only_key_override_is_reported() {
    let wf = load(
        r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        include:
          - python-version: '3.11'
    steps:
      - name: Set up Python
        uses: actions/setup-python@v2
        with:
          python-version: '3.9'
"#,
    );
    let (interp, mock) = interpreter(MockExecutor::new(), Secrets::new());

    let report = interp.run_workflow(&wf, &TriggerEvent::push("main")).await;

    assert_eq!(mock.calls()[0].input("python-version"), Some("3.11"));
    assert_eq!(report.warnings, lint(&wf));
    assert_eq!(report.warnings.len(), 1);
    assert!(report.warnings[0].to_string().contains("python-version"));
}

#[tokio::test]
async fn expand_matrix_applies_include_and_exclude() {
    let wf = load(
        r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        os: [ubuntu-latest, windows-latest]
        python-version: ['3.9', '3.10']
        exclude:
          - os: windows-latest
            python-version: '3.9'
        include:
          - os: ubuntu-latest
            experimental: 'true'
    steps:
      - run: pytest
"#,
    );
    let (interp, _) = interpreter(MockExecutor::new(), Secrets::new());

    let cells = interp.expand_matrix(&wf.jobs[0]);

    assert_eq!(cells.len(), 3);
    assert_eq!(cells[0].get("experimental"), Some("true"));
    assert_eq!(cells[1].get("experimental"), Some("true"));
    assert_eq!(cells[2].get("os"), Some("windows-latest"));
    assert_eq!(cells[2].get("python-version"), Some("3.10"));
}

// ============================================================================
// TRIGGERS AND GUARDS
// ============================================================================

#[tokio::test]
async fn untriggered_workflow_runs_nothing() {
    let wf = load(PYTHON_APP);
    let (interp, mock) = interpreter(MockExecutor::new(), Secrets::new());
    let event = TriggerEvent::new("schedule");

    assert!(!interp.should_trigger(&wf, &event));
    let report = interp.run_workflow(&wf, &event).await;

    assert!(!report.triggered);
    assert!(report.results.is_empty());
    assert!(report.is_success());
    assert_eq!(mock.call_count(), 0);
}

#[tokio::test]
async fn branch_filters_apply_to_map_triggers() {
    let wf = load(
        r#"
on:
  push:
    branches: [main, 'release/**']
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make
"#,
    );
    let (interp, _) = interpreter(MockExecutor::new(), Secrets::new());

    assert!(interp.should_trigger(&wf, &TriggerEvent::push("main")));
    assert!(interp.should_trigger(&wf, &TriggerEvent::push("release/1.2")));
    assert!(!interp.should_trigger(&wf, &TriggerEvent::push("feature/x")));
    assert!(!interp.should_trigger(&wf, &TriggerEvent::pull_request("main")));
}

#[tokio::test]
async fn custom_guard_on_matrix_value() {
    let wf = load(
        r#"
on: push
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        python-version: ['3.9', '3.10']
    steps:
      - run: pytest
      - name: Upload coverage
        if: matrix.python-version == '3.10'
        run: echo upload
"#,
    );
    let (interp, _) = interpreter(MockExecutor::new(), Secrets::new());

    let results = run_all(&interp, &wf).await;

    assert_eq!(results[0].steps[1].status, StepStatus::Skipped);
    assert_eq!(results[1].steps[1].status, StepStatus::Success);
}

#[tokio::test]
async fn unknown_context_in_guard_skips_with_note() {
    let wf = load(
        r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make
      - name: Deploy
        if: vars.DEPLOY == 'yes'
        run: ./deploy.sh
"#,
    );
    let (interp, mock) = interpreter(MockExecutor::new(), Secrets::new());

    let results = run_all(&interp, &wf).await;

    let deploy = &results[0].steps[1];
    assert_eq!(deploy.status, StepStatus::Skipped);
    assert!(deploy.note.as_deref().unwrap().starts_with("guard not evaluated"));
    assert_eq!(results[0].status, JobStatus::Success);
    assert_eq!(mock.call_count(), 1);
}

#[tokio::test]
async fn continue_on_error_keeps_instance_green() {
    let wf = load(
        r#"
on: push
jobs:
  lint:
    runs-on: ubuntu-latest
    steps:
      - name: Lint with flake8
        run: flake8 .
        continue-on-error: true
      - name: Test
        run: pytest
"#,
    );
    let (interp, _) = interpreter(MockExecutor::new().fail_command("flake8", 1), Secrets::new());

    let results = run_all(&interp, &wf).await;

    assert_eq!(results[0].status, JobStatus::Success);
    assert_eq!(
        results[0].statuses(),
        vec![StepStatus::Failed, StepStatus::Success]
    );
    assert!(results[0].failed_step().is_none());
}

// ============================================================================
// PROPERTIES
// ============================================================================

#[tokio::test]
async fn rerunning_gives_identical_results() {
    let wf = load(WITH_NOTIFY);

    let (first, _) = interpreter(MockExecutor::new().fail_command("pytest", 1), Secrets::new());
    let (second, _) = interpreter(MockExecutor::new().fail_command("pytest", 1), Secrets::new());

    let a = run_all(&first, &wf).await;
    let b = run_all(&second, &wf).await;
    assert_eq!(a, b);

    let c = run_all(&first, &wf).await;
    assert_eq!(a, c);
}

#[tokio::test]
async fn run_job_directly_for_one_cell() {
    let wf = load(PYTHON_APP);
    let (interp, mock) = interpreter(MockExecutor::new(), Secrets::new());
    let cells = interp.expand_matrix(&wf.jobs[0]);

    let result = interp
        .run_job(&wf.jobs[0], &cells[2], &TriggerEvent::push("main"))
        .await;

    assert_eq!(result.cell, MatrixCell::from_pairs([("python-version", "3.10")]));
    assert!(result.is_success());
    assert_eq!(mock.calls()[1].input("python-version"), Some("3.10"));
}

#[tokio::test]
async fn event_log_traces_each_instance() {
    let wf = load(PYTHON_APP);
    let (interp, _) = interpreter(
        MockExecutor::new().fail_step("Install dependencies", 1),
        Secrets::new(),
    );

    run_all(&interp, &wf).await;

    let log = interp.event_log();
    let events = log.filter_instance("test (python-version=3.9)");
    let kinds: Vec<&str> = events
        .iter()
        .map(|e| match &e.kind {
            EventKind::JobStarted { .. } => "job_started",
            EventKind::StepStarted { .. } => "step_started",
            EventKind::StepSucceeded { .. } => "step_succeeded",
            EventKind::StepFailed { .. } => "step_failed",
            EventKind::StepSkipped { .. } => "step_skipped",
            EventKind::JobCompleted { .. } => "job_completed",
            _ => "other",
        })
        .collect();
    assert_eq!(
        kinds,
        vec![
            "job_started",
            "step_started",
            "step_succeeded",
            "step_started",
            "step_succeeded",
            "step_started",
            "step_failed",
            "step_skipped",
            "job_completed",
        ]
    );

    let workflow_events = log.workflow_events();
    assert_eq!(workflow_events.len(), 2);
    assert!(matches!(
        workflow_events[1].kind,
        EventKind::WorkflowCompleted {
            instances: 3,
            failed: 3,
            ..
        }
    ));
}
