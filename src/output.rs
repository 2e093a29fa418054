//! Report rendering (text or JSON)

use colored::Colorize;
use serde::Deserialize;

use crate::error::FlowError;
use crate::result::{ExecutionResult, FailureReason, JobStatus, StepRecord, StepStatus, WorkflowReport};

/// Output format enum
#[derive(Debug, Clone, Copy, Deserialize, Default, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Human-readable summary (default)
    #[default]
    Text,

    /// The full report as JSON
    Json,
}

pub fn render(report: &WorkflowReport, format: OutputFormat) -> Result<String, FlowError> {
    match format {
        OutputFormat::Text => Ok(render_text(report)),
        OutputFormat::Json => render_json(report),
    }
}

pub fn render_json(report: &WorkflowReport) -> Result<String, FlowError> {
    serde_json::to_string_pretty(report)
        .map_err(|e| FlowError::Execution(format!("failed to serialize report: {}", e)))
}

/// Per-instance status followed by every step in order
pub fn render_text(report: &WorkflowReport) -> String {
    let title = report.workflow.as_deref().unwrap_or("workflow");
    if !report.triggered {
        return format!(
            "{} {} not triggered by '{}'\n",
            "○".dimmed(),
            title,
            report.event.name
        );
    }

    let mut out = String::new();
    out.push_str(&format!(
        "{} {} ({})\n",
        "→".cyan(),
        title.bold(),
        report.event.name
    ));

    for result in &report.results {
        out.push_str(&render_instance(result));
    }

    for warning in &report.warnings {
        out.push_str(&format!("{} {}\n", "warning:".yellow().bold(), warning));
    }

    let failed = report.failed().count();
    let summary = format!("{} instance(s), {} failed", report.results.len(), failed);
    if failed == 0 {
        out.push_str(&format!("{} {}\n", "✓".green(), summary));
    } else {
        out.push_str(&format!("{} {}\n", "✗".red(), summary));
    }
    out
}

fn render_instance(result: &ExecutionResult) -> String {
    let marker = match result.status {
        JobStatus::Success => "✓".green(),
        JobStatus::Failure => "✗".red(),
        JobStatus::Skipped => "○".dimmed(),
    };
    let mut out = format!("{} {}\n", marker, result.instance_id().bold());
    if let Some(note) = &result.note {
        out.push_str(&format!("    {}\n", note.dimmed()));
    }
    for step in &result.steps {
        out.push_str(&render_step(step));
    }
    out
}

fn render_step(step: &StepRecord) -> String {
    let status = match step.status {
        StepStatus::Success => "success".green(),
        StepStatus::Failed if step.continued => "failed (continued)".yellow(),
        StepStatus::Failed => "failed".red(),
        StepStatus::Skipped => "skipped".dimmed(),
    };
    let mut line = format!("  {:>2}. {} [{}]", step.index, step.label, status);
    match &step.reason {
        Some(FailureReason::Configuration { message }) => {
            line.push_str(&format!(" configuration: {}", message));
        }
        Some(FailureReason::Invocation { message, .. }) => {
            line.push_str(&format!(" {}", message));
        }
        None => {}
    }
    if let Some(note) = &step.note {
        line.push_str(&format!(" ({})", note));
    }
    line.push('\n');
    line
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matrix::MatrixCell;
    use crate::trigger::TriggerEvent;

    fn report() -> WorkflowReport {
        WorkflowReport {
            workflow: Some("Test".to_string()),
            event: TriggerEvent::push("main"),
            triggered: true,
            results: vec![ExecutionResult {
                job: "test".to_string(),
                cell: MatrixCell::from_pairs([("python-version", "3.9")]),
                status: JobStatus::Failure,
                steps: vec![
                    StepRecord::success(1, "Checkout", String::new()),
                    StepRecord::failed(
                        2,
                        "Upload",
                        FailureReason::Configuration {
                            message: "missing secret CODECOV_TOKEN".to_string(),
                        },
                    ),
                    StepRecord::skipped(3, "Lint", None),
                ],
                note: None,
            }],
            warnings: vec![],
        }
    }

    #[test]
    fn text_lists_steps_in_order() {
        colored::control::set_override(false);
        let text = render_text(&report());
        assert!(text.contains("test (python-version=3.9)"));
        let checkout = text.find("1. Checkout [success]").unwrap();
        let upload = text.find("2. Upload [failed] configuration: missing secret").unwrap();
        let lint = text.find("3. Lint [skipped]").unwrap();
        assert!(checkout < upload && upload < lint);
        assert!(text.contains("1 instance(s), 1 failed"));
    }

    #[test]
    fn json_carries_reason_tag() {
        let json = render_json(&report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        let reason = &value["results"][0]["steps"][1]["reason"];
        assert_eq!(reason["type"], "configuration");
        assert_eq!(value["results"][0]["status"], "failure");
    }

    #[test]
    fn not_triggered_is_one_line() {
        colored::control::set_override(false);
        let report = WorkflowReport::not_triggered(None, TriggerEvent::new("schedule"));
        assert_eq!(render_text(&report), "○ workflow not triggered by 'schedule'\n");
    }

    #[test]
    fn format_parses_lowercase() {
        let format: OutputFormat = serde_yaml::from_str("json").unwrap();
        assert_eq!(format, OutputFormat::Json);
        assert_eq!(OutputFormat::default(), OutputFormat::Text);
    }
}
