//! Non-fatal workflow warnings
//!
//! Lints never fail a workflow; they are reported next to the results (and
//! by `actflow lint`).

use std::fmt;

use serde::Serialize;

use crate::step_action::{ActionSource, StepAction};
use crate::template::TemplateResolver;
use crate::workflow::{ScalarKind, Workflow};

/// Refs that move under you
const MUTABLE_REFS: [&str; 3] = ["main", "master", "latest"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LintKind {
    /// A literal `with:` input shadows a matrix key (axis or `include`) of the same name
    MatrixOverride { axis: String, literal: String },
    /// `uses:` without `@ref`
    UnpinnedAction { reference: String },
    /// `uses: owner/repo@main`
    MutableActionRef { reference: String },
    /// Unquoted float in a matrix axis (`3.10` reads as `3.1`)
    FloatMatrixValue { axis: String, value: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LintWarning {
    pub job: String,
    /// 1-based step index
    #[serde(skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(flatten)]
    pub kind: LintKind,
}

impl fmt::Display for LintWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.step {
            Some(step) => write!(f, "{} step {}: ", self.job, step)?,
            None => write!(f, "{}: ", self.job)?,
        }
        match &self.kind {
            LintKind::MatrixOverride { axis, literal } => write!(
                f,
                "literal '{}: {}' shadows the matrix axis (the matrix value is used); write ${{{{ matrix.{} }}}}",
                axis, literal, axis
            ),
            LintKind::UnpinnedAction { reference } => {
                write!(f, "action '{}' is not pinned to a version", reference)
            }
            LintKind::MutableActionRef { reference } => {
                write!(f, "action '{}' is pinned to a moving branch", reference)
            }
            LintKind::FloatMatrixValue { axis, value } => write!(
                f,
                "matrix axis '{}' value {} is an unquoted number; quote it to keep trailing zeros",
                axis, value
            ),
        }
    }
}

pub fn lint(workflow: &Workflow) -> Vec<LintWarning> {
    let mut warnings = Vec::new();

    for job in &workflow.jobs {
        if let Some(matrix) = &job.matrix {
            for axis in &matrix.axes {
                for value in axis.values.iter().filter(|v| v.kind == ScalarKind::Float) {
                    warnings.push(LintWarning {
                        job: job.key.clone(),
                        step: None,
                        kind: LintKind::FloatMatrixValue {
                            axis: axis.name.clone(),
                            value: value.text.clone(),
                        },
                    });
                }
            }
        }

        for (i, step) in job.steps.iter().enumerate() {
            let StepAction::Action(invocation) = &step.action else {
                continue;
            };
            let reference = &invocation.reference;
            let at = |kind| LintWarning {
                job: job.key.clone(),
                step: Some(i + 1),
                kind,
            };

            if !reference.is_pinned() {
                warnings.push(at(LintKind::UnpinnedAction {
                    reference: reference.to_string(),
                }));
            } else if reference.source == ActionSource::Repository
                && MUTABLE_REFS.contains(&reference.version.as_str())
            {
                warnings.push(at(LintKind::MutableActionRef {
                    reference: reference.to_string(),
                }));
            }

            if let Some(matrix) = &job.matrix {
                for (key, value) in invocation.inputs.iter() {
                    if matrix.binds(key) && !TemplateResolver::has_expressions(value) {
                        warnings.push(at(LintKind::MatrixOverride {
                            axis: key.to_string(),
                            literal: value.clone(),
                        }));
                    }
                }
            }
        }
    }

    warnings
}
