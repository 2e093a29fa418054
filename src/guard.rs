//! Step and job guards (`if:`)
//!
//! The common forms get their own variants; anything else is parsed into an
//! [`Expr`]. A custom expression without a status function is implicitly
//! `success() && <expr>`.

use crate::error::FlowError;
use crate::expression::{Expr, Scope};

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Guard {
    /// `always()`
    Always,
    /// Default: run only while nothing has failed
    #[default]
    OnSuccess,
    /// `failure()`: run only after something failed
    OnFailure,
    Custom(Expr),
}

/// Result of evaluating a guard
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GuardDecision {
    Run,
    Skip,
    /// The guard referenced something it could not resolve; treated as Skip
    Unresolvable(String),
}

impl GuardDecision {
    pub fn should_run(&self) -> bool {
        matches!(self, GuardDecision::Run)
    }
}

impl Guard {
    /// Parse an `if:` value; `None` is the default guard
    pub fn parse(condition: Option<&str>) -> Result<Self, FlowError> {
        let Some(condition) = condition else {
            return Ok(Guard::OnSuccess);
        };
        let source = strip_wrapper(condition);
        let guard = match source {
            "" | "success()" => Guard::OnSuccess,
            "failure()" => Guard::OnFailure,
            "always()" => Guard::Always,
            _ => Guard::Custom(Expr::parse(source)?),
        };
        Ok(guard)
    }

    pub fn evaluate(&self, scope: &dyn Scope) -> GuardDecision {
        let run = match self {
            Guard::Always => true,
            Guard::OnSuccess => !scope.prior_failure(),
            Guard::OnFailure => scope.prior_failure(),
            Guard::Custom(expr) => {
                if !expr.uses_status_function() && scope.prior_failure() {
                    return GuardDecision::Skip;
                }
                match expr.eval(scope) {
                    Ok(value) => value.is_truthy(),
                    Err(e) => return GuardDecision::Unresolvable(e.to_string()),
                }
            }
        };
        if run {
            GuardDecision::Run
        } else {
            GuardDecision::Skip
        }
    }
}

/// `${{ expr }}` and `expr` are equivalent in `if:`
fn strip_wrapper(condition: &str) -> &str {
    let trimmed = condition.trim();
    trimmed
        .strip_prefix("${{")
        .and_then(|rest| rest.strip_suffix("}}"))
        .map(str::trim)
        .unwrap_or(trimmed)
}
