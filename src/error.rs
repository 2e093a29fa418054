//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Execution error: {0}")]
    Execution(String),

    // ─────────────────────────────────────────────────────────────
    // Configuration errors (ACT-010 to ACT-019)
    // Raised before any job runs.
    // ─────────────────────────────────────────────────────────────

    #[error("ACT-010: Workflow declares no jobs")]
    NoJobs,

    #[error("ACT-011: Duplicate job name '{job}'")]
    DuplicateJob { job: String },

    #[error("ACT-012: Job '{job}' has no steps")]
    EmptySteps { job: String },

    #[error("ACT-013: Step {index} of job '{job}' must set exactly one of 'uses' or 'run'")]
    AmbiguousStep { job: String, index: usize },

    #[error("ACT-014: Invalid action reference '{reference}': {reason}")]
    InvalidActionRef { reference: String, reason: String },

    #[error("ACT-015: Invalid matrix in job '{job}': {reason}")]
    InvalidMatrix { job: String, reason: String },

    #[error("ACT-016: Invalid job name '{job}' (use letters, digits, '-' or '_')")]
    InvalidJobName { job: String },

    #[error("ACT-017: Invalid trigger: {reason}")]
    InvalidTrigger { reason: String },

    #[error("ACT-018: Duplicate key '{key}' in {context}")]
    DuplicateKey { key: String, context: String },

    #[error("ACT-019: Invalid branch filter '{pattern}': {reason}")]
    InvalidBranchFilter { pattern: String, reason: String },

    // ─────────────────────────────────────────────────────────────
    // Step configuration errors (ACT-020 to ACT-022)
    // Contained to the failing step, never abort the run.
    // ─────────────────────────────────────────────────────────────

    #[error("ACT-020: Secret '{name}' is not provided")]
    MissingSecret { name: String },

    #[error("ACT-021: Action '{action}' requires input '{input}'")]
    MissingInput { action: String, input: String },

    #[error("ACT-022: Cannot resolve '{reference}' in this context")]
    UnresolvedReference { reference: String },

    #[error("ACT-023: Action '{action}' requires environment variable '{name}'")]
    MissingEnv { action: String, name: String },

    #[error("ACT-024: Step {index} of job '{job}' has out-of-range timeout-minutes {minutes}")]
    InvalidTimeout { job: String, index: usize, minutes: u64 },

    // ─────────────────────────────────────────────────────────────
    // Expression errors (ACT-030 to ACT-032)
    // ─────────────────────────────────────────────────────────────

    #[error("ACT-030: Expression parse error at position {position}: {details}")]
    ExpressionParse { position: usize, details: String },

    #[error("ACT-031: Unknown function '{name}()' in expression")]
    UnknownFunction { name: String },

    #[error("ACT-032: Unterminated '${{{{' in '{template}'")]
    UnterminatedTemplate { template: String },
}

impl FlowError {
    /// Whether the error belongs to the configuration family (fails fast)
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            FlowError::YamlParse(_)
                | FlowError::NoJobs
                | FlowError::DuplicateJob { .. }
                | FlowError::EmptySteps { .. }
                | FlowError::AmbiguousStep { .. }
                | FlowError::InvalidActionRef { .. }
                | FlowError::InvalidMatrix { .. }
                | FlowError::InvalidJobName { .. }
                | FlowError::InvalidTrigger { .. }
                | FlowError::DuplicateKey { .. }
                | FlowError::InvalidBranchFilter { .. }
                | FlowError::MissingSecret { .. }
                | FlowError::MissingInput { .. }
                | FlowError::UnresolvedReference { .. }
                | FlowError::MissingEnv { .. }
                | FlowError::InvalidTimeout { .. }
        )
    }
}

impl FixSuggestion for FlowError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            FlowError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
            FlowError::Io(_) => Some("Check file path and permissions"),
            FlowError::Execution(_) => Some("Check that 'sh' is available and the command is valid"),
            FlowError::NoJobs => Some("Add at least one entry under 'jobs:'"),
            FlowError::DuplicateJob { .. } => Some("Give every job a unique key under 'jobs:'"),
            FlowError::EmptySteps { .. } => Some("Add at least one step under 'steps:'"),
            FlowError::AmbiguousStep { .. } => {
                Some("A step either 'uses: owner/action@version' or has a 'run:' command, not both")
            }
            FlowError::InvalidActionRef { .. } => {
                Some("Use 'owner/repo@ref', 'owner/repo/path@ref' or a local './path'")
            }
            FlowError::InvalidMatrix { .. } => {
                Some("Matrix axes are lists of scalars; include/exclude are lists of maps")
            }
            FlowError::InvalidJobName { .. } => Some("Rename the job, e.g. 'build' or 'unit-tests'"),
            FlowError::InvalidTrigger { .. } => Some("Use triggers like 'on: [push, pull_request]'"),
            FlowError::DuplicateKey { .. } => Some("Remove the repeated key"),
            FlowError::InvalidBranchFilter { .. } => Some("Use glob syntax like 'main' or 'release/**'"),
            FlowError::MissingSecret { .. } => {
                Some("Pass it with --secret NAME=value, --secrets-file or --secrets-from-env")
            }
            FlowError::MissingInput { .. } => Some("Add the input under the step's 'with:' block"),
            FlowError::UnresolvedReference { .. } => {
                Some("Use matrix.*, env.*, secrets.*, github.* or runner.* references")
            }
            FlowError::MissingEnv { .. } => Some("Set it in the step's 'env:' block, usually from secrets"),
            FlowError::InvalidTimeout { .. } => {
                Some("Use a positive number of minutes, e.g. 'timeout-minutes: 30'")
            }
            FlowError::ExpressionParse { .. } => {
                Some("Check expression syntax, e.g. ${{ matrix.python-version == '3.10' }}")
            }
            FlowError::UnknownFunction { .. } => {
                Some("Supported: success(), failure(), always(), cancelled(), contains(), startsWith(), endsWith()")
            }
            FlowError::UnterminatedTemplate { .. } => Some("Close the expression with '}}'"),
        }
    }
}
