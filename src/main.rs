//! actflow CLI - run GitHub-Actions-style workflows locally

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use colored::Colorize;
use walkdir::WalkDir;

use actflow::output::{self, OutputFormat};
use actflow::{
    create_executor, lint, FixSuggestion, FlowError, Interpreter, Secrets, TriggerEvent, Workflow,
};

#[derive(Parser)]
#[command(name = "actflow")]
#[command(about = "actflow - run GitHub-Actions-style workflows locally")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow for one triggering event
    Run {
        /// Path to the workflow .yml file
        file: PathBuf,

        /// Triggering event name
        #[arg(short, long, default_value = "push")]
        event: String,

        /// Branch the event happened on
        #[arg(short, long)]
        branch: Option<String>,

        /// Secret as NAME=value (repeatable)
        #[arg(short, long = "secret", value_name = "NAME=VALUE")]
        secrets: Vec<String>,

        /// dotenv-style file with secrets
        #[arg(long)]
        secrets_file: Option<PathBuf>,

        /// Fall back to environment variables for unknown secrets
        #[arg(long)]
        secrets_from_env: bool,

        /// Record steps without running anything
        #[arg(long)]
        dry_run: bool,

        /// Report format
        #[arg(short, long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,

        /// Print the execution event log after the report
        #[arg(long)]
        events: bool,
    },

    /// Validate a workflow file, or every workflow in a directory
    Validate {
        /// Workflow file or directory (e.g. .github/workflows)
        path: PathBuf,
    },

    /// Report non-fatal problems in a workflow
    Lint {
        /// Path to the workflow .yml file
        file: PathBuf,
    },

    /// Print the job instances each matrix expands into
    Matrix {
        /// Path to the workflow .yml file
        file: PathBuf,

        /// Only this job
        #[arg(short, long)]
        job: Option<String>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Logs go to stderr so reports on stdout stay machine-readable
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Run {
            file,
            event,
            branch,
            secrets,
            secrets_file,
            secrets_from_env,
            dry_run,
            format,
            events,
        } => {
            let options = RunOptions {
                event,
                branch,
                secrets,
                secrets_file,
                secrets_from_env,
                dry_run,
                format,
                events,
            };
            run_workflow(&file, options).await
        }
        Commands::Validate { path } => validate_path(&path),
        Commands::Lint { file } => lint_workflow(&file),
        Commands::Matrix { file, job } => print_matrix(&file, job.as_deref()),
    };

    match result {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            print_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn print_error(err: &anyhow::Error) {
    eprintln!("{} {:#}", "Error:".red().bold(), err);
    if let Some(suggestion) = err.downcast_ref::<FlowError>().and_then(|e| e.fix_suggestion()) {
        eprintln!("  {} {}", "Fix:".yellow(), suggestion);
    }
}

struct RunOptions {
    event: String,
    branch: Option<String>,
    secrets: Vec<String>,
    secrets_file: Option<PathBuf>,
    secrets_from_env: bool,
    dry_run: bool,
    format: OutputFormat,
    events: bool,
}

fn load_workflow(file: &Path) -> anyhow::Result<Workflow> {
    let yaml = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    Ok(Workflow::from_yaml(&yaml)?)
}

async fn run_workflow(file: &Path, options: RunOptions) -> anyhow::Result<bool> {
    let workflow = load_workflow(file)?;

    let mut secrets = Secrets::from_pairs(&options.secrets)?;
    if let Some(path) = &options.secrets_file {
        secrets.load_file(path)?;
    }
    if options.secrets_from_env {
        secrets = secrets.with_env_fallback();
    }

    let executor = create_executor(if options.dry_run { "mock" } else { "shell" })?;
    let interpreter = Interpreter::new(Arc::clone(&executor), secrets);

    let mut event = TriggerEvent::new(options.event);
    if let Some(branch) = options.branch {
        event = event.on_branch(branch);
    }

    if options.format == OutputFormat::Text {
        eprintln!(
            "{} Running {} with {} executor",
            "→".cyan(),
            file.display(),
            executor.name().cyan().bold()
        );
    }

    let report = interpreter.run_workflow(&workflow, &event).await;
    print!("{}", output::render(&report, options.format)?);

    if options.events {
        let events = serde_json::to_string_pretty(&interpreter.event_log().to_json())?;
        println!("{}", events);
    }

    Ok(report.is_success())
}

fn validate_path(path: &Path) -> anyhow::Result<bool> {
    if !path.is_dir() {
        return validate_file(path).map(|_| true);
    }

    let files: Vec<PathBuf> = WalkDir::new(path)
        .sort_by_file_name()
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .filter(|p| matches!(p.extension().and_then(|x| x.to_str()), Some("yml" | "yaml")))
        .collect();

    if files.is_empty() {
        bail!("no .yml or .yaml files under {}", path.display());
    }

    let mut all_valid = true;
    for file in &files {
        if let Err(e) = validate_file(file) {
            print_error(&e);
            all_valid = false;
        }
    }
    Ok(all_valid)
}

fn validate_file(file: &Path) -> anyhow::Result<()> {
    let workflow = load_workflow(file)?;

    println!("{} Workflow '{}' is valid", "✓".green(), file.display());
    if let Some(name) = &workflow.name {
        println!("  Name: {}", name);
    }
    println!("  Triggers: {}", workflow.triggers.event_names().join(", "));
    println!("  Jobs: {}", workflow.jobs.len());
    println!("  Steps: {}", workflow.step_count());
    Ok(())
}

fn lint_workflow(file: &Path) -> anyhow::Result<bool> {
    let workflow = load_workflow(file)?;
    let warnings = lint(&workflow);

    if warnings.is_empty() {
        println!("{} No warnings", "✓".green());
    }
    for warning in &warnings {
        println!("{} {}", "warning:".yellow().bold(), warning);
    }
    Ok(true)
}

fn print_matrix(file: &Path, only: Option<&str>) -> anyhow::Result<bool> {
    let workflow = load_workflow(file)?;
    let jobs: Vec<_> = match only {
        Some(name) => match workflow.job(name) {
            Some(job) => vec![job],
            None => bail!("no job named '{}'", name),
        },
        None => workflow.jobs.iter().collect(),
    };

    for job in jobs {
        let cells = job.cells();
        println!("{} ({} instance(s))", job.key.bold(), cells.len());
        for cell in cells {
            if cell.is_empty() {
                println!("  (no matrix)");
            } else {
                println!("  {}", cell);
            }
        }
    }
    Ok(true)
}
