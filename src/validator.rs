//! Structural validation
//!
//! Runs on the raw document before conversion. Everything rejected here is a
//! configuration error: it fails fast, before any job is expanded.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::FlowError;
use crate::workflow::{timeout_from_minutes, JobRaw, OrderedMap, Scalar, StepRaw, WorkflowRaw};

/// Job keys and step ids: start with a letter or `_`, then `[A-Za-z0-9_-]`
static ID_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z_][A-Za-z0-9_-]*$").expect("valid regex"));

pub fn validate(raw: &WorkflowRaw) -> Result<(), FlowError> {
    let has_triggers = match &raw.on {
        None | Some(serde_yaml::Value::Null) => false,
        Some(serde_yaml::Value::Sequence(s)) => !s.is_empty(),
        Some(serde_yaml::Value::Mapping(m)) => !m.is_empty(),
        Some(_) => true,
    };
    if !has_triggers {
        return Err(FlowError::InvalidTrigger {
            reason: "workflow declares no triggers ('on' is empty)".to_string(),
        });
    }

    if raw.jobs.is_empty() {
        return Err(FlowError::NoJobs);
    }
    if let Some(dup) = raw.jobs.first_duplicate() {
        return Err(FlowError::DuplicateJob {
            job: dup.to_string(),
        });
    }
    check_keys(&raw.env, "workflow env")?;

    for (key, job) in raw.jobs.iter() {
        validate_job(key, job)?;
    }
    Ok(())
}

fn validate_job(key: &str, job: &JobRaw) -> Result<(), FlowError> {
    if !ID_PATTERN.is_match(key) {
        return Err(FlowError::InvalidJobName {
            job: key.to_string(),
        });
    }
    if job.steps.is_empty() {
        return Err(FlowError::EmptySteps {
            job: key.to_string(),
        });
    }
    check_keys(&job.env, &format!("env of job '{}'", key))?;

    let mut seen_ids: Vec<&str> = Vec::new();
    for (i, step) in job.steps.iter().enumerate() {
        let index = i + 1;
        validate_step(key, index, step)?;

        if let Some(id) = step.id.as_deref() {
            if !ID_PATTERN.is_match(id) {
                return Err(FlowError::InvalidJobName {
                    job: format!("{}.steps[{}].id={}", key, index, id),
                });
            }
            if seen_ids.contains(&id) {
                return Err(FlowError::DuplicateKey {
                    key: id.to_string(),
                    context: format!("step ids of job '{}'", key),
                });
            }
            seen_ids.push(id);
        }
    }
    Ok(())
}

fn validate_step(job: &str, index: usize, step: &StepRaw) -> Result<(), FlowError> {
    let uses = step.uses.as_deref().is_some_and(|u| !u.trim().is_empty());
    let run = step.run.as_deref().is_some_and(|r| !r.trim().is_empty());
    if uses == run {
        return Err(FlowError::AmbiguousStep {
            job: job.to_string(),
            index,
        });
    }
    if run && !step.with.is_empty() {
        return Err(FlowError::AmbiguousStep {
            job: job.to_string(),
            index,
        });
    }
    if let Some(minutes) = step.timeout_minutes {
        if timeout_from_minutes(minutes).is_none() {
            return Err(FlowError::InvalidTimeout {
                job: job.to_string(),
                index,
                minutes,
            });
        }
    }
    check_keys(&step.with, &format!("'with' of step {} in job '{}'", index, job))?;
    check_keys(&step.env, &format!("env of step {} in job '{}'", index, job))?;
    Ok(())
}

fn check_keys(map: &OrderedMap<Scalar>, context: &str) -> Result<(), FlowError> {
    match map.first_duplicate() {
        Some(key) => Err(FlowError::DuplicateKey {
            key: key.to_string(),
            context: context.to_string(),
        }),
        None => Ok(()),
    }
}
