//! Step payloads
//!
//! A step either invokes a versioned external action (`uses:`) or runs an
//! inline shell command (`run:`).

use std::fmt;

use crate::error::FlowError;
use crate::workflow::OrderedMap;

/// Where an action comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ActionSource {
    /// `owner/repo[/path]@ref`
    Repository,
    /// `./path/to/action`
    Local,
    /// `docker://image:tag`
    Docker,
}

/// Parsed `uses:` reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionRef {
    /// `owner/repo[/path]`, local path or docker image
    pub name: String,
    /// Version pin after `@` (empty when absent)
    pub version: String,
    pub source: ActionSource,
}

impl ActionRef {
    pub fn parse(reference: &str) -> Result<Self, FlowError> {
        let reference = reference.trim();
        let invalid = |reason: &str| FlowError::InvalidActionRef {
            reference: reference.to_string(),
            reason: reason.to_string(),
        };

        if reference.is_empty() {
            return Err(invalid("empty reference"));
        }

        if let Some(image) = reference.strip_prefix("docker://") {
            if image.is_empty() {
                return Err(invalid("missing docker image"));
            }
            let (name, version) = match image.rsplit_once(':') {
                Some((n, tag)) if !tag.contains('/') => (n, tag),
                _ => (image, ""),
            };
            return Ok(Self {
                name: name.to_string(),
                version: version.to_string(),
                source: ActionSource::Docker,
            });
        }

        if reference.starts_with("./") || reference.starts_with("../") {
            return Ok(Self {
                name: reference.to_string(),
                version: String::new(),
                source: ActionSource::Local,
            });
        }

        let (name, version) = match reference.split_once('@') {
            Some((name, version)) => {
                if version.is_empty() {
                    return Err(invalid("empty version after '@'"));
                }
                (name, version)
            }
            None => (reference, ""),
        };

        let mut parts = name.split('/');
        let owner = parts.next().unwrap_or_default();
        let repo = parts.next().unwrap_or_default();
        if owner.is_empty() || repo.is_empty() || parts.any(str::is_empty) {
            return Err(invalid("expected 'owner/repo[/path]'"));
        }

        Ok(Self {
            name: name.to_string(),
            version: version.to_string(),
            source: ActionSource::Repository,
        })
    }

    pub fn is_pinned(&self) -> bool {
        self.source == ActionSource::Local || !self.version.is_empty()
    }

    /// `owner/repo` without any sub-path
    pub fn repository(&self) -> &str {
        match self.source {
            ActionSource::Repository => {
                let mut idx = self.name.match_indices('/');
                match idx.nth(1) {
                    Some((i, _)) => &self.name[..i],
                    None => &self.name,
                }
            }
            _ => &self.name,
        }
    }
}

impl fmt::Display for ActionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.source, self.version.is_empty()) {
            (ActionSource::Docker, true) => write!(f, "docker://{}", self.name),
            (ActionSource::Docker, false) => write!(f, "docker://{}:{}", self.name, self.version),
            (_, true) => f.write_str(&self.name),
            (_, false) => write!(f, "{}@{}", self.name, self.version),
        }
    }
}

/// `uses:` step: action + `with:` inputs
#[derive(Debug, Clone)]
pub struct ActionInvocation {
    pub reference: ActionRef,
    pub inputs: OrderedMap<String>,
}

/// `run:` step
#[derive(Debug, Clone)]
pub struct CommandInvocation {
    pub run: String,
}

/// The two step kinds
#[derive(Debug, Clone)]
pub enum StepAction {
    Action(ActionInvocation),
    Command(CommandInvocation),
}

impl StepAction {
    /// Kind as string for tracing
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Action(_) => "action",
            StepAction::Command(_) => "command",
        }
    }
}
