//! Triggers (`on:`) and triggering events
//!
//! Accepts the three shapes GitHub accepts: a single event name, a list of
//! event names, or a map of event name to filter block. Only the map form
//! carries `branches` / `branches-ignore` filters.

use glob::{MatchOptions, Pattern};
use serde::Serialize;
use serde_yaml::Value;

use crate::error::FlowError;

/// `/` is only crossed by `**`
const BRANCH_MATCH: MatchOptions = MatchOptions {
    case_sensitive: true,
    require_literal_separator: true,
    require_literal_leading_dot: false,
};

/// An event that may start the workflow
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerEvent {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

impl TriggerEvent {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            branch: None,
        }
    }

    pub fn push(branch: impl Into<String>) -> Self {
        Self::new("push").on_branch(branch)
    }

    pub fn pull_request(branch: impl Into<String>) -> Self {
        Self::new("pull_request").on_branch(branch)
    }

    pub fn on_branch(mut self, branch: impl Into<String>) -> Self {
        self.branch = Some(branch.into());
        self
    }

    /// `github.ref` for this event
    pub fn git_ref(&self) -> Option<String> {
        self.branch.as_ref().map(|b| format!("refs/heads/{}", b))
    }
}

/// One entry of the trigger set
#[derive(Debug, Clone)]
pub struct TriggerSpec {
    pub event: String,
    pub branches: Vec<Pattern>,
    pub branches_ignore: Vec<Pattern>,
}

impl TriggerSpec {
    fn bare(event: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            branches: Vec::new(),
            branches_ignore: Vec::new(),
        }
    }

    fn accepts_branch(&self, branch: Option<&str>) -> bool {
        let Some(branch) = branch else {
            return true;
        };
        if !self.branches.is_empty()
            && !self.branches.iter().any(|p| p.matches_with(branch, BRANCH_MATCH))
        {
            return false;
        }
        !self
            .branches_ignore
            .iter()
            .any(|p| p.matches_with(branch, BRANCH_MATCH))
    }
}

/// The document's trigger set
#[derive(Debug, Clone, Default)]
pub struct Triggers {
    specs: Vec<TriggerSpec>,
}

impl Triggers {
    pub fn from_events<I, S>(events: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            specs: events.into_iter().map(TriggerSpec::bare).collect(),
        }
    }

    pub fn from_yaml(value: Option<&Value>) -> Result<Self, FlowError> {
        let specs = match value {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::String(event)) => vec![TriggerSpec::bare(event.as_str())],
            Some(Value::Sequence(events)) => events
                .iter()
                .map(|e| match e {
                    Value::String(s) => Ok(TriggerSpec::bare(s.as_str())),
                    other => Err(FlowError::InvalidTrigger {
                        reason: format!("event names must be strings, found {:?}", other),
                    }),
                })
                .collect::<Result<_, _>>()?,
            Some(Value::Mapping(map)) => {
                let mut specs = Vec::with_capacity(map.len());
                for (event, filter) in map {
                    let Some(event) = event.as_str() else {
                        return Err(FlowError::InvalidTrigger {
                            reason: format!("event names must be strings, found {:?}", event),
                        });
                    };
                    specs.push(TriggerSpec {
                        event: event.to_string(),
                        branches: patterns(filter, "branches")?,
                        branches_ignore: patterns(filter, "branches-ignore")?,
                    });
                }
                specs
            }
            Some(other) => {
                return Err(FlowError::InvalidTrigger {
                    reason: format!("expected an event name, list or map, found {:?}", other),
                })
            }
        };
        Ok(Self { specs })
    }

    /// Whether `event` fires the workflow
    pub fn matches(&self, event: &TriggerEvent) -> bool {
        self.specs
            .iter()
            .filter(|s| s.event == event.name)
            .any(|s| s.accepts_branch(event.branch.as_deref()))
    }

    pub fn event_names(&self) -> Vec<&str> {
        self.specs.iter().map(|s| s.event.as_str()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }
}

fn patterns(filter: &Value, key: &str) -> Result<Vec<Pattern>, FlowError> {
    let Some(list) = filter.get(key) else {
        return Ok(Vec::new());
    };
    let raw: Vec<String> = match list {
        Value::String(s) => vec![s.clone()],
        Value::Sequence(items) => items
            .iter()
            .filter_map(|i| i.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    raw.into_iter()
        .map(|p| {
            Pattern::new(&p).map_err(|e| FlowError::InvalidBranchFilter {
                pattern: p.clone(),
                reason: e.msg.to_string(),
            })
        })
        .collect()
}
