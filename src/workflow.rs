//! Workflow parsing structures
//!
//! YAML is read into `*Raw` structs first (serde), then checked by the
//! validator and converted into the typed model the interpreter runs.

use std::fmt;
use std::marker::PhantomData;
use std::time::Duration;

use indexmap::IndexMap;
use serde::de::{Deserializer, MapAccess, Visitor};
use serde::Deserialize;

use crate::error::FlowError;
use crate::guard::Guard;
use crate::matrix::{MatrixCell, MatrixSpec};
use crate::step_action::{ActionInvocation, ActionRef, CommandInvocation, StepAction};
use crate::template::TEMPLATE_RESOLVER;
use crate::trigger::Triggers;
use crate::validator;

// ============================================================================
// ORDERED MAP
// ============================================================================

/// Mapping that keeps YAML declaration order and remembers duplicate keys.
///
/// Job order, matrix axis order and step input order are all observable,
/// and duplicate job names must be reported instead of silently overwritten.
/// A repeated key keeps its first position and its last value; the repeat
/// itself is recorded for [`OrderedMap::first_duplicate`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderedMap<V> {
    entries: IndexMap<String, V>,
    duplicates: Vec<String>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self {
            entries: IndexMap::new(),
            duplicates: Vec::new(),
        }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the original position on replace
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        self.entries.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.get(key)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// First key that appeared more than once in the source document
    pub fn first_duplicate(&self) -> Option<&str> {
        self.duplicates.first().map(String::as_str)
    }

    pub fn map_values<U>(self, mut f: impl FnMut(V) -> U) -> OrderedMap<U> {
        OrderedMap {
            entries: self.entries.into_iter().map(|(k, v)| (k, f(v))).collect(),
            duplicates: self.duplicates,
        }
    }
}

impl<V> IntoIterator for OrderedMap<V> {
    type Item = (String, V);
    type IntoIter = indexmap::map::IntoIter<String, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}

impl<V> FromIterator<(String, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (String, V)>>(iter: I) -> Self {
        Self {
            entries: iter.into_iter().collect(),
            duplicates: Vec::new(),
        }
    }
}

impl<'de, V: Deserialize<'de>> Deserialize<'de> for OrderedMap<V> {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct OrderedMapVisitor<V>(PhantomData<V>);

        impl<'de, V: Deserialize<'de>> Visitor<'de> for OrderedMapVisitor<V> {
            type Value = OrderedMap<V>;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a mapping")
            }

            // `with:` followed by nothing is an empty map
            fn visit_unit<E>(self) -> Result<Self::Value, E> {
                Ok(OrderedMap::new())
            }

            fn visit_map<A>(self, mut access: A) -> Result<Self::Value, A::Error>
            where
                A: MapAccess<'de>,
            {
                let mut map = OrderedMap {
                    entries: IndexMap::with_capacity(access.size_hint().unwrap_or(0)),
                    duplicates: Vec::new(),
                };
                while let Some((key, value)) = access.next_entry::<String, V>()? {
                    if map.entries.contains_key(&key) {
                        map.duplicates.push(key.clone());
                    }
                    map.entries.insert(key, value);
                }
                Ok(map)
            }
        }

        deserializer.deserialize_any(OrderedMapVisitor(PhantomData))
    }
}

// ============================================================================
// SCALARS
// ============================================================================

/// What a YAML scalar was before it became text
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    String,
    Integer,
    Float,
    Bool,
    Null,
}

/// A YAML scalar kept as text (inputs, env values, matrix values)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scalar {
    pub text: String,
    pub kind: ScalarKind,
}

impl Scalar {
    pub fn string(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            kind: ScalarKind::String,
        }
    }

    fn from_yaml(value: serde_yaml::Value) -> Result<Self, String> {
        use serde_yaml::Value;
        let scalar = match value {
            Value::String(s) => Scalar::string(s),
            Value::Bool(b) => Scalar {
                text: b.to_string(),
                kind: ScalarKind::Bool,
            },
            Value::Number(n) => Scalar {
                text: n.to_string(),
                kind: if n.is_f64() {
                    ScalarKind::Float
                } else {
                    ScalarKind::Integer
                },
            },
            Value::Null => Scalar {
                text: String::new(),
                kind: ScalarKind::Null,
            },
            Value::Tagged(tagged) => return Scalar::from_yaml(tagged.value),
            Value::Sequence(_) | Value::Mapping(_) => {
                return Err("expected a scalar, found a sequence or mapping".to_string())
            }
        };
        Ok(scalar)
    }
}

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

impl<'de> Deserialize<'de> for Scalar {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = serde_yaml::Value::deserialize(deserializer)?;
        Scalar::from_yaml(value).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<serde_yaml::Value> for Scalar {
    type Error = String;

    fn try_from(value: serde_yaml::Value) -> Result<Self, Self::Error> {
        Scalar::from_yaml(value)
    }
}

// ============================================================================
// RAW (serde) MODEL
// ============================================================================

/// Workflow parsed from YAML (raw)
#[derive(Debug, Deserialize)]
pub struct WorkflowRaw {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "on", default)]
    pub on: Option<serde_yaml::Value>,
    #[serde(default)]
    pub env: OrderedMap<Scalar>,
    #[serde(default)]
    pub jobs: OrderedMap<JobRaw>,
}

#[derive(Debug, Deserialize)]
pub struct JobRaw {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(rename = "runs-on", default)]
    pub runs_on: Option<RunsOn>,
    #[serde(default)]
    pub strategy: Option<StrategyRaw>,
    #[serde(default)]
    pub env: OrderedMap<Scalar>,
    #[serde(rename = "if", default)]
    pub condition: Option<Scalar>,
    #[serde(default)]
    pub steps: Vec<StepRaw>,
}

/// `runs-on` is a label or a list of labels
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RunsOn {
    Label(String),
    Labels(Vec<String>),
}

impl RunsOn {
    pub fn label(&self) -> String {
        match self {
            RunsOn::Label(l) => l.clone(),
            RunsOn::Labels(ls) => ls.join(","),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StrategyRaw {
    #[serde(default)]
    pub matrix: Option<OrderedMap<serde_yaml::Value>>,
}

#[derive(Debug, Deserialize)]
pub struct StepRaw {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub uses: Option<String>,
    #[serde(default)]
    pub run: Option<String>,
    #[serde(default)]
    pub with: OrderedMap<Scalar>,
    #[serde(default)]
    pub env: OrderedMap<Scalar>,
    #[serde(rename = "if", default)]
    pub condition: Option<Scalar>,
    #[serde(rename = "continue-on-error", default)]
    pub continue_on_error: bool,
    #[serde(rename = "timeout-minutes", default)]
    pub timeout_minutes: Option<u64>,
}

// ============================================================================
// TYPED MODEL
// ============================================================================

/// A validated workflow document
#[derive(Debug, Clone)]
pub struct Workflow {
    pub name: Option<String>,
    pub triggers: Triggers,
    pub env: OrderedMap<String>,
    pub jobs: Vec<JobSpec>,
}

#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Key under `jobs:`
    pub key: String,
    pub name: Option<String>,
    pub runs_on: String,
    pub matrix: Option<MatrixSpec>,
    /// Workflow env overlaid with job env
    pub env: OrderedMap<String>,
    pub guard: Guard,
    pub steps: Vec<StepSpec>,
}

#[derive(Debug, Clone)]
pub struct StepSpec {
    pub name: Option<String>,
    pub id: Option<String>,
    pub action: StepAction,
    pub guard: Guard,
    pub env: OrderedMap<String>,
    pub continue_on_error: bool,
    pub timeout: Option<Duration>,
}

impl StepSpec {
    /// Display label: explicit name, else derived from the payload
    pub fn label(&self) -> String {
        if let Some(name) = &self.name {
            return name.clone();
        }
        match &self.action {
            StepAction::Action(a) => format!("Run {}", a.reference),
            StepAction::Command(c) => {
                format!("Run {}", c.run.lines().next().unwrap_or_default().trim())
            }
        }
    }
}

impl JobSpec {
    /// One cell per job instance; no matrix yields a single empty cell
    pub fn cells(&self) -> Vec<MatrixCell> {
        match &self.matrix {
            Some(matrix) => matrix.expand(),
            None => vec![MatrixCell::empty()],
        }
    }

    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.key)
    }
}

impl Workflow {
    /// Parse, validate and convert a YAML workflow document.
    ///
    /// Any error returned here is a configuration error: nothing has run.
    pub fn from_yaml(yaml: &str) -> Result<Self, FlowError> {
        let raw: WorkflowRaw = serde_yaml::from_str(yaml)?;
        Self::from_raw(raw)
    }

    pub fn from_raw(raw: WorkflowRaw) -> Result<Self, FlowError> {
        validator::validate(&raw)?;

        let triggers = Triggers::from_yaml(raw.on.as_ref())?;
        let env = raw.env.map_values(|s| s.text);

        let mut jobs = Vec::with_capacity(raw.jobs.len());
        for (key, job) in raw.jobs {
            jobs.push(convert_job(key, job, &env)?);
        }

        Ok(Workflow {
            name: raw.name,
            triggers,
            env,
            jobs,
        })
    }

    pub fn job(&self, key: &str) -> Option<&JobSpec> {
        self.jobs.iter().find(|j| j.key == key)
    }

    pub fn step_count(&self) -> usize {
        self.jobs.iter().map(|j| j.steps.len()).sum()
    }
}

fn convert_job(key: String, raw: JobRaw, workflow_env: &OrderedMap<String>) -> Result<JobSpec, FlowError> {
    let matrix = match raw.strategy.and_then(|s| s.matrix) {
        Some(m) => Some(MatrixSpec::from_raw(&key, m)?),
        None => None,
    };

    let mut env = workflow_env.clone();
    for (k, v) in raw.env {
        env.insert(k, v.text);
    }

    check_templates(env.iter().map(|(_, v)| v.as_str()))?;
    let guard = Guard::parse(raw.condition.as_ref().map(|c| c.text.as_str()))?;

    let mut steps = Vec::with_capacity(raw.steps.len());
    for (i, step) in raw.steps.into_iter().enumerate() {
        steps.push(convert_step(&key, i + 1, step)?);
    }

    Ok(JobSpec {
        key,
        name: raw.name,
        runs_on: raw.runs_on.map(|r| r.label()).unwrap_or_default(),
        matrix,
        env,
        guard,
        steps,
    })
}

fn convert_step(job: &str, index: usize, raw: StepRaw) -> Result<StepSpec, FlowError> {
    let action = match (raw.uses, raw.run) {
        (Some(uses), None) => StepAction::Action(ActionInvocation {
            reference: ActionRef::parse(&uses)?,
            inputs: raw.with.map_values(|s| s.text),
        }),
        (None, Some(run)) => StepAction::Command(CommandInvocation { run }),
        _ => {
            return Err(FlowError::AmbiguousStep {
                job: job.to_string(),
                index,
            })
        }
    };

    let timeout = match raw.timeout_minutes {
        Some(minutes) => Some(timeout_from_minutes(minutes).ok_or_else(|| {
            FlowError::InvalidTimeout {
                job: job.to_string(),
                index,
                minutes,
            }
        })?),
        None => None,
    };

    let env = raw.env.map_values(|s| s.text);
    match &action {
        StepAction::Action(a) => check_templates(a.inputs.iter().map(|(_, v)| v.as_str()))?,
        StepAction::Command(c) => check_templates([c.run.as_str()])?,
    }
    check_templates(env.iter().map(|(_, v)| v.as_str()))?;

    Ok(StepSpec {
        name: raw.name,
        id: raw.id,
        action,
        guard: Guard::parse(raw.condition.as_ref().map(|c| c.text.as_str()))?,
        env,
        continue_on_error: raw.continue_on_error,
        timeout,
    })
}

/// `timeout-minutes` as a duration; zero and overflowing values are rejected
pub(crate) fn timeout_from_minutes(minutes: u64) -> Option<Duration> {
    if minutes == 0 {
        return None;
    }
    minutes.checked_mul(60).map(Duration::from_secs)
}

/// Malformed `${{ }}` fails the load instead of the step
fn check_templates<'a>(values: impl IntoIterator<Item = &'a str>) -> Result<(), FlowError> {
    for value in values {
        TEMPLATE_RESOLVER.tokenize(value)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TUTORIAL: &str = r#"
name: Python application
on: [push, pull_request]
jobs:
  test:
    runs-on: ubuntu-latest
    strategy:
      matrix:
        python-version: ["3.8", "3.9", "3.10"]
    steps:
      - uses: actions/checkout@v2
      - name: Set up Python
        uses: actions/setup-python@v2
        with:
          python-version: ${{ matrix.python-version }}
      - name: Install dependencies
        run: |
          python -m pip install --upgrade pip
          pip install -r requirements.txt
      - name: Test with pytest
        run: pytest --cov=app
"#;

    #[test]
    fn parses_tutorial_workflow() {
        let wf = Workflow::from_yaml(TUTORIAL).unwrap();
        assert_eq!(wf.name.as_deref(), Some("Python application"));
        assert_eq!(wf.jobs.len(), 1);

        let job = &wf.jobs[0];
        assert_eq!(job.key, "test");
        assert_eq!(job.runs_on, "ubuntu-latest");
        assert_eq!(job.steps.len(), 4);
        assert!(matches!(job.steps[0].action, StepAction::Action(_)));
        assert!(matches!(job.steps[2].action, StepAction::Command(_)));
        assert_eq!(job.matrix.as_ref().unwrap().axes.len(), 1);
    }

    #[test]
    fn step_labels() {
        let wf = Workflow::from_yaml(TUTORIAL).unwrap();
        let steps = &wf.jobs[0].steps;
        assert_eq!(steps[0].label(), "Run actions/checkout@v2");
        assert_eq!(steps[1].label(), "Set up Python");
    }

    #[test]
    fn ordered_map_keeps_order_and_records_duplicates() {
        let map: OrderedMap<Scalar> =
            serde_yaml::from_str("b: 1\na: 2\nb: 3\nc: 4\na: 5\n").unwrap();
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["b", "a", "c"]);
        assert_eq!(map.get("b").map(|s| s.text.as_str()), Some("3"));
        assert_eq!(map.first_duplicate(), Some("b"));
    }

    #[test]
    fn ordered_map_insert_replaces_in_place_without_duplicate() {
        let mut map: OrderedMap<String> =
            [("A".to_string(), "1".to_string()), ("B".to_string(), "2".to_string())]
                .into_iter()
                .collect();
        map.insert("A", "3".to_string());
        assert_eq!(map.keys().collect::<Vec<_>>(), vec!["A", "B"]);
        assert_eq!(map.get("A").map(String::as_str), Some("3"));
        assert!(map.first_duplicate().is_none());
    }

    #[test]
    fn empty_with_block_is_empty_map() {
        let step: StepRaw = serde_yaml::from_str("uses: actions/checkout@v4\nwith:\n").unwrap();
        assert!(step.with.is_empty());
    }

    #[test]
    fn scalar_kinds() {
        let map: OrderedMap<Scalar> =
            serde_yaml::from_str("a: 3.10\nb: '3.10'\nc: 3\nd: true\n").unwrap();
        assert_eq!(map.get("a").unwrap().kind, ScalarKind::Float);
        assert_eq!(map.get("a").unwrap().text, "3.1");
        assert_eq!(map.get("b").unwrap().text, "3.10");
        assert_eq!(map.get("c").unwrap().kind, ScalarKind::Integer);
        assert_eq!(map.get("d").unwrap().text, "true");
    }

    #[test]
    fn job_env_overlays_workflow_env() {
        let yaml = r#"
on: push
env:
  A: workflow
  B: workflow
jobs:
  build:
    runs-on: ubuntu-latest
    env:
      B: job
    steps:
      - run: echo $A $B
"#;
        let wf = Workflow::from_yaml(yaml).unwrap();
        let env = &wf.jobs[0].env;
        assert_eq!(env.get("A").map(String::as_str), Some("workflow"));
        assert_eq!(env.get("B").map(String::as_str), Some("job"));
    }

    #[test]
    fn timeout_minutes_becomes_duration() {
        let yaml = r#"
on: push
jobs:
  build:
    runs-on: ubuntu-latest
    steps:
      - run: make
        timeout-minutes: 2
"#;
        let wf = Workflow::from_yaml(yaml).unwrap();
        assert_eq!(wf.jobs[0].steps[0].timeout, Some(Duration::from_secs(120)));
    }

    #[test]
    fn malformed_template_fails_load() {
        let yaml = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: echo ${{ matrix.v\n";
        let err = Workflow::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, FlowError::UnterminatedTemplate { .. }));
    }

    #[test]
    fn cells_of_plain_and_matrix_jobs() {
        let wf = Workflow::from_yaml(TUTORIAL).unwrap();
        let cells = wf.jobs[0].cells();
        assert_eq!(cells.len(), 3);
        assert_eq!(cells[0].get("python-version"), Some("3.8"));

        let plain = Workflow::from_yaml(
            "on: push\njobs:\n  lint:\n    runs-on: x\n    steps:\n      - run: flake8\n",
        )
        .unwrap();
        assert_eq!(plain.jobs[0].cells(), vec![MatrixCell::empty()]);
    }

    #[test]
    fn huge_timeout_is_a_configuration_error() {
        let yaml = "on: push\njobs:\n  a:\n    runs-on: x\n    steps:\n      - run: make\n        timeout-minutes: 18446744073709551615\n";
        let err = Workflow::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, FlowError::InvalidTimeout { .. }));
    }
}
