//! Job matrix expansion
//!
//! Cells are enumerated in axis declaration order, then value declaration
//! order, first axis varying slowest. `exclude` then `include` are applied
//! the way GitHub applies them.

use std::fmt;

use serde::Serialize;
use serde_yaml::Value;

use crate::error::FlowError;
use crate::workflow::{OrderedMap, Scalar};

/// One matrix axis, e.g. `python-version: [3.8, 3.9, 3.10]`
#[derive(Debug, Clone, PartialEq)]
pub struct MatrixAxis {
    pub name: String,
    pub values: Vec<Scalar>,
}

/// `strategy.matrix`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatrixSpec {
    pub axes: Vec<MatrixAxis>,
    pub include: Vec<OrderedMap<String>>,
    pub exclude: Vec<OrderedMap<String>>,
}

/// Axis bindings for one job instance
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize)]
pub struct MatrixCell {
    bindings: Vec<(String, String)>,
}

impl MatrixCell {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn from_pairs<I, K, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            bindings: pairs.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }

    pub fn get(&self, axis: &str) -> Option<&str> {
        self.bindings
            .iter()
            .find(|(k, _)| k == axis)
            .map(|(_, v)| v.as_str())
    }

    pub fn bindings(&self) -> &[(String, String)] {
        &self.bindings
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    fn set(&mut self, key: &str, value: &str) {
        match self.bindings.iter_mut().find(|(k, _)| k == key) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.bindings.push((key.to_string(), value.to_string())),
        }
    }

    /// Every pair of `entry` is bound to the same value here
    fn contains_all(&self, entry: &OrderedMap<String>) -> bool {
        entry.iter().all(|(k, v)| self.get(k) == Some(v.as_str()))
    }
}

impl fmt::Display for MatrixCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .bindings
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

impl MatrixSpec {
    /// Build from the raw `strategy.matrix` mapping
    pub fn from_raw(job: &str, raw: OrderedMap<Value>) -> Result<Self, FlowError> {
        let invalid = |reason: String| FlowError::InvalidMatrix {
            job: job.to_string(),
            reason,
        };

        if let Some(dup) = raw.first_duplicate() {
            return Err(invalid(format!("axis '{}' declared twice", dup)));
        }

        let mut spec = MatrixSpec::default();
        for (key, value) in raw {
            match key.as_str() {
                "include" => spec.include = combinations(value).map_err(&invalid)?,
                "exclude" => spec.exclude = combinations(value).map_err(&invalid)?,
                _ => {
                    let Value::Sequence(items) = value else {
                        return Err(invalid(format!("axis '{}' must be a list", key)));
                    };
                    if items.is_empty() {
                        return Err(invalid(format!("axis '{}' has no values", key)));
                    }
                    let mut values: Vec<Scalar> = Vec::with_capacity(items.len());
                    for item in items {
                        let scalar = Scalar::try_from(item)
                            .map_err(|e| invalid(format!("axis '{}': {}", key, e)))?;
                        if values.iter().any(|v| v.text == scalar.text) {
                            return Err(invalid(format!(
                                "axis '{}' repeats value '{}'",
                                key, scalar.text
                            )));
                        }
                        values.push(scalar);
                    }
                    spec.axes.push(MatrixAxis { name: key, values });
                }
            }
        }

        if spec.axes.is_empty() && spec.include.is_empty() {
            return Err(invalid("matrix defines no axes".to_string()));
        }
        Ok(spec)
    }

    pub fn axis(&self, name: &str) -> Option<&MatrixAxis> {
        self.axes.iter().find(|a| a.name == name)
    }

    /// Size of the plain cross product (before include/exclude)
    /// Whether some cell may bind `key`, as a declared axis or through `include`
    pub fn binds(&self, key: &str) -> bool {
        self.axis(key).is_some() || self.include.iter().any(|entry| entry.contains_key(key))
    }

    pub fn cross_product_len(&self) -> usize {
        if self.axes.is_empty() {
            return 0;
        }
        self.axes.iter().map(|a| a.values.len()).product()
    }

    /// Deterministic list of cells
    pub fn expand(&self) -> Vec<MatrixCell> {
        let mut cells = if self.axes.is_empty() {
            Vec::new()
        } else {
            let mut cells = vec![MatrixCell::empty()];
            for axis in &self.axes {
                let mut next = Vec::with_capacity(cells.len() * axis.values.len());
                for cell in &cells {
                    for value in &axis.values {
                        let mut extended = cell.clone();
                        extended.set(&axis.name, &value.text);
                        next.push(extended);
                    }
                }
                cells = next;
            }
            cells
        };

        cells.retain(|cell| !self.exclude.iter().any(|entry| cell.contains_all(entry)));

        let original = cells.len();
        for entry in &self.include {
            let mut matched = false;
            for cell in cells.iter_mut().take(original) {
                // An include may add keys but never overwrite an axis value
                let compatible = entry.iter().all(|(k, v)| {
                    self.axis(k).is_none() || cell.get(k) == Some(v.as_str())
                });
                if compatible {
                    for (k, v) in entry.iter() {
                        cell.set(k, v);
                    }
                    matched = true;
                }
            }
            if !matched {
                let mut cell = MatrixCell::empty();
                for (k, v) in entry.iter() {
                    cell.set(k, v);
                }
                cells.push(cell);
            }
        }

        cells
    }
}

/// Parse an include/exclude list of maps
fn combinations(value: Value) -> Result<Vec<OrderedMap<String>>, String> {
    let Value::Sequence(items) = value else {
        return Err("include/exclude must be a list of maps".to_string());
    };
    items
        .into_iter()
        .map(|item| {
            let Value::Mapping(map) = item else {
                return Err("include/exclude entries must be maps".to_string());
            };
            let mut entry = OrderedMap::new();
            for (k, v) in map {
                let key = k
                    .as_str()
                    .ok_or_else(|| "include/exclude keys must be strings".to_string())?
                    .to_string();
                entry.insert(key, Scalar::try_from(v)?.text);
            }
            Ok(entry)
        })
        .collect()
}
