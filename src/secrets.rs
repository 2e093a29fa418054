//! Injected secret store
//!
//! Secrets are passed to the interpreter explicitly; nothing reads a global.
//! The process environment is consulted only when the store was built with
//! [`Secrets::with_env_fallback`].

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::FlowError;

const MASK: &str = "***";

#[derive(Debug, Clone, Default)]
pub struct Secrets {
    values: BTreeMap<String, String>,
    env_fallback: bool,
    /// Values handed out from the environment, masked like explicit ones
    revealed: Arc<Mutex<BTreeSet<String>>>,
}

impl Secrets {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert
    pub fn with(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(name, value);
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.values.insert(name.into(), value.into());
    }

    /// Look up process environment variables for names not set explicitly
    pub fn with_env_fallback(mut self) -> Self {
        self.env_fallback = true;
        self
    }

    /// Parse `NAME=value` pairs (as given on the command line)
    pub fn from_pairs<I, S>(pairs: I) -> Result<Self, FlowError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut secrets = Self::new();
        for pair in pairs {
            let pair = pair.as_ref();
            let (name, value) = pair.split_once('=').ok_or_else(|| {
                FlowError::Execution(format!("secret '{}' must be NAME=value", pair))
            })?;
            secrets.insert(name.trim(), value);
        }
        Ok(secrets)
    }

    /// Load a dotenv-format file
    pub fn load_file(&mut self, path: &Path) -> Result<(), FlowError> {
        let iter = dotenvy::from_path_iter(path)
            .map_err(|e| FlowError::Execution(format!("cannot read secrets file: {}", e)))?;
        for item in iter {
            let (name, value) =
                item.map_err(|e| FlowError::Execution(format!("invalid secrets file: {}", e)))?;
            self.values.insert(name, value);
        }
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<String> {
        if let Some(value) = self.values.get(name) {
            return Some(value.clone());
        }
        if !self.env_fallback {
            return None;
        }
        let value = std::env::var(name).ok()?;
        if !value.is_empty() {
            self.revealed.lock().insert(value.clone());
        }
        Some(value)
    }

    pub fn require(&self, name: &str) -> Result<String, FlowError> {
        self.get(name).ok_or_else(|| FlowError::MissingSecret {
            name: name.to_string(),
        })
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Replace every secret value handed out so far in `text` with `***`
    pub fn mask(&self, text: &str) -> String {
        let mut known: Vec<String> = self
            .values
            .values()
            .filter(|v| !v.is_empty())
            .cloned()
            .collect();
        known.extend(self.revealed.lock().iter().cloned());
        // longest first so a secret containing another is hidden whole
        known.sort_by(|a, b| b.len().cmp(&a.len()));

        let mut masked = text.to_string();
        for value in &known {
            masked = masked.replace(value.as_str(), MASK);
        }
        masked
    }
}
