//! Known action manifests
//!
//! The interpreter treats actions as opaque, but a handful of well-known
//! ones declare inputs or environment they cannot run without. Checking
//! them up front turns a misconfiguration into a failed step with a clear
//! reason. Unknown actions have no requirements.

use std::collections::HashMap;

use crate::error::FlowError;
use crate::step_action::ActionRef;
use crate::workflow::OrderedMap;

/// Requirements of one action
#[derive(Debug, Clone, Default)]
pub struct ActionManifest {
    pub required_inputs: Vec<String>,
    pub required_env: Vec<String>,
}

impl ActionManifest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn input(mut self, name: &str) -> Self {
        self.required_inputs.push(name.to_string());
        self
    }

    pub fn env(mut self, name: &str) -> Self {
        self.required_env.push(name.to_string());
        self
    }
}

/// Action name (without version) -> manifest
#[derive(Debug, Clone, Default)]
pub struct ActionCatalog {
    manifests: HashMap<String, ActionManifest>,
}

impl ActionCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// Manifests for the actions the Python app workflows use
    pub fn builtin() -> Self {
        Self::empty()
            .register("actions/checkout", ActionManifest::new())
            .register("actions/setup-python", ActionManifest::new())
            .register("codecov/codecov-action", ActionManifest::new().input("token"))
            .register("github/codeql-action/init", ActionManifest::new())
            .register("github/codeql-action/autobuild", ActionManifest::new())
            .register("github/codeql-action/analyze", ActionManifest::new())
            .register(
                "slackapi/slack-github-action",
                ActionManifest::new().input("channel-id").env("SLACK_BOT_TOKEN"),
            )
            .register(
                "aws-actions/configure-aws-credentials",
                ActionManifest::new().input("aws-region"),
            )
    }

    pub fn register(mut self, name: &str, manifest: ActionManifest) -> Self {
        self.manifests.insert(name.to_string(), manifest);
        self
    }

    pub fn get(&self, action: &ActionRef) -> Option<&ActionManifest> {
        self.manifests.get(&action.name)
    }

    /// Check resolved inputs and env against the manifest.
    ///
    /// Empty values count as missing: an unset secret interpolates to "".
    pub fn check(
        &self,
        action: &ActionRef,
        inputs: &OrderedMap<String>,
        env: &OrderedMap<String>,
    ) -> Result<(), FlowError> {
        let Some(manifest) = self.get(action) else {
            return Ok(());
        };

        for input in &manifest.required_inputs {
            if inputs.get(input).map_or(true, |v| v.trim().is_empty()) {
                return Err(FlowError::MissingInput {
                    action: action.to_string(),
                    input: input.clone(),
                });
            }
        }

        for name in &manifest.required_env {
            if env.get(name).map_or(true, |v| v.trim().is_empty()) {
                return Err(FlowError::MissingEnv {
                    action: action.to_string(),
                    name: name.clone(),
                });
            }
        }

        Ok(())
    }
}
