//! Deployment configuration.

use std::collections::BTreeMap;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{CompError, CompResult};
use crate::plan::FailureMode;

/// Environment variable overriding the project name.
pub const PROJECT_ENV: &str = "INFRACOMP_PROJECT";
/// Environment variable overriding the stack name.
pub const STACK_ENV: &str = "INFRACOMP_STACK";

/// Settings for one deployment run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployConfig {
    /// Project name, part of every resource URN
    pub project: String,
    /// Stack (environment) name
    pub stack: String,
    /// Tags applied to every resource unless overridden per component
    #[serde(default)]
    pub default_tags: BTreeMap<String, String>,
    /// How plan failures are handled
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            project: "infracomp".to_string(),
            stack: "dev".to_string(),
            default_tags: BTreeMap::new(),
            failure_mode: FailureMode::default(),
        }
    }
}

impl DeployConfig {
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            ..Self::default()
        }
    }

    pub fn with_default_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.default_tags.insert(key.into(), value.into());
        self
    }

    pub fn with_failure_mode(mut self, mode: FailureMode) -> Self {
        self.failure_mode = mode;
        self
    }

    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> CompResult<Self> {
        let config: DeployConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a YAML file.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> CompResult<Self> {
        let path = path.as_ref();
        debug!("Loading deploy config from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }

    /// Apply `INFRACOMP_PROJECT` / `INFRACOMP_STACK` overrides.
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|key| std::env::var(key).ok())
    }

    fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(project) = lookup(PROJECT_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("Project overridden from environment: {}", project);
            self.project = project;
        }
        if let Some(stack) = lookup(STACK_ENV).filter(|v| !v.trim().is_empty()) {
            debug!("Stack overridden from environment: {}", stack);
            self.stack = stack;
        }
        self
    }

    pub fn validate(&self) -> CompResult<()> {
        if self.project.trim().is_empty() {
            return Err(CompError::InvalidConfig("project must not be empty".to_string()));
        }
        if self.stack.trim().is_empty() {
            return Err(CompError::InvalidConfig("stack must not be empty".to_string()));
        }
        Ok(())
    }
}
