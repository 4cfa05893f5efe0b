//! Resource state and cross-cutting resource options.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// State of a resource materialized by an engine.
///
/// The default value is an *unmaterialized* handle with an empty URN. It is
/// what inactive resource components hand out.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Unique resource name, stable across runs
    pub urn: String,
    /// Provider-assigned identifier
    pub id: String,
    /// Engine type token (e.g. `aws:ec2/vpc:Vpc`)
    pub type_token: String,
    /// Logical resource name
    pub name: String,
    /// Inputs the resource was registered with
    pub inputs: Value,
    /// Outputs reported by the engine
    pub outputs: Value,
    /// Whether deletion protection was requested
    pub protect: bool,
    /// When the engine materialized the resource
    pub created_at: Option<DateTime<Utc>>,
}

impl ResourceState {
    /// Whether an engine actually produced this state.
    pub fn is_materialized(&self) -> bool {
        !self.urn.is_empty()
    }

    /// Look up a string output.
    pub fn output_str(&self, key: &str) -> Option<&str> {
        self.outputs.get(key).and_then(Value::as_str)
    }

    /// Look up an integer output.
    pub fn output_i64(&self, key: &str) -> Option<i64> {
        self.outputs.get(key).and_then(Value::as_i64)
    }
}

/// Anything backed by a [`ResourceState`].
pub trait Resource: Send + Sync {
    fn state(&self) -> &ResourceState;

    fn id(&self) -> &str {
        &self.state().id
    }

    fn urn(&self) -> &str {
        &self.state().urn
    }

    fn type_token(&self) -> &str {
        &self.state().type_token
    }
}

impl Resource for ResourceState {
    fn state(&self) -> &ResourceState {
        self
    }
}

impl<R: Resource + ?Sized> Resource for Arc<R> {
    fn state(&self) -> &ResourceState {
        (**self).state()
    }
}

/// Cross-cutting directives attached to a resource registration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceOptions {
    /// URN of the provider resource to use
    pub provider: Option<String>,
    /// URNs of resources that must exist first
    pub depends_on: Vec<String>,
    /// Prevent accidental deletion
    pub protect: bool,
    /// Properties whose change forces a replacement
    pub replace_on_changes: Vec<String>,
}

impl ResourceOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use an explicit provider. An unmaterialized provider leaves the
    /// engine's default in place.
    pub fn provider(mut self, provider: &impl Resource) -> Self {
        if provider.state().is_materialized() {
            self.provider = Some(provider.urn().to_string());
        }
        self
    }

    /// Add a dependency. Unmaterialized resources are ignored.
    pub fn depends_on(mut self, resource: &impl Resource) -> Self {
        if resource.state().is_materialized() {
            self.depends_on.push(resource.urn().to_string());
        }
        self
    }

    pub fn depends_on_all<'a, R, I>(mut self, resources: I) -> Self
    where
        R: Resource + 'a,
        I: IntoIterator<Item = &'a R>,
    {
        for resource in resources {
            self = self.depends_on(resource);
        }
        self
    }

    pub fn protect(mut self, protect: bool) -> Self {
        self.protect = protect;
        self
    }

    /// Replace the resource when any of the given properties change.
    /// `"*"` means any property.
    pub fn replace_on_changes(mut self, properties: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.replace_on_changes
            .extend(properties.into_iter().map(Into::into));
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn state(name: &str) -> ResourceState {
        ResourceState {
            urn: format!("urn:test::{}", name),
            id: format!("{}_id", name),
            name: name.to_string(),
            outputs: json!({ "dnsName": "lb.example.com", "port": 80 }),
            ..ResourceState::default()
        }
    }

    #[test]
    fn test_default_state_is_unmaterialized() {
        assert!(!ResourceState::default().is_materialized());
        assert!(state("vpc").is_materialized());
    }

    #[test]
    fn test_output_lookup() {
        let s = state("lb");
        assert_eq!(s.output_str("dnsName"), Some("lb.example.com"));
        assert_eq!(s.output_i64("port"), Some(80));
        assert_eq!(s.output_str("missing"), None);
    }

    #[test]
    fn test_options_builder() {
        let provider = state("provider");
        let vpc = Arc::new(state("vpc"));
        let opts = ResourceOptions::new()
            .provider(&provider)
            .depends_on(&vpc)
            .depends_on(&ResourceState::default())
            .protect(true)
            .replace_on_changes(["*"]);

        assert_eq!(opts.provider.as_deref(), Some("urn:test::provider"));
        assert_eq!(opts.depends_on, vec!["urn:test::vpc".to_string()]);
        assert!(opts.protect);
        assert_eq!(opts.replace_on_changes, vec!["*".to_string()]);

        let defaulted = ResourceOptions::new().provider(&ResourceState::default());
        assert!(defaulted.provider.is_none());
    }
}
