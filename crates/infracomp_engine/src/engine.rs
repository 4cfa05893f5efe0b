//! Resource engine trait and request types.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::EngineResult;
use crate::resource::{ResourceOptions, ResourceState};

/// A request to materialize one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterRequest {
    /// Engine type token
    pub type_token: String,
    /// Logical resource name
    pub name: String,
    /// Resource arguments, opaque to the composition layer
    pub inputs: Value,
    /// Cross-cutting directives
    pub options: ResourceOptions,
}

impl RegisterRequest {
    pub fn new(type_token: impl Into<String>, name: impl Into<String>, inputs: Value) -> Self {
        Self {
            type_token: type_token.into(),
            name: name.into(),
            inputs,
            options: ResourceOptions::default(),
        }
    }

    pub fn with_options(mut self, options: ResourceOptions) -> Self {
        self.options = options;
        self
    }
}

/// Build the URN of a resource.
pub fn urn(project: &str, stack: &str, type_token: &str, name: &str) -> String {
    format!("urn:infracomp:{}::{}::{}::{}", stack, project, type_token, name)
}

/// The infrastructure engine that materializes resources.
///
/// Implementations may block on network calls for the duration of a
/// registration; callers must tolerate that.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ResourceEngine: Send + Sync {
    /// Register (create or adopt) a resource.
    async fn register_resource(&self, request: RegisterRequest) -> EngineResult<ResourceState>;

    /// Call a data-source function (e.g. availability zone lookup).
    async fn invoke(&self, token: &str, args: Value) -> EngineResult<Value>;
}
