//! In-memory resource engine.
//!
//! Materializes resources without any cloud calls: IDs are derived from the
//! resource name, outputs echo the inputs, and every registration is captured
//! for later inspection. Registering the same URN twice is rejected, which
//! makes accidental double construction visible in tests and dry runs.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::debug;

use crate::engine::{urn, RegisterRequest, ResourceEngine};
use crate::error::{EngineError, EngineResult};
use crate::resource::ResourceState;

/// Scripted failure for a resource name.
#[derive(Debug, Clone)]
struct ScriptedFailure {
    message: String,
    /// Remaining failing attempts; `None` fails forever.
    remaining: Option<usize>,
}

/// In-memory engine for dry runs and tests.
#[derive(Clone)]
pub struct MockEngine {
    project: String,
    stack: String,
    /// Materialized resources by URN.
    resources: Arc<RwLock<BTreeMap<String, ResourceState>>>,
    /// Every registration attempt, successful or not.
    captured: Arc<RwLock<Vec<RegisterRequest>>>,
    /// Every invoke call as (token, args).
    invokes: Arc<RwLock<Vec<(String, Value)>>>,
    failures: Arc<RwLock<HashMap<String, ScriptedFailure>>>,
    invoke_responses: Arc<RwLock<HashMap<String, Value>>>,
    /// Extra outputs merged into every resource of a type token.
    type_outputs: Arc<RwLock<HashMap<String, Value>>>,
    latency: Arc<RwLock<Option<Duration>>>,
    attempts: Arc<AtomicUsize>,
}

impl Default for MockEngine {
    fn default() -> Self {
        Self::new("project", "stack")
    }
}

impl MockEngine {
    /// Create an engine for the given project and stack.
    pub fn new(project: impl Into<String>, stack: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            stack: stack.into(),
            resources: Arc::new(RwLock::new(BTreeMap::new())),
            captured: Arc::new(RwLock::new(Vec::new())),
            invokes: Arc::new(RwLock::new(Vec::new())),
            failures: Arc::new(RwLock::new(HashMap::new())),
            invoke_responses: Arc::new(RwLock::new(HashMap::new())),
            type_outputs: Arc::new(RwLock::new(HashMap::new())),
            latency: Arc::new(RwLock::new(None)),
            attempts: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Always reject registrations of the named resource.
    pub fn fail_on(self, name: impl Into<String>, message: impl Into<String>) -> Self {
        self.failures.write().insert(
            name.into(),
            ScriptedFailure {
                message: message.into(),
                remaining: None,
            },
        );
        self
    }

    /// Reject the first `times` registrations of the named resource.
    pub fn fail_times(self, name: impl Into<String>, times: usize, message: impl Into<String>) -> Self {
        self.failures.write().insert(
            name.into(),
            ScriptedFailure {
                message: message.into(),
                remaining: Some(times),
            },
        );
        self
    }

    /// Answer invokes of `token` with `response`.
    pub fn with_invoke_response(self, token: impl Into<String>, response: Value) -> Self {
        self.invoke_responses.write().insert(token.into(), response);
        self
    }

    /// Merge `outputs` into the outputs of every resource of `type_token`.
    pub fn with_type_outputs(self, type_token: impl Into<String>, outputs: Value) -> Self {
        self.type_outputs.write().insert(type_token.into(), outputs);
        self
    }

    /// Delay every registration.
    pub fn with_latency(self, latency: Duration) -> Self {
        *self.latency.write() = Some(latency);
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn stack(&self) -> &str {
        &self.stack
    }

    /// All materialized resources, ordered by URN.
    pub fn resources(&self) -> Vec<ResourceState> {
        self.resources.read().values().cloned().collect()
    }

    /// Find a materialized resource by logical name.
    pub fn resource(&self, name: &str) -> Option<ResourceState> {
        self.resources
            .read()
            .values()
            .find(|r| r.name == name)
            .cloned()
    }

    pub fn has_resource(&self, name: &str) -> bool {
        self.resource(name).is_some()
    }

    /// Materialized resources of one type.
    pub fn resources_of_type(&self, type_token: &str) -> Vec<ResourceState> {
        self.resources
            .read()
            .values()
            .filter(|r| r.type_token == type_token)
            .cloned()
            .collect()
    }

    /// Every registration attempt, in call order.
    pub fn registrations(&self) -> Vec<RegisterRequest> {
        self.captured.read().clone()
    }

    /// Number of registration attempts for a logical name.
    pub fn registration_count(&self, name: &str) -> usize {
        self.captured
            .read()
            .iter()
            .filter(|r| r.name == name)
            .count()
    }

    /// Total registration attempts.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Every invoke call as (token, args).
    pub fn invocations(&self) -> Vec<(String, Value)> {
        self.invokes.read().clone()
    }

    /// Forget all resources and captured calls. Scripted behavior is kept.
    pub fn reset(&self) {
        self.resources.write().clear();
        self.captured.write().clear();
        self.invokes.write().clear();
        self.attempts.store(0, Ordering::SeqCst);
    }

    fn check_failure(&self, request: &RegisterRequest) -> EngineResult<()> {
        let mut failures = self.failures.write();
        let Some(failure) = failures.get_mut(&request.name) else {
            return Ok(());
        };
        match failure.remaining {
            Some(0) => Ok(()),
            Some(ref mut n) => {
                *n -= 1;
                Err(self.rejected(request, &failure.message))
            }
            None => Err(self.rejected(request, &failure.message)),
        }
    }

    fn rejected(&self, request: &RegisterRequest, message: &str) -> EngineError {
        EngineError::ResourceRejected {
            type_token: request.type_token.clone(),
            name: request.name.clone(),
            message: message.to_string(),
        }
    }

    fn outputs_for(&self, request: &RegisterRequest, id: &str) -> Value {
        let mut outputs = match &request.inputs {
            Value::Object(map) => map.clone(),
            Value::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("value".to_string(), other.clone());
                map
            }
        };
        outputs.insert("id".to_string(), Value::String(id.to_string()));
        outputs.insert(
            "arn".to_string(),
            Value::String(format!("arn:mock:{}:{}", request.type_token, request.name)),
        );
        if let Some(Value::Object(extra)) = self.type_outputs.read().get(&request.type_token) {
            for (k, v) in extra {
                outputs.insert(k.clone(), v.clone());
            }
        }
        Value::Object(outputs)
    }
}

#[async_trait]
impl ResourceEngine for MockEngine {
    async fn register_resource(&self, request: RegisterRequest) -> EngineResult<ResourceState> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        self.captured.write().push(request.clone());

        let latency = *self.latency.read();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        self.check_failure(&request)?;

        if let Some(provider) = &request.options.provider {
            if !self.resources.read().contains_key(provider) {
                return Err(EngineError::UnknownProvider(provider.clone()));
            }
        }

        let urn = urn(&self.project, &self.stack, &request.type_token, &request.name);
        let id = format!("{}_id", request.name);
        let state = ResourceState {
            urn: urn.clone(),
            id: id.clone(),
            type_token: request.type_token.clone(),
            name: request.name.clone(),
            outputs: self.outputs_for(&request, &id),
            inputs: request.inputs,
            protect: request.options.protect,
            created_at: Some(Utc::now()),
        };

        let mut resources = self.resources.write();
        if resources.contains_key(&urn) {
            return Err(EngineError::DuplicateResource(urn));
        }
        debug!("Registered {} '{}'", state.type_token, state.name);
        resources.insert(urn, state.clone());
        Ok(state)
    }

    async fn invoke(&self, token: &str, args: Value) -> EngineResult<Value> {
        self.invokes.write().push((token.to_string(), args.clone()));
        let response = self.invoke_responses.read().get(token).cloned();
        Ok(response.unwrap_or(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{Resource, ResourceOptions};
    use serde_json::json;

    fn request(name: &str) -> RegisterRequest {
        RegisterRequest::new("aws:ec2/vpc:Vpc", name, json!({ "cidrBlock": "10.0.0.0/16" }))
    }

    #[tokio::test]
    async fn test_register_resource() {
        let engine = MockEngine::new("proj", "dev");
        let state = engine.register_resource(request("main")).await.unwrap();

        assert_eq!(state.id, "main_id");
        assert_eq!(state.urn, "urn:infracomp:dev::proj::aws:ec2/vpc:Vpc::main");
        assert_eq!(state.output_str("cidrBlock"), Some("10.0.0.0/16"));
        assert_eq!(state.output_str("id"), Some("main_id"));
        assert!(engine.has_resource("main"));
        assert_eq!(engine.registration_count("main"), 1);
    }

    #[tokio::test]
    async fn test_duplicate_urn_rejected() {
        let engine = MockEngine::default();
        engine.register_resource(request("main")).await.unwrap();
        let err = engine.register_resource(request("main")).await.unwrap_err();

        assert!(matches!(err, EngineError::DuplicateResource(_)));
        assert_eq!(engine.resources().len(), 1);
        assert_eq!(engine.attempts(), 2);
    }

    #[tokio::test]
    async fn test_fail_times_then_succeed() {
        let engine = MockEngine::default().fail_times("flaky", 2, "throttled");

        assert!(engine.register_resource(request("flaky")).await.is_err());
        assert!(engine.register_resource(request("flaky")).await.is_err());
        assert!(engine.register_resource(request("flaky")).await.is_ok());
        assert_eq!(engine.registration_count("flaky"), 3);
    }

    #[tokio::test]
    async fn test_fail_on_always_fails() {
        let engine = MockEngine::default().fail_on("broken", "quota exceeded");
        for _ in 0..3 {
            let err = engine.register_resource(request("broken")).await.unwrap_err();
            assert!(err.to_string().contains("quota exceeded"));
        }
        assert!(!engine.has_resource("broken"));
    }

    #[tokio::test]
    async fn test_unknown_provider_rejected() {
        let engine = MockEngine::default();
        let ghost = ResourceState {
            urn: "urn:ghost".to_string(),
            ..ResourceState::default()
        };
        let req = request("main").with_options(ResourceOptions::new().provider(&ghost));
        let err = engine.register_resource(req).await.unwrap_err();
        assert!(matches!(err, EngineError::UnknownProvider(_)));

        let provider = engine
            .register_resource(RegisterRequest::new("pulumi:providers:aws", "aws", json!({})))
            .await
            .unwrap();
        let req = request("main").with_options(ResourceOptions::new().provider(&provider));
        let vpc = engine.register_resource(req).await.unwrap();
        assert_eq!(vpc.id(), "main_id");
    }

    #[tokio::test]
    async fn test_type_outputs_and_invoke() {
        let engine = MockEngine::default()
            .with_type_outputs("aws:lb/loadBalancer:LoadBalancer", json!({ "dnsName": "web.elb" }))
            .with_invoke_response("aws:index/getAvailabilityZones", json!({ "names": ["a", "b"] }));

        let lb = engine
            .register_resource(RegisterRequest::new(
                "aws:lb/loadBalancer:LoadBalancer",
                "web",
                json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(lb.output_str("dnsName"), Some("web.elb"));

        let azs = engine
            .invoke("aws:index/getAvailabilityZones", json!({}))
            .await
            .unwrap();
        assert_eq!(azs["names"][1], "b");

        let echoed = engine.invoke("aws:index/other", json!({ "x": 1 })).await.unwrap();
        assert_eq!(echoed, json!({ "x": 1 }));
        assert_eq!(engine.invocations().len(), 2);
    }

    #[tokio::test]
    async fn test_reset_keeps_scripts() {
        let engine = MockEngine::default().fail_on("broken", "nope");
        engine.register_resource(request("main")).await.unwrap();
        engine.reset();

        assert!(engine.resources().is_empty());
        assert_eq!(engine.attempts(), 0);
        assert!(engine.register_resource(request("main")).await.is_ok());
        assert!(engine.register_resource(request("broken")).await.is_err());
    }
}
