//! Deployment context threaded through every component computation.

use std::collections::BTreeMap;
use std::sync::Arc;

use infracomp_engine::{RegisterRequest, ResourceEngine, ResourceOptions, ResourceState};
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info};
use uuid::Uuid;

use crate::config::DeployConfig;
use crate::error::CompResult;
use crate::registry::ComponentRegistry;

struct Inner {
    execution_id: Uuid,
    project: String,
    stack: String,
    default_tags: BTreeMap<String, String>,
    engine: Arc<dyn ResourceEngine>,
    registry: ComponentRegistry,
    outputs: RwLock<BTreeMap<String, Value>>,
}

/// Execution context for one deployment run.
///
/// Cheap to clone; clones share the engine, the component registry and the
/// exported outputs.
#[derive(Clone)]
pub struct DeployContext {
    inner: Arc<Inner>,
}

impl DeployContext {
    /// Create a context with a fresh component registry.
    pub fn new(
        project: impl Into<String>,
        stack: impl Into<String>,
        engine: Arc<dyn ResourceEngine>,
    ) -> Self {
        Self::build(project.into(), stack.into(), BTreeMap::new(), engine, ComponentRegistry::new())
    }

    /// Create a context from validated configuration.
    pub fn from_config(config: &DeployConfig, engine: Arc<dyn ResourceEngine>) -> CompResult<Self> {
        config.validate()?;
        Ok(Self::build(
            config.project.clone(),
            config.stack.clone(),
            config.default_tags.clone(),
            engine,
            ComponentRegistry::new(),
        ))
    }

    fn build(
        project: String,
        stack: String,
        default_tags: BTreeMap<String, String>,
        engine: Arc<dyn ResourceEngine>,
        registry: ComponentRegistry,
    ) -> Self {
        let execution_id = Uuid::new_v4();
        debug!("Created deploy context {} for {}/{}", execution_id, project, stack);
        Self {
            inner: Arc::new(Inner {
                execution_id,
                project,
                stack,
                default_tags,
                engine,
                registry,
                outputs: RwLock::new(BTreeMap::new()),
            }),
        }
    }

    /// Use an existing registry instead of a fresh one.
    ///
    /// Exports are not carried over.
    pub fn with_registry(self, registry: ComponentRegistry) -> Self {
        Self::build(
            self.inner.project.clone(),
            self.inner.stack.clone(),
            self.inner.default_tags.clone(),
            Arc::clone(&self.inner.engine),
            registry,
        )
    }

    /// Replace the deployment-wide default tags.
    pub fn with_default_tags(self, tags: BTreeMap<String, String>) -> Self {
        Self::build(
            self.inner.project.clone(),
            self.inner.stack.clone(),
            tags,
            Arc::clone(&self.inner.engine),
            self.inner.registry.clone(),
        )
    }

    pub fn execution_id(&self) -> Uuid {
        self.inner.execution_id
    }

    pub fn project(&self) -> &str {
        &self.inner.project
    }

    pub fn stack(&self) -> &str {
        &self.inner.stack
    }

    pub fn default_tags(&self) -> &BTreeMap<String, String> {
        &self.inner.default_tags
    }

    pub fn engine(&self) -> &Arc<dyn ResourceEngine> {
        &self.inner.engine
    }

    pub fn registry(&self) -> &ComponentRegistry {
        &self.inner.registry
    }

    /// Publish a stack output. The last write for a name wins.
    pub fn export(&self, name: impl Into<String>, value: impl Into<Value>) {
        let name = name.into();
        info!("Exporting output: {}", name);
        self.inner.outputs.write().insert(name, value.into());
    }

    /// Get an exported output.
    pub fn output(&self, name: &str) -> Option<Value> {
        self.inner.outputs.read().get(name).cloned()
    }

    /// All exported outputs.
    pub fn outputs(&self) -> BTreeMap<String, Value> {
        self.inner.outputs.read().clone()
    }

    /// Ask the engine to materialize a resource.
    pub async fn register_resource(
        &self,
        type_token: &str,
        name: &str,
        inputs: Value,
        options: ResourceOptions,
    ) -> CompResult<ResourceState> {
        debug!("Registering {} '{}'", type_token, name);
        let request = RegisterRequest::new(type_token, name, inputs).with_options(options);
        Ok(self.inner.engine.register_resource(request).await?)
    }

    /// Call an engine data source.
    pub async fn invoke(&self, token: &str, args: Value) -> CompResult<Value> {
        debug!("Invoking {}", token);
        Ok(self.inner.engine.invoke(token, args).await?)
    }
}

impl std::fmt::Debug for DeployContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeployContext")
            .field("execution_id", &self.inner.execution_id)
            .field("project", &self.inner.project)
            .field("stack", &self.inner.stack)
            .field("registry", &self.inner.registry)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompError;
    use infracomp_engine::{EngineError, MockEngine};
    use serde_json::json;

    fn context() -> (DeployContext, MockEngine) {
        let engine = MockEngine::new("shop", "dev");
        (DeployContext::new("shop", "dev", Arc::new(engine.clone())), engine)
    }

    #[test]
    fn test_exports_last_write_wins() {
        let (ctx, _) = context();
        ctx.export("vpc-id", "vpc_1");
        ctx.export("vpc-id", "vpc_2");
        ctx.export("count", 3);

        assert_eq!(ctx.output("vpc-id"), Some(json!("vpc_2")));
        assert_eq!(ctx.outputs().len(), 2);
        assert!(ctx.output("missing").is_none());
    }

    #[test]
    fn test_clones_share_state() {
        let (ctx, _) = context();
        let clone = ctx.clone();
        clone.export("a", 1);
        clone.registry().slot::<u8>("x").unwrap();

        assert_eq!(ctx.output("a"), Some(json!(1)));
        assert!(ctx.registry().contains("x"));
        assert_eq!(ctx.execution_id(), clone.execution_id());
    }

    #[test]
    fn test_from_config() {
        let config = DeployConfig::new("shop", "prod").with_default_tag("env", "prod");
        let ctx = DeployContext::from_config(&config, Arc::new(MockEngine::default())).unwrap();
        assert_eq!(ctx.stack(), "prod");
        assert_eq!(ctx.default_tags().get("env").map(String::as_str), Some("prod"));

        let bad = DeployConfig::new("", "prod");
        assert!(DeployContext::from_config(&bad, Arc::new(MockEngine::default())).is_err());
    }

    #[test]
    fn test_with_registry_isolates_runs() {
        let (ctx, _) = context();
        ctx.registry().slot::<u8>("x").unwrap();

        let fresh = ctx.with_registry(ComponentRegistry::new());
        assert!(!fresh.registry().contains("x"));
    }

    #[tokio::test]
    async fn test_register_resource_forwards_to_engine() {
        let (ctx, engine) = context();
        let state = ctx
            .register_resource("aws:ec2/vpc:Vpc", "main", json!({ "cidrBlock": "10.0.0.0/16" }), ResourceOptions::new())
            .await
            .unwrap();

        assert_eq!(state.id, "main_id");
        assert!(engine.has_resource("main"));

        let err = ctx
            .register_resource("aws:ec2/vpc:Vpc", "main", json!({}), ResourceOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CompError::Engine(EngineError::DuplicateResource(_))));
    }

    #[tokio::test]
    async fn test_invoke() {
        let engine = MockEngine::default()
            .with_invoke_response("aws:index/getAvailabilityZones", json!({ "names": ["a"] }));
        let ctx = DeployContext::new("p", "s", Arc::new(engine));

        let result = ctx.invoke("aws:index/getAvailabilityZones", json!({})).await.unwrap();
        assert_eq!(result["names"][0], "a");
    }
}
