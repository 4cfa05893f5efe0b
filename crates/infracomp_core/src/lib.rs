//! # infracomp_core
//!
//! Lazy, memoized infrastructure components and the build plans that wire
//! them together.
//!
//! A component is a named deferred construction step. It runs at most once
//! per name per deployment run; every later consumer receives the cached
//! value. Failures cache nothing, so a later access retries.
//!
//! # Architecture
//!
//! - **Component**: the lazy memoized handle (`Component<T>`)
//! - **Registry**: per-run map from component name to cached value
//! - **Context**: the deployment run (engine, registry, exported outputs)
//! - **Plan**: named steps with dependencies, evaluated in topological order
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use infracomp_core::{Component, DeployContext, BuildPlan, FailureMode};
//! use infracomp_engine::MockEngine;
//!
//! let ctx = DeployContext::new("shop", "dev", Arc::new(MockEngine::default()));
//!
//! let vpc = Component::new("vpc", |ctx| async move {
//!     ctx.register_resource("aws:ec2/vpc:Vpc", "vpc", json!({}), Default::default()).await
//! });
//!
//! let mut plan = BuildPlan::new("network");
//! plan.add(vpc.clone())?;
//! let report = plan.apply(&ctx, FailureMode::Aggregate).await?;
//! ```

pub mod component;
pub mod config;
pub mod context;
pub mod error;
pub mod logging;
pub mod meta;
pub mod pattern;
pub mod plan;
pub mod registry;

// Re-export main types for convenience
pub use component::{apply_all, export_urn, Applier, Component, ComponentResponse};
pub use config::DeployConfig;
pub use context::DeployContext;
pub use error::{join_results, CompError, CompResult};
pub use logging::init_tracing;
pub use meta::Meta;
pub use plan::{BuildPlan, ExecutionState, FailureMode, PlanReport, PlanStep, StepRecord, StepState};
pub use registry::{ComponentRegistry, Slot};
