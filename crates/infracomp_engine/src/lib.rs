//! # infracomp_engine
//!
//! The seam between infracomp and the infrastructure engine that actually
//! materializes resources.
//!
//! # Features
//!
//! - **Engine trait**: `ResourceEngine` with resource registration and
//!   data-source invokes
//! - **Resource options**: provider, explicit dependencies, protection,
//!   replace-on-change directives
//! - **Mock engine**: in-memory engine for dry runs and tests, with scripted
//!   failures and duplicate-URN detection
//!
//! # Example
//!
//! ```rust,no_run
//! use infracomp_engine::{MockEngine, RegisterRequest, ResourceEngine};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let engine = MockEngine::new("my-project", "dev");
//!     let vpc = engine
//!         .register_resource(RegisterRequest::new(
//!             "aws:ec2/vpc:Vpc",
//!             "main",
//!             json!({ "cidrBlock": "10.0.0.0/16" }),
//!         ))
//!         .await?;
//!     println!("created {}", vpc.urn);
//!     Ok(())
//! }
//! ```

pub mod engine;
pub mod error;
pub mod mock;
pub mod resource;

pub use engine::{urn, RegisterRequest, ResourceEngine};
pub use error::{EngineError, EngineResult};
pub use mock::MockEngine;
pub use resource::{Resource, ResourceOptions, ResourceState};
