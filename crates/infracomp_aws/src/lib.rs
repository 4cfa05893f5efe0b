//! # infracomp_aws
//!
//! AWS building blocks on top of [`infracomp_core`] components.
//!
//! # Features
//!
//! - **Resources**: typed handles (VPC, subnets, gateways, load balancers,
//!   ECS) with eager `new_*` and lazy `lazy_*` component constructors
//! - **Parameters**: YAML-loadable description of VPCs, partitions, load
//!   balancers, certificates and Fargate services
//! - **Infrastructure plans**: `plan_infra` turns a description into a
//!   dependency-ordered build plan; `deploy_infra` applies it
//! - **Basic network**: a one-component VPC with public and private subnets
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use infracomp_aws::{deploy_infra, InfraParameters};
//! use infracomp_core::{DeployContext, FailureMode};
//! use infracomp_engine::MockEngine;
//!
//! let params = InfraParameters::from_yaml_file("infra.yaml")?;
//! let ctx = DeployContext::new("shop", "dev", Arc::new(MockEngine::new("shop", "dev")));
//! let deployment = deploy_infra(&ctx, &params, FailureMode::Aggregate).await?;
//! println!("{} steps applied", deployment.report.applied_steps().len());
//! ```

pub mod args;
pub mod infra;
pub mod network;
pub mod params;
pub mod resources;

pub use infra::{
    deploy_infra, plan_infra, ClusterHandles, InfraDeployment, InfraHandles, InfraPlan, ListenerHandles,
    LoadBalancerHandles, PartitionHandles, ServiceHandles, VpcHandles, AVAILABILITY_ZONES_TOKEN,
};
pub use network::{basic_network, BasicNetwork, BasicNetworkParameters, BasicSubnetParameters, BasicVpcParameters};
pub use params::{
    AppProtocol, CertificateParameters, ContainerDefinition, ContainerEnvironmentVar, ContainerPortMapping,
    EcsClusterParameters, EcsServiceParameters, InfraParameters, LbType, ListenerParameters, ListenerRuleParameters,
    LoadBalancerParameters, NetworkPartitionParameters, Protocol, ProviderParameters, QueryStringMatch,
    RuleCondition, SubnetParameters, TargetGroupParameters, TargetType, ValidationMethod, VpcParameters,
};
