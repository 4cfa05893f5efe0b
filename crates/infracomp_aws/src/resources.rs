//! Typed resource handles and their component constructors.
//!
//! Every handle wraps the [`ResourceState`] reported by the engine. For each
//! handle there is an eager constructor (`new_*`, fixed arguments) and a lazy
//! one (`lazy_*`, arguments and options computed on first use).

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;

use infracomp_core::{CompError, CompResult, Component, DeployContext, Meta};
use infracomp_engine::{Resource, ResourceOptions, ResourceState};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use crate::args::*;

/// Serialize resource arguments, filling in deployment-wide default tags
/// the resource does not set itself.
fn resource_inputs<A: Serialize>(args: &A, default_tags: &BTreeMap<String, String>) -> CompResult<Value> {
    let mut inputs = serde_json::to_value(args).map_err(|e| CompError::Serialization(e.to_string()))?;
    if let Some(Value::Object(tags)) = inputs.get_mut("tags") {
        for (key, value) in default_tags {
            tags.entry(key.clone())
                .or_insert_with(|| Value::String(value.clone()));
        }
    }
    Ok(inputs)
}

macro_rules! resource_handles {
    ($(
        $(#[$doc:meta])*
        $handle:ident($args:ident) => $token:literal, $new:ident, $lazy:ident;
    )*) => {
        $(
            $(#[$doc])*
            #[derive(Debug, Clone, Default, PartialEq)]
            pub struct $handle {
                state: ResourceState,
            }

            impl $handle {
                pub const TYPE_TOKEN: &'static str = $token;

                /// Register the resource with the engine.
                pub async fn create(
                    ctx: DeployContext,
                    name: String,
                    args: $args,
                    opts: ResourceOptions,
                ) -> CompResult<Arc<Self>> {
                    let inputs = resource_inputs(&args, ctx.default_tags())?;
                    let state = ctx.register_resource(Self::TYPE_TOKEN, &name, inputs, opts).await?;
                    debug!("Created {} '{}' ({})", Self::TYPE_TOKEN, name, state.id);
                    Ok(Arc::new(Self { state }))
                }
            }

            impl Resource for $handle {
                fn state(&self) -> &ResourceState {
                    &self.state
                }
            }

            pub fn $new(meta: impl Into<Meta>, args: $args, opts: ResourceOptions) -> Component<Arc<$handle>> {
                Component::from_constructor(meta, $handle::create, args, opts)
            }

            pub fn $lazy<F, Fut>(meta: impl Into<Meta>, args_fn: F) -> Component<Arc<$handle>>
            where
                F: Fn(DeployContext) -> Fut + Send + Sync + 'static,
                Fut: Future<Output = CompResult<($args, ResourceOptions)>> + Send + 'static,
            {
                Component::from_lazy_constructor(meta, $handle::create, args_fn)
            }
        )*
    };
}

resource_handles! {
    /// Regional AWS provider.
    Provider(ProviderArgs) => "pulumi:providers:aws", new_provider, lazy_provider;
    Vpc(VpcArgs) => "aws:ec2/vpc:Vpc", new_vpc, lazy_vpc;
    Subnet(SubnetArgs) => "aws:ec2/subnet:Subnet", new_subnet, lazy_subnet;
    InternetGateway(InternetGatewayArgs) => "aws:ec2/internetGateway:InternetGateway", new_internet_gateway, lazy_internet_gateway;
    InternetGatewayAttachment(InternetGatewayAttachmentArgs) => "aws:ec2/internetGatewayAttachment:InternetGatewayAttachment", new_internet_gateway_attachment, lazy_internet_gateway_attachment;
    RouteTable(RouteTableArgs) => "aws:ec2/routeTable:RouteTable", new_route_table, lazy_route_table;
    Route(RouteArgs) => "aws:ec2/route:Route", new_route, lazy_route;
    RouteTableAssociation(RouteTableAssociationArgs) => "aws:ec2/routeTableAssociation:RouteTableAssociation", new_route_table_association, lazy_route_table_association;
    SecurityGroup(SecurityGroupArgs) => "aws:ec2/securityGroup:SecurityGroup", new_security_group, lazy_security_group;
    SecurityGroupRule(SecurityGroupRuleArgs) => "aws:ec2/securityGroupRule:SecurityGroupRule", new_security_group_rule, lazy_security_group_rule;
    /// Application, network or gateway load balancer.
    LoadBalancer(LoadBalancerArgs) => "aws:lb/loadBalancer:LoadBalancer", new_load_balancer, lazy_load_balancer;
    TargetGroup(TargetGroupArgs) => "aws:lb/targetGroup:TargetGroup", new_target_group, lazy_target_group;
    Listener(ListenerArgs) => "aws:lb/listener:Listener", new_listener, lazy_listener;
    ListenerRule(ListenerRuleArgs) => "aws:lb/listenerRule:ListenerRule", new_listener_rule, lazy_listener_rule;
    /// ACM certificate.
    Certificate(CertificateArgs) => "aws:acm/certificate:Certificate", new_certificate, lazy_certificate;
    /// ECS cluster.
    Cluster(ClusterArgs) => "aws:ecs/cluster:Cluster", new_cluster, lazy_cluster;
    TaskDefinition(TaskDefinitionArgs) => "aws:ecs/taskDefinition:TaskDefinition", new_task_definition, lazy_task_definition;
    /// ECS service.
    Service(ServiceArgs) => "aws:ecs/service:Service", new_service, lazy_service;
}

impl LoadBalancer {
    /// Public DNS name reported by the engine.
    pub fn dns_name(&self) -> Option<&str> {
        self.state.output_str("dnsName")
    }
}

impl TargetGroup {
    /// Port the target group forwards to.
    pub fn port(&self) -> Option<u16> {
        self.state
            .output_i64("port")
            .and_then(|p| u16::try_from(p).ok())
    }
}
