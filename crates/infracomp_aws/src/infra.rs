//! Composition of an infrastructure description into a build plan.
//!
//! [`plan_infra`] walks an [`InfraParameters`] tree and creates one lazy
//! component per resource. Each component becomes a plan step whose
//! dependencies mirror the resources it reads, so the plan evaluates the
//! whole tree in dependency order. Target group and certificate lookups are
//! resolved up front: every missing key is reported before anything is
//! constructed.

use std::collections::BTreeMap;
use std::sync::Arc;

use infracomp_core::{
    export_urn, BuildPlan, CompError, CompResult, Component, DeployContext, FailureMode, Meta, PlanReport,
};
use infracomp_engine::{Resource, ResourceOptions};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::args::*;
use crate::params::*;
use crate::resources::*;

/// Data source listing the availability zones of the provider's region.
pub const AVAILABILITY_ZONES_TOKEN: &str = "aws:index/getAvailabilityZones";

const TASK_FAMILY: &str = "PULUMI-AUTO";
const FARGATE: &str = "FARGATE";

async fn value<T>(ctx: &DeployContext, component: &Component<T>) -> CompResult<T>
where
    T: Clone + Send + Sync + 'static,
{
    Ok(component.get(ctx).await?.component)
}

async fn values<T>(ctx: &DeployContext, components: &[Component<T>]) -> CompResult<Vec<T>>
where
    T: Clone + Send + Sync + 'static,
{
    let mut resolved = Vec::with_capacity(components.len());
    for component in components {
        resolved.push(value(ctx, component).await?);
    }
    Ok(resolved)
}

fn ids<R: Resource>(resources: &[R]) -> Vec<String> {
    resources.iter().map(|r| r.id().to_string()).collect()
}

fn names<T>(components: &[Component<T>]) -> impl Iterator<Item = &str>
where
    T: Clone + Send + Sync + 'static,
{
    components.iter().map(|c| c.meta().name.as_str())
}

/// Handles of every component created for an infrastructure description.
#[derive(Debug, Clone, Default)]
pub struct InfraHandles {
    pub vpcs: BTreeMap<String, VpcHandles>,
}

impl InfraHandles {
    pub fn vpc(&self, name: &str) -> Option<&VpcHandles> {
        self.vpcs.get(name)
    }
}

#[derive(Debug, Clone)]
pub struct VpcHandles {
    pub provider: Component<Arc<Provider>>,
    pub vpc: Component<Arc<Vpc>>,
    pub internet_gateway: Component<Arc<InternetGateway>>,
    pub gateway_attachment: Component<Arc<InternetGatewayAttachment>>,
    pub route_table: Component<Arc<RouteTable>>,
    pub default_route: Component<Arc<Route>>,
    pub availability_zones: Component<Vec<String>>,
    /// Exports the VPC URN as `"{vpc}-id"`
    pub export: Component<()>,
    pub certificates: BTreeMap<String, Component<Arc<Certificate>>>,
    pub partitions: BTreeMap<String, PartitionHandles>,
}

#[derive(Debug, Clone, Default)]
pub struct PartitionHandles {
    pub subnets: BTreeMap<String, Component<Arc<Subnet>>>,
    pub route_associations: BTreeMap<String, Component<Arc<RouteTableAssociation>>>,
    pub target_groups: BTreeMap<String, Component<Arc<TargetGroup>>>,
    pub load_balancers: BTreeMap<String, LoadBalancerHandles>,
    pub clusters: BTreeMap<String, ClusterHandles>,
}

#[derive(Debug, Clone)]
pub struct LoadBalancerHandles {
    pub security_group: Component<Arc<SecurityGroup>>,
    pub load_balancer: Component<Arc<LoadBalancer>>,
    /// Exports the DNS name as `"{lb}-dns"`
    pub export: Component<()>,
    pub listeners: BTreeMap<String, ListenerHandles>,
}

#[derive(Debug, Clone)]
pub struct ListenerHandles {
    pub listener: Component<Arc<Listener>>,
    pub ingress_rule: Component<Arc<SecurityGroupRule>>,
    pub rules: BTreeMap<String, Component<Arc<ListenerRule>>>,
}

#[derive(Debug, Clone)]
pub struct ClusterHandles {
    pub cluster: Component<Arc<Cluster>>,
    pub services: BTreeMap<String, ServiceHandles>,
}

#[derive(Debug, Clone)]
pub struct ServiceHandles {
    pub security_group: Component<Arc<SecurityGroup>>,
    pub task_definition: Component<Arc<TaskDefinition>>,
    /// Ingress rules keyed by target group lookup name
    pub ingress_rules: BTreeMap<String, Component<Arc<SecurityGroupRule>>>,
    pub service: Component<Arc<Service>>,
}

/// A plan ready to be applied, with handles to all of its components.
#[derive(Debug)]
pub struct InfraPlan {
    pub plan: BuildPlan,
    pub handles: InfraHandles,
}

/// Outcome of [`deploy_infra`].
#[derive(Debug)]
pub struct InfraDeployment {
    pub handles: InfraHandles,
    pub report: PlanReport,
}

/// Components every resource of a VPC may depend on.
#[derive(Clone)]
struct VpcScope {
    provider: Component<Arc<Provider>>,
    vpc: Component<Arc<Vpc>>,
    route_table: Component<Arc<RouteTable>>,
    availability_zones: Component<Vec<String>>,
}

/// Components shared by the resources of one load balancer.
#[derive(Clone)]
struct LoadBalancerScope {
    provider: Component<Arc<Provider>>,
    security_group: Component<Arc<SecurityGroup>>,
    load_balancer: Component<Arc<LoadBalancer>>,
}

struct Planner {
    plan: BuildPlan,
    errors: Vec<CompError>,
}

impl Planner {
    fn new(name: &str) -> Self {
        Self {
            plan: BuildPlan::new(name),
            errors: Vec::new(),
        }
    }

    fn step<'a, T>(&mut self, component: &Component<T>, deps: impl IntoIterator<Item = &'a str>) -> CompResult<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.plan.add_step(component.clone(), deps)?;
        Ok(())
    }

    fn root<T>(&mut self, component: &Component<T>) -> CompResult<()>
    where
        T: Clone + Send + Sync + 'static,
    {
        self.plan.add(component.clone())?;
        Ok(())
    }

    /// Add an inactive placeholder for a disabled leaf.
    fn inactive<T>(&mut self, meta: &Meta) -> CompResult<Component<T>>
    where
        T: Clone + Default + Send + Sync + 'static,
    {
        debug!("Skipping inactive element {}", meta.name);
        let component = Component::inactive(meta.clone());
        self.root(&component)?;
        Ok(component)
    }

    fn missing(&mut self, kind: &str, key: &str) {
        warn!("{} lookup name '{}' not found", kind, key);
        self.errors.push(CompError::lookup(kind, key));
    }

    fn vpc(&mut self, params: &VpcParameters) -> CompResult<VpcHandles> {
        let provider = new_provider(
            params.provider.meta.clone(),
            ProviderArgs {
                region: params.provider.region.clone(),
            },
            ResourceOptions::new(),
        );
        self.root(&provider)?;

        let vpc = {
            let provider = provider.clone();
            let args = VpcArgs {
                cidr_block: params.cidr_block.clone(),
                enable_dns_support: true,
                tags: params.meta.tags.clone(),
            };
            lazy_vpc(params.meta.clone(), move |ctx| {
                let (provider, args) = (provider.clone(), args.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    Ok((args, ResourceOptions::new().provider(&provider)))
                }
            })
        };
        self.step(&vpc, [provider.name()])?;

        let export = {
            let vpc = vpc.clone();
            Component::new(format!("{}-export", vpc.name()), move |ctx| {
                let vpc = vpc.clone();
                async move {
                    let response = vpc.get(&ctx).await?;
                    export_urn(&ctx, &response);
                    Ok(())
                }
            })
        };
        self.step(&export, [vpc.name()])?;

        let internet_gateway = {
            let (provider, vpc) = (provider.clone(), vpc.clone());
            let meta = params.meta.child("igw");
            let tags = meta.tags.clone();
            lazy_internet_gateway(meta, move |ctx| {
                let (provider, vpc, tags) = (provider.clone(), vpc.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let vpc = value(&ctx, &vpc).await?;
                    Ok((
                        InternetGatewayArgs { tags },
                        ResourceOptions::new().provider(&provider).depends_on(&vpc),
                    ))
                }
            })
        };
        self.step(&internet_gateway, [provider.name(), vpc.name()])?;

        let gateway_attachment = {
            let (provider, vpc, igw) = (provider.clone(), vpc.clone(), internet_gateway.clone());
            lazy_internet_gateway_attachment(params.meta.child("igw-attach"), move |ctx| {
                let (provider, vpc, igw) = (provider.clone(), vpc.clone(), igw.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let vpc = value(&ctx, &vpc).await?;
                    let igw = value(&ctx, &igw).await?;
                    let args = InternetGatewayAttachmentArgs {
                        vpc_id: vpc.id().to_string(),
                        internet_gateway_id: igw.id().to_string(),
                    };
                    Ok((args, ResourceOptions::new().provider(&provider).depends_on(&vpc).depends_on(&igw)))
                }
            })
        };
        self.step(&gateway_attachment, [provider.name(), vpc.name(), internet_gateway.name()])?;

        let route_table = {
            let (provider, vpc, attachment) = (provider.clone(), vpc.clone(), gateway_attachment.clone());
            let meta = params.meta.child("igw-routetable");
            let tags = meta.tags.clone();
            lazy_route_table(meta, move |ctx| {
                let (provider, vpc, attachment, tags) = (provider.clone(), vpc.clone(), attachment.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let vpc = value(&ctx, &vpc).await?;
                    let attachment = value(&ctx, &attachment).await?;
                    let args = RouteTableArgs {
                        vpc_id: vpc.id().to_string(),
                        tags,
                    };
                    Ok((args, ResourceOptions::new().provider(&provider).depends_on(&attachment)))
                }
            })
        };
        self.step(&route_table, [provider.name(), vpc.name(), gateway_attachment.name()])?;

        let default_route = {
            let (provider, route_table, igw) = (provider.clone(), route_table.clone(), internet_gateway.clone());
            lazy_route(params.meta.child("igw-default-route"), move |ctx| {
                let (provider, route_table, igw) = (provider.clone(), route_table.clone(), igw.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let route_table = value(&ctx, &route_table).await?;
                    let igw = value(&ctx, &igw).await?;
                    let args = RouteArgs {
                        route_table_id: route_table.id().to_string(),
                        destination_cidr_block: ANY_IPV4.to_string(),
                        gateway_id: igw.id().to_string(),
                    };
                    Ok((args, ResourceOptions::new().provider(&provider).depends_on(&route_table)))
                }
            })
        };
        self.step(&default_route, [provider.name(), route_table.name(), internet_gateway.name()])?;

        let availability_zones = availability_zones(format!("{}-azs", params.meta.name), provider.clone());
        self.step(&availability_zones, [provider.name()])?;

        let mut certificates = BTreeMap::new();
        let mut certificate_lookup = BTreeMap::new();
        for cert in &params.certificates {
            let component = if cert.meta.active {
                let component = certificate(cert, provider.clone());
                self.step(&component, [provider.name()])?;
                certificate_lookup.insert(cert.meta.name.clone(), component.clone());
                component
            } else {
                self.inactive(&cert.meta)?
            };
            certificates.insert(cert.meta.name.clone(), component);
        }

        let scope = VpcScope {
            provider: provider.clone(),
            vpc: vpc.clone(),
            route_table: route_table.clone(),
            availability_zones: availability_zones.clone(),
        };
        let mut partitions = BTreeMap::new();
        for partition in &params.partitions {
            if !partition.meta.active {
                debug!("Skipping inactive partition {}", partition.meta.name);
                continue;
            }
            let handles = self.partition(&scope, &certificate_lookup, partition)?;
            partitions.insert(partition.meta.name.clone(), handles);
        }

        Ok(VpcHandles {
            provider,
            vpc,
            internet_gateway,
            gateway_attachment,
            route_table,
            default_route,
            availability_zones,
            export,
            certificates,
            partitions,
        })
    }

    fn partition(
        &mut self,
        scope: &VpcScope,
        certificates: &BTreeMap<String, Component<Arc<Certificate>>>,
        params: &NetworkPartitionParameters,
    ) -> CompResult<PartitionHandles> {
        let mut handles = PartitionHandles::default();

        let mut subnets = Vec::new();
        for (index, subnet_params) in params.subnets.iter().enumerate() {
            if !subnet_params.meta.active {
                let component = self.inactive(&subnet_params.meta)?;
                handles.subnets.insert(subnet_params.meta.name.clone(), component);
                continue;
            }
            let subnet = self.subnet(scope, subnet_params, index, params.is_public)?;
            if params.is_public {
                let association = self.route_association(scope, &subnet)?;
                handles
                    .route_associations
                    .insert(association.name().to_string(), association);
            }
            handles.subnets.insert(subnet_params.meta.name.clone(), subnet.clone());
            subnets.push(subnet);
        }

        let mut target_groups = BTreeMap::new();
        for tg in &params.target_groups {
            let component = if tg.meta.active {
                let component = self.target_group(scope, tg)?;
                target_groups.insert(tg.lookup_key().to_string(), component.clone());
                component
            } else {
                self.inactive(&tg.meta)?
            };
            handles.target_groups.insert(tg.meta.name.clone(), component);
        }

        for lb in &params.load_balancers {
            if !lb.meta.active {
                debug!("Skipping inactive load balancer {}", lb.meta.name);
                continue;
            }
            let lb_handles = self.load_balancer(scope, &subnets, &target_groups, certificates, lb)?;
            handles.load_balancers.insert(lb.meta.name.clone(), lb_handles);
        }

        for cluster in &params.ecs_clusters {
            if !cluster.meta.active {
                debug!("Skipping inactive cluster {}", cluster.meta.name);
                continue;
            }
            let cluster_handles = self.cluster(scope, &subnets, &target_groups, cluster)?;
            handles.clusters.insert(cluster.meta.name.clone(), cluster_handles);
        }

        Ok(handles)
    }

    fn subnet(
        &mut self,
        scope: &VpcScope,
        params: &SubnetParameters,
        index: usize,
        public: bool,
    ) -> CompResult<Component<Arc<Subnet>>> {
        let subnet = {
            let scope = scope.clone();
            let cidr_block = params.cidr_block.clone();
            let tags = params.meta.tags.clone();
            lazy_subnet(params.meta.clone(), move |ctx| {
                let (scope, cidr_block, tags) = (scope.clone(), cidr_block.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &scope.provider).await?;
                    let vpc = value(&ctx, &scope.vpc).await?;
                    let zones = value(&ctx, &scope.availability_zones).await?;
                    let availability_zone = zones
                        .get(index % zones.len().max(1))
                        .cloned()
                        .ok_or_else(|| CompError::construction("no availability zones available"))?;

                    let mut opts = ResourceOptions::new().provider(&provider).depends_on(&vpc);
                    if public {
                        opts = opts.depends_on(&value(&ctx, &scope.route_table).await?);
                    }
                    let args = SubnetArgs {
                        vpc_id: vpc.id().to_string(),
                        cidr_block,
                        availability_zone,
                        map_public_ip_on_launch: public,
                        tags,
                    };
                    Ok((args, opts))
                }
            })
        };

        let mut deps = vec![scope.provider.name(), scope.vpc.name(), scope.availability_zones.name()];
        if public {
            deps.push(scope.route_table.name());
        }
        self.step(&subnet, deps)?;
        Ok(subnet)
    }

    fn route_association(
        &mut self,
        scope: &VpcScope,
        subnet: &Component<Arc<Subnet>>,
    ) -> CompResult<Component<Arc<RouteTableAssociation>>> {
        let association = {
            let (scope, subnet) = (scope.clone(), subnet.clone());
            lazy_route_table_association(subnet.meta().child("route-association"), move |ctx| {
                let (scope, subnet) = (scope.clone(), subnet.clone());
                async move {
                    let provider = value(&ctx, &scope.provider).await?;
                    let route_table = value(&ctx, &scope.route_table).await?;
                    let subnet = value(&ctx, &subnet).await?;
                    let args = RouteTableAssociationArgs {
                        route_table_id: route_table.id().to_string(),
                        subnet_id: subnet.id().to_string(),
                    };
                    let opts = ResourceOptions::new()
                        .provider(&provider)
                        .depends_on(&route_table)
                        .depends_on(&subnet);
                    Ok((args, opts))
                }
            })
        };
        self.step(&association, [scope.provider.name(), scope.route_table.name(), subnet.name()])?;
        Ok(association)
    }

    fn target_group(&mut self, scope: &VpcScope, params: &TargetGroupParameters) -> CompResult<Component<Arc<TargetGroup>>> {
        let target_group = {
            let scope = scope.clone();
            let (port, protocol, target_type) = (params.port, params.protocol, params.target_type);
            let tags = params.meta.tags.clone();
            lazy_target_group(params.meta.clone(), move |ctx| {
                let (scope, tags) = (scope.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &scope.provider).await?;
                    let vpc = value(&ctx, &scope.vpc).await?;
                    let args = TargetGroupArgs {
                        port,
                        protocol: protocol.as_str().to_string(),
                        target_type: target_type.as_str().to_string(),
                        vpc_id: vpc.id().to_string(),
                        tags,
                    };
                    Ok((args, ResourceOptions::new().provider(&provider).depends_on(&vpc)))
                }
            })
        };
        self.step(&target_group, [scope.provider.name(), scope.vpc.name()])?;
        Ok(target_group)
    }

    fn security_group(&mut self, scope: &VpcScope, meta: Meta) -> CompResult<Component<Arc<SecurityGroup>>> {
        let security_group = {
            let scope = scope.clone();
            let tags = meta.tags.clone();
            lazy_security_group(meta, move |ctx| {
                let (scope, tags) = (scope.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &scope.provider).await?;
                    let vpc = value(&ctx, &scope.vpc).await?;
                    let args = SecurityGroupArgs {
                        vpc_id: vpc.id().to_string(),
                        egress: vec![SecurityGroupEgress::allow_all()],
                        tags,
                    };
                    Ok((args, ResourceOptions::new().provider(&provider).depends_on(&vpc)))
                }
            })
        };
        self.step(&security_group, [scope.provider.name(), scope.vpc.name()])?;
        Ok(security_group)
    }

    fn load_balancer(
        &mut self,
        scope: &VpcScope,
        subnets: &[Component<Arc<Subnet>>],
        target_groups: &BTreeMap<String, Component<Arc<TargetGroup>>>,
        certificates: &BTreeMap<String, Component<Arc<Certificate>>>,
        params: &LoadBalancerParameters,
    ) -> CompResult<LoadBalancerHandles> {
        let security_group = self.security_group(scope, params.meta.child("sg"))?;

        let load_balancer = {
            let (provider, security_group, subnets) = (scope.provider.clone(), security_group.clone(), subnets.to_vec());
            let lb_type = params.lb_type;
            let tags = params.meta.tags.clone();
            lazy_load_balancer(params.meta.clone(), move |ctx| {
                let (provider, security_group, subnets, tags) =
                    (provider.clone(), security_group.clone(), subnets.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let security_group = value(&ctx, &security_group).await?;
                    let subnets = values(&ctx, &subnets).await?;
                    let args = LoadBalancerArgs {
                        load_balancer_type: lb_type.as_str().to_string(),
                        security_groups: vec![security_group.id().to_string()],
                        subnets: ids(&subnets),
                        tags,
                    };
                    let opts = ResourceOptions::new()
                        .provider(&provider)
                        .depends_on(&security_group)
                        .depends_on_all(&subnets);
                    Ok((args, opts))
                }
            })
        };
        let mut deps = vec![scope.provider.name(), security_group.name()];
        deps.extend(names(subnets));
        self.step(&load_balancer, deps)?;

        let export = {
            let load_balancer = load_balancer.clone();
            Component::new(format!("{}-export", load_balancer.name()), move |ctx| {
                let load_balancer = load_balancer.clone();
                async move {
                    let response = load_balancer.get(&ctx).await?;
                    let dns_name = response.component.dns_name().map(str::to_string);
                    ctx.export(
                        format!("{}-dns", response.name()),
                        dns_name.map(Value::String).unwrap_or(Value::Null),
                    );
                    Ok(())
                }
            })
        };
        self.step(&export, [load_balancer.name()])?;

        let lb_scope = LoadBalancerScope {
            provider: scope.provider.clone(),
            security_group: security_group.clone(),
            load_balancer: load_balancer.clone(),
        };
        let mut listeners = BTreeMap::new();
        for listener in &params.listeners {
            if !listener.meta.active {
                debug!("Skipping inactive listener {}", listener.meta.name);
                continue;
            }
            if let Some(handles) = self.listener(&lb_scope, target_groups, certificates, listener)? {
                listeners.insert(listener.meta.name.clone(), handles);
            }
        }

        Ok(LoadBalancerHandles {
            security_group,
            load_balancer,
            export,
            listeners,
        })
    }

    /// Plan a listener. Returns `None` when a lookup failed; every miss of
    /// the listener and its rules is recorded and planning carries on.
    fn listener(
        &mut self,
        scope: &LoadBalancerScope,
        target_groups: &BTreeMap<String, Component<Arc<TargetGroup>>>,
        certificates: &BTreeMap<String, Component<Arc<Certificate>>>,
        params: &ListenerParameters,
    ) -> CompResult<Option<ListenerHandles>> {
        let target_group = target_groups.get(&params.target_group_lookup_name).cloned();
        if target_group.is_none() {
            self.missing("Target group", &params.target_group_lookup_name);
        }
        let mut resolved = target_group.is_some();
        let mut certificate = None;
        if let Some(key) = &params.certificate_lookup_name {
            certificate = certificates.get(key).cloned();
            if certificate.is_none() {
                self.missing("Certificate", key);
                resolved = false;
            }
        }
        let target_group = match target_group {
            Some(target_group) if resolved => target_group,
            _ => {
                // Rules are still checked so that every miss is reported at once
                for rule in params.rules.iter().filter(|r| r.meta.active) {
                    if let Some(key) = rule.target_group_lookup_name.as_deref() {
                        if !target_groups.contains_key(key) {
                            self.missing("Target group", key);
                        }
                    }
                }
                return Ok(None);
            }
        };

        let listener = {
            let (scope, target_group, certificate) = (scope.clone(), target_group.clone(), certificate.clone());
            let (port, protocol) = (params.port, params.protocol);
            let tags = params.meta.tags.clone();
            lazy_listener(params.meta.clone(), move |ctx| {
                let (scope, target_group, certificate, tags) =
                    (scope.clone(), target_group.clone(), certificate.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &scope.provider).await?;
                    let load_balancer = value(&ctx, &scope.load_balancer).await?;
                    let target_group = value(&ctx, &target_group).await?;
                    let mut opts = ResourceOptions::new()
                        .provider(&provider)
                        .depends_on(&load_balancer)
                        .depends_on(&target_group);
                    let certificate_arn = match &certificate {
                        Some(certificate) => {
                            let certificate = value(&ctx, certificate).await?;
                            opts = opts.depends_on(&certificate);
                            Some(certificate.id().to_string())
                        }
                        None => None,
                    };
                    let args = ListenerArgs {
                        load_balancer_arn: load_balancer.id().to_string(),
                        port,
                        protocol: protocol.as_str().to_string(),
                        certificate_arn,
                        default_actions: vec![ForwardAction::to(target_group.id())],
                        tags,
                    };
                    Ok((args, opts))
                }
            })
        };
        let mut deps = vec![scope.provider.name(), scope.load_balancer.name(), target_group.name()];
        if let Some(certificate) = &certificate {
            deps.push(certificate.name());
        }
        self.step(&listener, deps)?;

        let ingress_rule = {
            let (provider, security_group) = (scope.provider.clone(), scope.security_group.clone());
            let port = params.port;
            lazy_security_group_rule(params.meta.child("rule"), move |ctx| {
                let (provider, security_group) = (provider.clone(), security_group.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let security_group = value(&ctx, &security_group).await?;
                    let args = SecurityGroupRuleArgs::tcp_ingress(security_group.id(), port, port, &[ANY_IPV4]);
                    Ok((args, ResourceOptions::new().provider(&provider).depends_on(&security_group)))
                }
            })
        };
        self.step(&ingress_rule, [scope.provider.name(), scope.security_group.name(), listener.name()])?;

        let mut rules = BTreeMap::new();
        for rule in &params.rules {
            if !rule.meta.active {
                rules.insert(rule.meta.name.clone(), self.inactive(&rule.meta)?);
                continue;
            }
            let key = rule
                .target_group_lookup_name
                .as_deref()
                .unwrap_or(&params.target_group_lookup_name);
            let Some(rule_target) = target_groups.get(key).cloned() else {
                self.missing("Target group", key);
                continue;
            };
            let component = self.listener_rule(scope, &listener, &rule_target, rule)?;
            rules.insert(rule.meta.name.clone(), component);
        }

        Ok(Some(ListenerHandles {
            listener,
            ingress_rule,
            rules,
        }))
    }

    fn listener_rule(
        &mut self,
        scope: &LoadBalancerScope,
        listener: &Component<Arc<Listener>>,
        target_group: &Component<Arc<TargetGroup>>,
        params: &ListenerRuleParameters,
    ) -> CompResult<Component<Arc<ListenerRule>>> {
        let rule = {
            let (provider, listener, target_group) = (scope.provider.clone(), listener.clone(), target_group.clone());
            let priority = params.priority;
            let conditions: Vec<Value> = params.conditions.iter().map(RuleCondition::to_engine_value).collect();
            let tags = params.meta.tags.clone();
            lazy_listener_rule(params.meta.clone(), move |ctx| {
                let (provider, listener, target_group) = (provider.clone(), listener.clone(), target_group.clone());
                let (conditions, tags) = (conditions.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let listener = value(&ctx, &listener).await?;
                    let target_group = value(&ctx, &target_group).await?;
                    let args = ListenerRuleArgs {
                        listener_arn: listener.id().to_string(),
                        priority,
                        actions: vec![ForwardAction::to(target_group.id())],
                        conditions,
                        tags,
                    };
                    let opts = ResourceOptions::new()
                        .provider(&provider)
                        .depends_on(&listener)
                        .depends_on(&target_group);
                    Ok((args, opts))
                }
            })
        };
        self.step(&rule, [scope.provider.name(), listener.name(), target_group.name()])?;
        Ok(rule)
    }

    fn cluster(
        &mut self,
        scope: &VpcScope,
        subnets: &[Component<Arc<Subnet>>],
        target_groups: &BTreeMap<String, Component<Arc<TargetGroup>>>,
        params: &EcsClusterParameters,
    ) -> CompResult<ClusterHandles> {
        let cluster = {
            let provider = scope.provider.clone();
            let tags = params.meta.tags.clone();
            lazy_cluster(params.meta.clone(), move |ctx| {
                let (provider, tags) = (provider.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    Ok((ClusterArgs { tags }, ResourceOptions::new().provider(&provider)))
                }
            })
        };
        self.step(&cluster, [scope.provider.name()])?;

        let mut services = BTreeMap::new();
        for service in &params.services {
            if !service.meta.active {
                debug!("Skipping inactive service {}", service.meta.name);
                continue;
            }
            if let Some(handles) = self.service(scope, &cluster, subnets, target_groups, service)? {
                services.insert(service.meta.name.clone(), handles);
            }
        }

        Ok(ClusterHandles { cluster, services })
    }

    /// Plan a Fargate service. Returns `None` when a container port refers to
    /// an unknown target group.
    fn service(
        &mut self,
        scope: &VpcScope,
        cluster: &Component<Arc<Cluster>>,
        subnets: &[Component<Arc<Subnet>>],
        target_groups: &BTreeMap<String, Component<Arc<TargetGroup>>>,
        params: &EcsServiceParameters,
    ) -> CompResult<Option<ServiceHandles>> {
        // (container, port, target group) for every routed port
        let mut routes = Vec::new();
        let mut complete = true;
        for (container, mapping) in params.target_group_mappings() {
            let key = mapping.target_group_lookup_name.as_deref().unwrap_or_default();
            match target_groups.get(key) {
                Some(tg) => routes.push((container.name.clone(), mapping.container_port, key.to_string(), tg.clone())),
                None => {
                    self.missing("Target group", key);
                    complete = false;
                }
            }
        }
        if !complete {
            return Ok(None);
        }
        let container_definitions = match params.container_definitions_json() {
            Ok(json) => json,
            Err(e) => {
                self.errors.push(e.in_component(params.meta.name.clone()));
                return Ok(None);
            }
        };

        let security_group = self.security_group(scope, params.meta.child("sg"))?;

        let routed_groups: Vec<Component<Arc<TargetGroup>>> = {
            let mut seen = BTreeMap::new();
            for (_, _, key, tg) in &routes {
                seen.entry(key.clone()).or_insert_with(|| tg.clone());
            }
            seen.into_values().collect()
        };

        let task_definition = {
            let (provider, cluster, subnets, routed) =
                (scope.provider.clone(), cluster.clone(), subnets.to_vec(), routed_groups.clone());
            let meta = params.meta.child("task");
            let args = TaskDefinitionArgs {
                family: TASK_FAMILY.to_string(),
                network_mode: "awsvpc".to_string(),
                requires_compatibilities: vec![FARGATE.to_string()],
                cpu: params.cpu.to_string(),
                memory: params.memory.to_string(),
                container_definitions,
                tags: meta.tags.clone(),
            };
            lazy_task_definition(meta, move |ctx| {
                let (provider, cluster, subnets, routed, args) =
                    (provider.clone(), cluster.clone(), subnets.clone(), routed.clone(), args.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let cluster = value(&ctx, &cluster).await?;
                    let subnets = values(&ctx, &subnets).await?;
                    let routed = values(&ctx, &routed).await?;
                    let opts = ResourceOptions::new()
                        .provider(&provider)
                        .depends_on(&cluster)
                        .depends_on_all(&subnets)
                        .depends_on_all(&routed);
                    Ok((args, opts))
                }
            })
        };
        let mut deps = vec![scope.provider.name(), cluster.name()];
        deps.extend(names(subnets));
        deps.extend(names(&routed_groups));
        self.step(&task_definition, deps)?;

        let mut ingress_rules = BTreeMap::new();
        for (_, container_port, key, tg) in &routes {
            if ingress_rules.contains_key(key) {
                continue;
            }
            let rule = {
                let (provider, security_group, tg) = (scope.provider.clone(), security_group.clone(), tg.clone());
                let fallback_port = *container_port;
                lazy_security_group_rule(params.meta.child(&format!("sg-{}-rule", key)), move |ctx| {
                    let (provider, security_group, tg) = (provider.clone(), security_group.clone(), tg.clone());
                    async move {
                        let provider = value(&ctx, &provider).await?;
                        let security_group = value(&ctx, &security_group).await?;
                        let tg = value(&ctx, &tg).await?;
                        let port = tg.port().unwrap_or(fallback_port);
                        let args = SecurityGroupRuleArgs::tcp_ingress(security_group.id(), port, port, &[ANY_IPV4]);
                        let opts = ResourceOptions::new()
                            .provider(&provider)
                            .depends_on(&security_group)
                            .depends_on(&tg);
                        Ok((args, opts))
                    }
                })
            };
            self.step(&rule, [scope.provider.name(), security_group.name(), tg.name()])?;
            ingress_rules.insert(key.clone(), rule);
        }

        let service = {
            let provider = scope.provider.clone();
            let (cluster, task_definition, security_group) =
                (cluster.clone(), task_definition.clone(), security_group.clone());
            let subnets = subnets.to_vec();
            let rules: Vec<_> = ingress_rules.values().cloned().collect();
            let routes: Vec<(String, u16, Component<Arc<TargetGroup>>)> =
                routes.iter().map(|(c, p, _, tg)| (c.clone(), *p, tg.clone())).collect();
            let service_name = params.meta.name.clone();
            let (desired_count, assign_public_ip) = (params.desired_count, params.assign_public_ip);
            let tags = params.meta.tags.clone();
            lazy_service(params.meta.clone(), move |ctx| {
                let (provider, cluster, task_definition, security_group) =
                    (provider.clone(), cluster.clone(), task_definition.clone(), security_group.clone());
                let (subnets, rules, routes) = (subnets.clone(), rules.clone(), routes.clone());
                let (service_name, tags) = (service_name.clone(), tags.clone());
                async move {
                    let provider = value(&ctx, &provider).await?;
                    let cluster = value(&ctx, &cluster).await?;
                    let task_definition = value(&ctx, &task_definition).await?;
                    let security_group = value(&ctx, &security_group).await?;
                    let subnets = values(&ctx, &subnets).await?;
                    let rules = values(&ctx, &rules).await?;

                    let mut load_balancers = Vec::with_capacity(routes.len());
                    for (container_name, container_port, tg) in &routes {
                        let tg = value(&ctx, tg).await?;
                        load_balancers.push(ServiceLoadBalancer {
                            container_name: container_name.clone(),
                            container_port: *container_port,
                            target_group_arn: tg.id().to_string(),
                        });
                    }

                    let args = ServiceArgs {
                        name: service_name,
                        cluster: cluster.id().to_string(),
                        task_definition: task_definition.id().to_string(),
                        desired_count,
                        launch_type: FARGATE.to_string(),
                        network_configuration: ServiceNetworkConfiguration {
                            assign_public_ip,
                            subnets: ids(&subnets),
                            security_groups: vec![security_group.id().to_string()],
                        },
                        load_balancers,
                        tags,
                    };
                    let opts = ResourceOptions::new()
                        .provider(&provider)
                        .depends_on(&cluster)
                        .depends_on(&task_definition)
                        .depends_on_all(&rules);
                    Ok((args, opts))
                }
            })
        };
        let mut deps = vec![scope.provider.name(), cluster.name(), task_definition.name(), security_group.name()];
        deps.extend(names(subnets));
        deps.extend(ingress_rules.values().map(|r| r.meta().name.as_str()));
        deps.extend(names(&routed_groups));
        self.step(&service, deps)?;

        Ok(Some(ServiceHandles {
            security_group,
            task_definition,
            ingress_rules,
            service,
        }))
    }
}

/// Look up the available zones of the provider's region.
fn availability_zones(name: String, provider: Component<Arc<Provider>>) -> Component<Vec<String>> {
    Component::new(name, move |ctx| {
        let provider = provider.clone();
        async move {
            let provider = value(&ctx, &provider).await?;
            let mut args = json!({ "state": "available" });
            if provider.state().is_materialized() {
                args["provider"] = Value::String(provider.urn().to_string());
            }
            let result = ctx.invoke(AVAILABILITY_ZONES_TOKEN, args).await?;
            let zones: Vec<String> = result
                .get("names")
                .and_then(Value::as_array)
                .map(|names| names.iter().filter_map(Value::as_str).map(str::to_string).collect())
                .unwrap_or_default();
            if zones.is_empty() {
                return Err(CompError::construction("no availability zones available"));
            }
            debug!("Availability zones: {:?}", zones);
            Ok(zones)
        }
    })
}

fn certificate(params: &CertificateParameters, provider: Component<Arc<Provider>>) -> Component<Arc<Certificate>> {
    let args = CertificateArgs {
        domain_name: params.domain.clone(),
        validation_method: params.validation_method.as_str().to_string(),
        tags: params.meta.tags.clone(),
    };
    lazy_certificate(params.meta.clone(), move |ctx| {
        let (provider, args) = (provider.clone(), args.clone());
        async move {
            let provider = value(&ctx, &provider).await?;
            Ok((args, ResourceOptions::new().provider(&provider)))
        }
    })
}

/// Build the plan for an infrastructure description.
///
/// Lookup failures are collected across the whole tree and returned
/// together. Structural problems (duplicate names) fail immediately.
pub fn plan_infra(params: &InfraParameters) -> CompResult<InfraPlan> {
    let name = params.meta.full_name()?;
    let mut planner = Planner::new(&name);
    let mut handles = InfraHandles::default();

    if !params.meta.active {
        info!("Infrastructure {} is inactive, nothing to plan", name);
        return Ok(InfraPlan {
            plan: planner.plan,
            handles,
        });
    }

    for vpc in &params.vpcs {
        if !vpc.meta.active {
            debug!("Skipping inactive VPC {}", vpc.meta.name);
            continue;
        }
        let vpc_handles = planner.vpc(vpc)?;
        handles.vpcs.insert(vpc.meta.name.clone(), vpc_handles);
    }

    if let Some(error) = CompError::join(planner.errors) {
        return Err(error);
    }
    planner.plan.validate()?;

    info!("Planned infrastructure {} with {} steps", name, planner.plan.len());
    Ok(InfraPlan {
        plan: planner.plan,
        handles,
    })
}

/// Plan and apply an infrastructure description.
pub async fn deploy_infra(ctx: &DeployContext, params: &InfraParameters, mode: FailureMode) -> CompResult<InfraDeployment> {
    let InfraPlan { plan, handles } = plan_infra(params)?;
    let report = plan.apply(ctx, mode).await?;
    Ok(InfraDeployment { handles, report })
}
