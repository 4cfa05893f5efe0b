//! A small single-VPC network built as one component.
//!
//! Unlike [`crate::infra`], nothing here goes through a build plan: the
//! network component resolves its parts itself, each one chained onto the
//! resources it needs.

use std::sync::Arc;

use infracomp_core::{apply_all, CompResult, Component, DeployContext};
use infracomp_engine::{Resource, ResourceOptions};
use serde::{Deserialize, Serialize};

use crate::args::*;
use crate::resources::*;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicVpcParameters {
    pub region: String,
    pub cidr_block: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicSubnetParameters {
    pub cidr_block: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BasicNetworkParameters {
    pub vpc: BasicVpcParameters,
    pub public_subnet: BasicSubnetParameters,
    pub private_subnet: BasicSubnetParameters,
}

/// Everything [`basic_network`] creates.
#[derive(Debug, Clone, Default)]
pub struct BasicNetwork {
    pub provider: Arc<Provider>,
    pub vpc: Arc<Vpc>,
    pub public_subnet: Arc<Subnet>,
    pub private_subnet: Arc<Subnet>,
    pub internet_gateway: Arc<InternetGateway>,
    pub gateway_attachment: Arc<InternetGatewayAttachment>,
    pub route_table: Arc<RouteTable>,
    pub default_route: Arc<Route>,
    /// Accepts HTTPS from anywhere
    pub security_group: Arc<SecurityGroup>,
}

fn subnet_args(vpc: &Vpc, params: &BasicSubnetParameters, public: bool) -> SubnetArgs {
    SubnetArgs {
        vpc_id: vpc.id().to_string(),
        cidr_block: params.cidr_block.clone(),
        availability_zone: params.availability_zone.clone(),
        map_public_ip_on_launch: public,
        tags: Tags::new(),
    }
}

/// A VPC with a public and a private subnet, an internet gateway routed
/// through a default route, and a security group open on 443.
///
/// Every part is named `"{name}-{part}"`.
pub fn basic_network(name: impl Into<String>, params: BasicNetworkParameters) -> Component<BasicNetwork> {
    let name = name.into();
    Component::new(name.clone(), move |ctx| {
        let (name, params) = (name.clone(), params.clone());
        async move { build(&ctx, &name, &params).await }
    })
}

async fn build(ctx: &DeployContext, name: &str, params: &BasicNetworkParameters) -> CompResult<BasicNetwork> {
    let provider = new_provider(
        format!("{}-provider", name),
        ProviderArgs {
            region: params.vpc.region.clone(),
        },
        ResourceOptions::new(),
    );

    provider
        .get_and_then(ctx, |provider| async move {
            let provider = &provider.component;
            let opts = || ResourceOptions::new().provider(provider);

            let vpc = new_vpc(
                format!("{}-vpc", name),
                VpcArgs {
                    cidr_block: params.vpc.cidr_block.clone(),
                    enable_dns_support: true,
                    tags: Tags::new(),
                },
                opts(),
            )
            .get(ctx)
            .await?
            .component;
            let vpc = &vpc;

            let public_subnet = new_subnet(
                format!("{}-public-subnet", name),
                subnet_args(vpc, &params.public_subnet, true),
                opts().depends_on(vpc),
            )
            .get(ctx)
            .await?
            .component;
            let private_subnet = new_subnet(
                format!("{}-private-subnet", name),
                subnet_args(vpc, &params.private_subnet, false),
                opts().depends_on(vpc),
            )
            .get(ctx)
            .await?
            .component;

            let (internet_gateway, gateway_attachment, route_table, default_route) = new_internet_gateway(
                format!("{}-igw", name),
                InternetGatewayArgs::default(),
                opts().depends_on(vpc),
            )
            .get_and_then(ctx, |igw| async move {
                let igw = &igw.component;
                new_internet_gateway_attachment(
                    format!("{}-igw-vpc-attachment", name),
                    InternetGatewayAttachmentArgs {
                        vpc_id: vpc.id().to_string(),
                        internet_gateway_id: igw.id().to_string(),
                    },
                    opts().depends_on(vpc).depends_on(igw),
                )
                .get_and_then(ctx, |attachment| async move {
                    let attachment = &attachment.component;
                    new_route_table(
                        format!("{}-vpc-route-table", name),
                        RouteTableArgs {
                            vpc_id: vpc.id().to_string(),
                            tags: Tags::new(),
                        },
                        opts().depends_on(vpc),
                    )
                    .get_and_then(ctx, |route_table| async move {
                        let route_table = route_table.component;
                        let default_route = new_route(
                            format!("{}-route-default", name),
                            RouteArgs {
                                route_table_id: route_table.id().to_string(),
                                destination_cidr_block: ANY_IPV4.to_string(),
                                gateway_id: igw.id().to_string(),
                            },
                            opts().depends_on(&route_table).depends_on(attachment),
                        )
                        .get(ctx)
                        .await?
                        .component;
                        Ok((Arc::clone(igw), Arc::clone(attachment), route_table, default_route))
                    })
                    .await
                })
                .await
            })
            .await?;

            let security_group = new_security_group(
                format!("{}-security-group", name),
                SecurityGroupArgs {
                    vpc_id: vpc.id().to_string(),
                    egress: vec![SecurityGroupEgress::allow_all()],
                    tags: Tags::new(),
                },
                opts().depends_on(vpc),
            )
            .get_and_then(ctx, |sg| async move {
                let https = new_security_group_rule(
                    format!("{}-security-group-rule-https", name),
                    SecurityGroupRuleArgs::tcp_ingress(sg.component.id(), 443, 443, &[ANY_IPV4]),
                    opts().depends_on(&sg.component),
                );
                apply_all(ctx, &[&https]).await?;
                Ok(sg.component)
            })
            .await?;

            Ok(BasicNetwork {
                provider: Arc::clone(provider),
                vpc: Arc::clone(vpc),
                public_subnet,
                private_subnet,
                internet_gateway,
                gateway_attachment,
                route_table,
                default_route,
                security_group,
            })
        })
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use infracomp_engine::MockEngine;

    fn params() -> BasicNetworkParameters {
        BasicNetworkParameters {
            vpc: BasicVpcParameters {
                region: "us-east-1".to_string(),
                cidr_block: "10.1.0.0/16".to_string(),
            },
            public_subnet: BasicSubnetParameters {
                cidr_block: "10.1.1.0/24".to_string(),
                availability_zone: "us-east-1a".to_string(),
            },
            private_subnet: BasicSubnetParameters {
                cidr_block: "10.1.2.0/24".to_string(),
                availability_zone: "us-east-1b".to_string(),
            },
        }
    }

    #[tokio::test]
    async fn test_basic_network_creates_every_part_once() {
        let engine = MockEngine::new("net", "dev");
        let ctx = DeployContext::new("net", "dev", Arc::new(engine.clone()));
        let network = basic_network("core", params());

        let first = network.get(&ctx).await.unwrap().component;
        let second = network.get(&ctx).await.unwrap().component;
        assert!(Arc::ptr_eq(&first.vpc, &second.vpc));

        for part in [
            "core-provider",
            "core-vpc",
            "core-public-subnet",
            "core-private-subnet",
            "core-igw",
            "core-igw-vpc-attachment",
            "core-vpc-route-table",
            "core-route-default",
            "core-security-group",
            "core-security-group-rule-https",
        ] {
            assert_eq!(engine.registration_count(part), 1, "{}", part);
        }

        let public = engine.resource("core-public-subnet").unwrap();
        assert_eq!(public.inputs["mapPublicIpOnLaunch"], true);
        assert_eq!(public.inputs["vpcId"], "core-vpc_id");

        let https = engine.resource("core-security-group-rule-https").unwrap();
        assert_eq!(https.inputs["fromPort"], 443);
        assert_eq!(https.inputs["securityGroupId"], "core-security-group_id");
        assert_eq!(first.default_route.state().inputs["gatewayId"], "core-igw_id");
    }

    #[tokio::test]
    async fn test_basic_network_retries_after_failure() {
        let engine = MockEngine::new("net", "dev").fail_times("core-route-default", 1, "throttled");
        let ctx = DeployContext::new("net", "dev", Arc::new(engine.clone()));
        let network = basic_network("core", params());

        let err = network.get(&ctx).await.unwrap_err();
        assert!(err.to_string().contains("throttled"));
        assert_eq!(err.component_path().first(), Some(&"core"));

        network.get(&ctx).await.unwrap();
        assert_eq!(engine.registration_count("core-vpc"), 1);
        assert_eq!(engine.registration_count("core-route-default"), 2);
    }
}
