//! Resource arguments.
//!
//! These are opaque payloads for the engine. They are serialized in the
//! engine's camelCase property convention and never interpreted here.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

pub type Tags = BTreeMap<String, String>;

/// CIDR block matching every IPv4 address.
pub const ANY_IPV4: &str = "0.0.0.0/0";
/// CIDR block matching every IPv6 address.
pub const ANY_IPV6: &str = "::/0";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderArgs {
    pub region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcArgs {
    pub cidr_block: String,
    pub enable_dns_support: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetArgs {
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternetGatewayArgs {
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InternetGatewayAttachmentArgs {
    pub vpc_id: String,
    pub internet_gateway_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTableArgs {
    pub vpc_id: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteArgs {
    pub route_table_id: String,
    pub destination_cidr_block: String,
    pub gateway_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteTableAssociationArgs {
    pub route_table_id: String,
    pub subnet_id: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupEgress {
    pub from_port: u16,
    pub to_port: u16,
    pub protocol: String,
    pub cidr_blocks: Vec<String>,
    pub ipv6_cidr_blocks: Vec<String>,
}

impl SecurityGroupEgress {
    /// Unrestricted outbound traffic.
    pub fn allow_all() -> Self {
        Self {
            from_port: 0,
            to_port: 0,
            protocol: "-1".to_string(),
            cidr_blocks: vec![ANY_IPV4.to_string()],
            ipv6_cidr_blocks: vec![ANY_IPV6.to_string()],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupArgs {
    pub vpc_id: String,
    pub egress: Vec<SecurityGroupEgress>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecurityGroupRuleArgs {
    #[serde(rename = "type")]
    pub rule_type: String,
    pub protocol: String,
    pub security_group_id: String,
    pub cidr_blocks: Vec<String>,
    pub from_port: u16,
    pub to_port: u16,
}

impl SecurityGroupRuleArgs {
    /// TCP ingress on a port range.
    pub fn tcp_ingress(security_group_id: impl Into<String>, from_port: u16, to_port: u16, cidr_blocks: &[&str]) -> Self {
        Self {
            rule_type: "ingress".to_string(),
            protocol: "tcp".to_string(),
            security_group_id: security_group_id.into(),
            cidr_blocks: cidr_blocks.iter().map(|c| c.to_string()).collect(),
            from_port,
            to_port,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerArgs {
    pub load_balancer_type: String,
    pub security_groups: Vec<String>,
    pub subnets: Vec<String>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupArgs {
    pub port: u16,
    pub protocol: String,
    pub target_type: String,
    pub vpc_id: String,
    pub tags: Tags,
}

/// Forward traffic to a target group.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ForwardAction {
    #[serde(rename = "type")]
    pub action_type: String,
    pub target_group_arn: String,
}

impl ForwardAction {
    pub fn to(target_group_arn: impl Into<String>) -> Self {
        Self {
            action_type: "forward".to_string(),
            target_group_arn: target_group_arn.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerArgs {
    pub load_balancer_arn: String,
    pub port: u16,
    pub protocol: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub certificate_arn: Option<String>,
    pub default_actions: Vec<ForwardAction>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerRuleArgs {
    pub listener_arn: String,
    pub priority: u32,
    pub actions: Vec<ForwardAction>,
    /// Engine-shaped rule conditions
    pub conditions: Vec<Value>,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateArgs {
    pub domain_name: String,
    pub validation_method: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClusterArgs {
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskDefinitionArgs {
    pub family: String,
    pub network_mode: String,
    pub requires_compatibilities: Vec<String>,
    pub cpu: String,
    pub memory: String,
    /// JSON document describing the containers
    pub container_definitions: String,
    pub tags: Tags,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceNetworkConfiguration {
    pub assign_public_ip: bool,
    pub subnets: Vec<String>,
    pub security_groups: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceLoadBalancer {
    pub container_name: String,
    pub container_port: u16,
    pub target_group_arn: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceArgs {
    pub name: String,
    pub cluster: String,
    pub task_definition: String,
    pub desired_count: u32,
    pub launch_type: String,
    pub network_configuration: ServiceNetworkConfiguration,
    pub load_balancers: Vec<ServiceLoadBalancer>,
    pub tags: Tags,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_engine_property_names() {
        let rule = SecurityGroupRuleArgs::tcp_ingress("sg_id", 443, 443, &[ANY_IPV4]);
        let value = serde_json::to_value(&rule).unwrap();

        assert_eq!(value["type"], "ingress");
        assert_eq!(value["securityGroupId"], "sg_id");
        assert_eq!(value["cidrBlocks"], json!(["0.0.0.0/0"]));
        assert_eq!(value["fromPort"], 443);
    }

    #[test]
    fn test_listener_without_certificate() {
        let args = ListenerArgs {
            load_balancer_arn: "lb".to_string(),
            port: 80,
            protocol: "HTTP".to_string(),
            default_actions: vec![ForwardAction::to("tg")],
            ..ListenerArgs::default()
        };
        let value = serde_json::to_value(&args).unwrap();

        assert!(value.get("certificateArn").is_none());
        assert_eq!(value["defaultActions"][0]["type"], "forward");
        assert_eq!(value["defaultActions"][0]["targetGroupArn"], "tg");
    }
}
