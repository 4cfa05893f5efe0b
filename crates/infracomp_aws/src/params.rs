//! Infrastructure parameter trees.
//!
//! Every element flattens a [`Meta`] (name, tags, protect, active) into its
//! own fields, so a YAML element reads like:
//!
//! ```yaml
//! name: web-lb
//! active: true
//! type: application
//! listeners: []
//! ```

use std::path::Path;

use infracomp_core::{pattern, CompError, CompResult, Meta};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

/// Root of an infrastructure description.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InfraParameters {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub vpcs: Vec<VpcParameters>,
}

impl InfraParameters {
    pub fn from_yaml_str(yaml: &str) -> CompResult<Self> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> CompResult<Self> {
        let path = path.as_ref();
        debug!("Loading infrastructure parameters from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml_str(&content)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderParameters {
    #[serde(flatten)]
    pub meta: Meta,
    pub region: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VpcParameters {
    #[serde(flatten)]
    pub meta: Meta,
    pub provider: ProviderParameters,
    pub cidr_block: String,
    #[serde(default)]
    pub partitions: Vec<NetworkPartitionParameters>,
    #[serde(default)]
    pub certificates: Vec<CertificateParameters>,
}

/// A group of subnets with the load balancers and clusters placed in them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkPartitionParameters {
    #[serde(flatten)]
    pub meta: Meta,
    /// Public partitions are routed through the internet gateway
    #[serde(default)]
    pub is_public: bool,
    #[serde(default)]
    pub subnets: Vec<SubnetParameters>,
    #[serde(default)]
    pub target_groups: Vec<TargetGroupParameters>,
    #[serde(default)]
    pub load_balancers: Vec<LoadBalancerParameters>,
    #[serde(default)]
    pub ecs_clusters: Vec<EcsClusterParameters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubnetParameters {
    #[serde(flatten)]
    pub meta: Meta,
    pub cidr_block: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LbType {
    #[default]
    Application,
    Network,
    Gateway,
}

impl LbType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Application => "application",
            Self::Network => "network",
            Self::Gateway => "gateway",
        }
    }
}

/// Listener and target group protocol.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    #[default]
    Http,
    Https,
    Tcp,
    Tls,
    Udp,
    TcpUdp,
}

impl Protocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "HTTP",
            Self::Https => "HTTPS",
            Self::Tcp => "TCP",
            Self::Tls => "TLS",
            Self::Udp => "UDP",
            Self::TcpUdp => "TCP_UDP",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    #[default]
    Ip,
    Instance,
}

impl TargetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ip => "ip",
            Self::Instance => "instance",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetGroupParameters {
    #[serde(flatten)]
    pub meta: Meta,
    /// Key used by listeners and containers; defaults to the name
    #[serde(default)]
    pub lookup_name: Option<String>,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    #[serde(default)]
    pub target_type: TargetType,
}

impl TargetGroupParameters {
    pub fn lookup_key(&self) -> &str {
        self.lookup_name.as_deref().unwrap_or(&self.meta.name)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoadBalancerParameters {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(rename = "type", default)]
    pub lb_type: LbType,
    #[serde(default)]
    pub listeners: Vec<ListenerParameters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerParameters {
    #[serde(flatten)]
    pub meta: Meta,
    pub port: u16,
    #[serde(default)]
    pub protocol: Protocol,
    pub target_group_lookup_name: String,
    #[serde(default)]
    pub certificate_lookup_name: Option<String>,
    #[serde(default)]
    pub rules: Vec<ListenerRuleParameters>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListenerRuleParameters {
    #[serde(flatten)]
    pub meta: Meta,
    pub priority: u32,
    /// Forward target; defaults to the listener's target group
    #[serde(default)]
    pub target_group_lookup_name: Option<String>,
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryStringMatch {
    #[serde(default)]
    pub key: Option<String>,
    pub value: String,
}

/// A listener rule condition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleCondition {
    PathPattern { values: Vec<String> },
    HostHeader { values: Vec<String> },
    HttpHeader { name: String, values: Vec<String> },
    QueryString { values: Vec<QueryStringMatch> },
    SourceIp { values: Vec<String> },
}

impl RuleCondition {
    /// The condition in the engine's listener rule shape.
    pub fn to_engine_value(&self) -> Value {
        use serde_json::json;
        match self {
            Self::PathPattern { values } => json!({ "pathPattern": { "values": values } }),
            Self::HostHeader { values } => json!({ "hostHeader": { "values": values } }),
            Self::HttpHeader { name, values } => {
                json!({ "httpHeader": { "httpHeaderName": name, "values": values } })
            }
            Self::QueryString { values } => json!({ "queryStrings": values }),
            Self::SourceIp { values } => json!({ "sourceIp": { "values": values } }),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValidationMethod {
    /// CNAME record in DNS, renewed automatically
    #[default]
    Dns,
    /// Email approval, renewed manually
    Email,
}

impl ValidationMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Dns => "DNS",
            Self::Email => "EMAIL",
        }
    }
}

/// Certificates are looked up by name.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CertificateParameters {
    #[serde(flatten)]
    pub meta: Meta,
    pub domain: String,
    #[serde(default)]
    pub validation_method: ValidationMethod,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcsClusterParameters {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default)]
    pub services: Vec<EcsServiceParameters>,
}

/// A Fargate service.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EcsServiceParameters {
    #[serde(flatten)]
    pub meta: Meta,
    #[serde(default = "default_desired_count")]
    pub desired_count: u32,
    pub cpu: u32,
    pub memory: u32,
    #[serde(default)]
    pub assign_public_ip: bool,
    #[serde(default)]
    pub containers: Vec<ContainerDefinition>,
}

fn default_desired_count() -> u32 {
    1
}

impl EcsServiceParameters {
    /// The task definition's container definitions as a JSON document.
    pub fn container_definitions_json(&self) -> CompResult<String> {
        let containers = self
            .containers
            .iter()
            .map(ContainerDefinition::to_task_value)
            .collect::<CompResult<Vec<_>>>()?;
        serde_json::to_string(&containers).map_err(|e| CompError::Serialization(e.to_string()))
    }

    /// Port mappings that route traffic from a target group.
    pub fn target_group_mappings(&self) -> impl Iterator<Item = (&ContainerDefinition, &ContainerPortMapping)> {
        self.containers.iter().flat_map(|c| {
            c.port_mappings
                .iter()
                .filter(|p| p.target_group_lookup_name.is_some())
                .map(move |p| (c, p))
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerEnvironmentVar {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    pub image: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub essential: Option<bool>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub port_mappings: Vec<ContainerPortMapping>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub environment: Vec<ContainerEnvironmentVar>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entry_point: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub command: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
}

impl ContainerDefinition {
    /// The container as it appears in a task definition, with application
    /// protocols normalized.
    pub fn to_task_value(&self) -> CompResult<Value> {
        let mut value = serde_json::to_value(self).map_err(|e| CompError::Serialization(e.to_string()))?;
        if let Some(Value::Array(mappings)) = value.get_mut("portMappings") {
            for (mapping, params) in mappings.iter_mut().zip(&self.port_mappings) {
                if params.app_protocol.is_some() {
                    mapping["appProtocol"] = Value::String(params.app_protocol()?.as_str().to_string());
                }
            }
        }
        Ok(value)
    }
}

/// Application protocol of a container port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppProtocol {
    Http,
    Http2,
    Grpc,
}

impl AppProtocol {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Http => "http",
            Self::Http2 => "http2",
            Self::Grpc => "grpc",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerPortMapping {
    pub container_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host_port: Option<u16>,
    /// Transport protocol (`tcp` or `udp`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub protocol: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_protocol: Option<String>,
    /// Target group routing traffic to this port; never sent to the engine
    #[serde(default, skip_serializing)]
    pub target_group_lookup_name: Option<String>,
}

impl ContainerPortMapping {
    /// Classify the free-form application protocol.
    ///
    /// Anything mentioning `http2` is HTTP/2, anything mentioning `grpc` is
    /// gRPC, the rest is HTTP.
    pub fn app_protocol(&self) -> CompResult<AppProtocol> {
        let raw = self.app_protocol.as_deref().unwrap_or_default();
        if pattern::matches("(?i)http2", raw)? {
            Ok(AppProtocol::Http2)
        } else if pattern::matches("(?i)grpc", raw)? {
            Ok(AppProtocol::Grpc)
        } else {
            Ok(AppProtocol::Http)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mapping(app_protocol: Option<&str>) -> ContainerPortMapping {
        ContainerPortMapping {
            container_port: 8080,
            app_protocol: app_protocol.map(str::to_string),
            target_group_lookup_name: Some("api".to_string()),
            ..ContainerPortMapping::default()
        }
    }

    #[test]
    fn test_app_protocol_classification() {
        assert_eq!(mapping(Some("HTTP2")).app_protocol().unwrap(), AppProtocol::Http2);
        assert_eq!(mapping(Some("gRPC")).app_protocol().unwrap(), AppProtocol::Grpc);
        assert_eq!(mapping(Some("https")).app_protocol().unwrap(), AppProtocol::Http);
        assert_eq!(mapping(None).app_protocol().unwrap(), AppProtocol::Http);
    }

    #[test]
    fn test_container_definitions_json() {
        let service = EcsServiceParameters {
            meta: Meta::new("api"),
            cpu: 256,
            memory: 512,
            containers: vec![ContainerDefinition {
                name: "app".to_string(),
                image: "nginx:latest".to_string(),
                port_mappings: vec![mapping(Some("Grpc"))],
                environment: vec![ContainerEnvironmentVar {
                    name: "MODE".to_string(),
                    value: "prod".to_string(),
                }],
                ..ContainerDefinition::default()
            }],
            ..EcsServiceParameters::default()
        };

        let json: Value = serde_json::from_str(&service.container_definitions_json().unwrap()).unwrap();
        assert_eq!(
            json,
            json!([{
                "name": "app",
                "image": "nginx:latest",
                "portMappings": [{ "containerPort": 8080, "appProtocol": "grpc" }],
                "environment": [{ "name": "MODE", "value": "prod" }]
            }])
        );
    }

    #[test]
    fn test_target_group_mappings() {
        let service = EcsServiceParameters {
            containers: vec![ContainerDefinition {
                name: "app".to_string(),
                port_mappings: vec![
                    mapping(None),
                    ContainerPortMapping {
                        container_port: 9000,
                        ..ContainerPortMapping::default()
                    },
                ],
                ..ContainerDefinition::default()
            }],
            ..EcsServiceParameters::default()
        };

        let ports: Vec<u16> = service.target_group_mappings().map(|(_, p)| p.container_port).collect();
        assert_eq!(ports, vec![8080]);
    }

    #[test]
    fn test_rule_condition_shapes() {
        let yaml = r#"
- type: pathPattern
  values: ["/api/*"]
- type: httpHeader
  name: X-Env
  values: ["blue"]
- type: queryString
  values:
    - key: version
      value: "2"
"#;
        let conditions: Vec<RuleCondition> = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(conditions[0].to_engine_value(), json!({ "pathPattern": { "values": ["/api/*"] } }));
        assert_eq!(
            conditions[1].to_engine_value(),
            json!({ "httpHeader": { "httpHeaderName": "X-Env", "values": ["blue"] } })
        );
        assert_eq!(
            conditions[2].to_engine_value(),
            json!({ "queryStrings": [{ "key": "version", "value": "2" }] })
        );
    }

    #[test]
    fn test_lookup_key_defaults_to_name() {
        let mut tg = TargetGroupParameters {
            meta: Meta::new("api-tg"),
            port: 80,
            ..TargetGroupParameters::default()
        };
        assert_eq!(tg.lookup_key(), "api-tg");

        tg.lookup_name = Some("api".to_string());
        assert_eq!(tg.lookup_key(), "api");
    }

    #[test]
    fn test_yaml_defaults() {
        let yaml = r#"
name: shop
vpcs:
  - name: main
    cidrBlock: 10.0.0.0/16
    provider:
      name: aws-eu
      region: eu-west-1
    partitions:
      - name: public
        isPublic: true
        subnets:
          - name: public-a
            cidrBlock: 10.0.1.0/24
"#;
        let params = InfraParameters::from_yaml_str(yaml).unwrap();
        let vpc = &params.vpcs[0];
        assert!(vpc.meta.active);
        assert_eq!(vpc.provider.region, "eu-west-1");
        assert!(vpc.partitions[0].is_public);
        assert_eq!(vpc.partitions[0].subnets[0].cidr_block, "10.0.1.0/24");
        assert!(vpc.certificates.is_empty());
    }
}
