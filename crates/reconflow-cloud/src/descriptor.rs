//! Desired-state descriptors
//!
//! A [`Descriptor`] is the immutable declaration of one resource instance, as
//! produced by whatever compiles the user's model. Attributes are typed per
//! kind; [`Descriptor::validate`] enforces the static invariants before any
//! provider call is made.

use crate::error::{CloudError, Result};
use crate::identity::{Identity, ResourceKind};
use crate::net::Cidr;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Declared desired state of one resource
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Descriptor {
    /// Name written to the provider's `Name` tag
    pub name: String,

    /// Provider account/agent the resource belongs to
    #[serde(rename = "provider")]
    pub scope: String,

    /// When true the resource must not exist
    #[serde(default)]
    pub purged: bool,

    #[serde(flatten)]
    pub spec: ResourceSpec,
}

impl Descriptor {
    pub fn new(scope: impl Into<String>, name: impl Into<String>, spec: ResourceSpec) -> Self {
        Self {
            name: name.into(),
            scope: scope.into(),
            purged: false,
            spec,
        }
    }

    pub fn purged(mut self, purged: bool) -> Self {
        self.purged = purged;
        self
    }

    pub fn kind(&self) -> ResourceKind {
        self.spec.kind()
    }

    pub fn identity(&self) -> Identity {
        Identity::new(self.kind(), self.scope.clone(), self.name.clone())
    }

    /// Check the static invariants of this descriptor
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| CloudError::InvalidDesiredState {
            identity: self.identity(),
            reason,
        };

        if self.name.trim().is_empty() {
            return Err(invalid("name must not be empty".to_string()));
        }
        if self.scope.trim().is_empty() {
            return Err(invalid("provider must not be empty".to_string()));
        }

        match &self.spec {
            ResourceSpec::VirtualMachine(vm) => vm.validate(),
            ResourceSpec::LoadBalancer(lb) => lb.validate(&self.name),
            ResourceSpec::Vpc(vpc) => vpc.validate(),
            ResourceSpec::Subnet(subnet) => subnet.validate(),
            ResourceSpec::InternetGateway(_) => Ok(()),
            ResourceSpec::SecurityGroup(sg) => sg.validate(),
            ResourceSpec::Volume(volume) => volume.validate(),
        }
        .map_err(invalid)
    }
}

/// Kind-specific attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ResourceSpec {
    VirtualMachine(VirtualMachineSpec),
    LoadBalancer(LoadBalancerSpec),
    Vpc(VpcSpec),
    Subnet(SubnetSpec),
    InternetGateway(InternetGatewaySpec),
    SecurityGroup(SecurityGroupSpec),
    Volume(VolumeSpec),
}

impl ResourceSpec {
    pub fn kind(&self) -> ResourceKind {
        match self {
            ResourceSpec::VirtualMachine(_) => ResourceKind::VirtualMachine,
            ResourceSpec::LoadBalancer(_) => ResourceKind::LoadBalancer,
            ResourceSpec::Vpc(_) => ResourceKind::Vpc,
            ResourceSpec::Subnet(_) => ResourceKind::Subnet,
            ResourceSpec::InternetGateway(_) => ResourceKind::InternetGateway,
            ResourceSpec::SecurityGroup(_) => ResourceKind::SecurityGroup,
            ResourceSpec::Volume(_) => ResourceKind::Volume,
        }
    }
}

fn default_true() -> bool {
    true
}

fn check_cidr(field: &str, value: &str) -> std::result::Result<(), String> {
    Cidr::parse(value)
        .map(|_| ())
        .ok_or_else(|| format!("{} '{}' is not a valid CIDR block", field, value))
}

/// Virtual machine attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualMachineSpec {
    pub flavor: String,
    pub image: String,
    pub key_name: String,
    /// Public key material imported when `key_name` is unknown to the provider
    #[serde(default)]
    pub key_value: Option<String>,
    /// Subnet given by provider id
    #[serde(default)]
    pub subnet_id: Option<String>,
    /// Subnet given by the name of a managed subnet
    #[serde(default)]
    pub subnet: Option<String>,
    #[serde(default)]
    pub user_data: String,
    #[serde(default = "default_true")]
    pub source_dest_check: bool,
    /// Security group names
    #[serde(default)]
    pub security_groups: Vec<String>,
}

/// The single network attachment of a virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubnetRef<'a> {
    Id(&'a str),
    Name(&'a str),
}

impl VirtualMachineSpec {
    /// The subnet attachment, `None` when the descriptor is invalid
    pub fn subnet_ref(&self) -> Option<SubnetRef<'_>> {
        match (&self.subnet_id, &self.subnet) {
            (Some(id), None) => Some(SubnetRef::Id(id)),
            (None, Some(name)) => Some(SubnetRef::Name(name)),
            _ => None,
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        match (&self.subnet_id, &self.subnet) {
            (Some(_), Some(_)) => {
                return Err("exactly one of subnet_id and subnet may be set, both are".to_string());
            }
            (None, None) => {
                return Err("exactly one of subnet_id and subnet must be set, neither is".to_string());
            }
            _ => {}
        }
        for (field, value) in [
            ("flavor", &self.flavor),
            ("image", &self.image),
            ("key_name", &self.key_name),
        ] {
            if value.trim().is_empty() {
                return Err(format!("{} must not be empty", field));
            }
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    80
}

fn default_protocol() -> String {
    "http".to_string()
}

/// Classic load balancer attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerSpec {
    #[serde(default = "default_port")]
    pub listen_port: u16,
    #[serde(default = "default_port")]
    pub dest_port: u16,
    #[serde(default = "default_protocol")]
    pub protocol: String,
    /// Security group name
    #[serde(default)]
    pub security_group: Option<String>,
    /// Member instance names
    #[serde(default)]
    pub instances: Vec<String>,
    /// Subnet names; the provider's availability zone is used when empty
    #[serde(default)]
    pub subnets: Vec<String>,
}

const LB_PROTOCOLS: [&str; 4] = ["http", "https", "tcp", "ssl"];

impl LoadBalancerSpec {
    fn validate(&self, name: &str) -> std::result::Result<(), String> {
        if name.len() > 32 || !name.chars().all(|c| c.is_ascii_alphanumeric() || c == '-') {
            return Err(format!(
                "load balancer name '{}' must be at most 32 alphanumeric or '-' characters",
                name
            ));
        }
        if self.listen_port == 0 || self.dest_port == 0 {
            return Err("listen_port and dest_port must be non-zero".to_string());
        }
        if !LB_PROTOCOLS.contains(&self.protocol.to_ascii_lowercase().as_str()) {
            return Err(format!(
                "protocol '{}' is not one of {}",
                self.protocol,
                LB_PROTOCOLS.join(", ")
            ));
        }
        Ok(())
    }
}

fn default_tenancy() -> String {
    "default".to_string()
}

/// VPC attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcSpec {
    pub cidr_block: String,
    #[serde(default = "default_tenancy")]
    pub instance_tenancy: String,
}

impl VpcSpec {
    fn validate(&self) -> std::result::Result<(), String> {
        check_cidr("cidr_block", &self.cidr_block)?;
        if !matches!(self.instance_tenancy.as_str(), "default" | "dedicated") {
            return Err(format!(
                "instance_tenancy '{}' must be 'default' or 'dedicated'",
                self.instance_tenancy
            ));
        }
        Ok(())
    }
}

/// Subnet attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetSpec {
    pub cidr_block: String,
    /// Name of the owning VPC
    pub vpc: String,
    #[serde(default)]
    pub map_public_ip: bool,
    /// Availability zone; the provider's default zone when unset
    #[serde(default)]
    pub availability_zone: Option<String>,
}

impl SubnetSpec {
    fn validate(&self) -> std::result::Result<(), String> {
        check_cidr("cidr_block", &self.cidr_block)?;
        if self.vpc.trim().is_empty() {
            return Err("vpc must not be empty".to_string());
        }
        Ok(())
    }
}

/// Internet gateway attributes
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternetGatewaySpec {
    /// Name of the VPC the gateway is attached to
    #[serde(default)]
    pub vpc: Option<String>,
}

/// Security group attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupSpec {
    #[serde(default)]
    pub description: String,
    /// Name of the owning VPC
    pub vpc: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

impl SecurityGroupSpec {
    fn validate(&self) -> std::result::Result<(), String> {
        if self.vpc.trim().is_empty() {
            return Err("vpc must not be empty".to_string());
        }
        for (index, rule) in self.rules.iter().enumerate() {
            rule.validate().map_err(|e| format!("rules[{}]: {}", index, e))?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Ingress,
    Egress,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Ingress => write!(f, "ingress"),
            Direction::Egress => write!(f, "egress"),
        }
    }
}

/// A single security group rule
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Rule {
    pub direction: Direction,
    pub protocol: String,
    #[serde(default)]
    pub port_min: Option<i32>,
    #[serde(default)]
    pub port_max: Option<i32>,
    pub remote_prefix: String,
}

impl Rule {
    /// Canonical form used for comparison, matching how EC2 reports rules
    ///
    /// Protocols are lower-cased, with `-1` spelled `all` and the common
    /// protocol numbers spelled by name. `all` rules carry no ports. ICMP
    /// type and code default to `-1` (any). Other protocols without ports
    /// drop them. On tcp/udp a lone port bound is mirrored.
    pub fn normalized(&self) -> Rule {
        let protocol = match self.protocol.to_ascii_lowercase().as_str() {
            "-1" | "all" => "all".to_string(),
            "6" => "tcp".to_string(),
            "17" => "udp".to_string(),
            "1" => "icmp".to_string(),
            "58" => "icmpv6".to_string(),
            other => other.to_string(),
        };
        let (port_min, port_max) = match protocol.as_str() {
            "all" => (None, None),
            "tcp" | "udp" => match (self.port_min, self.port_max) {
                (Some(min), None) => (Some(min), Some(min)),
                (None, Some(max)) => (Some(max), Some(max)),
                ports => ports,
            },
            "icmp" | "icmpv6" => (
                Some(self.port_min.unwrap_or(-1)),
                Some(self.port_max.unwrap_or(-1)),
            ),
            _ => match (self.port_min, self.port_max) {
                (None | Some(-1), None | Some(-1)) => (None, None),
                ports => ports,
            },
        };
        Rule {
            direction: self.direction,
            protocol,
            port_min,
            port_max,
            remote_prefix: self.remote_prefix.clone(),
        }
    }

    fn validate(&self) -> std::result::Result<(), String> {
        let rule = self.normalized();
        match rule.protocol.as_str() {
            "all" => {}
            "tcp" | "udp" => match (rule.port_min, rule.port_max) {
                (Some(min), Some(max)) if (0..=65535).contains(&min) && min <= max && max <= 65535 => {}
                _ => {
                    return Err(format!(
                        "{} rule needs 0 <= port_min <= port_max <= 65535",
                        rule.protocol
                    ));
                }
            },
            "icmp" | "icmpv6" => {}
            other if other.parse::<u8>().is_ok() => {}
            other => return Err(format!("unknown protocol '{}'", other)),
        }
        check_cidr("remote_prefix", &rule.remote_prefix)
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.direction, self.protocol)?;
        match (self.port_min, self.port_max) {
            (Some(min), Some(max)) if min == max => write!(f, " {}", min)?,
            (Some(min), Some(max)) => write!(f, " {}-{}", min, max)?,
            _ => {}
        }
        write!(f, " {}", self.remote_prefix)
    }
}

fn default_volume_type() -> String {
    "gp2".to_string()
}

const VOLUME_TYPES: [&str; 7] = ["standard", "gp2", "gp3", "io1", "io2", "st1", "sc1"];

/// Block volume attributes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeSpec {
    /// Size in GiB
    pub size: i32,
    #[serde(default = "default_volume_type")]
    pub volume_type: String,
    #[serde(default)]
    pub availability_zone: Option<String>,
    #[serde(default)]
    pub encrypted: bool,
}

impl VolumeSpec {
    fn validate(&self) -> std::result::Result<(), String> {
        if !(1..=16384).contains(&self.size) {
            return Err(format!("size {} GiB is outside 1..=16384", self.size));
        }
        if !VOLUME_TYPES.contains(&self.volume_type.as_str()) {
            return Err(format!(
                "volume_type '{}' is not one of {}",
                self.volume_type,
                VOLUME_TYPES.join(", ")
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vm(subnet_id: Option<&str>, subnet: Option<&str>) -> Descriptor {
        Descriptor::new(
            "test",
            "web-1",
            ResourceSpec::VirtualMachine(VirtualMachineSpec {
                flavor: "t2.small".to_string(),
                image: "ami-30876e5f".to_string(),
                key_name: "deploy".to_string(),
                key_value: None,
                subnet_id: subnet_id.map(String::from),
                subnet: subnet.map(String::from),
                user_data: String::new(),
                source_dest_check: true,
                security_groups: Vec::new(),
            }),
        )
    }

    #[test]
    fn test_vm_subnet_exclusive() {
        assert!(vm(Some("subnet-e91c4880"), None).validate().is_ok());
        assert!(vm(None, Some("frontend")).validate().is_ok());

        let both = vm(Some("subnet-e91c4880"), Some("frontend")).validate();
        assert!(matches!(both, Err(CloudError::InvalidDesiredState { .. })));
        assert!(both.unwrap_err().to_string().contains("both"));

        let neither = vm(None, None).validate();
        assert!(neither.unwrap_err().to_string().contains("neither"));
    }

    #[test]
    fn test_subnet_ref() {
        let desc = vm(None, Some("frontend"));
        let ResourceSpec::VirtualMachine(spec) = &desc.spec else {
            unreachable!()
        };
        assert_eq!(spec.subnet_ref(), Some(SubnetRef::Name("frontend")));
    }

    #[test]
    fn test_rule_normalization() {
        let rule = Rule {
            direction: Direction::Egress,
            protocol: "-1".to_string(),
            port_min: Some(0),
            port_max: Some(65535),
            remote_prefix: "0.0.0.0/0".to_string(),
        };
        let normalized = rule.normalized();
        assert_eq!(normalized.protocol, "all");
        assert_eq!(normalized.port_min, None);

        let single = Rule {
            direction: Direction::Ingress,
            protocol: "TCP".to_string(),
            port_min: Some(22),
            port_max: None,
            remote_prefix: "10.0.0.0/8".to_string(),
        }
        .normalized();
        assert_eq!(single.protocol, "tcp");
        assert_eq!(single.port_max, Some(22));
        assert_eq!(single.to_string(), "ingress tcp 22 10.0.0.0/8");
    }

    #[test]
    fn test_protocol_numbers_normalize_to_names() {
        let rule = |protocol: &str, port_min: Option<i32>, port_max: Option<i32>| Rule {
            direction: Direction::Ingress,
            protocol: protocol.to_string(),
            port_min,
            port_max,
            remote_prefix: "10.0.0.0/8".to_string(),
        };

        let numeric = rule("6", Some(22), Some(22));
        assert!(numeric.validate().is_ok());
        assert_eq!(numeric.normalized(), rule("tcp", Some(22), Some(22)).normalized());
        assert_eq!(rule("17", Some(53), None).normalized(), rule("udp", Some(53), Some(53)));

        // EC2 reports "any ICMP type" as -1/-1
        let icmp = rule("1", None, None).normalized();
        assert_eq!(icmp, rule("icmp", Some(-1), Some(-1)));
        assert_eq!(icmp.to_string(), "ingress icmp -1 10.0.0.0/8");

        // portless protocols compare equal whichever way the ports are left out
        assert_eq!(
            rule("50", Some(-1), Some(-1)).normalized(),
            rule("50", None, None).normalized()
        );
    }

    #[test]
    fn test_rule_validation() {
        let bad = Descriptor::new(
            "test",
            "web",
            ResourceSpec::SecurityGroup(SecurityGroupSpec {
                description: String::new(),
                vpc: "main".to_string(),
                rules: vec![Rule {
                    direction: Direction::Ingress,
                    protocol: "tcp".to_string(),
                    port_min: Some(443),
                    port_max: Some(80),
                    remote_prefix: "0.0.0.0/0".to_string(),
                }],
            }),
        );
        let err = bad.validate().unwrap_err().to_string();
        assert!(err.contains("rules[0]"), "{}", err);
    }

    #[test]
    fn test_load_balancer_name_rules() {
        let lb = |name: &str| {
            Descriptor::new(
                "test",
                name,
                ResourceSpec::LoadBalancer(LoadBalancerSpec {
                    listen_port: 80,
                    dest_port: 8080,
                    protocol: "HTTP".to_string(),
                    security_group: None,
                    instances: Vec::new(),
                    subnets: Vec::new(),
                }),
            )
        };
        assert!(lb("inmanta-demo").validate().is_ok());
        assert!(lb("under_score").validate().is_err());
    }

    #[test]
    fn test_deserialize_flattened_kind() {
        let yaml = r#"
kind: subnet
name: frontend
provider: test
cidr_block: 10.0.0.0/24
vpc: main
"#;
        let desc: Descriptor = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(desc.kind(), ResourceKind::Subnet);
        assert!(!desc.purged);
        let ResourceSpec::Subnet(subnet) = &desc.spec else {
            panic!("expected subnet");
        };
        assert!(!subnet.map_public_ip);
        assert_eq!(subnet.vpc, "main");
    }
}
