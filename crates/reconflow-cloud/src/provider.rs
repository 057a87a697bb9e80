//! Provider client abstraction
//!
//! Every cloud backend (AWS, the in-memory test cloud) implements
//! [`ProviderClient`]: the minimal list/create/update/delete/tag operations the
//! reconciliation core needs, per resource kind. Records returned here are the
//! provider's view; handlers turn them into typed observed state.

use crate::descriptor::Rule;
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Tag key anchoring a provider object to its declared name
pub const NAME_TAG: &str = "Name";

/// Selects which provider objects a describe call returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup<'a> {
    /// Objects whose `Name` tag equals the value
    Name(&'a str),
    /// The object with this provider id
    Id(&'a str),
    All,
}

impl Lookup<'_> {
    /// Whether a record with this id and name tag is selected
    pub fn matches(&self, id: &str, name: Option<&str>) -> bool {
        match self {
            Lookup::Name(wanted) => name == Some(*wanted),
            Lookup::Id(wanted) => id == *wanted,
            Lookup::All => true,
        }
    }
}

/// Cloud provider client for one session
///
/// Implementations perform exactly one provider call per method and never
/// retry internally except where the provider's own SDK does so.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    /// Provider name (e.g., "aws", "memory")
    fn name(&self) -> &str;

    /// Check that the session can reach the provider with valid credentials
    async fn check_auth(&self) -> Result<AuthStatus>;

    /// Attach tags to any taggable provider object
    ///
    /// Create calls tag in the same request; this backfills objects the
    /// provider created without their tag.
    async fn create_tags(&self, resource_id: &str, tags: &[(&str, &str)]) -> Result<()>;

    // Virtual machines
    async fn describe_instances(&self, lookup: Lookup<'_>) -> Result<Vec<InstanceRecord>>;
    async fn instance_user_data(&self, instance_id: &str) -> Result<Option<String>>;
    async fn launch_instance(&self, request: &LaunchRequest) -> Result<Created>;
    async fn set_source_dest_check(&self, instance_id: &str, enabled: bool) -> Result<()>;
    async fn set_instance_security_groups(&self, instance_id: &str, group_ids: &[String]) -> Result<()>;
    async fn terminate_instance(&self, instance_id: &str) -> Result<()>;
    async fn describe_key_pair(&self, key_name: &str) -> Result<Option<KeyPairRecord>>;
    async fn import_key_pair(&self, key_name: &str, public_key: &str) -> Result<()>;

    // Load balancers, identified by their name
    async fn describe_load_balancers(&self, name: Option<&str>) -> Result<Vec<LoadBalancerRecord>>;
    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest) -> Result<String>;
    async fn register_instances(&self, lb_name: &str, instance_ids: &[String]) -> Result<()>;
    async fn deregister_instances(&self, lb_name: &str, instance_ids: &[String]) -> Result<()>;
    async fn apply_security_groups(&self, lb_name: &str, group_ids: &[String]) -> Result<()>;
    async fn create_listener(&self, lb_name: &str, listener: &Listener) -> Result<()>;
    async fn delete_listener(&self, lb_name: &str, listen_port: u16) -> Result<()>;
    async fn delete_load_balancer(&self, lb_name: &str) -> Result<()>;

    // VPCs
    async fn describe_vpcs(&self, lookup: Lookup<'_>) -> Result<Vec<VpcRecord>>;
    async fn create_vpc(&self, name: &str, cidr_block: &str, instance_tenancy: &str) -> Result<Created>;
    async fn delete_vpc(&self, vpc_id: &str) -> Result<()>;

    // Subnets
    async fn describe_subnets(&self, lookup: Lookup<'_>) -> Result<Vec<SubnetRecord>>;
    async fn create_subnet(&self, request: &CreateSubnetRequest) -> Result<Created>;
    async fn set_map_public_ip(&self, subnet_id: &str, enabled: bool) -> Result<()>;
    async fn delete_subnet(&self, subnet_id: &str) -> Result<()>;

    // Internet gateways
    async fn describe_internet_gateways(&self, lookup: Lookup<'_>) -> Result<Vec<InternetGatewayRecord>>;
    async fn create_internet_gateway(&self, name: &str) -> Result<Created>;
    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;
    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()>;
    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()>;

    // Security groups
    async fn describe_security_groups(&self, lookup: Lookup<'_>) -> Result<Vec<SecurityGroupRecord>>;
    /// Create a group with no rules at all (provider default rules removed)
    async fn create_security_group(&self, request: &CreateSecurityGroupRequest) -> Result<Created>;
    async fn authorize_rules(&self, group_id: &str, rules: &[Rule]) -> Result<()>;
    async fn revoke_rules(&self, group_id: &str, rules: &[Rule]) -> Result<()>;
    async fn delete_security_group(&self, group_id: &str) -> Result<()>;

    // Volumes
    async fn describe_volumes(&self, lookup: Lookup<'_>) -> Result<Vec<VolumeRecord>>;
    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<Created>;
    async fn delete_volume(&self, volume_id: &str) -> Result<()>;
}

/// A newly created provider object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub id: String,
    /// Whether the `Name` tag sent with the create call came back applied
    pub tagged: bool,
}

/// Opens provider sessions
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, config: &ProviderConfig) -> Result<Box<dyn ProviderClient>>;
}

/// A provider session scoped to one reconciliation pass
///
/// The client handle is released when the session is dropped, whatever the
/// outcome of the pass.
pub struct Session {
    client: Box<dyn ProviderClient>,
    config: ProviderConfig,
}

impl Session {
    pub async fn open(connector: &dyn Connector, config: &ProviderConfig) -> Result<Self> {
        let client = connector.connect(config).await?;
        tracing::debug!("Opened {} session for scope {}", client.name(), config.name);
        Ok(Self {
            client,
            config: config.clone(),
        })
    }

    pub fn client(&self) -> &dyn ProviderClient {
        self.client.as_ref()
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        tracing::debug!("Released session for scope {}", self.config.name);
    }
}

/// Connection settings for one provider scope
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    /// Scope name referenced by descriptors
    pub name: String,
    pub region: String,
    /// Zone suffix (e.g. "a") or a full zone name
    #[serde(default = "default_zone")]
    pub availability_zone: String,
    /// Endpoint override, e.g. for a local emulator
    #[serde(default)]
    pub endpoint_url: Option<String>,
}

fn default_zone() -> String {
    "a".to_string()
}

impl ProviderConfig {
    pub fn new(name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            region: region.into(),
            availability_zone: default_zone(),
            endpoint_url: None,
        }
    }

    /// Resolve a zone setting to a full zone name
    ///
    /// `None` means the provider's default zone; a single letter is a suffix
    /// of the region.
    pub fn zone(&self, zone: Option<&str>) -> String {
        let zone = zone.unwrap_or(&self.availability_zone);
        if zone.len() == 1 {
            format!("{}{}", self.region, zone)
        } else {
            zone.to_string()
        }
    }
}

/// Authentication status
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthStatus {
    /// Whether authentication is valid
    pub authenticated: bool,

    /// Account/user information if available
    pub account_info: Option<String>,

    /// Error message if not authenticated
    pub error: Option<String>,
}

impl AuthStatus {
    pub fn ok(account_info: impl Into<String>) -> Self {
        Self {
            authenticated: true,
            account_info: Some(account_info.into()),
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            authenticated: false,
            account_info: None,
            error: Some(error.into()),
        }
    }
}

/// Retry configuration for provider operations subject to eventual consistency
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of attempts
    pub max_attempts: u32,

    /// Initial delay between retries
    pub initial_delay: Duration,

    /// Maximum delay between retries
    pub max_delay: Duration,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Retry without sleeping in between
    pub fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Delay before retry number `attempt` (0-based), capped at `max_delay`
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = self.backoff_multiplier.powi(attempt as i32);
        let secs = (self.initial_delay.as_secs_f64() * factor).min(self.max_delay.as_secs_f64());
        Duration::from_secs_f64(secs)
    }
}

/// Lifecycle state of a virtual machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum InstanceState {
    Pending,
    Running,
    Stopping,
    Stopped,
    ShuttingDown,
    Terminated,
    Unknown,
}

impl InstanceState {
    /// Terminated and shutting-down instances count as absent
    pub fn is_live(&self) -> bool {
        !matches!(self, InstanceState::ShuttingDown | InstanceState::Terminated)
    }
}

/// Security group reference as reported on an instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    pub id: String,
    /// Value of the `Name` tag
    pub name: Option<String>,
    pub state: InstanceState,
    pub flavor: String,
    pub image: String,
    pub key_name: Option<String>,
    pub subnet_id: Option<String>,
    pub source_dest_check: Option<bool>,
    pub security_groups: Vec<GroupRef>,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub mac_address: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LaunchRequest {
    /// `Name` tag value
    pub name: String,
    pub flavor: String,
    pub image: String,
    pub key_name: String,
    pub subnet_id: String,
    pub user_data: String,
    pub security_group_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyPairRecord {
    pub name: String,
    pub fingerprint: Option<String>,
}

/// Load balancer listener
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Listener {
    pub protocol: String,
    pub listen_port: u16,
    pub dest_port: u16,
}

impl Listener {
    pub fn new(protocol: impl Into<String>, listen_port: u16, dest_port: u16) -> Self {
        Self {
            protocol: protocol.into().to_ascii_uppercase(),
            listen_port,
            dest_port,
        }
    }

    /// Protocols compare case-insensitively
    pub fn same_as(&self, other: &Listener) -> bool {
        self.protocol.eq_ignore_ascii_case(&other.protocol)
            && self.listen_port == other.listen_port
            && self.dest_port == other.dest_port
    }
}

impl fmt::Display for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}->{}",
            self.protocol.to_ascii_uppercase(),
            self.listen_port,
            self.dest_port
        )
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadBalancerRecord {
    pub name: String,
    pub dns_name: Option<String>,
    pub listeners: Vec<Listener>,
    pub security_group_ids: Vec<String>,
    pub instance_ids: Vec<String>,
    pub subnet_ids: Vec<String>,
    pub availability_zones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateLoadBalancerRequest {
    pub name: String,
    pub listener: Listener,
    pub security_group_ids: Vec<String>,
    pub subnet_ids: Vec<String>,
    /// Used only when `subnet_ids` is empty
    pub availability_zones: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VpcRecord {
    pub id: String,
    pub name: Option<String>,
    pub cidr_block: String,
    pub instance_tenancy: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubnetRecord {
    pub id: String,
    pub name: Option<String>,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
    pub map_public_ip_on_launch: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSubnetRequest {
    pub name: String,
    pub vpc_id: String,
    pub cidr_block: String,
    pub availability_zone: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InternetGatewayRecord {
    pub id: String,
    pub name: Option<String>,
    pub attached_vpc_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityGroupRecord {
    pub id: String,
    pub name: Option<String>,
    pub group_name: String,
    pub description: String,
    pub vpc_id: Option<String>,
    /// Flattened: one rule per protocol/port/prefix combination
    pub rules: Vec<Rule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateSecurityGroupRequest {
    /// `Name` tag value
    pub name: String,
    pub group_name: String,
    pub description: String,
    pub vpc_id: String,
}

/// Lifecycle state of a block volume
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum VolumeState {
    Creating,
    Available,
    InUse,
    Deleting,
    Deleted,
    Error,
    Unknown,
}

impl VolumeState {
    pub fn is_live(&self) -> bool {
        !matches!(self, VolumeState::Deleting | VolumeState::Deleted)
    }
}

impl fmt::Display for VolumeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VolumeState::Creating => "creating",
            VolumeState::Available => "available",
            VolumeState::InUse => "in-use",
            VolumeState::Deleting => "deleting",
            VolumeState::Deleted => "deleted",
            VolumeState::Error => "error",
            VolumeState::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VolumeRecord {
    pub id: String,
    pub name: Option<String>,
    pub size: i32,
    pub volume_type: String,
    pub availability_zone: String,
    pub encrypted: bool,
    pub state: VolumeState,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreateVolumeRequest {
    pub name: String,
    pub size: i32,
    pub volume_type: String,
    pub availability_zone: String,
    pub encrypted: bool,
}
