//! In-memory provider for tests
//!
//! Behaves like EC2/ELB where it matters to reconciliation: ids are assigned
//! by the provider, the `Name` tag anchors identity, terminated instances and
//! deleted volumes linger in listings, and dependent objects block deletes.
//! Mutating calls are recorded so tests can assert on call order.

use crate::descriptor::Rule;
use crate::error::{CloudError, Result};
use crate::provider::*;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Default)]
struct World {
    next_id: u64,
    instances: Vec<InstanceRecord>,
    user_data: Vec<(String, String)>,
    key_pairs: Vec<KeyPairRecord>,
    load_balancers: Vec<LoadBalancerRecord>,
    vpcs: Vec<VpcRecord>,
    subnets: Vec<SubnetRecord>,
    gateways: Vec<InternetGatewayRecord>,
    security_groups: Vec<SecurityGroupRecord>,
    volumes: Vec<VolumeRecord>,
    calls: Vec<String>,
    unavailable: bool,
    failing: HashSet<String>,
    tag_failures: u32,
    untagged_creates: bool,
}

impl World {
    fn new_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{:04}", prefix, self.next_id)
    }

    /// Name tag a create call ends up applying
    fn create_tag(&self, name: &str) -> Option<String> {
        (!self.untagged_creates).then(|| name.to_string())
    }

    fn created(&self, id: String) -> Created {
        Created {
            id,
            tagged: !self.untagged_creates,
        }
    }

    fn live_instance(&self, id: &str) -> Option<&InstanceRecord> {
        self.instances
            .iter()
            .find(|i| i.id == id && i.state.is_live())
    }

    fn group_ref(&self, id: &str) -> Result<GroupRef> {
        self.security_groups
            .iter()
            .find(|g| g.id == id)
            .map(|g| GroupRef {
                id: g.id.clone(),
                name: g.group_name.clone(),
            })
            .ok_or_else(|| api(format!("InvalidGroup.NotFound: {}", id)))
    }
}

fn api(message: impl Into<String>) -> CloudError {
    CloudError::ApiError(message.into())
}

fn select<T: Clone>(
    items: &[T],
    lookup: Lookup<'_>,
    key: impl Fn(&T) -> (&str, Option<&str>),
) -> Vec<T> {
    items
        .iter()
        .filter(|item| {
            let (id, name) = key(item);
            lookup.matches(id, name)
        })
        .cloned()
        .collect()
}

/// In-memory cloud; clones share the same world
#[derive(Clone, Default)]
pub struct MemoryCloud {
    world: Arc<Mutex<World>>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, World> {
        self.world.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn check(world: &World, op: &str) -> Result<()> {
        if world.unavailable {
            return Err(CloudError::ProviderUnavailable(format!(
                "{}: connection refused",
                op
            )));
        }
        if world.failing.contains(op) {
            return Err(api(format!("{}: UnauthorizedOperation (injected)", op)));
        }
        Ok(())
    }

    /// Enter a read-only call
    fn read(&self, op: &str) -> Result<MutexGuard<'_, World>> {
        let world = self.lock();
        Self::check(&world, op)?;
        Ok(world)
    }

    /// Enter a mutating call, recording it
    fn write(&self, op: &str, detail: impl AsRef<str>) -> Result<MutexGuard<'_, World>> {
        let mut world = self.lock();
        let detail = detail.as_ref();
        world.calls.push(if detail.is_empty() {
            op.to_string()
        } else {
            format!("{} {}", op, detail)
        });
        Self::check(&world, op)?;
        Ok(world)
    }

    /// Make every call fail as if the network were down
    pub fn set_unavailable(&self, unavailable: bool) {
        self.lock().unavailable = unavailable;
    }

    /// Make one operation (e.g. "launch_instance") fail with an API error
    pub fn fail_operation(&self, op: &str) {
        self.lock().failing.insert(op.to_string());
    }

    pub fn clear_failures(&self) {
        self.lock().failing.clear();
    }

    /// Fail the next `count` tag calls as not-yet-visible objects
    pub fn fail_next_tags(&self, count: u32) {
        self.lock().tag_failures = count;
    }

    /// Drop the tags sent along with create calls, as some emulated
    /// endpoints do
    pub fn ignore_create_tags(&self) {
        self.lock().untagged_creates = true;
    }

    /// Recorded mutating calls, oldest first
    pub fn calls(&self) -> Vec<String> {
        self.lock().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.lock().calls.clear();
    }

    /// Instances carrying this name tag, terminated ones included
    pub fn instances_named(&self, name: &str) -> Vec<InstanceRecord> {
        let world = self.lock();
        select(&world.instances, Lookup::Name(name), |i| {
            (&i.id, i.name.as_deref())
        })
    }

    pub fn live_instances_named(&self, name: &str) -> Vec<InstanceRecord> {
        self.instances_named(name)
            .into_iter()
            .filter(|i| i.state.is_live())
            .collect()
    }

    pub fn load_balancer(&self, name: &str) -> Option<LoadBalancerRecord> {
        self.lock()
            .load_balancers
            .iter()
            .find(|lb| lb.name == name)
            .cloned()
    }

    pub fn vpcs_named(&self, name: &str) -> Vec<VpcRecord> {
        let world = self.lock();
        select(&world.vpcs, Lookup::Name(name), |v| (&v.id, v.name.as_deref()))
    }

    pub fn subnets_named(&self, name: &str) -> Vec<SubnetRecord> {
        let world = self.lock();
        select(&world.subnets, Lookup::Name(name), |s| {
            (&s.id, s.name.as_deref())
        })
    }

    pub fn gateways_named(&self, name: &str) -> Vec<InternetGatewayRecord> {
        let world = self.lock();
        select(&world.gateways, Lookup::Name(name), |g| {
            (&g.id, g.name.as_deref())
        })
    }

    pub fn security_groups_named(&self, name: &str) -> Vec<SecurityGroupRecord> {
        let world = self.lock();
        select(&world.security_groups, Lookup::Name(name), |g| {
            (&g.id, g.name.as_deref())
        })
    }

    pub fn live_volumes_named(&self, name: &str) -> Vec<VolumeRecord> {
        let world = self.lock();
        select(&world.volumes, Lookup::Name(name), |v| {
            (&v.id, v.name.as_deref())
        })
        .into_iter()
        .filter(|v| v.state.is_live())
        .collect()
    }

    pub fn has_key_pair(&self, name: &str) -> bool {
        self.lock().key_pairs.iter().any(|k| k.name == name)
    }

    /// Add a running instance directly, bypassing the reconciler
    pub fn seed_instance(&self, name: &str) -> String {
        let mut world = self.lock();
        let id = world.new_id("i");
        world.instances.push(InstanceRecord {
            id: id.clone(),
            name: Some(name.to_string()),
            state: InstanceState::Running,
            flavor: "t2.micro".to_string(),
            image: "ami-seed".to_string(),
            key_name: None,
            subnet_id: None,
            source_dest_check: Some(true),
            security_groups: Vec::new(),
            private_ip: None,
            public_ip: None,
            mac_address: None,
            availability_zone: None,
        });
        id
    }

    pub fn seed_key_pair(&self, name: &str) {
        self.lock().key_pairs.push(KeyPairRecord {
            name: name.to_string(),
            fingerprint: None,
        });
    }

    pub fn seed_vpc(&self, name: &str, cidr_block: &str) -> String {
        let mut world = self.lock();
        let id = world.new_id("vpc");
        world.vpcs.push(VpcRecord {
            id: id.clone(),
            name: Some(name.to_string()),
            cidr_block: cidr_block.to_string(),
            instance_tenancy: "default".to_string(),
        });
        id
    }

    pub fn seed_subnet(&self, name: &str, vpc_id: &str, cidr_block: &str) -> String {
        let mut world = self.lock();
        let id = world.new_id("subnet");
        world.subnets.push(SubnetRecord {
            id: id.clone(),
            name: Some(name.to_string()),
            vpc_id: vpc_id.to_string(),
            cidr_block: cidr_block.to_string(),
            availability_zone: "eu-west-1a".to_string(),
            map_public_ip_on_launch: false,
        });
        id
    }

    pub fn seed_security_group(&self, name: &str, vpc_id: &str) -> String {
        let mut world = self.lock();
        let id = world.new_id("sg");
        world.security_groups.push(SecurityGroupRecord {
            id: id.clone(),
            name: Some(name.to_string()),
            group_name: name.to_string(),
            description: name.to_string(),
            vpc_id: Some(vpc_id.to_string()),
            rules: Vec::new(),
        });
        id
    }

    /// Set a group's rules verbatim, in whatever form the provider reports
    pub fn seed_rules(&self, group_id: &str, rules: Vec<Rule>) {
        if let Some(group) = self
            .lock()
            .security_groups
            .iter_mut()
            .find(|g| g.id == group_id)
        {
            group.rules = rules;
        }
    }

    /// Add a load balancer directly, bypassing the reconciler
    pub fn seed_load_balancer(&self, record: LoadBalancerRecord) {
        self.lock().load_balancers.push(record);
    }
}

#[async_trait]
impl Connector for MemoryCloud {
    async fn connect(&self, _config: &ProviderConfig) -> Result<Box<dyn ProviderClient>> {
        Self::check(&self.lock(), "connect")?;
        Ok(Box::new(self.clone()))
    }
}

#[async_trait]
impl ProviderClient for MemoryCloud {
    fn name(&self) -> &str {
        "memory"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        match self.read("check_auth") {
            Ok(_) => Ok(AuthStatus::ok("memory")),
            Err(e) => Ok(AuthStatus::failed(e.to_string())),
        }
    }

    async fn create_tags(&self, resource_id: &str, tags: &[(&str, &str)]) -> Result<()> {
        let mut world = self.write("create_tags", resource_id)?;
        if world.tag_failures > 0 {
            world.tag_failures -= 1;
            return Err(api(format!(
                "InvalidID: {} does not exist (not yet visible)",
                resource_id
            )));
        }
        let Some(name) = tags
            .iter()
            .find(|(key, _)| *key == NAME_TAG)
            .map(|(_, value)| Some(value.to_string()))
        else {
            return Ok(());
        };

        let w = &mut *world;
        let slot = w
            .instances
            .iter_mut()
            .find(|r| r.id == resource_id)
            .map(|r| &mut r.name)
            .or_else(|| w.vpcs.iter_mut().find(|r| r.id == resource_id).map(|r| &mut r.name))
            .or_else(|| w.subnets.iter_mut().find(|r| r.id == resource_id).map(|r| &mut r.name))
            .or_else(|| w.gateways.iter_mut().find(|r| r.id == resource_id).map(|r| &mut r.name))
            .or_else(|| {
                w.security_groups
                    .iter_mut()
                    .find(|r| r.id == resource_id)
                    .map(|r| &mut r.name)
            })
            .or_else(|| w.volumes.iter_mut().find(|r| r.id == resource_id).map(|r| &mut r.name));

        match slot {
            Some(slot) => {
                *slot = name;
                Ok(())
            }
            None => Err(api(format!("InvalidID: {} does not exist", resource_id))),
        }
    }

    async fn describe_instances(&self, lookup: Lookup<'_>) -> Result<Vec<InstanceRecord>> {
        let world = self.read("describe_instances")?;
        Ok(select(&world.instances, lookup, |i| (&i.id, i.name.as_deref())))
    }

    async fn instance_user_data(&self, instance_id: &str) -> Result<Option<String>> {
        let world = self.read("instance_user_data")?;
        Ok(world
            .user_data
            .iter()
            .find(|(id, _)| id == instance_id)
            .map(|(_, data)| data.clone()))
    }

    async fn launch_instance(&self, request: &LaunchRequest) -> Result<Created> {
        let mut world = self.write("launch_instance", &request.image)?;
        if !world.key_pairs.iter().any(|k| k.name == request.key_name) {
            return Err(api(format!(
                "InvalidKeyPair.NotFound: {}",
                request.key_name
            )));
        }
        let subnet = world
            .subnets
            .iter()
            .find(|s| s.id == request.subnet_id)
            .cloned()
            .ok_or_else(|| api(format!("InvalidSubnetID.NotFound: {}", request.subnet_id)))?;
        let groups = request
            .security_group_ids
            .iter()
            .map(|id| world.group_ref(id))
            .collect::<Result<Vec<_>>>()?;

        let id = world.new_id("i");
        let n = world.next_id;
        let name = world.create_tag(&request.name);
        world.instances.push(InstanceRecord {
            id: id.clone(),
            name,
            state: InstanceState::Pending,
            flavor: request.flavor.clone(),
            image: request.image.clone(),
            key_name: Some(request.key_name.clone()),
            subnet_id: Some(subnet.id.clone()),
            source_dest_check: Some(true),
            security_groups: groups,
            private_ip: Some(format!("10.0.0.{}", n % 250 + 4)),
            public_ip: subnet
                .map_public_ip_on_launch
                .then(|| format!("203.0.113.{}", n % 250 + 1)),
            mac_address: Some(format!("02:00:00:00:00:{:02x}", n % 256)),
            availability_zone: Some(subnet.availability_zone.clone()),
        });
        world.user_data.push((id.clone(), request.user_data.clone()));
        Ok(world.created(id))
    }

    async fn set_source_dest_check(&self, instance_id: &str, enabled: bool) -> Result<()> {
        let mut world = self.write("set_source_dest_check", format!("{} {}", instance_id, enabled))?;
        let instance = world
            .instances
            .iter_mut()
            .find(|i| i.id == instance_id)
            .ok_or_else(|| api(format!("InvalidInstanceID.NotFound: {}", instance_id)))?;
        instance.source_dest_check = Some(enabled);
        Ok(())
    }

    async fn set_instance_security_groups(&self, instance_id: &str, group_ids: &[String]) -> Result<()> {
        let mut world = self.write(
            "set_instance_security_groups",
            format!("{} {}", instance_id, group_ids.join(",")),
        )?;
        if group_ids.is_empty() {
            return Err(api("InvalidParameterValue: at least one group is required"));
        }
        let groups = group_ids
            .iter()
            .map(|id| world.group_ref(id))
            .collect::<Result<Vec<_>>>()?;
        let instance = world
            .instances
            .iter_mut()
            .find(|i| i.id == instance_id)
            .ok_or_else(|| api(format!("InvalidInstanceID.NotFound: {}", instance_id)))?;
        instance.security_groups = groups;
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        let mut world = self.write("terminate_instance", instance_id)?;
        let instance = world
            .instances
            .iter_mut()
            .find(|i| i.id == instance_id)
            .ok_or_else(|| api(format!("InvalidInstanceID.NotFound: {}", instance_id)))?;
        instance.state = InstanceState::Terminated;
        Ok(())
    }

    async fn describe_key_pair(&self, key_name: &str) -> Result<Option<KeyPairRecord>> {
        let world = self.read("describe_key_pair")?;
        Ok(world.key_pairs.iter().find(|k| k.name == key_name).cloned())
    }

    async fn import_key_pair(&self, key_name: &str, _public_key: &str) -> Result<()> {
        let mut world = self.write("import_key_pair", key_name)?;
        if world.key_pairs.iter().any(|k| k.name == key_name) {
            return Err(api(format!("InvalidKeyPair.Duplicate: {}", key_name)));
        }
        world.key_pairs.push(KeyPairRecord {
            name: key_name.to_string(),
            fingerprint: None,
        });
        Ok(())
    }

    async fn describe_load_balancers(&self, name: Option<&str>) -> Result<Vec<LoadBalancerRecord>> {
        let world = self.read("describe_load_balancers")?;
        Ok(world
            .load_balancers
            .iter()
            .filter(|lb| name.is_none_or(|n| lb.name == n))
            .cloned()
            .collect())
    }

    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest) -> Result<String> {
        let mut world = self.write("create_load_balancer", &request.name)?;
        if world.load_balancers.iter().any(|lb| lb.name == request.name) {
            return Err(api(format!("DuplicateLoadBalancerName: {}", request.name)));
        }
        for id in &request.security_group_ids {
            world.group_ref(id)?;
        }
        let dns_name = format!("{}-{}.elb.memory.internal", request.name, world.next_id);
        world.load_balancers.push(LoadBalancerRecord {
            name: request.name.clone(),
            dns_name: Some(dns_name.clone()),
            listeners: vec![request.listener.clone()],
            security_group_ids: request.security_group_ids.clone(),
            instance_ids: Vec::new(),
            subnet_ids: request.subnet_ids.clone(),
            availability_zones: if request.subnet_ids.is_empty() {
                request.availability_zones.clone()
            } else {
                Vec::new()
            },
        });
        Ok(dns_name)
    }

    async fn register_instances(&self, lb_name: &str, instance_ids: &[String]) -> Result<()> {
        let mut world = self.write(
            "register_instances",
            format!("{} {}", lb_name, instance_ids.join(",")),
        )?;
        for id in instance_ids {
            if world.live_instance(id).is_none() {
                return Err(api(format!("InvalidInstance: {}", id)));
            }
        }
        let lb = world
            .load_balancers
            .iter_mut()
            .find(|lb| lb.name == lb_name)
            .ok_or_else(|| api(format!("LoadBalancerNotFound: {}", lb_name)))?;
        for id in instance_ids {
            if !lb.instance_ids.contains(id) {
                lb.instance_ids.push(id.clone());
            }
        }
        Ok(())
    }

    async fn deregister_instances(&self, lb_name: &str, instance_ids: &[String]) -> Result<()> {
        let mut world = self.write(
            "deregister_instances",
            format!("{} {}", lb_name, instance_ids.join(",")),
        )?;
        let lb = world
            .load_balancers
            .iter_mut()
            .find(|lb| lb.name == lb_name)
            .ok_or_else(|| api(format!("LoadBalancerNotFound: {}", lb_name)))?;
        lb.instance_ids.retain(|id| !instance_ids.contains(id));
        Ok(())
    }

    async fn apply_security_groups(&self, lb_name: &str, group_ids: &[String]) -> Result<()> {
        let mut world = self.write(
            "apply_security_groups",
            format!("{} {}", lb_name, group_ids.join(",")),
        )?;
        for id in group_ids {
            world.group_ref(id)?;
        }
        let lb = world
            .load_balancers
            .iter_mut()
            .find(|lb| lb.name == lb_name)
            .ok_or_else(|| api(format!("LoadBalancerNotFound: {}", lb_name)))?;
        lb.security_group_ids = group_ids.to_vec();
        Ok(())
    }

    async fn create_listener(&self, lb_name: &str, listener: &Listener) -> Result<()> {
        let mut world = self.write("create_listener", format!("{} {}", lb_name, listener))?;
        let lb = world
            .load_balancers
            .iter_mut()
            .find(|lb| lb.name == lb_name)
            .ok_or_else(|| api(format!("LoadBalancerNotFound: {}", lb_name)))?;
        if lb
            .listeners
            .iter()
            .any(|l| l.listen_port == listener.listen_port)
        {
            return Err(api(format!(
                "DuplicateListener: port {} already in use",
                listener.listen_port
            )));
        }
        lb.listeners.push(listener.clone());
        Ok(())
    }

    async fn delete_listener(&self, lb_name: &str, listen_port: u16) -> Result<()> {
        let mut world = self.write("delete_listener", format!("{} {}", lb_name, listen_port))?;
        let lb = world
            .load_balancers
            .iter_mut()
            .find(|lb| lb.name == lb_name)
            .ok_or_else(|| api(format!("LoadBalancerNotFound: {}", lb_name)))?;
        lb.listeners.retain(|l| l.listen_port != listen_port);
        Ok(())
    }

    async fn delete_load_balancer(&self, lb_name: &str) -> Result<()> {
        let mut world = self.write("delete_load_balancer", lb_name)?;
        world.load_balancers.retain(|lb| lb.name != lb_name);
        Ok(())
    }

    async fn describe_vpcs(&self, lookup: Lookup<'_>) -> Result<Vec<VpcRecord>> {
        let world = self.read("describe_vpcs")?;
        Ok(select(&world.vpcs, lookup, |v| (&v.id, v.name.as_deref())))
    }

    async fn create_vpc(&self, name: &str, cidr_block: &str, instance_tenancy: &str) -> Result<Created> {
        let mut world = self.write("create_vpc", cidr_block)?;
        let id = world.new_id("vpc");
        let name = world.create_tag(name);
        world.vpcs.push(VpcRecord {
            id: id.clone(),
            name,
            cidr_block: cidr_block.to_string(),
            instance_tenancy: instance_tenancy.to_string(),
        });
        Ok(world.created(id))
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        let mut world = self.write("delete_vpc", vpc_id)?;
        if !world.vpcs.iter().any(|v| v.id == vpc_id) {
            return Err(api(format!("InvalidVpcID.NotFound: {}", vpc_id)));
        }
        let in_use = world.subnets.iter().any(|s| s.vpc_id == vpc_id)
            || world
                .gateways
                .iter()
                .any(|g| g.attached_vpc_ids.iter().any(|v| v == vpc_id))
            || world
                .security_groups
                .iter()
                .any(|g| g.vpc_id.as_deref() == Some(vpc_id));
        if in_use {
            return Err(api(format!(
                "DependencyViolation: vpc {} has dependencies",
                vpc_id
            )));
        }
        world.vpcs.retain(|v| v.id != vpc_id);
        Ok(())
    }

    async fn describe_subnets(&self, lookup: Lookup<'_>) -> Result<Vec<SubnetRecord>> {
        let world = self.read("describe_subnets")?;
        Ok(select(&world.subnets, lookup, |s| (&s.id, s.name.as_deref())))
    }

    async fn create_subnet(&self, request: &CreateSubnetRequest) -> Result<Created> {
        let mut world = self.write("create_subnet", &request.cidr_block)?;
        if !world.vpcs.iter().any(|v| v.id == request.vpc_id) {
            return Err(api(format!("InvalidVpcID.NotFound: {}", request.vpc_id)));
        }
        let id = world.new_id("subnet");
        let name = world.create_tag(&request.name);
        world.subnets.push(SubnetRecord {
            id: id.clone(),
            name,
            vpc_id: request.vpc_id.clone(),
            cidr_block: request.cidr_block.clone(),
            availability_zone: request.availability_zone.clone(),
            map_public_ip_on_launch: false,
        });
        Ok(world.created(id))
    }

    async fn set_map_public_ip(&self, subnet_id: &str, enabled: bool) -> Result<()> {
        let mut world = self.write("set_map_public_ip", format!("{} {}", subnet_id, enabled))?;
        let subnet = world
            .subnets
            .iter_mut()
            .find(|s| s.id == subnet_id)
            .ok_or_else(|| api(format!("InvalidSubnetID.NotFound: {}", subnet_id)))?;
        subnet.map_public_ip_on_launch = enabled;
        Ok(())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        let mut world = self.write("delete_subnet", subnet_id)?;
        if world
            .instances
            .iter()
            .any(|i| i.state.is_live() && i.subnet_id.as_deref() == Some(subnet_id))
        {
            return Err(api(format!(
                "DependencyViolation: subnet {} has instances",
                subnet_id
            )));
        }
        world.subnets.retain(|s| s.id != subnet_id);
        Ok(())
    }

    async fn describe_internet_gateways(&self, lookup: Lookup<'_>) -> Result<Vec<InternetGatewayRecord>> {
        let world = self.read("describe_internet_gateways")?;
        Ok(select(&world.gateways, lookup, |g| (&g.id, g.name.as_deref())))
    }

    async fn create_internet_gateway(&self, name: &str) -> Result<Created> {
        let mut world = self.write("create_internet_gateway", "")?;
        let id = world.new_id("igw");
        let name = world.create_tag(name);
        world.gateways.push(InternetGatewayRecord {
            id: id.clone(),
            name,
            attached_vpc_ids: Vec::new(),
        });
        Ok(world.created(id))
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let mut world = self.write(
            "attach_internet_gateway",
            format!("{} {}", gateway_id, vpc_id),
        )?;
        if !world.vpcs.iter().any(|v| v.id == vpc_id) {
            return Err(api(format!("InvalidVpcID.NotFound: {}", vpc_id)));
        }
        let gateway = world
            .gateways
            .iter_mut()
            .find(|g| g.id == gateway_id)
            .ok_or_else(|| api(format!("InvalidInternetGatewayID.NotFound: {}", gateway_id)))?;
        if !gateway.attached_vpc_ids.is_empty() {
            return Err(api(format!("Resource.AlreadyAssociated: {}", gateway_id)));
        }
        gateway.attached_vpc_ids.push(vpc_id.to_string());
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        let mut world = self.write(
            "detach_internet_gateway",
            format!("{} {}", gateway_id, vpc_id),
        )?;
        let gateway = world
            .gateways
            .iter_mut()
            .find(|g| g.id == gateway_id)
            .ok_or_else(|| api(format!("InvalidInternetGatewayID.NotFound: {}", gateway_id)))?;
        if !gateway.attached_vpc_ids.iter().any(|v| v == vpc_id) {
            return Err(api(format!("Gateway.NotAttached: {} {}", gateway_id, vpc_id)));
        }
        gateway.attached_vpc_ids.retain(|v| v != vpc_id);
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()> {
        let mut world = self.write("delete_internet_gateway", gateway_id)?;
        if world
            .gateways
            .iter()
            .any(|g| g.id == gateway_id && !g.attached_vpc_ids.is_empty())
        {
            return Err(api(format!(
                "DependencyViolation: gateway {} is attached",
                gateway_id
            )));
        }
        world.gateways.retain(|g| g.id != gateway_id);
        Ok(())
    }

    async fn describe_security_groups(&self, lookup: Lookup<'_>) -> Result<Vec<SecurityGroupRecord>> {
        let world = self.read("describe_security_groups")?;
        Ok(select(&world.security_groups, lookup, |g| {
            (&g.id, g.name.as_deref())
        }))
    }

    async fn create_security_group(&self, request: &CreateSecurityGroupRequest) -> Result<Created> {
        let mut world = self.write("create_security_group", &request.group_name)?;
        if world.security_groups.iter().any(|g| {
            g.group_name == request.group_name && g.vpc_id.as_deref() == Some(&request.vpc_id)
        }) {
            return Err(api(format!("InvalidGroup.Duplicate: {}", request.group_name)));
        }
        if !world.vpcs.iter().any(|v| v.id == request.vpc_id) {
            return Err(api(format!("InvalidVpcID.NotFound: {}", request.vpc_id)));
        }
        let id = world.new_id("sg");
        let name = world.create_tag(&request.name);
        world.security_groups.push(SecurityGroupRecord {
            id: id.clone(),
            name,
            group_name: request.group_name.clone(),
            description: request.description.clone(),
            vpc_id: Some(request.vpc_id.clone()),
            rules: Vec::new(),
        });
        Ok(world.created(id))
    }

    async fn authorize_rules(&self, group_id: &str, rules: &[Rule]) -> Result<()> {
        let mut world = self.write("authorize_rules", format!("{} {}", group_id, rules.len()))?;
        let group = world
            .security_groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| api(format!("InvalidGroup.NotFound: {}", group_id)))?;
        for rule in rules {
            let rule = rule.normalized();
            if group.rules.contains(&rule) {
                return Err(api(format!("InvalidPermission.Duplicate: {}", rule)));
            }
            group.rules.push(rule);
        }
        Ok(())
    }

    async fn revoke_rules(&self, group_id: &str, rules: &[Rule]) -> Result<()> {
        let mut world = self.write("revoke_rules", format!("{} {}", group_id, rules.len()))?;
        let group = world
            .security_groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| api(format!("InvalidGroup.NotFound: {}", group_id)))?;
        for rule in rules {
            let rule = rule.normalized();
            let before = group.rules.len();
            group.rules.retain(|r| *r != rule);
            if group.rules.len() == before {
                return Err(api(format!("InvalidPermission.NotFound: {}", rule)));
            }
        }
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        let mut world = self.write("delete_security_group", group_id)?;
        let in_use = world
            .instances
            .iter()
            .any(|i| i.state.is_live() && i.security_groups.iter().any(|g| g.id == group_id));
        if in_use {
            return Err(api(format!(
                "DependencyViolation: group {} is in use",
                group_id
            )));
        }
        world.security_groups.retain(|g| g.id != group_id);
        Ok(())
    }

    async fn describe_volumes(&self, lookup: Lookup<'_>) -> Result<Vec<VolumeRecord>> {
        let world = self.read("describe_volumes")?;
        Ok(select(&world.volumes, lookup, |v| (&v.id, v.name.as_deref())))
    }

    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<Created> {
        let mut world = self.write("create_volume", format!("{}GiB", request.size))?;
        let id = world.new_id("vol");
        let name = world.create_tag(&request.name);
        world.volumes.push(VolumeRecord {
            id: id.clone(),
            name,
            size: request.size,
            volume_type: request.volume_type.clone(),
            availability_zone: request.availability_zone.clone(),
            encrypted: request.encrypted,
            state: VolumeState::Available,
        });
        Ok(world.created(id))
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        let mut world = self.write("delete_volume", volume_id)?;
        let volume = world
            .volumes
            .iter_mut()
            .find(|v| v.id == volume_id)
            .ok_or_else(|| api(format!("InvalidVolume.NotFound: {}", volume_id)))?;
        volume.state = VolumeState::Deleted;
        Ok(())
    }
}
