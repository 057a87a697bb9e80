//! Conversions between SDK shapes and provider records

use crate::error::AwsError;
use aws_sdk_ec2::types as ec2;
use aws_sdk_elasticloadbalancing::types as elb;
use reconflow_cloud::provider::{
    GroupRef, InstanceRecord, InstanceState, InternetGatewayRecord, Listener, LoadBalancerRecord,
    NAME_TAG, SecurityGroupRecord, SubnetRecord, VolumeRecord, VolumeState, VpcRecord,
};
use reconflow_cloud::{Direction, Rule};

pub(crate) fn name_tag(tags: &[ec2::Tag]) -> Option<String> {
    tags.iter()
        .find(|tag| tag.key() == Some(NAME_TAG))
        .and_then(|tag| tag.value())
        .map(str::to_string)
}

/// Name tag sent with a create call
pub(crate) fn name_tag_spec(resource_type: ec2::ResourceType, name: &str) -> ec2::TagSpecification {
    ec2::TagSpecification::builder()
        .resource_type(resource_type)
        .tags(ec2::Tag::builder().key(NAME_TAG).value(name).build())
        .build()
}

/// Whether a create response echoes the name tag back
pub(crate) fn has_name(tags: &[ec2::Tag], name: &str) -> bool {
    name_tag(tags).as_deref() == Some(name)
}

pub(crate) fn name_filter(name: &str) -> ec2::Filter {
    ec2::Filter::builder()
        .name(format!("tag:{}", NAME_TAG))
        .values(name)
        .build()
}

fn instance_state(state: Option<&ec2::InstanceState>) -> InstanceState {
    match state.and_then(|s| s.name()) {
        Some(ec2::InstanceStateName::Pending) => InstanceState::Pending,
        Some(ec2::InstanceStateName::Running) => InstanceState::Running,
        Some(ec2::InstanceStateName::Stopping) => InstanceState::Stopping,
        Some(ec2::InstanceStateName::Stopped) => InstanceState::Stopped,
        Some(ec2::InstanceStateName::ShuttingDown) => InstanceState::ShuttingDown,
        Some(ec2::InstanceStateName::Terminated) => InstanceState::Terminated,
        _ => InstanceState::Unknown,
    }
}

pub(crate) fn instance_record(instance: &ec2::Instance) -> Option<InstanceRecord> {
    Some(InstanceRecord {
        id: instance.instance_id()?.to_string(),
        name: name_tag(instance.tags()),
        state: instance_state(instance.state()),
        flavor: instance
            .instance_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        image: instance.image_id().unwrap_or_default().to_string(),
        key_name: instance.key_name().map(str::to_string),
        subnet_id: instance.subnet_id().map(str::to_string),
        source_dest_check: instance.source_dest_check(),
        security_groups: instance
            .security_groups()
            .iter()
            .filter_map(|group| {
                Some(GroupRef {
                    id: group.group_id()?.to_string(),
                    name: group.group_name().unwrap_or_default().to_string(),
                })
            })
            .collect(),
        private_ip: instance.private_ip_address().map(str::to_string),
        public_ip: instance.public_ip_address().map(str::to_string),
        mac_address: instance
            .network_interfaces()
            .iter()
            .find_map(|eni| eni.mac_address())
            .map(str::to_string),
        availability_zone: instance
            .placement()
            .and_then(|p| p.availability_zone())
            .map(str::to_string),
    })
}

pub(crate) fn vpc_record(vpc: &ec2::Vpc) -> Option<VpcRecord> {
    Some(VpcRecord {
        id: vpc.vpc_id()?.to_string(),
        name: name_tag(vpc.tags()),
        cidr_block: vpc.cidr_block().unwrap_or_default().to_string(),
        instance_tenancy: vpc
            .instance_tenancy()
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| "default".to_string()),
    })
}

pub(crate) fn subnet_record(subnet: &ec2::Subnet) -> Option<SubnetRecord> {
    Some(SubnetRecord {
        id: subnet.subnet_id()?.to_string(),
        name: name_tag(subnet.tags()),
        vpc_id: subnet.vpc_id().unwrap_or_default().to_string(),
        cidr_block: subnet.cidr_block().unwrap_or_default().to_string(),
        availability_zone: subnet.availability_zone().unwrap_or_default().to_string(),
        map_public_ip_on_launch: subnet.map_public_ip_on_launch().unwrap_or(false),
    })
}

pub(crate) fn gateway_record(gateway: &ec2::InternetGateway) -> Option<InternetGatewayRecord> {
    Some(InternetGatewayRecord {
        id: gateway.internet_gateway_id()?.to_string(),
        name: name_tag(gateway.tags()),
        attached_vpc_ids: gateway
            .attachments()
            .iter()
            .filter_map(|a| a.vpc_id())
            .map(str::to_string)
            .collect(),
    })
}

pub(crate) fn security_group_record(group: &ec2::SecurityGroup) -> Option<SecurityGroupRecord> {
    let mut rules = rules_from_permissions(Direction::Ingress, group.ip_permissions());
    rules.extend(rules_from_permissions(
        Direction::Egress,
        group.ip_permissions_egress(),
    ));
    Some(SecurityGroupRecord {
        id: group.group_id()?.to_string(),
        name: name_tag(group.tags()),
        group_name: group.group_name().unwrap_or_default().to_string(),
        description: group.description().unwrap_or_default().to_string(),
        vpc_id: group.vpc_id().map(str::to_string),
        rules,
    })
}

fn volume_state(state: Option<&ec2::VolumeState>) -> VolumeState {
    match state {
        Some(ec2::VolumeState::Creating) => VolumeState::Creating,
        Some(ec2::VolumeState::Available) => VolumeState::Available,
        Some(ec2::VolumeState::InUse) => VolumeState::InUse,
        Some(ec2::VolumeState::Deleting) => VolumeState::Deleting,
        Some(ec2::VolumeState::Deleted) => VolumeState::Deleted,
        Some(ec2::VolumeState::Error) => VolumeState::Error,
        _ => VolumeState::Unknown,
    }
}

pub(crate) fn volume_record(volume: &ec2::Volume) -> Option<VolumeRecord> {
    Some(VolumeRecord {
        id: volume.volume_id()?.to_string(),
        name: name_tag(volume.tags()),
        size: volume.size().unwrap_or_default(),
        volume_type: volume
            .volume_type()
            .map(|t| t.as_str().to_string())
            .unwrap_or_default(),
        availability_zone: volume.availability_zone().unwrap_or_default().to_string(),
        encrypted: volume.encrypted().unwrap_or(false),
        state: volume_state(volume.state()),
    })
}

/// One rule per permission and address range
pub(crate) fn rules_from_permissions(direction: Direction, permissions: &[ec2::IpPermission]) -> Vec<Rule> {
    let mut rules = Vec::new();
    for permission in permissions {
        let protocol = permission.ip_protocol().unwrap_or("-1").to_string();
        let prefixes = permission
            .ip_ranges()
            .iter()
            .filter_map(|r| r.cidr_ip())
            .chain(permission.ipv6_ranges().iter().filter_map(|r| r.cidr_ipv6()));
        for prefix in prefixes {
            rules.push(
                Rule {
                    direction,
                    protocol: protocol.clone(),
                    port_min: permission.from_port(),
                    port_max: permission.to_port(),
                    remote_prefix: prefix.to_string(),
                }
                .normalized(),
            );
        }
    }
    rules
}

pub(crate) fn permission_for(rule: &Rule) -> ec2::IpPermission {
    let rule = rule.normalized();
    let mut permission = ec2::IpPermission::builder();
    if rule.protocol == "all" {
        permission = permission.ip_protocol("-1");
    } else {
        permission = permission
            .ip_protocol(&rule.protocol)
            .set_from_port(rule.port_min)
            .set_to_port(rule.port_max);
    }
    if rule.remote_prefix.contains(':') {
        permission = permission.ipv6_ranges(
            ec2::Ipv6Range::builder()
                .cidr_ipv6(&rule.remote_prefix)
                .build(),
        );
    } else {
        permission = permission.ip_ranges(ec2::IpRange::builder().cidr_ip(&rule.remote_prefix).build());
    }
    permission.build()
}

/// Split rules into (ingress, egress) permission lists
pub(crate) fn permissions_by_direction(rules: &[Rule]) -> (Vec<ec2::IpPermission>, Vec<ec2::IpPermission>) {
    let (ingress, egress): (Vec<&Rule>, Vec<&Rule>) = rules
        .iter()
        .partition(|rule| rule.direction == Direction::Ingress);
    (
        ingress.into_iter().map(permission_for).collect(),
        egress.into_iter().map(permission_for).collect(),
    )
}

pub(crate) fn listener_to_sdk(listener: &Listener) -> Result<elb::Listener, AwsError> {
    elb::Listener::builder()
        .protocol(listener.protocol.to_ascii_uppercase())
        .load_balancer_port(i32::from(listener.listen_port))
        .instance_port(i32::from(listener.dest_port))
        .build()
        .map_err(|e| AwsError::InvalidListener(format!("{}: {}", listener, e)))
}

fn listener_from_sdk(listener: &elb::Listener) -> Option<Listener> {
    Some(Listener::new(
        listener.protocol(),
        u16::try_from(listener.load_balancer_port()).ok()?,
        u16::try_from(listener.instance_port()).ok()?,
    ))
}

pub(crate) fn load_balancer_record(lb: &elb::LoadBalancerDescription) -> Option<LoadBalancerRecord> {
    Some(LoadBalancerRecord {
        name: lb.load_balancer_name()?.to_string(),
        dns_name: lb.dns_name().map(str::to_string),
        listeners: lb
            .listener_descriptions()
            .iter()
            .filter_map(|d| d.listener())
            .filter_map(listener_from_sdk)
            .collect(),
        security_group_ids: lb.security_groups().to_vec(),
        instance_ids: lb
            .instances()
            .iter()
            .filter_map(|i| i.instance_id())
            .map(str::to_string)
            .collect(),
        subnet_ids: lb.subnets().to_vec(),
        availability_zones: lb.availability_zones().to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tag(key: &str, value: &str) -> ec2::Tag {
        ec2::Tag::builder().key(key).value(value).build()
    }

    #[test]
    fn test_instance_record() {
        let instance = ec2::Instance::builder()
            .instance_id("i-0123")
            .state(
                ec2::InstanceState::builder()
                    .name(ec2::InstanceStateName::ShuttingDown)
                    .build(),
            )
            .instance_type(ec2::InstanceType::T2Micro)
            .image_id("ami-30876e5f")
            .subnet_id("subnet-e91c4880")
            .source_dest_check(false)
            .tags(tag("env", "dev"))
            .tags(tag("Name", "web-1"))
            .security_groups(
                ec2::GroupIdentifier::builder()
                    .group_id("sg-1")
                    .group_name("web")
                    .build(),
            )
            .placement(
                ec2::Placement::builder()
                    .availability_zone("eu-west-1a")
                    .build(),
            )
            .build();

        let record = instance_record(&instance).unwrap();
        assert_eq!(record.name.as_deref(), Some("web-1"));
        assert_eq!(record.flavor, "t2.micro");
        assert_eq!(record.state, InstanceState::ShuttingDown);
        assert!(!record.state.is_live());
        assert_eq!(record.source_dest_check, Some(false));
        assert_eq!(record.security_groups[0].name, "web");
        assert_eq!(record.availability_zone.as_deref(), Some("eu-west-1a"));
    }

    #[test]
    fn test_instance_without_id_is_skipped() {
        assert!(instance_record(&ec2::Instance::builder().build()).is_none());
    }

    #[test]
    fn test_permissions_flatten_to_rules() {
        let permission = ec2::IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(22)
            .to_port(22)
            .ip_ranges(ec2::IpRange::builder().cidr_ip("10.0.0.0/8").build())
            .ip_ranges(ec2::IpRange::builder().cidr_ip("192.168.0.0/16").build())
            .build();
        let everything = ec2::IpPermission::builder()
            .ip_protocol("-1")
            .ipv6_ranges(ec2::Ipv6Range::builder().cidr_ipv6("::/0").build())
            .build();

        let rules = rules_from_permissions(Direction::Egress, &[permission, everything]);
        assert_eq!(rules.len(), 3);
        assert_eq!(rules[1].remote_prefix, "192.168.0.0/16");
        assert_eq!(rules[2].protocol, "all");
        assert_eq!(rules[2].port_min, None);
        assert!(rules.iter().all(|r| r.direction == Direction::Egress));
    }

    #[test]
    fn test_rule_to_permission() {
        let rule = Rule {
            direction: Direction::Ingress,
            protocol: "all".to_string(),
            port_min: Some(0),
            port_max: None,
            remote_prefix: "0.0.0.0/0".to_string(),
        };
        let permission = permission_for(&rule);
        assert_eq!(permission.ip_protocol(), Some("-1"));
        assert_eq!(permission.from_port(), None);
        assert_eq!(permission.ip_ranges()[0].cidr_ip(), Some("0.0.0.0/0"));

        let (ingress, egress) = permissions_by_direction(&[rule]);
        assert_eq!(ingress.len(), 1);
        assert!(egress.is_empty());
    }

    #[test]
    fn test_reported_rules_match_declared_spellings() {
        let declared = |protocol: &str, port: Option<i32>| Rule {
            direction: Direction::Ingress,
            protocol: protocol.to_string(),
            port_min: port,
            port_max: port,
            remote_prefix: "10.0.0.0/8".to_string(),
        };
        let ssh = ec2::IpPermission::builder()
            .ip_protocol("tcp")
            .from_port(22)
            .to_port(22)
            .ip_ranges(ec2::IpRange::builder().cidr_ip("10.0.0.0/8").build())
            .build();
        let ping = ec2::IpPermission::builder()
            .ip_protocol("icmp")
            .from_port(-1)
            .to_port(-1)
            .ip_ranges(ec2::IpRange::builder().cidr_ip("10.0.0.0/8").build())
            .build();

        let read = rules_from_permissions(Direction::Ingress, &[ssh, ping]);
        assert_eq!(read[0], declared("6", Some(22)).normalized());
        assert_eq!(read[1], declared("1", None).normalized());

        let sent = permission_for(&declared("1", None));
        assert_eq!(sent.ip_protocol(), Some("icmp"));
        assert_eq!(sent.from_port(), Some(-1));
    }

    #[test]
    fn test_name_tag_sent_on_create() {
        let spec = name_tag_spec(ec2::ResourceType::Instance, "web-1");
        assert_eq!(spec.resource_type(), Some(&ec2::ResourceType::Instance));
        assert!(has_name(spec.tags(), "web-1"));
        assert!(!has_name(&[tag("env", "dev")], "web-1"));
    }

    #[test]
    fn test_load_balancer_record() {
        let listener = listener_to_sdk(&Listener::new("http", 80, 8080)).unwrap();
        let lb = elb::LoadBalancerDescription::builder()
            .load_balancer_name("demo-lb")
            .dns_name("demo-lb-1.eu-west-1.elb.amazonaws.com")
            .listener_descriptions(elb::ListenerDescription::builder().listener(listener).build())
            .instances(elb::Instance::builder().instance_id("i-1").build())
            .security_groups("sg-1")
            .subnets("subnet-1")
            .build();

        let record = load_balancer_record(&lb).unwrap();
        assert_eq!(record.listeners[0].to_string(), "HTTP:80->8080");
        assert_eq!(record.instance_ids, vec!["i-1".to_string()]);
        assert_eq!(record.subnet_ids, vec!["subnet-1".to_string()]);
    }

    #[test]
    fn test_volume_state_mapping() {
        let volume = ec2::Volume::builder()
            .volume_id("vol-1")
            .size(10)
            .volume_type(ec2::VolumeType::Gp3)
            .state(ec2::VolumeState::InUse)
            .tags(tag("Name", "data"))
            .build();
        let record = volume_record(&volume).unwrap();
        assert_eq!(record.state, VolumeState::InUse);
        assert_eq!(record.volume_type, "gp3");
        assert_eq!(record.name.as_deref(), Some("data"));
    }
}
