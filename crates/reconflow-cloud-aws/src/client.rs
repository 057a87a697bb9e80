//! EC2-backed provider client

use crate::convert::{
    gateway_record, has_name, instance_record, name_filter, name_tag_spec, permission_for,
    permissions_by_direction, security_group_record, subnet_record, volume_record, vpc_record,
};
use crate::error::{AwsError, SdkResultExt, missing};
use async_trait::async_trait;
use aws_sdk_ec2::primitives::Blob;
use aws_sdk_ec2::types::{
    AttributeBooleanValue, InstanceAttributeName, InstanceType, ResourceType, Tag, Tenancy,
    VolumeType,
};
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use reconflow_cloud::provider::{
    CreateLoadBalancerRequest, CreateSecurityGroupRequest, CreateSubnetRequest,
    CreateVolumeRequest, InstanceRecord, InternetGatewayRecord, KeyPairRecord, LaunchRequest,
    Listener, LoadBalancerRecord, SecurityGroupRecord, SubnetRecord, VolumeRecord, VpcRecord,
};
use reconflow_cloud::{
    AuthStatus, CloudError, Created, Direction, Lookup, ProviderClient, Result, Rule,
};

/// Turn a provider "not found" answer into an empty result
fn or_empty<T: Default>(result: std::result::Result<T, AwsError>) -> Result<T> {
    match result {
        Ok(value) => Ok(value),
        Err(e) if e.is_not_found() => Ok(T::default()),
        Err(e) => Err(e.into()),
    }
}

/// AWS client for one session: EC2 plus Classic ELB in a single region
pub struct AwsClient {
    pub(crate) ec2: aws_sdk_ec2::Client,
    pub(crate) elb: aws_sdk_elasticloadbalancing::Client,
    region: String,
}

impl AwsClient {
    pub fn new(config: &aws_config::SdkConfig, region: impl Into<String>) -> Self {
        Self {
            ec2: aws_sdk_ec2::Client::new(config),
            elb: aws_sdk_elasticloadbalancing::Client::new(config),
            region: region.into(),
        }
    }

    pub fn region(&self) -> &str {
        &self.region
    }

    async fn list_instances(&self, lookup: Lookup<'_>) -> std::result::Result<Vec<InstanceRecord>, AwsError> {
        let mut request = self.ec2.describe_instances();
        match lookup {
            Lookup::Name(name) => request = request.filters(name_filter(name)),
            Lookup::Id(id) => request = request.instance_ids(id),
            Lookup::All => {}
        }
        let pages = request
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|e| AwsError::from_sdk("DescribeInstances", e))?;
        Ok(pages
            .iter()
            .flat_map(|page| page.reservations())
            .flat_map(|reservation| reservation.instances())
            .filter_map(instance_record)
            .collect())
    }

    async fn list_vpcs(&self, lookup: Lookup<'_>) -> std::result::Result<Vec<VpcRecord>, AwsError> {
        let mut request = self.ec2.describe_vpcs();
        match lookup {
            Lookup::Name(name) => request = request.filters(name_filter(name)),
            Lookup::Id(id) => request = request.vpc_ids(id),
            Lookup::All => {}
        }
        let pages = request
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|e| AwsError::from_sdk("DescribeVpcs", e))?;
        Ok(pages
            .iter()
            .flat_map(|page| page.vpcs())
            .filter_map(vpc_record)
            .collect())
    }

    async fn list_subnets(&self, lookup: Lookup<'_>) -> std::result::Result<Vec<SubnetRecord>, AwsError> {
        let mut request = self.ec2.describe_subnets();
        match lookup {
            Lookup::Name(name) => request = request.filters(name_filter(name)),
            Lookup::Id(id) => request = request.subnet_ids(id),
            Lookup::All => {}
        }
        let pages = request
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|e| AwsError::from_sdk("DescribeSubnets", e))?;
        Ok(pages
            .iter()
            .flat_map(|page| page.subnets())
            .filter_map(subnet_record)
            .collect())
    }

    async fn list_gateways(
        &self,
        lookup: Lookup<'_>,
    ) -> std::result::Result<Vec<InternetGatewayRecord>, AwsError> {
        let mut request = self.ec2.describe_internet_gateways();
        match lookup {
            Lookup::Name(name) => request = request.filters(name_filter(name)),
            Lookup::Id(id) => request = request.internet_gateway_ids(id),
            Lookup::All => {}
        }
        let pages = request
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|e| AwsError::from_sdk("DescribeInternetGateways", e))?;
        Ok(pages
            .iter()
            .flat_map(|page| page.internet_gateways())
            .filter_map(gateway_record)
            .collect())
    }

    async fn list_security_groups(
        &self,
        lookup: Lookup<'_>,
    ) -> std::result::Result<Vec<SecurityGroupRecord>, AwsError> {
        let mut request = self.ec2.describe_security_groups();
        match lookup {
            Lookup::Name(name) => request = request.filters(name_filter(name)),
            Lookup::Id(id) => request = request.group_ids(id),
            Lookup::All => {}
        }
        let pages = request
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|e| AwsError::from_sdk("DescribeSecurityGroups", e))?;
        Ok(pages
            .iter()
            .flat_map(|page| page.security_groups())
            .filter_map(security_group_record)
            .collect())
    }

    async fn list_volumes(&self, lookup: Lookup<'_>) -> std::result::Result<Vec<VolumeRecord>, AwsError> {
        let mut request = self.ec2.describe_volumes();
        match lookup {
            Lookup::Name(name) => request = request.filters(name_filter(name)),
            Lookup::Id(id) => request = request.volume_ids(id),
            Lookup::All => {}
        }
        let pages = request
            .into_paginator()
            .send()
            .try_collect()
            .await
            .map_err(|e| AwsError::from_sdk("DescribeVolumes", e))?;
        Ok(pages
            .iter()
            .flat_map(|page| page.volumes())
            .filter_map(volume_record)
            .collect())
    }

    /// New groups come with an allow-all egress rule; drop it
    async fn revoke_default_egress(&self, group_id: &str) -> Result<()> {
        let everything = Rule {
            direction: Direction::Egress,
            protocol: "all".to_string(),
            port_min: None,
            port_max: None,
            remote_prefix: "0.0.0.0/0".to_string(),
        };
        let result = self
            .ec2
            .revoke_security_group_egress()
            .group_id(group_id)
            .ip_permissions(permission_for(&everything))
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("RevokeSecurityGroupEgress", e));
        or_empty(result.map(|_| ()))
    }
}

#[async_trait]
impl ProviderClient for AwsClient {
    fn name(&self) -> &str {
        "aws"
    }

    async fn check_auth(&self) -> Result<AuthStatus> {
        match self.ec2.describe_availability_zones().send().await {
            Ok(output) => Ok(AuthStatus::ok(format!(
                "region {} ({} zones)",
                self.region,
                output.availability_zones().len()
            ))),
            Err(e) => Ok(AuthStatus::failed(
                AwsError::from_sdk("DescribeAvailabilityZones", e).to_string(),
            )),
        }
    }

    async fn create_tags(&self, resource_id: &str, tags: &[(&str, &str)]) -> Result<()> {
        let mut request = self.ec2.create_tags().resources(resource_id);
        for (key, value) in tags {
            request = request.tags(Tag::builder().key(*key).value(*value).build());
        }
        request.send().await.for_op("CreateTags")?;
        Ok(())
    }

    async fn describe_instances(&self, lookup: Lookup<'_>) -> Result<Vec<InstanceRecord>> {
        or_empty(self.list_instances(lookup).await)
    }

    async fn instance_user_data(&self, instance_id: &str) -> Result<Option<String>> {
        let output = self
            .ec2
            .describe_instance_attribute()
            .instance_id(instance_id)
            .attribute(InstanceAttributeName::UserData)
            .send()
            .await
            .for_op("DescribeInstanceAttribute")?;
        let Some(encoded) = output.user_data().and_then(|v| v.value()) else {
            return Ok(None);
        };
        let bytes = STANDARD
            .decode(encoded)
            .map_err(|e| CloudError::ApiError(format!("user data of {}: {}", instance_id, e)))?;
        Ok(Some(String::from_utf8_lossy(&bytes).into_owned()))
    }

    async fn launch_instance(&self, request: &LaunchRequest) -> Result<Created> {
        let mut run = self
            .ec2
            .run_instances()
            .tag_specifications(name_tag_spec(ResourceType::Instance, &request.name))
            .image_id(&request.image)
            .instance_type(InstanceType::from(request.flavor.as_str()))
            .key_name(&request.key_name)
            .subnet_id(&request.subnet_id)
            .min_count(1)
            .max_count(1);
        if !request.user_data.is_empty() {
            run = run.user_data(STANDARD.encode(&request.user_data));
        }
        if !request.security_group_ids.is_empty() {
            run = run.set_security_group_ids(Some(request.security_group_ids.clone()));
        }
        let output = run.send().await.for_op("RunInstances")?;
        let instance = output
            .instances()
            .first()
            .ok_or_else(|| missing("RunInstances", "instance"))?;
        let id = instance
            .instance_id()
            .ok_or_else(|| missing("RunInstances", "instance id"))?;
        Ok(Created {
            id: id.to_string(),
            tagged: has_name(instance.tags(), &request.name),
        })
    }

    async fn set_source_dest_check(&self, instance_id: &str, enabled: bool) -> Result<()> {
        self.ec2
            .modify_instance_attribute()
            .instance_id(instance_id)
            .source_dest_check(AttributeBooleanValue::builder().value(enabled).build())
            .send()
            .await
            .for_op("ModifyInstanceAttribute")?;
        Ok(())
    }

    async fn set_instance_security_groups(&self, instance_id: &str, group_ids: &[String]) -> Result<()> {
        self.ec2
            .modify_instance_attribute()
            .instance_id(instance_id)
            .set_groups(Some(group_ids.to_vec()))
            .send()
            .await
            .for_op("ModifyInstanceAttribute")?;
        Ok(())
    }

    async fn terminate_instance(&self, instance_id: &str) -> Result<()> {
        self.ec2
            .terminate_instances()
            .instance_ids(instance_id)
            .send()
            .await
            .for_op("TerminateInstances")?;
        Ok(())
    }

    async fn describe_key_pair(&self, key_name: &str) -> Result<Option<KeyPairRecord>> {
        let result = self
            .ec2
            .describe_key_pairs()
            .key_names(key_name)
            .send()
            .await
            .map_err(|e| AwsError::from_sdk("DescribeKeyPairs", e))
            .map(|output| {
                output.key_pairs().first().map(|pair| KeyPairRecord {
                    name: pair.key_name().unwrap_or(key_name).to_string(),
                    fingerprint: pair.key_fingerprint().map(str::to_string),
                })
            });
        or_empty(result)
    }

    async fn import_key_pair(&self, key_name: &str, public_key: &str) -> Result<()> {
        self.ec2
            .import_key_pair()
            .key_name(key_name)
            .public_key_material(Blob::new(public_key.as_bytes()))
            .send()
            .await
            .for_op("ImportKeyPair")?;
        Ok(())
    }

    async fn describe_load_balancers(&self, name: Option<&str>) -> Result<Vec<LoadBalancerRecord>> {
        or_empty(self.list_load_balancers(name).await)
    }

    async fn create_load_balancer(&self, request: &CreateLoadBalancerRequest) -> Result<String> {
        self.elb_create(request).await
    }

    async fn register_instances(&self, lb_name: &str, instance_ids: &[String]) -> Result<()> {
        self.elb_register(lb_name, instance_ids).await
    }

    async fn deregister_instances(&self, lb_name: &str, instance_ids: &[String]) -> Result<()> {
        self.elb_deregister(lb_name, instance_ids).await
    }

    async fn apply_security_groups(&self, lb_name: &str, group_ids: &[String]) -> Result<()> {
        self.elb_apply_security_groups(lb_name, group_ids).await
    }

    async fn create_listener(&self, lb_name: &str, listener: &Listener) -> Result<()> {
        self.elb_create_listener(lb_name, listener).await
    }

    async fn delete_listener(&self, lb_name: &str, listen_port: u16) -> Result<()> {
        self.elb_delete_listener(lb_name, listen_port).await
    }

    async fn delete_load_balancer(&self, lb_name: &str) -> Result<()> {
        self.elb_delete(lb_name).await
    }

    async fn describe_vpcs(&self, lookup: Lookup<'_>) -> Result<Vec<VpcRecord>> {
        or_empty(self.list_vpcs(lookup).await)
    }

    async fn create_vpc(&self, name: &str, cidr_block: &str, instance_tenancy: &str) -> Result<Created> {
        let output = self
            .ec2
            .create_vpc()
            .cidr_block(cidr_block)
            .instance_tenancy(Tenancy::from(instance_tenancy))
            .tag_specifications(name_tag_spec(ResourceType::Vpc, name))
            .send()
            .await
            .for_op("CreateVpc")?;
        let vpc = output.vpc().ok_or_else(|| missing("CreateVpc", "vpc"))?;
        let id = vpc.vpc_id().ok_or_else(|| missing("CreateVpc", "vpc id"))?;
        Ok(Created {
            id: id.to_string(),
            tagged: has_name(vpc.tags(), name),
        })
    }

    async fn delete_vpc(&self, vpc_id: &str) -> Result<()> {
        self.ec2
            .delete_vpc()
            .vpc_id(vpc_id)
            .send()
            .await
            .for_op("DeleteVpc")?;
        Ok(())
    }

    async fn describe_subnets(&self, lookup: Lookup<'_>) -> Result<Vec<SubnetRecord>> {
        or_empty(self.list_subnets(lookup).await)
    }

    async fn create_subnet(&self, request: &CreateSubnetRequest) -> Result<Created> {
        let output = self
            .ec2
            .create_subnet()
            .vpc_id(&request.vpc_id)
            .cidr_block(&request.cidr_block)
            .availability_zone(&request.availability_zone)
            .tag_specifications(name_tag_spec(ResourceType::Subnet, &request.name))
            .send()
            .await
            .for_op("CreateSubnet")?;
        let subnet = output.subnet().ok_or_else(|| missing("CreateSubnet", "subnet"))?;
        let id = subnet
            .subnet_id()
            .ok_or_else(|| missing("CreateSubnet", "subnet id"))?;
        Ok(Created {
            id: id.to_string(),
            tagged: has_name(subnet.tags(), &request.name),
        })
    }

    async fn set_map_public_ip(&self, subnet_id: &str, enabled: bool) -> Result<()> {
        self.ec2
            .modify_subnet_attribute()
            .subnet_id(subnet_id)
            .map_public_ip_on_launch(AttributeBooleanValue::builder().value(enabled).build())
            .send()
            .await
            .for_op("ModifySubnetAttribute")?;
        Ok(())
    }

    async fn delete_subnet(&self, subnet_id: &str) -> Result<()> {
        self.ec2
            .delete_subnet()
            .subnet_id(subnet_id)
            .send()
            .await
            .for_op("DeleteSubnet")?;
        Ok(())
    }

    async fn describe_internet_gateways(&self, lookup: Lookup<'_>) -> Result<Vec<InternetGatewayRecord>> {
        or_empty(self.list_gateways(lookup).await)
    }

    async fn create_internet_gateway(&self, name: &str) -> Result<Created> {
        let output = self
            .ec2
            .create_internet_gateway()
            .tag_specifications(name_tag_spec(ResourceType::InternetGateway, name))
            .send()
            .await
            .for_op("CreateInternetGateway")?;
        let gateway = output
            .internet_gateway()
            .ok_or_else(|| missing("CreateInternetGateway", "internet gateway"))?;
        let id = gateway
            .internet_gateway_id()
            .ok_or_else(|| missing("CreateInternetGateway", "internet gateway id"))?;
        Ok(Created {
            id: id.to_string(),
            tagged: has_name(gateway.tags(), name),
        })
    }

    async fn attach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        self.ec2
            .attach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .for_op("AttachInternetGateway")?;
        Ok(())
    }

    async fn detach_internet_gateway(&self, gateway_id: &str, vpc_id: &str) -> Result<()> {
        self.ec2
            .detach_internet_gateway()
            .internet_gateway_id(gateway_id)
            .vpc_id(vpc_id)
            .send()
            .await
            .for_op("DetachInternetGateway")?;
        Ok(())
    }

    async fn delete_internet_gateway(&self, gateway_id: &str) -> Result<()> {
        self.ec2
            .delete_internet_gateway()
            .internet_gateway_id(gateway_id)
            .send()
            .await
            .for_op("DeleteInternetGateway")?;
        Ok(())
    }

    async fn describe_security_groups(&self, lookup: Lookup<'_>) -> Result<Vec<SecurityGroupRecord>> {
        or_empty(self.list_security_groups(lookup).await)
    }

    async fn create_security_group(&self, request: &CreateSecurityGroupRequest) -> Result<Created> {
        let output = self
            .ec2
            .create_security_group()
            .group_name(&request.group_name)
            .description(&request.description)
            .vpc_id(&request.vpc_id)
            .tag_specifications(name_tag_spec(ResourceType::SecurityGroup, &request.name))
            .send()
            .await
            .for_op("CreateSecurityGroup")?;
        let group_id = output
            .group_id()
            .ok_or_else(|| missing("CreateSecurityGroup", "group id"))?;
        self.revoke_default_egress(group_id).await?;
        Ok(Created {
            id: group_id.to_string(),
            tagged: has_name(output.tags(), &request.name),
        })
    }

    async fn authorize_rules(&self, group_id: &str, rules: &[Rule]) -> Result<()> {
        let (ingress, egress) = permissions_by_direction(rules);
        if !ingress.is_empty() {
            self.ec2
                .authorize_security_group_ingress()
                .group_id(group_id)
                .set_ip_permissions(Some(ingress))
                .send()
                .await
                .for_op("AuthorizeSecurityGroupIngress")?;
        }
        if !egress.is_empty() {
            self.ec2
                .authorize_security_group_egress()
                .group_id(group_id)
                .set_ip_permissions(Some(egress))
                .send()
                .await
                .for_op("AuthorizeSecurityGroupEgress")?;
        }
        Ok(())
    }

    async fn revoke_rules(&self, group_id: &str, rules: &[Rule]) -> Result<()> {
        let (ingress, egress) = permissions_by_direction(rules);
        if !ingress.is_empty() {
            self.ec2
                .revoke_security_group_ingress()
                .group_id(group_id)
                .set_ip_permissions(Some(ingress))
                .send()
                .await
                .for_op("RevokeSecurityGroupIngress")?;
        }
        if !egress.is_empty() {
            self.ec2
                .revoke_security_group_egress()
                .group_id(group_id)
                .set_ip_permissions(Some(egress))
                .send()
                .await
                .for_op("RevokeSecurityGroupEgress")?;
        }
        Ok(())
    }

    async fn delete_security_group(&self, group_id: &str) -> Result<()> {
        self.ec2
            .delete_security_group()
            .group_id(group_id)
            .send()
            .await
            .for_op("DeleteSecurityGroup")?;
        Ok(())
    }

    async fn describe_volumes(&self, lookup: Lookup<'_>) -> Result<Vec<VolumeRecord>> {
        or_empty(self.list_volumes(lookup).await)
    }

    async fn create_volume(&self, request: &CreateVolumeRequest) -> Result<Created> {
        let output = self
            .ec2
            .create_volume()
            .size(request.size)
            .volume_type(VolumeType::from(request.volume_type.as_str()))
            .availability_zone(&request.availability_zone)
            .encrypted(request.encrypted)
            .tag_specifications(name_tag_spec(ResourceType::Volume, &request.name))
            .send()
            .await
            .for_op("CreateVolume")?;
        let id = output
            .volume_id()
            .ok_or_else(|| missing("CreateVolume", "volume id"))?;
        Ok(Created {
            id: id.to_string(),
            tagged: has_name(output.tags(), &request.name),
        })
    }

    async fn delete_volume(&self, volume_id: &str) -> Result<()> {
        self.ec2
            .delete_volume()
            .volume_id(volume_id)
            .send()
            .await
            .for_op("DeleteVolume")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_reads_as_empty() {
        let err = AwsError::Api {
            operation: "DescribeVpcs".to_string(),
            code: "InvalidVpcID.NotFound".to_string(),
            message: "The vpc ID 'vpc-1' does not exist".to_string(),
        };
        let result: Result<Vec<VpcRecord>> = or_empty(Err(err));
        assert!(result.unwrap().is_empty());
    }

    #[test]
    fn test_other_errors_propagate() {
        let err = AwsError::Api {
            operation: "DescribeVpcs".to_string(),
            code: "Throttling".to_string(),
            message: "Rate exceeded".to_string(),
        };
        let result: Result<Vec<VpcRecord>> = or_empty(Err(err));
        assert!(matches!(result, Err(CloudError::ApiError(_))));
    }
}
