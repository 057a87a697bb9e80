//! Classic ELB operations, keyed by load balancer name

use crate::client::AwsClient;
use crate::convert::{listener_to_sdk, load_balancer_record};
use crate::error::{AwsError, SdkResultExt, missing};
use aws_sdk_elasticloadbalancing::types::Instance;
use reconflow_cloud::Result;
use reconflow_cloud::provider::{CreateLoadBalancerRequest, Listener, LoadBalancerRecord};

fn members(instance_ids: &[String]) -> Vec<Instance> {
    instance_ids
        .iter()
        .map(|id| Instance::builder().instance_id(id).build())
        .collect()
}

impl AwsClient {
    /// Marker-paginated listing; a named lookup filters to that name
    pub(crate) async fn list_load_balancers(
        &self,
        name: Option<&str>,
    ) -> std::result::Result<Vec<LoadBalancerRecord>, AwsError> {
        let mut records = Vec::new();
        let mut marker: Option<String> = None;
        loop {
            let mut request = self.elb.describe_load_balancers().set_marker(marker.take());
            if let Some(name) = name {
                request = request.load_balancer_names(name);
            }
            let output = request
                .send()
                .await
                .map_err(|e| AwsError::from_sdk("DescribeLoadBalancers", e))?;
            records.extend(
                output
                    .load_balancer_descriptions()
                    .iter()
                    .filter_map(load_balancer_record),
            );
            match output.next_marker() {
                Some(next) if !next.is_empty() => marker = Some(next.to_string()),
                _ => break,
            }
        }
        Ok(records)
    }

    pub(crate) async fn elb_create(&self, request: &CreateLoadBalancerRequest) -> Result<String> {
        let mut create = self
            .elb
            .create_load_balancer()
            .load_balancer_name(&request.name)
            .listeners(listener_to_sdk(&request.listener)?);
        if !request.security_group_ids.is_empty() {
            create = create.set_security_groups(Some(request.security_group_ids.clone()));
        }
        if request.subnet_ids.is_empty() {
            create = create.set_availability_zones(Some(request.availability_zones.clone()));
        } else {
            create = create.set_subnets(Some(request.subnet_ids.clone()));
        }
        let output = create.send().await.for_op("CreateLoadBalancer")?;
        tracing::debug!("Created load balancer {} in {}", request.name, self.region());
        output
            .dns_name()
            .map(str::to_string)
            .ok_or_else(|| missing("CreateLoadBalancer", "dns name"))
    }

    pub(crate) async fn elb_register(&self, lb_name: &str, instance_ids: &[String]) -> Result<()> {
        self.elb
            .register_instances_with_load_balancer()
            .load_balancer_name(lb_name)
            .set_instances(Some(members(instance_ids)))
            .send()
            .await
            .for_op("RegisterInstancesWithLoadBalancer")?;
        Ok(())
    }

    pub(crate) async fn elb_deregister(&self, lb_name: &str, instance_ids: &[String]) -> Result<()> {
        self.elb
            .deregister_instances_from_load_balancer()
            .load_balancer_name(lb_name)
            .set_instances(Some(members(instance_ids)))
            .send()
            .await
            .for_op("DeregisterInstancesFromLoadBalancer")?;
        Ok(())
    }

    pub(crate) async fn elb_apply_security_groups(&self, lb_name: &str, group_ids: &[String]) -> Result<()> {
        self.elb
            .apply_security_groups_to_load_balancer()
            .load_balancer_name(lb_name)
            .set_security_groups(Some(group_ids.to_vec()))
            .send()
            .await
            .for_op("ApplySecurityGroupsToLoadBalancer")?;
        Ok(())
    }

    pub(crate) async fn elb_create_listener(&self, lb_name: &str, listener: &Listener) -> Result<()> {
        self.elb
            .create_load_balancer_listeners()
            .load_balancer_name(lb_name)
            .listeners(listener_to_sdk(listener)?)
            .send()
            .await
            .for_op("CreateLoadBalancerListeners")?;
        Ok(())
    }

    pub(crate) async fn elb_delete_listener(&self, lb_name: &str, listen_port: u16) -> Result<()> {
        self.elb
            .delete_load_balancer_listeners()
            .load_balancer_name(lb_name)
            .load_balancer_ports(i32::from(listen_port))
            .send()
            .await
            .for_op("DeleteLoadBalancerListeners")?;
        Ok(())
    }

    pub(crate) async fn elb_delete(&self, lb_name: &str) -> Result<()> {
        self.elb
            .delete_load_balancer()
            .load_balancer_name(lb_name)
            .send()
            .await
            .for_op("DeleteLoadBalancer")?;
        Ok(())
    }
}
