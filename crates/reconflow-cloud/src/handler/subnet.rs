//! Subnet handler

use super::{PassContext, ResourceHandler, diff_presence, ensure_tagged, unsupported_reason};
use crate::changeset::{ChangeSet, Delta, FieldChange, Render};
use crate::crossref::{CrossRefs, RefKind};
use crate::descriptor::SubnetSpec;
use crate::error::Result;
use crate::net::Cidr;
use crate::observed::{Facts, Observed, SubnetObserved, single_live};
use crate::provider::{CreateSubnetRequest, Lookup};
use crate::report::Diagnostics;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum SubnetChange {
    CidrBlock(Delta<String>),
    Vpc(Delta<String>),
    AvailabilityZone(Delta<String>),
    MapPublicIp(Delta<bool>),
}

impl FieldChange for SubnetChange {
    fn field(&self) -> &'static str {
        match self {
            SubnetChange::CidrBlock(_) => "cidr_block",
            SubnetChange::Vpc(_) => "vpc",
            SubnetChange::AvailabilityZone(_) => "availability_zone",
            SubnetChange::MapPublicIp(_) => "map_public_ip",
        }
    }

    fn current(&self) -> String {
        match self {
            SubnetChange::CidrBlock(d) | SubnetChange::Vpc(d) | SubnetChange::AvailabilityZone(d) => {
                d.current.render()
            }
            SubnetChange::MapPublicIp(d) => d.current.render(),
        }
    }

    fn desired(&self) -> String {
        match self {
            SubnetChange::CidrBlock(d) | SubnetChange::Vpc(d) | SubnetChange::AvailabilityZone(d) => {
                d.desired.render()
            }
            SubnetChange::MapPublicIp(d) => d.desired.render(),
        }
    }

    fn unsupported(&self) -> Option<&'static str> {
        match self {
            SubnetChange::MapPublicIp(_) => None,
            other => Some(unsupported_reason(other.field())),
        }
    }
}

pub struct SubnetHandler;

#[async_trait]
impl ResourceHandler for SubnetHandler {
    type Spec = SubnetSpec;
    type State = SubnetObserved;
    type Change = SubnetChange;

    async fn read(
        &self,
        ctx: &PassContext<'_>,
        spec: &SubnetSpec,
        refs: &mut CrossRefs,
    ) -> Result<Observed<SubnetObserved>> {
        for vpc in ctx.client.describe_vpcs(Lookup::Name(&spec.vpc)).await? {
            refs.insert(RefKind::Vpc, &spec.vpc, vpc.id);
        }

        let subnets = ctx
            .client
            .describe_subnets(Lookup::Name(&ctx.identity.name))
            .await?;
        let Some(subnet) = single_live(ctx.identity, subnets)? else {
            return Ok(Observed::Absent);
        };

        let vpc_name = match refs.name_of(RefKind::Vpc, &subnet.vpc_id) {
            Some(name) => Some(name.to_string()),
            None => ctx
                .client
                .describe_vpcs(Lookup::Id(&subnet.vpc_id))
                .await?
                .into_iter()
                .find_map(|vpc| vpc.name),
        };

        Ok(Observed::Present {
            provider_id: subnet.id,
            state: SubnetObserved {
                cidr_block: subnet.cidr_block,
                vpc_id: subnet.vpc_id,
                vpc_name,
                availability_zone: subnet.availability_zone,
                map_public_ip: subnet.map_public_ip_on_launch,
            },
        })
    }

    fn diff(
        &self,
        ctx: &PassContext<'_>,
        observed: &Observed<SubnetObserved>,
        spec: &SubnetSpec,
        purged: bool,
        _refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> ChangeSet<SubnetChange> {
        diff_presence(observed, purged, |state| {
            let mut changes = Vec::new();
            if let Some(d) = Delta::between(state.cidr_block.clone(), spec.cidr_block.clone()) {
                changes.push(SubnetChange::CidrBlock(d));
            }
            let current_vpc = state.vpc_name.clone().unwrap_or_else(|| state.vpc_id.clone());
            if let Some(d) = Delta::between(current_vpc, spec.vpc.clone()) {
                changes.push(SubnetChange::Vpc(d));
            }
            let zone = ctx.config.zone(spec.availability_zone.as_deref());
            if let Some(d) = Delta::between(state.availability_zone.clone(), zone) {
                changes.push(SubnetChange::AvailabilityZone(d));
            }
            if let Some(d) = Delta::between(state.map_public_ip, spec.map_public_ip) {
                changes.push(SubnetChange::MapPublicIp(d));
            }
            changes
        })
    }

    async fn apply(
        &self,
        ctx: &PassContext<'_>,
        spec: &SubnetSpec,
        observed: &Observed<SubnetObserved>,
        changes: &ChangeSet<SubnetChange>,
        refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> Result<()> {
        match (changes, observed) {
            (ChangeSet::Create, _) => {
                let vpc_id = refs.resolve(RefKind::Vpc, &spec.vpc)?;
                let request = CreateSubnetRequest {
                    name: ctx.identity.name.clone(),
                    vpc_id: vpc_id.to_string(),
                    cidr_block: spec.cidr_block.clone(),
                    availability_zone: ctx.config.zone(spec.availability_zone.as_deref()),
                };
                let created = ctx.client.create_subnet(&request).await?;
                tracing::info!(
                    "Created subnet {} ({}) in {}",
                    ctx.identity.name,
                    created.id,
                    vpc_id
                );
                ensure_tagged(ctx, &created).await?;
                if spec.map_public_ip {
                    ctx.client.set_map_public_ip(&created.id, true).await?;
                }
                Ok(())
            }
            (ChangeSet::Purge, Observed::Present { provider_id, .. }) => {
                ctx.client.delete_subnet(provider_id).await?;
                tracing::info!("Deleted subnet {} ({})", ctx.identity.name, provider_id);
                Ok(())
            }
            (ChangeSet::Update(updates), Observed::Present { provider_id, .. }) => {
                for change in updates {
                    if let SubnetChange::MapPublicIp(d) = change {
                        ctx.client.set_map_public_ip(provider_id, d.desired).await?;
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn facts(
        &self,
        _ctx: &PassContext<'_>,
        provider_id: &str,
        state: &SubnetObserved,
    ) -> Result<Facts> {
        let mut facts = Facts::new();
        facts.insert("subnet_id".to_string(), provider_id.to_string());
        facts.insert("vpc_id".to_string(), state.vpc_id.clone());
        facts.insert("cidr_block".to_string(), state.cidr_block.clone());
        facts.insert("availability_zone".to_string(), state.availability_zone.clone());
        if let Some(netmask) = Cidr::parse(&state.cidr_block).and_then(|c| c.netmask()) {
            facts.insert("netmask".to_string(), netmask.to_string());
        }
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::Fixture;
    use crate::identity::ResourceKind;
    use crate::provider::{LaunchRequest, ProviderClient};
    use crate::report::{Outcome, Phase};

    fn spec(map_public_ip: bool) -> SubnetSpec {
        SubnetSpec {
            cidr_block: "10.0.1.0/24".to_string(),
            vpc: "main".to_string(),
            map_public_ip,
            availability_zone: None,
        }
    }

    #[tokio::test]
    async fn test_create_in_named_vpc() {
        let fx = Fixture::new(ResourceKind::Subnet, "frontend");
        let vpc_id = fx.cloud.seed_vpc("main", "10.0.0.0/16");

        assert_eq!(fx.pass(&SubnetHandler, &spec(true), false).await, Outcome::Created);

        let subnets = fx.cloud.subnets_named("frontend");
        assert_eq!(subnets.len(), 1);
        assert_eq!(subnets[0].vpc_id, vpc_id);
        assert_eq!(subnets[0].availability_zone, "eu-west-1a");
        assert!(subnets[0].map_public_ip_on_launch);

        assert_eq!(fx.pass(&SubnetHandler, &spec(true), false).await, Outcome::NoOp);
    }

    #[tokio::test]
    async fn test_map_public_ip_updates_in_place() {
        let fx = Fixture::new(ResourceKind::Subnet, "frontend");
        let vpc_id = fx.cloud.seed_vpc("main", "10.0.0.0/16");
        fx.cloud.seed_subnet("frontend", &vpc_id, "10.0.1.0/24");

        assert_eq!(fx.pass(&SubnetHandler, &spec(true), false).await, Outcome::Updated);
        assert!(fx.cloud.subnets_named("frontend")[0].map_public_ip_on_launch);
    }

    #[tokio::test]
    async fn test_moving_vpc_is_unsupported() {
        let fx = Fixture::new(ResourceKind::Subnet, "frontend");
        fx.cloud.seed_vpc("main", "10.0.0.0/16");
        let other = fx.cloud.seed_vpc("other", "10.0.0.0/16");
        fx.cloud.seed_subnet("frontend", &other, "10.0.1.0/24");

        let changes = fx.plan(&SubnetHandler, &spec(false), false).await.unwrap();
        let entries = changes.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].to_string(), "vpc: other -> main");

        let outcome = fx.pass(&SubnetHandler, &spec(false), false).await;
        assert!(matches!(
            outcome,
            Outcome::Failed {
                phase: Phase::Applying,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_purge_blocked_by_instances_reports_failure() {
        let fx = Fixture::new(ResourceKind::Subnet, "frontend");
        let vpc_id = fx.cloud.seed_vpc("main", "10.0.0.0/16");
        let subnet_id = fx.cloud.seed_subnet("frontend", &vpc_id, "10.0.1.0/24");
        fx.cloud.seed_key_pair("deploy");
        fx.cloud
            .launch_instance(&LaunchRequest {
                flavor: "t2.micro".to_string(),
                image: "ami-1".to_string(),
                key_name: "deploy".to_string(),
                subnet_id,
                user_data: String::new(),
                security_group_ids: Vec::new(),
            })
            .await
            .unwrap();

        match fx.pass(&SubnetHandler, &spec(false), true).await {
            Outcome::Failed { reason, .. } => assert!(reason.contains("DependencyViolation")),
            other => panic!("unexpected outcome {:?}", other),
        }
    }
}
