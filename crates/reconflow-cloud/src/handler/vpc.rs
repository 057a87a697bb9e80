//! VPC handler

use super::{PassContext, ResourceHandler, diff_presence, ensure_tagged, unsupported_reason};
use crate::changeset::{ChangeSet, Delta, FieldChange, Render};
use crate::crossref::CrossRefs;
use crate::descriptor::VpcSpec;
use crate::error::Result;
use crate::net::Cidr;
use crate::observed::{Facts, Observed, VpcObserved, single_live};
use crate::provider::Lookup;
use crate::report::Diagnostics;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum VpcChange {
    CidrBlock(Delta<String>),
    InstanceTenancy(Delta<String>),
}

impl FieldChange for VpcChange {
    fn field(&self) -> &'static str {
        match self {
            VpcChange::CidrBlock(_) => "cidr_block",
            VpcChange::InstanceTenancy(_) => "instance_tenancy",
        }
    }

    fn current(&self) -> String {
        match self {
            VpcChange::CidrBlock(d) | VpcChange::InstanceTenancy(d) => d.current.render(),
        }
    }

    fn desired(&self) -> String {
        match self {
            VpcChange::CidrBlock(d) | VpcChange::InstanceTenancy(d) => d.desired.render(),
        }
    }

    fn unsupported(&self) -> Option<&'static str> {
        Some(unsupported_reason(self.field()))
    }
}

pub struct VpcHandler;

#[async_trait]
impl ResourceHandler for VpcHandler {
    type Spec = VpcSpec;
    type State = VpcObserved;
    type Change = VpcChange;

    async fn read(
        &self,
        ctx: &PassContext<'_>,
        _spec: &VpcSpec,
        _refs: &mut CrossRefs,
    ) -> Result<Observed<VpcObserved>> {
        let vpcs = ctx
            .client
            .describe_vpcs(Lookup::Name(&ctx.identity.name))
            .await?;
        Ok(match single_live(ctx.identity, vpcs)? {
            None => Observed::Absent,
            Some(vpc) => Observed::Present {
                provider_id: vpc.id,
                state: VpcObserved {
                    cidr_block: vpc.cidr_block,
                    instance_tenancy: vpc.instance_tenancy,
                },
            },
        })
    }

    fn diff(
        &self,
        _ctx: &PassContext<'_>,
        observed: &Observed<VpcObserved>,
        spec: &VpcSpec,
        purged: bool,
        _refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> ChangeSet<VpcChange> {
        diff_presence(observed, purged, |state| {
            let mut changes = Vec::new();
            if let Some(d) = Delta::between(state.cidr_block.clone(), spec.cidr_block.clone()) {
                changes.push(VpcChange::CidrBlock(d));
            }
            if let Some(d) = Delta::between(
                state.instance_tenancy.clone(),
                spec.instance_tenancy.clone(),
            ) {
                changes.push(VpcChange::InstanceTenancy(d));
            }
            changes
        })
    }

    async fn apply(
        &self,
        ctx: &PassContext<'_>,
        spec: &VpcSpec,
        observed: &Observed<VpcObserved>,
        changes: &ChangeSet<VpcChange>,
        _refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> Result<()> {
        match (changes, observed) {
            (ChangeSet::Create, _) => {
                let created = ctx
                    .client
                    .create_vpc(&ctx.identity.name, &spec.cidr_block, &spec.instance_tenancy)
                    .await?;
                tracing::info!("Created VPC {} ({})", ctx.identity.name, created.id);
                ensure_tagged(ctx, &created).await
            }
            (ChangeSet::Purge, Observed::Present { provider_id, .. }) => {
                ctx.client.delete_vpc(provider_id).await?;
                tracing::info!("Deleted VPC {} ({})", ctx.identity.name, provider_id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn facts(
        &self,
        _ctx: &PassContext<'_>,
        provider_id: &str,
        state: &VpcObserved,
    ) -> Result<Facts> {
        let mut facts = Facts::new();
        facts.insert("vpc_id".to_string(), provider_id.to_string());
        facts.insert("cidr_block".to_string(), state.cidr_block.clone());
        facts.insert("instance_tenancy".to_string(), state.instance_tenancy.clone());
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
    use crate::report::Outcome;

    fn spec(cidr: &str) -> VpcSpec {
        VpcSpec {
            cidr_block: cidr.to_string(),
            instance_tenancy: "default".to_string(),
        }
    }

    #[tokio::test]
    async fn test_create_tags_and_converges() {
        let fx = Fixture::new(ResourceKind::Vpc, "main");
        assert_eq!(fx.pass(&VpcHandler, &spec("10.0.0.0/16"), false).await, Outcome::Created);

        let vpcs = fx.cloud.vpcs_named("main");
        assert_eq!(vpcs.len(), 1);
        assert_eq!(vpcs[0].cidr_block, "10.0.0.0/16");

        let changes = fx.plan(&VpcHandler, &spec("10.0.0.0/16"), false).await.unwrap();
        assert!(changes.is_empty());
    }

    #[tokio::test]
    async fn test_create_carries_the_name_tag() {
        let fx = Fixture::new(ResourceKind::Vpc, "main");
        fx.cloud.fail_operation("create_tags");

        assert_eq!(fx.pass(&VpcHandler, &spec("10.0.0.0/16"), false).await, Outcome::Created);
        assert_eq!(fx.cloud.calls(), vec!["create_vpc 10.0.0.0/16".to_string()]);
        assert_eq!(fx.pass(&VpcHandler, &spec("10.0.0.0/16"), false).await, Outcome::NoOp);
    }

    #[tokio::test]
    async fn test_untagged_create_is_backfilled_with_retry() {
        let fx = Fixture::new(ResourceKind::Vpc, "main");
        fx.cloud.ignore_create_tags();
        fx.cloud.fail_next_tags(2);

        assert_eq!(fx.pass(&VpcHandler, &spec("10.0.0.0/16"), false).await, Outcome::Created);
        assert_eq!(fx.cloud.vpcs_named("main").len(), 1);
        let tag_calls = fx
            .cloud
            .calls()
            .iter()
            .filter(|c| c.starts_with("create_tags"))
            .count();
        assert_eq!(tag_calls, 3);
    }

    #[tokio::test]
    async fn test_purge_and_purged_absent_is_noop() {
        let fx = Fixture::new(ResourceKind::Vpc, "main");
        fx.cloud.seed_vpc("main", "10.0.0.0/16");

        assert_eq!(fx.pass(&VpcHandler, &spec("10.0.0.0/16"), true).await, Outcome::Purged);
        assert!(fx.cloud.vpcs_named("main").is_empty());
        assert_eq!(fx.pass(&VpcHandler, &spec("10.0.0.0/16"), true).await, Outcome::NoOp);
    }

    #[tokio::test]
    async fn test_cidr_change_is_unsupported() {
        let fx = Fixture::new(ResourceKind::Vpc, "main");
        fx.cloud.seed_vpc("main", "10.1.0.0/16");

        let changes = fx.plan(&VpcHandler, &spec("10.0.0.0/16"), false).await.unwrap();
        let (change, _) = changes.first_unsupported().unwrap();
        assert_eq!(change.field(), "cidr_block");
    }

    #[tokio::test]
    async fn test_facts() {
        let fx = Fixture::new(ResourceKind::Vpc, "main");
        let id = fx.cloud.seed_vpc("main", "10.0.0.0/16");
        let Observed::Present { provider_id, state } =
            fx.read(&VpcHandler, &spec("10.0.0.0/16")).await.unwrap()
        else {
            panic!("expected present");
        };
        let facts = VpcHandler.facts(&fx.ctx(), &provider_id, &state).await.unwrap();
        assert_eq!(facts["vpc_id"], id);
        assert_eq!(facts["netmask"], "255.255.0.0");
    }
}
