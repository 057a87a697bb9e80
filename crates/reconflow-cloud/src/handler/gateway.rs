//! Internet gateway handler
//!
//! A gateway carries at most one VPC attachment. Attachments changed out of
//! band are repaired by detaching whatever is attached and attaching the
//! declared VPC.

use super::{PassContext, ResourceHandler, diff_presence, ensure_tagged};
use crate::changeset::{ChangeSet, Delta, FieldChange, Render};
use crate::crossref::{CrossRefs, RefKind};
use crate::descriptor::InternetGatewaySpec;
use crate::error::Result;
use crate::observed::{AttachedVpc, Facts, InternetGatewayObserved, Observed, single_live};
use crate::provider::Lookup;
use crate::report::Diagnostics;
use async_trait::async_trait;

#[derive(Debug, Clone, PartialEq)]
pub enum InternetGatewayChange {
    Vpc(Delta<Option<String>>),
}

impl FieldChange for InternetGatewayChange {
    fn field(&self) -> &'static str {
        "vpc"
    }

    fn current(&self) -> String {
        let InternetGatewayChange::Vpc(d) = self;
        d.current.render()
    }

    fn desired(&self) -> String {
        let InternetGatewayChange::Vpc(d) = self;
        d.desired.render()
    }
}

pub struct InternetGatewayHandler;

impl InternetGatewayHandler {
    async fn attach(
        &self,
        ctx: &PassContext<'_>,
        gateway_id: &str,
        vpc: &str,
        refs: &CrossRefs,
    ) -> Result<()> {
        let vpc_id = refs.resolve(RefKind::Vpc, vpc)?;
        ctx.client.attach_internet_gateway(gateway_id, vpc_id).await?;
        tracing::info!("Attached internet gateway {} to {} ({})", gateway_id, vpc, vpc_id);
        Ok(())
    }

    async fn detach_all(
        &self,
        ctx: &PassContext<'_>,
        gateway_id: &str,
        attachments: &[AttachedVpc],
    ) -> Result<()> {
        for attachment in attachments {
            ctx.client
                .detach_internet_gateway(gateway_id, &attachment.id)
                .await?;
            tracing::info!(
                "Detached internet gateway {} from {}",
                gateway_id,
                attachment.id
            );
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceHandler for InternetGatewayHandler {
    type Spec = InternetGatewaySpec;
    type State = InternetGatewayObserved;
    type Change = InternetGatewayChange;

    async fn read(
        &self,
        ctx: &PassContext<'_>,
        spec: &InternetGatewaySpec,
        refs: &mut CrossRefs,
    ) -> Result<Observed<InternetGatewayObserved>> {
        if let Some(vpc) = &spec.vpc {
            for record in ctx.client.describe_vpcs(Lookup::Name(vpc)).await? {
                refs.insert(RefKind::Vpc, vpc, record.id);
            }
        }

        let gateways = ctx
            .client
            .describe_internet_gateways(Lookup::Name(&ctx.identity.name))
            .await?;
        let Some(gateway) = single_live(ctx.identity, gateways)? else {
            return Ok(Observed::Absent);
        };

        let mut attachments = Vec::new();
        for vpc_id in gateway.attached_vpc_ids {
            let name = match refs.name_of(RefKind::Vpc, &vpc_id) {
                Some(name) => Some(name.to_string()),
                None => ctx
                    .client
                    .describe_vpcs(Lookup::Id(&vpc_id))
                    .await?
                    .into_iter()
                    .find_map(|vpc| vpc.name),
            };
            attachments.push(AttachedVpc { id: vpc_id, name });
        }

        Ok(Observed::Present {
            provider_id: gateway.id,
            state: InternetGatewayObserved { attachments },
        })
    }

    fn diff(
        &self,
        _ctx: &PassContext<'_>,
        observed: &Observed<InternetGatewayObserved>,
        spec: &InternetGatewaySpec,
        purged: bool,
        _refs: &CrossRefs,
        diag: &mut Diagnostics,
    ) -> ChangeSet<InternetGatewayChange> {
        diff_presence(observed, purged, |state| {
            if state.attachments.len() > 1 {
                diag.warn(
                    "vpc",
                    format!(
                        "gateway has {} attachments, all will be replaced",
                        state.attachments.len()
                    ),
                );
            }
            let current = match state.attachments.as_slice() {
                [] => None,
                [only] => Some(only.name.clone().unwrap_or_else(|| only.id.clone())),
                many => Some(
                    many.iter()
                        .map(|a| a.name.clone().unwrap_or_else(|| a.id.clone()))
                        .collect::<Vec<_>>()
                        .join(","),
                ),
            };
            Delta::between(current, spec.vpc.clone())
                .map(InternetGatewayChange::Vpc)
                .into_iter()
                .collect()
        })
    }

    async fn apply(
        &self,
        ctx: &PassContext<'_>,
        spec: &InternetGatewaySpec,
        observed: &Observed<InternetGatewayObserved>,
        changes: &ChangeSet<InternetGatewayChange>,
        refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> Result<()> {
        match (changes, observed) {
            (ChangeSet::Create, _) => {
                let created = ctx.client.create_internet_gateway(&ctx.identity.name).await?;
                tracing::info!(
                    "Created internet gateway {} ({})",
                    ctx.identity.name,
                    created.id
                );
                ensure_tagged(ctx, &created).await?;
                if let Some(vpc) = &spec.vpc {
                    self.attach(ctx, &created.id, vpc, refs).await?;
                }
                Ok(())
            }
            (ChangeSet::Purge, Observed::Present { provider_id, state }) => {
                self.detach_all(ctx, provider_id, &state.attachments).await?;
                ctx.client.delete_internet_gateway(provider_id).await?;
                tracing::info!(
                    "Deleted internet gateway {} ({})",
                    ctx.identity.name,
                    provider_id
                );
                Ok(())
            }
            (ChangeSet::Update(_), Observed::Present { provider_id, state }) => {
                self.detach_all(ctx, provider_id, &state.attachments).await?;
                if let Some(vpc) = &spec.vpc {
                    self.attach(ctx, provider_id, vpc, refs).await?;
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
        state: &InternetGatewayObserved,
    ) -> Result<Facts> {
        let mut facts = Facts::new();
        facts.insert("internet_gateway_id".to_string(), provider_id.to_string());
        if let Some(attachment) = state.attachments.first() {
            facts.insert("vpc_id".to_string(), attachment.id.clone());
        }
        Ok(facts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::test_support::Fixture;
    use crate::identity::ResourceKind;
    use crate::provider::ProviderClient;
    use crate::report::Outcome;

    fn spec(vpc: Option<&str>) -> InternetGatewaySpec {
        InternetGatewaySpec {
            vpc: vpc.map(String::from),
        }
    }

    #[tokio::test]
    async fn test_create_attaches_vpc() {
        let fx = Fixture::new(ResourceKind::InternetGateway, "gw");
        let vpc_id = fx.cloud.seed_vpc("main", "10.0.0.0/16");

        assert_eq!(
            fx.pass(&InternetGatewayHandler, &spec(Some("main")), false).await,
            Outcome::Created
        );
        let gateways = fx.cloud.gateways_named("gw");
        assert_eq!(gateways[0].attached_vpc_ids, vec![vpc_id]);
        assert_eq!(
            fx.pass(&InternetGatewayHandler, &spec(Some("main")), false).await,
            Outcome::NoOp
        );
    }

    #[tokio::test]
    async fn test_reattach_after_out_of_band_detach() {
        let fx = Fixture::new(ResourceKind::InternetGateway, "gw");
        let vpc_id = fx.cloud.seed_vpc("main", "10.0.0.0/16");
        fx.pass(&InternetGatewayHandler, &spec(Some("main")), false).await;

        let gateway_id = fx.cloud.gateways_named("gw")[0].id.clone();
        fx.cloud
            .detach_internet_gateway(&gateway_id, &vpc_id)
            .await
            .unwrap();

        let changes = fx
            .plan(&InternetGatewayHandler, &spec(Some("main")), false)
            .await
            .unwrap();
        assert_eq!(changes.entries()[0].to_string(), "vpc: <none> -> main");

        assert_eq!(
            fx.pass(&InternetGatewayHandler, &spec(Some("main")), false).await,
            Outcome::Updated
        );
        assert_eq!(fx.cloud.gateways_named("gw")[0].attached_vpc_ids, vec![vpc_id]);
    }

    #[tokio::test]
    async fn test_move_to_other_vpc_detaches_first() {
        let fx = Fixture::new(ResourceKind::InternetGateway, "gw");
        fx.cloud.seed_vpc("main", "10.0.0.0/16");
        let other = fx.cloud.seed_vpc("other", "10.1.0.0/16");
        fx.pass(&InternetGatewayHandler, &spec(Some("main")), false).await;
        fx.cloud.clear_calls();

        let desired = spec(Some("other"));
        let mut refs = CrossRefs::new();
        let observed = InternetGatewayHandler
            .read(&fx.ctx(), &desired, &mut refs)
            .await
            .unwrap();
        let mut diag = fx.diag();
        let changes =
            InternetGatewayHandler.diff(&fx.ctx(), &observed, &desired, false, &refs, &mut diag);
        InternetGatewayHandler
            .apply(&fx.ctx(), &desired, &observed, &changes, &refs, &mut diag)
            .await
            .unwrap();

        let calls = fx.cloud.calls();
        assert!(calls[0].starts_with("detach_internet_gateway"));
        assert!(calls[1].starts_with("attach_internet_gateway"));
        assert_eq!(fx.cloud.gateways_named("gw")[0].attached_vpc_ids, vec![other]);
    }

    #[tokio::test]
    async fn test_purge_detaches_then_deletes() {
        let fx = Fixture::new(ResourceKind::InternetGateway, "gw");
        fx.cloud.seed_vpc("main", "10.0.0.0/16");
        fx.pass(&InternetGatewayHandler, &spec(Some("main")), false).await;
        fx.cloud.clear_calls();

        assert_eq!(
            fx.pass(&InternetGatewayHandler, &spec(Some("main")), true).await,
            Outcome::Purged
        );
        let calls = fx.cloud.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[0].starts_with("detach_internet_gateway"));
        assert!(calls[1].starts_with("delete_internet_gateway"));
        assert!(fx.cloud.gateways_named("gw").is_empty());
    }
}
