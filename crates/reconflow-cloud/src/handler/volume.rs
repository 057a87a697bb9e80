//! Block volume handler

use super::{PassContext, ResourceHandler, diff_presence, ensure_tagged, unsupported_reason};
use crate::changeset::{ChangeSet, Delta, FieldChange, Render};
use crate::crossref::CrossRefs;
use crate::descriptor::VolumeSpec;
use crate::error::Result;
use crate::observed::{Facts, Observed, VolumeObserved, single_live};
use crate::provider::{CreateVolumeRequest, Lookup};
use crate::report::Diagnostics;
use async_trait::async_trait;

/// Every volume attribute is fixed at creation
#[derive(Debug, Clone, PartialEq)]
pub enum VolumeChange {
    Size(Delta<i32>),
    VolumeType(Delta<String>),
    AvailabilityZone(Delta<String>),
    Encrypted(Delta<bool>),
}

impl FieldChange for VolumeChange {
    fn field(&self) -> &'static str {
        match self {
            VolumeChange::Size(_) => "size",
            VolumeChange::VolumeType(_) => "volume_type",
            VolumeChange::AvailabilityZone(_) => "availability_zone",
            VolumeChange::Encrypted(_) => "encrypted",
        }
    }

    fn current(&self) -> String {
        match self {
            VolumeChange::Size(d) => d.current.render(),
            VolumeChange::VolumeType(d) | VolumeChange::AvailabilityZone(d) => d.current.render(),
            VolumeChange::Encrypted(d) => d.current.render(),
        }
    }

    fn desired(&self) -> String {
        match self {
            VolumeChange::Size(d) => d.desired.render(),
            VolumeChange::VolumeType(d) | VolumeChange::AvailabilityZone(d) => d.desired.render(),
            VolumeChange::Encrypted(d) => d.desired.render(),
        }
    }

    fn unsupported(&self) -> Option<&'static str> {
        Some(unsupported_reason(self.field()))
    }
}

pub struct VolumeHandler;

#[async_trait]
impl ResourceHandler for VolumeHandler {
    type Spec = VolumeSpec;
    type State = VolumeObserved;
    type Change = VolumeChange;

    async fn read(
        &self,
        ctx: &PassContext<'_>,
        _spec: &VolumeSpec,
        _refs: &mut CrossRefs,
    ) -> Result<Observed<VolumeObserved>> {
        let live: Vec<_> = ctx
            .client
            .describe_volumes(Lookup::Name(&ctx.identity.name))
            .await?
            .into_iter()
            .filter(|v| v.state.is_live())
            .collect();
        Ok(match single_live(ctx.identity, live)? {
            None => Observed::Absent,
            Some(volume) => Observed::Present {
                provider_id: volume.id,
                state: VolumeObserved {
                    size: volume.size,
                    volume_type: volume.volume_type,
                    availability_zone: volume.availability_zone,
                    encrypted: volume.encrypted,
                    lifecycle: volume.state,
                },
            },
        })
    }

    fn diff(
        &self,
        ctx: &PassContext<'_>,
        observed: &Observed<VolumeObserved>,
        spec: &VolumeSpec,
        purged: bool,
        _refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> ChangeSet<VolumeChange> {
        diff_presence(observed, purged, |state| {
            let zone = ctx.config.zone(spec.availability_zone.as_deref());
            [
                Delta::between(state.size, spec.size).map(VolumeChange::Size),
                Delta::between(state.volume_type.clone(), spec.volume_type.clone())
                    .map(VolumeChange::VolumeType),
                Delta::between(state.availability_zone.clone(), zone)
                    .map(VolumeChange::AvailabilityZone),
                Delta::between(state.encrypted, spec.encrypted).map(VolumeChange::Encrypted),
            ]
            .into_iter()
            .flatten()
            .collect()
        })
    }

    async fn apply(
        &self,
        ctx: &PassContext<'_>,
        spec: &VolumeSpec,
        observed: &Observed<VolumeObserved>,
        changes: &ChangeSet<VolumeChange>,
        _refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> Result<()> {
        match (changes, observed) {
            (ChangeSet::Create, _) => {
                let request = CreateVolumeRequest {
                    name: ctx.identity.name.clone(),
                    size: spec.size,
                    volume_type: spec.volume_type.clone(),
                    availability_zone: ctx.config.zone(spec.availability_zone.as_deref()),
                    encrypted: spec.encrypted,
                };
                let created = ctx.client.create_volume(&request).await?;
                tracing::info!(
                    "Created {} GiB volume {} ({})",
                    spec.size,
                    ctx.identity.name,
                    created.id
                );
                ensure_tagged(ctx, &created).await
            }
            (ChangeSet::Purge, Observed::Present { provider_id, .. }) => {
                ctx.client.delete_volume(provider_id).await?;
                tracing::info!("Deleted volume {} ({})", ctx.identity.name, provider_id);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn facts(
        &self,
        _ctx: &PassContext<'_>,
        provider_id: &str,
        state: &VolumeObserved,
    ) -> Result<Facts> {
        let mut facts = Facts::new();
        facts.insert("volume_id".to_string(), provider_id.to_string());
        facts.insert("size".to_string(), state.size.to_string());
        facts.insert("availability_zone".to_string(), state.availability_zone.clone());
        facts.insert("state".to_string(), state.lifecycle.to_string());
        Ok(facts)
    }
}
