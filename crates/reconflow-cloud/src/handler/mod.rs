//! Per-kind handlers: Reader, Differ and Applier for each resource kind

use crate::changeset::{ChangeSet, FieldChange};
use crate::crossref::CrossRefs;
use crate::error::{CloudError, Result};
use crate::identity::Identity;
use crate::observed::{Facts, Observed};
use crate::provider::{Created, NAME_TAG, ProviderClient, ProviderConfig, RetryConfig};
use crate::report::Diagnostics;
use async_trait::async_trait;
use std::fmt;

pub mod gateway;
pub mod load_balancer;
pub mod security_group;
pub mod subnet;
pub mod virtual_machine;
pub mod volume;
pub mod vpc;

pub use gateway::InternetGatewayHandler;
pub use load_balancer::LoadBalancerHandler;
pub use security_group::SecurityGroupHandler;
pub use subnet::SubnetHandler;
pub use virtual_machine::VirtualMachineHandler;
pub use volume::VolumeHandler;
pub use vpc::VpcHandler;

/// Everything a handler may use during one pass
pub struct PassContext<'a> {
    pub client: &'a dyn ProviderClient,
    pub config: &'a ProviderConfig,
    pub identity: &'a Identity,
    pub retry: &'a RetryConfig,
}

/// The contract every resource kind plugs into the reconciliation engine with
#[async_trait]
pub trait ResourceHandler: Send + Sync {
    /// Desired attributes
    type Spec: Send + Sync;
    /// Observed attributes
    type State: Send + Sync + fmt::Debug;
    type Change: FieldChange;

    /// Query the provider for the identity's current state, recording
    /// cross-references the Applier will need.
    async fn read(
        &self,
        ctx: &PassContext<'_>,
        spec: &Self::Spec,
        refs: &mut CrossRefs,
    ) -> Result<Observed<Self::State>>;

    /// Compare observed and desired state. Pure apart from warnings.
    ///
    /// Desired references that the Reader could not resolve are left out of
    /// the comparison, so an unresolvable name never produces a change.
    fn diff(
        &self,
        ctx: &PassContext<'_>,
        observed: &Observed<Self::State>,
        spec: &Self::Spec,
        purged: bool,
        refs: &CrossRefs,
        diag: &mut Diagnostics,
    ) -> ChangeSet<Self::Change>;

    /// Execute a non-empty change-set. Unsupported field changes have been
    /// rejected before this is called.
    async fn apply(
        &self,
        ctx: &PassContext<'_>,
        spec: &Self::Spec,
        observed: &Observed<Self::State>,
        changes: &ChangeSet<Self::Change>,
        refs: &CrossRefs,
        diag: &mut Diagnostics,
    ) -> Result<()>;

    /// Derived attributes of a present resource
    async fn facts(
        &self,
        ctx: &PassContext<'_>,
        provider_id: &str,
        state: &Self::State,
    ) -> Result<Facts>;
}

/// Presence rule shared by all kinds
///
/// Creation and deletion dominate; field comparison only runs when the
/// resource exists and should keep existing.
pub fn diff_presence<S, C: FieldChange>(
    observed: &Observed<S>,
    purged: bool,
    compare: impl FnOnce(&S) -> Vec<C>,
) -> ChangeSet<C> {
    match observed {
        Observed::Absent if purged => ChangeSet::Unchanged,
        Observed::Absent => ChangeSet::Create,
        Observed::Present { .. } if purged => ChangeSet::Purge,
        Observed::Present { state, .. } => ChangeSet::from_updates(compare(state)),
    }
}

/// Make sure a freshly created object carries the identity's name tag
///
/// Create calls send the tag along; an object that still came back untagged
/// is tagged separately, with backoff, since a new object is not always
/// visible to the tagging API straight away.
pub(crate) async fn ensure_tagged(ctx: &PassContext<'_>, created: &Created) -> Result<()> {
    if created.tagged {
        return Ok(());
    }
    tracing::debug!("{} was created without its name tag, tagging now", created.id);
    let tags = [(NAME_TAG, ctx.identity.name.as_str())];
    let mut attempt = 0;
    loop {
        match ctx.client.create_tags(&created.id, &tags).await {
            Ok(()) => return Ok(()),
            Err(CloudError::ApiError(msg)) if attempt + 1 < ctx.retry.max_attempts => {
                tracing::debug!(
                    "Tagging {} failed (attempt {}): {}; retrying",
                    created.id,
                    attempt + 1,
                    msg
                );
                tokio::time::sleep(ctx.retry.delay_for_attempt(attempt)).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Reason reported for a change to a field that is fixed after creation
pub(crate) fn unsupported_reason(field: &str) -> &'static str {
    match field {
        "flavor" | "image" => "the instance would have to be replaced",
        "user_data" => "user data is fixed at launch",
        "subnet" | "vpc" | "availability_zone" => "placement is fixed at creation",
        _ => "the provider offers no in-place update",
    }
}
