//! Reconciliation driver
//!
//! Runs one pass for one descriptor:
//!
//! ```text
//! Validating -> Reading -> Diffing -> Applying -> Done
//!      |           |          |           |
//!      +-----------+----------+-----------+--> Failed / Skipped / NoOp
//! ```
//!
//! Every pass opens its own provider session and re-reads observed state; no
//! state is carried over between passes.

use crate::changeset::{ChangeEntry, ChangeSet, FieldChange};
use crate::crossref::CrossRefs;
use crate::descriptor::{Descriptor, ResourceSpec};
use crate::error::{CloudError, Result};
use crate::handler::*;
use crate::identity::Identity;
use crate::observed::{Facts, Observed};
use crate::provider::{AuthStatus, Connector, ProviderConfig, RetryConfig, Session};
use crate::report::{Diagnostics, Outcome, Phase, Plan, Report};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

/// Expand `$body` once per kind with `$handler` and `$spec` bound to the
/// kind's handler and typed attributes.
macro_rules! with_handler {
    ($spec:expr, |$handler:ident, $s:ident| $body:expr) => {
        match $spec {
            ResourceSpec::VirtualMachine($s) => {
                let $handler = VirtualMachineHandler;
                $body
            }
            ResourceSpec::LoadBalancer($s) => {
                let $handler = LoadBalancerHandler;
                $body
            }
            ResourceSpec::Vpc($s) => {
                let $handler = VpcHandler;
                $body
            }
            ResourceSpec::Subnet($s) => {
                let $handler = SubnetHandler;
                $body
            }
            ResourceSpec::InternetGateway($s) => {
                let $handler = InternetGatewayHandler;
                $body
            }
            ResourceSpec::SecurityGroup($s) => {
                let $handler = SecurityGroupHandler;
                $body
            }
            ResourceSpec::Volume($s) => {
                let $handler = VolumeHandler;
                $body
            }
        }
    };
}

/// Outcome and rendered change-set of one state machine run
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PassResult {
    pub outcome: Outcome,
    pub changes: Vec<ChangeEntry>,
}

impl PassResult {
    fn failed(phase: Phase, error: CloudError, attempted: Vec<ChangeEntry>) -> Self {
        Self {
            outcome: Outcome::Failed {
                phase,
                reason: error.to_string(),
                attempted: attempted.clone(),
            },
            changes: attempted,
        }
    }
}

/// Read -> diff -> apply for one identity inside an open session
pub(crate) async fn run_pass<H: ResourceHandler>(
    handler: &H,
    ctx: &PassContext<'_>,
    spec: &H::Spec,
    purged: bool,
    diag: &mut Diagnostics,
) -> PassResult {
    tracing::debug!(identity = %ctx.identity, phase = %Phase::Reading);
    let mut refs = CrossRefs::new();
    let observed = match handler.read(ctx, spec, &mut refs).await {
        Ok(observed) => observed,
        Err(e @ CloudError::AmbiguousIdentity { .. }) => {
            tracing::warn!(identity = %ctx.identity, "Skipping: {}", e);
            return PassResult {
                outcome: Outcome::Skipped {
                    reason: e.to_string(),
                },
                changes: Vec::new(),
            };
        }
        Err(e) => return PassResult::failed(Phase::Reading, e, Vec::new()),
    };

    tracing::debug!(identity = %ctx.identity, phase = %Phase::Diffing, present = observed.is_present());
    let changes = handler.diff(ctx, &observed, spec, purged, &refs, diag);
    let entries = changes.entries();
    if changes.is_empty() {
        return PassResult {
            outcome: Outcome::NoOp,
            changes: entries,
        };
    }
    if let Some((change, reason)) = changes.first_unsupported() {
        let error = CloudError::UnsupportedUpdate {
            identity: ctx.identity.clone(),
            field: change.field(),
            reason: reason.to_string(),
        };
        return PassResult::failed(Phase::Applying, error, entries);
    }

    tracing::debug!(identity = %ctx.identity, phase = %Phase::Applying, changes = entries.len());
    if let Err(e) = handler
        .apply(ctx, spec, &observed, &changes, &refs, diag)
        .await
    {
        return PassResult::failed(Phase::Applying, e, entries);
    }

    let outcome = match changes {
        ChangeSet::Create => Outcome::Created,
        ChangeSet::Purge => Outcome::Purged,
        ChangeSet::Update(_) => Outcome::Updated,
        ChangeSet::Unchanged => Outcome::NoOp,
    };
    tracing::debug!(identity = %ctx.identity, phase = %Phase::Done, outcome = outcome.label());
    PassResult {
        outcome,
        changes: entries,
    }
}

/// Read -> diff only
pub(crate) async fn plan_pass<H: ResourceHandler>(
    handler: &H,
    ctx: &PassContext<'_>,
    spec: &H::Spec,
    purged: bool,
    diag: &mut Diagnostics,
) -> Result<Vec<ChangeEntry>> {
    let mut refs = CrossRefs::new();
    let observed = handler.read(ctx, spec, &mut refs).await?;
    Ok(handler.diff(ctx, &observed, spec, purged, &refs, diag).entries())
}

async fn facts_pass<H: ResourceHandler>(
    handler: &H,
    ctx: &PassContext<'_>,
    spec: &H::Spec,
) -> Result<Facts> {
    let mut refs = CrossRefs::new();
    match handler.read(ctx, spec, &mut refs).await? {
        Observed::Present { provider_id, state } => handler.facts(ctx, &provider_id, &state).await,
        Observed::Absent => Ok(Facts::new()),
    }
}

/// Drives reconciliation passes against the configured provider scopes
pub struct Driver {
    connector: Arc<dyn Connector>,
    providers: HashMap<String, ProviderConfig>,
    retry: RetryConfig,
}

impl Driver {
    pub fn new(
        connector: Arc<dyn Connector>,
        providers: impl IntoIterator<Item = ProviderConfig>,
    ) -> Self {
        Self {
            connector,
            providers: providers
                .into_iter()
                .map(|p| (p.name.clone(), p))
                .collect(),
            retry: RetryConfig::default(),
        }
    }

    /// Retry policy for eventually consistent provider operations
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    pub fn retry(&self) -> &RetryConfig {
        &self.retry
    }

    /// Configuration of a provider scope
    pub fn provider(&self, identity: &Identity) -> Result<&ProviderConfig> {
        self.providers
            .get(&identity.scope)
            .ok_or_else(|| CloudError::InvalidDesiredState {
                identity: identity.clone(),
                reason: format!("unknown provider '{}'", identity.scope),
            })
    }

    /// Static checks; no provider call is made
    pub fn validate(&self, descriptor: &Descriptor) -> Result<()> {
        descriptor.validate()?;
        self.provider(&descriptor.identity())?;
        Ok(())
    }

    /// Open a session for a descriptor's scope
    pub async fn open_session(&self, identity: &Identity) -> Result<Session> {
        let config = self.provider(identity)?;
        Session::open(self.connector.as_ref(), config).await
    }

    /// Check credentials for one provider scope
    pub async fn check_auth(&self, scope: &str) -> Result<AuthStatus> {
        let config = self
            .providers
            .get(scope)
            .ok_or_else(|| CloudError::ProviderUnavailable(format!("unknown provider '{}'", scope)))?;
        let session = Session::open(self.connector.as_ref(), config).await?;
        session.client().check_auth().await
    }

    /// Run one full reconciliation pass
    ///
    /// Never returns an error: every failure ends up in the report's outcome.
    pub async fn reconcile(&self, descriptor: &Descriptor) -> Report {
        let started_at = Utc::now();
        let timer = Instant::now();
        let identity = descriptor.identity();
        let mut diag = Diagnostics::new(identity.clone());

        let result = match self.validate(descriptor) {
            Err(e) => PassResult::failed(Phase::Validating, e, Vec::new()),
            Ok(()) => match self.open_session(&identity).await {
                Err(e) => PassResult::failed(Phase::Reading, e, Vec::new()),
                Ok(session) => {
                    let ctx = PassContext {
                        client: session.client(),
                        config: session.config(),
                        identity: &identity,
                        retry: &self.retry,
                    };
                    with_handler!(&descriptor.spec, |handler, spec| {
                        run_pass(&handler, &ctx, spec, descriptor.purged, &mut diag).await
                    })
                }
            },
        };

        match &result.outcome {
            Outcome::Failed { .. } => {
                tracing::error!(identity = %identity, "{}", result.outcome)
            }
            outcome => tracing::info!(identity = %identity, "{}", outcome),
        }

        Report {
            identity,
            outcome: result.outcome,
            changes: result.changes,
            warnings: diag.into_warnings(),
            started_at,
            duration_ms: timer.elapsed().as_millis() as u64,
        }
    }

    /// Compute the change-set a pass would apply, without mutating anything
    pub async fn plan(&self, descriptor: &Descriptor) -> Result<Plan> {
        self.validate(descriptor)?;
        let identity = descriptor.identity();
        let session = self.open_session(&identity).await?;
        let ctx = PassContext {
            client: session.client(),
            config: session.config(),
            identity: &identity,
            retry: &self.retry,
        };
        let mut diag = Diagnostics::new(identity.clone());
        let changes = with_handler!(&descriptor.spec, |handler, spec| {
            plan_pass(&handler, &ctx, spec, descriptor.purged, &mut diag).await?
        });
        Ok(Plan {
            identity: identity.clone(),
            changes,
            warnings: diag.into_warnings(),
        })
    }

    /// Derived attributes of the resource; empty when it does not exist
    pub async fn facts(&self, descriptor: &Descriptor) -> Result<Facts> {
        self.validate(descriptor)?;
        let identity = descriptor.identity();
        let session = self.open_session(&identity).await?;
        let ctx = PassContext {
            client: session.client(),
            config: session.config(),
            identity: &identity,
            retry: &self.retry,
        };
        with_handler!(&descriptor.spec, |handler, spec| {
            facts_pass(&handler, &ctx, spec).await
        })
    }

    /// Poll until a pass would be a no-op
    ///
    /// Provider state can lag behind a successful apply; this re-plans with
    /// backoff and gives up with a timeout after `retry.max_attempts` plans.
    pub async fn wait_converged(&self, descriptor: &Descriptor, retry: &RetryConfig) -> Result<()> {
        let identity = descriptor.identity();
        for attempt in 0..retry.max_attempts {
            let plan = self.plan(descriptor).await?;
            if !plan.has_changes() {
                tracing::debug!(identity = %identity, attempts = attempt + 1, "Converged");
                return Ok(());
            }
            tracing::debug!(
                identity = %identity,
                "Not converged yet ({} pending changes)",
                plan.changes.len()
            );
            if attempt + 1 < retry.max_attempts {
                tokio::time::sleep(retry.delay_for_attempt(attempt)).await;
            }
        }
        Err(CloudError::Timeout(format!(
            "{} did not converge after {} attempts",
            identity, retry.max_attempts
        )))
    }
}
