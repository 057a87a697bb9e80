//! Security group handler
//!
//! Rules are compared in normalized form as a set. Updates authorize the
//! missing rules before revoking the extra ones.

use super::{PassContext, ResourceHandler, diff_presence, ensure_tagged, unsupported_reason};
use crate::changeset::{ChangeSet, Delta, FieldChange, Render};
use crate::crossref::{CrossRefs, RefKind};
use crate::descriptor::{Rule, SecurityGroupSpec};
use crate::error::Result;
use crate::observed::{Facts, Observed, SecurityGroupObserved, single_live};
use crate::provider::{CreateSecurityGroupRequest, Lookup};
use crate::report::Diagnostics;
use async_trait::async_trait;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum SecurityGroupChange {
    Description(Delta<String>),
    Vpc(Delta<String>),
    Rules(Delta<BTreeSet<Rule>>),
}

impl FieldChange for SecurityGroupChange {
    fn field(&self) -> &'static str {
        match self {
            SecurityGroupChange::Description(_) => "description",
            SecurityGroupChange::Vpc(_) => "vpc",
            SecurityGroupChange::Rules(_) => "rules",
        }
    }

    fn current(&self) -> String {
        match self {
            SecurityGroupChange::Description(d) | SecurityGroupChange::Vpc(d) => d.current.render(),
            SecurityGroupChange::Rules(d) => d.current.render(),
        }
    }

    fn desired(&self) -> String {
        match self {
            SecurityGroupChange::Description(d) | SecurityGroupChange::Vpc(d) => d.desired.render(),
            SecurityGroupChange::Rules(d) => d.desired.render(),
        }
    }

    fn unsupported(&self) -> Option<&'static str> {
        match self {
            SecurityGroupChange::Rules(_) => None,
            other => Some(unsupported_reason(other.field())),
        }
    }
}

fn desired_description(ctx: &PassContext<'_>, spec: &SecurityGroupSpec) -> String {
    if spec.description.is_empty() {
        ctx.identity.name.clone()
    } else {
        spec.description.clone()
    }
}

fn desired_rules(spec: &SecurityGroupSpec) -> BTreeSet<Rule> {
    spec.rules.iter().map(Rule::normalized).collect()
}

pub struct SecurityGroupHandler;

#[async_trait]
impl ResourceHandler for SecurityGroupHandler {
    type Spec = SecurityGroupSpec;
    type State = SecurityGroupObserved;
    type Change = SecurityGroupChange;

    async fn read(
        &self,
        ctx: &PassContext<'_>,
        spec: &SecurityGroupSpec,
        refs: &mut CrossRefs,
    ) -> Result<Observed<SecurityGroupObserved>> {
        for vpc in ctx.client.describe_vpcs(Lookup::Name(&spec.vpc)).await? {
            refs.insert(RefKind::Vpc, &spec.vpc, vpc.id);
        }

        let groups = ctx
            .client
            .describe_security_groups(Lookup::Name(&ctx.identity.name))
            .await?;
        let Some(group) = single_live(ctx.identity, groups)? else {
            return Ok(Observed::Absent);
        };

        let vpc_name = match &group.vpc_id {
            Some(vpc_id) => match refs.name_of(RefKind::Vpc, vpc_id) {
                Some(name) => Some(name.to_string()),
                None => ctx
                    .client
                    .describe_vpcs(Lookup::Id(vpc_id))
                    .await?
                    .into_iter()
                    .find_map(|vpc| vpc.name),
            },
            None => None,
        };

        Ok(Observed::Present {
            provider_id: group.id,
            state: SecurityGroupObserved {
                group_name: group.group_name,
                description: group.description,
                vpc_id: group.vpc_id,
                vpc_name,
                rules: group.rules.iter().map(Rule::normalized).collect(),
            },
        })
    }

    fn diff(
        &self,
        ctx: &PassContext<'_>,
        observed: &Observed<SecurityGroupObserved>,
        spec: &SecurityGroupSpec,
        purged: bool,
        _refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> ChangeSet<SecurityGroupChange> {
        diff_presence(observed, purged, |state| {
            let mut changes = Vec::new();
            if let Some(d) =
                Delta::between(state.description.clone(), desired_description(ctx, spec))
            {
                changes.push(SecurityGroupChange::Description(d));
            }
            let current_vpc = state
                .vpc_name
                .clone()
                .or_else(|| state.vpc_id.clone())
                .unwrap_or_default();
            if let Some(d) = Delta::between(current_vpc, spec.vpc.clone()) {
                changes.push(SecurityGroupChange::Vpc(d));
            }
            if let Some(d) = Delta::between(state.rules.clone(), desired_rules(spec)) {
                changes.push(SecurityGroupChange::Rules(d));
            }
            changes
        })
    }

    async fn apply(
        &self,
        ctx: &PassContext<'_>,
        spec: &SecurityGroupSpec,
        observed: &Observed<SecurityGroupObserved>,
        changes: &ChangeSet<SecurityGroupChange>,
        refs: &CrossRefs,
        _diag: &mut Diagnostics,
    ) -> Result<()> {
        match (changes, observed) {
            (ChangeSet::Create, _) => {
                let vpc_id = refs.resolve(RefKind::Vpc, &spec.vpc)?;
                let request = CreateSecurityGroupRequest {
                    name: ctx.identity.name.clone(),
                    group_name: ctx.identity.name.clone(),
                    description: desired_description(ctx, spec),
                    vpc_id: vpc_id.to_string(),
                };
                let created = ctx.client.create_security_group(&request).await?;
                tracing::info!(
                    "Created security group {} ({}) in {}",
                    ctx.identity.name,
                    created.id,
                    vpc_id
                );
                ensure_tagged(ctx, &created).await?;

                let rules: Vec<Rule> = desired_rules(spec).into_iter().collect();
                if !rules.is_empty() {
                    ctx.client.authorize_rules(&created.id, &rules).await?;
                }
                Ok(())
            }
            (ChangeSet::Purge, Observed::Present { provider_id, .. }) => {
                ctx.client.delete_security_group(provider_id).await?;
                tracing::info!(
                    "Deleted security group {} ({})",
                    ctx.identity.name,
                    provider_id
                );
                Ok(())
            }
            (ChangeSet::Update(updates), Observed::Present { provider_id, .. }) => {
                for change in updates {
                    let SecurityGroupChange::Rules(delta) = change else {
                        continue;
                    };
                    let (add, remove) = delta.set_delta();
                    if !add.is_empty() {
                        ctx.client.authorize_rules(provider_id, &add).await?;
                    }
                    if !remove.is_empty() {
                        ctx.client.revoke_rules(provider_id, &remove).await?;
                    }
                    tracing::info!(
                        "Updated rules of {}: {} added, {} revoked",
                        ctx.identity.name,
                        add.len(),
                        remove.len()
                    );
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
        state: &SecurityGroupObserved,
    ) -> Result<Facts> {
        let mut facts = Facts::new();
        facts.insert("group_id".to_string(), provider_id.to_string());
        facts.insert("group_name".to_string(), state.group_name.clone());
        if let Some(vpc_id) = &state.vpc_id {
            facts.insert("vpc_id".to_string(), vpc_id.clone());
        }
        Ok(facts)
    }
}
