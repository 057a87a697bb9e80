//! Classic load balancer handler
//!
//! The load balancer's name is its identity at the provider, so it is never
//! tagged. Only the first listener and the first security group are managed;
//! membership is reconciled as a set of instance names.

use super::{PassContext, ResourceHandler, diff_presence, unsupported_reason};
use crate::changeset::{ChangeSet, Delta, FieldChange, Render};
use crate::crossref::{CrossRefs, RefKind};
use crate::descriptor::LoadBalancerSpec;
use crate::error::{CloudError, Result};
use crate::observed::{Facts, LoadBalancerObserved, Observed, single_live};
use crate::provider::{CreateLoadBalancerRequest, Listener, Lookup};
use crate::report::Diagnostics;
use async_trait::async_trait;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum LoadBalancerChange {
    Listener(Delta<Option<Listener>>),
    SecurityGroup(Delta<Option<String>>),
    Instances(Delta<BTreeSet<String>>),
    Subnets(Delta<BTreeSet<String>>),
}

impl FieldChange for LoadBalancerChange {
    fn field(&self) -> &'static str {
        match self {
            LoadBalancerChange::Listener(_) => "listener",
            LoadBalancerChange::SecurityGroup(_) => "security_group",
            LoadBalancerChange::Instances(_) => "instances",
            LoadBalancerChange::Subnets(_) => "subnets",
        }
    }

    fn current(&self) -> String {
        match self {
            LoadBalancerChange::Listener(d) => d.current.render(),
            LoadBalancerChange::SecurityGroup(d) => d.current.render(),
            LoadBalancerChange::Instances(d) | LoadBalancerChange::Subnets(d) => d.current.render(),
        }
    }

    fn desired(&self) -> String {
        match self {
            LoadBalancerChange::Listener(d) => d.desired.render(),
            LoadBalancerChange::SecurityGroup(d) => d.desired.render(),
            LoadBalancerChange::Instances(d) | LoadBalancerChange::Subnets(d) => d.desired.render(),
        }
    }

    fn unsupported(&self) -> Option<&'static str> {
        match self {
            LoadBalancerChange::Subnets(_) => Some(unsupported_reason("subnets")),
            _ => None,
        }
    }
}

fn desired_listener(spec: &LoadBalancerSpec) -> Listener {
    Listener::new(&spec.protocol, spec.listen_port, spec.dest_port)
}

pub struct LoadBalancerHandler;

impl LoadBalancerHandler {
    async fn replace_listener(
        &self,
        ctx: &PassContext<'_>,
        current: Option<&Listener>,
        desired: &Listener,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let name = &ctx.identity.name;
        match current {
            None => ctx.client.create_listener(name, desired).await?,
            Some(old) if old.listen_port != desired.listen_port => {
                ctx.client.create_listener(name, desired).await?;
                ctx.client.delete_listener(name, old.listen_port).await?;
            }
            Some(old) => {
                // the provider allows one listener per port
                diag.warn(
                    "listener",
                    format!(
                        "replacing {} with {}: port {} is briefly unserved",
                        old, desired, old.listen_port
                    ),
                );
                ctx.client.delete_listener(name, old.listen_port).await?;
                ctx.client.create_listener(name, desired).await?;
            }
        }
        tracing::info!("Listener of {} is now {}", name, desired);
        Ok(())
    }

    async fn update_members(
        &self,
        ctx: &PassContext<'_>,
        delta: &Delta<BTreeSet<String>>,
        refs: &CrossRefs,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let name = &ctx.identity.name;
        let (add, remove) = delta.set_delta();

        let add_ids = refs.resolve_all(RefKind::Instance, &add, "instances", diag);
        if !add_ids.is_empty() {
            ctx.client.register_instances(name, &add_ids).await?;
        }

        let mut remove_ids = Vec::new();
        for member in &remove {
            match refs.resolve(RefKind::Instance, member) {
                Ok(id) => remove_ids.push(id.to_string()),
                // unnamed members are reported by id
                Err(CloudError::DanglingReference { .. }) => remove_ids.push(member.clone()),
                Err(e) => diag.warn("instances", format!("not deregistering: {}", e)),
            }
        }
        if !remove_ids.is_empty() {
            ctx.client.deregister_instances(name, &remove_ids).await?;
        }

        tracing::info!(
            "Membership of {}: {} registered, {} deregistered",
            name,
            add_ids.len(),
            remove_ids.len()
        );
        Ok(())
    }
}

#[async_trait]
impl ResourceHandler for LoadBalancerHandler {
    type Spec = LoadBalancerSpec;
    type State = LoadBalancerObserved;
    type Change = LoadBalancerChange;

    async fn read(
        &self,
        ctx: &PassContext<'_>,
        spec: &LoadBalancerSpec,
        refs: &mut CrossRefs,
    ) -> Result<Observed<LoadBalancerObserved>> {
        for instance in ctx.client.describe_instances(Lookup::All).await? {
            if let (Some(name), true) = (instance.name, instance.state.is_live()) {
                refs.insert(RefKind::Instance, name, instance.id);
            }
        }
        for group in ctx.client.describe_security_groups(Lookup::All).await? {
            let name = group.name.unwrap_or(group.group_name);
            refs.insert(RefKind::SecurityGroup, name, group.id);
        }
        if !spec.subnets.is_empty() {
            for subnet in ctx.client.describe_subnets(Lookup::All).await? {
                if let Some(name) = subnet.name {
                    refs.insert(RefKind::Subnet, name, subnet.id);
                }
            }
        }

        let balancers: Vec<_> = ctx
            .client
            .describe_load_balancers(Some(&ctx.identity.name))
            .await?
            .into_iter()
            .filter(|lb| lb.name == ctx.identity.name)
            .collect();
        let Some(lb) = single_live(ctx.identity, balancers)? else {
            return Ok(Observed::Absent);
        };

        let state = LoadBalancerObserved {
            dns_name: lb.dns_name,
            listeners: lb.listeners,
            security_groups: lb
                .security_group_ids
                .iter()
                .map(|id| refs.display_name(RefKind::SecurityGroup, id))
                .collect(),
            instances: lb
                .instance_ids
                .iter()
                .map(|id| refs.display_name(RefKind::Instance, id))
                .collect(),
            subnets: lb
                .subnet_ids
                .iter()
                .map(|id| refs.display_name(RefKind::Subnet, id))
                .collect(),
        };
        Ok(Observed::Present {
            provider_id: lb.name,
            state,
        })
    }

    fn diff(
        &self,
        _ctx: &PassContext<'_>,
        observed: &Observed<LoadBalancerObserved>,
        spec: &LoadBalancerSpec,
        purged: bool,
        refs: &CrossRefs,
        diag: &mut Diagnostics,
    ) -> ChangeSet<LoadBalancerChange> {
        diff_presence(observed, purged, |state| {
            let mut changes = Vec::new();

            if state.listeners.len() > 1 {
                diag.warn(
                    "listener",
                    format!(
                        "{} listeners present, only the first is managed",
                        state.listeners.len()
                    ),
                );
            }
            let desired = desired_listener(spec);
            let current = state.listeners.first();
            if !current.is_some_and(|l| l.same_as(&desired)) {
                changes.push(LoadBalancerChange::Listener(Delta {
                    current: current.cloned(),
                    desired: Some(desired),
                }));
            }

            let current_groups: BTreeSet<String> = state.security_groups.iter().cloned().collect();
            let group = refs
                .settled_names(
                    RefKind::SecurityGroup,
                    spec.security_group.iter(),
                    &current_groups,
                    "security_group",
                    diag,
                )
                .into_iter()
                .next();
            if let Some(group) = group {
                if state.security_groups.len() > 1 {
                    diag.warn(
                        "security_group",
                        format!(
                            "{} security groups attached, only the first is managed",
                            state.security_groups.len()
                        ),
                    );
                }
                let current = state.security_groups.first().cloned();
                if let Some(d) = Delta::between(current, Some(group)) {
                    changes.push(LoadBalancerChange::SecurityGroup(d));
                }
            }

            let desired = refs.settled_names(
                RefKind::Instance,
                &spec.instances,
                &state.instances,
                "instances",
                diag,
            );
            if let Some(d) = Delta::between(state.instances.clone(), desired) {
                changes.push(LoadBalancerChange::Instances(d));
            }

            if !spec.subnets.is_empty() {
                let desired = refs.settled_names(
                    RefKind::Subnet,
                    &spec.subnets,
                    &state.subnets,
                    "subnets",
                    diag,
                );
                if !desired.is_empty()
                    && let Some(d) = Delta::between(state.subnets.clone(), desired)
                {
                    changes.push(LoadBalancerChange::Subnets(d));
                }
            }
            changes
        })
    }

    async fn apply(
        &self,
        ctx: &PassContext<'_>,
        spec: &LoadBalancerSpec,
        observed: &Observed<LoadBalancerObserved>,
        changes: &ChangeSet<LoadBalancerChange>,
        refs: &CrossRefs,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        let name = &ctx.identity.name;
        match (changes, observed) {
            (ChangeSet::Create, _) => {
                let security_group_ids = refs.resolve_all(
                    RefKind::SecurityGroup,
                    spec.security_group.iter(),
                    "security_group",
                    diag,
                );
                let subnet_ids = refs.resolve_all(RefKind::Subnet, &spec.subnets, "subnets", diag);
                let availability_zones = if subnet_ids.is_empty() {
                    vec![ctx.config.zone(None)]
                } else {
                    Vec::new()
                };
                let request = CreateLoadBalancerRequest {
                    name: name.clone(),
                    listener: desired_listener(spec),
                    security_group_ids,
                    subnet_ids,
                    availability_zones,
                };
                let dns_name = ctx.client.create_load_balancer(&request).await?;
                tracing::info!("Created load balancer {} ({})", name, dns_name);

                let members = refs.resolve_all(RefKind::Instance, &spec.instances, "instances", diag);
                if !members.is_empty() {
                    ctx.client.register_instances(name, &members).await?;
                }
                Ok(())
            }
            (ChangeSet::Purge, Observed::Present { .. }) => {
                ctx.client.delete_load_balancer(name).await?;
                tracing::info!("Deleted load balancer {}", name);
                Ok(())
            }
            (ChangeSet::Update(updates), Observed::Present { state, .. }) => {
                for change in updates {
                    match change {
                        LoadBalancerChange::Listener(d) => {
                            if let Some(desired) = &d.desired {
                                self.replace_listener(ctx, state.listeners.first(), desired, diag)
                                    .await?;
                            }
                        }
                        LoadBalancerChange::SecurityGroup(d) => {
                            let ids = refs.resolve_all(
                                RefKind::SecurityGroup,
                                d.desired.iter(),
                                "security_group",
                                diag,
                            );
                            if !ids.is_empty() {
                                ctx.client.apply_security_groups(name, &ids).await?;
                            }
                        }
                        LoadBalancerChange::Instances(d) => {
                            self.update_members(ctx, d, refs, diag).await?
                        }
                        LoadBalancerChange::Subnets(_) => {}
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
        state: &LoadBalancerObserved,
    ) -> Result<Facts> {
        let mut facts = Facts::new();
        facts.insert("name".to_string(), provider_id.to_string());
        if let Some(dns_name) = &state.dns_name {
            facts.insert("dns_name".to_string(), dns_name.clone());
        }
        if let Some(listener) = state.listeners.first() {
            facts.insert("listener".to_string(), listener.to_string());
        }
        Ok(facts)
    }
}
