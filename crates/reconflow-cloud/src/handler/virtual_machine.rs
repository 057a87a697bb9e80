//! Virtual machine handler
//!
//! Instances are matched by their `Name` tag; shutting-down and terminated
//! instances count as absent. The key pair is imported on demand when the
//! descriptor carries public key material.

use super::{PassContext, ResourceHandler, diff_presence, ensure_tagged, unsupported_reason};
use crate::changeset::{ChangeSet, Delta, FieldChange, Render};
use crate::crossref::{CrossRefs, RefKind};
use crate::descriptor::{SubnetRef, VirtualMachineSpec};
use crate::error::Result;
use crate::net::Cidr;
use crate::observed::{Facts, Observed, VirtualMachineObserved, single_live};
use crate::provider::{LaunchRequest, Lookup};
use crate::report::Diagnostics;
use async_trait::async_trait;
use std::collections::BTreeSet;

#[derive(Debug, Clone, PartialEq)]
pub enum VirtualMachineChange {
    Flavor(Delta<String>),
    Image(Delta<String>),
    KeyName(Delta<Option<String>>),
    /// Key pair missing at the provider and importable
    KeyPair(Delta<bool>),
    Subnet(Delta<String>),
    UserData(Delta<String>),
    SourceDestCheck(Delta<bool>),
    SecurityGroups(Delta<BTreeSet<String>>),
}

impl FieldChange for VirtualMachineChange {
    fn field(&self) -> &'static str {
        match self {
            VirtualMachineChange::Flavor(_) => "flavor",
            VirtualMachineChange::Image(_) => "image",
            VirtualMachineChange::KeyName(_) => "key_name",
            VirtualMachineChange::KeyPair(_) => "key_pair",
            VirtualMachineChange::Subnet(_) => "subnet",
            VirtualMachineChange::UserData(_) => "user_data",
            VirtualMachineChange::SourceDestCheck(_) => "source_dest_check",
            VirtualMachineChange::SecurityGroups(_) => "security_groups",
        }
    }

    fn current(&self) -> String {
        use VirtualMachineChange::*;
        match self {
            Flavor(d) | Image(d) | Subnet(d) | UserData(d) => d.current.render(),
            KeyName(d) => d.current.render(),
            KeyPair(d) | SourceDestCheck(d) => d.current.render(),
            SecurityGroups(d) => d.current.render(),
        }
    }

    fn desired(&self) -> String {
        use VirtualMachineChange::*;
        match self {
            Flavor(d) | Image(d) | Subnet(d) | UserData(d) => d.desired.render(),
            KeyName(d) => d.desired.render(),
            KeyPair(d) | SourceDestCheck(d) => d.desired.render(),
            SecurityGroups(d) => d.desired.render(),
        }
    }

    fn unsupported(&self) -> Option<&'static str> {
        match self {
            VirtualMachineChange::KeyPair(_)
            | VirtualMachineChange::SourceDestCheck(_)
            | VirtualMachineChange::SecurityGroups(_) => None,
            other => Some(unsupported_reason(other.field())),
        }
    }
}

pub struct VirtualMachineHandler;

impl VirtualMachineHandler {
    async fn import_key(
        &self,
        ctx: &PassContext<'_>,
        spec: &VirtualMachineSpec,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        match &spec.key_value {
            Some(public_key) => {
                ctx.client.import_key_pair(&spec.key_name, public_key).await?;
                tracing::info!("Imported key pair {}", spec.key_name);
            }
            None => diag.warn(
                "key_pair",
                format!(
                    "key pair '{}' does not exist and no key_value is given to import it",
                    spec.key_name
                ),
            ),
        }
        Ok(())
    }
}

#[async_trait]
impl ResourceHandler for VirtualMachineHandler {
    type Spec = VirtualMachineSpec;
    type State = VirtualMachineObserved;
    type Change = VirtualMachineChange;

    async fn read(
        &self,
        ctx: &PassContext<'_>,
        spec: &VirtualMachineSpec,
        refs: &mut CrossRefs,
    ) -> Result<Observed<VirtualMachineObserved>> {
        let key_pair = ctx.client.describe_key_pair(&spec.key_name).await?;
        if let Some(key) = &key_pair {
            refs.insert(RefKind::KeyPair, &key.name, &key.name);
        }

        if let Some(SubnetRef::Name(name)) = spec.subnet_ref() {
            for subnet in ctx.client.describe_subnets(Lookup::Name(name)).await? {
                refs.insert(RefKind::Subnet, name, subnet.id);
            }
        }

        if !spec.security_groups.is_empty() {
            for group in ctx.client.describe_security_groups(Lookup::All).await? {
                let name = group.name.unwrap_or(group.group_name);
                refs.insert(RefKind::SecurityGroup, name, group.id);
            }
        }

        let live: Vec<_> = ctx
            .client
            .describe_instances(Lookup::Name(&ctx.identity.name))
            .await?
            .into_iter()
            .filter(|i| i.state.is_live())
            .collect();
        let Some(instance) = single_live(ctx.identity, live)? else {
            return Ok(Observed::Absent);
        };

        let user_data = ctx.client.instance_user_data(&instance.id).await?;
        let subnet_name = match &instance.subnet_id {
            Some(subnet_id) => match refs.name_of(RefKind::Subnet, subnet_id) {
                Some(name) => Some(name.to_string()),
                None => ctx
                    .client
                    .describe_subnets(Lookup::Id(subnet_id))
                    .await?
                    .into_iter()
                    .find_map(|s| s.name),
            },
            None => None,
        };
        let security_groups = instance
            .security_groups
            .iter()
            .map(|g| {
                refs.name_of(RefKind::SecurityGroup, &g.id)
                    .unwrap_or(&g.name)
                    .to_string()
            })
            .collect();

        Ok(Observed::Present {
            provider_id: instance.id,
            state: VirtualMachineObserved {
                lifecycle: instance.state,
                flavor: instance.flavor,
                image: instance.image,
                key_name: instance.key_name,
                key_pair_exists: key_pair.is_some(),
                subnet_id: instance.subnet_id,
                subnet_name,
                user_data,
                source_dest_check: instance.source_dest_check,
                security_groups,
                private_ip: instance.private_ip,
                public_ip: instance.public_ip,
                mac_address: instance.mac_address,
                availability_zone: instance.availability_zone,
            },
        })
    }

    fn diff(
        &self,
        _ctx: &PassContext<'_>,
        observed: &Observed<VirtualMachineObserved>,
        spec: &VirtualMachineSpec,
        purged: bool,
        refs: &CrossRefs,
        diag: &mut Diagnostics,
    ) -> ChangeSet<VirtualMachineChange> {
        use VirtualMachineChange::*;

        diff_presence(observed, purged, |state| {
            let mut changes = Vec::new();
            if let Some(d) = Delta::between(state.flavor.clone(), spec.flavor.clone()) {
                changes.push(Flavor(d));
            }
            if let Some(d) = Delta::between(state.image.clone(), spec.image.clone()) {
                changes.push(Image(d));
            }
            if let Some(d) = Delta::between(state.key_name.clone(), Some(spec.key_name.clone())) {
                changes.push(KeyName(d));
            }
            if !state.key_pair_exists {
                if spec.key_value.is_some() {
                    changes.push(KeyPair(Delta {
                        current: false,
                        desired: true,
                    }));
                } else {
                    diag.warn(
                        "key_pair",
                        format!("key pair '{}' no longer exists", spec.key_name),
                    );
                }
            }

            let current_subnet = match spec.subnet_ref() {
                Some(SubnetRef::Id(_)) => state.subnet_id.clone(),
                Some(SubnetRef::Name(_)) => {
                    state.subnet_name.clone().or_else(|| state.subnet_id.clone())
                }
                None => None,
            };
            let desired_subnet = match spec.subnet_ref() {
                Some(SubnetRef::Id(id)) => Some(id.to_string()),
                Some(SubnetRef::Name(name)) => Some(name.to_string()),
                None => None,
            };
            if let (Some(current), Some(desired)) = (current_subnet, desired_subnet) {
                if let Some(d) = Delta::between(current, desired) {
                    changes.push(Subnet(d));
                }
            }

            if let Some(current) = &state.user_data {
                if let Some(d) = Delta::between(current.clone(), spec.user_data.clone()) {
                    changes.push(UserData(d));
                }
            }
            if let Some(current) = state.source_dest_check {
                if let Some(d) = Delta::between(current, spec.source_dest_check) {
                    changes.push(SourceDestCheck(d));
                }
            }
            if !spec.security_groups.is_empty() {
                let desired = refs.settled_names(
                    RefKind::SecurityGroup,
                    &spec.security_groups,
                    &state.security_groups,
                    "security_groups",
                    diag,
                );
                if desired.is_empty() {
                    diag.warn(
                        "security_groups",
                        "none of the desired groups exist, leaving groups unchanged",
                    );
                } else if let Some(d) = Delta::between(state.security_groups.clone(), desired) {
                    changes.push(SecurityGroups(d));
                }
            }
            changes
        })
    }

    async fn apply(
        &self,
        ctx: &PassContext<'_>,
        spec: &VirtualMachineSpec,
        observed: &Observed<VirtualMachineObserved>,
        changes: &ChangeSet<VirtualMachineChange>,
        refs: &CrossRefs,
        diag: &mut Diagnostics,
    ) -> Result<()> {
        match (changes, observed) {
            (ChangeSet::Create, _) => {
                if !refs.contains(RefKind::KeyPair, &spec.key_name) {
                    self.import_key(ctx, spec, diag).await?;
                }
                let subnet_id = match spec.subnet_ref() {
                    Some(SubnetRef::Name(name)) => refs.resolve(RefKind::Subnet, name)?.to_string(),
                    Some(SubnetRef::Id(id)) => id.to_string(),
                    None => String::new(),
                };
                let security_group_ids = refs.resolve_all(
                    RefKind::SecurityGroup,
                    &spec.security_groups,
                    "security_groups",
                    diag,
                );

                let request = LaunchRequest {
                    name: ctx.identity.name.clone(),
                    flavor: spec.flavor.clone(),
                    image: spec.image.clone(),
                    key_name: spec.key_name.clone(),
                    subnet_id,
                    user_data: spec.user_data.clone(),
                    security_group_ids,
                };
                let created = ctx.client.launch_instance(&request).await?;
                tracing::info!(
                    "Launched {} ({}) from {} in {}",
                    ctx.identity.name,
                    created.id,
                    request.image,
                    request.subnet_id
                );
                ensure_tagged(ctx, &created).await?;
                if !spec.source_dest_check {
                    ctx.client.set_source_dest_check(&created.id, false).await?;
                }
                Ok(())
            }
            (ChangeSet::Purge, Observed::Present { provider_id, .. }) => {
                ctx.client.terminate_instance(provider_id).await?;
                tracing::info!("Terminated {} ({})", ctx.identity.name, provider_id);
                Ok(())
            }
            (ChangeSet::Update(updates), Observed::Present { provider_id, .. }) => {
                for change in updates {
                    match change {
                        VirtualMachineChange::KeyPair(_) => self.import_key(ctx, spec, diag).await?,
                        VirtualMachineChange::SourceDestCheck(d) => {
                            ctx.client
                                .set_source_dest_check(provider_id, d.desired)
                                .await?
                        }
                        VirtualMachineChange::SecurityGroups(d) => {
                            let ids = refs.resolve_all(
                                RefKind::SecurityGroup,
                                &d.desired,
                                "security_groups",
                                diag,
                            );
                            if !ids.is_empty() {
                                ctx.client
                                    .set_instance_security_groups(provider_id, &ids)
                                    .await?;
                            }
                        }
                        _ => {}
                    }
                }
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn facts(
        &self,
        ctx: &PassContext<'_>,
        provider_id: &str,
        state: &VirtualMachineObserved,
    ) -> Result<Facts> {
        let mut facts = Facts::new();
        facts.insert("instance_id".to_string(), provider_id.to_string());
        let optional = [
            ("ip_address", &state.private_ip),
            ("public_ip", &state.public_ip),
            ("mac_address", &state.mac_address),
            ("availability_zone", &state.availability_zone),
            ("subnet_id", &state.subnet_id),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                facts.insert(key.to_string(), value.clone());
            }
        }

        if let Some(subnet_id) = &state.subnet_id {
            let subnets = ctx.client.describe_subnets(Lookup::Id(subnet_id)).await?;
            if let Some(subnet) = subnets.first() {
                facts.insert("cidr".to_string(), subnet.cidr_block.clone());
                if let Some(netmask) = Cidr::parse(&subnet.cidr_block).and_then(|c| c.netmask()) {
                    facts.insert("netmask".to_string(), netmask.to_string());
                }
            }
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

    fn spec() -> VirtualMachineSpec {
        VirtualMachineSpec {
            flavor: "t2.small".to_string(),
            image: "ami-30876e5f".to_string(),
            key_name: "deploy".to_string(),
            key_value: Some("ssh-rsa AAAAB3Nza deploy@host".to_string()),
            subnet_id: None,
            subnet: Some("frontend".to_string()),
            user_data: "#!/bin/sh\necho hi\n".to_string(),
            source_dest_check: true,
            security_groups: Vec::new(),
        }
    }

    fn network(fx: &Fixture) -> String {
        let vpc_id = fx.cloud.seed_vpc("main", "10.0.0.0/16");
        fx.cloud.seed_subnet("frontend", &vpc_id, "10.0.1.0/24");
        vpc_id
    }

    #[tokio::test]
    async fn test_launch_imports_key_and_converges() {
        let fx = Fixture::new(ResourceKind::VirtualMachine, "web-1");
        network(&fx);

        assert_eq!(fx.pass(&VirtualMachineHandler, &spec(), false).await, Outcome::Created);
        assert!(fx.cloud.has_key_pair("deploy"));
        let calls = fx.cloud.calls();
        assert!(calls[0].starts_with("import_key_pair"));
        assert!(calls[1].starts_with("launch_instance"));

        assert_eq!(fx.pass(&VirtualMachineHandler, &spec(), false).await, Outcome::NoOp);
    }

    #[tokio::test]
    async fn test_failed_tagging_never_duplicates_the_instance() {
        let fx = Fixture::new(ResourceKind::VirtualMachine, "web-1");
        network(&fx);
        fx.cloud.fail_operation("create_tags");

        assert_eq!(fx.pass(&VirtualMachineHandler, &spec(), false).await, Outcome::Created);
        assert!(!fx.cloud.calls().iter().any(|c| c.starts_with("create_tags")));
        assert_eq!(fx.pass(&VirtualMachineHandler, &spec(), false).await, Outcome::NoOp);
        assert_eq!(fx.cloud.live_instances_named("web-1").len(), 1);
    }

    #[tokio::test]
    async fn test_missing_key_without_material_warns() {
        let fx = Fixture::new(ResourceKind::VirtualMachine, "web-1");
        network(&fx);
        let mut desired = spec();
        desired.key_value = None;

        let (outcome, warnings) = fx
            .pass_with_warnings(&VirtualMachineHandler, &desired, false)
            .await;
        assert!(outcome.is_failure());
        assert_eq!(warnings[0].field, "key_pair");
    }

    #[tokio::test]
    async fn test_terminated_instance_counts_as_absent() {
        let fx = Fixture::new(ResourceKind::VirtualMachine, "web-1");
        network(&fx);
        fx.pass(&VirtualMachineHandler, &spec(), false).await;

        assert_eq!(fx.pass(&VirtualMachineHandler, &spec(), true).await, Outcome::Purged);
        assert_eq!(fx.pass(&VirtualMachineHandler, &spec(), true).await, Outcome::NoOp);
        assert_eq!(fx.cloud.instances_named("web-1").len(), 1);

        assert_eq!(fx.pass(&VirtualMachineHandler, &spec(), false).await, Outcome::Created);
        assert_eq!(fx.cloud.live_instances_named("web-1").len(), 1);
    }

    #[tokio::test]
    async fn test_two_live_instances_skip() {
        let fx = Fixture::new(ResourceKind::VirtualMachine, "web-1");
        network(&fx);
        fx.cloud.seed_instance("web-1");
        fx.cloud.seed_instance("web-1");

        let outcome = fx.pass(&VirtualMachineHandler, &spec(), true).await;
        assert!(matches!(outcome, Outcome::Skipped { .. }));
        assert_eq!(fx.cloud.live_instances_named("web-1").len(), 2);
    }

    #[tokio::test]
    async fn test_flavor_change_is_unsupported() {
        let fx = Fixture::new(ResourceKind::VirtualMachine, "web-1");
        network(&fx);
        fx.pass(&VirtualMachineHandler, &spec(), false).await;
        fx.cloud.clear_calls();

        let mut desired = spec();
        desired.flavor = "t2.large".to_string();
        match fx.pass(&VirtualMachineHandler, &desired, false).await {
            Outcome::Failed { reason, .. } => assert!(reason.contains("'flavor'")),
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(fx.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_source_dest_check_and_groups_update_in_place() {
        let fx = Fixture::new(ResourceKind::VirtualMachine, "web-1");
        let vpc_id = network(&fx);
        let web = fx.cloud.seed_security_group("web", &vpc_id);
        fx.pass(&VirtualMachineHandler, &spec(), false).await;

        let mut desired = spec();
        desired.source_dest_check = false;
        desired.security_groups = vec!["web".to_string(), "ghost".to_string()];

        let (outcome, warnings) = fx
            .pass_with_warnings(&VirtualMachineHandler, &desired, false)
            .await;
        assert_eq!(outcome, Outcome::Updated);
        assert!(warnings.iter().any(|w| w.message.contains("ghost")));

        let instance = &fx.cloud.live_instances_named("web-1")[0];
        assert_eq!(instance.source_dest_check, Some(false));
        assert_eq!(instance.security_groups[0].id, web);

        // the unknown group stays a warning, not a pending change
        fx.cloud.clear_calls();
        let (outcome, warnings) = fx
            .pass_with_warnings(&VirtualMachineHandler, &desired, false)
            .await;
        assert_eq!(outcome, Outcome::NoOp);
        assert!(warnings[0].message.contains("ghost"));
        assert!(fx.cloud.calls().is_empty());
    }

    #[tokio::test]
    async fn test_facts_include_network_details() {
        let fx = Fixture::new(ResourceKind::VirtualMachine, "web-1");
        network(&fx);
        fx.pass(&VirtualMachineHandler, &spec(), false).await;

        let Observed::Present { provider_id, state } =
            fx.read(&VirtualMachineHandler, &spec()).await.unwrap()
        else {
            panic!("expected present");
        };
        let facts = VirtualMachineHandler
            .facts(&fx.ctx(), &provider_id, &state)
            .await
            .unwrap();
        assert_eq!(facts["cidr"], "10.0.1.0/24");
        assert_eq!(facts["netmask"], "255.255.255.0");
        assert!(facts.contains_key("mac_address"));
        assert!(facts.contains_key("ip_address"));
    }
}
