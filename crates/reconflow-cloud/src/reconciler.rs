//! Batch reconciliation over a whole desired state

use crate::descriptor::Descriptor;
use crate::driver::Driver;
use crate::error::{CloudError, Result};
use crate::identity::{Identity, ResourceKind};
use crate::report::{Plan, RunReport};
use futures_util::stream::{self, StreamExt};
use std::collections::HashSet;

/// Descriptors of one kind, in declaration order
#[derive(Debug, Clone, PartialEq)]
pub struct KindGroup {
    pub kind: ResourceKind,
    pub descriptors: Vec<Descriptor>,
}

/// Kind -> ordered descriptor list, kinds in first-appearance order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DesiredState {
    groups: Vec<KindGroup>,
}

impl DesiredState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, descriptor: Descriptor) {
        let kind = descriptor.kind();
        match self.groups.iter_mut().find(|g| g.kind == kind) {
            Some(group) => group.descriptors.push(descriptor),
            None => self.groups.push(KindGroup {
                kind,
                descriptors: vec![descriptor],
            }),
        }
    }

    pub fn groups(&self) -> &[KindGroup] {
        &self.groups
    }

    pub fn descriptors(&self) -> impl Iterator<Item = &Descriptor> {
        self.groups.iter().flat_map(|g| g.descriptors.iter())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.descriptors.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Static validation of every descriptor plus identity uniqueness
    pub fn validate(&self) -> Result<()> {
        let mut seen: HashSet<Identity> = HashSet::new();
        for descriptor in self.descriptors() {
            descriptor.validate()?;
            let identity = descriptor.identity();
            if !seen.insert(identity.clone()) {
                return Err(CloudError::InvalidDesiredState {
                    identity,
                    reason: "declared more than once".to_string(),
                });
            }
        }
        Ok(())
    }

    /// Keep only the descriptors matching a kind and/or name
    pub fn filtered(&self, kind: Option<ResourceKind>, name: Option<&str>) -> DesiredState {
        self.descriptors()
            .filter(|d| kind.is_none_or(|k| d.kind() == k))
            .filter(|d| name.is_none_or(|n| d.name == n))
            .cloned()
            .collect()
    }
}

impl FromIterator<Descriptor> for DesiredState {
    fn from_iter<I: IntoIterator<Item = Descriptor>>(iter: I) -> Self {
        let mut state = DesiredState::new();
        for descriptor in iter {
            state.push(descriptor);
        }
        state
    }
}

/// Runs a desired state group by group
///
/// Groups run one after another in the order they were declared. Inside a
/// group independent identities run concurrently, bounded by `parallelism`;
/// a failed identity never stops its siblings.
pub struct Reconciler {
    driver: Driver,
    parallelism: usize,
}

impl Reconciler {
    pub fn new(driver: Driver) -> Self {
        Self {
            driver,
            parallelism: 4,
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn driver(&self) -> &Driver {
        &self.driver
    }

    pub async fn run(&self, desired: &DesiredState) -> RunReport {
        let mut run = RunReport::default();
        for group in desired.groups() {
            tracing::info!(
                "Reconciling {} {} resource(s)",
                group.descriptors.len(),
                group.kind
            );
            let reports: Vec<_> = stream::iter(&group.descriptors)
                .map(|descriptor| self.driver.reconcile(descriptor))
                .buffered(self.parallelism)
                .collect()
                .await;
            run.reports.extend(reports);
        }
        tracing::info!("{}", run.summary());
        run
    }

    /// Dry run of every descriptor, in declaration order
    pub async fn plan(&self, desired: &DesiredState) -> Vec<(Identity, Result<Plan>)> {
        stream::iter(desired.descriptors())
            .map(|descriptor| async move {
                (descriptor.identity(), self.driver.plan(descriptor).await)
            })
            .buffered(self.parallelism)
            .collect()
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::descriptor::{ResourceSpec, VpcSpec};
    use crate::mock::MemoryCloud;
    use crate::provider::{ProviderConfig, RetryConfig};
    use crate::report::Outcome;
    use std::sync::Arc;

    fn vpc(name: &str, cidr: &str) -> Descriptor {
        Descriptor::new(
            "test",
            name,
            ResourceSpec::Vpc(VpcSpec {
                cidr_block: cidr.to_string(),
                instance_tenancy: "default".to_string(),
            }),
        )
    }

    fn reconciler(cloud: &MemoryCloud) -> Reconciler {
        let driver = Driver::new(
            Arc::new(cloud.clone()),
            [ProviderConfig::new("test", "eu-west-1")],
        )
        .with_retry(RetryConfig::immediate(3));
        Reconciler::new(driver).with_parallelism(2)
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let desired: DesiredState = [vpc("main", "10.0.0.0/16"), vpc("main", "10.1.0.0/16")]
            .into_iter()
            .collect();
        let err = desired.validate().unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn test_filtered() {
        let desired: DesiredState = [vpc("a", "10.0.0.0/16"), vpc("b", "10.1.0.0/16")]
            .into_iter()
            .collect();
        assert_eq!(desired.filtered(None, Some("b")).len(), 1);
        assert_eq!(desired.filtered(Some(ResourceKind::Subnet), None).len(), 0);
    }

    #[tokio::test]
    async fn test_failure_does_not_abort_siblings() {
        let cloud = MemoryCloud::new();
        cloud.seed_vpc("broken", "10.9.0.0/16");
        let desired: DesiredState = [
            vpc("a", "10.0.0.0/16"),
            vpc("broken", "10.0.0.0/16"),
            vpc("b", "10.1.0.0/16"),
        ]
        .into_iter()
        .collect();

        let run = reconciler(&cloud).run(&desired).await;
        assert_eq!(run.reports.len(), 3);
        assert!(run.has_failures());
        let summary = run.summary();
        assert_eq!(summary.created, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(cloud.vpcs_named("a").len(), 1);
        assert_eq!(cloud.vpcs_named("b").len(), 1);
    }

    #[tokio::test]
    async fn test_plan_keeps_declaration_order() {
        let cloud = MemoryCloud::new();
        let desired: DesiredState = [vpc("a", "10.0.0.0/16"), vpc("b", "10.1.0.0/16")]
            .into_iter()
            .collect();
        let plans = reconciler(&cloud).plan(&desired).await;
        assert_eq!(plans[0].0.name, "a");
        assert_eq!(plans[1].0.name, "b");
        assert!(plans[0].1.as_ref().unwrap().has_changes());

        let run = reconciler(&cloud).run(&desired).await;
        assert!(run.reports.iter().all(|r| r.outcome == Outcome::Created));
    }

    #[tokio::test]
    async fn test_run_reports_follow_declaration_order() {
        let cloud = MemoryCloud::new();
        // the first one fails fast on a duplicate, the rest do real work
        cloud.seed_vpc("a", "10.0.0.0/16");
        cloud.seed_vpc("a", "10.0.0.0/16");
        let names = ["a", "b", "c", "d", "e"];
        let desired: DesiredState = names
            .iter()
            .enumerate()
            .map(|(i, name)| vpc(name, &format!("10.{}.0.0/16", i)))
            .collect();

        let run = reconciler(&cloud).run(&desired).await;
        let reported: Vec<&str> = run.reports.iter().map(|r| r.identity.name.as_str()).collect();
        assert_eq!(reported, names);
        assert!(matches!(run.reports[0].outcome, Outcome::Skipped { .. }));
    }
}
