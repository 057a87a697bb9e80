//! End-to-end reconciliation against the in-memory provider

use async_trait::async_trait;
use reconflow_cloud::mock::MemoryCloud;
use reconflow_cloud::*;
use std::collections::HashMap;
use std::sync::Arc;

fn provider(name: &str) -> ProviderConfig {
    ProviderConfig::new(name, "eu-west-1")
}

fn driver(cloud: &MemoryCloud) -> Driver {
    Driver::new(Arc::new(cloud.clone()), [provider("test")]).with_retry(RetryConfig::immediate(3))
}

fn vpc() -> Descriptor {
    Descriptor::new(
        "test",
        "demo",
        ResourceSpec::Vpc(VpcSpec {
            cidr_block: "10.0.0.0/23".to_string(),
            instance_tenancy: "default".to_string(),
        }),
    )
}

fn subnet() -> Descriptor {
    Descriptor::new(
        "test",
        "demo-public",
        ResourceSpec::Subnet(SubnetSpec {
            cidr_block: "10.0.0.0/24".to_string(),
            vpc: "demo".to_string(),
            map_public_ip: true,
            availability_zone: None,
        }),
    )
}

fn gateway() -> Descriptor {
    Descriptor::new(
        "test",
        "demo-gw",
        ResourceSpec::InternetGateway(InternetGatewaySpec {
            vpc: Some("demo".to_string()),
        }),
    )
}

fn security_group() -> Descriptor {
    Descriptor::new(
        "test",
        "demo-web",
        ResourceSpec::SecurityGroup(SecurityGroupSpec {
            description: "web tier".to_string(),
            vpc: "demo".to_string(),
            rules: vec![Rule {
                direction: Direction::Ingress,
                protocol: "tcp".to_string(),
                port_min: Some(80),
                port_max: Some(80),
                remote_prefix: "0.0.0.0/0".to_string(),
            }],
        }),
    )
}

fn vm(name: &str) -> Descriptor {
    Descriptor::new(
        "test",
        name,
        ResourceSpec::VirtualMachine(VirtualMachineSpec {
            flavor: "t2.micro".to_string(),
            image: "ami-30876e5f".to_string(),
            key_name: format!("{}-key", name),
            key_value: Some(format!("ssh-ed25519 AAAAC3Nza {}@host", name)),
            subnet_id: None,
            subnet: Some("demo-public".to_string()),
            user_data: String::new(),
            source_dest_check: true,
            security_groups: vec!["demo-web".to_string()],
        }),
    )
}

fn load_balancer(members: &[&str]) -> Descriptor {
    Descriptor::new(
        "test",
        "demo-lb",
        ResourceSpec::LoadBalancer(LoadBalancerSpec {
            listen_port: 80,
            dest_port: 80,
            protocol: "http".to_string(),
            security_group: Some("demo-web".to_string()),
            instances: members.iter().map(|m| m.to_string()).collect(),
            subnets: vec!["demo-public".to_string()],
        }),
    )
}

fn stack() -> Vec<Descriptor> {
    vec![
        vpc(),
        subnet(),
        gateway(),
        security_group(),
        vm("web-1"),
        vm("web-2"),
        load_balancer(&["web-1", "web-2"]),
    ]
}

#[tokio::test]
async fn test_network_stack_create_then_purge_in_reverse() {
    let cloud = MemoryCloud::new();
    let driver = driver(&cloud);

    for descriptor in [vpc(), subnet(), gateway(), security_group(), vm("web-1")] {
        let report = driver.reconcile(&descriptor).await;
        assert_eq!(report.outcome, Outcome::Created, "{}", report.identity);
    }

    let instance = &cloud.live_instances_named("web-1")[0];
    let subnet_id = &cloud.subnets_named("demo-public")[0].id;
    assert_eq!(instance.subnet_id.as_ref(), Some(subnet_id));

    for descriptor in [vm("web-1"), security_group(), gateway(), subnet(), vpc()] {
        let purged = descriptor.purged(true);
        let report = driver.reconcile(&purged).await;
        assert_eq!(report.outcome, Outcome::Purged, "{}: {:?}", report.identity, report.outcome);
        assert!(!driver.plan(&purged).await.unwrap().has_changes());
    }

    assert!(cloud.vpcs_named("demo").is_empty());
    assert!(cloud.live_instances_named("web-1").is_empty());
}

#[tokio::test]
async fn test_second_run_is_all_noop() {
    let cloud = MemoryCloud::new();
    let desired: DesiredState = stack().into_iter().collect();
    let reconciler = Reconciler::new(driver(&cloud));

    let first = reconciler.run(&desired).await;
    assert!(!first.has_failures(), "{:#?}", first.reports);
    assert_eq!(first.summary().created, 7);

    cloud.clear_calls();
    let second = reconciler.run(&desired).await;
    assert_eq!(second.summary().unchanged, 7);
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn test_load_balancer_tracks_membership() {
    let cloud = MemoryCloud::new();
    let desired: DesiredState = stack().into_iter().collect();
    let reconciler = Reconciler::new(driver(&cloud));
    reconciler.run(&desired).await;

    let web_1 = cloud.live_instances_named("web-1")[0].id.clone();
    let report = reconciler
        .driver()
        .reconcile(&load_balancer(&["web-1"]))
        .await;
    assert_eq!(report.outcome, Outcome::Updated);
    assert_eq!(
        report.changes[0].to_string(),
        "instances: {web-1, web-2} -> {web-1}"
    );
    assert_eq!(cloud.load_balancer("demo-lb").unwrap().instance_ids, vec![web_1]);
}

#[tokio::test]
async fn test_invalid_descriptor_fails_before_any_provider_call() {
    let cloud = MemoryCloud::new();
    let mut both = vm("web-1");
    if let ResourceSpec::VirtualMachine(spec) = &mut both.spec {
        spec.subnet_id = Some("subnet-e91c4880".to_string());
    }

    let report = driver(&cloud).reconcile(&both).await;
    match &report.outcome {
        Outcome::Failed { phase, reason, .. } => {
            assert_eq!(*phase, Phase::Validating);
            assert!(reason.contains("both"));
        }
        other => panic!("unexpected outcome {:?}", other),
    }
    assert!(cloud.calls().is_empty());
}

#[tokio::test]
async fn test_apply_failure_reports_attempted_changes() {
    let cloud = MemoryCloud::new();
    cloud.fail_operation("create_vpc");

    let report = driver(&cloud).reconcile(&vpc()).await;
    match &report.outcome {
        Outcome::Failed {
            phase, attempted, ..
        } => {
            assert_eq!(*phase, Phase::Applying);
            assert_eq!(attempted[0].field, "purged");
        }
        other => panic!("unexpected outcome {:?}", other),
    }

    cloud.clear_failures();
    assert_eq!(driver(&cloud).reconcile(&vpc()).await.outcome, Outcome::Created);
}

/// Routes each provider scope to its own cloud
struct Scoped(HashMap<String, MemoryCloud>);

#[async_trait]
impl Connector for Scoped {
    async fn connect(&self, config: &ProviderConfig) -> Result<Box<dyn ProviderClient>> {
        match self.0.get(&config.name) {
            Some(cloud) => cloud.connect(config).await,
            None => Err(CloudError::ProviderUnavailable(config.name.clone())),
        }
    }
}

#[tokio::test]
async fn test_unavailable_provider_does_not_abort_other_scopes() {
    let down = MemoryCloud::new();
    down.set_unavailable(true);
    let up = MemoryCloud::new();
    let connector = Scoped(HashMap::from([
        ("down".to_string(), down),
        ("up".to_string(), up.clone()),
    ]));
    let driver = Driver::new(Arc::new(connector), [provider("down"), provider("up")])
        .with_retry(RetryConfig::immediate(1));

    let mut first = vpc();
    first.scope = "down".to_string();
    let mut second = vpc();
    second.scope = "up".to_string();
    let desired: DesiredState = [first, second].into_iter().collect();

    let run = Reconciler::new(driver).run(&desired).await;
    let outcomes: HashMap<_, _> = run
        .reports
        .iter()
        .map(|r| (r.identity.scope.clone(), r.outcome.clone()))
        .collect();
    assert!(matches!(
        outcomes["down"],
        Outcome::Failed {
            phase: Phase::Reading,
            ..
        }
    ));
    assert_eq!(outcomes["up"], Outcome::Created);
    assert_eq!(up.vpcs_named("demo").len(), 1);
}
