//! reconflow reconciliation core
//!
//! Compares declared desired state against what a cloud provider reports and
//! applies the minimal changes to converge, one resource identity at a time.
//!
//! # Supported kinds
//!
//! - Virtual machines (with key pair import)
//! - Classic load balancers
//! - VPCs, subnets and internet gateways
//! - Security groups
//! - Block volumes
//!
//! # Architecture
//!
//! ```text
//! +---------------------------------------------------+
//! |            Reconciler (kind group by group)        |
//! +-------------------------+-------------------------+
//!                           |
//! +-------------------------v-------------------------+
//! |  Driver: Validating -> Reading -> Diffing ->      |
//! |          Applying -> Done                         |
//! |  +-----------+  +-----------+  +---------------+  |
//! |  |  Reader   |  |  Differ   |  |   Applier     |  |
//! |  +-----------+  +-----------+  +---------------+  |
//! |        one ResourceHandler per kind               |
//! +-------------------------+-------------------------+
//!                           |
//! +-------------------------v-------------------------+
//! |        trait ProviderClient (per session)         |
//! +------------+---------------------+----------------+
//!              |                     |
//!      +-------v-------+     +-------v-------+
//!      |  AWS adapter  |     |  MemoryCloud  |
//!      +---------------+     +---------------+
//! ```
//!
//! # Example
//!
//! ```ignore
//! use reconflow_cloud::{Descriptor, Driver, ProviderConfig, ResourceSpec, VpcSpec};
//!
//! let driver = Driver::new(connector, [ProviderConfig::new("prod", "eu-west-1")]);
//! let vpc = Descriptor::new(
//!     "prod",
//!     "main",
//!     ResourceSpec::Vpc(VpcSpec {
//!         cidr_block: "10.0.0.0/23".into(),
//!         instance_tenancy: "default".into(),
//!     }),
//! );
//! let report = driver.reconcile(&vpc).await;
//! println!("{}: {}", report.identity, report.outcome);
//! ```

pub mod changeset;
pub mod crossref;
pub mod descriptor;
pub mod driver;
pub mod error;
pub mod handler;
pub mod identity;
pub mod net;
pub mod observed;
pub mod provider;
pub mod reconciler;
pub mod report;

#[cfg(any(test, feature = "test-utils"))]
pub mod mock;

// Re-exports
pub use changeset::{ChangeEntry, ChangeSet, Delta, FieldChange};
pub use crossref::{CrossRefs, RefKind};
pub use descriptor::{
    Descriptor, Direction, InternetGatewaySpec, LoadBalancerSpec, ResourceSpec, Rule,
    SecurityGroupSpec, SubnetRef, SubnetSpec, VirtualMachineSpec, VolumeSpec, VpcSpec,
};
pub use driver::Driver;
pub use error::{CloudError, Result};
pub use identity::{Identity, ResourceKind};
pub use observed::{Facts, Observed};
pub use provider::{
    AuthStatus, Connector, Created, Lookup, ProviderClient, ProviderConfig, RetryConfig, Session,
};
pub use reconciler::{DesiredState, KindGroup, Reconciler};
pub use report::{Diagnostics, Outcome, Phase, Plan, Report, RunReport, RunSummary, Warning};
