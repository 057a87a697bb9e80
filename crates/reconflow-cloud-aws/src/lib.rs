//! AWS provider for reconflow
//!
//! Implements [`reconflow_cloud::ProviderClient`] on top of the EC2 and
//! Classic Elastic Load Balancing APIs, so the reconciliation core can drive
//! real infrastructure.
//!
//! # Coverage
//!
//! - Virtual machines, key pairs, VPCs, subnets, internet gateways,
//!   security groups and volumes through EC2
//! - Load balancers through Classic ELB
//!
//! # Requirements
//!
//! - AWS credentials reachable through the default provider chain
//!   (`AWS_ACCESS_KEY_ID`/`AWS_SECRET_ACCESS_KEY`, `~/.aws/credentials`, ...)
//!
//! # Example
//!
//! ```ignore
//! use reconflow_cloud::{Driver, ProviderConfig};
//! use reconflow_cloud_aws::AwsConnector;
//! use std::sync::Arc;
//!
//! let driver = Driver::new(
//!     Arc::new(AwsConnector::new()),
//!     [ProviderConfig::new("prod", "eu-west-1")],
//! );
//!
//! let auth = driver.check_auth("prod").await?;
//! if !auth.authenticated {
//!     panic!("Not authenticated: {:?}", auth.error);
//! }
//! ```

pub mod client;
pub mod connector;
mod convert;
mod elb;
pub mod error;

pub use client::AwsClient;
pub use connector::AwsConnector;
pub use error::AwsError;
