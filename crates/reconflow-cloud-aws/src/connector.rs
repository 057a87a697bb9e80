//! Session factory for AWS scopes

use crate::client::AwsClient;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_ec2::config::Region;
use reconflow_cloud::{Connector, ProviderClient, ProviderConfig, Result};

/// Opens an [`AwsClient`] per provider scope
///
/// Credentials come from the default AWS chain (environment, profile,
/// instance metadata). `endpoint_url` redirects every call, e.g. to a local
/// emulator.
#[derive(Debug, Clone, Default)]
pub struct AwsConnector;

impl AwsConnector {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for AwsConnector {
    async fn connect(&self, config: &ProviderConfig) -> Result<Box<dyn ProviderClient>> {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(config.region.clone()));
        if let Some(endpoint) = &config.endpoint_url {
            tracing::debug!("Using endpoint {} for scope {}", endpoint, config.name);
            loader = loader.endpoint_url(endpoint);
        }
        let sdk_config = loader.load().await;
        Ok(Box::new(AwsClient::new(&sdk_config, &config.region)))
    }
}
