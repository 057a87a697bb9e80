pub mod apply;
pub mod facts;
pub mod plan;
pub mod validate;

use anyhow::Context;
use colored::Colorize;
use reconflow_cloud::{DesiredState, Driver};
use reconflow_cloud_aws::AwsConnector;
use reconflow_config::Manifest;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// A manifest that passed validation
pub struct Loaded {
    pub path: PathBuf,
    pub manifest: Manifest,
    pub desired: DesiredState,
}

/// Find, parse and validate the manifest; never contacts a provider
pub fn load(path: Option<&Path>) -> anyhow::Result<Loaded> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => reconflow_config::find_manifest()?,
    };
    let manifest = Manifest::load(&path)?;
    let desired = manifest
        .desired_state()
        .with_context(|| format!("in {}", path.display()))?;
    Ok(Loaded {
        path,
        manifest,
        desired,
    })
}

pub fn driver(loaded: &Loaded) -> Driver {
    Driver::new(
        Arc::new(AwsConnector::new()),
        loaded.manifest.providers.iter().cloned(),
    )
}

/// Fail fast when any provider used by the manifest rejects our credentials
pub async fn check_auth(driver: &Driver, loaded: &Loaded) -> anyhow::Result<()> {
    for provider in loaded.manifest.used_providers() {
        let status = driver.check_auth(&provider.name).await?;
        if !status.authenticated {
            anyhow::bail!(
                "provider '{}' is not authenticated: {}",
                provider.name,
                status.error.unwrap_or_default()
            );
        }
        println!(
            "{} {} ({})",
            "✓".green(),
            provider.name.cyan(),
            status.account_info.unwrap_or_default()
        );
    }
    Ok(())
}
