//! Manifest discovery and loading for reconflow
//!
//! A manifest declares the provider scopes and the resources to reconcile.
//! [`find_manifest`] locates it, [`Manifest::load`] parses it and
//! [`Manifest::desired_state`] turns it into a validated
//! [`reconflow_cloud::DesiredState`].

pub mod discovery;
pub mod error;
pub mod manifest;

pub use discovery::{CANDIDATES, MANIFEST_ENV, config_dir, find_manifest};
pub use error::*;
pub use manifest::Manifest;
