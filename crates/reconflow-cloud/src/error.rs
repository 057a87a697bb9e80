//! Reconciliation error types

use crate::crossref::RefKind;
use crate::identity::Identity;
use thiserror::Error;

/// Errors raised while reading, diffing or applying a resource
#[derive(Error, Debug)]
pub enum CloudError {
    /// Network or authentication failure talking to the provider. Safe to retry the pass.
    #[error("Provider unavailable: {0}")]
    ProviderUnavailable(String),

    #[error("{count} live resources match {identity}; refusing to guess")]
    AmbiguousIdentity { identity: Identity, count: usize },

    #[error("{identity}: field '{field}' cannot be changed in place ({reason}); destroy and recreate")]
    UnsupportedUpdate {
        identity: Identity,
        field: &'static str,
        reason: String,
    },

    #[error("{kind} '{name}' does not exist")]
    DanglingReference { kind: RefKind, name: String },

    #[error("{kind} name '{name}' matches {count} live objects")]
    AmbiguousReference {
        kind: RefKind,
        name: String,
        count: usize,
    },

    #[error("Invalid desired state for {identity}: {reason}")]
    InvalidDesiredState { identity: Identity, reason: String },

    /// Permission errors and constraint violations reported by the provider.
    #[error("API error: {0}")]
    ApiError(String),

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    /// Whether retrying the whole pass later may succeed without changing the desired state.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CloudError::ProviderUnavailable(_) | CloudError::Timeout(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, CloudError>;
