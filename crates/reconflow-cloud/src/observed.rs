//! Observed state snapshots
//!
//! Re-derived from the provider on every pass and never cached. Each kind has
//! a closed, typed state struct; membership-style fields are already
//! translated into the desired-state namespace (names, not provider ids) by
//! the Reader.

use crate::descriptor::Rule;
use crate::error::{CloudError, Result};
use crate::identity::Identity;
use crate::provider::{InstanceState, Listener, VolumeState};
use std::collections::{BTreeMap, BTreeSet};

/// Provider-reported state of one identity
#[derive(Debug, Clone, PartialEq)]
pub enum Observed<T> {
    /// Never existed, deleted, or in a terminal condition
    Absent,
    Present { provider_id: String, state: T },
}

impl<T> Observed<T> {
    pub fn is_present(&self) -> bool {
        matches!(self, Observed::Present { .. })
    }

    pub fn provider_id(&self) -> Option<&str> {
        match self {
            Observed::Present { provider_id, .. } => Some(provider_id),
            Observed::Absent => None,
        }
    }

    pub fn state(&self) -> Option<&T> {
        match self {
            Observed::Present { state, .. } => Some(state),
            Observed::Absent => None,
        }
    }
}

/// Reduce the live candidates for an identity to at most one
///
/// More than one live match aborts the pass rather than picking one.
pub fn single_live<R>(identity: &Identity, mut candidates: Vec<R>) -> Result<Option<R>> {
    match candidates.len() {
        0 => Ok(None),
        1 => Ok(candidates.pop()),
        count => Err(CloudError::AmbiguousIdentity {
            identity: identity.clone(),
            count,
        }),
    }
}

/// Flat map of derived, informational attributes
pub type Facts = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq)]
pub struct VirtualMachineObserved {
    pub lifecycle: InstanceState,
    pub flavor: String,
    pub image: String,
    pub key_name: Option<String>,
    pub key_pair_exists: bool,
    pub subnet_id: Option<String>,
    /// Name of the subnet when it is a managed (tagged) subnet
    pub subnet_name: Option<String>,
    pub user_data: Option<String>,
    pub source_dest_check: Option<bool>,
    pub security_groups: BTreeSet<String>,
    pub private_ip: Option<String>,
    pub public_ip: Option<String>,
    pub mac_address: Option<String>,
    pub availability_zone: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadBalancerObserved {
    pub dns_name: Option<String>,
    /// In provider order; only the first one is managed
    pub listeners: Vec<Listener>,
    /// Security group names (ids for unmanaged groups), in provider order
    pub security_groups: Vec<String>,
    pub instances: BTreeSet<String>,
    pub subnets: BTreeSet<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VpcObserved {
    pub cidr_block: String,
    pub instance_tenancy: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SubnetObserved {
    pub cidr_block: String,
    pub vpc_id: String,
    pub vpc_name: Option<String>,
    pub availability_zone: String,
    pub map_public_ip: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttachedVpc {
    pub id: String,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InternetGatewayObserved {
    /// In provider order; only the first one is managed
    pub attachments: Vec<AttachedVpc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SecurityGroupObserved {
    pub group_name: String,
    pub description: String,
    pub vpc_id: Option<String>,
    pub vpc_name: Option<String>,
    /// Normalized rules
    pub rules: BTreeSet<Rule>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VolumeObserved {
    pub size: i32,
    pub volume_type: String,
    pub availability_zone: String,
    pub encrypted: bool,
    pub lifecycle: VolumeState,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::ResourceKind;

    #[test]
    fn test_single_live() {
        let id = Identity::new(ResourceKind::Vpc, "test", "main");
        assert_eq!(single_live::<u8>(&id, vec![]).unwrap(), None);
        assert_eq!(single_live(&id, vec![7]).unwrap(), Some(7));

        let err = single_live(&id, vec![1, 2]).unwrap_err();
        assert!(matches!(err, CloudError::AmbiguousIdentity { count: 2, .. }));
    }
}
