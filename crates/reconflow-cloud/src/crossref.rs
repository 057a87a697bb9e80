//! Per-pass cross-reference table
//!
//! The Reader records every name -> provider id mapping it learns while
//! reading (instances, security groups, subnets, VPCs, key pairs). The Applier
//! resolves references against this table only, never by re-querying the
//! provider in the middle of an apply. A table lives for exactly one pass.

use crate::error::{CloudError, Result};
use crate::report::Diagnostics;
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::fmt;

/// Kind of object a cross-reference points at
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RefKind {
    Instance,
    SecurityGroup,
    Subnet,
    Vpc,
    KeyPair,
}

impl fmt::Display for RefKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RefKind::Instance => "instance",
            RefKind::SecurityGroup => "security group",
            RefKind::Subnet => "subnet",
            RefKind::Vpc => "vpc",
            RefKind::KeyPair => "key pair",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone)]
enum Entry {
    Unique(String),
    Ambiguous(Vec<String>),
}

/// Name -> provider id lookup built by the Reader
#[derive(Debug, Default)]
pub struct CrossRefs {
    by_name: HashMap<(RefKind, String), Entry>,
    by_id: HashMap<(RefKind, String), String>,
}

impl CrossRefs {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `name` refers to `id`
    ///
    /// A second, different id for the same name marks the name ambiguous.
    pub fn insert(&mut self, kind: RefKind, name: impl Into<String>, id: impl Into<String>) {
        let name = name.into();
        let id = id.into();
        self.by_id.insert((kind, id.clone()), name.clone());

        let Some(entry) = self.by_name.get_mut(&(kind, name.clone())) else {
            self.by_name.insert((kind, name), Entry::Unique(id));
            return;
        };
        match &mut *entry {
            Entry::Unique(existing) if *existing == id => {}
            Entry::Unique(existing) => {
                let first = std::mem::take(existing);
                *entry = Entry::Ambiguous(vec![first, id]);
            }
            Entry::Ambiguous(ids) => {
                if !ids.contains(&id) {
                    ids.push(id);
                }
            }
        }
    }

    /// Resolve a name to its provider id
    pub fn resolve(&self, kind: RefKind, name: &str) -> Result<&str> {
        match self.by_name.get(&(kind, name.to_string())) {
            Some(Entry::Unique(id)) => Ok(id),
            Some(Entry::Ambiguous(ids)) => Err(CloudError::AmbiguousReference {
                kind,
                name: name.to_string(),
                count: ids.len(),
            }),
            None => Err(CloudError::DanglingReference {
                kind,
                name: name.to_string(),
            }),
        }
    }

    pub fn contains(&self, kind: RefKind, name: &str) -> bool {
        self.resolve(kind, name).is_ok()
    }

    /// Reverse lookup: the name recorded for a provider id
    pub fn name_of(&self, kind: RefKind, id: &str) -> Option<&str> {
        self.by_id.get(&(kind, id.to_string())).map(String::as_str)
    }

    /// Name for an id, falling back to the id itself for unnamed objects
    pub fn display_name(&self, kind: RefKind, id: &str) -> String {
        self.name_of(kind, id).unwrap_or(id).to_string()
    }

    /// Resolve every name, dropping unresolvable ones with a warning on `field`
    pub fn resolve_all<'a>(
        &self,
        kind: RefKind,
        names: impl IntoIterator<Item = &'a String>,
        field: &str,
        diag: &mut Diagnostics,
    ) -> Vec<String> {
        let mut ids = Vec::new();
        for name in names {
            match self.resolve(kind, name) {
                Ok(id) => ids.push(id.to_string()),
                Err(e) => diag.warn(field, format!("skipping {}", e)),
            }
        }
        ids
    }

    /// Desired names that can converge: resolvable now, or already in place
    ///
    /// Anything else is dropped with a warning on `field`; comparing against
    /// it would yield a change that no apply can ever carry out.
    pub fn settled_names<'a>(
        &self,
        kind: RefKind,
        names: impl IntoIterator<Item = &'a String>,
        current: &BTreeSet<String>,
        field: &str,
        diag: &mut Diagnostics,
    ) -> BTreeSet<String> {
        let mut settled = BTreeSet::new();
        for name in names {
            match self.resolve(kind, name) {
                Ok(_) => {
                    settled.insert(name.clone());
                }
                Err(_) if current.contains(name) => {
                    settled.insert(name.clone());
                }
                Err(e) => diag.warn(field, format!("skipping {}", e)),
            }
        }
        settled
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{Identity, ResourceKind};

    #[test]
    fn test_resolve_and_reverse() {
        let mut refs = CrossRefs::new();
        refs.insert(RefKind::Instance, "web-1", "i-001");
        assert_eq!(refs.resolve(RefKind::Instance, "web-1").unwrap(), "i-001");
        assert_eq!(refs.name_of(RefKind::Instance, "i-001"), Some("web-1"));
        assert_eq!(refs.display_name(RefKind::Instance, "i-999"), "i-999");
        // kinds are separate namespaces
        assert!(!refs.contains(RefKind::SecurityGroup, "web-1"));
    }

    #[test]
    fn test_duplicate_names_become_ambiguous() {
        let mut refs = CrossRefs::new();
        refs.insert(RefKind::Instance, "web-1", "i-001");
        refs.insert(RefKind::Instance, "web-1", "i-001");
        assert!(refs.contains(RefKind::Instance, "web-1"));

        refs.insert(RefKind::Instance, "web-1", "i-002");
        let err = refs.resolve(RefKind::Instance, "web-1").unwrap_err();
        assert!(matches!(err, CloudError::AmbiguousReference { count: 2, .. }));
    }

    #[test]
    fn test_resolve_all_skips_dangling() {
        let mut refs = CrossRefs::new();
        refs.insert(RefKind::Instance, "i1", "i-001");
        let mut diag = Diagnostics::new(Identity::new(ResourceKind::LoadBalancer, "test", "lb"));

        let names = vec!["i1".to_string(), "ghost".to_string()];
        let ids = refs.resolve_all(RefKind::Instance, &names, "instances", &mut diag);

        assert_eq!(ids, vec!["i-001".to_string()]);
        assert_eq!(diag.warnings().len(), 1);
        assert!(diag.warnings()[0].message.contains("ghost"));
    }

    #[test]
    fn test_settled_names_keep_members_already_in_place() {
        let mut refs = CrossRefs::new();
        refs.insert(RefKind::SecurityGroup, "web", "sg-1");
        refs.insert(RefKind::SecurityGroup, "twin", "sg-2");
        refs.insert(RefKind::SecurityGroup, "twin", "sg-3");
        let mut diag = Diagnostics::new(Identity::new(ResourceKind::VirtualMachine, "test", "vm"));

        let names: Vec<String> = ["web", "twin", "ghost"].iter().map(|s| s.to_string()).collect();
        let current = BTreeSet::from(["twin".to_string()]);
        let settled =
            refs.settled_names(RefKind::SecurityGroup, &names, &current, "security_groups", &mut diag);

        assert_eq!(settled, BTreeSet::from(["twin".to_string(), "web".to_string()]));
        assert_eq!(diag.warnings().len(), 1);
        assert!(diag.warnings()[0].message.contains("ghost"));
    }
}
