//! Resource kinds and identities

use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of cloud resource managed by reconflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    VirtualMachine,
    LoadBalancer,
    Vpc,
    Subnet,
    InternetGateway,
    SecurityGroup,
    Volume,
}

impl ResourceKind {
    /// All kinds, ordered so that a kind never references a kind listed after it.
    pub const ALL: [ResourceKind; 7] = [
        ResourceKind::Vpc,
        ResourceKind::Subnet,
        ResourceKind::InternetGateway,
        ResourceKind::SecurityGroup,
        ResourceKind::Volume,
        ResourceKind::VirtualMachine,
        ResourceKind::LoadBalancer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ResourceKind::VirtualMachine => "virtual_machine",
            ResourceKind::LoadBalancer => "load_balancer",
            ResourceKind::Vpc => "vpc",
            ResourceKind::Subnet => "subnet",
            ResourceKind::InternetGateway => "internet_gateway",
            ResourceKind::SecurityGroup => "security_group",
            ResourceKind::Volume => "volume",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ResourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        ResourceKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown resource kind '{}'", s))
    }
}

/// Stable identity correlating a descriptor with the provider object it manages
///
/// `scope` names the provider account/agent the resource lives in; `name` is
/// the human-assigned name written to the provider's `Name` tag on create.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub kind: ResourceKind,
    pub scope: String,
    pub name: String,
}

impl Identity {
    pub fn new(kind: ResourceKind, scope: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            scope: scope.into(),
            name: name.into(),
        }
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{},name={}]", self.kind, self.scope, self.name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_display() {
        let id = Identity::new(ResourceKind::VirtualMachine, "test", "web-1");
        assert_eq!(id.to_string(), "virtual_machine[test,name=web-1]");
    }

    #[test]
    fn test_kind_roundtrip_from_str() {
        for kind in ResourceKind::ALL {
            assert_eq!(kind.as_str().parse::<ResourceKind>().unwrap(), kind);
        }
        assert!("bucket".parse::<ResourceKind>().is_err());
    }
}
