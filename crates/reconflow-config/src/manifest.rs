//! Manifest model: provider scopes plus resource descriptors

use crate::error::{ConfigError, Result};
use reconflow_cloud::{Descriptor, DesiredState, ProviderConfig};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

/// Parsed manifest file
///
/// ```yaml
/// providers:
///   - name: test
///     region: eu-west-1
/// resources:
///   - kind: vpc
///     name: demo
///     provider: test
///     cidr_block: 10.0.0.0/23
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Manifest {
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,

    #[serde(default)]
    pub resources: Vec<Descriptor>,
}

impl Manifest {
    pub fn parse(content: &str) -> Result<Self> {
        Ok(serde_yaml::from_str(content)?)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let manifest: Manifest =
            serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })?;
        tracing::debug!(
            "Loaded {} provider(s) and {} resource(s) from {}",
            manifest.providers.len(),
            manifest.resources.len(),
            path.display()
        );
        for warning in Self::unknown_attributes(&content)? {
            tracing::warn!("{}: {}", path.display(), warning);
        }
        Ok(manifest)
    }

    /// Keys of resource entries that no attribute of the entry's kind reads
    ///
    /// Kind attributes are flattened into the entry, so unknown keys there
    /// are not rejected when parsing; this reports them instead.
    pub fn unknown_attributes(content: &str) -> Result<Vec<String>> {
        let raw: serde_yaml::Value = serde_yaml::from_str(content)?;
        let mut unknown = Vec::new();
        let Some(entries) = raw.get("resources").and_then(|r| r.as_sequence()) else {
            return Ok(unknown);
        };
        for entry in entries {
            let Some(declared) = entry.as_mapping() else {
                continue;
            };
            let Ok(descriptor) = serde_yaml::from_value::<Descriptor>(entry.clone()) else {
                continue;
            };
            let known = serde_yaml::to_value(&descriptor)?;
            for key in declared.keys() {
                if known.get(key).is_none() {
                    unknown.push(format!(
                        "{}: unknown attribute '{}'",
                        descriptor.identity(),
                        key.as_str().unwrap_or("?")
                    ));
                }
            }
        }
        Ok(unknown)
    }

    pub fn provider(&self, name: &str) -> Option<&ProviderConfig> {
        self.providers.iter().find(|p| p.name == name)
    }

    /// Provider scopes referenced by at least one resource
    pub fn used_providers(&self) -> Vec<&ProviderConfig> {
        self.providers
            .iter()
            .filter(|p| self.resources.iter().any(|r| r.scope == p.name))
            .collect()
    }

    /// Validate and group the resources into a desired state
    ///
    /// Fails on duplicate provider names, resources naming an undeclared
    /// provider, duplicate identities, and descriptors that break their
    /// static invariants.
    pub fn desired_state(&self) -> Result<DesiredState> {
        let mut names = HashSet::new();
        for provider in &self.providers {
            if !names.insert(provider.name.as_str()) {
                return Err(ConfigError::DuplicateProvider(provider.name.clone()));
            }
        }

        for resource in &self.resources {
            if !names.contains(resource.scope.as_str()) {
                return Err(ConfigError::UnknownProvider {
                    identity: resource.identity().to_string(),
                    provider: resource.scope.clone(),
                });
            }
        }

        let desired: DesiredState = self.resources.iter().cloned().collect();
        desired.validate()?;
        Ok(desired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reconflow_cloud::{ResourceKind, ResourceSpec};

    const MANIFEST: &str = r#"
providers:
  - name: test
    region: eu-west-1
resources:
  - kind: security_group
    name: web
    provider: test
    vpc: demo
    rules:
      - direction: ingress
        protocol: tcp
        port_min: 80
        remote_prefix: 0.0.0.0/0
  - kind: vpc
    name: demo
    provider: test
    cidr_block: 10.0.0.0/23
  - kind: security_group
    name: db
    provider: test
    vpc: demo
"#;

    #[test]
    fn test_parse_groups_by_first_appearance() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        assert_eq!(manifest.providers[0].availability_zone, "a");
        assert!(manifest.providers[0].endpoint_url.is_none());

        let desired = manifest.desired_state().unwrap();
        let kinds: Vec<_> = desired.groups().iter().map(|g| g.kind).collect();
        assert_eq!(kinds, vec![ResourceKind::SecurityGroup, ResourceKind::Vpc]);
        let names: Vec<_> = desired.groups()[0]
            .descriptors
            .iter()
            .map(|d| d.name.as_str())
            .collect();
        assert_eq!(names, vec!["web", "db"]);
    }

    #[test]
    fn test_defaults_applied() {
        let manifest = Manifest::parse(MANIFEST).unwrap();
        let vpc = &manifest.resources[1];
        assert!(!vpc.purged);
        match &vpc.spec {
            ResourceSpec::Vpc(spec) => assert_eq!(spec.instance_tenancy, "default"),
            other => panic!("unexpected spec {:?}", other),
        }
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let manifest = Manifest::parse(&MANIFEST.replace("provider: test\n    cidr", "provider: prod\n    cidr"))
            .unwrap();
        let err = manifest.desired_state().unwrap_err();
        assert!(matches!(err, ConfigError::UnknownProvider { ref provider, .. } if provider == "prod"));
    }

    #[test]
    fn test_duplicate_identity_rejected() {
        let manifest = Manifest::parse(&MANIFEST.replace("name: db", "name: web")).unwrap();
        let err = manifest.desired_state().unwrap_err();
        assert!(err.to_string().contains("declared more than once"));
    }

    #[test]
    fn test_duplicate_provider_rejected() {
        let content = MANIFEST.replace(
            "providers:\n",
            "providers:\n  - name: test\n    region: us-east-1\n",
        );
        let err = Manifest::parse(&content).unwrap().desired_state().unwrap_err();
        assert!(matches!(err, ConfigError::DuplicateProvider(ref name) if name == "test"));
    }

    #[test]
    fn test_invalid_descriptor_rejected() {
        let manifest = Manifest::parse(&MANIFEST.replace("10.0.0.0/23", "10.0.0.0/33")).unwrap();
        let err = manifest.desired_state().unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
        assert!(err.to_string().contains("cidr"));
    }

    #[test]
    fn test_unknown_top_level_key() {
        assert!(matches!(
            Manifest::parse("resource: []"),
            Err(ConfigError::Yaml(_))
        ));
    }

    #[test]
    fn test_load_reports_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reconflow.yaml");
        std::fs::write(&path, "resources: [").unwrap();
        let err = Manifest::load(&path).unwrap_err();
        assert!(err.to_string().contains("reconflow.yaml"));
    }

    #[test]
    fn test_misspelled_attribute_reported() {
        assert!(Manifest::unknown_attributes(MANIFEST).unwrap().is_empty());

        let content = MANIFEST.replace(
            "cidr_block: 10.0.0.0/23",
            "cidr_block: 10.0.0.0/23\n    tenancy: dedicated",
        );
        let manifest = Manifest::parse(&content).unwrap();
        assert!(manifest.desired_state().is_ok());

        let unknown = Manifest::unknown_attributes(&content).unwrap();
        assert_eq!(unknown.len(), 1);
        assert!(unknown[0].contains("demo"), "{}", unknown[0]);
        assert!(unknown[0].ends_with("unknown attribute 'tenancy'"));
    }

    #[test]
    fn test_used_providers() {
        let content = MANIFEST.replace(
            "providers:\n",
            "providers:\n  - name: idle\n    region: us-east-1\n",
        );
        let manifest = Manifest::parse(&content).unwrap();
        let used: Vec<_> = manifest.used_providers().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(used, vec!["test"]);
    }
}
