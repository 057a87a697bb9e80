//! Manifest file discovery

use crate::error::{ConfigError, Result};
use std::path::{Path, PathBuf};

/// Environment variable holding a direct manifest path
pub const MANIFEST_ENV: &str = "RECONFLOW_MANIFEST";

/// File names tried in each directory, highest priority first
pub const CANDIDATES: [&str; 3] = ["reconflow.local.yaml", "reconflow.yaml", ".reconflow.yaml"];

/// Global reconflow config directory (`~/.config/reconflow`)
pub fn config_dir() -> Result<PathBuf> {
    Ok(dirs::config_dir()
        .ok_or(ConfigError::ConfigDirNotFound)?
        .join("reconflow"))
}

fn first_candidate(dir: &Path) -> Option<PathBuf> {
    CANDIDATES
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
}

/// Locate the manifest to load
///
/// Search order:
/// 1. `RECONFLOW_MANIFEST` (direct path)
/// 2. current directory: `reconflow.local.yaml`, `reconflow.yaml`, `.reconflow.yaml`
/// 3. the same names inside `./.reconflow/`
/// 4. `~/.config/reconflow/reconflow.yaml`
pub fn find_manifest() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(MANIFEST_ENV) {
        let path = PathBuf::from(path);
        if path.is_file() {
            return Ok(path);
        }
        tracing::warn!("{} points at missing file {}", MANIFEST_ENV, path.display());
    }

    let current_dir = std::env::current_dir()?;
    if let Some(path) = first_candidate(&current_dir) {
        return Ok(path);
    }

    let local_dir = current_dir.join(".reconflow");
    if local_dir.is_dir()
        && let Some(path) = first_candidate(&local_dir)
    {
        return Ok(path);
    }

    if let Ok(dir) = config_dir() {
        let global = dir.join("reconflow.yaml");
        if global.is_file() {
            return Ok(global);
        }
    }

    Err(ConfigError::ManifestNotFound)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::fs;

    /// Run `f` inside `dir` with discovery isolated from the real home
    fn in_dir<T>(dir: &Path, f: impl FnOnce() -> T) -> T {
        let original = std::env::current_dir().unwrap();
        let home = tempfile::tempdir().unwrap();
        std::env::set_current_dir(dir).unwrap();
        let result = temp_env::with_vars(
            [
                (MANIFEST_ENV, None),
                ("XDG_CONFIG_HOME", Some(home.path().as_os_str())),
            ],
            f,
        );
        std::env::set_current_dir(original).unwrap();
        result
    }

    #[test]
    #[serial]
    fn test_find_manifest_in_current_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("reconflow.yaml"), "resources: []").unwrap();

        let found = in_dir(temp_dir.path(), find_manifest).unwrap();
        assert!(found.ends_with("reconflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_local_manifest_wins() {
        let temp_dir = tempfile::tempdir().unwrap();
        fs::write(temp_dir.path().join("reconflow.yaml"), "resources: []").unwrap();
        fs::write(temp_dir.path().join("reconflow.local.yaml"), "resources: []").unwrap();

        let found = in_dir(temp_dir.path(), find_manifest).unwrap();
        assert!(found.ends_with("reconflow.local.yaml"));
    }

    #[test]
    #[serial]
    fn test_find_manifest_in_dot_dir() {
        let temp_dir = tempfile::tempdir().unwrap();
        let local = temp_dir.path().join(".reconflow");
        fs::create_dir(&local).unwrap();
        fs::write(local.join("reconflow.yaml"), "resources: []").unwrap();

        let found = in_dir(temp_dir.path(), find_manifest).unwrap();
        assert!(found.ends_with(".reconflow/reconflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_env_var_overrides_discovery() {
        let temp_dir = tempfile::tempdir().unwrap();
        let custom = temp_dir.path().join("custom.yaml");
        fs::write(&custom, "resources: []").unwrap();

        let found = temp_env::with_var(MANIFEST_ENV, Some(&custom), find_manifest).unwrap();
        assert_eq!(found, custom);
    }

    #[test]
    #[serial]
    fn test_global_manifest() {
        let temp_dir = tempfile::tempdir().unwrap();
        let home = tempfile::tempdir().unwrap();
        let global = home.path().join("reconflow");
        fs::create_dir(&global).unwrap();
        fs::write(global.join("reconflow.yaml"), "resources: []").unwrap();

        let original = std::env::current_dir().unwrap();
        std::env::set_current_dir(temp_dir.path()).unwrap();
        let found = temp_env::with_vars(
            [
                (MANIFEST_ENV, None),
                ("XDG_CONFIG_HOME", Some(home.path().as_os_str())),
            ],
            find_manifest,
        );
        std::env::set_current_dir(original).unwrap();

        assert_eq!(found.unwrap(), global.join("reconflow.yaml"));
    }

    #[test]
    #[serial]
    fn test_manifest_not_found() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = in_dir(temp_dir.path(), find_manifest);
        assert!(matches!(result, Err(ConfigError::ManifestNotFound)));
    }
}
