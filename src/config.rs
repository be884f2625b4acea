// Repository configuration (YAML)

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Directory created under the store root for all repository state
pub const STORE_DIR: &str = ".taskrepo";
pub const CONFIG_FILE: &str = "config.yml";

/// Timing and threshold policy for consolidated snapshot persistence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistConfig {
    /// Debounce window after the last change before a snapshot is written
    pub delay_ms: i64,
    /// Number of distinct dirty sources that forces an immediate snapshot
    pub max_queue_size: usize,
    /// Longest time allowed between snapshots while changes keep arriving
    pub max_interval_ms: i64,
    /// Background retries after a failed snapshot before giving up until the next change
    pub max_retries: u32,
}

impl Default for PersistConfig {
    fn default() -> Self {
        Self {
            delay_ms: 1000,
            max_queue_size: 10,
            max_interval_ms: 5000,
            max_retries: 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Scope attached to every emitted event
    pub app_id: String,
    /// Stored records written by another version are discarded on load
    pub version: String,
    pub schema: u32,
    pub persist: PersistConfig,
    /// Append emitted events to `events.jsonl` in the store directory
    pub journal: bool,
}

impl Default for RepositoryConfig {
    fn default() -> Self {
        Self {
            app_id: "taskrepo".to_string(),
            version: "1.0.0".to_string(),
            schema: 1,
            persist: PersistConfig::default(),
            journal: true,
        }
    }
}

impl RepositoryConfig {
    /// Load a config file; missing keys take their defaults
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content =
            fs::read_to_string(path).with_context(|| format!("Failed to read config file {}", path.display()))?;
        let config: Self =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))?;
        debug!(path = ?path, "Loaded config");
        Ok(config)
    }

    /// Resolve the config for a store: explicit path, then the store's own
    /// config, then the user config directory, then defaults
    pub fn resolve(explicit: Option<&Path>, store_root: &Path) -> Result<Self> {
        if let Some(path) = explicit {
            return Self::load(path);
        }

        for candidate in Self::candidates(store_root) {
            if candidate.exists() {
                info!(path = ?candidate, "Using config file");
                return Self::load(candidate);
            }
        }

        debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn candidates(store_root: &Path) -> Vec<PathBuf> {
        let mut paths = vec![store_root.join(STORE_DIR).join(CONFIG_FILE)];
        if let Some(dir) = dirs::config_dir() {
            paths.push(dir.join("taskrepo").join(CONFIG_FILE));
        }
        paths
    }

    pub fn to_yaml(&self) -> Result<String> {
        serde_yaml::to_string(self).context("Failed to serialize config")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults_match_persistence_policy() {
        let config = RepositoryConfig::default();
        assert_eq!(config.persist.delay_ms, 1000);
        assert_eq!(config.persist.max_queue_size, 10);
        assert_eq!(config.persist.max_interval_ms, 5000);
        assert!(config.journal);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("config.yml");
        fs::write(&path, "app_id: notes\npersist:\n  delay_ms: 250\n").unwrap();

        let config = RepositoryConfig::load(&path).unwrap();
        assert_eq!(config.app_id, "notes");
        assert_eq!(config.persist.delay_ms, 250);
        assert_eq!(config.persist.max_queue_size, 10);
        assert_eq!(config.version, "1.0.0");
    }

    #[test]
    fn test_resolve_prefers_store_config() {
        let temp = TempDir::new().unwrap();
        let dir = temp.path().join(STORE_DIR);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join(CONFIG_FILE), "journal: false\n").unwrap();

        let config = RepositoryConfig::resolve(None, temp.path()).unwrap();
        assert!(!config.journal);
    }

    #[test]
    fn test_resolve_explicit_missing_is_error() {
        let temp = TempDir::new().unwrap();
        let missing = temp.path().join("nope.yml");
        assert!(RepositoryConfig::resolve(Some(&missing), temp.path()).is_err());
    }

    #[test]
    fn test_yaml_roundtrip() {
        let config = RepositoryConfig::default();
        let yaml = config.to_yaml().unwrap();
        let parsed: RepositoryConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed, config);
    }
}
