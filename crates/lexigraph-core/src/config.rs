//! Store configuration.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

const DEFAULT_NAMESPACE: &str = "default";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Root directory for on-disk stores. `None` keeps the graph in memory.
    pub storage_path: Option<PathBuf>,
    /// Sub-directory of `storage_path` holding this store.
    pub namespace: String,
}

impl Default for Config {
    fn default() -> Self {
        Self::in_memory()
    }
}

impl Config {
    pub fn in_memory() -> Self {
        Self {
            storage_path: None,
            namespace: DEFAULT_NAMESPACE.to_string(),
        }
    }

    /// Reads `GRAPH_STORAGE_PATH` and `GRAPH_NAMESPACE`.
    pub fn from_env() -> Self {
        let storage_path = std::env::var("GRAPH_STORAGE_PATH")
            .ok()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from);
        let namespace = std::env::var("GRAPH_NAMESPACE")
            .ok()
            .filter(|ns| !ns.is_empty())
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string());
        Self {
            storage_path,
            namespace,
        }
    }

    /// Loads a JSON config file. Missing fields take their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Directory of this store on disk, if any.
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.storage_path
            .as_ref()
            .map(|root| root.join(&self.namespace))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: Config = serde_json::from_str(r#"{"storage_path": "/var/lib/graphs"}"#).unwrap();
        assert_eq!(config.namespace, "default");
        assert_eq!(
            config.store_dir(),
            Some(PathBuf::from("/var/lib/graphs/default"))
        );
    }

    #[test]
    fn test_in_memory_has_no_store_dir() {
        assert_eq!(Config::in_memory().store_dir(), None);
        assert_eq!(Config::default(), Config::in_memory());
    }
}
