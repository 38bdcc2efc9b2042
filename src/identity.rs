//! Host identity file
//!
//! A YAML document shared with the rest of the platform. nmbridge only owns
//! the `primary_interface` and `cluster_interface` keys; every other key is
//! carried through untouched when the file is rewritten.

use crate::error::{Error, Result};
use serde_yaml::{Mapping, Value};
use std::fs;
use std::io;
use std::path::Path;

const PRIMARY_KEY: &str = "primary_interface";
const CLUSTER_KEY: &str = "cluster_interface";

/// Interfaces reserved for host management traffic
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostIdentity {
    /// Interface carrying the default route
    pub primary_interface: Option<String>,
    /// Interface used for cluster traffic
    pub cluster_interface: Option<String>,
}

impl HostIdentity {
    pub fn new(primary: impl Into<String>, cluster: Option<String>) -> Self {
        Self {
            primary_interface: Some(primary.into()),
            cluster_interface: cluster,
        }
    }

    /// Load the identity file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| Error::IdentityRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        let doc: Value = serde_yaml::from_str(&content)?;
        let text = |key: &str| {
            doc.get(key)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        };

        Ok(Self {
            primary_interface: text(PRIMARY_KEY),
            cluster_interface: text(CLUSTER_KEY),
        })
    }

    /// Reserved interface names
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.primary_interface
            .iter()
            .chain(self.cluster_interface.iter())
            .map(String::as_str)
    }

    /// Write the interface keys into the identity file, keeping other keys
    ///
    /// An unset cluster interface leaves any existing `cluster_interface`
    /// value in place.
    pub fn store(&self, path: &Path) -> Result<()> {
        let mut doc = match fs::read_to_string(path) {
            Ok(content) if !content.trim().is_empty() => serde_yaml::from_str(&content)?,
            Ok(_) => Value::Mapping(Mapping::new()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Value::Mapping(Mapping::new()),
            Err(e) => {
                return Err(Error::IdentityRead {
                    path: path.to_path_buf(),
                    source: e,
                });
            }
        };

        let map = doc.as_mapping_mut().ok_or_else(|| {
            Error::ConfigValidation(format!("{} is not a YAML mapping", path.display()))
        })?;

        if let Some(primary) = &self.primary_interface {
            map.insert(PRIMARY_KEY.into(), Value::String(primary.clone()));
        }
        if let Some(cluster) = &self.cluster_interface {
            map.insert(CLUSTER_KEY.into(), Value::String(cluster.clone()));
        }

        fs::write(path, serde_yaml::to_string(&doc)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base-config.yml");
        fs::write(
            &path,
            "hostname: cml-controller\nprimary_interface: ens3\ncluster_interface: ens4\n",
        )
        .unwrap();

        let identity = HostIdentity::load(&path).unwrap();
        assert_eq!(identity.primary_interface.as_deref(), Some("ens3"));
        assert_eq!(identity.cluster_interface.as_deref(), Some("ens4"));
        assert_eq!(identity.names().collect::<Vec<_>>(), vec!["ens3", "ens4"]);
    }

    #[test]
    fn test_load_without_cluster() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base-config.yml");
        fs::write(&path, "primary_interface: ens3\n").unwrap();

        let identity = HostIdentity::load(&path).unwrap();
        assert_eq!(identity.cluster_interface, None);
        assert_eq!(identity.names().count(), 1);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(matches!(
            HostIdentity::load(&dir.path().join("nope.yml")),
            Err(Error::IdentityRead { .. })
        ));
    }

    #[test]
    fn test_store_preserves_other_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base-config.yml");
        fs::write(&path, "hostname: cml-controller\nprimary_interface: eth9\n").unwrap();

        HostIdentity::new("ens4", Some("ens3".into())).store(&path).unwrap();

        let doc: Value = serde_yaml::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(doc["hostname"].as_str(), Some("cml-controller"));
        assert_eq!(doc["primary_interface"].as_str(), Some("ens4"));
        assert_eq!(doc["cluster_interface"].as_str(), Some("ens3"));
    }

    #[test]
    fn test_store_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("base-config.yml");

        HostIdentity::new("ens3", None).store(&path).unwrap();

        let identity = HostIdentity::load(&path).unwrap();
        assert_eq!(identity, HostIdentity::new("ens3", None));
    }
}
