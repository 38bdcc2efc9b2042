//! Primary/cluster interface publisher
//!
//! Picks the management interfaces from the netplan file by default-route
//! metric and records them in the host identity file. The netplan file is
//! then switched to the NetworkManager renderer.

use crate::error::{Error, Result};
use crate::identity::HostIdentity;
use crate::manifest::NmBridgeConfig;
use serde_yaml::{Mapping, Value};
use std::fs;
use std::path::Path;

/// Interfaces chosen by the publisher
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub primary: String,
    pub cluster: Option<String>,
    /// Whether the netplan file was rewritten
    pub netplan_changed: bool,
}

/// Route metric of one ethernet entry
fn route_metric(entry: &Value) -> Option<i64> {
    entry
        .get("dhcp4-overrides")
        .and_then(|o| o.get("route-metric"))
        .and_then(Value::as_i64)
}

/// Ethernet names ordered by ascending route metric
///
/// Entries without a metric sort last. Equal metrics keep file order.
pub fn interface_order(netplan: &Value) -> Vec<String> {
    let Some(ethernets) = netplan
        .get("network")
        .and_then(|n| n.get("ethernets"))
        .and_then(Value::as_mapping)
    else {
        return Vec::new();
    };

    let mut ranked: Vec<(i64, String)> = ethernets
        .iter()
        .filter_map(|(name, entry)| {
            let name = name.as_str()?;
            Some((route_metric(entry).unwrap_or(i64::MAX), name.to_string()))
        })
        .collect();
    ranked.sort_by_key(|(metric, _)| *metric);
    ranked.into_iter().map(|(_, name)| name).collect()
}

/// Identity derived from a netplan document
pub fn resolve(netplan: &Value, path: &Path) -> Result<HostIdentity> {
    let mut order = interface_order(netplan).into_iter();
    let primary = order
        .next()
        .ok_or_else(|| Error::NoInterfaces(path.to_path_buf()))?;
    Ok(HostIdentity::new(primary, order.next()))
}

/// Set the renderer globally and on the primary ethernet
///
/// Returns whether the document changed.
pub fn set_renderer(netplan: &mut Value, primary: &str, renderer: &str) -> Result<bool> {
    let wanted = Value::String(renderer.to_string());

    let network = netplan
        .as_mapping_mut()
        .and_then(|root| root.get_mut("network"))
        .and_then(Value::as_mapping_mut)
        .ok_or_else(|| Error::ConfigValidation("netplan file has no network mapping".to_string()))?;

    let mut changed = false;
    if network.get("renderer") != Some(&wanted) {
        network.insert(Value::from("renderer"), wanted.clone());
        changed = true;
    }

    if let Some(entry) = network
        .get_mut("ethernets")
        .and_then(|e| e.get_mut(primary))
    {
        if entry.is_null() {
            *entry = Value::Mapping(Mapping::new());
        }
        if let Some(map) = entry.as_mapping_mut()
            && map.get("renderer") != Some(&wanted)
        {
            map.insert(Value::from("renderer"), wanted);
            changed = true;
        }
    }

    Ok(changed)
}

/// Resolve management interfaces and write them out
///
/// With `dry_run` nothing is written.
pub fn resolve_and_publish(config: &NmBridgeConfig, dry_run: bool) -> Result<Published> {
    let path = &config.paths.netplan;
    let content = fs::read_to_string(path).map_err(|e| Error::NetplanRead {
        path: path.clone(),
        source: e,
    })?;
    let mut netplan: Value = serde_yaml::from_str(&content)?;

    let identity = resolve(&netplan, path)?;
    let primary = identity.primary_interface.clone().unwrap_or_default();
    let cluster = identity.cluster_interface.clone();

    tracing::info!(
        primary = %primary,
        cluster = cluster.as_deref().unwrap_or("-"),
        "resolved management interfaces"
    );

    let netplan_changed = set_renderer(&mut netplan, &primary, &config.naming.renderer)?;

    if !dry_run {
        identity.store(&config.paths.host_identity)?;
        if netplan_changed {
            fs::write(path, serde_yaml::to_string(&netplan)?)?;
            tracing::info!(path = %path.display(), "netplan renderer updated");
        }
    }

    Ok(Published {
        primary,
        cluster,
        netplan_changed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const NETPLAN: &str = "\
network:
  version: 2
  ethernets:
    ens3:
      dhcp4: true
      dhcp4-overrides:
        route-metric: 100
    ens4:
      dhcp4: true
      dhcp4-overrides:
        route-metric: 50
    ens5:
      dhcp4: true
";

    fn config_in(dir: &Path) -> NmBridgeConfig {
        let mut config = NmBridgeConfig::default();
        config.paths.netplan = dir.join("50-cloud-init.yaml");
        config.paths.host_identity = dir.join("base-config.yml");
        config
    }

    #[test]
    fn test_interface_order_by_metric() {
        let doc: Value = serde_yaml::from_str(NETPLAN).unwrap();
        assert_eq!(interface_order(&doc), vec!["ens4", "ens3", "ens5"]);
    }

    #[test]
    fn test_missing_metrics_keep_file_order() {
        let doc: Value = serde_yaml::from_str(
            "network:\n  ethernets:\n    eth1: {}\n    eth0: {}\n",
        )
        .unwrap();
        assert_eq!(interface_order(&doc), vec!["eth1", "eth0"]);
    }

    #[test]
    fn test_resolve_single_interface() {
        let doc: Value =
            serde_yaml::from_str("network:\n  ethernets:\n    ens3:\n      dhcp4: true\n").unwrap();
        let identity = resolve(&doc, Path::new("netplan.yaml")).unwrap();
        assert_eq!(identity.primary_interface.as_deref(), Some("ens3"));
        assert_eq!(identity.cluster_interface, None);
    }

    #[test]
    fn test_no_ethernets() {
        let doc: Value = serde_yaml::from_str("network:\n  version: 2\n").unwrap();
        assert!(matches!(
            resolve(&doc, Path::new("netplan.yaml")),
            Err(Error::NoInterfaces(_))
        ));
    }

    #[test]
    fn test_publish_writes_identity_and_renderer() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.paths.netplan, NETPLAN).unwrap();
        fs::write(&config.paths.host_identity, "hostname: cml\n").unwrap();

        let published = resolve_and_publish(&config, false).unwrap();
        assert_eq!(published.primary, "ens4");
        assert_eq!(published.cluster.as_deref(), Some("ens3"));
        assert!(published.netplan_changed);

        let identity = HostIdentity::load(&config.paths.host_identity).unwrap();
        assert_eq!(identity, HostIdentity::new("ens4", Some("ens3".into())));
        let raw: Value =
            serde_yaml::from_str(&fs::read_to_string(&config.paths.host_identity).unwrap()).unwrap();
        assert_eq!(raw["hostname"], Value::from("cml"));

        let netplan: Value =
            serde_yaml::from_str(&fs::read_to_string(&config.paths.netplan).unwrap()).unwrap();
        assert_eq!(netplan["network"]["renderer"], Value::from("NetworkManager"));
        assert_eq!(
            netplan["network"]["ethernets"]["ens4"]["renderer"],
            Value::from("NetworkManager")
        );
        assert!(netplan["network"]["ethernets"]["ens3"].get("renderer").is_none());
        assert_eq!(netplan["network"]["version"].as_u64(), Some(2));

        let again = resolve_and_publish(&config, false).unwrap();
        assert!(!again.netplan_changed);
    }

    #[test]
    fn test_publish_dry_run_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.paths.netplan, NETPLAN).unwrap();

        let published = resolve_and_publish(&config, true).unwrap();
        assert_eq!(published.primary, "ens4");
        assert!(!config.paths.host_identity.exists());
        assert_eq!(fs::read_to_string(&config.paths.netplan).unwrap(), NETPLAN);
    }

    #[test]
    fn test_publish_without_ethernets_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        fs::write(&config.paths.netplan, "network:\n  version: 2\n").unwrap();

        assert!(matches!(
            resolve_and_publish(&config, false),
            Err(Error::NoInterfaces(_))
        ));
        assert!(!config.paths.host_identity.exists());
    }

    #[test]
    fn test_negative_metric_ranks_first() {
        let doc: Value = serde_yaml::from_str(
            "\
network:
  ethernets:
    ens3:
      dhcp4-overrides:
        route-metric: 0
    ens4:
      dhcp4-overrides:
        route-metric: -5
    ens5: {}
",
        )
        .unwrap();
        assert_eq!(interface_order(&doc), vec!["ens4", "ens3", "ens5"]);
    }

    #[test]
    fn test_missing_netplan_names_netplan() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());

        let err = resolve_and_publish(&config, false).unwrap_err();
        assert!(matches!(err, Error::NetplanRead { .. }));
        assert!(err.to_string().contains("netplan"));
    }
}
