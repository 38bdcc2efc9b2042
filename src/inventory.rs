//! Connection inventory
//!
//! Reads every NetworkManager profile, classifies it, and decides which ones
//! are eligible for bridging. The result is an [`Inventory`] snapshot: the
//! exclusion set is computed once from the identity file and the live device
//! column, then handed to the ordering resolver and the engine.

use crate::error::Result;
use crate::identity::HostIdentity;
use crate::manifest::NamingConfig;
use crate::network::{ConnectionRow, NmCli};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fmt;

/// Classification of a connection profile
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ConnectionKind {
    /// Unconfigured ethernet link ("Wired connection N")
    WiredDefault,
    /// Profile generated by the netplan renderer
    NetplanManaged,
    /// Anything else (bridges, loopback, VPNs, ...)
    Other,
}

impl fmt::Display for ConnectionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionKind::WiredDefault => "wired-default",
            ConnectionKind::NetplanManaged => "netplan-managed",
            ConnectionKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// A NetworkManager connection profile
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectionProfile {
    /// Profile name
    pub name: String,
    /// Bound device, if active
    pub device: Option<String>,
    /// NetworkManager connection type
    pub conn_type: String,
    /// Inferred classification
    pub kind: ConnectionKind,
}

impl ConnectionProfile {
    #[cfg(test)]
    pub fn new(name: impl Into<String>, device: Option<&str>, naming: &NamingConfig) -> Self {
        Self::from_row(
            ConnectionRow {
                name: name.into(),
                conn_type: "ethernet".to_string(),
                device: device.map(str::to_string),
            },
            naming,
        )
    }

    fn from_row(row: ConnectionRow, naming: &NamingConfig) -> Self {
        let kind = classify(&row.name, naming);
        Self {
            name: row.name,
            device: row.device,
            conn_type: row.conn_type,
            kind,
        }
    }

    /// Interface encoded in a netplan profile name (`netplan-ens4` -> `ens4`)
    pub fn netplan_interface(&self) -> Option<&str> {
        if self.kind != ConnectionKind::NetplanManaged {
            return None;
        }
        self.name.rsplit('-').next().filter(|s| !s.is_empty())
    }
}

/// Classify a profile by its display name
pub fn classify(name: &str, naming: &NamingConfig) -> ConnectionKind {
    if name.starts_with(&naming.wired_label) {
        ConnectionKind::WiredDefault
    } else if name.contains(&naming.netplan_prefix) {
        ConnectionKind::NetplanManaged
    } else {
        ConnectionKind::Other
    }
}

/// List every profile NetworkManager knows about, classified
pub fn list_connections(nm: &NmCli<'_>, naming: &NamingConfig) -> Result<Vec<ConnectionProfile>> {
    Ok(nm
        .connections()?
        .into_iter()
        .map(|row| ConnectionProfile::from_row(row, naming))
        .collect())
}

/// Devices that must never become bridge members
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExclusionSet {
    devices: BTreeSet<String>,
}

impl ExclusionSet {
    pub fn insert(&mut self, device: impl Into<String>) {
        self.devices.insert(device.into());
    }

    pub fn contains(&self, device: &str) -> bool {
        self.devices.contains(device)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.devices.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }
}

/// Classified snapshot of the host's connection profiles
#[derive(Debug, Clone, Serialize)]
pub struct Inventory {
    /// Every profile, in listing order
    profiles: Vec<ConnectionProfile>,
    /// Profiles eligible for bridging, in listing order
    eligible: Vec<ConnectionProfile>,
    /// Devices reserved by the host or by other profiles
    exclusions: ExclusionSet,
}

impl Inventory {
    /// Scan live NetworkManager state
    pub fn scan(nm: &NmCli<'_>, identity: &HostIdentity, naming: &NamingConfig) -> Result<Self> {
        let profiles = list_connections(nm, naming)?;
        Ok(Self::from_profiles(profiles, identity))
    }

    /// Build a snapshot from already-listed profiles
    pub fn from_profiles(profiles: Vec<ConnectionProfile>, identity: &HostIdentity) -> Self {
        let mut exclusions = ExclusionSet::default();
        for name in identity.names() {
            exclusions.insert(name);
        }

        // A wired-default profile's own device does not claim it; every
        // other bound device does.
        for profile in &profiles {
            if profile.kind != ConnectionKind::WiredDefault
                && let Some(device) = &profile.device
            {
                exclusions.insert(device.clone());
            }
        }

        // Only the first wired-default profile listed on a device keeps it
        let mut wired_bound = BTreeSet::new();
        let eligible = profiles
            .iter()
            .filter(|p| {
                if !Self::is_eligible(p, &exclusions) {
                    return false;
                }
                match (&p.kind, &p.device) {
                    (ConnectionKind::WiredDefault, Some(device)) => wired_bound.insert(device.clone()),
                    _ => true,
                }
            })
            .cloned()
            .collect();

        Self {
            profiles,
            eligible,
            exclusions,
        }
    }

    fn is_eligible(profile: &ConnectionProfile, exclusions: &ExclusionSet) -> bool {
        let device_free = profile
            .device
            .as_deref()
            .is_none_or(|d| !exclusions.contains(d));

        match profile.kind {
            ConnectionKind::WiredDefault => device_free,
            ConnectionKind::NetplanManaged => {
                device_free
                    && profile
                        .netplan_interface()
                        .is_some_and(|iface| !exclusions.contains(iface))
            }
            ConnectionKind::Other => false,
        }
    }

    pub fn profiles(&self) -> &[ConnectionProfile] {
        &self.profiles
    }

    pub fn eligible(&self) -> &[ConnectionProfile] {
        &self.eligible
    }

    pub fn exclusions(&self) -> &ExclusionSet {
        &self.exclusions
    }

    /// Whether the named profile was found eligible
    pub fn is_eligible_name(&self, name: &str) -> bool {
        self.eligible.iter().any(|p| p.name == name)
    }
}
