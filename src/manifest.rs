//! Configuration file parsing for nmbridge
//!
//! Parses the optional `nmbridge.toml` using serde. Every field has a
//! default matching a stock host, so a missing file is not an error.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Default location of the configuration file
pub const DEFAULT_CONFIG_PATH: &str = "/etc/nmbridge.toml";

/// Load configuration from a file, falling back to defaults when absent
pub fn load(path: &Path) -> Result<NmBridgeConfig> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(NmBridgeConfig::default());
        }
        Err(e) => {
            return Err(Error::ConfigRead {
                path: path.to_path_buf(),
                source: e,
            });
        }
    };

    let config: NmBridgeConfig = toml::from_str(&content)?;
    config.validate()?;

    Ok(config)
}

/// Root configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct NmBridgeConfig {
    /// Host file locations
    #[serde(default)]
    pub paths: PathsConfig,

    /// Profile classification and bridge naming
    #[serde(default)]
    pub naming: NamingConfig,

    /// Forwarding-table janitor job
    #[serde(default)]
    pub janitor: JanitorConfig,
}

impl NmBridgeConfig {
    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        let naming = &self.naming;

        for (field, value) in [
            ("naming.wired_label", &naming.wired_label),
            ("naming.netplan_prefix", &naming.netplan_prefix),
            ("naming.device_prefix", &naming.device_prefix),
            ("naming.bridge_prefix", &naming.bridge_prefix),
            ("naming.renderer", &naming.renderer),
            ("janitor.script_name", &self.janitor.script_name),
            ("janitor.schedule", &self.janitor.schedule),
        ] {
            if value.trim().is_empty() {
                return Err(Error::ConfigValidation(format!("{} must not be empty", field)));
            }
        }

        // Names must stay inside the janitor's bridge1NN pattern
        if !(100..=199).contains(&naming.first_index) {
            return Err(Error::ConfigValidation(format!(
                "naming.first_index must be between 100 and 199, got {}",
                naming.first_index
            )));
        }

        if self.janitor.script_name.contains('/') {
            return Err(Error::ConfigValidation(
                "janitor.script_name must be a file name, not a path".into(),
            ));
        }

        if self.janitor.schedule.split_whitespace().count() != 5 {
            return Err(Error::ConfigValidation(format!(
                "janitor.schedule must have five cron fields: '{}'",
                self.janitor.schedule
            )));
        }

        Ok(())
    }
}

/// Host file locations
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PathsConfig {
    /// Host identity file carrying primary/cluster interface names
    #[serde(default = "default_host_identity")]
    pub host_identity: PathBuf,

    /// Netplan file ranking interfaces by route metric
    #[serde(default = "default_netplan")]
    pub netplan: PathBuf,

    /// Persistent sysctl configuration
    #[serde(default = "default_sysctl")]
    pub sysctl: PathBuf,

    /// Directory receiving the janitor script
    #[serde(default = "default_working_dir")]
    pub working_dir: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            host_identity: default_host_identity(),
            netplan: default_netplan(),
            sysctl: default_sysctl(),
            working_dir: default_working_dir(),
        }
    }
}

fn default_host_identity() -> PathBuf {
    PathBuf::from("/etc/virl2-base-config.yml")
}

fn default_netplan() -> PathBuf {
    PathBuf::from("/etc/netplan/50-cloud-init.yaml")
}

fn default_sysctl() -> PathBuf {
    PathBuf::from("/etc/sysctl.conf")
}

fn default_working_dir() -> PathBuf {
    PathBuf::from("/provision")
}

/// Where profiles without a numeric interface token sort
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnknownRank {
    /// Rank 0, ahead of every numbered interface
    #[default]
    First,
    /// After every numbered interface
    Last,
}

/// Profile classification and bridge naming
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct NamingConfig {
    /// Label NetworkManager gives unconfigured ethernet links
    #[serde(default = "default_wired_label")]
    pub wired_label: String,

    /// Marker in profile names written by the netplan renderer
    #[serde(default = "default_netplan_prefix")]
    pub netplan_prefix: String,

    /// Physical device prefix used for ranking netplan profiles
    #[serde(default = "default_device_prefix")]
    pub device_prefix: String,

    /// Bridge name prefix
    #[serde(default = "default_bridge_prefix")]
    pub bridge_prefix: String,

    /// First bridge number
    #[serde(default = "default_first_index")]
    pub first_index: u32,

    /// Ranking for profiles without a recognizable interface number
    #[serde(default)]
    pub unknown_rank: UnknownRank,

    /// Renderer forced into the netplan file
    #[serde(default = "default_renderer")]
    pub renderer: String,
}

impl Default for NamingConfig {
    fn default() -> Self {
        Self {
            wired_label: default_wired_label(),
            netplan_prefix: default_netplan_prefix(),
            device_prefix: default_device_prefix(),
            bridge_prefix: default_bridge_prefix(),
            first_index: default_first_index(),
            unknown_rank: UnknownRank::default(),
            renderer: default_renderer(),
        }
    }
}

fn default_wired_label() -> String {
    "Wired connection".into()
}

fn default_netplan_prefix() -> String {
    "netplan-".into()
}

fn default_device_prefix() -> String {
    "ens".into()
}

fn default_bridge_prefix() -> String {
    "bridge".into()
}

fn default_first_index() -> u32 {
    101
}

fn default_renderer() -> String {
    "NetworkManager".into()
}

/// Forwarding-table janitor job
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JanitorConfig {
    /// Script file name under `paths.working_dir`
    #[serde(default = "default_script_name")]
    pub script_name: String,

    /// Cron schedule
    #[serde(default = "default_schedule")]
    pub schedule: String,

    /// PATH exported in the crontab
    #[serde(default = "default_path_env")]
    pub path_env: String,

    /// VLAN whose entries are pruned
    #[serde(default = "default_vlan")]
    pub vlan: u16,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            script_name: default_script_name(),
            schedule: default_schedule(),
            path_env: default_path_env(),
            vlan: default_vlan(),
        }
    }
}

impl JanitorConfig {
    /// Full path of the installed janitor script
    pub fn script_path(&self, paths: &PathsConfig) -> PathBuf {
        paths.working_dir.join(&self.script_name)
    }
}

fn default_script_name() -> String {
    "delete_bridge_macs.sh".into()
}

fn default_schedule() -> String {
    "* * * * *".into()
}

fn default_path_env() -> String {
    "/sbin:/bin:/usr/sbin:/usr/bin".into()
}

fn default_vlan() -> u16 {
    1
}
