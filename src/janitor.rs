//! Forwarding-table janitor
//!
//! Provides:
//! - The periodic sweep deleting stale VLAN entries learned on managed bridges
//! - Installation of the wrapper script and its crontab registration
//!
//! The sweep shares no state with provisioning. It reads the bridge list
//! from NetworkManager and the entries from the kernel each time it runs.

use crate::error::{Error, Result};
use crate::manifest::NmBridgeConfig;
use crate::network::fdb::Fdb;
use crate::network::{ForwardingEntry, NmCli};
use crate::reconcile::ensure_entry;
use crate::sys::CommandRunner;
use std::collections::BTreeSet;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

/// Whether `name` is a bridge this tool manages (`<prefix>1NN`)
pub fn is_managed_bridge(name: &str, prefix: &str) -> bool {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('1'))
        .is_some_and(|digits| digits.len() == 2 && digits.chars().all(|c| c.is_ascii_digit()))
}

/// Result of one sweep
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    /// Managed bridges found
    pub bridges: usize,
    /// Entries deleted
    pub deleted: usize,
    /// Entries whose deletion failed
    pub failed: usize,
}

/// Periodic forwarding-table cleanup
pub struct Janitor<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a NmBridgeConfig,
}

impl<'a> Janitor<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a NmBridgeConfig) -> Self {
        Self { runner, config }
    }

    /// Managed bridges currently known to NetworkManager
    pub fn managed_bridges(&self) -> Result<BTreeSet<String>> {
        let prefix = &self.config.naming.bridge_prefix;
        Ok(NmCli::new(self.runner)
            .connections()?
            .into_iter()
            .map(|row| row.name)
            .filter(|name| is_managed_bridge(name, prefix))
            .collect())
    }

    /// Entries that a sweep would delete
    pub fn stale_entries(&self, bridges: &BTreeSet<String>) -> Result<Vec<ForwardingEntry>> {
        if bridges.is_empty() {
            return Ok(Vec::new());
        }

        let vlan = self.config.janitor.vlan;
        Ok(Fdb::new(self.runner)
            .entries()?
            .into_iter()
            .filter(|entry| entry.vlan == Some(vlan))
            .filter(|entry| entry.bridge.as_ref().is_some_and(|b| bridges.contains(b)))
            .collect())
    }

    /// Delete every stale entry on managed bridges
    pub fn sweep(&self) -> Result<SweepReport> {
        let bridges = self.managed_bridges()?;
        let mut report = SweepReport {
            bridges: bridges.len(),
            ..Default::default()
        };

        if bridges.is_empty() {
            tracing::debug!("no managed bridges, nothing to sweep");
            return Ok(report);
        }

        let fdb = Fdb::new(self.runner);
        for entry in self.stale_entries(&bridges)? {
            match fdb.delete(&entry) {
                Ok(()) => {
                    tracing::info!(
                        mac = %entry.mac,
                        device = %entry.device,
                        bridge = entry.bridge.as_deref().unwrap_or_default(),
                        "deleted stale fdb entry"
                    );
                    report.deleted += 1;
                }
                Err(e) => {
                    tracing::warn!(mac = %entry.mac, device = %entry.device, error = %e, "fdb delete failed");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }
}

/// Wrapper script the scheduler runs every minute
///
/// The script sets its own `PATH`, so it does not depend on which `PATH=`
/// line of the crontab ends up in effect.
pub fn script_content(binary: &Path, config_path: &Path, path_env: &str) -> String {
    format!(
        "#!/bin/sh\n\
         # Installed by nmbridge: prunes stale forwarding entries on managed bridges.\n\
         PATH={}\n\
         export PATH\n\
         exec {} --config {} janitor\n",
        path_env,
        binary.display(),
        config_path.display()
    )
}

/// Crontab environment line for the janitor
pub fn cron_env(config: &NmBridgeConfig) -> String {
    format!("PATH={}", config.janitor.path_env)
}

/// Crontab schedule line running the janitor script
pub fn cron_entry(config: &NmBridgeConfig, script: &Path) -> String {
    format!("{} {}", config.janitor.schedule, script.display())
}

/// Write the janitor script and register it with cron exactly once
///
/// Existing crontab lines keep their order; only earlier registrations of
/// the same script are replaced.
pub fn install(
    runner: &dyn CommandRunner,
    config: &NmBridgeConfig,
    binary: &Path,
    config_path: &Path,
) -> Result<PathBuf> {
    let install_err = |what: &str, e: &dyn std::fmt::Display| {
        Error::JobInstallFailed(format!("{}: {}", what, e))
    };

    let script = config.janitor.script_path(&config.paths);

    fs::create_dir_all(&config.paths.working_dir)
        .map_err(|e| install_err(&config.paths.working_dir.display().to_string(), &e))?;
    fs::write(&script, script_content(binary, config_path, &config.janitor.path_env))
        .map_err(|e| install_err(&script.display().to_string(), &e))?;
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755))
        .map_err(|e| install_err("chmod", &e))?;

    // No crontab yet is reported as a failure by `crontab -l`
    let current = runner
        .run("crontab", &["-l"])
        .map_err(|e| install_err("crontab -l", &e))?;
    let existing = if current.success {
        current.stdout
    } else {
        String::new()
    };

    let script_str = script.display().to_string();
    let result = ensure_entry(
        &existing,
        &cron_env(config),
        &cron_entry(config, &script),
        |line| !line.starts_with('#') && line.ends_with(script_str.as_str()),
    );

    if result.changed {
        runner
            .run_with_input("crontab", &["-"], &result.content)
            .and_then(|out| out.check("crontab -"))
            .map_err(|e| install_err("crontab -", &e))?;
        tracing::info!(script = %script.display(), "registered janitor job");
    } else {
        tracing::debug!(script = %script.display(), "janitor job already registered");
    }

    Ok(script)
}
