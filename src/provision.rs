//! Bridge provisioning engine
//!
//! Handles:
//! - Ordering eligible connections and allocating bridge names
//! - Migrating each connection under its own bridge, one at a time
//! - Persisting per-bridge IPv6 sysctl settings and applying them in one batch
//! - Restarting NetworkManager and installing the forwarding-table janitor
//!
//! A failure aborts only the connection it happened on. Nothing is rolled
//! back and the engine moves on to the next connection.

pub mod state;

use crate::error::{Error, Result};
use crate::inventory::{ConnectionProfile, Inventory};
use crate::janitor;
use crate::manifest::NmBridgeConfig;
use crate::network::NmCli;
use crate::ordering;
use crate::reconcile;
use crate::sys::CommandRunner;
use state::{ProfileRun, Stage, Transition};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Highest index inside the managed `<prefix>1NN` range
pub const LAST_INDEX: u32 = 199;

/// Settings applied to every bridge
const BRIDGE_SETTINGS: [(&str, &str); 3] = [
    ("ipv4.method", "disabled"),
    ("ipv6.method", "ignore"),
    ("bridge.stp", "no"),
];

/// A bridge wrapping a single physical interface
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BridgeSpec {
    /// Bridge name, also used as its interface name
    pub name: String,
    /// Physical interface migrated into the bridge
    pub member_interface: String,
}

impl BridgeSpec {
    pub fn new(name: impl Into<String>, member_interface: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            member_interface: member_interface.into(),
        }
    }

    /// Name of the ethernet port profile enslaved to the bridge
    pub fn port_name(&self) -> String {
        format!("{}-p1", self.name)
    }

    /// Persistent sysctl line disabling IPv6 on the bridge
    pub fn sysctl_line(&self) -> String {
        sysctl_line(&self.name)
    }
}

/// `net.ipv6.conf.<bridge>.disable_ipv6 = 1`
pub fn sysctl_line(bridge: &str) -> String {
    format!("net.ipv6.conf.{}.disable_ipv6 = 1", bridge)
}

/// Hands out bridge names in strictly increasing order
///
/// Names are never reused within a run, and names already taken by an
/// existing profile are skipped. Allocation stops at [`LAST_INDEX`] so
/// every bridge stays visible to the janitor.
#[derive(Debug, Clone)]
pub struct BridgeAllocator {
    prefix: String,
    next: u32,
    taken: BTreeSet<String>,
}

impl BridgeAllocator {
    pub fn new(prefix: impl Into<String>, first: u32) -> Self {
        Self {
            prefix: prefix.into(),
            next: first,
            taken: BTreeSet::new(),
        }
    }

    /// Mark existing profile names as unavailable
    pub fn with_taken<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.taken.extend(names.into_iter().map(Into::into));
        self
    }

    /// Allocate the next free name
    pub fn allocate(&mut self) -> Result<String> {
        while self.next <= LAST_INDEX {
            let name = format!("{}{}", self.prefix, self.next);
            self.next += 1;
            if self.taken.insert(name.clone()) {
                return Ok(name);
            }
        }
        Err(Error::BridgeNamesExhausted {
            last: format!("{}{}", self.prefix, LAST_INDEX),
        })
    }
}

/// What happened to one connection
#[derive(Debug, Clone)]
pub struct Outcome {
    /// Original profile name
    pub profile: String,
    /// Bridge allocated for it
    pub bridge: Option<String>,
    /// Physical interface
    pub member: Option<String>,
    /// Last stage reached
    pub stage: Stage,
    /// Transition that failed, if any
    pub failed_at: Option<Transition>,
    /// Error message, if any
    pub error: Option<String>,
}

impl Outcome {
    pub fn is_done(&self) -> bool {
        self.stage == Stage::Done
    }

    /// Whether any host mutation happened for this connection
    pub fn touched_host(&self) -> bool {
        self.bridge.is_some()
    }
}

/// Result of a provisioning run
#[derive(Debug, Default)]
pub struct ProvisionReport {
    /// Per-connection outcomes in processing order
    pub outcomes: Vec<Outcome>,
    /// Whether the sysctl file was rewritten
    pub sysctl_changed: bool,
    /// Installed janitor script
    pub janitor_script: Option<PathBuf>,
    /// Run-level problems that did not stop the run
    pub warnings: Vec<String>,
}

impl ProvisionReport {
    pub fn bridged(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| o.is_done())
    }

    pub fn failed(&self) -> impl Iterator<Item = &Outcome> {
        self.outcomes.iter().filter(|o| !o.is_done())
    }
}

/// A bridge the engine would create (dry run)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedBridge {
    pub profile: String,
    pub device: Option<String>,
    pub bridge: String,
}

/// Where the janitor wrapper should point
#[derive(Debug, Clone)]
pub struct JanitorTarget {
    /// nmbridge binary the script executes
    pub binary: PathBuf,
    /// Config file passed to it
    pub config_path: PathBuf,
}

/// Provisioning engine
pub struct Engine<'a> {
    runner: &'a dyn CommandRunner,
    config: &'a NmBridgeConfig,
    janitor: Option<JanitorTarget>,
}

impl<'a> Engine<'a> {
    pub fn new(runner: &'a dyn CommandRunner, config: &'a NmBridgeConfig) -> Self {
        Self {
            runner,
            config,
            janitor: None,
        }
    }

    /// Install the janitor job after bridging
    pub fn with_janitor(mut self, target: JanitorTarget) -> Self {
        self.janitor = Some(target);
        self
    }

    fn allocator(&self, inventory: &Inventory) -> BridgeAllocator {
        BridgeAllocator::new(
            self.config.naming.bridge_prefix.clone(),
            self.config.naming.first_index,
        )
        .with_taken(inventory.profiles().iter().map(|p| p.name.clone()))
    }

    /// Eligible connections in processing order
    pub fn order(&self, inventory: &Inventory) -> Vec<ConnectionProfile> {
        ordering::order(inventory.eligible(), &self.config.naming)
    }

    /// Show what a run would do without touching the host
    pub fn plan(&self, inventory: &Inventory) -> Result<Vec<PlannedBridge>> {
        let mut allocator = self.allocator(inventory);
        self.order(inventory)
            .into_iter()
            .map(|profile| {
                Ok(PlannedBridge {
                    bridge: allocator.allocate()?,
                    device: profile.device,
                    profile: profile.name,
                })
            })
            .collect()
    }

    /// Bridge every eligible connection, then apply and install
    pub fn provision(&self, inventory: &Inventory) -> Result<ProvisionReport> {
        let nm = NmCli::new(self.runner);
        let mut allocator = self.allocator(inventory);
        let mut report = ProvisionReport::default();
        // Devices that may not become members; grows as members resolve
        let mut claimed: BTreeSet<String> =
            inventory.exclusions().iter().map(str::to_string).collect();

        let ordered = self.order(inventory);
        tracing::info!(
            eligible = ordered.len(),
            excluded = inventory.exclusions().len(),
            "starting bridge provisioning"
        );

        for profile in &ordered {
            let outcome = self.migrate(&nm, profile, &mut claimed, &mut allocator, &mut report);
            report.outcomes.push(outcome);
        }

        self.finish(&nm, &mut report);

        if let Some(target) = &self.janitor {
            match janitor::install(self.runner, self.config, &target.binary, &target.config_path) {
                Ok(script) => report.janitor_script = Some(script),
                Err(e) => {
                    tracing::error!(error = %e, "janitor installation failed");
                    report.warnings.push(e.to_string());
                }
            }
        }

        Ok(report)
    }

    /// Run one connection through the state machine
    fn migrate(
        &self,
        nm: &NmCli<'_>,
        profile: &ConnectionProfile,
        claimed: &mut BTreeSet<String>,
        allocator: &mut BridgeAllocator,
        report: &mut ProvisionReport,
    ) -> Outcome {
        let mut run = ProfileRun::new(profile.name.clone());
        let result = self.drive(nm, &mut run, claimed, allocator, report);

        let (failed_at, error) = match result {
            Ok(()) => {
                tracing::info!(
                    profile = %run.profile,
                    bridge = run.bridge.as_deref().unwrap_or_default(),
                    member = run.member.as_deref().unwrap_or_default(),
                    "connection bridged"
                );
                (None, None)
            }
            Err((transition, e)) => {
                if let Err(err) = run.fail() {
                    tracing::debug!(error = ?err, "state machine refused fail event");
                }
                tracing::error!(
                    profile = %run.profile,
                    transition = %transition,
                    error = %e,
                    "connection left unfinished"
                );
                (Some(transition), Some(e.to_string()))
            }
        };

        // Report the last stage actually reached, not the failure marker
        let stage = match failed_at {
            None => run.stage(),
            Some(Transition::ResolveMember) | Some(Transition::CreateBridge) => Stage::Eligible,
            Some(Transition::ConfigureBridge) => Stage::BridgeCreated,
            Some(Transition::AttachMember) => Stage::BridgeConfigured,
            Some(Transition::RetireOriginal) => Stage::MemberAttached,
            Some(Transition::PersistSysctl) => Stage::OriginalRetired,
        };

        Outcome {
            profile: run.profile,
            bridge: run.bridge,
            member: run.member,
            stage,
            failed_at,
            error,
        }
    }

    fn drive(
        &self,
        nm: &NmCli<'_>,
        run: &mut ProfileRun,
        claimed: &mut BTreeSet<String>,
        allocator: &mut BridgeAllocator,
        report: &mut ProvisionReport,
    ) -> std::result::Result<(), (Transition, Error)> {
        // Eligible: resolve the member before touching anything
        let member = step(run, Transition::ResolveMember, |run| {
            let member = nm.interface_name(&run.profile)?;
            if claimed.contains(&member) {
                return Err(Error::MemberExcluded {
                    profile: run.profile.clone(),
                    interface: member,
                });
            }
            Ok(member)
        })?;
        claimed.insert(member.clone());
        run.member = Some(member.clone());

        // Eligible -> BridgeCreated
        let name = allocator
            .allocate()
            .map_err(|e| (Transition::CreateBridge, e))?;
        let bridge = BridgeSpec::new(name, member);
        run.bridge = Some(bridge.name.clone());
        step(run, Transition::CreateBridge, |_| nm.add_bridge(&bridge.name))?;

        // BridgeCreated -> BridgeConfigured
        step(run, Transition::ConfigureBridge, |_| {
            for (key, value) in BRIDGE_SETTINGS {
                nm.modify(&bridge.name, key, value)?;
            }
            Ok(())
        })?;

        // BridgeConfigured -> MemberAttached
        step(run, Transition::AttachMember, |_| {
            nm.add_bridge_port(&bridge.name, &bridge.port_name(), &bridge.member_interface)
        })?;

        // MemberAttached -> OriginalRetired
        step(run, Transition::RetireOriginal, |run| nm.delete(&run.profile))?;

        // OriginalRetired -> Done
        step(run, Transition::PersistSysctl, |_| {
            let changed = reconcile::merge_file(&self.config.paths.sysctl, &[bridge.sysctl_line()])?;
            report.sysctl_changed |= changed;
            Ok(())
        })?;

        Ok(())
    }

    /// Apply sysctl in one batch and restart NetworkManager
    fn finish(&self, nm: &NmCli<'_>, report: &mut ProvisionReport) {
        if report.bridged().next().is_some() {
            if let Err(e) = apply_sysctl(self.runner, &self.config.paths.sysctl) {
                tracing::error!(error = %e, "applying sysctl settings failed");
                report.warnings.push(e.to_string());
            }
        }

        if report.outcomes.iter().any(Outcome::touched_host) {
            tracing::info!("restarting NetworkManager");
            if let Err(e) = nm.restart_service() {
                tracing::error!(error = %e, "NetworkManager restart failed");
                report.warnings.push(e.to_string());
            }
        } else {
            tracing::info!("no connections changed, NetworkManager left running");
        }
    }
}

/// Run a transition's work and advance the machine on success
fn step<T, F>(
    run: &mut ProfileRun,
    transition: Transition,
    work: F,
) -> std::result::Result<T, (Transition, Error)>
where
    F: FnOnce(&ProfileRun) -> Result<T>,
{
    tracing::debug!(profile = %run.profile, transition = %transition, "transition");

    let value = work(run).map_err(|e| (transition, e))?;
    run.advance(transition).map_err(|e| {
        (
            transition,
            Error::TransitionFailed {
                profile: run.profile.clone(),
                transition: transition.to_string(),
                message: format!("{:?}", e),
            },
        )
    })?;

    Ok(value)
}

/// Load persistent sysctl settings
pub fn apply_sysctl(runner: &dyn CommandRunner, path: &Path) -> Result<()> {
    let path = path.to_string_lossy();
    runner.run_checked("sysctl", &["-p", &path, "-q"]).map(|_| ())
}
