//! nmbridge - NetworkManager bridge provisioner
//!
//! Moves every eligible wired connection under its own Linux bridge,
//! keeps the bridges' forwarding tables clean, and publishes the host's
//! management interfaces.

mod cli;
mod error;
mod identity;
mod inventory;
mod janitor;
mod manifest;
mod network;
mod ordering;
mod provision;
mod publish;
mod reconcile;
mod sys;

use cli::{Cli, Commands};
use error::Result;
use identity::HostIdentity;
use inventory::Inventory;
use janitor::Janitor;
use manifest::NmBridgeConfig;
use network::NmCli;
use provision::{Engine, JanitorTarget, ProvisionReport};
use sys::{require_root, SystemRunner};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse_args();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli) {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}

fn init_tracing(verbosity: u8) {
    let filter = match verbosity {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<()> {
    // Commands that don't require config
    if let Commands::Completion { shell } = cli.command {
        Cli::generate_completion(shell);
        return Ok(());
    }

    let config = manifest::load(&cli.config)?;
    let runner = SystemRunner;

    match cli.command {
        Commands::Provision {
            dry_run,
            skip_janitor,
        } => {
            if !dry_run {
                require_root("provision")?;
            }

            let inventory = scan(&runner, &config)?;
            let mut engine = Engine::new(&runner, &config);

            if dry_run {
                println!("=== DRY RUN - No changes will be made ===\n");
                let plan = engine.plan(&inventory)?;
                if plan.is_empty() {
                    println!("No eligible connections.");
                    return Ok(());
                }
                println!("{:<28} {:<12} {:<12}", "CONNECTION", "DEVICE", "BRIDGE");
                println!("{}", "-".repeat(54));
                for step in plan {
                    println!(
                        "{:<28} {:<12} {:<12}",
                        step.profile,
                        step.device.as_deref().unwrap_or("--"),
                        step.bridge
                    );
                }
                return Ok(());
            }

            if !skip_janitor {
                engine = engine.with_janitor(JanitorTarget {
                    binary: std::env::current_exe()?,
                    config_path: std::path::absolute(&cli.config)?,
                });
            }

            let report = engine.provision(&inventory)?;
            print_report(&report);
        }
        Commands::Janitor { dry_run } => {
            if !dry_run {
                require_root("janitor")?;
            }

            let janitor = Janitor::new(&runner, &config);
            if dry_run {
                let bridges = janitor.managed_bridges()?;
                let stale = janitor.stale_entries(&bridges)?;
                println!("Managed bridges: {}", bridges.len());
                for entry in stale {
                    println!(
                        "  would delete {} dev {} master {}",
                        entry.mac,
                        entry.device,
                        entry.bridge.as_deref().unwrap_or_default()
                    );
                }
            } else {
                let report = janitor.sweep()?;
                tracing::info!(
                    bridges = report.bridges,
                    deleted = report.deleted,
                    failed = report.failed,
                    "sweep complete"
                );
            }
        }
        Commands::Publish { dry_run } => {
            let published = publish::resolve_and_publish(&config, dry_run)?;
            if dry_run {
                println!("=== DRY RUN - No changes will be made ===\n");
            }
            println!("Primary interface: {}", published.primary);
            println!(
                "Cluster interface: {}",
                published.cluster.as_deref().unwrap_or("(none)")
            );
            if published.netplan_changed {
                println!("Netplan renderer set to {}", config.naming.renderer);
            }
        }
        Commands::Inventory { json } => {
            let inventory = scan(&runner, &config)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&inventory)?);
            } else {
                print_inventory(&inventory);
            }
        }
        // Already handled above
        Commands::Completion { .. } => unreachable!(),
    }

    Ok(())
}

/// Read identity and live connections into a snapshot
fn scan(runner: &SystemRunner, config: &NmBridgeConfig) -> Result<Inventory> {
    let identity = HostIdentity::load(&config.paths.host_identity)?;
    Inventory::scan(&NmCli::new(runner), &identity, &config.naming)
}

fn print_inventory(inventory: &Inventory) {
    println!(
        "{:<28} {:<10} {:<16} {:<12} {:<8}",
        "CONNECTION", "TYPE", "KIND", "DEVICE", "ELIGIBLE"
    );
    println!("{}", "-".repeat(77));
    for profile in inventory.profiles() {
        println!(
            "{:<28} {:<10} {:<16} {:<12} {:<8}",
            profile.name,
            profile.conn_type,
            profile.kind.to_string(),
            profile.device.as_deref().unwrap_or("--"),
            if inventory.is_eligible_name(&profile.name) { "yes" } else { "no" }
        );
    }

    if inventory.exclusions().is_empty() {
        println!("\nExcluded devices: (none)");
    } else {
        let excluded: Vec<&str> = inventory.exclusions().iter().collect();
        println!("\nExcluded devices: {}", excluded.join(", "));
    }
}

fn print_report(report: &ProvisionReport) {
    if report.outcomes.is_empty() {
        println!("No eligible connections, nothing to do.");
    } else {
        println!("{:<28} {:<12} {:<12} {:<18}", "CONNECTION", "MEMBER", "BRIDGE", "STAGE");
        println!("{}", "-".repeat(72));
        for outcome in &report.outcomes {
            println!(
                "{:<28} {:<12} {:<12} {:<18}",
                outcome.profile,
                outcome.member.as_deref().unwrap_or("--"),
                outcome.bridge.as_deref().unwrap_or("--"),
                outcome.stage.to_string()
            );
        }
    }

    for outcome in report.failed() {
        if let (Some(transition), Some(error)) = (&outcome.failed_at, &outcome.error) {
            println!("\n{} failed at {}: {}", outcome.profile, transition, error);
        }
    }

    if let Some(script) = &report.janitor_script {
        println!("\nJanitor installed: {}", script.display());
    }
    for warning in &report.warnings {
        eprintln!("Warning: {}", warning);
    }

    println!(
        "\n{} bridged, {} failed",
        report.bridged().count(),
        report.failed().count()
    );
}
