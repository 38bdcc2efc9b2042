//! Command-line interface for nmbridge
//!
//! Uses clap with derive for type-safe CLI parsing

use crate::manifest::DEFAULT_CONFIG_PATH;
use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

/// nmbridge - move NetworkManager connections under Linux bridges
#[derive(Parser)]
#[command(name = "nmbridge")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand)]
pub enum Commands {
    /// Bridge every eligible connection and install the janitor job
    Provision {
        /// Show what would be done without making changes
        #[arg(long)]
        dry_run: bool,

        /// Do not install the forwarding-table janitor
        #[arg(long)]
        skip_janitor: bool,
    },

    /// Delete stale forwarding entries on managed bridges
    Janitor {
        /// List stale entries without deleting them
        #[arg(long)]
        dry_run: bool,
    },

    /// Record primary/cluster interfaces and switch netplan to NetworkManager
    Publish {
        /// Show the resolved interfaces without writing
        #[arg(long)]
        dry_run: bool,
    },

    /// Show classified connections and the exclusion set
    Inventory {
        /// Output in JSON format
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completions
    Completion {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

impl Cli {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Generate shell completion scripts
    pub fn generate_completion(shell: Shell) {
        let mut cmd = Self::command();
        clap_complete::generate(shell, &mut cmd, "nmbridge", &mut std::io::stdout());
    }
}
