//! CLI command definitions
//!
//! Defines the clap commands for the harness CLI.

use clap::Subcommand;
use std::path::PathBuf;

#[derive(Subcommand)]
pub enum Commands {
    /// Run scenarios against the sync binary
    Run {
        /// Scenarios to run, in catalog order (default: all)
        names: Vec<String>,

        /// Print only the final summary
        #[arg(long)]
        headless: bool,

        /// Sync binary to test (overrides subject.binary)
        #[arg(long)]
        binary: Option<PathBuf>,

        /// Inactivity timeout in seconds, 0 disables
        #[arg(long)]
        timeout: Option<u64>,

        /// Sessions to run at once
        #[arg(long, short = 'j')]
        parallel: Option<usize>,

        /// First session port, 0 picks free ports
        #[arg(long)]
        base_port: Option<u16>,

        /// Wrap both subjects in gdbserver
        #[arg(long)]
        debug: bool,

        /// Extra YAML scenario catalog (repeatable)
        #[arg(long)]
        catalog: Vec<PathBuf>,

        /// Print output tails of failed scenarios
        #[arg(long, short)]
        verbose: bool,
    },

    /// List the scenario catalog
    List {
        /// Extra YAML scenario catalog (repeatable)
        #[arg(long)]
        catalog: Vec<PathBuf>,
    },

    /// Evaluate two existing directory trees
    Check {
        /// Server-side tree
        server_dir: PathBuf,

        /// Client-side tree
        client_dir: PathBuf,

        /// Scenario whose convergence rule applies (default: file-set equality)
        #[arg(long)]
        scenario: Option<String>,

        /// Baseline file count for below-baseline scenarios
        #[arg(long)]
        seeded: Option<usize>,

        /// Extra YAML scenario catalog (repeatable)
        #[arg(long)]
        catalog: Vec<PathBuf>,
    },
}
