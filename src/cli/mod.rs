//! CLI command handling
//!
//! Dispatches CLI commands and formats their output.

use std::path::PathBuf;

use colored::Colorize;
use tokio::sync::watch;

use crate::commands::Commands;
use crate::common::config::Config;
use crate::common::{Error, Result};
use crate::evaluate::compare;
use crate::scenario::{Catalog, Convergence, SEEDED_FILES};
use crate::session::Presenter;
use crate::testing::{self, FollowPresenter, HeadlessPresenter, Runner};

/// Dispatch a CLI command, returning the process exit code
pub async fn dispatch(
    command: Commands,
    mut config: Config,
    cancel: watch::Receiver<bool>,
) -> Result<i32> {
    match command {
        Commands::Run {
            names,
            headless,
            binary,
            timeout,
            parallel,
            base_port,
            debug,
            catalog,
            verbose,
        } => {
            if let Some(binary) = binary {
                config.subject.binary = binary;
            }
            if let Some(timeout) = timeout {
                config.timeouts.inactivity_secs = timeout;
            }
            if let Some(parallel) = parallel {
                config.session.parallel = parallel;
            }
            if let Some(base_port) = base_port {
                config.session.base_port = base_port;
            }
            if debug {
                config.debug.enabled = true;
            }

            let catalog = load_catalog(&config, &catalog)?;
            let scenarios = catalog.select(&names)?;
            if scenarios.is_empty() {
                return Err(Error::Config("No scenarios to run".to_string()));
            }

            let runner = Runner::new(config, cancel)?;

            let outcomes = if headless {
                runner
                    .run_all(&scenarios, |_, _| {
                        Box::new(HeadlessPresenter) as Box<dyn Presenter>
                    })
                    .await
            } else {
                let bar = testing::progress_bar(scenarios.len());
                let outcomes = runner
                    .run_all(&scenarios, |_, _| {
                        Box::new(FollowPresenter::new(bar.clone())) as Box<dyn Presenter>
                    })
                    .await;
                bar.finish_and_clear();
                outcomes
            };

            testing::print_summary(&outcomes, verbose || !headless);

            let (passed, total) = testing::tally(&outcomes);
            Ok(if passed == total { 0 } else { 1 })
        }

        Commands::List { catalog } => {
            let catalog = load_catalog(&config, &catalog)?;

            println!("{}", "Scenarios:".cyan());
            for scenario in catalog.list() {
                println!(
                    "  {} {}",
                    format!("{:<24}", scenario.name).white().bold(),
                    scenario.description.dimmed()
                );
                if scenario.convergence != Convergence::FileSet {
                    println!("  {:<24} {}", "", format!("({})", scenario.convergence).dimmed());
                }
            }
            Ok(0)
        }

        Commands::Check {
            server_dir,
            client_dir,
            scenario,
            seeded,
            catalog,
        } => {
            let convergence = match scenario {
                Some(name) => {
                    let catalog = load_catalog(&config, &catalog)?;
                    catalog
                        .get(&name)
                        .ok_or(Error::ScenarioNotFound(name))?
                        .convergence
                }
                None => Convergence::FileSet,
            };

            let seeded = seeded.unwrap_or(SEEDED_FILES);

            match compare(convergence, &server_dir, &client_dir, seeded)? {
                None => {
                    println!("{} trees converge ({})", "PASS".green().bold(), convergence);
                    Ok(0)
                }
                Some(detail) => {
                    println!("{} {}", "FAIL".red().bold(), detail);
                    Ok(1)
                }
            }
        }
    }
}

/// Built-in scenarios followed by config and command-line catalogs
fn load_catalog(config: &Config, extra: &[PathBuf]) -> Result<Catalog> {
    let mut catalog = Catalog::builtin();
    for path in config.catalogs.iter().chain(extra) {
        catalog.load_yaml(path)?;
    }
    Ok(catalog)
}
