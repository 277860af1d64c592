//! Scenario runner
//!
//! Drives each selected scenario through the full pipeline: build the
//! environment, run a supervised session, evaluate the trees, tear down.
//! Everything that goes wrong inside that pipeline ends up as a FAIL
//! verdict; only resolving the subject can fail the run as a whole.

use std::path::PathBuf;
use std::sync::Arc;

use futures_util::stream::{self, StreamExt};
use tokio::sync::watch;

use crate::common::config::Config;
use crate::common::{paths, Error, Result};
use crate::evaluate::{evaluate, FailCause, Verdict};
use crate::scenario::{Environment, Scenario};
use crate::session::{
    self, LaunchSpec, Presenter, SessionContext, SessionEnd, SessionSettings, TestMetrics,
};

/// Result of one scenario
#[derive(Debug, Clone)]
pub struct ScenarioOutcome {
    pub index: usize,
    pub name: String,
    pub verdict: Verdict,
    pub metrics: TestMetrics,
    /// `None` when the session never started
    pub end: Option<SessionEnd>,
    pub server_tail: Vec<String>,
    pub client_tail: Vec<String>,
}

impl ScenarioOutcome {
    fn failed(index: usize, scenario: &Scenario, cause: FailCause) -> Self {
        Self {
            index,
            name: scenario.name.clone(),
            verdict: Verdict::Fail(cause),
            metrics: TestMetrics::default(),
            end: None,
            server_tail: Vec::new(),
            client_tail: Vec::new(),
        }
    }

    pub fn passed(&self) -> bool {
        self.verdict.passed()
    }
}

/// Runs scenarios against one resolved subject
pub struct Runner {
    config: Arc<Config>,
    launch: Arc<LaunchSpec>,
    settings: SessionSettings,
    work_root: PathBuf,
    cancel: watch::Receiver<bool>,
}

impl Runner {
    /// Resolve the subject (and gdbserver in debug mode) up front
    pub fn new(config: Config, cancel: watch::Receiver<bool>) -> Result<Self> {
        let binary = config.resolve_binary()?;
        let gdbserver = if config.debug.enabled {
            Some(config.resolve_gdbserver()?)
        } else {
            None
        };

        let work_root = match &config.session.work_dir {
            Some(dir) => std::path::absolute(dir)?,
            None => paths::default_work_dir(),
        };

        let launch = LaunchSpec {
            binary,
            host: config.subject.host.clone(),
            retries: config.subject.retries,
            env: config.subject.env.clone(),
            gdbserver,
            reply: config
                .responder
                .enabled
                .then(|| config.responder.reply.clone()),
        };

        tracing::debug!(
            binary = %launch.binary.display(),
            work_root = %work_root.display(),
            "Runner ready"
        );

        Ok(Self {
            settings: SessionSettings::from_config(&config),
            config: Arc::new(config),
            launch: Arc::new(launch),
            work_root,
            cancel,
        })
    }

    /// Run scenarios in catalog order, up to `session.parallel` at a time
    ///
    /// `make_presenter` is called once per scenario. Outcomes come back in
    /// the order the scenarios were given.
    pub async fn run_all<F>(&self, scenarios: &[Scenario], make_presenter: F) -> Vec<ScenarioOutcome>
    where
        F: Fn(usize, &Scenario) -> Box<dyn Presenter>,
    {
        let parallel = self.config.session.parallel.max(1);

        let outcomes = stream::iter(scenarios.iter().enumerate())
            .map(|(index, scenario)| {
                let presenter = make_presenter(index, scenario);
                async move {
                    let mut presenter = presenter;
                    self.run_one(index, scenario, presenter.as_mut()).await
                }
            })
            .buffered(parallel)
            .collect::<Vec<_>>()
            .await;

        if let Err(e) = std::fs::remove_dir(&self.work_root) {
            tracing::trace!("Work root left in place: {}", e);
        }
        outcomes
    }

    /// Build, run, evaluate and tear down one scenario
    pub async fn run_one(
        &self,
        index: usize,
        scenario: &Scenario,
        presenter: &mut dyn Presenter,
    ) -> ScenarioOutcome {
        let outcome = if *self.cancel.borrow() {
            ScenarioOutcome::failed(index, scenario, FailCause::Cancelled)
        } else {
            let env = Environment::new(
                self.work_root
                    .join(format!("{:02}-{}", index, scenario.name)),
            );
            let outcome = self.run_in(&env, index, scenario, presenter).await;
            if let Err(e) = blocking(move || env.teardown()).await {
                tracing::warn!(scenario = %scenario.name, "Teardown failed: {}", e);
            }
            outcome
        };

        tracing::info!(scenario = %scenario.name, verdict = %outcome.verdict, "Scenario finished");
        presenter.verdict(&scenario.name, &outcome.verdict);
        outcome
    }

    async fn run_in(
        &self,
        env: &Environment,
        index: usize,
        scenario: &Scenario,
        presenter: &mut dyn Presenter,
    ) -> ScenarioOutcome {
        let build = {
            let (env, scenario) = (env.clone(), scenario.clone());
            blocking(move || env.build(&scenario)).await
        };
        let setup = match build {
            Ok(setup) => setup,
            Err(e) => return self.fail_with(index, scenario, &e),
        };

        let port = match self.allocate_port(index) {
            Ok(port) => port,
            Err(e) => return self.fail_with(index, scenario, &e),
        };

        let ctx = SessionContext {
            index,
            scenario: scenario.name.clone(),
            server_dir: env.server_dir().to_path_buf(),
            client_dir: env.client_dir().to_path_buf(),
            port,
            debug_ports: self.debug_ports(index),
            launch: Arc::clone(&self.launch),
            settings: self.settings.clone(),
            cancel: self.cancel.clone(),
        };

        let report = match session::run(&ctx, presenter).await {
            Ok(report) => report,
            Err(e) => return self.fail_with(index, scenario, &e),
        };

        let verdict = if report.end == SessionEnd::Cancelled {
            Verdict::Fail(FailCause::Cancelled)
        } else {
            let (env, scenario, metrics) = (env.clone(), scenario.clone(), report.metrics.clone());
            let judged = blocking(move || {
                Ok(evaluate(
                    &scenario,
                    env.server_dir(),
                    env.client_dir(),
                    &metrics,
                    setup.seeded_files,
                ))
            })
            .await;
            judged.unwrap_or_else(|e| Verdict::Fail(FailCause::Evaluation(e.to_string())))
        };

        ScenarioOutcome {
            index,
            name: scenario.name.clone(),
            verdict,
            metrics: report.metrics,
            end: Some(report.end),
            server_tail: report.server_tail,
            client_tail: report.client_tail,
        }
    }

    fn fail_with(&self, index: usize, scenario: &Scenario, e: &Error) -> ScenarioOutcome {
        tracing::warn!(scenario = %scenario.name, code = e.code(), "{}", e);
        ScenarioOutcome::failed(index, scenario, FailCause::from(e))
    }

    /// Port for session `index`
    ///
    /// A base port of 0 asks the OS for a free one.
    fn allocate_port(&self, index: usize) -> Result<u16> {
        let base = self.config.session.base_port;
        if base == 0 {
            let listener =
                std::net::TcpListener::bind(("127.0.0.1", 0)).map_err(Error::PortUnavailable)?;
            let port = listener.local_addr().map_err(Error::PortUnavailable)?.port();
            return Ok(port);
        }

        u16::try_from(base as usize + index).map_err(|_| {
            Error::PortUnavailable(std::io::Error::other(format!(
                "session {} overflows the port range from {}",
                index, base
            )))
        })
    }

    /// gdbserver ports for session `index` in debug mode
    fn debug_ports(&self, index: usize) -> Option<(u16, u16)> {
        if !self.config.debug.enabled {
            return None;
        }
        let server = self.config.debug.base_port as usize + 2 * index;
        let server = u16::try_from(server).ok()?;
        Some((server, server.checked_add(1)?))
    }
}

/// Run filesystem work on the blocking pool
///
/// Sessions share one task under `buffered`, so blocking there would stall
/// every other session's control loop.
async fn blocking<T, F>(work: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| Error::Io(std::io::Error::other(e)))?
}
