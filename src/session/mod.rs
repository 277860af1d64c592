//! Session supervision
//!
//! A session launches one server/client pair against a prepared
//! environment, watches their output and resources until both exit, the
//! session goes quiet, or the run is cancelled, then tears everything down.
//!
//! All mutable session state lives on the control loop. Reader tasks only
//! hand lines over a bounded channel, and presenters only see a borrowed
//! [`SessionView`].

mod buffer;
mod classify;
mod metrics;
mod process;
mod stream;
mod view;

pub use buffer::LineBuffer;
pub use classify::{classify, is_prompt, LineClass};
pub use metrics::TestMetrics;
pub use process::{subject_args, LaunchSpec, ManagedProcess, ProcessPair, ProcessStatus};
pub use stream::{spawn_reader, LineRecord, Responder};
pub use view::{NullPresenter, Presenter, ProcessView, SessionView};

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::common::config::Config;
use crate::common::Result;
use crate::telemetry::{self, DebuggerState, Sampler};

/// Which side of the pair a process plays
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProcessRole {
    Server,
    Client,
}

impl ProcessRole {
    pub const ALL: [ProcessRole; 2] = [ProcessRole::Server, ProcessRole::Client];

    /// Stable array index for per-role state
    pub fn index(self) -> usize {
        match self {
            Self::Server => 0,
            Self::Client => 1,
        }
    }
}

impl fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server => write!(f, "server"),
            Self::Client => write!(f, "client"),
        }
    }
}

/// Timing and sizing knobs for a session
#[derive(Debug, Clone)]
pub struct SessionSettings {
    pub poll_interval: Duration,
    pub telemetry_interval: Duration,
    /// `None` never times out
    pub inactivity: Option<Duration>,
    pub terminate_grace: Duration,
    pub reader_join: Duration,
    pub client_start_delay: Duration,
    pub line_buffer_cap: usize,
    pub queue_capacity: usize,
}

impl SessionSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            poll_interval: config.session.poll_interval(),
            telemetry_interval: config.session.telemetry_interval(),
            inactivity: config.effective_inactivity(),
            terminate_grace: config.timeouts.terminate_grace(),
            reader_join: config.timeouts.reader_join(),
            client_start_delay: config.timeouts.client_start_delay(),
            line_buffer_cap: config.session.line_buffer_cap,
            queue_capacity: config.session.queue_capacity.max(1),
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Everything one session needs, owned by that session
pub struct SessionContext {
    pub index: usize,
    pub scenario: String,
    pub server_dir: PathBuf,
    pub client_dir: PathBuf,
    pub port: u16,
    /// gdbserver ports for (server, client) in debug mode
    pub debug_ports: Option<(u16, u16)>,
    pub launch: Arc<LaunchSpec>,
    pub settings: SessionSettings,
    pub cancel: watch::Receiver<bool>,
}

/// Why the control loop stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// Both subjects exited
    Completed,
    /// No output for longer than the inactivity timeout
    InactivityTimeout,
    /// The run was cancelled
    Cancelled,
}

impl fmt::Display for SessionEnd {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Completed => write!(f, "completed"),
            Self::InactivityTimeout => write!(f, "inactivity timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// What a finished session leaves behind
#[derive(Debug, Clone)]
pub struct SessionReport {
    pub end: SessionEnd,
    pub metrics: TestMetrics,
    pub server_tail: Vec<String>,
    pub client_tail: Vec<String>,
    pub server_exit: Option<i32>,
    pub client_exit: Option<i32>,
}

/// Lines kept in a report tail
const REPORT_TAIL: usize = 20;

struct SessionState {
    buffers: [LineBuffer; 2],
    metrics: TestMetrics,
    sampler: Sampler,
    debugger: [Option<DebuggerState>; 2],
}

impl SessionState {
    fn new(settings: &SessionSettings) -> Self {
        Self {
            buffers: [
                LineBuffer::new(settings.line_buffer_cap),
                LineBuffer::new(settings.line_buffer_cap),
            ],
            metrics: TestMetrics::default(),
            sampler: Sampler::new(),
            debugger: [None, None],
        }
    }

    /// Move every queued line into the buffers without waiting
    fn drain(&mut self, rx: &mut mpsc::Receiver<LineRecord>) -> usize {
        let mut count = 0;
        while let Ok(record) = rx.try_recv() {
            if self.metrics.record_line(&record) {
                tracing::warn!(role = %record.role, "Error line: {}", record.text);
            }
            self.buffers[record.role.index()].push(record);
            count += 1;
        }
        count
    }

    fn sample(&mut self, pair: &ProcessPair, debug_ports: Option<(u16, u16)>) {
        let pids = ProcessRole::ALL.map(|role| pair.live_pid(role));
        self.sampler.tick(pids, &mut self.metrics);

        if let Some((server, client)) = debug_ports {
            self.debugger = [server, client].map(telemetry::debugger_state);
        }
    }

    fn view<'a>(&'a self, ctx: &'a SessionContext, pair: Option<&ProcessPair>) -> SessionView<'a> {
        let process = |role: ProcessRole| {
            let managed = pair.map(|p| p.get(role));
            ProcessView {
                role,
                status: managed.map(|m| m.status()),
                pid: managed.and_then(|m| m.pid()),
                port: ctx.port,
                debug_port: ctx.debug_ports.map(|(s, c)| match role {
                    ProcessRole::Server => s,
                    ProcessRole::Client => c,
                }),
                debugger: self.debugger[role.index()],
                lines: &self.buffers[role.index()],
                telemetry: self.sampler.latest(role),
            }
        };

        SessionView {
            index: ctx.index,
            scenario: &ctx.scenario,
            server: process(ProcessRole::Server),
            client: process(ProcessRole::Client),
            metrics: &self.metrics,
        }
    }
}

/// Run one session to completion
///
/// Launch failures and cancellation before launch are returned as errors.
/// Once both subjects are up the session always tears down cleanly and
/// returns a report, whatever stopped it.
pub async fn run(ctx: &SessionContext, presenter: &mut dyn Presenter) -> Result<SessionReport> {
    let settings = &ctx.settings;
    let mut state = SessionState::new(settings);
    let mut cancel = ctx.cancel.clone();

    let (server_tx, mut server_rx) = mpsc::channel(settings.queue_capacity);
    let (client_tx, mut client_rx) = mpsc::channel(settings.queue_capacity);

    tracing::info!(
        session = ctx.index,
        scenario = %ctx.scenario,
        port = ctx.port,
        "Starting session"
    );
    state.metrics.start();

    let (mut pair, readers) = ProcessPair::start(
        &ctx.launch,
        (&ctx.server_dir, &ctx.client_dir),
        ctx.port,
        ctx.debug_ports,
        settings.client_start_delay,
        settings.terminate_grace,
        (server_tx, client_tx),
        &mut cancel,
    )
    .await?;

    let mut poll = tokio::time::interval(settings.poll_interval);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut sample_tick = tokio::time::interval(settings.telemetry_interval);
    sample_tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut last_activity = Instant::now();
    let mut cancel_open = true;

    let end = loop {
        if *cancel.borrow() {
            break SessionEnd::Cancelled;
        }

        tokio::select! {
            _ = poll.tick() => {}
            _ = sample_tick.tick() => state.sample(&pair, ctx.debug_ports),
            changed = cancel.changed(), if cancel_open => {
                if changed.is_err() {
                    // Sender gone; nobody can cancel any more
                    cancel_open = false;
                }
            }
        }

        let received = state.drain(&mut server_rx) + state.drain(&mut client_rx);
        if received > 0 {
            last_activity = Instant::now();
        }

        pair.poll();
        presenter.refresh(&state.view(ctx, Some(&pair)));

        if pair.all_exited() {
            break SessionEnd::Completed;
        }
        if let Some(limit) = settings.inactivity {
            if last_activity.elapsed() >= limit {
                tracing::info!(
                    session = ctx.index,
                    "No output for {:?}, stopping subjects",
                    limit
                );
                break SessionEnd::InactivityTimeout;
            }
        }
    };

    pair.shutdown(settings.terminate_grace).await;
    join_readers(
        &mut state,
        readers,
        (&mut server_rx, &mut client_rx),
        settings.reader_join,
    )
    .await;

    state.sampler.finalize(&mut state.metrics);
    state.metrics.finish();
    presenter.finish(&state.view(ctx, Some(&pair)));

    tracing::info!(
        session = ctx.index,
        scenario = %ctx.scenario,
        %end,
        errors = state.metrics.error_lines(),
        "Session finished"
    );

    Ok(SessionReport {
        end,
        server_tail: state.buffers[0].tail(REPORT_TAIL),
        client_tail: state.buffers[1].tail(REPORT_TAIL),
        server_exit: pair.get(ProcessRole::Server).exit_code(),
        client_exit: pair.get(ProcessRole::Client).exit_code(),
        metrics: state.metrics,
    })
}

/// Wait for reader tasks while still draining their channels
///
/// A reader blocked on a full channel only finishes if someone keeps
/// receiving. Readers that outlive `limit` are aborted, which closes their
/// pipes.
async fn join_readers(
    state: &mut SessionState,
    readers: Vec<JoinHandle<()>>,
    rxs: (&mut mpsc::Receiver<LineRecord>, &mut mpsc::Receiver<LineRecord>),
    limit: Duration,
) {
    let (server_rx, client_rx) = rxs;
    let deadline = Instant::now() + limit;

    loop {
        state.drain(server_rx);
        state.drain(client_rx);

        if readers.iter().all(|h| h.is_finished()) {
            break;
        }
        if Instant::now() >= deadline {
            let stuck = readers.iter().filter(|h| !h.is_finished()).count();
            tracing::warn!("Aborting {} output reader(s) after {:?}", stuck, limit);
            for handle in readers.iter().filter(|h| !h.is_finished()) {
                handle.abort();
            }
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    for handle in readers {
        if let Err(e) = handle.await {
            if !e.is_cancelled() {
                tracing::warn!("Output reader failed: {}", e);
            }
        }
    }

    state.drain(server_rx);
    state.drain(client_rx);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_display_and_index() {
        assert_eq!(ProcessRole::Server.to_string(), "server");
        assert_eq!(ProcessRole::Client.to_string(), "client");
        assert_eq!(ProcessRole::Server.index(), 0);
        assert_eq!(ProcessRole::Client.index(), 1);
    }

    #[test]
    fn test_settings_follow_debug_mode() {
        let mut config = Config::default();
        assert_eq!(
            SessionSettings::from_config(&config).inactivity,
            Some(Duration::from_secs(3))
        );

        config.debug.enabled = true;
        assert_eq!(SessionSettings::from_config(&config).inactivity, None);
    }

    #[test]
    fn test_drain_routes_lines_and_counts_errors() {
        let settings = SessionSettings::default();
        let mut state = SessionState::new(&settings);
        let (tx, mut rx) = mpsc::channel(8);

        tx.try_send(LineRecord::new(ProcessRole::Server, "listening"))
            .unwrap();
        tx.try_send(LineRecord::new(ProcessRole::Client, "connect failed"))
            .unwrap();

        assert_eq!(state.drain(&mut rx), 2);
        assert_eq!(state.drain(&mut rx), 0);
        assert_eq!(state.buffers[0].tail(5), vec!["listening"]);
        assert_eq!(state.buffers[1].tail(5), vec!["connect failed"]);
        assert_eq!(state.metrics.client_errors, 1);
        assert_eq!(state.metrics.server_errors, 0);
    }

    #[cfg(unix)]
    mod supervised {
        use super::*;
        use std::collections::HashMap;
        use std::os::unix::fs::PermissionsExt;
        use std::path::Path;

        fn script(dir: &Path, body: &str) -> PathBuf {
            let path = dir.join("subject.sh");
            std::fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
            path
        }

        fn context(
            dir: &Path,
            binary: PathBuf,
            settings: SessionSettings,
        ) -> (SessionContext, watch::Sender<bool>) {
            let server_dir = dir.join("server");
            let client_dir = dir.join("client");
            std::fs::create_dir_all(&server_dir).unwrap();
            std::fs::create_dir_all(&client_dir).unwrap();
            let (cancel_tx, cancel_rx) = watch::channel(false);

            let ctx = SessionContext {
                index: 0,
                scenario: "scripted".to_string(),
                server_dir,
                client_dir,
                port: 5555,
                debug_ports: None,
                launch: Arc::new(LaunchSpec {
                    binary,
                    host: "127.0.0.1".to_string(),
                    retries: None,
                    env: HashMap::new(),
                    gdbserver: None,
                    reply: Some("y".to_string()),
                }),
                settings,
                cancel: cancel_rx,
            };
            (ctx, cancel_tx)
        }

        fn fast() -> SessionSettings {
            SessionSettings {
                poll_interval: Duration::from_millis(20),
                telemetry_interval: Duration::from_millis(50),
                inactivity: Some(Duration::from_millis(500)),
                terminate_grace: Duration::from_millis(500),
                reader_join: Duration::from_millis(500),
                client_start_delay: Duration::from_millis(10),
                line_buffer_cap: 200,
                queue_capacity: 16,
            }
        }

        #[tokio::test]
        async fn test_session_completes_when_both_exit() {
            let dir = tempfile::tempdir().unwrap();
            let binary = script(dir.path(), "echo \"sync from $1\"");
            let (ctx, _cancel) = context(dir.path(), binary, fast());

            let report = run(&ctx, &mut NullPresenter).await.unwrap();
            assert_eq!(report.end, SessionEnd::Completed);
            assert_eq!(report.server_tail, vec!["sync from -d"]);
            assert_eq!(report.client_tail, vec!["sync from -s"]);
            assert_eq!(report.metrics.sync_operations, 2);
            assert_eq!(report.server_exit, Some(0));
        }

        #[tokio::test]
        async fn test_prompt_is_answered() {
            let dir = tempfile::tempdir().unwrap();
            let binary = script(
                dir.path(),
                "printf 'Proceed? (y/n) '\nread answer\necho \"got $answer\"",
            );
            let (ctx, _cancel) = context(dir.path(), binary, fast());

            let report = run(&ctx, &mut NullPresenter).await.unwrap();
            assert_eq!(report.end, SessionEnd::Completed);
            assert_eq!(report.client_tail, vec!["Proceed? (y/n) ", "got y"]);
        }

        #[tokio::test]
        async fn test_silent_subjects_hit_inactivity_timeout() {
            let dir = tempfile::tempdir().unwrap();
            let binary = script(dir.path(), "exec sleep 30");
            let (ctx, _cancel) = context(dir.path(), binary, fast());

            let started = Instant::now();
            let report = run(&ctx, &mut NullPresenter).await.unwrap();
            assert_eq!(report.end, SessionEnd::InactivityTimeout);
            assert!(started.elapsed() < Duration::from_secs(10));
        }

        #[tokio::test]
        async fn test_cancel_stops_session() {
            let dir = tempfile::tempdir().unwrap();
            let binary = script(dir.path(), "exec sleep 30");
            let mut settings = fast();
            settings.inactivity = None;
            let (ctx, cancel) = context(dir.path(), binary, settings);

            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(200)).await;
                let _ = cancel.send(true);
            });

            let report = run(&ctx, &mut NullPresenter).await.unwrap();
            assert_eq!(report.end, SessionEnd::Cancelled);
        }

        #[cfg(target_os = "linux")]
        #[tokio::test]
        async fn test_debug_ports_report_debugger_state() {
            struct Debuggers(Vec<Option<DebuggerState>>);

            impl Presenter for Debuggers {
                fn refresh(&mut self, view: &SessionView<'_>) {
                    self.0.push(view.server.debugger);
                }
            }

            let waiting = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let idle = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            let idle_port = idle.local_addr().unwrap().port();
            drop(idle);

            let dir = tempfile::tempdir().unwrap();
            let binary = script(dir.path(), "sleep 0.3");
            let (mut ctx, _cancel) = context(dir.path(), binary, fast());
            ctx.debug_ports = Some((waiting.local_addr().unwrap().port(), idle_port));

            let mut presenter = Debuggers(Vec::new());
            run(&ctx, &mut presenter).await.unwrap();
            assert!(
                presenter.0.contains(&Some(DebuggerState::Waiting)),
                "{:?}",
                presenter.0
            );
        }

        #[tokio::test]
        async fn test_launch_failure_is_error() {
            let dir = tempfile::tempdir().unwrap();
            let (ctx, _cancel) = context(dir.path(), dir.path().join("missing"), fast());
            let result = run(&ctx, &mut NullPresenter).await;
            assert!(matches!(result, Err(crate::Error::Launch { .. })));
        }
    }
}
