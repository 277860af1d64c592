//! Subject process lifecycle
//!
//! Launches the server and client subjects for one session and tears them
//! down: SIGTERM first, SIGKILL once the grace period runs out.

use std::collections::HashMap;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::Duration;

use tokio::process::{Child, Command};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::common::{Error, Result};

use super::stream::{spawn_reader, LineRecord, Responder};
use super::ProcessRole;

/// Lifecycle state of a subject
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Spawned, not yet observed alive by a poll
    Starting,
    /// Observed alive
    Running,
    /// Exited on its own
    Exited,
    /// Stopped by the supervisor
    Killed,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Exited => write!(f, "exited"),
            Self::Killed => write!(f, "killed"),
        }
    }
}

/// How to invoke the subject, shared by every session of a run
#[derive(Debug, Clone)]
pub struct LaunchSpec {
    /// Resolved subject binary
    pub binary: PathBuf,
    /// Host the client connects to
    pub host: String,
    /// `-r <retries>` when set
    pub retries: Option<u32>,
    /// Extra environment
    pub env: HashMap<String, String>,
    /// Wrap both subjects in gdbserver
    pub gdbserver: Option<PathBuf>,
    /// Prompt reply; `None` leaves stdin closed
    pub reply: Option<String>,
}

/// Subject arguments per the CLI contract
///
/// `<binary> [-d <port> | -s <host:port>] [-r <retries>] <directory>`
pub fn subject_args(
    role: ProcessRole,
    port: u16,
    host: &str,
    retries: Option<u32>,
    dir: &Path,
) -> Vec<OsString> {
    let mut args: Vec<OsString> = match role {
        ProcessRole::Server => vec!["-d".into(), port.to_string().into()],
        ProcessRole::Client => vec!["-s".into(), format!("{}:{}", host, port).into()],
    };
    if let Some(retries) = retries {
        args.push("-r".into());
        args.push(retries.to_string().into());
    }
    args.push(dir.as_os_str().to_os_string());
    args
}

/// One supervised subject
pub struct ManagedProcess {
    role: ProcessRole,
    child: Child,
    pid: Option<u32>,
    status: ProcessStatus,
    exit: Option<ExitStatus>,
}

impl ManagedProcess {
    /// Spawn a subject with its tree as working directory and start its reader
    pub fn launch(
        role: ProcessRole,
        spec: &LaunchSpec,
        dir: &Path,
        port: u16,
        debug_port: Option<u16>,
        tx: mpsc::Sender<LineRecord>,
    ) -> Result<(Self, JoinHandle<()>)> {
        let dir = dir
            .canonicalize()
            .map_err(|e| Error::launch(role, format!("Bad directory {}: {}", dir.display(), e)))?;

        let (program, mut args): (PathBuf, Vec<OsString>) = match (&spec.gdbserver, debug_port) {
            (Some(gdbserver), Some(debug_port)) => (
                gdbserver.clone(),
                vec![
                    format!(":{}", debug_port).into(),
                    spec.binary.clone().into_os_string(),
                ],
            ),
            _ => (spec.binary.clone(), Vec::new()),
        };
        args.extend(subject_args(role, port, &spec.host, spec.retries, &dir));

        let mut cmd = Command::new(&program);
        cmd.args(&args)
            .current_dir(&dir)
            .envs(&spec.env)
            .stdin(if spec.reply.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd.spawn().map_err(|e| {
            Error::launch(role, format!("Failed to start {}: {}", program.display(), e))
        })?;

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::launch(role, "Failed to get stdout"))?;
        let stderr = child
            .stderr
            .take()
            .ok_or_else(|| Error::launch(role, "Failed to get stderr"))?;
        let responder = match (child.stdin.take(), &spec.reply) {
            (Some(stdin), Some(reply)) => Some(Responder::new(stdin, reply)),
            _ => None,
        };

        let pid = child.id();
        tracing::info!(
            %role,
            pid = ?pid,
            port,
            debug_port = ?debug_port,
            "Launched {}",
            program.display()
        );

        let reader = spawn_reader(role, stdout, stderr, responder, tx);

        Ok((
            Self {
                role,
                child,
                pid,
                status: ProcessStatus::Starting,
                exit: None,
            },
            reader,
        ))
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    pub fn status(&self) -> ProcessStatus {
        self.status
    }

    pub fn exit_code(&self) -> Option<i32> {
        self.exit.and_then(|s| s.code())
    }

    pub fn is_alive(&self) -> bool {
        matches!(self.status, ProcessStatus::Starting | ProcessStatus::Running)
    }

    /// Refresh status without blocking
    pub fn poll(&mut self) -> ProcessStatus {
        if !self.is_alive() {
            return self.status;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(role = %self.role, code = ?status.code(), "Subject exited");
                self.exit = Some(status);
                self.status = ProcessStatus::Exited;
            }
            Ok(None) => self.status = ProcessStatus::Running,
            Err(e) => {
                tracing::warn!(role = %self.role, "Failed to poll subject: {}", e);
            }
        }
        self.status
    }

    /// Terminate gracefully, escalating to a kill after `grace`
    pub async fn shutdown(&mut self, grace: Duration) {
        if self.poll() == ProcessStatus::Exited || !self.is_alive() {
            return;
        }

        self.terminate();

        match tokio::time::timeout(grace, self.child.wait()).await {
            Ok(Ok(status)) => {
                tracing::debug!(role = %self.role, "Subject stopped after terminate");
                self.exit = Some(status);
            }
            Ok(Err(e)) => {
                tracing::warn!(role = %self.role, "Failed waiting for subject: {}", e);
                self.force_kill().await;
            }
            Err(_) => {
                tracing::warn!(
                    role = %self.role,
                    "Subject ignored terminate for {:?}, killing",
                    grace
                );
                self.force_kill().await;
            }
        }

        self.status = ProcessStatus::Killed;
    }

    fn terminate(&mut self) {
        #[cfg(unix)]
        {
            if let Some(pid) = self.pid {
                // SAFETY: plain signal delivery to a pid we spawned and have not reaped
                let result = unsafe { libc::kill(pid as libc::pid_t, libc::SIGTERM) };
                if result == 0 {
                    return;
                }
            }
        }

        let _ = self.child.start_kill();
    }

    async fn force_kill(&mut self) {
        if let Err(e) = self.child.kill().await {
            tracing::warn!(role = %self.role, "Failed to kill subject: {}", e);
        }
        self.exit = self.child.try_wait().ok().flatten();
    }
}

/// The server/client pair of one session
pub struct ProcessPair {
    server: ManagedProcess,
    client: ManagedProcess,
}

impl ProcessPair {
    /// Launch the server, wait the start delay, then launch the client
    ///
    /// The delay only makes the common case smoother; subjects must cope
    /// with the client arriving first. On any failure everything already
    /// started is shut down before returning.
    #[allow(clippy::too_many_arguments)]
    pub async fn start(
        spec: &LaunchSpec,
        dirs: (&Path, &Path),
        port: u16,
        debug_ports: Option<(u16, u16)>,
        client_delay: Duration,
        grace: Duration,
        txs: (mpsc::Sender<LineRecord>, mpsc::Sender<LineRecord>),
        cancel: &mut watch::Receiver<bool>,
    ) -> Result<(Self, Vec<JoinHandle<()>>)> {
        let (server_dir, client_dir) = dirs;
        let (server_tx, client_tx) = txs;

        let (mut server, server_reader) = ManagedProcess::launch(
            ProcessRole::Server,
            spec,
            server_dir,
            port,
            debug_ports.map(|(s, _)| s),
            server_tx,
        )?;

        let cancelled = if *cancel.borrow() {
            true
        } else {
            tokio::select! {
                _ = tokio::time::sleep(client_delay) => false,
                changed = cancel.changed() => changed.is_ok() && *cancel.borrow(),
            }
        };
        if cancelled {
            server.shutdown(grace).await;
            server_reader.abort();
            return Err(Error::Cancelled);
        }

        match ManagedProcess::launch(
            ProcessRole::Client,
            spec,
            client_dir,
            port,
            debug_ports.map(|(_, c)| c),
            client_tx,
        ) {
            Ok((client, client_reader)) => Ok((
                Self { server, client },
                vec![server_reader, client_reader],
            )),
            Err(e) => {
                server.shutdown(grace).await;
                server_reader.abort();
                Err(e)
            }
        }
    }

    pub fn get(&self, role: ProcessRole) -> &ManagedProcess {
        match role {
            ProcessRole::Server => &self.server,
            ProcessRole::Client => &self.client,
        }
    }

    /// Poll both subjects
    pub fn poll(&mut self) {
        self.server.poll();
        self.client.poll();
    }

    /// Both subjects have finished, on their own or not
    pub fn all_exited(&self) -> bool {
        !self.server.is_alive() && !self.client.is_alive()
    }

    /// Pid of a role that is still alive
    pub fn live_pid(&self, role: ProcessRole) -> Option<u32> {
        let process = self.get(role);
        if process.is_alive() {
            process.pid()
        } else {
            None
        }
    }

    /// Shut both subjects down concurrently
    pub async fn shutdown(&mut self, grace: Duration) {
        tokio::join!(self.server.shutdown(grace), self.client.shutdown(grace));
    }
}
