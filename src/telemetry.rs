//! Per-process resource sampling
//!
//! Samples CPU, resident memory, disk I/O and open sockets for each subject
//! on a fixed cadence. A failed query never interrupts a session; it yields
//! a sentinel sample instead.

use std::time::Instant;

use sysinfo::{Pid, ProcessRefreshKind, ProcessesToUpdate, System};

use crate::common::{Error, Result};
use crate::session::{ProcessRole, TestMetrics};

/// One resource reading for one subject
#[derive(Debug, Clone, PartialEq)]
pub struct TelemetrySample {
    pub role: ProcessRole,
    pub at: Instant,
    pub cpu_percent: f32,
    pub rss_kb: u64,
    pub read_bytes: u64,
    pub written_bytes: u64,
    pub connections: usize,
}

impl TelemetrySample {
    /// Reading used when the process is gone or could not be queried
    pub fn sentinel(role: ProcessRole) -> Self {
        Self {
            role,
            at: Instant::now(),
            cpu_percent: 0.0,
            rss_kb: 0,
            read_bytes: 0,
            written_bytes: 0,
            connections: 0,
        }
    }

    pub fn is_sentinel(&self) -> bool {
        self.cpu_percent == 0.0
            && self.rss_kb == 0
            && self.read_bytes == 0
            && self.written_bytes == 0
            && self.connections == 0
    }
}

/// Resource sampler for one session
pub struct Sampler {
    system: System,
    latest: [TelemetrySample; 2],
    history: [Vec<TelemetrySample>; 2],
    /// Set once a role has shown non-zero CPU
    warmed: [bool; 2],
}

impl Default for Sampler {
    fn default() -> Self {
        Self::new()
    }
}

impl Sampler {
    pub fn new() -> Self {
        Self {
            system: System::new(),
            latest: [
                TelemetrySample::sentinel(ProcessRole::Server),
                TelemetrySample::sentinel(ProcessRole::Client),
            ],
            history: [Vec::new(), Vec::new()],
            warmed: [false, false],
        }
    }

    /// Refresh every process in one pass
    ///
    /// Per-process CPU is only computed when the whole process table is
    /// refreshed, and needs two refreshes some time apart before it reads
    /// anything but zero.
    pub fn refresh(&mut self) {
        self.system.refresh_processes_specifics(
            ProcessesToUpdate::All,
            ProcessRefreshKind::new()
                .with_cpu()
                .with_memory()
                .with_disk_usage(),
        );
    }

    /// Read one process from the last refresh, falling back to the sentinel
    pub fn sample(&self, role: ProcessRole, pid: Option<u32>) -> TelemetrySample {
        let Some(pid) = pid else {
            return TelemetrySample::sentinel(role);
        };
        match self.query(role, pid) {
            Ok(sample) => sample,
            Err(e) => {
                tracing::trace!(%role, "{}", e);
                TelemetrySample::sentinel(role)
            }
        }
    }

    fn query(&self, role: ProcessRole, pid: u32) -> Result<TelemetrySample> {
        let process = self
            .system
            .process(Pid::from_u32(pid))
            .ok_or_else(|| Error::Telemetry {
                pid,
                reason: "process not found".to_string(),
            })?;
        let disk = process.disk_usage();

        Ok(TelemetrySample {
            role,
            at: Instant::now(),
            cpu_percent: process.cpu_usage(),
            rss_kb: process.memory() / 1024,
            read_bytes: disk.total_read_bytes,
            written_bytes: disk.total_written_bytes,
            connections: count_sockets(pid),
        })
    }

    /// Refresh once and fold a reading for each role into the session
    ///
    /// `pids` is indexed by [`ProcessRole::index`].
    pub fn tick(&mut self, pids: [Option<u32>; 2], metrics: &mut TestMetrics) {
        self.refresh();
        for role in ProcessRole::ALL {
            let sample = self.sample(role, pids[role.index()]);
            self.record(sample, metrics);
        }
    }

    /// Keep a reading
    ///
    /// The first CPU reading of a fresh process is always zero, so history
    /// starts with the first sample that shows activity.
    pub fn record(&mut self, sample: TelemetrySample, metrics: &mut TestMetrics) {
        let idx = sample.role.index();

        metrics.max_connections = metrics.max_connections.max(sample.connections);

        if sample.cpu_percent > 0.0 {
            self.warmed[idx] = true;
        }
        if self.warmed[idx] {
            self.history[idx].push(sample.clone());
        }
        self.latest[idx] = sample;
    }

    /// Most recent reading for a role
    pub fn latest(&self, role: ProcessRole) -> &TelemetrySample {
        &self.latest[role.index()]
    }

    /// Accumulated readings for a role
    pub fn history(&self, role: ProcessRole) -> &[TelemetrySample] {
        &self.history[role.index()]
    }

    /// Write resource summaries into the session metrics
    pub fn finalize(&self, metrics: &mut TestMetrics) {
        let (server_mem, server_cpu) = summarize(self.history(ProcessRole::Server));
        let (client_mem, client_cpu) = summarize(self.history(ProcessRole::Client));
        metrics.server_max_memory_kb = server_mem;
        metrics.server_avg_cpu = server_cpu;
        metrics.client_max_memory_kb = client_mem;
        metrics.client_avg_cpu = client_cpu;
    }
}

/// Peak RSS and mean CPU over a history
fn summarize(history: &[TelemetrySample]) -> (u64, f32) {
    if history.is_empty() {
        return (0, 0.0);
    }
    let max_mem = history.iter().map(|s| s.rss_kb).max().unwrap_or(0);
    let avg_cpu = history.iter().map(|s| s.cpu_percent).sum::<f32>() / history.len() as f32;
    (max_mem, avg_cpu)
}

/// Where a gdbserver wrapper stands with its debugger
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DebuggerState {
    /// Listening on its port, nobody attached yet
    Waiting,
    /// A debugger is connected
    Attached,
    /// Nothing on the port
    Idle,
}

impl std::fmt::Display for DebuggerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Waiting => write!(f, "waiting for debugger"),
            Self::Attached => write!(f, "debugger attached"),
            Self::Idle => write!(f, "not listening"),
        }
    }
}

/// TCP states in `/proc/net/tcp`
const TCP_ESTABLISHED: &str = "01";
const TCP_LISTEN: &str = "0A";

/// State of the gdbserver port, or `None` where it cannot be told
#[cfg(target_os = "linux")]
pub fn debugger_state(port: u16) -> Option<DebuggerState> {
    let mut tables = ["/proc/net/tcp", "/proc/net/tcp6"]
        .iter()
        .filter_map(|path| std::fs::read_to_string(path).ok())
        .peekable();
    tables.peek()?;

    let states: Vec<DebuggerState> = tables.map(|t| port_state(&t, port)).collect();
    if states.contains(&DebuggerState::Attached) {
        Some(DebuggerState::Attached)
    } else if states.contains(&DebuggerState::Waiting) {
        Some(DebuggerState::Waiting)
    } else {
        Some(DebuggerState::Idle)
    }
}

#[cfg(not(target_os = "linux"))]
pub fn debugger_state(_port: u16) -> Option<DebuggerState> {
    None
}

/// Classify a local port from one `/proc/net/tcp`-format table
fn port_state(table: &str, port: u16) -> DebuggerState {
    let mut state = DebuggerState::Idle;
    for line in table.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let (Some(local), Some(_remote), Some(st)) = (fields.nth(1), fields.next(), fields.next())
        else {
            continue;
        };
        let local_port = local
            .rsplit(':')
            .next()
            .and_then(|hex| u16::from_str_radix(hex, 16).ok());
        if local_port != Some(port) {
            continue;
        }
        match st {
            TCP_ESTABLISHED => return DebuggerState::Attached,
            TCP_LISTEN => state = DebuggerState::Waiting,
            _ => {}
        }
    }
    state
}

/// Open sockets held by a process
#[cfg(target_os = "linux")]
fn count_sockets(pid: u32) -> usize {
    let Ok(entries) = std::fs::read_dir(format!("/proc/{}/fd", pid)) else {
        return 0;
    };
    entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| std::fs::read_link(entry.path()).ok())
        .filter(|target| target.to_string_lossy().starts_with("socket:"))
        .count()
}

#[cfg(not(target_os = "linux"))]
fn count_sockets(_pid: u32) -> usize {
    0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reading(role: ProcessRole, cpu: f32, rss_kb: u64, connections: usize) -> TelemetrySample {
        TelemetrySample {
            cpu_percent: cpu,
            rss_kb,
            connections,
            ..TelemetrySample::sentinel(role)
        }
    }

    #[test]
    fn test_missing_pid_yields_sentinel() {
        let sampler = Sampler::new();
        assert!(sampler.sample(ProcessRole::Server, None).is_sentinel());
    }

    #[cfg(unix)]
    #[test]
    fn test_dead_pid_yields_sentinel() {
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let mut sampler = Sampler::new();
        sampler.refresh();
        let sample = sampler.sample(ProcessRole::Client, Some(pid));
        assert!(sample.is_sentinel());
        assert_eq!(sample.role, ProcessRole::Client);
    }

    #[test]
    fn test_live_process_reports_memory() {
        let mut sampler = Sampler::new();
        sampler.refresh();
        let sample = sampler.sample(ProcessRole::Server, Some(std::process::id()));
        assert!(sample.rss_kb > 0);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_busy_process_fills_history() {
        let mut child = std::process::Command::new("sh")
            .args(["-c", "while :; do :; done"])
            .spawn()
            .unwrap();

        let mut sampler = Sampler::new();
        let mut metrics = TestMetrics::default();
        let mut readings = Vec::new();
        for _ in 0..6 {
            sampler.tick([Some(child.id()), None], &mut metrics);
            readings.push(sampler.latest(ProcessRole::Server).cpu_percent);
            std::thread::sleep(std::time::Duration::from_millis(500));
        }
        child.kill().unwrap();
        child.wait().unwrap();

        assert!(readings.iter().any(|&cpu| cpu > 0.0), "cpu readings: {:?}", readings);
        assert!(!sampler.history(ProcessRole::Server).is_empty());
        assert!(sampler.history(ProcessRole::Client).is_empty());

        sampler.finalize(&mut metrics);
        assert!(metrics.server_avg_cpu > 0.0);
        assert!(metrics.server_max_memory_kb > 0);
        assert_eq!(metrics.client_max_memory_kb, 0);
    }

    const TCP_TABLE: &str = "\
  sl  local_address rem_address   st tx_queue rx_queue tr tm->when retrnsmt   uid  timeout inode
   0: 00000000:3039 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 1 1
   1: 0100007F:303A 00000000:0000 0A 00000000:00000000 00:00000000 00000000  1000        0 2 1
   2: 0100007F:303A 0100007F:A1B2 01 00000000:00000000 00:00000000 00000000  1000        0 3 1
";

    #[test]
    fn test_port_state_from_tcp_table() {
        assert_eq!(port_state(TCP_TABLE, 12345), DebuggerState::Waiting);
        assert_eq!(port_state(TCP_TABLE, 12346), DebuggerState::Attached);
        assert_eq!(port_state(TCP_TABLE, 5555), DebuggerState::Idle);
        assert_eq!(port_state("", 12345), DebuggerState::Idle);
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_debugger_state_follows_live_socket() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        assert_eq!(debugger_state(port), Some(DebuggerState::Waiting));

        let _debugger = std::net::TcpStream::connect(("127.0.0.1", port)).unwrap();
        let _session = listener.accept().unwrap();
        assert_eq!(debugger_state(port), Some(DebuggerState::Attached));
    }

    #[test]
    fn test_history_starts_after_first_cpu_activity() {
        let mut sampler = Sampler::new();
        let mut metrics = TestMetrics::default();

        sampler.record(reading(ProcessRole::Server, 0.0, 900, 1), &mut metrics);
        sampler.record(reading(ProcessRole::Server, 0.0, 900, 3), &mut metrics);
        assert!(sampler.history(ProcessRole::Server).is_empty());
        assert_eq!(metrics.max_connections, 3);

        sampler.record(reading(ProcessRole::Server, 10.0, 100, 2), &mut metrics);
        sampler.record(reading(ProcessRole::Server, 0.0, 300, 0), &mut metrics);
        sampler.record(reading(ProcessRole::Server, 20.0, 200, 0), &mut metrics);
        assert_eq!(sampler.history(ProcessRole::Server).len(), 3);
        assert_eq!(sampler.latest(ProcessRole::Server).rss_kb, 200);

        sampler.finalize(&mut metrics);
        assert_eq!(metrics.server_max_memory_kb, 300);
        assert!((metrics.server_avg_cpu - 10.0).abs() < f32::EPSILON);
        assert_eq!(metrics.client_max_memory_kb, 0);
        assert_eq!(metrics.client_avg_cpu, 0.0);
        assert_eq!(metrics.max_connections, 3);
    }
}
