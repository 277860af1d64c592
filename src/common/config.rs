//! Configuration file handling

use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::paths::config_path;
use super::{Error, Result};

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Subject binary under test
    #[serde(default)]
    pub subject: SubjectConfig,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Per-session settings
    #[serde(default)]
    pub session: SessionConfig,

    /// Prompt auto-responder
    #[serde(default)]
    pub responder: ResponderConfig,

    /// gdbserver wrapping
    #[serde(default)]
    pub debug: DebugConfig,

    /// Extra YAML scenario catalogs, appended after the built-ins
    #[serde(default)]
    pub catalogs: Vec<PathBuf>,
}

/// How to invoke the sync binary
#[derive(Debug, Deserialize, Clone)]
pub struct SubjectConfig {
    /// Path to the binary, or a name looked up on PATH
    #[serde(default = "default_binary")]
    pub binary: PathBuf,

    /// Host the client connects to
    #[serde(default = "default_host")]
    pub host: String,

    /// Value for `-r <retries>`, omitted when unset
    #[serde(default)]
    pub retries: Option<u32>,

    /// Extra environment for both subjects
    #[serde(default)]
    pub env: HashMap<String, String>,
}

impl Default for SubjectConfig {
    fn default() -> Self {
        Self {
            binary: default_binary(),
            host: default_host(),
            retries: None,
            env: HashMap::new(),
        }
    }
}

fn default_binary() -> PathBuf {
    PathBuf::from("./build/multi_pc_sync")
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

/// Timeout settings
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Kill both subjects after this long without output (0 disables)
    #[serde(default = "default_inactivity")]
    pub inactivity_secs: u64,

    /// Wait between SIGTERM and SIGKILL
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_ms: u64,

    /// Wait for a reader task to finish before aborting it
    #[serde(default = "default_reader_join")]
    pub reader_join_ms: u64,

    /// Delay between starting the server and starting the client
    #[serde(default = "default_client_start_delay")]
    pub client_start_delay_ms: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            inactivity_secs: default_inactivity(),
            terminate_grace_ms: default_terminate_grace(),
            reader_join_ms: default_reader_join(),
            client_start_delay_ms: default_client_start_delay(),
        }
    }
}

fn default_inactivity() -> u64 {
    3
}
fn default_terminate_grace() -> u64 {
    2000
}
fn default_reader_join() -> u64 {
    1000
}
fn default_client_start_delay() -> u64 {
    250
}

impl Timeouts {
    /// Inactivity timeout, `None` when disabled
    pub fn inactivity(&self) -> Option<Duration> {
        (self.inactivity_secs > 0).then(|| Duration::from_secs(self.inactivity_secs))
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }

    pub fn reader_join(&self) -> Duration {
        Duration::from_millis(self.reader_join_ms)
    }

    pub fn client_start_delay(&self) -> Duration {
        Duration::from_millis(self.client_start_delay_ms)
    }
}

/// Per-session settings
#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// First listen port; session `i` uses `base_port + i`. 0 asks the OS.
    #[serde(default = "default_base_port")]
    pub base_port: u16,

    /// Sessions run at the same time
    #[serde(default = "default_parallel")]
    pub parallel: usize,

    /// Root for session trees
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Control loop drain interval
    #[serde(default = "default_poll_interval")]
    pub poll_interval_ms: u64,

    /// Resource sampling interval
    #[serde(default = "default_telemetry_interval")]
    pub telemetry_interval_ms: u64,

    /// Lines retained per role
    #[serde(default = "default_line_buffer_cap")]
    pub line_buffer_cap: usize,

    /// Capacity of the reader → control loop channel
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            base_port: default_base_port(),
            parallel: default_parallel(),
            work_dir: None,
            poll_interval_ms: default_poll_interval(),
            telemetry_interval_ms: default_telemetry_interval(),
            line_buffer_cap: default_line_buffer_cap(),
            queue_capacity: default_queue_capacity(),
        }
    }
}

fn default_base_port() -> u16 {
    5555
}
fn default_parallel() -> usize {
    1
}
fn default_poll_interval() -> u64 {
    100
}
fn default_telemetry_interval() -> u64 {
    500
}
fn default_line_buffer_cap() -> usize {
    200
}
fn default_queue_capacity() -> usize {
    1024
}

impl SessionConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn telemetry_interval(&self) -> Duration {
        Duration::from_millis(self.telemetry_interval_ms.max(1))
    }
}

/// Prompt auto-responder settings
#[derive(Debug, Deserialize, Clone)]
pub struct ResponderConfig {
    /// Answer `y/n` prompts at all
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Reply written (followed by a newline)
    #[serde(default = "default_reply")]
    pub reply: String,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            reply: default_reply(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_reply() -> String {
    "y".to_string()
}

/// Remote debugging through gdbserver
#[derive(Debug, Deserialize, Clone)]
pub struct DebugConfig {
    #[serde(default)]
    pub enabled: bool,

    /// gdbserver executable
    #[serde(default = "default_gdbserver")]
    pub gdbserver: PathBuf,

    /// Session `i` uses `base_port + 2i` (server) and `base_port + 2i + 1` (client)
    #[serde(default = "default_debug_port")]
    pub base_port: u16,
}

impl Default for DebugConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gdbserver: default_gdbserver(),
            base_port: default_debug_port(),
        }
    }
}

fn default_gdbserver() -> PathBuf {
    PathBuf::from("gdbserver")
}
fn default_debug_port() -> u16 {
    12345
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        match config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => Ok(Self::default()),
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::FileRead {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Resolve the subject binary
    ///
    /// Paths with a directory component must exist as given; bare names are
    /// searched on PATH.
    pub fn resolve_binary(&self) -> Result<PathBuf> {
        resolve_program(&self.subject.binary)
    }

    /// Resolve the gdbserver executable
    pub fn resolve_gdbserver(&self) -> Result<PathBuf> {
        resolve_program(&self.debug.gdbserver)
    }

    /// Inactivity timeout after applying debug mode
    ///
    /// A subject paused in a debugger produces no output, so debug sessions
    /// never time out.
    pub fn effective_inactivity(&self) -> Option<Duration> {
        if self.debug.enabled {
            None
        } else {
            self.timeouts.inactivity()
        }
    }
}

fn resolve_program(program: &Path) -> Result<PathBuf> {
    let has_dir = program
        .parent()
        .map(|p| !p.as_os_str().is_empty())
        .unwrap_or(false);

    if has_dir {
        if program.exists() {
            return Ok(program.canonicalize().unwrap_or_else(|_| program.to_path_buf()));
        }
        return Err(Error::SubjectNotFound(program.display().to_string()));
    }

    which::which(program).map_err(|_| Error::SubjectNotFound(program.display().to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.session.base_port, 5555);
        assert_eq!(config.session.line_buffer_cap, 200);
        assert_eq!(config.timeouts.inactivity(), Some(Duration::from_secs(3)));
        assert_eq!(config.responder.reply, "y");
        assert!(config.responder.enabled);
    }

    #[test]
    fn test_parse_partial_config() {
        let config = Config::parse(
            r#"
            catalogs = ["extra.yaml"]

            [subject]
            binary = "/opt/sync/bin/multi_pc_sync"
            retries = 1

            [timeouts]
            inactivity_secs = 0

            [debug]
            enabled = true
            "#,
        )
        .unwrap();

        assert_eq!(config.subject.retries, Some(1));
        assert_eq!(config.subject.host, "127.0.0.1");
        assert_eq!(config.timeouts.inactivity(), None);
        assert_eq!(config.debug.base_port, 12345);
        assert_eq!(config.catalogs, vec![PathBuf::from("extra.yaml")]);
        assert_eq!(config.session.poll_interval(), Duration::from_millis(100));
    }

    #[test]
    fn test_debug_disables_inactivity() {
        let mut config = Config::default();
        assert!(config.effective_inactivity().is_some());
        config.debug.enabled = true;
        assert!(config.effective_inactivity().is_none());
    }

    #[test]
    fn test_invalid_config_is_reported() {
        let err = Config::parse("[session]\nparallel = \"many\"").unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_missing_binary_with_directory() {
        let mut config = Config::default();
        config.subject.binary = PathBuf::from("/definitely/not/here/sync");
        assert!(matches!(
            config.resolve_binary(),
            Err(Error::SubjectNotFound(_))
        ));
    }
}
