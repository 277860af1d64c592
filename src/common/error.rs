//! Error types for the sync harness
//!
//! Only configuration and catalog problems abort a whole run. Everything
//! that goes wrong inside a session is turned into a FAIL verdict by the
//! runner, so the variants here carry enough context to explain that cause.

use std::io;
use std::path::PathBuf;
use thiserror::Error;

use crate::session::ProcessRole;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the harness
#[derive(Error, Debug)]
pub enum Error {
    // === Scenario Errors ===
    #[error("Scenario '{0}' is not in the catalog. Use 'syncpair list' to see available scenarios")]
    ScenarioNotFound(String),

    #[error("Scenario '{0}' is registered more than once")]
    DuplicateScenario(String),

    #[error("Failed to load scenario catalog '{path}': {error}")]
    CatalogLoad { path: String, error: String },

    // === Session Errors ===
    #[error("Environment setup failed at '{path}': {source}")]
    Setup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to launch {role} process: {message}")]
    Launch { role: ProcessRole, message: String },

    #[error("Subject binary '{0}' not found. Set subject.binary in the config or pass --binary")]
    SubjectNotFound(String),

    #[error("No free port available for session: {0}")]
    PortUnavailable(#[source] io::Error),

    #[error("Session cancelled")]
    Cancelled,

    // === Telemetry Errors ===
    #[error("Resource query for pid {pid} failed: {reason}")]
    Telemetry { pid: u32, reason: String },

    // === Evaluation Errors ===
    #[error("Failed to inspect '{path}': {reason}")]
    Evaluation { path: PathBuf, reason: String },

    // === Configuration Errors ===
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid configuration file: {0}")]
    ConfigParse(String),

    // === IO Errors ===
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("Failed to read file '{path}': {error}")]
    FileRead { path: String, error: String },
}

impl Error {
    /// Create a setup error for the path that could not be prepared
    pub fn setup(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Setup {
            path: path.into(),
            source,
        }
    }

    /// Create a launch error for a subject process
    pub fn launch(role: ProcessRole, message: impl Into<String>) -> Self {
        Self::Launch {
            role,
            message: message.into(),
        }
    }

    /// Create an evaluation error
    pub fn evaluation(path: impl Into<PathBuf>, reason: impl ToString) -> Self {
        Self::Evaluation {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    /// Short machine-friendly code, used in the run summary
    pub fn code(&self) -> &'static str {
        match self {
            Error::ScenarioNotFound(_) => "SCENARIO_NOT_FOUND",
            Error::DuplicateScenario(_) | Error::CatalogLoad { .. } => "CATALOG",
            Error::Setup { .. } => "SETUP",
            Error::Launch { .. } | Error::SubjectNotFound(_) | Error::PortUnavailable(_) => {
                "LAUNCH"
            }
            Error::Cancelled => "CANCELLED",
            Error::Telemetry { .. } => "TELEMETRY",
            Error::Evaluation { .. } => "EVALUATION",
            Error::Config(_) | Error::ConfigParse(_) => "CONFIG",
            Error::Io(_) | Error::FileRead { .. } => "IO",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        let err = Error::launch(ProcessRole::Client, "no such file");
        assert_eq!(err.code(), "LAUNCH");
        assert_eq!(
            err.to_string(),
            "Failed to launch client process: no such file"
        );

        let err = Error::setup("/tmp/x", io::Error::new(io::ErrorKind::Other, "boom"));
        assert_eq!(err.code(), "SETUP");
        assert!(err.to_string().contains("/tmp/x"));

        let err = Error::from(io::Error::new(io::ErrorKind::NotFound, "gone"));
        assert_eq!(err.code(), "IO");
    }
}
