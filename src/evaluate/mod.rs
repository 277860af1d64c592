//! Success evaluation
//!
//! Judges a session from the final state of the two trees plus error-line
//! detection. Subject exit codes are ignored on purpose: a sync tool can
//! exit cleanly while disagreeing with its peer.

mod snapshot;

pub use snapshot::DirectorySnapshot;

use std::fmt;
use std::path::Path;

use crate::common::Error;
use crate::scenario::{Convergence, Scenario};
use crate::session::TestMetrics;

/// Why a session failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailCause {
    /// A subject printed something the classifier flagged as an error
    ErrorLines { server: u64, client: u64 },
    /// The trees did not satisfy the scenario's predicate
    Mismatch(String),
    /// The trees could not be inspected
    Evaluation(String),
    /// The environment could not be built
    Setup(String),
    /// A subject could not be started
    Launch(String),
    /// The run was cancelled before a verdict
    Cancelled,
}

impl fmt::Display for FailCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ErrorLines { server, client } => write!(
                f,
                "error lines detected (server: {}, client: {})",
                server, client
            ),
            Self::Mismatch(detail) => write!(f, "filesystem mismatch: {}", detail),
            Self::Evaluation(detail) => write!(f, "evaluation failed: {}", detail),
            Self::Setup(detail) => write!(f, "setup failed: {}", detail),
            Self::Launch(detail) => write!(f, "launch failed: {}", detail),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl From<&Error> for FailCause {
    fn from(e: &Error) -> Self {
        match e {
            Error::Setup { .. } => Self::Setup(e.to_string()),
            Error::Launch { .. } | Error::SubjectNotFound(_) | Error::PortUnavailable(_) => {
                Self::Launch(e.to_string())
            }
            Error::Cancelled => Self::Cancelled,
            Error::Evaluation { .. } => Self::Evaluation(e.to_string()),
            _ => Self::Evaluation(e.to_string()),
        }
    }
}

/// Outcome of one scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Pass,
    Fail(FailCause),
}

impl Verdict {
    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => write!(f, "PASS"),
            Verdict::Fail(cause) => write!(f, "FAIL ({})", cause),
        }
    }
}

/// Judge a finished session
///
/// `seeded_files` is the baseline for removal scenarios. Inspection
/// failures become a FAIL verdict rather than an error.
pub fn evaluate(
    scenario: &Scenario,
    server_dir: &Path,
    client_dir: &Path,
    metrics: &TestMetrics,
    seeded_files: usize,
) -> Verdict {
    if metrics.server_errors > 0 || metrics.client_errors > 0 {
        return Verdict::Fail(FailCause::ErrorLines {
            server: metrics.server_errors,
            client: metrics.client_errors,
        });
    }

    match compare(scenario.convergence, server_dir, client_dir, seeded_files) {
        Ok(None) => Verdict::Pass,
        Ok(Some(detail)) => Verdict::Fail(FailCause::Mismatch(detail)),
        Err(e) => {
            tracing::warn!(scenario = %scenario.name, "Evaluation failed: {}", e);
            Verdict::Fail(FailCause::Evaluation(e.to_string()))
        }
    }
}

/// Apply a convergence predicate to two trees
///
/// Returns `Ok(None)` when converged and `Ok(Some(detail))` describing the
/// mismatch otherwise.
pub fn compare(
    convergence: Convergence,
    server_dir: &Path,
    client_dir: &Path,
    seeded_files: usize,
) -> Result<Option<String>, Error> {
    let server = DirectorySnapshot::capture(server_dir)
        .map_err(|e| Error::evaluation(server_dir, e))?;
    let client = DirectorySnapshot::capture(client_dir)
        .map_err(|e| Error::evaluation(client_dir, e))?;

    let detail = match convergence {
        Convergence::FileSet => server.file_diff(&client),
        Convergence::FileSetBelowBaseline => server.file_diff(&client).or_else(|| {
            (client.file_count() >= seeded_files).then(|| {
                format!(
                    "client holds {} files, expected fewer than the {} seeded",
                    client.file_count(),
                    seeded_files
                )
            })
        }),
        Convergence::DirectorySet => server.dir_diff(&client),
    };

    Ok(detail)
}
