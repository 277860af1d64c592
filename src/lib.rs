//! syncpair - end-to-end harness for server/client file-sync binaries
//!
//! Drives a sync binary as a server/client pair through a catalog of
//! filesystem-mutation scenarios, supervises both processes, captures
//! their output and resource usage, and judges convergence from the final
//! directory trees.

pub mod cli;
pub mod commands;
pub mod common;
pub mod evaluate;
pub mod scenario;
pub mod session;
pub mod telemetry;
pub mod testing;

// Re-export commonly used types for tests
pub use common::{Error, Result};
pub use evaluate::{FailCause, Verdict};
pub use scenario::{Catalog, Scenario};
