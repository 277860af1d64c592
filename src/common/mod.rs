//! Common utilities shared by the CLI, runner and sessions

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};
