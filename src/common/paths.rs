//! Configuration, log and scratch directory locations
//!
//! Uses the directories crate for platform-appropriate locations:
//! - Linux: `~/.config/syncpair/`
//! - macOS: `~/Library/Application Support/syncpair/`
//! - Windows: `%APPDATA%\syncpair\`

use std::io;
use std::path::PathBuf;

/// Name used for per-user directories
const APP_NAME: &str = "syncpair";

/// Get the configuration directory path
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// Get the path to the log directory
pub fn log_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.data_dir().join("logs"))
}

/// Default root for session trees
///
/// Each run gets its own folder keyed by pid so two harness invocations
/// never share trees.
pub fn default_work_dir() -> PathBuf {
    std::env::temp_dir().join(format!("{}-{}", APP_NAME, std::process::id()))
}

/// Ensure a directory exists, returning it
pub fn ensure_dir(dir: PathBuf) -> io::Result<PathBuf> {
    if !dir.exists() {
        std::fs::create_dir_all(&dir)?;
    }
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_is_toml() {
        if let Some(path) = config_path() {
            assert_eq!(path.file_name().unwrap(), "config.toml");
        }
    }

    #[test]
    fn test_default_work_dir_is_per_process() {
        let dir = default_work_dir();
        let name = dir.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.ends_with(&std::process::id().to_string()));
    }
}
