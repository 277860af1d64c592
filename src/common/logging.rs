//! Logging and tracing configuration
//!
//! Harness diagnostics always go to stderr so they never interleave with the
//! followed subject output on stdout. An optional log file captures the full
//! trace, including every subject line.

use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

/// Default stderr directives
///
/// Headless runs promise nothing but the final summary, so only errors get
/// through unless `RUST_LOG` says otherwise.
fn default_directives(headless: bool) -> &'static str {
    if headless {
        "syncpair=error,error"
    } else {
        "syncpair=info,warn"
    }
}

fn env_filter(default: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default))
}

/// Initialize tracing for the CLI
///
/// Logs are controlled by the `RUST_LOG` environment variable.
/// Default level is INFO for this crate, WARN for dependencies, and ERROR
/// for both in headless runs.
///
/// When `log_file` is given, a second non-blocking layer writes a detailed
/// log there. The returned guard must be held until exit or buffered lines
/// are lost.
pub fn init_cli(log_file: Option<&Path>, headless: bool) -> Option<WorkerGuard> {
    let stderr_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .with_filter(env_filter(default_directives(headless)));

    let Some(path) = log_file else {
        tracing_subscriber::registry().with(stderr_layer).init();
        return None;
    };

    let dir = path.parent().filter(|p| !p.as_os_str().is_empty());
    let dir = dir.unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_else(|| "syncpair.log".into());

    if let Err(e) = std::fs::create_dir_all(dir) {
        eprintln!("Warning: Could not create log directory: {}", e);
    }

    let appender = tracing_appender::rolling::never(dir, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let file_layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(false)
        .with_target(true)
        .with_thread_ids(true)
        .with_file(true)
        .with_line_number(true)
        .with_filter(env_filter("syncpair=debug,warn"));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(file_layer)
        .init();

    Some(guard)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_headless_default_only_lets_errors_through() {
        assert_eq!(default_directives(true), "syncpair=error,error");
        assert_eq!(default_directives(false), "syncpair=info,warn");
        assert!(default_directives(true).parse::<EnvFilter>().is_ok());
    }
}
