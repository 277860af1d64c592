//! Session metrics

use std::time::{Duration, Instant};

use super::classify::classify;
use super::stream::LineRecord;
use super::ProcessRole;

/// Counters and resource summaries for one session
///
/// Counters only ever grow while the session runs. Resource summaries are
/// filled in once by the telemetry sampler at the end.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TestMetrics {
    pub started_at: Option<Instant>,
    pub finished_at: Option<Instant>,
    pub server_errors: u64,
    pub client_errors: u64,
    pub sync_operations: u64,
    pub files_transferred: u64,
    pub bytes_transferred: u64,
    pub server_max_memory_kb: u64,
    pub client_max_memory_kb: u64,
    pub server_avg_cpu: f32,
    pub client_avg_cpu: f32,
    pub max_connections: usize,
}

impl TestMetrics {
    pub fn start(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub fn finish(&mut self) {
        self.finished_at = Some(Instant::now());
    }

    /// Wall time between start and finish
    pub fn duration(&self) -> Option<Duration> {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => Some(end.saturating_duration_since(start)),
            _ => None,
        }
    }

    /// Fold one output line into the counters
    ///
    /// Returns true when the line was flagged as an error.
    pub fn record_line(&mut self, record: &LineRecord) -> bool {
        let class = classify(&record.text);

        if class.error {
            match record.role {
                ProcessRole::Server => self.server_errors += 1,
                ProcessRole::Client => self.client_errors += 1,
            }
        }
        if class.sync_op {
            self.sync_operations += 1;
        }
        if class.file_transfer {
            self.files_transferred += 1;
        }
        if let Some(bytes) = class.bytes {
            self.bytes_transferred = self.bytes_transferred.saturating_add(bytes);
        }

        class.error
    }

    /// Error lines seen from either role
    pub fn error_lines(&self) -> u64 {
        self.server_errors + self.client_errors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_line_counts_by_role() {
        let mut metrics = TestMetrics::default();

        assert!(metrics.record_line(&LineRecord::new(ProcessRole::Server, "Error binding port")));
        assert!(!metrics.record_line(&LineRecord::new(ProcessRole::Client, "sync started")));
        metrics.record_line(&LineRecord::new(
            ProcessRole::Client,
            "transfer file a.txt (5 bytes)",
        ));
        metrics.record_line(&LineRecord::new(
            ProcessRole::Client,
            "transfer file b.txt (7 bytes)",
        ));

        assert_eq!(metrics.server_errors, 1);
        assert_eq!(metrics.client_errors, 0);
        assert_eq!(metrics.error_lines(), 1);
        assert_eq!(metrics.sync_operations, 1);
        assert_eq!(metrics.files_transferred, 2);
        assert_eq!(metrics.bytes_transferred, 12);
    }

    #[test]
    fn test_duration_requires_both_ends() {
        let mut metrics = TestMetrics::default();
        assert!(metrics.duration().is_none());
        metrics.start();
        assert!(metrics.duration().is_none());
        metrics.finish();
        assert!(metrics.duration().is_some());
    }
}
