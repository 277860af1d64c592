//! Subject output classification
//!
//! Subjects print unstructured text, so everything here is a string
//! heuristic. Keeping it in one place makes the heuristics easy to test and
//! to swap for a different subject.

use std::sync::LazyLock;

use regex::Regex;

/// Interactive confirmation prompt, e.g. `Overwrite? (y/n)`
static PROMPT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\by/n\b").expect("prompt pattern is valid"));

/// What a single output line tells us
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct LineClass {
    /// Mentions "error" or "fail"
    pub error: bool,
    /// Mentions "sync"
    pub sync_op: bool,
    /// Reports a file transfer
    pub file_transfer: bool,
    /// Byte count from a transfer report
    pub bytes: Option<u64>,
}

/// Classify one line, case-insensitively
pub fn classify(line: &str) -> LineClass {
    let lower = line.to_lowercase();
    let transfer = lower.contains("transfer");

    LineClass {
        error: lower.contains("error") || lower.contains("fail"),
        sync_op: lower.contains("sync"),
        file_transfer: transfer && lower.contains("file"),
        bytes: if transfer && lower.contains("bytes") {
            last_integer(&lower)
        } else {
            None
        },
    }
}

/// Whether the line asks a yes/no question
pub fn is_prompt(line: &str) -> bool {
    PROMPT.is_match(line)
}

/// The last run of ASCII digits in the line
fn last_integer(line: &str) -> Option<u64> {
    line.split(|c: char| !c.is_ascii_digit())
        .filter(|s| !s.is_empty())
        .last()
        .and_then(|s| s.parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_markers() {
        assert!(classify("ERROR: connection refused").error);
        assert!(classify("Error receiving command from server").error);
        assert!(classify("handshake FAILED").error);
        assert!(!classify("Server is active and waiting for connections...").error);
    }

    #[test]
    fn test_sync_counter() {
        assert!(classify("Sync complete").sync_op);
        assert!(classify("starting synchronization").sync_op);
        assert!(!classify("idle").sync_op);
    }

    #[test]
    fn test_transfer_lines() {
        let class = classify("transfer file subdir/nested.txt (11 bytes)");
        assert!(class.file_transfer);
        assert_eq!(class.bytes, Some(11));

        let class = classify("Transferred 4096 bytes");
        assert!(!class.file_transfer);
        assert_eq!(class.bytes, Some(4096));

        // A byte count needs the transfer keyword
        assert_eq!(classify("read 12 bytes").bytes, None);
        assert_eq!(classify("transfer of bytes pending").bytes, None);
    }

    #[test]
    fn test_prompt_detection() {
        assert!(is_prompt("Remove 2 local entries not present on server? (y/n)"));
        assert!(is_prompt("Overwrite [Y/N]"));
        assert!(is_prompt("continue y/n:"));
        assert!(!is_prompt("day/night"));
        assert!(!is_prompt("tidy/nice"));
    }
}
