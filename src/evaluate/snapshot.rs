//! Directory snapshots
//!
//! A snapshot is the set of `(relative path, size)` pairs for files plus the
//! set of relative directory paths. Content is never read.

use std::collections::BTreeSet;
use std::io;
use std::path::Path;

use walkdir::WalkDir;

/// Comparable view of one directory tree
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DirectorySnapshot {
    files: BTreeSet<(String, u64)>,
    dirs: BTreeSet<String>,
}

impl DirectorySnapshot {
    /// Walk `root` and record every file and directory below it
    ///
    /// Paths use `/` separators on every platform so trees captured on
    /// different sides compare equal. Symlinks are not followed.
    pub fn capture(root: &Path) -> io::Result<Self> {
        let mut snapshot = Self::default();

        for entry in WalkDir::new(root).min_depth(1).follow_links(false) {
            let entry = entry?;
            let relative = entry
                .path()
                .strip_prefix(root)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let relative = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            let file_type = entry.file_type();
            if file_type.is_dir() {
                snapshot.dirs.insert(relative);
            } else if file_type.is_file() {
                let size = entry.metadata()?.len();
                snapshot.files.insert((relative, size));
            }
        }

        Ok(snapshot)
    }

    pub fn files(&self) -> &BTreeSet<(String, u64)> {
        &self.files
    }

    pub fn dirs(&self) -> &BTreeSet<String> {
        &self.dirs
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    /// Describe how this file set differs from `other`, `None` when equal
    pub fn file_diff(&self, other: &Self) -> Option<String> {
        describe_diff(&self.files, &other.files, |(p, s)| format!("{} ({} bytes)", p, s))
    }

    /// Describe how this directory set differs from `other`, `None` when equal
    pub fn dir_diff(&self, other: &Self) -> Option<String> {
        describe_diff(&self.dirs, &other.dirs, |d| format!("{}/", d))
    }
}

fn describe_diff<T: Ord>(
    server: &BTreeSet<T>,
    client: &BTreeSet<T>,
    show: impl Fn(&T) -> String,
) -> Option<String> {
    if server == client {
        return None;
    }

    let only_server: Vec<String> = server.difference(client).map(&show).collect();
    let only_client: Vec<String> = client.difference(server).map(&show).collect();

    let mut parts = Vec::new();
    if !only_server.is_empty() {
        parts.push(format!("only on server: {}", only_server.join(", ")));
    }
    if !only_client.is_empty() {
        parts.push(format!("only on client: {}", only_client.join(", ")));
    }
    Some(parts.join("; "))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_capture_files_and_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a/b")).unwrap();
        fs::create_dir(root.join("empty")).unwrap();
        fs::write(root.join("a/b/x.txt"), "12345").unwrap();
        fs::write(root.join("top.txt"), "").unwrap();

        let snap = DirectorySnapshot::capture(root).unwrap();

        assert_eq!(snap.file_count(), 2);
        assert!(snap.files().contains(&("a/b/x.txt".to_string(), 5)));
        assert!(snap.files().contains(&("top.txt".to_string(), 0)));
        let dirs: Vec<&str> = snap.dirs().iter().map(String::as_str).collect();
        assert_eq!(dirs, vec!["a", "a/b", "empty"]);
    }

    #[test]
    fn test_size_mismatch_is_a_difference() {
        let left = tempfile::tempdir().unwrap();
        let right = tempfile::tempdir().unwrap();
        fs::write(left.path().join("f.txt"), "Server version").unwrap();
        fs::write(right.path().join("f.txt"), "Client v").unwrap();

        let l = DirectorySnapshot::capture(left.path()).unwrap();
        let r = DirectorySnapshot::capture(right.path()).unwrap();

        let diff = l.file_diff(&r).unwrap();
        assert!(diff.contains("only on server: f.txt (14 bytes)"));
        assert!(diff.contains("only on client: f.txt (8 bytes)"));
        assert!(l.dir_diff(&r).is_none());
    }

    #[test]
    fn test_missing_root_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(DirectorySnapshot::capture(&dir.path().join("gone")).is_err());
    }
}
