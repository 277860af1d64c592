//! Scenario model
//!
//! A scenario is data: a list of filesystem primitives applied to the
//! server tree, the client tree or both, plus the predicate that decides
//! whether the two trees converged. New scenarios never need new code.

mod catalog;
mod env;

pub use catalog::{Catalog, CatalogFile, SEEDED_FILES};
pub use env::{Environment, SetupOutcome};

use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Component, Path};
use std::time::SystemTime;

use serde::Deserialize;

use crate::common::{Error, Result};

/// Which tree a step applies to
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Side {
    Server,
    Client,
    Both,
}

/// A single filesystem primitive, paths relative to the side's tree
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum FsOp {
    /// Create or overwrite a file with text, creating parent directories
    Write { path: String, text: String },
    /// Create or overwrite a file with `size` deterministic bytes
    Fill { path: String, size: u64 },
    /// Delete a file
    Remove { path: String },
    /// Move a file or directory
    Rename { from: String, to: String },
    /// Bump a file's modification time without touching content
    Touch { path: String },
    /// Create a directory and its parents
    Mkdir { path: String },
    /// Delete a directory and everything below it
    Rmdir { path: String },
}

impl FsOp {
    pub fn write(path: &str, text: &str) -> Self {
        Self::Write {
            path: path.to_string(),
            text: text.to_string(),
        }
    }

    pub fn fill(path: &str, size: u64) -> Self {
        Self::Fill {
            path: path.to_string(),
            size,
        }
    }

    pub fn remove(path: &str) -> Self {
        Self::Remove {
            path: path.to_string(),
        }
    }

    pub fn rename(from: &str, to: &str) -> Self {
        Self::Rename {
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    pub fn touch(path: &str) -> Self {
        Self::Touch {
            path: path.to_string(),
        }
    }

    pub fn mkdir(path: &str) -> Self {
        Self::Mkdir {
            path: path.to_string(),
        }
    }

    pub fn rmdir(path: &str) -> Self {
        Self::Rmdir {
            path: path.to_string(),
        }
    }

    /// Relative paths this operation touches
    fn paths(&self) -> Vec<&str> {
        match self {
            FsOp::Write { path, .. }
            | FsOp::Fill { path, .. }
            | FsOp::Remove { path }
            | FsOp::Touch { path }
            | FsOp::Mkdir { path }
            | FsOp::Rmdir { path } => vec![path.as_str()],
            FsOp::Rename { from, to } => vec![from.as_str(), to.as_str()],
        }
    }

    /// Apply the operation under `root`
    pub fn apply(&self, root: &Path) -> Result<()> {
        match self {
            FsOp::Write { path, text } => {
                let target = root.join(path);
                ensure_parent(&target)?;
                fs::write(&target, text).map_err(|e| Error::setup(&target, e))
            }
            FsOp::Fill { path, size } => {
                let target = root.join(path);
                ensure_parent(&target)?;
                write_pattern(&target, *size).map_err(|e| Error::setup(&target, e))
            }
            FsOp::Remove { path } => {
                let target = root.join(path);
                fs::remove_file(&target).map_err(|e| Error::setup(&target, e))
            }
            FsOp::Rename { from, to } => {
                let source = root.join(from);
                let target = root.join(to);
                ensure_parent(&target)?;
                fs::rename(&source, &target).map_err(|e| Error::setup(&source, e))
            }
            FsOp::Touch { path } => {
                let target = root.join(path);
                File::options()
                    .write(true)
                    .open(&target)
                    .and_then(|f| f.set_modified(SystemTime::now()))
                    .map_err(|e| Error::setup(&target, e))
            }
            FsOp::Mkdir { path } => {
                let target = root.join(path);
                fs::create_dir_all(&target).map_err(|e| Error::setup(&target, e))
            }
            FsOp::Rmdir { path } => {
                let target = root.join(path);
                fs::remove_dir_all(&target).map_err(|e| Error::setup(&target, e))
            }
        }
    }
}

fn ensure_parent(target: &Path) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| Error::setup(parent, e))?;
    }
    Ok(())
}

/// Write `size` bytes of a fixed, position-derived pattern
///
/// The same size always produces the same bytes, so repeated setups build
/// identical trees.
fn write_pattern(target: &Path, size: u64) -> std::io::Result<()> {
    const CHUNK: usize = 64 * 1024;

    let mut writer = BufWriter::new(File::create(target)?);
    let mut chunk = vec![0u8; CHUNK];
    let mut offset = 0u64;

    while offset < size {
        let len = (size - offset).min(CHUNK as u64) as usize;
        for (i, byte) in chunk[..len].iter_mut().enumerate() {
            *byte = pattern_byte(offset + i as u64);
        }
        writer.write_all(&chunk[..len])?;
        offset += len as u64;
    }

    writer.flush()
}

fn pattern_byte(position: u64) -> u8 {
    (position.wrapping_mul(31).wrapping_add(7) % 251) as u8
}

/// One primitive bound to a side
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub side: Side,
    #[serde(flatten)]
    pub op: FsOp,
}

/// What "converged" means for a scenario
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Convergence {
    /// Same (path, size) file sets on both sides
    #[default]
    FileSet,
    /// Same file sets, and fewer files than were seeded
    ///
    /// Proves a deletion travelled rather than both sides coincidentally
    /// keeping the seed.
    FileSetBelowBaseline,
    /// Same directory path sets on both sides
    DirectorySet,
}

impl std::fmt::Display for Convergence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FileSet => write!(f, "file set"),
            Self::FileSetBelowBaseline => write!(f, "file set below baseline"),
            Self::DirectorySet => write!(f, "directory set"),
        }
    }
}

/// Mutation procedure, split into the seed state and the deltas on top
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct Setup {
    #[serde(default)]
    pub seed: Vec<Step>,
    #[serde(default)]
    pub mutate: Vec<Step>,
}

impl Setup {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed(mut self, side: Side, op: FsOp) -> Self {
        self.seed.push(Step { side, op });
        self
    }

    pub fn mutate(mut self, side: Side, op: FsOp) -> Self {
        self.mutate.push(Step { side, op });
        self
    }

    /// Reject absolute paths and parent traversal
    ///
    /// Every step must stay inside its side's tree.
    pub fn validate(&self) -> std::result::Result<(), String> {
        for step in self.seed.iter().chain(&self.mutate) {
            for path in step.op.paths() {
                let p = Path::new(path);
                if path.is_empty() || p.is_absolute() {
                    return Err(format!("path '{}' must be relative and non-empty", path));
                }
                if p.components().any(|c| matches!(c, Component::ParentDir)) {
                    return Err(format!("path '{}' escapes the session tree", path));
                }
            }
        }
        Ok(())
    }
}

/// A named, deterministic (description, setup, predicate) triple
#[derive(Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(from = "ScenarioDef")]
pub struct Scenario {
    pub name: String,
    pub description: String,
    pub setup: Setup,
    pub convergence: Convergence,
}

/// Catalog-file layout of a scenario, with the setup phases inline
#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ScenarioDef {
    name: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    seed: Vec<Step>,
    #[serde(default)]
    mutate: Vec<Step>,
    #[serde(default)]
    convergence: Convergence,
}

impl From<ScenarioDef> for Scenario {
    fn from(def: ScenarioDef) -> Self {
        Self {
            name: def.name,
            description: def.description,
            setup: Setup {
                seed: def.seed,
                mutate: def.mutate,
            },
            convergence: def.convergence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pattern_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let a = dir.path().join("a.bin");
        let b = dir.path().join("b.bin");
        write_pattern(&a, 200_000).unwrap();
        write_pattern(&b, 200_000).unwrap();

        let a = fs::read(a).unwrap();
        assert_eq!(a.len(), 200_000);
        assert_eq!(a, fs::read(b).unwrap());
    }

    #[test]
    fn test_ops_apply_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        FsOp::write("a/b/c.txt", "hello").apply(root).unwrap();
        FsOp::rename("a/b/c.txt", "d.txt").apply(root).unwrap();
        FsOp::touch("d.txt").apply(root).unwrap();
        FsOp::mkdir("empty/inner").apply(root).unwrap();
        FsOp::rmdir("a").apply(root).unwrap();

        assert_eq!(fs::read_to_string(root.join("d.txt")).unwrap(), "hello");
        assert!(root.join("empty/inner").is_dir());
        assert!(!root.join("a").exists());

        FsOp::remove("d.txt").apply(root).unwrap();
        assert!(!root.join("d.txt").exists());
    }

    #[test]
    fn test_failed_op_is_setup_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = FsOp::remove("missing.txt").apply(dir.path()).unwrap_err();
        assert!(matches!(err, Error::Setup { .. }));
    }

    #[test]
    fn test_validate_rejects_escaping_paths() {
        let setup = Setup::new().seed(Side::Server, FsOp::write("../outside.txt", "x"));
        assert!(setup.validate().is_err());

        let setup = Setup::new().mutate(Side::Client, FsOp::rename("a.txt", "/etc/passwd"));
        assert!(setup.validate().is_err());

        let setup = Setup::new().seed(Side::Both, FsOp::write("ok/fine.txt", "x"));
        assert!(setup.validate().is_ok());
    }

    #[test]
    fn test_step_deserializes_from_yaml() {
        let step: Step = serde_yaml::from_str("side: both\nop: fill\npath: big.bin\nsize: 1024\n")
            .unwrap();
        assert_eq!(step.side, Side::Both);
        assert_eq!(step.op, FsOp::fill("big.bin", 1024));
    }
}
