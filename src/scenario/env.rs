//! Environment builder
//!
//! Lays out `<root>/server` and `<root>/client` for one session and applies
//! a scenario's setup to them.

use std::fs;
use std::path::{Path, PathBuf};

use crate::common::{Error, Result};
use crate::evaluate::DirectorySnapshot;

use super::{Scenario, Side, Step};

/// The two sibling trees of one session
#[derive(Debug, Clone)]
pub struct Environment {
    root: PathBuf,
    server: PathBuf,
    client: PathBuf,
}

/// What the builder learned while applying a setup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupOutcome {
    /// Largest per-side file count right after seeding
    pub seeded_files: usize,
}

impl Environment {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            server: root.join("server"),
            client: root.join("client"),
            root,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn server_dir(&self) -> &Path {
        &self.server
    }

    pub fn client_dir(&self) -> &Path {
        &self.client
    }

    /// Recursively clear the session root and recreate both trees empty
    pub fn prepare(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root).map_err(|e| Error::setup(&self.root, e))?;
        }
        for dir in [&self.server, &self.client] {
            fs::create_dir_all(dir).map_err(|e| Error::setup(dir, e))?;
        }
        Ok(())
    }

    /// Clear both trees, then apply the seed and mutate phases in order
    ///
    /// The first failing step aborts the setup; nothing is retried.
    pub fn build(&self, scenario: &Scenario) -> Result<SetupOutcome> {
        self.prepare()?;
        self.apply_steps(&scenario.setup.seed)?;

        let seeded_files = [&self.server, &self.client]
            .into_iter()
            .map(|dir| {
                DirectorySnapshot::capture(dir)
                    .map(|s| s.file_count())
                    .map_err(|e| Error::setup(dir, e))
            })
            .collect::<Result<Vec<_>>>()?
            .into_iter()
            .max()
            .unwrap_or(0);

        self.apply_steps(&scenario.setup.mutate)?;

        tracing::debug!(
            scenario = %scenario.name,
            root = %self.root.display(),
            seeded_files,
            "Environment ready"
        );

        Ok(SetupOutcome { seeded_files })
    }

    fn apply_steps(&self, steps: &[Step]) -> Result<()> {
        for step in steps {
            match step.side {
                Side::Server => step.op.apply(&self.server)?,
                Side::Client => step.op.apply(&self.client)?,
                Side::Both => {
                    step.op.apply(&self.server)?;
                    step.op.apply(&self.client)?;
                }
            }
        }
        Ok(())
    }

    /// Remove the whole session root
    pub fn teardown(&self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
        }
        Ok(())
    }
}
