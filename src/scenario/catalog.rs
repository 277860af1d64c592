//! Scenario catalog
//!
//! The built-in catalog is registered once, in a fixed order. Extra
//! scenarios can be appended from YAML files.

use std::path::Path;

use serde::Deserialize;

use crate::common::{Error, Result};

use super::{Convergence, FsOp, Scenario, Setup, Side};

/// Size of the `large_file` payload
const LARGE_FILE_BYTES: u64 = 5 * 1024 * 1024;

/// Ordered, name-unique scenario registry
#[derive(Debug, Default, Clone)]
pub struct Catalog {
    scenarios: Vec<Scenario>,
}

/// On-disk layout of a YAML catalog
#[derive(Deserialize, Debug)]
#[serde(deny_unknown_fields)]
pub struct CatalogFile {
    pub scenarios: Vec<Scenario>,
}

impl Catalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a scenario at the end of the catalog
    pub fn register(
        &mut self,
        name: &str,
        description: &str,
        setup: Setup,
        convergence: Convergence,
    ) -> Result<&Scenario> {
        let scenario = Scenario {
            name: name.to_string(),
            description: description.to_string(),
            setup,
            convergence,
        };
        self.push(scenario, "built-in")
    }

    /// Validate and append a scenario that came from `origin`
    fn push(&mut self, scenario: Scenario, origin: &str) -> Result<&Scenario> {
        if self.get(&scenario.name).is_some() {
            return Err(Error::DuplicateScenario(scenario.name));
        }
        scenario.setup.validate().map_err(|error| Error::CatalogLoad {
            path: origin.to_string(),
            error: format!("scenario '{}': {}", scenario.name, error),
        })?;

        self.scenarios.push(scenario);
        let last = self.scenarios.len() - 1;
        Ok(&self.scenarios[last])
    }

    /// All scenarios in registration order
    pub fn list(&self) -> &[Scenario] {
        &self.scenarios
    }

    /// Look up a scenario by name
    pub fn get(&self, name: &str) -> Option<&Scenario> {
        self.scenarios.iter().find(|s| s.name == name)
    }

    /// Select scenarios by name, keeping catalog order
    ///
    /// An empty selection means every scenario.
    pub fn select(&self, names: &[String]) -> Result<Vec<Scenario>> {
        if names.is_empty() {
            return Ok(self.scenarios.clone());
        }

        for name in names {
            if self.get(name).is_none() {
                return Err(Error::ScenarioNotFound(name.clone()));
            }
        }

        Ok(self
            .scenarios
            .iter()
            .filter(|s| names.iter().any(|n| n == &s.name))
            .cloned()
            .collect())
    }

    /// Append every scenario from a YAML catalog file
    pub fn load_yaml(&mut self, path: &Path) -> Result<usize> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::CatalogLoad {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let file: CatalogFile = serde_yaml::from_str(&content).map_err(|e| Error::CatalogLoad {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        let origin = path.display().to_string();
        let count = file.scenarios.len();
        for scenario in file.scenarios {
            self.push(scenario, &origin)?;
        }

        tracing::debug!(path = %path.display(), count, "Loaded scenario catalog");
        Ok(count)
    }

    /// The built-in catalog
    pub fn builtin() -> Self {
        let mut catalog = Self::new();
        for (name, description, setup, convergence) in builtin_scenarios() {
            // Built-in names are unique and their paths are relative
            if let Err(e) = catalog.register(name, description, setup, convergence) {
                tracing::error!("Invalid built-in scenario '{}': {}", name, e);
            }
        }
        catalog
    }
}

/// Files written by the standard seed
pub const SEEDED_FILES: usize = 3;

/// Files both sides hold after a completed initial sync
fn seeded(side: Side) -> Setup {
    Setup::new()
        .seed(side, FsOp::write("file1.txt", "Hello from server"))
        .seed(side, FsOp::write("file2.txt", "Another file"))
        .seed(side, FsOp::write("subdir/nested.txt", "Nested file"))
}

fn builtin_scenarios() -> Vec<(&'static str, &'static str, Setup, Convergence)> {
    vec![
        (
            "initial_sync",
            "Server holds three files, client is empty",
            seeded(Side::Server),
            Convergence::FileSet,
        ),
        (
            "file_addition_server",
            "Server gains a file after both sides were in sync",
            seeded(Side::Both).mutate(Side::Server, FsOp::write("new_file.txt", "Added on server")),
            Convergence::FileSet,
        ),
        (
            "file_addition_client",
            "Client gains a file after both sides were in sync",
            seeded(Side::Both).mutate(Side::Client, FsOp::write("client_only.txt", "Added on client")),
            Convergence::FileSet,
        ),
        (
            "file_removal_server",
            "Server deletes one of three synced files",
            seeded(Side::Both).mutate(Side::Server, FsOp::remove("file2.txt")),
            Convergence::FileSetBelowBaseline,
        ),
        (
            "file_rename_server",
            "Server renames a synced file",
            seeded(Side::Both).mutate(Side::Server, FsOp::rename("file2.txt", "file3.txt")),
            Convergence::FileSet,
        ),
        (
            "file_conflict",
            "Both sides edit the same synced file with different content",
            Setup::new()
                .seed(Side::Both, FsOp::write("file1.txt", "Hello from server"))
                .mutate(Side::Server, FsOp::write("file1.txt", "Modified on server"))
                .mutate(Side::Client, FsOp::write("file1.txt", "Client edit")),
            Convergence::FileSet,
        ),
        (
            "directory_create",
            "Server creates nested empty directories",
            seeded(Side::Both)
                .mutate(Side::Server, FsOp::mkdir("new_dir/inner"))
                .mutate(Side::Server, FsOp::mkdir("another_dir")),
            Convergence::DirectorySet,
        ),
        (
            "directory_delete",
            "Server removes a synced directory tree",
            seeded(Side::Both)
                .seed(Side::Both, FsOp::mkdir("old_dir/inner"))
                .mutate(Side::Server, FsOp::rmdir("old_dir")),
            Convergence::DirectorySet,
        ),
        (
            "large_file",
            "Server holds a multi-megabyte payload",
            Setup::new().seed(Side::Server, FsOp::fill("large.bin", LARGE_FILE_BYTES)),
            Convergence::FileSet,
        ),
        (
            "simultaneous_changes",
            "Edits, moves, deletes and creates on both sides between two syncs",
            seeded(Side::Both)
                .mutate(Side::Client, FsOp::write("file1.txt", "Modified on client"))
                .mutate(Side::Server, FsOp::touch("file2.txt"))
                .mutate(Side::Client, FsOp::remove("subdir/nested.txt"))
                .mutate(Side::Server, FsOp::rename("file2.txt", "file3.txt"))
                .mutate(Side::Server, FsOp::write("file1.txt", "Modified on server"))
                .mutate(Side::Server, FsOp::remove("file3.txt"))
                .mutate(Side::Both, FsOp::rename("file1.txt", "file1_renamed.txt"))
                .mutate(Side::Server, FsOp::write("conflict.txt", "Server version"))
                .mutate(Side::Client, FsOp::write("conflict.txt", "Client version")),
            Convergence::FileSet,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_order_and_names() {
        let catalog = Catalog::builtin();
        let names: Vec<&str> = catalog.list().iter().map(|s| s.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "initial_sync",
                "file_addition_server",
                "file_addition_client",
                "file_removal_server",
                "file_rename_server",
                "file_conflict",
                "directory_create",
                "directory_delete",
                "large_file",
                "simultaneous_changes",
            ]
        );
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut catalog = Catalog::builtin();
        let err = catalog
            .register("initial_sync", "again", Setup::new(), Convergence::FileSet)
            .unwrap_err();
        assert!(matches!(err, Error::DuplicateScenario(name) if name == "initial_sync"));
    }

    #[test]
    fn test_select_keeps_catalog_order() {
        let catalog = Catalog::builtin();
        let picked = catalog
            .select(&["file_conflict".to_string(), "initial_sync".to_string()])
            .unwrap();
        assert_eq!(picked[0].name, "initial_sync");
        assert_eq!(picked[1].name, "file_conflict");

        assert!(matches!(
            catalog.select(&["nope".to_string()]),
            Err(Error::ScenarioNotFound(_))
        ));
        assert_eq!(catalog.select(&[]).unwrap().len(), catalog.list().len());
    }

    #[test]
    fn test_load_yaml_catalog() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("extra.yaml");
        std::fs::write(
            &path,
            r#"
scenarios:
  - name: client_rename
    description: Client renames a synced file
    convergence: file_set
    seed:
      - side: both
        op: write
        path: a.txt
        text: alpha
    mutate:
      - side: client
        op: rename
        from: a.txt
        to: b.txt
"#,
        )
        .unwrap();

        let mut catalog = Catalog::builtin();
        let before = catalog.list().len();
        assert_eq!(catalog.load_yaml(&path).unwrap(), 1);
        assert_eq!(catalog.list().len(), before + 1);

        let scenario = catalog.get("client_rename").unwrap();
        assert_eq!(scenario.setup.seed.len(), 1);
        assert_eq!(scenario.setup.mutate[0].op, FsOp::rename("a.txt", "b.txt"));
        assert_eq!(scenario.convergence, Convergence::FileSet);
    }

    #[test]
    fn test_load_yaml_rejects_escaping_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.yaml");
        std::fs::write(
            &path,
            "scenarios:\n  - name: bad\n    seed:\n      - side: server\n        op: mkdir\n        path: ../up\n",
        )
        .unwrap();

        let mut catalog = Catalog::new();
        match catalog.load_yaml(&path) {
            Err(Error::CatalogLoad { path: origin, error }) => {
                assert_eq!(origin, path.display().to_string());
                assert!(error.contains("scenario 'bad'"), "{}", error);
                assert!(error.contains("../up"), "{}", error);
            }
            other => panic!("Expected catalog load error, got {:?}", other),
        }
        assert!(catalog.list().is_empty());
    }

    #[test]
    fn test_load_yaml_rejects_unknown_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("typo.yaml");
        std::fs::write(
            &path,
            "scenarios:\n  - name: typo\n    mutates:\n      - side: client\n        op: mkdir\n        path: extra\n",
        )
        .unwrap();

        let mut catalog = Catalog::new();
        match catalog.load_yaml(&path) {
            Err(Error::CatalogLoad { error, .. }) => {
                assert!(error.contains("mutates"), "{}", error)
            }
            other => panic!("Expected catalog load error, got {:?}", other),
        }
    }
}
