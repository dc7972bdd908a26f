//! Scratch source trees for integration tests

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use tempfile::TempDir;

use cindex::{paths, FileRegistry, UnitStore};

use super::stub_parser::StubParser;

/// Builder for temporary C/C++ source trees
pub struct TestRepo {
    dir: TempDir,
}

impl TestRepo {
    /// Create a new empty test repository
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp dir"),
        }
    }

    /// Get the path to the test repository root
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Add a source file with the given content and return its canonical path
    pub fn add_file(&self, relative_path: &str, content: &str) -> PathBuf {
        let full_path = self.dir.path().join(relative_path);
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).expect("Failed to create parent dirs");
        }
        fs::write(&full_path, content).expect("Failed to write file");
        paths::canonicalize(&full_path).expect("Failed to canonicalize")
    }

    /// Rewrite a file and push its mtime forward so the change is visible
    /// even on filesystems with coarse timestamps
    pub fn touch_with(&self, path: &Path, content: &str) {
        fs::write(path, content).expect("Failed to write file");
        let file = fs::File::options()
            .write(true)
            .open(path)
            .expect("Failed to open file");
        file.set_modified(SystemTime::now() + Duration::from_secs(5))
            .expect("Failed to set mtime");
    }

    pub fn ast_dir(&self) -> PathBuf {
        self.dir.path().join("data").join("ast")
    }

    /// A store over a fresh registry and stub parser
    pub fn stub_store(&self) -> (Arc<UnitStore<StubParser>>, Arc<StubParser>, Arc<FileRegistry>) {
        let parser = StubParser::new();
        let registry = Arc::new(FileRegistry::new());
        let store = Arc::new(UnitStore::new(
            Arc::clone(&parser),
            Arc::clone(&registry),
            self.ast_dir(),
        ));
        (store, parser, registry)
    }
}
