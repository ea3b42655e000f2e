use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use veneer::{LogicalPath, RepoConfig, Repository};

/// Isolated source/overlay pair for repository tests.
#[allow(dead_code)]
pub struct RepoFixture {
    pub temp_dir: TempDir,
    pub source_root: PathBuf,
    pub overlay_root: PathBuf,
}

impl Default for RepoFixture {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(dead_code)]
impl RepoFixture {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let source_root = temp_dir.path().join("source");
        let overlay_root = temp_dir.path().join("overlay");
        fs::create_dir_all(&source_root).expect("Failed to create source root");
        Self {
            temp_dir,
            source_root,
            overlay_root,
        }
    }

    /// Create a fixture and populate the source tree before the repository
    /// ever sees it.
    pub fn with_source<F: FnOnce(&Path)>(setup: F) -> Self {
        let fixture = Self::new();
        setup(&fixture.source_root);
        fixture
    }

    pub fn open(&self) -> Repository {
        Repository::open(RepoConfig {
            source_root: self.source_root.clone(),
            overlay_root: self.overlay_root.clone(),
        })
        .expect("Failed to open repository")
    }

    /// Physical path of materialized content under the overlay.
    pub fn mirror_path(&self, rel: &str) -> PathBuf {
        self.overlay_root.join("mirror").join(rel)
    }

    /// Current contents of the whiteout log ("" if absent).
    pub fn whiteout_log(&self) -> String {
        fs::read_to_string(self.overlay_root.join("deleted")).unwrap_or_default()
    }
}

#[allow(dead_code)]
pub fn lp(path: &str) -> LogicalPath {
    LogicalPath::new(path).expect("valid logical path")
}

/// Write a file under `root`, creating parent directories as needed.
#[allow(dead_code)]
pub fn write_file(root: &Path, rel: &str, content: &str) -> PathBuf {
    let file_path = root.join(rel);
    if let Some(parent) = file_path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent directories");
    }
    fs::write(&file_path, content).expect("Failed to write file");
    file_path
}

/// Sort a listing for order-insensitive comparison.
#[allow(dead_code)]
pub fn sorted(mut names: Vec<String>) -> Vec<String> {
    names.sort();
    names
}
