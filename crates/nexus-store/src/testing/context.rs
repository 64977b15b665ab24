//! TestContext - temporary directory scoped to one test

use crate::config::StoreConfig;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary directory plus an on-disk store configuration
///
/// Everything under [`path`](TestContext::path) is removed when the context
/// is dropped.
///
/// # Example
///
/// ```rust,no_run
/// use nexus_store::store::GraphStore;
/// use nexus_store::testing::TestContext;
///
/// let ctx = TestContext::new();
/// let store = GraphStore::create(&ctx.store_dir(), ctx.config()).unwrap();
/// store.close().unwrap();
/// ```
pub struct TestContext {
    temp_dir: TempDir,
    config: StoreConfig,
}

impl TestContext {
    /// Create a context with a fresh temporary directory
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temporary directory");
        std::fs::create_dir_all(temp_dir.path()).expect("Failed to create test directory");
        Self {
            temp_dir,
            config: StoreConfig::on_disk(),
        }
    }

    /// Root of the temporary directory
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    /// Conventional store directory inside the context; not created
    pub fn store_dir(&self) -> PathBuf {
        self.path().join("graph")
    }

    /// Store configuration over the host file system
    pub fn config(&self) -> StoreConfig {
        self.config.clone()
    }

    /// Keep the directory alive beyond the context
    pub fn into_temp_dir(self) -> TempDir {
        self.temp_dir
    }
}

impl Default for TestContext {
    fn default() -> Self {
        Self::new()
    }
}
