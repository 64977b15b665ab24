use super::IdGenerator;
use crate::error::Result;
use crate::fs::FileSystemAbstraction;
use crate::kind::StoreKind;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Creates and opens the id generators of a store
pub trait IdGeneratorFactory: Send + Sync + fmt::Debug {
    /// Create a fresh id file at `path`
    fn create(
        &self,
        fs: &dyn FileSystemAbstraction,
        path: &Path,
        kind: StoreKind,
        high_id: u64,
        grab_size: usize,
    ) -> Result<Arc<IdGenerator>>;

    /// Open an existing id file at `path`
    fn open(
        &self,
        fs: &dyn FileSystemAbstraction,
        path: &Path,
        kind: StoreKind,
        store_high_id: u64,
        grab_size: usize,
    ) -> Result<Arc<IdGenerator>>;

    /// Generator currently serving the id file at `path`, if still alive
    fn get(&self, path: &Path) -> Option<Arc<IdGenerator>>;
}

/// Factory backed by [`IdGenerator`] files, tracking live generators by path
#[derive(Default)]
pub struct DefaultIdGeneratorFactory {
    generators: Mutex<HashMap<PathBuf, Weak<IdGenerator>>>,
}

impl DefaultIdGeneratorFactory {
    /// Create a factory with no live generators
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, generator: IdGenerator) -> Arc<IdGenerator> {
        let generator = Arc::new(generator);
        let mut generators = self.generators.lock();
        generators.retain(|_, weak| weak.strong_count() > 0);
        generators.insert(generator.path().to_path_buf(), Arc::downgrade(&generator));
        generator
    }
}

impl fmt::Debug for DefaultIdGeneratorFactory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DefaultIdGeneratorFactory")
            .field("live", &self.generators.lock().len())
            .finish()
    }
}

impl IdGeneratorFactory for DefaultIdGeneratorFactory {
    fn create(
        &self,
        fs: &dyn FileSystemAbstraction,
        path: &Path,
        kind: StoreKind,
        high_id: u64,
        grab_size: usize,
    ) -> Result<Arc<IdGenerator>> {
        let generator = IdGenerator::create(fs, path, kind, high_id, grab_size)?;
        Ok(self.register(generator))
    }

    fn open(
        &self,
        fs: &dyn FileSystemAbstraction,
        path: &Path,
        kind: StoreKind,
        store_high_id: u64,
        grab_size: usize,
    ) -> Result<Arc<IdGenerator>> {
        let generator = IdGenerator::open(fs, path, kind, store_high_id, grab_size)?;
        Ok(self.register(generator))
    }

    fn get(&self, path: &Path) -> Option<Arc<IdGenerator>> {
        self.generators.lock().get(path).and_then(Weak::upgrade)
    }
}
