//! Store configuration
//!
//! [`StoreConfig`] carries the collaborators a store needs (file system and
//! id generator factory) plus the tunable [`StoreSettings`]. It is built once
//! and handed to [`GraphStore`](crate::store::GraphStore) and the migrator;
//! nothing is looked up globally.

use crate::error::{Error, Result};
use crate::fs::{DefaultFileSystem, EphemeralFileSystem, FileSystemAbstraction};
use crate::id::{DefaultIdGeneratorFactory, IdGeneratorFactory};
use crate::kind::StoreKind;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Largest dynamic block payload a store may be created with
pub const MAX_BLOCK_SIZE: usize = 64 * 1024;

/// Tunable store settings, loadable from TOML or JSON
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    /// Number of free ids moved between the id file and memory per batch
    pub grab_size: usize,
    /// Payload capacity of string property blocks
    pub string_block_size: usize,
    /// Payload capacity of array property blocks
    pub array_block_size: usize,
    /// Payload capacity of token name blocks
    pub name_block_size: usize,
    /// Migrate legacy stores in place when opened through `open_store`
    pub allow_store_upgrade: bool,
    /// Run per-store migration passes on the rayon pool
    pub parallel_migration: bool,
    /// Records copied between cancellation checks
    pub migration_batch_size: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            grab_size: 64,
            string_block_size: 128,
            array_block_size: 128,
            name_block_size: 30,
            allow_store_upgrade: false,
            parallel_migration: true,
            migration_batch_size: 1024,
        }
    }
}

impl StoreSettings {
    /// Reject settings no store can be built with
    pub fn validate(&self) -> Result<()> {
        if self.grab_size == 0 {
            return Err(Error::config("grab_size must be at least 1"));
        }
        if self.migration_batch_size == 0 {
            return Err(Error::config("migration_batch_size must be at least 1"));
        }
        for (name, size) in [
            ("string_block_size", self.string_block_size),
            ("array_block_size", self.array_block_size),
            ("name_block_size", self.name_block_size),
        ] {
            if size == 0 || size > MAX_BLOCK_SIZE {
                return Err(Error::config(format!(
                    "{name} must be between 1 and {MAX_BLOCK_SIZE}, got {size}"
                )));
            }
        }
        Ok(())
    }

    /// Block payload capacity for a dynamic store kind
    pub fn block_size(&self, kind: StoreKind) -> Option<usize> {
        match kind {
            StoreKind::PropertyString => Some(self.string_block_size),
            StoreKind::PropertyArray => Some(self.array_block_size),
            StoreKind::RelationshipTypeName | StoreKind::PropertyKeyName => {
                Some(self.name_block_size)
            }
            _ => None,
        }
    }
}

/// Collaborators and settings injected into every store
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// File system all store files are reached through
    pub fs: Arc<dyn FileSystemAbstraction>,
    /// Factory for per-store id generators
    pub id_generator_factory: Arc<dyn IdGeneratorFactory>,
    /// Tunable settings
    pub settings: StoreSettings,
}

impl StoreConfig {
    /// Build a configuration from explicit collaborators
    pub fn new(
        fs: Arc<dyn FileSystemAbstraction>,
        id_generator_factory: Arc<dyn IdGeneratorFactory>,
        settings: StoreSettings,
    ) -> Self {
        Self {
            fs,
            id_generator_factory,
            settings,
        }
    }

    /// Configuration over the host file system with default settings
    pub fn on_disk() -> Self {
        Self::new(
            Arc::new(DefaultFileSystem),
            Arc::new(DefaultIdGeneratorFactory::new()),
            StoreSettings::default(),
        )
    }

    /// Configuration over the given in-memory file system
    pub fn ephemeral(fs: EphemeralFileSystem) -> Self {
        Self::new(
            Arc::new(fs),
            Arc::new(DefaultIdGeneratorFactory::new()),
            StoreSettings::default(),
        )
    }

    /// Replace the settings
    pub fn with_settings(mut self, settings: StoreSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Replace the file system
    pub fn with_fs(mut self, fs: Arc<dyn FileSystemAbstraction>) -> Self {
        self.fs = fs;
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::on_disk()
    }
}
