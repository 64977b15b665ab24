//! Legacy store fixtures
//!
//! Graphs are built through the regular [`GraphStore`] API on an in-memory
//! file system, with the block capacities of the legacy format, and then
//! re-encoded record by record in the legacy layouts.

use crate::config::{StoreConfig, StoreSettings};
use crate::error::{Error, Result};
use crate::fs::{EphemeralFileSystem, FileSystemAbstraction, OpenMode};
use crate::kind::{RecordClass, StoreKind};
use crate::migration::{LegacyIdFile, legacy_block_size, legacy_layout};
use crate::record::{FieldValues, Record};
use crate::store::{FormatVersion, GraphStore, RecordStore, StoreHeader};
use std::path::Path;

const LEGACY: FormatVersion = FormatVersion::V1;

/// Builds `nx-0.1` store directories
#[derive(Debug)]
pub struct LegacyStoreBuilder {
    store: GraphStore,
}

impl LegacyStoreBuilder {
    /// Start from an empty graph
    pub fn new() -> Result<Self> {
        let settings = StoreSettings {
            string_block_size: block_size(StoreKind::PropertyString)?,
            array_block_size: block_size(StoreKind::PropertyArray)?,
            name_block_size: block_size(StoreKind::PropertyKeyName)?,
            ..StoreSettings::default()
        };
        let config = StoreConfig::ephemeral(EphemeralFileSystem::new()).with_settings(settings);
        let store = GraphStore::create(Path::new("/legacy"), config)?;
        Ok(Self { store })
    }

    /// Graph being built
    pub fn store(&self) -> &GraphStore {
        &self.store
    }

    /// Write the graph as a legacy store directory at `dir`
    pub fn write_to(&self, fs: &dyn FileSystemAbstraction, dir: &Path) -> Result<()> {
        self.store.flush()?;
        fs.create_dir_all(dir)?;
        for kind in StoreKind::ALL {
            self.write_store(fs, dir, kind)?;
        }
        Ok(())
    }

    fn write_store(&self, fs: &dyn FileSystemAbstraction, dir: &Path, kind: StoreKind) -> Result<()> {
        let layout = legacy_layout(LEGACY, kind.record_class())
            .ok_or_else(|| Error::storage(format!("no legacy layout for {kind}")))?;
        let slot_size = layout.slot_size(legacy_block_size(LEGACY, kind).unwrap_or(0));
        let records = self.current_records(kind)?;

        let header = StoreHeader::new(kind, LEGACY, slot_size as u32);
        let mut bytes = header.encode().to_vec();
        let mut slot = vec![0u8; slot_size];
        for (fields, payload) in &records {
            layout.encode(fields, payload, &mut slot)?;
            bytes.extend_from_slice(&slot);
        }
        let file = fs.open(&dir.join(kind.file_name()), OpenMode::Truncate)?;
        file.write_at(0, &bytes)?;
        file.sync()?;

        let high_id = self.store.high_id(kind)?;
        let free_ids = (0..high_id)
            .filter(|&id| {
                records
                    .get(id as usize)
                    .is_none_or(|(fields, _)| !fields.in_use())
            })
            .collect();
        LegacyIdFile {
            sticky: false,
            high_id,
            free_ids,
        }
        .write(fs, &dir.join(kind.id_file_name()))
    }

    fn current_records(&self, kind: StoreKind) -> Result<Vec<(FieldValues, Vec<u8>)>> {
        let missing = || Error::storage(format!("no store for {kind}"));
        match kind.record_class() {
            RecordClass::Node => fixed_records(self.store.nodes()),
            RecordClass::Relationship => fixed_records(self.store.relationships()),
            RecordClass::Property => fixed_records(self.store.properties().records()),
            RecordClass::Token => {
                fixed_records(self.store.token_store(kind).ok_or_else(missing)?.records())
            }
            RecordClass::Dynamic => {
                let mut out = Vec::new();
                self.store
                    .dynamic_store(kind)
                    .ok_or_else(missing)?
                    .records()
                    .scan(|_, block| {
                        out.push((block.to_fields(), block.payload));
                        Ok(())
                    })?;
                Ok(out)
            }
        }
    }
}

fn block_size(kind: StoreKind) -> Result<usize> {
    legacy_block_size(LEGACY, kind)
        .ok_or_else(|| Error::config(format!("no legacy block size for {kind}")))
}

fn fixed_records<R: Record>(store: &RecordStore<R>) -> Result<Vec<(FieldValues, Vec<u8>)>> {
    let mut out = Vec::new();
    store.scan(|_, record| {
        out.push((record.to_fields(), Vec::new()));
        Ok(())
    })?;
    Ok(out)
}
