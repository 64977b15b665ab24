//! Storage layer - record stores for nodes, relationships, properties and tokens
//!
//! Neo4j-inspired record stores, one file per [`StoreKind`]:
//! - `nodes.store`: fixed-size node records
//! - `rels.store`: fixed-size relationship records, two chains per record
//! - `props.store`: property records chained per owner
//! - `props.strings.store`, `props.arrays.store`: dynamic blocks for long values
//! - `rel_types.store`, `prop_keys.store` and their `.names.store` companions
//!
//! Every store is a [`RecordStore`]: a header followed by a flat array of
//! fixed-size slots, record `id` at `HEADER_SIZE + id * record_size`. Ids come
//! from the store's [`IdGenerator`], persisted in `<file>.id`.
//!
//! Reads return owned copies; nothing hands out references into store
//! buffers.

mod dynamic;
mod graph;
mod header;
mod node;
mod property;
mod relationship;
mod token;

pub use dynamic::{DynamicRecordStore, block_count};
pub use graph::{GraphStore, StoreHandle, StoreRecord, StoreStats, open_store};
pub use header::{FormatVersion, HEADER_SIZE, StoreHeader};
pub use node::NodeStore;
pub use property::PropertyStore;
pub use relationship::RelationshipStore;
pub use token::TokenStore;

use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::fs::{OpenMode, StoreFile};
use crate::id::IdGenerator;
use crate::kind::StoreKind;
use crate::record::{DYNAMIC_HEADER_SIZE, Record};
use roaring::RoaringTreemap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Records decoded per read when scanning a whole store
const SCAN_BATCH: u64 = 1024;

/// How strictly [`RecordStore::read_with`] treats records not in use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordLoad {
    /// Fail with [`Error::InvalidRecord`] unless the record is in use
    #[default]
    Normal,
    /// Return the record whatever its in-use flag says
    Force,
}

/// Generic fixed-slot record store
pub struct RecordStore<R: Record> {
    kind: StoreKind,
    path: PathBuf,
    header: StoreHeader,
    file: Box<dyn StoreFile>,
    ids: Arc<IdGenerator>,
    _record: PhantomData<fn() -> R>,
}

impl<R: Record> std::fmt::Debug for RecordStore<R> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordStore")
            .field("kind", &self.kind)
            .field("path", &self.path)
            .field("record_size", &self.header.record_size)
            .finish()
    }
}

/// Slot size a new store of `kind` holding `R` is created with
pub fn slot_size<R: Record>(config: &StoreConfig, kind: StoreKind) -> Result<u32> {
    let size = match R::SIZE {
        Some(size) => size,
        None => {
            let capacity = config.settings.block_size(kind).ok_or_else(|| {
                Error::config(format!("{kind} has no dynamic block size"))
            })?;
            DYNAMIC_HEADER_SIZE + capacity
        }
    };
    u32::try_from(size).map_err(|_| Error::config(format!("record size {size} too large")))
}

impl<R: Record> RecordStore<R> {
    /// Create an empty store file and its id file inside `dir`
    pub fn create(config: &StoreConfig, dir: &Path, kind: StoreKind) -> Result<Self> {
        let record_size = slot_size::<R>(config, kind)?;
        let path = dir.join(kind.file_name());
        let header = StoreHeader::new(kind, FormatVersion::CURRENT, record_size);

        let file = config.fs.open(&path, OpenMode::Truncate)?;
        file.write_at(0, &header.encode())?;
        file.sync()?;

        let ids = config.id_generator_factory.create(
            config.fs.as_ref(),
            &dir.join(kind.id_file_name()),
            kind,
            0,
            config.settings.grab_size,
        )?;

        debug!(kind = %kind, record_size, "created store");
        Ok(Self {
            kind,
            path,
            header,
            file,
            ids,
            _record: PhantomData,
        })
    }

    /// Open an existing store in the current format
    pub fn open(config: &StoreConfig, dir: &Path, kind: StoreKind) -> Result<Self> {
        let path = dir.join(kind.file_name());
        let file = config.fs.open(&path, OpenMode::ReadWrite)?;
        let header = StoreHeader::read(file.as_ref(), &path)?;

        if header.kind != kind {
            return Err(Error::storage(format!(
                "{} holds {} records, expected {kind}",
                path.display(),
                header.kind
            )));
        }
        if !header.version.is_current() {
            return Err(Error::StoreVersionMismatch {
                path,
                expected: FormatVersion::CURRENT.marker(kind),
                found: header.version.marker(kind),
            });
        }
        if let Some(size) = R::SIZE {
            if header.record_size as usize != size {
                return Err(Error::storage(format!(
                    "{} declares record size {}, expected {size}",
                    path.display(),
                    header.record_size
                )));
            }
        } else if (header.record_size as usize) <= DYNAMIC_HEADER_SIZE {
            return Err(Error::storage(format!(
                "{} declares block size {} with no payload room",
                path.display(),
                header.record_size
            )));
        }

        let slots = header.slots_in(file.len()?);
        let ids = config.id_generator_factory.open(
            config.fs.as_ref(),
            &dir.join(kind.id_file_name()),
            kind,
            slots,
            config.settings.grab_size,
        )?;

        debug!(kind = %kind, slots, high_id = ids.high_id(), "opened store");
        Ok(Self {
            kind,
            path,
            header,
            file,
            ids,
            _record: PhantomData,
        })
    }

    /// Store kind
    pub fn kind(&self) -> StoreKind {
        self.kind
    }

    /// Path of the store file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes per record slot
    pub fn record_size(&self) -> usize {
        self.header.record_size as usize
    }

    /// Id generator of this store
    pub fn ids(&self) -> &Arc<IdGenerator> {
        &self.ids
    }

    /// Number of record slots currently present in the file
    pub fn slots(&self) -> Result<u64> {
        Ok(self.header.slots_in(self.file.len()?))
    }

    /// Allocate an id for a new record
    pub fn next_id(&self) -> Result<u64> {
        self.ids.next_id()
    }

    /// Return an id for reuse
    pub fn free_id(&self, id: u64) -> Result<()> {
        self.ids.free_id(id)
    }

    /// Allocation watermark
    pub fn high_id(&self) -> u64 {
        self.ids.high_id()
    }

    /// Highest id ever issued, `None` for an empty store
    pub fn highest_id_in_use(&self) -> Option<u64> {
        self.ids.highest_id_in_use()
    }

    /// Read an in-use record
    pub fn read(&self, id: u64) -> Result<R> {
        self.read_with(id, RecordLoad::Normal)
    }

    /// Read a record
    pub fn read_with(&self, id: u64, load: RecordLoad) -> Result<R> {
        let slots = self.slots()?;
        if id >= slots {
            return Err(Error::invalid_record(
                self.kind,
                id,
                format!("beyond store extent of {slots} records"),
            ));
        }
        let mut buf = vec![0u8; self.record_size()];
        self.file.read_at(self.header.offset_of(id), &mut buf)?;
        let record =
            R::decode(&buf).map_err(|e| Error::invalid_record(self.kind, id, e.to_string()))?;
        if load == RecordLoad::Normal && !record.in_use() {
            return Err(Error::invalid_record(self.kind, id, "not in use"));
        }
        Ok(record)
    }

    /// Write a record, growing the file with zero-filled slots as needed
    pub fn write(&self, id: u64, record: &R) -> Result<()> {
        self.ids.mark_used(id)?;
        let mut buf = vec![0u8; self.record_size()];
        record
            .encode(&mut buf)
            .map_err(|e| Error::invalid_record(self.kind, id, e.to_string()))?;
        self.file.write_at(self.header.offset_of(id), &buf)?;
        Ok(())
    }

    /// Mark an in-use record as not in use and release its id
    pub fn delete(&self, id: u64) -> Result<()> {
        let mut record = self.read(id)?;
        record.set_in_use(false);
        self.write(id, &record)?;
        self.ids.free_id(id)
    }

    /// Grow the file to hold at least `slots` records
    pub fn ensure_slots(&self, slots: u64) -> Result<()> {
        if slots == 0 {
            return Ok(());
        }
        let len = self.header.offset_of(slots);
        if self.file.len()? < len {
            self.file.set_len(len)?;
        }
        self.ids.mark_used(slots - 1)
    }

    /// Visit every slot in id order, in use or not
    pub fn scan(&self, mut visit: impl FnMut(u64, R) -> Result<()>) -> Result<()> {
        let slots = self.slots()?;
        let size = self.record_size();
        let mut first = 0;
        while first < slots {
            let count = (slots - first).min(SCAN_BATCH);
            let mut buf = vec![0u8; count as usize * size];
            self.file.read_at(self.header.offset_of(first), &mut buf)?;
            for (i, slot) in buf.chunks_exact(size).enumerate() {
                let id = first + i as u64;
                let record = R::decode(slot)
                    .map_err(|e| Error::invalid_record(self.kind, id, e.to_string()))?;
                visit(id, record)?;
            }
            first += count;
        }
        Ok(())
    }

    /// Ids of all in-use records
    pub fn in_use_ids(&self) -> Result<RoaringTreemap> {
        let mut ids = RoaringTreemap::new();
        self.scan(|id, record| {
            if record.in_use() {
                ids.insert(id);
            }
            Ok(())
        })?;
        Ok(ids)
    }

    /// Flush store data to stable storage
    pub fn flush(&self) -> Result<()> {
        self.file.sync()?;
        Ok(())
    }

    /// Flush and close the store and its id generator
    pub fn close(self) -> Result<()> {
        self.file.sync()?;
        self.ids.close()?;
        debug!(kind = %self.kind, high_id = self.ids.high_id(), "closed store");
        Ok(())
    }
}
