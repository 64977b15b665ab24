//! Dynamic record chains for values longer than one record slot

use super::{RecordLoad, RecordStore};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::kind::StoreKind;
use crate::record::{DYNAMIC_HEADER_SIZE, DynamicRecord, NO_ID, Record};
use roaring::RoaringTreemap;
use std::path::Path;
use tracing::warn;

/// Blocks needed for `len` bytes at `capacity` bytes per block.
///
/// An empty value still takes one block.
pub fn block_count(len: usize, capacity: usize) -> usize {
    len.div_ceil(capacity).max(1)
}

/// Store of fixed-capacity blocks linked into chains
#[derive(Debug)]
pub struct DynamicRecordStore {
    store: RecordStore<DynamicRecord>,
    capacity: usize,
}

impl DynamicRecordStore {
    /// Create an empty dynamic store
    pub fn create(config: &StoreConfig, dir: &Path, kind: StoreKind) -> Result<Self> {
        Self::check_kind(kind)?;
        Ok(Self::wrap(RecordStore::create(config, dir, kind)?))
    }

    /// Open an existing dynamic store
    pub fn open(config: &StoreConfig, dir: &Path, kind: StoreKind) -> Result<Self> {
        Self::check_kind(kind)?;
        Ok(Self::wrap(RecordStore::open(config, dir, kind)?))
    }

    fn check_kind(kind: StoreKind) -> Result<()> {
        if kind.is_dynamic() {
            Ok(())
        } else {
            Err(Error::config(format!("{kind} is not a dynamic store")))
        }
    }

    fn wrap(store: RecordStore<DynamicRecord>) -> Self {
        let capacity = store.record_size() - DYNAMIC_HEADER_SIZE;
        Self { store, capacity }
    }

    /// Underlying block store
    pub fn records(&self) -> &RecordStore<DynamicRecord> {
        &self.store
    }

    /// Payload bytes per block
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Split `bytes` into blocks, write them, and return the head id
    ///
    /// On failure every id taken for the chain goes back to the generator.
    pub fn allocate_chain(&self, bytes: &[u8]) -> Result<u64> {
        let count = block_count(bytes.len(), self.capacity);
        let mut ids = Vec::with_capacity(count);
        let outcome = self
            .take_ids(count, &mut ids)
            .and_then(|()| self.write_chain(&ids, bytes));
        if let Err(error) = outcome {
            self.release(&ids);
            return Err(error);
        }
        Ok(ids[0])
    }

    fn take_ids(&self, count: usize, ids: &mut Vec<u64>) -> Result<()> {
        for _ in 0..count {
            ids.push(self.store.next_id()?);
        }
        Ok(())
    }

    /// Clear and free blocks of a chain that was never completed
    fn release(&self, ids: &[u64]) {
        let kind = self.store.kind();
        for &id in ids {
            if let Ok(mut block) = self.store.read_with(id, RecordLoad::Force) {
                if block.in_use() {
                    block.set_in_use(false);
                    if let Err(error) = self.store.write(id, &block) {
                        warn!(kind = %kind, id, error = %error, "failed to clear block of a partial chain");
                    }
                }
            }
            if let Err(error) = self.store.free_id(id) {
                warn!(kind = %kind, id, error = %error, "failed to free block id of a partial chain");
            }
        }
    }

    /// Write `bytes` as a chain over exactly the given block ids, in order.
    ///
    /// `ids` must hold [`block_count`] ids. The tail is written first so the
    /// head never points at a block that is not yet written.
    pub fn write_chain(&self, ids: &[u64], bytes: &[u8]) -> Result<()> {
        let count = block_count(bytes.len(), self.capacity);
        if ids.len() != count {
            return Err(Error::storage(format!(
                "{} needs {count} blocks for {} bytes, got {} ids",
                self.store.kind(),
                bytes.len(),
                ids.len()
            )));
        }
        let mut chunks: Vec<&[u8]> = bytes.chunks(self.capacity).collect();
        if chunks.is_empty() {
            chunks.push(&[]);
        }
        for (i, (&id, chunk)) in ids.iter().zip(chunks).enumerate().rev() {
            let next = ids.get(i + 1).copied().unwrap_or(NO_ID);
            self.store.write(id, &DynamicRecord::new(chunk.to_vec(), next))?;
        }
        Ok(())
    }

    /// Block ids of the chain starting at `head`, in order
    pub fn chain_ids(&self, head: u64) -> Result<Vec<u64>> {
        Ok(self.walk(head)?.into_iter().map(|(id, _)| id).collect())
    }

    /// Concatenated payload of the chain starting at `head`
    pub fn read_chain(&self, head: u64) -> Result<Vec<u8>> {
        let mut bytes = Vec::new();
        for (_, block) in self.walk(head)? {
            bytes.extend_from_slice(&block.payload);
        }
        Ok(bytes)
    }

    /// Release every block of the chain starting at `head`
    pub fn free_chain(&self, head: u64) -> Result<()> {
        for id in self.chain_ids(head)? {
            self.store.delete(id)?;
        }
        Ok(())
    }

    fn walk(&self, head: u64) -> Result<Vec<(u64, DynamicRecord)>> {
        let kind = self.store.kind();
        let mut visited = RoaringTreemap::new();
        let mut blocks = Vec::new();
        let mut current = head;
        while current != NO_ID {
            let id = current;
            if !visited.insert(id) {
                return Err(Error::broken_chain(kind, id, "cycle detected"));
            }
            let block = self
                .store
                .read_with(id, RecordLoad::Force)
                .map_err(|e| match e {
                    Error::InvalidRecord { reason, .. } => Error::broken_chain(kind, id, reason),
                    other => other,
                })?;
            if !block.in_use() {
                return Err(Error::broken_chain(kind, id, "block not in use"));
            }
            if block.next_block != NO_ID && block.len() != self.capacity {
                return Err(Error::broken_chain(
                    kind,
                    id,
                    format!(
                        "inner block holds {} bytes, capacity is {}",
                        block.len(),
                        self.capacity
                    ),
                ));
            }
            current = block.next_block;
            blocks.push((id, block));
        }
        Ok(blocks)
    }

    /// Flush block data to stable storage
    pub fn flush(&self) -> Result<()> {
        self.store.flush()
    }

    /// Flush and close
    pub fn close(self) -> Result<()> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{EphemeralFileSystem, FileSystemAbstraction};
    use crate::testing::FaultyFileSystem;
    use std::sync::Arc;

    fn store(capacity: usize) -> DynamicRecordStore {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/db")).unwrap();
        let mut config = StoreConfig::ephemeral(fs);
        config.settings.string_block_size = capacity;
        DynamicRecordStore::create(&config, Path::new("/db"), StoreKind::PropertyString).unwrap()
    }

    #[test]
    fn test_block_count() {
        assert_eq!(block_count(0, 8), 1);
        assert_eq!(block_count(8, 8), 1);
        assert_eq!(block_count(9, 8), 2);
        assert_eq!(block_count(16, 8), 2);
    }

    #[test]
    fn test_empty_value_single_block() {
        let store = store(8);
        let head = store.allocate_chain(&[]).unwrap();
        assert_eq!(store.chain_ids(head).unwrap().len(), 1);
        assert_eq!(store.read_chain(head).unwrap(), Vec::<u8>::new());
    }

    #[test]
    fn test_exact_capacity_no_trailing_block() {
        let store = store(8);
        let head = store.allocate_chain(b"12345678").unwrap();
        assert_eq!(store.chain_ids(head).unwrap(), vec![head]);
        let block = store.records().read(head).unwrap();
        assert_eq!(block.next_block, NO_ID);
    }

    #[test]
    fn test_multi_block_round_trip_and_free() {
        let store = store(8);
        let value: Vec<u8> = (0..=200u8).collect();
        let head = store.allocate_chain(&value).unwrap();
        let ids = store.chain_ids(head).unwrap();
        assert_eq!(ids.len(), block_count(value.len(), 8));
        assert_eq!(store.read_chain(head).unwrap(), value);

        store.free_chain(head).unwrap();
        assert!(matches!(
            store.read_chain(head),
            Err(Error::BrokenChain { .. })
        ));
        assert_eq!(store.records().ids().free_id_count(), ids.len() as u64);
    }

    #[test]
    fn test_failed_allocation_returns_ids() {
        let faulty = FaultyFileSystem::new(Arc::new(EphemeralFileSystem::new()));
        faulty.create_dir_all(Path::new("/db")).unwrap();
        let mut config = StoreConfig::ephemeral(EphemeralFileSystem::new())
            .with_fs(Arc::new(faulty.clone()));
        config.settings.string_block_size = 4;
        let store =
            DynamicRecordStore::create(&config, Path::new("/db"), StoreKind::PropertyString)
                .unwrap();

        faulty.fail_writes_after("/db", 1);
        assert!(store.allocate_chain(b"abcdefghijkl").is_err());
        assert_eq!(store.records().ids().free_id_count(), 3);

        faulty.clear();
        let head = store.allocate_chain(b"mnopqrstuvwx").unwrap();
        assert_eq!(store.read_chain(head).unwrap(), b"mnopqrstuvwx".to_vec());
        assert_eq!(store.records().high_id(), 3);
        assert_eq!(store.records().ids().free_id_count(), 0);
    }

    #[test]
    fn test_dangling_pointer_is_broken_chain() {
        let store = store(4);
        store
            .records()
            .write(0, &DynamicRecord::new(b"abcd".to_vec(), 99))
            .unwrap();
        let err = store.read_chain(0).unwrap_err();
        assert!(matches!(err, Error::BrokenChain { id: 99, .. }));
    }

    #[test]
    fn test_cycle_detected() {
        let store = store(4);
        store
            .records()
            .write(0, &DynamicRecord::new(b"abcd".to_vec(), 1))
            .unwrap();
        store
            .records()
            .write(1, &DynamicRecord::new(b"efgh".to_vec(), 0))
            .unwrap();
        let err = store.read_chain(0).unwrap_err();
        assert!(matches!(err, Error::BrokenChain { id: 0, .. }));
    }

    #[test]
    fn test_short_inner_block_rejected() {
        let store = store(4);
        store
            .records()
            .write(0, &DynamicRecord::new(b"ab".to_vec(), 1))
            .unwrap();
        store
            .records()
            .write(1, &DynamicRecord::new(b"cd".to_vec(), NO_ID))
            .unwrap();
        assert!(store.read_chain(0).is_err());
    }

    #[test]
    fn test_reopen_keeps_capacity() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/db")).unwrap();
        let mut config = StoreConfig::ephemeral(fs);
        config.settings.array_block_size = 12;
        let dir = Path::new("/db");
        let head = {
            let store = DynamicRecordStore::create(&config, dir, StoreKind::PropertyArray).unwrap();
            let head = store.allocate_chain(&[7u8; 30]).unwrap();
            store.close().unwrap();
            head
        };

        config.settings.array_block_size = 64;
        let store = DynamicRecordStore::open(&config, dir, StoreKind::PropertyArray).unwrap();
        assert_eq!(store.capacity(), 12);
        assert_eq!(store.read_chain(head).unwrap(), vec![7u8; 30]);
        assert!(store.records().read(head).unwrap().in_use());
    }

    #[test]
    fn test_not_dynamic_kind() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/db")).unwrap();
        let config = StoreConfig::ephemeral(fs);
        assert!(DynamicRecordStore::create(&config, Path::new("/db"), StoreKind::Node).is_err());
    }
}
