use super::{DynamicRecordStore, RecordStore};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::kind::StoreKind;
use crate::record::{Record, TokenRecord};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

/// Name store paired with each token store
fn names_kind(kind: StoreKind) -> Result<StoreKind> {
    match kind {
        StoreKind::RelationshipType => Ok(StoreKind::RelationshipTypeName),
        StoreKind::PropertyKey => Ok(StoreKind::PropertyKeyName),
        other => Err(Error::config(format!("{other} is not a token store"))),
    }
}

/// Token store: small integer ids for relationship type names or
/// property key names, with an in-memory name index
#[derive(Debug)]
pub struct TokenStore {
    records: RecordStore<TokenRecord>,
    names: DynamicRecordStore,
    by_name: RwLock<HashMap<String, u32>>,
}

impl TokenStore {
    /// Create an empty token store of `kind` and its name store
    pub fn create(config: &StoreConfig, dir: &Path, kind: StoreKind) -> Result<Self> {
        let names_kind = names_kind(kind)?;
        Ok(Self {
            records: RecordStore::create(config, dir, kind)?,
            names: DynamicRecordStore::create(config, dir, names_kind)?,
            by_name: RwLock::new(HashMap::new()),
        })
    }

    /// Open a token store and rebuild its name index
    pub fn open(config: &StoreConfig, dir: &Path, kind: StoreKind) -> Result<Self> {
        let names_kind = names_kind(kind)?;
        let store = Self {
            records: RecordStore::open(config, dir, kind)?,
            names: DynamicRecordStore::open(config, dir, names_kind)?,
            by_name: RwLock::new(HashMap::new()),
        };
        let tokens = store.tokens()?;
        debug!(kind = %kind, tokens = tokens.len(), "loaded tokens");
        *store.by_name.write() = tokens.into_iter().map(|(id, name)| (name, id)).collect();
        Ok(store)
    }

    /// Token record store
    pub fn records(&self) -> &RecordStore<TokenRecord> {
        &self.records
    }

    /// Name store
    pub fn names(&self) -> &DynamicRecordStore {
        &self.names
    }

    /// Id of `name`, creating the token if it does not exist
    pub fn get_or_create(&self, name: &str) -> Result<u32> {
        if let Some(&id) = self.by_name.read().get(name) {
            return Ok(id);
        }
        let mut by_name = self.by_name.write();
        if let Some(&id) = by_name.get(name) {
            return Ok(id);
        }

        let id = self.records.next_id()?;
        let token_id = u32::try_from(id).map_err(|_| Error::IdCapacityExceeded {
            kind: self.records.kind(),
            max_id: self.records.kind().max_id(),
        })?;
        let name_id = self.names.allocate_chain(name.as_bytes())?;
        self.records.write(id, &TokenRecord::new(name_id))?;
        by_name.insert(name.to_string(), token_id);
        Ok(token_id)
    }

    /// Id of an existing token
    pub fn id_of(&self, name: &str) -> Option<u32> {
        self.by_name.read().get(name).copied()
    }

    /// Name of token `id`
    pub fn name_of(&self, id: u32) -> Result<String> {
        let record = self.records.read(u64::from(id))?;
        self.read_name(u64::from(id), &record)
    }

    fn read_name(&self, id: u64, record: &TokenRecord) -> Result<String> {
        let bytes = self.names.read_chain(record.name_id)?;
        String::from_utf8(bytes).map_err(|_| {
            Error::invalid_record(self.records.kind(), id, "token name is not UTF-8")
        })
    }

    /// All in-use tokens as `(id, name)`, ordered by id
    pub fn tokens(&self) -> Result<Vec<(u32, String)>> {
        let mut tokens = Vec::new();
        self.records.scan(|id, record| {
            if record.in_use() {
                tokens.push((id as u32, self.read_name(id, &record)?));
            }
            Ok(())
        })?;
        Ok(tokens)
    }

    /// Flush both stores
    pub fn flush(&self) -> Result<()> {
        self.records.flush()?;
        self.names.flush()
    }

    /// Flush and close both stores
    pub fn close(self) -> Result<()> {
        self.records.close()?;
        self.names.close()
    }
}
