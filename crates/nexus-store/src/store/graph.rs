//! Store handle over a whole store directory

use super::{
    DynamicRecordStore, FormatVersion, NodeStore, PropertyStore, RecordStore, RelationshipStore,
    TokenStore,
};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::kind::StoreKind;
use crate::migration::{self, MigrationStatus};
use crate::record::{
    DynamicRecord, FieldValues, NO_ID, NodeRecord, PropertyRecord, Record, RelationshipRecord,
    TokenRecord,
};
use crate::value::PropertyValue;
use roaring::RoaringTreemap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A record of any store kind
#[derive(Debug, Clone, PartialEq)]
pub enum StoreRecord {
    /// Node record
    Node(NodeRecord),
    /// Relationship record
    Relationship(RelationshipRecord),
    /// Property record
    Property(PropertyRecord),
    /// Relationship type or property key token
    Token(TokenRecord),
    /// Dynamic block of any dynamic store
    Dynamic(DynamicRecord),
}

impl StoreRecord {
    /// Whether the wrapped record is in use
    pub fn in_use(&self) -> bool {
        match self {
            StoreRecord::Node(r) => r.in_use(),
            StoreRecord::Relationship(r) => r.in_use(),
            StoreRecord::Property(r) => r.in_use(),
            StoreRecord::Token(r) => r.in_use(),
            StoreRecord::Dynamic(r) => r.in_use(),
        }
    }

    /// Logical fields of the wrapped record
    pub fn to_fields(&self) -> FieldValues {
        match self {
            StoreRecord::Node(r) => r.to_fields(),
            StoreRecord::Relationship(r) => r.to_fields(),
            StoreRecord::Property(r) => r.to_fields(),
            StoreRecord::Token(r) => r.to_fields(),
            StoreRecord::Dynamic(r) => r.to_fields(),
        }
    }
}

/// Per-store counts
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// In-use records per store
    pub in_use: BTreeMap<StoreKind, u64>,
    /// Allocation watermark per store
    pub high_ids: BTreeMap<StoreKind, u64>,
}

/// All stores of one directory, opened together
///
/// This is the handle higher layers use: tagged [`read`](GraphStore::read) and
/// [`write`](GraphStore::write) over any store kind, plus graph-level helpers
/// that keep relationship and property chains consistent.
#[derive(Debug)]
pub struct GraphStore {
    dir: PathBuf,
    config: StoreConfig,
    nodes: NodeStore,
    relationships: RelationshipStore,
    properties: PropertyStore,
    relationship_types: TokenStore,
    property_keys: TokenStore,
}

/// Handle returned by [`open_store`]
pub type StoreHandle = GraphStore;

impl GraphStore {
    /// Create a new, empty store directory
    pub fn create(dir: &Path, config: StoreConfig) -> Result<Self> {
        config.settings.validate()?;
        let fs = config.fs.as_ref();
        if fs.exists(dir) && !fs.list_dir(dir)?.is_empty() {
            return Err(Error::storage(format!(
                "{} is not empty",
                dir.display()
            )));
        }
        fs.create_dir_all(dir)?;

        let store = Self {
            dir: dir.to_path_buf(),
            nodes: RecordStore::create(&config, dir, StoreKind::Node)?,
            relationships: RecordStore::create(&config, dir, StoreKind::Relationship)?,
            properties: PropertyStore::create(&config, dir)?,
            relationship_types: TokenStore::create(&config, dir, StoreKind::RelationshipType)?,
            property_keys: TokenStore::create(&config, dir, StoreKind::PropertyKey)?,
            config,
        };
        info!(path = %dir.display(), version = %FormatVersion::CURRENT, "created store");
        Ok(store)
    }

    /// Open an existing store in the current format.
    ///
    /// A store in an older format fails with [`Error::StoreVersionMismatch`];
    /// see [`open_store`] for upgrading on open.
    pub fn open(dir: &Path, config: StoreConfig) -> Result<Self> {
        config.settings.validate()?;
        let store = Self {
            dir: dir.to_path_buf(),
            nodes: RecordStore::open(&config, dir, StoreKind::Node)?,
            relationships: RecordStore::open(&config, dir, StoreKind::Relationship)?,
            properties: PropertyStore::open(&config, dir)?,
            relationship_types: TokenStore::open(&config, dir, StoreKind::RelationshipType)?,
            property_keys: TokenStore::open(&config, dir, StoreKind::PropertyKey)?,
            config,
        };
        info!(
            path = %dir.display(),
            nodes = store.nodes.high_id(),
            relationships = store.relationships.high_id(),
            "opened store"
        );
        Ok(store)
    }

    /// Store directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Configuration the store was opened with
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Node store
    pub fn nodes(&self) -> &NodeStore {
        &self.nodes
    }

    /// Relationship store
    pub fn relationships(&self) -> &RelationshipStore {
        &self.relationships
    }

    /// Property store with its string and array stores
    pub fn properties(&self) -> &PropertyStore {
        &self.properties
    }

    /// Relationship type tokens
    pub fn relationship_types(&self) -> &TokenStore {
        &self.relationship_types
    }

    /// Property key tokens
    pub fn property_keys(&self) -> &TokenStore {
        &self.property_keys
    }

    /// Dynamic store of a dynamic kind
    pub fn dynamic_store(&self, kind: StoreKind) -> Option<&DynamicRecordStore> {
        match kind {
            StoreKind::PropertyString => Some(self.properties.strings()),
            StoreKind::PropertyArray => Some(self.properties.arrays()),
            StoreKind::RelationshipTypeName => Some(self.relationship_types.names()),
            StoreKind::PropertyKeyName => Some(self.property_keys.names()),
            _ => None,
        }
    }

    pub(crate) fn token_store(&self, kind: StoreKind) -> Option<&TokenStore> {
        match kind {
            StoreKind::RelationshipType => Some(&self.relationship_types),
            StoreKind::PropertyKey => Some(&self.property_keys),
            _ => None,
        }
    }

    /// Read an in-use record of any kind
    pub fn read(&self, kind: StoreKind, id: u64) -> Result<StoreRecord> {
        Ok(match kind {
            StoreKind::Node => StoreRecord::Node(self.nodes.read(id)?),
            StoreKind::Relationship => StoreRecord::Relationship(self.relationships.read(id)?),
            StoreKind::Property => StoreRecord::Property(self.properties.records().read(id)?),
            StoreKind::RelationshipType | StoreKind::PropertyKey => {
                let tokens = self.token_store(kind).ok_or_else(|| unreachable_kind(kind))?;
                StoreRecord::Token(tokens.records().read(id)?)
            }
            _ => {
                let store = self.dynamic_store(kind).ok_or_else(|| unreachable_kind(kind))?;
                StoreRecord::Dynamic(store.records().read(id)?)
            }
        })
    }

    /// Write a record of any kind; the variant must match the kind
    pub fn write(&self, kind: StoreKind, id: u64, record: StoreRecord) -> Result<()> {
        match (kind, record) {
            (StoreKind::Node, StoreRecord::Node(r)) => self.nodes.write(id, &r),
            (StoreKind::Relationship, StoreRecord::Relationship(r)) => {
                self.relationships.write(id, &r)
            }
            (StoreKind::Property, StoreRecord::Property(r)) => {
                self.properties.records().write(id, &r)
            }
            (StoreKind::RelationshipType | StoreKind::PropertyKey, StoreRecord::Token(r)) => self
                .token_store(kind)
                .ok_or_else(|| unreachable_kind(kind))?
                .records()
                .write(id, &r),
            (kind, StoreRecord::Dynamic(r)) if kind.is_dynamic() => self
                .dynamic_store(kind)
                .ok_or_else(|| unreachable_kind(kind))?
                .records()
                .write(id, &r),
            (kind, record) => Err(Error::invalid_record(
                kind,
                id,
                format!("cannot store {record:?} in {kind}"),
            )),
        }
    }

    /// Allocate an id in the store of `kind`
    pub fn next_id(&self, kind: StoreKind) -> Result<u64> {
        match kind {
            StoreKind::Node => self.nodes.next_id(),
            StoreKind::Relationship => self.relationships.next_id(),
            StoreKind::Property => self.properties.records().next_id(),
            StoreKind::RelationshipType | StoreKind::PropertyKey => self
                .token_store(kind)
                .ok_or_else(|| unreachable_kind(kind))?
                .records()
                .next_id(),
            _ => self
                .dynamic_store(kind)
                .ok_or_else(|| unreachable_kind(kind))?
                .records()
                .next_id(),
        }
    }

    /// Create a node with labels
    pub fn create_node(&self, labels: &[u32]) -> Result<u64> {
        self.nodes.create_node(labels)
    }

    /// Delete a node and its properties. Refused while it has relationships.
    pub fn delete_node(&self, id: u64) -> Result<()> {
        let node = self.nodes.read(id)?;
        if node.next_rel != NO_ID {
            return Err(Error::invalid_record(
                StoreKind::Node,
                id,
                "node still has relationships",
            ));
        }
        self.properties.delete_chain(node.next_prop)?;
        self.nodes.delete(id)
    }

    /// Create a relationship of the named type
    pub fn create_relationship(&self, from: u64, to: u64, rel_type: &str) -> Result<u64> {
        let type_id = self.relationship_types.get_or_create(rel_type)?;
        self.relationships
            .create_relationship(&self.nodes, from, to, type_id)
    }

    /// Unlink and delete a relationship and its properties
    pub fn delete_relationship(&self, id: u64) -> Result<()> {
        let rel = self.relationships.delete_relationship(&self.nodes, id)?;
        self.properties.delete_chain(rel.next_prop)
    }

    /// Relationship ids of a node, most recent first
    pub fn relationships_of(&self, node: u64) -> Result<Vec<u64>> {
        self.relationships.relationships_of(&self.nodes, node)
    }

    /// Set a node property
    pub fn set_node_property(&self, node: u64, key: &str, value: PropertyValue) -> Result<()> {
        let key_id = self.property_keys.get_or_create(key)?;
        let head = self.nodes.read(node)?.next_prop;
        let head = self.properties.set(head, key_id, &value)?;
        self.nodes.set_property_head(node, head)
    }

    /// Remove a node property; returns whether it existed
    pub fn remove_node_property(&self, node: u64, key: &str) -> Result<bool> {
        let Some(key_id) = self.property_keys.id_of(key) else {
            return Ok(false);
        };
        let head = self.nodes.read(node)?.next_prop;
        let (head, removed) = self.properties.remove(head, key_id)?;
        self.nodes.set_property_head(node, head)?;
        Ok(removed)
    }

    /// Set a relationship property
    pub fn set_relationship_property(
        &self,
        rel: u64,
        key: &str,
        value: PropertyValue,
    ) -> Result<()> {
        let key_id = self.property_keys.get_or_create(key)?;
        let mut record = self.relationships.read(rel)?;
        let head = self.properties.set(record.next_prop, key_id, &value)?;
        if head != record.next_prop {
            record.next_prop = head;
            self.relationships.write(rel, &record)?;
        }
        Ok(())
    }

    /// Properties of a node by key name
    pub fn node_properties(&self, node: u64) -> Result<BTreeMap<String, PropertyValue>> {
        self.named_properties(self.nodes.read(node)?.next_prop)
    }

    /// Properties of a relationship by key name
    pub fn relationship_properties(&self, rel: u64) -> Result<BTreeMap<String, PropertyValue>> {
        self.named_properties(self.relationships.read(rel)?.next_prop)
    }

    fn named_properties(&self, head: u64) -> Result<BTreeMap<String, PropertyValue>> {
        self.properties
            .properties(head)?
            .into_iter()
            .map(|(key_id, value)| Ok((self.property_keys.name_of(key_id)?, value)))
            .collect()
    }

    /// Name of a relationship's type
    pub fn relationship_type_name(&self, rel: u64) -> Result<String> {
        let record = self.relationships.read(rel)?;
        self.relationship_types.name_of(record.type_id)
    }

    /// Ids of the in-use records of one store
    pub fn in_use_ids(&self, kind: StoreKind) -> Result<RoaringTreemap> {
        match kind {
            StoreKind::Node => self.nodes.in_use_ids(),
            StoreKind::Relationship => self.relationships.in_use_ids(),
            StoreKind::Property => self.properties.records().in_use_ids(),
            StoreKind::RelationshipType | StoreKind::PropertyKey => self
                .token_store(kind)
                .ok_or_else(|| unreachable_kind(kind))?
                .records()
                .in_use_ids(),
            _ => self
                .dynamic_store(kind)
                .ok_or_else(|| unreachable_kind(kind))?
                .records()
                .in_use_ids(),
        }
    }

    /// Allocation watermark of one store
    pub fn high_id(&self, kind: StoreKind) -> Result<u64> {
        Ok(match kind {
            StoreKind::Node => self.nodes.high_id(),
            StoreKind::Relationship => self.relationships.high_id(),
            StoreKind::Property => self.properties.records().high_id(),
            StoreKind::RelationshipType | StoreKind::PropertyKey => self
                .token_store(kind)
                .ok_or_else(|| unreachable_kind(kind))?
                .records()
                .high_id(),
            _ => self
                .dynamic_store(kind)
                .ok_or_else(|| unreachable_kind(kind))?
                .records()
                .high_id(),
        })
    }

    /// In-use counts and watermarks of every store
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        for kind in StoreKind::ALL {
            stats.in_use.insert(kind, self.in_use_ids(kind)?.len());
            stats.high_ids.insert(kind, self.high_id(kind)?);
        }
        Ok(stats)
    }

    /// Flush every store
    pub fn flush(&self) -> Result<()> {
        self.nodes.flush()?;
        self.relationships.flush()?;
        self.properties.flush()?;
        self.relationship_types.flush()?;
        self.property_keys.flush()
    }

    /// Flush and close every store, persisting id files
    pub fn close(self) -> Result<()> {
        self.nodes.close()?;
        self.relationships.close()?;
        self.properties.close()?;
        self.relationship_types.close()?;
        self.property_keys.close()?;
        info!(path = %self.dir.display(), "closed store");
        Ok(())
    }
}

fn unreachable_kind(kind: StoreKind) -> Error {
    Error::storage(format!("no store for {kind}"))
}

/// Open the store at `dir`, creating it when missing or empty.
///
/// A store in an older supported format is migrated in place first when
/// `allow_store_upgrade` is set, and refused with
/// [`Error::StoreVersionMismatch`] otherwise.
pub fn open_store(dir: &Path, config: StoreConfig) -> Result<StoreHandle> {
    let fs = config.fs.as_ref();
    if !fs.exists(dir) || fs.list_dir(dir)?.is_empty() {
        return GraphStore::create(dir, config);
    }

    let version = migration::detect_version(fs, dir)?;
    if version.is_current() {
        return GraphStore::open(dir, config);
    }
    if !config.settings.allow_store_upgrade {
        let kind = StoreKind::Node;
        return Err(Error::StoreVersionMismatch {
            path: dir.join(kind.file_name()),
            expected: FormatVersion::CURRENT.marker(kind),
            found: version.marker(kind),
        });
    }

    warn!(path = %dir.display(), from = %version, "upgrading store in place");
    let staging = migration::upgrade_staging_dir(dir);
    let result = migration::migrate(dir, &staging, &config);
    match result.status {
        MigrationStatus::Committed => GraphStore::open(dir, config),
        _ => Err(result.into_error()),
    }
}
