use super::{DynamicRecordStore, RecordStore};
use crate::config::StoreConfig;
use crate::error::{Error, Result};
use crate::kind::StoreKind;
use crate::record::{NO_ID, PropertyRecord};
use crate::value::{PropertyType, PropertyValue};
use roaring::RoaringTreemap;
use std::path::Path;

/// Property records plus the string and array stores holding long values
#[derive(Debug)]
pub struct PropertyStore {
    records: RecordStore<PropertyRecord>,
    strings: DynamicRecordStore,
    arrays: DynamicRecordStore,
}

impl PropertyStore {
    /// Create the property store files in `dir`
    pub fn create(config: &StoreConfig, dir: &Path) -> Result<Self> {
        Ok(Self {
            records: RecordStore::create(config, dir, StoreKind::Property)?,
            strings: DynamicRecordStore::create(config, dir, StoreKind::PropertyString)?,
            arrays: DynamicRecordStore::create(config, dir, StoreKind::PropertyArray)?,
        })
    }

    /// Open the property store files in `dir`
    pub fn open(config: &StoreConfig, dir: &Path) -> Result<Self> {
        Ok(Self {
            records: RecordStore::open(config, dir, StoreKind::Property)?,
            strings: DynamicRecordStore::open(config, dir, StoreKind::PropertyString)?,
            arrays: DynamicRecordStore::open(config, dir, StoreKind::PropertyArray)?,
        })
    }

    /// Property record store
    pub fn records(&self) -> &RecordStore<PropertyRecord> {
        &self.records
    }

    /// String value store
    pub fn strings(&self) -> &DynamicRecordStore {
        &self.strings
    }

    /// Array value store
    pub fn arrays(&self) -> &DynamicRecordStore {
        &self.arrays
    }

    /// Dynamic store holding values of type `kind`, if any
    pub fn dynamic_store(&self, kind: PropertyType) -> Option<&DynamicRecordStore> {
        match kind {
            PropertyType::String => Some(&self.strings),
            PropertyType::Array => Some(&self.arrays),
            _ => None,
        }
    }

    fn value_type(record: &PropertyRecord, id: u64) -> Result<PropertyType> {
        PropertyType::from_tag(u64::from(record.value_type)).ok_or_else(|| {
            Error::invalid_record(
                StoreKind::Property,
                id,
                format!("unknown value type {}", record.value_type),
            )
        })
    }

    /// Encode a value into a new, unlinked property record, writing its
    /// dynamic chain if it has one
    pub fn encode_value(&self, key_id: u32, value: &PropertyValue) -> Result<PropertyRecord> {
        let kind = value.property_type();
        let block = match value.inline_bits() {
            Some(bits) => bits,
            None => {
                let bytes = value.dynamic_bytes().unwrap_or_default();
                let store = self
                    .dynamic_store(kind)
                    .ok_or_else(|| Error::storage(format!("no dynamic store for {kind:?}")))?;
                store.allocate_chain(&bytes)?
            }
        };
        Ok(PropertyRecord::new(key_id, kind.tag(), block))
    }

    /// Decode the value of a property record
    pub fn decode_value(&self, id: u64, record: &PropertyRecord) -> Result<PropertyValue> {
        let kind = Self::value_type(record, id)?;
        let value = match self.dynamic_store(kind) {
            Some(store) => PropertyValue::from_dynamic(kind, store.read_chain(record.prop_block)?),
            None => PropertyValue::from_inline(kind, record.prop_block),
        };
        value.map_err(|e| match e {
            Error::Storage(reason) => Error::invalid_record(StoreKind::Property, id, reason),
            other => other,
        })
    }

    fn free_value(&self, id: u64, record: &PropertyRecord) -> Result<()> {
        let kind = Self::value_type(record, id)?;
        if let Some(store) = self.dynamic_store(kind) {
            store.free_chain(record.prop_block)?;
        }
        Ok(())
    }

    /// Ids of the property chain starting at `head`, in order
    pub fn chain(&self, head: u64) -> Result<Vec<(u64, PropertyRecord)>> {
        let mut visited = RoaringTreemap::new();
        let mut chain = Vec::new();
        let mut current = head;
        while current != NO_ID {
            if !visited.insert(current) {
                return Err(Error::invalid_record(
                    StoreKind::Property,
                    current,
                    "property chain loops",
                ));
            }
            let record = self.records.read(current)?;
            let next = record.next_prop;
            chain.push((current, record));
            current = next;
        }
        Ok(chain)
    }

    /// Property of `key_id` in the chain starting at `head`
    pub fn find(&self, head: u64, key_id: u32) -> Result<Option<(u64, PropertyRecord)>> {
        Ok(self
            .chain(head)?
            .into_iter()
            .find(|(_, record)| record.key_id == key_id))
    }

    /// Decoded `(key, value)` pairs of the chain starting at `head`
    pub fn properties(&self, head: u64) -> Result<Vec<(u32, PropertyValue)>> {
        self.chain(head)?
            .into_iter()
            .map(|(id, record)| Ok((record.key_id, self.decode_value(id, &record)?)))
            .collect()
    }

    /// Set `key_id` in the chain starting at `head`.
    ///
    /// An existing property is rewritten in place; otherwise a new record is
    /// linked in front. Returns the (possibly new) chain head.
    pub fn set(&self, head: u64, key_id: u32, value: &PropertyValue) -> Result<u64> {
        if let Some((id, old)) = self.find(head, key_id)? {
            let mut record = self.encode_value(key_id, value)?;
            record.prev_prop = old.prev_prop;
            record.next_prop = old.next_prop;
            self.records.write(id, &record)?;
            self.free_value(id, &old)?;
            return Ok(head);
        }

        let id = self.records.next_id()?;
        let mut record = self.encode_value(key_id, value)?;
        record.next_prop = head;
        self.records.write(id, &record)?;
        if head != NO_ID {
            let mut old_head = self.records.read(head)?;
            old_head.prev_prop = id;
            self.records.write(head, &old_head)?;
        }
        Ok(id)
    }

    /// Remove `key_id` from the chain starting at `head`.
    ///
    /// Returns the new head and whether anything was removed.
    pub fn remove(&self, head: u64, key_id: u32) -> Result<(u64, bool)> {
        let Some((id, record)) = self.find(head, key_id)? else {
            return Ok((head, false));
        };
        let mut new_head = head;
        if record.prev_prop != NO_ID {
            let mut prev = self.records.read(record.prev_prop)?;
            prev.next_prop = record.next_prop;
            self.records.write(record.prev_prop, &prev)?;
        } else {
            new_head = record.next_prop;
        }
        if record.next_prop != NO_ID {
            let mut next = self.records.read(record.next_prop)?;
            next.prev_prop = record.prev_prop;
            self.records.write(record.next_prop, &next)?;
        }
        self.records.delete(id)?;
        self.free_value(id, &record)?;
        Ok((new_head, true))
    }

    /// Remove every property of the chain starting at `head`
    pub fn delete_chain(&self, head: u64) -> Result<()> {
        for (id, record) in self.chain(head)? {
            self.records.delete(id)?;
            self.free_value(id, &record)?;
        }
        Ok(())
    }

    /// Flush all three stores
    pub fn flush(&self) -> Result<()> {
        self.records.flush()?;
        self.strings.flush()?;
        self.arrays.flush()
    }

    /// Flush and close all three stores
    pub fn close(self) -> Result<()> {
        self.records.close()?;
        self.strings.close()?;
        self.arrays.close()
    }
}

impl PropertyRecord {
    /// Value type tag, if known
    pub fn property_type(&self) -> Option<PropertyType> {
        PropertyType::from_tag(u64::from(self.value_type))
    }
}
