//! Legacy record layouts and a read-only reader over legacy store files
//!
//! Legacy formats are described declaratively: a [`LegacyLayout`] lists where
//! each logical [`Field`] lives inside a record slot. Decoding a slot yields
//! [`FieldValues`], which the field mapping turns into current records.
//!
//! `nx-0.1` records are packed little-endian with 32-bit ids:
//!
//! ```text
//! Node          9 B   in_use u8, next_rel u32, next_prop u32
//! Relationship 33 B   in_use u8, first_node, second_node, type,
//!                     first_prev, first_next, second_prev, second_next, next_prop (u32)
//! Property     25 B   in_use u8, value_type u32, key_id u32, prop_block u64,
//!                     prev_prop u32, next_prop u32
//! Token         5 B   in_use u8, name_id u32
//! Dynamic  9 B + cap  in_use u8, length u32, next_block u32, payload
//! ```

use crate::error::{Error, Result};
use crate::fs::{FileSystemAbstraction, OpenMode, StoreFile};
use crate::kind::{RecordClass, StoreKind};
use crate::record::{Field, FieldValues, NO_ID};
use crate::store::{FormatVersion, StoreHeader};
use roaring::RoaringTreemap;
use std::path::{Path, PathBuf};

/// "No record" sentinel of 32-bit legacy id fields
pub const LEGACY_NO_ID: u64 = u32::MAX as u64;

/// Records decoded per read when scanning a legacy store
const SCAN_BATCH: u64 = 1024;

/// Encoded width of a legacy field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Width {
    /// One byte
    U8,
    /// Four bytes, little-endian
    U32,
    /// Eight bytes, little-endian
    U64,
}

impl Width {
    /// Encoded size in bytes
    pub fn size(self) -> usize {
        match self {
            Width::U8 => 1,
            Width::U32 => 4,
            Width::U64 => 8,
        }
    }

    fn max(self) -> u64 {
        match self {
            Width::U8 => u8::MAX.into(),
            Width::U32 => u32::MAX.into(),
            Width::U64 => u64::MAX,
        }
    }
}

/// Position of one field inside a legacy record slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Logical field
    pub field: Field,
    /// Byte offset inside the slot
    pub offset: usize,
    /// Encoded width
    pub width: Width,
}

const fn field_at(field: Field, offset: usize, width: Width) -> FieldSpec {
    FieldSpec {
        field,
        offset,
        width,
    }
}

/// Record layout of one record class in one legacy format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LegacyLayout {
    /// Record class described
    pub class: RecordClass,
    /// Slot size of fixed records; `None` for dynamic blocks
    pub record_size: Option<usize>,
    /// Offset of the payload area of dynamic blocks
    pub payload_offset: Option<usize>,
    /// Field positions
    pub fields: &'static [FieldSpec],
}

static V1_NODE: LegacyLayout = LegacyLayout {
    class: RecordClass::Node,
    record_size: Some(9),
    payload_offset: None,
    fields: &[
        field_at(Field::InUse, 0, Width::U8),
        field_at(Field::NextRel, 1, Width::U32),
        field_at(Field::NextProp, 5, Width::U32),
    ],
};

static V1_RELATIONSHIP: LegacyLayout = LegacyLayout {
    class: RecordClass::Relationship,
    record_size: Some(33),
    payload_offset: None,
    fields: &[
        field_at(Field::InUse, 0, Width::U8),
        field_at(Field::FirstNode, 1, Width::U32),
        field_at(Field::SecondNode, 5, Width::U32),
        field_at(Field::RelType, 9, Width::U32),
        field_at(Field::FirstPrevRel, 13, Width::U32),
        field_at(Field::FirstNextRel, 17, Width::U32),
        field_at(Field::SecondPrevRel, 21, Width::U32),
        field_at(Field::SecondNextRel, 25, Width::U32),
        field_at(Field::NextProp, 29, Width::U32),
    ],
};

static V1_PROPERTY: LegacyLayout = LegacyLayout {
    class: RecordClass::Property,
    record_size: Some(25),
    payload_offset: None,
    fields: &[
        field_at(Field::InUse, 0, Width::U8),
        field_at(Field::ValueType, 1, Width::U32),
        field_at(Field::KeyId, 5, Width::U32),
        field_at(Field::PropBlock, 9, Width::U64),
        field_at(Field::PrevProp, 17, Width::U32),
        field_at(Field::NextProp, 21, Width::U32),
    ],
};

static V1_TOKEN: LegacyLayout = LegacyLayout {
    class: RecordClass::Token,
    record_size: Some(5),
    payload_offset: None,
    fields: &[
        field_at(Field::InUse, 0, Width::U8),
        field_at(Field::NameId, 1, Width::U32),
    ],
};

static V1_DYNAMIC: LegacyLayout = LegacyLayout {
    class: RecordClass::Dynamic,
    record_size: None,
    payload_offset: Some(9),
    fields: &[
        field_at(Field::InUse, 0, Width::U8),
        field_at(Field::Length, 1, Width::U32),
        field_at(Field::NextBlock, 5, Width::U32),
    ],
};

/// Layout of `class` records in a legacy `version`; `None` for the current
/// format, which is not described by field tables
pub fn legacy_layout(version: FormatVersion, class: RecordClass) -> Option<&'static LegacyLayout> {
    match version {
        FormatVersion::V1 => Some(match class {
            RecordClass::Node => &V1_NODE,
            RecordClass::Relationship => &V1_RELATIONSHIP,
            RecordClass::Property => &V1_PROPERTY,
            RecordClass::Token => &V1_TOKEN,
            RecordClass::Dynamic => &V1_DYNAMIC,
        }),
        FormatVersion::V2 => None,
    }
}

/// Block payload capacity legacy stores of `kind` were written with
pub fn legacy_block_size(version: FormatVersion, kind: StoreKind) -> Option<usize> {
    match (version, kind) {
        (FormatVersion::V1, StoreKind::PropertyString | StoreKind::PropertyArray) => Some(120),
        (FormatVersion::V1, StoreKind::RelationshipTypeName | StoreKind::PropertyKeyName) => {
            Some(30)
        }
        _ => None,
    }
}

impl LegacyLayout {
    /// Slot size for a store of this layout with the given block capacity
    pub fn slot_size(&self, capacity: usize) -> usize {
        match (self.record_size, self.payload_offset) {
            (Some(size), _) => size,
            (None, Some(offset)) => offset + capacity,
            (None, None) => 0,
        }
    }

    /// Decode the fields of one slot
    pub fn decode(&self, slot: &[u8]) -> Result<FieldValues> {
        let mut values = FieldValues::new();
        for spec in self.fields {
            let end = spec.offset + spec.width.size();
            let bytes = slot
                .get(spec.offset..end)
                .ok_or_else(|| Error::storage(format!("slot too short for field {}", spec.field)))?;
            let mut word = [0u8; 8];
            word[..bytes.len()].copy_from_slice(bytes);
            values.set(spec.field, u64::from_le_bytes(word));
        }
        Ok(values)
    }

    /// Payload bytes of a dynamic block slot
    pub fn payload<'a>(&self, slot: &'a [u8], fields: &FieldValues) -> Result<&'a [u8]> {
        let Some(offset) = self.payload_offset else {
            return Ok(&[]);
        };
        let length = fields.require(Field::Length)? as usize;
        let capacity = slot.len().saturating_sub(offset);
        if length > capacity {
            return Err(Error::storage(format!(
                "block length {length} exceeds capacity {capacity}"
            )));
        }
        Ok(&slot[offset..offset + length])
    }

    /// Encode fields into one slot. Id fields narrower than 64 bits store
    /// [`NO_ID`] as their own all-ones sentinel.
    pub fn encode(&self, fields: &FieldValues, payload: &[u8], slot: &mut [u8]) -> Result<()> {
        slot.fill(0);
        for spec in self.fields {
            let mut value = fields.require(spec.field)?;
            if spec.field.is_id() && value == NO_ID {
                value = spec.width.max();
            }
            if value > spec.width.max() {
                return Err(Error::storage(format!(
                    "field {} value {value} does not fit {} bytes",
                    spec.field,
                    spec.width.size()
                )));
            }
            let end = spec.offset + spec.width.size();
            let target = slot
                .get_mut(spec.offset..end)
                .ok_or_else(|| Error::storage(format!("slot too short for field {}", spec.field)))?;
            target.copy_from_slice(&value.to_le_bytes()[..spec.width.size()]);
        }
        if let Some(offset) = self.payload_offset {
            let area = slot
                .get_mut(offset..offset + payload.len())
                .ok_or_else(|| Error::storage("payload exceeds block capacity"))?;
            area.copy_from_slice(payload);
        }
        Ok(())
    }
}

/// Legacy id file: sticky byte, high id u64 LE, then freed ids u64 LE
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LegacyIdFile {
    /// Whether the file was left open
    pub sticky: bool,
    /// Allocation watermark
    pub high_id: u64,
    /// Freed ids in the order they were released
    pub free_ids: Vec<u64>,
}

const LEGACY_ID_HEADER: usize = 9;

impl LegacyIdFile {
    /// Read a legacy id file
    pub fn read(fs: &dyn FileSystemAbstraction, path: &Path) -> Result<Self> {
        let bytes = fs.open(path, OpenMode::Read)?.read_all()?;
        if bytes.len() < LEGACY_ID_HEADER {
            return Err(Error::storage(format!(
                "{} is too short for a legacy id file",
                path.display()
            )));
        }
        let mut word = [0u8; 8];
        word.copy_from_slice(&bytes[1..9]);
        let free_ids = bytes[LEGACY_ID_HEADER..]
            .chunks_exact(8)
            .map(|chunk| {
                let mut word = [0u8; 8];
                word.copy_from_slice(chunk);
                u64::from_le_bytes(word)
            })
            .collect();
        Ok(Self {
            sticky: bytes[0] != 0,
            high_id: u64::from_le_bytes(word),
            free_ids,
        })
    }

    /// Write the id file, replacing any existing one
    pub fn write(&self, fs: &dyn FileSystemAbstraction, path: &Path) -> Result<()> {
        let mut bytes = Vec::with_capacity(LEGACY_ID_HEADER + self.free_ids.len() * 8);
        bytes.push(u8::from(self.sticky));
        bytes.extend_from_slice(&self.high_id.to_le_bytes());
        for id in &self.free_ids {
            bytes.extend_from_slice(&id.to_le_bytes());
        }
        let file = fs.open(path, OpenMode::Truncate)?;
        file.write_at(0, &bytes)?;
        file.sync()?;
        Ok(())
    }
}

/// Read-only view of one legacy store file and its id file
#[derive(Debug)]
pub struct LegacyStore {
    kind: StoreKind,
    path: PathBuf,
    header: StoreHeader,
    layout: &'static LegacyLayout,
    file: Box<dyn StoreFile>,
    ids: LegacyIdFile,
    slots: u64,
}

impl LegacyStore {
    /// Open the legacy store of `kind` in `dir`, which must be at `version`
    pub fn open(
        fs: &dyn FileSystemAbstraction,
        dir: &Path,
        kind: StoreKind,
        version: FormatVersion,
    ) -> Result<Self> {
        let path = dir.join(kind.file_name());
        let file = fs.open(&path, OpenMode::Read)?;
        let header = StoreHeader::read(file.as_ref(), &path)?;
        if header.kind != kind || header.version != version {
            return Err(Error::storage(format!(
                "{} holds {} {}, expected {}",
                path.display(),
                header.kind,
                header.version,
                version.marker(kind)
            )));
        }
        let layout = legacy_layout(version, kind.record_class()).ok_or_else(|| {
            Error::UnsupportedVersion {
                path: path.clone(),
                found: version.marker(kind),
            }
        })?;

        let record_size = header.record_size as usize;
        let size_ok = match (layout.record_size, layout.payload_offset) {
            (Some(size), _) => record_size == size,
            (None, Some(offset)) => record_size > offset,
            (None, None) => false,
        };
        if !size_ok {
            return Err(Error::storage(format!(
                "{} declares record size {record_size}, not valid for {version} {kind}",
                path.display()
            )));
        }

        let ids = LegacyIdFile::read(fs, &dir.join(kind.id_file_name()))?;
        let slots = header.slots_in(file.len()?);
        Ok(Self {
            kind,
            path,
            header,
            layout,
            file,
            ids,
            slots,
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

    /// Layout records are decoded with
    pub fn layout(&self) -> &'static LegacyLayout {
        self.layout
    }

    /// Record slots present in the file
    pub fn slots(&self) -> u64 {
        self.slots
    }

    /// Watermark: the larger of the id file high id and the file extent
    pub fn high_id(&self) -> u64 {
        self.ids.high_id.max(self.slots)
    }

    /// Freed ids in release order
    pub fn free_ids(&self) -> &[u64] {
        &self.ids.free_ids
    }

    /// Payload capacity of dynamic blocks
    pub fn capacity(&self) -> usize {
        self.layout
            .payload_offset
            .map_or(0, |offset| self.header.record_size as usize - offset)
    }

    /// Read one record slot as fields plus its payload
    pub fn read(&self, id: u64) -> Result<(FieldValues, Vec<u8>)> {
        if id >= self.slots {
            return Err(Error::invalid_record(
                self.kind,
                id,
                format!("beyond legacy store extent of {} records", self.slots),
            ));
        }
        let mut slot = vec![0u8; self.header.record_size as usize];
        self.file.read_at(self.header.offset_of(id), &mut slot)?;
        self.decode_slot(id, &slot)
            .map(|(fields, payload)| (fields, payload.to_vec()))
    }

    fn decode_slot<'a>(&self, id: u64, slot: &'a [u8]) -> Result<(FieldValues, &'a [u8])> {
        let fields = self
            .layout
            .decode(slot)
            .map_err(|e| Error::invalid_record(self.kind, id, e.to_string()))?;
        let payload = self
            .layout
            .payload(slot, &fields)
            .map_err(|e| Error::invalid_record(self.kind, id, e.to_string()))?;
        Ok((fields, payload))
    }

    /// Visit every slot in id order with its fields and payload
    pub fn scan(&self, mut visit: impl FnMut(u64, FieldValues, &[u8]) -> Result<()>) -> Result<()> {
        let size = self.header.record_size as usize;
        let mut first = 0;
        while first < self.slots {
            let count = (self.slots - first).min(SCAN_BATCH);
            let mut buf = vec![0u8; count as usize * size];
            self.file.read_at(self.header.offset_of(first), &mut buf)?;
            for (i, slot) in buf.chunks_exact(size).enumerate() {
                let id = first + i as u64;
                let (fields, payload) = self.decode_slot(id, slot)?;
                visit(id, fields, payload)?;
            }
            first += count;
        }
        Ok(())
    }

    /// Ids of in-use records
    pub fn in_use_ids(&self) -> Result<RoaringTreemap> {
        let mut ids = RoaringTreemap::new();
        self.scan(|id, fields, _| {
            if fields.in_use() {
                ids.insert(id);
            }
            Ok(())
        })?;
        Ok(ids)
    }

    /// Block ids and concatenated payload of the chain starting at `head`
    pub fn read_chain(&self, head: u64) -> Result<(Vec<u64>, Vec<u8>)> {
        let mut visited = RoaringTreemap::new();
        let mut ids = Vec::new();
        let mut bytes = Vec::new();
        let mut current = head;
        while current != LEGACY_NO_ID {
            let id = current;
            if !visited.insert(id) {
                return Err(Error::broken_chain(self.kind, id, "cycle detected"));
            }
            let (fields, payload) = self.read(id).map_err(|e| match e {
                Error::InvalidRecord { reason, .. } => Error::broken_chain(self.kind, id, reason),
                other => other,
            })?;
            if !fields.in_use() {
                return Err(Error::broken_chain(self.kind, id, "block not in use"));
            }
            ids.push(id);
            bytes.extend_from_slice(&payload);
            current = fields.require(Field::NextBlock)?;
        }
        Ok((ids, bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::EphemeralFileSystem;

    #[test]
    fn test_layout_sizes_cover_fields() {
        for class in [
            RecordClass::Node,
            RecordClass::Relationship,
            RecordClass::Property,
            RecordClass::Token,
            RecordClass::Dynamic,
        ] {
            let layout = legacy_layout(FormatVersion::V1, class).unwrap();
            let end = layout
                .fields
                .iter()
                .map(|s| s.offset + s.width.size())
                .max()
                .unwrap();
            assert_eq!(end, layout.slot_size(0), "{class:?}");
        }
        assert!(legacy_layout(FormatVersion::V2, RecordClass::Node).is_none());
    }

    #[test]
    fn test_relationship_encode_decode() {
        let fields = FieldValues::new()
            .with(Field::InUse, 1)
            .with(Field::FirstNode, 3)
            .with(Field::SecondNode, 4)
            .with(Field::RelType, 2)
            .with(Field::FirstPrevRel, NO_ID)
            .with(Field::FirstNextRel, 9)
            .with(Field::SecondPrevRel, NO_ID)
            .with(Field::SecondNextRel, NO_ID)
            .with(Field::NextProp, 11);
        let mut slot = [0u8; 33];
        V1_RELATIONSHIP.encode(&fields, &[], &mut slot).unwrap();
        assert_eq!(slot[0], 1);
        assert_eq!(&slot[13..17], &[0xff; 4]);
        assert_eq!(&slot[29..33], &11u32.to_le_bytes());

        let decoded = V1_RELATIONSHIP.decode(&slot).unwrap();
        assert_eq!(decoded.get(Field::FirstNode), Some(3));
        assert_eq!(decoded.get(Field::FirstPrevRel), Some(LEGACY_NO_ID));
    }

    #[test]
    fn test_encode_rejects_wide_ids() {
        let fields = FieldValues::new()
            .with(Field::InUse, 1)
            .with(Field::NameId, 1 << 40);
        let mut slot = [0u8; 5];
        assert!(V1_TOKEN.encode(&fields, &[], &mut slot).is_err());
    }

    #[test]
    fn test_dynamic_payload() {
        let fields = FieldValues::new()
            .with(Field::InUse, 1)
            .with(Field::Length, 3)
            .with(Field::NextBlock, NO_ID);
        let mut slot = vec![0u8; V1_DYNAMIC.slot_size(8)];
        V1_DYNAMIC.encode(&fields, b"abc", &mut slot).unwrap();
        let decoded = V1_DYNAMIC.decode(&slot).unwrap();
        assert_eq!(V1_DYNAMIC.payload(&slot, &decoded).unwrap(), b"abc");

        slot[1] = 200;
        let decoded = V1_DYNAMIC.decode(&slot).unwrap();
        assert!(V1_DYNAMIC.payload(&slot, &decoded).is_err());
    }

    #[test]
    fn test_legacy_id_file_round_trip() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/db")).unwrap();
        let path = Path::new("/db/nodes.store.id");
        let ids = LegacyIdFile {
            sticky: false,
            high_id: 12,
            free_ids: vec![7, 3, 9],
        };
        ids.write(&fs, path).unwrap();
        assert_eq!(LegacyIdFile::read(&fs, path).unwrap(), ids);

        // a torn trailing entry is ignored
        let file = fs.open(path, OpenMode::Append).unwrap();
        file.append(&[1, 2, 3]).unwrap();
        assert_eq!(LegacyIdFile::read(&fs, path).unwrap().free_ids, vec![7, 3, 9]);
    }
}
