use super::{Field, FieldValues, NO_ID, Record, check_slot, flags_in_use, set_flag};
use crate::error::Result;
use bytemuck::{Pod, Zeroable};

/// Node record in nodes.store (32 bytes, fixed-size)
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct NodeRecord {
    /// Head of the relationship chain
    pub next_rel: u64,
    /// Head of the property chain
    pub next_prop: u64,
    /// Bitmap of label IDs (supports up to 64 labels)
    pub label_bits: u64,
    /// Flags (bit 0: in use)
    pub flags: u32,
    /// Padding to align to 32 bytes
    _padding: u32,
}

const NODE_RECORD_SIZE: usize = 32;

impl Default for NodeRecord {
    fn default() -> Self {
        Self {
            next_rel: NO_ID,
            next_prop: NO_ID,
            label_bits: 0,
            flags: 0,
            _padding: 0,
        }
    }
}

impl NodeRecord {
    /// In-use node with no relationships, properties or labels
    pub fn new() -> Self {
        let mut record = Self::default();
        record.set_in_use(true);
        record
    }

    /// Check if node has label
    pub fn has_label(&self, label_id: u32) -> bool {
        if label_id >= 64 {
            return false;
        }
        (self.label_bits & (1u64 << label_id)) != 0
    }

    /// Add label to node
    pub fn add_label(&mut self, label_id: u32) {
        if label_id < 64 {
            self.label_bits |= 1u64 << label_id;
        }
    }

    /// Remove label from node
    pub fn remove_label(&mut self, label_id: u32) {
        if label_id < 64 {
            self.label_bits &= !(1u64 << label_id);
        }
    }
}

impl Record for NodeRecord {
    const SIZE: Option<usize> = Some(NODE_RECORD_SIZE);

    fn in_use(&self) -> bool {
        flags_in_use(self.flags)
    }

    fn set_in_use(&mut self, in_use: bool) {
        set_flag(&mut self.flags, in_use);
    }

    fn encode(&self, buf: &mut [u8]) -> Result<()> {
        check_slot(buf, NODE_RECORD_SIZE)?;
        buf.copy_from_slice(bytemuck::bytes_of(self));
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        check_slot(buf, NODE_RECORD_SIZE)?;
        Ok(bytemuck::pod_read_unaligned(buf))
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with(Field::InUse, u64::from(self.in_use()))
            .with(Field::NextRel, self.next_rel)
            .with(Field::NextProp, self.next_prop)
            .with(Field::Labels, self.label_bits)
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        let mut record = Self {
            next_rel: fields.require(Field::NextRel)?,
            next_prop: fields.require(Field::NextProp)?,
            label_bits: fields.require(Field::Labels)?,
            ..Self::default()
        };
        record.set_in_use(fields.in_use());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_record_size() {
        assert_eq!(std::mem::size_of::<NodeRecord>(), NODE_RECORD_SIZE);
    }

    #[test]
    fn test_node_labels() {
        let mut record = NodeRecord::new();

        record.add_label(0);
        record.add_label(5);
        record.add_label(63);

        assert!(record.has_label(0));
        assert!(record.has_label(5));
        assert!(record.has_label(63));
        assert!(!record.has_label(1));
        assert!(!record.has_label(64)); // Out of range

        record.remove_label(5);
        assert!(!record.has_label(5));
        assert!(record.has_label(63));
    }

    #[test]
    fn test_node_in_use_flag() {
        let mut record = NodeRecord::default();
        assert!(!record.in_use());
        record.set_in_use(true);
        assert!(record.in_use());
        record.set_in_use(false);
        assert!(!record.in_use());
        assert_eq!(record.next_rel, NO_ID);
    }
}
