use super::{Field, FieldValues, NO_ID, Record, check_slot};
use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};

/// Property record in props.store (32 bytes, fixed-size)
///
/// Properties of one owner form a chain starting at the owner's `next_prop`.
/// `prop_block` holds primitive values inline; strings and arrays store the
/// head id of a dynamic chain there.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct PropertyRecord {
    /// Inline value bits or dynamic chain head
    pub prop_block: u64,
    /// Previous property in the owner chain
    pub prev_prop: u64,
    /// Next property in the owner chain
    pub next_prop: u64,
    /// Property key token ID
    pub key_id: u32,
    /// Value type tag
    pub value_type: u16,
    /// Flags (bit 0: in use)
    pub flags: u16,
}

const PROP_RECORD_SIZE: usize = 32;

impl Default for PropertyRecord {
    fn default() -> Self {
        Self {
            prop_block: 0,
            prev_prop: NO_ID,
            next_prop: NO_ID,
            key_id: 0,
            value_type: 0,
            flags: 0,
        }
    }
}

impl PropertyRecord {
    /// In-use property, not yet linked into a chain
    pub fn new(key_id: u32, value_type: u16, prop_block: u64) -> Self {
        Self {
            prop_block,
            key_id,
            value_type,
            flags: 1,
            ..Self::default()
        }
    }
}

impl Record for PropertyRecord {
    const SIZE: Option<usize> = Some(PROP_RECORD_SIZE);

    fn in_use(&self) -> bool {
        self.flags & 1 != 0
    }

    fn set_in_use(&mut self, in_use: bool) {
        if in_use {
            self.flags |= 1;
        } else {
            self.flags &= !1;
        }
    }

    fn encode(&self, buf: &mut [u8]) -> Result<()> {
        check_slot(buf, PROP_RECORD_SIZE)?;
        buf.copy_from_slice(bytemuck::bytes_of(self));
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        check_slot(buf, PROP_RECORD_SIZE)?;
        Ok(bytemuck::pod_read_unaligned(buf))
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with(Field::InUse, u64::from(self.in_use()))
            .with(Field::KeyId, u64::from(self.key_id))
            .with(Field::ValueType, u64::from(self.value_type))
            .with(Field::PropBlock, self.prop_block)
            .with(Field::PrevProp, self.prev_prop)
            .with(Field::NextProp, self.next_prop)
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        let value_type = fields.require(Field::ValueType)?;
        let value_type = u16::try_from(value_type)
            .map_err(|_| Error::storage(format!("value type out of range: {value_type}")))?;
        let mut record = Self {
            prop_block: fields.require(Field::PropBlock)?,
            prev_prop: fields.require(Field::PrevProp)?,
            next_prop: fields.require(Field::NextProp)?,
            key_id: fields.require_u32(Field::KeyId)?,
            value_type,
            flags: 0,
        };
        record.set_in_use(fields.in_use());
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prop_record_size() {
        assert_eq!(std::mem::size_of::<PropertyRecord>(), PROP_RECORD_SIZE);
    }

    #[test]
    fn test_value_type_range_checked() {
        let fields = PropertyRecord::new(1, 5, 42)
            .to_fields()
            .with(Field::ValueType, 70_000);
        assert!(PropertyRecord::from_fields(&fields).is_err());
    }
}
