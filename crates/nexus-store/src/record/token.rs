use super::{Field, FieldValues, NO_ID, Record, check_slot, flags_in_use, set_flag};
use crate::error::Result;
use bytemuck::{Pod, Zeroable};

/// Token record (16 bytes): relationship type or property key
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct TokenRecord {
    /// Head of the name chain in the companion name store
    pub name_id: u64,
    /// Flags (bit 0: in use)
    pub flags: u32,
    _padding: u32,
}

const TOKEN_RECORD_SIZE: usize = 16;

impl Default for TokenRecord {
    fn default() -> Self {
        Self {
            name_id: NO_ID,
            flags: 0,
            _padding: 0,
        }
    }
}

impl TokenRecord {
    /// In-use token whose name starts at block `name_id`
    pub fn new(name_id: u64) -> Self {
        let mut record = Self {
            name_id,
            ..Self::default()
        };
        record.set_in_use(true);
        record
    }
}

impl Record for TokenRecord {
    const SIZE: Option<usize> = Some(TOKEN_RECORD_SIZE);

    fn in_use(&self) -> bool {
        flags_in_use(self.flags)
    }

    fn set_in_use(&mut self, in_use: bool) {
        set_flag(&mut self.flags, in_use);
    }

    fn encode(&self, buf: &mut [u8]) -> Result<()> {
        check_slot(buf, TOKEN_RECORD_SIZE)?;
        buf.copy_from_slice(bytemuck::bytes_of(self));
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        check_slot(buf, TOKEN_RECORD_SIZE)?;
        Ok(bytemuck::pod_read_unaligned(buf))
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with(Field::InUse, u64::from(self.in_use()))
            .with(Field::NameId, self.name_id)
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        let mut record = Self {
            name_id: fields.require(Field::NameId)?,
            ..Self::default()
        };
        record.set_in_use(fields.in_use());
        Ok(record)
    }
}
