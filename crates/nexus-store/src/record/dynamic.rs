use super::{Field, FieldValues, NO_ID, Record, flags_in_use, set_flag};
use crate::error::{Error, Result};
use bytemuck::{Pod, Zeroable};

/// Bytes preceding the payload in every dynamic block
pub const DYNAMIC_HEADER_SIZE: usize = 16;

#[repr(C)]
#[derive(Debug, Clone, Copy, Pod, Zeroable)]
struct DynamicHeader {
    next_block: u64,
    length: u32,
    flags: u32,
}

/// One block of a dynamic record chain
///
/// The slot size is `DYNAMIC_HEADER_SIZE + capacity`; bytes past `payload`
/// inside the slot are zero.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DynamicRecord {
    /// Next block in the chain, [`NO_ID`] for the last block
    pub next_block: u64,
    /// Payload bytes held by this block
    pub payload: Vec<u8>,
    in_use: bool,
}

impl Default for DynamicRecord {
    fn default() -> Self {
        Self {
            next_block: NO_ID,
            payload: Vec::new(),
            in_use: false,
        }
    }
}

impl DynamicRecord {
    /// In-use block
    pub fn new(payload: Vec<u8>, next_block: u64) -> Self {
        Self {
            next_block,
            payload,
            in_use: true,
        }
    }

    /// Payload length in bytes
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Returns true if the block carries no payload
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl Record for DynamicRecord {
    const SIZE: Option<usize> = None;

    fn in_use(&self) -> bool {
        self.in_use
    }

    fn set_in_use(&mut self, in_use: bool) {
        self.in_use = in_use;
    }

    fn encode(&self, buf: &mut [u8]) -> Result<()> {
        let capacity = buf
            .len()
            .checked_sub(DYNAMIC_HEADER_SIZE)
            .ok_or_else(|| Error::storage("dynamic slot smaller than its header"))?;
        if self.payload.len() > capacity {
            return Err(Error::storage(format!(
                "payload of {} bytes exceeds block capacity {capacity}",
                self.payload.len()
            )));
        }
        let mut flags = 0;
        set_flag(&mut flags, self.in_use);
        let header = DynamicHeader {
            next_block: self.next_block,
            length: self.payload.len() as u32,
            flags,
        };
        buf[..DYNAMIC_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        let (data, rest) = buf[DYNAMIC_HEADER_SIZE..].split_at_mut(self.payload.len());
        data.copy_from_slice(&self.payload);
        rest.fill(0);
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        let capacity = buf
            .len()
            .checked_sub(DYNAMIC_HEADER_SIZE)
            .ok_or_else(|| Error::storage("dynamic slot smaller than its header"))?;
        let header: DynamicHeader = bytemuck::pod_read_unaligned(&buf[..DYNAMIC_HEADER_SIZE]);
        let length = header.length as usize;
        if length > capacity {
            return Err(Error::storage(format!(
                "block length {length} exceeds capacity {capacity}"
            )));
        }
        Ok(Self {
            next_block: header.next_block,
            payload: buf[DYNAMIC_HEADER_SIZE..DYNAMIC_HEADER_SIZE + length].to_vec(),
            in_use: flags_in_use(header.flags),
        })
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with(Field::InUse, u64::from(self.in_use))
            .with(Field::Length, self.payload.len() as u64)
            .with(Field::NextBlock, self.next_block)
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        Ok(Self {
            next_block: fields.require(Field::NextBlock)?,
            payload: Vec::new(),
            in_use: fields.in_use(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_clears_stale_payload() {
        let mut buf = vec![0xaa; DYNAMIC_HEADER_SIZE + 8];
        DynamicRecord::new(b"hi".to_vec(), 3).encode(&mut buf).unwrap();
        assert!(buf[DYNAMIC_HEADER_SIZE + 2..].iter().all(|&b| b == 0));
        let block = DynamicRecord::decode(&buf).unwrap();
        assert_eq!(block.payload, b"hi");
        assert_eq!(block.next_block, 3);
    }

    #[test]
    fn test_payload_over_capacity() {
        let mut buf = vec![0; DYNAMIC_HEADER_SIZE + 2];
        assert!(DynamicRecord::new(b"abc".to_vec(), NO_ID).encode(&mut buf).is_err());

        let header = DynamicHeader {
            next_block: NO_ID,
            length: 3,
            flags: 1,
        };
        buf[..DYNAMIC_HEADER_SIZE].copy_from_slice(bytemuck::bytes_of(&header));
        assert!(DynamicRecord::decode(&buf).is_err());
    }
}
