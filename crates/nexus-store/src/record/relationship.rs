use super::{Field, FieldValues, NO_ID, Record, check_slot, flags_in_use, set_flag};
use crate::error::Result;
use bytemuck::{Pod, Zeroable};

/// Relationship record in rels.store (64 bytes, fixed-size)
///
/// Each relationship sits in two doubly-linked chains, one per endpoint.
/// For a self-loop both chains are the same node's chain and the `first_*`
/// pointers are authoritative.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Pod, Zeroable)]
pub struct RelationshipRecord {
    /// Start node ID
    pub first_node: u64,
    /// End node ID
    pub second_node: u64,
    /// Previous relationship in the start node chain
    pub first_prev_rel: u64,
    /// Next relationship in the start node chain
    pub first_next_rel: u64,
    /// Previous relationship in the end node chain
    pub second_prev_rel: u64,
    /// Next relationship in the end node chain
    pub second_next_rel: u64,
    /// Head of the property chain
    pub next_prop: u64,
    /// Relationship type ID
    pub type_id: u32,
    /// Flags (bit 0: in use)
    pub flags: u32,
}

const REL_RECORD_SIZE: usize = 64;

impl Default for RelationshipRecord {
    fn default() -> Self {
        Self {
            first_node: NO_ID,
            second_node: NO_ID,
            first_prev_rel: NO_ID,
            first_next_rel: NO_ID,
            second_prev_rel: NO_ID,
            second_next_rel: NO_ID,
            next_prop: NO_ID,
            type_id: 0,
            flags: 0,
        }
    }
}

impl RelationshipRecord {
    /// In-use relationship between two nodes, not yet linked into any chain
    pub fn new(first_node: u64, second_node: u64, type_id: u32) -> Self {
        let mut record = Self {
            first_node,
            second_node,
            type_id,
            ..Self::default()
        };
        record.set_in_use(true);
        record
    }

    /// Whether `node` is one of the endpoints
    pub fn involves(&self, node: u64) -> bool {
        self.first_node == node || self.second_node == node
    }

    /// Start and end node are the same
    pub fn is_loop(&self) -> bool {
        self.first_node == self.second_node
    }

    /// Previous relationship in `node`'s chain
    pub fn prev_for(&self, node: u64) -> u64 {
        if self.first_node == node {
            self.first_prev_rel
        } else {
            self.second_prev_rel
        }
    }

    /// Next relationship in `node`'s chain
    pub fn next_for(&self, node: u64) -> u64 {
        if self.first_node == node {
            self.first_next_rel
        } else {
            self.second_next_rel
        }
    }

    /// Set the previous pointer of `node`'s chain; both sides for a loop
    pub fn set_prev_for(&mut self, node: u64, prev: u64) {
        if self.first_node == node {
            self.first_prev_rel = prev;
        }
        if self.second_node == node {
            self.second_prev_rel = prev;
        }
    }

    /// Set the next pointer of `node`'s chain; both sides for a loop
    pub fn set_next_for(&mut self, node: u64, next: u64) {
        if self.first_node == node {
            self.first_next_rel = next;
        }
        if self.second_node == node {
            self.second_next_rel = next;
        }
    }
}

impl Record for RelationshipRecord {
    const SIZE: Option<usize> = Some(REL_RECORD_SIZE);

    fn in_use(&self) -> bool {
        flags_in_use(self.flags)
    }

    fn set_in_use(&mut self, in_use: bool) {
        set_flag(&mut self.flags, in_use);
    }

    fn encode(&self, buf: &mut [u8]) -> Result<()> {
        check_slot(buf, REL_RECORD_SIZE)?;
        buf.copy_from_slice(bytemuck::bytes_of(self));
        Ok(())
    }

    fn decode(buf: &[u8]) -> Result<Self> {
        check_slot(buf, REL_RECORD_SIZE)?;
        Ok(bytemuck::pod_read_unaligned(buf))
    }

    fn to_fields(&self) -> FieldValues {
        FieldValues::new()
            .with(Field::InUse, u64::from(self.in_use()))
            .with(Field::FirstNode, self.first_node)
            .with(Field::SecondNode, self.second_node)
            .with(Field::RelType, u64::from(self.type_id))
            .with(Field::FirstPrevRel, self.first_prev_rel)
            .with(Field::FirstNextRel, self.first_next_rel)
            .with(Field::SecondPrevRel, self.second_prev_rel)
            .with(Field::SecondNextRel, self.second_next_rel)
            .with(Field::NextProp, self.next_prop)
    }

    fn from_fields(fields: &FieldValues) -> Result<Self> {
        let mut record = Self {
            first_node: fields.require(Field::FirstNode)?,
            second_node: fields.require(Field::SecondNode)?,
            first_prev_rel: fields.require(Field::FirstPrevRel)?,
            first_next_rel: fields.require(Field::FirstNextRel)?,
            second_prev_rel: fields.require(Field::SecondPrevRel)?,
            second_next_rel: fields.require(Field::SecondNextRel)?,
            next_prop: fields.require(Field::NextProp)?,
            type_id: fields.require_u32(Field::RelType)?,
            flags: 0,
        };
        record.set_in_use(fields.in_use());
        Ok(record)
    }
}
