//! Named record fields
//!
//! Every record layout, current or legacy, is described in terms of the same
//! closed set of logical [`Field`]s. Migration decodes a legacy record into
//! [`FieldValues`], maps them, and builds the current record from the result.

use crate::error::{Error, Result};
use std::fmt;

/// Logical record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Field {
    /// In-use flag (0 or 1)
    InUse,
    /// Node: head of the relationship chain
    NextRel,
    /// Node, relationship, property: next property in the owner chain
    NextProp,
    /// Node: label bitmap
    Labels,
    /// Relationship: start node
    FirstNode,
    /// Relationship: end node
    SecondNode,
    /// Relationship: relationship type token
    RelType,
    /// Relationship: previous relationship in the start node chain
    FirstPrevRel,
    /// Relationship: next relationship in the start node chain
    FirstNextRel,
    /// Relationship: previous relationship in the end node chain
    SecondPrevRel,
    /// Relationship: next relationship in the end node chain
    SecondNextRel,
    /// Property: property key token
    KeyId,
    /// Property: value type tag
    ValueType,
    /// Property: inline value bits or dynamic chain head
    PropBlock,
    /// Property: previous property in the owner chain
    PrevProp,
    /// Token: head of the name chain
    NameId,
    /// Dynamic block: payload length
    Length,
    /// Dynamic block: next block in the chain
    NextBlock,
}

impl Field {
    /// Number of fields
    pub const COUNT: usize = 18;

    fn index(self) -> usize {
        self as usize
    }

    /// Whether the field holds a record id, where "none" is a sentinel
    pub fn is_id(self) -> bool {
        !matches!(
            self,
            Field::InUse | Field::Labels | Field::ValueType | Field::PropBlock | Field::Length
        )
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Sparse set of field values, one slot per [`Field`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FieldValues {
    values: [Option<u64>; Field::COUNT],
}

impl FieldValues {
    /// Empty set
    pub fn new() -> Self {
        Self::default()
    }

    /// Value of a field, if present
    pub fn get(&self, field: Field) -> Option<u64> {
        self.values[field.index()]
    }

    /// Value of a field that must be present
    pub fn require(&self, field: Field) -> Result<u64> {
        self.get(field)
            .ok_or_else(|| Error::storage(format!("missing field {field}")))
    }

    /// Value of a field that must be present and fit 32 bits
    pub fn require_u32(&self, field: Field) -> Result<u32> {
        let value = self.require(field)?;
        u32::try_from(value)
            .map_err(|_| Error::storage(format!("field {field} out of range: {value}")))
    }

    /// Set a field
    pub fn set(&mut self, field: Field, value: u64) {
        self.values[field.index()] = Some(value);
    }

    /// Builder form of [`FieldValues::set`]
    pub fn with(mut self, field: Field, value: u64) -> Self {
        self.set(field, value);
        self
    }

    /// Whether the in-use field is set and non-zero
    pub fn in_use(&self) -> bool {
        self.get(Field::InUse).is_some_and(|v| v != 0)
    }

    /// Present fields in declaration order
    pub fn iter(&self) -> impl Iterator<Item = (usize, u64)> + '_ {
        self.values
            .iter()
            .enumerate()
            .filter_map(|(i, v)| v.map(|v| (i, v)))
    }
}
