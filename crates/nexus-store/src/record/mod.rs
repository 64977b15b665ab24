//! Record types of the current store format
//!
//! Fixed records are `#[repr(C)]` plain-old-data structs written with
//! `bytemuck` in host byte order:
//!
//! - [`NodeRecord`]: 32 bytes (next_rel, next_prop, label_bits, flags, padding)
//! - [`RelationshipRecord`]: 64 bytes (two endpoints, four chain pointers, next_prop, type, flags)
//! - [`PropertyRecord`]: 32 bytes (prop_block, prev/next pointers, key, value type, flags)
//! - [`TokenRecord`]: 16 bytes (name chain head, flags, padding)
//!
//! [`DynamicRecord`] is a 16 byte header followed by a payload area whose
//! capacity is fixed per store. Pointers use [`NO_ID`] for "none".

mod dynamic;
mod fields;
mod node;
mod property;
mod relationship;
mod token;

pub use dynamic::{DYNAMIC_HEADER_SIZE, DynamicRecord};
pub use fields::{Field, FieldValues};
pub use node::NodeRecord;
pub use property::PropertyRecord;
pub use relationship::RelationshipRecord;
pub use token::TokenRecord;

use crate::error::{Error, Result};
use std::fmt;

/// Sentinel for "no record" in pointer fields
pub const NO_ID: u64 = u64::MAX;

/// Flag bit marking a record in use
pub const FLAG_IN_USE: u32 = 0x01;

/// A record that can be stored in a [`RecordStore`](crate::store::RecordStore)
pub trait Record: Clone + fmt::Debug + PartialEq + Send + Sync + 'static {
    /// Encoded size of fixed-layout records; `None` when it depends on the
    /// store's block capacity
    const SIZE: Option<usize>;

    /// Whether the record is in use
    fn in_use(&self) -> bool;

    /// Set or clear the in-use flag
    fn set_in_use(&mut self, in_use: bool);

    /// Encode into `buf`, which is exactly one record slot long
    fn encode(&self, buf: &mut [u8]) -> Result<()>;

    /// Decode from one record slot
    fn decode(buf: &[u8]) -> Result<Self>;

    /// Logical field view of the record
    fn to_fields(&self) -> FieldValues;

    /// Build a record from logical fields. Dynamic payloads are not fields
    /// and start out empty.
    fn from_fields(fields: &FieldValues) -> Result<Self>;
}

/// Check a slot buffer against a fixed record size
pub(crate) fn check_slot(buf: &[u8], size: usize) -> Result<()> {
    if buf.len() != size {
        return Err(Error::storage(format!(
            "record slot is {} bytes, expected {size}",
            buf.len()
        )));
    }
    Ok(())
}

pub(crate) fn flags_in_use(flags: u32) -> bool {
    flags & FLAG_IN_USE != 0
}

pub(crate) fn set_flag(flags: &mut u32, in_use: bool) {
    if in_use {
        *flags |= FLAG_IN_USE;
    } else {
        *flags &= !FLAG_IN_USE;
    }
}
