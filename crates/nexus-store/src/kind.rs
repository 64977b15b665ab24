//! Store kinds - the closed set of store files making up a store directory

use serde::{Deserialize, Serialize};
use std::fmt;

/// Record layout family shared by one or more store kinds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RecordClass {
    /// Node records
    Node,
    /// Relationship records
    Relationship,
    /// Property records
    Property,
    /// Token records (relationship types, property keys)
    Token,
    /// Dynamic blocks
    Dynamic,
}

/// One store file type. Every store directory holds exactly one file per kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StoreKind {
    /// Node records
    Node,
    /// Relationship records
    Relationship,
    /// Property records
    Property,
    /// Dynamic blocks for string property values
    PropertyString,
    /// Dynamic blocks for array property values
    PropertyArray,
    /// Relationship type tokens
    RelationshipType,
    /// Dynamic blocks for relationship type names
    RelationshipTypeName,
    /// Property key tokens
    PropertyKey,
    /// Dynamic blocks for property key names
    PropertyKeyName,
}

impl StoreKind {
    /// Every kind, in the order stores are opened and migrated
    pub const ALL: [StoreKind; 9] = [
        StoreKind::Node,
        StoreKind::Relationship,
        StoreKind::Property,
        StoreKind::PropertyString,
        StoreKind::PropertyArray,
        StoreKind::RelationshipType,
        StoreKind::RelationshipTypeName,
        StoreKind::PropertyKey,
        StoreKind::PropertyKeyName,
    ];

    /// Type descriptor written into the version marker
    pub fn descriptor(self) -> &'static str {
        match self {
            StoreKind::Node => "NodeStore",
            StoreKind::Relationship => "RelationshipStore",
            StoreKind::Property => "PropertyStore",
            StoreKind::PropertyString => "StringPropertyStore",
            StoreKind::PropertyArray => "ArrayPropertyStore",
            StoreKind::RelationshipType => "RelationshipTypeStore",
            StoreKind::RelationshipTypeName => "RelTypeNameStore",
            StoreKind::PropertyKey => "PropertyKeyStore",
            StoreKind::PropertyKeyName => "PropKeyNameStore",
        }
    }

    /// File name inside the store directory
    pub fn file_name(self) -> &'static str {
        match self {
            StoreKind::Node => "nodes.store",
            StoreKind::Relationship => "rels.store",
            StoreKind::Property => "props.store",
            StoreKind::PropertyString => "props.strings.store",
            StoreKind::PropertyArray => "props.arrays.store",
            StoreKind::RelationshipType => "rel_types.store",
            StoreKind::RelationshipTypeName => "rel_types.names.store",
            StoreKind::PropertyKey => "prop_keys.store",
            StoreKind::PropertyKeyName => "prop_keys.names.store",
        }
    }

    /// File name of the id companion file
    pub fn id_file_name(self) -> String {
        format!("{}.id", self.file_name())
    }

    /// Record layout stored in files of this kind
    pub fn record_class(self) -> RecordClass {
        match self {
            StoreKind::Node => RecordClass::Node,
            StoreKind::Relationship => RecordClass::Relationship,
            StoreKind::Property => RecordClass::Property,
            StoreKind::RelationshipType | StoreKind::PropertyKey => RecordClass::Token,
            StoreKind::PropertyString
            | StoreKind::PropertyArray
            | StoreKind::RelationshipTypeName
            | StoreKind::PropertyKeyName => RecordClass::Dynamic,
        }
    }

    /// Look a kind up by its type descriptor
    pub fn from_descriptor(descriptor: &str) -> Option<StoreKind> {
        StoreKind::ALL
            .into_iter()
            .find(|kind| kind.descriptor() == descriptor)
    }

    /// Whether records of this kind are dynamic blocks
    pub fn is_dynamic(self) -> bool {
        matches!(
            self,
            StoreKind::PropertyString
                | StoreKind::PropertyArray
                | StoreKind::RelationshipTypeName
                | StoreKind::PropertyKeyName
        )
    }

    /// Whether records of this kind are tokens
    pub fn is_token(self) -> bool {
        matches!(self, StoreKind::RelationshipType | StoreKind::PropertyKey)
    }

    /// Highest id a store of this kind may issue.
    ///
    /// Token ids are referenced through 32-bit fields (relationship type,
    /// property key) so they are capped accordingly.
    pub fn max_id(self) -> u64 {
        match self {
            StoreKind::RelationshipType | StoreKind::PropertyKey => u32::MAX as u64 - 1,
            _ => (1u64 << 48) - 1,
        }
    }
}

impl fmt::Display for StoreKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.descriptor())
    }
}
