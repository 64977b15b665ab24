//! Field mapping tables from legacy layouts to the current record layout
//!
//! One table per (legacy version, record class). Each rule produces one
//! field of the current record; fields the legacy format lacks get a
//! constant. Supporting another legacy format means adding its layouts and
//! its tables, nothing else.

use super::layout::LEGACY_NO_ID;
use crate::error::Result;
use crate::kind::RecordClass;
use crate::record::{Field, FieldValues, NO_ID};
use crate::store::FormatVersion;

/// How one current field is produced from legacy fields
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldRule {
    /// Copy the legacy value unchanged
    Copy(Field),
    /// Widen a 32-bit id, turning the legacy sentinel into [`NO_ID`]
    WidenId(Field),
    /// Field absent from the legacy format, set to a constant
    Constant(Field, u64),
}

impl FieldRule {
    /// Field this rule produces
    pub fn field(self) -> Field {
        match self {
            FieldRule::Copy(field) | FieldRule::WidenId(field) | FieldRule::Constant(field, _) => {
                field
            }
        }
    }

    fn apply(self, legacy: &FieldValues, out: &mut FieldValues) -> Result<()> {
        match self {
            FieldRule::Copy(field) => out.set(field, legacy.require(field)?),
            FieldRule::WidenId(field) => {
                let value = legacy.require(field)?;
                out.set(field, if value == LEGACY_NO_ID { NO_ID } else { value });
            }
            FieldRule::Constant(field, value) => out.set(field, value),
        }
        Ok(())
    }
}

static V1_NODE: &[FieldRule] = &[
    FieldRule::Copy(Field::InUse),
    FieldRule::WidenId(Field::NextRel),
    FieldRule::WidenId(Field::NextProp),
    FieldRule::Constant(Field::Labels, 0),
];

static V1_RELATIONSHIP: &[FieldRule] = &[
    FieldRule::Copy(Field::InUse),
    FieldRule::WidenId(Field::FirstNode),
    FieldRule::WidenId(Field::SecondNode),
    FieldRule::Copy(Field::RelType),
    FieldRule::WidenId(Field::FirstPrevRel),
    FieldRule::WidenId(Field::FirstNextRel),
    FieldRule::WidenId(Field::SecondPrevRel),
    FieldRule::WidenId(Field::SecondNextRel),
    FieldRule::WidenId(Field::NextProp),
];

static V1_PROPERTY: &[FieldRule] = &[
    FieldRule::Copy(Field::InUse),
    FieldRule::Copy(Field::KeyId),
    FieldRule::Copy(Field::ValueType),
    FieldRule::Copy(Field::PropBlock),
    FieldRule::WidenId(Field::PrevProp),
    FieldRule::WidenId(Field::NextProp),
];

static V1_TOKEN: &[FieldRule] = &[
    FieldRule::Copy(Field::InUse),
    FieldRule::WidenId(Field::NameId),
];

// Block payloads are rechunked, so only the in-use flag maps directly
static V1_DYNAMIC: &[FieldRule] = &[FieldRule::Copy(Field::InUse)];

/// Mapping table for `class` records of a legacy `version`
pub fn field_mapping(version: FormatVersion, class: RecordClass) -> Option<&'static [FieldRule]> {
    match version {
        FormatVersion::V1 => Some(match class {
            RecordClass::Node => V1_NODE,
            RecordClass::Relationship => V1_RELATIONSHIP,
            RecordClass::Property => V1_PROPERTY,
            RecordClass::Token => V1_TOKEN,
            RecordClass::Dynamic => V1_DYNAMIC,
        }),
        FormatVersion::V2 => None,
    }
}

/// Whether a version can be migrated to the current format
pub fn is_migratable(version: FormatVersion) -> bool {
    field_mapping(version, RecordClass::Node).is_some()
}

/// Apply a mapping table to legacy fields
pub fn map_fields(rules: &[FieldRule], legacy: &FieldValues) -> Result<FieldValues> {
    let mut out = FieldValues::new();
    for rule in rules {
        rule.apply(legacy, &mut out)?;
    }
    Ok(out)
}
