//! Verification phase: the reopened target must match the legacy source

use super::LegacyStores;
use super::copy::{PassControl, chain_heads};
use super::layout::LegacyStore;
use super::mapping::{FieldRule, field_mapping, map_fields};
use crate::check::{ConsistencyIssue, ConsistencyReport, IssueType, check_store};
use crate::error::{Error, Result};
use crate::kind::StoreKind;
use crate::store::{DynamicRecordStore, FormatVersion, GraphStore, block_count};
use roaring::RoaringTreemap;
use std::collections::BTreeMap;
use tracing::{debug, warn};

/// Check `target` for consistency, then compare every store against its
/// legacy counterpart: in-use counts, mapped fields and chain payloads
pub(crate) fn verify(
    legacy: &LegacyStores,
    target: &GraphStore,
    version: FormatVersion,
    control: &PassControl<'_>,
) -> Result<()> {
    let report = check_store(target)?;
    let issues = new_issues(legacy, &report)?;
    if let Some(issue) = issues.first() {
        return Err(Error::verification(
            issue.kind,
            format!("{} consistency issues, first: {issue}", issues.len()),
        ));
    }

    for kind in StoreKind::ALL {
        let source = legacy.get(kind)?;
        let count = report.count(kind);
        if kind.is_dynamic() {
            let store = target
                .dynamic_store(kind)
                .ok_or_else(|| Error::storage(format!("target has no store for {kind}")))?;
            verify_dynamic(source, store, count, control)?;
        } else {
            let rules = field_mapping(version, kind.record_class()).ok_or_else(|| {
                Error::UnsupportedVersion {
                    path: source.path().to_path_buf(),
                    found: version.marker(kind),
                }
            })?;
            verify_fixed(source, target, rules, count, control)?;
        }
        debug!(kind = %kind, records = count, "store verified");
    }
    Ok(())
}

/// Issues of the target that the legacy source does not already have.
///
/// Ids are preserved, so an unreachable record that was in use in the
/// source is carried over as is. Blocks above the legacy high id only come
/// from rechunking a copied chain and inherit its reachability.
fn new_issues<'a>(
    legacy: &LegacyStores,
    report: &'a ConsistencyReport,
) -> Result<Vec<&'a ConsistencyIssue>> {
    let mut source_in_use: BTreeMap<StoreKind, RoaringTreemap> = BTreeMap::new();
    let mut issues = Vec::new();
    let mut inherited = 0u64;
    for issue in &report.issues {
        if issue.issue_type == IssueType::Orphan {
            let source = legacy.get(issue.kind)?;
            if !source_in_use.contains_key(&issue.kind) {
                source_in_use.insert(issue.kind, source.in_use_ids()?);
            }
            let was_in_use = source_in_use
                .get(&issue.kind)
                .is_some_and(|ids| ids.contains(issue.id));
            let rechunked = issue.kind.is_dynamic() && issue.id >= source.high_id();
            if was_in_use || rechunked {
                inherited += 1;
                continue;
            }
        }
        issues.push(issue);
    }
    if inherited > 0 {
        warn!(orphans = inherited, "unreachable records carried over from the legacy store");
    }
    Ok(issues)
}

fn verify_fixed(
    source: &LegacyStore,
    target: &GraphStore,
    rules: &[FieldRule],
    count: u64,
    control: &PassControl<'_>,
) -> Result<()> {
    let kind = source.kind();
    let mut expected_count = 0u64;
    source.scan(|id, fields, _| {
        control.check(id)?;
        if !fields.in_use() {
            return Ok(());
        }
        expected_count += 1;
        let expected = map_fields(rules, &fields)?;
        let actual = target
            .read(kind, id)
            .map_err(|e| Error::verification(kind, format!("record {id}: {e}")))?
            .to_fields();
        for rule in rules {
            let field = rule.field();
            if expected.get(field) != actual.get(field) {
                return Err(Error::verification(
                    kind,
                    format!(
                        "record {id} field {field}: expected {:?}, found {:?}",
                        expected.get(field),
                        actual.get(field)
                    ),
                ));
            }
        }
        Ok(())
    })?;

    if expected_count != count {
        return Err(Error::verification(
            kind,
            format!("{count} records in use, expected {expected_count}"),
        ));
    }
    Ok(())
}

fn verify_dynamic(
    source: &LegacyStore,
    target: &DynamicRecordStore,
    count: u64,
    control: &PassControl<'_>,
) -> Result<()> {
    let kind = source.kind();
    let (_, heads) = chain_heads(source, control)?;
    let mut expected_blocks = 0u64;
    for (n, head) in heads.iter().enumerate() {
        control.check(n as u64)?;
        let (_, expected) = source.read_chain(head)?;
        let actual = target
            .read_chain(head)
            .map_err(|e| Error::verification(kind, format!("chain {head}: {e}")))?;
        if actual != expected {
            return Err(Error::verification(
                kind,
                format!(
                    "chain {head} payload differs: {} bytes, expected {}",
                    actual.len(),
                    expected.len()
                ),
            ));
        }
        expected_blocks += block_count(expected.len(), target.capacity()) as u64;
    }

    if expected_blocks != count {
        return Err(Error::verification(
            kind,
            format!("{count} blocks in use, expected {expected_blocks}"),
        ));
    }
    Ok(())
}
