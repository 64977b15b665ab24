//! Copying phase: one independent pass per store kind
//!
//! Ids are preserved. Fixed records are translated slot by slot through the
//! field mapping. Dynamic chains keep their head id, reuse their legacy block
//! ids in order and take extra ids past the legacy watermark when the new
//! block capacity needs more blocks. Ids not in use afterwards are released,
//! legacy free-list order first.

use super::CancellationToken;
use super::layout::{LEGACY_NO_ID, LegacyStore};
use super::mapping::{FieldRule, field_mapping, map_fields};
use crate::error::{Error, Result};
use crate::kind::RecordClass;
use crate::record::{Field, Record};
use crate::store::{DynamicRecordStore, FormatVersion, GraphStore, RecordStore, block_count};
use roaring::RoaringTreemap;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::debug;

/// Counters of one store pass
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    /// In-use legacy records copied
    pub records_copied: u64,
    /// Legacy slots not in use
    pub records_skipped: u64,
    /// Dynamic chains rewritten
    pub chains: u64,
    /// Dynamic blocks written
    pub blocks_written: u64,
    /// Watermark of the new store
    pub high_id: u64,
}

/// Cancellation checks shared by all passes of one run
pub(crate) struct PassControl<'a> {
    cancel: &'a CancellationToken,
    failed: &'a AtomicBool,
    batch: u64,
}

impl<'a> PassControl<'a> {
    pub(crate) fn new(cancel: &'a CancellationToken, failed: &'a AtomicBool, batch: usize) -> Self {
        Self {
            cancel,
            failed,
            batch: batch.max(1) as u64,
        }
    }

    /// Stop at batch boundaries when cancelled or when a sibling pass failed
    pub(crate) fn check(&self, processed: u64) -> Result<()> {
        if processed % self.batch == 0
            && (self.cancel.is_cancelled() || self.failed.load(Ordering::Relaxed))
        {
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    pub(crate) fn mark_failed(&self) {
        self.failed.store(true, Ordering::Relaxed);
    }
}

/// Copy one legacy store into the matching store of `target`
pub(crate) fn copy_store(
    legacy: &LegacyStore,
    target: &GraphStore,
    version: FormatVersion,
    control: &PassControl<'_>,
) -> Result<PassStats> {
    let kind = legacy.kind();
    let class = kind.record_class();
    let rules = field_mapping(version, class).ok_or_else(|| Error::UnsupportedVersion {
        path: legacy.path().to_path_buf(),
        found: version.marker(kind),
    })?;
    let missing = || Error::storage(format!("target has no store for {kind}"));

    let stats = match class {
        RecordClass::Node => copy_fixed(legacy, target.nodes(), rules, control)?,
        RecordClass::Relationship => copy_fixed(legacy, target.relationships(), rules, control)?,
        RecordClass::Property => {
            copy_fixed(legacy, target.properties().records(), rules, control)?
        }
        RecordClass::Token => {
            let tokens = target.token_store(kind).ok_or_else(missing)?;
            copy_fixed(legacy, tokens.records(), rules, control)?
        }
        RecordClass::Dynamic => {
            let store = target.dynamic_store(kind).ok_or_else(missing)?;
            copy_dynamic(legacy, store, control)?
        }
    };
    debug!(
        kind = %kind,
        copied = stats.records_copied,
        skipped = stats.records_skipped,
        high_id = stats.high_id,
        "store pass finished"
    );
    Ok(stats)
}

fn copy_fixed<R: Record>(
    legacy: &LegacyStore,
    target: &RecordStore<R>,
    rules: &[FieldRule],
    control: &PassControl<'_>,
) -> Result<PassStats> {
    let kind = legacy.kind();
    let mut stats = PassStats::default();
    let mut free = RoaringTreemap::new();

    legacy.scan(|id, fields, _| {
        control.check(id)?;
        if !fields.in_use() {
            free.insert(id);
            stats.records_skipped += 1;
            return Ok(());
        }
        let mapped = map_fields(rules, &fields)
            .map_err(|e| Error::invalid_record(kind, id, e.to_string()))?;
        let record =
            R::from_fields(&mapped).map_err(|e| Error::invalid_record(kind, id, e.to_string()))?;
        target.write(id, &record)?;
        stats.records_copied += 1;
        Ok(())
    })?;

    let high = legacy.high_id();
    free.insert_range(legacy.slots()..high);
    release_ids(target, legacy.free_ids(), &free, high)?;
    stats.high_id = high;
    Ok(stats)
}

/// In-use blocks of a legacy dynamic store and the heads of its chains
pub(crate) fn chain_heads(
    legacy: &LegacyStore,
    control: &PassControl<'_>,
) -> Result<(RoaringTreemap, RoaringTreemap)> {
    let mut in_use = RoaringTreemap::new();
    let mut referenced = RoaringTreemap::new();
    legacy.scan(|id, fields, _| {
        control.check(id)?;
        if fields.in_use() {
            in_use.insert(id);
            let next = fields.require(Field::NextBlock)?;
            if next != LEGACY_NO_ID {
                referenced.insert(next);
            }
        }
        Ok(())
    })?;
    let heads = &in_use - &referenced;
    Ok((in_use, heads))
}

fn copy_dynamic(
    legacy: &LegacyStore,
    target: &DynamicRecordStore,
    control: &PassControl<'_>,
) -> Result<PassStats> {
    let kind = legacy.kind();
    let (in_use, heads) = chain_heads(legacy, control)?;

    let mut stats = PassStats::default();
    let mut covered = RoaringTreemap::new();
    let mut written = RoaringTreemap::new();
    let mut spare = legacy.high_id();

    for (n, head) in heads.iter().enumerate() {
        control.check(n as u64)?;
        let (ids, bytes) = legacy.read_chain(head)?;
        for &id in &ids {
            if !covered.insert(id) {
                return Err(Error::broken_chain(kind, id, "block belongs to two chains"));
            }
        }

        let needed = block_count(bytes.len(), target.capacity());
        let mut new_ids: Vec<u64> = ids.iter().copied().take(needed).collect();
        while new_ids.len() < needed {
            new_ids.push(spare);
            spare += 1;
        }
        target.write_chain(&new_ids, &bytes)?;

        stats.chains += 1;
        stats.blocks_written += new_ids.len() as u64;
        written.extend(new_ids);
    }

    let stranded = &in_use - &covered;
    if let Some(id) = stranded.min() {
        return Err(Error::broken_chain(
            kind,
            id,
            "in-use block is not reachable from any chain head",
        ));
    }

    let high = spare;
    let mut free = RoaringTreemap::new();
    free.insert_range(0..high);
    free -= &written;
    release_ids(target.records(), legacy.free_ids(), &free, high)?;

    stats.records_copied = in_use.len();
    stats.records_skipped = legacy.slots() - in_use.len();
    stats.high_id = high;
    Ok(stats)
}

/// Size the new store to `high` and release every id in `free`, those in
/// `order` first and in that order, the rest ascending
fn release_ids<R: Record>(
    target: &RecordStore<R>,
    order: &[u64],
    free: &RoaringTreemap,
    high: u64,
) -> Result<()> {
    target.ensure_slots(high)?;
    let mut released = RoaringTreemap::new();
    for &id in order {
        if free.contains(id) && released.insert(id) {
            target.free_id(id)?;
        }
    }
    for id in free.iter() {
        if released.insert(id) {
            target.free_id(id)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_control_checks_at_batch_boundaries() {
        let cancel = CancellationToken::new();
        let failed = AtomicBool::new(false);
        let control = PassControl::new(&cancel, &failed, 4);
        control.check(0).unwrap();

        cancel.cancel();
        assert!(control.check(3).is_ok());
        assert!(matches!(control.check(4), Err(Error::Cancelled)));
    }

    #[test]
    fn test_sibling_failure_stops_pass() {
        let cancel = CancellationToken::new();
        let failed = AtomicBool::new(false);
        let control = PassControl::new(&cancel, &failed, 1);
        control.mark_failed();
        assert!(matches!(control.check(7), Err(Error::Cancelled)));
        assert!(!cancel.is_cancelled());
    }
}
