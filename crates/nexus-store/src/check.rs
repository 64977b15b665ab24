//! Store consistency checks
//!
//! [`check_store`] walks every in-use record of a [`GraphStore`] and reports
//! structural problems instead of failing on the first one: dangling
//! pointers, relationship chains whose back links disagree, property chains
//! that loop, broken or shared dynamic chains, unknown tokens and blocks no
//! chain reaches. I/O errors still abort the check.

use crate::error::Result;
use crate::kind::StoreKind;
use crate::record::NO_ID;
use crate::store::GraphStore;
use crate::value::{PropertyType, PropertyValue};
use roaring::RoaringTreemap;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Category of a consistency problem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum IssueType {
    /// Pointer to a record that is not in use or out of range
    DanglingPointer,
    /// Doubly-linked chain whose back pointer disagrees
    BrokenLink,
    /// Property chain or dynamic chain that cannot be walked
    BrokenChain,
    /// Block reached from more than one chain head
    SharedBlock,
    /// Reference to a token that does not exist
    UnknownToken,
    /// Value that does not decode
    InvalidValue,
    /// In-use record nothing points at
    Orphan,
}

/// One consistency problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConsistencyIssue {
    /// Store holding the offending record
    pub kind: StoreKind,
    /// Offending record id
    pub id: u64,
    /// Problem category
    pub issue_type: IssueType,
    /// Human readable description
    pub message: String,
}

impl fmt::Display for ConsistencyIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} record {}: {:?}: {}",
            self.kind, self.id, self.issue_type, self.message
        )
    }
}

/// Result of [`check_store`]
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ConsistencyReport {
    /// In-use records per store
    pub counts: BTreeMap<StoreKind, u64>,
    /// Problems found, in discovery order
    pub issues: Vec<ConsistencyIssue>,
}

impl ConsistencyReport {
    /// Whether no problems were found
    pub fn is_consistent(&self) -> bool {
        self.issues.is_empty()
    }

    /// In-use records of one store
    pub fn count(&self, kind: StoreKind) -> u64 {
        self.counts.get(&kind).copied().unwrap_or(0)
    }
}

/// Check every store of `store` for structural consistency
pub fn check_store(store: &GraphStore) -> Result<ConsistencyReport> {
    let mut checker = Checker::new(store)?;
    checker.check_nodes()?;
    checker.check_relationships()?;
    checker.check_tokens()?;
    checker.check_properties()?;
    checker.check_unreached();

    let report = ConsistencyReport {
        counts: checker
            .in_use
            .iter()
            .map(|(&kind, ids)| (kind, ids.len()))
            .collect(),
        issues: checker.issues,
    };
    info!(
        path = %store.dir().display(),
        issues = report.issues.len(),
        "consistency check finished"
    );
    Ok(report)
}

struct Checker<'a> {
    store: &'a GraphStore,
    in_use: BTreeMap<StoreKind, RoaringTreemap>,
    /// Property records and dynamic blocks reached from an owner
    reached: BTreeMap<StoreKind, RoaringTreemap>,
    issues: Vec<ConsistencyIssue>,
}

impl<'a> Checker<'a> {
    fn new(store: &'a GraphStore) -> Result<Self> {
        let mut in_use = BTreeMap::new();
        for kind in StoreKind::ALL {
            in_use.insert(kind, store.in_use_ids(kind)?);
        }
        Ok(Self {
            store,
            in_use,
            reached: BTreeMap::new(),
            issues: Vec::new(),
        })
    }

    fn ids(&self, kind: StoreKind) -> RoaringTreemap {
        self.in_use.get(&kind).cloned().unwrap_or_default()
    }

    fn is_in_use(&self, kind: StoreKind, id: u64) -> bool {
        id != NO_ID && self.in_use.get(&kind).is_some_and(|ids| ids.contains(id))
    }

    fn report(&mut self, kind: StoreKind, id: u64, issue_type: IssueType, message: String) {
        debug!(kind = %kind, id, ?issue_type, %message, "consistency issue");
        self.issues.push(ConsistencyIssue {
            kind,
            id,
            issue_type,
            message,
        });
    }

    /// Mark `id` reached; false when it already was
    fn reach(&mut self, kind: StoreKind, id: u64) -> bool {
        self.reached.entry(kind).or_default().insert(id)
    }

    fn check_nodes(&mut self) -> Result<()> {
        for id in self.ids(StoreKind::Node).iter() {
            let node = self.store.nodes().read(id)?;
            if node.next_rel != NO_ID {
                if !self.is_in_use(StoreKind::Relationship, node.next_rel) {
                    self.report(
                        StoreKind::Node,
                        id,
                        IssueType::DanglingPointer,
                        format!("first relationship {} is not in use", node.next_rel),
                    );
                } else {
                    let rel = self.store.relationships().read(node.next_rel)?;
                    if !rel.involves(id) {
                        self.report(
                            StoreKind::Node,
                            id,
                            IssueType::BrokenLink,
                            format!("first relationship {} is not attached", node.next_rel),
                        );
                    } else if rel.prev_for(id) != NO_ID {
                        self.report(
                            StoreKind::Node,
                            id,
                            IssueType::BrokenLink,
                            format!(
                                "first relationship {} has previous relationship {}",
                                node.next_rel,
                                rel.prev_for(id)
                            ),
                        );
                    }
                }
            }
            self.check_property_chain(StoreKind::Node, id, node.next_prop)?;
        }
        Ok(())
    }

    fn check_relationships(&mut self) -> Result<()> {
        for id in self.ids(StoreKind::Relationship).iter() {
            let rel = self.store.relationships().read(id)?;
            if !self.is_in_use(StoreKind::RelationshipType, u64::from(rel.type_id)) {
                self.report(
                    StoreKind::Relationship,
                    id,
                    IssueType::UnknownToken,
                    format!("relationship type {} does not exist", rel.type_id),
                );
            }
            if rel.is_loop()
                && (rel.first_prev_rel != rel.second_prev_rel
                    || rel.first_next_rel != rel.second_next_rel)
            {
                self.report(
                    StoreKind::Relationship,
                    id,
                    IssueType::BrokenLink,
                    "self-loop chain pointers differ".to_string(),
                );
            }

            let endpoints: &[u64] = if rel.is_loop() {
                &[rel.first_node]
            } else {
                &[rel.first_node, rel.second_node]
            };
            for &node in endpoints {
                if !self.is_in_use(StoreKind::Node, node) {
                    self.report(
                        StoreKind::Relationship,
                        id,
                        IssueType::DanglingPointer,
                        format!("endpoint node {node} is not in use"),
                    );
                    continue;
                }
                self.check_neighbour(id, node, rel.prev_for(node), true)?;
                self.check_neighbour(id, node, rel.next_for(node), false)?;
            }
            self.check_property_chain(StoreKind::Relationship, id, rel.next_prop)?;
        }
        Ok(())
    }

    /// Check one chain neighbour of relationship `id` in `node`'s chain
    fn check_neighbour(&mut self, id: u64, node: u64, other: u64, is_prev: bool) -> Result<()> {
        let side = if is_prev { "previous" } else { "next" };
        if other == NO_ID {
            if is_prev {
                let head = self.store.nodes().read(node)?.next_rel;
                if head != id {
                    self.report(
                        StoreKind::Relationship,
                        id,
                        IssueType::BrokenLink,
                        format!("no previous relationship but node {node} chain starts at {head}"),
                    );
                }
            }
            return Ok(());
        }
        if !self.is_in_use(StoreKind::Relationship, other) {
            self.report(
                StoreKind::Relationship,
                id,
                IssueType::DanglingPointer,
                format!("{side} relationship {other} for node {node} is not in use"),
            );
            return Ok(());
        }
        let neighbour = self.store.relationships().read(other)?;
        let back = if is_prev {
            neighbour.next_for(node)
        } else {
            neighbour.prev_for(node)
        };
        if !neighbour.involves(node) || back != id {
            self.report(
                StoreKind::Relationship,
                id,
                IssueType::BrokenLink,
                format!("{side} relationship {other} for node {node} does not link back"),
            );
        }
        Ok(())
    }

    fn check_property_chain(&mut self, owner_kind: StoreKind, owner: u64, head: u64) -> Result<()> {
        if head == NO_ID {
            return Ok(());
        }
        if !self.is_in_use(StoreKind::Property, head) {
            self.report(
                owner_kind,
                owner,
                IssueType::DanglingPointer,
                format!("property chain head {head} is not in use"),
            );
            return Ok(());
        }
        match self.store.properties().chain(head) {
            Ok(chain) => {
                let head_prev = chain.first().map_or(NO_ID, |(_, first)| first.prev_prop);
                if head_prev != NO_ID {
                    self.report(
                        StoreKind::Property,
                        head,
                        IssueType::BrokenLink,
                        format!("chain head has previous property {head_prev}"),
                    );
                }
                let mut prev = NO_ID;
                for (id, record) in chain {
                    if !self.reach(StoreKind::Property, id) {
                        self.report(
                            StoreKind::Property,
                            id,
                            IssueType::SharedBlock,
                            "property belongs to more than one chain".to_string(),
                        );
                    }
                    if prev != NO_ID && record.prev_prop != prev {
                        self.report(
                            StoreKind::Property,
                            id,
                            IssueType::BrokenLink,
                            format!("previous property is {}, expected {prev}", record.prev_prop),
                        );
                    }
                    prev = id;
                }
            }
            Err(e) => self.report(
                owner_kind,
                owner,
                IssueType::BrokenChain,
                format!("property chain from {head}: {e}"),
            ),
        }
        Ok(())
    }

    fn check_properties(&mut self) -> Result<()> {
        for id in self.ids(StoreKind::Property).iter() {
            let record = self.store.properties().records().read(id)?;
            if !self.is_in_use(StoreKind::PropertyKey, u64::from(record.key_id)) {
                self.report(
                    StoreKind::Property,
                    id,
                    IssueType::UnknownToken,
                    format!("property key {} does not exist", record.key_id),
                );
            }
            let Some(value_type) = record.property_type() else {
                self.report(
                    StoreKind::Property,
                    id,
                    IssueType::InvalidValue,
                    format!("unknown value type {}", record.value_type),
                );
                continue;
            };
            let dynamic_kind = match value_type {
                PropertyType::String => Some(StoreKind::PropertyString),
                PropertyType::Array => Some(StoreKind::PropertyArray),
                _ => None,
            };
            match dynamic_kind {
                Some(kind) => {
                    if !self.check_dynamic_chain(kind, record.prop_block, StoreKind::Property, id)? {
                        continue;
                    }
                    if let Err(e) = self.store.properties().decode_value(id, &record) {
                        self.report(
                            StoreKind::Property,
                            id,
                            IssueType::InvalidValue,
                            e.to_string(),
                        );
                    }
                }
                None => {
                    if let Err(e) = PropertyValue::from_inline(value_type, record.prop_block) {
                        self.report(
                            StoreKind::Property,
                            id,
                            IssueType::InvalidValue,
                            e.to_string(),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    fn check_tokens(&mut self) -> Result<()> {
        let graph = self.store;
        for (kind, names_kind) in [
            (StoreKind::RelationshipType, StoreKind::RelationshipTypeName),
            (StoreKind::PropertyKey, StoreKind::PropertyKeyName),
        ] {
            let Some(names) = graph.dynamic_store(names_kind) else {
                continue;
            };
            for id in self.ids(kind).iter() {
                let record = match kind {
                    StoreKind::RelationshipType => graph.relationship_types().records().read(id)?,
                    _ => graph.property_keys().records().read(id)?,
                };
                if self.check_dynamic_chain(names_kind, record.name_id, kind, id)? {
                    let bytes = names.read_chain(record.name_id)?;
                    if String::from_utf8(bytes).is_err() {
                        self.report(
                            kind,
                            id,
                            IssueType::InvalidValue,
                            "token name is not UTF-8".to_string(),
                        );
                    }
                }
            }
        }
        Ok(())
    }

    /// Walk one dynamic chain and mark its blocks; false when it is broken
    fn check_dynamic_chain(
        &mut self,
        kind: StoreKind,
        head: u64,
        owner_kind: StoreKind,
        owner: u64,
    ) -> Result<bool> {
        let Some(store) = self.store.dynamic_store(kind) else {
            return Ok(false);
        };
        match store.chain_ids(head) {
            Ok(ids) => {
                for block in ids {
                    if !self.reach(kind, block) {
                        self.report(
                            kind,
                            block,
                            IssueType::SharedBlock,
                            format!("block reached again from {owner_kind} record {owner}"),
                        );
                    }
                }
                Ok(true)
            }
            Err(e) => {
                self.report(
                    owner_kind,
                    owner,
                    IssueType::BrokenChain,
                    format!("{kind} chain from {head}: {e}"),
                );
                Ok(false)
            }
        }
    }

    fn check_unreached(&mut self) {
        for kind in StoreKind::ALL {
            if kind != StoreKind::Property && !kind.is_dynamic() {
                continue;
            }
            let reached = self.reached.get(&kind).cloned().unwrap_or_default();
            let orphans = self.ids(kind) - reached;
            for id in orphans.iter() {
                let what = if kind.is_dynamic() { "block" } else { "property" };
                self.report(
                    kind,
                    id,
                    IssueType::Orphan,
                    format!("{what} is in use but not reachable from any owner"),
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::fs::EphemeralFileSystem;
    use crate::record::{DynamicRecord, PropertyRecord, Record};
    use crate::value::ArrayValue;
    use std::path::Path;

    fn populated() -> GraphStore {
        let store =
            GraphStore::create(Path::new("/g"), StoreConfig::ephemeral(EphemeralFileSystem::new()))
                .unwrap();
        let a = store.create_node(&[1]).unwrap();
        let b = store.create_node(&[]).unwrap();
        let r = store.create_relationship(a, b, "KNOWS").unwrap();
        store.create_relationship(a, a, "SELF").unwrap();
        store.set_node_property(a, "name", "z".repeat(300).into()).unwrap();
        store
            .set_node_property(b, "list", ArrayValue::Int((0..100).collect()).into())
            .unwrap();
        store
            .set_relationship_property(r, "weight", PropertyValue::Double(0.5))
            .unwrap();
        store
    }

    #[test]
    fn test_clean_store_is_consistent() {
        let store = populated();
        let report = check_store(&store).unwrap();
        assert!(report.is_consistent(), "{:?}", report.issues);
        assert_eq!(report.count(StoreKind::Node), 2);
        assert_eq!(report.count(StoreKind::Relationship), 2);
        assert_eq!(report.count(StoreKind::Property), 3);
    }

    #[test]
    fn test_dangling_relationship_endpoint() {
        let store = populated();
        let mut rel = store.relationships().read(0).unwrap();
        rel.second_node = 77;
        store.relationships().write(0, &rel).unwrap();

        let report = check_store(&store).unwrap();
        assert!(report.issues.iter().any(|i| {
            i.kind == StoreKind::Relationship
                && i.id == 0
                && i.issue_type == IssueType::DanglingPointer
        }));
    }

    #[test]
    fn test_broken_back_link() {
        let store = populated();
        // relationship 1 (the self-loop) sits in front of 0 in node 0's chain
        let mut rel = store.relationships().read(0).unwrap();
        rel.first_prev_rel = NO_ID;
        store.relationships().write(0, &rel).unwrap();

        let report = check_store(&store).unwrap();
        assert!(
            report
                .issues
                .iter()
                .any(|i| i.issue_type == IssueType::BrokenLink)
        );
    }

    #[test]
    fn test_orphan_block_and_property() {
        let store = populated();
        let block = store.next_id(StoreKind::PropertyString).unwrap();
        store
            .properties()
            .strings()
            .records()
            .write(block, &DynamicRecord::new(b"stray".to_vec(), NO_ID))
            .unwrap();
        let prop = store.properties().records().next_id().unwrap();
        store
            .properties()
            .records()
            .write(prop, &PropertyRecord::new(0, PropertyType::Int.tag(), 3))
            .unwrap();

        let report = check_store(&store).unwrap();
        let orphans: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.issue_type == IssueType::Orphan)
            .map(|i| (i.kind, i.id))
            .collect();
        assert_eq!(
            orphans,
            vec![(StoreKind::Property, prop), (StoreKind::PropertyString, block)]
        );
    }

    #[test]
    fn test_broken_string_chain() {
        let store = populated();
        let (_, record) = store
            .properties()
            .find(store.nodes().read(0).unwrap().next_prop, 0)
            .unwrap()
            .unwrap();
        let ids = store.properties().strings().chain_ids(record.prop_block).unwrap();
        let mut tail = store.properties().strings().records().read(ids[1]).unwrap();
        tail.set_in_use(false);
        store.properties().strings().records().write(ids[1], &tail).unwrap();

        let report = check_store(&store).unwrap();
        assert!(
            report
                .issues
                .iter()
                .any(|i| i.kind == StoreKind::Property && i.issue_type == IssueType::BrokenChain)
        );
    }
}
