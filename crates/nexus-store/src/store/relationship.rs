//! Relationship chains
//!
//! Every node owns a doubly-linked chain of its relationships, headed by the
//! node's `next_rel`. A relationship is a member of two chains, the start
//! node's (`first_*` pointers) and the end node's (`second_*` pointers); a
//! self-loop is a member of one chain with both pointer pairs kept equal.

use super::{NodeStore, RecordStore};
use crate::error::{Error, Result};
use crate::kind::StoreKind;
use crate::record::{NO_ID, RelationshipRecord};
use roaring::RoaringTreemap;

/// Relationship store (rels.store)
pub type RelationshipStore = RecordStore<RelationshipRecord>;

impl RecordStore<RelationshipRecord> {
    /// Create a relationship and link it at the head of both endpoint chains
    pub fn create_relationship(
        &self,
        nodes: &NodeStore,
        first_node: u64,
        second_node: u64,
        type_id: u32,
    ) -> Result<u64> {
        let mut first = nodes.read(first_node)?;
        let second_head = if first_node == second_node {
            first.next_rel
        } else {
            nodes.read(second_node)?.next_rel
        };

        let id = self.next_id()?;
        let mut rel = RelationshipRecord::new(first_node, second_node, type_id);
        rel.set_next_for(first_node, first.next_rel);
        rel.set_next_for(second_node, second_head);
        self.write(id, &rel)?;

        self.link_prev(first_node, first.next_rel, id)?;
        if second_node != first_node {
            self.link_prev(second_node, second_head, id)?;
        }

        first.next_rel = id;
        nodes.write(first_node, &first)?;
        if second_node != first_node {
            let mut second = nodes.read(second_node)?;
            second.next_rel = id;
            nodes.write(second_node, &second)?;
        }
        Ok(id)
    }

    fn link_prev(&self, node: u64, old_head: u64, id: u64) -> Result<()> {
        if old_head == NO_ID {
            return Ok(());
        }
        let mut head = self.read(old_head)?;
        head.set_prev_for(node, id);
        self.write(old_head, &head)
    }

    /// Unlink a relationship from both endpoint chains and delete it
    pub fn delete_relationship(&self, nodes: &NodeStore, id: u64) -> Result<RelationshipRecord> {
        let rel = self.read(id)?;
        let endpoints: &[u64] = if rel.is_loop() {
            &[rel.first_node]
        } else {
            &[rel.first_node, rel.second_node]
        };

        for &node in endpoints {
            let prev = rel.prev_for(node);
            let next = rel.next_for(node);
            if prev == NO_ID {
                let mut owner = nodes.read(node)?;
                if owner.next_rel != id {
                    return Err(Error::invalid_record(
                        StoreKind::Relationship,
                        id,
                        format!("no previous relationship but node {node} chain starts elsewhere"),
                    ));
                }
                owner.next_rel = next;
                nodes.write(node, &owner)?;
            } else {
                let mut before = self.read(prev)?;
                before.set_next_for(node, next);
                self.write(prev, &before)?;
            }
            if next != NO_ID {
                let mut after = self.read(next)?;
                after.set_prev_for(node, prev);
                self.write(next, &after)?;
            }
        }

        self.delete(id)?;
        Ok(rel)
    }

    /// Ids of `node`'s relationship chain, head first
    pub fn relationships_of(&self, nodes: &NodeStore, node: u64) -> Result<Vec<u64>> {
        let mut visited = RoaringTreemap::new();
        let mut ids = Vec::new();
        let mut current = nodes.read(node)?.next_rel;
        while current != NO_ID {
            if !visited.insert(current) {
                return Err(Error::invalid_record(
                    StoreKind::Relationship,
                    current,
                    format!("relationship chain of node {node} loops"),
                ));
            }
            let rel = self.read(current)?;
            if !rel.involves(node) {
                return Err(Error::invalid_record(
                    StoreKind::Relationship,
                    current,
                    format!("in chain of node {node} but not attached to it"),
                ));
            }
            ids.push(current);
            current = rel.next_for(node);
        }
        Ok(ids)
    }
}
