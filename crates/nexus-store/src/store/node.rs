use super::RecordStore;
use crate::error::Result;
use crate::record::NodeRecord;

/// Node store (nodes.store)
pub type NodeStore = RecordStore<NodeRecord>;

impl RecordStore<NodeRecord> {
    /// Allocate and write a fresh node with the given labels
    pub fn create_node(&self, labels: &[u32]) -> Result<u64> {
        let id = self.next_id()?;
        let mut record = NodeRecord::new();
        for &label in labels {
            record.add_label(label);
        }
        self.write(id, &record)?;
        Ok(id)
    }

    /// Point a node at a new property chain head
    pub fn set_property_head(&self, id: u64, head: u64) -> Result<()> {
        let mut record = self.read(id)?;
        if record.next_prop != head {
            record.next_prop = head;
            self.write(id, &record)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use crate::fs::{EphemeralFileSystem, FileSystemAbstraction};
    use crate::kind::StoreKind;
    use crate::record::NO_ID;
    use std::path::Path;

    #[test]
    fn test_create_node_with_labels() {
        let fs = EphemeralFileSystem::new();
        fs.create_dir_all(Path::new("/db")).unwrap();
        let config = StoreConfig::ephemeral(fs);
        let nodes = NodeStore::create(&config, Path::new("/db"), StoreKind::Node).unwrap();

        let a = nodes.create_node(&[1, 4]).unwrap();
        let b = nodes.create_node(&[]).unwrap();
        assert_eq!((a, b), (0, 1));

        let record = nodes.read(a).unwrap();
        assert!(record.has_label(1) && record.has_label(4));
        assert_eq!(record.next_rel, NO_ID);

        nodes.set_property_head(b, 12).unwrap();
        assert_eq!(nodes.read(b).unwrap().next_prop, 12);
    }
}
