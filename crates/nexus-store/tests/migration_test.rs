//! End-to-end store migration
//!
//! Legacy directories are produced with `LegacyStoreBuilder`, migrated, and
//! compared against the graph they were built from. Failure cases check the
//! source directory is byte-identical afterwards and the target is gone.

use nexus_store::check::IssueType;
use nexus_store::fs::{
    DefaultFileSystem, EphemeralFileSystem, FileSystemAbstraction, OpenMode, copy_recursively,
};
use nexus_store::migration::{
    CancellationToken, LegacyIdFile, MigrationPhase, backup_dir, detect_version,
    upgrade_staging_dir,
};
use nexus_store::store::StoreHeader;
use nexus_store::testing::{
    FaultyFileSystem, LegacyStoreBuilder, TestContext, make_long_array, make_long_string,
    snapshot_dir,
};
use nexus_store::{
    Error, FormatVersion, GraphStore, MigrationResult, MigrationStatus, PropertyValue, StoreConfig,
    StoreKind, StoreMigrator, StoreSettings, check_store, open_store,
};
use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::sync::Arc;

/// Expected contents of the fixture graph
struct Expected {
    nodes: BTreeMap<u64, BTreeMap<String, PropertyValue>>,
    rels: BTreeMap<u64, (String, BTreeMap<String, PropertyValue>)>,
    adjacency: BTreeMap<u64, Vec<u64>>,
    high_ids: BTreeMap<StoreKind, u64>,
    deleted_node: u64,
}

fn legacy_graph() -> (LegacyStoreBuilder, Expected) {
    let builder = LegacyStoreBuilder::new().unwrap();
    let s = builder.store();

    let alice = s.create_node(&[]).unwrap();
    let bob = s.create_node(&[]).unwrap();
    let carol = s.create_node(&[]).unwrap();
    let temp = s.create_node(&[]).unwrap();
    let dave = s.create_node(&[]).unwrap();

    s.set_node_property(alice, "name", "Alice".into()).unwrap();
    s.set_node_property(alice, "age", 42i64.into()).unwrap();
    s.set_node_property(alice, "bio", make_long_string()).unwrap();
    s.set_node_property(alice, "scores", make_long_array()).unwrap();
    s.set_node_property(bob, "name", "Bob".into()).unwrap();
    s.set_node_property(bob, "active", true.into()).unwrap();
    s.set_node_property(carol, "weight", 61.5f64.into()).unwrap();
    s.set_node_property(temp, "scratch", "gone soon".into()).unwrap();
    s.set_node_property(dave, "name", "".into()).unwrap();

    let knows = s.create_relationship(alice, bob, "KNOWS").unwrap();
    let likes = s.create_relationship(bob, carol, "LIKES").unwrap();
    let own = s.create_relationship(carol, carol, "SELF").unwrap();
    let again = s.create_relationship(alice, carol, "KNOWS").unwrap();
    s.set_relationship_property(knows, "since", 2020i64.into()).unwrap();
    s.set_relationship_property(likes, "note", make_long_string()).unwrap();

    s.delete_node(temp).unwrap();

    let mut expected = Expected {
        nodes: BTreeMap::new(),
        rels: BTreeMap::new(),
        adjacency: BTreeMap::new(),
        high_ids: BTreeMap::new(),
        deleted_node: temp,
    };
    for node in [alice, bob, carol, dave] {
        expected.nodes.insert(node, s.node_properties(node).unwrap());
        expected.adjacency.insert(node, s.relationships_of(node).unwrap());
    }
    for rel in [knows, likes, own, again] {
        expected.rels.insert(
            rel,
            (
                s.relationship_type_name(rel).unwrap(),
                s.relationship_properties(rel).unwrap(),
            ),
        );
    }
    for kind in [StoreKind::Node, StoreKind::Relationship, StoreKind::Property] {
        expected.high_ids.insert(kind, s.high_id(kind).unwrap());
    }
    (builder, expected)
}

fn assert_matches(store: &GraphStore, expected: &Expected) {
    for (&node, props) in &expected.nodes {
        assert_eq!(&store.node_properties(node).unwrap(), props, "node {node}");
        assert_eq!(
            &store.relationships_of(node).unwrap(),
            &expected.adjacency[&node],
            "adjacency of {node}"
        );
    }
    for (&rel, (name, props)) in &expected.rels {
        assert_eq!(&store.relationship_type_name(rel).unwrap(), name);
        assert_eq!(&store.relationship_properties(rel).unwrap(), props);
    }
    for (&kind, &high) in &expected.high_ids {
        assert_eq!(store.high_id(kind).unwrap(), high, "high id of {kind}");
    }
    assert!(
        store
            .read(StoreKind::Node, expected.deleted_node)
            .is_err()
    );
    let report = check_store(store).unwrap();
    assert!(report.is_consistent(), "{:?}", report.issues);
}

fn ephemeral_legacy() -> (EphemeralFileSystem, Expected) {
    let fs = EphemeralFileSystem::new();
    let (builder, expected) = legacy_graph();
    builder.write_to(&fs, Path::new("/data/graph")).unwrap();
    (fs, expected)
}

fn sequential(config: StoreConfig) -> StoreConfig {
    let settings = StoreSettings {
        parallel_migration: false,
        ..config.settings.clone()
    };
    config.with_settings(settings)
}

#[test]
fn test_migration_preserves_graph() {
    let (fs, expected) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    let target = upgrade_staging_dir(source);
    let config = StoreConfig::ephemeral(fs.clone());

    let result = StoreMigrator::new(config.clone()).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Committed, "{:?}", result.error);
    assert_eq!(result.phase, MigrationPhase::Committed);
    assert_eq!(result.stats.source_version, Some(FormatVersion::V1));
    assert_eq!(result.stats.stores.len(), StoreKind::ALL.len());
    assert_eq!(result.stats.stores[&StoreKind::Node].records_copied, 4);

    assert!(!fs.exists(&target));
    assert!(!fs.exists(&backup_dir(source)));
    assert_eq!(detect_version(&fs, source).unwrap(), FormatVersion::CURRENT);

    let store = GraphStore::open(source, config).unwrap();
    assert_matches(&store, &expected);

    // the freed node id comes back before the store grows
    assert_eq!(store.next_id(StoreKind::Node).unwrap(), expected.deleted_node);
}

#[test]
fn test_sequential_migration_matches_parallel() {
    let (fs, expected) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    let config = sequential(StoreConfig::ephemeral(fs.clone()));

    let result = StoreMigrator::new(config.clone()).migrate(source, &upgrade_staging_dir(source));
    assert!(result.is_success(), "{:?}", result.error_detail());
    let store = GraphStore::open(source, config).unwrap();
    assert_matches(&store, &expected);
}

#[test]
fn test_legacy_free_list_order_is_kept() {
    let fs = EphemeralFileSystem::new();
    let builder = LegacyStoreBuilder::new().unwrap();
    for _ in 0..10 {
        builder.store().create_node(&[]).unwrap();
    }
    for id in [7, 3, 9] {
        builder.store().delete_node(id).unwrap();
    }
    let source = Path::new("/graph");
    builder.write_to(&fs, source).unwrap();

    // the legacy writer released 9 before 3 before 7
    let id_file = source.join(StoreKind::Node.id_file_name());
    LegacyIdFile {
        sticky: false,
        high_id: 10,
        free_ids: vec![9, 3, 7],
    }
    .write(&fs, &id_file)
    .unwrap();

    let config = StoreConfig::ephemeral(fs.clone());
    let result = StoreMigrator::new(config.clone()).migrate(source, &upgrade_staging_dir(source));
    assert_eq!(result.status, MigrationStatus::Committed);

    let store = GraphStore::open(source, config).unwrap();
    let reused: Vec<u64> = (0..4)
        .map(|_| store.next_id(StoreKind::Node).unwrap())
        .collect();
    assert_eq!(reused, vec![9, 3, 7, 10]);
}

#[test]
fn test_current_store_is_noop() {
    let fs = EphemeralFileSystem::new();
    let config = StoreConfig::ephemeral(fs.clone());
    let source = Path::new("/graph");
    GraphStore::create(source, config.clone())
        .unwrap()
        .close()
        .unwrap();
    let before = snapshot_dir(&fs, source).unwrap();

    let target = upgrade_staging_dir(source);
    let result = StoreMigrator::new(config).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::NoOp);
    assert!(result.is_success());
    assert!(!fs.exists(&target));
    assert_eq!(snapshot_dir(&fs, source).unwrap(), before);
}

#[test]
fn test_unknown_version_is_rejected() {
    let (fs, _) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    for kind in StoreKind::ALL {
        let file = fs
            .open(&source.join(kind.file_name()), OpenMode::ReadWrite)
            .unwrap();
        let mut header = [0u8; 28];
        let marker = format!("{} nx-9.9", kind.descriptor());
        header[..marker.len()].copy_from_slice(marker.as_bytes());
        file.write_at(0, &header).unwrap();
    }
    let before = snapshot_dir(&fs, source).unwrap();

    let target = upgrade_staging_dir(source);
    let result = StoreMigrator::new(StoreConfig::ephemeral(fs.clone())).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Failed);
    assert_eq!(result.failed_phase, Some(MigrationPhase::Detected));
    assert!(matches!(result.error, Some(Error::UnsupportedVersion { .. })));
    assert!(!fs.exists(&target));
    assert_eq!(snapshot_dir(&fs, source).unwrap(), before);
}

#[test]
fn test_existing_target_is_refused_and_kept() {
    let (fs, _) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    let target = upgrade_staging_dir(source);
    fs.create_dir_all(&target).unwrap();
    fs.open(&target.join("keep.txt"), OpenMode::Truncate)
        .unwrap()
        .write_at(0, b"mine")
        .unwrap();

    let result = StoreMigrator::new(StoreConfig::ephemeral(fs.clone())).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Failed);
    assert_eq!(result.failed_phase, Some(MigrationPhase::Preparing));
    assert!(fs.exists(&target.join("keep.txt")));
}

fn migrate_with_write_fault(writes: u64) -> (MigrationResult, bool) {
    let (fs, _) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    let target = upgrade_staging_dir(source);
    let before = snapshot_dir(&fs, source).unwrap();

    let faulty = FaultyFileSystem::new(Arc::new(fs.clone()));
    faulty.fail_writes_after(&target, writes);
    let config = StoreConfig::ephemeral(fs.clone()).with_fs(Arc::new(faulty.clone()));

    let result = StoreMigrator::new(config).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Failed, "after {writes} writes");
    assert_eq!(result.phase, MigrationPhase::Aborted);
    assert!(faulty.injected_faults() > 0);
    assert!(!fs.exists(&target), "target left behind after {writes} writes");
    let untouched = snapshot_dir(&fs, source).unwrap() == before;
    (result, untouched)
}

#[test]
fn test_write_fault_while_preparing_leaves_source_untouched() {
    for writes in [0, 5] {
        let (result, untouched) = migrate_with_write_fault(writes);
        assert_eq!(result.failed_phase, Some(MigrationPhase::Preparing), "after {writes} writes");
        assert!(untouched, "source changed after {writes} writes");
    }
}

#[test]
fn test_write_fault_while_copying_leaves_source_untouched() {
    for writes in [40, 80] {
        let (result, untouched) = migrate_with_write_fault(writes);
        assert_eq!(result.failed_phase, Some(MigrationPhase::Copying), "after {writes} writes");
        assert!(untouched, "source changed after {writes} writes");
    }
}

#[test]
fn test_dangling_relationship_fails_verification() {
    let (fs, _) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    let target = upgrade_staging_dir(source);

    // first_next_rel of relationship 0 points past the last relationship
    let path = source.join(StoreKind::Relationship.file_name());
    let file = fs.open(&path, OpenMode::ReadWrite).unwrap();
    let header = StoreHeader::read(file.as_ref(), &path).unwrap();
    file.write_at(header.offset_of(0) + 17, &7u32.to_le_bytes())
        .unwrap();
    drop(file);
    let before = snapshot_dir(&fs, source).unwrap();

    let result = StoreMigrator::new(StoreConfig::ephemeral(fs.clone())).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Failed);
    assert_eq!(result.phase, MigrationPhase::Aborted);
    assert_eq!(result.failed_phase, Some(MigrationPhase::Verifying));
    assert!(matches!(
        result.error,
        Some(Error::MigrationVerification { .. })
    ));
    assert!(result.error_detail().unwrap().ends_with("(while verifying)"));
    assert!(!fs.exists(&target));
    assert_eq!(snapshot_dir(&fs, source).unwrap(), before);
}

#[test]
fn test_unreachable_legacy_block_is_carried_over() {
    let builder = LegacyStoreBuilder::new().unwrap();
    let s = builder.store();
    let node = s.create_node(&[]).unwrap();
    s.set_node_property(node, "name", "Alice".into()).unwrap();
    let strings = s.dynamic_store(StoreKind::PropertyString).unwrap();
    let stray = strings.allocate_chain(b"stray").unwrap();
    let long_stray = strings.allocate_chain(&[7u8; 1000]).unwrap();

    let fs = EphemeralFileSystem::new();
    let source = Path::new("/data/graph");
    builder.write_to(&fs, source).unwrap();
    let target = upgrade_staging_dir(source);

    let result = StoreMigrator::new(StoreConfig::ephemeral(fs.clone())).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Committed, "{:?}", result.error);

    let store = GraphStore::open(source, StoreConfig::ephemeral(fs.clone())).unwrap();
    assert_eq!(
        store.node_properties(node).unwrap()["name"],
        PropertyValue::from("Alice")
    );
    let strings = store.dynamic_store(StoreKind::PropertyString).unwrap();
    assert_eq!(strings.read_chain(stray).unwrap(), b"stray".to_vec());
    assert_eq!(strings.read_chain(long_stray).unwrap(), vec![7u8; 1000]);

    let report = check_store(&store).unwrap();
    assert!(!report.issues.is_empty());
    assert!(
        report
            .issues
            .iter()
            .all(|i| i.issue_type == IssueType::Orphan && i.kind == StoreKind::PropertyString)
    );
}

#[test]
fn test_failed_install_restores_source() {
    let (fs, _) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    let target = upgrade_staging_dir(source);
    let before = snapshot_dir(&fs, source).unwrap();

    let faulty = FaultyFileSystem::new(Arc::new(fs.clone()));
    faulty.fail_renames_from(&target, io::ErrorKind::PermissionDenied);
    let config = StoreConfig::ephemeral(fs.clone()).with_fs(Arc::new(faulty));

    let result = StoreMigrator::new(config).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Failed);
    assert_eq!(result.failed_phase, Some(MigrationPhase::Committed));
    assert!(!fs.exists(&target));
    assert!(!fs.exists(&backup_dir(source)));
    assert_eq!(snapshot_dir(&fs, source).unwrap(), before);
}

#[test]
fn test_cancelled_before_copy() {
    let (fs, _) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    let target = upgrade_staging_dir(source);
    let before = snapshot_dir(&fs, source).unwrap();

    let token = CancellationToken::new();
    token.cancel();
    let migrator =
        StoreMigrator::new(StoreConfig::ephemeral(fs.clone())).with_cancellation(token);
    let result = migrator.migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Cancelled);
    assert!(matches!(result.into_error(), Error::Cancelled));
    assert!(!fs.exists(&target));
    assert_eq!(snapshot_dir(&fs, source).unwrap(), before);
}

#[test]
fn test_broken_legacy_chain_fails_copy() {
    let (fs, _) = ephemeral_legacy();
    let source = Path::new("/data/graph");
    let target = upgrade_staging_dir(source);

    // point the first string block back at itself
    let path = source.join(StoreKind::PropertyString.file_name());
    let file = fs.open(&path, OpenMode::ReadWrite).unwrap();
    let header = StoreHeader::read(file.as_ref(), &path).unwrap();
    file.write_at(header.offset_of(0) + 5, &0u32.to_le_bytes())
        .unwrap();
    drop(file);
    let before = snapshot_dir(&fs, source).unwrap();

    let result = StoreMigrator::new(StoreConfig::ephemeral(fs.clone())).migrate(source, &target);
    assert_eq!(result.status, MigrationStatus::Failed);
    assert_eq!(result.failed_phase, Some(MigrationPhase::Copying));
    assert!(matches!(result.error, Some(Error::BrokenChain { .. })));
    assert!(!fs.exists(&target));
    assert_eq!(snapshot_dir(&fs, source).unwrap(), before);
}

#[test]
fn test_cross_device_commit_on_disk() {
    let ctx = TestContext::new();
    let source = ctx.store_dir();
    let target = ctx.path().join("elsewhere").join("graph.new");
    let (builder, expected) = legacy_graph();
    builder.write_to(&DefaultFileSystem, &source).unwrap();

    let faulty = FaultyFileSystem::new(Arc::new(DefaultFileSystem));
    faulty.fail_renames_from(&target, io::ErrorKind::CrossesDevices);
    let config = ctx.config().with_fs(Arc::new(faulty.clone()));

    let result = StoreMigrator::new(config).migrate(&source, &target);
    assert_eq!(result.status, MigrationStatus::Committed, "{:?}", result.error);
    assert_eq!(faulty.injected_faults(), 1);
    assert!(!target.exists());
    assert!(!backup_dir(&source).exists());

    let store = GraphStore::open(&source, ctx.config()).unwrap();
    assert_matches(&store, &expected);
}

#[test]
fn test_open_store_upgrades_when_allowed() {
    let (fs, expected) = ephemeral_legacy();
    let source = Path::new("/data/graph");

    let refused = open_store(source, StoreConfig::ephemeral(fs.clone())).unwrap_err();
    assert!(matches!(refused, Error::StoreVersionMismatch { .. }));

    let settings = StoreSettings {
        allow_store_upgrade: true,
        ..StoreSettings::default()
    };
    let config = StoreConfig::ephemeral(fs.clone()).with_settings(settings);
    let store = open_store(source, config).unwrap();
    assert_matches(&store, &expected);
    assert!(!fs.exists(&upgrade_staging_dir(source)));
}

#[test]
fn test_normal_open_of_legacy_store_fails() {
    let (fs, _) = ephemeral_legacy();
    let err = GraphStore::open(Path::new("/data/graph"), StoreConfig::ephemeral(fs)).unwrap_err();
    assert!(matches!(err, Error::StoreVersionMismatch { .. }));
}

#[test]
fn test_copy_recursively_mirrors_tree() {
    let fs = EphemeralFileSystem::new();
    let (builder, _) = legacy_graph();
    builder.write_to(&fs, Path::new("/a/graph")).unwrap();
    fs.create_dir_all(Path::new("/a/graph/nested/deeper")).unwrap();
    fs.open(Path::new("/a/graph/nested/deeper/note"), OpenMode::Truncate)
        .unwrap()
        .write_at(0, b"hello")
        .unwrap();

    let copied = copy_recursively(&fs, Path::new("/a/graph"), Path::new("/b")).unwrap();
    assert!(copied > 0);
    assert_eq!(
        snapshot_dir(&fs, Path::new("/a/graph")).unwrap(),
        snapshot_dir(&fs, Path::new("/b")).unwrap()
    );

    let err = copy_recursively(&fs, Path::new("/a/graph"), Path::new("/b")).unwrap_err();
    assert_eq!(err.kind(), io::ErrorKind::AlreadyExists);
}
