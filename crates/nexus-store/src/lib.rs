//! Nexus Store - record storage engine and store migration
//!
//! This crate provides the on-disk layer of the Nexus graph database:
//! - Fixed-size record stores for nodes, relationships, properties and tokens
//! - Dynamic record chains for strings, arrays and token names
//! - Id allocation with persistent free lists
//! - A file system abstraction with on-disk and in-memory implementations
//! - Consistency checking over a whole store directory
//! - Migration of stores written in a legacy format to the current one
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │        GraphStore  /  StoreMigrator          │
//! │   (tagged read/write, check, migrate)       │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │              Record Stores                   │
//! │  (node, rel, prop, token, dynamic chains)   │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │        Id Generators  /  Store Headers       │
//! └──────────────┬──────────────────────────────┘
//!                │
//! ┌──────────────┴──────────────────────────────┐
//! │          FileSystemAbstraction               │
//! │      (DefaultFileSystem, Ephemeral)         │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use nexus_store::{StoreConfig, open_store};
//! use std::path::Path;
//!
//! let store = open_store(Path::new("data/graph"), StoreConfig::on_disk())?;
//! let alice = store.create_node(&[])?;
//! let bob = store.create_node(&[])?;
//! store.create_relationship(alice, bob, "KNOWS")?;
//! store.set_node_property(alice, "name", "Alice".into())?;
//! store.close()?;
//! # Ok::<(), nexus_store::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod check;
pub mod config;
pub mod error;
pub mod fs;
pub mod id;
pub mod kind;
pub mod migration;
pub mod record;
pub mod store;
pub mod testing;
pub mod value;

pub use check::{ConsistencyReport, check_store};
pub use config::{StoreConfig, StoreSettings};
pub use error::{Error, Result};
pub use kind::StoreKind;
pub use migration::{MigrationResult, MigrationStatus, StoreMigrator};
pub use store::{FormatVersion, GraphStore, StoreHandle, open_store};
pub use value::{ArrayValue, PropertyValue};
