//! Testing infrastructure for the store engine
//!
//! Helpers shared by unit tests, integration tests and tooling:
//!
//! - **TestContext**: a temporary directory with an on-disk store config
//! - **LegacyStoreBuilder**: builds a graph and writes it out in the `nx-0.1` format
//! - **FaultyFileSystem**: wraps a file system and injects write and rename failures
//! - **snapshot_dir**: byte-level snapshot of a directory tree
//!
//! # Usage
//!
//! ```rust,no_run
//! use nexus_store::testing::{LegacyStoreBuilder, TestContext};
//!
//! let ctx = TestContext::new();
//! let builder = LegacyStoreBuilder::new().unwrap();
//! builder.store().create_node(&[]).unwrap();
//! builder.write_to(ctx.config().fs.as_ref(), &ctx.store_dir()).unwrap();
//! ```

mod context;
mod faulty;
mod fixtures;
mod legacy;

pub use context::TestContext;
pub use faulty::FaultyFileSystem;
pub use fixtures::{make_long_array, make_long_string, snapshot_dir};
pub use legacy::LegacyStoreBuilder;
