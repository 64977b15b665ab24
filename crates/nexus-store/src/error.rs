//! Error types for the Nexus store engine

use crate::kind::StoreKind;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the store Error
pub type Result<T> = std::result::Result<T, Error>;

/// Core error types for the record store engine
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors propagated from the file system abstraction
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Record id out of range, or not in use where an in-use record is required
    #[error("Invalid record {id} in {kind}: {reason}")]
    InvalidRecord {
        /// Store the record was requested from
        kind: StoreKind,
        /// Requested record id
        id: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Dynamic record chain integrity violated
    #[error("Broken chain in {kind} at block {id}: {reason}")]
    BrokenChain {
        /// Dynamic store holding the chain
        kind: StoreKind,
        /// Block where the violation was found
        id: u64,
        /// What was wrong with it
        reason: String,
    },

    /// Store version marker is not one we can read or migrate
    #[error("Unsupported store version {found:?} in {}", path.display())]
    UnsupportedVersion {
        /// Store file carrying the marker
        path: PathBuf,
        /// Marker as found on disk
        found: String,
    },

    /// Store is readable but not in the current format
    #[error("Store {} is at version {found}, expected {expected}; migration required", path.display())]
    StoreVersionMismatch {
        /// Store file carrying the marker
        path: PathBuf,
        /// Current format marker
        expected: String,
        /// Marker as found on disk
        found: String,
    },

    /// Post-copy consistency check failed
    #[error("Migration verification failed for {store}: {detail}")]
    MigrationVerification {
        /// Store that failed verification
        store: StoreKind,
        /// Mismatch description
        detail: String,
    },

    /// Id address space exhausted
    #[error("Id capacity exceeded in {kind}: max id is {max_id}")]
    IdCapacityExceeded {
        /// Store whose generator ran out
        kind: StoreKind,
        /// Highest id the store can address
        max_id: u64,
    },

    /// Operation was cancelled through a cancellation token
    #[error("Operation cancelled")]
    Cancelled,

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl Error {
    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Self::Storage(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create an invalid record error
    pub fn invalid_record(kind: StoreKind, id: u64, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            kind,
            id,
            reason: reason.into(),
        }
    }

    /// Create a broken chain error
    pub fn broken_chain(kind: StoreKind, id: u64, reason: impl Into<String>) -> Self {
        Self::BrokenChain {
            kind,
            id,
            reason: reason.into(),
        }
    }

    /// Create a migration verification error
    pub fn verification(store: StoreKind, detail: impl Into<String>) -> Self {
        Self::MigrationVerification {
            store,
            detail: detail.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn test_invalid_record_message() {
        let err = Error::invalid_record(StoreKind::Node, 7, "not in use");
        assert_eq!(err.to_string(), "Invalid record 7 in NodeStore: not in use");
    }

    #[test]
    fn test_version_messages() {
        let err = Error::UnsupportedVersion {
            path: PathBuf::from("db/nodes.store"),
            found: "NodeStore nx-9.9".into(),
        };
        assert!(err.to_string().contains("nx-9.9"));
        assert!(err.to_string().contains("nodes.store"));
    }
}
