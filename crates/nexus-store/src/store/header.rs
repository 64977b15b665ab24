//! Store file header
//!
//! Every store file starts with a 32 byte header:
//!
//! ```text
//! [0..28)   version marker "<Descriptor> <version>", ASCII, zero padded
//! [28..32)  record size u32 LE
//! ```

use crate::error::{Error, Result};
use crate::fs::StoreFile;
use crate::kind::StoreKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Size of the store file header
pub const HEADER_SIZE: u64 = 32;
const MARKER_LEN: usize = 28;

/// On-disk store format versions this build understands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum FormatVersion {
    /// Packed little-endian records with 32-bit ids
    V1,
    /// Plain-old-data records with 64-bit ids
    V2,
}

impl FormatVersion {
    /// Format written by this build
    pub const CURRENT: FormatVersion = FormatVersion::V2;

    /// Every known version, oldest first
    pub const ALL: [FormatVersion; 2] = [FormatVersion::V1, FormatVersion::V2];

    /// Version string used in markers
    pub fn as_str(self) -> &'static str {
        match self {
            FormatVersion::V1 => "nx-0.1",
            FormatVersion::V2 => "nx-0.2",
        }
    }

    /// Parse a version string
    pub fn parse(version: &str) -> Option<FormatVersion> {
        FormatVersion::ALL
            .into_iter()
            .find(|v| v.as_str() == version)
    }

    /// Full marker for a store kind at this version
    pub fn marker(self, kind: StoreKind) -> String {
        format!("{} {}", kind.descriptor(), self.as_str())
    }

    /// Whether this is the format written by this build
    pub fn is_current(self) -> bool {
        self == Self::CURRENT
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decoded store header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreHeader {
    /// Store kind named by the marker
    pub kind: StoreKind,
    /// Format version named by the marker
    pub version: FormatVersion,
    /// Bytes per record slot
    pub record_size: u32,
}

impl StoreHeader {
    /// Header for a new store
    pub fn new(kind: StoreKind, version: FormatVersion, record_size: u32) -> Self {
        Self {
            kind,
            version,
            record_size,
        }
    }

    /// Encode to the on-disk form
    pub fn encode(&self) -> [u8; HEADER_SIZE as usize] {
        let mut buf = [0u8; HEADER_SIZE as usize];
        let marker = self.version.marker(self.kind);
        buf[..marker.len()].copy_from_slice(marker.as_bytes());
        buf[MARKER_LEN..].copy_from_slice(&self.record_size.to_le_bytes());
        buf
    }

    /// Read and decode the header of an open store file.
    ///
    /// An unknown marker is [`Error::UnsupportedVersion`]; `path` is only
    /// used for error reporting.
    pub fn read(file: &dyn StoreFile, path: &Path) -> Result<Self> {
        if file.len()? < HEADER_SIZE {
            return Err(Error::UnsupportedVersion {
                path: path.to_path_buf(),
                found: String::new(),
            });
        }
        let mut buf = [0u8; HEADER_SIZE as usize];
        file.read_at(0, &mut buf)?;
        Self::decode(&buf, path)
    }

    /// Decode the on-disk form
    pub fn decode(buf: &[u8; HEADER_SIZE as usize], path: &Path) -> Result<Self> {
        let marker = read_marker(buf);
        let unsupported = || Error::UnsupportedVersion {
            path: path.to_path_buf(),
            found: marker.clone(),
        };

        let (descriptor, version) = marker.rsplit_once(' ').ok_or_else(unsupported)?;
        let kind = StoreKind::from_descriptor(descriptor).ok_or_else(unsupported)?;
        let version = FormatVersion::parse(version).ok_or_else(unsupported)?;
        let record_size = u32::from_le_bytes([buf[28], buf[29], buf[30], buf[31]]);
        if record_size == 0 {
            return Err(Error::storage(format!(
                "{} declares a zero record size",
                path.display()
            )));
        }
        Ok(Self {
            kind,
            version,
            record_size,
        })
    }

    /// Byte offset of record `id`
    pub fn offset_of(&self, id: u64) -> u64 {
        HEADER_SIZE + id * u64::from(self.record_size)
    }

    /// Number of whole record slots in a file of `file_len` bytes
    pub fn slots_in(&self, file_len: u64) -> u64 {
        file_len.saturating_sub(HEADER_SIZE) / u64::from(self.record_size)
    }
}

fn read_marker(buf: &[u8]) -> String {
    let raw = &buf[..MARKER_LEN];
    let end = raw.iter().position(|&b| b == 0).unwrap_or(MARKER_LEN);
    String::from_utf8_lossy(&raw[..end]).into_owned()
}
