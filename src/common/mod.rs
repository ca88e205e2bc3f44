//! Common types shared by the writer and reader sides.

use std::path::PathBuf;

/// A file queued for packing. Produced by directory enumeration (or trivially for
/// a single file) and consumed once by the archive writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntrySource {
    /// `/`-separated path stored in the entry table. Empty for a bare single file.
    pub rel_path: String,
    /// Where the bytes are read from.
    pub source_path: PathBuf,
}

impl EntrySource {
    pub fn new(rel_path: impl Into<String>, source_path: impl Into<PathBuf>) -> Self {
        Self {
            rel_path: rel_path.into(),
            source_path: source_path.into(),
        }
    }
}

/// A single restore job derived from one entry-table record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionTask {
    pub rel_path: String,
    pub original_size: u64,
    pub compressed_size: u64,
    /// Resolved output file.
    pub dest_path: PathBuf,
    /// Absolute byte offset of this entry's compressed run inside the container.
    pub offset: u64,
}
