use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

/// Result type used throughout the `blitzpack` crate.
pub type Result<T> = std::result::Result<T, ArchiverError>;

/// The primary error type for all operations in the `blitzpack` crate.
#[derive(Debug, Error)]
pub enum ArchiverError {
    /// An I/O error occurred, typically while reading or writing a file.
    /// Includes the path where the error happened.
    #[error("I/O error on path '{}': {source}", path.display())]
    Io { source: io::Error, path: PathBuf },

    /// The first four bytes of the container are not the expected magic.
    #[error("not a blitzpack container (magic bytes {found:?})")]
    InvalidMagic { found: [u8; 4] },

    #[error("unsupported container version: {0}")]
    UnsupportedVersion(u8),

    #[error("unknown archive kind byte: {0}")]
    UnknownKind(u8),

    /// The container ended before the named structure was fully read.
    #[error("container truncated while reading {0}")]
    Truncated(&'static str),

    #[error("invalid container: {0}")]
    InvalidFormat(String),

    /// A string field does not fit its 16-bit length prefix.
    #[error("{field} is {len} bytes long, the format allows at most {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },

    /// Stored names are UTF-8; a source path that is not cannot be packed as-is.
    #[error("path '{}' is not valid UTF-8 and cannot be stored", path.display())]
    NonUtf8Path { path: PathBuf },

    #[error("{0} entries do not fit the 32-bit entry count")]
    TooManyEntries(usize),

    /// Decompression produced a different number of bytes than the entry table recorded.
    #[error("size mismatch for '{}': expected {expected} bytes, got {actual}", path.display())]
    SizeMismatch {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },

    #[error("could not strip prefix '{}' from path '{}'", prefix.display(), path.display())]
    StripPrefix { prefix: PathBuf, path: PathBuf },

    #[error("directory walk failed: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("serialization error: {0}")]
    SerdeJson(#[from] serde_json::Error),
}

impl ArchiverError {
    /// Attach a path to a bare `io::Error`.
    pub fn io(path: impl AsRef<Path>, source: io::Error) -> Self {
        ArchiverError::Io {
            source,
            path: path.as_ref().to_path_buf(),
        }
    }

    /// True for errors raised while decoding the header or entry table.
    pub fn is_format_error(&self) -> bool {
        matches!(
            self,
            ArchiverError::InvalidMagic { .. }
                | ArchiverError::UnsupportedVersion(_)
                | ArchiverError::UnknownKind(_)
                | ArchiverError::Truncated(_)
                | ArchiverError::InvalidFormat(_)
        )
    }
}

/// Extension for attaching the offending path to `io::Result`s.
pub(crate) trait IoContext<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T>;
}

impl<T> IoContext<T> for io::Result<T> {
    fn at(self, path: impl AsRef<Path>) -> Result<T> {
        self.map_err(|e| ArchiverError::io(path, e))
    }
}
