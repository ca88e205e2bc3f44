//! # Container Format
//!
//! This module defines the on-disk layout of a `.bzpk` container and the
//! encode/decode logic for its header and entry table. All multi-byte integers are
//! big-endian.
//!
//! ```text
//! MAGIC(4) | VERSION(1) | KIND(1) | ROOT_NAME_LEN(2) | ROOT_NAME
//! ENTRY_COUNT(4)
//! ENTRY_COUNT x { REL_PATH_LEN(2) | REL_PATH | ORIGINAL_SIZE(8) | COMPRESSED_SIZE(8) }
//! ENTRY_COUNT x COMPRESSED_PAYLOAD
//! ```
//!
//! Payloads follow the entry table back-to-back, in table order, with no padding.

use std::io::{self, Read, Write};
use std::path::{Component, Path};

use serde::Serialize;

use crate::error::{ArchiverError, Result};

pub const MAGIC_BYTES: &[u8; 4] = b"BZPK";
pub const FORMAT_VERSION: u8 = 1;
pub const ARCHIVE_EXTENSION: &str = "bzpk";

/// Upper bound for any length-prefixed string field.
pub const MAX_NAME_LEN: usize = u16::MAX as usize;

/// Size of the two trailing size fields in an entry record.
const SIZE_FIELDS_LEN: u64 = 8 + 8;

/// Whether a container holds a single file or a directory tree.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    SingleFile,
    Directory,
}

impl ArchiveKind {
    pub fn to_byte(self) -> u8 {
        match self {
            ArchiveKind::SingleFile => 0,
            ArchiveKind::Directory => 1,
        }
    }

    pub fn from_byte(b: u8) -> Result<Self> {
        match b {
            0 => Ok(ArchiveKind::SingleFile),
            1 => Ok(ArchiveKind::Directory),
            other => Err(ArchiverError::UnknownKind(other)),
        }
    }
}

/// Represents the header of the archive, located at the beginning of the file.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ArchiveHeader {
    pub version: u8,
    pub kind: ArchiveKind,
    /// Base name of the original input.
    pub root_name: String,
    pub entry_count: u32,
}

impl ArchiveHeader {
    pub fn new(kind: ArchiveKind, root_name: &str, entry_count: usize) -> Result<Self> {
        check_len("root name", root_name.len())?;
        let entry_count =
            u32::try_from(entry_count).map_err(|_| ArchiverError::TooManyEntries(entry_count))?;
        Ok(Self {
            version: FORMAT_VERSION,
            kind,
            root_name: root_name.to_string(),
            entry_count,
        })
    }

    /// Number of bytes `write_to` emits.
    pub fn encoded_len(&self) -> u64 {
        (MAGIC_BYTES.len() + 1 + 1 + 2 + self.root_name.len() + 4) as u64
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(MAGIC_BYTES)?;
        w.write_all(&[self.version, self.kind.to_byte()])?;
        w.write_all(&(self.root_name.len() as u16).to_be_bytes())?;
        w.write_all(self.root_name.as_bytes())?;
        w.write_all(&self.entry_count.to_be_bytes())
    }

    /// Reads and validates the header. Magic and version are checked before
    /// anything else is decoded.
    pub fn read_from<R: Read>(r: &mut R) -> Result<Self> {
        let magic = read_array::<4, _>(r, "magic")?;
        if &magic != MAGIC_BYTES {
            return Err(ArchiverError::InvalidMagic { found: magic });
        }
        let [version] = read_array::<1, _>(r, "version")?;
        if version != FORMAT_VERSION {
            return Err(ArchiverError::UnsupportedVersion(version));
        }
        let [kind] = read_array::<1, _>(r, "archive kind")?;
        let kind = ArchiveKind::from_byte(kind)?;
        let root_name = read_string(r, "root name")?;
        let entry_count = u32::from_be_bytes(read_array::<4, _>(r, "entry count")?);

        if !root_name.is_empty() && !is_plain_name(&root_name) {
            return Err(ArchiverError::InvalidFormat(format!(
                "root name '{root_name}' is not a plain file name"
            )));
        }

        Ok(Self {
            version,
            kind,
            root_name,
            entry_count,
        })
    }
}

/// One row of the entry table.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct EntryRecord {
    /// `/`-separated path relative to the root; empty for a bare single file.
    pub path: String,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl EntryRecord {
    /// Exact on-disk size of a record for `path`. Known before either size field is.
    pub fn encoded_len(path: &str) -> u64 {
        2 + path.len() as u64 + SIZE_FIELDS_LEN
    }

    pub fn write_to<W: Write>(&self, w: &mut W) -> io::Result<()> {
        w.write_all(&(self.path.len() as u16).to_be_bytes())?;
        w.write_all(self.path.as_bytes())?;
        w.write_all(&self.original_size.to_be_bytes())?;
        w.write_all(&self.compressed_size.to_be_bytes())
    }

    pub fn read_from<R: Read>(r: &mut R, kind: ArchiveKind) -> Result<Self> {
        let path = read_string(r, "entry path")?;
        let original_size = u64::from_be_bytes(read_array::<8, _>(r, "original size")?);
        let compressed_size = u64::from_be_bytes(read_array::<8, _>(r, "compressed size")?);
        validate_entry_path(&path, kind)?;
        Ok(Self {
            path,
            original_size,
            compressed_size,
        })
    }
}

/// Fails if a length-prefixed string field would overflow its u16 prefix.
pub(crate) fn check_len(field: &'static str, len: usize) -> Result<()> {
    if len > MAX_NAME_LEN {
        return Err(ArchiverError::FieldTooLong {
            field,
            len,
            max: MAX_NAME_LEN,
        });
    }
    Ok(())
}

/// Rejects stored paths that would escape the output directory.
pub fn validate_entry_path(path: &str, kind: ArchiveKind) -> Result<()> {
    if path.is_empty() {
        return match kind {
            ArchiveKind::SingleFile => Ok(()),
            ArchiveKind::Directory => Err(ArchiverError::InvalidFormat(
                "empty entry path in a directory archive".into(),
            )),
        };
    }
    if cfg!(windows) && path.contains('\\') {
        return Err(ArchiverError::InvalidFormat(format!(
            "entry path '{path}' contains a backslash"
        )));
    }
    let safe = Path::new(path)
        .components()
        .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
    if !safe || path.starts_with('/') {
        return Err(ArchiverError::InvalidFormat(format!(
            "entry path '{path}' escapes the output directory"
        )));
    }
    Ok(())
}

fn is_plain_name(name: &str) -> bool {
    let mut comps = Path::new(name).components();
    matches!(
        (comps.next(), comps.next()),
        (Some(Component::Normal(_)), None)
    ) && !name.chars().any(is_separator)
}

/// Characters the host treats as path separators. A backslash is an ordinary
/// file-name character on Unix.
fn is_separator(c: char) -> bool {
    c == '/' || (cfg!(windows) && c == '\\')
}

fn read_array<const N: usize, R: Read>(r: &mut R, what: &'static str) -> Result<[u8; N]> {
    let mut buf = [0u8; N];
    r.read_exact(&mut buf).map_err(|e| eof_as_truncated(e, what))?;
    Ok(buf)
}

fn read_string<R: Read>(r: &mut R, what: &'static str) -> Result<String> {
    let len = u16::from_be_bytes(read_array::<2, _>(r, what)?) as usize;
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).map_err(|e| eof_as_truncated(e, what))?;
    String::from_utf8(buf)
        .map_err(|_| ArchiverError::InvalidFormat(format!("{what} is not valid UTF-8")))
}

fn eof_as_truncated(e: io::Error, what: &'static str) -> ArchiverError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ArchiverError::Truncated(what)
    } else {
        ArchiverError::InvalidFormat(format!("reading {what}: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn encoded_header(kind: ArchiveKind, root: &str, count: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        ArchiveHeader::new(kind, root, count)
            .unwrap()
            .write_to(&mut buf)
            .unwrap();
        buf
    }

    #[test]
    fn header_layout_is_big_endian() {
        let buf = encoded_header(ArchiveKind::Directory, "photos", 258);
        assert_eq!(&buf[..4], b"BZPK");
        assert_eq!(buf[4], FORMAT_VERSION);
        assert_eq!(buf[5], 1);
        assert_eq!(&buf[6..8], &[0, 6]);
        assert_eq!(&buf[8..14], b"photos");
        assert_eq!(&buf[14..18], &[0, 0, 1, 2]);
        let header = ArchiveHeader::new(ArchiveKind::Directory, "photos", 258).unwrap();
        assert_eq!(header.encoded_len(), buf.len() as u64);
    }

    #[test]
    fn header_parses_back() {
        let buf = encoded_header(ArchiveKind::SingleFile, "notes.txt", 1);
        let header = ArchiveHeader::read_from(&mut Cursor::new(buf)).unwrap();
        assert_eq!(header.kind, ArchiveKind::SingleFile);
        assert_eq!(header.root_name, "notes.txt");
        assert_eq!(header.entry_count, 1);
    }

    #[test]
    fn bad_magic_is_rejected_first() {
        let mut buf = encoded_header(ArchiveKind::Directory, "d", 0);
        buf[..4].copy_from_slice(b"ZZZZ");
        buf[4] = 99;
        let err = ArchiveHeader::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ArchiverError::InvalidMagic { found } if &found == b"ZZZZ"));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut buf = encoded_header(ArchiveKind::Directory, "d", 0);
        buf[4] = FORMAT_VERSION + 1;
        let err = ArchiveHeader::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ArchiverError::UnsupportedVersion(v) if v == FORMAT_VERSION + 1));
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let mut buf = encoded_header(ArchiveKind::Directory, "d", 0);
        buf[5] = 7;
        let err = ArchiveHeader::read_from(&mut Cursor::new(buf)).unwrap_err();
        assert!(matches!(err, ArchiverError::UnknownKind(7)));
    }

    #[test]
    fn truncated_header_reports_the_missing_field() {
        let buf = encoded_header(ArchiveKind::Directory, "dir", 3);
        let err = ArchiveHeader::read_from(&mut Cursor::new(&buf[..buf.len() - 2])).unwrap_err();
        assert!(matches!(err, ArchiverError::Truncated("entry count")));
    }

    #[test]
    fn record_length_is_known_up_front() {
        let record = EntryRecord {
            path: "a/b.txt".into(),
            original_size: 1 << 40,
            compressed_size: 12,
        };
        let mut buf = Vec::new();
        record.write_to(&mut buf).unwrap();
        assert_eq!(buf.len() as u64, EntryRecord::encoded_len("a/b.txt"));
        assert_eq!(EntryRecord::encoded_len(""), 18);

        let back = EntryRecord::read_from(&mut Cursor::new(buf), ArchiveKind::Directory).unwrap();
        assert_eq!(back, record);
    }

    #[test]
    fn traversal_paths_are_rejected() {
        for bad in ["../etc/passwd", "a/../../b", "/abs/path", "..", "a/.."] {
            assert!(
                validate_entry_path(bad, ArchiveKind::Directory).is_err(),
                "{bad} should be rejected"
            );
        }
        assert!(validate_entry_path("a/b/c.txt", ArchiveKind::Directory).is_ok());
        assert!(validate_entry_path("", ArchiveKind::SingleFile).is_ok());
        assert!(validate_entry_path("", ArchiveKind::Directory).is_err());
    }

    #[test]
    fn backslash_is_a_separator_only_on_windows() {
        let result = validate_entry_path("dir/a\\b.txt", ArchiveKind::Directory);
        assert_eq!(result.is_err(), cfg!(windows));
        assert_eq!(is_plain_name("a\\b"), !cfg!(windows));
        assert!(!is_plain_name("a/b"));
        assert!(!is_plain_name(".."));
    }

    #[test]
    fn oversized_root_name_is_rejected() {
        let long = "x".repeat(MAX_NAME_LEN + 1);
        let err = ArchiveHeader::new(ArchiveKind::SingleFile, &long, 1).unwrap_err();
        assert!(matches!(err, ArchiverError::FieldTooLong { field: "root name", .. }));
    }
}
