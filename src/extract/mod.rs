//! # Extraction Module
//!
//! Reads a container's header and entry table, turns every record into an
//! [`ExtractionTask`] with a resolved destination and payload offset, and hands the
//! task list to the parallel scheduler.

mod destination;
mod parallel;

pub use destination::{base_output_dir, resolve_destination};
pub use parallel::{assign_offsets, extract_entries, worker_count};

use std::fs::{self, File};
use std::io::{self, BufReader, Read, Seek};
use std::path::{Path, PathBuf};

use scopeguard::defer;
use serde::Serialize;
use tracing::{debug, info};

use crate::archive::{ArchiveHeader, ArchiveKind, EntryRecord};
use crate::codec::Codec;
use crate::common::ExtractionTask;
use crate::error::{ArchiverError, IoContext, Result};
use crate::progress::ProgressTracker;

/// Caps the up-front allocation for the entry table; the count comes from disk.
const MAX_PREALLOCATED_ENTRIES: usize = 4096;

/// Everything needed to restore a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedArchive {
    pub kind: ArchiveKind,
    pub root_name: String,
    pub tasks: Vec<ExtractionTask>,
    /// Absolute file offset of the first compressed payload byte.
    pub payload_offset: u64,
    /// Top-level output location.
    pub base_dir: PathBuf,
}

impl ParsedArchive {
    pub fn total_original_size(&self) -> u64 {
        self.tasks.iter().map(|t| t.original_size).sum()
    }
}

/// Header and entry table of a container, as shown by `list`.
#[derive(Serialize, Debug, Clone)]
pub struct ArchiveListing {
    pub header: ArchiveHeader,
    pub payload_offset: u64,
    pub entries: Vec<EntryRecord>,
}

impl ArchiveListing {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}

/// Holds all configuration options for a restore.
#[derive(Debug, Clone, Default)]
pub struct ExtractOptions {
    /// Worker threads; `0` means one per available CPU.
    pub threads: usize,
}

/// What a finished restore produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RestoreSummary {
    pub base_dir: PathBuf,
    pub entries: usize,
    pub original_bytes: u64,
}

/// Decodes the header and entry table without resolving destinations.
///
/// Returns the header, the records in table order and the payload start offset.
/// The container's length must match the table exactly.
pub fn read_entry_table(archive_path: &Path) -> Result<(ArchiveHeader, Vec<EntryRecord>, u64)> {
    let file = File::open(archive_path).at(archive_path)?;
    let file_len = file.metadata().at(archive_path)?.len();
    let mut reader = BufReader::new(file);

    let header = ArchiveHeader::read_from(&mut reader)?;
    let count = header.entry_count as usize;
    let mut records = Vec::with_capacity(count.min(MAX_PREALLOCATED_ENTRIES));
    for _ in 0..count {
        records.push(EntryRecord::read_from(&mut reader, header.kind)?);
    }

    let payload_offset = payload_position(&mut reader).at(archive_path)?;
    let expected_len = records
        .iter()
        .try_fold(payload_offset, |acc, r| acc.checked_add(r.compressed_size))
        .ok_or_else(|| ArchiverError::InvalidFormat("compressed sizes overflow".into()))?;
    if expected_len != file_len {
        return Err(ArchiverError::InvalidFormat(format!(
            "entry table describes {expected_len} bytes but the container holds {file_len}"
        )));
    }

    debug!(
        "{}: {} entries, payload at {}",
        archive_path.display(),
        records.len(),
        payload_offset
    );
    Ok((header, records, payload_offset))
}

/// Position of the next unread byte. The `BufReader` has usually read ahead, so
/// the bytes still sitting in its buffer are subtracted from the raw position.
fn payload_position<R: Read + Seek>(reader: &mut BufReader<R>) -> io::Result<u64> {
    let raw = reader.get_mut().stream_position()?;
    Ok(raw - reader.buffer().len() as u64)
}

/// Parses a container and resolves every entry's output path against `target`.
pub fn parse_archive(archive_path: &Path, target: Option<&Path>) -> Result<ParsedArchive> {
    let (header, records, payload_offset) = read_entry_table(archive_path)?;
    let target_is_dir = target.is_some_and(Path::is_dir);

    let mut tasks: Vec<ExtractionTask> = records
        .into_iter()
        .map(|record| ExtractionTask {
            dest_path: resolve_destination(
                header.kind,
                target,
                target_is_dir,
                &record.path,
                &header.root_name,
                archive_path,
            ),
            rel_path: record.path,
            original_size: record.original_size,
            compressed_size: record.compressed_size,
            offset: 0,
        })
        .collect();
    assign_offsets(payload_offset, &mut tasks);

    Ok(ParsedArchive {
        kind: header.kind,
        base_dir: base_output_dir(header.kind, target, &header.root_name),
        root_name: header.root_name,
        tasks,
        payload_offset,
    })
}

/// Reads the entry table for display.
pub fn list_entries(archive_path: &Path) -> Result<ArchiveListing> {
    let (header, entries, payload_offset) = read_entry_table(archive_path)?;
    Ok(ArchiveListing {
        header,
        payload_offset,
        entries,
    })
}

/// Restores `archive_path` to `target` (or the default location).
pub fn restore_archive(
    archive_path: &Path,
    target: Option<&Path>,
    options: &ExtractOptions,
    progress: &ProgressTracker,
) -> Result<RestoreSummary> {
    let mut parsed = parse_archive(archive_path, target)?;
    let total = parsed.total_original_size();
    info!(
        "restoring {} entries ({} bytes) from {} into {}",
        parsed.tasks.len(),
        total,
        archive_path.display(),
        parsed.base_dir.display()
    );

    if parsed.kind == ArchiveKind::Directory {
        fs::create_dir_all(&parsed.base_dir).at(&parsed.base_dir)?;
    }

    progress.start(total);
    defer! { progress.stop(); }

    extract_entries(
        archive_path,
        parsed.payload_offset,
        &mut parsed.tasks,
        &Codec::default(),
        options.threads,
        progress,
    )?;

    Ok(RestoreSummary {
        base_dir: parsed.base_dir,
        entries: parsed.tasks.len(),
        original_bytes: total,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::EntrySource;
    use crate::compress::write_archive;
    use std::io::Cursor;
    use tempfile::tempdir;

    #[test]
    fn buffered_position_is_corrected() {
        let data: Vec<u8> = (0..100u8).collect();
        let mut reader = BufReader::with_capacity(64, Cursor::new(data));
        let mut first = [0u8; 10];
        reader.read_exact(&mut first).unwrap();
        assert_eq!(reader.get_ref().position(), 64);
        assert_eq!(payload_position(&mut reader).unwrap(), 10);
    }

    #[test]
    fn payload_offset_follows_the_entry_table() {
        let dir = tempdir().unwrap();
        fs::write(dir.path().join("a.txt"), b"alpha").unwrap();
        fs::write(dir.path().join("bb.txt"), b"").unwrap();
        let entries = vec![
            EntrySource::new("a.txt", dir.path().join("a.txt")),
            EntrySource::new("bb.txt", dir.path().join("bb.txt")),
        ];
        let archive = dir.path().join("t.bzpk");
        write_archive(
            &entries,
            &archive,
            ArchiveKind::Directory,
            "tree",
            &Codec::default(),
            &ProgressTracker::silent(),
        )
        .unwrap();

        let (header, records, payload) = read_entry_table(&archive).unwrap();
        let expected = header.encoded_len()
            + EntryRecord::encoded_len("a.txt")
            + EntryRecord::encoded_len("bb.txt");
        assert_eq!(payload, expected);
        assert_eq!(records[1].compressed_size, 0);

        let parsed = parse_archive(&archive, None).unwrap();
        assert_eq!(parsed.tasks[0].offset, payload);
        assert_eq!(parsed.tasks[1].offset, payload + records[0].compressed_size);
        assert_eq!(parsed.base_dir, PathBuf::from("tree"));
    }

    #[test]
    fn trailing_bytes_are_rejected() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("f.bin");
        fs::write(&src, vec![9u8; 1000]).unwrap();
        let archive = dir.path().join("f.bzpk");
        write_archive(
            &[EntrySource::new("", &src)],
            &archive,
            ArchiveKind::SingleFile,
            "f.bin",
            &Codec::default(),
            &ProgressTracker::silent(),
        )
        .unwrap();

        let mut bytes = fs::read(&archive).unwrap();
        bytes.extend_from_slice(b"junk");
        fs::write(&archive, &bytes).unwrap();
        let err = parse_archive(&archive, None).unwrap_err();
        assert!(err.is_format_error(), "{err}");

        bytes.truncate(bytes.len() - 10);
        fs::write(&archive, &bytes).unwrap();
        assert!(parse_archive(&archive, None).unwrap_err().is_format_error());
    }

    #[test]
    fn listing_serializes_to_json() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("note.txt");
        fs::write(&src, b"listing").unwrap();
        let archive = dir.path().join("note.bzpk");
        write_archive(
            &[EntrySource::new("", &src)],
            &archive,
            ArchiveKind::SingleFile,
            "note.txt",
            &Codec::default(),
            &ProgressTracker::silent(),
        )
        .unwrap();

        let listing = list_entries(&archive).unwrap();
        let json: serde_json::Value = serde_json::from_str(&listing.to_json().unwrap()).unwrap();
        assert_eq!(json["header"]["root_name"], "note.txt");
        assert_eq!(json["header"]["kind"], "SingleFile");
        assert_eq!(json["entries"][0]["original_size"], 7);
    }
}
