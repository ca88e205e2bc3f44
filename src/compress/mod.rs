//! # Archive Writer
//!
//! Builds a container in two passes over a single output file:
//!
//! 1. Header, then one zero-filled slot per entry. A slot's size only depends on
//!    the entry's relative path, so the whole table (and therefore the start of the
//!    payload region) is fixed before any data is compressed.
//! 2. Each source file is streamed through the codec straight into the payload
//!    region. Once an entry is done, its slot is patched with the real sizes and the
//!    cursor returns to the end of the payload.
//!
//! No file is ever buffered whole. A failed build leaves whatever was written on
//! disk.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use scopeguard::defer;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::archive::{check_len, ArchiveHeader, ArchiveKind, EntryRecord, ARCHIVE_EXTENSION};
use crate::codec::{Codec, DEFAULT_LEVEL};
use crate::common::EntrySource;
use crate::error::{ArchiverError, IoContext, Result};
use crate::progress::ProgressTracker;

/// Holds all configuration options for a build.
#[derive(Debug, Clone)]
pub struct CompressOptions {
    /// The zstd compression level.
    pub level: i32,
}

impl Default for CompressOptions {
    fn default() -> Self {
        Self {
            level: DEFAULT_LEVEL,
        }
    }
}

/// Packs `input` (a file or a directory) into a new container at `output`.
///
/// Returns the total number of uncompressed bytes stored.
pub fn build_archive(
    input: &Path,
    output: &Path,
    options: &CompressOptions,
    progress: &ProgressTracker,
) -> Result<u64> {
    let meta = fs::metadata(input).at(input)?;
    let root_name = root_name_of(input)?;

    let (kind, entries) = if meta.is_dir() {
        (ArchiveKind::Directory, collect_entries(input)?)
    } else {
        (
            ArchiveKind::SingleFile,
            vec![EntrySource::new("", input)],
        )
    };

    let expected_total = total_source_size(&entries)?;
    info!(
        "packing {} entries ({} bytes) from {} into {}",
        entries.len(),
        expected_total,
        input.display(),
        output.display()
    );

    progress.start(expected_total);
    defer! { progress.stop(); }

    write_archive(
        &entries,
        output,
        kind,
        &root_name,
        &Codec::new(options.level),
        progress,
    )
}

/// Default container path for `input` when the user gives none: `<base>.bzpk`
/// unless that already exists, else `output.bzpk`.
pub fn default_output_path(input: &Path) -> PathBuf {
    let base = root_name_of(input).unwrap_or_default();
    let candidate = PathBuf::from(format!("{base}.{ARCHIVE_EXTENSION}"));
    if !base.is_empty() && !candidate.exists() {
        candidate
    } else {
        PathBuf::from(format!("output.{ARCHIVE_EXTENSION}"))
    }
}

/// Base name of the input as recorded in the header. Paths such as `.` are
/// resolved first so the directory's real name is stored.
fn root_name_of(input: &Path) -> Result<String> {
    let name = match input.file_name() {
        Some(name) => name.to_os_string(),
        None => {
            let resolved = input.canonicalize().at(input)?;
            resolved.file_name().map(|n| n.to_os_string()).unwrap_or_default()
        }
    };
    name.into_string()
        .map_err(|_| ArchiverError::NonUtf8Path {
            path: input.to_path_buf(),
        })
}

/// Recursively lists every regular file below `root`, in file-name order.
///
/// Symlinks that resolve to regular files are packed with the target's
/// content. Symlinked directories are not descended into.
pub fn collect_entries(root: &Path) -> Result<Vec<EntrySource>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry?;
        let file_type = entry.file_type();
        if file_type.is_symlink() {
            let target = fs::metadata(entry.path()).at(entry.path())?;
            if !target.is_file() {
                warn!("skipping symlink {} (not a regular file)", entry.path().display());
                continue;
            }
        } else if !file_type.is_file() {
            continue;
        }
        let rel = entry
            .path()
            .strip_prefix(root)
            .map_err(|_| ArchiverError::StripPrefix {
                prefix: root.to_path_buf(),
                path: entry.path().to_path_buf(),
            })?;
        entries.push(EntrySource::new(normalize_rel_path(rel)?, entry.path()));
    }
    Ok(entries)
}

/// Joins path components with `/` regardless of platform. Names are kept
/// byte-for-byte, so anything that is not UTF-8 is refused.
pub(crate) fn normalize_rel_path(rel: &Path) -> Result<String> {
    let parts = rel
        .components()
        .map(|c| {
            c.as_os_str().to_str().ok_or_else(|| ArchiverError::NonUtf8Path {
                path: rel.to_path_buf(),
            })
        })
        .collect::<Result<Vec<_>>>()?;
    Ok(parts.join("/"))
}

/// Sum of the current sizes of all sources.
pub fn total_source_size(entries: &[EntrySource]) -> Result<u64> {
    entries.iter().try_fold(0u64, |acc, e| {
        let len = fs::metadata(&e.source_path).at(&e.source_path)?.len();
        Ok(acc + len)
    })
}

/// Byte offsets of the reserved entry-table slots, indexed like the entry list.
#[derive(Debug)]
struct SlotTable {
    table_start: u64,
    offsets: Vec<u64>,
    payload_start: u64,
}

impl SlotTable {
    /// Lay out one slot per entry starting at `table_start`.
    fn plan(entries: &[EntrySource], table_start: u64) -> Result<Self> {
        let mut offsets = Vec::with_capacity(entries.len());
        let mut cursor = table_start;
        for entry in entries {
            check_len("relative path", entry.rel_path.len())?;
            offsets.push(cursor);
            cursor += EntryRecord::encoded_len(&entry.rel_path);
        }
        Ok(Self {
            table_start,
            offsets,
            payload_start: cursor,
        })
    }

    /// Writes the zero placeholders for every slot.
    fn reserve<W: Write>(&self, w: &mut W) -> io::Result<()> {
        let table_len = self.payload_start - self.table_start;
        io::copy(&mut io::repeat(0).take(table_len), w)?;
        Ok(())
    }
}

/// `Write` wrapper that counts bytes passing through it.
struct CountingWriter<W> {
    inner: W,
    count: u64,
}

impl<W: Write> Write for CountingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.count += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Writes a complete container for `entries` at `destination`.
///
/// Any existing file at `destination` is removed first and missing parent
/// directories are created. Returns the total number of uncompressed bytes.
pub fn write_archive(
    entries: &[EntrySource],
    destination: &Path,
    kind: ArchiveKind,
    root_name: &str,
    codec: &Codec,
    progress: &ProgressTracker,
) -> Result<u64> {
    let header = ArchiveHeader::new(kind, root_name, entries.len())?;
    let slots = SlotTable::plan(entries, header.encoded_len())?;

    match fs::remove_file(destination) {
        Ok(()) => debug!("removed existing {}", destination.display()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {}
        Err(e) => return Err(ArchiverError::io(destination, e)),
    }
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).at(parent)?;
    }
    let file = File::create(destination).at(destination)?;
    let mut out = BufWriter::with_capacity(1 << 20, file);

    header.write_to(&mut out).at(destination)?;
    slots.reserve(&mut out).at(destination)?;

    let mut cursor = slots.payload_start;
    let mut original_total = 0u64;

    for (entry, &slot) in entries.iter().zip(&slots.offsets) {
        let (original_size, compressed_size) =
            stream_entry(entry, &mut out, codec, progress)?;

        let record = EntryRecord {
            path: entry.rel_path.clone(),
            original_size,
            compressed_size,
        };
        cursor += compressed_size;
        patch_slot(&mut out, slot, &record, cursor).at(destination)?;

        debug!(
            "packed {} ({} -> {} bytes)",
            display_name(entry),
            original_size,
            compressed_size
        );
        original_total += original_size;
    }

    out.flush().at(destination)?;
    out.get_ref().sync_all().at(destination)?;
    info!(
        "wrote {} ({} payload bytes for {} original bytes)",
        destination.display(),
        cursor - slots.payload_start,
        original_total
    );
    Ok(original_total)
}

/// Compresses one source into the current position of `out`.
/// Returns `(original_size, compressed_size)`.
fn stream_entry<W: Write>(
    entry: &EntrySource,
    out: &mut W,
    codec: &Codec,
    progress: &ProgressTracker,
) -> Result<(u64, u64)> {
    let src = File::open(&entry.source_path).at(&entry.source_path)?;
    let len = src.metadata().at(&entry.source_path)?.len();
    if len == 0 {
        return Ok((0, 0));
    }

    let mut counter = CountingWriter {
        inner: out,
        count: 0,
    };
    let original = codec
        .encode_stream(src, &mut counter, progress)
        .at(&entry.source_path)?;
    Ok((original, counter.count))
}

/// Seeks back to `slot`, writes `record`, then returns to `resume_at`.
fn patch_slot<W: Write + Seek>(
    out: &mut W,
    slot: u64,
    record: &EntryRecord,
    resume_at: u64,
) -> io::Result<()> {
    out.seek(SeekFrom::Start(slot))?;
    record.write_to(out)?;
    out.seek(SeekFrom::Start(resume_at))?;
    Ok(())
}

fn display_name(entry: &EntrySource) -> String {
    if entry.rel_path.is_empty() {
        entry.source_path.display().to_string()
    } else {
        entry.rel_path.clone()
    }
}
