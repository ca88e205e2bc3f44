//! Bounded-parallel extraction.
//!
//! Entries are packed back-to-back, so the offset of every compressed run follows
//! from the entry table alone. Each worker opens its own handle on the container,
//! reads exactly its `[offset, offset + compressed_size)` window and decodes it
//! sequentially into the destination file. There is no shared read cursor.
//!
//! Failures do not cancel siblings: every task runs, errors are collected on a
//! channel, and the first one received is returned.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::thread;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::codec::Codec;
use crate::common::ExtractionTask;
use crate::error::{ArchiverError, IoContext, Result};
use crate::progress::{ProgressTracker, ProgressWriter};

/// Assigns each task the offset of its compressed run, accumulating
/// `compressed_size` in table order from `payload_offset`.
pub fn assign_offsets(payload_offset: u64, tasks: &mut [ExtractionTask]) {
    let mut current = payload_offset;
    for task in tasks {
        task.offset = current;
        current += task.compressed_size;
    }
}

/// Number of workers for `requested` threads over `task_count` tasks.
/// `0` means one per available CPU.
pub fn worker_count(requested: usize, task_count: usize) -> usize {
    let wanted = if requested == 0 {
        num_cpus::get()
    } else {
        requested
    };
    wanted.min(task_count).max(1)
}

/// Extracts every task from `archive_path`.
///
/// Parent directories are created up front. Tasks whose directory could not be
/// created fail individually; all others still run.
pub fn extract_entries(
    archive_path: &Path,
    payload_offset: u64,
    tasks: &mut [ExtractionTask],
    codec: &Codec,
    threads: usize,
    progress: &ProgressTracker,
) -> Result<()> {
    assign_offsets(payload_offset, tasks);
    if tasks.is_empty() {
        return Ok(());
    }

    let (err_tx, err_rx) = bounded::<ArchiverError>(tasks.len());
    let dir_failures = prepare_directories(tasks);

    let (job_tx, job_rx) = bounded::<&ExtractionTask>(tasks.len());
    for task in tasks.iter() {
        let parent = task.dest_path.parent().map(Path::to_path_buf);
        match parent.as_ref().and_then(|p| dir_failures.get(p)) {
            Some(kind) => {
                let source = std::io::Error::new(*kind, "parent directory could not be created");
                // Capacity equals the task count, so this never blocks.
                let _ = err_tx.send(ArchiverError::io(&task.dest_path, source));
            }
            None => {
                let _ = job_tx.send(task);
            }
        }
    }
    drop(job_tx);

    let workers = worker_count(threads, tasks.len());
    info!(
        "extracting {} entries with {} worker threads",
        tasks.len(),
        workers
    );

    thread::scope(|s| {
        for _ in 0..workers {
            let job_rx = job_rx.clone();
            let err_tx = err_tx.clone();
            s.spawn(move || {
                for task in job_rx {
                    match extract_one(archive_path, task, codec, progress) {
                        Ok(()) => debug!("restored {}", task.dest_path.display()),
                        Err(e) => {
                            warn!("failed to restore {}: {}", task.dest_path.display(), e);
                            let _ = err_tx.send(e);
                        }
                    }
                }
            });
        }
    });
    drop(err_tx);

    let mut errors = err_rx.try_iter();
    match errors.next() {
        None => Ok(()),
        Some(first) => {
            let others = errors.count();
            if others > 0 {
                warn!("{} more entries failed to restore", others);
            }
            Err(first)
        }
    }
}

/// Creates every distinct parent directory once. Returns the ones that failed.
fn prepare_directories(tasks: &[ExtractionTask]) -> HashMap<PathBuf, std::io::ErrorKind> {
    let mut failed = HashMap::new();
    let mut seen = std::collections::HashSet::new();
    for task in tasks {
        let Some(parent) = task.dest_path.parent() else {
            continue;
        };
        if parent.as_os_str().is_empty() || !seen.insert(parent.to_path_buf()) {
            continue;
        }
        if let Err(e) = fs::create_dir_all(parent) {
            warn!("cannot create {}: {}", parent.display(), e);
            failed.insert(parent.to_path_buf(), e.kind());
        }
    }
    failed
}

/// Restores a single entry from its own handle on the container.
fn extract_one(
    archive_path: &Path,
    task: &ExtractionTask,
    codec: &Codec,
    progress: &ProgressTracker,
) -> Result<()> {
    let out = File::create(&task.dest_path).at(&task.dest_path)?;
    if task.original_size == 0 {
        return Ok(());
    }

    let mut archive = File::open(archive_path).at(archive_path)?;
    archive
        .seek(SeekFrom::Start(task.offset))
        .at(archive_path)?;
    let window = BufReader::new(archive.take(task.compressed_size));

    let sink = ProgressWriter::new(BufWriter::new(out), progress);
    let produced = codec
        .decode_stream(window, task.original_size, sink)
        .at(&task.dest_path)?;

    if produced != task.original_size {
        return Err(ArchiverError::SizeMismatch {
            path: task.dest_path.clone(),
            expected: task.original_size,
            actual: produced,
        });
    }
    Ok(())
}
