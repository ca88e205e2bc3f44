//! Maps stored entry paths to output paths.
//!
//! Everything here is pure: whether the user's target is an existing directory
//! is decided once by the caller and passed in as `target_is_dir`.

use std::path::{Path, PathBuf};

use crate::archive::{ArchiveKind, ARCHIVE_EXTENSION};

/// Top-level output location reported for a restore.
pub fn base_output_dir(kind: ArchiveKind, target: Option<&Path>, root_name: &str) -> PathBuf {
    match (target, kind) {
        (Some(t), _) => t.to_path_buf(),
        (None, ArchiveKind::Directory) => PathBuf::from(root_name),
        (None, ArchiveKind::SingleFile) => PathBuf::from("."),
    }
}

/// Output path of one entry.
///
/// * `rel_path` - the `/`-separated stored path (may be empty for single files).
/// * `archive_path` - only used to derive a file name when the header carries no
///   root name.
pub fn resolve_destination(
    kind: ArchiveKind,
    target: Option<&Path>,
    target_is_dir: bool,
    rel_path: &str,
    root_name: &str,
    archive_path: &Path,
) -> PathBuf {
    match kind {
        ArchiveKind::Directory => {
            join_rel(&base_output_dir(kind, target, root_name), rel_path)
        }
        ArchiveKind::SingleFile => match target {
            Some(t) if rel_path.is_empty() && target_is_dir => {
                t.join(fallback_file_name(root_name, archive_path))
            }
            Some(t) if rel_path.is_empty() => t.to_path_buf(),
            Some(t) => join_rel(t, rel_path),
            None if rel_path.is_empty() => {
                Path::new(".").join(fallback_file_name(root_name, archive_path))
            }
            None => join_rel(Path::new("."), rel_path),
        },
    }
}

/// Appends a `/`-separated relative path component by component.
fn join_rel(base: &Path, rel_path: &str) -> PathBuf {
    let mut out = base.to_path_buf();
    out.extend(rel_path.split('/').filter(|c| !c.is_empty() && *c != "."));
    out
}

/// The stored root name, or the container's file name without its extension.
fn fallback_file_name(root_name: &str, archive_path: &Path) -> String {
    if !root_name.is_empty() {
        return root_name.to_string();
    }
    let name = archive_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let suffix = format!(".{ARCHIVE_EXTENSION}");
    match name.strip_suffix(&suffix) {
        Some(stem) if !stem.is_empty() => stem.to_string(),
        _ => name,
    }
}
