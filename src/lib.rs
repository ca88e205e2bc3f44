//! # blitzpack Core Library
//!
//! This crate packs a file or a directory tree into a single seekable `.bzpk`
//! container, compressing every entry independently with `zstd`, and restores it
//! with a bounded pool of worker threads.
//!
//! It is designed to be used by the `blitzpack` command-line application, but the
//! public API can also be used to build, inspect and restore containers directly.
//!
//! ## Key Modules
//!
//! - [`archive`]: The on-disk header and entry-table format.
//! - [`compress`]: The two-pass archive writer.
//! - [`extract`]: Header parsing, destination resolution and parallel restore.
//! - [`codec`]: The streaming `zstd` adapter.
//! - [`progress`]: Byte counter, sampler and formatting helpers.
//!
//! ## Examples
//!
//! ```no_run
//! use std::path::Path;
//! use blitzpack::{build_archive, restore_archive, CompressOptions, ExtractOptions, ProgressTracker};
//!
//! let progress = ProgressTracker::silent();
//! build_archive(Path::new("photos"), Path::new("photos.bzpk"), &CompressOptions::default(), &progress)?;
//! restore_archive(Path::new("photos.bzpk"), Some(Path::new("restored")), &ExtractOptions::default(), &progress)?;
//! # Ok::<(), blitzpack::ArchiverError>(())
//! ```

pub mod archive;
pub mod cli;
pub mod cli_runner;
pub mod codec;
pub mod common;
pub mod compress;
pub mod error;
pub mod extract;
pub mod progress;

pub use compress::{build_archive, CompressOptions};
pub use error::{ArchiverError, Result};
pub use extract::{parse_archive, restore_archive, ExtractOptions};
pub use progress::ProgressTracker;
