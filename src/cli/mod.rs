use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;

use crate::codec::DEFAULT_LEVEL;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Do not draw the progress line.
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Increase log verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
pub enum Commands {
    /// Pack a file or a directory tree into a new container.
    #[command(visible_alias = "compress", alias = "c")]
    Build {
        /// The file or directory to pack.
        input: PathBuf,

        /// The container to write. Defaults to `<input name>.bzpk`, or `output.bzpk`
        /// if that already exists.
        output: Option<PathBuf>,

        /// Zstandard compression level (1-22). Higher levels offer better compression at the cost of speed.
        #[arg(long, default_value_t = DEFAULT_LEVEL, value_parser = clap::value_parser!(i32).range(1..=22))]
        level: i32,
    },

    /// Unpack a container.
    #[command(visible_alias = "decompress", alias = "x")]
    Restore {
        /// The container to unpack.
        archive: PathBuf,

        /// Where to restore. Defaults to the stored root name for directories and
        /// the current directory for single files.
        target: Option<PathBuf>,

        /// Number of parallel threads to use. [0 = auto-detect based on CPU cores]
        #[arg(long, default_value_t = 0)]
        threads: usize,
    },

    /// List the contents of a container without extracting it.
    #[command(alias = "l")]
    List {
        /// The container to inspect.
        archive: PathBuf,

        /// Print the header and entry table as JSON.
        #[arg(long)]
        json: bool,
    },
}

impl Args {
    /// Log filter implied by `-v` occurrences.
    pub fn log_level(&self) -> tracing::Level {
        match self.verbose {
            0 => tracing::Level::WARN,
            1 => tracing::Level::INFO,
            2 => tracing::Level::DEBUG,
            _ => tracing::Level::TRACE,
        }
    }
}

/// Parses command-line arguments using `clap`.
///
/// Exits the process with usage text on invalid input.
pub fn run() -> Args {
    Args::parse()
}
