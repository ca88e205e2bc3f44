//! Command dispatch for the `blitzpack` binary: logging setup, the stderr progress
//! line and one arm per subcommand.

use std::io::{self, Write};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tracing::info;

use crate::cli::{self, Args, Commands};
use crate::compress::{self, CompressOptions};
use crate::error::Result;
use crate::extract::{self, ExtractOptions};
use crate::progress::{format_rate, format_size, ProgressState, ProgressTracker, DEFAULT_SAMPLE_INTERVAL};

/// Public entry for running CLI logic.
pub fn run_cli_app() -> Result<()> {
    let args = cli::run();
    init_logging(&args);
    info!("available CPU cores: {}", num_cpus::get());

    match &args.command {
        Commands::Build {
            input,
            output,
            level,
        } => {
            let output = output
                .clone()
                .unwrap_or_else(|| compress::default_output_path(input));
            let line = ProgressLine::new("build", args.quiet);
            let tracker = line.tracker();
            let options = CompressOptions { level: *level };
            let result = compress::build_archive(input, &output, &options, &tracker);
            line.finish();
            let total = result?;
            info!("packed {} into {}", format_size(total), output.display());
        }
        Commands::Restore {
            archive,
            target,
            threads,
        } => {
            let line = ProgressLine::new("restore", args.quiet);
            let tracker = line.tracker();
            let options = ExtractOptions { threads: *threads };
            let result = extract::restore_archive(archive, target.as_deref(), &options, &tracker);
            line.finish();
            let summary = result?;
            info!(
                "restored {} entries ({}) into {}",
                summary.entries,
                format_size(summary.original_bytes),
                summary.base_dir.display()
            );
        }
        Commands::List { archive, json } => {
            let listing = extract::list_entries(archive)?;
            let stdout = io::stdout();
            let mut out = stdout.lock();
            if *json {
                writeln!(out, "{}", listing.to_json()?).ok();
            } else {
                writeln!(
                    out,
                    "{} ({:?}, {} entries):",
                    listing.header.root_name,
                    listing.header.kind,
                    listing.entries.len()
                )
                .ok();
                for entry in &listing.entries {
                    let name = if entry.path.is_empty() {
                        listing.header.root_name.as_str()
                    } else {
                        entry.path.as_str()
                    };
                    writeln!(
                        out,
                        "- {} ({} bytes, {} compressed)",
                        name, entry.original_size, entry.compressed_size
                    )
                    .ok();
                }
            }
        }
    }

    Ok(())
}

fn init_logging(args: &Args) {
    // A second initialisation (tests calling the runner twice) is harmless.
    let _ = tracing_subscriber::fmt()
        .with_max_level(args.log_level())
        .with_writer(io::stderr)
        .with_target(false)
        .try_init();
}

// --- utils for CLI progress -------------------------------------------------

/// Minimum time between two redraws of the progress line.
const REDRAW_INTERVAL: Duration = Duration::from_millis(100);

#[derive(Default)]
struct LineState {
    last_draw: Option<Instant>,
    prev_len: usize,
    drawn: bool,
}

/// Renders [`ProgressState`] samples as a single, self-overwriting stderr line.
struct ProgressLine {
    operation: String,
    quiet: bool,
    state: Arc<Mutex<LineState>>,
}

impl ProgressLine {
    fn new(operation: &str, quiet: bool) -> Self {
        Self {
            operation: operation.to_uppercase(),
            quiet,
            state: Arc::new(Mutex::new(LineState::default())),
        }
    }

    /// A tracker wired to this line, or a silent one with `--quiet`.
    fn tracker(&self) -> ProgressTracker {
        let tracker = ProgressTracker::new(DEFAULT_SAMPLE_INTERVAL);
        if self.quiet {
            return tracker;
        }
        let operation = self.operation.clone();
        let state = Arc::clone(&self.state);
        tracker.with_callback(move |progress| {
            let mut line = state.lock().unwrap_or_else(|e| e.into_inner());
            let now = Instant::now();
            let complete = progress.progress_percent >= 100.0;
            if !complete
                && line
                    .last_draw
                    .is_some_and(|t| now.duration_since(t) < REDRAW_INTERVAL)
            {
                return;
            }
            line.last_draw = Some(now);

            let term_width = term_size::dimensions().map(|(w, _)| w).unwrap_or(80);
            let mut text = status_line(&operation, &progress, term_width);
            if line.prev_len > text.chars().count() {
                let pad = line.prev_len - text.chars().count();
                text.push_str(&" ".repeat(pad));
            }
            line.prev_len = text.chars().count();
            line.drawn = true;

            let mut err = io::stderr().lock();
            let _ = write!(err, "\r\x1B[2K{}", text);
            let _ = err.flush();
        })
    }

    /// Ends the line once the operation is over.
    fn finish(&self) {
        let line = self.state.lock().unwrap_or_else(|e| e.into_inner());
        if line.drawn {
            eprintln!();
        }
    }
}

/// Builds the status text, shrinking the bar until it fits `term_width`.
fn status_line(operation: &str, state: &ProgressState, term_width: usize) -> String {
    let eta = match state.estimated_time_remaining() {
        Some(eta) if eta.as_secs_f64() > 60.0 => format!("{:.1}m", eta.as_secs_f64() / 60.0),
        Some(eta) => format!("{:.1}s", eta.as_secs_f64()),
        None => "--".to_string(),
    };
    let percent = state.progress_percent.clamp(0.0, 100.0);

    let mut bar_width: usize = 40;
    loop {
        let filled = ((percent / 100.0) * bar_width as f32) as usize;
        let bar = format!(
            "[{}{}]",
            "█".repeat(filled),
            "░".repeat(bar_width - filled)
        );
        let line = format!(
            "[{}] {} {:.1}% | {}/{} | {} | ETA: {}",
            operation,
            bar,
            percent,
            format_size(state.processed_bytes),
            format_size(state.total_bytes),
            format_rate(state.rate_bytes_per_sec),
            eta
        );
        if line.chars().count() <= term_width || bar_width <= 10 {
            return line;
        }
        bar_width = bar_width.saturating_sub(4).max(10);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn state(processed: u64, total: u64, rate: u64) -> ProgressState {
        ProgressState {
            processed_bytes: processed,
            total_bytes: total,
            rate_bytes_per_sec: rate,
            progress_percent: (processed as f64 / total as f64 * 100.0) as f32,
            elapsed_time: Duration::from_secs(1),
        }
    }

    #[test]
    fn status_line_shows_sizes_and_eta() {
        let line = status_line("RESTORE", &state(1024, 4096, 1024), 200);
        assert!(line.starts_with("[RESTORE] ["));
        assert!(line.contains("25.0%"));
        assert!(line.contains("1.0 KiB/4.0 KiB"));
        assert!(line.contains("1.0 KiB/s"));
        assert!(line.contains("ETA: 3.0s"));
    }

    #[test]
    fn status_line_shrinks_to_fit() {
        let wide = status_line("BUILD", &state(10, 100, 0), 500);
        let narrow = status_line("BUILD", &state(10, 100, 0), 70);
        assert!(narrow.chars().count() < wide.chars().count());
        assert!(narrow.contains("ETA: --"));
    }
}
