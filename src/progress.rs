//! Progress tracking for build and restore operations.
//!
//! A [`ProgressTracker`] is owned by the caller and passed by reference into the
//! engine. Producers only ever touch one atomic counter; a sampler thread reads it
//! at a fixed interval, derives rate and percentage, and hands a [`ProgressState`]
//! to the optional render callback.

use std::io::{self, Write};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{select, tick, Sender};

/// Default sampling interval.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(250);

/// Snapshot of an operation's progress.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressState {
    pub processed_bytes: u64,
    /// Expected total, never zero.
    pub total_bytes: u64,
    /// Throughput since the previous sample (average over the run for snapshots).
    pub rate_bytes_per_sec: u64,
    pub progress_percent: f32,
    pub elapsed_time: Duration,
}

impl ProgressState {
    fn new(processed_bytes: u64, total_bytes: u64, rate: u64, elapsed_time: Duration) -> Self {
        let progress_percent = (processed_bytes as f64 / total_bytes as f64 * 100.0) as f32;
        Self {
            processed_bytes,
            total_bytes,
            rate_bytes_per_sec: rate,
            progress_percent,
            elapsed_time,
        }
    }

    /// Estimated time remaining based on the current rate. `None` while the rate is zero.
    pub fn estimated_time_remaining(&self) -> Option<Duration> {
        if self.rate_bytes_per_sec == 0 {
            return None;
        }
        let remaining = self.total_bytes.saturating_sub(self.processed_bytes);
        Some(Duration::from_secs_f64(
            remaining as f64 / self.rate_bytes_per_sec as f64,
        ))
    }
}

/// Progress callback function type
pub type ProgressCallback = dyn Fn(ProgressState) + Send + Sync;

struct Sampler {
    stop_tx: Sender<()>,
    handle: JoinHandle<()>,
}

/// Byte counter plus periodic sampler.
pub struct ProgressTracker {
    processed: Arc<AtomicU64>,
    total: Arc<AtomicU64>,
    interval: Duration,
    callback: Option<Arc<ProgressCallback>>,
    started_at: Mutex<Instant>,
    sampler: Mutex<Option<Sampler>>,
}

impl ProgressTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            processed: Arc::new(AtomicU64::new(0)),
            total: Arc::new(AtomicU64::new(1)),
            interval,
            callback: None,
            started_at: Mutex::new(Instant::now()),
            sampler: Mutex::new(None),
        }
    }

    /// A tracker that counts bytes but renders nothing.
    pub fn silent() -> Self {
        Self::new(DEFAULT_SAMPLE_INTERVAL)
    }

    /// Install a callback that receives every sample and a final state on `stop`.
    pub fn with_callback<F>(mut self, callback: F) -> Self
    where
        F: Fn(ProgressState) + Send + Sync + 'static,
    {
        self.callback = Some(Arc::new(callback));
        self
    }

    /// Reset the counter and start sampling. A second call while running is a no-op.
    pub fn start(&self, expected_total: u64) {
        let mut sampler = self.sampler.lock().unwrap_or_else(|e| e.into_inner());
        if sampler.is_some() {
            return;
        }

        self.processed.store(0, Ordering::Relaxed);
        self.total.store(expected_total.max(1), Ordering::Relaxed);
        let start = Instant::now();
        *self.started_at.lock().unwrap_or_else(|e| e.into_inner()) = start;

        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(0);
        let processed = Arc::clone(&self.processed);
        let total = Arc::clone(&self.total);
        let callback = self.callback.clone();
        let interval = self.interval;

        let handle = thread::spawn(move || {
            let ticker = tick(interval);
            let mut prev_bytes = 0u64;
            let mut prev_at = start;
            loop {
                select! {
                    recv(ticker) -> now => {
                        let now = now.unwrap_or_else(|_| Instant::now());
                        let current = processed.load(Ordering::Relaxed);
                        let dt = now.duration_since(prev_at).as_secs_f64().max(1e-3);
                        let rate = (current.saturating_sub(prev_bytes) as f64 / dt) as u64;
                        prev_bytes = current;
                        prev_at = now;
                        if let Some(cb) = &callback {
                            let state = ProgressState::new(
                                current,
                                total.load(Ordering::Relaxed),
                                rate,
                                now.duration_since(start),
                            );
                            cb(state);
                        }
                    }
                    recv(stop_rx) -> _ => break,
                }
            }
        });

        *sampler = Some(Sampler { stop_tx, handle });
    }

    /// Stop sampling and emit one final state. Safe to call when not running.
    pub fn stop(&self) {
        let sampler = self
            .sampler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        let Some(Sampler { stop_tx, handle }) = sampler else {
            return;
        };
        drop(stop_tx);
        if handle.join().is_err() {
            tracing::warn!("progress sampler thread panicked");
        }
        if let Some(cb) = &self.callback {
            cb(self.snapshot());
        }
    }

    pub fn is_running(&self) -> bool {
        self.sampler
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .is_some()
    }

    /// Record `n` processed bytes. Never blocks.
    #[inline]
    pub fn add_bytes(&self, n: u64) {
        if n > 0 {
            self.processed.fetch_add(n, Ordering::Relaxed);
        }
    }

    pub fn processed_bytes(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Current state with the average rate since `start`.
    pub fn snapshot(&self) -> ProgressState {
        let elapsed = self
            .started_at
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed();
        let processed = self.processed_bytes();
        let rate = (processed as f64 / elapsed.as_secs_f64().max(1e-3)) as u64;
        ProgressState::new(processed, self.total.load(Ordering::Relaxed), rate, elapsed)
    }
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self::silent()
    }
}

impl Drop for ProgressTracker {
    fn drop(&mut self) {
        self.stop();
    }
}

/// `Write` adapter that reports every successfully written byte.
pub struct ProgressWriter<'a, W> {
    inner: W,
    progress: &'a ProgressTracker,
}

impl<'a, W: Write> ProgressWriter<'a, W> {
    pub fn new(inner: W, progress: &'a ProgressTracker) -> Self {
        Self { inner, progress }
    }
}

impl<W: Write> Write for ProgressWriter<'_, W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.progress.add_bytes(n as u64);
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

const UNITS: [&str; 6] = ["Ki", "Mi", "Gi", "Ti", "Pi", "Ei"];

/// Human-readable size in binary units, e.g. `1.5 MiB`.
pub fn format_size(bytes: u64) -> String {
    if bytes < 1024 {
        return format!("{} B", bytes);
    }
    let mut value = bytes as f64 / 1024.0;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    format!("{:.1} {}B", value, UNITS[unit])
}

/// Human-readable rate, e.g. `3.0 KiB/s`.
pub fn format_rate(bytes_per_sec: u64) -> String {
    format!("{}/s", format_size(bytes_per_sec))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn zero_total_is_normalized() {
        let tracker = ProgressTracker::silent();
        tracker.start(0);
        let state = tracker.snapshot();
        tracker.stop();
        assert_eq!(state.total_bytes, 1);
        assert_eq!(state.progress_percent, 0.0);
    }

    #[test]
    fn counts_bytes_from_many_threads() {
        let tracker = ProgressTracker::silent();
        tracker.start(4 * 1000 * 16);
        thread::scope(|s| {
            for _ in 0..4 {
                s.spawn(|| {
                    for _ in 0..1000 {
                        tracker.add_bytes(16);
                    }
                });
            }
        });
        let state = tracker.snapshot();
        tracker.stop();
        assert_eq!(state.processed_bytes, 64_000);
        assert!((state.progress_percent - 100.0).abs() < f32::EPSILON);
    }

    #[test]
    fn second_start_is_a_no_op() {
        let tracker = ProgressTracker::silent();
        tracker.start(100);
        tracker.add_bytes(40);
        tracker.start(5000);
        assert!(tracker.is_running());
        let state = tracker.snapshot();
        assert_eq!(state.processed_bytes, 40);
        assert_eq!(state.total_bytes, 100);
        tracker.stop();
        assert!(!tracker.is_running());
        tracker.stop();
    }

    #[test]
    fn callback_sees_samples_and_final_state() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let tracker = ProgressTracker::new(Duration::from_millis(5))
            .with_callback(move |state| sink.lock().unwrap().push(state.processed_bytes));
        tracker.start(10);
        tracker.add_bytes(10);
        thread::sleep(Duration::from_millis(40));
        tracker.stop();

        let seen = seen.lock().unwrap();
        assert!(seen.len() >= 2, "expected periodic samples plus final, got {seen:?}");
        assert_eq!(*seen.last().unwrap(), 10);
    }

    #[test]
    fn progress_writer_counts_written_bytes() {
        let tracker = ProgressTracker::silent();
        let mut buf = Vec::new();
        let mut out = ProgressWriter::new(&mut buf, &tracker);
        out.write_all(b"hello world").unwrap();
        drop(out);
        assert_eq!(tracker.processed_bytes(), 11);
        assert_eq!(buf, b"hello world");
    }

    #[test]
    fn eta_needs_a_rate() {
        let state = ProgressState::new(50, 150, 0, Duration::ZERO);
        assert_eq!(state.estimated_time_remaining(), None);
        let state = ProgressState::new(50, 150, 25, Duration::ZERO);
        assert_eq!(state.estimated_time_remaining(), Some(Duration::from_secs(4)));
    }

    #[test]
    fn sizes_use_binary_units() {
        assert_eq!(format_size(512), "512 B");
        assert_eq!(format_size(1536), "1.5 KiB");
        assert_eq!(format_size(3 * 1024 * 1024), "3.0 MiB");
        assert_eq!(format_rate(2048), "2.0 KiB/s");
    }
}
