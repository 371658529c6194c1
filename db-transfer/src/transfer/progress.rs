//! Byte-level progress reporting for downloads and uploads.
//!
//! A [`ProgressReporter`] samples a [`TransferCounter`] on a fixed interval and
//! redraws one overwriting status line. It is stopped exactly once with a
//! [`TransferOutcome`], after which it draws the final line and announces the
//! result.

use std::io::Write;
use std::time::{Duration, Instant};

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::counter::TransferCounter;
use crate::config::ProgressConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Download,
    Upload,
}

impl Direction {
    fn verb(&self) -> &'static str {
        match self {
            Direction::Download => "downloaded",
            Direction::Upload => "uploaded",
        }
    }

    fn noun(&self) -> &'static str {
        match self {
            Direction::Download => "Download",
            Direction::Upload => "Upload",
        }
    }
}

/// How a transfer ended, delivered once to its reporter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferOutcome {
    Success,
    Failure,
}

impl TransferOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            TransferOutcome::Success => "Finished",
            TransferOutcome::Failure => "Failed",
        }
    }
}

/// Snapshot of one transfer for rendering.
#[derive(Debug, Clone)]
pub struct TransferProgress {
    pub total_bytes: u64,
    pub transferred_bytes: u64,
    /// 0-100; an empty transfer counts as done
    pub percent_complete: f64,
}

impl TransferProgress {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            total_bytes,
            transferred_bytes: 0,
            percent_complete: 0.0,
        }
    }

    pub fn update(&mut self, transferred_bytes: u64) {
        self.transferred_bytes = transferred_bytes;
        self.percent_complete = if self.total_bytes > 0 {
            (self.transferred_bytes as f64 / self.total_bytes as f64) * 100.0
        } else {
            100.0
        };
    }
}

/// Progress plus wall-clock time since the reporter started.
pub struct ProgressTracker {
    start_time: Instant,
    progress: TransferProgress,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64) -> Self {
        Self {
            start_time: Instant::now(),
            progress: TransferProgress::new(total_bytes),
        }
    }

    pub fn update(&mut self, transferred_bytes: u64) -> &TransferProgress {
        self.progress.update(transferred_bytes);
        &self.progress
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    /// Average speed since start
    pub fn average_speed(&self) -> u64 {
        let elapsed = self.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            (self.progress.transferred_bytes as f64 / elapsed) as u64
        } else {
            0
        }
    }
}

/// Overwriting status line; pads with spaces when the new text is shorter.
#[derive(Debug, Default)]
struct StatusLine {
    last_len: usize,
}

impl StatusLine {
    fn render(&mut self, progress: &TransferProgress, direction: Direction) -> String {
        let mut line = format!(
            "\r\t{} of {} ({}%) {}",
            format_bytes(progress.transferred_bytes),
            format_bytes(progress.total_bytes),
            progress.percent_complete.floor() as u64,
            direction.verb()
        );
        let len = line.len();
        if len < self.last_len {
            line.push_str(&" ".repeat(self.last_len - len));
        } else {
            self.last_len = len;
        }
        line
    }
}

/// Background task drawing progress for one transfer (or one upload part).
pub struct ProgressReporter {
    done: Option<oneshot::Sender<TransferOutcome>>,
    handle: JoinHandle<()>,
}

impl ProgressReporter {
    /// Start reporting. `part` is `(index, total)` for multipart uploads.
    pub fn spawn(
        counter: TransferCounter,
        direction: Direction,
        part: Option<(u64, u64)>,
        config: &ProgressConfig,
    ) -> Self {
        let (tx, rx) = oneshot::channel();
        let enabled = config.enabled;
        let interval = config.interval().max(Duration::from_millis(1));

        match (direction, part) {
            (Direction::Download, _) => info!("Decrypting and Downloading..."),
            (Direction::Upload, Some((index, total))) => {
                info!("Encrypting and Uploading part {} of {}...", index, total)
            }
            (Direction::Upload, None) => info!("Encrypting and Uploading..."),
        }

        let handle = tokio::spawn(run(counter, direction, enabled, interval, rx));
        Self {
            done: Some(tx),
            handle,
        }
    }

    /// Stop the reporter and wait for its final line.
    pub async fn finish(mut self, outcome: TransferOutcome) {
        if let Some(done) = self.done.take() {
            let _ = done.send(outcome);
        }
        if let Err(e) = (&mut self.handle).await {
            warn!("Progress reporter task failed: {}", e);
        }
    }
}

async fn run(
    counter: TransferCounter,
    direction: Direction,
    enabled: bool,
    interval: Duration,
    mut done: oneshot::Receiver<TransferOutcome>,
) {
    let mut tracker = ProgressTracker::new(counter.length());
    let mut line = StatusLine::default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    // Dropped sender means the transfer went away without reporting
    let mut outcome = None;
    while !counter.is_complete() {
        tokio::select! {
            received = &mut done => {
                outcome = Some(received.unwrap_or(TransferOutcome::Failure));
                break;
            }
            _ = ticker.tick() => {
                let progress = tracker.update(counter.transferred());
                if enabled {
                    print_line(&line.render(progress, direction));
                }
            }
        }
    }
    let outcome = match outcome {
        Some(outcome) => outcome,
        None => done.await.unwrap_or(TransferOutcome::Failure),
    };

    let progress = tracker.update(counter.transferred()).clone();
    if enabled {
        print_line(&line.render(&progress, direction));
        print_line("\n");
    }
    info!(
        "{} {}! ({} in {}, {})",
        direction.noun(),
        outcome.as_str(),
        format_bytes(progress.transferred_bytes),
        format_duration(tracker.elapsed().as_secs()),
        format_speed(tracker.average_speed())
    );
}

fn print_line(text: &str) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(text.as_bytes());
    let _ = stdout.flush();
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    format!("{:.2} {}", size, UNITS[unit_index])
}

/// Format speed as human-readable string
pub fn format_speed(bytes_per_second: u64) -> String {
    format!("{}/s", format_bytes(bytes_per_second))
}

/// Format duration as human-readable string
pub fn format_duration(seconds: u64) -> String {
    if seconds < 60 {
        format!("{}s", seconds)
    } else if seconds < 3600 {
        format!("{}m {}s", seconds / 60, seconds % 60)
    } else {
        format!("{}h {}m", seconds / 3600, (seconds % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn quiet() -> ProgressConfig {
        ProgressConfig {
            enabled: false,
            interval_ms: 1,
        }
    }

    #[test]
    fn test_transfer_progress_update() {
        let mut progress = TransferProgress::new(1000);
        progress.update(500);
        assert!((progress.percent_complete - 50.0).abs() < 0.01);
        progress.update(1000);
        assert_eq!(progress.percent_complete, 100.0);
    }

    #[test]
    fn test_empty_transfer_is_complete() {
        let mut progress = TransferProgress::new(0);
        progress.update(0);
        assert_eq!(progress.percent_complete, 100.0);
    }

    #[test]
    fn test_progress_tracker() {
        let mut tracker = ProgressTracker::new(1000);
        assert_eq!(tracker.update(100).transferred_bytes, 100);

        thread::sleep(Duration::from_millis(100));
        assert_eq!(tracker.update(500).transferred_bytes, 500);
        assert!(tracker.elapsed() >= Duration::from_millis(100));
        assert!(tracker.average_speed() > 0);
    }

    #[test]
    fn test_status_line_format_and_padding() {
        let mut line = StatusLine::default();
        let mut progress = TransferProgress::new(2048);
        progress.update(1024);
        assert_eq!(
            line.render(&progress, Direction::Download),
            "\r\t1.00 KB of 2.00 KB (50%) downloaded"
        );

        let mut progress = TransferProgress::new(10);
        progress.update(1);
        let shorter = line.render(&progress, Direction::Upload);
        assert!(shorter.starts_with("\r\t1.00 B of 10.00 B (10%) uploaded"));
        assert_eq!(shorter.len(), "\r\t1.00 KB of 2.00 KB (50%) downloaded".len());
    }

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0.00 B");
        assert_eq!(format_bytes(1023), "1023.00 B");
        assert_eq!(format_bytes(1024), "1.00 KB");
        assert_eq!(format_bytes(1024 * 1024), "1.00 MB");
        assert_eq!(format_bytes(1024 * 1024 * 1024), "1.00 GB");
    }

    #[test]
    fn test_format_speed() {
        assert_eq!(format_speed(1024), "1.00 KB/s");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(30), "30s");
        assert_eq!(format_duration(90), "1m 30s");
        assert_eq!(format_duration(3665), "1h 1m");
    }

    #[tokio::test]
    async fn test_reporter_stops_on_failure_mid_transfer() {
        let counter = TransferCounter::new(1000);
        counter.add(10);
        let reporter = ProgressReporter::spawn(counter, Direction::Download, None, &quiet());
        tokio::time::timeout(Duration::from_secs(5), reporter.finish(TransferOutcome::Failure))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_reporter_waits_for_outcome_after_completion() {
        let counter = TransferCounter::new(100);
        let reporter =
            ProgressReporter::spawn(counter.clone(), Direction::Upload, Some((1, 3)), &quiet());
        counter.add(100);
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!reporter.handle.is_finished());
        tokio::time::timeout(Duration::from_secs(5), reporter.finish(TransferOutcome::Success))
            .await
            .unwrap();
    }
}
