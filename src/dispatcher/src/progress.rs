//! Byte-level progress reporting for transfers.

use std::io::{self, Read};
use std::sync::Arc;

/// Progress notification, emitted at most once per 10% step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub bytes_sent: u64,
    pub total_bytes: u64,
    pub percent: u8,
}

pub type ProgressCallback = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

const STEP: i64 = 10;

/// Counts bytes sent and notifies the callback whenever another 10% is reached.
pub struct ProgressTracker {
    total_bytes: u64,
    bytes_sent: u64,
    last_reported: i64,
    callback: ProgressCallback,
}

impl ProgressTracker {
    pub fn new(total_bytes: u64, callback: ProgressCallback) -> Self {
        Self {
            total_bytes,
            bytes_sent: 0,
            last_reported: -STEP,
            callback,
        }
    }

    /// Tracker that logs each step at debug level.
    pub fn logging(total_bytes: u64, artifact: &str, destination: &str) -> Self {
        let artifact = artifact.to_string();
        let destination = destination.to_string();
        Self::new(
            total_bytes,
            Arc::new(move |update: ProgressUpdate| {
                tracing::debug!(
                    artifact = %artifact,
                    destination = %destination,
                    percent = update.percent,
                    bytes_sent = update.bytes_sent,
                    total_bytes = update.total_bytes,
                    "Transfer progress"
                );
            }),
        )
    }

    pub fn record(&mut self, bytes: usize) {
        self.bytes_sent += bytes as u64;
        let percent = self.percent();
        if i64::from(percent) >= self.last_reported + STEP {
            self.last_reported = i64::from(percent);
            (self.callback)(ProgressUpdate {
                bytes_sent: self.bytes_sent,
                total_bytes: self.total_bytes,
                percent,
            });
        }
    }

    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent
    }

    fn percent(&self) -> u8 {
        if self.total_bytes == 0 {
            return 100;
        }
        (self.bytes_sent.min(self.total_bytes) * 100 / self.total_bytes) as u8
    }
}

impl std::fmt::Debug for ProgressTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressTracker")
            .field("total_bytes", &self.total_bytes)
            .field("bytes_sent", &self.bytes_sent)
            .field("last_reported", &self.last_reported)
            .finish()
    }
}

/// Reader that feeds every read into a [`ProgressTracker`].
pub struct ProgressReader<R> {
    inner: R,
    tracker: ProgressTracker,
}

impl<R: Read> ProgressReader<R> {
    pub fn new(inner: R, tracker: ProgressTracker) -> Self {
        Self { inner, tracker }
    }

    pub fn into_tracker(self) -> ProgressTracker {
        self.tracker
    }
}

impl<R: Read> Read for ProgressReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.tracker.record(n);
        Ok(n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn collecting(total: u64) -> (ProgressTracker, Arc<Mutex<Vec<u8>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let tracker = ProgressTracker::new(
            total,
            Arc::new(move |update: ProgressUpdate| sink.lock().unwrap().push(update.percent)),
        );
        (tracker, seen)
    }

    #[test]
    fn test_reports_each_ten_percent_step() {
        let (mut tracker, seen) = collecting(100);
        for _ in 0..100 {
            tracker.record(1);
        }
        assert_eq!(
            *seen.lock().unwrap(),
            vec![10, 20, 30, 40, 50, 60, 70, 80, 90, 100]
        );
    }

    #[test]
    fn test_large_chunks_skip_steps() {
        let (mut tracker, seen) = collecting(1000);
        tracker.record(5);
        tracker.record(445);
        tracker.record(550);
        assert_eq!(*seen.lock().unwrap(), vec![0, 45, 100]);
    }

    #[test]
    fn test_empty_content_reports_completion_once() {
        let (mut tracker, seen) = collecting(0);
        tracker.record(0);
        tracker.record(0);
        assert_eq!(*seen.lock().unwrap(), vec![100]);
    }

    #[test]
    fn test_reader_counts_bytes() {
        let (tracker, seen) = collecting(8);
        let mut reader = ProgressReader::new(&b"abcdefgh"[..], tracker);
        let mut out = Vec::new();
        reader.read_to_end(&mut out).unwrap();

        assert_eq!(out, b"abcdefgh");
        assert_eq!(reader.into_tracker().bytes_sent(), 8);
        assert_eq!(seen.lock().unwrap().last(), Some(&100));
    }
}
