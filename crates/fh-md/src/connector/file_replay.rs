//! File replay transport for deterministic playback and backtesting.
//!
//! Reads a capture file and, when a byte-rate limit is configured, paces the
//! reads so that elapsed time since the replay started stays proportional to
//! the bytes read so far. This emulates a live feed arriving in real time.
//! Without a limit the file is read as fast as the disk allows.

use std::num::NonZeroU64;
use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use fh_core::FeedError;
use tokio::fs::File;
use tokio::io::AsyncReadExt;
use tokio::time::Instant;
use tracing::debug;

use super::Transport;

/// Pacing for a byte stream: `bytes_per_sec` caps the average read rate.
#[derive(Debug, Clone, Copy, Default)]
pub struct Throttle {
    bytes_per_sec: Option<NonZeroU64>,
}

impl Throttle {
    /// `None` or `Some(0)` disables throttling.
    pub fn new(bytes_per_sec: Option<u64>) -> Self {
        Self { bytes_per_sec: bytes_per_sec.and_then(NonZeroU64::new) }
    }

    pub fn is_enabled(&self) -> bool {
        self.bytes_per_sec.is_some()
    }

    /// How long to sleep after `total_bytes` have been read in `elapsed`.
    pub fn delay_after(&self, total_bytes: u64, elapsed: Duration) -> Duration {
        let Some(rate) = self.bytes_per_sec else {
            return Duration::ZERO;
        };
        let due = Duration::from_secs_f64(total_bytes as f64 / rate.get() as f64);
        due.saturating_sub(elapsed)
    }

    /// Largest read that keeps playback smooth: about 1/20th of a second of data.
    pub fn max_chunk(&self, buf_len: usize) -> usize {
        match self.bytes_per_sec {
            Some(rate) => ((rate.get() / 20).max(1) as usize).min(buf_len),
            None => buf_len,
        }
    }
}

/// Replays a capture file, optionally throttled.
pub struct FileReplayTransport {
    path: PathBuf,
    throttle: Throttle,
    file: Option<File>,
    started: Option<Instant>,
    bytes_read: u64,
}

impl FileReplayTransport {
    pub fn new(path: PathBuf, bytes_per_sec: Option<u64>) -> Self {
        Self { path, throttle: Throttle::new(bytes_per_sec), file: None, started: None, bytes_read: 0 }
    }
}

#[async_trait]
impl Transport for FileReplayTransport {
    fn describe(&self) -> String {
        self.path.display().to_string()
    }

    async fn establish(&mut self) -> Result<(), FeedError> {
        let file = File::open(&self.path).await?;
        debug!("replaying {} (throttled: {})", self.path.display(), self.throttle.is_enabled());
        self.file = Some(file);
        self.started = Some(Instant::now());
        self.bytes_read = 0;
        Ok(())
    }

    async fn read(&mut self, buf: &mut [u8]) -> Result<usize, FeedError> {
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| FeedError::Io(std::io::Error::new(std::io::ErrorKind::NotConnected, "file not open")))?;
        let limit = self.throttle.max_chunk(buf.len());
        let n = file.read(&mut buf[..limit]).await?;
        self.bytes_read += n as u64;

        if let Some(started) = self.started {
            let delay = self.throttle.delay_after(self.bytes_read, started.elapsed());
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(n)
    }

    async fn end(&mut self) {
        // Read-only, so dropping the handle is the whole close.
        if self.file.take().is_some() {
            debug!("closed {} after {} bytes", self.path.display(), self.bytes_read);
        }
        self.started = None;
    }
}
