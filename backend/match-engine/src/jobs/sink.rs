//! Result sinks
//!
//! The scheduler hands each user's ranked list to a [`ResultSink`] as soon as
//! it is computed. A slow sink throttles the workers instead of letting
//! results pile up in memory.

use crate::models::UserMatches;
use async_trait::async_trait;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio::io::{AsyncWrite, AsyncWriteExt, BufWriter};
use tokio::sync::{mpsc, Mutex};

#[derive(Debug, Clone, Error)]
pub enum SinkError {
    /// Transient; the batch attempt fails and is retried
    #[error("Result sink unavailable: {0}")]
    Unavailable(String),

    /// This user's result cannot be accepted; other users are unaffected
    #[error("Result rejected: {0}")]
    Rejected(String),
}

#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn deliver(&self, matches: UserMatches) -> Result<(), SinkError>;

    async fn flush(&self) -> Result<(), SinkError> {
        Ok(())
    }
}

/// Bounded channel sink; `deliver` waits while the channel is full
pub struct ChannelSink {
    tx: mpsc::Sender<UserMatches>,
    buffered: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

/// Receiving half of a [`ChannelSink`]
pub struct ResultReceiver {
    rx: mpsc::Receiver<UserMatches>,
    buffered: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Self, ResultReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let buffered = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        (
            Self {
                tx,
                buffered: Arc::clone(&buffered),
                peak: Arc::clone(&peak),
            },
            ResultReceiver { rx, buffered, peak },
        )
    }

    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ResultSink for ChannelSink {
    async fn deliver(&self, matches: UserMatches) -> Result<(), SinkError> {
        let permit = self
            .tx
            .reserve()
            .await
            .map_err(|_| SinkError::Unavailable("result receiver closed".to_string()))?;
        let now = self.buffered.fetch_add(1, Ordering::Relaxed) + 1;
        self.peak.fetch_max(now, Ordering::Relaxed);
        permit.send(matches);
        Ok(())
    }
}

impl ResultReceiver {
    pub async fn recv(&mut self) -> Option<UserMatches> {
        let matches = self.rx.recv().await?;
        self.buffered.fetch_sub(1, Ordering::Relaxed);
        Some(matches)
    }

    /// Results sent but not yet received
    pub fn buffered(&self) -> usize {
        self.buffered.load(Ordering::Relaxed)
    }

    /// Highest `buffered` value seen so far
    pub fn peak_buffered(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }

    /// Drain everything until the sender side is dropped
    pub async fn collect(mut self) -> Vec<UserMatches> {
        let mut all = Vec::new();
        while let Some(matches) = self.recv().await {
            all.push(matches);
        }
        all
    }
}

/// One JSON object per line, to a file or stdout
pub struct JsonLinesSink {
    writer: Mutex<BufWriter<Box<dyn AsyncWrite + Send + Unpin>>>,
}

impl JsonLinesSink {
    pub async fn create(path: &Path) -> std::io::Result<Self> {
        let file = tokio::fs::File::create(path).await?;
        Ok(Self::from_writer(Box::new(file)))
    }

    pub fn stdout() -> Self {
        Self::from_writer(Box::new(tokio::io::stdout()))
    }

    pub fn from_writer(writer: Box<dyn AsyncWrite + Send + Unpin>) -> Self {
        Self {
            writer: Mutex::new(BufWriter::new(writer)),
        }
    }
}

#[async_trait]
impl ResultSink for JsonLinesSink {
    async fn deliver(&self, matches: UserMatches) -> Result<(), SinkError> {
        let mut line =
            serde_json::to_vec(&matches).map_err(|e| SinkError::Rejected(e.to_string()))?;
        line.push(b'\n');
        let mut writer = self.writer.lock().await;
        writer
            .write_all(&line)
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))
    }

    async fn flush(&self) -> Result<(), SinkError> {
        self.writer
            .lock()
            .await
            .flush()
            .await
            .map_err(|e| SinkError::Unavailable(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn matches(user_id: u64) -> UserMatches {
        UserMatches {
            user_id,
            matches: Vec::new(),
            fallback_used: false,
        }
    }

    #[tokio::test]
    async fn test_channel_sink_tracks_buffered() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.deliver(matches(1)).await.unwrap();
        sink.deliver(matches(2)).await.unwrap();
        assert_eq!(sink.buffered(), 2);

        assert_eq!(rx.recv().await.unwrap().user_id, 1);
        assert_eq!(rx.buffered(), 1);
        assert_eq!(rx.peak_buffered(), 2);
    }

    #[tokio::test]
    async fn test_closed_receiver_is_unavailable() {
        let (sink, rx) = ChannelSink::new(1);
        drop(rx);
        let err = sink.deliver(matches(1)).await.unwrap_err();
        assert!(matches!(err, SinkError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_json_lines_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("results.jsonl");
        let sink = JsonLinesSink::create(&path).await.unwrap();
        sink.deliver(matches(1)).await.unwrap();
        sink.deliver(matches(2)).await.unwrap();
        sink.flush().await.unwrap();

        let text = tokio::fs::read_to_string(&path).await.unwrap();
        let lines: Vec<UserMatches> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(lines, vec![matches(1), matches(2)]);
    }
}
