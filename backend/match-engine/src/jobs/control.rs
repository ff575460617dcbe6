//! Cooperative run stop
//!
//! A watch channel carrying the first stop reason. Workers poll it at user
//! boundaries; the dispatch loop and retry backoff await it.

use crate::error::EngineError;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    Deadline,
    Cancelled,
}

impl StopReason {
    /// Error recorded on batches the stop left unfinished
    pub fn error(self) -> EngineError {
        match self {
            StopReason::Deadline => EngineError::RunDeadlineExceeded,
            StopReason::Cancelled => EngineError::Cancelled,
        }
    }
}

#[derive(Clone)]
pub struct RunControl {
    tx: Arc<watch::Sender<Option<StopReason>>>,
    rx: watch::Receiver<Option<StopReason>>,
}

impl RunControl {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(None);
        Self {
            tx: Arc::new(tx),
            rx,
        }
    }

    /// Record a stop; only the first reason is kept. Returns whether this
    /// call stopped the run.
    pub fn stop(&self, reason: StopReason) -> bool {
        self.tx.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(reason);
            true
        })
    }

    pub fn cancel(&self) -> bool {
        self.stop(StopReason::Cancelled)
    }

    pub fn reason(&self) -> Option<StopReason> {
        *self.rx.borrow()
    }

    pub fn is_stopped(&self) -> bool {
        self.reason().is_some()
    }

    /// Resolves once a stop reason is set
    pub async fn stopped(&self) -> StopReason {
        let mut rx = self.rx.clone();
        loop {
            if let Some(reason) = *rx.borrow_and_update() {
                return reason;
            }
            if rx.changed().await.is_err() {
                return std::future::pending().await;
            }
        }
    }

    /// Stop with [`StopReason::Deadline`] once `after` has elapsed
    pub fn arm_deadline(&self, after: Duration) -> JoinHandle<()> {
        let control = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            if control.stop(StopReason::Deadline) {
                warn!(deadline_ms = after.as_millis() as u64, "Run deadline reached, stopping dispatch");
            }
        })
    }
}

impl Default for RunControl {
    fn default() -> Self {
        Self::new()
    }
}
