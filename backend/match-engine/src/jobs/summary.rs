use super::batch::{BatchDescriptor, BatchStatus, UserState};
use super::control::StopReason;
use crate::context::RunContext;
use crate::error::ErrorKind;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    Complete,
    Partial,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedBatch {
    pub batch_id: usize,
    pub attempts: u32,
    pub error_kind: Option<ErrorKind>,
    pub error: String,
}

/// Emitted once per run
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub snapshot_version: u64,
    pub started_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub users_total: usize,
    pub users_succeeded: usize,
    pub users_failed: usize,
    pub users_skipped: usize,
    pub batches_total: usize,
    pub batches_succeeded: usize,
    pub batches_failed: usize,
    pub batches_cancelled: usize,
    pub retries: u32,
    pub cache_hit_rate: f64,
    pub peak_memory_bytes: u64,
    pub peak_concurrency: usize,
    pub completion: Completion,
    pub stop_reason: Option<StopReason>,
    pub failed_batches: Vec<FailedBatch>,
}

/// Run-level figures gathered by the scheduler alongside the batches
#[derive(Debug, Clone, Copy, Default)]
pub struct RunObservations {
    pub elapsed: Duration,
    pub peak_memory_bytes: u64,
    pub peak_concurrency: usize,
}

impl RunSummary {
    pub fn from_batches(
        ctx: &RunContext,
        users_total: usize,
        batches: &[BatchDescriptor],
        observed: RunObservations,
    ) -> Self {
        let users_succeeded: usize = batches.iter().map(|b| b.count(UserState::Delivered)).sum();
        let users_failed: usize = batches.iter().map(|b| b.count(UserState::Failed)).sum();
        // Users of a batch whose task was lost count as skipped
        let users_skipped = users_total.saturating_sub(users_succeeded + users_failed);

        let with_status =
            |status: BatchStatus| batches.iter().filter(|b| b.status() == status).count();

        let failed_batches = batches
            .iter()
            .filter(|b| b.status() == BatchStatus::Failed)
            .map(|b| FailedBatch {
                batch_id: b.id,
                attempts: b.attempts(),
                error_kind: b.last_error().map(|e| e.kind()),
                error: b
                    .last_error()
                    .map(|e| e.to_string())
                    .unwrap_or_default(),
            })
            .collect();

        Self {
            run_id: ctx.run_id,
            snapshot_version: ctx.catalog.version(),
            started_at: ctx.started_at,
            duration_ms: observed.elapsed.as_millis() as u64,
            users_total,
            users_succeeded,
            users_failed,
            users_skipped,
            batches_total: batches.len(),
            batches_succeeded: with_status(BatchStatus::Succeeded),
            batches_failed: with_status(BatchStatus::Failed),
            batches_cancelled: with_status(BatchStatus::Cancelled),
            retries: batches.iter().map(BatchDescriptor::retries).sum(),
            cache_hit_rate: ctx.cache.stats().hit_rate(),
            peak_memory_bytes: observed.peak_memory_bytes,
            peak_concurrency: observed.peak_concurrency,
            completion: if users_skipped == 0 {
                Completion::Complete
            } else {
                Completion::Partial
            },
            stop_reason: ctx.control.reason(),
            failed_batches,
        }
    }

    pub fn is_complete(&self) -> bool {
        self.completion == Completion::Complete
    }
}
