//! Batch descriptors and their state machine
//!
//! pending → running → succeeded | failed
//! failed → retrying → running (attempts remaining)
//! pending | running | retrying → cancelled (stop signal)

use crate::error::EngineError;
use serde::Serialize;
use std::fmt;
use std::ops::Range;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Retrying,
    Cancelled,
}

impl BatchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Pending => "pending",
            BatchStatus::Running => "running",
            BatchStatus::Succeeded => "succeeded",
            BatchStatus::Failed => "failed",
            BatchStatus::Retrying => "retrying",
            BatchStatus::Cancelled => "cancelled",
        }
    }

    pub fn can_transition_to(self, next: BatchStatus) -> bool {
        use BatchStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Succeeded)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Failed, Retrying)
                | (Retrying, Running)
                | (Retrying, Cancelled)
        )
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where one user of a batch stands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserState {
    Pending,
    Delivered,
    Failed,
}

#[derive(Debug, Clone)]
pub struct BatchDescriptor {
    pub id: usize,
    /// Indexes into the run's user list
    pub users: Range<usize>,
    status: BatchStatus,
    attempts: u32,
    last_error: Option<EngineError>,
    user_states: Vec<UserState>,
}

impl BatchDescriptor {
    pub fn new(id: usize, users: Range<usize>) -> Self {
        Self {
            id,
            user_states: vec![UserState::Pending; users.len()],
            users,
            status: BatchStatus::Pending,
            attempts: 0,
            last_error: None,
        }
    }

    pub fn status(&self) -> BatchStatus {
        self.status
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn last_error(&self) -> Option<&EngineError> {
        self.last_error.as_ref()
    }

    /// Apply a transition; an invalid one is logged and ignored
    pub fn advance(&mut self, next: BatchStatus) -> bool {
        if !self.status.can_transition_to(next) {
            warn!(
                batch_id = self.id,
                from = %self.status,
                to = %next,
                "Invalid batch transition ignored"
            );
            return false;
        }
        self.status = next;
        true
    }

    pub fn start_attempt(&mut self) -> bool {
        let started = self.advance(BatchStatus::Running);
        if started {
            self.attempts += 1;
        }
        started
    }

    pub fn fail(&mut self, error: EngineError) {
        if self.advance(BatchStatus::Failed) {
            self.last_error = Some(error);
        }
    }

    /// Retries exhausted: every user still pending counts as failed
    pub fn fail_permanently(&mut self, error: EngineError) {
        if self.status == BatchStatus::Running {
            self.advance(BatchStatus::Failed);
        }
        self.status = BatchStatus::Failed;
        for state in &mut self.user_states {
            if *state == UserState::Pending {
                *state = UserState::Failed;
            }
        }
        self.last_error = Some(EngineError::BatchFailurePermanent {
            batch_id: self.id,
            attempts: self.attempts,
            last_error: error.to_string(),
        });
    }

    /// Stop the batch; `reason` becomes its last error
    pub fn cancel(&mut self, reason: EngineError) -> bool {
        let cancelled = self.advance(BatchStatus::Cancelled);
        if cancelled {
            self.last_error = Some(reason);
        }
        cancelled
    }

    /// Users not yet delivered or failed, as indexes into the run's user list
    pub fn pending_users(&self) -> Vec<usize> {
        self.users
            .clone()
            .zip(&self.user_states)
            .filter(|(_, state)| **state == UserState::Pending)
            .map(|(idx, _)| idx)
            .collect()
    }

    pub fn mark_delivered(&mut self, user_idx: usize) {
        self.set_user_state(user_idx, UserState::Delivered);
    }

    pub fn mark_user_failed(&mut self, user_idx: usize) {
        self.set_user_state(user_idx, UserState::Failed);
    }

    fn set_user_state(&mut self, user_idx: usize, state: UserState) {
        if let Some(slot) = user_idx
            .checked_sub(self.users.start)
            .and_then(|offset| self.user_states.get_mut(offset))
        {
            *slot = state;
        }
    }

    pub fn count(&self, state: UserState) -> usize {
        self.user_states.iter().filter(|s| **s == state).count()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

/// Split `total` users into consecutive batches of at most `batch_size`
pub fn partition(total: usize, batch_size: usize) -> Vec<BatchDescriptor> {
    let batch_size = batch_size.max(1);
    (0..total)
        .step_by(batch_size)
        .enumerate()
        .map(|(id, start)| BatchDescriptor::new(id, start..(start + batch_size).min(total)))
        .collect()
}
