//! Batch scheduler / worker pool
//!
//! Users are split into fixed-size batches. Each dispatched batch runs as one
//! task on a worker slot (which owns a Tier-1 cache) until it succeeds, fails
//! permanently or is cancelled. Results are delivered to the sink per user as
//! soon as the batch's compute phase ends.

use super::admission::{AdmissionController, MemoryProbe, ProcessMemoryProbe};
use super::batch::{partition, BatchDescriptor, BatchStatus};
use super::control::StopReason;
use super::retry::RetryPolicy;
use super::sink::{ChannelSink, ResultReceiver, ResultSink, SinkError};
use super::summary::{RunObservations, RunSummary};
use crate::context::RunContext;
use crate::error::{EngineError, Result};
use crate::models::User;
use crate::services::cache::JobDerived;
use crate::services::MatchOutcome;
use futures::FutureExt;
use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tiered_cache::LocalTier;
use tokio::sync::Mutex;
use tokio::task::{JoinError, JoinHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// One unit of pool concurrency; its Tier-1 cache moves with it
pub struct WorkerSlot {
    pub id: usize,
    local: LocalTier<JobDerived>,
}

impl WorkerSlot {
    pub fn new(id: usize, local: LocalTier<JobDerived>) -> Self {
        Self { id, local }
    }

    pub fn cached_entries(&self) -> usize {
        self.local.len()
    }
}

enum AttemptOutcome {
    Completed,
    /// Stopped at a user boundary
    Interrupted,
    Failed(EngineError),
}

type Computed = Vec<(usize, Result<MatchOutcome>)>;

/// How often resident memory is sampled while the loop waits on batches
const MEMORY_SAMPLE_INTERVAL: Duration = Duration::from_millis(20);

pub struct BatchScheduler {
    sink: Arc<dyn ResultSink>,
    probe: Arc<dyn MemoryProbe>,
    /// Kept between runs so Tier-1 caches can be reused
    slots: Mutex<Vec<WorkerSlot>>,
}

impl BatchScheduler {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self {
            sink,
            probe: Arc::new(ProcessMemoryProbe::new()),
            slots: Mutex::new(Vec::new()),
        }
    }

    /// Scheduler delivering into a bounded channel of `capacity` results
    pub fn streaming(capacity: usize) -> (Self, ResultReceiver) {
        let (sink, receiver) = ChannelSink::new(capacity);
        (Self::new(Arc::new(sink)), receiver)
    }

    pub fn with_memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Run every user through the pipeline. Never fails: per-batch problems
    /// end up in the summary.
    pub async fn run(&self, ctx: Arc<RunContext>, users: Vec<User>) -> RunSummary {
        let started = Instant::now();
        let config = &ctx.config.scheduler;
        let users_total = users.len();
        let users: Arc<[User]> = users.into();
        let mut pending: VecDeque<BatchDescriptor> =
            partition(users_total, config.batch_size).into();
        let batches_total = pending.len();

        info!(
            run_id = %ctx.run_id,
            snapshot_version = ctx.catalog.version(),
            users = users_total,
            batches = batches_total,
            worker_count = config.worker_count,
            batch_size = config.batch_size,
            k = config.k,
            "Run started"
        );

        let deadline_timer = config.run_deadline.map(|d| ctx.control.arm_deadline(d));
        let mut slots = self.take_slots(&ctx).await;
        let mut admission = AdmissionController::new(
            Arc::clone(&self.probe),
            config.memory_high_water_bytes,
            config.worker_count,
        );
        let policy = RetryPolicy::from_config(config);
        let mut in_flight: JoinSet<(BatchDescriptor, WorkerSlot)> = JoinSet::new();
        let mut finished: Vec<BatchDescriptor> = Vec::with_capacity(batches_total);
        let mut peak_concurrency = 0;
        let mut sampler = tokio::time::interval(MEMORY_SAMPLE_INTERVAL);
        sampler.set_missed_tick_behavior(MissedTickBehavior::Skip);

        while !pending.is_empty() {
            if ctx.control.is_stopped() {
                break;
            }

            let limit = admission.observe();
            ctx.metrics.admission_limit.set(limit as i64);
            if in_flight.len() >= limit || slots.is_empty() {
                tokio::select! {
                    Some(joined) = in_flight.join_next() => {
                        collect_finished(&ctx, joined, &mut finished, &mut slots);
                    }
                    _ = ctx.control.stopped() => {}
                    _ = sampler.tick() => {
                        admission.sample();
                    }
                }
                continue;
            }

            let Some(slot) = slots.pop() else {
                continue;
            };
            let Some(batch) = pending.pop_front() else {
                slots.push(slot);
                break;
            };
            in_flight.spawn(execute(
                Arc::clone(&ctx),
                Arc::clone(&self.sink),
                Arc::clone(&users),
                policy.clone(),
                batch,
                slot,
            ));
            peak_concurrency = peak_concurrency.max(in_flight.len());
        }

        while !in_flight.is_empty() {
            tokio::select! {
                Some(joined) = in_flight.join_next() => {
                    collect_finished(&ctx, joined, &mut finished, &mut slots);
                }
                _ = sampler.tick() => {
                    admission.sample();
                }
            }
        }

        // Never dispatched: the run stopped first
        for mut batch in pending {
            cancel(&ctx, &mut batch);
            finished.push(batch);
        }

        if let Some(timer) = deadline_timer {
            timer.abort();
        }
        if let Err(e) = self.sink.flush().await {
            warn!(run_id = %ctx.run_id, error = %e, "Result sink flush failed");
        }

        admission.sample();
        ctx.metrics
            .peak_memory_bytes
            .set(admission.peak_bytes().min(i64::MAX as u64) as i64);
        *self.slots.lock().await = slots;

        finished.sort_by_key(|batch| batch.id);
        let summary = RunSummary::from_batches(
            &ctx,
            users_total,
            &finished,
            RunObservations {
                elapsed: started.elapsed(),
                peak_memory_bytes: admission.peak_bytes(),
                peak_concurrency,
            },
        );

        info!(
            run_id = %summary.run_id,
            duration_ms = summary.duration_ms,
            users_succeeded = summary.users_succeeded,
            users_failed = summary.users_failed,
            users_skipped = summary.users_skipped,
            batches_failed = summary.batches_failed,
            retries = summary.retries,
            cache_hit_rate = summary.cache_hit_rate,
            completion = ?summary.completion,
            "Run finished"
        );
        summary
    }

    /// Reuse slots from a previous run, dropping Tier-1 entries of other
    /// snapshots, and top up to `worker_count`
    async fn take_slots(&self, ctx: &RunContext) -> Vec<WorkerSlot> {
        let worker_count = ctx.config.scheduler.worker_count;
        let mut slots = std::mem::take(&mut *self.slots.lock().await);
        slots.truncate(worker_count);

        for slot in &mut slots {
            let evicted = slot.local.evict_except(ctx.cache.namespace());
            if evicted > 0 {
                debug!(worker = slot.id, evicted, "Evicted stale Tier-1 entries");
            }
        }
        for id in slots.len()..worker_count {
            slots.push(WorkerSlot::new(id, ctx.cache.new_local_tier()));
        }
        slots
    }
}

/// Spawn-and-run convenience: results arrive on the receiver while the run
/// progresses; the handle resolves to the summary
pub fn run_streaming(
    ctx: Arc<RunContext>,
    users: Vec<User>,
) -> (ResultReceiver, JoinHandle<RunSummary>) {
    let (scheduler, receiver) = BatchScheduler::streaming(ctx.config.scheduler.result_channel_capacity);
    let handle = tokio::spawn(async move { scheduler.run(ctx, users).await });
    (receiver, handle)
}

fn collect_finished(
    ctx: &RunContext,
    joined: std::result::Result<(BatchDescriptor, WorkerSlot), JoinError>,
    finished: &mut Vec<BatchDescriptor>,
    slots: &mut Vec<WorkerSlot>,
) {
    match joined {
        Ok((batch, slot)) => {
            finished.push(batch);
            slots.push(slot);
        }
        Err(e) => {
            // Its users show up as skipped in the summary
            error!(run_id = %ctx.run_id, error = %e, "Batch task aborted");
            let id = slots.iter().map(|s| s.id + 1).max().unwrap_or(0);
            slots.push(WorkerSlot::new(id, ctx.cache.new_local_tier()));
        }
    }
}

/// Runs one batch to a terminal state; a panic fails the batch permanently.
/// The descriptor lives outside the unwind boundary so users delivered by an
/// earlier attempt stay delivered.
async fn execute(
    ctx: Arc<RunContext>,
    sink: Arc<dyn ResultSink>,
    users: Arc<[User]>,
    policy: RetryPolicy,
    mut batch: BatchDescriptor,
    mut slot: WorkerSlot,
) -> (BatchDescriptor, WorkerSlot) {
    let work = run_batch(Arc::clone(&ctx), sink, users, policy, &mut batch, &mut slot);
    if AssertUnwindSafe(work).catch_unwind().await.is_ok() {
        return (batch, slot);
    }

    error!(
        batch_id = batch.id,
        worker = slot.id,
        attempt = batch.attempts(),
        "Worker panicked"
    );
    let failed = batch.pending_users().len();
    batch.fail_permanently(EngineError::WorkerPanicked { batch_id: batch.id });
    ctx.metrics.batches_failed.inc();
    ctx.metrics.users_failed.inc_by(failed as u64);
    // The Tier-1 cache may be mid-update
    let fresh = WorkerSlot::new(slot.id, ctx.cache.new_local_tier());
    (batch, fresh)
}

async fn run_batch(
    ctx: Arc<RunContext>,
    sink: Arc<dyn ResultSink>,
    users: Arc<[User]>,
    policy: RetryPolicy,
    batch: &mut BatchDescriptor,
    slot: &mut WorkerSlot,
) {
    let timeout = ctx.config.scheduler.batch_timeout;

    loop {
        if ctx.control.is_stopped() {
            cancel(&ctx, batch);
            break;
        }

        batch.start_attempt();
        let attempt_no = batch.attempts();
        ctx.metrics.batches_dispatched.inc();
        info!(
            batch_id = batch.id,
            attempt = attempt_no,
            worker = slot.id,
            users = batch.pending_users().len(),
            "Batch dispatched"
        );

        let attempt_started = Instant::now();
        match attempt(&ctx, sink.as_ref(), &users, batch, slot, timeout).await {
            AttemptOutcome::Completed => {
                batch.advance(BatchStatus::Succeeded);
                ctx.metrics.batches_succeeded.inc();
                info!(
                    batch_id = batch.id,
                    attempt = attempt_no,
                    elapsed_ms = attempt_started.elapsed().as_millis() as u64,
                    "Batch succeeded"
                );
                break;
            }
            AttemptOutcome::Interrupted => {
                cancel(&ctx, batch);
                break;
            }
            AttemptOutcome::Failed(error) => {
                warn!(
                    batch_id = batch.id,
                    attempt = attempt_no,
                    error = %error,
                    "Batch attempt failed"
                );
                let retry = error.is_retryable() && policy.should_retry(attempt_no);
                batch.fail(error.clone());

                if !retry {
                    let failed = batch.pending_users().len();
                    batch.fail_permanently(error);
                    ctx.metrics.batches_failed.inc();
                    ctx.metrics.users_failed.inc_by(failed as u64);
                    error!(
                        batch_id = batch.id,
                        attempts = attempt_no,
                        users_failed = failed,
                        "Batch failed permanently"
                    );
                    break;
                }

                batch.advance(BatchStatus::Retrying);
                ctx.metrics.batches_retried.inc();
                let delay = policy.backoff(attempt_no);
                info!(
                    batch_id = batch.id,
                    attempt = attempt_no,
                    delay_ms = delay.as_millis() as u64,
                    "Batch retry scheduled"
                );

                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = ctx.control.stopped() => {
                        cancel(&ctx, batch);
                        break;
                    }
                }
            }
        }
    }
}

/// Compute under the batch timeout, then deliver outside it. A user is marked
/// done only once the sink accepted or rejected its result.
async fn attempt(
    ctx: &RunContext,
    sink: &dyn ResultSink,
    users: &[User],
    batch: &mut BatchDescriptor,
    slot: &mut WorkerSlot,
    timeout: Duration,
) -> AttemptOutcome {
    let pending = batch.pending_users();
    let computed = tokio::time::timeout(timeout, compute(ctx, users, &pending, &mut slot.local)).await;
    let Ok((results, interrupted)) = computed else {
        return AttemptOutcome::Failed(EngineError::BatchTimeout {
            batch_id: batch.id,
            timeout,
        });
    };

    for (idx, result) in results {
        let user_id = users[idx].id;
        match result {
            Ok(outcome) => {
                let fallback_used = outcome.matches.fallback_used;
                match sink.deliver(outcome.matches).await {
                    Ok(()) => {
                        batch.mark_delivered(idx);
                        ctx.metrics.users_scored.inc();
                        if fallback_used {
                            ctx.metrics.prefilter_fallbacks.inc();
                        }
                    }
                    Err(SinkError::Rejected(reason)) => {
                        warn!(batch_id = batch.id, user_id, reason = %reason, "Result rejected by sink");
                        batch.mark_user_failed(idx);
                        ctx.metrics.users_failed.inc();
                    }
                    Err(SinkError::Unavailable(reason)) => {
                        return AttemptOutcome::Failed(EngineError::Sink(reason));
                    }
                }
            }
            Err(e) => {
                warn!(batch_id = batch.id, user_id, error = %e, "User failed");
                batch.mark_user_failed(idx);
                ctx.metrics.users_failed.inc();
            }
        }
    }

    if interrupted {
        AttemptOutcome::Interrupted
    } else {
        AttemptOutcome::Completed
    }
}

async fn compute(
    ctx: &RunContext,
    users: &[User],
    pending: &[usize],
    local: &mut LocalTier<JobDerived>,
) -> (Computed, bool) {
    let mut results = Vec::with_capacity(pending.len());
    for &idx in pending {
        if ctx.control.is_stopped() {
            return (results, true);
        }
        let started = Instant::now();
        let result = ctx
            .matcher
            .match_user(&users[idx], &ctx.catalog, &ctx.cache, local)
            .await;
        ctx.metrics
            .user_latency_seconds
            .observe(started.elapsed().as_secs_f64());
        results.push((idx, result));
        tokio::task::yield_now().await;
    }
    (results, false)
}

fn cancel(ctx: &RunContext, batch: &mut BatchDescriptor) {
    let reason = ctx.control.reason().unwrap_or(StopReason::Cancelled);
    if batch.cancel(reason.error()) {
        let skipped = batch.pending_users().len();
        ctx.metrics.batches_cancelled.inc();
        ctx.metrics.users_skipped.inc_by(skipped as u64);
        info!(
            batch_id = batch.id,
            users_skipped = skipped,
            reason = ?reason,
            "Batch cancelled"
        );
    }
}
