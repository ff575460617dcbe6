mod common;

use common::*;
use match_engine::catalog::{SyntheticCatalog, SyntheticParams};
use match_engine::jobs::{run_streaming, BatchScheduler, Completion, RunSummary};
use match_engine::services::scoring::StandardPolicy;
use match_engine::RunContext;
use std::sync::Arc;
use std::time::Duration;

fn assert_close(actual: f32, expected: f32) {
    assert!(
        (actual - expected).abs() < 1e-4,
        "expected {expected}, got {actual}"
    );
}

#[tokio::test]
async fn test_small_catalog_end_to_end() {
    let ctx = context(test_config(), small_snapshot(1));
    let sink = Arc::new(CollectingSink::default());
    let scheduler = BatchScheduler::new(sink.clone());

    let summary = scheduler.run(ctx, small_users()).await;

    assert_eq!(summary.users_total, 3);
    assert_eq!(summary.users_succeeded, 3);
    assert_eq!(summary.users_failed, 0);
    assert_eq!(summary.users_skipped, 0);
    assert_eq!(summary.completion, Completion::Complete);
    assert!(summary.failed_batches.is_empty());

    let results = sink.results();
    assert_eq!(results.len(), 3);

    // Nearby, well paid, all three features, posted at as_of
    let near = &results[&1];
    assert_eq!(job_ids(near), vec![1, 2]);
    assert_close(near.matches[0].score, 1.0);
    assert_close(near.matches[1].score, 0.883_333);

    // Only jobs in location 3 are close enough for a 20 km radius
    let far = &results[&2];
    assert_eq!(job_ids(far), vec![7, 3]);
    assert_close(far.matches[0].score, 0.927_719);
    assert_close(far.matches[1].score, 0.858_333);

    // No preferences: only base and freshness separate the jobs
    let blank = &results[&3];
    assert_eq!(job_ids(blank), vec![1, 9]);
    assert_close(blank.matches[0].score, 0.7);
    assert_close(blank.matches[1].score, 0.697_153);
    assert_close(blank.matches[0].confidence, 4.4 / 6.0);

    for matches in results.values() {
        let ranks: Vec<u32> = matches.matches.iter().map(|m| m.rank).collect();
        assert_eq!(ranks, vec![1, 2]);
        assert!(!matches.fallback_used);
    }
}

#[tokio::test]
async fn test_snapshot_change_only_misses() {
    let mut config = test_config();
    config.scheduler.worker_count = 1;
    let cache = shared_cache();
    let stats = Arc::clone(cache.stats());

    let v1 = Arc::new(
        RunContext::with_cache(
            config.clone(),
            small_snapshot(1),
            cache.clone(),
            Arc::new(StandardPolicy),
        )
        .unwrap(),
    );
    let v2 = Arc::new(
        RunContext::with_cache(config, small_snapshot(2), cache, Arc::new(StandardPolicy)).unwrap(),
    );

    let first_sink = Arc::new(CollectingSink::default());
    let scheduler = BatchScheduler::new(first_sink.clone());
    assert!(scheduler.run(Arc::clone(&v1), small_users()).await.is_complete());
    let misses_v1 = stats.snapshot().misses;
    assert!(misses_v1 > 0);

    // Same worker slots, warm Tier-1: nothing from version 1 may be served
    let second = scheduler.run(Arc::clone(&v2), small_users()).await;
    assert!(second.is_complete());
    assert_eq!(stats.snapshot().misses, misses_v1 * 2);

    // Warm for version 2 now: no new misses
    let third = scheduler.run(v2, small_users()).await;
    assert!(third.is_complete());
    assert_eq!(stats.snapshot().misses, misses_v1 * 2);

    // Identical jobs under both versions, so identical rankings
    let delivered = first_sink.all();
    assert_eq!(delivered.len(), 9);
    assert_eq!(delivered[0..3], delivered[3..6]);
    assert_eq!(delivered[3..6], delivered[6..9]);
}

#[tokio::test]
async fn test_streaming_run_delivers_every_user() {
    let ctx = context(test_config(), small_snapshot(1));
    let (receiver, handle) = run_streaming(ctx, small_users());

    let mut delivered = receiver.collect().await;
    let summary = handle.await.unwrap();

    delivered.sort_by_key(|matches| matches.user_id);
    let users: Vec<u64> = delivered.iter().map(|m| m.user_id).collect();
    assert_eq!(users, vec![1, 2, 3]);
    assert_eq!(job_ids(&delivered[0]), vec![1, 2]);
    assert_eq!(summary.users_succeeded, 3);
    assert_eq!(summary.completion, Completion::Complete);
}

async fn run_synthetic(jobs: usize, users: usize, k: usize, memory_ceiling: u64) -> RunSummary {
    let catalog = SyntheticCatalog::new(SyntheticParams::new(jobs, users).seed(7));
    let snapshot = catalog.snapshot().unwrap();
    let population = catalog.users();

    let mut config = test_config();
    config.scheduler.k = k;
    config.scheduler.batch_size = 50;
    config.scheduler.worker_count = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4);
    config.scheduler.batch_timeout = Duration::from_secs(600);
    config.scheduler.memory_high_water_bytes = memory_ceiling;
    config.cache.local_capacity = jobs;

    let ctx = context(config, snapshot);
    let sink = Arc::new(CollectingSink::default());
    let summary = BatchScheduler::new(sink.clone()).run(ctx, population).await;

    assert_eq!(summary.users_total, users);
    assert_eq!(
        summary.users_succeeded + summary.users_failed + summary.users_skipped,
        users
    );
    assert_eq!(summary.completion, Completion::Complete);
    assert!(sink.duplicate_users().is_empty());
    assert_eq!(sink.deliveries(), users);
    assert!(summary.cache_hit_rate >= 0.9, "hit rate {}", summary.cache_hit_rate);

    for matches in sink.results().values() {
        assert!(!matches.matches.is_empty());
        assert!(matches.matches.len() <= k);
        for pair in matches.matches.windows(2) {
            assert!(
                pair[0].score > pair[1].score
                    || (pair[0].score == pair[1].score && pair[0].job_id < pair[1].job_id)
            );
        }
    }
    summary
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_synthetic_catalog_scaled_down() {
    let summary = run_synthetic(2_000, 200, 40, u64::MAX).await;
    assert_eq!(summary.users_succeeded, 200);
}

#[tokio::test(flavor = "multi_thread")]
#[ignore = "full-size run; takes minutes"]
async fn test_synthetic_catalog_full_size() {
    const CEILING: u64 = 4 << 30;
    let summary = run_synthetic(100_000, 10_000, 40, CEILING).await;
    assert!(summary.peak_memory_bytes < CEILING);
}
