//! Prometheus metrics for one run
//!
//! Registered on the run's own `Registry`; nothing touches the process-wide
//! default registry.

use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};

#[derive(Clone)]
pub struct EngineMetrics {
    pub batches_dispatched: IntCounter,
    pub batches_succeeded: IntCounter,
    pub batches_failed: IntCounter,
    pub batches_retried: IntCounter,
    pub batches_cancelled: IntCounter,
    pub users_scored: IntCounter,
    pub users_failed: IntCounter,
    pub users_skipped: IntCounter,
    pub prefilter_fallbacks: IntCounter,
    pub admission_limit: IntGauge,
    pub peak_memory_bytes: IntGauge,
    pub user_latency_seconds: Histogram,
}

fn counter(name: &str, help: &str) -> prometheus::Result<IntCounter> {
    IntCounter::with_opts(Opts::new(name, help).namespace("match_engine"))
}

fn gauge(name: &str, help: &str) -> prometheus::Result<IntGauge> {
    IntGauge::with_opts(Opts::new(name, help).namespace("match_engine"))
}

impl EngineMetrics {
    pub fn register(registry: &Registry) -> prometheus::Result<Self> {
        let metrics = Self {
            batches_dispatched: counter("batches_dispatched_total", "Batch attempts dispatched")?,
            batches_succeeded: counter("batches_succeeded_total", "Batches that succeeded")?,
            batches_failed: counter("batches_failed_total", "Batches that failed permanently")?,
            batches_retried: counter("batches_retried_total", "Batch retries scheduled")?,
            batches_cancelled: counter("batches_cancelled_total", "Batches cancelled by a stop signal")?,
            users_scored: counter("users_scored_total", "Users whose results were delivered")?,
            users_failed: counter("users_failed_total", "Users that failed permanently")?,
            users_skipped: counter("users_skipped_total", "Users never processed because the run stopped")?,
            prefilter_fallbacks: counter(
                "prefilter_fallbacks_total",
                "Users served from the recency fallback",
            )?,
            admission_limit: gauge("admission_limit", "Currently allowed concurrent batches")?,
            peak_memory_bytes: gauge("peak_memory_bytes", "Peak resident memory observed")?,
            user_latency_seconds: Histogram::with_opts(
                HistogramOpts::new("user_latency_seconds", "Per-user match latency")
                    .namespace("match_engine")
                    .buckets(vec![0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.18, 0.25, 0.5, 1.0]),
            )?,
        };

        registry.register(Box::new(metrics.batches_dispatched.clone()))?;
        registry.register(Box::new(metrics.batches_succeeded.clone()))?;
        registry.register(Box::new(metrics.batches_failed.clone()))?;
        registry.register(Box::new(metrics.batches_retried.clone()))?;
        registry.register(Box::new(metrics.batches_cancelled.clone()))?;
        registry.register(Box::new(metrics.users_scored.clone()))?;
        registry.register(Box::new(metrics.users_failed.clone()))?;
        registry.register(Box::new(metrics.users_skipped.clone()))?;
        registry.register(Box::new(metrics.prefilter_fallbacks.clone()))?;
        registry.register(Box::new(metrics.admission_limit.clone()))?;
        registry.register(Box::new(metrics.peak_memory_bytes.clone()))?;
        registry.register(Box::new(metrics.user_latency_seconds.clone()))?;

        Ok(metrics)
    }
}

/// Prometheus text exposition of everything in `registry`
pub fn encode(registry: &Registry) -> String {
    let mut buffer = Vec::new();
    if TextEncoder::new()
        .encode(&registry.gather(), &mut buffer)
        .is_err()
    {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_encode() {
        let registry = Registry::new();
        let metrics = EngineMetrics::register(&registry).unwrap();
        metrics.users_scored.inc_by(3);
        metrics.user_latency_seconds.observe(0.02);

        let text = encode(&registry);
        assert!(text.contains("match_engine_users_scored_total 3"));
        assert!(text.contains("match_engine_user_latency_seconds_bucket"));
    }

    #[test]
    fn test_separate_registries_do_not_collide() {
        assert!(EngineMetrics::register(&Registry::new()).is_ok());
        assert!(EngineMetrics::register(&Registry::new()).is_ok());
    }
}
