//! Memory-driven admission control
//!
//! AIMD on the number of concurrently running batches: start at one, add one
//! per healthy observation up to the worker count, halve whenever resident
//! memory is above the high-water mark. The limit never drops below one, so a
//! run under pressure slows down but always progresses.

use std::sync::Arc;
use tracing::{debug, warn};

/// Source of the process's current memory usage
pub trait MemoryProbe: Send + Sync {
    /// Resident bytes, or `None` when the platform cannot report it
    fn resident_bytes(&self) -> Option<u64>;
}

/// Resident set size from the Prometheus process collector
pub struct ProcessMemoryProbe {
    #[cfg(target_os = "linux")]
    collector: prometheus::process_collector::ProcessCollector,
}

impl ProcessMemoryProbe {
    pub fn new() -> Self {
        Self {
            #[cfg(target_os = "linux")]
            collector: prometheus::process_collector::ProcessCollector::for_self(),
        }
    }
}

impl Default for ProcessMemoryProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryProbe for ProcessMemoryProbe {
    #[cfg(target_os = "linux")]
    fn resident_bytes(&self) -> Option<u64> {
        use prometheus::core::Collector;

        self.collector
            .collect()
            .iter()
            .find(|family| family.get_name() == "process_resident_memory_bytes")
            .and_then(|family| family.get_metric().first())
            .map(|metric| metric.get_gauge().get_value() as u64)
    }

    #[cfg(not(target_os = "linux"))]
    fn resident_bytes(&self) -> Option<u64> {
        None
    }
}

pub struct AdmissionController {
    probe: Arc<dyn MemoryProbe>,
    high_water_bytes: u64,
    max_concurrency: usize,
    limit: usize,
    peak_bytes: u64,
}

impl AdmissionController {
    pub fn new(probe: Arc<dyn MemoryProbe>, high_water_bytes: u64, max_concurrency: usize) -> Self {
        Self {
            probe,
            high_water_bytes,
            max_concurrency: max_concurrency.max(1),
            limit: 1,
            peak_bytes: 0,
        }
    }

    /// Sample memory and return the concurrency allowed for the next dispatch
    pub fn observe(&mut self) -> usize {
        let Some(resident) = self.probe.resident_bytes() else {
            self.limit = (self.limit + 1).min(self.max_concurrency);
            return self.limit;
        };
        self.peak_bytes = self.peak_bytes.max(resident);

        if resident > self.high_water_bytes {
            let reduced = (self.limit / 2).max(1);
            if reduced < self.limit {
                warn!(
                    resident_bytes = resident,
                    high_water_bytes = self.high_water_bytes,
                    from = self.limit,
                    to = reduced,
                    "Memory above high-water mark, throttling dispatch"
                );
            }
            self.limit = reduced;
        } else if self.limit < self.max_concurrency {
            self.limit += 1;
            debug!(limit = self.limit, resident_bytes = resident, "Admission limit raised");
        }
        self.limit
    }

    /// Record resident memory without touching the limit; used while
    /// batches are in flight
    pub fn sample(&mut self) -> Option<u64> {
        let resident = self.probe.resident_bytes()?;
        self.peak_bytes = self.peak_bytes.max(resident);
        Some(resident)
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn peak_bytes(&self) -> u64 {
        self.peak_bytes
    }
}
