//! Batch execution
//!
//! - [`BatchScheduler`]: partitions users, runs batches on a bounded pool,
//!   retries, enforces the deadline and memory budget
//! - [`ResultSink`]: where per-user results go
//! - [`RunSummary`]: the one report every run produces

pub mod admission;
pub mod batch;
pub mod control;
pub mod retry;
pub mod scheduler;
pub mod sink;
pub mod summary;

pub use admission::{AdmissionController, MemoryProbe, ProcessMemoryProbe};
pub use batch::{partition, BatchDescriptor, BatchStatus, UserState};
pub use control::{RunControl, StopReason};
pub use retry::RetryPolicy;
pub use scheduler::{run_streaming, BatchScheduler, WorkerSlot};
pub use sink::{ChannelSink, JsonLinesSink, ResultReceiver, ResultSink, SinkError};
pub use summary::{Completion, FailedBatch, RunObservations, RunSummary};
