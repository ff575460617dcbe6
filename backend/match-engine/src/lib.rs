//! Batch matching engine
//!
//! Ranks, for every user of a population, the best K jobs of an immutable
//! catalog snapshot:
//!
//! scheduler → worker → pre-filter → scorer (with cache) → top-K → sink

pub mod catalog;
pub mod config;
pub mod context;
pub mod error;
pub mod jobs;
pub mod metrics;
pub mod models;
pub mod services;
pub mod utils;

pub use catalog::{CatalogProvider, CatalogSnapshot, LocationTable};
pub use config::EngineConfig;
pub use context::RunContext;
pub use error::{EngineError, ErrorKind, Result};
pub use jobs::{run_streaming, BatchScheduler, RunSummary};
pub use models::{Job, ScoredJob, User, UserMatches};
