//! # Plantwatch Health Crate
//!
//! Combines database liveness and process memory pressure into one verdict.
//!
//! `HealthAggregator::check_health` never fails: a probe error is reported as a
//! disconnected database, an unreadable memory source as zero usage.

pub mod aggregator;
pub mod memory;
pub mod snapshot;

pub use aggregator::{HealthAggregator, MEMORY_PRESSURE_THRESHOLD};
pub use memory::{MemorySource, MemoryUsage, ProcMemorySource};
pub use snapshot::{DatabaseHealth, DatabaseStatus, HealthSnapshot, HealthStatus, MemoryHealth};
