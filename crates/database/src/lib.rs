//! # Plantwatch Database Crate
//!
//! The resilient data-access layer between the REST API and PostgreSQL.
//!
//! ## Architectural Principles
//!
//! - **Explicit Lifecycle:** `ConnectionManager` is constructed once, started by
//!   `main` and stopped on shutdown. The pool is never reachable except through it.
//! - **Classified Failures:** every `DbError` carries an `ErrorKind`. Retry
//!   decisions are made on that tag alone, never on driver message text.
//! - **Composable Policies:** `execute_with_retry` and `run_in_transaction` are
//!   independent; callers stack retry on top of a transaction when they need both.
//!
//! ## Public API
//!
//! - `ConnectionManager`: connect/disconnect/probe plus the `start`/`stop` lifecycle.
//! - `execute_with_retry`, `RetryPolicy`: classification-driven exponential backoff.
//! - `run_in_transaction`, `TransactionEnvelope`: bounded, isolated units of work.
//! - `PlantRepository`: the plant and soil-data queries built on the above.
//! - `seed`: sample plants for development databases.
//! - `DbError`, `ErrorKind`: the error taxonomy of this crate.

// Declare the modules that constitute this crate.
pub mod connection;
pub mod error;
pub mod repository;
pub mod retry;
pub mod seed;
pub mod transaction;

// Re-export the key components to create a clean, public-facing API.
pub use connection::{ConnectionManager, ConnectionState, DatabaseProbe, PoolStats};
pub use error::{DbError, ErrorKind, Retryability, classify_sqlstate, classify_sqlx};
pub use repository::{MAX_PAGE_SIZE, PlantRepository, normalize_page};
pub use retry::{RetryPolicy, execute_with_retry, execute_with_retry_until};
pub use seed::{SeedOptions, SeedSummary, seed};
pub use transaction::{PgBackend, TransactionBackend, TransactionEnvelope, run_in_transaction};
