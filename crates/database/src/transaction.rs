//! Transaction helper utilities.
//!
//! [`run_in_transaction`] owns the begin/commit/rollback policy: bounded wait for
//! the transaction to start, bounded time for the unit of work, a fixed isolation
//! level, and rollback on every failure path before the call returns. It never
//! retries; wrap it in [`execute_with_retry`](crate::retry::execute_with_retry)
//! at the call site for that.

use crate::connection::ConnectionManager;
use crate::error::DbError;
use async_trait::async_trait;
use configuration::TransactionSettings;
use core_types::IsolationLevel;
use futures::future::BoxFuture;
use sqlx::{PgPool, Postgres, Transaction};
use std::time::Duration;
use tokio::time::Instant;

/// Bounds for a single unit of work. Never shared between callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransactionEnvelope {
    /// Max time to wait for the transaction to start.
    pub max_wait: Duration,
    /// Max time for the unit of work once started.
    pub timeout: Duration,
    pub isolation_level: IsolationLevel,
}

impl Default for TransactionEnvelope {
    fn default() -> Self {
        Self {
            max_wait: Duration::from_millis(5_000),
            timeout: Duration::from_millis(10_000),
            isolation_level: IsolationLevel::ReadCommitted,
        }
    }
}

impl TransactionEnvelope {
    pub fn from_settings(settings: &TransactionSettings) -> Self {
        Self {
            max_wait: settings.max_wait(),
            timeout: settings.timeout(),
            isolation_level: settings.isolation_level,
        }
    }
}

/// A store that can open, commit and roll back transactions.
#[async_trait]
pub trait TransactionBackend: Send + Sync {
    /// The transactional handle lent to the unit of work.
    type Tx: Send;

    async fn begin(&self, isolation_level: IsolationLevel) -> Result<Self::Tx, DbError>;
    async fn commit(&self, tx: Self::Tx) -> Result<(), DbError>;
    async fn rollback(&self, tx: Self::Tx) -> Result<(), DbError>;
}

/// Runs `work` atomically under `envelope`.
///
/// - not started within `max_wait`: [`DbError::TransactionStartTimeout`], nothing left open;
/// - `work` fails: rolled back, the original error is returned unmodified;
/// - `work` plus commit exceed `timeout`: rolled back, then [`DbError::TransactionTimeout`];
/// - otherwise committed and `work`'s value returned.
///
/// The handle is only lent to `work` for the duration of the call. If this
/// future is dropped mid-flight the handle is dropped with it, which for
/// PostgreSQL rolls the transaction back when the connection returns to the pool.
pub async fn run_in_transaction<B, T, F>(
    backend: &B,
    envelope: TransactionEnvelope,
    work: F,
) -> Result<T, DbError>
where
    B: TransactionBackend + ?Sized,
    F: for<'t> FnOnce(&'t mut B::Tx) -> BoxFuture<'t, Result<T, DbError>>,
{
    let isolation = envelope.isolation_level;

    let mut tx = match tokio::time::timeout(envelope.max_wait, backend.begin(isolation)).await {
        Ok(Ok(tx)) => tx,
        Ok(Err(e)) => {
            tracing::error!(error = %e, %isolation, "Transaction failed to start");
            return Err(e);
        }
        Err(_) => {
            tracing::error!(
                max_wait_ms = envelope.max_wait.as_millis() as u64,
                %isolation,
                "Transaction failed to start within max wait"
            );
            return Err(DbError::TransactionStartTimeout(envelope.max_wait));
        }
    };

    let started = Instant::now();
    let outcome = tokio::time::timeout(envelope.timeout, work(&mut tx)).await;

    match outcome {
        Ok(Ok(value)) => {
            // The commit shares the work's deadline. A zero remainder still
            // lets an immediately-ready commit through.
            let remaining = envelope.timeout.saturating_sub(started.elapsed());
            match tokio::time::timeout(remaining, backend.commit(tx)).await {
                Ok(Ok(())) => {
                    tracing::debug!(elapsed_ms = started.elapsed().as_millis() as u64, "Transaction committed");
                    Ok(value)
                }
                Ok(Err(e)) => {
                    tracing::error!(error = %e, %isolation, "Transaction failed to commit");
                    Err(e)
                }
                Err(_) => {
                    // Dropping the in-flight commit discards the handle; the
                    // server rolls back whatever it had not yet committed.
                    tracing::error!(
                        timeout_ms = envelope.timeout.as_millis() as u64,
                        %isolation,
                        "Transaction commit did not finish within the timeout"
                    );
                    Err(DbError::TransactionTimeout(envelope.timeout))
                }
            }
        }
        Ok(Err(e)) => {
            rollback(backend, tx).await;
            tracing::error!(
                error = %e,
                %isolation,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "Transaction failed"
            );
            Err(e)
        }
        Err(_) => {
            rollback(backend, tx).await;
            tracing::error!(
                timeout_ms = envelope.timeout.as_millis() as u64,
                %isolation,
                "Transaction timed out and was rolled back"
            );
            Err(DbError::TransactionTimeout(envelope.timeout))
        }
    }
}

/// Rolls back, logging rather than returning a rollback failure so the caller
/// sees the error that caused it.
async fn rollback<B>(backend: &B, tx: B::Tx)
where
    B: TransactionBackend + ?Sized,
{
    if let Err(e) = backend.rollback(tx).await {
        tracing::warn!(error = %e, "Rollback failed");
    }
}

/// The PostgreSQL transaction backend.
#[derive(Debug, Clone)]
pub struct PgBackend {
    pool: PgPool,
}

impl PgBackend {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Borrows the manager's pool; fails unless the manager is connected.
    pub async fn from_manager(manager: &ConnectionManager) -> Result<Self, DbError> {
        Ok(Self::new(manager.pool().await?))
    }
}

#[async_trait]
impl TransactionBackend for PgBackend {
    type Tx = Transaction<'static, Postgres>;

    async fn begin(&self, isolation_level: IsolationLevel) -> Result<Self::Tx, DbError> {
        let mut tx = self.pool.begin().await?;
        // Must be the first statement of the transaction.
        let statement = format!("SET TRANSACTION ISOLATION LEVEL {}", isolation_level.to_sql());
        sqlx::query(&statement).execute(&mut *tx).await?;
        Ok(tx)
    }

    async fn commit(&self, tx: Self::Tx) -> Result<(), DbError> {
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, tx: Self::Tx) -> Result<(), DbError> {
        tx.rollback().await?;
        Ok(())
    }
}
