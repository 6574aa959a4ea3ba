use crate::error::{DbError, ErrorKind};
use async_trait::async_trait;
use configuration::{DatabaseSettings, Environment};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{ConnectOptions, PgPool};
use std::fmt;
use std::str::FromStr;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};

/// Lifecycle state of the shared connection pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connect attempt or liveness probe failed.
    Failed,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Pool statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub size: u32,
    pub idle: usize,
    pub active: u32,
}

impl PoolStats {
    fn of(pool: &PgPool) -> Self {
        let size = pool.size();
        let idle = pool.num_idle();
        PoolStats {
            size,
            idle,
            active: size.saturating_sub(idle as u32),
        }
    }
}

/// Anything that can answer "is the database alive, and how fast?".
#[async_trait]
pub trait DatabaseProbe: Send + Sync {
    /// Runs a minimal round-trip query and returns its latency.
    async fn probe(&self) -> Result<Duration, DbError>;
}

struct Inner {
    state: ConnectionState,
    pool: Option<PgPool>,
    /// Bumped whenever the pool is replaced or dropped.
    generation: u64,
}

/// Owns the process-wide PostgreSQL pool and its lifecycle.
///
/// Construct one at startup, share it behind an `Arc`, call [`start`](Self::start)
/// before serving traffic and [`stop`](Self::stop) on shutdown. Callers never see
/// the pool unless the manager is `Connected`.
pub struct ConnectionManager {
    settings: DatabaseSettings,
    log_statements: bool,
    /// Serialises connect/disconnect so they never interleave.
    lifecycle: Mutex<()>,
    inner: RwLock<Inner>,
}

impl ConnectionManager {
    pub fn new(settings: DatabaseSettings, environment: Environment) -> Self {
        Self {
            settings,
            // Statement logging is only useful while developing.
            log_statements: !environment.is_production(),
            lifecycle: Mutex::new(()),
            inner: RwLock::new(Inner {
                state: ConnectionState::Disconnected,
                pool: None,
                generation: 0,
            }),
        }
    }

    pub async fn state(&self) -> ConnectionState {
        self.inner.read().await.state
    }

    /// Establishes the pool. A no-op while already connected.
    pub async fn connect(&self) -> Result<(), DbError> {
        let _guard = self.lifecycle.lock().await;

        if self.state().await == ConnectionState::Connected {
            tracing::debug!("Database already connected; connect() is a no-op.");
            return Ok(());
        }

        let mut options = PgConnectOptions::from_str(&self.settings.url)
            .map_err(|e| DbError::ConnectionConfigError(format!("invalid database URL: {}", e)))?;
        if !self.log_statements {
            options = options.disable_statement_logging();
        }

        let stale = {
            let mut inner = self.inner.write().await;
            self.transition(&mut inner, ConnectionState::Connecting);
            inner.pool.take()
        };
        if let Some(pool) = stale {
            pool.close().await;
        }

        match self.open_pool(options).await {
            Ok(pool) => {
                let stats = PoolStats::of(&pool);
                let mut inner = self.inner.write().await;
                inner.pool = Some(pool);
                inner.generation += 1;
                self.transition(&mut inner, ConnectionState::Connected);
                tracing::info!(
                    max_connections = self.settings.max_connections,
                    min_connections = self.settings.min_connections,
                    pool_size = stats.size,
                    pool_idle = stats.idle,
                    "Successfully connected to database"
                );
                Ok(())
            }
            Err(e) => {
                let mut inner = self.inner.write().await;
                self.transition(&mut inner, ConnectionState::Failed);
                tracing::error!(error = %e, "Failed to connect to database");
                Err(DbError::connection(e))
            }
        }
    }

    async fn open_pool(&self, options: PgConnectOptions) -> Result<PgPool, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(self.settings.max_connections)
            .min_connections(self.settings.min_connections)
            .acquire_timeout(self.settings.acquire_timeout())
            .idle_timeout(Some(self.settings.idle_timeout()))
            .connect_with(options)
            .await?;

        // Verify connection
        if let Err(e) = sqlx::query("SELECT 1").execute(&pool).await {
            pool.close().await;
            return Err(e);
        }
        Ok(pool)
    }

    /// Closes the pool. Safe to call when never connected, and more than once.
    pub async fn disconnect(&self) {
        let _guard = self.lifecycle.lock().await;

        let pool = {
            let mut inner = self.inner.write().await;
            self.transition(&mut inner, ConnectionState::Disconnected);
            inner.generation += 1;
            inner.pool.take()
        };

        match pool {
            Some(pool) => {
                let stats = PoolStats::of(&pool);
                pool.close().await;
                tracing::info!(
                    pool_size = stats.size,
                    pool_active = stats.active,
                    "Successfully disconnected from database"
                );
            }
            None => tracing::debug!("disconnect() called without an open pool"),
        }
    }

    /// Connects and, when configured, applies the embedded migrations.
    ///
    /// If any startup step fails the pool is released before the error is returned.
    pub async fn start(&self) -> Result<(), DbError> {
        if let Err(e) = self.connect().await {
            self.disconnect().await;
            return Err(e);
        }

        if self.settings.run_migrations {
            if let Err(e) = self.run_migrations().await {
                tracing::error!(error = %e, "Startup migrations failed; releasing the pool");
                self.disconnect().await;
                return Err(e);
            }
        }
        Ok(())
    }

    /// Shutdown counterpart of [`start`](Self::start).
    pub async fn stop(&self) {
        self.disconnect().await;
    }

    /// Applies the migrations embedded from `./migrations`.
    pub async fn run_migrations(&self) -> Result<(), DbError> {
        let pool = self.pool().await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        tracing::info!("Database migrations applied");
        Ok(())
    }

    /// A handle to the shared pool, available only while connected.
    ///
    /// A `Failed` manager gets one liveness probe first, so callers recover as
    /// soon as the store is reachable again.
    pub async fn pool(&self) -> Result<PgPool, DbError> {
        probe_if_failed(self.state().await, self).await;

        let inner = self.inner.read().await;
        match (&inner.state, &inner.pool) {
            (ConnectionState::Connected, Some(pool)) => Ok(pool.clone()),
            (state, _) => Err(DbError::NotConnected(*state)),
        }
    }

    pub async fn pool_stats(&self) -> Option<PoolStats> {
        let inner = self.inner.read().await;
        inner.pool.as_ref().map(PoolStats::of)
    }

    /// Issues `SELECT 1` and returns its latency. Never retries.
    ///
    /// A failure moves `Connected` to `Failed`; a success moves `Failed` back to
    /// `Connected`, since the pool reconnects on its own once the server is back.
    pub async fn probe(&self) -> Result<Duration, DbError> {
        let (pool, generation) = {
            let inner = self.inner.read().await;
            match (&inner.state, &inner.pool) {
                (ConnectionState::Connected | ConnectionState::Failed, Some(pool)) => {
                    (pool.clone(), inner.generation)
                }
                (state, _) => return Err(DbError::NotConnected(*state)),
            }
        };

        let timeout = self.settings.probe_timeout();
        let start = Instant::now();
        let result = tokio::time::timeout(timeout, sqlx::query("SELECT 1").execute(&pool)).await;
        let latency = start.elapsed();

        let outcome = match result {
            Ok(Ok(_)) => Ok(latency),
            Ok(Err(e)) => Err(DbError::connection(e)),
            Err(_) => Err(DbError::Connection {
                kind: ErrorKind::ConnectionTimeout,
                message: format!("liveness probe timed out after {:?}", timeout),
                source: None,
            }),
        };

        let stats = PoolStats::of(&pool);
        let mut inner = self.inner.write().await;
        self.settle_probe(&mut inner, generation, &outcome, stats);
        outcome
    }

    /// Applies a probe result, unless the pool it ran against has since been replaced.
    fn settle_probe(
        &self,
        inner: &mut Inner,
        generation: u64,
        outcome: &Result<Duration, DbError>,
        stats: PoolStats,
    ) {
        if inner.generation != generation {
            tracing::debug!("Discarding probe result for a replaced pool");
            return;
        }
        match (outcome, inner.state) {
            (Ok(_), ConnectionState::Failed) => {
                self.transition(inner, ConnectionState::Connected);
            }
            (Err(e), ConnectionState::Connected) => {
                tracing::error!(
                    error = %e,
                    pool_size = stats.size,
                    pool_idle = stats.idle,
                    pool_active = stats.active,
                    "Database health check failed"
                );
                self.transition(inner, ConnectionState::Failed);
            }
            _ => {}
        }
    }

    fn transition(&self, inner: &mut Inner, to: ConnectionState) {
        let from = inner.state;
        if from != to {
            tracing::info!(from = %from, to = %to, "Database connection state changed");
            inner.state = to;
        }
    }
}

#[async_trait]
impl DatabaseProbe for ConnectionManager {
    async fn probe(&self) -> Result<Duration, DbError> {
        ConnectionManager::probe(self).await
    }
}

/// Gives a `Failed` store one probe; `true` when it answered.
async fn probe_if_failed<P>(state: ConnectionState, probe: &P) -> bool
where
    P: DatabaseProbe + ?Sized,
{
    state == ConnectionState::Failed && probe.probe().await.is_ok()
}
