//! Connection pool for replay runs.
//!
//! Wraps a lazily-connecting sqlx Postgres pool. The pool parameters are
//! fixed when the pool is opened; callers that find every physical
//! connection busy wait inside the pool for one to be released.

use std::time::Duration;

use sqlx::Executor;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

use crate::config::ConnectionSettings;
use crate::engine::StatementTarget;
use crate::error::{ReplayError, ReplayResult};

pub const DEFAULT_MAX_OPEN_CONNECTIONS: u32 = 70;
pub const DEFAULT_MAX_IDLE_CONNECTIONS: u32 = 8;
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_IDLE_TIME: Duration = Duration::from_secs(15);
/// Units queue behind busy connections for as long as it takes.
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(365 * 24 * 60 * 60);
pub const DEFAULT_PING_TIMEOUT: Duration = Duration::from_secs(10);
const MAX_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Pool sizing and recycling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    /// Hard cap on physical connections.
    pub max_open_connections: u32,
    /// Cap on connections kept idle between queries.
    pub max_idle_connections: u32,
    /// Connections older than this are closed once released.
    pub max_lifetime: Duration,
    /// Idle connections older than this are reaped.
    pub max_idle_time: Duration,
    /// How long a unit may wait in the pool queue for a connection.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_open_connections: DEFAULT_MAX_OPEN_CONNECTIONS,
            max_idle_connections: DEFAULT_MAX_IDLE_CONNECTIONS,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            max_idle_time: DEFAULT_MAX_IDLE_TIME,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

impl PoolConfig {
    /// Reject a zero open cap, an idle cap above the open cap, or an
    /// acquire timeout outside `1s..=10 years`.
    pub fn validate(&self) -> ReplayResult<()> {
        if self.max_open_connections == 0 {
            return Err(ReplayError::config(
                "max_open_connections must be at least 1",
            ));
        }
        if self.max_idle_connections > self.max_open_connections {
            return Err(ReplayError::config(format!(
                "max_idle_connections ({}) exceeds max_open_connections ({})",
                self.max_idle_connections, self.max_open_connections
            )));
        }
        if self.acquire_timeout < Duration::from_secs(1) || self.acquire_timeout > MAX_ACQUIRE_TIMEOUT {
            return Err(ReplayError::config(format!(
                "acquire timeout of {}s is out of range",
                self.acquire_timeout.as_secs()
            )));
        }
        Ok(())
    }

    /// Translate into sqlx pool options.
    ///
    /// sqlx has no separate idle cap: surplus idle connections are
    /// reclaimed by `idle_timeout`.
    pub fn pool_options(&self) -> PgPoolOptions {
        PgPoolOptions::new()
            .max_connections(self.max_open_connections)
            .min_connections(0)
            .max_lifetime(self.max_lifetime)
            .idle_timeout(self.max_idle_time)
            .acquire_timeout(self.acquire_timeout)
    }
}

/// Build Postgres connect options from resolved settings.
pub fn connect_options(settings: &ConnectionSettings) -> ReplayResult<PgConnectOptions> {
    let ssl_mode: PgSslMode = settings.sslmode.parse().map_err(|_| {
        ReplayError::config(format!(
            "Invalid sslmode '{}'. Expected: disable, allow, prefer, require, verify-ca or verify-full",
            settings.sslmode
        ))
    })?;

    Ok(PgConnectOptions::new()
        .host(&settings.host)
        .port(settings.port)
        .username(&settings.user)
        .password(&settings.password)
        .database(&settings.dbname)
        .ssl_mode(ssl_mode))
}

/// A shared, pooled handle to the target database.
#[derive(Clone)]
pub struct ReplayPool {
    pool: PgPool,
}

impl ReplayPool {
    /// Open a pool without establishing any physical connection.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let pool = ReplayPool::open(&settings.connection, &settings.pool)?;
    /// pool.ping().await?;
    /// ```
    pub fn open(settings: &ConnectionSettings, config: &PoolConfig) -> ReplayResult<Self> {
        config.validate()?;
        let options = connect_options(settings)?;

        tracing::info!(
            host = %settings.host,
            port = settings.port,
            dbname = %settings.dbname,
            max_open = config.max_open_connections,
            max_idle = config.max_idle_connections,
            max_lifetime_ms = config.max_lifetime.as_millis() as u64,
            max_idle_time_ms = config.max_idle_time.as_millis() as u64,
            acquire_timeout_s = config.acquire_timeout.as_secs(),
            "opening connection pool"
        );

        let pool = config.pool_options().connect_lazy_with(options);
        Ok(Self { pool })
    }

    /// Establish one connection to verify the database is reachable.
    pub async fn ping(&self) -> ReplayResult<()> {
        self.ping_within(DEFAULT_PING_TIMEOUT).await
    }

    /// Like [`ReplayPool::ping`], giving up after `limit`.
    pub async fn ping_within(&self, limit: Duration) -> ReplayResult<()> {
        let conn = tokio::time::timeout(limit, self.pool.acquire())
            .await
            .map_err(|_| {
                ReplayError::Connection(format!(
                    "no connection established within {} ms",
                    limit.as_millis()
                ))
            })?
            .map_err(|e| ReplayError::Connection(e.to_string()))?;
        drop(conn);
        Ok(())
    }

    /// Number of physical connections currently open.
    pub fn size(&self) -> u32 {
        self.pool.size()
    }

    /// Number of open connections sitting idle.
    pub fn num_idle(&self) -> usize {
        self.pool.num_idle()
    }

    /// Close every connection and wait for them to shut down.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Get a reference to the underlying connection pool.
    pub fn inner(&self) -> &PgPool {
        &self.pool
    }
}

impl StatementTarget for ReplayPool {
    async fn execute(&self, statement: &str) -> ReplayResult<()> {
        if statement.trim().is_empty() {
            return Err(ReplayError::Query("empty query".to_string()));
        }

        // Simple query protocol: no parameters, multiple statements allowed.
        self.pool
            .execute(statement)
            .await
            .map_err(|e| ReplayError::Query(e.to_string()))?;

        Ok(())
    }
}
