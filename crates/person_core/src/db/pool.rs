//! Bounded pool of bootstrapped SQLite connections.
//!
//! # Responsibility
//! - Build an `r2d2` pool whose connections are configured and migrated on
//!   creation.
//! - Hand out exclusive connections bounded by an acquire timeout.
//!
//! # Invariants
//! - At most `pool_size` connections exist at any time.
//! - A connection is never handed out inside an open transaction; leftovers
//!   are rolled back at checkout so in-memory data survives.
//! - In-memory pools hold exactly one long-lived connection, since every
//!   in-memory connection is its own database.

use super::open::{bootstrap_connection, open_db_with_config, OpenMode};
use super::{DbError, StoreConfig};
use log::{debug, error, warn};
use r2d2::CustomizeConnection;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;
use std::time::{Duration, Instant};

pub type PoolResult<T> = Result<T, PoolError>;

/// Exclusive checkout of a pooled connection; returns to the pool on drop.
pub type PooledConnection = r2d2::PooledConnection<SqliteConnectionManager>;

// r2d2 refuses a zero connection timeout.
const MIN_ACQUIRE_TIMEOUT: Duration = Duration::from_millis(1);

/// Failure to obtain a pooled connection.
#[derive(Debug)]
pub enum PoolError {
    /// No connection became available within the wait.
    Timeout(Duration),
    /// Bootstrapping or resetting a connection failed.
    Open(DbError),
    /// The underlying pool could not be built.
    Build(r2d2::Error),
    /// Pool size of zero, or one beyond `u32`, was requested.
    InvalidSize,
}

impl Display for PoolError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Timeout(waited) => write!(
                f,
                "no pooled connection available after {}ms",
                waited.as_millis()
            ),
            Self::Open(err) => write!(f, "failed to open pooled connection: {err}"),
            Self::Build(err) => write!(f, "failed to build connection pool: {err}"),
            Self::InvalidSize => write!(f, "pool size must be between 1 and {}", u32::MAX),
        }
    }
}

impl Error for PoolError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Open(err) => Some(err),
            Self::Build(err) => Some(err),
            Self::Timeout(_) | Self::InvalidSize => None,
        }
    }
}

impl From<DbError> for PoolError {
    fn from(value: DbError) -> Self {
        Self::Open(value)
    }
}

/// Point-in-time pool occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub total_connections: usize,
    pub idle_connections: usize,
    pub max_connections: usize,
}

/// Runs the store bootstrap on every connection r2d2 creates.
#[derive(Debug)]
struct StoreCustomizer {
    mode: OpenMode,
    busy_timeout: Duration,
}

impl CustomizeConnection<Connection, rusqlite::Error> for StoreCustomizer {
    fn on_acquire(&self, conn: &mut Connection) -> Result<(), rusqlite::Error> {
        bootstrap_connection(conn, self.mode, self.busy_timeout).map_err(|err| {
            error!(
                "event=pool_grow module=db status=error mode={} error={}",
                self.mode.as_str(),
                err
            );
            err.into_sqlite()
        })?;
        debug!("event=pool_grow module=db status=ok mode={}", self.mode.as_str());
        Ok(())
    }
}

/// Shared handle to a connection pool. Cloning is cheap.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: r2d2::Pool<SqliteConnectionManager>,
    config: StoreConfig,
}

impl ConnectionPool {
    /// Creates a pool over a database file.
    ///
    /// One connection is bootstrapped before the pool is built so schema
    /// problems surface here as typed errors rather than on first request.
    pub fn open(path: impl AsRef<Path>, config: StoreConfig) -> PoolResult<Self> {
        let max_size = checked_size(&config)?;
        let path = path.as_ref();
        drop(open_db_with_config(path, &config)?);

        let inner = r2d2::Pool::builder()
            .max_size(max_size)
            .min_idle(Some(1))
            .connection_timeout(config.acquire_timeout.max(MIN_ACQUIRE_TIMEOUT))
            .connection_customizer(Box::new(StoreCustomizer {
                mode: OpenMode::File,
                busy_timeout: config.busy_timeout,
            }))
            .build(SqliteConnectionManager::file(path))
            .map_err(PoolError::Build)?;

        Ok(Self { inner, config })
    }

    /// Creates a single-connection pool over a private in-memory database.
    pub fn in_memory() -> PoolResult<Self> {
        let config = StoreConfig {
            pool_size: 1,
            ..StoreConfig::default()
        };

        // Reaping the only connection would drop the database with it.
        let inner = r2d2::Pool::builder()
            .max_size(1)
            .min_idle(Some(1))
            .idle_timeout(None)
            .max_lifetime(None)
            .connection_timeout(config.acquire_timeout)
            .connection_customizer(Box::new(StoreCustomizer {
                mode: OpenMode::Memory,
                busy_timeout: config.busy_timeout,
            }))
            .build(SqliteConnectionManager::memory())
            .map_err(PoolError::Build)?;

        Ok(Self { inner, config })
    }

    /// Returns the configuration this pool was built with.
    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Checks out a connection, waiting up to the configured acquire timeout.
    pub fn get(&self) -> PoolResult<PooledConnection> {
        self.get_timeout(self.config.acquire_timeout)
    }

    /// Checks out a connection, waiting at most `wait`.
    pub fn get_timeout(&self, wait: Duration) -> PoolResult<PooledConnection> {
        let started_at = Instant::now();
        let conn = self.inner.get_timeout(wait).map_err(|err| {
            let elapsed = started_at.elapsed();
            warn!(
                "event=pool_acquire module=db status=error duration_ms={} error_code=pool_timeout max_connections={} error={}",
                elapsed.as_millis(),
                self.config.pool_size,
                err
            );
            PoolError::Timeout(elapsed)
        })?;

        reset_open_transaction(&conn)?;
        Ok(conn)
    }

    /// Returns current pool occupancy.
    pub fn stats(&self) -> PoolStats {
        let state = self.inner.state();
        PoolStats {
            total_connections: state.connections as usize,
            idle_connections: state.idle_connections as usize,
            max_connections: self.inner.max_size() as usize,
        }
    }
}

fn checked_size(config: &StoreConfig) -> PoolResult<u32> {
    match u32::try_from(config.pool_size) {
        Ok(size) if size > 0 => Ok(size),
        _ => Err(PoolError::InvalidSize),
    }
}

fn reset_open_transaction(conn: &Connection) -> PoolResult<()> {
    if conn.is_autocommit() {
        return Ok(());
    }

    error!("event=pool_acquire module=db status=error error_code=open_transaction_rolled_back");
    conn.execute_batch("ROLLBACK;")
        .map_err(|err| PoolError::Open(err.into()))
}
