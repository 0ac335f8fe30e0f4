//! SQLite storage bootstrap, schema migration and connection pooling.
//!
//! # Responsibility
//! - Open and configure SQLite connections for the person store.
//! - Apply schema migrations in deterministic order.
//! - Hand out connections through a bounded `r2d2` pool injected into services.
//!
//! # Invariants
//! - Migration version is tracked via `PRAGMA user_version`.
//! - Core code must not read/write application data before migrations succeed.
//! - No process-global connection exists; every caller goes through a pool.

use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub mod migrations;
mod open;
mod pool;

pub use open::{open_db, open_db_in_memory, open_db_with_config};
pub use pool::{ConnectionPool, PoolError, PoolResult, PoolStats, PooledConnection};

pub type DbResult<T> = Result<T, DbError>;

const DEFAULT_POOL_SIZE: usize = 8;
const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);
const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

/// Tuning knobs for store connections and the pool that owns them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Upper bound on simultaneously open connections.
    pub pool_size: usize,
    /// How long SQLite waits on a locked database before returning `SQLITE_BUSY`.
    pub busy_timeout: Duration,
    /// How long a checkout waits for a free connection.
    pub acquire_timeout: Duration,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pool_size: DEFAULT_POOL_SIZE,
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }
}

#[derive(Debug)]
pub enum DbError {
    Sqlite(rusqlite::Error),
    UnsupportedSchemaVersion {
        db_version: u32,
        latest_supported: u32,
    },
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sqlite(err) => write!(f, "{err}"),
            Self::UnsupportedSchemaVersion {
                db_version,
                latest_supported,
            } => write!(
                f,
                "database schema version {db_version} is newer than supported {latest_supported}"
            ),
        }
    }
}

impl DbError {
    /// Folds the error into a `rusqlite::Error` for hooks that can only
    /// report that type.
    pub(crate) fn into_sqlite(self) -> rusqlite::Error {
        match self {
            Self::Sqlite(err) => err,
            other => rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(rusqlite::ffi::SQLITE_ERROR),
                Some(other.to_string()),
            ),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Sqlite(err) => Some(err),
            Self::UnsupportedSchemaVersion { .. } => None,
        }
    }
}

impl From<rusqlite::Error> for DbError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Sqlite(value)
    }
}
