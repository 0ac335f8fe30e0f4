//! Command-line and environment configuration for the server binary.

use clap::Parser;
use person_api::ApiConfig;
use person_core::StoreConfig;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

/// Person profile HTTP server.
#[derive(Debug, Parser)]
#[command(name = "person_server", version, about)]
pub struct ServerArgs {
    /// Address to listen on.
    #[arg(long, env = "PERSON_BIND", default_value = "0.0.0.0:8080")]
    pub bind: SocketAddr,

    /// SQLite database file; created and migrated when missing.
    #[arg(long, env = "PERSON_DB_PATH", default_value = "people.db")]
    pub db_path: PathBuf,

    /// Maximum pooled store connections.
    #[arg(long, env = "PERSON_POOL_SIZE", default_value_t = 8,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub pool_size: u16,

    /// Milliseconds SQLite waits on a locked database.
    #[arg(long, env = "PERSON_BUSY_TIMEOUT_MS", default_value_t = 5_000,
          value_parser = clap::value_parser!(u64).range(..=i32::MAX as u64))]
    pub busy_timeout_ms: u64,

    /// Milliseconds a request waits for a pooled connection.
    #[arg(long, env = "PERSON_ACQUIRE_TIMEOUT_MS", default_value_t = 10_000)]
    pub acquire_timeout_ms: u64,

    /// Per-request store deadline in milliseconds.
    #[arg(long, env = "PERSON_REQUEST_TIMEOUT_MS", default_value_t = 10_000)]
    pub request_timeout_ms: u64,

    /// trace|debug|info|warn|error; defaults by build mode.
    #[arg(long, env = "PERSON_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Absolute directory for rotating log files; stderr when unset.
    #[arg(long, env = "PERSON_LOG_DIR")]
    pub log_dir: Option<String>,
}

impl ServerArgs {
    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            pool_size: usize::from(self.pool_size),
            busy_timeout: Duration::from_millis(self.busy_timeout_ms),
            acquire_timeout: Duration::from_millis(self.acquire_timeout_ms),
        }
    }

    pub fn api_config(&self) -> ApiConfig {
        ApiConfig {
            request_timeout: Duration::from_millis(self.request_timeout_ms),
        }
    }
}
