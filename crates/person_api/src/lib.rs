//! HTTP surface for the person profile service.
//!
//! # Responsibility
//! - Route profile reads and person creation to `person_core` services.
//! - Map core failure kinds onto HTTP status codes and JSON error bodies.
//!
//! # Invariants
//! - Blocking store calls never run on async worker threads.
//! - Every creation request carries a deadline derived from `ApiConfig`.

mod error;
mod routes;

pub use error::ApiError;
pub use routes::router;

use person_core::PersonService;
use std::sync::Arc;
use std::time::Duration;

const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Request-level settings for the HTTP layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiConfig {
    /// Budget for each store operation started by a request.
    pub request_timeout: Duration,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<PersonService>,
    pub config: ApiConfig,
}

impl AppState {
    pub fn new(service: PersonService, config: ApiConfig) -> Self {
        Self {
            service: Arc::new(service),
            config,
        }
    }
}
