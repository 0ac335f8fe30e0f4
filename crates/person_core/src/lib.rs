//! Core domain logic for the person profile service.
//! This crate owns the store schema and the atomic person creation protocol.

pub mod db;
pub mod deadline;
pub mod logging;
pub mod model;
pub mod repo;
pub mod service;

pub use db::{ConnectionPool, DbError, PoolError, PoolStats, StoreConfig};
pub use deadline::Deadline;
pub use logging::{default_log_level, init_logging, logging_status};
pub use model::person::{InvalidPersonId, NewPerson, PersonId, PersonProfile};
pub use repo::person_repo::{
    CreateStep, PersonRepository, RepoError, RepoResult, SqlitePersonRepository,
};
pub use service::person_service::{PersonService, PersonServiceError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

#[cfg(test)]
mod tests {
    use super::core_version;

    #[test]
    fn version_is_not_empty() {
        assert!(!core_version().is_empty());
    }

    #[test]
    fn license_is_inherited_from_workspace() {
        assert_eq!(env!("CARGO_PKG_LICENSE"), "MIT");
    }
}
