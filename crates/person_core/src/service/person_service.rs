//! Person use-case service.
//!
//! # Responsibility
//! - Provide profile read and atomic person creation entry points.
//! - Check connections out of the injected pool for exactly one call.
//! - Translate repository failures into a caller-facing failure kind.
//!
//! # Invariants
//! - The service holds no mutable state; concurrent calls are independent.
//! - A pooled connection is returned on every exit path, including panics.
//! - Payload text is never written to logs.

use crate::db::{ConnectionPool, DbError, PoolError};
use crate::deadline::Deadline;
use crate::model::person::{NewPerson, PersonId, PersonProfile};
use crate::repo::person_repo::{CreateStep, PersonRepository, RepoError, SqlitePersonRepository};
use log::{error, info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Failure kinds surfaced by person use-cases.
#[derive(Debug)]
pub enum PersonServiceError {
    /// Caller supplied something that is not a valid request.
    InvalidInput(String),
    /// No complete profile exists for the person.
    NotFound(PersonId),
    /// No store connection could be obtained.
    Pool(PoolError),
    /// The creation transaction could not be started.
    BeginFailed(rusqlite::Error),
    /// An insert failed and the transaction was rolled back.
    StepFailed {
        step: CreateStep,
        source: rusqlite::Error,
    },
    /// The creation transaction failed to commit.
    CommitFailed(rusqlite::Error),
    /// The request deadline expired before `step`; nothing was committed.
    Timeout { step: CreateStep },
    /// Read-path store failure.
    Db(DbError),
    /// Stored or generated data violates a model invariant.
    InvalidData(String),
}

impl PersonServiceError {
    /// Stable error code for structured logs.
    pub fn code(&self) -> &'static str {
        match self {
            Self::InvalidInput(_) => "invalid_input",
            Self::NotFound(_) => "not_found",
            Self::Pool(PoolError::Timeout(_)) => "pool_timeout",
            Self::Pool(_) => "pool_unavailable",
            Self::BeginFailed(_) => "begin_failed",
            Self::StepFailed { .. } => "step_failed",
            Self::CommitFailed(_) => "commit_failed",
            Self::Timeout { .. } => "deadline_expired",
            Self::Db(_) => "db_error",
            Self::InvalidData(_) => "invalid_data",
        }
    }

    /// Creation step the failure is attributed to, when it has one.
    pub fn step(&self) -> Option<CreateStep> {
        match self {
            Self::BeginFailed(_) => Some(CreateStep::Begin),
            Self::StepFailed { step, .. } | Self::Timeout { step } => Some(*step),
            Self::CommitFailed(_) => Some(CreateStep::Commit),
            _ => None,
        }
    }
}

impl Display for PersonServiceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(message) => write!(f, "invalid input: {message}"),
            Self::NotFound(id) => write!(f, "person not found: {id}"),
            Self::Pool(err) => write!(f, "{err}"),
            Self::BeginFailed(err) => write!(f, "failed to start transaction: {err}"),
            Self::StepFailed { step, source } => write!(f, "{step} failed: {source}"),
            Self::CommitFailed(err) => write!(f, "failed to commit transaction: {err}"),
            Self::Timeout { step } => write!(f, "deadline expired before {step}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid person data: {message}"),
        }
    }
}

impl Error for PersonServiceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Pool(err) => Some(err),
            Self::BeginFailed(err) | Self::CommitFailed(err) => Some(err),
            Self::StepFailed { source, .. } => Some(source),
            Self::Db(err) => Some(err),
            _ => None,
        }
    }
}

impl From<RepoError> for PersonServiceError {
    fn from(value: RepoError) -> Self {
        match value {
            RepoError::Db(err) => Self::Db(err),
            RepoError::Begin(err) => Self::BeginFailed(err),
            RepoError::Step { step, source } => Self::StepFailed { step, source },
            RepoError::Commit(err) => Self::CommitFailed(err),
            RepoError::Timeout { step } => Self::Timeout { step },
            RepoError::InvalidData(message) => Self::InvalidData(message),
        }
    }
}

impl From<PoolError> for PersonServiceError {
    fn from(value: PoolError) -> Self {
        Self::Pool(value)
    }
}

/// Person service facade over a pooled SQLite store.
#[derive(Clone)]
pub struct PersonService {
    pool: ConnectionPool,
}

impl PersonService {
    /// Creates a service drawing connections from `pool`.
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &ConnectionPool {
        &self.pool
    }

    /// Reads the flattened profile for `id`.
    ///
    /// # Errors
    /// - `NotFound` when the person has no complete profile row.
    /// - `Pool` / `Db` for store failures.
    pub fn get_profile(&self, id: PersonId) -> Result<PersonProfile, PersonServiceError> {
        let started_at = Instant::now();
        let result = self.read_profile(id);

        match &result {
            Ok(_) => info!(
                "event=profile_read module=service status=ok person_id={} duration_ms={}",
                id,
                started_at.elapsed().as_millis()
            ),
            Err(PersonServiceError::NotFound(_)) => info!(
                "event=profile_read module=service status=not_found person_id={} duration_ms={}",
                id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=profile_read module=service status=error person_id={} duration_ms={} error_code={} error={}",
                id,
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }

        result
    }

    /// Same as [`PersonService::get_profile`], accepting an unchecked raw id.
    pub fn get_profile_raw(&self, raw_id: i64) -> Result<PersonProfile, PersonServiceError> {
        let id = PersonId::new(raw_id)
            .map_err(|err| PersonServiceError::InvalidInput(err.to_string()))?;
        self.get_profile(id)
    }

    /// Creates a person with one phone and one address atomically.
    ///
    /// # Contract
    /// - Inserts address, person, phone and link rows in that order inside a
    ///   single transaction.
    /// - On any failure the store is left unchanged.
    /// - The deadline bounds the pool wait and every sub-step; expiry rolls
    ///   back and reports `Timeout`.
    pub fn create_person(
        &self,
        person: &NewPerson,
        deadline: Deadline,
    ) -> Result<PersonId, PersonServiceError> {
        let started_at = Instant::now();
        info!("event=person_create module=service status=start");

        let result = self.insert_person(person, deadline);
        match &result {
            Ok(person_id) => info!(
                "event=person_create module=service status=ok person_id={} duration_ms={}",
                person_id,
                started_at.elapsed().as_millis()
            ),
            Err(err) => error!(
                "event=person_create module=service status=error step={} duration_ms={} error_code={} error={}",
                err.step().map_or("none", CreateStep::as_str),
                started_at.elapsed().as_millis(),
                err.code(),
                err
            ),
        }

        result
    }

    fn read_profile(&self, id: PersonId) -> Result<PersonProfile, PersonServiceError> {
        let mut conn = self.pool.get()?;
        let repo = SqlitePersonRepository::new(&mut conn);
        repo.get_profile(id)?
            .ok_or(PersonServiceError::NotFound(id))
    }

    fn insert_person(
        &self,
        person: &NewPerson,
        deadline: Deadline,
    ) -> Result<PersonId, PersonServiceError> {
        let acquire_timeout = self.pool.config().acquire_timeout;
        let wait = deadline
            .remaining()
            .map_or(acquire_timeout, |left| left.min(acquire_timeout));

        let mut conn = match self.pool.get_timeout(wait) {
            Ok(conn) => conn,
            Err(PoolError::Timeout(waited)) if deadline.is_expired() => {
                warn!(
                    "event=person_create module=service status=error error_code=deadline_expired waited_ms={}",
                    waited.as_millis()
                );
                return Err(PersonServiceError::Timeout {
                    step: CreateStep::Begin,
                });
            }
            Err(err) => return Err(err.into()),
        };

        let mut repo = SqlitePersonRepository::new(&mut conn);
        Ok(repo.create_person(person, deadline)?)
    }
}
