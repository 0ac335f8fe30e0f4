//! Person repository contracts and SQLite implementation.
//!
//! # Responsibility
//! - Read the flattened person profile across the four person tables.
//! - Create a person, phone, address and link row in one transaction.
//!
//! # Invariants
//! - The address id is captured before the person insert and the person id
//!   before the phone and link inserts.
//! - Any failure after `BEGIN` rolls the whole transaction back.
//! - A failed `COMMIT` leaves the transaction open inside SQLite; dropping the
//!   `Transaction` handle rolls it back.
//! - Lock waits never outlast the deadline, and the connection busy timeout
//!   is restored before the connection goes back to its pool.

use crate::db::DbError;
use crate::deadline::Deadline;
use crate::model::person::{NewPerson, PersonId, PersonProfile};
use log::{error, warn};
use rusqlite::{params, Connection, ErrorCode, Row, Transaction, TransactionBehavior};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

const PROFILE_SELECT_SQL: &str = "SELECT
    p.name,
    ph.number,
    a.city,
    a.state,
    a.street1,
    a.street2,
    a.zip_code
FROM person p
INNER JOIN phone ph ON p.id = ph.person_id
INNER JOIN address_join aj ON p.id = aj.person_id
INNER JOIN address a ON aj.address_id = a.id
WHERE p.id = ?1
ORDER BY ph.rowid ASC, aj.rowid ASC
LIMIT 2;";

pub type RepoResult<T> = Result<T, RepoError>;

/// Ordered sub-steps of the person creation transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CreateStep {
    Begin,
    InsertAddress,
    InsertPerson,
    InsertPhone,
    InsertLink,
    Commit,
}

impl CreateStep {
    /// Stable machine-readable step name used in logs and error codes.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Begin => "begin",
            Self::InsertAddress => "insert_address",
            Self::InsertPerson => "insert_person",
            Self::InsertPhone => "insert_phone",
            Self::InsertLink => "insert_link",
            Self::Commit => "commit",
        }
    }
}

impl Display for CreateStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Repository error for person persistence and query operations.
#[derive(Debug)]
pub enum RepoError {
    /// Read-path failure.
    Db(DbError),
    /// The write transaction could not be started.
    Begin(rusqlite::Error),
    /// One of the inserts failed; the transaction was rolled back.
    Step {
        step: CreateStep,
        source: rusqlite::Error,
    },
    /// `COMMIT` failed; nothing became visible.
    Commit(rusqlite::Error),
    /// The deadline passed before `step` could run.
    Timeout { step: CreateStep },
    /// Stored or generated data violates a model invariant.
    InvalidData(String),
}

impl RepoError {
    /// Creation step the error is attributed to, when it has one.
    pub fn step(&self) -> Option<CreateStep> {
        match self {
            Self::Begin(_) => Some(CreateStep::Begin),
            Self::Step { step, .. } | Self::Timeout { step } => Some(*step),
            Self::Commit(_) => Some(CreateStep::Commit),
            Self::Db(_) | Self::InvalidData(_) => None,
        }
    }
}

impl Display for RepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Begin(err) => write!(f, "failed to start transaction: {err}"),
            Self::Step { step, source } => write!(f, "{step} failed: {source}"),
            Self::Commit(err) => write!(f, "failed to commit transaction: {err}"),
            Self::Timeout { step } => write!(f, "deadline expired before {step}"),
            Self::InvalidData(message) => write!(f, "invalid person data: {message}"),
        }
    }
}

impl Error for RepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Begin(err) | Self::Commit(err) => Some(err),
            Self::Step { source, .. } => Some(source),
            Self::Timeout { .. } | Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for RepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

/// Repository interface for person reads and creation.
pub trait PersonRepository {
    /// Returns the flattened profile, or `None` when no complete profile row
    /// exists for `id`.
    fn get_profile(&self, id: PersonId) -> RepoResult<Option<PersonProfile>>;
    /// Inserts address, person, phone and link rows atomically and returns the
    /// generated person id.
    fn create_person(&mut self, person: &NewPerson, deadline: Deadline) -> RepoResult<PersonId>;
}

/// SQLite-backed person repository over a borrowed connection.
pub struct SqlitePersonRepository<'conn> {
    conn: &'conn mut Connection,
}

impl<'conn> SqlitePersonRepository<'conn> {
    pub fn new(conn: &'conn mut Connection) -> Self {
        Self { conn }
    }
}

impl PersonRepository for SqlitePersonRepository<'_> {
    fn get_profile(&self, id: PersonId) -> RepoResult<Option<PersonProfile>> {
        let mut stmt = self.conn.prepare(PROFILE_SELECT_SQL)?;
        let mut rows = stmt.query([id.get()])?;

        let Some(row) = rows.next()? else {
            return Ok(None);
        };
        let profile = parse_profile_row(row)?;

        if rows.next()?.is_some() {
            warn!(
                "event=profile_read module=repo status=ok warning=multiple_rows person_id={id}"
            );
        }

        Ok(Some(profile))
    }

    fn create_person(&mut self, person: &NewPerson, deadline: Deadline) -> RepoResult<PersonId> {
        ensure_time_left(deadline, CreateStep::Begin)?;
        let budget = StepBudget {
            deadline,
            busy_timeout: current_busy_timeout(self.conn).map_err(RepoError::Begin)?,
        };

        let result = create_in_transaction(self.conn, person, budget);

        if let Err(err) = self.conn.busy_timeout(budget.busy_timeout) {
            warn!(
                "event=person_create module=repo status=error error_code=busy_timeout_restore_failed error={}",
                err
            );
        }
        result
    }
}

/// Lock-wait budget for one creation call.
///
/// SQLite waits up to the connection busy timeout on a locked database; each
/// step lowers that wait to whatever the deadline has left.
#[derive(Debug, Clone, Copy)]
struct StepBudget {
    deadline: Deadline,
    busy_timeout: Duration,
}

impl StepBudget {
    /// Fails with `Timeout` once the deadline has passed, otherwise caps the
    /// lock wait for `step`. Returns whether the deadline is the binding cap.
    fn enter(&self, conn: &Connection, step: CreateStep) -> RepoResult<bool> {
        ensure_time_left(self.deadline, step)?;
        let (wait, capped) = match self.deadline.remaining() {
            Some(left) if left < self.busy_timeout => (left, true),
            _ => (self.busy_timeout, false),
        };
        conn.busy_timeout(wait)
            .map_err(|source| step_error(step, source))?;
        Ok(capped)
    }

    /// Attributes a failed statement to `step`, reporting lock contention
    /// that outlived the deadline as `Timeout`.
    fn fail(&self, step: CreateStep, capped: bool, source: rusqlite::Error) -> RepoError {
        if (capped || self.deadline.is_expired()) && is_lock_contention(&source) {
            warn!(
                "event=person_create module=repo status=error error_code=deadline_expired step={} error={}",
                step, source
            );
            return RepoError::Timeout { step };
        }
        step_error(step, source)
    }
}

fn create_in_transaction(
    conn: &mut Connection,
    person: &NewPerson,
    budget: StepBudget,
) -> RepoResult<PersonId> {
    let capped = budget.enter(conn, CreateStep::Begin)?;
    let tx = conn
        .transaction_with_behavior(TransactionBehavior::Immediate)
        .map_err(|source| budget.fail(CreateStep::Begin, capped, source))?;

    let inserted = insert_person_rows(&tx, person, budget).and_then(|person_id| {
        let capped = budget.enter(&tx, CreateStep::Commit)?;
        Ok((person_id, capped))
    });

    match inserted {
        Ok((person_id, capped)) => {
            tx.commit()
                .map_err(|source| budget.fail(CreateStep::Commit, capped, source))?;
            Ok(person_id)
        }
        Err(err) => {
            if let Err(rollback_err) = tx.rollback() {
                error!(
                    "event=person_create module=repo status=error error_code=rollback_failed step={} error={}",
                    err.step().map_or("unknown", CreateStep::as_str),
                    rollback_err
                );
            }
            Err(err)
        }
    }
}

fn insert_person_rows(
    tx: &Transaction<'_>,
    person: &NewPerson,
    budget: StepBudget,
) -> RepoResult<PersonId> {
    let capped = budget.enter(tx, CreateStep::InsertAddress)?;
    tx.execute(
        "INSERT INTO address (city, state, street1, street2, zip_code)
         VALUES (?1, ?2, ?3, ?4, ?5);",
        params![
            person.city.as_str(),
            person.state.as_str(),
            person.street1.as_str(),
            person.street2.as_str(),
            person.zip_code.as_str(),
        ],
    )
    .map_err(|source| budget.fail(CreateStep::InsertAddress, capped, source))?;
    let address_id = tx.last_insert_rowid();

    let capped = budget.enter(tx, CreateStep::InsertPerson)?;
    tx.execute(
        "INSERT INTO person (name) VALUES (?1);",
        [person.name.as_str()],
    )
    .map_err(|source| budget.fail(CreateStep::InsertPerson, capped, source))?;
    let person_id = PersonId::new(tx.last_insert_rowid())
        .map_err(|err| RepoError::InvalidData(format!("generated {err}")))?;

    let capped = budget.enter(tx, CreateStep::InsertPhone)?;
    tx.execute(
        "INSERT INTO phone (person_id, number) VALUES (?1, ?2);",
        params![person_id.get(), person.phone_number.as_str()],
    )
    .map_err(|source| budget.fail(CreateStep::InsertPhone, capped, source))?;

    let capped = budget.enter(tx, CreateStep::InsertLink)?;
    tx.execute(
        "INSERT INTO address_join (person_id, address_id) VALUES (?1, ?2);",
        params![person_id.get(), address_id],
    )
    .map_err(|source| budget.fail(CreateStep::InsertLink, capped, source))?;

    Ok(person_id)
}

fn step_error(step: CreateStep, source: rusqlite::Error) -> RepoError {
    match step {
        CreateStep::Begin => RepoError::Begin(source),
        CreateStep::Commit => RepoError::Commit(source),
        _ => RepoError::Step { step, source },
    }
}

fn is_lock_contention(err: &rusqlite::Error) -> bool {
    matches!(
        err.sqlite_error_code(),
        Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
    )
}

fn current_busy_timeout(conn: &Connection) -> rusqlite::Result<Duration> {
    let millis: i64 = conn.query_row("PRAGMA busy_timeout;", [], |row| row.get(0))?;
    Ok(Duration::from_millis(u64::try_from(millis).unwrap_or(0)))
}

fn ensure_time_left(deadline: Deadline, step: CreateStep) -> RepoResult<()> {
    if deadline.is_expired() {
        return Err(RepoError::Timeout { step });
    }
    Ok(())
}

fn parse_profile_row(row: &Row<'_>) -> RepoResult<PersonProfile> {
    Ok(PersonProfile {
        name: row.get(0)?,
        phone_number: row.get(1)?,
        city: row.get(2)?,
        state: row.get(3)?,
        street1: row.get(4)?,
        street2: row.get::<_, Option<String>>(5)?.unwrap_or_default(),
        zip_code: row.get(6)?,
    })
}
