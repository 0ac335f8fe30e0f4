use person_core::{
    ConnectionPool, CreateStep, Deadline, NewPerson, PersonProfile, PersonService,
    PersonServiceError, StoreConfig,
};
use rusqlite::Connection;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::time::{Duration, Instant};
use tempfile::TempDir;

struct Fixture {
    _dir: TempDir,
    path: PathBuf,
    service: PersonService,
}

fn setup_with(config: StoreConfig) -> Fixture {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("people.db");
    let pool = ConnectionPool::open(&path, config).unwrap();
    Fixture {
        _dir: dir,
        path,
        service: PersonService::new(pool),
    }
}

fn setup() -> Fixture {
    setup_with(StoreConfig::default())
}

fn payload() -> NewPerson {
    NewPerson {
        name: "Carol".to_string(),
        phone_number: "555-9876".to_string(),
        city: "Portland".to_string(),
        state: "OR".to_string(),
        street1: "12 Oak Ave".to_string(),
        street2: "Suite 4".to_string(),
        zip_code: "97201".to_string(),
    }
}

fn raw(path: &Path) -> Connection {
    let conn = Connection::open(path).unwrap();
    conn.busy_timeout(Duration::from_secs(5)).unwrap();
    conn
}

fn install_failing_trigger(path: &Path, table: &str) {
    raw(path)
        .execute_batch(&format!(
            "CREATE TRIGGER fail_{table} BEFORE INSERT ON {table}
             BEGIN
                 SELECT RAISE(ABORT, 'injected {table} failure');
             END;"
        ))
        .unwrap();
}

fn drop_failing_trigger(path: &Path, table: &str) {
    raw(path)
        .execute_batch(&format!("DROP TRIGGER fail_{table};"))
        .unwrap();
}

fn assert_store_empty(path: &Path) {
    let conn = raw(path);
    for table in ["person", "phone", "address", "address_join"] {
        let count: i64 = conn
            .query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
                row.get(0)
            })
            .unwrap();
        assert_eq!(count, 0, "table {table} should be untouched");
    }
}

fn assert_recovers(fixture: &Fixture) {
    let id = fixture
        .service
        .create_person(&payload(), Deadline::none())
        .unwrap();
    assert_eq!(
        fixture.service.get_profile(id).unwrap(),
        PersonProfile::from(payload())
    );
}

fn assert_insert_failure_rolls_back(table: &str, expected_step: CreateStep) {
    let fixture = setup();
    install_failing_trigger(&fixture.path, table);

    let err = fixture
        .service
        .create_person(&payload(), Deadline::none())
        .unwrap_err();
    match &err {
        PersonServiceError::StepFailed { step, .. } => assert_eq!(*step, expected_step),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.step(), Some(expected_step));
    assert_eq!(err.code(), "step_failed");
    assert_store_empty(&fixture.path);

    drop_failing_trigger(&fixture.path, table);
    assert_recovers(&fixture);
}

#[test]
fn address_insert_failure_leaves_store_unchanged() {
    assert_insert_failure_rolls_back("address", CreateStep::InsertAddress);
}

#[test]
fn person_insert_failure_undoes_address() {
    assert_insert_failure_rolls_back("person", CreateStep::InsertPerson);
}

#[test]
fn phone_insert_failure_undoes_address_and_person() {
    assert_insert_failure_rolls_back("phone", CreateStep::InsertPhone);
}

#[test]
fn link_insert_failure_undoes_all_previous_rows() {
    assert_insert_failure_rolls_back("address_join", CreateStep::InsertLink);
}

#[test]
fn commit_failure_leaves_store_unchanged() {
    let fixture = setup();
    // Deferred foreign keys are only checked at COMMIT.
    raw(&fixture.path)
        .execute_batch(
            "CREATE TABLE ghost (id INTEGER PRIMARY KEY);
             CREATE TABLE audit (
                 person_id INTEGER NOT NULL
                     REFERENCES ghost(id) DEFERRABLE INITIALLY DEFERRED
             );
             CREATE TRIGGER audit_link AFTER INSERT ON address_join
             BEGIN
                 INSERT INTO audit (person_id) VALUES (NEW.person_id);
             END;",
        )
        .unwrap();

    let err = fixture
        .service
        .create_person(&payload(), Deadline::none())
        .unwrap_err();
    assert!(
        matches!(err, PersonServiceError::CommitFailed(_)),
        "unexpected error: {err}"
    );
    assert_eq!(err.step(), Some(CreateStep::Commit));
    assert_store_empty(&fixture.path);

    let audit_rows: i64 = raw(&fixture.path)
        .query_row("SELECT COUNT(*) FROM audit;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(audit_rows, 0);

    raw(&fixture.path)
        .execute_batch("DROP TRIGGER audit_link;")
        .unwrap();
    assert_recovers(&fixture);
}

#[test]
fn begin_failure_when_store_is_locked() {
    let fixture = setup_with(StoreConfig {
        busy_timeout: Duration::from_millis(50),
        ..StoreConfig::default()
    });

    let holder = raw(&fixture.path);
    holder.execute_batch("BEGIN IMMEDIATE;").unwrap();

    let err = fixture
        .service
        .create_person(&payload(), Deadline::none())
        .unwrap_err();
    assert!(
        matches!(err, PersonServiceError::BeginFailed(_)),
        "unexpected error: {err}"
    );
    assert_eq!(err.code(), "begin_failed");

    holder.execute_batch("ROLLBACK;").unwrap();
    drop(holder);

    assert_store_empty(&fixture.path);
    assert_recovers(&fixture);
}

#[test]
fn expired_deadline_writes_nothing() {
    let fixture = setup();

    let err = fixture
        .service
        .create_person(&payload(), Deadline::after(Duration::ZERO))
        .unwrap_err();
    assert!(matches!(
        err,
        PersonServiceError::Timeout {
            step: CreateStep::Begin
        }
    ));
    assert_eq!(err.code(), "deadline_expired");
    assert_store_empty(&fixture.path);
}

#[test]
fn deadline_cuts_lock_wait_short_of_busy_timeout() {
    let fixture = setup_with(StoreConfig {
        busy_timeout: Duration::from_secs(5),
        ..StoreConfig::default()
    });
    let (locked_tx, locked_rx) = mpsc::channel();
    let (release_tx, release_rx) = mpsc::channel::<()>();

    let holder_path = fixture.path.clone();
    let holder = std::thread::spawn(move || {
        let conn = raw(&holder_path);
        conn.execute_batch("BEGIN IMMEDIATE;").unwrap();
        locked_tx.send(()).unwrap();
        let _ = release_rx.recv_timeout(Duration::from_secs(3));
        conn.execute_batch("ROLLBACK;").unwrap();
    });
    locked_rx.recv().unwrap();

    let started_at = Instant::now();
    let err = fixture
        .service
        .create_person(&payload(), Deadline::after(Duration::from_millis(100)))
        .unwrap_err();
    let elapsed = started_at.elapsed();
    release_tx.send(()).unwrap();
    holder.join().unwrap();

    assert!(
        matches!(
            err,
            PersonServiceError::Timeout {
                step: CreateStep::Begin
            }
        ),
        "unexpected error: {err}"
    );
    assert_eq!(err.code(), "deadline_expired");
    assert!(
        elapsed < Duration::from_millis(1_000),
        "lock wait overran the deadline: {elapsed:?}"
    );

    assert_store_empty(&fixture.path);
    // The pooled connection keeps its configured busy timeout.
    let busy_ms: i64 = fixture
        .service
        .pool()
        .get()
        .unwrap()
        .query_row("PRAGMA busy_timeout;", [], |row| row.get(0))
        .unwrap();
    assert_eq!(busy_ms, 5_000);
    assert_recovers(&fixture);
}

#[test]
fn deadline_expiring_mid_transaction_rolls_back() {
    let fixture = setup();
    // Makes the address insert slow enough to outlive a short deadline.
    raw(&fixture.path)
        .execute_batch(
            "CREATE TABLE spin (n INTEGER NOT NULL);
             INSERT INTO spin (n)
                 WITH RECURSIVE seq(n) AS (
                     SELECT 1 UNION ALL SELECT n + 1 FROM seq WHERE n < 6000
                 )
                 SELECT n FROM seq;
             CREATE TRIGGER slow_address AFTER INSERT ON address
             BEGIN
                 SELECT COUNT(*) FROM spin a, spin b;
             END;",
        )
        .unwrap();

    let err = fixture
        .service
        .create_person(&payload(), Deadline::after(Duration::from_millis(50)))
        .unwrap_err();

    assert!(
        matches!(
            err,
            PersonServiceError::Timeout {
                step: CreateStep::InsertPerson
            }
        ),
        "unexpected error: {err}"
    );
    assert_store_empty(&fixture.path);

    raw(&fixture.path)
        .execute_batch("DROP TRIGGER slow_address;")
        .unwrap();
    assert_recovers(&fixture);
}

#[test]
fn exhausted_pool_reports_pool_error() {
    let fixture = setup_with(StoreConfig {
        pool_size: 1,
        acquire_timeout: Duration::from_millis(30),
        ..StoreConfig::default()
    });
    let _held = fixture.service.pool().get().unwrap();

    let err = fixture
        .service
        .create_person(&payload(), Deadline::none())
        .unwrap_err();
    assert!(matches!(err, PersonServiceError::Pool(_)));
    assert_eq!(err.code(), "pool_timeout");
}

#[test]
fn failed_creation_returns_connection_to_pool() {
    let fixture = setup_with(StoreConfig {
        pool_size: 1,
        ..StoreConfig::default()
    });
    install_failing_trigger(&fixture.path, "phone");

    for _ in 0..3 {
        fixture
            .service
            .create_person(&payload(), Deadline::none())
            .unwrap_err();
    }

    let stats = fixture.service.pool().stats();
    assert_eq!(stats.total_connections, 1);
    assert_eq!(stats.idle_connections, 1);
}
