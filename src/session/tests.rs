//! Tests for sessions and cursors

use super::*;
use crate::driver::{resolve, ConnectOptions, Driver};
use crate::engine::{EngineFactory, NativeEngineFactory};
use crate::params;
use crate::pool::{Pool, PoolConfig};
use pretty_assertions::assert_eq;

struct Harness {
    pool: Pool,
    closed: Arc<AtomicBool>,
    counters: Arc<SessionCounters>,
}

impl Harness {
    fn new(driver: Driver) -> Self {
        let (_, url) = resolve(&ConnectOptions::new(driver)).unwrap();
        let engine = NativeEngineFactory.create(&url).unwrap();
        Self {
            pool: Pool::new(format!("{driver}+"), engine, &PoolConfig::default()),
            closed: Arc::new(AtomicBool::new(false)),
            counters: Arc::default(),
        }
    }

    fn session(&self) -> Session {
        Session::new(
            "test+memory",
            self.pool.acquire().unwrap(),
            Arc::clone(&self.closed),
            Arc::clone(&self.counters),
        )
    }
}

fn users_session(harness: &Harness) -> Session {
    let session = harness.session();
    session
        .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name TEXT)", &[])
        .unwrap();
    session
        .execute_many(
            "INSERT INTO users VALUES (?, ?)",
            [params![1, "ian"], params![2, "pierre"], params![3, "jacques"]],
        )
        .unwrap();
    session
}

fn count_users(session: &Session) -> i64 {
    session
        .execute("SELECT COUNT(*) FROM users", &[])
        .unwrap()
        .fetch_one()
        .unwrap()
        .and_then(|row| row.get(0).and_then(Value::as_i64))
        .unwrap()
}

// ============================================================================
// Execute & Fetch Tests
// ============================================================================

#[test]
fn test_execute_many_then_select_in_order() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);
    assert_eq!(session.rowcount(), Some(3));

    let rows = session
        .execute("SELECT id, name FROM users ORDER BY id", &[])
        .unwrap()
        .fetch_all()
        .unwrap();
    assert_eq!(
        rows,
        vec![
            Row::new(params![1, "ian"]),
            Row::new(params![2, "pierre"]),
            Row::new(params![3, "jacques"]),
        ]
    );
}

#[test]
fn test_fetch_family_consumes_rows() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);
    session
        .execute("SELECT name FROM users ORDER BY id", &[])
        .unwrap();

    assert_eq!(session.fetch_one().unwrap(), Some(Row::new(params!["ian"])));
    assert_eq!(session.fetch_many(None).unwrap(), vec![Row::new(params!["pierre"])]);
    assert_eq!(session.fetch_many(Some(10)).unwrap(), vec![Row::new(params!["jacques"])]);

    assert_eq!(session.fetch_one().unwrap(), None);
    assert!(session.fetch_many(Some(2)).unwrap().is_empty());
    assert!(session.fetch_all().unwrap().is_empty());
}

#[test]
fn test_arraysize_drives_fetch_many() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);
    assert_eq!(session.arraysize(), DEFAULT_ARRAYSIZE);

    session.set_arraysize(2);
    session.execute("SELECT id FROM users ORDER BY id", &[]).unwrap();
    assert_eq!(session.fetch_many(None).unwrap().len(), 2);
    assert_eq!(session.fetch_many(None).unwrap().len(), 1);
}

#[test]
fn test_description_and_rowcount() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);

    session
        .execute("UPDATE users SET name = ? WHERE id > ?", &params!["x", 1])
        .unwrap();
    assert_eq!(session.rowcount(), Some(2));
    assert_eq!(session.description(), None);

    session.execute("SELECT id, name FROM users", &[]).unwrap();
    let names: Vec<_> = session
        .description()
        .unwrap()
        .into_iter()
        .map(|c| c.name)
        .collect();
    assert_eq!(names, vec!["id", "name"]);
}

#[test]
fn test_statement_error_keeps_session_usable() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);

    let err = session.execute("SELEC nonsense", &[]).err().unwrap();
    assert!(err.is_statement(), "unexpected error: {err}");

    assert_eq!(count_users(&session), 3);
}

#[test]
fn test_execute_many_rowcount_unreported_on_duckdb() {
    let harness = Harness::new(Driver::Duckdb);
    let session = users_session(&harness);

    assert_eq!(session.rowcount(), None);
    assert_eq!(count_users(&session), 3);
}

#[test]
fn test_is_closed_does_not_wait_for_state_lock() {
    let harness = Harness::new(Driver::Sqlite);
    let session = harness.session();

    let _state = session.shared.state.lock();
    assert!(!session.is_closed());
}

#[test]
fn test_dbapi_extras() {
    let harness = Harness::new(Driver::Sqlite);
    let session = harness.session();
    session.set_input_sizes(&[Some(10), None]);
    session.set_output_size(100, None);
    assert!(!session.nextset());
}

// ============================================================================
// Batch Atomicity Tests
// ============================================================================

#[test]
fn test_failed_batch_is_undone_with_savepoint() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);

    let err = session
        .execute_many(
            "INSERT INTO users VALUES (?, ?)",
            [params![4, "marie"], params![1, "duplicate"]],
        )
        .err()
        .unwrap();
    assert!(err.is_statement());

    // rows written before the batch are still pending, the batch is gone
    assert!(session.in_transaction());
    assert_eq!(count_users(&session), 3);
}

#[test]
fn test_failed_batch_without_savepoints_rolls_back_transaction() {
    let harness = Harness::new(Driver::Duckdb);
    let session = harness.session();
    session
        .execute("CREATE TABLE users (id INTEGER PRIMARY KEY, name VARCHAR)", &[])
        .unwrap();
    session.commit().unwrap();

    session
        .execute("INSERT INTO users VALUES (?, ?)", &params![1, "ian"])
        .unwrap();
    let err = session
        .execute_many(
            "INSERT INTO users VALUES (?, ?)",
            [params![2, "pierre"], params![1, "duplicate"]],
        )
        .err()
        .unwrap();
    assert!(err.is_statement());
    assert!(!session.in_transaction());

    assert_eq!(count_users(&session), 0);
}

// ============================================================================
// Transaction Tests
// ============================================================================

#[test]
fn test_commit_is_visible_to_next_session() {
    let harness = Harness::new(Driver::Duckdb);

    let first = users_session(&harness);
    first.commit().unwrap();
    assert!(!first.in_transaction());
    first.close();

    let second = harness.session();
    assert_eq!(count_users(&second), 3);
}

#[test]
fn test_rollback_discards_pending_work() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);
    session.commit().unwrap();

    session.execute("DELETE FROM users", &[]).unwrap();
    session.rollback().unwrap();
    assert_eq!(count_users(&session), 3);
}

#[test]
fn test_close_rolls_back_pending_work() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);
    session.commit().unwrap();
    session.execute("DELETE FROM users", &[]).unwrap();
    session.close();

    let next = harness.session();
    assert_eq!(count_users(&next), 3);
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[test]
fn test_close_is_idempotent() {
    let harness = Harness::new(Driver::Sqlite);
    let session = harness.session();

    session.close();
    session.close();
    drop(session);

    assert_eq!(harness.counters.opened.load(Ordering::SeqCst), 1);
    assert_eq!(harness.counters.closed.load(Ordering::SeqCst), 1);
    assert_eq!(harness.pool.status().leased, 0);
}

#[test]
fn test_operations_after_close_fail() {
    let harness = Harness::new(Driver::Sqlite);
    let session = harness.session();
    session.close();

    assert!(session.is_closed());
    assert!(session.execute("SELECT 1", &[]).err().unwrap().is_connection_closed());
    assert!(session.fetch_all().err().unwrap().is_connection_closed());
    assert!(session.commit().err().unwrap().is_connection_closed());
}

#[test]
fn test_closed_connection_fails_session_ops() {
    let harness = Harness::new(Driver::Sqlite);
    let session = users_session(&harness);

    harness.closed.store(true, Ordering::SeqCst);
    harness.pool.close();

    let err = session.execute("SELECT 1", &[]).err().unwrap();
    assert!(err.is_connection_closed());
    assert!(err.to_string().contains("test+memory"));
    assert!(session.is_closed());

    let status = harness.pool.status();
    assert_eq!(status.leased, 0);
    assert_eq!(status.idle, 0);
    assert_eq!(harness.counters.closed.load(Ordering::SeqCst), 1);
}

#[test]
fn test_drop_releases_connection() {
    let harness = Harness::new(Driver::Sqlite);
    {
        let _session = harness.session();
        assert_eq!(harness.pool.status().leased, 1);
    }
    assert_eq!(harness.pool.status().leased, 0);
}

#[test]
fn test_shared_handle_closes_same_session() {
    let harness = Harness::new(Driver::Sqlite);
    let session = harness.session();
    let handle = session.share();

    handle.close();
    assert!(session.is_closed());
}
