//! Sessions and cursors
//!
//! A `Session` is a unit-of-work handle bound to one leased raw connection.
//! The first statement opens a transaction implicitly; `commit` and
//! `rollback` end it. Results are materialized per statement and consumed
//! with the `fetch_*` family.
//!
//! ```rust,ignore
//! let session = connection.session()?;
//! session.execute("CREATE TABLE users (id INTEGER, name TEXT)", &[])?;
//! session.execute_many(
//!     "INSERT INTO users VALUES (?, ?)",
//!     [params![1, "ian"], params![2, "pierre"]],
//! )?;
//! let rows = session.execute("SELECT * FROM users", &[])?.fetch_all()?;
//! session.commit()?;
//! ```

use crate::error::{Error, Result};
use crate::pool::Lease;
use crate::types::{Column, Row, Value};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// DB-API name for the statement-executing handle
pub type Cursor = Session;

/// Default number of rows returned by `fetch_many(None)`
pub const DEFAULT_ARRAYSIZE: usize = 1;

/// Session open/close counters shared by all sessions of a connection
#[derive(Debug, Default)]
pub(crate) struct SessionCounters {
    pub(crate) opened: AtomicU64,
    pub(crate) closed: AtomicU64,
}

/// Scoped unit of work over one leased raw connection
pub struct Session {
    shared: Arc<SessionShared>,
}

pub(crate) struct SessionShared {
    identity: String,
    /// Closed flag of the owning connection
    connection_closed: Arc<AtomicBool>,
    /// Set once the lease is given up; readable while a statement runs
    closed: AtomicBool,
    counters: Arc<SessionCounters>,
    state: Mutex<SessionState>,
}

struct SessionState {
    lease: Option<Lease>,
    in_transaction: bool,
    columns: Vec<Column>,
    rows: VecDeque<Row>,
    rowcount: Option<usize>,
    arraysize: usize,
    savepoints: u64,
}

impl Session {
    pub(crate) fn new(
        identity: impl Into<String>,
        lease: Lease,
        connection_closed: Arc<AtomicBool>,
        counters: Arc<SessionCounters>,
    ) -> Self {
        let identity = identity.into();
        counters.opened.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Session opened on {}", identity);

        Self {
            shared: Arc::new(SessionShared {
                identity,
                connection_closed,
                closed: AtomicBool::new(false),
                counters,
                state: Mutex::new(SessionState {
                    lease: Some(lease),
                    in_transaction: false,
                    columns: Vec::new(),
                    rows: VecDeque::new(),
                    rowcount: None,
                    arraysize: DEFAULT_ARRAYSIZE,
                    savepoints: 0,
                }),
            }),
        }
    }

    /// Second handle to the same session, kept by scoped runners so they
    /// can close it after the unit of work has consumed its own handle
    pub(crate) fn share(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn downgrade(&self) -> std::sync::Weak<SessionShared> {
        Arc::downgrade(&self.shared)
    }

    pub(crate) fn upgrade(shared: &std::sync::Weak<SessionShared>) -> Option<Self> {
        shared.upgrade().map(|shared| Self { shared })
    }

    /// Identity of the owning connection
    pub fn identity(&self) -> &str {
        &self.shared.identity
    }

    // ========================================================================
    // Statements
    // ========================================================================

    /// Run one statement with `?` placeholders
    ///
    /// Opens a transaction if none is pending. A failing statement leaves
    /// the session usable.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<&Self> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&mut state)?;
        self.shared.begin_if_needed(&mut state)?;

        state.clear_result();
        let result = state.raw()?.execute(sql, params)?;

        state.rowcount = result.rows_affected;
        state.columns = result.columns;
        state.rows = result.rows.into();
        Ok(self)
    }

    /// Run one statement once per parameter set, all or nothing
    ///
    /// The batch runs inside the session's transaction behind a savepoint.
    /// If any set fails, the rows written by the batch are undone and the
    /// error is returned; earlier pending statements are kept. Engines
    /// without savepoints roll back the whole pending transaction instead.
    pub fn execute_many<I, P>(&self, sql: &str, param_sets: I) -> Result<&Self>
    where
        I: IntoIterator<Item = P>,
        P: AsRef<[Value]>,
    {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&mut state)?;
        self.shared.begin_if_needed(&mut state)?;
        state.clear_result();

        let savepoint = if state.raw()?.supports_savepoints() {
            state.savepoints += 1;
            let name = format!("unidb_batch_{}", state.savepoints);
            state.raw()?.execute_batch(&format!("SAVEPOINT {name}"))?;
            Some(name)
        } else {
            None
        };

        let mut total: Option<usize> = None;
        let mut failure = None;
        for params in param_sets {
            match state.raw()?.execute(sql, params.as_ref()) {
                Ok(result) => {
                    if let Some(affected) = result.rows_affected {
                        total = Some(total.unwrap_or(0) + affected);
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        match (failure, savepoint) {
            (None, Some(name)) => {
                state.raw()?.execute_batch(&format!("RELEASE SAVEPOINT {name}"))?;
                state.rowcount = total;
                Ok(self)
            }
            (None, None) => {
                state.rowcount = total;
                Ok(self)
            }
            (Some(e), Some(name)) => {
                let undo = format!("ROLLBACK TO SAVEPOINT {name}; RELEASE SAVEPOINT {name}");
                if let Err(cleanup) = state.raw().and_then(|raw| raw.execute_batch(&undo)) {
                    tracing::warn!("Failed to undo batch on {}: {}", self.shared.identity, cleanup);
                }
                Err(e)
            }
            (Some(e), None) => {
                state.in_transaction = false;
                if let Err(cleanup) = state.raw().and_then(|raw| raw.rollback()) {
                    tracing::warn!(
                        "Failed to roll back batch on {}: {}",
                        self.shared.identity,
                        cleanup
                    );
                }
                Err(e)
            }
        }
    }

    // ========================================================================
    // Fetching
    // ========================================================================

    /// Next row of the last result, `None` once exhausted
    pub fn fetch_one(&self) -> Result<Option<Row>> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&mut state)?;
        Ok(state.rows.pop_front())
    }

    /// Up to `size` rows (default `arraysize`), empty once exhausted
    pub fn fetch_many(&self, size: Option<usize>) -> Result<Vec<Row>> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&mut state)?;
        let size = size.unwrap_or(state.arraysize).min(state.rows.len());
        Ok(state.rows.drain(..size).collect())
    }

    /// All remaining rows, empty once exhausted
    pub fn fetch_all(&self) -> Result<Vec<Row>> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&mut state)?;
        Ok(state.rows.drain(..).collect())
    }

    /// Columns of the last result; `None` when it produced no columns
    pub fn description(&self) -> Option<Vec<Column>> {
        let state = self.shared.state.lock();
        if state.columns.is_empty() {
            None
        } else {
            Some(state.columns.clone())
        }
    }

    /// Rows affected by the last statement, when the engine reported it
    pub fn rowcount(&self) -> Option<usize> {
        self.shared.state.lock().rowcount
    }

    pub fn arraysize(&self) -> usize {
        self.shared.state.lock().arraysize
    }

    pub fn set_arraysize(&self, size: usize) {
        self.shared.state.lock().arraysize = size.max(1);
    }

    /// Results never carry more than one set
    pub fn nextset(&self) -> bool {
        false
    }

    /// Accepted for DB-API compatibility; has no effect
    pub fn set_input_sizes(&self, _sizes: &[Option<usize>]) {}

    /// Accepted for DB-API compatibility; has no effect
    pub fn set_output_size(&self, _size: usize, _column: Option<usize>) {}

    // ========================================================================
    // Transactions & lifecycle
    // ========================================================================

    /// Commit the pending transaction, if any
    pub fn commit(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&mut state)?;
        if state.in_transaction {
            state.in_transaction = false;
            state.raw()?.commit()?;
        }
        Ok(())
    }

    /// Roll back the pending transaction, if any
    pub fn rollback(&self) -> Result<()> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&mut state)?;
        if state.in_transaction {
            state.in_transaction = false;
            state.raw()?.rollback()?;
        }
        Ok(())
    }

    /// Relation names visible to this session, pending work included
    pub(crate) fn table_names(&self) -> Result<Vec<String>> {
        let mut state = self.shared.state.lock();
        self.shared.ensure_open(&mut state)?;
        state.raw()?.table_names()
    }

    /// Whether a transaction is pending
    pub fn in_transaction(&self) -> bool {
        self.shared.state.lock().in_transaction
    }

    /// Release the raw connection, rolling back pending work; idempotent
    pub fn close(&self) {
        self.shared.close();
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("identity", &self.shared.identity)
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl SessionShared {
    fn ensure_open(&self, state: &mut SessionState) -> Result<()> {
        if self.connection_closed.load(Ordering::SeqCst) {
            // the pool is closed too, so the lease is discarded on release
            if state.lease.take().is_some() {
                self.closed.store(true, Ordering::SeqCst);
                self.counters.closed.fetch_add(1, Ordering::SeqCst);
            }
            state.clear_result();
            return Err(Error::connection_closed(&self.identity));
        }
        if state.lease.is_none() {
            return Err(Error::connection_closed(&self.identity));
        }
        Ok(())
    }

    fn begin_if_needed(&self, state: &mut SessionState) -> Result<()> {
        if !state.in_transaction {
            state.raw()?.begin()?;
            state.in_transaction = true;
        }
        Ok(())
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.connection_closed.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        let mut state = self.state.lock();
        let Some(mut lease) = state.lease.take() else {
            return;
        };
        self.closed.store(true, Ordering::SeqCst);

        if state.in_transaction && !self.connection_closed.load(Ordering::SeqCst) {
            if let Err(e) = lease.raw().and_then(|raw| raw.rollback()) {
                tracing::warn!("Rollback on close failed for {}: {}", self.identity, e);
            }
        }
        state.in_transaction = false;
        state.clear_result();
        drop(lease);

        self.counters.closed.fetch_add(1, Ordering::SeqCst);
        tracing::debug!("Session closed on {}", self.identity);
    }
}

impl Drop for SessionShared {
    fn drop(&mut self) {
        self.close();
    }
}

impl SessionState {
    fn raw(&mut self) -> Result<&mut Box<dyn crate::engine::RawConnection>> {
        match self.lease {
            Some(ref mut lease) => lease.raw(),
            None => Err(Error::Other("session has no connection".to_string())),
        }
    }

    fn clear_result(&mut self) {
        self.columns.clear();
        self.rows.clear();
        self.rowcount = None;
    }
}

#[cfg(test)]
mod tests;
