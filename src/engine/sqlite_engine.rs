//! SQLite engine via rusqlite

use super::{Engine, RawConnection};
use crate::driver::{BackendUrl, Driver};
use crate::error::{Error, Result};
use crate::types::{Column, ResultSet, Row, Value};
use rusqlite::types::{ToSqlOutput, ValueRef};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite engine handle
///
/// In-memory databases exist per raw connection, so they are limited to a
/// single pooled connection that keeps the data alive between sessions.
#[derive(Debug)]
pub struct SqliteEngine {
    /// Database file, `None` for `:memory:`
    path: Option<PathBuf>,
    /// Masked URL for messages
    target: String,
    disposed: AtomicBool,
}

impl SqliteEngine {
    pub fn open(url: &BackendUrl) -> Result<Self> {
        let path = if url.is_memory() {
            None
        } else {
            url.database().map(PathBuf::from)
        };

        // SQLite creates missing files but not missing directories
        if let Some(parent) = path.as_deref().and_then(Path::parent) {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                return Err(Error::connect_failed(
                    url.masked(),
                    format!("parent directory does not exist: {}", parent.display()),
                ));
            }
        }

        Ok(Self {
            path,
            target: url.masked(),
            disposed: AtomicBool::new(false),
        })
    }

    pub fn is_memory(&self) -> bool {
        self.path.is_none()
    }
}

impl Engine for SqliteEngine {
    fn driver(&self) -> Driver {
        Driver::Sqlite
    }

    fn connect(&self) -> Result<Box<dyn RawConnection>> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(Error::connect_failed(&self.target, "engine disposed"));
        }

        let conn = match &self.path {
            Some(path) => rusqlite::Connection::open(path),
            None => rusqlite::Connection::open_in_memory(),
        }
        .map_err(|e| Error::connect_failed(&self.target, e.to_string()))?;

        conn.busy_timeout(BUSY_TIMEOUT)
            .map_err(|e| Error::connect_failed(&self.target, e.to_string()))?;

        Ok(Box::new(SqliteConnection { conn }))
    }

    fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
    }

    fn max_connections(&self) -> Option<usize> {
        self.is_memory().then_some(1)
    }
}

/// One rusqlite connection
pub struct SqliteConnection {
    conn: rusqlite::Connection,
}

impl RawConnection for SqliteConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let width = stmt.column_count();
        let params = rusqlite::params_from_iter(params.iter());

        if width == 0 {
            let affected = stmt.execute(params)?;
            return Ok(ResultSet::affected(affected));
        }

        let columns: Vec<Column> = stmt.column_names().into_iter().map(Column::new).collect();

        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                values.push(from_sqlite(row.get_ref(i)?));
            }
            out.push(Row::new(values));
        }

        Ok(ResultSet {
            columns,
            rows: out,
            rows_affected: None,
        })
    }

    fn execute_batch(&mut self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }

    fn table_names(&mut self) -> Result<Vec<String>> {
        let mut stmt = self.conn.prepare(
            "SELECT name FROM sqlite_master
             WHERE type IN ('table', 'view') AND name NOT LIKE 'sqlite_%'
             ORDER BY name",
        )?;
        let names = stmt
            .query_map([], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(names)
    }

    fn is_valid(&mut self) -> bool {
        self.conn.is_autocommit() && self.conn.query_row("SELECT 1", [], |_| Ok(())).is_ok()
    }
}

impl rusqlite::ToSql for Value {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(match self {
            Value::Null => ToSqlOutput::Borrowed(ValueRef::Null),
            Value::Boolean(b) => ToSqlOutput::Borrowed(ValueRef::Integer(i64::from(*b))),
            Value::Integer(i) => ToSqlOutput::Borrowed(ValueRef::Integer(*i)),
            Value::Real(f) => ToSqlOutput::Borrowed(ValueRef::Real(*f)),
            Value::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
            Value::Blob(b) => ToSqlOutput::Borrowed(ValueRef::Blob(b)),
        })
    }
}

fn from_sqlite(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::Integer(i),
        ValueRef::Real(f) => Value::Real(f),
        ValueRef::Text(t) => Value::Text(String::from_utf8_lossy(t).into_owned()),
        ValueRef::Blob(b) => Value::Blob(b.to_vec()),
    }
}
