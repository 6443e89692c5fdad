//! DuckDB-based engine
//!
//! Serves native DuckDB databases and, through DuckDB's scanner extensions,
//! PostgreSQL, MySQL and MariaDB servers attached as the `source_db` catalog.
//! Every raw connection is a clone of one root connection, so in-memory
//! databases are shared by all sessions of a connection.

use super::{Engine, RawConnection};
use crate::driver::{BackendUrl, Driver};
use crate::error::{Error, Result};
use crate::types::{Column, ResultSet, Row, Value};
use duckdb::types::{TimeUnit, ToSqlOutput, Value as DuckValue};
use parking_lot::Mutex;

/// Catalog name external databases are attached under
const ATTACHED_CATALOG: &str = "source_db";

/// Database query engine using DuckDB
pub struct DuckDbEngine {
    driver: Driver,
    /// Root connection; `None` once disposed
    root: Mutex<Option<duckdb::Connection>>,
    /// Whether an external database is attached as `source_db`
    attached: bool,
    /// Masked URL for messages
    target: String,
}

impl DuckDbEngine {
    /// Open a native DuckDB database (file or in-memory)
    pub fn open(url: &BackendUrl) -> Result<Self> {
        let target = url.masked();
        let conn = if url.is_memory() {
            duckdb::Connection::open_in_memory()
        } else {
            // is_memory() is false only when a database path is present
            duckdb::Connection::open(url.database().unwrap_or_default())
        }
        .map_err(|e| Error::connect_failed(&target, format!("Failed to open DuckDB: {e}")))?;

        tracing::debug!("Opened DuckDB database {}", target);

        Ok(Self {
            driver: url.driver(),
            root: Mutex::new(Some(conn)),
            attached: false,
            target,
        })
    }

    /// Attach an external PostgreSQL / MySQL / MariaDB database
    pub fn attach(url: &BackendUrl) -> Result<Self> {
        let target = url.masked();
        let conn = duckdb::Connection::open_in_memory()
            .map_err(|e| Error::connect_failed(&target, format!("Failed to create DuckDB connection: {e}")))?;

        let (extension, db_type, dbname_key) = match url.driver() {
            Driver::Postgresql => ("postgres", "POSTGRES", "dbname"),
            Driver::Mysql | Driver::Mariadb => ("mysql", "MYSQL", "database"),
            other => {
                return Err(Error::connect_failed(
                    &target,
                    format!("{other} cannot be attached through DuckDB"),
                ))
            }
        };

        conn.execute_batch(&format!("INSTALL {extension}; LOAD {extension};"))
            .map_err(|e| {
                Error::connect_failed(&target, format!("Failed to load {extension} extension: {e}"))
            })?;

        let attach_sql = format!(
            "ATTACH '{}' AS {ATTACHED_CATALOG} (TYPE {db_type});",
            sql_literal(&attach_string(url, dbname_key))
        );
        conn.execute_batch(&attach_sql).map_err(|e| {
            let message = hide_password(&e.to_string(), url.password());
            Error::connect_failed(&target, format!("Failed to attach {db_type}: {message}"))
        })?;

        tracing::debug!("Attached {} as {}", target, ATTACHED_CATALOG);

        Ok(Self {
            driver: url.driver(),
            root: Mutex::new(Some(conn)),
            attached: true,
            target,
        })
    }

    pub fn is_attached(&self) -> bool {
        self.attached
    }
}

impl Engine for DuckDbEngine {
    fn driver(&self) -> Driver {
        self.driver
    }

    fn connect(&self) -> Result<Box<dyn RawConnection>> {
        let root = self.root.lock();
        let root = root
            .as_ref()
            .ok_or_else(|| Error::connect_failed(&self.target, "engine disposed"))?;

        let conn = root
            .try_clone()
            .map_err(|e| Error::connect_failed(&self.target, e.to_string()))?;

        if self.attached {
            conn.execute_batch(&format!("USE {ATTACHED_CATALOG};"))
                .map_err(|e| Error::connect_failed(&self.target, e.to_string()))?;
        }

        Ok(Box::new(DuckDbConnection {
            conn,
            attached: self.attached,
        }))
    }

    fn dispose(&self) {
        self.root.lock().take();
    }
}

/// One DuckDB connection
///
/// DuckDB reports DML row counts as a one-row `Count` result, the same way
/// its own Python cursor does; those rows are passed through untouched.
pub struct DuckDbConnection {
    conn: duckdb::Connection,
    attached: bool,
}

impl RawConnection for DuckDbConnection {
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet> {
        let mut stmt = self.conn.prepare(sql)?;
        let mut rows = stmt.query(duckdb::params_from_iter(params.iter()))?;

        let columns: Vec<Column> = rows
            .as_ref()
            .map(|s| s.column_names().into_iter().map(Column::new).collect())
            .unwrap_or_default();
        let width = columns.len();

        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let mut values = Vec::with_capacity(width);
            for i in 0..width {
                let value: DuckValue = row.get(i)?;
                values.push(from_duckdb(value));
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
        let query = if self.attached {
            "SELECT table_schema || '.' || table_name AS full_name
             FROM information_schema.tables
             WHERE table_catalog = 'source_db'
               AND table_schema NOT IN ('information_schema', 'pg_catalog', 'mysql', 'performance_schema', 'sys')
             ORDER BY table_schema, table_name"
        } else {
            "SELECT table_name
             FROM information_schema.tables
             WHERE table_catalog = current_database() AND table_schema = 'main'
             ORDER BY table_name"
        };

        let mut stmt = self.conn.prepare(query)?;
        let tables = stmt
            .query_map([], |row| row.get(0))?
            .collect::<duckdb::Result<Vec<String>>>()?;
        Ok(tables)
    }

    fn supports_savepoints(&self) -> bool {
        false
    }
}

impl duckdb::ToSql for Value {
    fn to_sql(&self) -> duckdb::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::Owned(match self {
            Value::Null => DuckValue::Null,
            Value::Boolean(b) => DuckValue::Boolean(*b),
            Value::Integer(i) => DuckValue::BigInt(*i),
            Value::Real(f) => DuckValue::Double(*f),
            Value::Text(s) => DuckValue::Text(s.clone()),
            Value::Blob(b) => DuckValue::Blob(b.clone()),
        }))
    }
}

/// Key/value connection string understood by both scanner extensions
fn attach_string(url: &BackendUrl, dbname_key: &str) -> String {
    let mut parts = Vec::new();
    let mut push = |key: &str, value: Option<String>| {
        if let Some(value) = value {
            parts.push(format!("{key}={value}"));
        }
    };

    push("host", url.host().map(ToString::to_string));
    push("port", url.port().map(|p| p.to_string()));
    push(dbname_key, url.database().map(ToString::to_string));
    push("user", url.username().map(ToString::to_string));
    push("password", url.password().map(ToString::to_string));
    for (key, value) in url.query() {
        push(key, Some(value.clone()));
    }

    parts.join(" ")
}

/// Scanner errors echo the attach string; keep the password out of them
fn hide_password(message: &str, password: Option<&str>) -> String {
    match password {
        Some(password) if !password.is_empty() => message.replace(password, "****"),
        _ => message.to_string(),
    }
}

fn sql_literal(value: &str) -> String {
    value.replace('\'', "''")
}

/// Convert a DuckDB value into a unidb value
fn from_duckdb(value: DuckValue) -> Value {
    match value {
        DuckValue::Null => Value::Null,
        DuckValue::Boolean(b) => Value::Boolean(b),
        DuckValue::TinyInt(i) => Value::Integer(i.into()),
        DuckValue::SmallInt(i) => Value::Integer(i.into()),
        DuckValue::Int(i) => Value::Integer(i.into()),
        DuckValue::BigInt(i) => Value::Integer(i),
        DuckValue::HugeInt(i) => i64::try_from(i).map_or_else(|_| Value::Text(i.to_string()), Value::Integer),
        DuckValue::UTinyInt(i) => Value::Integer(i.into()),
        DuckValue::USmallInt(i) => Value::Integer(i.into()),
        DuckValue::UInt(i) => Value::Integer(i.into()),
        DuckValue::UBigInt(i) => i64::try_from(i).map_or_else(|_| Value::Text(i.to_string()), Value::Integer),
        DuckValue::Float(f) => Value::Real(f64::from(f)),
        DuckValue::Double(f) => Value::Real(f),
        DuckValue::Text(s) => Value::Text(s),
        DuckValue::Blob(b) => Value::Blob(b),
        DuckValue::Timestamp(unit, i) => {
            let micros = to_micros(unit, i);
            let secs = micros.div_euclid(1_000_000);
            let nsecs = (micros.rem_euclid(1_000_000) * 1000) as u32;
            chrono::DateTime::from_timestamp(secs, nsecs).map_or(Value::Integer(i), |dt| {
                Value::Text(dt.format("%Y-%m-%d %H:%M:%S%.6f").to_string())
            })
        }
        DuckValue::Date32(d) => {
            // Days since epoch (719163 is the number of days from 1 CE to 1970-01-01)
            chrono::NaiveDate::from_num_days_from_ce_opt(d + 719_163)
                .map_or(Value::Integer(d.into()), |date| {
                    Value::Text(date.format("%Y-%m-%d").to_string())
                })
        }
        DuckValue::Time64(unit, t) => {
            let micros = to_micros(unit, t);
            let secs = micros / 1_000_000;
            Value::Text(format!(
                "{:02}:{:02}:{:02}.{:06}",
                secs / 3600,
                (secs % 3600) / 60,
                secs % 60,
                micros % 1_000_000
            ))
        }
        other => Value::Text(format!("{other:?}")),
    }
}

fn to_micros(unit: TimeUnit, value: i64) -> i64 {
    match unit {
        TimeUnit::Second => value.saturating_mul(1_000_000),
        TimeUnit::Millisecond => value.saturating_mul(1_000),
        TimeUnit::Microsecond => value,
        TimeUnit::Nanosecond => value / 1_000,
    }
}
