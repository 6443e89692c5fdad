//! SQL engine collaborators
//!
//! The core never talks to a database directly. It asks an `EngineFactory`
//! for an `Engine` handle per connection, leases `RawConnection`s from it,
//! and disposes the handle on close.
//!
//! # Native engines
//!
//! | Driver | Engine |
//! |--------|--------|
//! | `sqlite` | `rusqlite` (bundled) |
//! | `duckdb` | `duckdb` (bundled) |
//! | `postgresql` | DuckDB + `postgres` extension (`ATTACH … TYPE POSTGRES`) |
//! | `mysql`, `mariadb` | DuckDB + `mysql` extension (`ATTACH … TYPE MYSQL`) |
//! | `mssql`, ODBC DSNs | none compiled in, opening fails with `ConnectFailed` |

mod duckdb_engine;
mod sqlite_engine;

pub use duckdb_engine::{DuckDbConnection, DuckDbEngine};
pub use sqlite_engine::{SqliteConnection, SqliteEngine};

use crate::driver::{BackendUrl, Driver};
use crate::error::{Error, Result};
use crate::types::{ResultSet, Value};
use std::sync::Arc;

/// One live backend connection, leased to a single session at a time
pub trait RawConnection: Send {
    /// Run one statement with `?` parameters and materialize its result
    fn execute(&mut self, sql: &str, params: &[Value]) -> Result<ResultSet>;

    /// Run one or more statements without parameters or results
    fn execute_batch(&mut self, sql: &str) -> Result<()>;

    /// Names of the relations visible on this connection
    fn table_names(&mut self) -> Result<Vec<String>>;

    fn begin(&mut self) -> Result<()> {
        self.execute_batch("BEGIN")
    }

    fn commit(&mut self) -> Result<()> {
        self.execute_batch("COMMIT")
    }

    fn rollback(&mut self) -> Result<()> {
        self.execute_batch("ROLLBACK")
    }

    /// Whether `SAVEPOINT` / `ROLLBACK TO SAVEPOINT` are available
    fn supports_savepoints(&self) -> bool {
        true
    }

    /// Cheap liveness probe used before a connection goes back to the pool
    fn is_valid(&mut self) -> bool {
        self.execute("SELECT 1", &[]).is_ok()
    }
}

/// An open handle to one backend, possibly backing many raw connections
pub trait Engine: Send + Sync {
    fn driver(&self) -> Driver;

    /// Open a new raw connection
    fn connect(&self) -> Result<Box<dyn RawConnection>>;

    /// Release everything the handle holds; later `connect` calls fail
    fn dispose(&self);

    /// Upper bound on simultaneous raw connections, if the backend has one
    fn max_connections(&self) -> Option<usize> {
        None
    }
}

/// Creates engine handles from resolved URLs
pub trait EngineFactory: Send + Sync {
    fn create(&self, url: &BackendUrl) -> Result<Arc<dyn Engine>>;
}

/// Factory for the engines compiled into this crate
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeEngineFactory;

impl EngineFactory for NativeEngineFactory {
    fn create(&self, url: &BackendUrl) -> Result<Arc<dyn Engine>> {
        if url.odbc_connect().is_some() {
            return Err(Error::connect_failed(
                url.masked(),
                "ODBC data sources are not supported by the native engines",
            ));
        }

        match url.driver() {
            Driver::Sqlite => Ok(Arc::new(SqliteEngine::open(url)?)),
            Driver::Duckdb => Ok(Arc::new(DuckDbEngine::open(url)?)),
            Driver::Postgresql | Driver::Mysql | Driver::Mariadb => {
                Ok(Arc::new(DuckDbEngine::attach(url)?))
            }
            Driver::Mssql => Err(Error::connect_failed(
                url.masked(),
                "no native engine for mssql (not compiled)",
            )),
        }
    }
}
