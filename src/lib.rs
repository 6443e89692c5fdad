// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # unidb
//!
//! One connection, session and cursor API over SQLite, DuckDB, PostgreSQL,
//! MySQL and MariaDB.
//!
//! ## Features
//!
//! - **One identity, one connection**: a registry hands out the same
//!   connection for the same target, opened exactly once even under races
//! - **Scoped units of work**: `with_session` / `with_session_async` commit
//!   on success, roll back on failure and always release the session
//! - **Bounded pools**: each connection leases raw connections from its own
//!   pool with backpressure and an acquire timeout
//! - **DB-API cursor surface**: `execute`, `execute_many`, `fetch_one`,
//!   `fetch_many`, `fetch_all`, `description`, `rowcount`, `arraysize`
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use unidb::{params, ConnectOptions, Result};
//!
//! fn main() -> Result<()> {
//!     let connection = unidb::connect(&ConnectOptions::new("sqlite").database("app.db"))?;
//!
//!     let rows = connection.with_session(|session| {
//!         session.execute("CREATE TABLE users (id INTEGER, name TEXT)", &[])?;
//!         session.execute_many(
//!             "INSERT INTO users VALUES (?, ?)",
//!             [params![1, "ian"], params![2, "pierre"], params![3, "jacques"]],
//!         )?;
//!         session.execute("SELECT * FROM users", &[])?.fetch_all()
//!     })?;
//!
//!     println!("{rows:?}");
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Registry          identity -> Connection (get-or-create)     │
//! └──────────────────────────────┬───────────────────────────────┘
//!                                │
//! ┌──────────────────────────────┴───────────────────────────────┐
//! │ Connection        engine handle + pool + metadata side-table │
//! └──────────┬─────────────────────────────────────┬─────────────┘
//!            │                                     │
//! ┌──────────┴──────────┐               ┌──────────┴─────────────┐
//! │ Session / Cursor    │  leases from  │ Pool                   │
//! │ execute, fetch_*    │──────────────>│ Condvar + Notify       │
//! └─────────────────────┘               └──────────┬─────────────┘
//!                                                  │
//!                         ┌────────────────────────┴─────────────┐
//!                         │ Engine: rusqlite │ DuckDB (+ATTACH)  │
//!                         └──────────────────────────────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types
pub mod error;

/// SQL values, rows and columns
pub mod types;

/// Driver kinds and URL resolution
pub mod driver;

/// Engine collaborators and the native engines
pub mod engine;

/// Raw connection pooling
pub mod pool;

/// Sessions and cursors
pub mod session;

/// Connections and scoped units of work
pub mod connection;

/// Identity -> connection registry
pub mod registry;

/// Settings file for the binary
pub mod config;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use connection::{Connection, ConnectionId, ConnectionStats};
pub use driver::{resolve, BackendUrl, ConnectOptions, Driver};
pub use engine::{Engine, EngineFactory, NativeEngineFactory, RawConnection};
pub use error::{Error, Result};
pub use pool::{PoolConfig, PoolStatus};
pub use registry::Registry;
pub use session::{Cursor, Session};
pub use types::{Column, ResultSet, Row, Value};

/// Connect through the process-wide registry
///
/// Returns the existing connection when one is already registered for the
/// same identity.
pub fn connect(options: &ConnectOptions) -> Result<Connection> {
    Registry::global().add_connection(options)
}

/// DB-API level implemented by the session surface
pub const APILEVEL: &str = "2.0";

/// Connections may be shared between threads; sessions may not be shared
/// between units of work
pub const THREADSAFETY: u8 = 2;

/// Placeholder style accepted by `execute`
pub const PARAMSTYLE: &str = "qmark";

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
