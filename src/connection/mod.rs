//! Connections
//!
//! A `Connection` owns one engine handle and the pool of raw connections
//! leased from it. Handles are cheap to clone; every clone refers to the
//! same connection. The lifecycle is `Open -> Closed` with no way back.
//!
//! Units of work run through the scoped runners, which commit on success,
//! roll back on failure and always release the session:
//!
//! ```rust,ignore
//! let names = connection.with_session(|session| {
//!     session.execute("SELECT name FROM users", &[])?.fetch_all()
//! })?;
//! ```

mod identity;
mod metadata;

pub use identity::ConnectionId;
pub use metadata::MetadataCache;

use crate::driver::{resolve, BackendUrl, ConnectOptions, Driver};
use crate::engine::{Engine, EngineFactory, NativeEngineFactory};
use crate::error::{Error, Result};
use crate::pool::{Pool, PoolConfig, PoolStatus};
use crate::session::{Session, SessionCounters, SessionShared};
use parking_lot::Mutex;
use serde::Serialize;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Session counters of one connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct ConnectionStats {
    pub sessions_opened: u64,
    pub sessions_closed: u64,
}

impl ConnectionStats {
    /// Sessions opened and not yet closed
    pub fn sessions_active(&self) -> u64 {
        self.sessions_opened.saturating_sub(self.sessions_closed)
    }
}

/// Handle to one open backend connection
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionInner>,
}

struct ConnectionInner {
    id: ConnectionId,
    url: BackendUrl,
    engine: Arc<dyn Engine>,
    pool: Pool,
    closed: Arc<AtomicBool>,
    /// Sessions in opening order; the last open one is the active session
    sessions: Mutex<Vec<Weak<SessionShared>>>,
    counters: Arc<SessionCounters>,
    metadata: Arc<MetadataCache>,
}

impl Connection {
    /// Open a standalone connection with the native engines
    ///
    /// Standalone connections are not registered anywhere; use a `Registry`
    /// (or `unidb::connect`) to share one connection per identity.
    pub fn open(options: &ConnectOptions) -> Result<Self> {
        let (driver, url) = resolve(options)?;
        Self::open_with(
            ConnectionId::from_options(options, driver),
            url,
            &NativeEngineFactory,
            &PoolConfig::default(),
            Arc::new(MetadataCache::new()),
        )
    }

    /// Create the engine handle and prove the backend is reachable
    pub(crate) fn open_with(
        id: ConnectionId,
        url: BackendUrl,
        factory: &dyn EngineFactory,
        pool_config: &PoolConfig,
        metadata: Arc<MetadataCache>,
    ) -> Result<Self> {
        let engine = factory.create(&url)?;
        let pool = Pool::new(id.as_str(), Arc::clone(&engine), pool_config);

        if let Err(e) = pool.acquire() {
            pool.close();
            engine.dispose();
            return Err(match e {
                Error::ConnectFailed { .. } => e,
                other => Error::connect_failed(url.masked(), other.to_string()),
            });
        }

        tracing::info!("Opened connection {} ({})", id, url.masked());

        Ok(Self {
            inner: Arc::new(ConnectionInner {
                id,
                url,
                engine,
                pool,
                closed: Arc::new(AtomicBool::new(false)),
                sessions: Mutex::new(Vec::new()),
                counters: Arc::new(SessionCounters::default()),
                metadata,
            }),
        })
    }

    pub fn id(&self) -> &ConnectionId {
        &self.inner.id
    }

    pub fn driver(&self) -> Driver {
        self.inner.url.driver()
    }

    /// Backend URL; render it with `masked()` before logging
    pub fn url(&self) -> &BackendUrl {
        &self.inner.url
    }

    /// Whether two handles refer to the same connection
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    // ========================================================================
    // Sessions
    // ========================================================================

    /// Lease a raw connection and open a session on it
    ///
    /// Blocks while the pool is exhausted, up to the acquire timeout.
    pub fn session(&self) -> Result<Session> {
        self.ensure_open()?;
        let lease = self.inner.pool.acquire()?;
        Ok(self.track(lease))
    }

    /// DB-API spelling of `session`
    pub fn cursor(&self) -> Result<Session> {
        self.session()
    }

    /// Like `session`, but yields to the runtime while the pool is exhausted
    pub async fn session_async(&self) -> Result<Session> {
        self.ensure_open()?;
        let lease = self.inner.pool.acquire_async().await?;
        Ok(self.track(lease))
    }

    /// Run a unit of work in a fresh session
    ///
    /// Commits when `work` succeeds and rolls back when it fails. The session
    /// is closed on every exit path. The unit's error is returned unchanged;
    /// a failing rollback after it is only logged.
    pub fn with_session<T, E, F>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(&Session) -> std::result::Result<T, E>,
        E: From<Error>,
    {
        let session = self.session()?;
        let outcome = work(&session);
        self.finish(&session, outcome)
    }

    /// Run an async unit of work in a fresh session
    ///
    /// The session is handed to the future and stays leased across its
    /// suspension points. Any handle the future keeps is dead once this
    /// returns.
    pub async fn with_session_async<T, E, F, Fut>(&self, work: F) -> std::result::Result<T, E>
    where
        F: FnOnce(Session) -> Fut,
        Fut: Future<Output = std::result::Result<T, E>>,
        E: From<Error>,
    {
        let session = self.session_async().await?;
        let handle = session.share();
        let outcome = work(session).await;
        self.finish(&handle, outcome)
    }

    fn finish<T, E>(&self, session: &Session, outcome: std::result::Result<T, E>) -> std::result::Result<T, E>
    where
        E: From<Error>,
    {
        match outcome {
            Ok(value) => {
                let committed = session.commit();
                session.close();
                committed?;
                Ok(value)
            }
            Err(e) => {
                if let Err(cleanup) = session.rollback() {
                    tracing::warn!("Rollback after failed unit of work on {}: {}", self.inner.id, cleanup);
                }
                session.close();
                Err(e)
            }
        }
    }

    fn track(&self, lease: crate::pool::Lease) -> Session {
        let session = Session::new(
            self.inner.id.as_str(),
            lease,
            Arc::clone(&self.inner.closed),
            Arc::clone(&self.inner.counters),
        );

        let mut sessions = self.inner.sessions.lock();
        sessions.retain(|s| s.upgrade().is_some_and(|s| !s.is_closed()));
        sessions.push(session.downgrade());
        session
    }

    fn active_session(&self) -> Option<Session> {
        let sessions = self.inner.sessions.lock();
        sessions
            .iter()
            .rev()
            .filter_map(Session::upgrade)
            .find(|s| !s.is_closed())
    }

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Commit the active session's transaction; no-op without one
    pub fn commit(&self) -> Result<()> {
        self.ensure_open()?;
        match self.active_session() {
            Some(session) => session.commit(),
            None => Ok(()),
        }
    }

    /// Roll back the active session's transaction; no-op without one
    pub fn rollback(&self) -> Result<()> {
        self.ensure_open()?;
        match self.active_session() {
            Some(session) => session.rollback(),
            None => Ok(()),
        }
    }

    // ========================================================================
    // Metadata
    // ========================================================================

    /// Relation names, reflected on first request and cached until close
    pub fn table_names(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.inner.metadata.get_or_load(
            &self.inner.id,
            || self.load_table_names(),
            || !self.is_closed(),
        )
    }

    /// Reflect relation names again, replacing the cached entry
    pub fn refresh_tables(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        self.inner.metadata.refresh(
            &self.inner.id,
            || self.load_table_names(),
            || !self.is_closed(),
        )
    }

    fn load_table_names(&self) -> Result<Vec<String>> {
        if let Some(mut lease) = self.inner.pool.try_acquire()? {
            return lease.raw()?.table_names();
        }
        // every raw connection is leased; reflect through an open session
        if let Some(session) = self.active_session() {
            return session.table_names();
        }
        let mut lease = self.inner.pool.acquire()?;
        lease.raw()?.table_names()
    }

    // ========================================================================
    // Status & lifecycle
    // ========================================================================

    pub fn pool_status(&self) -> PoolStatus {
        self.inner.pool.status()
    }

    pub fn stats(&self) -> ConnectionStats {
        ConnectionStats {
            sessions_opened: self.inner.counters.opened.load(Ordering::SeqCst),
            sessions_closed: self.inner.counters.closed.load(Ordering::SeqCst),
        }
    }

    /// Close the pool, dispose the engine and drop cached metadata; idempotent
    ///
    /// Outstanding sessions fail with `ConnectionClosed` from here on and
    /// their raw connections are discarded when released.
    pub fn close(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.inner.pool.close();
        self.inner.engine.dispose();
        self.inner.metadata.invalidate(&self.inner.id);
        self.inner.sessions.lock().clear();
        tracing::info!("Closed connection {}", self.inner.id);
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            Err(Error::connection_closed(self.inner.id.as_str()))
        } else {
            Ok(())
        }
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.inner.id)
            .field("url", &self.inner.url.masked())
            .field("closed", &self.is_closed())
            .finish()
    }
}
