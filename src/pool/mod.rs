//! Raw connection pool
//!
//! Each connection owns one pool over its engine handle. Leasing beyond
//! capacity waits for a release (backpressure) until the optional acquire
//! timeout elapses. Blocking callers wait on a condition variable, async
//! callers on a `tokio::sync::Notify`; every release wakes both.

use crate::engine::{Engine, RawConnection};
use crate::error::{Error, Result};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;

/// Default maximum number of raw connections per pool
pub const DEFAULT_MAX_SIZE: usize = 5;

/// Default time to wait for a free raw connection
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

/// Pool sizing and wait policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    /// Maximum raw connections leased or idle at once
    pub max_size: usize,
    /// How long a lease may wait; `None` waits forever
    pub acquire_timeout: Option<Duration>,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_size: DEFAULT_MAX_SIZE,
            acquire_timeout: Some(DEFAULT_ACQUIRE_TIMEOUT),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_size(mut self, max_size: usize) -> Self {
        self.max_size = max_size.max(1);
        self
    }

    pub fn with_acquire_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.acquire_timeout = timeout;
        self
    }
}

/// Snapshot of pool occupancy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PoolStatus {
    pub max_size: usize,
    pub idle: usize,
    pub leased: usize,
    pub closed: bool,
}

struct PoolState {
    idle: Vec<Box<dyn RawConnection>>,
    leased: usize,
    closed: bool,
}

struct PoolInner {
    /// Identity of the owning connection, for errors and logs
    identity: String,
    engine: Arc<dyn Engine>,
    max_size: usize,
    acquire_timeout: Option<Duration>,
    state: Mutex<PoolState>,
    available: Condvar,
    released: Notify,
}

/// Bounded pool of raw connections over one engine handle
#[derive(Clone)]
pub struct Pool {
    inner: Arc<PoolInner>,
}

impl Pool {
    pub fn new(identity: impl Into<String>, engine: Arc<dyn Engine>, config: &PoolConfig) -> Self {
        let max_size = engine
            .max_connections()
            .map_or(config.max_size, |limit| limit.min(config.max_size))
            .max(1);

        Self {
            inner: Arc::new(PoolInner {
                identity: identity.into(),
                engine,
                max_size,
                acquire_timeout: config.acquire_timeout,
                state: Mutex::new(PoolState {
                    idle: Vec::new(),
                    leased: 0,
                    closed: false,
                }),
                available: Condvar::new(),
                released: Notify::new(),
            }),
        }
    }

    /// Lease a raw connection, blocking while the pool is exhausted
    pub fn acquire(&self) -> Result<Lease> {
        let deadline = self.inner.acquire_timeout.map(|t| Instant::now() + t);
        let mut state = self.inner.state.lock();
        let mut timed_out = false;

        loop {
            match self.claim(&mut state)? {
                Claim::Idle(raw) => return Ok(self.lease(raw)),
                Claim::Open => {
                    drop(state);
                    return self.open_new();
                }
                Claim::Exhausted if timed_out => return Err(self.timeout_error()),
                Claim::Exhausted => {}
            }

            match deadline {
                Some(deadline) => {
                    timed_out = self
                        .inner
                        .available
                        .wait_until(&mut state, deadline)
                        .timed_out();
                }
                None => self.inner.available.wait(&mut state),
            }
        }
    }

    /// Lease a raw connection, yielding to the runtime while the pool is exhausted
    pub async fn acquire_async(&self) -> Result<Lease> {
        let deadline = self
            .inner
            .acquire_timeout
            .map(|t| tokio::time::Instant::now() + t);

        loop {
            let notified = self.inner.released.notified();
            tokio::pin!(notified);
            // register before checking so a release in between is not lost
            notified.as_mut().enable();

            let claim = {
                let mut state = self.inner.state.lock();
                self.claim(&mut state)?
            };
            match claim {
                Claim::Idle(raw) => return Ok(self.lease(raw)),
                Claim::Open => return self.open_new(),
                Claim::Exhausted => {}
            }

            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return Err(self.timeout_error());
                    }
                }
                None => notified.await,
            }
        }
    }

    /// Lease a raw connection only if one is free right now
    pub fn try_acquire(&self) -> Result<Option<Lease>> {
        let claim = {
            let mut state = self.inner.state.lock();
            self.claim(&mut state)?
        };
        match claim {
            Claim::Idle(raw) => Ok(Some(self.lease(raw))),
            Claim::Open => self.open_new().map(Some),
            Claim::Exhausted => Ok(None),
        }
    }

    /// Close the pool: idle connections are dropped, leased ones are
    /// discarded when released, and waiters fail with `ConnectionClosed`
    pub fn close(&self) {
        let idle = {
            let mut state = self.inner.state.lock();
            state.closed = true;
            std::mem::take(&mut state.idle)
        };
        drop(idle);
        self.wake_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    pub fn status(&self) -> PoolStatus {
        let state = self.inner.state.lock();
        PoolStatus {
            max_size: self.inner.max_size,
            idle: state.idle.len(),
            leased: state.leased,
            closed: state.closed,
        }
    }

    pub fn max_size(&self) -> usize {
        self.inner.max_size
    }

    fn claim(&self, state: &mut PoolState) -> Result<Claim> {
        if state.closed {
            return Err(Error::connection_closed(&self.inner.identity));
        }
        if let Some(raw) = state.idle.pop() {
            state.leased += 1;
            return Ok(Claim::Idle(raw));
        }
        if state.leased < self.inner.max_size {
            // reserve the slot before connecting outside the lock
            state.leased += 1;
            return Ok(Claim::Open);
        }
        Ok(Claim::Exhausted)
    }

    fn open_new(&self) -> Result<Lease> {
        match self.inner.engine.connect() {
            Ok(raw) => {
                tracing::debug!("Opened raw connection for {}", self.inner.identity);
                Ok(self.lease(raw))
            }
            Err(e) => {
                self.inner.state.lock().leased -= 1;
                self.wake_one();
                Err(e)
            }
        }
    }

    fn lease(&self, raw: Box<dyn RawConnection>) -> Lease {
        Lease {
            raw: Some(raw),
            pool: self.clone(),
        }
    }

    fn release(&self, mut raw: Box<dyn RawConnection>) {
        let reusable = !self.is_closed() && raw.is_valid();
        {
            let mut state = self.inner.state.lock();
            state.leased -= 1;
            if reusable && !state.closed {
                state.idle.push(raw);
            } else {
                tracing::debug!("Discarding raw connection for {}", self.inner.identity);
            }
        }
        self.wake_one();
    }

    fn wake_one(&self) {
        self.inner.available.notify_one();
        self.inner.released.notify_waiters();
    }

    fn wake_all(&self) {
        self.inner.available.notify_all();
        self.inner.released.notify_waiters();
    }

    fn timeout_error(&self) -> Error {
        Error::PoolTimeout {
            identity: self.inner.identity.clone(),
            timeout_ms: self
                .inner
                .acquire_timeout
                .map_or(0, |t| t.as_millis() as u64),
        }
    }
}

impl std::fmt::Debug for Pool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("identity", &self.inner.identity)
            .field("status", &self.status())
            .finish()
    }
}

enum Claim {
    Idle(Box<dyn RawConnection>),
    Open,
    Exhausted,
}

/// A leased raw connection; returned to its pool on drop
pub struct Lease {
    raw: Option<Box<dyn RawConnection>>,
    pool: Pool,
}

impl Lease {
    /// The leased connection; only missing once the lease is being dropped
    pub fn raw(&mut self) -> Result<&mut Box<dyn RawConnection>> {
        match self.raw {
            Some(ref mut raw) => Ok(raw),
            None => Err(Error::connection_closed(&self.pool.inner.identity)),
        }
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        if let Some(raw) = self.raw.take() {
            self.pool.release(raw);
        }
    }
}
