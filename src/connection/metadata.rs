//! Lazily reflected relation names, kept beside connections
//!
//! Entries are filled on first request and dropped when their connection
//! closes. Loaders run outside the lock; a result is only stored while its
//! connection is still live, checked under the write lock so it cannot
//! land after `invalidate`.

use super::identity::ConnectionId;
use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct MetadataCache {
    tables: RwLock<HashMap<ConnectionId, Vec<String>>>,
}

impl MetadataCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached names for `id`, loading them on first request
    pub fn get_or_load<F, L>(&self, id: &ConnectionId, load: F, live: L) -> Result<Vec<String>>
    where
        F: FnOnce() -> Result<Vec<String>>,
        L: FnOnce() -> bool,
    {
        if let Some(tables) = self.tables.read().get(id) {
            return Ok(tables.clone());
        }
        self.refresh(id, load, live)
    }

    /// Reload names for `id`, replacing any cached entry
    ///
    /// `live` is asked under the write lock; when it says the connection
    /// is gone the names are returned but not cached.
    pub fn refresh<F, L>(&self, id: &ConnectionId, load: F, live: L) -> Result<Vec<String>>
    where
        F: FnOnce() -> Result<Vec<String>>,
        L: FnOnce() -> bool,
    {
        let tables = load()?;
        let mut cached = self.tables.write();
        if live() {
            tracing::debug!("Reflected {} relations for {}", tables.len(), id);
            cached.insert(id.clone(), tables.clone());
        } else {
            tracing::debug!("Dropping reflection for closed connection {}", id);
        }
        Ok(tables)
    }

    pub fn invalidate(&self, id: &ConnectionId) {
        self.tables.write().remove(id);
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.tables.read().contains_key(id)
    }
}
