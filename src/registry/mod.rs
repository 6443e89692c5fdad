//! Connection registry
//!
//! Maps identities to open connections. Creation is get-or-create per
//! identity: the map lock is only held to find or insert a slot, and the
//! slot's once-cell serializes opening, so distinct identities open in
//! parallel while one identity is opened exactly once.

use crate::connection::{Connection, ConnectionId, MetadataCache};
use crate::driver::{resolve, ConnectOptions};
use crate::engine::{EngineFactory, NativeEngineFactory};
use crate::error::{Error, Result};
use crate::pool::PoolConfig;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

type Slot = Arc<OnceCell<Connection>>;

static GLOBAL: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Identity -> connection map
pub struct Registry {
    factory: Arc<dyn EngineFactory>,
    pool_config: PoolConfig,
    metadata: Arc<MetadataCache>,
    slots: RwLock<HashMap<ConnectionId, Slot>>,
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl Registry {
    /// Registry over the native engines with default pool settings
    pub fn new() -> Self {
        Self::with_factory(Arc::new(NativeEngineFactory))
    }

    pub fn with_factory(factory: Arc<dyn EngineFactory>) -> Self {
        Self {
            factory,
            pool_config: PoolConfig::default(),
            metadata: Arc::new(MetadataCache::new()),
            slots: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_pool_config(mut self, config: PoolConfig) -> Self {
        self.pool_config = config;
        self
    }

    /// Lazily created process-wide registry behind `unidb::connect`
    pub fn global() -> &'static Registry {
        &GLOBAL
    }

    /// Return the connection for these options, opening it on first use
    ///
    /// Unknown drivers fail with `UnsupportedDriver` and unreachable
    /// backends with `ConnectFailed`; neither leaves an entry behind. If the
    /// identity is closed while it is still opening, the new connection is
    /// closed as well and `ConnectionClosed` is returned.
    pub fn add_connection(&self, options: &ConnectOptions) -> Result<Connection> {
        let (driver, url) = resolve(options)?;
        let id = ConnectionId::from_options(options, driver);

        loop {
            let slot = self.slot(&id);
            let opened = slot.get_or_try_init(|| {
                Connection::open_with(
                    id.clone(),
                    url.clone(),
                    self.factory.as_ref(),
                    &self.pool_config,
                    Arc::clone(&self.metadata),
                )
            });

            match opened {
                Ok(connection) if !self.is_mapped(&id, &slot) => {
                    // closed through the registry while it was opening
                    connection.close();
                    return Err(Error::connection_closed(id.as_str()));
                }
                Ok(connection) if connection.is_closed() => {
                    // closed behind our back; replace it
                    self.remove_slot(&id, &slot);
                }
                Ok(connection) => {
                    tracing::debug!("Connection {} ready", id);
                    return Ok(connection.clone());
                }
                Err(e) => {
                    self.remove_slot(&id, &slot);
                    return Err(e);
                }
            }
        }
    }

    /// Open connection registered under `id`
    pub fn get(&self, id: &str) -> Option<Connection> {
        let found = self
            .slots
            .read()
            .get(id)
            .and_then(|slot| slot.get().cloned())
            .filter(|c| !c.is_closed());
        if found.is_none() {
            tracing::debug!("No connection registered for {}", id);
        }
        found
    }

    /// Snapshot of the registered connections that are still open
    pub fn connections(&self) -> impl Iterator<Item = Connection> {
        let snapshot: Vec<Connection> = self
            .slots
            .read()
            .values()
            .filter_map(|slot| slot.get().cloned())
            .filter(|c| !c.is_closed())
            .collect();
        snapshot.into_iter()
    }

    /// Close and forget the connection under `id`; no-op if absent
    pub fn close(&self, id: &str) {
        let removed = self.slots.write().remove(id);
        if let Some(connection) = removed.as_ref().and_then(|slot| slot.get()) {
            connection.close();
        }
    }

    /// Close and forget every connection
    pub fn close_all(&self) {
        let drained: Vec<Slot> = self.slots.write().drain().map(|(_, slot)| slot).collect();
        for connection in drained.iter().filter_map(|slot| slot.get()) {
            connection.close();
        }
    }

    pub fn len(&self) -> usize {
        self.slots
            .read()
            .values()
            .filter(|slot| slot.get().is_some_and(|c| !c.is_closed()))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn slot(&self, id: &ConnectionId) -> Slot {
        if let Some(slot) = self.slots.read().get(id) {
            return Arc::clone(slot);
        }
        Arc::clone(self.slots.write().entry(id.clone()).or_default())
    }

    fn is_mapped(&self, id: &ConnectionId, slot: &Slot) -> bool {
        self.slots
            .read()
            .get(id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
    }

    /// Drop `slot` from the map unless another caller already replaced it
    fn remove_slot(&self, id: &ConnectionId, slot: &Slot) {
        let mut slots = self.slots.write();
        if slots.get(id).is_some_and(|current| Arc::ptr_eq(current, slot)) {
            slots.remove(id);
        }
    }
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let ids: Vec<ConnectionId> = self.slots.read().keys().cloned().collect();
        f.debug_struct("Registry")
            .field("connections", &ids)
            .field("pool_config", &self.pool_config)
            .finish()
    }
}
