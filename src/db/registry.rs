//! Connection registry.
//!
//! Maps connection names to opened, ping-verified handles for one
//! [`Orm`](crate::db::Orm).
//!
//! # Design
//!
//! - **Lazy**: nothing is dialed until a name is first used
//! - **`OnceCell` per name**: concurrent first use of a name dials once; the
//!   other callers wait for that dial and share its handle
//! - **Failed dials are not cached**: the next use of the name dials again
//!
//! # Thread Safety
//!
//! - `RwLock` protects the name → cell map; it is never held across a dial
//! - Handles are `Arc`-shared and safe for concurrent use

use crate::config::ConfigRepository;
use crate::db::context::OrmContext;
use crate::db::dialector::resolve_connection;
use crate::db::pool::{ConnectionHandle, Dialer};
use crate::error::DbResult;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{OnceCell, RwLock};
use tracing::{debug, info};

type HandleCell = Arc<OnceCell<Arc<ConnectionHandle>>>;

pub struct ConnectionRegistry {
    config: Arc<dyn ConfigRepository>,
    dialer: Arc<dyn Dialer>,
    connections: RwLock<HashMap<String, HandleCell>>,
}

impl ConnectionRegistry {
    pub fn new(config: Arc<dyn ConfigRepository>, dialer: Arc<dyn Dialer>) -> Self {
        Self {
            config,
            dialer,
            connections: RwLock::new(HashMap::new()),
        }
    }

    /// Return the cached handle for `name`, establishing it on first use.
    ///
    /// Establishing means: resolve the dialector from configuration, dial,
    /// ping. The whole step runs under `ctx`.
    pub async fn get_or_connect(
        &self,
        name: &str,
        ctx: &OrmContext,
    ) -> DbResult<Arc<ConnectionHandle>> {
        let cell = self.cell(name).await;

        let handle = cell
            .get_or_try_init(|| async {
                debug!(connection = %name, "Establishing connection");
                let resolved = resolve_connection(self.config.as_ref(), name)?;
                let pool = ctx.run(self.dialer.dial(&resolved)).await?;
                Ok::<_, crate::error::DbError>(Arc::new(ConnectionHandle::new(name, pool)))
            })
            .await?;

        Ok(Arc::clone(handle))
    }

    /// Return the handle for `name` if it has already been established.
    pub async fn get(&self, name: &str) -> Option<Arc<ConnectionHandle>> {
        let connections = self.connections.read().await;
        connections
            .get(name)
            .and_then(|cell| cell.get())
            .map(Arc::clone)
    }

    /// Names with an established handle.
    pub async fn names(&self) -> Vec<String> {
        let connections = self.connections.read().await;
        let mut names: Vec<String> = connections
            .iter()
            .filter(|(_, cell)| cell.initialized())
            .map(|(name, _)| name.clone())
            .collect();
        names.sort();
        names
    }

    /// Number of established handles.
    pub async fn len(&self) -> usize {
        let connections = self.connections.read().await;
        connections.values().filter(|cell| cell.initialized()).count()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Close every established handle and forget all names.
    pub async fn close_all(&self) {
        // Drain under the lock, close outside it
        let drained: Vec<_> = {
            let mut connections = self.connections.write().await;
            connections.drain().collect()
        };

        for (name, cell) in drained {
            if let Some(handle) = cell.get() {
                info!(connection = %name, "Closing connection");
                handle.pool().close().await;
            }
        }
    }

    async fn cell(&self, name: &str) -> HandleCell {
        {
            let connections = self.connections.read().await;
            if let Some(cell) = connections.get(name) {
                return Arc::clone(cell);
            }
        }
        let mut connections = self.connections.write().await;
        // Double-check after acquiring write lock
        Arc::clone(
            connections
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }
}

impl std::fmt::Debug for ConnectionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionRegistry").finish_non_exhaustive()
    }
}
