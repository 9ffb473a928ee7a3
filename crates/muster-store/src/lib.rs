//! muster-store — persisted placement state.
//!
//! Backed by [redb](https://docs.rs/redb), keeps the `swarm_id →
//! {engine_id, container_id, config}` mapping the coordinator uses to
//! reconcile and reschedule containers after a restart. Values are
//! JSON-serialized into redb's `&[u8]` column; an in-memory backend backs
//! the tests.

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use muster_engine::ContainerConfig;

/// Placements keyed by swarm id.
const PLACEMENTS: TableDefinition<&str, &[u8]> = TableDefinition::new("placements");

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors that can occur during placement-store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to open database: {0}")]
    Open(String),

    #[error("transaction error: {0}")]
    Transaction(String),

    #[error("table error: {0}")]
    Table(String),

    #[error("read error: {0}")]
    Read(String),

    #[error("write error: {0}")]
    Write(String),

    #[error("serialization error: {0}")]
    Serialize(String),
}

/// Convert any `Display` error into a `StoreError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StoreError::$variant(e.to_string())
    };
}

/// One placed container as the coordinator last saw it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacedContainer {
    pub swarm_id: String,
    pub engine_id: String,
    pub container_id: String,
    /// Client-supplied name, if any.
    pub name: Option<String>,
    pub config: ContainerConfig,
}

/// Thread-safe placement store backed by redb.
#[derive(Clone)]
pub struct PlacementStore {
    db: Arc<Database>,
}

impl PlacementStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        debug!(?path, "placement store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StoreResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self { db: Arc::new(db) };
        store.ensure_tables()?;
        Ok(store)
    }

    fn ensure_tables(&self) -> StoreResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        txn.open_table(PLACEMENTS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Insert or replace a placement.
    pub fn put(&self, placed: &PlacedContainer) -> StoreResult<()> {
        let value = serde_json::to_vec(placed).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(PLACEMENTS).map_err(map_err!(Table))?;
            table
                .insert(placed.swarm_id.as_str(), value.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        debug!(swarm_id = %placed.swarm_id, container_id = %placed.container_id, "placement stored");
        Ok(())
    }

    /// Get a placement by swarm id.
    pub fn get(&self, swarm_id: &str) -> StoreResult<Option<PlacedContainer>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PLACEMENTS).map_err(map_err!(Table))?;
        match table.get(swarm_id).map_err(map_err!(Read))? {
            Some(guard) => {
                let placed: PlacedContainer =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Serialize))?;
                Ok(Some(placed))
            }
            None => Ok(None),
        }
    }

    /// List every placement.
    pub fn all(&self) -> StoreResult<Vec<PlacedContainer>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(PLACEMENTS).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let placed: PlacedContainer =
                serde_json::from_slice(value.value()).map_err(map_err!(Serialize))?;
            results.push(placed);
        }
        Ok(results)
    }

    /// Reverse lookup by engine-assigned container id.
    pub fn find_by_container(&self, container_id: &str) -> StoreResult<Option<PlacedContainer>> {
        Ok(self
            .all()?
            .into_iter()
            .find(|p| p.container_id == container_id))
    }

    /// Delete a placement. Returns true if it existed.
    pub fn remove(&self, swarm_id: &str) -> StoreResult<bool> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PLACEMENTS).map_err(map_err!(Table))?;
            existed = table.remove(swarm_id).map_err(map_err!(Write))?.is_some();
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(existed)
    }
}
