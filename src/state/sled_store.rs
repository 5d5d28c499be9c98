use crate::error::{AppError, Result};
use crate::state::tables::{Journal, Row, RowKey, Sequences};
use crate::state::{InMemoryStore, TablesReadGuard, TopologyStore, TopologyTables, TopologyTransaction};
use async_trait::async_trait;
use serde::{de::DeserializeOwned, Serialize};
use sled::{Batch, Db};
use std::path::Path;
use std::sync::Arc;

/// Prefix of every row entry; the rest of the key is the bincode `RowKey`
const ROW_PREFIX: &[u8] = b"r";
const SEQUENCES_KEY: &[u8] = b"s";

/// Persistent topology store using Sled embedded database
///
/// Committed tables live in memory. Each row is also stored under its own key,
/// and a commit writes only the rows it touched in one batch, flushed before
/// the new state becomes visible.
#[derive(Clone)]
pub struct SledStore {
    db: Arc<Db>,
    tree: sled::Tree,
    memory: InMemoryStore,
}

impl SledStore {
    /// Open (or create) a store at the specified path
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let db = sled::open(path.as_ref()).map_err(|e| {
            AppError::Storage(format!("Failed to open Sled database: {}", e))
        })?;

        let tree = db.open_tree("topology").map_err(|e| {
            AppError::Storage(format!("Failed to open topology tree: {}", e))
        })?;

        let tables = Self::load_tables(&tree)?;

        tracing::info!(path = ?path.as_ref(), rows = tree.len(), "Initialized Sled store");

        Ok(Self {
            db: Arc::new(db),
            tree,
            memory: InMemoryStore::with_tables(tables),
        })
    }

    fn load_tables(tree: &sled::Tree) -> Result<TopologyTables> {
        let mut tables = TopologyTables::new();

        if let Some(bytes) = tree.get(SEQUENCES_KEY)? {
            tables.restore_sequences(decode::<Sequences>(&bytes)?);
        }
        for entry in tree.scan_prefix(ROW_PREFIX) {
            let (_, value) = entry?;
            tables.restore(decode::<Row>(&value)?);
        }

        Ok(tables)
    }

    fn writer(&self) -> RowWriter {
        RowWriter {
            tree: self.tree.clone(),
        }
    }

    /// Flush pending writes to disk
    pub async fn flush(&self) -> Result<()> {
        self.db.flush_async().await.map_err(|e| {
            AppError::Storage(format!("Failed to flush database: {}", e))
        })?;
        Ok(())
    }

    /// Get database size in bytes
    pub fn size_on_disk(&self) -> Result<u64> {
        self.db.size_on_disk().map_err(|e| {
            AppError::Storage(format!("Failed to get database size: {}", e))
        })
    }
}

#[async_trait]
impl TopologyStore for SledStore {
    async fn read(&self) -> TablesReadGuard {
        self.memory.read().await
    }

    async fn begin(&self) -> Result<Box<dyn TopologyTransaction>> {
        Ok(Box::new(self.memory.begin_journaled(Some(self.writer())).await))
    }

    fn backend(&self) -> &'static str {
        "sled"
    }
}

fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value)
        .map_err(|e| AppError::Storage(format!("Failed to serialize topology row: {}", e)))
}

fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T> {
    bincode::deserialize(bytes)
        .map_err(|e| AppError::Storage(format!("Failed to deserialize topology row: {}", e)))
}

fn row_key(key: &RowKey) -> Result<Vec<u8>> {
    let mut bytes = ROW_PREFIX.to_vec();
    bytes.extend(encode(key)?);
    Ok(bytes)
}

/// Writes the rows touched by a transaction into the topology tree
pub(crate) struct RowWriter {
    tree: sled::Tree,
}

impl RowWriter {
    pub(crate) async fn write(&self, tables: &TopologyTables) -> Result<()> {
        let journal = tables.journal();
        if journal.is_empty() {
            return Ok(());
        }

        let mut batch = Batch::default();
        for key in journal.touched() {
            match tables.row(key) {
                Some(row) => batch.insert(row_key(key)?, encode(&row)?),
                None => batch.remove(row_key(key)?),
            }
        }
        if journal.original_sequences().is_some() {
            batch.insert(SEQUENCES_KEY, encode(&tables.sequences())?);
        }
        self.tree.apply_batch(batch)?;

        if let Err(e) = self.tree.flush_async().await {
            tracing::error!(error = %e, "Topology flush failed, reverting batch");
            self.revert(journal)?;
            return Err(AppError::Storage(format!("Failed to flush topology rows: {}", e)));
        }
        Ok(())
    }

    /// Put back the values the journal saw before its first write
    fn revert(&self, journal: &Journal) -> Result<()> {
        let mut batch = Batch::default();
        for (key, original) in journal.originals() {
            match original {
                Some(row) => batch.insert(row_key(key)?, encode(row)?),
                None => batch.remove(row_key(key)?),
            }
        }
        if let Some(sequences) = journal.original_sequences() {
            batch.insert(SEQUENCES_KEY, encode(&sequences)?);
        }
        self.tree.apply_batch(batch)?;
        Ok(())
    }
}
