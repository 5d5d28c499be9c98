use crate::error::Result;
use crate::state::sled_store::RowWriter;
use crate::state::{TablesReadGuard, TopologyStore, TopologyTables, TopologyTransaction};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{OwnedRwLockWriteGuard, RwLock};

/// In-memory topology store (for development and testing)
#[derive(Clone)]
pub struct InMemoryStore {
    tables: Arc<RwLock<TopologyTables>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_tables(TopologyTables::new())
    }

    pub fn with_tables(mut tables: TopologyTables) -> Self {
        tables.take_journal();
        Self {
            tables: Arc::new(RwLock::new(tables)),
        }
    }

    /// Open a transaction that optionally persists the touched rows on commit
    pub(crate) async fn begin_journaled(&self, writer: Option<RowWriter>) -> JournaledTransaction {
        JournaledTransaction {
            guard: self.tables.clone().write_owned().await,
            writer,
        }
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TopologyStore for InMemoryStore {
    async fn read(&self) -> TablesReadGuard {
        self.tables.clone().read_owned().await
    }

    async fn begin(&self) -> Result<Box<dyn TopologyTransaction>> {
        Ok(Box::new(self.begin_journaled(None).await))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }
}

/// Transaction that edits the tables in place under the write lock.
///
/// Every write is journaled; dropping the transaction before a successful
/// commit replays the journal backwards.
pub struct JournaledTransaction {
    guard: OwnedRwLockWriteGuard<TopologyTables>,
    writer: Option<RowWriter>,
}

#[async_trait]
impl TopologyTransaction for JournaledTransaction {
    fn tables(&self) -> &TopologyTables {
        &self.guard
    }

    fn tables_mut(&mut self) -> &mut TopologyTables {
        &mut self.guard
    }

    async fn commit(self: Box<Self>) -> Result<()> {
        let mut tx = self;
        if let Some(writer) = &tx.writer {
            writer.write(&tx.guard).await?;
        }

        let journal = tx.guard.take_journal();
        tracing::debug!(rows = journal.touched().len(), "Topology transaction committed");
        Ok(())
    }
}

impl Drop for JournaledTransaction {
    fn drop(&mut self) {
        if !self.guard.journal().is_empty() {
            tracing::debug!("Rolling back uncommitted topology transaction");
            self.guard.rollback();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Service;

    #[tokio::test]
    async fn test_commit_publishes_changes() {
        let store = InMemoryStore::new();

        let mut tx = store.begin().await.unwrap();
        tx.tables_mut().upsert_service(Service::new("t", "api", "API")).unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.read().await.services("t").count(), 1);
    }

    #[tokio::test]
    async fn test_drop_rolls_back() {
        let store = InMemoryStore::new();

        {
            let mut tx = store.begin().await.unwrap();
            tx.tables_mut().upsert_service(Service::new("t", "api", "API")).unwrap();
            assert_eq!(tx.tables().services("t").count(), 1);
        }

        assert_eq!(store.read().await.services("t").count(), 0);
    }

    #[tokio::test]
    async fn test_transactions_are_serialized() {
        let store = InMemoryStore::new();
        let mut handles = Vec::new();

        for i in 0..10 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                let mut tx = store.begin().await.unwrap();
                tx.tables_mut()
                    .upsert_service(Service::new("t", format!("svc-{}", i), "svc"))
                    .unwrap();
                tokio::task::yield_now().await;
                tx.commit().await.unwrap();
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let tables = store.read().await;
        let ids: std::collections::BTreeSet<i64> = tables.services("t").map(|s| s.id).collect();
        assert_eq!(ids.len(), 10);
    }

    #[tokio::test]
    async fn test_drop_restores_existing_rows() {
        let mut tables = TopologyTables::new();
        let api = tables.upsert_service(Service::new("t", "api", "API")).unwrap();
        let store = InMemoryStore::with_tables(tables);

        {
            let mut tx = store.begin().await.unwrap();
            let mut renamed = api.clone();
            renamed.display_name = "Renamed".to_string();
            tx.tables_mut().upsert_service(renamed).unwrap();
            tx.tables_mut().clear_topology("t");
        }

        let tables = store.read().await;
        assert_eq!(tables.service("t", api.id).unwrap().display_name, "API");
        assert!(tables.journal().is_empty());
    }
}
