pub mod factory;
pub mod sled_store;
pub mod store;
pub mod tables;

pub use factory::{create_in_memory_store, create_store};
pub use sled_store::SledStore;
pub use store::*;
pub use tables::TopologyTables;

use crate::error::Result;
use crate::models::Alert;
use async_trait::async_trait;
use tokio::sync::OwnedRwLockReadGuard;

/// Shared read access to the committed tables
pub type TablesReadGuard = OwnedRwLockReadGuard<TopologyTables>;

/// Trait for topology storage backends
///
/// Writes go through a transaction that holds the store-wide write lock and
/// journals its changes. Only one transaction is open at a time; readers wait
/// for it and see committed state only.
#[async_trait]
pub trait TopologyStore: Send + Sync {
    /// Read the committed tables
    async fn read(&self) -> TablesReadGuard;

    /// Open a write transaction
    async fn begin(&self) -> Result<Box<dyn TopologyTransaction>>;

    /// Short backend name for logs
    fn backend(&self) -> &'static str;

    /// Store an alert event and update its fingerprint's latest row
    async fn record_alert(&self, alert: Alert) -> Result<()> {
        let mut tx = self.begin().await?;
        tx.tables_mut().record_alert(alert);
        tx.commit().await
    }
}

/// A unit of work over the topology tables.
///
/// Dropping a transaction without committing rolls back every change.
#[async_trait]
pub trait TopologyTransaction: Send {
    fn tables(&self) -> &TopologyTables;

    fn tables_mut(&mut self) -> &mut TopologyTables;

    /// Persist and publish the changes atomically
    async fn commit(self: Box<Self>) -> Result<()>;
}
