use crate::config::ProcessorConfig;
use crate::error::{AppError, Result};
use crate::models::{group_by_service, ServicesWithAlerts};
use crate::processing::TopologyProcessor;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::interval;
use tracing::{error, info};

/// Totals of one scan across all tenants
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub tenants: usize,
    pub applications: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Periodically feeds recent firing alerts of every tenant to the processor
#[derive(Clone)]
pub struct TopologyScanner {
    processor: Arc<TopologyProcessor>,
    scan_interval: Duration,
    look_back: chrono::Duration,
    running: Arc<RwLock<bool>>,
}

impl TopologyScanner {
    pub fn new(processor: Arc<TopologyProcessor>, config: &ProcessorConfig) -> Self {
        Self {
            processor,
            scan_interval: Duration::from_secs(config.scan_interval_secs.max(1)),
            look_back: chrono::Duration::seconds(config.look_back_window_secs as i64),
            running: Arc::new(RwLock::new(false)),
        }
    }

    /// Start the background scan loop
    pub async fn start(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if *running {
            return Err(AppError::Internal("Topology scanner already running".to_string()));
        }
        *running = true;
        drop(running);

        info!(
            interval_secs = self.scan_interval.as_secs(),
            look_back_secs = self.look_back.num_seconds(),
            "Starting topology scanner"
        );

        let scanner = self.clone();
        tokio::spawn(async move {
            scanner.monitor_loop().await;
        });

        Ok(())
    }

    /// Stop the scanner after its current tick
    pub async fn stop(&self) -> Result<()> {
        let mut running = self.running.write().await;
        if !*running {
            return Err(AppError::Internal("Topology scanner not running".to_string()));
        }
        *running = false;

        info!("Stopping topology scanner");
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }

    async fn monitor_loop(&self) {
        let mut ticker = interval(self.scan_interval);

        loop {
            ticker.tick().await;

            if !self.is_running().await {
                info!("Topology scanner loop stopping");
                break;
            }

            let summary = self.scan_once().await;
            if summary.failed > 0 {
                error!(failed = summary.failed, "Topology scan had failed passes");
            }
        }
    }

    /// Firing alerts of a tenant received within the look-back window, grouped by service
    pub async fn services_with_alerts(&self, tenant_id: &str) -> ServicesWithAlerts {
        let since = Utc::now() - self.look_back;
        let alerts = self.processor.store().read().await.recent_alerts(tenant_id, since);

        group_by_service(
            alerts
                .iter()
                .map(|alert| alert.view())
                .filter(|view| view.is_firing()),
        )
    }

    /// Run one pass over every tenant that has applications
    pub async fn scan_once(&self) -> ScanSummary {
        let tenants = self.processor.store().read().await.tenants();
        let mut summary = ScanSummary {
            tenants: tenants.len(),
            ..Default::default()
        };

        for tenant_id in &tenants {
            let services_with_alerts = self.services_with_alerts(tenant_id).await;
            if services_with_alerts.is_empty() {
                continue;
            }

            let tenant = self
                .processor
                .process_tenant(tenant_id, &services_with_alerts)
                .await;
            summary.applications += tenant.applications;
            summary.created += tenant.created;
            summary.updated += tenant.updated;
            summary.unchanged += tenant.unchanged;
            summary.failed += tenant.failed;
        }

        tracing::debug!(
            tenants = summary.tenants,
            created = summary.created,
            updated = summary.updated,
            unchanged = summary.unchanged,
            "Topology scan finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Alert, AlertStatus, Application, Service};
    use crate::notifications::BroadcastDispatcher;
    use crate::state::{InMemoryStore, TopologyStore};

    async fn scanner_with_app() -> (TopologyScanner, BroadcastDispatcher) {
        let store = Arc::new(InMemoryStore::new());
        let mut tx = store.begin().await.unwrap();
        let api = tx.tables_mut().upsert_service(Service::new("t", "api", "API")).unwrap();
        let db = tx.tables_mut().upsert_service(Service::new("t", "db", "DB")).unwrap();
        tx.tables_mut()
            .save_application(Application::new("t", "App").with_services([api.id, db.id]))
            .unwrap();
        tx.commit().await.unwrap();

        let dispatcher = BroadcastDispatcher::new(8);
        let processor = Arc::new(TopologyProcessor::new(store, Arc::new(dispatcher.clone())));
        (
            TopologyScanner::new(processor, &ProcessorConfig::default()),
            dispatcher,
        )
    }

    #[tokio::test]
    async fn test_scan_opens_incident_from_recent_alerts() {
        let (scanner, dispatcher) = scanner_with_app().await;
        let mut events = dispatcher.subscribe();
        let store = scanner.processor.store().clone();
        store
            .record_alert(Alert::new("t", "fp-api", "api down", Some("api".to_string())))
            .await
            .unwrap();
        store
            .record_alert(Alert::new("t", "fp-db", "db slow", Some("db".to_string())))
            .await
            .unwrap();

        let summary = scanner.scan_once().await;
        assert_eq!(summary.tenants, 1);
        assert_eq!(summary.created, 1);
        assert!(events.try_recv().is_ok());

        let summary = scanner.scan_once().await;
        assert_eq!(summary.created, 0);
        assert_eq!(summary.updated, 0);
        assert_eq!(summary.unchanged, 1);
        assert!(events.try_recv().is_err());
        assert_eq!(store.read().await.incidents("t").len(), 1);
    }

    #[tokio::test]
    async fn test_idle_rescans_send_nothing() {
        let (scanner, dispatcher) = scanner_with_app().await;
        let store = scanner.processor.store().clone();
        store
            .record_alert(Alert::new("t", "fp-api", "api down", Some("api".to_string())))
            .await
            .unwrap();
        store
            .record_alert(Alert::new("t", "fp-db", "db slow", Some("db".to_string())))
            .await
            .unwrap();
        scanner.scan_once().await;

        let mut events = dispatcher.subscribe();
        for _ in 0..3 {
            let summary = scanner.scan_once().await;
            assert_eq!(summary.unchanged, 1);
        }
        assert!(events.try_recv().is_err());

        store
            .record_alert(Alert::new("t", "fp-db-2", "db errors", Some("db".to_string())))
            .await
            .unwrap();
        let summary = scanner.scan_once().await;
        assert_eq!(summary.updated, 1);
        assert!(events.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_old_and_resolved_alerts_are_ignored() {
        let (scanner, _dispatcher) = scanner_with_app().await;
        let store = scanner.processor.store().clone();

        let mut old = Alert::new("t", "fp-api", "api down", Some("api".to_string()));
        old.last_received = Utc::now() - chrono::Duration::hours(2);
        store.record_alert(old).await.unwrap();
        store
            .record_alert(
                Alert::new("t", "fp-db", "db slow", Some("db".to_string()))
                    .with_status(AlertStatus::Resolved),
            )
            .await
            .unwrap();

        assert!(scanner.services_with_alerts("t").await.is_empty());
        assert_eq!(scanner.scan_once().await.created, 0);
    }

    #[tokio::test]
    async fn test_start_stop() {
        let (scanner, _dispatcher) = scanner_with_app().await;
        scanner.start().await.unwrap();
        assert!(scanner.is_running().await);
        assert!(scanner.start().await.is_err());

        scanner.stop().await.unwrap();
        assert!(!scanner.is_running().await);
        assert!(scanner.stop().await.is_err());
    }
}
