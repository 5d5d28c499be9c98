//! Shared fixtures for integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;
use topology_incident_manager::{
    error::Result,
    models::{Alert, AlertView, Application, ImportPayload, Incident, IncidentAction, Service},
    notifications::{WorkflowContext, WorkflowDispatcher},
    state::{InMemoryStore, TopologyStore},
};
use uuid::Uuid;

pub const TENANT: &str = "keep";

/// Dispatcher that remembers every event it was handed
#[derive(Default)]
pub struct RecordingDispatcher {
    events: Mutex<Vec<(String, Uuid, IncidentAction)>>,
    fail: bool,
}

impl RecordingDispatcher {
    pub fn failing() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<(String, Uuid, IncidentAction)> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl WorkflowDispatcher for RecordingDispatcher {
    async fn send_workflow_event(
        &self,
        tenant_id: &str,
        _context: &WorkflowContext,
        incident: &Incident,
        action: IncidentAction,
    ) -> Result<()> {
        self.events
            .lock()
            .push((tenant_id.to_string(), incident.id, action));
        if self.fail {
            return Err(topology_incident_manager::AppError::Notification(
                "dispatcher unavailable".to_string(),
            ));
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "recording"
    }
}

/// Application with one member service per name, plus its service ids
pub async fn seed_application(
    store: &Arc<dyn TopologyStore>,
    tenant_id: &str,
    name: &str,
    services: &[&str],
) -> (Uuid, Vec<i64>) {
    let mut tx = store.begin().await.unwrap();
    let ids: Vec<i64> = services
        .iter()
        .map(|s| {
            tx.tables_mut()
                .upsert_service(Service::new(tenant_id, *s, s.to_uppercase()))
                .unwrap()
                .id
        })
        .collect();
    let application = tx
        .tables_mut()
        .save_application(Application::new(tenant_id, name).with_services(ids.clone()))
        .unwrap();
    tx.commit().await.unwrap();

    (application.id, ids)
}

/// Store a firing alert and return the view the processor would receive
pub async fn firing_alert(
    store: &Arc<dyn TopologyStore>,
    tenant_id: &str,
    fingerprint: &str,
    service: &str,
) -> AlertView {
    let alert = Alert::new(tenant_id, fingerprint, format!("{} alert", service), Some(service.to_string()))
        .with_provider("prometheus", "prom-1");
    store.record_alert(alert.clone()).await.unwrap();
    alert.view()
}

pub fn memory_store() -> Arc<dyn TopologyStore> {
    Arc::new(InMemoryStore::new())
}

pub fn sample_import() -> ImportPayload {
    serde_json::from_value(serde_json::json!({
        "services": [
            {"id": 1, "service": "frontend", "display_name": "Frontend", "environment": "prod", "team": "web"},
            {"id": 2, "service": "backend", "display_name": "Backend", "environment": "prod"},
            {"id": 3, "service": "database", "display_name": "Database", "environment": "prod", "tags": ["stateful"]},
            {"id": 4, "service": "batch", "display_name": "Batch", "environment": "staging"}
        ],
        "applications": [
            {"name": "Storefront", "description": "Customer shop", "services": [1, 2, 3]}
        ],
        "dependencies": [
            {"service_id": 1, "depends_on_service_id": 2, "protocol": "http"},
            {"service_id": 2, "depends_on_service_id": 3, "protocol": "tcp"}
        ]
    }))
    .unwrap()
}
