use crate::config::{ProcessorConfig, MIN_IMPACTED_SERVICES};
use crate::error::{AppError, Result};
use crate::metrics::{
    ALERTS_ATTACHED_TOTAL, INCIDENTS_TOTAL, PROCESSOR_PASSES_TOTAL,
    PROCESSOR_PASS_DURATION_SECONDS, WORKFLOW_EVENTS_TOTAL,
};
use crate::models::{
    AlertToIncident, AlertView, ApplicationView, Incident, IncidentAction, NewIncident,
    ServicesWithAlerts,
};
use crate::notifications::{WorkflowContext, WorkflowDispatcher};
use crate::state::{TopologyStore, TopologyTables};
use dashmap::DashMap;
use futures::future::join_all;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Result of one processor pass over an application
#[derive(Debug, Clone, PartialEq)]
pub enum ProcessOutcome {
    /// Fewer impacted member services than the threshold; nothing written
    NotTriggered { impacted_services: Vec<String> },
    /// A new incident was opened
    Created {
        incident: Incident,
        attached: Vec<AlertToIncident>,
    },
    /// The open incident was reused
    Updated {
        incident: Incident,
        attached: Vec<AlertToIncident>,
    },
    /// The open incident already covers every impacted service and alert; nothing written
    Unchanged { incident: Incident },
}

impl ProcessOutcome {
    pub fn incident(&self) -> Option<&Incident> {
        match self {
            ProcessOutcome::NotTriggered { .. } => None,
            ProcessOutcome::Created { incident, .. }
            | ProcessOutcome::Updated { incident, .. }
            | ProcessOutcome::Unchanged { incident } => Some(incident),
        }
    }

    pub fn attached(&self) -> &[AlertToIncident] {
        match self {
            ProcessOutcome::NotTriggered { .. } | ProcessOutcome::Unchanged { .. } => &[],
            ProcessOutcome::Created { attached, .. } | ProcessOutcome::Updated { attached, .. } => {
                attached
            }
        }
    }

    pub fn action(&self) -> Option<IncidentAction> {
        match self {
            ProcessOutcome::NotTriggered { .. } | ProcessOutcome::Unchanged { .. } => None,
            ProcessOutcome::Created { .. } => Some(IncidentAction::Created),
            ProcessOutcome::Updated { .. } => Some(IncidentAction::Updated),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            ProcessOutcome::NotTriggered { .. } => "not_triggered",
            ProcessOutcome::Created { .. } => "created",
            ProcessOutcome::Updated { .. } => "updated",
            ProcessOutcome::Unchanged { .. } => "unchanged",
        }
    }
}

/// Firing alerts per impacted member service
type Impacted<'a> = BTreeMap<&'a str, Vec<&'a AlertView>>;

/// What a pass has to do, decided from the current tables
enum Assessment<'a> {
    /// Nothing to write
    Settled(ProcessOutcome),
    Write {
        view: ApplicationView,
        impacted: Impacted<'a>,
        open_incident: Option<Uuid>,
    },
}

fn fingerprints<'a>(impacted: &Impacted<'a>) -> BTreeSet<&'a str> {
    impacted
        .values()
        .flatten()
        .map(|alert| alert.fingerprint.as_str())
        .collect()
}

/// Per-tenant tally of a `process_tenant` run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TenantPassSummary {
    pub applications: usize,
    pub created: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
}

/// Correlates per-service alert state into application incidents
pub struct TopologyProcessor {
    store: Arc<dyn TopologyStore>,
    dispatcher: Arc<dyn WorkflowDispatcher>,
    min_impacted_services: usize,
    application_locks: DashMap<(String, Uuid), Arc<Mutex<()>>>,
}

impl TopologyProcessor {
    pub fn new(store: Arc<dyn TopologyStore>, dispatcher: Arc<dyn WorkflowDispatcher>) -> Self {
        Self {
            store,
            dispatcher,
            min_impacted_services: MIN_IMPACTED_SERVICES,
            application_locks: DashMap::new(),
        }
    }

    pub fn from_config(
        store: Arc<dyn TopologyStore>,
        dispatcher: Arc<dyn WorkflowDispatcher>,
        config: &ProcessorConfig,
    ) -> Self {
        Self::new(store, dispatcher).with_min_impacted_services(config.min_impacted_services)
    }

    /// Set the trigger threshold; values below the minimum are raised to it
    pub fn with_min_impacted_services(mut self, min_impacted_services: usize) -> Self {
        self.min_impacted_services = min_impacted_services.max(MIN_IMPACTED_SERVICES);
        self
    }

    pub fn min_impacted_services(&self) -> usize {
        self.min_impacted_services
    }

    /// Get a reference to the topology store
    pub fn store(&self) -> &Arc<dyn TopologyStore> {
        &self.store
    }

    fn application_lock(&self, tenant_id: &str, application_id: Uuid) -> Arc<Mutex<()>> {
        self.application_locks
            .entry((tenant_id.to_string(), application_id))
            .or_default()
            .clone()
    }

    /// Drop the lock of a deleted application unless a pass still holds it
    fn forget_application(&self, tenant_id: &str, application_id: Uuid) {
        self.application_locks
            .remove_if(&(tenant_id.to_string(), application_id), |_, lock| {
                Arc::strong_count(lock) == 1
            });
    }

    /// Number of applications with a pass lock
    pub fn tracked_applications(&self) -> usize {
        self.application_locks.len()
    }

    /// Decide what a pass over `tables` has to do
    fn assess<'a>(
        &self,
        tables: &TopologyTables,
        tenant_id: &str,
        application_id: Uuid,
        services_with_alerts: &'a ServicesWithAlerts,
    ) -> Result<Assessment<'a>> {
        let application = tables
            .application(tenant_id, application_id)
            .ok_or(AppError::ApplicationNotFound(application_id))?;
        let view = tables.application_view(application)?;

        let impacted: Impacted<'a> = services_with_alerts
            .iter()
            .filter(|(service, _)| view.has_service(service))
            .map(|(service, alerts)| {
                let firing: Vec<&AlertView> = alerts.iter().filter(|a| a.is_firing()).collect();
                (service.as_str(), firing)
            })
            .filter(|(_, firing)| !firing.is_empty())
            .collect();

        if impacted.len() < self.min_impacted_services {
            tracing::debug!(
                tenant_id = %tenant_id,
                application_id = %application_id,
                impacted = impacted.len(),
                "Not enough impacted services for an application incident"
            );
            return Ok(Assessment::Settled(ProcessOutcome::NotTriggered {
                impacted_services: impacted.keys().map(|s| s.to_string()).collect(),
            }));
        }

        let open_incident = tables.open_topology_incident(tenant_id, application_id);
        if let Some(incident) = open_incident {
            let new_service = impacted
                .keys()
                .any(|service| !incident.affected_services.contains(*service));
            let new_alert = fingerprints(&impacted).into_iter().any(|fingerprint| {
                tables
                    .last_alert(tenant_id, fingerprint)
                    .is_some_and(|last| !tables.is_attached(incident.id, last.alert_id))
            });

            if !new_service && !new_alert {
                tracing::debug!(
                    tenant_id = %tenant_id,
                    application_id = %application_id,
                    incident_id = %incident.id,
                    "Open incident already covers the impacted services"
                );
                return Ok(Assessment::Settled(ProcessOutcome::Unchanged {
                    incident: incident.clone(),
                }));
            }
        }

        Ok(Assessment::Write {
            view,
            open_incident: open_incident.map(|i| i.id),
            impacted,
        })
    }

    /// Run one pass for an application.
    ///
    /// Passes for the same application are serialized, dispatch included, so
    /// workflow events leave in commit order.
    pub async fn process_application(
        &self,
        tenant_id: &str,
        application_id: Uuid,
        services_with_alerts: &ServicesWithAlerts,
    ) -> Result<ProcessOutcome> {
        let start = Instant::now();
        let lock = self.application_lock(tenant_id, application_id);
        let result = {
            let _guard = lock.lock().await;
            self.correlate_application(tenant_id, application_id, services_with_alerts)
                .await
        };
        drop(lock);

        if matches!(result, Err(AppError::ApplicationNotFound(_))) {
            self.forget_application(tenant_id, application_id);
        }

        PROCESSOR_PASS_DURATION_SECONDS.observe(start.elapsed().as_secs_f64());
        match &result {
            Ok(outcome) => {
                PROCESSOR_PASSES_TOTAL.with_label_values(&[outcome.label()]).inc();
            }
            Err(e) => {
                PROCESSOR_PASSES_TOTAL.with_label_values(&["failed"]).inc();
                tracing::error!(
                    tenant_id = %tenant_id,
                    application_id = %application_id,
                    error = %e,
                    "Topology pass failed"
                );
            }
        }

        result
    }

    /// The pass itself, without the per-application lock.
    ///
    /// The tables are assessed under the shared read lock first; the write
    /// lock is only taken when the pass has something to write, and the
    /// assessment is repeated inside the transaction.
    async fn correlate_application(
        &self,
        tenant_id: &str,
        application_id: Uuid,
        services_with_alerts: &ServicesWithAlerts,
    ) -> Result<ProcessOutcome> {
        {
            let tables = self.store.read().await;
            if let Assessment::Settled(outcome) =
                self.assess(&tables, tenant_id, application_id, services_with_alerts)?
            {
                return Ok(outcome);
            }
        }

        let mut tx = self.store.begin().await?;
        let (view, impacted, open_incident) =
            match self.assess(tx.tables(), tenant_id, application_id, services_with_alerts)? {
                Assessment::Settled(outcome) => return Ok(outcome),
                Assessment::Write {
                    view,
                    impacted,
                    open_incident,
                } => (view, impacted, open_incident),
            };
        let impacted_services: Vec<String> = impacted.keys().map(|s| s.to_string()).collect();

        let (incident_id, action) = match open_incident {
            Some(id) => {
                tx.tables_mut()
                    .touch_incident(tenant_id, id, impacted_services.iter().cloned())?;
                (id, IncidentAction::Updated)
            }
            None => {
                let draft = NewIncident::for_application(
                    tenant_id,
                    application_id,
                    &view.name,
                    impacted_services.iter().cloned(),
                );
                let incident = tx.tables_mut().insert_incident(draft)?;
                (incident.id, IncidentAction::Created)
            }
        };

        let mut unresolved = Vec::new();
        let attached = tx.tables_mut().attach_alerts(
            tenant_id,
            incident_id,
            fingerprints(&impacted),
            &mut unresolved,
        )?;
        for fingerprint in &unresolved {
            tracing::warn!(
                tenant_id = %tenant_id,
                incident_id = %incident_id,
                fingerprint = %fingerprint,
                "No stored alert for fingerprint, skipping association"
            );
        }

        let incident = tx
            .tables()
            .incident(tenant_id, incident_id)
            .cloned()
            .ok_or_else(|| AppError::Internal(format!("incident {} vanished", incident_id)))?;

        tx.commit().await?;

        INCIDENTS_TOTAL.with_label_values(&[&action.to_string()]).inc();
        ALERTS_ATTACHED_TOTAL.inc_by(attached.len() as u64);
        tracing::info!(
            tenant_id = %tenant_id,
            application_id = %application_id,
            incident_id = %incident.id,
            action = %action,
            impacted_services = impacted_services.len(),
            attached = attached.len(),
            "Application incident {}",
            action
        );

        let context = WorkflowContext {
            application_id,
            application_name: view.name.clone(),
            impacted_services,
            attached_alerts: attached.len(),
        };
        self.dispatch(tenant_id, &context, &incident, action).await;

        Ok(match action {
            IncidentAction::Created => ProcessOutcome::Created { incident, attached },
            _ => ProcessOutcome::Updated { incident, attached },
        })
    }

    /// Run a pass for every application of a tenant, applications concurrently
    pub async fn process_tenant(
        &self,
        tenant_id: &str,
        services_with_alerts: &ServicesWithAlerts,
    ) -> TenantPassSummary {
        let application_ids: Vec<Uuid> = {
            let tables = self.store.read().await;
            self.application_locks.retain(|(tenant, id), lock| {
                tenant != tenant_id
                    || Arc::strong_count(lock) > 1
                    || tables.application(tenant, *id).is_some()
            });
            tables
                .applications(tenant_id)
                .into_iter()
                .map(|a| a.id)
                .collect()
        };

        let mut summary = TenantPassSummary {
            applications: application_ids.len(),
            ..Default::default()
        };

        let passes = application_ids
            .into_iter()
            .map(|id| self.process_application(tenant_id, id, services_with_alerts));

        for result in join_all(passes).await {
            match result {
                Ok(ProcessOutcome::Created { .. }) => summary.created += 1,
                Ok(ProcessOutcome::Updated { .. }) => summary.updated += 1,
                Ok(ProcessOutcome::Unchanged { .. }) => summary.unchanged += 1,
                Ok(ProcessOutcome::NotTriggered { .. }) => {}
                // Already logged by process_application
                Err(_) => summary.failed += 1,
            }
        }

        summary
    }

    /// Mark an incident resolved; the next trigger for its application opens a new one
    pub async fn resolve_incident(&self, tenant_id: &str, incident_id: Uuid) -> Result<Incident> {
        let application_id = self
            .store
            .read()
            .await
            .incident(tenant_id, incident_id)
            .ok_or_else(|| AppError::NotFound(format!("Incident {} not found", incident_id)))?
            .incident_application;

        let lock = application_id.map(|id| self.application_lock(tenant_id, id));
        let _guard = match &lock {
            Some(lock) => Some(lock.lock().await),
            None => None,
        };

        let mut tx = self.store.begin().await?;
        let incident = tx.tables_mut().resolve_incident(tenant_id, incident_id)?;
        let application_name = application_id
            .and_then(|id| tx.tables().application(tenant_id, id))
            .map(|a| a.name.clone())
            .unwrap_or_default();
        tx.commit().await?;

        INCIDENTS_TOTAL
            .with_label_values(&[&IncidentAction::Resolved.to_string()])
            .inc();
        tracing::info!(
            tenant_id = %tenant_id,
            incident_id = %incident_id,
            "Incident resolved"
        );

        let context = WorkflowContext {
            application_id: application_id.unwrap_or_default(),
            application_name,
            impacted_services: incident.affected_services.iter().cloned().collect(),
            attached_alerts: 0,
        };
        self.dispatch(tenant_id, &context, &incident, IncidentAction::Resolved)
            .await;

        Ok(incident)
    }

    /// Deliver a workflow event; failures are logged and counted, never propagated
    async fn dispatch(
        &self,
        tenant_id: &str,
        context: &WorkflowContext,
        incident: &Incident,
        action: IncidentAction,
    ) {
        let action_label = action.to_string();

        match self
            .dispatcher
            .send_workflow_event(tenant_id, context, incident, action)
            .await
        {
            Ok(()) => {
                WORKFLOW_EVENTS_TOTAL
                    .with_label_values(&[&action_label, "sent"])
                    .inc();
            }
            Err(e) => {
                WORKFLOW_EVENTS_TOTAL
                    .with_label_values(&[&action_label, "failed"])
                    .inc();
                tracing::warn!(
                    tenant_id = %tenant_id,
                    incident_id = %incident.id,
                    dispatcher = self.dispatcher.name(),
                    error = %e,
                    "Failed to dispatch workflow event"
                );
            }
        }
    }
}
