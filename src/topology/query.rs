use crate::error::{AppError, Result};
use crate::metrics::TOPOLOGY_IMPORTS_TOTAL;
use crate::models::{
    AlertToIncident, Application, ApplicationInput, ApplicationUpdate, ApplicationView,
    DependencyView, ImportPayload, Incident, ServiceRef, ServiceView, TopologyCounts,
    TopologyQuery,
};
use crate::state::{TopologyStore, TopologyTables};
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;
use validator::Validate;

/// Read/write operations over a tenant's topology
pub struct TopologyQueryService {
    store: Arc<dyn TopologyStore>,
}

impl TopologyQueryService {
    pub fn new(store: Arc<dyn TopologyStore>) -> Self {
        Self { store }
    }

    /// Get a reference to the topology store
    pub fn store(&self) -> &Arc<dyn TopologyStore> {
        &self.store
    }

    /// Services of a tenant with their outgoing edges and application memberships.
    ///
    /// Without `include_empty_deps` only services touched by at least one edge
    /// are returned.
    pub async fn get_all_topology_data(
        &self,
        tenant_id: &str,
        query: &TopologyQuery,
    ) -> Result<Vec<ServiceView>> {
        let tables = self.store.read().await;

        let dependencies: Vec<_> = tables.dependencies(tenant_id).collect();
        let connected: HashSet<i64> = dependencies
            .iter()
            .flat_map(|d| [d.service_id, d.depends_on_service_id])
            .collect();

        let views = tables
            .services(tenant_id)
            .filter(|s| query.include_empty_deps || connected.contains(&s.id))
            .filter(|s| query.matches(s))
            .map(|service| {
                let outgoing = dependencies
                    .iter()
                    .filter(|d| d.service_id == service.id)
                    .map(|d| DependencyView {
                        id: d.id,
                        service_id: d.depends_on_service_id,
                        service_name: tables
                            .service(tenant_id, d.depends_on_service_id)
                            .map(|s| s.service.clone())
                            .unwrap_or_default(),
                        protocol: d.protocol.clone(),
                    })
                    .collect();

                ServiceView {
                    service: service.clone(),
                    dependencies: outgoing,
                    application_ids: tables.applications_of_service(tenant_id, service.id),
                }
            })
            .collect();

        Ok(views)
    }

    /// Applications of a tenant in creation order, member services resolved
    pub async fn get_applications_by_tenant_id(&self, tenant_id: &str) -> Result<Vec<ApplicationView>> {
        let tables = self.store.read().await;

        tables
            .applications(tenant_id)
            .into_iter()
            .map(|a| tables.application_view(a))
            .collect()
    }

    pub async fn get_application(&self, tenant_id: &str, application_id: Uuid) -> Result<ApplicationView> {
        let tables = self.store.read().await;

        let application = tables
            .application(tenant_id, application_id)
            .ok_or(AppError::ApplicationNotFound(application_id))?;
        tables.application_view(application)
    }

    pub async fn create_application(
        &self,
        tenant_id: &str,
        input: ApplicationInput,
    ) -> Result<ApplicationView> {
        validate_name(&input)?;
        let service_ids = member_ids(&input.services)?;

        let mut tx = self.store.begin().await?;
        let mut application = Application::new(tenant_id, input.name).with_services(service_ids);
        application.description = input.description;
        application.repository = input.repository;

        let application = tx.tables_mut().save_application(application)?;
        let view = tx.tables().application_view(&application)?;
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            application_id = %view.id,
            services = view.services.len(),
            "Application created"
        );
        Ok(view)
    }

    /// Replace an application's fields.
    ///
    /// `services: None` keeps the membership; `Some` replaces it, possibly with none.
    pub async fn update_application(
        &self,
        tenant_id: &str,
        application_id: Uuid,
        update: ApplicationUpdate,
    ) -> Result<ApplicationView> {
        let mut tx = self.store.begin().await?;

        let mut application = tx
            .tables()
            .application(tenant_id, application_id)
            .cloned()
            .ok_or(AppError::ApplicationNotFound(application_id))?;

        validate_name(&update)?;
        if let Some(services) = &update.services {
            application.service_ids = services.iter().map(|s| s.id).collect();
        }
        application.name = update.name;
        application.description = update.description;
        application.repository = update.repository;

        let application = tx.tables_mut().save_application(application)?;
        let view = tx.tables().application_view(&application)?;
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            application_id = %application_id,
            "Application updated"
        );
        Ok(view)
    }

    pub async fn delete_application(&self, tenant_id: &str, application_id: Uuid) -> Result<()> {
        let mut tx = self.store.begin().await?;
        tx.tables_mut().remove_application(tenant_id, application_id)?;
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            application_id = %application_id,
            "Application deleted"
        );
        Ok(())
    }

    /// Delete every service, application and dependency of a tenant
    pub async fn clean_before_import(&self, tenant_id: &str) -> Result<TopologyCounts> {
        let mut tx = self.store.begin().await?;
        let removed = tx.tables_mut().clear_topology(tenant_id);
        tx.commit().await?;

        tracing::info!(
            tenant_id = %tenant_id,
            services = removed.services,
            applications = removed.applications,
            dependencies = removed.dependencies,
            "Tenant topology cleared"
        );
        Ok(removed)
    }

    /// Upsert a topology document; returns the tenant's row counts afterwards
    pub async fn import_to_db(&self, tenant_id: &str, payload: ImportPayload) -> Result<TopologyCounts> {
        self.import_topology(tenant_id, payload, false).await
    }

    /// Import a topology document, optionally replacing the tenant's topology
    ///
    /// Clearing and importing happen in one transaction.
    pub async fn import_topology(
        &self,
        tenant_id: &str,
        payload: ImportPayload,
        replace: bool,
    ) -> Result<TopologyCounts> {
        payload.check()?;

        let mut tx = self.store.begin().await?;
        if replace {
            tx.tables_mut().clear_topology(tenant_id);
        }
        apply_import(tx.tables_mut(), tenant_id, payload)?;
        let counts = tx.tables().counts(tenant_id);
        tx.commit().await?;

        let mode = if replace { "replace" } else { "merge" };
        TOPOLOGY_IMPORTS_TOTAL.with_label_values(&[mode]).inc();
        tracing::info!(
            tenant_id = %tenant_id,
            mode = mode,
            services = counts.services,
            applications = counts.applications,
            dependencies = counts.dependencies,
            "Topology imported"
        );
        Ok(counts)
    }

    pub async fn counts(&self, tenant_id: &str) -> TopologyCounts {
        self.store.read().await.counts(tenant_id)
    }

    /// Incidents of a tenant, oldest first, optionally for one application
    pub async fn list_incidents(&self, tenant_id: &str, application_id: Option<Uuid>) -> Vec<Incident> {
        let tables = self.store.read().await;

        tables
            .incidents(tenant_id)
            .into_iter()
            .filter(|i| application_id.map_or(true, |id| i.incident_application == Some(id)))
            .cloned()
            .collect()
    }

    pub async fn get_incident(&self, tenant_id: &str, incident_id: Uuid) -> Result<Incident> {
        self.store
            .read()
            .await
            .incident(tenant_id, incident_id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Incident {} not found", incident_id)))
    }

    pub async fn incident_alerts(&self, tenant_id: &str, incident_id: Uuid) -> Result<Vec<AlertToIncident>> {
        let tables = self.store.read().await;

        if tables.incident(tenant_id, incident_id).is_none() {
            return Err(AppError::NotFound(format!("Incident {} not found", incident_id)));
        }
        Ok(tables.incident_alerts(incident_id))
    }
}

fn validate_name(payload: &impl Validate) -> Result<()> {
    payload
        .validate()
        .map_err(|e| AppError::InvalidApplicationData(e.to_string()))
}

/// Member ids of a new application; an empty list is rejected
fn member_ids(services: &[ServiceRef]) -> Result<Vec<i64>> {
    if services.is_empty() {
        return Err(AppError::InvalidApplicationData(
            "application must reference at least one service".to_string(),
        ));
    }
    Ok(services.iter().map(|s| s.id).collect())
}

fn apply_import(tables: &mut TopologyTables, tenant_id: &str, payload: ImportPayload) -> Result<()> {
    for service in payload.services {
        tables.upsert_service(service.into_service(tenant_id))?;
    }

    for imported in payload.applications {
        let mut application = match tables.application_by_name(tenant_id, &imported.name) {
            Some(existing) => existing.clone(),
            None => Application::new(tenant_id, imported.name.clone()),
        };
        application.description = imported.description;
        application.repository = imported.repository;
        application.service_ids = imported.services.into_iter().collect();

        tables.save_application(application)?;
    }

    for dependency in payload.dependencies {
        tables.upsert_dependency(
            tenant_id,
            dependency.service_id,
            dependency.depends_on_service_id,
            dependency.protocol,
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Service;
    use crate::state::InMemoryStore;

    async fn service_with_members(names: &[&str]) -> (TopologyQueryService, Vec<i64>) {
        let store = Arc::new(InMemoryStore::new());
        let mut tx = store.begin().await.unwrap();
        let ids = names
            .iter()
            .map(|n| tx.tables_mut().upsert_service(Service::new("t", *n, *n)).unwrap().id)
            .collect();
        tx.commit().await.unwrap();

        (TopologyQueryService::new(store), ids)
    }

    #[tokio::test]
    async fn test_create_rejects_empty_services() {
        let (service, _) = service_with_members(&["api"]).await;

        let result = service
            .create_application("t", ApplicationInput::new("App", Vec::<i64>::new()))
            .await;
        assert!(matches!(result, Err(AppError::InvalidApplicationData(_))));
    }

    #[tokio::test]
    async fn test_create_rejects_unknown_service() {
        let (service, ids) = service_with_members(&["api"]).await;

        let result = service
            .create_application("t", ApplicationInput::new("App", [ids[0], 999]))
            .await;
        assert!(matches!(result, Err(AppError::ServiceNotFound(_))));
        assert!(service.get_applications_by_tenant_id("t").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_update_keeps_membership_when_services_absent() {
        let (service, ids) = service_with_members(&["api", "db"]).await;
        let created = service
            .create_application("t", ApplicationInput::new("App", ids.clone()))
            .await
            .unwrap();

        let updated = service
            .update_application(
                "t",
                created.id,
                ApplicationUpdate {
                    name: "Renamed".to_string(),
                    description: Some("d".to_string()),
                    repository: None,
                    services: None,
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Renamed");
        assert_eq!(updated.services.len(), 2);
    }

    #[tokio::test]
    async fn test_update_unknown_application() {
        let (service, _) = service_with_members(&["api"]).await;
        let missing = Uuid::new_v4();

        let result = service
            .update_application(
                "t",
                missing,
                ApplicationUpdate {
                    name: "x".to_string(),
                    description: None,
                    repository: None,
                    services: None,
                },
            )
            .await;
        assert!(matches!(result, Err(AppError::ApplicationNotFound(id)) if id == missing));
    }

    #[tokio::test]
    async fn test_applications_are_tenant_scoped() {
        let (service, ids) = service_with_members(&["api"]).await;
        let created = service
            .create_application("t", ApplicationInput::new("App", ids))
            .await
            .unwrap();

        assert!(matches!(
            service.get_application("other", created.id).await,
            Err(AppError::ApplicationNotFound(_))
        ));
        assert!(matches!(
            service.delete_application("other", created.id).await,
            Err(AppError::ApplicationNotFound(_))
        ));
        assert!(service.delete_application("t", created.id).await.is_ok());
    }

    #[tokio::test]
    async fn test_update_can_empty_membership() {
        let (service, ids) = service_with_members(&["api", "db"]).await;
        let created = service
            .create_application("t", ApplicationInput::new("App", ids))
            .await
            .unwrap();

        let updated = service
            .update_application(
                "t",
                created.id,
                ApplicationUpdate {
                    name: "App".to_string(),
                    description: None,
                    repository: None,
                    services: Some(Vec::new()),
                },
            )
            .await
            .unwrap();

        assert!(updated.services.is_empty());
        let stored = service.get_application("t", created.id).await.unwrap();
        assert!(stored.services.is_empty());
    }

    #[tokio::test]
    async fn test_import_rejects_service_id_at_upper_bound() {
        let (service, _) = service_with_members(&["api"]).await;
        let before = service.counts("t").await;

        let payload: ImportPayload = serde_json::from_value(serde_json::json!({
            "services": [
                {"id": 5, "service": "ok", "display_name": "Ok"},
                {"id": i64::MAX, "service": "edge", "display_name": "Edge"}
            ]
        }))
        .unwrap();

        let result = service.import_to_db("t", payload).await;
        assert!(matches!(result, Err(AppError::Validation(_))));
        assert_eq!(service.counts("t").await, before);
    }
}
