//! Row storage shared by every store backend.
//!
//! `TopologyTables` holds all tenant-scoped rows and enforces the referential
//! rules between them. Every write goes through a journal of before-images so
//! a transaction can edit the tables in place, roll back on drop, and hand the
//! touched row keys to a persistent backend on commit.

use crate::error::{AppError, Result};
use crate::models::{
    Alert, AlertToIncident, Application, ApplicationView, Incident, IncidentStatus, LastAlert,
    NewIncident, Service, ServiceDependency, TopologyCounts,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use uuid::Uuid;

type ServiceKey = (String, i64);
type FingerprintKey = (String, String);
type AssociationKey = (Uuid, Uuid);

/// Primary key of a stored row
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub(crate) enum RowKey {
    Service(ServiceKey),
    Dependency(i64),
    Application(Uuid),
    Incident(Uuid),
    Alert(Uuid),
    LastAlert(FingerprintKey),
    /// (incident_id, alert_id)
    Association(AssociationKey),
}

/// Any stored row, as persisted by the sled backend
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) enum Row {
    Service(Service),
    Dependency(ServiceDependency),
    Application(Application),
    Incident(Incident),
    Alert(Alert),
    LastAlert(LastAlert),
    Association(AlertToIncident),
}

impl Row {
    fn key(&self) -> RowKey {
        match self {
            Row::Service(s) => RowKey::Service((s.tenant_id.clone(), s.id)),
            Row::Dependency(d) => RowKey::Dependency(d.id),
            Row::Application(a) => RowKey::Application(a.id),
            Row::Incident(i) => RowKey::Incident(i.id),
            Row::Alert(a) => RowKey::Alert(a.id),
            Row::LastAlert(l) => RowKey::LastAlert((l.tenant_id.clone(), l.fingerprint.clone())),
            Row::Association(a) => RowKey::Association((a.incident_id, a.alert_id)),
        }
    }
}

/// Id and ordering counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Sequences {
    next_service_id: i64,
    next_dependency_id: i64,
    next_application: u64,
}

impl Default for Sequences {
    fn default() -> Self {
        Self {
            next_service_id: 1,
            next_dependency_id: 1,
            next_application: 1,
        }
    }
}

/// Before-images of the rows written since the journal was last taken
#[derive(Debug, Default)]
pub(crate) struct Journal {
    changes: Vec<(RowKey, Option<Row>)>,
    sequences: Option<Sequences>,
}

impl Journal {
    pub(crate) fn is_empty(&self) -> bool {
        self.changes.is_empty() && self.sequences.is_none()
    }

    /// Distinct keys written, in key order
    pub(crate) fn touched(&self) -> BTreeSet<&RowKey> {
        self.changes.iter().map(|(key, _)| key).collect()
    }

    /// Value of each touched row before the first write
    pub(crate) fn originals(&self) -> BTreeMap<&RowKey, Option<&Row>> {
        let mut originals = BTreeMap::new();
        for (key, before) in &self.changes {
            originals.entry(key).or_insert(before.as_ref());
        }
        originals
    }

    /// Counters before the first change, if any changed
    pub(crate) fn original_sequences(&self) -> Option<Sequences> {
        self.sequences
    }
}

#[derive(Debug, Default)]
pub struct TopologyTables {
    services: BTreeMap<ServiceKey, Service>,
    dependencies: BTreeMap<i64, ServiceDependency>,
    applications: BTreeMap<Uuid, Application>,
    incidents: BTreeMap<Uuid, Incident>,
    alerts: BTreeMap<Uuid, Alert>,
    last_alerts: BTreeMap<FingerprintKey, LastAlert>,
    alert_to_incident: BTreeMap<AssociationKey, AlertToIncident>,
    /// (alert_id, incident_id), derived from `alert_to_incident`
    alert_incidents: BTreeSet<(Uuid, Uuid)>,
    sequences: Sequences,
    journal: Journal,
}

fn tenant_range(tenant_id: &str) -> std::ops::RangeInclusive<ServiceKey> {
    (tenant_id.to_string(), i64::MIN)..=(tenant_id.to_string(), i64::MAX)
}

impl TopologyTables {
    pub fn new() -> Self {
        Self::default()
    }

    // ------------------------------------------------------------------
    // Row primitives
    // ------------------------------------------------------------------

    /// Current value of a row
    pub(crate) fn row(&self, key: &RowKey) -> Option<Row> {
        match key {
            RowKey::Service(k) => self.services.get(k).cloned().map(Row::Service),
            RowKey::Dependency(k) => self.dependencies.get(k).cloned().map(Row::Dependency),
            RowKey::Application(k) => self.applications.get(k).cloned().map(Row::Application),
            RowKey::Incident(k) => self.incidents.get(k).cloned().map(Row::Incident),
            RowKey::Alert(k) => self.alerts.get(k).cloned().map(Row::Alert),
            RowKey::LastAlert(k) => self.last_alerts.get(k).cloned().map(Row::LastAlert),
            RowKey::Association(k) => self.alert_to_incident.get(k).cloned().map(Row::Association),
        }
    }

    /// Write a row without journaling; returns the replaced value
    pub(crate) fn restore(&mut self, row: Row) -> Option<Row> {
        match row {
            Row::Service(s) => self
                .services
                .insert((s.tenant_id.clone(), s.id), s)
                .map(Row::Service),
            Row::Dependency(d) => self.dependencies.insert(d.id, d).map(Row::Dependency),
            Row::Application(a) => self.applications.insert(a.id, a).map(Row::Application),
            Row::Incident(i) => self.incidents.insert(i.id, i).map(Row::Incident),
            Row::Alert(a) => self.alerts.insert(a.id, a).map(Row::Alert),
            Row::LastAlert(l) => self
                .last_alerts
                .insert((l.tenant_id.clone(), l.fingerprint.clone()), l)
                .map(Row::LastAlert),
            Row::Association(a) => {
                self.alert_incidents.insert((a.alert_id, a.incident_id));
                self.alert_to_incident
                    .insert((a.incident_id, a.alert_id), a)
                    .map(Row::Association)
            }
        }
    }

    fn remove_unjournaled(&mut self, key: &RowKey) -> Option<Row> {
        match key {
            RowKey::Service(k) => self.services.remove(k).map(Row::Service),
            RowKey::Dependency(k) => self.dependencies.remove(k).map(Row::Dependency),
            RowKey::Application(k) => self.applications.remove(k).map(Row::Application),
            RowKey::Incident(k) => self.incidents.remove(k).map(Row::Incident),
            RowKey::Alert(k) => self.alerts.remove(k).map(Row::Alert),
            RowKey::LastAlert(k) => self.last_alerts.remove(k).map(Row::LastAlert),
            RowKey::Association(k) => {
                self.alert_incidents.remove(&(k.1, k.0));
                self.alert_to_incident.remove(k).map(Row::Association)
            }
        }
    }

    fn put(&mut self, row: Row) {
        let key = row.key();
        let before = self.restore(row);
        self.journal.changes.push((key, before));
    }

    fn remove(&mut self, key: RowKey) -> Option<Row> {
        let before = self.remove_unjournaled(&key);
        if before.is_some() {
            self.journal.changes.push((key, before.clone()));
        }
        before
    }

    fn sequences_mut(&mut self) -> &mut Sequences {
        self.journal.sequences.get_or_insert(self.sequences);
        &mut self.sequences
    }

    pub(crate) fn sequences(&self) -> Sequences {
        self.sequences
    }

    pub(crate) fn restore_sequences(&mut self, sequences: Sequences) {
        self.sequences = sequences;
    }

    pub(crate) fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Accept every write made so far
    pub(crate) fn take_journal(&mut self) -> Journal {
        std::mem::take(&mut self.journal)
    }

    /// Undo every write made since the journal was last taken
    pub(crate) fn rollback(&mut self) {
        let journal = self.take_journal();
        for (key, before) in journal.changes.into_iter().rev() {
            match before {
                Some(row) => {
                    self.restore(row);
                }
                None => {
                    self.remove_unjournaled(&key);
                }
            }
        }
        if let Some(sequences) = journal.sequences {
            self.sequences = sequences;
        }
    }

    // ------------------------------------------------------------------
    // Services
    // ------------------------------------------------------------------

    /// Services of a tenant in id order
    pub fn services(&self, tenant_id: &str) -> impl Iterator<Item = &Service> {
        self.services.range(tenant_range(tenant_id)).map(|(_, s)| s)
    }

    pub fn service(&self, tenant_id: &str, id: i64) -> Option<&Service> {
        self.services.get(&(tenant_id.to_string(), id))
    }

    /// Insert or replace a service. An id of 0 asks for a fresh one.
    pub fn upsert_service(&mut self, mut service: Service) -> Result<Service> {
        if service.id <= 0 {
            service.id = self.sequences.next_service_id;
        }
        let next = service.id.checked_add(1).ok_or_else(|| {
            AppError::Validation(format!("service id {} is out of range", service.id))
        })?;
        if next > self.sequences.next_service_id {
            self.sequences_mut().next_service_id = next;
        }
        service.updated_at = Utc::now();

        self.put(Row::Service(service.clone()));
        Ok(service)
    }

    /// Fail with `ServiceNotFound` for the first id missing from the tenant
    pub fn require_services<'a>(
        &self,
        tenant_id: &str,
        ids: impl IntoIterator<Item = &'a i64>,
    ) -> Result<()> {
        for id in ids {
            if self.service(tenant_id, *id).is_none() {
                return Err(AppError::ServiceNotFound(id.to_string()));
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Dependencies
    // ------------------------------------------------------------------

    pub fn dependencies(&self, tenant_id: &str) -> impl Iterator<Item = &ServiceDependency> + '_ {
        let tenant_id = tenant_id.to_string();
        self.dependencies
            .values()
            .filter(move |d| d.tenant_id == tenant_id)
    }

    /// Insert an edge, or refresh the existing edge for the same ordered pair
    pub fn upsert_dependency(
        &mut self,
        tenant_id: &str,
        service_id: i64,
        depends_on_service_id: i64,
        protocol: Option<String>,
    ) -> Result<ServiceDependency> {
        self.require_services(tenant_id, [&service_id, &depends_on_service_id])?;

        let existing = self
            .dependencies(tenant_id)
            .find(|d| d.service_id == service_id && d.depends_on_service_id == depends_on_service_id)
            .map(|d| d.id);

        let id = match existing {
            Some(id) => id,
            None => {
                let sequences = self.sequences_mut();
                let id = sequences.next_dependency_id;
                sequences.next_dependency_id += 1;
                id
            }
        };

        let dependency = ServiceDependency {
            id,
            tenant_id: tenant_id.to_string(),
            service_id,
            depends_on_service_id,
            protocol,
            updated_at: Utc::now(),
        };
        self.put(Row::Dependency(dependency.clone()));
        Ok(dependency)
    }

    // ------------------------------------------------------------------
    // Applications
    // ------------------------------------------------------------------

    /// Applications of a tenant in creation order
    pub fn applications(&self, tenant_id: &str) -> Vec<&Application> {
        let mut applications: Vec<&Application> = self
            .applications
            .values()
            .filter(|a| a.tenant_id == tenant_id)
            .collect();
        applications.sort_by_key(|a| a.sequence);
        applications
    }

    pub fn application(&self, tenant_id: &str, id: Uuid) -> Option<&Application> {
        self.applications
            .get(&id)
            .filter(|a| a.tenant_id == tenant_id)
    }

    pub fn application_by_name(&self, tenant_id: &str, name: &str) -> Option<&Application> {
        self.applications
            .values()
            .find(|a| a.tenant_id == tenant_id && a.name == name)
    }

    /// Resolve member services; a dangling member id is `ServiceNotFound`
    pub fn application_view(&self, application: &Application) -> Result<ApplicationView> {
        let services = application
            .service_ids
            .iter()
            .map(|id| {
                self.service(&application.tenant_id, *id)
                    .map(Service::summary)
                    .ok_or_else(|| AppError::ServiceNotFound(id.to_string()))
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(ApplicationView {
            id: application.id,
            tenant_id: application.tenant_id.clone(),
            name: application.name.clone(),
            description: application.description.clone(),
            repository: application.repository.clone(),
            services,
        })
    }

    /// Insert a new application, or replace an existing one keeping its creation order
    pub fn save_application(&mut self, mut application: Application) -> Result<Application> {
        self.require_services(&application.tenant_id, &application.service_ids)?;

        match self.applications.get(&application.id) {
            Some(existing) => {
                if existing.tenant_id != application.tenant_id {
                    return Err(AppError::ApplicationNotFound(application.id));
                }
                application.sequence = existing.sequence;
                application.created_at = existing.created_at;
            }
            None => {
                let sequences = self.sequences_mut();
                application.sequence = sequences.next_application;
                sequences.next_application += 1;
            }
        }
        application.updated_at = Utc::now();

        self.put(Row::Application(application.clone()));
        Ok(application)
    }

    pub fn remove_application(&mut self, tenant_id: &str, id: Uuid) -> Result<Application> {
        if self.application(tenant_id, id).is_none() {
            return Err(AppError::ApplicationNotFound(id));
        }
        match self.remove(RowKey::Application(id)) {
            Some(Row::Application(application)) => Ok(application),
            _ => Err(AppError::ApplicationNotFound(id)),
        }
    }

    /// Applications that list `service_id` as a member
    pub fn applications_of_service(&self, tenant_id: &str, service_id: i64) -> Vec<Uuid> {
        self.applications(tenant_id)
            .into_iter()
            .filter(|a| a.service_ids.contains(&service_id))
            .map(|a| a.id)
            .collect()
    }

    // ------------------------------------------------------------------
    // Tenant-wide
    // ------------------------------------------------------------------

    /// Remove every service, application and dependency of a tenant
    pub fn clear_topology(&mut self, tenant_id: &str) -> TopologyCounts {
        let removed = self.counts(tenant_id);

        let mut keys: Vec<RowKey> = self
            .services
            .range(tenant_range(tenant_id))
            .map(|(key, _)| RowKey::Service(key.clone()))
            .collect();
        keys.extend(self.dependencies(tenant_id).map(|d| RowKey::Dependency(d.id)));
        keys.extend(
            self.applications(tenant_id)
                .into_iter()
                .map(|a| RowKey::Application(a.id)),
        );
        for key in keys {
            self.remove(key);
        }

        removed
    }

    pub fn counts(&self, tenant_id: &str) -> TopologyCounts {
        TopologyCounts {
            services: self.services(tenant_id).count(),
            applications: self.applications(tenant_id).len(),
            dependencies: self.dependencies(tenant_id).count(),
        }
    }

    /// Tenants that own at least one application
    pub fn tenants(&self) -> BTreeSet<String> {
        self.applications
            .values()
            .map(|a| a.tenant_id.clone())
            .collect()
    }

    // ------------------------------------------------------------------
    // Alerts
    // ------------------------------------------------------------------

    /// Store an alert event and point its fingerprint at it.
    ///
    /// The event it supersedes is dropped unless an incident references it.
    pub fn record_alert(&mut self, alert: Alert) {
        let previous = self.last_alert(&alert.tenant_id, &alert.fingerprint).cloned();

        let last = match &previous {
            Some(previous) => LastAlert {
                alert_id: alert.id,
                timestamp: alert.timestamp,
                ..previous.clone()
            },
            None => LastAlert {
                tenant_id: alert.tenant_id.clone(),
                fingerprint: alert.fingerprint.clone(),
                alert_id: alert.id,
                timestamp: alert.timestamp,
                first_timestamp: alert.timestamp,
            },
        };
        let alert_id = alert.id;
        self.put(Row::LastAlert(last));
        self.put(Row::Alert(alert));

        if let Some(previous) = previous {
            if previous.alert_id != alert_id && !self.is_referenced(previous.alert_id) {
                self.remove(RowKey::Alert(previous.alert_id));
            }
        }
    }

    pub fn alert(&self, id: Uuid) -> Option<&Alert> {
        self.alerts.get(&id)
    }

    pub fn last_alert(&self, tenant_id: &str, fingerprint: &str) -> Option<&LastAlert> {
        self.last_alerts
            .get(&(tenant_id.to_string(), fingerprint.to_string()))
    }

    /// Latest alert per fingerprint received at or after `since`
    pub fn recent_alerts(&self, tenant_id: &str, since: DateTime<Utc>) -> Vec<Alert> {
        self.last_alerts
            .values()
            .filter(|last| last.tenant_id == tenant_id)
            .filter_map(|last| self.alerts.get(&last.alert_id))
            .filter(|alert| alert.last_received >= since)
            .cloned()
            .collect()
    }

    fn is_referenced(&self, alert_id: Uuid) -> bool {
        self.alert_incidents
            .range((alert_id, Uuid::nil())..=(alert_id, Uuid::from_u128(u128::MAX)))
            .next()
            .is_some()
    }

    // ------------------------------------------------------------------
    // Incidents
    // ------------------------------------------------------------------

    pub fn incident(&self, tenant_id: &str, id: Uuid) -> Option<&Incident> {
        self.incidents.get(&id).filter(|i| i.tenant_id == tenant_id)
    }

    pub fn incidents(&self, tenant_id: &str) -> Vec<&Incident> {
        let mut incidents: Vec<&Incident> = self
            .incidents
            .values()
            .filter(|i| i.tenant_id == tenant_id)
            .collect();
        incidents.sort_by_key(|i| i.creation_time);
        incidents
    }

    /// The single open topology incident of an application, if any
    pub fn open_topology_incident(&self, tenant_id: &str, application_id: Uuid) -> Option<&Incident> {
        self.incidents
            .values()
            .find(|i| i.is_open_for_application(tenant_id, application_id))
    }

    /// Write a new incident and return it with its assigned identity
    pub fn insert_incident(&mut self, draft: NewIncident) -> Result<Incident> {
        if let Some(application_id) = draft.incident_application {
            if self
                .open_topology_incident(&draft.tenant_id, application_id)
                .is_some()
            {
                return Err(AppError::Storage(format!(
                    "application {} already has an open topology incident",
                    application_id
                )));
            }
        }

        let mut id = Uuid::new_v4();
        while self.incidents.contains_key(&id) {
            id = Uuid::new_v4();
        }

        let incident = draft.into_incident(id);
        self.put(Row::Incident(incident.clone()));
        Ok(incident)
    }

    fn tenant_incident(&self, tenant_id: &str, id: Uuid) -> Result<Incident> {
        self.incident(tenant_id, id)
            .cloned()
            .ok_or_else(|| AppError::NotFound(format!("Incident {} not found", id)))
    }

    /// Refresh an open incident seen again by a pass
    pub fn touch_incident(
        &mut self,
        tenant_id: &str,
        id: Uuid,
        affected_services: impl IntoIterator<Item = String>,
    ) -> Result<Incident> {
        let mut incident = self.tenant_incident(tenant_id, id)?;
        incident.affected_services.extend(affected_services);
        incident.last_seen_time = Utc::now();

        self.put(Row::Incident(incident.clone()));
        Ok(incident)
    }

    pub fn resolve_incident(&mut self, tenant_id: &str, id: Uuid) -> Result<Incident> {
        let mut incident = self.tenant_incident(tenant_id, id)?;
        if incident.status != IncidentStatus::Resolved {
            incident.status = IncidentStatus::Resolved;
            incident.resolved_at = Some(Utc::now());
            self.put(Row::Incident(incident.clone()));
        }
        Ok(incident)
    }

    /// Whether the alert is already associated with the incident
    pub fn is_attached(&self, incident_id: Uuid, alert_id: Uuid) -> bool {
        self.alert_to_incident.contains_key(&(incident_id, alert_id))
    }

    /// Associate alerts (by fingerprint) with an incident already written in this table set.
    ///
    /// Returns only the newly created associations. Fingerprints without a
    /// `LastAlert` row are skipped and reported through `unresolved`.
    pub fn attach_alerts<'a>(
        &mut self,
        tenant_id: &str,
        incident_id: Uuid,
        fingerprints: impl IntoIterator<Item = &'a str>,
        unresolved: &mut Vec<String>,
    ) -> Result<Vec<AlertToIncident>> {
        let Some(incident) = self.incident(tenant_id, incident_id).cloned() else {
            return Err(AppError::Internal(format!(
                "incident {} must be written before alerts are attached",
                incident_id
            )));
        };

        let now = Utc::now();
        let mut created = Vec::new();

        for fingerprint in fingerprints {
            let Some(alert_id) = self.last_alert(tenant_id, fingerprint).map(|l| l.alert_id) else {
                unresolved.push(fingerprint.to_string());
                continue;
            };
            if self.is_attached(incident_id, alert_id) {
                continue;
            }

            let association = AlertToIncident {
                tenant_id: tenant_id.to_string(),
                incident_id,
                alert_id,
                fingerprint: fingerprint.to_string(),
                timestamp: now,
            };
            self.put(Row::Association(association.clone()));
            created.push(association);
        }

        let total = self.incident_alerts(incident_id).len() as u32;
        if incident.alerts_count != total {
            self.put(Row::Incident(Incident {
                alerts_count: total,
                ..incident
            }));
        }

        Ok(created)
    }

    pub fn incident_alerts(&self, incident_id: Uuid) -> Vec<AlertToIncident> {
        self.alert_to_incident
            .range((incident_id, Uuid::nil())..=(incident_id, Uuid::from_u128(u128::MAX)))
            .map(|(_, a)| a.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tables_with_services(tenant: &str, names: &[&str]) -> TopologyTables {
        let mut tables = TopologyTables::new();
        for name in names {
            tables.upsert_service(Service::new(tenant, *name, *name)).unwrap();
        }
        tables
    }

    #[test]
    fn test_service_ids_follow_explicit_ids() {
        let mut tables = TopologyTables::new();
        let mut explicit = Service::new("t", "api", "API");
        explicit.id = 10;
        tables.upsert_service(explicit).unwrap();

        let next = tables.upsert_service(Service::new("t", "db", "DB")).unwrap();
        assert_eq!(next.id, 11);
        assert_eq!(tables.services("t").count(), 2);
        assert_eq!(tables.services("other").count(), 0);
    }

    #[test]
    fn test_dependency_upsert_is_keyed_by_pair() {
        let mut tables = tables_with_services("t", &["a", "b"]);
        let first = tables.upsert_dependency("t", 1, 2, None).unwrap();
        let again = tables
            .upsert_dependency("t", 1, 2, Some("http".to_string()))
            .unwrap();

        assert_eq!(first.id, again.id);
        assert_eq!(tables.dependencies("t").count(), 1);
        assert!(matches!(
            tables.upsert_dependency("t", 1, 7, None),
            Err(AppError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_applications_keep_creation_order() {
        let mut tables = tables_with_services("t", &["a", "b"]);
        let first = tables
            .save_application(Application::new("t", "Zeta").with_services([1]))
            .unwrap();
        tables
            .save_application(Application::new("t", "Alpha").with_services([2]))
            .unwrap();

        let mut renamed = first.clone();
        renamed.name = "Zeta 2".to_string();
        tables.save_application(renamed).unwrap();

        let names: Vec<_> = tables
            .applications("t")
            .iter()
            .map(|a| a.name.clone())
            .collect();
        assert_eq!(names, vec!["Zeta 2", "Alpha"]);
    }

    #[test]
    fn test_application_view_rejects_dangling_member() {
        let mut tables = tables_with_services("t", &["a"]);
        let mut application = Application::new("t", "App").with_services([1]);
        application = tables.save_application(application).unwrap();
        application.service_ids.insert(99);

        assert!(matches!(
            tables.application_view(&application),
            Err(AppError::ServiceNotFound(_))
        ));
    }

    #[test]
    fn test_attach_requires_written_incident() {
        let mut tables = TopologyTables::new();
        let mut unresolved = Vec::new();
        let result = tables.attach_alerts("t", Uuid::new_v4(), ["fp"], &mut unresolved);
        assert!(matches!(result, Err(AppError::Internal(_))));
    }

    #[test]
    fn test_attach_skips_unknown_and_existing() {
        let mut tables = TopologyTables::new();
        let alert = Alert::new("t", "fp-1", "cpu", Some("api".to_string()));
        tables.record_alert(alert.clone());

        let app_id = Uuid::new_v4();
        let incident = tables
            .insert_incident(NewIncident::for_application("t", app_id, "App", Vec::new()))
            .unwrap();

        let mut unresolved = Vec::new();
        let created = tables
            .attach_alerts("t", incident.id, ["fp-1", "fp-missing"], &mut unresolved)
            .unwrap();
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].alert_id, alert.id);
        assert_eq!(unresolved, vec!["fp-missing".to_string()]);

        unresolved.clear();
        let again = tables
            .attach_alerts("t", incident.id, ["fp-1"], &mut unresolved)
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(tables.incident("t", incident.id).unwrap().alerts_count, 1);
    }

    #[test]
    fn test_one_open_incident_per_application() {
        let mut tables = TopologyTables::new();
        let app_id = Uuid::new_v4();
        let first = tables
            .insert_incident(NewIncident::for_application("t", app_id, "App", Vec::new()))
            .unwrap();

        assert!(tables
            .insert_incident(NewIncident::for_application("t", app_id, "App", Vec::new()))
            .is_err());

        tables.resolve_incident("t", first.id).unwrap();
        assert!(tables.open_topology_incident("t", app_id).is_none());
        assert!(tables
            .insert_incident(NewIncident::for_application("t", app_id, "App", Vec::new()))
            .is_ok());
    }

    #[test]
    fn test_clear_topology_is_tenant_scoped() {
        let mut tables = tables_with_services("a", &["x", "y"]);
        tables.upsert_service(Service::new("b", "z", "z")).unwrap();
        tables.upsert_dependency("a", 1, 2, None).unwrap();
        tables
            .save_application(Application::new("a", "App").with_services([1, 2]))
            .unwrap();

        let removed = tables.clear_topology("a");
        assert_eq!(
            removed,
            TopologyCounts {
                services: 2,
                applications: 1,
                dependencies: 1
            }
        );
        assert_eq!(tables.counts("a"), TopologyCounts::default());
        assert_eq!(tables.counts("b").services, 1);
    }

    #[test]
    fn test_recent_alerts_uses_latest_event_per_fingerprint() {
        let mut tables = TopologyTables::new();
        let old = Alert::new("t", "fp", "cpu", Some("api".to_string()));
        let new = Alert::new("t", "fp", "cpu", Some("api".to_string()));
        tables.record_alert(old);
        tables.record_alert(new.clone());

        let recent = tables.recent_alerts("t", Utc::now() - chrono::Duration::minutes(5));
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, new.id);
    }

    #[test]
    fn test_service_id_at_upper_bound_is_rejected() {
        let mut tables = tables_with_services("t", &["a"]);
        tables.take_journal();

        let mut service = Service::new("t", "edge", "Edge");
        service.id = i64::MAX;
        assert!(matches!(
            tables.upsert_service(service),
            Err(AppError::Validation(_))
        ));
        assert_eq!(tables.services("t").count(), 1);
        assert!(tables.journal().is_empty());

        let next = tables.upsert_service(Service::new("t", "b", "B")).unwrap();
        assert_eq!(next.id, 2);
    }

    #[test]
    fn test_superseded_alert_is_pruned_unless_attached() {
        let mut tables = TopologyTables::new();
        let first = Alert::new("t", "fp", "cpu", Some("api".to_string()));
        let second = Alert::new("t", "fp", "cpu", Some("api".to_string()));
        tables.record_alert(first.clone());
        tables.record_alert(second.clone());

        assert!(tables.alert(first.id).is_none());
        assert_eq!(tables.alerts.len(), 1);

        let incident = tables
            .insert_incident(NewIncident::for_application("t", Uuid::new_v4(), "App", Vec::new()))
            .unwrap();
        tables
            .attach_alerts("t", incident.id, ["fp"], &mut Vec::new())
            .unwrap();

        let third = Alert::new("t", "fp", "cpu", Some("api".to_string()));
        tables.record_alert(third.clone());
        assert!(tables.alert(second.id).is_some());
        assert!(tables.alert(third.id).is_some());
        assert_eq!(tables.last_alert("t", "fp").unwrap().alert_id, third.id);
        assert_eq!(
            tables.last_alert("t", "fp").unwrap().first_timestamp,
            first.timestamp
        );
    }

    #[test]
    fn test_rollback_restores_rows_and_sequences() {
        let mut tables = tables_with_services("t", &["a", "b"]);
        tables
            .save_application(Application::new("t", "App").with_services([1, 2]))
            .unwrap();
        tables.take_journal();

        tables.upsert_service(Service::new("t", "c", "C")).unwrap();
        tables.upsert_dependency("t", 1, 2, None).unwrap();
        tables.clear_topology("t");
        tables.record_alert(Alert::new("t", "fp", "cpu", None));
        assert!(!tables.journal().is_empty());

        tables.rollback();

        assert_eq!(
            tables.counts("t"),
            TopologyCounts {
                services: 2,
                applications: 1,
                dependencies: 0
            }
        );
        assert!(tables.last_alert("t", "fp").is_none());
        assert!(tables.journal().is_empty());
        assert_eq!(tables.upsert_service(Service::new("t", "c", "C")).unwrap().id, 3);
        assert_eq!(tables.upsert_dependency("t", 1, 2, None).unwrap().id, 1);
    }

    #[test]
    fn test_journal_lists_touched_rows() {
        let mut tables = TopologyTables::new();
        let alert = Alert::new("t", "fp", "cpu", None);
        tables.record_alert(alert.clone());
        tables.record_alert(alert.clone());

        let journal = tables.take_journal();
        let touched: Vec<_> = journal.touched().into_iter().cloned().collect();
        assert_eq!(
            touched,
            vec![
                RowKey::Alert(alert.id),
                RowKey::LastAlert(("t".to_string(), "fp".to_string())),
            ]
        );
        assert!(tables.journal().is_empty());
        assert!(tables.row(&RowKey::Alert(alert.id)).is_some());
    }
}
