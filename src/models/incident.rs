use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use strum::{Display, EnumString};
use uuid::Uuid;

/// Represents a correlated impact event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Incident {
    /// Unique identifier, assigned when the incident is first written
    pub id: Uuid,

    pub tenant_id: String,

    /// Human-readable title
    pub user_generated_name: String,

    /// Short description of the impact
    pub user_summary: String,

    pub incident_type: IncidentType,

    /// Owning application for topology incidents
    pub incident_application: Option<Uuid>,

    /// Not yet confirmed by a user or rule
    pub is_candidate: bool,

    pub is_visible: bool,

    pub status: IncidentStatus,

    pub creation_time: DateTime<Utc>,

    /// Last time a pass touched this incident
    pub last_seen_time: DateTime<Utc>,

    pub resolved_at: Option<DateTime<Utc>>,

    /// Service names seen impacted across passes
    pub affected_services: BTreeSet<String>,

    /// Number of associated alerts
    pub alerts_count: u32,
}

impl Incident {
    /// Check if incident is still open
    pub fn is_open(&self) -> bool {
        self.status != IncidentStatus::Resolved
    }

    /// Open topology incident for `application_id`
    pub fn is_open_for_application(&self, tenant_id: &str, application_id: Uuid) -> bool {
        self.tenant_id == tenant_id
            && self.incident_type == IncidentType::Topology
            && self.incident_application == Some(application_id)
            && self.is_open()
    }
}

/// Incident fields known before the store assigns an identity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewIncident {
    pub tenant_id: String,
    pub user_generated_name: String,
    pub user_summary: String,
    pub incident_type: IncidentType,
    pub incident_application: Option<Uuid>,
    pub is_candidate: bool,
    pub is_visible: bool,
    pub affected_services: BTreeSet<String>,
}

impl NewIncident {
    /// Draft of the incident raised when several services of an application are impacted
    pub fn for_application(
        tenant_id: impl Into<String>,
        application_id: Uuid,
        application_name: &str,
        affected_services: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            user_generated_name: format!("Application incident: {}", application_name),
            user_summary: format!(
                "Multiple services in application {} are experiencing issues",
                application_name
            ),
            incident_type: IncidentType::Topology,
            incident_application: Some(application_id),
            is_candidate: false,
            is_visible: true,
            affected_services: affected_services.into_iter().collect(),
        }
    }

    /// Give the draft its durable identity
    pub fn into_incident(self, id: Uuid) -> Incident {
        let now = Utc::now();

        Incident {
            id,
            tenant_id: self.tenant_id,
            user_generated_name: self.user_generated_name,
            user_summary: self.user_summary,
            incident_type: self.incident_type,
            incident_application: self.incident_application,
            is_candidate: self.is_candidate,
            is_visible: self.is_visible,
            status: IncidentStatus::Firing,
            creation_time: now,
            last_seen_time: now,
            resolved_at: None,
            affected_services: self.affected_services,
            alerts_count: 0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentType {
    Manual,
    Rule,
    Topology,
    Ai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentStatus {
    Firing,
    Acknowledged,
    Resolved,
}

/// Action reported to the workflow dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum IncidentAction {
    Created,
    Updated,
    Resolved,
}

/// Association between an alert and an incident
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertToIncident {
    pub tenant_id: String,
    pub incident_id: Uuid,
    pub alert_id: Uuid,
    pub fingerprint: String,
    pub timestamp: DateTime<Utc>,
}
