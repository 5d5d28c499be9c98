use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use strum::{Display, EnumString};
use uuid::Uuid;

/// Current firing alerts keyed by the service name they report on
pub type ServicesWithAlerts = BTreeMap<String, Vec<AlertView>>;

/// Lifecycle status reported for an alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, EnumString, Display)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AlertStatus {
    Firing,
    Resolved,
    Acknowledged,
    Suppressed,
    Pending,
}

/// Stored alert row, one per received event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier
    pub id: Uuid,

    pub tenant_id: String,

    /// Deduplication key shared by repeated events of the same alert
    pub fingerprint: String,

    pub provider_type: String,
    pub provider_id: String,

    pub name: String,
    pub status: AlertStatus,

    /// Service the alert reports on, if the source set one
    pub service: Option<String>,

    /// When the event was stored
    pub timestamp: DateTime<Utc>,

    /// When the source last reported the alert
    pub last_received: DateTime<Utc>,

    pub labels: HashMap<String, String>,
}

impl Alert {
    /// Create a firing alert for a service
    pub fn new(
        tenant_id: impl Into<String>,
        fingerprint: impl Into<String>,
        name: impl Into<String>,
        service: Option<String>,
    ) -> Self {
        let now = Utc::now();

        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            fingerprint: fingerprint.into(),
            provider_type: "unknown".to_string(),
            provider_id: "unknown".to_string(),
            name: name.into(),
            status: AlertStatus::Firing,
            service,
            timestamp: now,
            last_received: now,
            labels: HashMap::new(),
        }
    }

    pub fn with_provider(mut self, provider_type: impl Into<String>, provider_id: impl Into<String>) -> Self {
        self.provider_type = provider_type.into();
        self.provider_id = provider_id.into();
        self
    }

    pub fn with_status(mut self, status: AlertStatus) -> Self {
        self.status = status;
        self
    }

    /// Projection handed to the topology processor
    pub fn view(&self) -> AlertView {
        AlertView {
            id: self.id,
            name: self.name.clone(),
            fingerprint: self.fingerprint.clone(),
            status: self.status,
            service: self.service.clone(),
            last_received: self.last_received,
        }
    }
}

/// Latest alert row per (tenant, fingerprint)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LastAlert {
    pub tenant_id: String,
    pub fingerprint: String,
    pub alert_id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub first_timestamp: DateTime<Utc>,
}

/// Read-only alert state consumed by the correlation engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertView {
    pub id: Uuid,
    pub name: String,
    pub fingerprint: String,
    pub status: AlertStatus,
    pub service: Option<String>,
    pub last_received: DateTime<Utc>,
}

impl AlertView {
    pub fn is_firing(&self) -> bool {
        self.status == AlertStatus::Firing
    }
}

/// Group alert views by their service name, dropping alerts without one
pub fn group_by_service(alerts: impl IntoIterator<Item = AlertView>) -> ServicesWithAlerts {
    let mut grouped = ServicesWithAlerts::new();
    for alert in alerts {
        if let Some(service) = alert.service.clone() {
            grouped.entry(service).or_default().push(alert);
        }
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_alert_view_projection() {
        let alert = Alert::new("keep", "fp-1", "High latency", Some("api".to_string()))
            .with_provider("prometheus", "prom-1");

        let view = alert.view();
        assert_eq!(view.id, alert.id);
        assert_eq!(view.fingerprint, "fp-1");
        assert_eq!(view.service.as_deref(), Some("api"));
        assert!(view.is_firing());
    }

    #[test]
    fn test_status_strings() {
        assert_eq!(AlertStatus::Firing.to_string(), "firing");
        assert_eq!(AlertStatus::from_str("resolved").unwrap(), AlertStatus::Resolved);
    }

    #[test]
    fn test_group_by_service() {
        let a = Alert::new("keep", "fp-a", "a", Some("api".to_string())).view();
        let b = Alert::new("keep", "fp-b", "b", Some("api".to_string())).view();
        let c = Alert::new("keep", "fp-c", "c", Some("db".to_string())).view();
        let orphan = Alert::new("keep", "fp-d", "d", None).view();

        let grouped = group_by_service(vec![a, b, c, orphan]);
        assert_eq!(grouped.len(), 2);
        assert_eq!(grouped["api"].len(), 2);
        assert_eq!(grouped["db"].len(), 1);
    }
}
