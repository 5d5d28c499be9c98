use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use uuid::Uuid;
use validator::Validate;

/// A service node in a tenant's topology
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Service {
    /// Tenant-scoped identifier (0 until the store assigns one)
    pub id: i64,

    /// Owning tenant
    pub tenant_id: String,

    /// Provider that reported this service, if discovered
    pub source_provider_id: Option<String>,

    /// Logical service name, matched against alert `service` fields
    pub service: String,

    /// Human-readable name
    pub display_name: String,

    pub environment: String,
    pub repository: Option<String>,
    pub tags: Vec<String>,
    pub description: Option<String>,
    pub team: Option<String>,
    pub email: Option<String>,
    pub slack: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub namespace: Option<String>,

    /// Created by hand rather than by a topology provider
    pub is_manual: bool,

    pub updated_at: DateTime<Utc>,
}

impl Service {
    /// Create a service with only the required fields set
    pub fn new(tenant_id: impl Into<String>, service: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: 0,
            tenant_id: tenant_id.into(),
            source_provider_id: None,
            service: service.into(),
            display_name: display_name.into(),
            environment: "unknown".to_string(),
            repository: None,
            tags: Vec::new(),
            description: None,
            team: None,
            email: None,
            slack: None,
            ip_address: None,
            mac_address: None,
            category: None,
            manufacturer: None,
            namespace: None,
            is_manual: false,
            updated_at: Utc::now(),
        }
    }

    /// Short form used inside application views
    pub fn summary(&self) -> ServiceSummary {
        ServiceSummary {
            id: self.id,
            service: self.service.clone(),
            name: self.display_name.clone(),
        }
    }
}

/// Directed edge: `service_id` depends on `depends_on_service_id`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceDependency {
    pub id: i64,
    pub tenant_id: String,
    pub service_id: i64,
    pub depends_on_service_id: i64,
    pub protocol: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceDependency {
    /// Whether this edge touches the given service in either direction
    pub fn touches(&self, service_id: i64) -> bool {
        self.service_id == service_id || self.depends_on_service_id == service_id
    }
}

/// Named grouping of services, stored with raw member ids
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Application {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub repository: Option<String>,

    /// Member service ids
    pub service_ids: BTreeSet<i64>,

    /// Store-assigned creation sequence, used for ordering
    pub sequence: u64,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Application {
    /// Create an application that has not been stored yet
    pub fn new(tenant_id: impl Into<String>, name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            tenant_id: tenant_id.into(),
            name: name.into(),
            description: None,
            repository: None,
            service_ids: BTreeSet::new(),
            sequence: 0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_services(mut self, service_ids: impl IntoIterator<Item = i64>) -> Self {
        self.service_ids = service_ids.into_iter().collect();
        self
    }
}

/// Service reference as carried in application payloads
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub id: i64,
}

/// Minimal service data embedded in application views
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceSummary {
    pub id: i64,
    pub service: String,
    pub name: String,
}

/// Application with its member services resolved
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApplicationView {
    pub id: Uuid,
    pub tenant_id: String,
    pub name: String,
    pub description: Option<String>,
    pub repository: Option<String>,
    pub services: Vec<ServiceSummary>,
}

impl ApplicationView {
    /// Whether `service` names one of the member services
    pub fn has_service(&self, service: &str) -> bool {
        self.services.iter().any(|s| s.service == service)
    }
}

/// Payload for creating an application
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApplicationInput {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub repository: Option<String>,
    #[serde(default)]
    pub services: Vec<ServiceRef>,
}

impl ApplicationInput {
    pub fn new(name: impl Into<String>, services: impl IntoIterator<Item = i64>) -> Self {
        Self {
            name: name.into(),
            description: None,
            repository: None,
            services: services.into_iter().map(|id| ServiceRef { id }).collect(),
        }
    }
}

/// Payload for updating an application
///
/// `services: None` keeps the current membership; `Some` replaces it wholesale.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ApplicationUpdate {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub repository: Option<String>,
    pub services: Option<Vec<ServiceRef>>,
}

/// Outgoing edge as shown on a service view
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DependencyView {
    pub id: i64,
    pub service_id: i64,
    pub service_name: String,
    pub protocol: Option<String>,
}

/// Service with its outgoing dependencies and application memberships
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceView {
    #[serde(flatten)]
    pub service: Service,
    pub dependencies: Vec<DependencyView>,
    pub application_ids: Vec<Uuid>,
}

/// Filters for topology listings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TopologyQuery {
    /// Include services without any dependency edge
    #[serde(default)]
    pub include_empty_deps: bool,

    /// Restrict to these logical service names
    pub services: Option<Vec<String>>,

    /// Restrict to one environment
    pub environment: Option<String>,

    /// Restrict to services reported by these providers
    pub provider_ids: Option<Vec<String>>,
}

impl TopologyQuery {
    pub fn include_empty_deps() -> Self {
        Self {
            include_empty_deps: true,
            ..Default::default()
        }
    }

    /// Whether a service passes the name/environment/provider filters
    pub fn matches(&self, service: &Service) -> bool {
        let name_match = self
            .services
            .as_ref()
            .map_or(true, |names| names.iter().any(|n| n == &service.service));

        let environment_match = self
            .environment
            .as_ref()
            .map_or(true, |env| env == &service.environment);

        let provider_match = self.provider_ids.as_ref().map_or(true, |providers| {
            service
                .source_provider_id
                .as_ref()
                .is_some_and(|p| providers.contains(p))
        });

        name_match && environment_match && provider_match
    }
}

/// Row counts of a tenant's topology
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopologyCounts {
    pub services: usize,
    pub applications: usize,
    pub dependencies: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_defaults() {
        let service = Service::new("tenant-a", "checkout", "Checkout");
        assert_eq!(service.id, 0);
        assert_eq!(service.environment, "unknown");
        assert!(!service.is_manual);
        assert_eq!(service.summary().name, "Checkout");
    }

    #[test]
    fn test_dependency_touches() {
        let dep = ServiceDependency {
            id: 1,
            tenant_id: "t".to_string(),
            service_id: 1,
            depends_on_service_id: 2,
            protocol: None,
            updated_at: Utc::now(),
        };
        assert!(dep.touches(1));
        assert!(dep.touches(2));
        assert!(!dep.touches(3));
    }

    #[test]
    fn test_query_filters() {
        let mut service = Service::new("t", "payments", "Payments");
        service.environment = "prod".to_string();
        service.source_provider_id = Some("datadog".to_string());

        assert!(TopologyQuery::default().matches(&service));

        let query = TopologyQuery {
            services: Some(vec!["payments".to_string()]),
            environment: Some("prod".to_string()),
            provider_ids: Some(vec!["datadog".to_string()]),
            ..Default::default()
        };
        assert!(query.matches(&service));

        let query = TopologyQuery {
            environment: Some("staging".to_string()),
            ..Default::default()
        };
        assert!(!query.matches(&service));

        let query = TopologyQuery {
            provider_ids: Some(vec!["pagerduty".to_string()]),
            ..Default::default()
        };
        assert!(!query.matches(&service));
    }

    #[test]
    fn test_application_input_validation() {
        let input = ApplicationInput::new("", [1]);
        assert!(input.validate().is_err());

        let input = ApplicationInput::new("Storefront", [1, 2]);
        assert!(input.validate().is_ok());
        assert_eq!(input.services.len(), 2);
    }
}
