use crate::error::{AppError, Result};
use crate::models::Service;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use validator::Validate;

/// Full topology document accepted by the import operation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImportPayload {
    #[serde(default)]
    pub services: Vec<ImportService>,
    #[serde(default)]
    pub applications: Vec<ImportApplication>,
    #[serde(default)]
    pub dependencies: Vec<ImportDependency>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ImportService {
    /// External id, kept as the service id
    #[validate(range(min = 1))]
    pub id: i64,
    #[validate(length(min = 1, max = 255))]
    pub service: String,
    #[validate(length(min = 1, max = 255))]
    pub display_name: String,
    pub environment: Option<String>,
    pub source_provider_id: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub repository: Option<String>,
    pub description: Option<String>,
    pub team: Option<String>,
    pub email: Option<String>,
    pub slack: Option<String>,
    pub ip_address: Option<String>,
    pub mac_address: Option<String>,
    pub category: Option<String>,
    pub manufacturer: Option<String>,
    pub namespace: Option<String>,
    #[serde(default)]
    pub is_manual: bool,
}

impl ImportService {
    pub fn into_service(self, tenant_id: &str) -> Service {
        Service {
            id: self.id,
            tenant_id: tenant_id.to_string(),
            source_provider_id: self.source_provider_id,
            service: self.service,
            display_name: self.display_name,
            environment: self.environment.unwrap_or_else(|| "unknown".to_string()),
            repository: self.repository,
            tags: self.tags,
            description: self.description,
            team: self.team,
            email: self.email,
            slack: self.slack,
            ip_address: self.ip_address,
            mac_address: self.mac_address,
            category: self.category,
            manufacturer: self.manufacturer,
            namespace: self.namespace,
            is_manual: self.is_manual,
            updated_at: Utc::now(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ImportApplication {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    pub repository: Option<String>,
    /// External service ids
    #[serde(default)]
    pub services: Vec<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportDependency {
    pub service_id: i64,
    pub depends_on_service_id: i64,
    pub protocol: Option<String>,
}

impl ImportPayload {
    /// Check field rules and cross references before anything is written
    pub fn check(&self) -> Result<()> {
        let mut service_ids = HashSet::new();
        for service in &self.services {
            service.validate()?;
            if !service_ids.insert(service.id) {
                return Err(AppError::Validation(format!(
                    "duplicate service id {} in import",
                    service.id
                )));
            }
        }

        let mut application_names = HashSet::new();
        for application in &self.applications {
            application.validate()?;
            if !application_names.insert(application.name.as_str()) {
                return Err(AppError::Validation(format!(
                    "duplicate application name '{}' in import",
                    application.name
                )));
            }
            if let Some(missing) = application
                .services
                .iter()
                .find(|id| !service_ids.contains(*id))
            {
                return Err(AppError::ServiceNotFound(missing.to_string()));
            }
        }

        for dependency in &self.dependencies {
            for id in [dependency.service_id, dependency.depends_on_service_id] {
                if !service_ids.contains(&id) {
                    return Err(AppError::ServiceNotFound(id.to_string()));
                }
            }
        }

        Ok(())
    }
}
