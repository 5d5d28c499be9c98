use crate::api::{ApiJson, AppState, Tenant};
use crate::error::Result;
use crate::metrics::gather_metrics;
use crate::models::*;
use axum::{
    extract::{Path, Query, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;
use validator::Validate;

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.topology.store().backend().to_string(),
    })
}

#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub backend: String,
}

/// Prometheus scrape endpoint
pub async fn metrics() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        gather_metrics(),
    )
}

/// Query string of `GET /topology`; list filters are comma separated
#[derive(Debug, Default, Deserialize)]
pub struct TopologyParams {
    #[serde(default)]
    pub include_empty_deps: bool,
    pub services: Option<String>,
    pub environment: Option<String>,
    pub provider_ids: Option<String>,
}

impl From<TopologyParams> for TopologyQuery {
    fn from(params: TopologyParams) -> Self {
        TopologyQuery {
            include_empty_deps: params.include_empty_deps,
            services: params.services.as_deref().map(split_list),
            environment: params.environment,
            provider_ids: params.provider_ids.as_deref().map(split_list),
        }
    }
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Service graph of the tenant
pub async fn get_topology(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Query(params): Query<TopologyParams>,
) -> Result<Json<Vec<ServiceView>>> {
    let query = TopologyQuery::from(params);
    let services = state.topology.get_all_topology_data(&tenant_id, &query).await?;
    Ok(Json(services))
}

pub async fn list_applications(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
) -> Result<Json<Vec<ApplicationView>>> {
    let applications = state.topology.get_applications_by_tenant_id(&tenant_id).await?;
    Ok(Json(applications))
}

pub async fn create_application(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    ApiJson(input): ApiJson<ApplicationInput>,
) -> Result<Json<ApplicationView>> {
    let application = state.topology.create_application(&tenant_id, input).await?;
    Ok(Json(application))
}

pub async fn update_application(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
    ApiJson(update): ApiJson<ApplicationUpdate>,
) -> Result<Json<ApplicationView>> {
    let application = state.topology.update_application(&tenant_id, id, update).await?;
    Ok(Json(application))
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MessageResponse {
    pub message: String,
}

pub async fn delete_application(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<MessageResponse>> {
    state.topology.delete_application(&tenant_id, id).await?;
    Ok(Json(MessageResponse {
        message: "Application deleted successfully".to_string(),
    }))
}

#[derive(Debug, Default, Deserialize)]
pub struct ImportParams {
    #[serde(default)]
    pub replace: bool,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ImportResponse {
    pub replace: bool,
    pub counts: TopologyCounts,
}

/// Bulk import; `replace=true` clears the tenant's topology first
pub async fn import_topology(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Query(params): Query<ImportParams>,
    ApiJson(payload): ApiJson<ImportPayload>,
) -> Result<Json<ImportResponse>> {
    let counts = state
        .topology
        .import_topology(&tenant_id, payload, params.replace)
        .await?;

    Ok(Json(ImportResponse {
        replace: params.replace,
        counts,
    }))
}

/// Alert event pushed by the ingestion pipeline
#[derive(Debug, Deserialize, Validate)]
pub struct SubmitAlertRequest {
    #[validate(length(min = 1, max = 255))]
    pub fingerprint: String,
    #[validate(length(min = 1, max = 500))]
    pub name: String,
    pub service: Option<String>,
    pub status: Option<AlertStatus>,
    pub provider_type: Option<String>,
    pub provider_id: Option<String>,
    #[serde(default)]
    pub labels: HashMap<String, String>,
}

pub async fn submit_alert(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    ApiJson(request): ApiJson<SubmitAlertRequest>,
) -> Result<(StatusCode, Json<AlertView>)> {
    request.validate()?;

    let mut alert = Alert::new(&tenant_id, request.fingerprint, request.name, request.service)
        .with_status(request.status.unwrap_or(AlertStatus::Firing));
    if let Some(provider_type) = request.provider_type {
        alert.provider_type = provider_type;
    }
    if let Some(provider_id) = request.provider_id {
        alert.provider_id = provider_id;
    }
    alert.labels = request.labels;

    let view = alert.view();
    state.topology.store().record_alert(alert).await?;

    tracing::debug!(tenant_id = %tenant_id, alert_id = %view.id, "Alert recorded");
    Ok((StatusCode::ACCEPTED, Json(view)))
}

#[derive(Debug, Default, Deserialize)]
pub struct IncidentParams {
    pub application_id: Option<Uuid>,
}

pub async fn list_incidents(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Query(params): Query<IncidentParams>,
) -> Json<Vec<Incident>> {
    Json(
        state
            .topology
            .list_incidents(&tenant_id, params.application_id)
            .await,
    )
}

pub async fn incident_alerts(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<AlertToIncident>>> {
    let alerts = state.topology.incident_alerts(&tenant_id, id).await?;
    Ok(Json(alerts))
}

pub async fn resolve_incident(
    State(state): State<AppState>,
    Tenant(tenant_id): Tenant,
    Path(id): Path<Uuid>,
) -> Result<Json<Incident>> {
    let incident = state.processor.resolve_incident(&tenant_id, id).await?;
    Ok(Json(incident))
}
