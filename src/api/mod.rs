pub mod handlers;
pub mod routes;

pub use routes::*;

use crate::error::AppError;
use crate::processing::TopologyProcessor;
use crate::topology::TopologyQueryService;
use axum::{
    async_trait,
    extract::{FromRef, FromRequest, FromRequestParts},
    http::request::Parts,
};
use std::convert::Infallible;
use std::sync::Arc;

/// Header carrying the caller's tenant
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub topology: Arc<TopologyQueryService>,
    pub processor: Arc<TopologyProcessor>,
    pub default_tenant: Arc<str>,
}

impl AppState {
    pub fn new(
        topology: Arc<TopologyQueryService>,
        processor: Arc<TopologyProcessor>,
        default_tenant: impl Into<Arc<str>>,
    ) -> Self {
        Self {
            topology,
            processor,
            default_tenant: default_tenant.into(),
        }
    }
}

/// JSON request body; malformed or mistyped bodies are rejected as `VALIDATION_ERROR`
#[derive(Debug, Clone, FromRequest)]
#[from_request(via(axum::Json), rejection(AppError))]
pub struct ApiJson<T>(pub T);

/// Tenant of the current request, from `x-tenant-id` or the configured default
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tenant(pub String);

#[async_trait]
impl<S> FromRequestParts<S> for Tenant
where
    AppState: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let tenant = parts
            .headers
            .get(TENANT_HEADER)
            .and_then(|value| value.to_str().ok())
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .map(str::to_string);

        Ok(Tenant(tenant.unwrap_or_else(|| {
            AppState::from_ref(state).default_tenant.to_string()
        })))
    }
}
