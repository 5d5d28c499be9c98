use crate::api::{handlers, AppState};
use crate::metrics::track_http;
use axum::{
    middleware,
    routing::{get, post, put},
    Router,
};
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};

/// Build the main API router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        // Health and metrics
        .route("/health", get(handlers::health_check))
        .route("/metrics", get(handlers::metrics))
        // Topology
        .route("/topology", get(handlers::get_topology))
        .route(
            "/topology/applications",
            get(handlers::list_applications).post(handlers::create_application),
        )
        .route(
            "/topology/applications/:id",
            put(handlers::update_application).delete(handlers::delete_application),
        )
        .route("/topology/import", post(handlers::import_topology))
        // Alerts and incidents
        .route("/topology/alerts", post(handlers::submit_alert))
        .route("/topology/incidents", get(handlers::list_incidents))
        .route("/topology/incidents/:id/alerts", get(handlers::incident_alerts))
        .route("/topology/incidents/:id/resolve", post(handlers::resolve_incident))
        // Add state
        .with_state(state)
        // Add middleware
        .layer(middleware::from_fn(track_http))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .layer(CorsLayer::permissive())
}
