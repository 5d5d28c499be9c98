use std::sync::Arc;
use std::time::Duration;
use topology_incident_manager::{
    api::{build_router, AppState},
    config::Config,
    notifications::{BroadcastDispatcher, FanoutDispatcher, WebhookDispatcher, WorkflowDispatcher},
    processing::{TopologyProcessor, TopologyScanner},
    state::create_store,
    topology::TopologyQueryService,
};
use tower_http::timeout::TimeoutLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

fn init_tracing(config: &Config) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "topology_incident_manager={},tower_http=info",
            config.observability.log_level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.observability.json_logs {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn build_dispatcher(
    config: &Config,
    broadcast: BroadcastDispatcher,
) -> anyhow::Result<Arc<dyn WorkflowDispatcher>> {
    let mut fanout = FanoutDispatcher::new().with(Arc::new(broadcast));

    if config.workflow.webhook_enabled {
        let url = config
            .workflow
            .webhook_url
            .as_ref()
            .ok_or_else(|| {
                anyhow::anyhow!("workflow.webhook_url is required when webhooks are enabled")
            })?;
        let webhook = WebhookDispatcher::new(url.clone(), config.workflow.webhook_timeout_secs)?;
        tracing::info!(url = %url, "Workflow webhook enabled");
        fanout = fanout.with(Arc::new(webhook));
    }

    Ok(Arc::new(fanout))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Config::load()?;
    init_tracing(&config);

    tracing::info!(
        service = %config.observability.service_name,
        version = env!("CARGO_PKG_VERSION"),
        "Starting topology incident manager"
    );

    // Initialize Prometheus metrics
    if config.observability.prometheus_enabled {
        if let Err(e) = topology_incident_manager::metrics::init_metrics() {
            tracing::warn!("Failed to initialize metrics: {}", e);
        }
    } else {
        tracing::info!("Prometheus metrics disabled in configuration");
    }

    // Initialize storage backend
    let store = create_store(&config.state)?;
    tracing::info!(backend = store.backend(), "Storage backend initialized");

    let broadcast = BroadcastDispatcher::new(config.workflow.broadcast_capacity);
    let dispatcher = build_dispatcher(&config, broadcast)?;

    let topology = Arc::new(TopologyQueryService::new(store.clone()));
    let processor = Arc::new(TopologyProcessor::from_config(
        store,
        dispatcher,
        &config.processor,
    ));
    tracing::info!(
        min_impacted_services = processor.min_impacted_services(),
        "Topology processor initialized"
    );

    let scanner = TopologyScanner::new(processor.clone(), &config.processor);
    if config.processor.scan_enabled {
        scanner.start().await?;
    }

    let app_state = AppState::new(
        topology,
        processor,
        config.tenancy.default_tenant_id.clone(),
    );
    let app = build_router(app_state).layer(TimeoutLayer::new(Duration::from_secs(
        config.server.request_timeout_secs,
    )));

    let http_addr = format!("{}:{}", config.server.host, config.server.http_port);
    let http_listener = tokio::net::TcpListener::bind(&http_addr).await?;
    tracing::info!("HTTP API server listening on http://{}", http_addr);

    let http_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(http_listener, app).await {
            tracing::error!("HTTP server error: {}", e);
        }
    });

    tokio::select! {
        _ = http_handle => {
            tracing::warn!("HTTP server stopped");
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Shutdown signal received");
        }
    }

    if scanner.is_running().await {
        scanner.stop().await?;
    }
    tracing::info!("Shutting down gracefully...");
    Ok(())
}
