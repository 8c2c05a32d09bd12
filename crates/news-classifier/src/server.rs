//! Server startup
//!
//! Reads the model catalog, builds the registry and the shared state, and
//! serves the HTTP API until Ctrl-C. Models are registered here but loaded
//! lazily by the first request that needs them.

use std::{path::Path, sync::Arc, time::Duration};

use anyhow::Context;
use axum::{
    http::{HeaderValue, Method},
    routing::{get, post},
    Router,
};
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, Any, CorsLayer},
    services::ServeDir,
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};

use crate::{
    api,
    config::{Config, CorsOrigins},
    device,
    metrics::MetricsCollector,
    model_runtime::RuntimeManager,
    registry::{DuplicatePolicy, ModelRegistry},
    shared_state::AppState,
};

/// Run the classification server until shutdown
pub async fn run_server(cfg: Config) -> anyhow::Result<()> {
    crate::telemetry::init_tracing();
    crate::metrics::init_metrics();
    cfg.print_config();

    info!("Starting news classifier");

    let registry = build_registry(&cfg)?;
    info!("Registered models: {:?}", registry.list_models());

    let state = AppState::new(cfg.clone(), Arc::new(registry), Arc::new(MetricsCollector::new()));

    let addr = cfg.api_addr()?;
    info!("Starting HTTP server on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;

    let app = build_router(state);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Shutting down news classifier");
    Ok(())
}

/// Registry over the configured catalog. A malformed catalog is fatal.
pub fn build_registry(cfg: &Config) -> anyhow::Result<ModelRegistry> {
    let catalog = cfg
        .load_catalog()
        .with_context(|| format!("failed to load model catalog {}", cfg.model_config))?;

    let policy = if cfg.strict_model_names {
        DuplicatePolicy::Reject
    } else {
        DuplicatePolicy::LastWins
    };

    let registry = ModelRegistry::new(Arc::new(RuntimeManager::new()), device::default_probe())
        .with_duplicate_policy(policy);
    registry
        .load_registry(catalog.models)
        .context("invalid model catalog")?;

    if !registry.list_models().contains(&cfg.default_model) {
        warn!(
            "Default model '{}' is not in the catalog; requests without a model will get 404",
            cfg.default_model
        );
    }

    Ok(registry)
}

/// Build the API router over `state`
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors_origins);
    let timeout = Duration::from_secs(state.config.request_timeout_seconds);
    let static_dir = state.config.static_dir.clone();

    let mut router: Router<AppState> = Router::new()
        .route("/health", get(api::health))
        .route("/models", get(api::list_models))
        .route("/labels", get(api::labels))
        .route("/predict", post(api::predict))
        .route("/predict/batch", post(api::predict_batch))
        .route("/metrics", get(api::metrics))
        .route("/metrics/reset", post(api::reset_metrics))
        .route("/metrics/prometheus", get(api::prometheus_metrics));

    // UI assets go last so they never shadow an API route
    if Path::new(&static_dir).is_dir() {
        info!("Serving static files from {}", static_dir);
        router = router.fallback_service(ServeDir::new(static_dir).append_index_html_on_directories(true));
    }

    router
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(timeout))
                .layer(cors),
        )
        .with_state(state)
}

fn cors_layer(origins: &CorsOrigins) -> CorsLayer {
    let allow_origin = match origins {
        CorsOrigins::Any => AllowOrigin::from(Any),
        CorsOrigins::List(list) => {
            let parsed: Vec<HeaderValue> = list
                .iter()
                .filter_map(|origin| match origin.parse::<HeaderValue>() {
                    Ok(value) => Some(value),
                    Err(_) => {
                        warn!("Ignoring invalid CORS origin '{}'", origin);
                        None
                    }
                })
                .collect();
            AllowOrigin::list(parsed)
        }
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(Any)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
