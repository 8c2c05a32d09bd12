//! Shared application state
//!
//! Everything a request handler needs, Arc-wrapped so the router can clone
//! it per request. Built once during startup and read-only afterwards;
//! interior mutability lives inside the registry and the collector.

use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::info;

use crate::{config::Config, metrics::MetricsCollector, registry::ModelRegistry};

#[derive(Clone)]
pub struct AppState {
    /// Configuration (read-only after initialization)
    pub config: Arc<Config>,

    pub registry: Arc<ModelRegistry>,

    pub metrics: Arc<MetricsCollector>,

    /// Caps how many forward passes run on the blocking pool at once
    pub inference_permits: Arc<Semaphore>,
}

impl AppState {
    pub fn new(config: Config, registry: Arc<ModelRegistry>, metrics: Arc<MetricsCollector>) -> Self {
        let permits = config.inference_threads.max(1);
        info!("Initializing shared state with {} inference permits", permits);

        Self {
            config: Arc::new(config),
            registry,
            metrics,
            inference_permits: Arc::new(Semaphore::new(permits)),
        }
    }

    /// Model used when a request does not name one
    pub fn resolve_model_name<'a>(&'a self, requested: Option<&'a str>) -> &'a str {
        requested.unwrap_or(self.config.default_model.as_str())
    }
}
