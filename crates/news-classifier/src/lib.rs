//! Multi-model text classification: a registry of lazily loaded models, a
//! stateless inference engine and request telemetry, with an optional HTTP
//! server behind the `cli` feature.

pub mod config;
pub mod device;
pub mod error;
pub mod inference;
pub mod metrics;
pub mod model_runtime;
pub mod registry;
pub mod shared_state;
pub mod telemetry;

#[cfg(feature = "cli")]
pub mod api;
#[cfg(feature = "cli")]
pub mod server;

// Public API exports
pub use config::{Config, ModelCatalog, ModelSpec};
pub use device::{Device, DeviceSpec};
pub use error::{ClassifierError, ErrorKind, Result};
pub use inference::{predict_batch, predict_one, InferenceResult};
pub use metrics::{MetricsCollector, MetricsSnapshot, RequestTimer};
pub use registry::{ModelBundle, ModelHandle, ModelRegistry};
pub use shared_state::AppState;

#[cfg(feature = "cli")]
pub use server::{build_router, run_server};
