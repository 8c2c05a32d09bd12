//! Runtime Manager
//!
//! Picks a runtime for a model artifact based on its detected format and
//! materializes it. This is the production [`ModelLoader`].

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::{error, info};

use super::format_detector::FormatDetector;
use super::lexicon_runtime::LexiconRuntime;
use super::runtime_trait::*;
use crate::config::ModelSpec;
use crate::device::Device;
use crate::error::{ClassifierError, Result};

#[derive(Debug, Clone, Copy, Default)]
pub struct RuntimeManager;

impl RuntimeManager {
    pub fn new() -> Self {
        Self
    }

    /// Formats with a runtime compiled into this build
    pub fn available_formats() -> &'static [ModelFormat] {
        &[ModelFormat::Lexicon]
    }
}

#[async_trait]
impl ModelLoader for RuntimeManager {
    async fn load(&self, spec: &ModelSpec, device: Device) -> Result<LoadedRuntime> {
        let path = PathBuf::from(&spec.path);
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(ClassifierError::load(
                &spec.name,
                format!("artifact path {} does not exist", path.display()),
            ));
        }

        let detected = {
            let path = path.clone();
            tokio::task::spawn_blocking(move || FormatDetector::detect_from_path(&path))
                .await
                .map_err(|e| ClassifierError::load(&spec.name, format!("format detection failed: {}", e)))?
        };
        let format = detected.ok_or_else(|| {
            ClassifierError::load(
                &spec.name,
                format!(
                    "could not detect model format of {}; supported extensions: {:?}",
                    path.display(),
                    FormatDetector::supported_extensions()
                ),
            )
        })?;

        info!("Initializing {} runtime for '{}' on {}", format.name(), spec.name, device);

        let runtime = match format {
            ModelFormat::Lexicon => LexiconRuntime::load(spec, &path, device).await,
            other => Err(ClassifierError::load(
                &spec.name,
                format!(
                    "no runtime for {} artifacts is compiled into this build (available: {})",
                    other.name(),
                    Self::available_formats()
                        .iter()
                        .map(|f| f.name())
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            )),
        };

        runtime.map_err(|e| {
            error!("Failed to initialize {} runtime for '{}': {}", format.name(), spec.name, e);
            e
        })
    }
}
