//! Model registry and lazily-loaded model bundles.
//!
//! The registry maps a model name to exactly one [`ModelBundle`]. A bundle is
//! created unloaded and materializes its runtime on first use. Loading goes
//! through a per-bundle one-shot cell: concurrent first callers for the same
//! name wait for a single load, callers for different names never contend, and
//! a failed load leaves the cell empty so a later call can retry.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tracing::{error, info, warn};

use crate::config::ModelSpec;
use crate::device::{AcceleratorProbe, Device, DeviceSpec};
use crate::error::{ClassifierError, Result};
use crate::model_runtime::{LoadedRuntime, ModelLoader, RuntimeMetadata, SequenceClassifier, TextTokenizer};

/// What to do when the catalog names the same model twice
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DuplicatePolicy {
    /// Later entries replace earlier ones
    #[default]
    LastWins,
    /// Duplicates are a configuration error
    Reject,
}

/// Runtime state of a loaded bundle
#[derive(Debug)]
pub struct BundleState {
    pub device: Device,
    pub id2label: Vec<String>,
    runtime: LoadedRuntime,
}

impl BundleState {
    pub fn metadata(&self) -> &RuntimeMetadata {
        &self.runtime.metadata
    }
}

#[derive(Debug)]
pub struct ModelBundle {
    spec: ModelSpec,
    state: OnceCell<Arc<BundleState>>,
    load_count: AtomicUsize,
}

impl ModelBundle {
    pub fn new(spec: ModelSpec) -> Self {
        Self {
            spec,
            state: OnceCell::new(),
            load_count: AtomicUsize::new(0),
        }
    }

    pub fn spec(&self) -> &ModelSpec {
        &self.spec
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn is_loaded(&self) -> bool {
        self.state.initialized()
    }

    /// Number of completed load sequences; never exceeds one
    pub fn load_count(&self) -> usize {
        self.load_count.load(Ordering::Acquire)
    }

    /// Device chosen at load time, `None` while unloaded
    pub fn device(&self) -> Option<Device> {
        self.state.get().map(|state| state.device)
    }

    /// Load the bundle if needed and return its state.
    ///
    /// Only one caller runs the load sequence; others wait for it. Nothing is
    /// stored unless every step succeeds.
    pub async fn load(
        &self,
        loader: &dyn ModelLoader,
        probe: &Arc<dyn AcceleratorProbe>,
    ) -> Result<Arc<BundleState>> {
        let state = self
            .state
            .get_or_try_init(|| async {
                let device = self.resolve_device(probe).await?;
                info!("Loading model {} from {} (device: {})", self.spec.name, self.spec.path, device);

                let runtime = loader.load(&self.spec, device).await.map_err(|e| {
                    error!("Error loading model {}: {}", self.spec.name, e);
                    e
                })?;
                let id2label = derive_id2label(&self.spec.name, runtime.model.as_ref())?;

                self.load_count.fetch_add(1, Ordering::AcqRel);
                info!(
                    "Model {} loaded successfully on {} ({} labels, runtime: {})",
                    self.spec.name,
                    device,
                    id2label.len(),
                    runtime.metadata.runtime_name
                );

                Ok::<_, ClassifierError>(Arc::new(BundleState {
                    device,
                    id2label,
                    runtime,
                }))
            })
            .await?;

        Ok(state.clone())
    }
}

impl ModelBundle {
    /// Accelerator probes may call into driver libraries, so `auto` is
    /// resolved on the blocking pool
    async fn resolve_device(&self, probe: &Arc<dyn AcceleratorProbe>) -> Result<Device> {
        match self.spec.device {
            DeviceSpec::Explicit(device) => Ok(device),
            DeviceSpec::Auto => {
                let probe = Arc::clone(probe);
                tokio::task::spawn_blocking(move || DeviceSpec::Auto.resolve(probe.as_ref()))
                    .await
                    .map_err(|e| ClassifierError::load(&self.spec.name, format!("device probe failed: {}", e)))
            }
        }
    }
}

/// Prefer the labels embedded in the model; otherwise `LABEL_0..LABEL_{n-1}`
fn derive_id2label(model_name: &str, model: &dyn SequenceClassifier) -> Result<Vec<String>> {
    let num_labels = model.num_labels();
    if num_labels == 0 {
        return Err(ClassifierError::load(model_name, "model reports zero output classes"));
    }

    match model.embedded_labels() {
        Some(labels) if labels.len() == num_labels => Ok(labels),
        Some(labels) => Err(ClassifierError::load(
            model_name,
            format!("model has {} classes but {} labels", num_labels, labels.len()),
        )),
        None => Ok((0..num_labels).map(|i| format!("LABEL_{}", i)).collect()),
    }
}

/// A loaded model, ready for inference. Cheap to clone.
#[derive(Debug, Clone)]
pub struct ModelHandle {
    bundle: Arc<ModelBundle>,
    state: Arc<BundleState>,
}

impl ModelHandle {
    pub fn bundle(&self) -> &Arc<ModelBundle> {
        &self.bundle
    }

    pub fn name(&self) -> &str {
        self.bundle.name()
    }

    pub fn max_length(&self) -> usize {
        self.bundle.spec.max_length
    }

    pub fn device(&self) -> Device {
        self.state.device
    }

    pub fn id2label(&self) -> &[String] {
        &self.state.id2label
    }

    pub fn tokenizer(&self) -> &dyn TextTokenizer {
        self.state.runtime.tokenizer.as_ref()
    }

    pub fn model(&self) -> &dyn SequenceClassifier {
        self.state.runtime.model.as_ref()
    }

    pub fn metadata(&self) -> &RuntimeMetadata {
        self.state.metadata()
    }
}

pub struct ModelRegistry {
    models: DashMap<String, Arc<ModelBundle>>,
    loader: Arc<dyn ModelLoader>,
    probe: Arc<dyn AcceleratorProbe>,
    duplicate_policy: DuplicatePolicy,
}

impl ModelRegistry {
    pub fn new(loader: Arc<dyn ModelLoader>, probe: Arc<dyn AcceleratorProbe>) -> Self {
        Self {
            models: DashMap::new(),
            loader,
            probe,
            duplicate_policy: DuplicatePolicy::default(),
        }
    }

    pub fn with_duplicate_policy(mut self, policy: DuplicatePolicy) -> Self {
        self.duplicate_policy = policy;
        self
    }

    /// Register one unloaded bundle per spec.
    ///
    /// Every spec is validated before any is inserted, so a malformed catalog
    /// registers nothing. Returns the number of registered models afterwards.
    pub fn load_registry(&self, specs: Vec<ModelSpec>) -> Result<usize> {
        let mut seen = BTreeSet::new();
        for spec in &specs {
            spec.validate()?;
            let duplicate = !seen.insert(spec.name.clone()) || self.models.contains_key(&spec.name);
            if duplicate {
                match self.duplicate_policy {
                    DuplicatePolicy::Reject => {
                        return Err(ClassifierError::config(format!(
                            "model '{}' is registered more than once",
                            spec.name
                        )));
                    }
                    DuplicatePolicy::LastWins => {
                        warn!("Model '{}' registered more than once; the last entry wins", spec.name);
                    }
                }
            }
        }

        for spec in specs {
            self.models
                .insert(spec.name.clone(), Arc::new(ModelBundle::new(spec)));
        }

        info!("Loaded {} model configurations", self.models.len());
        Ok(self.models.len())
    }

    /// Look up a model, loading it on first use
    pub async fn get_model(&self, name: &str) -> Result<ModelHandle> {
        // Clone the Arc out so no map guard is held across the load
        let bundle = self
            .bundle(name)
            .ok_or_else(|| ClassifierError::NotFound(name.to_string()))?;

        let state = bundle.load(self.loader.as_ref(), &self.probe).await?;
        Ok(ModelHandle { bundle, state })
    }

    /// The registered bundle, without triggering a load
    pub fn bundle(&self, name: &str) -> Option<Arc<ModelBundle>> {
        self.models.get(name).map(|entry| entry.value().clone())
    }

    /// Label names of a model, ordered by class index. Loads the model.
    pub async fn labels(&self, name: &str) -> Result<Vec<String>> {
        Ok(self.get_model(name).await?.id2label().to_vec())
    }

    pub fn is_loaded(&self, name: &str) -> Option<bool> {
        self.models.get(name).map(|entry| entry.is_loaded())
    }

    pub fn list_models(&self) -> BTreeSet<String> {
        self.models.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{CpuOnly, DeviceSpec};
    use crate::model_runtime::{Logits, ModelFormat, TokenBatch};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;

    struct StubTokenizer;

    impl TextTokenizer for StubTokenizer {
        fn encode(&self, texts: &[&str], _max_length: usize, _pad: bool) -> Result<TokenBatch> {
            Ok(TokenBatch {
                input_ids: texts.iter().map(|_| vec![0]).collect(),
                attention_mask: texts.iter().map(|_| vec![1]).collect(),
            })
        }
    }

    struct StubModel {
        labels: Option<Vec<String>>,
        classes: usize,
    }

    impl SequenceClassifier for StubModel {
        fn num_labels(&self) -> usize {
            self.classes
        }

        fn embedded_labels(&self) -> Option<Vec<String>> {
            self.labels.clone()
        }

        fn forward(&self, tokens: &TokenBatch) -> Result<Logits> {
            Ok(vec![vec![0.0; self.classes]; tokens.len()])
        }
    }

    /// Counts load sequences; fails while `fail` is set
    struct StubLoader {
        calls: AtomicUsize,
        fail: AtomicBool,
        labels: Option<Vec<String>>,
        classes: usize,
        delay: Duration,
    }

    impl StubLoader {
        fn new(classes: usize, labels: Option<Vec<String>>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail: AtomicBool::new(false),
                labels,
                classes,
                delay: Duration::from_millis(0),
            }
        }
    }

    #[async_trait]
    impl ModelLoader for StubLoader {
        async fn load(&self, spec: &ModelSpec, _device: Device) -> Result<LoadedRuntime> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            if self.fail.load(Ordering::SeqCst) {
                return Err(ClassifierError::load(&spec.name, "artifact unavailable"));
            }
            Ok(LoadedRuntime {
                tokenizer: Arc::new(StubTokenizer),
                model: Arc::new(StubModel {
                    labels: self.labels.clone(),
                    classes: self.classes,
                }),
                metadata: RuntimeMetadata {
                    format: ModelFormat::Lexicon,
                    runtime_name: "stub".to_string(),
                    supports_gpu: false,
                },
            })
        }
    }

    fn registry_with(loader: Arc<StubLoader>) -> ModelRegistry {
        ModelRegistry::new(loader, Arc::new(CpuOnly))
    }

    #[tokio::test]
    async fn test_registered_bundles_start_unloaded() {
        let loader = Arc::new(StubLoader::new(3, None));
        let registry = registry_with(loader.clone());
        registry
            .load_registry(vec![ModelSpec::new("bert512", "p", 256), ModelSpec::new("bert128", "q", 128)])
            .unwrap();

        assert_eq!(registry.list_models(), BTreeSet::from(["bert128".to_string(), "bert512".to_string()]));
        assert_eq!(registry.is_loaded("bert512"), Some(false));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_get_model_returns_same_bundle() {
        let loader = Arc::new(StubLoader::new(2, None));
        let registry = registry_with(loader.clone());
        registry.load_registry(vec![ModelSpec::new("bert512", "p", 256)]).unwrap();

        let before = registry.bundle("bert512").unwrap();
        let first = registry.get_model("bert512").await.unwrap();
        let second = registry.get_model("bert512").await.unwrap();

        assert!(Arc::ptr_eq(&before, first.bundle()));
        assert!(Arc::ptr_eq(first.bundle(), second.bundle()));
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
        assert_eq!(before.load_count(), 1);
    }

    #[tokio::test]
    async fn test_missing_model_is_not_found_and_registers_nothing() {
        let registry = registry_with(Arc::new(StubLoader::new(2, None)));
        registry.load_registry(vec![ModelSpec::new("bert512", "p", 256)]).unwrap();

        let err = registry.get_model("missing").await.unwrap_err();
        assert_eq!(err, ClassifierError::NotFound("missing".to_string()));
        assert_eq!(registry.len(), 1);
        assert!(registry.bundle("missing").is_none());
    }

    #[tokio::test]
    async fn test_failed_load_leaves_bundle_unloaded_and_retries() {
        let loader = Arc::new(StubLoader::new(2, None));
        loader.fail.store(true, Ordering::SeqCst);
        let registry = registry_with(loader.clone());
        registry.load_registry(vec![ModelSpec::new("bert512", "p", 256)]).unwrap();

        let err = registry.get_model("bert512").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Load { .. }));
        assert_eq!(registry.is_loaded("bert512"), Some(false));

        loader.fail.store(false, Ordering::SeqCst);
        let handle = registry.get_model("bert512").await.unwrap();
        assert_eq!(handle.id2label().len(), 2);
        assert_eq!(loader.calls.load(Ordering::SeqCst), 2);
        assert_eq!(handle.bundle().load_count(), 1);
    }

    #[tokio::test]
    async fn test_synthesized_labels_when_model_has_none() {
        let registry = registry_with(Arc::new(StubLoader::new(3, None)));
        registry.load_registry(vec![ModelSpec::new("m", "p", 8)]).unwrap();

        assert_eq!(registry.labels("m").await.unwrap(), vec!["LABEL_0", "LABEL_1", "LABEL_2"]);
    }

    #[tokio::test]
    async fn test_embedded_labels_preferred() {
        let labels = vec!["ekonomi".to_string(), "spor".to_string()];
        let registry = registry_with(Arc::new(StubLoader::new(2, Some(labels.clone()))));
        registry.load_registry(vec![ModelSpec::new("m", "p", 8)]).unwrap();

        assert_eq!(registry.labels("m").await.unwrap(), labels);
    }

    #[tokio::test]
    async fn test_label_count_mismatch_is_load_error() {
        let registry = registry_with(Arc::new(StubLoader::new(3, Some(vec!["a".to_string()]))));
        registry.load_registry(vec![ModelSpec::new("m", "p", 8)]).unwrap();

        let err = registry.get_model("m").await.unwrap_err();
        assert!(matches!(err, ClassifierError::Load { .. }));
        assert_eq!(registry.is_loaded("m"), Some(false));
    }

    #[tokio::test]
    async fn test_auto_device_resolved_at_load() {
        let registry = registry_with(Arc::new(StubLoader::new(2, None)));
        registry
            .load_registry(vec![
                ModelSpec::new("auto", "p", 8),
                ModelSpec::new("explicit", "q", 8).with_device(DeviceSpec::Explicit(Device::Cuda(1))),
            ])
            .unwrap();

        assert_eq!(registry.bundle("auto").unwrap().device(), None);
        assert_eq!(registry.get_model("auto").await.unwrap().device(), Device::Cpu);
        assert_eq!(registry.get_model("explicit").await.unwrap().device(), Device::Cuda(1));
    }

    /// Reports a CUDA device and remembers the thread it was asked on
    #[derive(Default)]
    struct ThreadRecordingDetector {
        thread: std::sync::Mutex<Option<std::thread::ThreadId>>,
    }

    impl AcceleratorProbe for ThreadRecordingDetector {
        fn preferred_accelerator(&self) -> Option<Device> {
            *self.thread.lock().unwrap() = Some(std::thread::current().id());
            Some(Device::Cuda(0))
        }
    }

    #[tokio::test]
    async fn test_auto_device_detection_runs_on_blocking_pool() {
        let probe = Arc::new(ThreadRecordingDetector::default());
        let registry = ModelRegistry::new(Arc::new(StubLoader::new(2, None)), probe.clone());
        registry.load_registry(vec![ModelSpec::new("auto", "p", 8)]).unwrap();

        let handle = registry.get_model("auto").await.unwrap();
        assert_eq!(handle.device(), Device::Cuda(0));

        let probed_on = probe.thread.lock().unwrap().expect("probe was consulted");
        assert_ne!(probed_on, std::thread::current().id());
    }

    #[test]
    fn test_duplicate_names_last_wins() {
        let registry = registry_with(Arc::new(StubLoader::new(2, None)));
        registry
            .load_registry(vec![ModelSpec::new("m", "first", 8), ModelSpec::new("m", "second", 16)])
            .unwrap();

        let bundle = registry.bundle("m").unwrap();
        assert_eq!(bundle.spec().path, "second");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_duplicate_names_rejected_under_strict_policy() {
        let registry = registry_with(Arc::new(StubLoader::new(2, None))).with_duplicate_policy(DuplicatePolicy::Reject);
        let err = registry
            .load_registry(vec![ModelSpec::new("m", "first", 8), ModelSpec::new("m", "second", 16)])
            .unwrap_err();

        assert!(matches!(err, ClassifierError::Config(_)));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_malformed_spec_registers_nothing() {
        let registry = registry_with(Arc::new(StubLoader::new(2, None)));
        let err = registry
            .load_registry(vec![ModelSpec::new("ok", "p", 8), ModelSpec::new("bad", "q", 0)])
            .unwrap_err();

        assert!(matches!(err, ClassifierError::Config(_)));
        assert!(registry.is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_share_one_load() {
        let mut loader = StubLoader::new(2, None);
        loader.delay = Duration::from_millis(50);
        let loader = Arc::new(loader);
        let registry = Arc::new(registry_with(loader.clone()));
        registry.load_registry(vec![ModelSpec::new("bert512", "p", 256)]).unwrap();

        let tasks: Vec<_> = (0..16)
            .map(|_| {
                let registry = registry.clone();
                tokio::spawn(async move { registry.get_model("bert512").await })
            })
            .collect();

        for task in tasks {
            let handle = task.await.unwrap().unwrap();
            assert!(handle.bundle().is_loaded());
        }
        assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
    }
}
