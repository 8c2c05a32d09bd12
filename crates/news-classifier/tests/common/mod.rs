#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use news_classifier::model_runtime::{LoadedRuntime, ModelLoader, RuntimeManager};
use news_classifier::{Device, ModelSpec, Result};

/// Three-class Turkish news lexicon: ekonomi, spor, siyaset
pub const NEWS_LEXICON: &str = r#"{
    "vocab": {"faiz": 3, "enflasyon": 4, "borsa": 5, "gol": 6, "maç": 7, "seçim": 8},
    "weights": [
        [0.0, 0.0, 0.0], [0.0, 0.0, 0.0], [0.0, 0.0, 0.0],
        [3.0, -1.0, 0.0], [2.5, -0.5, 0.2], [2.0, 0.0, 0.1],
        [-1.0, 3.0, 0.0], [-0.5, 2.5, 0.0], [0.0, 0.0, 3.0]
    ],
    "bias": [0.0, 0.0, 0.0],
    "id2label": {"0": "ekonomi", "1": "spor", "2": "siyaset"},
    "cls_id": 2
}"#;

pub const LABELS: [&str; 3] = ["ekonomi", "spor", "siyaset"];

pub fn write_lexicon(dir: &Path, file_name: &str) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, NEWS_LEXICON).unwrap();
    path
}

/// Write a YAML catalog; each entry is (name, path, max_length)
pub fn write_catalog(dir: &Path, entries: &[(&str, &Path, usize)]) -> PathBuf {
    let mut yaml = String::from("models:\n");
    for (name, path, max_length) in entries {
        yaml.push_str(&format!(
            "  - name: {}\n    path: \"{}\"\n    max_length: {}\n    device: auto\n",
            name,
            path.display(),
            max_length
        ));
    }
    let catalog = dir.join("models.yaml");
    std::fs::write(&catalog, yaml).unwrap();
    catalog
}

/// Production loader that counts how often it is asked to load
#[derive(Default)]
pub struct CountingLoader {
    inner: RuntimeManager,
    calls: AtomicUsize,
}

impl CountingLoader {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelLoader for CountingLoader {
    async fn load(&self, spec: &ModelSpec, device: Device) -> Result<LoadedRuntime> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.load(spec, device).await
    }
}
