//! Lexicon Runtime
//!
//! In-process runtime for bag-of-words linear classifiers stored as JSON. Each
//! vocabulary entry owns one weight row; a text's logits are the mean of the
//! rows of its tokens plus a bias vector.
//!
//! Artifact layout, either as a single `.json` file or as `lexicon.json`
//! inside a model directory:
//!
//! ```json
//! {
//!   "vocab": {"faiz": 3, "gol": 4},
//!   "weights": [[0,0],[0,0],[0,0],[2.1,-1.0],[-0.5,1.8]],
//!   "bias": [0.0, 0.0],
//!   "id2label": {"0": "ekonomi", "1": "spor"},
//!   "cls_id": 2
//! }
//! ```
//!
//! A directory may also hold an HF-style `config.json`; its `id2label` takes
//! precedence over the one in the lexicon.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::format_detector::{LEXICON_FILE, MODEL_CONFIG_FILE};
use super::runtime_trait::*;
use crate::config::ModelSpec;
use crate::device::Device;
use crate::error::{ClassifierError, Result};

lazy_static! {
    static ref WORD_REGEX: Regex = Regex::new(r"[\p{L}\p{N}]+").unwrap();
}

fn default_true() -> bool {
    true
}

fn default_unk_id() -> u32 {
    1
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LexiconArtifact {
    pub vocab: HashMap<String, u32>,
    pub weights: Vec<Vec<f32>>,
    pub bias: Vec<f32>,
    #[serde(default)]
    pub id2label: Option<BTreeMap<String, String>>,
    #[serde(default = "default_true")]
    pub lowercase: bool,
    #[serde(default)]
    pub pad_id: u32,
    #[serde(default = "default_unk_id")]
    pub unk_id: u32,
    #[serde(default)]
    pub cls_id: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct HfModelConfig {
    #[serde(default)]
    id2label: Option<BTreeMap<String, String>>,
}

/// Word-level tokenizer over the lexicon vocabulary
pub struct LexiconTokenizer {
    vocab: HashMap<String, u32>,
    lowercase: bool,
    pad_id: u32,
    unk_id: u32,
    cls_id: Option<u32>,
}

impl LexiconTokenizer {
    fn tokenize(&self, text: &str, max_length: usize) -> Vec<u32> {
        let normalized = if self.lowercase {
            text.to_lowercase()
        } else {
            text.to_string()
        };

        let words = WORD_REGEX
            .find_iter(&normalized)
            .map(|m| self.vocab.get(m.as_str()).copied().unwrap_or(self.unk_id));

        self.cls_id
            .into_iter()
            .chain(words)
            .take(max_length)
            .collect()
    }
}

impl TextTokenizer for LexiconTokenizer {
    fn encode(&self, texts: &[&str], max_length: usize, pad: bool) -> Result<TokenBatch> {
        if max_length == 0 {
            return Err(ClassifierError::inference("max_length must be positive"));
        }

        let mut input_ids: Vec<Vec<u32>> = texts
            .iter()
            .map(|text| self.tokenize(text, max_length))
            .collect();
        let mut attention_mask: Vec<Vec<u8>> =
            input_ids.iter().map(|ids| vec![1u8; ids.len()]).collect();

        if pad {
            let width = input_ids.iter().map(Vec::len).max().unwrap_or(0);
            for (ids, mask) in input_ids.iter_mut().zip(attention_mask.iter_mut()) {
                ids.resize(width, self.pad_id);
                mask.resize(width, 0);
            }
        }

        Ok(TokenBatch {
            input_ids,
            attention_mask,
        })
    }
}

/// Linear classifier: masked mean of token weight rows plus bias
pub struct LexiconClassifier {
    weights: Vec<Vec<f32>>,
    bias: Vec<f32>,
    labels: Option<Vec<String>>,
}

impl SequenceClassifier for LexiconClassifier {
    fn num_labels(&self) -> usize {
        self.bias.len()
    }

    fn embedded_labels(&self) -> Option<Vec<String>> {
        self.labels.clone()
    }

    fn forward(&self, tokens: &TokenBatch) -> Result<Logits> {
        if tokens.input_ids.len() != tokens.attention_mask.len() {
            return Err(ClassifierError::inference(format!(
                "token batch has {} id rows but {} mask rows",
                tokens.input_ids.len(),
                tokens.attention_mask.len()
            )));
        }

        let mut logits = Vec::with_capacity(tokens.len());
        for (row, (ids, mask)) in tokens.input_ids.iter().zip(&tokens.attention_mask).enumerate() {
            if ids.len() != mask.len() {
                return Err(ClassifierError::inference(format!(
                    "row {} has {} ids but {} mask entries",
                    row,
                    ids.len(),
                    mask.len()
                )));
            }

            let mut sum = vec![0.0f32; self.bias.len()];
            let mut count = 0usize;
            for (&id, _) in ids.iter().zip(mask).filter(|(_, m)| **m == 1) {
                let weights = self.weights.get(id as usize).ok_or_else(|| {
                    ClassifierError::inference(format!("token id {} outside vocabulary", id))
                })?;
                for (acc, w) in sum.iter_mut().zip(weights) {
                    *acc += *w;
                }
                count += 1;
            }

            let scale = if count > 0 { 1.0 / count as f32 } else { 0.0 };
            logits.push(
                sum.iter()
                    .zip(&self.bias)
                    .map(|(s, b)| s * scale + b)
                    .collect(),
            );
        }

        Ok(logits)
    }
}

pub struct LexiconRuntime;

async fn is_regular_file(path: &Path) -> bool {
    tokio::fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

impl LexiconRuntime {
    pub fn metadata() -> RuntimeMetadata {
        RuntimeMetadata {
            format: ModelFormat::Lexicon,
            runtime_name: "lexicon".to_string(),
            supports_gpu: false,
        }
    }

    /// Read the artifact at `path` (file or directory) and build the runtime
    pub async fn load(spec: &ModelSpec, path: &Path, device: Device) -> Result<LoadedRuntime> {
        let is_dir = tokio::fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false);
        let (lexicon_path, config_path) = if is_dir {
            (path.join(LEXICON_FILE), Some(path.join(MODEL_CONFIG_FILE)))
        } else {
            (path.to_path_buf(), None)
        };

        info!("Reading lexicon for '{}' from {}", spec.name, lexicon_path.display());
        let raw = tokio::fs::read(&lexicon_path).await.map_err(|e| {
            ClassifierError::load(&spec.name, format!("cannot read {}: {}", lexicon_path.display(), e))
        })?;
        let artifact: LexiconArtifact = serde_json::from_slice(&raw).map_err(|e| {
            ClassifierError::load(&spec.name, format!("invalid lexicon {}: {}", lexicon_path.display(), e))
        })?;

        let has_config = match &config_path {
            Some(config_path) => is_regular_file(config_path).await,
            None => false,
        };
        let config_labels = match config_path {
            Some(config_path) if has_config => {
                let raw = tokio::fs::read(&config_path).await.map_err(|e| {
                    ClassifierError::load(&spec.name, format!("cannot read {}: {}", config_path.display(), e))
                })?;
                let config: HfModelConfig = serde_json::from_slice(&raw).map_err(|e| {
                    ClassifierError::load(&spec.name, format!("invalid {}: {}", config_path.display(), e))
                })?;
                config.id2label
            }
            _ => None,
        };

        if device.is_accelerator() {
            debug!("Lexicon runtime executes on the host; requested device {} is only recorded", device);
        }

        Self::from_artifact(&spec.name, artifact, config_labels)
    }

    /// Validate an in-memory artifact and build the runtime
    pub fn from_artifact(
        model_name: &str,
        artifact: LexiconArtifact,
        config_labels: Option<BTreeMap<String, String>>,
    ) -> Result<LoadedRuntime> {
        let num_labels = artifact.bias.len();
        if num_labels == 0 {
            return Err(ClassifierError::load(model_name, "lexicon declares no classes"));
        }
        if let Some(row) = artifact.weights.iter().position(|r| r.len() != num_labels) {
            return Err(ClassifierError::load(
                model_name,
                format!("weight row {} does not have {} columns", row, num_labels),
            ));
        }

        let vocab_rows = artifact.weights.len() as u64;
        let max_id = artifact
            .vocab
            .values()
            .copied()
            .chain([artifact.pad_id, artifact.unk_id])
            .chain(artifact.cls_id)
            .max()
            .unwrap_or(0);
        if u64::from(max_id) >= vocab_rows {
            return Err(ClassifierError::load(
                model_name,
                format!("token id {} has no weight row ({} rows)", max_id, vocab_rows),
            ));
        }

        let labels = match config_labels.or(artifact.id2label) {
            Some(map) => Some(ordered_labels(&map, num_labels).map_err(|e| ClassifierError::load(model_name, e))?),
            None => None,
        };

        let tokenizer = LexiconTokenizer {
            vocab: artifact.vocab,
            lowercase: artifact.lowercase,
            pad_id: artifact.pad_id,
            unk_id: artifact.unk_id,
            cls_id: artifact.cls_id,
        };
        let model = LexiconClassifier {
            weights: artifact.weights,
            bias: artifact.bias,
            labels,
        };

        Ok(LoadedRuntime {
            tokenizer: Arc::new(tokenizer),
            model: Arc::new(model),
            metadata: Self::metadata(),
        })
    }
}

/// Turn an `{"0": "a", "1": "b"}` map into `["a", "b"]`, requiring every index
/// below `num_labels` exactly once.
fn ordered_labels(map: &BTreeMap<String, String>, num_labels: usize) -> std::result::Result<Vec<String>, String> {
    let mut labels = vec![None; num_labels];
    for (key, label) in map {
        let index: usize = key
            .trim()
            .parse()
            .map_err(|_| format!("id2label key '{}' is not a class index", key))?;
        let slot = labels
            .get_mut(index)
            .ok_or_else(|| format!("id2label index {} exceeds {} classes", index, num_labels))?;
        *slot = Some(label.clone());
    }
    labels
        .into_iter()
        .enumerate()
        .map(|(i, label)| label.ok_or_else(|| format!("id2label has no entry for class {}", i)))
        .collect()
}
