//! Capability abstraction for classification runtimes.
//!
//! The core only ever talks to a model through these traits: a tokenizer that
//! turns text into token ids and a classifier that turns token ids into class
//! logits. Concrete runtimes are produced by a [`ModelLoader`].

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::ModelSpec;
use crate::device::Device;
use crate::error::Result;

/// Artifact formats the loader can recognize
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModelFormat {
    /// JSON bag-of-words linear classifier, executed in-process
    Lexicon,
    /// HuggingFace safetensors weights
    Safetensors,
    /// PyTorch pickled weights
    PyTorch,
    /// ONNX graph
    Onnx,
}

impl ModelFormat {
    pub fn extensions(&self) -> &[&str] {
        match self {
            ModelFormat::Lexicon => &["json"],
            ModelFormat::Safetensors => &["safetensors"],
            ModelFormat::PyTorch => &["bin", "pt", "pth"],
            ModelFormat::Onnx => &["onnx"],
        }
    }

    pub fn name(&self) -> &str {
        match self {
            ModelFormat::Lexicon => "Lexicon (JSON)",
            ModelFormat::Safetensors => "Safetensors",
            ModelFormat::PyTorch => "PyTorch",
            ModelFormat::Onnx => "ONNX",
        }
    }
}

/// Token ids for one or more texts, plus the mask marking real tokens.
///
/// `attention_mask[i][j] == 1` for real tokens and `0` for padding. When
/// encoded with padding every row has the same length.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TokenBatch {
    pub input_ids: Vec<Vec<u32>>,
    pub attention_mask: Vec<Vec<u8>>,
}

impl TokenBatch {
    pub fn len(&self) -> usize {
        self.input_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.input_ids.is_empty()
    }

    /// Whether all rows share one length, i.e. the batch forms a single tensor
    pub fn is_rectangular(&self) -> bool {
        let width = self.input_ids.first().map(Vec::len).unwrap_or(0);
        self.input_ids.iter().all(|row| row.len() == width)
            && self.attention_mask.iter().all(|row| row.len() == width)
    }
}

/// One row of class scores per input text
pub type Logits = Vec<Vec<f32>>;

pub trait TextTokenizer: Send + Sync {
    /// Encode texts, truncating each to `max_length` tokens. With `pad` set,
    /// rows are padded to the longest sequence in the batch.
    fn encode(&self, texts: &[&str], max_length: usize, pad: bool) -> Result<TokenBatch>;
}

pub trait SequenceClassifier: Send + Sync {
    /// Size of the label set, i.e. the width of every logits row
    fn num_labels(&self) -> usize;

    /// Label names shipped with the model, ordered by class index
    fn embedded_labels(&self) -> Option<Vec<String>>;

    /// Inference-only forward pass. Padding positions must not influence the
    /// logits of their row.
    fn forward(&self, tokens: &TokenBatch) -> Result<Logits>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeMetadata {
    pub format: ModelFormat,
    pub runtime_name: String,
    pub supports_gpu: bool,
}

/// Everything a successful load hands back
#[derive(Clone)]
pub struct LoadedRuntime {
    pub tokenizer: Arc<dyn TextTokenizer>,
    pub model: Arc<dyn SequenceClassifier>,
    pub metadata: RuntimeMetadata,
}

impl fmt::Debug for LoadedRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoadedRuntime")
            .field("num_labels", &self.model.num_labels())
            .field("metadata", &self.metadata)
            .finish()
    }
}

/// Materializes a runtime from a model spec on an already-resolved device
#[async_trait]
pub trait ModelLoader: Send + Sync {
    async fn load(&self, spec: &ModelSpec, device: Device) -> Result<LoadedRuntime>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rectangular_batch() {
        let batch = TokenBatch {
            input_ids: vec![vec![2, 5, 6], vec![2, 7, 0]],
            attention_mask: vec![vec![1, 1, 1], vec![1, 1, 0]],
        };
        assert!(batch.is_rectangular());
        assert_eq!(batch.len(), 2);
    }

    #[test]
    fn test_ragged_batch_is_not_rectangular() {
        let batch = TokenBatch {
            input_ids: vec![vec![2, 5, 6], vec![2]],
            attention_mask: vec![vec![1, 1, 1], vec![1]],
        };
        assert!(!batch.is_rectangular());
    }
}
