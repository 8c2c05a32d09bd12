//!
//! Model runtimes behind a narrow capability abstraction: a tokenizer that
//! encodes text and a classifier that produces class logits.
//!
//! Architecture:
//! - `runtime_trait` defines the capabilities the core depends on
//! - Each artifact format has its own runtime
//! - `RuntimeManager` detects the format of a model path and loads it
pub mod runtime_trait;
pub mod lexicon_runtime;
pub mod format_detector;
pub mod runtime_manager;
pub use runtime_trait::{
    Logits, LoadedRuntime, ModelFormat, ModelLoader, RuntimeMetadata, SequenceClassifier, TextTokenizer,
    TokenBatch,
};
pub use lexicon_runtime::{LexiconArtifact, LexiconRuntime};
pub use format_detector::FormatDetector;
pub use runtime_manager::RuntimeManager;
