//!
//! Detects the artifact format of a model path from its extension, or from the
//! well-known file names inside a model directory.
use super::runtime_trait::ModelFormat;
use std::path::Path;
use tracing::info;

/// File a lexicon model directory must contain
pub const LEXICON_FILE: &str = "lexicon.json";

/// Optional HF-style model config carrying `id2label`
pub const MODEL_CONFIG_FILE: &str = "config.json";

pub struct FormatDetector;

impl FormatDetector {
    pub fn detect_from_path(path: &Path) -> Option<ModelFormat> {
        let format = if path.is_dir() {
            Self::detect_directory(path)
        } else {
            Self::detect_file(path)
        };
        if let Some(fmt) = format {
            info!("Detected model format: {} for path: {}", fmt.name(), path.display());
        }
        format
    }

    fn detect_directory(dir: &Path) -> Option<ModelFormat> {
        let candidates = [
            (LEXICON_FILE, ModelFormat::Lexicon),
            ("model.safetensors", ModelFormat::Safetensors),
            ("pytorch_model.bin", ModelFormat::PyTorch),
            ("model.onnx", ModelFormat::Onnx),
        ];
        candidates
            .iter()
            .find(|(file, _)| dir.join(file).is_file())
            .map(|(_, format)| *format)
    }

    fn detect_file(path: &Path) -> Option<ModelFormat> {
        let extension = path.extension()?.to_str()?.to_lowercase();
        [
            ModelFormat::Lexicon,
            ModelFormat::Safetensors,
            ModelFormat::PyTorch,
            ModelFormat::Onnx,
        ]
        .into_iter()
        .find(|format| format.extensions().contains(&extension.as_str()))
    }

    pub fn supported_extensions() -> Vec<String> {
        let mut exts = Vec::new();
        for format in &[
            ModelFormat::Lexicon,
            ModelFormat::Safetensors,
            ModelFormat::PyTorch,
            ModelFormat::Onnx,
        ] {
            for ext in format.extensions() {
                exts.push(ext.to_string());
            }
        }
        exts
    }
}
