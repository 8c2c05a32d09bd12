//! Inference engine.
//!
//! Stateless functions over a loaded [`ModelHandle`]: tokenize, forward,
//! softmax, argmax. The batch path encodes all texts into one padded batch
//! and runs a single forward pass.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ClassifierError, Result};
use crate::registry::ModelHandle;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InferenceResult {
    pub label: String,
    pub score: f32,
    pub probs: Vec<f32>,
}

/// Classify a single text
pub fn predict_one(model: &ModelHandle, text: &str) -> Result<InferenceResult> {
    let tokens = model.tokenizer().encode(&[text], model.max_length(), false)?;
    let mut logits = model.model().forward(&tokens)?;

    if logits.len() != 1 {
        return Err(ClassifierError::inference(format!(
            "expected one row of logits, got {}",
            logits.len()
        )));
    }

    classify(&logits.swap_remove(0), model.id2label())
}

/// Classify several texts with one forward pass. Result `i` belongs to
/// `texts[i]`.
pub fn predict_batch<S: AsRef<str>>(model: &ModelHandle, texts: &[S]) -> Result<Vec<InferenceResult>> {
    if texts.is_empty() {
        return Ok(Vec::new());
    }

    let texts: Vec<&str> = texts.iter().map(AsRef::as_ref).collect();
    let tokens = model.tokenizer().encode(&texts, model.max_length(), true)?;
    if tokens.len() != texts.len() || !tokens.is_rectangular() {
        return Err(ClassifierError::inference(format!(
            "tokenizer returned a malformed batch for {} texts",
            texts.len()
        )));
    }
    debug!(
        "Running batch of {} for '{}' (sequence length {})",
        texts.len(),
        model.name(),
        tokens.input_ids.first().map(Vec::len).unwrap_or(0)
    );

    let logits = model.model().forward(&tokens)?;
    if logits.len() != texts.len() {
        return Err(ClassifierError::inference(format!(
            "expected {} rows of logits, got {}",
            texts.len(),
            logits.len()
        )));
    }

    logits
        .iter()
        .map(|row| classify(row, model.id2label()))
        .collect()
}

fn classify(logits: &[f32], id2label: &[String]) -> Result<InferenceResult> {
    if logits.len() != id2label.len() {
        return Err(ClassifierError::inference(format!(
            "model produced {} logits for {} labels",
            logits.len(),
            id2label.len()
        )));
    }
    if logits.iter().any(|x| !x.is_finite()) {
        return Err(ClassifierError::inference("model produced non-finite logits"));
    }

    let probs = softmax(logits);
    let best = argmax(&probs).ok_or_else(|| ClassifierError::inference("empty logits"))?;

    Ok(InferenceResult {
        label: id2label[best].clone(),
        score: probs[best],
        probs,
    })
}

/// Numerically stable softmax: exp(x - max(x)) / sum(exp(x - max(x)))
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    let max_val = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    let mut probs: Vec<f32> = logits.iter().map(|x| (x - max_val).exp()).collect();
    let sum: f32 = probs.iter().sum();

    let inv_sum = 1.0 / sum;
    for p in probs.iter_mut() {
        *p *= inv_sum;
    }
    probs
}

/// Index of the largest value; the first one wins on ties
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (i, &v) in values.iter().enumerate() {
        match best {
            Some((_, current)) if v <= current => {}
            _ => best = Some((i, v)),
        }
    }
    best.map(|(i, _)| i)
}
