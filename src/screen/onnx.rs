// Local ONNX screening backend (Detoxify unbiased-toxic-roberta).
//
// Runs on the local CPU with no network dependency, so a screening call can
// only fail on a model or tokenizer error. Inference is CPU-bound and goes
// through spawn_blocking to keep the consumer's runtime responsive.
//
// Model: protectai/unbiased-toxic-roberta-onnx (quantized)
// Output: 7 independent logits, one per label, mapped through a sigmoid.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::{Tokenizer, TruncationParams};
use tracing::debug;

use super::download::{SCREEN_MODEL_FILE, SCREEN_TOKENIZER_FILE};
use super::traits::{ContentScorer, ScoreCategories, ScreenScore, SCORE_BATCH};

/// Output labels, in the order the model emits them.
const LABELS: [&str; 7] = [
    "toxicity",
    "severe_toxicity",
    "obscene",
    "identity_attack",
    "insult",
    "threat",
    "sexual_explicit",
];

/// RoBERTa's positional embedding limit.
const MAX_TOKENS: usize = 512;

/// RoBERTa `<pad>` token id.
const PAD_ID: i64 = 1;

pub struct OnnxScorer {
    // ort's Session::run needs &mut, and spawn_blocking needs 'static handles.
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

impl OnnxScorer {
    /// Load the model and tokenizer from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join(SCREEN_MODEL_FILE);
        let tokenizer_path = model_dir.join(SCREEN_TOKENIZER_FILE);

        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                anyhow::bail!(
                    "Screening model file not found: {}\nRun `postscreen download-model` to fetch it.",
                    path.display()
                );
            }
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| format!("Failed to load ONNX model from {}", model_path.display()))?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(TruncationParams {
                max_length: MAX_TOKENS,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("Failed to configure tokenizer truncation: {e}"))?;

        debug!(model_dir = %model_dir.display(), "Loaded ONNX screening model");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
        })
    }
}

#[async_trait]
impl ContentScorer for OnnxScorer {
    async fn score_text(&self, text: &str) -> Result<ScreenScore> {
        let mut scores = self.score_batch(&[text.to_string()]).await?;
        scores
            .pop()
            .context("ONNX model returned no score for a single input")
    }

    /// One forward pass per `SCORE_BATCH` inputs, each right-padded to its
    /// longest input.
    async fn score_batch(&self, texts: &[String]) -> Result<Vec<ScreenScore>> {
        let mut scores = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(SCORE_BATCH) {
            let session = Arc::clone(&self.session);
            let tokenizer = Arc::clone(&self.tokenizer);
            let chunk = chunk.to_vec();

            let batch =
                tokio::task::spawn_blocking(move || score_sync(&session, &tokenizer, &chunk))
                    .await
                    .context("ONNX scoring task panicked")??;
            scores.extend(batch);
        }
        Ok(scores)
    }
}

fn score_sync(
    session: &Mutex<Session>,
    tokenizer: &Tokenizer,
    texts: &[String],
) -> Result<Vec<ScreenScore>> {
    let encodings = texts
        .iter()
        .map(|t| {
            tokenizer
                .encode(t.as_str(), true)
                .map_err(|e| anyhow::anyhow!("Tokenization failed: {e}"))
        })
        .collect::<Result<Vec<_>>>()?;

    let batch = encodings.len();
    let width = encodings
        .iter()
        .map(|e| e.get_ids().len())
        .max()
        .unwrap_or(0);

    let mut input_ids: Vec<i64> = Vec::with_capacity(batch * width);
    let mut attention_mask: Vec<i64> = Vec::with_capacity(batch * width);
    for enc in &encodings {
        let len = enc.get_ids().len();
        input_ids.extend(enc.get_ids().iter().map(|&id| id as i64));
        attention_mask.extend(enc.get_attention_mask().iter().map(|&m| m as i64));
        input_ids.extend(std::iter::repeat_n(PAD_ID, width - len));
        attention_mask.extend(std::iter::repeat_n(0i64, width - len));
    }

    let shape = [batch as i64, width as i64];
    let ids_tensor =
        Tensor::from_array((shape, input_ids)).context("Failed to build input_ids tensor")?;
    let mask_tensor = Tensor::from_array((shape, attention_mask))
        .context("Failed to build attention_mask tensor")?;

    let logits = {
        let mut session = session
            .lock()
            .map_err(|e| anyhow::anyhow!("ONNX session lock poisoned: {e}"))?;
        let outputs = session
            .run(ort::inputs! {
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor
            })
            .context("ONNX inference failed")?;
        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to read ONNX output tensor")?;
        data.to_vec()
    };

    if logits.len() != batch * LABELS.len() {
        anyhow::bail!(
            "ONNX output has {} values, expected {} ({} inputs x {} labels)",
            logits.len(),
            batch * LABELS.len(),
            batch,
            LABELS.len()
        );
    }

    let scores: Vec<ScreenScore> = logits
        .chunks(LABELS.len())
        .map(|row| {
            let probs: Vec<f64> = row.iter().map(|&l| sigmoid(l as f64)).collect();
            to_screen_score(&probs)
        })
        .collect();

    debug!(batch, width, "ONNX screened batch");
    Ok(scores)
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

/// Map probabilities in `LABELS` order onto a ScreenScore.
fn to_screen_score(probs: &[f64]) -> ScreenScore {
    ScreenScore {
        toxicity: probs[0],
        categories: ScoreCategories {
            severe_toxicity: Some(probs[1]),
            obscene: Some(probs[2]),
            identity_attack: Some(probs[3]),
            insult: Some(probs[4]),
            threat: Some(probs[5]),
            sexual_explicit: Some(probs[6]),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sigmoid_midpoint_and_tails() {
        assert!((sigmoid(0.0) - 0.5).abs() < 1e-10);
        assert!(sigmoid(12.0) > 0.999);
        assert!(sigmoid(-12.0) < 0.001);
    }

    #[test]
    fn test_to_screen_score_label_order() {
        let probs = [0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.95];
        let score = to_screen_score(&probs);
        assert!((score.toxicity - 0.1).abs() < 1e-10);
        assert_eq!(score.categories.obscene, Some(0.3));
        assert_eq!(score.categories.threat, Some(0.6));
        assert_eq!(score.categories.sexual_explicit, Some(0.95));
        // sexual_explicit dominates the peak
        assert!((score.peak() - 0.95).abs() < 1e-10);
    }

    #[test]
    fn test_load_missing_dir_names_download_command() {
        let dir = tempfile::tempdir().unwrap();
        let err = OnnxScorer::load(dir.path()).err().unwrap();
        assert!(err.to_string().contains("download-model"));
    }
}
