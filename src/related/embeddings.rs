// Sentence embeddings for post titles (all-MiniLM-L6-v2 via ONNX).
//
// Each title is tokenized, run through the encoder, and mean-pooled over
// its real tokens (attention mask 1) into one vector. The vector width is
// read from the model output rather than assumed.

use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use async_trait::async_trait;
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;
use tracing::debug;

use super::TextEmbedder;
use crate::screen::download::{EMBEDDING_MODEL_FILE, EMBEDDING_TOKENIZER_FILE};

/// BERT `[PAD]` token id.
const PAD_ID: i64 = 0;

pub struct SentenceEmbedder {
    session: Arc<Mutex<Session>>,
    tokenizer: Arc<Tokenizer>,
}

impl SentenceEmbedder {
    /// Load `model.onnx` and `tokenizer.json` from `model_dir`.
    pub fn load(model_dir: &Path) -> Result<Self> {
        let model_path = model_dir.join(EMBEDDING_MODEL_FILE);
        let tokenizer_path = model_dir.join(EMBEDDING_TOKENIZER_FILE);

        for path in [&model_path, &tokenizer_path] {
            if !path.exists() {
                anyhow::bail!(
                    "Embedding model file not found: {}\nRun `postscreen download-model` to fetch it.",
                    path.display()
                );
            }
        }

        let session = Session::builder()
            .context("Failed to create ONNX session builder")?
            .commit_from_file(&model_path)
            .with_context(|| {
                format!("Failed to load embedding model from {}", model_path.display())
            })?;

        let tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("Failed to load embedding tokenizer: {e}"))?;

        debug!(model_dir = %model_dir.display(), "Loaded sentence embedding model");

        Ok(Self {
            session: Arc::new(Mutex::new(session)),
            tokenizer: Arc::new(tokenizer),
        })
    }
}

#[async_trait]
impl TextEmbedder for SentenceEmbedder {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let session = Arc::clone(&self.session);
        let tokenizer = Arc::clone(&self.tokenizer);
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || embed_sync(&session, &tokenizer, &texts))
            .await
            .context("Embedding task panicked")?
    }
}

fn embed_sync(
    session: &Mutex<Session>,
    tokenizer: &Tokenizer,
    texts: &[String],
) -> Result<Vec<Vec<f64>>> {
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
    if width == 0 {
        anyhow::bail!("Tokenizer produced no tokens for any input");
    }

    let mut input_ids: Vec<i64> = Vec::with_capacity(batch * width);
    let mut attention_mask: Vec<i64> = Vec::with_capacity(batch * width);
    for enc in &encodings {
        let len = enc.get_ids().len();
        input_ids.extend(enc.get_ids().iter().map(|&id| id as i64));
        attention_mask.extend(enc.get_attention_mask().iter().map(|&m| m as i64));
        input_ids.extend(std::iter::repeat_n(PAD_ID, width - len));
        attention_mask.extend(std::iter::repeat_n(0i64, width - len));
    }
    let token_type_ids = vec![0i64; batch * width];

    let shape = [batch as i64, width as i64];
    let ids_tensor =
        Tensor::from_array((shape, input_ids)).context("Failed to build input_ids tensor")?;
    let mask_tensor = Tensor::from_array((shape, attention_mask.clone()))
        .context("Failed to build attention_mask tensor")?;
    let types_tensor = Tensor::from_array((shape, token_type_ids))
        .context("Failed to build token_type_ids tensor")?;

    // last_hidden_state: [batch, width, dim]
    let hidden = {
        let mut session = session
            .lock()
            .map_err(|e| anyhow::anyhow!("Embedding session lock poisoned: {e}"))?;
        let outputs = session
            .run(ort::inputs! {
                "input_ids" => ids_tensor,
                "attention_mask" => mask_tensor,
                "token_type_ids" => types_tensor
            })
            .context("Embedding inference failed")?;
        let (_shape, data) = outputs[0]
            .try_extract_tensor::<f32>()
            .context("Failed to read embedding output tensor")?;
        data.to_vec()
    };

    if hidden.is_empty() || hidden.len() % (batch * width) != 0 {
        anyhow::bail!(
            "Embedding output has {} values, not a multiple of {batch}x{width}",
            hidden.len()
        );
    }
    let dim = hidden.len() / (batch * width);

    let embeddings = (0..batch)
        .map(|i| {
            mean_pool(
                &hidden[i * width * dim..(i + 1) * width * dim],
                &attention_mask[i * width..(i + 1) * width],
                dim,
            )
        })
        .collect();

    debug!(batch, dim, "Computed title embeddings");
    Ok(embeddings)
}

/// Average the token rows of one sequence, counting only unmasked tokens.
fn mean_pool(tokens: &[f32], mask: &[i64], dim: usize) -> Vec<f64> {
    let mut sum = vec![0.0_f64; dim];
    let mut count = 0.0_f64;

    for (row, &m) in tokens.chunks(dim).zip(mask) {
        if m == 0 {
            continue;
        }
        count += 1.0;
        for (acc, &v) in sum.iter_mut().zip(row) {
            *acc += v as f64;
        }
    }

    if count > 0.0 {
        for v in &mut sum {
            *v /= count;
        }
    }
    sum
}
