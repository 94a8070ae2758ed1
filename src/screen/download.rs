// Model download helper for the ONNX screening and embedding models.
//
// Both models come from HuggingFace and live under one model directory
// (~/.local/share/postscreen/models/ on Linux by default):
//   <dir>/model_quantized.onnx, <dir>/tokenizer.json          screening
//   <dir>/all-MiniLM-L6-v2/{model.onnx, tokenizer.json}       embeddings
//
// Files are streamed to a `.part` sibling and renamed when complete, so an
// interrupted download never leaves a truncated model that looks present.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;
use tracing::info;

pub const SCREEN_MODEL_FILE: &str = "model_quantized.onnx";
pub const SCREEN_TOKENIZER_FILE: &str = "tokenizer.json";
pub const EMBEDDING_MODEL_FILE: &str = "model.onnx";
pub const EMBEDDING_TOKENIZER_FILE: &str = "tokenizer.json";

const EMBEDDING_SUBDIR: &str = "all-MiniLM-L6-v2";

const SCREEN_HF_URL: &str =
    "https://huggingface.co/protectai/unbiased-toxic-roberta-onnx/resolve/main";
const EMBEDDING_HF_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main";

/// One file to fetch: remote URL and local destination.
struct ModelFile {
    url: String,
    dest: PathBuf,
    label: &'static str,
}

pub fn default_model_dir() -> PathBuf {
    dirs::data_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("postscreen")
        .join("models")
}

pub fn embedding_model_dir(base: &Path) -> PathBuf {
    base.join(EMBEDDING_SUBDIR)
}

pub fn screen_files_present(dir: &Path) -> bool {
    dir.join(SCREEN_MODEL_FILE).exists() && dir.join(SCREEN_TOKENIZER_FILE).exists()
}

pub fn embedding_files_present(dir: &Path) -> bool {
    let embed_dir = embedding_model_dir(dir);
    embed_dir.join(EMBEDDING_MODEL_FILE).exists()
        && embed_dir.join(EMBEDDING_TOKENIZER_FILE).exists()
}

fn model_files(dir: &Path) -> Vec<ModelFile> {
    let embed_dir = embedding_model_dir(dir);
    vec![
        ModelFile {
            url: format!("{SCREEN_HF_URL}/{SCREEN_TOKENIZER_FILE}"),
            dest: dir.join(SCREEN_TOKENIZER_FILE),
            label: "screening tokenizer",
        },
        ModelFile {
            url: format!("{SCREEN_HF_URL}/{SCREEN_MODEL_FILE}"),
            dest: dir.join(SCREEN_MODEL_FILE),
            label: "screening model (~126 MB)",
        },
        ModelFile {
            url: format!("{EMBEDDING_HF_URL}/{EMBEDDING_TOKENIZER_FILE}"),
            dest: embed_dir.join(EMBEDDING_TOKENIZER_FILE),
            label: "embedding tokenizer",
        },
        ModelFile {
            url: format!("{EMBEDDING_HF_URL}/onnx/{EMBEDDING_MODEL_FILE}"),
            dest: embed_dir.join(EMBEDDING_MODEL_FILE),
            label: "embedding model (~90 MB)",
        },
    ]
}

/// Download every model file that isn't already on disk.
pub async fn download_models(dir: &Path) -> Result<()> {
    let client = reqwest::Client::new();

    for file in model_files(dir) {
        if file.dest.exists() {
            info!(path = %file.dest.display(), "Model file already present, skipping");
            println!("  {} (already present)", file.label);
            continue;
        }
        if let Some(parent) = file.dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display()))?;
        }
        println!("  Downloading {}...", file.label);
        download_file(&client, &file.url, &file.dest).await?;
    }

    Ok(())
}

async fn download_file(client: &reqwest::Client, url: &str, dest: &Path) -> Result<()> {
    let mut response = client
        .get(url)
        .send()
        .await
        .with_context(|| format!("Failed to request {url}"))?;

    if !response.status().is_success() {
        anyhow::bail!("Download of {url} failed with status {}", response.status());
    }

    let progress = match response.content_length() {
        Some(total) => {
            let pb = ProgressBar::new(total);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("    [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})")
                    .expect("valid template")
                    .progress_chars("=> "),
            );
            pb
        }
        None => {
            let pb = ProgressBar::new_spinner();
            pb.set_style(
                ProgressStyle::default_spinner()
                    .template("    {spinner} {bytes}")
                    .expect("valid template"),
            );
            pb
        }
    };

    let partial = dest.with_extension("part");
    let mut out = tokio::fs::File::create(&partial)
        .await
        .with_context(|| format!("Failed to create {}", partial.display()))?;

    while let Some(chunk) = response
        .chunk()
        .await
        .with_context(|| format!("Download of {url} was interrupted"))?
    {
        out.write_all(&chunk)
            .await
            .with_context(|| format!("Failed to write {}", partial.display()))?;
        progress.inc(chunk.len() as u64);
    }
    out.flush().await?;
    drop(out);

    tokio::fs::rename(&partial, dest)
        .await
        .with_context(|| format!("Failed to move {} into place", dest.display()))?;
    progress.finish_and_clear();

    info!(url, path = %dest.display(), "Downloaded model file");
    Ok(())
}
