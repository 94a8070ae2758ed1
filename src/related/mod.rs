// Related posts - rank candidate posts by title similarity to a target post.
//
// Titles are embedded with a TextEmbedder and compared by cosine similarity.
// Where the posts come from (storage, HTTP) is the caller's business.

pub mod embeddings;

use std::cmp::Ordering;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use embeddings::SentenceEmbedder;

pub const DEFAULT_RELATED_LIMIT: usize = 5;

/// Turns texts into dense vectors, one per input, in input order.
#[async_trait]
pub trait TextEmbedder: Send + Sync {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f64>>>;
}

/// A post that can be suggested.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub title: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelatedPost {
    pub id: String,
    pub score: f64,
}

/// Cosine similarity in [-1, 1]. Zero when either vector is empty, zero,
/// or the lengths differ.
pub fn cosine_similarity(a: &[f64], b: &[f64]) -> f64 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot: f64 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let mag_a = a.iter().map(|x| x * x).sum::<f64>().sqrt();
    let mag_b = b.iter().map(|x| x * x).sum::<f64>().sqrt();

    let denom = mag_a * mag_b;
    if denom < f64::EPSILON {
        0.0
    } else {
        (dot / denom).clamp(-1.0, 1.0)
    }
}

/// Top `limit` candidates most similar to `target`, best first.
///
/// Candidates sharing the target's id are skipped, so passing the full post
/// list (target included) is fine. Equal scores keep candidate order.
pub async fn related_posts(
    embedder: &dyn TextEmbedder,
    target: &Candidate,
    candidates: &[Candidate],
    limit: usize,
) -> Result<Vec<RelatedPost>> {
    let others: Vec<&Candidate> = candidates.iter().filter(|c| c.id != target.id).collect();
    if others.is_empty() || limit == 0 {
        return Ok(Vec::new());
    }

    let mut titles = Vec::with_capacity(others.len() + 1);
    titles.push(target.title.clone());
    titles.extend(others.iter().map(|c| c.title.clone()));

    let vectors = embedder.embed_batch(&titles).await?;
    if vectors.len() != titles.len() {
        anyhow::bail!(
            "Embedder returned {} vectors for {} titles",
            vectors.len(),
            titles.len()
        );
    }

    let (target_vec, candidate_vecs) = vectors.split_at(1);
    let mut ranked: Vec<RelatedPost> = others
        .iter()
        .zip(candidate_vecs)
        .map(|(c, v)| RelatedPost {
            id: c.id.clone(),
            score: cosine_similarity(&target_vec[0], v),
        })
        .collect();

    ranked.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(Ordering::Equal));
    ranked.truncate(limit);
    Ok(ranked)
}
