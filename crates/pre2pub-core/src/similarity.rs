use std::sync::Arc;

use crate::embedding::{EmbeddingError, EmbeddingModel};
use crate::matching::prepare_for_embedding;

/// A candidate title must exceed this cosine similarity to count as a match.
pub const TITLE_SIMILARITY_THRESHOLD: f64 = 0.95;
/// Abstracts are judged with the same method and threshold as titles.
pub const ABSTRACT_SIMILARITY_THRESHOLD: f64 = 0.95;

/// Whether `score` clears `threshold`. Equal scores do not.
pub fn exceeds(score: f64, threshold: f64) -> bool {
    score > threshold
}

/// Cosine of the angle between two vectors of equal length.
///
/// A zero vector has no direction and scores 0.0 against anything.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f64 {
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a.sqrt() * norm_b.sqrt())).clamp(-1.0, 1.0)
}

/// Scores semantic closeness of two texts with the shared embedding model.
#[derive(Clone)]
pub struct SimilarityScorer {
    model: Arc<dyn EmbeddingModel>,
}

impl SimilarityScorer {
    pub fn new(model: Arc<dyn EmbeddingModel>) -> Self {
        Self { model }
    }

    /// Embed `text` after cleaning. Text that cleans to nothing (only
    /// stopwords or digits) is embedded as written. `None` for blank text.
    pub async fn embed(&self, text: &str) -> Result<Option<Vec<f32>>, EmbeddingError> {
        let prepared = prepare_for_embedding(text);
        let input = if prepared.is_empty() {
            text.trim()
        } else {
            prepared.as_str()
        };
        if input.is_empty() {
            return Ok(None);
        }
        self.model.embed(input).await.map(Some)
    }

    /// Cosine similarity of the two texts' embeddings. Blank text scores 0.0.
    pub async fn score(&self, a: &str, b: &str) -> Result<f64, EmbeddingError> {
        let Some(va) = self.embed(a).await? else {
            return Ok(0.0);
        };
        let Some(vb) = self.embed(b).await? else {
            return Ok(0.0);
        };
        Self::compare(&va, &vb)
    }

    /// Score a precomputed embedding against a text.
    pub async fn score_against(&self, reference: &[f32], text: &str) -> Result<f64, EmbeddingError> {
        match self.embed(text).await? {
            Some(v) => Self::compare(reference, &v),
            None => Ok(0.0),
        }
    }

    fn compare(a: &[f32], b: &[f32]) -> Result<f64, EmbeddingError> {
        if a.len() != b.len() {
            return Err(EmbeddingError::Inference(format!(
                "embedding dimensions differ ({} vs {})",
                a.len(),
                b.len()
            )));
        }
        Ok(cosine_similarity(a, b))
    }
}
