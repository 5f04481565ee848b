use crate::errors::{FaceIdError, FaceIdResult};

pub const DEFAULT_MATCH_THRESHOLD: f64 = 0.6;

fn ensure_same_dim(a: &[f32], b: &[f32]) -> FaceIdResult<()> {
    if a.len() != b.len() {
        return Err(FaceIdError::DimensionMismatch { expected: a.len(), found: b.len() });
    }
    if a.is_empty() {
        return Err(FaceIdError::InvalidEmbedding("embedding is empty".into()));
    }
    Ok(())
}

/// Element-wise arithmetic mean of two embeddings of equal length.
pub fn mean_embedding(a: &[f32], b: &[f32]) -> FaceIdResult<Vec<f32>> {
    ensure_same_dim(a, b)?;
    Ok(a.iter().zip(b.iter()).map(|(x, y)| (x + y) / 2.0).collect())
}

/// Cosine similarity, accumulated in f64. `a` is the reference side when
/// reporting a dimension mismatch.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> FaceIdResult<f64> {
    ensure_same_dim(a, b)?;
    let mut dot = 0.0f64;
    let mut norm_a = 0.0f64;
    let mut norm_b = 0.0f64;
    for (x, y) in a.iter().zip(b.iter()) {
        let (x, y) = (*x as f64, *y as f64);
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    if norm_a == 0.0 || norm_b == 0.0 {
        return Err(FaceIdError::InvalidEmbedding("embedding has zero norm".into()));
    }
    Ok(dot / (norm_a.sqrt() * norm_b.sqrt()))
}

/// Strictly greater than: a score equal to the threshold is a rejection.
pub fn is_match(similarity: f64, threshold: f64) -> bool {
    similarity > threshold
}
