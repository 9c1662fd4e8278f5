use crate::error::{RagError, Result};

/// Cosine of the angle between `a` and `b`, in `[-1, 1]`.
///
/// A zero vector on either side scores `0.0`. Vectors of different length are
/// rejected with [`RagError::Dimension`]; nothing is truncated or padded.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> Result<f32> {
    if a.len() != b.len() {
        return Err(RagError::Dimension {
            expected: a.len(),
            actual: b.len(),
        });
    }

    let mut dot = 0f64;
    let mut norm_a = 0f64;
    let mut norm_b = 0f64;
    for (x, y) in a.iter().zip(b) {
        let (x, y) = (f64::from(*x), f64::from(*y));
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    if norm_a == 0.0 || norm_b == 0.0 {
        return Ok(0.0);
    }

    let cosine = dot / (norm_a.sqrt() * norm_b.sqrt());
    Ok(cosine.clamp(-1.0, 1.0) as f32)
}

/// A search candidate tagged with its insertion sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct Scored<T> {
    pub sequence: u64,
    pub score: f32,
    pub item: T,
}

/// Keeps the `limit` best candidates, highest score first; equal scores keep
/// the candidate that was inserted first.
pub fn rank_top_k<T>(mut candidates: Vec<Scored<T>>, limit: usize) -> Vec<Scored<T>> {
    candidates.sort_by(|left, right| {
        right
            .score
            .total_cmp(&left.score)
            .then(left.sequence.cmp(&right.sequence))
    });
    candidates.truncate(limit);
    candidates
}
