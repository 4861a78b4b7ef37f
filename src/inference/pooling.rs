//! Mask-weighted mean pooling and L2 normalization.

use ndarray::{Array1, ArrayView3};

/// Norms below this are treated as zero and left alone.
pub const NORM_EPSILON: f32 = 1e-12;

/// Mean-pool per-token hidden states into one vector per row.
///
/// Positions whose mask is 1 are averaged; every other mask value counts
/// as padding. A row with no real tokens pools to all zeros.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn mean_pool(hidden: ArrayView3<'_, f32>, attention_mask: &[Vec<i64>]) -> Vec<Vec<f32>> {
    let hidden_size = hidden.dim().2;

    hidden
        .outer_iter()
        .zip(attention_mask)
        .map(|(tokens, mask)| {
            let mut sum = Array1::<f32>::zeros(hidden_size);
            let mut real = 0usize;

            for (token, _) in tokens.outer_iter().zip(mask).filter(|(_, m)| **m == 1) {
                sum += &token;
                real += 1;
            }

            if real > 0 {
                sum /= real as f32;
            } else {
                sum.fill(0.0);
            }

            sum.to_vec()
        })
        .collect()
}

/// Scale a vector to unit Euclidean length in place.
///
/// Vectors with a norm of (nearly) zero are left unchanged.
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > NORM_EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Euclidean norm.
#[must_use]
pub fn l2_norm(vector: &[f32]) -> f32 {
    vector.iter().map(|x| x * x).sum::<f32>().sqrt()
}
