//! Embedding vectors and model metadata.

use serde::{Deserialize, Serialize};

use crate::inference::{l2_norm, NORM_EPSILON};

/// Provider name reported in [`ModelMetadata`].
pub const PROVIDER_NAME: &str = "ember-onnx";

/// One embedding vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Embedding {
    values: Vec<f32>,
}

impl Embedding {
    /// Wrap raw vector values.
    #[must_use]
    pub const fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Number of components.
    #[must_use]
    pub fn dimension(&self) -> usize {
        self.values.len()
    }

    /// Vector components.
    #[must_use]
    pub fn as_slice(&self) -> &[f32] {
        &self.values
    }

    /// Take ownership of the components.
    #[must_use]
    pub fn into_vec(self) -> Vec<f32> {
        self.values
    }

    /// Euclidean norm.
    #[must_use]
    pub fn norm(&self) -> f32 {
        l2_norm(&self.values)
    }

    /// Cosine similarity in `-1.0..=1.0`.
    ///
    /// Returns `0.0` when dimensions differ or either vector is zero.
    #[must_use]
    pub fn cosine_similarity(&self, other: &Self) -> f32 {
        if self.dimension() != other.dimension() {
            return 0.0;
        }

        let (a, b) = (self.norm(), other.norm());
        if a <= NORM_EPSILON || b <= NORM_EPSILON {
            return 0.0;
        }

        let dot: f32 = self
            .values
            .iter()
            .zip(&other.values)
            .map(|(x, y)| x * y)
            .sum();
        (dot / (a * b)).clamp(-1.0, 1.0)
    }
}

impl From<Vec<f32>> for Embedding {
    fn from(values: Vec<f32>) -> Self {
        Self::new(values)
    }
}

impl AsRef<[f32]> for Embedding {
    fn as_ref(&self) -> &[f32] {
        &self.values
    }
}

/// Describes the model behind an embedder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelMetadata {
    /// Always [`PROVIDER_NAME`].
    pub provider_name: String,
    /// Configured model identifier.
    pub model_id: String,
    /// Output vector width.
    pub dimension: usize,
}

impl ModelMetadata {
    /// Metadata for a loaded model.
    #[must_use]
    pub fn new(model_id: impl Into<String>, dimension: usize) -> Self {
        Self {
            provider_name: PROVIDER_NAME.to_string(),
            model_id: model_id.into(),
            dimension,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_and_access() {
        let embedding = Embedding::new(vec![0.5, 0.5, 0.0]);
        assert_eq!(embedding.dimension(), 3);
        assert_eq!(embedding.as_slice(), &[0.5, 0.5, 0.0]);
        assert_eq!(embedding.clone().into_vec(), vec![0.5, 0.5, 0.0]);
    }

    #[test]
    fn test_cosine_similarity() {
        let a = Embedding::new(vec![1.0, 0.0]);
        let b = Embedding::new(vec![2.0, 0.0]);
        let c = Embedding::new(vec![0.0, 3.0]);
        let d = Embedding::new(vec![-1.0, 0.0]);

        assert!((a.cosine_similarity(&b) - 1.0).abs() < 1e-6);
        assert!(a.cosine_similarity(&c).abs() < 1e-6);
        assert!((a.cosine_similarity(&d) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_similarity_degenerate() {
        let a = Embedding::new(vec![1.0, 0.0]);
        assert_eq!(a.cosine_similarity(&Embedding::new(vec![0.0, 0.0])), 0.0);
        assert_eq!(a.cosine_similarity(&Embedding::new(vec![1.0, 0.0, 0.0])), 0.0);
    }

    #[test]
    fn test_metadata_provider() {
        let metadata = ModelMetadata::new("sentence-transformers/all-MiniLM-L6-v2", 384);
        assert_eq!(metadata.provider_name, "ember-onnx");
        assert_eq!(metadata.dimension, 384);
    }

    #[test]
    fn test_embedding_serializes_as_values() {
        let json = serde_json::to_string(&Embedding::new(vec![1.0, 2.0])).unwrap();
        assert_eq!(json, r#"{"values":[1.0,2.0]}"#);
    }
}
