//! Execution backend seam.
//!
//! The engine never does transformer math itself. It hands flattened
//! tensors to an [`InferenceBackend`] and gets back per-token hidden states.

use ndarray::Array3;

use crate::Result;

/// Row-major `batch × seq_len` input tensors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchTensors {
    /// Number of rows.
    pub batch: usize,
    /// Positions per row.
    pub seq_len: usize,
    /// Flattened token ids.
    pub input_ids: Vec<i64>,
    /// Flattened attention mask.
    pub attention_mask: Vec<i64>,
}

impl BatchTensors {
    /// All-zero segment ids matching the input shape.
    #[must_use]
    pub fn token_type_ids(&self) -> Vec<i64> {
        vec![0; self.batch * self.seq_len]
    }
}

/// Something that can execute a transformer encoder.
///
/// Implementations must be safe to call from many threads at once.
pub trait InferenceBackend: Send + Sync {
    /// Width of each per-token hidden state.
    fn hidden_size(&self) -> usize;

    /// Run the model, returning hidden states shaped
    /// `batch × seq_len × hidden_size`.
    ///
    /// # Errors
    ///
    /// Returns an inference error if execution fails.
    fn run(&self, tensors: BatchTensors) -> Result<Array3<f32>>;

    /// Short description for logs.
    fn describe(&self) -> String {
        format!("backend(hidden_size={})", self.hidden_size())
    }
}
