//! Inference engine lifecycle, batch validation and pooling.

use std::path::Path;
use std::sync::Arc;

use ndarray::Array3;
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use super::backend::{BatchTensors, InferenceBackend};
use super::onnx::OnnxBackend;
use super::pooling::{l2_normalize, mean_pool};
use crate::cache::is_usable_file;
use crate::error::InferenceError;
use crate::tokenizer::TokenizedBatch;
use crate::{Error, Result};

/// Options fixed when a model is loaded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    /// L2-normalize pooled vectors.
    pub normalize: bool,
    /// Execute independent graph nodes in parallel.
    pub parallel_execution: bool,
    /// Inter-operation thread pool size.
    pub inter_threads: Option<usize>,
    /// Intra-operation thread pool size.
    pub intra_threads: Option<usize>,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            normalize: true,
            parallel_execution: false,
            inter_threads: None,
            intra_threads: None,
        }
    }
}

impl EngineOptions {
    /// Validate thread counts.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if a thread count is zero.
    pub fn validate(&self) -> Result<()> {
        if self.inter_threads == Some(0) {
            return Err(Error::config("inter_threads must be greater than 0"));
        }
        if self.intra_threads == Some(0) {
            return Err(Error::config("intra_threads must be greater than 0"));
        }
        Ok(())
    }
}

enum EngineState {
    Empty,
    Loaded(Arc<dyn InferenceBackend>),
    Disposed,
}

/// Loads a model once and turns token batches into embedding vectors.
///
/// `run` takes `&self` and may be called from any number of threads.
pub struct InferenceEngine {
    options: EngineOptions,
    state: RwLock<EngineState>,
}

impl InferenceEngine {
    /// Create an empty engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the options are invalid.
    pub fn new(options: EngineOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            options,
            state: RwLock::new(EngineState::Empty),
        })
    }

    /// Engine options.
    #[must_use]
    pub const fn options(&self) -> &EngineOptions {
        &self.options
    }

    /// Load an ONNX graph file.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the file is missing or empty,
    /// `InferenceError::AlreadyLoaded` on a second load, `Error::Disposed`
    /// after disposal, or an inference error from the runtime.
    pub fn load(&self, model_path: impl AsRef<Path>) -> Result<()> {
        let model_path = model_path.as_ref();
        self.ensure_empty()?;

        if !is_usable_file(model_path) {
            return Err(Error::not_found("inference graph", model_path));
        }

        let backend = OnnxBackend::load(model_path, &self.options)?;
        self.install(Arc::new(backend))
    }

    /// Install an already constructed backend.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::AlreadyLoaded` if a backend is present, or
    /// `Error::Disposed` after disposal.
    pub fn load_backend(&self, backend: Arc<dyn InferenceBackend>) -> Result<()> {
        self.ensure_empty()?;
        self.install(backend)
    }

    fn ensure_empty(&self) -> Result<()> {
        match &*self.state.read() {
            EngineState::Empty => Ok(()),
            EngineState::Loaded(_) => Err(InferenceError::AlreadyLoaded.into()),
            EngineState::Disposed => Err(Error::Disposed),
        }
    }

    fn install(&self, backend: Arc<dyn InferenceBackend>) -> Result<()> {
        let mut state = self.state.write();
        match &*state {
            EngineState::Empty => {
                tracing::debug!(backend = %backend.describe(), "Inference backend installed");
                *state = EngineState::Loaded(backend);
                Ok(())
            }
            EngineState::Loaded(_) => Err(InferenceError::AlreadyLoaded.into()),
            EngineState::Disposed => Err(Error::Disposed),
        }
    }

    /// Output dimensionality, once loaded.
    #[must_use]
    pub fn dimension(&self) -> Option<usize> {
        match &*self.state.read() {
            EngineState::Loaded(backend) => Some(backend.hidden_size()),
            _ => None,
        }
    }

    /// Whether a model is loaded and not yet disposed.
    #[must_use]
    pub fn is_loaded(&self) -> bool {
        matches!(&*self.state.read(), EngineState::Loaded(_))
    }

    /// Whether the engine has been disposed.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        matches!(&*self.state.read(), EngineState::Disposed)
    }

    fn backend(&self) -> Result<Arc<dyn InferenceBackend>> {
        match &*self.state.read() {
            EngineState::Loaded(backend) => Ok(Arc::clone(backend)),
            EngineState::Empty => Err(InferenceError::NotLoaded.into()),
            EngineState::Disposed => Err(Error::Disposed),
        }
    }

    /// Embed a tokenized batch.
    ///
    /// # Errors
    ///
    /// See [`InferenceEngine::run`].
    pub fn run_batch(&self, batch: &TokenizedBatch) -> Result<Vec<Vec<f32>>> {
        self.run(&batch.input_ids, &batch.attention_mask)
    }

    /// Embed a tokenized batch, checking `cancel` before and after the
    /// native call. The call itself is not interrupted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the token fired, otherwise as
    /// [`InferenceEngine::run`].
    pub fn run_batch_with_cancel(
        &self,
        batch: &TokenizedBatch,
        cancel: &CancellationToken,
    ) -> Result<Vec<Vec<f32>>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let vectors = self.run_batch(batch)?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        Ok(vectors)
    }

    /// Run the model over row-aligned ids and masks, then pool and
    /// (optionally) normalize. Output `i` belongs to row `i`.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::NotLoaded` before load, `Error::Disposed`
    /// after disposal, `Error::Validation` for ragged or mismatched input or
    /// mask values other than 0 and 1, or an inference error from the
    /// backend.
    pub fn run(
        &self,
        input_ids: &[Vec<i64>],
        attention_mask: &[Vec<i64>],
    ) -> Result<Vec<Vec<f32>>> {
        let backend = self.backend()?;
        let tensors = flatten(input_ids, attention_mask)?;

        if tensors.batch == 0 {
            return Ok(Vec::new());
        }

        let (batch, seq_len) = (tensors.batch, tensors.seq_len);
        let hidden = backend.run(tensors)?;
        check_hidden_shape(&hidden, batch, seq_len, backend.hidden_size())?;

        let mut pooled = mean_pool(hidden.view(), attention_mask);
        if self.options.normalize {
            pooled.iter_mut().for_each(|v| l2_normalize(v));
        }

        tracing::trace!(batch, seq_len, "Batch embedded");
        Ok(pooled)
    }

    /// Release the backend. Later calls are no-ops and return `false`.
    ///
    /// Runs already in flight hold their own reference and complete.
    pub fn dispose(&self) -> bool {
        let mut state = self.state.write();
        match std::mem::replace(&mut *state, EngineState::Disposed) {
            EngineState::Loaded(backend) => {
                tracing::debug!(backend = %backend.describe(), "Inference backend released");
                true
            }
            EngineState::Empty | EngineState::Disposed => false,
        }
    }
}

impl std::fmt::Debug for InferenceEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match &*self.state.read() {
            EngineState::Empty => "empty".to_string(),
            EngineState::Loaded(backend) => backend.describe(),
            EngineState::Disposed => "disposed".to_string(),
        };
        f.debug_struct("InferenceEngine")
            .field("options", &self.options)
            .field("state", &state)
            .finish()
    }
}

/// Validate row alignment and flatten into backend tensors.
fn flatten(input_ids: &[Vec<i64>], attention_mask: &[Vec<i64>]) -> Result<BatchTensors> {
    if input_ids.len() != attention_mask.len() {
        return Err(Error::validation(format!(
            "input_ids has {} rows but attention_mask has {}",
            input_ids.len(),
            attention_mask.len()
        )));
    }

    let seq_len = input_ids.first().map_or(0, Vec::len);
    for (i, (ids, mask)) in input_ids.iter().zip(attention_mask).enumerate() {
        if ids.len() != seq_len {
            return Err(Error::validation(format!(
                "input_ids row {i} has length {}, expected {seq_len}",
                ids.len()
            )));
        }
        if mask.len() != seq_len {
            return Err(Error::validation(format!(
                "attention_mask row {i} has length {}, expected {seq_len}",
                mask.len()
            )));
        }
        if let Some(pos) = mask.iter().position(|&m| m != 0 && m != 1) {
            return Err(Error::validation(format!(
                "attention_mask row {i} has value {} at position {pos}, expected 0 or 1",
                mask[pos]
            )));
        }
    }

    if !input_ids.is_empty() && seq_len == 0 {
        return Err(Error::validation("rows must not be empty"));
    }

    Ok(BatchTensors {
        batch: input_ids.len(),
        seq_len,
        input_ids: input_ids.concat(),
        attention_mask: attention_mask.concat(),
    })
}

fn check_hidden_shape(
    hidden: &Array3<f32>,
    batch: usize,
    seq_len: usize,
    hidden_size: usize,
) -> Result<()> {
    let actual = hidden.dim();
    if actual != (batch, seq_len, hidden_size) {
        return Err(InferenceError::OutputShape {
            expected: format!("[{batch}, {seq_len}, {hidden_size}]"),
            actual: format!("[{}, {}, {}]", actual.0, actual.1, actual.2),
        }
        .into());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::inference::pooling::l2_norm;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Backend whose hidden state at position `p` is `p + 1` in every
    /// component, plus the token id in component 0.
    struct PositionalBackend {
        hidden: usize,
        calls: AtomicUsize,
    }

    impl PositionalBackend {
        fn new(hidden: usize) -> Arc<Self> {
            Arc::new(Self {
                hidden,
                calls: AtomicUsize::new(0),
            })
        }
    }

    impl InferenceBackend for PositionalBackend {
        fn hidden_size(&self) -> usize {
            self.hidden
        }

        #[allow(clippy::cast_precision_loss)]
        fn run(&self, tensors: BatchTensors) -> Result<Array3<f32>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Array3::from_shape_fn(
                (tensors.batch, tensors.seq_len, self.hidden),
                |(b, p, h)| {
                    let base = (p + 1) as f32;
                    if h == 0 {
                        base + tensors.input_ids[b * tensors.seq_len + p] as f32
                    } else {
                        base
                    }
                },
            ))
        }
    }

    /// Backend that ignores the requested shape.
    struct WrongShapeBackend;

    impl InferenceBackend for WrongShapeBackend {
        fn hidden_size(&self) -> usize {
            4
        }

        fn run(&self, tensors: BatchTensors) -> Result<Array3<f32>> {
            Ok(Array3::zeros((tensors.batch, tensors.seq_len, 3)))
        }
    }

    fn engine_with(backend: Arc<dyn InferenceBackend>, normalize: bool) -> InferenceEngine {
        let engine = InferenceEngine::new(EngineOptions {
            normalize,
            ..EngineOptions::default()
        })
        .unwrap();
        engine.load_backend(backend).unwrap();
        engine
    }

    #[test]
    fn test_options_reject_zero_threads() {
        let err = InferenceEngine::new(EngineOptions {
            inter_threads: Some(0),
            ..EngineOptions::default()
        })
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let ok = EngineOptions {
            inter_threads: Some(1),
            intra_threads: Some(8),
            ..EngineOptions::default()
        };
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_run_before_load() {
        let engine = InferenceEngine::new(EngineOptions::default()).unwrap();
        let err = engine.run(&[vec![1, 2]], &[vec![1, 1]]).unwrap_err();
        assert!(matches!(err, Error::Inference(InferenceError::NotLoaded)));
        assert_eq!(engine.dimension(), None);
    }

    #[test]
    fn test_second_load_rejected() {
        let engine = engine_with(PositionalBackend::new(4), false);
        let err = engine.load_backend(PositionalBackend::new(4)).unwrap_err();
        assert!(matches!(err, Error::Inference(InferenceError::AlreadyLoaded)));

        let err = engine.load("/nonexistent/model.onnx").unwrap_err();
        assert!(matches!(err, Error::Inference(InferenceError::AlreadyLoaded)));
    }

    #[test]
    fn test_load_missing_or_empty_graph() {
        let engine = InferenceEngine::new(EngineOptions::default()).unwrap();
        let err = engine.load("/nonexistent/model.onnx").unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));

        let tmp = TempDir::new().unwrap();
        let empty = tmp.path().join("model.onnx");
        std::fs::write(&empty, b"").unwrap();
        let err = engine.load(&empty).unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(!engine.is_loaded());
    }

    #[test]
    fn test_dimension_from_backend() {
        let engine = engine_with(PositionalBackend::new(384), true);
        assert_eq!(engine.dimension(), Some(384));
        assert!(engine.is_loaded());
    }

    #[test]
    fn test_pooling_uses_mask() {
        let backend = PositionalBackend::new(3);
        let engine = engine_with(backend, false);

        // positions {0, 2} active out of 5, token ids all zero
        let ids = vec![vec![0; 5]];
        let mask = vec![vec![1, 0, 1, 0, 0]];
        let vectors = engine.run(&ids, &mask).unwrap();

        assert_eq!(vectors, vec![vec![2.0, 2.0, 2.0]]);
    }

    #[test]
    fn test_output_order_matches_input() {
        let engine = engine_with(PositionalBackend::new(2), false);
        let ids = vec![vec![10, 0], vec![20, 0], vec![30, 0]];
        let mask = vec![vec![1, 0], vec![1, 0], vec![1, 0]];

        let vectors = engine.run(&ids, &mask).unwrap();

        let firsts: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(firsts, vec![11.0, 21.0, 31.0]);
    }

    #[test]
    fn test_normalization_toggle() {
        let ids = vec![vec![5, 6, 7], vec![1, 0, 0]];
        let mask = vec![vec![1, 1, 1], vec![1, 0, 0]];

        let normalized = engine_with(PositionalBackend::new(8), true)
            .run(&ids, &mask)
            .unwrap();
        for v in &normalized {
            assert!((l2_norm(v) - 1.0).abs() < 1e-4);
        }

        let raw = engine_with(PositionalBackend::new(8), false)
            .run(&ids, &mask)
            .unwrap();
        assert!(raw.iter().any(|v| (l2_norm(v) - 1.0).abs() > 1e-2));
    }

    #[test]
    fn test_zero_token_row_stays_zero_when_normalized() {
        let engine = engine_with(PositionalBackend::new(4), true);
        let vectors = engine.run(&[vec![1, 2]], &[vec![0, 0]]).unwrap();
        assert_eq!(vectors[0], vec![0.0; 4]);
    }

    #[test]
    fn test_validation_happens_before_backend() {
        let backend = PositionalBackend::new(4);
        let engine = engine_with(Arc::clone(&backend) as Arc<dyn InferenceBackend>, true);

        let err = engine.run(&[vec![1, 2], vec![3, 4]], &[vec![1, 1]]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("2 rows"));

        let err = engine
            .run(&[vec![1, 2], vec![3, 4, 5]], &[vec![1, 1], vec![1, 1, 1]])
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let err = engine.run(&[vec![1, 2]], &[vec![1]]).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_non_binary_mask_rejected() {
        let backend = PositionalBackend::new(2);
        let engine = engine_with(Arc::clone(&backend) as Arc<dyn InferenceBackend>, false);

        for bad in [2, -1] {
            let err = engine.run(&[vec![0, 0]], &[vec![1, bad]]).unwrap_err();
            assert!(matches!(err, Error::Validation(_)));
            assert!(err.to_string().contains("expected 0 or 1"));
        }
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_empty_batch_skips_backend() {
        let backend = PositionalBackend::new(4);
        let engine = engine_with(Arc::clone(&backend) as Arc<dyn InferenceBackend>, true);
        assert!(engine.run_batch(&TokenizedBatch::default()).unwrap().is_empty());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_wrong_backend_shape_is_reported() {
        let engine = engine_with(Arc::new(WrongShapeBackend), true);
        let err = engine.run(&[vec![1, 2]], &[vec![1, 1]]).unwrap_err();
        assert!(matches!(
            err,
            Error::Inference(InferenceError::OutputShape { .. })
        ));
    }

    #[test]
    fn test_dispose_is_idempotent_and_distinct() {
        let engine = engine_with(PositionalBackend::new(4), true);
        assert!(engine.dispose());
        assert!(!engine.dispose());
        assert!(!engine.dispose());
        assert!(engine.is_disposed());

        let err = engine.run(&[vec![1]], &[vec![1]]).unwrap_err();
        assert!(err.is_disposed());

        let err = engine.load_backend(PositionalBackend::new(4)).unwrap_err();
        assert!(err.is_disposed());
    }

    #[test]
    fn test_cancel_checked_around_run() {
        let backend = PositionalBackend::new(4);
        let engine = engine_with(Arc::clone(&backend) as Arc<dyn InferenceBackend>, true);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let batch = TokenizedBatch {
            input_ids: vec![vec![1, 2]],
            attention_mask: vec![vec![1, 1]],
        };
        let err = engine.run_batch_with_cancel(&batch, &cancel).unwrap_err();
        assert!(err.is_cancelled());
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_concurrent_runs() {
        let engine = Arc::new(engine_with(PositionalBackend::new(16), true));

        let handles: Vec<_> = (0..8)
            .map(|t| {
                let engine = Arc::clone(&engine);
                std::thread::spawn(move || {
                    for _ in 0..50 {
                        let ids = vec![vec![t, 1, 2], vec![t + 1, 0, 0]];
                        let mask = vec![vec![1, 1, 1], vec![1, 0, 0]];
                        let vectors = engine.run(&ids, &mask).unwrap();
                        assert_eq!(vectors.len(), 2);
                        assert!(vectors.iter().all(|v| v.len() == 16));
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
    }

    #[test]
    fn test_engine_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InferenceEngine>();
    }
}
