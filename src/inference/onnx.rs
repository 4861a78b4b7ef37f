//! ONNX Runtime backend.
//!
//! Wraps an `ort` session loaded from a graph file on disk.

use std::borrow::Cow;
use std::path::{Path, PathBuf};

use ndarray::Array3;
use ort::session::builder::GraphOptimizationLevel;
use ort::session::{Session, SessionInputValue};
use ort::value::Tensor;
use parking_lot::Mutex;

use super::backend::{BatchTensors, InferenceBackend};
use super::engine::EngineOptions;
use crate::error::InferenceError;
use crate::Result;

const INPUT_IDS: &str = "input_ids";
const ATTENTION_MASK: &str = "attention_mask";
const TOKEN_TYPE_IDS: &str = "token_type_ids";

/// Output names carrying per-token hidden states, in preference order.
const HIDDEN_STATE_OUTPUTS: &[&str] = &["last_hidden_state", "token_embeddings"];

/// ONNX embedding model session.
///
/// `ort` needs exclusive access to run a session, so the session sits
/// behind a mutex; callers share the backend freely.
pub struct OnnxBackend {
    session: Mutex<Session>,
    output_name: String,
    hidden_size: usize,
    token_type_ids: bool,
    model_path: PathBuf,
}

impl OnnxBackend {
    /// Load an ONNX graph and discover its output width.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid thread counts, or an
    /// inference error if the runtime rejects the graph.
    pub fn load(model_path: impl AsRef<Path>, options: &EngineOptions) -> Result<Self> {
        options.validate()?;
        let model_path = model_path.as_ref().to_path_buf();

        tracing::info!(path = %model_path.display(), "Loading ONNX embedding model");

        let mut builder = Session::builder()
            .map_err(|e| InferenceError::Runtime(format!("failed to create session builder: {e}")))?
            .with_optimization_level(GraphOptimizationLevel::Level3)
            .map_err(|e| InferenceError::Runtime(format!("failed to set optimization level: {e}")))?
            .with_parallel_execution(options.parallel_execution)
            .map_err(|e| InferenceError::Runtime(format!("failed to set execution mode: {e}")))?;

        if let Some(threads) = options.inter_threads {
            builder = builder
                .with_inter_threads(threads)
                .map_err(|e| InferenceError::Runtime(format!("failed to set inter threads: {e}")))?;
        }
        if let Some(threads) = options.intra_threads {
            builder = builder
                .with_intra_threads(threads)
                .map_err(|e| InferenceError::Runtime(format!("failed to set intra threads: {e}")))?;
        }

        let session = builder
            .commit_from_file(&model_path)
            .map_err(|e| InferenceError::ModelLoad(format!("{}: {e}", model_path.display())))?;

        let input_names: Vec<String> = session
            .inputs()
            .iter()
            .map(|input| input.name().to_string())
            .collect();
        for required in [INPUT_IDS, ATTENTION_MASK] {
            if !input_names.iter().any(|n| n == required) {
                return Err(InferenceError::ModelLoad(format!(
                    "{} has no '{required}' input (inputs: {})",
                    model_path.display(),
                    input_names.join(", ")
                ))
                .into());
            }
        }
        let token_type_ids = input_names.iter().any(|n| n == TOKEN_TYPE_IDS);

        let outputs = session.outputs();
        let output = HIDDEN_STATE_OUTPUTS
            .iter()
            .find_map(|name| outputs.iter().find(|o| o.name() == *name))
            .or_else(|| outputs.first())
            .ok_or_else(|| {
                InferenceError::ModelLoad(format!("{} declares no outputs", model_path.display()))
            })?;
        let output_name = output.name().to_string();
        let declared_size = output
            .dtype()
            .tensor_shape()
            .and_then(|shape| shape.iter().last().copied())
            .and_then(|dim| usize::try_from(dim).ok())
            .filter(|&dim| dim > 0);

        let mut backend = Self {
            session: Mutex::new(session),
            output_name,
            hidden_size: declared_size.unwrap_or(0),
            token_type_ids,
            model_path,
        };

        if declared_size.is_none() {
            backend.hidden_size = backend.detect_hidden_size()?;
        }

        tracing::info!(
            path = %backend.model_path.display(),
            output = %backend.output_name,
            hidden_size = backend.hidden_size,
            token_type_ids = backend.token_type_ids,
            "Model loaded successfully"
        );

        Ok(backend)
    }

    /// Path of the loaded graph file.
    #[must_use]
    pub fn model_path(&self) -> &Path {
        &self.model_path
    }

    /// Whether the graph takes a segment-id input.
    #[must_use]
    pub const fn accepts_token_type_ids(&self) -> bool {
        self.token_type_ids
    }

    /// Run a one-token input to learn the output width of a graph whose
    /// hidden dimension is symbolic.
    fn detect_hidden_size(&self) -> Result<usize> {
        let states = self.execute(BatchTensors {
            batch: 1,
            seq_len: 1,
            input_ids: vec![0],
            attention_mask: vec![1],
        })?;
        let (_, _, hidden) = states.dim();
        if hidden == 0 {
            return Err(InferenceError::ModelLoad(format!(
                "{} produced an empty hidden dimension",
                self.model_path.display()
            ))
            .into());
        }
        Ok(hidden)
    }

    fn execute(&self, tensors: BatchTensors) -> Result<Array3<f32>> {
        let shape = [tensors.batch, tensors.seq_len];
        let type_ids = self.token_type_ids.then(|| tensors.token_type_ids());

        let mut inputs: Vec<(Cow<'_, str>, SessionInputValue<'_>)> = vec![
            (Cow::Borrowed(INPUT_IDS), tensor(shape, tensors.input_ids, INPUT_IDS)?),
            (
                Cow::Borrowed(ATTENTION_MASK),
                tensor(shape, tensors.attention_mask, ATTENTION_MASK)?,
            ),
        ];
        if let Some(type_ids) = type_ids {
            inputs.push((
                Cow::Borrowed(TOKEN_TYPE_IDS),
                tensor(shape, type_ids, TOKEN_TYPE_IDS)?,
            ));
        }

        let mut session = self.session.lock();
        let outputs = session
            .run(inputs)
            .map_err(|e| InferenceError::Runtime(format!("inference failed: {e}")))?;

        let (out_shape, data) = outputs[self.output_name.as_str()]
            .try_extract_tensor::<f32>()
            .map_err(|e| InferenceError::Runtime(format!("failed to read output: {e}")))?;

        let dims: Vec<usize> = out_shape
            .iter()
            .map(|&d| usize::try_from(d).unwrap_or(0))
            .collect();
        if dims.len() != 3 || dims[0] != tensors.batch || dims[1] != tensors.seq_len {
            return Err(InferenceError::OutputShape {
                expected: format!("[{}, {}, hidden]", tensors.batch, tensors.seq_len),
                actual: format!("{dims:?}"),
            }
            .into());
        }

        Array3::from_shape_vec((dims[0], dims[1], dims[2]), data.to_vec()).map_err(|e| {
            InferenceError::OutputShape {
                expected: format!("{dims:?}"),
                actual: e.to_string(),
            }
            .into()
        })
    }
}

fn tensor(
    shape: [usize; 2],
    data: Vec<i64>,
    name: &str,
) -> Result<SessionInputValue<'static>> {
    Tensor::from_array((shape, data))
        .map(SessionInputValue::from)
        .map_err(|e| InferenceError::Runtime(format!("failed to create {name}: {e}")).into())
}

impl InferenceBackend for OnnxBackend {
    fn hidden_size(&self) -> usize {
        self.hidden_size
    }

    fn run(&self, tensors: BatchTensors) -> Result<Array3<f32>> {
        self.execute(tensors)
    }

    fn describe(&self) -> String {
        format!(
            "onnx({}, hidden_size={})",
            self.model_path.display(),
            self.hidden_size
        )
    }
}

impl std::fmt::Debug for OnnxBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OnnxBackend")
            .field("model_path", &self.model_path)
            .field("output_name", &self.output_name)
            .field("hidden_size", &self.hidden_size)
            .field("token_type_ids", &self.token_type_ids)
            .field("session", &"<Mutex<Session>>")
            .finish()
    }
}
