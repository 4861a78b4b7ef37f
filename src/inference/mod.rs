//! Embedding inference.
//!
//! This module provides:
//! - An ONNX Runtime backend for transformer encoders
//! - Engine lifecycle (load once, run many, dispose)
//! - Mask-weighted mean pooling and L2 normalization

mod backend;
mod engine;
mod onnx;
mod pooling;

pub use backend::{BatchTensors, InferenceBackend};
pub use engine::{EngineOptions, InferenceEngine};
pub use onnx::OnnxBackend;
pub use pooling::{l2_norm, l2_normalize, mean_pool, NORM_EPSILON};
