//! Error types and Result aliases for Ember.
//!
//! This module defines the error hierarchy used throughout the crate.
//! All public functions return `Result<T, Error>` or `Result<T>`.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias using Ember's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for Ember operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration or usage error, detected before any I/O.
    #[error("configuration error: {0}")]
    Config(String),

    /// A file the operation needs is missing or empty.
    #[error("{what} not found at '{}'", .path.display())]
    NotFound { what: &'static str, path: PathBuf },

    /// Model artifact download error.
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Tokenizer construction or encoding error.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Inference engine error.
    #[error("inference error: {0}")]
    Inference(#[from] InferenceError),

    /// Batch shape rejected before inference.
    #[error("validation error: {0}")]
    Validation(String),

    /// The embedder or engine has already been disposed.
    #[error("embedder has already been disposed")]
    Disposed,

    /// The operation was cancelled through its cancellation token.
    #[error("operation cancelled")]
    Cancelled,

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Download-specific errors.
#[derive(Error, Debug)]
pub enum DownloadError {
    /// Transport failure while talking to the model host.
    #[error("request to {url} failed: {reason}")]
    Request { url: String, reason: String },

    /// The model host answered with a non-success status.
    #[error("request to {url} returned HTTP {status}")]
    Status { url: String, status: u16 },

    /// Failure writing the downloaded bytes to disk.
    #[error("failed to write '{}': {reason}", .path.display())]
    Write { path: PathBuf, reason: String },
}

/// Inference-specific errors.
#[derive(Error, Debug)]
pub enum InferenceError {
    /// ONNX runtime error.
    #[error("ONNX runtime error: {0}")]
    Runtime(String),

    /// Model loading error.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// A model is already loaded into this engine.
    #[error("engine already has a model loaded; create a new engine to load another")]
    AlreadyLoaded,

    /// `run` was called before any model was loaded.
    #[error("no model loaded")]
    NotLoaded,

    /// The backend returned a tensor of an unexpected shape.
    #[error("unexpected output shape: expected {expected}, got {actual}")]
    OutputShape { expected: String, actual: String },
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a not-found error.
    pub fn not_found(what: &'static str, path: impl Into<PathBuf>) -> Self {
        Self::NotFound {
            what,
            path: path.into(),
        }
    }

    /// Whether this error is a cancellation outcome rather than a failure.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }

    /// Whether this error means the instance was used after release.
    #[must_use]
    pub const fn is_disposed(&self) -> bool {
        matches!(self, Self::Disposed)
    }
}

impl DownloadError {
    /// Create a request error for the given URL.
    pub fn request(url: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        Self::Request {
            url: url.into(),
            reason: reason.to_string(),
        }
    }

    /// Create a write error for the given path.
    pub fn write(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Self::Write {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}
