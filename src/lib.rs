//! Ember
//!
//! Local text embeddings from pretrained transformer models exported to
//! ONNX: artifact caching and download, tokenization, batched inference,
//! mean pooling and normalization.
//!
//! ```no_run
//! use ember::{Embedder, EmbedderConfig};
//!
//! # fn main() -> ember::Result<()> {
//! let embedder = Embedder::load(EmbedderConfig::default())?;
//! let vectors = embedder.generate(&["hello world", "goodbye world"])?;
//! assert_eq!(vectors.len(), 2);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod cache;
pub mod config;
pub mod embedder;
pub mod error;
pub mod inference;
pub mod observability;
pub mod tokenizer;

pub use cache::{ModelArtifact, ModelCache, ModelDownloader};
pub use config::EmbedderConfig;
pub use embedder::{Embedder, Embedding, ModelMetadata};
pub use error::{Error, Result};
pub use inference::{EngineOptions, InferenceBackend, InferenceEngine};
pub use tokenizer::{TextTokenizer, TokenizedBatch};
pub use tokio_util::sync::CancellationToken;
