//! Embedder facade.
//!
//! Ties the artifact cache, tokenizer and inference engine together behind
//! a single `generate` call.

mod embedding;
mod generator;

pub use embedding::{Embedding, ModelMetadata, PROVIDER_NAME};
pub use generator::Embedder;
