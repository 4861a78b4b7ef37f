//! Text tokenization.
//!
//! Converts raw text into fixed-length token id and attention mask rows
//! that can be turned into inference tensors directly.

mod batch;
mod text;

pub use batch::{Encoded, TokenizedBatch};
pub use text::{TextTokenizer, TOKENIZER_CONFIG_FILE, TOKENIZER_JSON_FILE, VOCAB_FILE};
