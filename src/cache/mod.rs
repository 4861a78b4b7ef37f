//! Model artifact cache and downloader.
//!
//! This module provides:
//! - Filesystem-safe cache layout keyed by model identifier
//! - Quantized graph variant selection
//! - Atomic, cancellable, progress-reporting downloads

mod downloader;
mod layout;

pub use downloader::{shared_http_client, ModelDownloader, ProgressFn};
pub use layout::{
    default_cache_root, graph_candidates, is_usable_file, sanitize_model_id, select_graph_file,
    ModelArtifact, ModelCache, AUXILIARY_FILES, GRAPH_FILE, ONNX_SUBDIR, QUANTIZED_GRAPH_FILES,
};
