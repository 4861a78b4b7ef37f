//! On-disk layout of cached model artifacts.
//!
//! Each model lives in `<cache-root>/<sanitized-model-id>/` with the graph
//! file(s) and the auxiliary vocabulary/config files side by side.

use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Canonical full-precision graph file.
pub const GRAPH_FILE: &str = "model.onnx";

/// Quantized graph variants, in preference order.
pub const QUANTIZED_GRAPH_FILES: &[&str] = &["model_quantized.onnx", "model_int8.onnx"];

/// Auxiliary files fetched next to the graph. Any of them may be absent.
pub const AUXILIARY_FILES: &[&str] = &[
    "tokenizer.json",
    "tokenizer_config.json",
    "vocab.txt",
    "special_tokens_map.json",
    "config.json",
];

/// Remote sub-path holding the graph files.
pub const ONNX_SUBDIR: &str = "onnx";

const PRODUCT_DIR: &str = "ember";
const MODELS_DIR: &str = "models";

/// Turn a model identifier into a single filesystem-safe directory name.
///
/// # Errors
///
/// Returns a configuration error if the identifier is blank.
pub fn sanitize_model_id(model_id: &str) -> Result<String> {
    let trimmed = model_id.trim();
    if trimmed.is_empty() {
        return Err(Error::config("model identifier cannot be empty"));
    }

    let sanitized: String = trimmed
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();

    // "." and ".." would escape the cache root
    if sanitized.chars().all(|c| c == '.') {
        return Ok(sanitized.replace('.', "_"));
    }

    Ok(sanitized)
}

/// Platform default cache root.
///
/// On non-Windows platforms `$XDG_CACHE_HOME` takes precedence when set;
/// otherwise the per-user local data directory is used.
#[must_use]
pub fn default_cache_root() -> PathBuf {
    cache_root_from(std::env::var("XDG_CACHE_HOME").ok(), dirs::data_local_dir())
}

fn cache_root_from(xdg_cache: Option<String>, local_data: Option<PathBuf>) -> PathBuf {
    if cfg!(not(windows)) {
        if let Some(xdg) = xdg_cache.filter(|v| !v.trim().is_empty()) {
            return PathBuf::from(xdg).join(PRODUCT_DIR).join(MODELS_DIR);
        }
    }

    local_data
        .map_or_else(|| PathBuf::from(".ember"), |dir| dir.join(PRODUCT_DIR))
        .join(MODELS_DIR)
}

/// Graph file names to look for, in preference order.
#[must_use]
pub fn graph_candidates(prefer_quantized: bool) -> Vec<&'static str> {
    if prefer_quantized {
        QUANTIZED_GRAPH_FILES
            .iter()
            .copied()
            .chain(std::iter::once(GRAPH_FILE))
            .collect()
    } else {
        vec![GRAPH_FILE]
    }
}

/// Whether a file exists and has content.
#[must_use]
pub fn is_usable_file(path: &Path) -> bool {
    std::fs::metadata(path).is_ok_and(|m| m.is_file() && m.len() > 0)
}

/// Pick the graph file to load from a model directory.
///
/// # Errors
///
/// Returns `Error::NotFound` if no usable graph file is present.
pub fn select_graph_file(dir: &Path, prefer_quantized: bool) -> Result<PathBuf> {
    graph_candidates(prefer_quantized)
        .into_iter()
        .map(|name| dir.join(name))
        .find(|path| is_usable_file(path))
        .ok_or_else(|| Error::not_found("inference graph", dir.join(GRAPH_FILE)))
}

/// A resolved model directory with a usable graph file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelArtifact {
    /// Model directory.
    pub dir: PathBuf,
    /// Graph file the engine should load.
    pub graph_path: PathBuf,
    /// Auxiliary files present on disk.
    pub auxiliary: Vec<PathBuf>,
}

impl ModelArtifact {
    /// Describe an existing local model directory.
    ///
    /// No network access and no content verification is performed.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` if the directory has no usable graph file.
    pub fn from_dir(dir: impl AsRef<Path>, prefer_quantized: bool) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let graph_path = select_graph_file(&dir, prefer_quantized)?;
        let auxiliary = AUXILIARY_FILES
            .iter()
            .map(|name| dir.join(name))
            .filter(|path| is_usable_file(path))
            .collect();

        Ok(Self {
            dir,
            graph_path,
            auxiliary,
        })
    }

    /// Path of a named auxiliary file, if it is present.
    #[must_use]
    pub fn auxiliary_file(&self, name: &str) -> Option<&Path> {
        self.auxiliary
            .iter()
            .find(|p| p.file_name().is_some_and(|f| f == name))
            .map(PathBuf::as_path)
    }
}

/// Cache root for downloaded models.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelCache {
    root: PathBuf,
}

impl Default for ModelCache {
    fn default() -> Self {
        Self::new(default_cache_root())
    }
}

impl ModelCache {
    /// Create a cache rooted at the given directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Cache root directory.
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Directory for a model identifier.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the identifier is blank.
    pub fn model_dir(&self, model_id: &str) -> Result<PathBuf> {
        Ok(self.root.join(sanitize_model_id(model_id)?))
    }

    /// Return the cached artifact if a usable graph file is already present.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the identifier is blank.
    pub fn lookup(&self, model_id: &str, prefer_quantized: bool) -> Result<Option<ModelArtifact>> {
        let dir = self.model_dir(model_id)?;
        match ModelArtifact::from_dir(&dir, prefer_quantized) {
            Ok(artifact) => Ok(Some(artifact)),
            Err(Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}
