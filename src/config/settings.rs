//! Configuration settings and validation.

use std::path::PathBuf;
use std::str::FromStr;

use serde::Deserialize;

use crate::cache::default_cache_root;
use crate::inference::EngineOptions;
use crate::{Error, Result};

/// Model loaded when none is configured.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Default model hosting base URL.
pub const DEFAULT_BASE_URL: &str = "https://huggingface.co";

/// Default model revision.
pub const DEFAULT_REVISION: &str = "main";

/// Default maximum sequence length.
pub const DEFAULT_MAX_LENGTH: usize = 512;

/// Configuration for an [`Embedder`](crate::Embedder).
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbedderConfig {
    /// Model identifier, e.g. `sentence-transformers/all-MiniLM-L6-v2`.
    pub model_id: String,

    /// Explicit local model directory. Skips the cache and the network.
    pub model_path: Option<PathBuf>,

    /// Cache root for downloaded models.
    pub cache_dir: PathBuf,

    /// Whether missing model files may be downloaded.
    pub allow_download: bool,

    /// Prefer quantized graph variants when present.
    pub prefer_quantized: bool,

    /// Maximum sequence length in tokens, including start/end markers.
    pub max_length: usize,

    /// L2-normalize pooled vectors.
    pub normalize: bool,

    /// Let ONNX Runtime execute independent graph nodes in parallel.
    pub parallel_execution: bool,

    /// Inter-operation thread pool size. `None` leaves the runtime default.
    pub inter_threads: Option<usize>,

    /// Intra-operation thread pool size. `None` leaves the runtime default.
    pub intra_threads: Option<usize>,

    /// Model hosting base URL.
    pub base_url: String,

    /// Model revision (branch, tag or commit).
    pub revision: String,
}

impl Default for EmbedderConfig {
    fn default() -> Self {
        Self {
            model_id: DEFAULT_MODEL_ID.to_string(),
            model_path: None,
            cache_dir: default_cache_root(),
            allow_download: true,
            prefer_quantized: false,
            max_length: DEFAULT_MAX_LENGTH,
            normalize: true,
            parallel_execution: false,
            inter_threads: None,
            intra_threads: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            revision: DEFAULT_REVISION.to_string(),
        }
    }
}

impl EmbedderConfig {
    /// Create a configuration for the given model identifier with defaults.
    #[must_use]
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            ..Self::default()
        }
    }

    /// Create a configuration that loads from a local directory only.
    #[must_use]
    pub fn local(model_id: impl Into<String>, model_path: impl Into<PathBuf>) -> Self {
        Self {
            model_id: model_id.into(),
            model_path: Some(model_path.into()),
            allow_download: false,
            ..Self::default()
        }
    }

    /// Load configuration from environment variables and defaults.
    ///
    /// Respects these environment variables:
    /// - `EMBER_MODEL_ID`, `EMBER_MODEL_PATH`, `EMBER_CACHE_DIR`
    /// - `EMBER_OFFLINE` (disables downloads), `EMBER_QUANTIZED`
    /// - `EMBER_MAX_LENGTH`, `EMBER_NORMALIZE`
    /// - `EMBER_INTER_THREADS`, `EMBER_INTRA_THREADS`
    /// - `EMBER_BASE_URL`
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or the result is invalid.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(model_id) = lookup("EMBER_MODEL_ID") {
            config.model_id = model_id;
        }
        if let Some(path) = lookup("EMBER_MODEL_PATH") {
            config.model_path = Some(PathBuf::from(path));
        }
        if let Some(dir) = lookup("EMBER_CACHE_DIR") {
            config.cache_dir = PathBuf::from(dir);
        }
        if let Some(offline) = lookup("EMBER_OFFLINE") {
            config.allow_download = !parse_flag(&offline);
        }
        if let Some(quantized) = lookup("EMBER_QUANTIZED") {
            config.prefer_quantized = parse_flag(&quantized);
        }
        if let Some(normalize) = lookup("EMBER_NORMALIZE") {
            config.normalize = parse_flag(&normalize);
        }
        if let Some(value) = lookup("EMBER_MAX_LENGTH") {
            config.max_length = parse_number("EMBER_MAX_LENGTH", &value)?;
        }
        if let Some(value) = lookup("EMBER_INTER_THREADS") {
            config.inter_threads = Some(parse_number("EMBER_INTER_THREADS", &value)?);
        }
        if let Some(value) = lookup("EMBER_INTRA_THREADS") {
            config.intra_threads = Some(parse_number("EMBER_INTRA_THREADS", &value)?);
        }
        if let Some(url) = lookup("EMBER_BASE_URL") {
            config.base_url = url;
        }

        config.validate()?;
        Ok(config)
    }

    /// Set an explicit local model directory.
    #[must_use]
    pub fn with_model_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.model_path = Some(path.into());
        self
    }

    /// Set the cache root.
    #[must_use]
    pub fn with_cache_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cache_dir = dir.into();
        self
    }

    /// Enable or disable downloads.
    #[must_use]
    pub fn with_download(mut self, allow: bool) -> Self {
        self.allow_download = allow;
        self
    }

    /// Prefer quantized graph variants.
    #[must_use]
    pub fn with_quantized(mut self, prefer: bool) -> Self {
        self.prefer_quantized = prefer;
        self
    }

    /// Set the maximum sequence length.
    #[must_use]
    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = max_length;
        self
    }

    /// Enable or disable L2 normalization.
    #[must_use]
    pub fn with_normalize(mut self, normalize: bool) -> Self {
        self.normalize = normalize;
        self
    }

    /// Set explicit thread pool sizes.
    #[must_use]
    pub fn with_threads(mut self, inter: Option<usize>, intra: Option<usize>) -> Self {
        self.inter_threads = inter;
        self.intra_threads = intra;
        self
    }

    /// Set the model hosting base URL.
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = url.into();
        self
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<()> {
        if self.model_id.trim().is_empty() {
            return Err(Error::config("model_id cannot be empty"));
        }

        if self.model_path.is_none() && !self.allow_download {
            return Err(Error::config(
                "no model_path configured and downloads are disabled",
            ));
        }

        if self.max_length < 2 {
            return Err(Error::config(format!(
                "max_length must be at least 2, got {}",
                self.max_length
            )));
        }

        if self.model_path.is_none() && self.base_url.trim().is_empty() {
            return Err(Error::config("base_url cannot be empty"));
        }

        self.engine_options().validate()
    }

    /// Inference engine options derived from this configuration.
    #[must_use]
    pub const fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            normalize: self.normalize,
            parallel_execution: self.parallel_execution,
            inter_threads: self.inter_threads,
            intra_threads: self.intra_threads,
        }
    }
}

fn parse_flag(value: &str) -> bool {
    matches!(value.to_lowercase().as_str(), "true" | "1" | "yes")
}

fn parse_number(key: &str, value: &str) -> Result<usize> {
    usize::from_str(value.trim())
        .map_err(|e| Error::config(format!("invalid value '{value}' for {key}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = EmbedderConfig::default();
        assert_eq!(config.model_id, DEFAULT_MODEL_ID);
        assert_eq!(config.max_length, 512);
        assert!(config.normalize);
        assert!(config.allow_download);
        assert!(!config.prefer_quantized);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_local_config_disables_download() {
        let config = EmbedderConfig::local("local/model", "/opt/models/minilm");
        assert!(!config.allow_download);
        assert_eq!(config.model_path, Some(PathBuf::from("/opt/models/minilm")));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_model_id() {
        let config = EmbedderConfig::new("   ");
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("model_id"));
    }

    #[test]
    fn test_validate_no_path_and_no_download() {
        let config = EmbedderConfig::default().with_download(false);
        let err = config.validate().unwrap_err();
        assert!(matches!(err, Error::Config(_)));
        assert!(err.to_string().contains("downloads are disabled"));
    }

    #[test]
    fn test_validate_max_length_too_small() {
        let config = EmbedderConfig::default().with_max_length(1);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_length"));
    }

    #[test]
    fn test_validate_zero_threads() {
        let config = EmbedderConfig::default().with_threads(Some(0), None);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inter_threads"));

        let config = EmbedderConfig::default().with_threads(None, Some(0));
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("intra_threads"));
    }

    #[test]
    fn test_engine_options_mirror_config() {
        let config = EmbedderConfig::default()
            .with_normalize(false)
            .with_threads(Some(2), Some(4));
        let options = config.engine_options();
        assert!(!options.normalize);
        assert_eq!(options.inter_threads, Some(2));
        assert_eq!(options.intra_threads, Some(4));
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = EmbedderConfig::from_lookup(lookup_from(&[
            ("EMBER_MODEL_ID", "BAAI/bge-small-en-v1.5"),
            ("EMBER_CACHE_DIR", "/var/cache/ember"),
            ("EMBER_QUANTIZED", "yes"),
            ("EMBER_MAX_LENGTH", "256"),
            ("EMBER_INTRA_THREADS", "2"),
            ("EMBER_NORMALIZE", "false"),
        ]))
        .unwrap();

        assert_eq!(config.model_id, "BAAI/bge-small-en-v1.5");
        assert_eq!(config.cache_dir, PathBuf::from("/var/cache/ember"));
        assert!(config.prefer_quantized);
        assert_eq!(config.max_length, 256);
        assert_eq!(config.intra_threads, Some(2));
        assert!(!config.normalize);
    }

    #[test]
    fn test_from_lookup_offline_requires_path() {
        let err = EmbedderConfig::from_lookup(lookup_from(&[("EMBER_OFFLINE", "1")])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let config = EmbedderConfig::from_lookup(lookup_from(&[
            ("EMBER_OFFLINE", "true"),
            ("EMBER_MODEL_PATH", "/opt/models/minilm"),
        ]))
        .unwrap();
        assert!(!config.allow_download);
    }

    #[test]
    fn test_from_lookup_rejects_bad_number() {
        let err = EmbedderConfig::from_lookup(lookup_from(&[("EMBER_MAX_LENGTH", "lots")]))
            .unwrap_err();
        assert!(err.to_string().contains("EMBER_MAX_LENGTH"));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: EmbedderConfig = serde_json::from_str(
            r#"{ "model_id": "org/model", "prefer_quantized": true, "max_length": 128 }"#,
        )
        .unwrap();
        assert_eq!(config.model_id, "org/model");
        assert!(config.prefer_quantized);
        assert_eq!(config.max_length, 128);
        assert!(config.normalize);
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
    }

    #[test]
    fn test_flag_parsing_case_insensitive() {
        for value in ["TRUE", "Yes", "1"] {
            assert!(parse_flag(value), "'{value}' should be truthy");
        }
        for value in ["false", "0", "no", ""] {
            assert!(!parse_flag(value), "'{value}' should be falsy");
        }
    }
}
