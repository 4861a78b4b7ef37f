//! The embedding generator facade.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use super::embedding::{Embedding, ModelMetadata};
use crate::cache::{ModelArtifact, ModelCache, ModelDownloader, ProgressFn};
use crate::config::EmbedderConfig;
use crate::error::InferenceError;
use crate::inference::InferenceEngine;
use crate::tokenizer::TextTokenizer;
use crate::{Error, Result};

/// Turns text into embedding vectors with a locally loaded model.
///
/// Safe to share across threads (`Arc<Embedder>`); every method takes
/// `&self`.
pub struct Embedder {
    metadata: ModelMetadata,
    tokenizer: TextTokenizer,
    engine: InferenceEngine,
    disposed: AtomicBool,
}

impl Embedder {
    /// Resolve, download if needed, and load a model.
    ///
    /// Blocks the calling thread. Inside a tokio runtime prefer
    /// [`Embedder::load_async`].
    ///
    /// # Errors
    ///
    /// Returns a configuration error for invalid settings, `Error::NotFound`
    /// for missing model files, a download error if the graph cannot be
    /// fetched, or an inference/tokenization error if loading fails.
    pub fn load(config: EmbedderConfig) -> Result<Self> {
        config.validate()?;
        let started = Instant::now();

        let artifact = resolve_blocking(&config)?;
        let embedder = Self::from_artifact(&config, &artifact)?;

        log_loaded(&embedder, started);
        Ok(embedder)
    }

    /// Async variant of [`Embedder::load`].
    ///
    /// # Errors
    ///
    /// As [`Embedder::load`].
    pub async fn load_async(config: EmbedderConfig) -> Result<Self> {
        Self::load_async_with(config, None, &CancellationToken::new()).await
    }

    /// Async load with download progress and cancellation.
    ///
    /// Session and tokenizer construction run on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if `cancel` fires during resolution,
    /// otherwise as [`Embedder::load`].
    pub async fn load_async_with(
        config: EmbedderConfig,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<Self> {
        config.validate()?;
        let started = Instant::now();

        let artifact = resolve_artifact(&config, progress, cancel).await?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let embedder = tokio::task::spawn_blocking(move || Self::from_artifact(&config, &artifact))
            .await
            .map_err(|e| InferenceError::Runtime(format!("model load task failed: {e}")))??;

        log_loaded(&embedder, started);
        Ok(embedder)
    }

    /// Assemble an embedder from a loaded engine.
    ///
    /// # Errors
    ///
    /// Returns `InferenceError::NotLoaded` if the engine has no model, or
    /// `Error::Disposed` if it was disposed.
    pub fn from_components(
        model_id: impl Into<String>,
        tokenizer: TextTokenizer,
        engine: InferenceEngine,
    ) -> Result<Self> {
        if engine.is_disposed() {
            return Err(Error::Disposed);
        }
        let dimension = engine.dimension().ok_or(InferenceError::NotLoaded)?;

        Ok(Self {
            metadata: ModelMetadata::new(model_id, dimension),
            tokenizer,
            engine,
            disposed: AtomicBool::new(false),
        })
    }

    fn from_artifact(config: &EmbedderConfig, artifact: &ModelArtifact) -> Result<Self> {
        let tokenizer = TextTokenizer::from_path(&artifact.dir, config.max_length)?;
        let engine = InferenceEngine::new(config.engine_options())?;
        engine.load(&artifact.graph_path)?;
        Self::from_components(config.model_id.trim(), tokenizer, engine)
    }

    /// Model description.
    #[must_use]
    pub const fn metadata(&self) -> &ModelMetadata {
        &self.metadata
    }

    /// Output vector width.
    #[must_use]
    pub const fn dimension(&self) -> usize {
        self.metadata.dimension
    }

    /// The tokenizer in use.
    #[must_use]
    pub const fn tokenizer(&self) -> &TextTokenizer {
        &self.tokenizer
    }

    /// Embed a batch of texts. Output `i` belongs to input `i`.
    ///
    /// # Errors
    ///
    /// Returns `Error::Disposed` after [`Embedder::dispose`], or a
    /// tokenization/inference error.
    pub fn generate<S: AsRef<str>>(&self, texts: &[S]) -> Result<Vec<Embedding>> {
        self.ensure_live()?;
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.tokenizer.encode_batch(texts)?;
        let vectors = self.engine.run_batch(&batch)?;

        tracing::debug!(count = texts.len(), seq_len = batch.sequence_length(), "Generated embeddings");
        Ok(vectors.into_iter().map(Embedding::new).collect())
    }

    /// Embed a batch, checking `cancel` before tokenizing, before inference
    /// and after inference. A running native call is not interrupted.
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if the token fired, otherwise as
    /// [`Embedder::generate`].
    pub fn generate_with_cancel<S: AsRef<str>>(
        &self,
        texts: &[S],
        cancel: &CancellationToken,
    ) -> Result<Vec<Embedding>> {
        self.ensure_live()?;
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let batch = self.tokenizer.encode_batch_with_cancel(texts, cancel)?;
        let vectors = self.engine.run_batch_with_cancel(&batch, cancel)?;
        Ok(vectors.into_iter().map(Embedding::new).collect())
    }

    /// Embed a single text.
    ///
    /// # Errors
    ///
    /// As [`Embedder::generate`].
    pub fn generate_one(&self, text: &str) -> Result<Embedding> {
        self.generate(&[text])?.pop().ok_or_else(|| {
            InferenceError::OutputShape {
                expected: "1 vector".to_string(),
                actual: "0 vectors".to_string(),
            }
            .into()
        })
    }

    /// Number of tokens `text` produces, markers included, before
    /// truncation.
    ///
    /// # Errors
    ///
    /// Returns `Error::Disposed` after disposal, or a tokenization error.
    pub fn count_tokens(&self, text: &str) -> Result<usize> {
        self.ensure_live()?;
        self.tokenizer.count_tokens(text)
    }

    /// Release the model. Safe to call any number of times.
    pub fn dispose(&self) {
        if !self.disposed.swap(true, Ordering::AcqRel) {
            self.engine.dispose();
            tracing::info!(model_id = %self.metadata.model_id, "Embedder disposed");
        }
    }

    /// Whether [`Embedder::dispose`] has been called.
    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_disposed() {
            Err(Error::Disposed)
        } else {
            Ok(())
        }
    }
}

impl Drop for Embedder {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl std::fmt::Debug for Embedder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Embedder")
            .field("metadata", &self.metadata)
            .field("tokenizer", &self.tokenizer)
            .field("engine", &self.engine)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn log_loaded(embedder: &Embedder, started: Instant) {
    tracing::info!(
        model_id = %embedder.metadata.model_id,
        dimension = embedder.metadata.dimension,
        elapsed_ms = started.elapsed().as_millis(),
        "Embedder ready"
    );
}

/// Find the model directory: an explicit path, the cache, or a download.
async fn resolve_artifact(
    config: &EmbedderConfig,
    progress: Option<&ProgressFn>,
    cancel: &CancellationToken,
) -> Result<ModelArtifact> {
    if let Some(path) = &config.model_path {
        return local_artifact(path, config.prefer_quantized);
    }

    let cache = ModelCache::new(&config.cache_dir);
    ModelDownloader::default()
        .with_base_url(config.base_url.as_str())
        .with_revision(config.revision.as_str())
        .resolve(
            &cache,
            &config.model_id,
            config.prefer_quantized,
            progress,
            cancel,
        )
        .await
}

fn local_artifact(path: &Path, prefer_quantized: bool) -> Result<ModelArtifact> {
    if !path.is_dir() {
        return Err(Error::not_found("model directory", path));
    }
    ModelArtifact::from_dir(path, prefer_quantized)
}

/// Run [`resolve_artifact`] to completion from synchronous code.
///
/// Uses a private current-thread runtime; when the caller is already on a
/// runtime thread the work moves to a scoped helper thread, since blocking
/// on a runtime from inside one panics.
fn resolve_blocking(config: &EmbedderConfig) -> Result<ModelArtifact> {
    if let Some(path) = &config.model_path {
        return local_artifact(path, config.prefer_quantized);
    }

    let run = || -> Result<ModelArtifact> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?;
        runtime.block_on(resolve_artifact(config, None, &CancellationToken::new()))
    };

    if tokio::runtime::Handle::try_current().is_ok() {
        std::thread::scope(|scope| {
            scope
                .spawn(run)
                .join()
                .unwrap_or_else(|payload| std::panic::resume_unwind(payload))
        })
    } else {
        run()
    }
}
