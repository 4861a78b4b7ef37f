//! Model artifact downloader.
//!
//! Streams model files from the hosting service into the cache. Every file
//! is written to a temporary sibling and renamed into place once the whole
//! body has arrived, so a canonical path never holds a partial file.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};

use futures::StreamExt;
use once_cell::sync::Lazy;
use reqwest::Client;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use super::layout::{
    is_usable_file, ModelArtifact, ModelCache, AUXILIARY_FILES, GRAPH_FILE, ONNX_SUBDIR,
    QUANTIZED_GRAPH_FILES,
};
use crate::config::{DEFAULT_BASE_URL, DEFAULT_REVISION};
use crate::error::DownloadError;
use crate::{Error, Result};

/// Progress callback receiving overall completion in `0.0..=1.0`.
pub type ProgressFn = dyn Fn(f32) + Send + Sync;

/// Process-wide HTTP client.
///
/// Created on first use and kept until process exit so repeated downloads
/// reuse pooled connections. Pass it (or any other client) to
/// [`ModelDownloader::new`].
static SHARED_CLIENT: Lazy<Client> = Lazy::new(Client::new);

/// Handle to the process-wide HTTP client. Cloning is cheap.
#[must_use]
pub fn shared_http_client() -> Client {
    SHARED_CLIENT.clone()
}

/// One file to fetch for a model.
#[derive(Debug, Clone, PartialEq, Eq)]
struct RemoteFile {
    remote_path: String,
    local_name: &'static str,
    required: bool,
}

/// Files to fetch for a model, graph files first.
fn download_plan(prefer_quantized: bool) -> Vec<RemoteFile> {
    let mut plan = Vec::new();

    if prefer_quantized {
        plan.extend(QUANTIZED_GRAPH_FILES.iter().map(|name| RemoteFile {
            remote_path: format!("{ONNX_SUBDIR}/{name}"),
            local_name: *name,
            required: false,
        }));
    }

    plan.push(RemoteFile {
        remote_path: format!("{ONNX_SUBDIR}/{GRAPH_FILE}"),
        local_name: GRAPH_FILE,
        required: true,
    });

    plan.extend(AUXILIARY_FILES.iter().map(|name| RemoteFile {
        remote_path: (*name).to_string(),
        local_name: *name,
        required: false,
    }));

    plan
}

/// Progress over a multi-file download.
struct ProgressTracker<'a> {
    callback: Option<&'a ProgressFn>,
    total_files: usize,
    completed: usize,
}

impl<'a> ProgressTracker<'a> {
    const fn new(callback: Option<&'a ProgressFn>, total_files: usize) -> Self {
        Self {
            callback,
            total_files,
            completed: 0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    fn report(&self, file_fraction: f32) {
        if let Some(callback) = self.callback {
            let overall =
                (self.completed as f32 + file_fraction.clamp(0.0, 1.0)) / self.total_files as f32;
            callback(overall.clamp(0.0, 1.0));
        }
    }

    fn finish_file(&mut self) {
        self.completed += 1;
        self.report(0.0);
    }
}

/// Downloads model files into a [`ModelCache`].
#[derive(Debug, Clone)]
pub struct ModelDownloader {
    client: Client,
    base_url: String,
    revision: String,
}

impl Default for ModelDownloader {
    fn default() -> Self {
        Self::new(shared_http_client())
    }
}

impl ModelDownloader {
    /// Create a downloader using the given HTTP client.
    #[must_use]
    pub fn new(client: Client) -> Self {
        Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            revision: DEFAULT_REVISION.to_string(),
        }
    }

    /// Set the model hosting base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Set the model revision.
    #[must_use]
    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = revision.into();
        self
    }

    /// URL of a file within a model repository.
    #[must_use]
    pub fn file_url(&self, model_id: &str, remote_path: &str) -> String {
        format!(
            "{}/{}/resolve/{}/{}",
            self.base_url.trim_end_matches('/'),
            model_id.trim(),
            self.revision,
            remote_path
        )
    }

    /// Resolve a model identifier to a local directory with a usable graph.
    ///
    /// Returns immediately, without network access, when a graph file is
    /// already cached. Otherwise fetches the graph file (fatal on failure)
    /// and every auxiliary file (skipped on failure).
    ///
    /// # Errors
    ///
    /// Returns `Error::Cancelled` if `cancel` fires, a download error if the
    /// required graph file cannot be fetched, or a configuration error for a
    /// blank identifier.
    pub async fn resolve(
        &self,
        cache: &ModelCache,
        model_id: &str,
        prefer_quantized: bool,
        progress: Option<&ProgressFn>,
        cancel: &CancellationToken,
    ) -> Result<ModelArtifact> {
        if let Some(artifact) = cache.lookup(model_id, prefer_quantized)? {
            tracing::debug!(
                model_id,
                path = %artifact.graph_path.display(),
                "Using cached model"
            );
            return Ok(artifact);
        }

        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let dir = cache.model_dir(model_id)?;
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| DownloadError::write(&dir, e))?;

        tracing::info!(model_id, dir = %dir.display(), "Downloading model files");

        let plan = download_plan(prefer_quantized);
        let mut tracker = ProgressTracker::new(progress, plan.len());
        tracker.report(0.0);

        for file in &plan {
            let url = self.file_url(model_id, &file.remote_path);
            let dest = dir.join(file.local_name);

            match self.download_file(&url, &dest, &tracker, cancel).await {
                Ok(bytes) => {
                    tracing::debug!(file = file.local_name, bytes, "Downloaded model file");
                }
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(e) if file.required => {
                    tracing::error!(file = file.local_name, error = %e, "Required model file failed");
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!(file = file.local_name, error = %e, "Skipping optional model file");
                }
            }

            tracker.finish_file();
        }

        let artifact = ModelArtifact::from_dir(&dir, prefer_quantized)?;
        tracing::info!(
            model_id,
            graph = %artifact.graph_path.display(),
            auxiliary = artifact.auxiliary.len(),
            "Model files ready"
        );
        Ok(artifact)
    }

    /// Stream one URL into `dest` through a temporary file.
    ///
    /// Returns the number of bytes written.
    async fn download_file(
        &self,
        url: &str,
        dest: &Path,
        tracker: &ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        if is_usable_file(dest) {
            return Ok(0);
        }

        let tmp = temp_path(dest);
        let result = self.stream_to(url, &tmp, tracker, cancel).await;

        match result {
            Ok(bytes) => match tokio::fs::rename(&tmp, dest).await {
                Ok(()) => Ok(bytes),
                // another download of the same file finished first
                Err(_) if is_usable_file(dest) => {
                    remove_temp(&tmp).await;
                    Ok(bytes)
                }
                Err(e) => {
                    remove_temp(&tmp).await;
                    Err(DownloadError::write(dest, e).into())
                }
            },
            Err(e) => {
                remove_temp(&tmp).await;
                Err(e)
            }
        }
    }

    async fn stream_to(
        &self,
        url: &str,
        tmp: &Path,
        tracker: &ProgressTracker<'_>,
        cancel: &CancellationToken,
    ) -> Result<u64> {
        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(Error::Cancelled),
            response = self.client.get(url).send() => {
                response.map_err(|e| DownloadError::request(url, e))?
            }
        };

        let status = response.status();
        if !status.is_success() {
            return Err(DownloadError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            }
            .into());
        }

        let content_length = response.content_length();
        let mut file = tokio::fs::File::create(tmp)
            .await
            .map_err(|e| DownloadError::write(tmp, e))?;
        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;

        loop {
            let chunk = tokio::select! {
                biased;
                () = cancel.cancelled() => return Err(Error::Cancelled),
                chunk = stream.next() => chunk,
            };

            let Some(chunk) = chunk else { break };
            let bytes = chunk.map_err(|e| DownloadError::request(url, e))?;

            file.write_all(&bytes)
                .await
                .map_err(|e| DownloadError::write(tmp, e))?;
            written += bytes.len() as u64;

            if let Some(total) = content_length.filter(|&t| t > 0) {
                #[allow(clippy::cast_precision_loss)]
                tracker.report(written as f32 / total as f32);
            }
        }

        file.flush().await.map_err(|e| DownloadError::write(tmp, e))?;
        file.sync_all()
            .await
            .map_err(|e| DownloadError::write(tmp, e))?;

        Ok(written)
    }
}

/// Per-call suffix so concurrent downloads of one file never share a
/// temporary path.
static TEMP_SEQUENCE: AtomicU64 = AtomicU64::new(0);

fn temp_path(dest: &Path) -> PathBuf {
    let name = dest
        .file_name()
        .map_or_else(|| "download".into(), |n| n.to_string_lossy().into_owned());
    let seq = TEMP_SEQUENCE.fetch_add(1, Ordering::Relaxed);
    dest.with_file_name(format!("{name}.part-{}-{seq}", std::process::id()))
}

async fn remove_temp(tmp: &Path) {
    if let Err(e) = tokio::fs::remove_file(tmp).await {
        if e.kind() != std::io::ErrorKind::NotFound {
            tracing::warn!(path = %tmp.display(), error = %e, "Failed to remove partial download");
        }
    }
}
