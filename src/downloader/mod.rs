//! Batch download orchestration.
//!
//! [`MediaDownloader`] ties the pieces together:
//! - [`lookup`](MediaDownloader::lookup) classifies a link and resolves it
//! - [`plan_tasks`](MediaDownloader::plan_tasks) picks one rendition per item
//! - [`run`](MediaDownloader::run) downloads a batch with bounded retries
//! - [`pack`](MediaDownloader::pack) zips whatever completed
//!
//! Submodules:
//! - [`naming`] - identifier-suffixed output filenames
//! - `task` - one task's attempts, progress and cleanup
//! - `batch` - passes over the task set

mod batch;
pub mod naming;
mod task;

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
pub(crate) mod test_helpers;
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests;

use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::archive::{ArchivePackager, PackedArchive};
use crate::backend::{ExtractionBackend, YtDlpBackend};
use crate::classifier::RequestMode;
use crate::config::Config;
use crate::error::{Error, Result};
use crate::resolver::{EncodingPreference, MetadataResolver, Resolved, select_encoding};
use crate::status::StatusSink;
use crate::throttle::RequestThrottle;
use crate::types::{BatchResult, DownloadTask, Event, FailedItem, MediaRef, TaskId};
use task::TaskRunner;

/// Event channel capacity; slower subscribers see `RecvError::Lagged`
const EVENT_BUFFER: usize = 1000;

/// Items turned into tasks, plus the ones that could not be
#[derive(Debug, Default)]
pub struct TaskPlan {
    /// Ready to run
    pub tasks: Vec<DownloadTask>,
    /// Items that could not be resolved or had no acceptable rendition
    pub rejected: Vec<(MediaRef, Error)>,
}

/// Main downloader instance (cloneable - all fields are Arc-wrapped)
#[derive(Clone)]
pub struct MediaDownloader {
    /// Configuration (wrapped in Arc for sharing across tasks)
    pub(crate) config: Arc<Config>,
    /// Extraction backend shared by resolver and workers
    pub(crate) backend: Arc<dyn ExtractionBackend>,
    /// Metadata resolver over the same backend and throttle
    pub(crate) resolver: MetadataResolver,
    /// Per-task status map
    pub(crate) status: StatusSink,
    /// Event broadcast channel sender (multiple subscribers supported)
    pub(crate) event_tx: broadcast::Sender<Event>,
    /// Request pacing shared with the resolver
    pub(crate) throttle: RequestThrottle,
    /// Tripped by [`cancel`](Self::cancel); never reset
    pub(crate) cancel: CancellationToken,
}

impl MediaDownloader {
    /// Create a downloader over `backend`.
    ///
    /// Validates the configuration and creates the download directory.
    pub async fn new(config: Config, backend: Arc<dyn ExtractionBackend>) -> Result<Self> {
        config.validate()?;

        tokio::fs::create_dir_all(&config.download.download_dir)
            .await
            .map_err(|e| {
                Error::Io(std::io::Error::new(
                    e.kind(),
                    format!(
                        "Failed to create download directory '{}': {}",
                        config.download.download_dir.display(),
                        e
                    ),
                ))
            })?;

        let (event_tx, _rx) = broadcast::channel(EVENT_BUFFER);
        let throttle = RequestThrottle::new(config.backend.min_request_interval);
        let resolver = MetadataResolver::new(backend.clone(), &config, throttle.clone());

        info!(
            download_dir = %config.download.download_dir.display(),
            max_concurrent_downloads = config.download.max_concurrent_downloads,
            max_retries = config.retry.max_retries,
            "downloader initialized"
        );

        Ok(Self {
            config: Arc::new(config),
            backend,
            resolver,
            status: StatusSink::new(),
            event_tx,
            throttle,
            cancel: CancellationToken::new(),
        })
    }

    /// Create a downloader driving the `yt-dlp` executable
    ///
    /// # Examples
    ///
    /// ```no_run
    /// use media_dl::{Config, MediaDownloader};
    ///
    /// #[tokio::main]
    /// async fn main() -> Result<(), Box<dyn std::error::Error>> {
    ///     let downloader = MediaDownloader::with_ytdlp(Config::default()).await?;
    ///
    ///     let mut events = downloader.subscribe();
    ///     tokio::spawn(async move {
    ///         while let Ok(event) = events.recv().await {
    ///             println!("{:?}", event);
    ///         }
    ///     });
    ///     Ok(())
    /// }
    /// ```
    pub async fn with_ytdlp(config: Config) -> Result<Self> {
        let backend = YtDlpBackend::from_config(&config.backend)?;
        Self::new(config, Arc::new(backend)).await
    }

    /// Subscribe to download events
    ///
    /// Each subscriber receives all events independently.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.event_tx.subscribe()
    }

    /// Handle to the per-task status map
    pub fn status(&self) -> StatusSink {
        self.status.clone()
    }

    /// The metadata resolver used by [`lookup`](Self::lookup)
    pub fn resolver(&self) -> &MetadataResolver {
        &self.resolver
    }

    /// Get the current configuration
    pub fn get_config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    /// Classify `url` and resolve what it names
    pub async fn lookup(&self, url: &str, mode: RequestMode) -> Result<Resolved> {
        self.resolver.resolve_url(url, mode).await
    }

    /// Choose one rendition per item and build the tasks.
    ///
    /// Items listed without renditions (collection members) are resolved
    /// first. Items that fail to resolve or offer nothing matching
    /// `preference` land in [`TaskPlan::rejected`].
    pub async fn plan_tasks(
        &self,
        items: Vec<MediaRef>,
        preference: &EncodingPreference,
    ) -> TaskPlan {
        let mut plan = TaskPlan::default();
        for item in items {
            let media = if item.has_encodings() {
                item
            } else {
                match self.resolver.resolve_item(&item.id).await {
                    Ok(resolved) => resolved,
                    Err(e) => {
                        warn!(media_id = %item.id, error = %e, "could not resolve item");
                        plan.rejected.push((item, e));
                        continue;
                    }
                }
            };

            let token = match select_encoding(&media, preference) {
                Ok(option) => option.token.clone(),
                Err(e) => {
                    warn!(media_id = %media.id, error = %e, "no acceptable rendition");
                    plan.rejected.push((media, e));
                    continue;
                }
            };
            match DownloadTask::new(media.clone(), &token) {
                Ok(task) => plan.tasks.push(task),
                Err(e) => plan.rejected.push((media, e)),
            }
        }
        plan
    }

    /// Download `tasks` using the configured retry budget
    pub async fn run(&self, tasks: Vec<DownloadTask>) -> BatchResult {
        self.run_with_retries(tasks, self.config.retry.max_retries)
            .await
    }

    /// Download `tasks`, attempting each at most `1 + max_retries` times.
    ///
    /// One task failing never aborts the batch. Every task ends up in either
    /// `completed` or `failed` of the result.
    pub async fn run_with_retries(
        &self,
        tasks: Vec<DownloadTask>,
        max_retries: u32,
    ) -> BatchResult {
        let runner = Arc::new(TaskRunner {
            backend: self.backend.clone(),
            config: self.config.clone(),
            max_retries,
            event_tx: self.event_tx.clone(),
            status: self.status.clone(),
            throttle: self.throttle.clone(),
            cancel: self.cancel.clone(),
        });
        batch::run_batch(runner, tasks).await
    }

    /// Resolve `url`, plan every item it names and download them.
    ///
    /// Items that could not be planned are reported as failed with zero
    /// attempts. A collection that was only partially listed still downloads
    /// the members that were listed, and the result carries the listing
    /// error in [`BatchResult::listing_interrupted`].
    pub async fn download_url(
        &self,
        url: &str,
        mode: RequestMode,
        preference: &EncodingPreference,
    ) -> Result<BatchResult> {
        let resolved = self.lookup(url, mode).await?;
        let listing_interrupted = match &resolved {
            Resolved::Collection(listing) => listing.interrupted.clone(),
            Resolved::Item(_) => None,
        };
        if let (Resolved::Collection(listing), Some(e)) = (&resolved, &listing_interrupted) {
            warn!(
                collection = %listing.collection.id,
                listed = listing.collection.members.len(),
                error = %e,
                "downloading a partially listed collection"
            );
        }

        let plan = self.plan_tasks(resolved.into_items(), preference).await;
        let mut result = self.run(plan.tasks).await;
        result.listing_interrupted = listing_interrupted;
        result
            .failed
            .extend(plan.rejected.into_iter().map(|(media, error)| FailedItem {
                task_id: TaskId::next(),
                code: error.code().to_string(),
                user_facing: error.user_facing(),
                error: error.to_string(),
                media,
                attempts: 0,
            }));
        Ok(result)
    }

    /// Zip every completed file of `result`
    pub async fn pack(&self, result: &BatchResult) -> Result<PackedArchive> {
        ArchivePackager::new()
            .pack_async(result.completed_paths())
            .await
    }

    /// Cancel the running batch.
    ///
    /// In-flight downloads are abandoned and their partial files removed;
    /// pending tasks are not started. A cancelled downloader stays cancelled.
    pub fn cancel(&self) {
        info!("cancelling downloads");
        self.cancel.cancel();
    }

    /// Whether [`cancel`](Self::cancel) was called
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }
}
