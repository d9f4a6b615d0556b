//! Shared test helpers: a scripted extraction backend and downloader factory.

use crate::backend::{
    BackendResult, CollectionPage, DownloadRequest, ExtractionBackend, TransferProgress,
};
use crate::config::{Config, RetryConfig};
use crate::downloader::MediaDownloader;
use crate::error::BackendError;
use crate::types::{EncodingOption, MediaId, MediaRef};
use std::collections::{HashMap, VecDeque};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use tokio::sync::mpsc;

/// An mp4 rendition at the given height
pub(crate) fn encoding(token: &str, height: u32) -> EncodingOption {
    EncodingOption {
        token: token.to_string(),
        container: "mp4".to_string(),
        height: Some(height),
        fps: Some(30.0),
        filesize: None,
        has_video: true,
        has_audio: true,
        note: Some(format!("{height}p")),
    }
}

/// A fully resolved item offering 360p and 720p
pub(crate) fn media(id: &str, title: &str) -> MediaRef {
    MediaRef {
        id: MediaId::from(id),
        url: format!("https://www.youtube.com/watch?v={id}"),
        title: title.to_string(),
        thumbnail: None,
        duration_secs: Some(60.0),
        encodings: vec![encoding("18", 360), encoding("22", 720)],
    }
}

/// A collection member as a flat listing returns it (no renditions)
pub(crate) fn flat(id: &str) -> MediaRef {
    MediaRef {
        encodings: Vec::new(),
        ..media(id, &format!("Video {id}"))
    }
}

/// Retry settings with millisecond delays and no jitter
pub(crate) fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        initial_delay: Duration::from_millis(1),
        max_delay: Duration::from_millis(5),
        backoff_multiplier: 2.0,
        jitter: false,
    }
}

/// Extraction backend driven by a script, counting every call.
///
/// Items and collections are served from memory. Downloads write a small
/// file named after the request's stem unless a scripted failure is queued
/// for that item.
#[derive(Default)]
pub(crate) struct ScriptedBackend {
    items: HashMap<String, MediaRef>,
    collections: HashMap<String, Vec<MediaRef>>,
    page_failures: HashMap<(String, usize), BackendError>,
    download_script: Mutex<HashMap<String, VecDeque<BackendError>>>,
    always_fail: Option<BackendError>,
    progress: Vec<(u64, u64)>,
    download_delay: Option<Duration>,
    pub(crate) resolve_calls: AtomicU32,
    pub(crate) page_calls: AtomicU32,
    pub(crate) download_calls: AtomicU32,
    pub(crate) requests: Mutex<Vec<DownloadRequest>>,
}

impl ScriptedBackend {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_item(mut self, item: MediaRef) -> Self {
        self.items.insert(item.id.to_string(), item);
        self
    }

    /// Register a collection; members are also resolvable as items
    pub(crate) fn with_collection(mut self, id: &str, members: Vec<MediaRef>) -> Self {
        for member in &members {
            self.items
                .entry(member.id.to_string())
                .or_insert_with(|| media(member.id.as_str(), &member.title));
        }
        self.collections.insert(id.to_string(), members);
        self
    }

    /// Fail the 0-based page `index` of a collection
    pub(crate) fn fail_page(mut self, id: &str, index: usize, error: BackendError) -> Self {
        self.page_failures.insert((id.to_string(), index), error);
        self
    }

    /// Queue failures for one item's downloads; later calls succeed
    pub(crate) fn script_downloads(self, id: &str, failures: Vec<BackendError>) -> Self {
        self.download_script
            .lock()
            .unwrap()
            .insert(id.to_string(), failures.into());
        self
    }

    /// Every download fails with `error`
    pub(crate) fn always_fail(mut self, error: BackendError) -> Self {
        self.always_fail = Some(error);
        self
    }

    /// Progress reports as (downloaded, total) pairs sent before completing
    pub(crate) fn with_progress(mut self, steps: Vec<(u64, u64)>) -> Self {
        self.progress = steps;
        self
    }

    /// Hold each download open for `delay` with a `.part` file on disk
    pub(crate) fn with_download_delay(mut self, delay: Duration) -> Self {
        self.download_delay = Some(delay);
        self
    }

    pub(crate) fn downloads(&self) -> u32 {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait::async_trait]
impl ExtractionBackend for ScriptedBackend {
    async fn resolve_item(&self, target: &str) -> BackendResult<MediaRef> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        self.items
            .get(target)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(format!("Video unavailable: {target}")))
    }

    async fn resolve_page(
        &self,
        target: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> BackendResult<CollectionPage> {
        self.page_calls.fetch_add(1, Ordering::SeqCst);
        let index: usize = continuation.and_then(|c| c.parse().ok()).unwrap_or(0);
        if let Some(error) = self.page_failures.get(&(target.to_string(), index)) {
            return Err(error.clone());
        }
        let members = self
            .collections
            .get(target)
            .ok_or_else(|| BackendError::NotFound(format!("playlist does not exist: {target}")))?;

        let start = index * page_size;
        let end = (start + page_size).min(members.len());
        let entries = members.get(start..end).unwrap_or_default().to_vec();
        Ok(CollectionPage {
            title: (index == 0).then(|| format!("Playlist {target}")),
            entries,
            continuation: (end < members.len()).then(|| (index + 1).to_string()),
        })
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<TransferProgress>,
    ) -> BackendResult<PathBuf> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        self.requests.lock().unwrap().push(request.clone());

        if let Some(error) = &self.always_fail {
            return Err(error.clone());
        }
        let scripted = self
            .download_script
            .lock()
            .unwrap()
            .get_mut(&request.media_id)
            .and_then(|queue| queue.pop_front());
        if let Some(error) = scripted {
            return Err(error);
        }

        let output = request.output_dir.join(format!("{}.mp4", request.file_stem));
        if let Some(delay) = self.download_delay {
            let partial = request
                .output_dir
                .join(format!("{}.mp4.part", request.file_stem));
            tokio::fs::write(&partial, b"partial").await.unwrap();
            tokio::time::sleep(delay).await;
            tokio::fs::rename(&partial, &output).await.unwrap();
        }

        for &(downloaded, total) in &self.progress {
            let _ = progress
                .send(TransferProgress {
                    downloaded_bytes: downloaded,
                    total_bytes: Some(total),
                    speed_bps: Some(1024),
                })
                .await;
        }

        tokio::fs::write(&output, request.media_id.as_bytes())
            .await
            .unwrap();
        Ok(output)
    }
}

/// Build a downloader over `backend` writing into a fresh temp directory.
/// Returns the downloader and the tempdir (which must be kept alive).
pub(crate) async fn create_test_downloader(
    backend: Arc<ScriptedBackend>,
    configure: impl FnOnce(&mut Config),
) -> (MediaDownloader, tempfile::TempDir) {
    let temp_dir = tempfile::tempdir().unwrap();

    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("downloads");
    config.retry = fast_retry(3);
    config.batch.repass_cooldown = Duration::ZERO;
    configure(&mut config);

    let downloader = MediaDownloader::new(config, backend).await.unwrap();
    (downloader, temp_dir)
}
