//! In-memory extraction backend for integration tests

use async_trait::async_trait;
use media_dl::backend::{BackendResult, CollectionPage, DownloadRequest, TransferProgress};
use media_dl::{BackendError, EncodingOption, ExtractionBackend, MediaId, MediaRef};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::mpsc;

/// A muxed mp4 rendition
pub fn mp4(token: &str, height: u32) -> EncodingOption {
    EncodingOption {
        token: token.to_string(),
        container: "mp4".to_string(),
        height: Some(height),
        fps: Some(30.0),
        filesize: None,
        has_video: true,
        has_audio: true,
        note: None,
    }
}

/// An item offering 360p and 720p mp4
pub fn video(id: &str) -> MediaRef {
    MediaRef {
        id: MediaId::from(id),
        url: format!("https://www.youtube.com/watch?v={id}"),
        title: format!("Video {id}"),
        thumbnail: None,
        duration_secs: None,
        encodings: vec![mp4("18", 360), mp4("22", 720)],
    }
}

/// In-memory backend: collections are served in fixed-size pages whose
/// continuation token is the next page index.
#[derive(Default)]
pub struct FakeBackend {
    pub items: HashMap<String, MediaRef>,
    pub collections: HashMap<String, Vec<MediaRef>>,
    /// Every download fails with this error when set
    pub download_error: Option<BackendError>,
    pub download_calls: AtomicU32,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_collection(mut self, id: &str, member_ids: &[&str]) -> Self {
        let members: Vec<MediaRef> = member_ids
            .iter()
            .map(|m| MediaRef {
                encodings: Vec::new(),
                ..video(m)
            })
            .collect();
        for m in member_ids {
            self.items.insert(m.to_string(), video(m));
        }
        self.collections.insert(id.to_string(), members);
        self
    }

    pub fn with_item(mut self, id: &str) -> Self {
        self.items.insert(id.to_string(), video(id));
        self
    }

    pub fn failing_downloads(mut self, error: BackendError) -> Self {
        self.download_error = Some(error);
        self
    }

    pub fn downloads(&self) -> u32 {
        self.download_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ExtractionBackend for FakeBackend {
    async fn resolve_item(&self, target: &str) -> BackendResult<MediaRef> {
        self.items
            .get(target)
            .cloned()
            .ok_or_else(|| BackendError::NotFound(target.to_string()))
    }

    async fn resolve_page(
        &self,
        target: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> BackendResult<CollectionPage> {
        let members = self
            .collections
            .get(target)
            .ok_or_else(|| BackendError::NotFound(target.to_string()))?;
        let index: usize = continuation.and_then(|c| c.parse().ok()).unwrap_or(0);
        let start = (index * page_size).min(members.len());
        let end = (start + page_size).min(members.len());
        Ok(CollectionPage {
            title: Some(format!("Playlist {target}")),
            entries: members[start..end].to_vec(),
            continuation: (end < members.len()).then(|| (index + 1).to_string()),
        })
    }

    async fn download(
        &self,
        request: &DownloadRequest,
        _progress: mpsc::Sender<TransferProgress>,
    ) -> BackendResult<PathBuf> {
        self.download_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = &self.download_error {
            return Err(error.clone());
        }
        let path = request.output_dir.join(format!("{}.mp4", request.file_stem));
        tokio::fs::write(&path, format!("content of {}", request.media_id))
            .await
            .map_err(|e| BackendError::Other(e.to_string()))?;
        Ok(path)
    }
}
