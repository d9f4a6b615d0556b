//! Extraction backend seam
//!
//! Everything media-specific (site scraping, format negotiation, transport)
//! lives behind [`ExtractionBackend`]. The library ships a [`YtDlpBackend`]
//! adapter that drives the `yt-dlp` executable; tests plug in scripted
//! implementations.

mod ytdlp;

pub use ytdlp::YtDlpBackend;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tokio::sync::mpsc;

use crate::error::BackendError;
use crate::types::MediaRef;

/// Result type for backend calls
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// One page of a flat collection listing
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct CollectionPage {
    /// Collection title (backends may only report it on the first page)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// Members on this page, without renditions
    pub entries: Vec<MediaRef>,
    /// Token for the following page; `None` on the last page
    #[serde(skip_serializing_if = "Option::is_none")]
    pub continuation: Option<String>,
}

/// What to fetch and where to put it
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownloadRequest {
    /// Item URL
    pub url: String,
    /// Item identifier, used to find the output file
    pub media_id: String,
    /// Backend format token
    pub format_token: String,
    /// Directory the file lands in
    pub output_dir: PathBuf,
    /// Output filename without extension; the backend appends the container's
    pub file_stem: String,
}

impl DownloadRequest {
    /// Output path template with a `%(ext)s` placeholder for the extension.
    ///
    /// Literal `%` in the stem is doubled so the backend does not read it as
    /// a field reference.
    pub fn output_template(&self) -> PathBuf {
        let stem = self.file_stem.replace('%', "%%");
        self.output_dir.join(format!("{stem}.%(ext)s"))
    }
}

/// Transfer progress reported by a backend while downloading
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct TransferProgress {
    /// Bytes written so far
    pub downloaded_bytes: u64,
    /// Expected total, when the backend knows it
    pub total_bytes: Option<u64>,
    /// Instantaneous throughput in bytes per second
    pub speed_bps: Option<u64>,
}

impl TransferProgress {
    /// Completion fraction in 0.0..=1.0, if the total is known
    pub fn fraction(&self) -> Option<f32> {
        match self.total_bytes {
            Some(total) if total > 0 => {
                Some((self.downloaded_bytes as f64 / total as f64).clamp(0.0, 1.0) as f32)
            }
            _ => None,
        }
    }
}

/// Abstraction over the media extraction backend.
///
/// All three operations fail with [`BackendError`]; the variant decides
/// whether the orchestrator retries.
#[async_trait::async_trait]
pub trait ExtractionBackend: Send + Sync {
    /// Resolve one item, including its raw (unfiltered) renditions
    async fn resolve_item(&self, target: &str) -> BackendResult<MediaRef>;

    /// List one page of a collection without resolving members.
    ///
    /// `continuation` is `None` for the first page and otherwise the token
    /// returned by the previous page.
    async fn resolve_page(
        &self,
        target: &str,
        continuation: Option<&str>,
        page_size: usize,
    ) -> BackendResult<CollectionPage>;

    /// Fetch one rendition to disk and return the written file.
    ///
    /// Progress is best-effort; a closed receiver must not fail the download.
    async fn download(
        &self,
        request: &DownloadRequest,
        progress: mpsc::Sender<TransferProgress>,
    ) -> BackendResult<PathBuf>;
}
