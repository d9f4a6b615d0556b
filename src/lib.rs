//! # media-dl
//!
//! Download orchestration library for video and playlist links.
//!
//! ## Design Philosophy
//!
//! media-dl is designed to be:
//! - **Library-first** - No CLI or UI, purely a Rust crate for embedding
//! - **Backend-agnostic** - Extraction sits behind [`ExtractionBackend`];
//!   [`YtDlpBackend`] drives the `yt-dlp` executable
//! - **Bounded** - Every retry loop and re-pass has a configured ceiling
//! - **Event-driven** - Consumers subscribe to events or poll a [`StatusSink`]
//!
//! ## Quick Start
//!
//! ```no_run
//! use media_dl::{Config, EncodingPreference, MediaDownloader, RequestMode};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let downloader = MediaDownloader::with_ytdlp(Config::default()).await?;
//!
//!     // Subscribe to events
//!     let mut events = downloader.subscribe();
//!     tokio::spawn(async move {
//!         while let Ok(event) = events.recv().await {
//!             println!("Event: {:?}", event);
//!         }
//!     });
//!
//!     let result = downloader
//!         .download_url(
//!             "https://www.youtube.com/playlist?list=PL123",
//!             RequestMode::Collection,
//!             &EncodingPreference::container("mp4"),
//!         )
//!         .await?;
//!
//!     let archive = downloader.pack(&result).await?;
//!     std::fs::write("playlist.zip", &archive.bytes)?;
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::unwrap_used)]
#![warn(clippy::expect_used)]

/// ZIP packaging of completed downloads
pub mod archive;
/// Extraction backend trait and the yt-dlp adapter
pub mod backend;
/// Link classification
pub mod classifier;
/// Configuration types
pub mod config;
/// Batch orchestration
pub mod downloader;
/// Error types
pub mod error;
/// Metadata resolution and rendition selection
pub mod resolver;
/// Retry logic with exponential backoff
pub mod retry;
/// Per-task status tracking
pub mod status;
/// Backend request pacing
pub mod throttle;
/// Core data types
pub mod types;

// Re-export commonly used types
pub use archive::{ArchivePackager, ArchiveReport, PackedArchive};
pub use backend::{ExtractionBackend, YtDlpBackend};
pub use classifier::{RequestMode, UrlKind, classify, classify_with_mode};
pub use config::{Config, EncodingFilter, FilenamePolicy};
pub use downloader::{MediaDownloader, TaskPlan};
pub use error::{ArchiveSkip, BackendError, Error, Result, UserFacing};
pub use resolver::{CollectionResolution, EncodingPreference, MetadataResolver, Resolved};
pub use status::StatusSink;
pub use types::{
    BatchResult, CollectionId, CollectionRef, CompletedItem, DownloadTask, EncodingOption, Event,
    FailedItem, MediaId, MediaRef, TaskId, TaskState, TaskStatus,
};

/// Cancel the downloader's batch when the process receives a termination signal.
///
/// Waits for a termination signal and then calls the downloader's `cancel()` method.
///
/// - **Unix:** listens for SIGTERM and SIGINT, with fallbacks if signal registration fails.
/// - **Windows/other:** listens for Ctrl+C via `tokio::signal::ctrl_c()`.
///
/// # Example
///
/// ```no_run
/// use media_dl::{Config, MediaDownloader, cancel_on_signal};
///
/// #[tokio::main]
/// async fn main() -> Result<(), Box<dyn std::error::Error>> {
///     let downloader = MediaDownloader::with_ytdlp(Config::default()).await?;
///
///     tokio::spawn(cancel_on_signal(downloader.clone()));
///     let result = downloader.run(Vec::new()).await;
///     println!("{} completed", result.completed.len());
///     Ok(())
/// }
/// ```
pub async fn cancel_on_signal(downloader: MediaDownloader) {
    wait_for_signal().await;
    downloader.cancel();
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{SignalKind, signal};

    // Signal registration may fail in restricted environments (containers, tests)
    let sigterm_result = signal(SignalKind::terminate());
    let sigint_result = signal(SignalKind::interrupt());

    match (sigterm_result, sigint_result) {
        (Ok(mut sigterm), Ok(mut sigint)) => {
            tokio::select! {
                _ = sigterm.recv() => {
                    tracing::info!("Received SIGTERM signal");
                }
                _ = sigint.recv() => {
                    tracing::info!("Received SIGINT signal (Ctrl+C)");
                }
            }
        }
        (Err(e), Ok(mut sigint)) => {
            tracing::warn!(error = %e, "Could not register SIGTERM handler, waiting for SIGINT only");
            sigint.recv().await;
            tracing::info!("Received SIGINT signal (Ctrl+C)");
        }
        (Ok(mut sigterm), Err(e)) => {
            tracing::warn!(error = %e, "Could not register SIGINT handler, waiting for SIGTERM only");
            sigterm.recv().await;
            tracing::info!("Received SIGTERM signal");
        }
        (Err(e), Err(_)) => {
            tracing::error!(error = %e, "Could not register any signal handlers, using ctrl_c fallback");
            tokio::signal::ctrl_c().await.ok();
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received Ctrl+C signal");
        }
        Err(e) => {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C signal");
        }
    }
}
