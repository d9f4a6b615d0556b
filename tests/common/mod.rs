//! Common test utilities for media-dl integration tests

#[allow(dead_code)]
pub mod fixtures;

pub use fixtures::*;

use media_dl::{Config, ExtractionBackend, MediaDownloader};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Config writing into `temp_dir` with millisecond retry delays
pub fn test_config(temp_dir: &TempDir) -> Config {
    let mut config = Config::default();
    config.download.download_dir = temp_dir.path().join("downloads");
    config.retry.initial_delay = Duration::from_millis(1);
    config.retry.max_delay = Duration::from_millis(4);
    config.retry.jitter = false;
    config.batch.repass_cooldown = Duration::ZERO;
    config
}

/// Helper to create a downloader over `backend` in a fresh temp directory
#[allow(dead_code)]
pub async fn create_downloader(
    backend: Arc<dyn ExtractionBackend>,
    configure: impl FnOnce(&mut Config),
) -> (MediaDownloader, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let mut config = test_config(&temp_dir);
    configure(&mut config);
    let downloader = MediaDownloader::new(config, backend)
        .await
        .expect("Failed to create downloader");
    (downloader, temp_dir)
}
