//! Execution of a single download task: attempts, backoff, progress
//! forwarding, cancellation and partial-file cleanup.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::naming;
use crate::backend::{DownloadRequest, ExtractionBackend, TransferProgress};
use crate::config::Config;
use crate::error::{BackendError, Error, Result};
use crate::retry::{Backoff, IsRetryable};
use crate::status::StatusSink;
use crate::throttle::RequestThrottle;
use crate::types::{CompletedItem, DownloadTask, Event, FailedItem};

/// Progress messages buffered between the backend and the forwarder
const PROGRESS_BUFFER: usize = 64;

/// Allowance for filesystems that store modification times coarsely
const MTIME_SLACK: Duration = Duration::from_secs(2);

/// How one pass left a task
#[derive(Debug)]
pub(crate) enum TaskOutcome {
    Completed(CompletedItem),
    Failed(FailedItem),
    /// Rate limited with budget left; run again on the next pass
    Deferred { task: DownloadTask, attempts: u32 },
}

/// Everything a task needs to run, shared by all tasks of one batch
pub(crate) struct TaskRunner {
    pub(crate) backend: Arc<dyn ExtractionBackend>,
    pub(crate) config: Arc<Config>,
    pub(crate) max_retries: u32,
    pub(crate) event_tx: broadcast::Sender<Event>,
    pub(crate) status: StatusSink,
    pub(crate) throttle: RequestThrottle,
    pub(crate) cancel: CancellationToken,
}

impl TaskRunner {
    /// Record an event in the status sink and broadcast it
    pub(crate) async fn emit(&self, event: Event) {
        self.status.record(&event).await;
        // No subscribers is fine
        self.event_tx.send(event).ok();
    }

    /// Attempts allowed per task, across all passes
    fn budget(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Run `task` until it completes, fails for good, or is deferred.
    ///
    /// `attempts` is the number of attempts earlier passes already used.
    /// On the last pass a rate-limited task backs off inline instead of
    /// being deferred.
    pub(crate) async fn run(
        &self,
        task: DownloadTask,
        mut attempts: u32,
        last_pass: bool,
    ) -> TaskOutcome {
        let stem = naming::file_stem(
            &task.media,
            self.config.download.filename_policy,
            self.config.download.max_title_len,
        );
        let request = DownloadRequest {
            url: task.media.url.clone(),
            media_id: task.media.id.to_string(),
            format_token: task.encoding.token.clone(),
            output_dir: self.config.download.download_dir.clone(),
            file_stem: stem,
        };
        let mut backoff = Backoff::new(&self.config.retry);
        let mut fraction = 0.0f32;
        let started = SystemTime::now();

        loop {
            if self.cancel.is_cancelled() {
                return self.fail(task, attempts, Error::Cancelled, &request, started).await;
            }

            attempts += 1;
            info!(
                task_id = %task.id,
                media_id = %task.media.id,
                attempt = attempts,
                "starting download"
            );
            self.emit(Event::TaskStarted {
                id: task.id,
                attempt: attempts,
            })
            .await;

            let error = match self.attempt(&task, &request, &mut fraction).await {
                Ok(path) => {
                    info!(task_id = %task.id, path = %path.display(), "download complete");
                    self.emit(Event::TaskCompleted {
                        id: task.id,
                        path: path.clone(),
                    })
                    .await;
                    return TaskOutcome::Completed(CompletedItem {
                        task_id: task.id,
                        media: task.media,
                        path,
                        attempts,
                    });
                }
                Err(e) => e,
            };

            let budget_left = attempts < self.budget();
            if !budget_left || !error.is_retryable() {
                return self.fail(task, attempts, error, &request, started).await;
            }

            if matches!(error, Error::Backend(BackendError::RateLimited(_))) && !last_pass {
                warn!(
                    task_id = %task.id,
                    attempt = attempts,
                    error = %error,
                    "rate limited, deferring to next pass"
                );
                self.emit(Event::TaskFailed {
                    id: task.id,
                    error: error.to_string(),
                    code: error.code().to_string(),
                    will_retry: true,
                })
                .await;
                return TaskOutcome::Deferred { task, attempts };
            }

            let delay = backoff.next_delay();
            warn!(
                task_id = %task.id,
                attempt = attempts,
                max_attempts = self.budget(),
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "download failed, retrying"
            );
            self.emit(Event::TaskRetrying {
                id: task.id,
                attempt: attempts,
                error: error.to_string(),
                delay_ms: delay.as_millis() as u64,
            })
            .await;

            tokio::select! {
                _ = self.cancel.cancelled() => {}
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One backend call, forwarding progress until it returns or the batch is cancelled
    async fn attempt(
        &self,
        task: &DownloadTask,
        request: &DownloadRequest,
        fraction: &mut f32,
    ) -> Result<PathBuf> {
        tokio::select! {
            _ = self.cancel.cancelled() => return Err(Error::Cancelled),
            _ = self.throttle.acquire() => {}
        }

        let (progress_tx, mut progress_rx) = mpsc::channel::<TransferProgress>(PROGRESS_BUFFER);
        let download = self.backend.download(request, progress_tx);
        tokio::pin!(download);

        let result = loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    info!(task_id = %task.id, "download cancelled");
                    return Err(Error::Cancelled);
                }
                result = &mut download => break result,
                Some(progress) = progress_rx.recv() => {
                    self.forward_progress(task, progress, fraction).await;
                }
            }
        };

        while let Ok(progress) = progress_rx.try_recv() {
            self.forward_progress(task, progress, fraction).await;
        }
        result.map_err(Error::from)
    }

    async fn forward_progress(
        &self,
        task: &DownloadTask,
        progress: TransferProgress,
        fraction: &mut f32,
    ) {
        if let Some(reported) = progress.fraction() {
            *fraction = fraction.max(reported);
        }
        self.emit(Event::TaskProgress {
            id: task.id,
            fraction: *fraction,
            speed_bps: progress.speed_bps,
        })
        .await;
    }

    /// Terminal failure: clean up, report, and build the failed record
    async fn fail(
        &self,
        task: DownloadTask,
        attempts: u32,
        error: Error,
        request: &DownloadRequest,
        started: SystemTime,
    ) -> TaskOutcome {
        let cancelled = matches!(error, Error::Cancelled);
        if cancelled || self.config.download.cleanup_partial_files {
            // A cancelled task also drops outputs it wrote itself
            let outputs_since = cancelled.then(|| {
                started
                    .checked_sub(MTIME_SLACK)
                    .unwrap_or(SystemTime::UNIX_EPOCH)
            });
            let removed =
                remove_partial_files(&request.output_dir, &request.file_stem, outputs_since)
                    .await;
            if removed > 0 {
                debug!(task_id = %task.id, removed, "removed partial files");
            }
        }

        if cancelled {
            info!(task_id = %task.id, attempts, "task cancelled");
        } else {
            warn!(
                task_id = %task.id,
                media_id = %task.media.id,
                attempts,
                error = %error,
                "download failed"
            );
        }

        self.emit(Event::TaskFailed {
            id: task.id,
            error: error.to_string(),
            code: error.code().to_string(),
            will_retry: false,
        })
        .await;

        TaskOutcome::Failed(FailedItem {
            task_id: task.id,
            media: task.media,
            error: error.to_string(),
            code: error.code().to_string(),
            user_facing: error.user_facing(),
            attempts,
        })
    }
}

/// Remove files a failed or abandoned download left behind for `stem`.
///
/// Partial transfers (`.part`, `.ytdl`, fragment and per-format
/// intermediates) are always removed. Other files for `stem` are removed
/// only when `outputs_since` is set and they were modified at or after it,
/// so a finished output from an earlier run survives. Returns the number of
/// files removed.
pub(crate) async fn remove_partial_files(
    dir: &Path,
    stem: &str,
    outputs_since: Option<SystemTime>,
) -> usize {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(_) => return 0,
    };

    let mut removed = 0;
    while let Ok(Some(entry)) = entries.next_entry().await {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(rest) = name.strip_prefix(stem) else {
            continue;
        };
        if !rest.starts_with('.') {
            continue;
        }
        if !is_partial_suffix(rest) && !written_since(&entry, outputs_since).await {
            continue;
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => removed += 1,
            Err(e) => {
                warn!(path = %entry.path().display(), error = %e, "failed to remove partial file");
            }
        }
    }
    removed
}

/// Whether `entry` was modified at or after `since`; unknown times count as older
async fn written_since(entry: &tokio::fs::DirEntry, since: Option<SystemTime>) -> bool {
    let Some(since) = since else {
        return false;
    };
    match entry.metadata().await.and_then(|m| m.modified()) {
        Ok(modified) => modified >= since,
        Err(_) => false,
    }
}

/// `rest` is what follows the stem, starting with '.'
fn is_partial_suffix(rest: &str) -> bool {
    rest.ends_with(".part")
        || rest.ends_with(".ytdl")
        || rest.contains(".part-Frag")
        || rest.ends_with(".temp")
        || rest
            .strip_prefix(".f")
            .and_then(|r| r.split('.').next())
            .is_some_and(|n| !n.is_empty() && n.chars().all(|c| c.is_ascii_digit()))
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_suffixes() {
        assert!(is_partial_suffix(".mp4.part"));
        assert!(is_partial_suffix(".mp4.ytdl"));
        assert!(is_partial_suffix(".f137.mp4"));
        assert!(is_partial_suffix(".f137.mp4.part-Frag12"));
        assert!(!is_partial_suffix(".mp4"));
        assert!(!is_partial_suffix(".flv"));
    }

    #[tokio::test]
    async fn removes_only_partials_unless_asked() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "Clip [ABC].mp4",
            "Clip [ABC].mp4.part",
            "Clip [ABC].f137.mp4",
            "Clip [ABC]x.mp4.part",
            "Other [DEF].mp4.part",
        ] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }

        let removed = remove_partial_files(dir.path(), "Clip [ABC]", None).await;
        assert_eq!(removed, 2);
        assert!(dir.path().join("Clip [ABC].mp4").exists());
        assert!(dir.path().join("Clip [ABC]x.mp4.part").exists());
        assert!(dir.path().join("Other [DEF].mp4.part").exists());

        let removed =
            remove_partial_files(dir.path(), "Clip [ABC]", Some(SystemTime::UNIX_EPOCH)).await;
        assert_eq!(removed, 1);
        assert!(!dir.path().join("Clip [ABC].mp4").exists());
    }

    #[tokio::test]
    async fn earlier_finished_output_survives_cancellation_cleanup() {
        let dir = tempfile::tempdir().unwrap();
        let earlier = dir.path().join("Clip [ABC].mp4");
        std::fs::write(&earlier, b"finished yesterday").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&earlier)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(3600))
            .unwrap();

        let task_started = SystemTime::now() - Duration::from_secs(60);
        std::fs::write(dir.path().join("Clip [ABC].mp4.part"), b"x").unwrap();
        std::fs::write(dir.path().join("Clip [ABC].webm"), b"x").unwrap();

        let removed = remove_partial_files(dir.path(), "Clip [ABC]", Some(task_started)).await;

        assert_eq!(removed, 2);
        assert!(earlier.exists());
        assert!(!dir.path().join("Clip [ABC].webm").exists());
    }

    #[tokio::test]
    async fn missing_directory_removes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let gone = dir.path().join("nope");
        assert_eq!(remove_partial_files(&gone, "x", Some(SystemTime::UNIX_EPOCH)).await, 0);
    }
}
